//! Text transforms shared by both controllers.
//!
//! Message content goes through [`format_message`] on every render, including every partial
//! update of a streaming reply, so the transform has to be pure: the same buffer always
//! yields the same [`Formatted`] tree, and a tree is never formatted a second time.

use regex::RegexBuilder;
use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text(String),
    Strong(Vec<Span>),
    Emphasis(Vec<Span>),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Line(Vec<Span>),
    /// A line that started with `• `; the bullet itself is not part of the spans.
    Bullet(Vec<Span>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Formatted {
    pub blocks: Vec<Block>,
}

/// Anything that can be turned into a [`Formatted`] tree.
///
/// Formatting an already formatted tree is the identity.
pub trait Format {
    fn format(&self) -> Formatted;
}

impl Format for str {
    fn format(&self) -> Formatted {
        format_message(self)
    }
}

impl Format for Formatted {
    fn format(&self) -> Formatted {
        self.clone()
    }
}

pub fn format_message(content: &str) -> Formatted {
    if content.is_empty() {
        return Formatted::default();
    }
    let blocks = content
        .split('\n')
        .map(|line| match line.strip_prefix("• ") {
            Some(rest) => Block::Bullet(parse_inline(rest)),
            None => Block::Line(parse_inline(line)),
        })
        .collect();
    Formatted { blocks }
}

// Bold, then italic, then code: each pass only rewrites text the earlier passes left alone.
fn parse_inline(line: &str) -> Vec<Span> {
    let spans = vec![Span::Text(line.to_string())];
    let spans = rewrite(spans, "**", |inner| Span::Strong(vec![Span::Text(inner)]));
    let spans = rewrite(spans, "*", |inner| Span::Emphasis(vec![Span::Text(inner)]));
    let spans = rewrite(spans, "`", Span::Code);
    spans.into_iter().filter(|s| !is_empty_text(s)).collect()
}

fn is_empty_text(span: &Span) -> bool {
    matches!(span, Span::Text(t) if t.is_empty())
}

fn rewrite(spans: Vec<Span>, delim: &str, make: fn(String) -> Span) -> Vec<Span> {
    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        match span {
            Span::Text(text) => split_pairs(&text, delim, make, &mut out),
            Span::Strong(children) => out.push(Span::Strong(rewrite(children, delim, make))),
            Span::Emphasis(children) => out.push(Span::Emphasis(rewrite(children, delim, make))),
            code @ Span::Code(_) => out.push(code),
        }
    }
    out
}

/// Non-greedy pairing: each opener closes at the next occurrence of the delimiter.
fn split_pairs(text: &str, delim: &str, make: fn(String) -> Span, out: &mut Vec<Span>) {
    let mut rest = text;
    loop {
        let Some(open) = rest.find(delim) else { break };
        let after_open = &rest[open + delim.len()..];
        let Some(close) = after_open.find(delim) else { break };
        if open > 0 {
            out.push(Span::Text(rest[..open].to_string()));
        }
        out.push(make(after_open[..close].to_string()));
        rest = &after_open[close + delim.len()..];
    }
    if !rest.is_empty() {
        out.push(Span::Text(rest.to_string()));
    }
}

impl Formatted {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Markup for embedding in a page. All text is escaped.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            match block {
                Block::Line(spans) => {
                    spans_html(spans, &mut out);
                    if i + 1 < self.blocks.len() {
                        out.push_str("<br>");
                    }
                }
                Block::Bullet(spans) => {
                    out.push_str("<div class=\"bullet-point\">• ");
                    spans_html(spans, &mut out);
                    out.push_str("</div>");
                }
            }
        }
        out
    }

    pub fn to_ansi(&self) -> String {
        self.render_lines(|spans, out| spans_ansi(spans, out), "  • ")
    }

    pub fn plain_text(&self) -> String {
        self.render_lines(|spans, out| spans_plain(spans, out), "• ")
    }

    fn render_lines(&self, spans_fn: impl Fn(&[Span], &mut String), bullet: &str) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match block {
                Block::Line(spans) => spans_fn(spans, &mut out),
                Block::Bullet(spans) => {
                    out.push_str(bullet);
                    spans_fn(spans, &mut out);
                }
            }
        }
        out
    }
}

fn spans_html(spans: &[Span], out: &mut String) {
    for span in spans {
        match span {
            Span::Text(t) => out.push_str(&escape_html(t)),
            Span::Strong(children) => {
                out.push_str("<strong>");
                spans_html(children, out);
                out.push_str("</strong>");
            }
            Span::Emphasis(children) => {
                out.push_str("<em>");
                spans_html(children, out);
                out.push_str("</em>");
            }
            Span::Code(t) => {
                let _ = write!(out, "<code>{}</code>", escape_html(t));
            }
        }
    }
}

fn spans_ansi(spans: &[Span], out: &mut String) {
    for span in spans {
        match span {
            Span::Text(t) => out.push_str(&sanitize_terminal(t)),
            Span::Strong(children) => {
                out.push_str("\x1b[1m");
                spans_ansi(children, out);
                out.push_str("\x1b[22m");
            }
            Span::Emphasis(children) => {
                out.push_str("\x1b[3m");
                spans_ansi(children, out);
                out.push_str("\x1b[23m");
            }
            Span::Code(t) => {
                let _ = write!(out, "\x1b[36m{}\x1b[39m", sanitize_terminal(t));
            }
        }
    }
}

fn spans_plain(spans: &[Span], out: &mut String) {
    for span in spans {
        match span {
            Span::Text(t) | Span::Code(t) => out.push_str(t),
            Span::Strong(children) | Span::Emphasis(children) => spans_plain(children, out),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Text safe to write to a terminal: control characters other than newline and tab are
/// dropped, so nothing received from the server can start an escape sequence.
pub fn sanitize_terminal(text: &str) -> Cow<'_, str> {
    let keep = |c: char| !c.is_control() || c == '\n' || c == '\t';
    if text.chars().all(keep) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| keep(c)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Highlighted {
    pub segments: Vec<Segment>,
}

/// Marks every case-insensitive occurrence of `query` in `content`.
///
/// The query is matched as literal text, also inside longer words.
pub fn highlight_query(content: &str, query: &str) -> Highlighted {
    let plain = || Highlighted {
        segments: vec![Segment {
            text: content.to_string(),
            matched: false,
        }],
    };
    if query.is_empty() {
        return plain();
    }
    let re = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            tracing::debug!("query too large to highlight: {}", e);
            return plain();
        }
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for m in re.find_iter(content) {
        if m.start() > last {
            segments.push(Segment {
                text: content[last..m.start()].to_string(),
                matched: false,
            });
        }
        segments.push(Segment {
            text: m.as_str().to_string(),
            matched: true,
        });
        last = m.end();
    }
    if last < content.len() {
        segments.push(Segment {
            text: content[last..].to_string(),
            matched: false,
        });
    }
    Highlighted { segments }
}

impl Highlighted {
    pub fn match_count(&self) -> usize {
        self.segments.iter().filter(|s| s.matched).count()
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if seg.matched {
                let _ = write!(out, "<mark>{}</mark>", escape_html(&seg.text));
            } else {
                out.push_str(&escape_html(&seg.text));
            }
        }
        out
    }

    pub fn to_ansi(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if seg.matched {
                let _ = write!(out, "\x1b[7m{}\x1b[27m", sanitize_terminal(&seg.text));
            } else {
                out.push_str(&sanitize_terminal(&seg.text));
            }
        }
        out
    }
}

/// Human-readable size with 1024-based units, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let number = format!("{:.2}", value);
    let number = number.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", number, UNITS[unit])
}
