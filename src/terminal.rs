use crate::api::{DocumentStatus, DocumentSummary};
use crate::format::{format_file_size, sanitize_terminal, Formatted};
use crate::view::{
    ChatView, MessageId, Notice, NoticeKind, ProgressId, QueryView, Sender, UploadView,
};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\r\x1b[2K";

#[derive(Default)]
struct ChatScreen {
    next_id: u64,
    /// Assistant message currently at the bottom of the screen and what it shows.
    open: Option<(MessageId, String)>,
    typing: bool,
}

/// Draws both panels on stdout.
pub struct TerminalView {
    assume_yes: bool,
    progress: Mutex<HashMap<ProgressId, String>>,
    chat: Mutex<ChatScreen>,
}

impl TerminalView {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            progress: Mutex::new(HashMap::new()),
            chat: Mutex::new(ChatScreen::default()),
        }
    }

    fn print(&self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn print_notice(&self, notice: &Notice) {
        let (color, mark) = match notice.kind {
            NoticeKind::Success => (GREEN, "✔"),
            NoticeKind::Error => (RED, "✖"),
        };
        self.print(&format!(
            "{}{} {}{}\n",
            color,
            mark,
            sanitize_terminal(&notice.message),
            RESET
        ));
    }
}

fn status_color(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Completed => GREEN,
        DocumentStatus::Failed => RED,
        DocumentStatus::Uploading | DocumentStatus::Processing => DIM,
    }
}

pub fn document_line(doc: &DocumentSummary) -> String {
    let uploaded = doc
        .uploaded_at()
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| doc.upload_time.clone());
    let mut line = format!(
        "{}  {}\n    {} | {} | {}{}{} | {} chunks | {}",
        sanitize_terminal(&doc.filename),
        sanitize_terminal(&doc.id),
        format_file_size(doc.file_size),
        sanitize_terminal(&doc.file_type.to_uppercase()),
        status_color(doc.status),
        doc.status,
        RESET,
        doc.chunk_count.unwrap_or(0),
        sanitize_terminal(&uploaded)
    );
    if let Some(error) = &doc.error_message {
        let _ = write!(line, "\n    {}{}{}", RED, sanitize_terminal(error), RESET);
    }
    line
}

/// Rows `text` occupies once printed from column 0 on a terminal `width` columns wide.
fn rows_used(text: &str, width: usize) -> usize {
    text.split('\n')
        .map(|line| {
            let cols = console::measure_text_width(line);
            if width == 0 || cols == 0 {
                1
            } else {
                cols.div_ceil(width)
            }
        })
        .sum()
}

/// Output that turns the message on screen from `shown` into `new`.
///
/// The cursor sits at the end of `shown` on entry. A pure extension is appended, anything
/// else is redrawn in place from the message's first row.
fn redraw(shown: &str, new: &str, width: usize) -> String {
    if let Some(suffix) = new.strip_prefix(shown) {
        return suffix.to_string();
    }
    let mut out = String::from("\r");
    let rows = rows_used(shown, width);
    if rows > 1 {
        let _ = write!(out, "\x1b[{}A", rows - 1);
    }
    out.push_str("\x1b[J");
    out.push_str(new);
    out
}

impl UploadView for TerminalView {
    fn notify(&self, notice: Notice) {
        self.print_notice(&notice);
    }

    fn add_progress(&self, id: &ProgressId, filename: &str, status: DocumentStatus, progress: u8) {
        self.progress
            .lock()
            .unwrap()
            .insert(id.clone(), sanitize_terminal(filename).into_owned());
        self.print(&format!(
            "[{}] {} {}%\n",
            sanitize_terminal(filename),
            status,
            progress
        ));
    }

    fn update_progress(&self, id: &ProgressId, status: DocumentStatus, progress: u8, message: &str) {
        let Some(filename) = self.progress.lock().unwrap().get(id).cloned() else {
            return;
        };
        let detail = if message.is_empty() {
            format!("{}%", progress)
        } else {
            format!("{}% - {}", progress, sanitize_terminal(message))
        };
        self.print(&format!(
            "[{}] {}{}{} {}\n",
            filename,
            status_color(status),
            status,
            RESET,
            detail
        ));
    }

    fn remove_progress(&self, id: &ProgressId) {
        self.progress.lock().unwrap().remove(id);
    }

    fn show_documents(&self, documents: &[DocumentSummary]) {
        if documents.is_empty() {
            self.print(&format!("{}No documents yet{}\n", DIM, RESET));
            return;
        }
        let mut out = String::new();
        for doc in documents {
            out.push_str(&document_line(doc));
            out.push('\n');
        }
        self.print(&out);
    }

    fn show_query_loading(&self) {
        self.print(&format!("{}🔍 Searching...{}\n", DIM, RESET));
    }

    fn show_query_results(&self, results: &QueryView) {
        if results.hits.is_empty() {
            self.print(&format!("{}No relevant content found{}\n", DIM, RESET));
            return;
        }
        let mut out = format!(
            "{}Found {} results ({:.3}s){}\n",
            DIM, results.total_results, results.processing_time_secs, RESET
        );
        for (i, hit) in results.hits.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. {} | similarity {:.1}% | chunk {}\n{}\n",
                i + 1,
                sanitize_terminal(&hit.document_name),
                hit.similarity_percent,
                hit.chunk_index,
                hit.content.to_ansi()
            ));
        }
        self.print(&out);
    }

    fn show_query_error(&self, message: &str) {
        self.print(&format!("{}{}{}\n", RED, sanitize_terminal(message), RESET));
    }

    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        self.print(&format!("{} [y/N] ", prompt));
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

impl ChatView for TerminalView {
    fn append_message(&self, sender: Sender, content: &Formatted) -> MessageId {
        let mut chat = self.chat.lock().unwrap();
        let id = MessageId(chat.next_id);
        chat.next_id += 1;
        // the prompt line already shows what the user typed
        if sender == Sender::User {
            return id;
        }

        let rendered = content.to_ansi();
        let mut out = String::new();
        if chat.typing {
            out.push_str(CLEAR_LINE);
            chat.typing = false;
        }
        if chat.open.take().is_some() {
            out.push('\n');
        }
        out.push_str(&rendered);
        chat.open = Some((id, rendered));
        drop(chat);
        self.print(&out);
        id
    }

    fn update_message(&self, id: MessageId, content: &Formatted) {
        let mut chat = self.chat.lock().unwrap();
        let Some((open_id, shown)) = chat.open.as_mut() else {
            return;
        };
        if *open_id != id {
            return;
        }
        let rendered = content.to_ansi();
        let width = console::Term::stdout().size().1 as usize;
        let out = redraw(shown, &rendered, width);
        *shown = rendered;
        drop(chat);
        self.print(&out);
    }

    fn set_typing(&self, visible: bool) {
        let mut chat = self.chat.lock().unwrap();
        let mut out = String::new();
        if visible {
            if chat.open.take().is_some() {
                out.push('\n');
            }
            out.push_str(&format!("{}…{}", DIM, RESET));
            chat.typing = true;
        } else {
            if chat.typing {
                out.push_str(CLEAR_LINE);
                chat.typing = false;
            }
            if chat.open.take().is_some() {
                out.push('\n');
            }
        }
        drop(chat);
        self.print(&out);
    }

    fn set_input_enabled(&self, _enabled: bool) {}

    fn clear_input(&self) {}

    fn focus_input(&self) {
        self.print("> ");
    }

    fn notify(&self, notice: Notice) {
        self.print_notice(&notice);
    }
}
