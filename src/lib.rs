pub mod api;
pub mod chat;
pub mod config;
pub mod db;
pub mod format;
pub mod sse;
pub mod terminal;
pub mod upload;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, Backend, HttpBackend};
pub use chat::ChatController;
pub use upload::UploadController;
