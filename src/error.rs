use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ChapterboxError {
    #[error("missing config file at {0}")]
    #[diagnostic(help("create it with username, password, client_id, client_secret and download_path"))]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("catalog request failed: {0}")]
    Catalog(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("invalid manga url: {0}")]
    InvalidMangaUrl(String),

    #[error("manga {0} missing from catalog response")]
    MissingManga(String),

    #[error("cannot download chapter {chapter}: unknown source {host}")]
    UnknownSource { chapter: String, host: String },

    #[error("invalid chapter url for {source_name}: {url}")]
    InvalidChapterUrl { source_name: String, url: String },

    #[error("failed to parse page list from {source_name}: {message}")]
    PageList {
        source_name: String,
        message: String,
    },

    #[error("page {page} failed: {message}")]
    PageFetch { page: usize, message: String },

    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("failed to package archive: {0}")]
    Packaging(String),

    #[error("download aborted")]
    Aborted,

    #[error("download cancelled")]
    Cancelled,

    #[error("{count} download error(s):\n{summary}")]
    PartialFailure { count: usize, summary: String },
}
