use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExplorerError {
    #[error("download failed: {0}")]
    FetchHttp(String),

    #[error("source returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("failed to read archive: {0}")]
    ArchiveRead(String),

    #[error("cannot merge datasets: {0}")]
    MergeImpossible(String),

    #[error("no combined table loaded (run fetch first)")]
    NothingLoaded,

    #[error("export failed: {0}")]
    ExportIo(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
