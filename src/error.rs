/// Error types for the tracker core and the log tailer.
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced at the tracker's command boundary and by the stream reader.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("player name must not be empty")]
    EmptyPlayerName,

    #[error("no NWN log files found in {path}")]
    NoLogFiles { path: PathBuf },

    #[error("log path {path} does not exist")]
    MissingLogPath { path: PathBuf },

    #[error("failed to read log file {path}")]
    ReadLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch log directory {path}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
