use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Stack capture failed: {0}")]
    Capture(String),

    #[error("Stack capture timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Module parse error in {path}: {reason}")]
    ModuleParse { path: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Exit codes used by the stackprof binary
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const THREAD_NOT_FOUND: i32 = 3;
    pub const UNSUPPORTED_PLATFORM: i32 = 4;
    pub const DATABASE_ERROR: i32 = 6;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ThreadNotFound(_) => exit_code::THREAD_NOT_FOUND,
            Error::UnsupportedPlatform(_) => exit_code::UNSUPPORTED_PLATFORM,
            Error::Database(_) => exit_code::DATABASE_ERROR,
            Error::InvalidArgument(_) => exit_code::INVALID_ARGUMENTS,
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Whether a capture error only affects the current sample slot.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Capture(_) | Error::Timeout(_) | Error::ThreadNotFound(_)
        )
    }
}
