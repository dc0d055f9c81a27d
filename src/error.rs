use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy surfaced to the caller. Non-failure outcomes
/// (success, warnings, in-progress) are carried by [`Completion`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadParameter(String),

    #[error("{0}")]
    ArgumentOutOfBounds(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("memory allocation failure")]
    MemoryFailure,

    #[error("OS passthrough failure")]
    OsPassthroughFailure(#[from] io::Error),

    #[error("passthrough is not available for this command")]
    OsCommandNotAvailable,

    #[error("command timed out")]
    OsCommandTimeout,

    #[error("{0:?} is not a block device")]
    NotBlockDevice(PathBuf),

    #[error("{0:?} is not a SCSI device")]
    NotScsiDevice(PathBuf),
}

/// Outcome of a command that reached the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    /// The command executed, but the returned task file registers cannot be
    /// fully trusted.
    WarnIncompleteRtfrs,
    /// BSY was set; no other status bits are valid.
    InProgress,
    Aborted,
    Failure,
}

impl Completion {
    pub fn is_success(self) -> bool {
        matches!(self, Completion::Success | Completion::WarnIncompleteRtfrs)
    }
}
