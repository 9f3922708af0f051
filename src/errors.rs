use std::io;

use thiserror::Error as ThisError;

/// Failure attached to a single file record.
///
/// These never abort the run: the completion worker surfaces each one on
/// stderr exactly once and retires the record, and the process still exits 0.
#[derive(ThisError, Debug)]
pub enum FileError {
    #[error("Not a regular file")]
    NotRegularFile,
    #[error("File grew while hashing")]
    GrewWhileHashing,
    #[error(transparent)]
    Io(#[from] io::Error),
}
