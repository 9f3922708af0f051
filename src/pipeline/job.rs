//! The work items flowing through the three queues.

use std::path::PathBuf;

use crate::errors::FileError;

/// Size of a level-1 block: files are hashed in slices this large, and the
/// digest definition is only reproducible for this block size.
pub(crate) const BLOCK_SIZE: usize = 16 * 1024;

/// Length in bytes of a SHA-256 digest.
pub(crate) const DIGEST_LEN: usize = 32;

/// Process-unique handle tying hash completions back to their file record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct FileId(pub(crate) u64);

/// Per-file record. Created wherever a path is discovered, filled in by a
/// file worker, retired by the completion worker — ownership follows that
/// same route through the queues.
#[derive(Debug)]
pub(crate) struct FileJob {
    pub(crate) id: FileId,
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    /// Number of block hash jobs the file worker dispatched.
    pub(crate) blocks_posted: u32,
    pub(crate) error: Option<FileError>,
    /// The record turned out to be a directory that was expanded in place;
    /// it completes without producing output.
    pub(crate) walked_dir: bool,
}

impl FileJob {
    pub(crate) fn new(id: FileId, path: PathBuf) -> Self {
        FileJob {
            id,
            path,
            size: 0,
            blocks_posted: 0,
            error: None,
            walked_dir: false,
        }
    }
}

/// Work for the hash pool.
pub(crate) struct HashJob {
    pub(crate) file: FileId,
    pub(crate) payload: HashPayload,
}

pub(crate) enum HashPayload {
    /// One level-1 block; `data` is the freshly read buffer, owned by the
    /// job and dropped once hashed.
    Block { index: u32, data: Vec<u8> },
    /// The level-2 input: every block digest of the file, concatenated in
    /// offset order.
    Summary { digests: Vec<u8> },
}

/// Which hash a completion reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum HashKind {
    Block { index: u32 },
    Summary,
}

/// Result of one hash job. The digest travels by value; no output slots
/// are shared between threads.
pub(crate) struct HashDone {
    pub(crate) file: FileId,
    pub(crate) kind: HashKind,
    pub(crate) digest: [u8; DIGEST_LEN],
}

/// Everything that flows into the completion worker.
pub(crate) enum Completion {
    /// A file worker finished dispatching (or failing) a record.
    File(Box<FileJob>),
    /// A hash worker finished one digest.
    Hash(HashDone),
}
