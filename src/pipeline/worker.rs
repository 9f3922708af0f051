//! The file-reader and hash worker loops.

use std::fs::{self, File};
use std::io::Read;
use std::sync::atomic::Ordering;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::job::{BLOCK_SIZE, Completion, DIGEST_LEN, FileJob, HashDone, HashJob, HashKind, HashPayload};
use super::{Context, walk};
use crate::errors::FileError;

/// Files at least this large take the big-file lock for their whole read
/// loop, so that large sequential reads do not interleave on disk. Small
/// files proceed unserialized; correctness does not depend on the lock.
pub(crate) const BIG_FILE_THRESHOLD: u64 = 1024 * 1024;

/// Pop file records, read and dispatch their blocks, and forward each
/// record to the completion worker. Exits when the file queue closes.
pub(crate) fn file_worker(ctx: &Context) {
    while let Some(mut job) = ctx.file_queue.pop() {
        // A record that already failed (stat error at intake) is forwarded
        // untouched.
        if job.error.is_none() {
            process(ctx, &mut job);
        }
        ctx.completed_queue.push(Completion::File(job));
    }
}

fn process(ctx: &Context, job: &mut FileJob) {
    let metadata = match fs::metadata(&job.path) {
        Ok(metadata) => metadata,
        Err(error) => {
            job.error = Some(error.into());
            return;
        }
    };
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        // Directories reach the file queue through walk entries of unknown
        // type or symlinked directories; expand them right here, on this
        // thread.
        ctx.dirs_in_flight.fetch_add(1, Ordering::Relaxed);
        walk::walk(ctx, &job.path);
        job.walked_dir = true;
    } else if file_type.is_file() {
        read_and_dispatch(ctx, job, metadata.len());
    } else {
        job.error = Some(FileError::NotRegularFile);
    }
}

/// Split the file into 16 KiB blocks and push one hash job per block. The
/// record's `blocks_posted` is final once this returns, and the record is
/// only then forwarded to the completion worker — so by the time the
/// completion worker learns the block count, every block job is already in
/// the hash queue or done.
fn read_and_dispatch(ctx: &Context, job: &mut FileJob, size: u64) {
    let _serialize = (size >= BIG_FILE_THRESHOLD)
        .then(|| ctx.big_file_lock.lock().unwrap_or_else(|e| e.into_inner()));

    job.size = size;
    let chunks = size.div_ceil(BLOCK_SIZE as u64);
    let mut file = match File::open(&job.path) {
        Ok(file) => file,
        Err(error) => {
            job.error = Some(error.into());
            return;
        }
    };

    let mut posted: u32 = 0;
    loop {
        let mut data = vec![0u8; BLOCK_SIZE];
        let len = match file.read(&mut data) {
            Ok(len) => len,
            Err(error) => {
                job.error = Some(error.into());
                break;
            }
        };
        if len == 0 {
            break;
        }
        if u64::from(posted) == chunks {
            // More data than the stat said; the block layout is no longer
            // trustworthy.
            job.error = Some(FileError::GrewWhileHashing);
            break;
        }
        data.truncate(len);
        ctx.hash_queue.push(HashJob {
            file: job.id,
            payload: HashPayload::Block {
                index: posted,
                data,
            },
        });
        posted += 1;
        if len < BLOCK_SIZE {
            // Short read counts as end of file.
            break;
        }
    }
    job.blocks_posted = posted;
    debug!(path = %job.path.display(), blocks = posted, "dispatched");
}

/// Pop hash jobs, digest them, and post the result to the completion
/// worker. Exits when the hash queue closes.
pub(crate) fn hash_worker(ctx: &Context) {
    while let Some(job) = ctx.hash_queue.pop() {
        let (kind, digest) = match job.payload {
            HashPayload::Block { index, data } => (HashKind::Block { index }, sha256(&data)),
            HashPayload::Summary { digests } => (HashKind::Summary, sha256(&digests)),
        };
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: job.file,
            kind,
            digest,
        }));
    }
}

fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&Sha256::digest(data));
    digest
}
