//! The completion worker: a single thread that owns every per-file state
//! transition and all result output.
//!
//! File workers and hash workers both post onto the completed queue; this
//! worker discriminates the two completion kinds and advances each file
//! through `Started → Posted → Summing`. Because there is exactly one of
//! these threads, no transition ever races another.

use std::collections::HashMap;
use std::io::Write;
use std::mem;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use super::Context;
use super::job::{Completion, DIGEST_LEN, FileId, FileJob, HashDone, HashJob, HashKind, HashPayload};
use crate::output::OutputStreams;

/// Per-file progress as seen by this worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    /// The record has not arrived yet, so the total block count is
    /// unknown. Block digests accumulate silently.
    Started,
    /// The record arrived; `blocks_posted` is authoritative.
    Posted,
    /// Every block digest is in and the summary hash is in flight.
    Summing,
}

struct Entry {
    phase: Phase,
    record: Option<Box<FileJob>>,
    /// Block digests that arrived while the entry was still `Started`.
    early: Vec<(u32, [u8; DIGEST_LEN])>,
    /// Concatenated block digests; block `i` lives at `i * DIGEST_LEN`.
    digests: Vec<u8>,
    completed: u32,
}

impl Entry {
    fn new() -> Self {
        Entry {
            phase: Phase::Started,
            record: None,
            early: Vec::new(),
            digests: Vec::new(),
            completed: 0,
        }
    }
}

/// Drain the completed queue until it closes.
pub(crate) fn completion_worker(ctx: &Context, mut streams: OutputStreams) {
    let mut ledger: HashMap<FileId, Entry> = HashMap::new();
    while let Some(completion) = ctx.completed_queue.pop() {
        match completion {
            Completion::Hash(done) => hash_completed(ctx, &mut ledger, &mut streams, done),
            Completion::File(job) => record_posted(ctx, &mut ledger, &mut streams, job),
        }
    }
    // The queue only closes once the termination predicate held, so every
    // file must have been retired by now.
    debug_assert!(ledger.is_empty(), "files left behind: {}", ledger.len());
}

fn hash_completed(
    ctx: &Context,
    ledger: &mut HashMap<FileId, Entry>,
    streams: &mut OutputStreams,
    done: HashDone,
) {
    let index = match done.kind {
        HashKind::Summary => {
            emit(ctx, ledger, streams, done.file, &done.digest);
            return;
        }
        HashKind::Block { index } => index,
    };

    let all_in = {
        let entry = ledger.entry(done.file).or_insert_with(Entry::new);
        entry.completed += 1;
        match entry.phase {
            Phase::Started => {
                entry.early.push((index, done.digest));
                false
            }
            Phase::Posted => {
                store(&mut entry.digests, index, &done.digest);
                let posted = entry
                    .record
                    .as_ref()
                    .expect("posted entry has a record")
                    .blocks_posted;
                entry.completed == posted
            }
            // A summary is only scheduled once every block digest is
            // accounted for, so a block can never land here.
            Phase::Summing => {
                warn!(file = done.file.0, "block digest after summing started");
                false
            }
        }
    };
    if all_in {
        finish_blocks(ctx, ledger, streams, done.file);
    }
}

/// The file worker confirmed `blocks_posted`. Anything counted so far was
/// an early arrival; flush it into the digest buffer and finish level 1 if
/// the blocks are already all in (empty files, or readers slower than the
/// hash pool).
fn record_posted(
    ctx: &Context,
    ledger: &mut HashMap<FileId, Entry>,
    streams: &mut OutputStreams,
    job: Box<FileJob>,
) {
    let id = job.id;
    let all_in = {
        let entry = ledger.entry(id).or_insert_with(Entry::new);
        if entry.phase != Phase::Started {
            let _ = writeln!(
                streams.stderr,
                "While processing {}: invalid state of file in queue",
                job.path.display()
            );
            return;
        }
        entry.digests = vec![0; job.blocks_posted as usize * DIGEST_LEN];
        for (index, digest) in mem::take(&mut entry.early) {
            store(&mut entry.digests, index, &digest);
        }
        entry.phase = Phase::Posted;
        let all_in = entry.completed == job.blocks_posted;
        entry.record = Some(job);
        all_in
    };
    if all_in {
        finish_blocks(ctx, ledger, streams, id);
    }
}

/// Level 1 is complete: surface an error, retire a walked directory, or
/// schedule the summary digest over the concatenated block digests.
fn finish_blocks(
    ctx: &Context,
    ledger: &mut HashMap<FileId, Entry>,
    streams: &mut OutputStreams,
    id: FileId,
) {
    let mut entry = ledger.remove(&id).expect("ledger entry for finished file");
    let record = entry.record.as_mut().expect("posted entry has a record");

    if let Some(error) = record.error.take() {
        let _ = writeln!(
            streams.stderr,
            "Error processing {}: {}",
            record.path.display(),
            error
        );
        ctx.files_done.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if record.walked_dir {
        ctx.files_done.fetch_add(1, Ordering::Relaxed);
        return;
    }

    entry.phase = Phase::Summing;
    let digests = mem::take(&mut entry.digests);
    debug!(file = id.0, blocks = record.blocks_posted, "summing");
    ctx.hash_queue.push(HashJob {
        file: id,
        payload: HashPayload::Summary { digests },
    });
    ledger.insert(id, entry);
}

/// The summary digest is in: print the result line and retire the record.
fn emit(
    ctx: &Context,
    ledger: &mut HashMap<FileId, Entry>,
    streams: &mut OutputStreams,
    id: FileId,
    digest: &[u8; DIGEST_LEN],
) {
    let Some(entry) = ledger.remove(&id) else {
        warn!(file = id.0, "summary digest for unknown file");
        return;
    };
    let record = entry.record.expect("summing entry has a record");
    let _ = writeln!(
        streams.stdout,
        "{}  {}",
        faster_hex::hex_string(digest),
        record.path.display()
    );
    ctx.files_done.fetch_add(1, Ordering::Relaxed);
}

fn store(digests: &mut [u8], index: u32, digest: &[u8; DIGEST_LEN]) {
    let at = index as usize * DIGEST_LEN;
    digests[at..at + DIGEST_LEN].copy_from_slice(digest);
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use sha2::{Digest, Sha256};

    use super::{Completion, DIGEST_LEN, HashDone, HashKind, completion_worker};
    use crate::errors::FileError;
    use crate::output::{OutputStreams, TestWriter};
    use crate::pipeline::Context;
    use crate::pipeline::job::{FileId, FileJob, HashPayload};

    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&Sha256::digest(data));
        digest
    }

    fn spawn_worker(ctx: &Arc<Context>) -> (thread::JoinHandle<()>, TestWriter, TestWriter) {
        let (streams, stdout, stderr) = OutputStreams::test();
        let ctx = Arc::clone(ctx);
        let handle = thread::spawn(move || completion_worker(&ctx, streams));
        (handle, stdout, stderr)
    }

    fn post_record(ctx: &Context, job: FileJob) {
        ctx.files_posted.fetch_add(1, Ordering::Relaxed);
        ctx.completed_queue.push(Completion::File(Box::new(job)));
    }

    fn wait_done(ctx: &Context, n: u64) {
        let mut spins = 0;
        while ctx.files_done.load(Ordering::Relaxed) < n {
            thread::sleep(Duration::from_millis(5));
            spins += 1;
            assert!(spins < 1_000, "completion never converged");
        }
    }

    #[test]
    fn early_blocks_accumulate_until_the_record_arrives() {
        let ctx = Arc::new(Context::new());
        let (worker, stdout, stderr) = spawn_worker(&ctx);

        let id = FileId(7);
        let b0 = sha256(b"first block");
        let b1 = sha256(b"second block");
        // Both block digests land before the record, out of order.
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: id,
            kind: HashKind::Block { index: 1 },
            digest: b1,
        }));
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: id,
            kind: HashKind::Block { index: 0 },
            digest: b0,
        }));

        let mut job = FileJob::new(id, "two-blocks".into());
        job.blocks_posted = 2;
        post_record(&ctx, job);

        // Play the hash worker for the summary job.
        let summary = ctx.hash_queue.pop().expect("summary job scheduled");
        let HashPayload::Summary { digests } = summary.payload else {
            panic!("expected a summary payload");
        };
        let mut expected = Vec::new();
        expected.extend_from_slice(&b0);
        expected.extend_from_slice(&b1);
        assert_eq!(digests, expected, "digests must concatenate in offset order");
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: id,
            kind: HashKind::Summary,
            digest: sha256(&digests),
        }));

        wait_done(&ctx, 1);
        ctx.completed_queue.close();
        worker.join().unwrap();

        assert_eq!(
            stdout.contents(),
            format!("{}  two-blocks\n", faster_hex::hex_string(&sha256(&expected)))
        );
        assert_eq!(stderr.contents(), "");
    }

    #[test]
    fn empty_file_finishes_at_record_arrival() {
        let ctx = Arc::new(Context::new());
        let (worker, stdout, _stderr) = spawn_worker(&ctx);

        post_record(&ctx, FileJob::new(FileId(1), "empty".into()));

        let summary = ctx.hash_queue.pop().expect("summary job scheduled");
        let HashPayload::Summary { digests } = summary.payload else {
            panic!("expected a summary payload");
        };
        assert!(digests.is_empty());
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: FileId(1),
            kind: HashKind::Summary,
            digest: sha256(&digests),
        }));

        wait_done(&ctx, 1);
        ctx.completed_queue.close();
        worker.join().unwrap();

        assert_eq!(stdout.contents(), format!("{EMPTY_DIGEST}  empty\n"));
    }

    #[test]
    fn errors_short_circuit_the_summary() {
        let ctx = Arc::new(Context::new());
        let (worker, stdout, stderr) = spawn_worker(&ctx);

        let mut job = FileJob::new(FileId(3), "missing".into());
        job.error = Some(FileError::Io(io::Error::new(
            ErrorKind::NotFound,
            "No such file or directory",
        )));
        post_record(&ctx, job);

        wait_done(&ctx, 1);
        ctx.completed_queue.close();
        worker.join().unwrap();

        assert_eq!(stdout.contents(), "");
        assert_eq!(
            stderr.contents(),
            "Error processing missing: No such file or directory\n"
        );
    }

    #[test]
    fn walked_directories_finish_silently() {
        let ctx = Arc::new(Context::new());
        let (worker, stdout, stderr) = spawn_worker(&ctx);

        let mut job = FileJob::new(FileId(4), "somedir".into());
        job.walked_dir = true;
        post_record(&ctx, job);

        wait_done(&ctx, 1);
        ctx.completed_queue.close();
        worker.join().unwrap();

        assert_eq!(stdout.contents(), "");
        assert_eq!(stderr.contents(), "");
    }

    #[test]
    fn duplicate_record_is_reported_and_skipped() {
        let ctx = Arc::new(Context::new());
        let (worker, stdout, stderr) = spawn_worker(&ctx);

        let id = FileId(9);
        let mut job = FileJob::new(id, "dup".into());
        job.blocks_posted = 1;
        post_record(&ctx, job);

        // A second record for the same file violates the state machine.
        let mut dup = FileJob::new(id, "dup".into());
        dup.blocks_posted = 1;
        ctx.completed_queue.push(Completion::File(Box::new(dup)));

        let block = sha256(b"payload");
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: id,
            kind: HashKind::Block { index: 0 },
            digest: block,
        }));

        let summary = ctx.hash_queue.pop().expect("summary job scheduled");
        let HashPayload::Summary { digests } = summary.payload else {
            panic!("expected a summary payload");
        };
        ctx.completed_queue.push(Completion::Hash(HashDone {
            file: id,
            kind: HashKind::Summary,
            digest: sha256(&digests),
        }));

        wait_done(&ctx, 1);
        ctx.completed_queue.close();
        worker.join().unwrap();

        assert_eq!(
            stderr.contents(),
            "While processing dup: invalid state of file in queue\n"
        );
        // The real record still completed exactly once.
        assert_eq!(stdout.contents().lines().count(), 1);
    }
}
