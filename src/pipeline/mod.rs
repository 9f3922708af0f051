//! The concurrent hashing pipeline.
//!
//! Three queues connect three worker roles. File readers pop paths, read
//! them in 16 KiB blocks and feed the hash pool; hash workers digest one
//! block each; a single completion worker advances the per-file state
//! machines and prints results. The orchestrator in [`run`] wires it all
//! up, feeds the top-level arguments, and waits for the fleet to drain.
//!
//! ```text
//! args ─► run ─► file_queue ─► file workers
//!                                   │ (block buffers)
//!                                   ▼
//!                              hash_queue ─► hash workers
//!                                   ▲              │
//!             file workers also ────┼──────────────┤
//!             post their records    │              ▼
//!                             completed_queue ─► completion worker
//!                                   ▲              │
//!                                   └── level-2 ───┘
//! ```

pub(crate) mod completion;
pub(crate) mod job;
pub(crate) mod queue;
pub(crate) mod walk;
pub(crate) mod worker;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::output::OutputStreams;
use self::job::{Completion, FileId, FileJob, HashJob};
use self::queue::Queue;

/// Depth of the bounded file and hash queues, and the growth quantum of
/// the completed queue.
const QUEUE_SIZE: usize = 16 * 1024;

/// How often the orchestrator re-checks the termination predicate.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Worker pool sizing.
#[derive(Clone, Debug)]
pub struct Options {
    pub file_workers: usize,
    pub hash_workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            file_workers: 16,
            hash_workers: default_hash_workers(),
        }
    }
}

/// One hashing thread per core, unless the platform won't say.
pub fn default_hash_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Counter snapshot returned by [`run`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Summary {
    pub files_posted: u64,
    pub files_done: u64,
}

/// Everything the workers share: the three queues, the fleet counters and
/// the big-file lock. Passed explicitly behind an `Arc`; there is no
/// module-level mutable state.
pub(crate) struct Context {
    pub(crate) file_queue: Queue<Box<FileJob>>,
    pub(crate) hash_queue: Queue<HashJob>,
    pub(crate) completed_queue: Queue<Completion>,
    /// Serializes the read loops of files past the big-file threshold.
    pub(crate) big_file_lock: Mutex<()>,
    pub(crate) files_posted: AtomicU64,
    pub(crate) files_done: AtomicU64,
    pub(crate) dirs_in_flight: AtomicU64,
    next_file_id: AtomicU64,
}

impl Context {
    pub(crate) fn new() -> Self {
        Context {
            file_queue: Queue::bounded(QUEUE_SIZE),
            hash_queue: Queue::bounded(QUEUE_SIZE),
            // Must never block its producers; see the queue module.
            completed_queue: Queue::growing(QUEUE_SIZE),
            big_file_lock: Mutex::new(()),
            files_posted: AtomicU64::new(0),
            files_done: AtomicU64::new(0),
            dirs_in_flight: AtomicU64::new(0),
            next_file_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn new_job(&self, path: PathBuf) -> Box<FileJob> {
        let id = FileId(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        Box::new(FileJob::new(id, path))
    }

    /// Post a record to the file queue. The posted counter is incremented
    /// before the push so the termination predicate can never observe a
    /// drained fleet while the record is still in flight.
    pub(crate) fn post_file(&self, job: Box<FileJob>) {
        self.files_posted.fetch_add(1, Ordering::Relaxed);
        self.file_queue.push(job);
    }

    /// Post a record straight to the completed queue; for records that
    /// failed before any reading could happen.
    pub(crate) fn post_completed(&self, job: Box<FileJob>) {
        self.files_posted.fetch_add(1, Ordering::Relaxed);
        self.completed_queue.push(Completion::File(job));
    }

    fn drained(&self) -> bool {
        self.files_posted.load(Ordering::Relaxed) == self.files_done.load(Ordering::Relaxed)
            && self.dirs_in_flight.load(Ordering::Relaxed) == 0
    }
}

/// Run the pipeline over `paths` and block until every posted file has
/// completed. Per-file failures are reported on `streams.stderr` and do
/// not fail the run.
pub fn run(paths: &[PathBuf], options: &Options, streams: OutputStreams) -> Summary {
    let ctx = Arc::new(Context::new());

    let file_pool = threadpool::Builder::new()
        .thread_name("file-reader".into())
        .num_threads(options.file_workers)
        .build();
    for _ in 0..options.file_workers {
        let ctx = Arc::clone(&ctx);
        file_pool.execute(move || worker::file_worker(&ctx));
    }

    let hash_pool = threadpool::Builder::new()
        .thread_name("hasher".into())
        .num_threads(options.hash_workers)
        .build();
    for _ in 0..options.hash_workers {
        let ctx = Arc::clone(&ctx);
        hash_pool.execute(move || worker::hash_worker(&ctx));
    }

    let completion_worker = {
        let ctx = Arc::clone(&ctx);
        thread::Builder::new()
            .name("completion".into())
            .spawn(move || completion::completion_worker(&ctx, streams))
            .expect("completion thread must spawn")
    };

    for path in paths {
        submit(&ctx, path);
    }

    while !ctx.drained() {
        thread::sleep(DRAIN_POLL);
    }

    ctx.file_queue.close();
    ctx.hash_queue.close();
    ctx.completed_queue.close();
    file_pool.join();
    hash_pool.join();
    let _ = completion_worker.join();

    let summary = Summary {
        files_posted: ctx.files_posted.load(Ordering::Relaxed),
        files_done: ctx.files_done.load(Ordering::Relaxed),
    };
    debug!(?summary, "pipeline drained");
    summary
}

/// Top-level argument intake. Directories are walked synchronously right
/// here; everything else becomes a file record, with a failed stat riding
/// on the record so the failure surfaces through the completion worker
/// like any other.
fn submit(ctx: &Context, path: &Path) {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            ctx.dirs_in_flight.fetch_add(1, Ordering::Relaxed);
            walk::walk(ctx, path);
        }
        Ok(_) => ctx.post_file(ctx.new_job(path.to_path_buf())),
        Err(error) => {
            let mut job = ctx.new_job(path.to_path_buf());
            job.error = Some(error.into());
            ctx.post_file(job);
        }
    }
}
