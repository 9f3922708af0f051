//! Recursive directory expansion.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use tracing::debug;

use super::Context;

/// Recursively expand `dir`, posting every non-directory entry to the file
/// queue. The caller must have incremented `dirs_in_flight` beforehand;
/// the walk decrements it exactly once on exit, whether or not the
/// directory could be read.
pub(crate) fn walk(ctx: &Context, dir: &Path) {
    expand(ctx, dir);
    ctx.dirs_in_flight.fetch_sub(1, Ordering::Relaxed);
}

fn expand(ctx: &Context, dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            // Route the failure through the completion worker so it is
            // reported like any other per-file error.
            let mut job = ctx.new_job(dir.to_path_buf());
            job.error = Some(error.into());
            ctx.post_completed(job);
            return;
        }
    };
    debug!(dir = %dir.display(), "walking");
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                let mut job = ctx.new_job(dir.to_path_buf());
                job.error = Some(error.into());
                ctx.post_completed(job);
                continue;
            }
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => {
                ctx.dirs_in_flight.fetch_add(1, Ordering::Relaxed);
                walk(ctx, &path);
            }
            // Anything else — unknown types included — goes through a file
            // worker, which stats it properly.
            _ => ctx.post_file(ctx.new_job(path)),
        }
    }
}
