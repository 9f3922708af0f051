//! Where result lines go.
//!
//! The pipeline's stdout/stderr contract is written through plain `Write`
//! sinks so the whole thing can run inside a test without spawning the
//! binary or stealing the process's real streams.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// The two output sinks the completion worker writes to: result lines on
/// `stdout`, per-file errors on `stderr`.
pub struct OutputStreams {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl OutputStreams {
    /// The process's real standard streams.
    pub fn os() -> Self {
        OutputStreams {
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }

    /// Capture buffers for tests. The returned writers share storage with
    /// the streams, so a test can read back everything the pipeline wrote.
    pub fn test() -> (Self, TestWriter, TestWriter) {
        let stdout = TestWriter::default();
        let stderr = TestWriter::default();
        let streams = OutputStreams {
            stdout: Box::new(stdout.clone()),
            stderr: Box::new(stderr.clone()),
        };
        (streams, stdout, stderr)
    }
}

/// A thread-safe buffer that pretends to be e.g. stdout.
#[derive(Clone, Default)]
pub struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl TestWriter {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // The buffer can be locked even if a writer thread panicked: its
        // state will be ok
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
