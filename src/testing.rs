//! Shared helpers for unit tests.
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use filetime::FileTime;
use tracing::subscriber::DefaultGuard;

use crate::error::BoxError;
use crate::loader::{Invocable, LoadError, LoadedUnit, Loader};

/// Log lines captured from a thread-local subscriber.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Number of captured lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route every event on this thread into a `LogCapture` until the guard drops.
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

/// Spin until `cond` holds, panicking after a few seconds.
pub fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Move the file's modification time forward by a full minute.
pub fn bump_mtime(path: &Path) {
    let meta = std::fs::metadata(path).unwrap();
    let current = FileTime::from_last_modification_time(&meta);
    let later = FileTime::from_unix_time(current.unix_seconds() + 60, current.nanoseconds());
    filetime::set_file_mtime(path, later).unwrap();
}

/// Rewrite the file's current modification time without changing it.
pub fn retouch_same_mtime(path: &Path) {
    let meta = std::fs::metadata(path).unwrap();
    let current = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(path, current).unwrap();
}

pub fn succeeding() -> Arc<dyn Invocable> {
    Arc::new(|| -> Result<(), BoxError> { Ok(()) })
}

pub fn failing(message: &'static str) -> Arc<dyn Invocable> {
    Arc::new(move || -> Result<(), BoxError> { Err(message.into()) })
}

/// An invocable that counts its calls and then returns `result`.
pub fn counted(calls: Arc<AtomicUsize>, fail: bool) -> Arc<dyn Invocable> {
    Arc::new(move || -> Result<(), BoxError> {
        calls.fetch_add(1, Ordering::SeqCst);
        if fail {
            Err("counted failure".into())
        } else {
            Ok(())
        }
    })
}

/// Loader that hands out the same handles on every call.
#[derive(Clone, Default)]
pub struct StaticLoader {
    pub entrypoint: Option<Arc<dyn Invocable>>,
    pub cleanup: Option<Arc<dyn Invocable>>,
    pub loads: Arc<AtomicUsize>,
}

impl Loader for StaticLoader {
    fn load(&self, _path: &Path) -> Result<LoadedUnit, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedUnit {
            entrypoint: self.entrypoint.clone(),
            cleanup: self.cleanup.clone(),
        })
    }
}
