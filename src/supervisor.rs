/// Supervisor loop: owns one execution and one watched target for the
/// lifetime of a session and turns their combined state into exactly one
/// `SessionOutcome`.
///
/// Change detection only starts once the entrypoint has finished; a
/// running entrypoint is never interrupted by an edit.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{
    Capability, CleanupFailure, Fault, InvalidSetup, RestartSignal, Safety, SessionOutcome,
};
use crate::harness::Execution;
use crate::loader::{Invocable, LoadError, Loader};
use crate::watch::{self, MonitoredTarget};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    FinishedWaiting,
}

/// Result of a single poll cycle.
#[derive(Debug)]
pub enum Step {
    Pending,
    Changed,
    Faulted(Arc<Fault>),
}

pub struct Supervisor {
    target: MonitoredTarget,
    execution: Execution,
    cleanup: Option<Arc<dyn Invocable>>,
    rate: Duration,
    state: SessionState,
}

impl Supervisor {
    /// Start the entrypoint and enter `Running`.
    pub fn start(
        target: MonitoredTarget,
        entrypoint: Arc<dyn Invocable>,
        cleanup: Option<Arc<dyn Invocable>>,
        rate: Duration,
    ) -> Self {
        debug!(
            path = %target.path().display(),
            modified = ?target.last_modified_at(),
            "starting entrypoint"
        );
        Self {
            target,
            execution: Execution::start(entrypoint),
            cleanup,
            rate,
            state: SessionState::Running,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Evaluate one cycle without sleeping.
    pub fn poll(&mut self) -> Step {
        if !self.execution.is_finished() {
            return Step::Pending;
        }
        if let Some(fault) = self.execution.take_fault() {
            return Step::Faulted(fault);
        }

        if self.state == SessionState::Running {
            self.state = SessionState::FinishedWaiting;
            info!("finished execution, waiting for changes");
        }

        match watch::observe(&self.target) {
            Ok(true) => Step::Changed,
            Ok(false) => Step::Pending,
            Err(fault) => Step::Faulted(Arc::new(fault)),
        }
    }

    /// Poll every `rate` until the session reaches a terminal outcome.
    pub async fn run(mut self) -> SessionOutcome {
        loop {
            match self.poll() {
                Step::Pending => tokio::time::sleep(self.rate).await,
                Step::Changed => return SessionOutcome::ChangeDetected,
                Step::Faulted(fault) => return self.settle(fault).await,
            }
        }
    }

    /// Apply the cleanup policy to a faulted session.
    async fn settle(self, fault: Arc<Fault>) -> SessionOutcome {
        let Some(cleanup) = self.cleanup else {
            return SessionOutcome::Restart(RestartSignal::new(Safety::Unsafe, fault));
        };

        debug!("running cleanup");
        let result = match tokio::task::spawn_blocking(move || cleanup.invoke()).await {
            Ok(result) => result,
            Err(join_error) => Err(join_error.into()),
        };

        match result {
            Ok(()) => SessionOutcome::Restart(RestartSignal::new(Safety::Safe, fault)),
            Err(cleanup) => SessionOutcome::CleanupFailed(CleanupFailure { fault, cleanup }),
        }
    }
}

/// Stat, load and supervise `path` until one outcome is reached.
pub async fn run_session<L: Loader + ?Sized>(
    path: &Path,
    loader: &L,
    rate: Duration,
) -> SessionOutcome {
    let target = match MonitoredTarget::stat(path) {
        Ok(target) => target,
        Err(fault) => return SessionOutcome::Restart(RestartSignal::unsafe_after(fault)),
    };

    let unit = match loader.load(path) {
        Ok(unit) => unit,
        Err(LoadError::Read { path, source }) => {
            let fault = Fault::FileAccess { path, source };
            return SessionOutcome::Restart(RestartSignal::unsafe_after(fault));
        }
        Err(LoadError::Malformed { capability, reason }) => {
            return SessionOutcome::InvalidSetup(InvalidSetup::new(capability, reason));
        }
    };

    let Some(entrypoint) = unit.entrypoint else {
        return SessionOutcome::InvalidSetup(InvalidSetup::new(
            Capability::Entrypoint,
            "no entrypoint directive found",
        ));
    };

    Supervisor::start(target, entrypoint, unit.cleanup, rate)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::loader::DirectiveLoader;
    use crate::testing::{
        bump_mtime, capture_logs, counted, failing, succeeding, wait_until, StaticLoader,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;

    const RATE: Duration = Duration::from_millis(5);
    const LIMIT: Duration = Duration::from_secs(5);

    fn watched() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.py");
        std::fs::write(&path, "print('hi')\n").unwrap();
        (dir, path)
    }

    fn supervise(
        path: &Path,
        entrypoint: Arc<dyn Invocable>,
        cleanup: Option<Arc<dyn Invocable>>,
    ) -> Supervisor {
        let target = MonitoredTarget::stat(path).unwrap();
        Supervisor::start(target, entrypoint, cleanup, RATE)
    }

    fn poll_until_not_pending(supervisor: &mut Supervisor) -> Step {
        let mut step = supervisor.poll();
        let deadline = std::time::Instant::now() + LIMIT;
        while matches!(step, Step::Pending) {
            assert!(std::time::Instant::now() < deadline, "still pending");
            std::thread::sleep(RATE);
            step = supervisor.poll();
        }
        step
    }

    #[test]
    fn test_finished_waits_and_announces_once() {
        let (_dir, path) = watched();
        let mut supervisor = supervise(&path, succeeding(), None);
        wait_until(|| supervisor.execution.is_finished());

        let (logs, _guard) = capture_logs();
        for _ in 0..3 {
            assert!(matches!(supervisor.poll(), Step::Pending));
            assert_eq!(supervisor.state(), SessionState::FinishedWaiting);
        }
        assert_eq!(logs.count("finished execution, waiting for changes"), 1);
    }

    #[test]
    fn test_change_after_finish_is_detected() {
        let (_dir, path) = watched();
        let mut supervisor = supervise(&path, succeeding(), None);
        wait_until(|| supervisor.execution.is_finished());
        assert!(matches!(supervisor.poll(), Step::Pending));

        bump_mtime(&path);
        assert!(matches!(supervisor.poll(), Step::Changed));
    }

    #[test]
    fn test_change_while_running_is_ignored() {
        let (_dir, path) = watched();
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let blocking: Arc<dyn Invocable> = Arc::new(move || -> Result<(), BoxError> {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let mut supervisor = supervise(&path, blocking, None);
        bump_mtime(&path);
        for _ in 0..3 {
            assert!(matches!(supervisor.poll(), Step::Pending));
            assert_eq!(supervisor.state(), SessionState::Running);
            std::thread::sleep(RATE);
        }

        release.store(true, Ordering::SeqCst);
        assert!(matches!(
            poll_until_not_pending(&mut supervisor),
            Step::Changed
        ));
    }

    #[test]
    fn test_fault_is_reported_before_file_check() {
        let (_dir, path) = watched();
        let mut supervisor = supervise(&path, failing("crashed"), None);
        bump_mtime(&path);
        match poll_until_not_pending(&mut supervisor) {
            Step::Faulted(fault) => assert!(matches!(fault.as_ref(), Fault::Raised(_))),
            other => panic!("expected Faulted, got {other:?}"),
        }
        assert_eq!(supervisor.state(), SessionState::Running);
    }

    #[test]
    fn test_deleted_file_while_waiting_is_a_fault() {
        let (_dir, path) = watched();
        let mut supervisor = supervise(&path, succeeding(), None);
        wait_until(|| supervisor.execution.is_finished());
        std::fs::remove_file(&path).unwrap();
        match supervisor.poll() {
            Step::Faulted(fault) => assert!(matches!(fault.as_ref(), Fault::FileAccess { .. })),
            other => panic!("expected Faulted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fault_without_cleanup_is_unsafe() {
        let (_dir, path) = watched();
        let outcome = timeout(LIMIT, supervise(&path, failing("crashed"), None).run())
            .await
            .unwrap();
        match outcome {
            SessionOutcome::Restart(signal) => {
                assert_eq!(signal.safety, Safety::Unsafe);
                assert!(matches!(signal.fault.as_ref(), Fault::Raised(_)));
            }
            other => panic!("expected Restart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fault_with_cleanup_is_safe_and_cleans_once() {
        let (_dir, path) = watched();
        let calls = Arc::new(AtomicUsize::new(0));
        let cleanup = counted(Arc::clone(&calls), false);
        let outcome = timeout(LIMIT, supervise(&path, failing("crashed"), Some(cleanup)).run())
            .await
            .unwrap();
        match outcome {
            SessionOutcome::Restart(signal) => assert_eq!(signal.safety, Safety::Safe),
            other => panic!("expected Restart, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_cleanup_is_fatal() {
        let (_dir, path) = watched();
        let calls = Arc::new(AtomicUsize::new(0));
        let cleanup = counted(Arc::clone(&calls), true);
        let outcome = timeout(LIMIT, supervise(&path, failing("crashed"), Some(cleanup)).run())
            .await
            .unwrap();
        match outcome {
            SessionOutcome::CleanupFailed(failure) => {
                assert!(matches!(failure.fault.as_ref(), Fault::Raised(_)));
                assert_eq!(failure.cleanup.to_string(), "counted failure");
            }
            other => panic!("expected CleanupFailed, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_cleanup_is_fatal() {
        let (_dir, path) = watched();
        let cleanup: Arc<dyn Invocable> =
            Arc::new(|| -> Result<(), BoxError> { panic!("cleanup exploded") });
        let outcome = timeout(LIMIT, supervise(&path, failing("crashed"), Some(cleanup)).run())
            .await
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::CleanupFailed(_)));
    }

    #[tokio::test]
    async fn test_interrupted_entrypoint_takes_unsafe_path() {
        let (_dir, path) = watched();
        let entrypoint: Arc<dyn Invocable> =
            Arc::new(|| -> Result<(), BoxError> { std::panic::panic_any(()) });
        let outcome = timeout(LIMIT, supervise(&path, entrypoint, None).run())
            .await
            .unwrap();
        match outcome {
            SessionOutcome::Restart(signal) => {
                assert_eq!(signal.safety, Safety::Unsafe);
                assert!(matches!(signal.fault.as_ref(), Fault::Interrupted));
            }
            other => panic!("expected Restart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_change_after_completion_ends_session() {
        let (_dir, path) = watched();
        let edited = path.clone();
        let entrypoint: Arc<dyn Invocable> = Arc::new(move || -> Result<(), BoxError> {
            bump_mtime(&edited);
            Ok(())
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let cleanup = counted(Arc::clone(&calls), false);
        let outcome = timeout(LIMIT, supervise(&path, entrypoint, Some(cleanup)).run())
            .await
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::ChangeDetected));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_session_without_entrypoint_is_invalid_setup() {
        let (_dir, path) = watched();
        let loader = StaticLoader {
            cleanup: Some(succeeding()),
            ..StaticLoader::default()
        };
        let outcome = run_session(&path, &loader, RATE).await;
        match outcome {
            SessionOutcome::InvalidSetup(setup) => {
                assert_eq!(setup.capability, Capability::Entrypoint)
            }
            other => panic!("expected InvalidSetup, got {other:?}"),
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_session_missing_file_is_unsafe_fault() {
        let dir = tempdir().unwrap();
        let loader = StaticLoader::default();
        let outcome = run_session(&dir.path().join("gone.py"), &loader, RATE).await;
        match outcome {
            SessionOutcome::Restart(signal) => {
                assert_eq!(signal.safety, Safety::Unsafe);
                assert!(matches!(signal.fault.as_ref(), Fault::FileAccess { .. }));
            }
            other => panic!("expected Restart, got {other:?}"),
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_session_malformed_directive_is_invalid_setup() {
        let (_dir, path) = watched();
        std::fs::write(&path, "# reloader: entrypoint =\n").unwrap();
        let outcome = run_session(&path, &DirectiveLoader, RATE).await;
        assert!(matches!(
            outcome,
            SessionOutcome::InvalidSetup(InvalidSetup {
                capability: Capability::Entrypoint,
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_session_with_failing_script_and_cleanup() {
        let (dir, path) = watched();
        let marker = dir.path().join("cleaned");
        std::fs::write(
            &path,
            format!(
                "# reloader: entrypoint = sh {{file}}\n# reloader: cleanup = touch {}\nexit 4\n",
                marker.display()
            ),
        )
        .unwrap();
        let outcome = timeout(LIMIT, run_session(&path, &DirectiveLoader, RATE))
            .await
            .unwrap();
        match outcome {
            SessionOutcome::Restart(signal) => assert_eq!(signal.safety, Safety::Safe),
            other => panic!("expected Restart, got {other:?}"),
        }
        assert!(marker.exists());
    }
}
