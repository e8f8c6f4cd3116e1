/// Execution harness: runs one entrypoint call on its own thread.
///
/// The thread is detached and never joined or cancelled. The polling side
/// observes it only through `is_finished` and `take_fault`. The fault is
/// written before the finished flag is released, and readers acquire the
/// flag before looking at the fault.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crate::error::Fault;
use crate::loader::Invocable;

#[derive(Default)]
struct Completion {
    finished: AtomicBool,
    fault: OnceLock<Arc<Fault>>,
}

impl Completion {
    fn publish(&self, fault: Option<Fault>) {
        if let Some(fault) = fault {
            let _ = self.fault.set(Arc::new(fault));
        }
        self.finished.store(true, Ordering::Release);
    }
}

/// One running (or finished) entrypoint call.
pub struct Execution {
    completion: Arc<Completion>,
}

impl Execution {
    /// Start `entrypoint.invoke()` on a new thread and return immediately.
    pub fn start(entrypoint: Arc<dyn Invocable>) -> Self {
        let completion = Arc::new(Completion::default());
        let worker = Arc::clone(&completion);

        let spawned = thread::Builder::new()
            .name("entrypoint".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| entrypoint.invoke()));
                let fault = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(error)) => Some(Fault::Raised(error)),
                    Err(payload) => Some(Fault::from_panic(payload)),
                };
                worker.publish(fault);
            });

        if let Err(e) = spawned {
            tracing::debug!(error = %e, "failed to spawn entrypoint thread");
            completion.publish(Some(Fault::Spawn(e)));
        }

        Self { completion }
    }

    /// True once the call has returned or panicked. Never resets.
    pub fn is_finished(&self) -> bool {
        self.completion.finished.load(Ordering::Acquire)
    }

    /// The captured fault, if the call finished abnormally.
    ///
    /// Returns `None` while the call is still running. Repeated reads return
    /// the same fault.
    pub fn take_fault(&self) -> Option<Arc<Fault>> {
        if !self.is_finished() {
            return None;
        }
        self.completion.fault.get().cloned()
    }
}
