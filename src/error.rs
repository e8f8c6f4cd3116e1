//! Conditions signaled between the execution harness, the supervisor loop
//! and the retry controller.
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Error type returned by entrypoint and cleanup invocations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A capability the watched file may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Entrypoint,
    Cleanup,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Entrypoint => "entrypoint",
            Capability::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("entrypoint failed")]
    Raised(#[source] BoxError),
    #[error("entrypoint panicked: {0}")]
    Panicked(String),
    /// The entrypoint stopped and left nothing to report.
    #[error("entrypoint stopped without a recoverable cause")]
    Interrupted,
    #[error("could not start the entrypoint thread")]
    Spawn(#[source] std::io::Error),
    #[error("cannot access watched file {}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Fault {
    /// Convert a panic payload caught on the execution thread.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(message) = payload.downcast_ref::<&str>() {
            return Fault::Panicked((*message).to_string());
        }
        match payload.downcast::<String>() {
            Ok(message) => Fault::Panicked(*message),
            Err(_) => Fault::Interrupted,
        }
    }
}

/// The loaded unit does not provide a usable capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid implementation of `{capability}`: {reason}")]
pub struct InvalidSetup {
    pub capability: Capability,
    pub reason: String,
}

impl InvalidSetup {
    pub fn new(capability: Capability, reason: impl Into<String>) -> Self {
        Self {
            capability,
            reason: reason.into(),
        }
    }
}

/// Whether cleanup ran before the restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    Safe,
    Unsafe,
}

impl Safety {
    pub fn describe(&self) -> &'static str {
        match self {
            Safety::Safe => "retrying safely",
            Safety::Unsafe => "retrying unsafely; no cleanup method",
        }
    }
}

/// A faulted session, classified by the cleanup policy.
#[derive(Debug, thiserror::Error)]
#[error("{}", .safety.describe())]
pub struct RestartSignal {
    pub safety: Safety,
    #[source]
    pub fault: Arc<Fault>,
}

impl RestartSignal {
    pub fn new(safety: Safety, fault: Arc<Fault>) -> Self {
        Self { safety, fault }
    }

    pub fn unsafe_after(fault: Fault) -> Self {
        Self::new(Safety::Unsafe, Arc::new(fault))
    }
}

/// Cleanup raised while handling a fault. Fatal for the supervisor.
#[derive(Debug, thiserror::Error)]
#[error("cleanup failed while recovering from a fault")]
pub struct CleanupFailure {
    /// The fault that triggered cleanup.
    pub fault: Arc<Fault>,
    #[source]
    pub cleanup: BoxError,
}

/// Terminal result of one supervised session.
#[derive(Debug)]
pub enum SessionOutcome {
    ChangeDetected,
    Restart(RestartSignal),
    InvalidSetup(InvalidSetup),
    CleanupFailed(CleanupFailure),
}

/// Renders an error followed by its sources, stopping after `limit` entries.
pub struct CauseChain<'a> {
    error: &'a (dyn StdError + 'static),
    limit: usize,
}

impl<'a> CauseChain<'a> {
    pub fn new(error: &'a (dyn StdError + 'static), limit: u32) -> Self {
        Self {
            error,
            limit: (limit as usize).max(1),
        }
    }
}

impl fmt::Display for CauseChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chain = std::iter::successors(Some(self.error), |&err| err.source());
        for (depth, err) in chain.by_ref().take(self.limit).enumerate() {
            if depth > 0 {
                f.write_str(": ")?;
            }
            write!(f, "{err}")?;
        }
        let elided = chain.count();
        if elided > 0 {
            write!(f, " (+{elided} more)")?;
        }
        Ok(())
    }
}
