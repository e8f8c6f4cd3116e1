/// Retry controller: the outermost loop. Starts a session after every
/// restart signal, charges faults against the retry budget, and decides
/// when the supervisor stops.
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{CauseChain, CleanupFailure, InvalidSetup, Safety, SessionOutcome};
use crate::loader::Loader;
use crate::retry::{RetryBudget, RetryDecision};
use crate::supervisor;

/// Produces one supervised session per call.
pub trait SessionSource {
    fn next_session(&mut self) -> impl Future<Output = SessionOutcome>;
}

/// Sessions over the watched file, loaded fresh each time.
pub struct FileSessions<L> {
    path: PathBuf,
    loader: L,
    rate: Duration,
}

impl<L: Loader> FileSessions<L> {
    pub fn new(path: impl Into<PathBuf>, loader: L, rate: Duration) -> Self {
        Self {
            path: path.into(),
            loader,
            rate,
        }
    }
}

impl<L: Loader> SessionSource for FileSessions<L> {
    async fn next_session(&mut self) -> SessionOutcome {
        supervisor::run_session(&self.path, &self.loader, self.rate).await
    }
}

/// Why the controller stopped.
#[derive(Debug)]
pub enum Exit {
    BudgetExhausted { attempts: u32 },
    InvalidSetup(InvalidSetup),
    CleanupFailed(CleanupFailure),
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::BudgetExhausted { attempts } => {
                write!(f, "retry budget exhausted after {attempts} faults")
            }
            Exit::InvalidSetup(setup) => write!(f, "{setup}"),
            Exit::CleanupFailed(failure) => write!(f, "{failure}"),
        }
    }
}

impl Exit {
    /// Process exit code for this stop reason.
    pub fn code(&self) -> u8 {
        match self {
            Exit::BudgetExhausted { .. } => 1,
            Exit::InvalidSetup(_) => 2,
            Exit::CleanupFailed(_) => 3,
        }
    }
}

pub struct Controller<S> {
    sessions: S,
    budget: RetryBudget,
    tb_limit: u32,
}

impl<S: SessionSource> Controller<S> {
    pub fn new(sessions: S, config: &MonitorConfig) -> Self {
        Self {
            sessions,
            budget: RetryBudget::new(config.retries, config.retry_delay()),
            tb_limit: config.tb_limit,
        }
    }

    #[allow(dead_code)]
    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run sessions until the budget is exhausted or a fatal outcome occurs.
    pub async fn run(&mut self) -> Exit {
        loop {
            match self.sessions.next_session().await {
                SessionOutcome::ChangeDetected => {
                    info!("change detected in file, restarting");
                }
                SessionOutcome::Restart(signal) => {
                    error!(
                        cause = %CauseChain::new(&*signal.fault, self.tb_limit),
                        "exception raised during execution"
                    );
                    match signal.safety {
                        Safety::Unsafe => warn!("{signal}"),
                        Safety::Safe => info!("{signal}"),
                    }
                    match self.budget.record_fault() {
                        RetryDecision::Retry { attempt, delay } => {
                            debug!(
                                attempt,
                                delay_secs = delay.as_secs_f64(),
                                "waiting before restart"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Exhausted { attempts } => {
                            warn!(attempts, "reached max retries, exiting");
                            return Exit::BudgetExhausted { attempts };
                        }
                    }
                }
                SessionOutcome::InvalidSetup(setup) => {
                    error!(capability = %setup.capability, "{setup}");
                    return Exit::InvalidSetup(setup);
                }
                SessionOutcome::CleanupFailed(failure) => {
                    error!(
                        fault = %CauseChain::new(&*failure.fault, self.tb_limit),
                        cleanup = %CauseChain::new(&*failure.cleanup, self.tb_limit),
                        "{failure}"
                    );
                    return Exit::CleanupFailed(failure);
                }
            }
        }
    }
}
