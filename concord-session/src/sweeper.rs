//! Transition Sweeper Background Task
//!
//! Periodically looks for accounts with a session stuck in `Transition`
//! longer than the configured timeout and hands each one to a
//! [`TransitionHandler`]. A session gets stuck when the service it was being
//! handed to never completes the `CHANNEL` login, e.g. because it crashed
//! mid-handoff.
//!
//! Finding stuck accounts is read-only
//! ([`SessionCoordinator::get_expired_in_transition`]). The handler owns the
//! decision of what to do with them; [`ExpireTransitionHandler`] simply calls
//! [`SessionCoordinator::expire_transition`].
//!
//! # Configuration
//!
//! ```ignore
//! use concord_session::SweeperConfig;
//! use std::time::Duration;
//!
//! let config = SweeperConfig::default()
//!     .with_check_interval(Duration::from_secs(10))
//!     .with_transition_timeout(Duration::from_secs(5));
//! ```

use crate::coordinator::SessionCoordinator;
use crate::model::AccountKey;
use async_trait::async_trait;
use concord_core::constants::{DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_TRANSITION_TIMEOUT_SECS};
use concord_core::{ConfigError, SessionError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the transition sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// How often to look for stuck sessions (default: 10 seconds)
    pub check_interval: Duration,

    /// Age after which a session in `Transition` is stuck (default: 5 seconds)
    pub transition_timeout: Duration,

    /// Whether to log each stuck account (default: true)
    pub log_expirations: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            transition_timeout: Duration::from_secs(DEFAULT_TRANSITION_TIMEOUT_SECS),
            log_expirations: true,
        }
    }
}

impl SweeperConfig {
    /// # Environment Variables
    /// - `CONCORD_SWEEP_INTERVAL_SECS` (default: 10)
    /// - `CONCORD_TRANSITION_TIMEOUT_SECS` (default: 5)
    /// - `CONCORD_SWEEP_LOG_EXPIRATIONS` (default: true)
    pub fn from_env() -> Self {
        let check_interval = Duration::from_secs(
            std::env::var("CONCORD_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        let transition_timeout = Duration::from_secs(
            std::env::var("CONCORD_TRANSITION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TRANSITION_TIMEOUT_SECS),
        );

        let log_expirations = std::env::var("CONCORD_SWEEP_LOG_EXPIRATIONS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            check_interval,
            transition_timeout,
            log_expirations,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = timeout;
        self
    }

    pub fn with_log_expirations(mut self, log: bool) -> Self {
        self.log_expirations = log;
        self
    }

    /// The check interval must be non-zero; `tokio::time::interval` panics on zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "check_interval".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// HANDLER
// ============================================================================

/// Receives each account found with a stuck session.
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    async fn on_expired(&self, account: &AccountKey) -> Result<(), SessionError>;
}

/// Expires the stuck sessions in place.
pub struct ExpireTransitionHandler {
    coordinator: SessionCoordinator,
    timeout: Duration,
}

impl ExpireTransitionHandler {
    pub fn new(coordinator: SessionCoordinator, timeout: Duration) -> Self {
        Self { coordinator, timeout }
    }
}

#[async_trait]
impl TransitionHandler for ExpireTransitionHandler {
    async fn on_expired(&self, account: &AccountKey) -> Result<(), SessionError> {
        self.coordinator.expire_transition(account, self.timeout).await
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Stuck accounts found across all cycles
    pub accounts_found: AtomicU64,

    /// Stuck accounts the handler processed successfully
    pub accounts_handled: AtomicU64,

    /// Scan and handler failures
    pub sweep_errors: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            accounts_found: self.accounts_found.load(Ordering::Relaxed),
            accounts_handled: self.accounts_handled.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SweeperMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub sweep_cycles: u64,
    pub accounts_found: u64,
    pub accounts_handled: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Runs sweep cycles until `shutdown_rx` turns true.
///
/// The first cycle runs immediately, then once per `check_interval`. An
/// invalid config ends the task at once with one recorded sweep error.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let config = SweeperConfig::from_env();
/// let handler = Arc::new(ExpireTransitionHandler::new(
///     coordinator.clone(),
///     config.transition_timeout,
/// ));
///
/// let handle = tokio::spawn(transition_sweeper_task(coordinator, handler, config, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn transition_sweeper_task(
    coordinator: SessionCoordinator,
    handler: Arc<dyn TransitionHandler>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Transition sweeper not started");
        metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        return metrics;
    }

    let mut sweep_interval = interval(config.check_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        namespace = coordinator.namespace(),
        check_interval_secs = config.check_interval.as_secs(),
        transition_timeout_secs = config.transition_timeout.as_secs(),
        "Transition sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Transition sweeper shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&coordinator, handler.as_ref(), &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        accounts_found = snapshot.accounts_found,
        accounts_handled = snapshot.accounts_handled,
        sweep_errors = snapshot.sweep_errors,
        "Transition sweeper completed"
    );

    metrics
}

/// One sweep cycle. Returns the number of accounts handled.
pub async fn sweep_once(
    coordinator: &SessionCoordinator,
    handler: &dyn TransitionHandler,
    config: &SweeperConfig,
    metrics: &SweeperMetrics,
) -> u64 {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    let stuck = match coordinator
        .get_expired_in_transition(config.transition_timeout)
        .await
    {
        Ok(stuck) => stuck,
        Err(e) => {
            tracing::error!(error = %e, "Failed to scan for stuck sessions");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
    };
    metrics
        .accounts_found
        .fetch_add(stuck.len() as u64, Ordering::Relaxed);

    let mut handled = 0u64;
    for account in &stuck {
        if config.log_expirations {
            tracing::warn!(account = %account, "Session stuck in transition");
        }

        match handler.on_expired(account).await {
            Ok(()) => {
                handled += 1;
                metrics.accounts_handled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(account = %account, error = %e, "Failed to handle stuck session");
                metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if handled > 0 {
        tracing::info!(handled, "Transition sweep completed");
    } else {
        tracing::trace!("Transition sweep completed with no stuck sessions");
    }
    handled
}

// ============================================================================
// TESTS
// ============================================================================
