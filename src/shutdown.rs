//! # Graceful Shutdown Module
//!
//! Turns SIGINT/SIGTERM into cancellation of running scans. The manager owns
//! a root [`CancellationToken`]; the orchestrator derives one child token per
//! scan from it, so a signal cancels every module still in flight and the
//! scan returns with those modules recorded as timed out.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reconmap::shutdown::ShutdownManager;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> reconmap::error::Result<()> {
//! let shutdown = ShutdownManager::new(Duration::from_secs(5));
//! shutdown.start_signal_handler()?;
//!
//! let token = shutdown.token();
//! tokio::select! {
//!     _ = token.cancelled() => println!("Received shutdown signal"),
//!     _ = tokio::time::sleep(Duration::from_secs(60)) => println!("Finished normally"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{ReconError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Signal types that can trigger shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C)
    SigInt,
    /// SIGTERM (termination signal)
    SigTerm,
    /// Internal shutdown request
    Internal,
}

impl ShutdownSignal {
    fn code(self) -> u8 {
        match self {
            Self::SigInt => 1,
            Self::SigTerm => 2,
            Self::Internal => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::SigInt),
            2 => Some(Self::SigTerm),
            3 => Some(Self::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::SigInt => write!(f, "SIGINT"),
            ShutdownSignal::SigTerm => write!(f, "SIGTERM"),
            ShutdownSignal::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Manages signal-driven cancellation
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    /// How long in-flight work may take to drain after a signal
    timeout: Duration,
    token: CancellationToken,
    /// First signal received, 0 while running
    signal: Arc<AtomicU8>,
}

impl ShutdownManager {
    /// Create a new shutdown manager with the specified drain timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            token: CancellationToken::new(),
            signal: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Root token; scans derive child tokens from it
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start listening for SIGINT and SIGTERM in a background task
    pub fn start_signal_handler(&self) -> Result<()> {
        let manager = self.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| ReconError::config(format!("Failed to setup SIGINT handler: {}", e)))?;
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| ReconError::config(format!("Failed to setup SIGTERM handler: {}", e)))?;

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => manager.trigger(ShutdownSignal::SigInt),
                    _ = sigterm.recv() => manager.trigger(ShutdownSignal::SigTerm),
                    _ = manager.token.cancelled() => {}
                }
            });
        }

        #[cfg(not(unix))]
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => manager.trigger(ShutdownSignal::SigInt),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                },
                _ = manager.token.cancelled() => {}
            }
        });

        Ok(())
    }

    fn trigger(&self, signal: ShutdownSignal) {
        if self
            .signal
            .compare_exchange(0, signal.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(signal = %signal, "Shutdown initiated, cancelling running scans");
            self.token.cancel();
        }
    }

    /// Initiate shutdown from within the application
    pub fn initiate_shutdown(&self) {
        self.trigger(ShutdownSignal::Internal);
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The signal that initiated shutdown, if any
    pub fn received_signal(&self) -> Option<ShutdownSignal> {
        ShutdownSignal::from_code(self.signal.load(Ordering::SeqCst))
    }

    /// Wait for a shutdown signal
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        self.token.cancelled().await;
        self.received_signal().unwrap_or(ShutdownSignal::Internal)
    }

    /// Drive `work` to completion, allowing it the drain timeout once
    /// shutdown has begun.
    pub async fn run_until_drained<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(work);
        tokio::select! {
            output = &mut work => return Ok(output),
            _ = self.token.cancelled() => {}
        }

        warn!("Waiting up to {:?} for running work to finish", self.timeout);
        match timeout(self.timeout, work).await {
            Ok(output) => {
                info!("Graceful shutdown completed successfully");
                Ok(output)
            }
            Err(_) => {
                error!("Graceful shutdown timed out after {:?}", self.timeout);
                Err(ReconError::timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
