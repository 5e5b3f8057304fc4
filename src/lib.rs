//! # librarian-dl
//!
//! Job coordinator and download-client dispatch for a book library manager.
//!
//! ## What it does
//!
//! - Runs recurring jobs (post-processing, provider searches, housekeeping) on fixed
//!   intervals with start/stop/restart and "next run" introspection
//! - Hands wanted releases to the one configured usenet downloader or torrent client
//!   and records the task handle the backend returns
//! - Reconciles in-flight tasks: confirms finished downloads, fails tasks that are too
//!   old or never make progress, and retries a book from its next candidate
//! - Emits events and optional webhook notifications for snatches and completed downloads
//!
//! ## Quick Start
//!
//! ```no_run
//! use librarian_dl::{Config, Coordinator, SabnzbdConfig, UsenetBackend};
//! use librarian_dl::config::Endpoint;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         usenet: UsenetBackend::Sabnzbd(SabnzbdConfig {
//!             endpoint: Endpoint::new("localhost:8080"),
//!             api_key: "0123456789abcdef".to_string(),
//!             category: Some("books".to_string()),
//!             priority: None,
//!         }),
//!         ..Default::default()
//!     };
//!
//!     let coordinator = Coordinator::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     coordinator.start().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download backend adapters
pub mod clients;
/// Configuration types
pub mod config;
/// Boot, reload and shutdown of the whole system
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Submitting wanted items to backends
pub mod dispatch;
/// Error types
pub mod error;
/// Recurring jobs and their scheduler
pub mod jobs;
/// Snatch and download notifications
pub mod notify;
/// Wanted/book status transitions and the in-flight sweep
pub mod reconciler;
/// Bounded polling with an injectable clock
pub mod retry;
/// Core types and events
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use clients::{ClientRegistry, DownloadClient};
pub use config::{Config, SabnzbdConfig, TorrentBackend, UsenetBackend};
pub use coordinator::{ConfigSink, Coordinator, CoordinatorBuilder};
pub use db::Database;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{ClientError, DatabaseError, Error, Result};
pub use jobs::{CandidateSource, JobId, JobInfo, JobInterval, JobTarget, PostProcessHook};
pub use notify::{NotificationDispatcher, Notifier, WebhookNotifier};
pub use reconciler::{ConfirmOutcome, Reconciler, SweepReport};
pub use types::{
    BackendHandle, BackendKind, BookId, BookStatus, ConnectionTestResult, DownloadProgress,
    Event, Library, MediaKind, NewWantedItem, WantedId, WantedItem, WantedStatus,
};

/// Helper function to run the coordinator with graceful signal handling.
///
/// Waits for a termination signal and then calls the coordinator's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use librarian_dl::{Config, Coordinator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let coordinator = Coordinator::new(Config::default()).await?;
///     coordinator.start().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(coordinator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(coordinator: Coordinator) -> Result<()> {
    wait_for_signal().await;
    coordinator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
