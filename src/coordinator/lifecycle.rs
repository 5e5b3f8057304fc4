//! Graceful shutdown.

use crate::error::Result;
use crate::types::Event;

use super::Coordinator;

impl Coordinator {
    /// Gracefully shut down the coordinator
    ///
    /// 1. Stops accepting dispatches and waits up to `shutdown_timeout` for running ones
    /// 2. Stops the scheduler, waiting up to `shutdown_timeout` for running jobs
    /// 3. Closes backend sessions
    /// 4. Persists the configuration through the [`ConfigSink`](super::ConfigSink)
    /// 5. Marks a clean shutdown in the record store
    /// 6. Emits [`Event::Shutdown`]
    ///
    /// A dispatch still running after the timeout leaves its row Pending; the next boot
    /// fails it.
    ///
    /// Later steps still run when an earlier one fails; the first failure of the
    /// persistence steps is returned.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        let config = self.config();

        self.dispatcher.begin_shutdown();
        tracing::info!("Stopped accepting new dispatches");
        if !self.dispatcher.wait_idle(config.shutdown_timeout).await {
            tracing::warn!(
                in_flight = self.dispatcher.in_flight(),
                "Dispatches still running after {:?}",
                config.shutdown_timeout
            );
        }

        self.scheduler.shutdown(config.shutdown_timeout).await;
        self.registry.close_all().await;

        let mut first_error = None;
        if let Some(sink) = &self.config_sink {
            match sink.persist(&config).await {
                Ok(()) => tracing::info!("Configuration persisted"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to persist configuration during shutdown");
                    first_error = Some(e);
                }
            }
        }

        match self.db.set_clean_shutdown().await {
            Ok(()) => tracing::info!("Marked clean shutdown in database"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark clean shutdown in database");
                first_error.get_or_insert(e);
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
