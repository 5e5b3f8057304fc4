//! Runtime configuration updates and backend connection checks.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::NotificationDispatcher;
use crate::types::{ConnectionTestResult, Event, MediaKind};

use super::Coordinator;

impl Coordinator {
    /// Validate and activate a new configuration snapshot
    ///
    /// The client registry is rebuilt (closing the old sessions), notifications are
    /// rewired, every job is restarted so new intervals apply and the enable predicates
    /// are re-evaluated. On any validation or client construction error the previous
    /// snapshot and clients stay active.
    pub async fn reload_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.registry.rebuild(&config).await?;
        let snapshot = self.config.replace(config)?;

        self.reconciler
            .set_notifications(NotificationDispatcher::from_config(&snapshot.notifications))
            .await;

        let restarted = self.scheduler.restart_all().await;
        self.check_running_jobs().await?;

        tracing::info!(
            running = restarted.len(),
            "Configuration reloaded"
        );
        self.emit_event(Event::ConfigReloaded);
        Ok(())
    }

    /// Check that the backend for `media_kind` is reachable with its credentials
    ///
    /// Never fails because the backend is down; that is reported in the result.
    /// Errors only when no backend is configured for the media kind.
    pub async fn test_connection(&self, media_kind: MediaKind) -> Result<ConnectionTestResult> {
        let Some(active) = self.registry.client_for(media_kind).await else {
            return Err(Error::config(
                format!("No {} download method is enabled", media_kind),
                match media_kind {
                    MediaKind::Usenet => "usenet",
                    MediaKind::Torrent => "torrent",
                },
            ));
        };

        let result = active.client.test_connection().await;
        if result.success {
            tracing::info!(backend = %result.backend, "{}", result);
        } else {
            tracing::warn!(backend = %result.backend, "{}", result);
        }
        Ok(result)
    }
}
