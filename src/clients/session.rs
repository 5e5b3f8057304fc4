//! Cached login sessions.
//!
//! At most one login is in flight per client: callers queue on the mutex and reuse the
//! session the first caller obtained. A request that fails with an auth error
//! invalidates only the session it used, so a concurrent re-login is not thrown away.

use crate::error::ClientResult;
use std::future::Future;
use tokio::sync::Mutex;

pub(crate) struct SessionCache<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone + PartialEq> SessionCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Cached session, logging in first when there is none
    pub(crate) async fn get_or_login<F, Fut>(&self, login: F) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = login().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session if it is still `stale`
    pub(crate) async fn invalidate(&self, stale: &T) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref() == Some(stale) {
            *slot = None;
        }
    }

    /// Replace the cached session (servers that hand out a new token mid-conversation)
    pub(crate) async fn store(&self, session: T) {
        *self.slot.lock().await = Some(session);
    }

    /// Remove and return the cached session
    pub(crate) async fn take(&self) -> Option<T> {
        self.slot.lock().await.take()
    }

    /// Run `op` with a session, re-logging in once if it fails with an auth error
    pub(crate) async fn run<R, L, LFut, O, OFut>(&self, login: L, op: O) -> ClientResult<R>
    where
        L: Fn() -> LFut,
        LFut: Future<Output = ClientResult<T>>,
        O: Fn(T) -> OFut,
        OFut: Future<Output = ClientResult<R>>,
    {
        let session = self.get_or_login(&login).await?;
        match op(session.clone()).await {
            Err(e) if e.is_auth() => {
                tracing::debug!(error = %e, "Session rejected, logging in again");
                self.invalidate(&session).await;
                let fresh = self.get_or_login(&login).await?;
                op(fresh).await
            }
            other => other,
        }
    }
}
