// Refresh coordinator
// Owns the single-flight renewal contract: however many callers ask at
// once, at most one renewal request is on the wire and every caller
// observes the same outcome. Also runs the proactive renewal schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::error::AuthError;
use crate::identity::types::TokenPair;
use crate::identity::IdentityClient;
use crate::store::SessionStore;
use crate::token;

/// Renew this far into the access token's lifetime
const PROACTIVE_RENEWAL_FRACTION: f64 = 0.9;

/// Floor for the proactive timer so a nearly-dead token cannot hot-loop
const MIN_PROACTIVE_DELAY: Duration = Duration::from_secs(1);

type SharedRenewal = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

/// Cancellation handle for the proactive renewal schedule.
///
/// Aborting (or dropping) the handle stops the schedule. It cannot recall a
/// renewal request already on the wire; that result is discarded on arrival
/// if the session was cleared in the meantime.
pub struct RefreshTimer {
    task: JoinHandle<()>,
}

impl RefreshTimer {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct RefreshCoordinator {
    identity: Arc<IdentityClient>,
    store: Arc<SessionStore>,
    inflight: Mutex<Option<(u64, SharedRenewal)>>,
    generation: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(identity: Arc<IdentityClient>, store: Arc<SessionStore>) -> Self {
        Self {
            identity,
            store,
            inflight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Renew the session's token pair.
    ///
    /// Callers arriving while a renewal is on the wire do not issue
    /// duplicates; they join the flight and observe its outcome. The
    /// refresh credential is read from the store inside the flight, so the
    /// newest credential is used even when it changed after a caller
    /// decided to renew. On success the new pair is persisted exactly once
    /// before fan-out.
    pub async fn renew(&self) -> Result<TokenPair, AuthError> {
        let (generation, flight) = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.as_ref() {
                Some((generation, flight)) => (*generation, flight.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let flight: SharedRenewal =
                        perform_renewal(Arc::clone(&self.identity), Arc::clone(&self.store))
                            .boxed()
                            .shared();
                    *inflight = Some((generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let outcome = flight.await;

        // whichever caller gets here first retires the flight
        let mut inflight = self.inflight.lock().unwrap();
        if matches!(inflight.as_ref(), Some((g, _)) if *g == generation) {
            *inflight = None;
        }
        outcome
    }

    /// How long to wait before proactively renewing `access_token`.
    pub fn proactive_delay(access_token: &str) -> Duration {
        token::time_until_expiry(access_token)
            .mul_f64(PROACTIVE_RENEWAL_FRACTION)
            .max(MIN_PROACTIVE_DELAY)
    }

    /// Arm the self-re-arming proactive renewal schedule.
    ///
    /// The timer fires at 90% of the access token's remaining lifetime,
    /// renews through the single-flight path and re-arms itself from the
    /// renewed token. `on_failed` runs once if a renewal fails; the
    /// schedule then stops.
    pub fn schedule_proactive<F>(self: Arc<Self>, access_token: &str, on_failed: F) -> RefreshTimer
    where
        F: FnOnce() + Send + 'static,
    {
        let mut delay = Self::proactive_delay(access_token);
        let coordinator = self;

        let task = tokio::spawn(async move {
            let mut on_failed = Some(on_failed);
            loop {
                tokio::time::sleep(delay).await;
                match coordinator.renew().await {
                    Ok(pair) => {
                        delay = Self::proactive_delay(&pair.access);
                        tracing::debug!(
                            next_renewal_secs = delay.as_secs(),
                            "proactive renewal succeeded"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "proactive renewal failed");
                        if let Some(on_failed) = on_failed.take() {
                            on_failed();
                        }
                        break;
                    }
                }
            }
        });

        RefreshTimer { task }
    }
}

async fn perform_renewal(
    identity: Arc<IdentityClient>,
    store: Arc<SessionStore>,
) -> Result<TokenPair, AuthError> {
    let refresh = store
        .load()
        .map(|record| record.tokens.refresh)
        .ok_or(AuthError::SessionExpired)?;

    let pair = identity.renew(&refresh).await?;

    // A logout may have raced the network call; its clear() wins and the
    // fresh pair is discarded on arrival.
    if store.load().is_none() {
        tracing::debug!("session cleared while renewal was in flight, discarding result");
        return Err(AuthError::SessionExpired);
    }

    store.update_tokens(&pair)?;
    tracing::debug!("access token renewed");
    Ok(pair)
}
