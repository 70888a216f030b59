use crate::auth::{AuthEndpointConfig, Credential, CredentialProvider, TokenStore};
use crate::error::CredentialRefreshFailed;
use crate::retry::RetryPolicy;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub type RefreshOutcome = Result<Arc<Credential>, CredentialRefreshFailed>;

/// How long before expiry a credential is considered due for refresh.
#[derive(Debug, Clone, Copy)]
pub enum LeadTime {
    Fixed(Duration),
    FractionOfLifetime(f64),
}

impl Default for LeadTime {
    fn default() -> Self {
        LeadTime::FractionOfLifetime(0.2)
    }
}

impl LeadTime {
    pub fn refresh_at(&self, credential: &Credential) -> DateTime<Utc> {
        let lifetime = credential.lifetime();
        let lead = match *self {
            LeadTime::Fixed(duration) => TimeDelta::from_std(duration).unwrap_or(lifetime),
            LeadTime::FractionOfLifetime(fraction) => {
                let millis = lifetime.num_milliseconds() as f64 * fraction.clamp(0.0, 1.0);
                TimeDelta::milliseconds(millis as i64)
            }
        };

        credential.expires_at() - lead.min(lifetime)
    }

    pub fn is_due(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at(credential)
    }
}

/// Decides when the provider is called and keeps the [`TokenStore`] filled.
///
/// At most one fetch is outstanding at any time: callers arriving while a
/// refresh runs wait for it and get the same outcome, failures included.
#[derive(Clone)]
pub struct CredentialRefresher {
    inner: Arc<RefresherInner>,
}

struct RefresherInner {
    provider: Arc<dyn CredentialProvider>,
    store: TokenStore,
    auth: AuthEndpointConfig,
    retry_policy: RetryPolicy,
    lead_time: LeadTime,
    runtime: Handle,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_refresh_id: AtomicU64,
}

struct InFlightRefresh {
    id: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

impl CredentialRefresher {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        store: TokenStore,
        auth: AuthEndpointConfig,
        retry_policy: RetryPolicy,
        lead_time: LeadTime,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                provider,
                store,
                auth,
                retry_policy,
                lead_time,
                runtime,
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Stored credential, if it is not due for refresh yet.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.fresh_credential(&self.inner.lead_time)
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_if_due(self.inner.lead_time).await
    }

    /// Synchronous entry for the broker's authentication callback.
    ///
    /// Blocks the calling thread for at most `deadline`. Must not be called
    /// from a thread that drives the runtime the refresher was built with.
    pub fn refresh_blocking(&self, deadline: Duration) -> RefreshOutcome {
        if let Some(credential) = self.current() {
            return Ok(credential);
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let refresher = self.clone();
        self.inner.runtime.spawn(async move {
            let _ = tx.send(refresher.refresh().await);
        });

        match rx.recv_timeout(deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(?deadline, "Bearer token was not refreshed in time");
                Err(CredentialRefreshFailed::DeadlineElapsed(deadline))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CredentialRefreshFailed::Shutdown),
        }
    }

    /// Drops the stored credential, e.g. after the broker rejected it.
    pub fn invalidate(&self) {
        debug!("Invalidating stored bearer token");
        self.inner.store.invalidate();
    }

    /// Refreshes in the background `lead_time` before each expiry, until
    /// `cancellation_token` is cancelled.
    pub fn schedule_proactive_refresh(
        &self,
        lead_time: LeadTime,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let refresher = self.clone();
        self.inner.runtime.spawn(
            async move {
                refresher
                    .run_proactive_refresh(lead_time, cancellation_token)
                    .await
            }
            .instrument(info_span!("Proactive token refresh")),
        )
    }

    async fn run_proactive_refresh(&self, lead_time: LeadTime, cancellation_token: CancellationToken) {
        let store = &self.inner.store;

        loop {
            let mut changes = store.subscribe();
            let wait = store
                .get()
                .map(|credential| until(lead_time.refresh_at(&credential)))
                .unwrap_or(Duration::ZERO);

            if !wait.is_zero() {
                debug!(?wait, "Next proactive refresh scheduled");
                select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = sleep(wait) => {}
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            if cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.refresh_if_due(lead_time).await {
                Ok(credential) => {
                    debug!(expires_at = %credential.expires_at(), "Proactive refresh finished");
                    self.inner.retry_policy.base_delay
                }
                Err(e) => {
                    warn!("Proactive bearer token refresh failed: {e}");
                    self.inner.retry_policy.max_delay
                }
            };

            select! {
                _ = cancellation_token.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        info!("Proactive token refresh stopped");
    }

    async fn refresh_if_due(&self, lead_time: LeadTime) -> RefreshOutcome {
        let outcome = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(credential) = self.fresh_credential(&lead_time) {
                return Ok(credential);
            }

            match in_flight.as_ref() {
                Some(running) => running.outcome.clone(),
                None => self.start_refresh(&mut *in_flight),
            }
        };

        outcome.await
    }

    fn start_refresh(
        &self,
        slot: &mut Option<InFlightRefresh>,
    ) -> Shared<BoxFuture<'static, RefreshOutcome>> {
        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();

        // The slot lock is held by the caller, so `finish_refresh` cannot run
        // before the slot is filled below.
        let task = self.inner.runtime.spawn(
            async move {
                let outcome = inner.fetch_with_retry().await;
                inner.finish_refresh(id);
                outcome
            }
            .instrument(info_span!("Refreshing bearer token", refresh_id = id)),
        );

        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                error!("Bearer token refresh task stopped: {e}");
                Err(CredentialRefreshFailed::Shutdown)
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlightRefresh {
            id,
            outcome: outcome.clone(),
        });

        outcome
    }

    fn fresh_credential(&self, lead_time: &LeadTime) -> Option<Arc<Credential>> {
        let now = Utc::now();
        self.inner
            .store
            .get()
            .filter(|credential| !lead_time.is_due(credential, now))
    }
}

impl RefresherInner {
    async fn fetch_with_retry(&self) -> RefreshOutcome {
        let result = self
            .retry_policy
            .run("Bearer token request", |attempt| {
                debug!(attempt, auth_url = %self.auth.auth_url, "Requesting bearer token");
                self.provider.fetch(&self.auth)
            })
            .await;

        match result {
            Ok(credential) => {
                let credential = self.store.set(credential);
                info!(
                    expires_at = %credential.expires_at(),
                    version = self.store.version(),
                    "Bearer token refreshed"
                );
                Ok(credential)
            }
            Err(exhausted) => Err(CredentialRefreshFailed::RetriesExhausted {
                attempts: exhausted.attempts,
                last_error: exhausted.last_error,
            }),
        }
    }

    fn finish_refresh(&self, id: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.as_ref().is_some_and(|running| running.id == id) {
            *in_flight = None;
        }
    }
}

fn until(instant: DateTime<Utc>) -> Duration {
    (instant - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
