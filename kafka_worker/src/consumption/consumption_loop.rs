use crate::auth::{CredentialRefresher, LeadTime};
use crate::consumer::{
    BrokerClientFactory, BrokerConsumer, ConsumerEvent, ConsumerSettings, ConsumerState,
    PartitionOffset,
};
use crate::consumption::consume_counters::increment;
use crate::consumption::{ConsumeCounters, MessageHandler, MessagesCounters};
use crate::error::{BrokerError, ConsumptionError, ProcessingError};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct ConsumptionLoopSettings {
    /// Backoff between consumer sessions. `max_attempts` bounds consecutive
    /// sessions that failed without ever consuming. Sessions that could not
    /// get a bearer token are paused and retried without limit.
    pub restart_policy: RetryPolicy,
    /// Background refresh ahead of expiry. `None` leaves refreshing to the
    /// broker's handshake callback.
    pub proactive_refresh: Option<LeadTime>,
    pub event_buffer: usize,
    pub counters_report_interval: Duration,
}

impl Default for ConsumptionLoopSettings {
    fn default() -> Self {
        Self {
            restart_policy: RetryPolicy::default(),
            proactive_refresh: None,
            event_buffer: 128,
            counters_report_interval: Duration::from_secs(30),
        }
    }
}

/// Runs consumer sessions and hands every pulled message to a
/// [`MessageHandler`] until cancelled or a fatal error.
pub struct ConsumptionLoop {
    settings: Arc<ConsumerSettings>,
    loop_settings: ConsumptionLoopSettings,
    factory: Arc<dyn BrokerClientFactory>,
    refresher: CredentialRefresher,
    handler: Arc<dyn MessageHandler>,
    counters: Arc<ConsumeCounters>,
}

struct SessionReport {
    reached_consuming: bool,
    result: Result<(), BrokerError>,
}

impl ConsumptionLoop {
    pub fn new(
        settings: Arc<ConsumerSettings>,
        loop_settings: ConsumptionLoopSettings,
        factory: Arc<dyn BrokerClientFactory>,
        refresher: CredentialRefresher,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            settings,
            loop_settings,
            factory,
            refresher,
            handler,
            counters: Arc::new(ConsumeCounters::default()),
        }
    }

    pub fn counters(&self) -> MessagesCounters {
        self.counters.snapshot()
    }

    #[tracing::instrument(skip_all, fields(topic = %self.settings.topic))]
    pub async fn run(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<MessagesCounters, ConsumptionError> {
        let background_token = cancellation_token.child_token();

        let proactive_refresh = self
            .loop_settings
            .proactive_refresh
            .filter(|_| self.settings.security_protocol.uses_bearer_token())
            .map(|lead_time| {
                self.refresher
                    .schedule_proactive_refresh(lead_time, background_token.clone())
            });
        let reporter = self.spawn_counters_reporter(background_token.clone());

        let result = self.run_sessions(&cancellation_token).await;

        background_token.cancel();
        if let Some(task) = proactive_refresh {
            let _ = task.await;
        }
        let _ = reporter.await;

        let counters = self.counters.snapshot();
        match &result {
            Ok(()) => info!(?counters, "Consumption stopped"),
            Err(e) => error!(?counters, "Consumption failed: {e}"),
        }

        result.map(|_| counters)
    }

    async fn run_sessions(&self, cancellation_token: &CancellationToken) -> Result<(), ConsumptionError> {
        let restart_policy = &self.loop_settings.restart_policy;
        let max_attempts = restart_policy.max_attempts.max(1);
        let mut failed_sessions = 0;
        let mut failed_handshakes = 0;

        loop {
            let report = self.run_session(cancellation_token).await?;

            if report.reached_consuming {
                failed_sessions = 0;
                failed_handshakes = 0;
            }

            let error = match report.result {
                Ok(()) => return Ok(()),
                Err(_) if cancellation_token.is_cancelled() => return Ok(()),
                // Not counted against the restart budget: the next session
                // retries the handshake once the pause is over.
                Err(BrokerError::CredentialRefresh(e)) => {
                    increment(&self.counters.credential_refresh_failures_counter);
                    failed_handshakes += 1;

                    let delay = restart_policy.delay_after(failed_handshakes);
                    warn!(
                        attempt = failed_handshakes,
                        ?delay,
                        "No bearer token available, consumption paused: {e}"
                    );

                    if !pause(cancellation_token, delay).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(error) if !error.is_restartable() => {
                    return Err(ConsumptionError::Broker(error))
                }
                Err(error) => error,
            };

            failed_sessions += 1;

            if failed_sessions >= max_attempts {
                return Err(ConsumptionError::RestartsExhausted {
                    attempts: failed_sessions,
                    last_error: error,
                });
            }

            let delay = restart_policy.delay_after(failed_sessions);
            warn!(
                attempt = failed_sessions,
                max_attempts,
                ?delay,
                "Consumer stopped, recreating: {error}"
            );

            if !pause(cancellation_token, delay).await {
                return Ok(());
            }
        }
    }

    async fn run_session(
        &self,
        cancellation_token: &CancellationToken,
    ) -> Result<SessionReport, ConsumptionError> {
        let session_token = cancellation_token.child_token();
        let (events_tx, mut events_rx) = mpsc::channel(self.loop_settings.event_buffer.max(1));
        let (acks_tx, mut acks_rx) = mpsc::unbounded_channel();

        let mut consumer = BrokerConsumer::new(
            self.settings.clone(),
            self.factory.clone(),
            self.refresher.clone(),
            events_tx,
        );
        let state = consumer.watch_state();

        let worker_token = session_token.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let started = consumer.start();
            let reached_consuming = started.is_ok();
            let result = started.and_then(|_| consumer.consume(&worker_token, &mut acks_rx));
            consumer.close();

            SessionReport {
                reached_consuming,
                result,
            }
        });

        let mut handler_failure = None;
        loop {
            select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if let Err(e) = self.handle_event(event, &acks_tx).await {
                        handler_failure = Some(e);
                        session_token.cancel();
                        break;
                    }
                }
                _ = session_token.cancelled() => break,
            }
        }
        drop(events_rx);

        let report = worker
            .await
            .map_err(|e| ConsumptionError::Worker(e.to_string()))?;

        let final_state: ConsumerState = *state.borrow();
        debug!(state = %final_state, "Consumer session ended");

        match handler_failure {
            Some(failure) => Err(failure),
            None => Ok(report),
        }
    }

    async fn handle_event(
        &self,
        event: ConsumerEvent,
        acks: &mpsc::UnboundedSender<PartitionOffset>,
    ) -> Result<(), ConsumptionError> {
        match event {
            ConsumerEvent::Message(message) => {
                increment(&self.counters.received_messages_counter);
                let partition_offset = message.partition_offset;

                match self.handler.handle(&message).await {
                    Ok(()) => increment(&self.counters.processed_messages_counter),
                    Err(ProcessingError::Transient(e)) => {
                        increment(&self.counters.processing_failures_counter);
                        warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Message processing failed, skipping: {e:#}"
                        );
                    }
                    Err(ProcessingError::Fatal(source)) => {
                        increment(&self.counters.processing_failures_counter);
                        error!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Message processing failed fatally: {source:#}"
                        );
                        return Err(ConsumptionError::HandlerFatal {
                            partition_offset,
                            source,
                        });
                    }
                }

                let _ = acks.send(partition_offset);
            }
            ConsumerEvent::PullFailed(e) => {
                increment(&self.counters.pull_errors_counter);
                debug!("Pull failed: {e}");
            }
            ConsumerEvent::CredentialRefreshFailed(e) => {
                increment(&self.counters.credential_refresh_failures_counter);
                warn!("Consuming is stalled until a bearer token is available: {e}");
            }
        }

        Ok(())
    }

    fn spawn_counters_reporter(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let counters = self.counters.clone();
        let interval = self.loop_settings.counters_report_interval;

        let future = async move {
            let mut last_counters = MessagesCounters::default();
            loop {
                select! {
                    _ = sleep(interval) => {
                        let current = counters.snapshot();
                        if last_counters != current {
                            last_counters = current;
                            info!(counters = ?current, "Consumption progress");
                        }
                    }
                    _ = cancellation_token.cancelled() => break,
                }
            }
        }
        .instrument(info_span!("Updating counters").or_current());

        tokio::task::spawn(future)
    }
}

/// Sleeps for `delay`. Returns `false` when cancelled first.
async fn pause(cancellation_token: &CancellationToken, delay: Duration) -> bool {
    select! {
        _ = cancellation_token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
