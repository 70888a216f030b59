use crate::auth::CredentialRefresher;
use crate::consumer::{
    AuthCallback, BrokerClient, BrokerClientFactory, ConsumerSettings, ConsumerState,
    HandshakeContext, Message, PartitionOffset,
};
use crate::error::{BrokerError, CredentialRefreshFailed, PullError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What the pull thread reports to the consumption loop.
#[derive(Debug)]
pub enum ConsumerEvent {
    Message(Message),
    PullFailed(PullError),
    CredentialRefreshFailed(CredentialRefreshFailed),
}

/// Owns one broker client for one subscription.
///
/// All methods block and are meant to run on a dedicated thread: the broker
/// client calls the authentication callback from inside `poll`.
pub struct BrokerConsumer {
    settings: Arc<ConsumerSettings>,
    factory: Arc<dyn BrokerClientFactory>,
    refresher: CredentialRefresher,
    events: mpsc::Sender<ConsumerEvent>,
    client: Option<Box<dyn BrokerClient>>,
    state: watch::Sender<ConsumerState>,
}

impl BrokerConsumer {
    pub fn new(
        settings: Arc<ConsumerSettings>,
        factory: Arc<dyn BrokerClientFactory>,
        refresher: CredentialRefresher,
        events: mpsc::Sender<ConsumerEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Created);
        Self {
            settings,
            factory,
            refresher,
            events,
            client: None,
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Performs the initial handshake and subscribes. Ends in `Consuming` or
    /// `Faulted`.
    pub fn start(&mut self) -> Result<(), BrokerError> {
        self.expect_state("start", ConsumerState::Created)?;
        self.transition(ConsumerState::Subscribing);

        if let Err(e) = self.subscribe() {
            error!(topic = %self.settings.topic, "Consumer could not start: {e}");
            self.fault();
            return Err(e);
        }

        self.transition(ConsumerState::Consuming);
        info!(
            topic = %self.settings.topic,
            group_id = %self.settings.group_id,
            "Subscribed to topic"
        );

        Ok(())
    }

    fn subscribe(&mut self) -> Result<(), BrokerError> {
        if self.settings.security_protocol.uses_bearer_token() {
            let credential = self
                .refresher
                .refresh_blocking(self.settings.handshake_timeout)?;
            debug!(expires_at = %credential.expires_at(), "Initial bearer token ready");
        }

        let mut client = self
            .factory
            .create(&self.settings, self.auth_callback())?;
        let subscribed = client.subscribe(&self.settings.topic);
        self.client = Some(client);

        subscribed
    }

    /// Pulls until `cancellation_token` is cancelled or the event receiver is
    /// dropped. Offsets arriving on `acks` are stored between pulls.
    pub fn consume(
        &mut self,
        cancellation_token: &CancellationToken,
        acks: &mut mpsc::UnboundedReceiver<PartitionOffset>,
    ) -> Result<(), BrokerError> {
        self.expect_state("consume", ConsumerState::Consuming)?;
        let Some(client) = self.client.as_mut() else {
            return Err(BrokerError::InvalidState {
                operation: "consume",
                state: "consuming without a client",
            });
        };
        let topic = self.settings.topic.as_str();

        let result = loop {
            if cancellation_token.is_cancelled() {
                info!("Consuming was cancelled");
                break Ok(());
            }

            while let Ok(partition_offset) = acks.try_recv() {
                if let Err(e) = client.store_offset(topic, partition_offset) {
                    error!(
                        "Error while storing offset to consumer. Topic {}, metadata: {:?}. {}",
                        topic, partition_offset, e
                    );
                }
            }

            let event = match client.poll(self.settings.poll_interval) {
                None => continue,
                Some(Ok(message)) => {
                    trace!(
                        "New message. Topic: '{}', partition: {}, offset: {}",
                        topic,
                        message.partition(),
                        message.offset(),
                    );
                    ConsumerEvent::Message(message)
                }
                Some(Err(PullError::Fatal(reason))) => break Err(BrokerError::Fatal(reason)),
                Some(Err(error @ PullError::Authentication(_))) => {
                    warn!("{error}, next handshake fetches a new token");
                    self.refresher.invalidate();
                    ConsumerEvent::PullFailed(error)
                }
                Some(Err(error)) => {
                    warn!("Error while reading message from broker: {error}");
                    ConsumerEvent::PullFailed(error)
                }
            };

            if self.events.blocking_send(event).is_err() {
                debug!("Event receiver dropped, stopping pulls");
                break Ok(());
            }
        };

        if let Err(e) = &result {
            error!(topic = %self.settings.topic, "Consumer failed: {e}");
            self.fault();
        }

        result
    }

    /// Releases the subscription and the client. Safe to call in any state.
    pub fn close(&mut self) {
        if self.state().is_terminal() {
            self.release_client();
            return;
        }

        self.transition(ConsumerState::Closing);
        self.release_client();
        self.transition(ConsumerState::Closed);
    }

    fn auth_callback(&self) -> AuthCallback {
        let refresher = self.refresher.clone();
        let events = self.events.clone();
        let deadline = self.settings.handshake_timeout;

        Arc::new(move |context: &mut dyn HandshakeContext| {
            match refresher.refresh_blocking(deadline) {
                Ok(credential) => context.set_token(credential.value(), credential.expires_at()),
                Err(e) => {
                    error!("Bearer token handshake failed: {e}");
                    context.fail(&e.to_string());
                    let _ = events.try_send(ConsumerEvent::CredentialRefreshFailed(e));
                }
            }
        })
    }

    fn release_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.unsubscribe();
            drop(client);
            debug!("Broker client released");
        }
    }

    fn fault(&mut self) {
        self.release_client();
        self.transition(ConsumerState::Faulted);
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Consumer state changed");
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: ConsumerState,
    ) -> Result<(), BrokerError> {
        let state = self.state();
        if state != expected {
            return Err(BrokerError::InvalidState {
                operation,
                state: state.as_str(),
            });
        }
        Ok(())
    }
}

impl Drop for BrokerConsumer {
    fn drop(&mut self) {
        self.close();
    }
}
