#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use kafka_worker::auth::{
    AuthEndpointConfig, Credential, CredentialProvider, CredentialRefresher, LeadTime, TokenStore,
};
use kafka_worker::consumer::{
    AuthCallback, BrokerClient, BrokerClientFactory, ConsumerSettings, HandshakeOutcome, Message,
    PartitionOffset,
};
use kafka_worker::error::{AuthRequestError, BrokerError, PullError};
use kafka_worker::retry::RetryPolicy;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

pub fn auth_config(auth_url: &str) -> AuthEndpointConfig {
    AuthEndpointConfig {
        auth_url: auth_url.to_owned(),
        requested_lifetime_minutes: 60,
        app_name: "orders-worker".to_owned(),
        request_timeout: Duration::from_secs(5),
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: 0.0,
    }
}

pub fn refresher(provider: Arc<dyn CredentialProvider>, retry_policy: RetryPolicy) -> CredentialRefresher {
    CredentialRefresher::new(
        provider,
        TokenStore::new(),
        auth_config("http://auth.local/token"),
        retry_policy,
        LeadTime::default(),
        Handle::current(),
    )
}

pub fn consumer_settings() -> ConsumerSettings {
    let mut settings = ConsumerSettings::new(vec!["localhost:9092".to_owned()], "orders", "orders-workers");
    settings.poll_interval = Duration::from_millis(10);
    settings.handshake_timeout = Duration::from_secs(2);
    settings
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Answers from a script, then keeps answering with `fallback`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, AuthRequestError>>>,
    fallback: Result<String, AuthRequestError>,
    lifetime: TimeDelta,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(
        script: Vec<Result<String, AuthRequestError>>,
        fallback: Result<String, AuthRequestError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            lifetime: TimeDelta::minutes(60),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(value: &str) -> Self {
        Self::new(vec![], Ok(value.to_owned()))
    }

    pub fn failing() -> Self {
        Self::new(vec![], Err(AuthRequestError::Status { status: 500 }))
    }

    pub fn with_lifetime(mut self, lifetime: TimeDelta) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for ScriptedProvider {
    async fn fetch(&self, _auth: &AuthEndpointConfig) -> Result<Credential, AuthRequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let value = next.unwrap_or_else(|| self.fallback.clone())?;
        let issued_at = Utc::now();
        Ok(Credential::new(value, issued_at, issued_at + self.lifetime).unwrap())
    }
}

/// Counts calls made through another provider.
pub struct CountingProvider<P> {
    inner: P,
    calls: AtomicU32,
}

impl<P> CountingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: CredentialProvider> CredentialProvider for CountingProvider<P> {
    async fn fetch(&self, auth: &AuthEndpointConfig) -> Result<Credential, AuthRequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(auth).await
    }
}

pub enum PollStep {
    Message(i64),
    Error(PullError),
    /// Runs the authentication callback again, as the client does when its
    /// token is due or was rejected.
    Handshake,
}

pub fn message(offset: i64) -> Message {
    Message {
        partition_offset: PartitionOffset::new(0, offset),
        timestamp: None,
        key: Some(Bytes::from_static(b"order")),
        value: Some(Bytes::from(format!("payload-{offset}"))),
    }
}

#[derive(Default)]
struct FakeBrokerState {
    script: Mutex<VecDeque<PollStep>>,
    create_calls: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_create: AtomicBool,
    fail_subscribe: AtomicBool,
    stored_offsets: Mutex<Vec<PartitionOffset>>,
    handshakes: Mutex<Vec<HandshakeOutcome>>,
}

/// In-memory broker. Each client runs the authentication callback on its
/// first poll, the way the real client does during the SASL handshake.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<FakeBrokerState>,
}

impl FakeBroker {
    pub fn with_script(steps: Vec<PollStep>) -> Self {
        let broker = Self::default();
        *broker.state.script.lock().unwrap() = steps.into();
        broker
    }

    pub fn fail_create(&self) {
        self.state.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self) {
        self.state.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn stored_offsets(&self) -> Vec<PartitionOffset> {
        self.state.stored_offsets.lock().unwrap().clone()
    }

    pub fn handshakes(&self) -> Vec<HandshakeOutcome> {
        self.state.handshakes.lock().unwrap().clone()
    }
}

impl BrokerClientFactory for FakeBroker {
    fn create(
        &self,
        _settings: &ConsumerSettings,
        auth_callback: AuthCallback,
    ) -> Result<Box<dyn BrokerClient>, BrokerError> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(BrokerError::ClientCreation("invalid configuration".to_owned()));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            state: self.state.clone(),
            auth_callback,
            handshake_done: false,
        }))
    }
}

struct FakeClient {
    state: Arc<FakeBrokerState>,
    auth_callback: AuthCallback,
    handshake_done: bool,
}

impl FakeClient {
    fn handshake(&self) {
        let mut outcome = HandshakeOutcome::default();
        (self.auth_callback)(&mut outcome);
        self.state.handshakes.lock().unwrap().push(outcome);
    }
}

impl BrokerClient for FakeClient {
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscription {
                topic: topic.to_owned(),
                reason: "unknown topic".to_owned(),
            });
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<Result<Message, PullError>> {
        if !self.handshake_done {
            self.handshake_done = true;
            self.handshake();
        }

        let step = self.state.script.lock().unwrap().pop_front();
        match step {
            Some(PollStep::Message(offset)) => Some(Ok(message(offset))),
            Some(PollStep::Error(error)) => Some(Err(error)),
            Some(PollStep::Handshake) => {
                self.handshake();
                None
            }
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                None
            }
        }
    }

    fn store_offset(&mut self, _topic: &str, partition_offset: PartitionOffset) -> Result<(), PullError> {
        self.state.stored_offsets.lock().unwrap().push(partition_offset);
        Ok(())
    }

    fn unsubscribe(&mut self) {}
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runs blocking consumer code off the runtime workers.
pub async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(f).await.unwrap()
}

pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future).await.expect("timed out")
}
