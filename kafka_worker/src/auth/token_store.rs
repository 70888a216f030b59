use crate::auth::Credential;
use std::sync::Arc;
use tokio::sync::watch;

/// Holds the current credential. Writers replace it as a whole, so readers
/// either see nothing or the last committed credential.
#[derive(Clone)]
pub struct TokenStore {
    sender: Arc<watch::Sender<StoredCredential>>,
}

#[derive(Debug, Clone, Default)]
pub struct StoredCredential {
    pub credential: Option<Arc<Credential>>,
    pub version: u64,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StoredCredential::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        self.sender.send_modify(|stored| {
            stored.credential = Some(credential.clone());
            stored.version += 1;
        });
        credential
    }

    pub fn get(&self) -> Option<Arc<Credential>> {
        self.sender.borrow().credential.clone()
    }

    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    /// Drops the current credential so the next handshake has to fetch one.
    pub fn invalidate(&self) {
        self.sender.send_if_modified(|stored| {
            if stored.credential.is_none() {
                return false;
            }
            stored.credential = None;
            stored.version += 1;
            true
        });
    }

    /// Receiver notified on every change. The current value counts as seen.
    pub fn subscribe(&self) -> watch::Receiver<StoredCredential> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn credential(value: &str) -> Credential {
        let now = Utc::now();
        Credential::new(value.to_owned(), now, now + TimeDelta::minutes(1)).unwrap()
    }

    #[test]
    fn empty_until_set() {
        let store = TokenStore::new();

        assert!(store.get().is_none());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn set_replaces_and_bumps_version() {
        let store = TokenStore::new();

        store.set(credential("first"));
        store.set(credential("second"));

        assert_eq!(store.get().unwrap().value(), "second");
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn invalidate_clears_once() {
        let store = TokenStore::new();
        store.set(credential("first"));

        store.invalidate();
        store.invalidate();

        assert!(store.get().is_none());
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_new_credentials() {
        let store = TokenStore::new();
        let mut changes = store.subscribe();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.set(credential("from-task"));
        });

        changes.changed().await.unwrap();
        let value = changes
            .borrow()
            .credential
            .as_ref()
            .map(|c| c.value().to_owned());
        assert_eq!(value.as_deref(), Some("from-task"));
    }
}
