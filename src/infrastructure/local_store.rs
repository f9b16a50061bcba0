use crate::domain::models::Session;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::KeyValueStore;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_SESSIONS_KEY: &str = "prayatna.sessions.v1";
pub const DEFAULT_HIDDEN_SESSIONS_KEY: &str = "prayatna.hiddenSessions.v1";

/// Session collection and locally remembered hidden template ids, each kept
/// as one serialized JSON array under its own key.
#[derive(Debug)]
pub struct LocalSessionStore<K>
where
    K: KeyValueStore,
{
    medium: Arc<K>,
    sessions_key: String,
    hidden_key: String,
}

impl<K> LocalSessionStore<K>
where
    K: KeyValueStore,
{
    pub fn new(medium: Arc<K>) -> Self {
        Self::with_keys(medium, DEFAULT_SESSIONS_KEY, DEFAULT_HIDDEN_SESSIONS_KEY)
    }

    pub fn with_keys(
        medium: Arc<K>,
        sessions_key: impl Into<String>,
        hidden_key: impl Into<String>,
    ) -> Self {
        Self {
            medium,
            sessions_key: sessions_key.into(),
            hidden_key: hidden_key.into(),
        }
    }

    /// Never fails: a missing, unreadable or malformed payload is an empty list.
    pub fn load_local(&self) -> Vec<Session> {
        self.read_array(&self.sessions_key).unwrap_or_default()
    }

    pub fn save_local(&self, sessions: &[Session]) -> Result<(), InfraError> {
        let payload = serde_json::to_string(sessions)?;
        self.medium.set(&self.sessions_key, &payload)
    }

    pub fn load_hidden_ids(&self) -> BTreeSet<i64> {
        self.read_array::<i64>(&self.hidden_key)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn save_hidden_ids(&self, ids: &BTreeSet<i64>) -> Result<(), InfraError> {
        let payload = serde_json::to_string(&ids.iter().collect::<Vec<_>>())?;
        self.medium.set(&self.hidden_key, &payload)
    }

    pub fn remember_hidden(&self, id: i64) -> Result<(), InfraError> {
        let mut ids = self.load_hidden_ids();
        if ids.insert(id) {
            self.save_hidden_ids(&ids)?;
        }
        Ok(())
    }

    pub fn forget_hidden(&self, id: i64) -> Result<(), InfraError> {
        let mut ids = self.load_hidden_ids();
        if ids.remove(&id) {
            self.save_hidden_ids(&ids)?;
        }
        Ok(())
    }

    fn read_array<T>(&self, key: &str) -> Option<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let raw = match self.medium.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(key, %error, "failed to read local storage");
                return None;
            }
        };
        match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(values) => Some(values),
            Err(error) => {
                tracing::warn!(key, %error, "failed to parse local storage payload");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Task;
    use crate::infrastructure::storage::InMemoryKeyValueStore;

    fn store() -> (Arc<InMemoryKeyValueStore>, LocalSessionStore<InMemoryKeyValueStore>) {
        let medium = Arc::new(InMemoryKeyValueStore::default());
        let store = LocalSessionStore::new(Arc::clone(&medium));
        (medium, store)
    }

    #[test]
    fn load_local_is_empty_when_absent() {
        let (_, store) = store();
        assert!(store.load_local().is_empty());
        assert!(store.load_hidden_ids().is_empty());
    }

    #[test]
    fn malformed_payload_is_treated_as_empty() {
        let (medium, store) = store();
        medium
            .set(DEFAULT_SESSIONS_KEY, "{not json")
            .expect("seed malformed sessions");
        medium
            .set(DEFAULT_HIDDEN_SESSIONS_KEY, "\"oops\"")
            .expect("seed malformed hidden ids");
        assert!(store.load_local().is_empty());
        assert!(store.load_hidden_ids().is_empty());
    }

    #[test]
    fn save_local_overwrites_whole_collection() {
        let (_, store) = store();
        let first = Session::new("First", None, vec![Task::simple("Read", 60)]);
        let second = Session::new("Second", Some(120), Vec::new());
        store
            .save_local(&[first.clone(), second.clone()])
            .expect("save two");
        assert_eq!(store.load_local(), vec![first.clone(), second]);

        store.save_local(&[first.clone()]).expect("save one");
        assert_eq!(store.load_local(), vec![first]);
    }

    #[test]
    fn hidden_ids_are_a_set() {
        let (medium, store) = store();
        store.remember_hidden(7).expect("remember 7");
        store.remember_hidden(3).expect("remember 3");
        store.remember_hidden(7).expect("remember 7 again");
        assert_eq!(
            medium.get(DEFAULT_HIDDEN_SESSIONS_KEY).expect("read raw"),
            Some("[3,7]".to_string())
        );

        store.forget_hidden(3).expect("forget 3");
        assert_eq!(store.load_hidden_ids(), BTreeSet::from([7]));
    }

    #[test]
    fn custom_keys_are_isolated() {
        let medium = Arc::new(InMemoryKeyValueStore::default());
        let guest = LocalSessionStore::with_keys(Arc::clone(&medium), "guest.sessions", "guest.hidden");
        let other = LocalSessionStore::new(Arc::clone(&medium));
        guest
            .save_local(&[Session::new("Guest", None, Vec::new())])
            .expect("save guest");
        assert_eq!(guest.load_local().len(), 1);
        assert!(other.load_local().is_empty());
    }
}
