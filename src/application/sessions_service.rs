use crate::application::auth::AuthProvider;
use crate::domain::models::Session;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalSessionStore;
use crate::infrastructure::session_dto::{from_dto, to_dto};
use crate::infrastructure::sessions_api_client::SessionsApi;
use crate::infrastructure::storage::KeyValueStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Owns the published session list and decides where each mutation goes:
/// the remote API for synced sessions, the local store for local-only ones.
///
/// Created once per app and never torn down. Mutations run one at a time.
pub struct SessionsService<A, P, K>
where
    A: SessionsApi,
    P: AuthProvider,
    K: KeyValueStore,
{
    api: Arc<A>,
    auth: Arc<P>,
    store: LocalSessionStore<K>,
    published: watch::Sender<Vec<Session>>,
    mutation: Mutex<()>,
}

impl<A, P, K> SessionsService<A, P, K>
where
    A: SessionsApi,
    P: AuthProvider,
    K: KeyValueStore,
{
    pub fn new(api: Arc<A>, auth: Arc<P>, store: LocalSessionStore<K>) -> Self {
        let hidden = store.load_hidden_ids();
        let initial = without_hidden(store.load_local(), &hidden);
        let (published, _) = watch::channel(initial);
        Self {
            api,
            auth,
            store,
            published,
            mutation: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Session>> {
        self.published.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.published.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn find_index_by_id(&self, id: i64) -> Option<usize> {
        self.published
            .borrow()
            .iter()
            .position(|session| session.id == Some(id))
    }

    /// Maps a position in the published list to the local-store position
    /// `save` expects for guests. Synced entries have none.
    pub fn local_index_of(&self, published_index: usize) -> Option<usize> {
        let target = self.published.borrow().get(published_index).cloned()?;
        if target.id.is_some() {
            return None;
        }
        self.store
            .load_local()
            .iter()
            .position(|session| session.same_local_identity(&target))
    }

    /// Rebuilds the published list. Network failures fall back to local data
    /// and are only logged.
    pub async fn refresh(&self) -> Vec<Session> {
        let _guard = self.mutation.lock().await;

        let local = self.store.load_local();
        let hidden = self.store.load_hidden_ids();
        let local_only = local
            .iter()
            .filter(|session| session.is_local_only())
            .cloned()
            .collect::<Vec<_>>();

        let view = match self.auth.access_token() {
            None => match self.api.list_public_sessions().await {
                Ok(dtos) => {
                    let public = dtos.into_iter().map(from_dto).collect::<Vec<_>>();
                    tracing::debug!(public = public.len(), local = local_only.len(), "refreshed public sessions");
                    concat(without_hidden(public, &hidden), local_only)
                }
                Err(error) => {
                    tracing::warn!(%error, "public session fetch failed; showing local sessions only");
                    local_only
                }
            },
            Some(token) => match self.api.list_sessions(&token).await {
                Ok(dtos) => {
                    let remote = dtos.into_iter().map(from_dto).collect::<Vec<_>>();
                    self.retry_hidden_toggles(&token, &remote, &hidden).await;
                    if local.len() != local_only.len() {
                        if let Err(error) = self.store.save_local(&local_only) {
                            tracing::warn!(%error, "failed to prune synced sessions from local store");
                        }
                    }
                    tracing::debug!(remote = remote.len(), local = local_only.len(), "refreshed sessions");
                    concat(without_hidden(remote, &hidden), local_only)
                }
                Err(error) => {
                    tracing::warn!(%error, "session fetch failed; showing last local sessions");
                    without_hidden(local, &hidden)
                }
            },
        };

        self.publish(view)
    }

    /// Upsert. Signed in, the API is the only destination and failures
    /// propagate untouched; as a guest, the local store is.
    ///
    /// `index` is a position in the local store, not in the published list;
    /// see [`Self::local_index_of`].
    pub async fn save(
        &self,
        session: Session,
        index: Option<usize>,
        original: Option<&Session>,
    ) -> Result<Session, InfraError> {
        session.validate().map_err(InfraError::InvalidSession)?;
        let _guard = self.mutation.lock().await;
        self.save_locked(session, index, original).await
    }

    /// Saves a detached copy as a new session.
    pub async fn duplicate(&self, session: &Session) -> Result<Session, InfraError> {
        self.save(session.duplicate(), None, None).await
    }

    /// Returns `Ok(false)` when `index` is outside the published list.
    pub async fn delete_session(&self, index: usize) -> Result<bool, InfraError> {
        let _guard = self.mutation.lock().await;

        let Some(target) = self.published.borrow().get(index).cloned() else {
            return Ok(false);
        };
        let token = self.auth.access_token();

        match (token, target.id) {
            (None, Some(_)) => Err(InfraError::SignInRequired),
            (_, None) => {
                let mut local = self.store.load_local();
                if let Some(position) = local
                    .iter()
                    .position(|session| session.same_local_identity(&target))
                {
                    local.remove(position);
                    self.store.save_local(&local)?;
                }
                self.remove_published(index);
                tracing::info!(name = %target.name, "deleted local session");
                Ok(true)
            }
            (Some(token), Some(id)) if target.is_system_generated => {
                match self.api.toggle_visibility(&token, id).await {
                    Ok(()) => tracing::info!(id, "hid system session"),
                    Err(error) => {
                        tracing::warn!(id, %error, "visibility toggle failed; hiding locally");
                        if let Err(error) = self.store.remember_hidden(id) {
                            tracing::warn!(id, %error, "failed to remember hidden session");
                        }
                    }
                }
                self.remove_published(index);
                Ok(true)
            }
            (Some(token), Some(id)) => {
                self.api.delete_session(&token, id).await?;
                self.remove_published(index);
                tracing::info!(id, "deleted synced session");
                Ok(true)
            }
        }
    }

    /// Sign-out cleanup: only local-only sessions survive, in the store and
    /// in the published list.
    pub async fn clear_remote_sessions(&self) -> Result<Vec<Session>, InfraError> {
        let _guard = self.mutation.lock().await;
        let local_only = self
            .store
            .load_local()
            .into_iter()
            .filter(Session::is_local_only)
            .collect::<Vec<_>>();
        self.store.save_local(&local_only)?;
        Ok(self.publish(local_only))
    }

    pub fn export_json(&self, sessions: &[Session]) -> Result<String, InfraError> {
        Ok(serde_json::to_string_pretty(sessions)?)
    }

    /// Every imported session is saved as new, whatever ids it carried.
    pub async fn import_json(&self, raw: &str) -> Result<Vec<Session>, InfraError> {
        let sessions: Vec<Session> = serde_json::from_str(raw)?;
        for session in &sessions {
            session.validate().map_err(InfraError::InvalidSession)?;
        }

        let _guard = self.mutation.lock().await;
        let mut saved = Vec::with_capacity(sessions.len());
        for session in sessions {
            saved.push(self.save_locked(detach(session), None, None).await?);
        }
        tracing::info!(count = saved.len(), "imported sessions");
        Ok(saved)
    }

    async fn save_locked(
        &self,
        mut session: Session,
        index: Option<usize>,
        original: Option<&Session>,
    ) -> Result<Session, InfraError> {
        let Some(token) = self.auth.access_token() else {
            if session.id.is_some() {
                return Err(InfraError::SignInRequired);
            }
            return self.save_local(session, index, original);
        };

        if session.is_hideable_template() {
            return Err(InfraError::InvalidSession(
                "system sessions cannot be edited; duplicate it instead".to_string(),
            ));
        }

        let dto = to_dto(&session);
        match session.id {
            Some(id) => {
                self.api.update_session(&token, id, &dto).await?;
                tracing::info!(id, "updated session");
            }
            None => {
                let created = self.api.create_session(&token, &dto).await?;
                session.id = created.id;
                tracing::info!(id = ?session.id, "created session");
                if let Some(key) = session.local_key.take() {
                    self.forget_local_key(&key)?;
                }
            }
        }
        Ok(session)
    }

    fn save_local(
        &self,
        mut session: Session,
        index: Option<usize>,
        original: Option<&Session>,
    ) -> Result<Session, InfraError> {
        let mut local = self.store.load_local();

        let by_key = session.local_key.as_deref().and_then(|key| {
            local
                .iter()
                .position(|entry| entry.local_key.as_deref() == Some(key))
        });
        let target = by_key
            .or_else(|| index.filter(|position| *position < local.len()))
            .or_else(|| {
                original.and_then(|original| {
                    local
                        .iter()
                        .position(|entry| entry.same_local_identity(original))
                })
            });

        session.ensure_local_key();
        match target {
            Some(position) => local[position] = session.clone(),
            None => local.push(session.clone()),
        }
        self.store.save_local(&local)?;
        self.republish_with_local(&local);
        tracing::info!(name = %session.name, replaced = target.is_some(), "saved local session");
        Ok(session)
    }

    fn forget_local_key(&self, key: &str) -> Result<(), InfraError> {
        let mut local = self.store.load_local();
        let before = local.len();
        local.retain(|entry| entry.local_key.as_deref() != Some(key));
        if local.len() != before {
            self.store.save_local(&local)?;
        }
        Ok(())
    }

    async fn retry_hidden_toggles(&self, token: &str, remote: &[Session], hidden: &BTreeSet<i64>) {
        for id in remote.iter().filter_map(|session| session.id) {
            if !hidden.contains(&id) {
                continue;
            }
            match self.api.toggle_visibility(token, id).await {
                Ok(()) => {
                    if let Err(error) = self.store.forget_hidden(id) {
                        tracing::warn!(id, %error, "failed to forget hidden session");
                    }
                    tracing::info!(id, "synced locally hidden session");
                }
                Err(error) => tracing::warn!(id, %error, "visibility toggle retry failed"),
            }
        }
    }

    fn republish_with_local(&self, local: &[Session]) {
        let synced = self
            .published
            .borrow()
            .iter()
            .filter(|session| !session.is_local_only())
            .cloned()
            .collect::<Vec<_>>();
        let local_only = local
            .iter()
            .filter(|session| session.is_local_only())
            .cloned()
            .collect();
        self.publish(concat(synced, local_only));
    }

    fn remove_published(&self, index: usize) {
        self.published.send_modify(|sessions| {
            if index < sessions.len() {
                sessions.remove(index);
            }
        });
    }

    fn publish(&self, sessions: Vec<Session>) -> Vec<Session> {
        self.published.send_replace(sessions.clone());
        sessions
    }
}

fn concat(mut head: Vec<Session>, tail: Vec<Session>) -> Vec<Session> {
    head.extend(tail);
    head
}

fn without_hidden(sessions: Vec<Session>, hidden: &BTreeSet<i64>) -> Vec<Session> {
    if hidden.is_empty() {
        return sessions;
    }
    sessions
        .into_iter()
        .filter(|session| session.id.is_none_or(|id| !hidden.contains(&id)))
        .collect()
}

fn detach(mut session: Session) -> Session {
    session.id = None;
    session.is_system_generated = false;
    session.local_key = Some(Uuid::new_v4().to_string());
    for task in &mut session.tasks {
        task.id = None;
        for subtask in &mut task.subtasks {
            subtask.id = None;
        }
    }
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Subtask, Task};
    use crate::infrastructure::local_store::DEFAULT_SESSIONS_KEY;
    use crate::infrastructure::session_dto::SessionDto;
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone)]
    enum FakeFailure {
        Network,
        Api(u16, String),
    }

    impl FakeFailure {
        fn into_error(self) -> InfraError {
            match self {
                Self::Network => InfraError::Network("connection refused".to_string()),
                Self::Api(status, message) => InfraError::Api { status, message },
            }
        }
    }

    #[derive(Debug)]
    struct FakeSessionsApi {
        remote: StdMutex<Vec<SessionDto>>,
        public: StdMutex<Vec<SessionDto>>,
        failures: StdMutex<HashMap<&'static str, FakeFailure>>,
        calls: StdMutex<Vec<String>>,
        next_id: AtomicI64,
    }

    impl Default for FakeSessionsApi {
        fn default() -> Self {
            Self {
                remote: StdMutex::new(Vec::new()),
                public: StdMutex::new(Vec::new()),
                failures: StdMutex::new(HashMap::new()),
                calls: StdMutex::new(Vec::new()),
                next_id: AtomicI64::new(100),
            }
        }
    }

    impl FakeSessionsApi {
        fn with_remote(sessions: Vec<Session>) -> Self {
            let api = Self::default();
            *api.remote.lock().expect("remote lock") = sessions.iter().map(to_dto).collect();
            api
        }

        fn set_public(&self, sessions: Vec<Session>) {
            *self.public.lock().expect("public lock") = sessions.iter().map(to_dto).collect();
        }

        fn fail(&self, method: &'static str, failure: FakeFailure) {
            self.failures.lock().expect("failure lock").insert(method, failure);
        }

        fn heal(&self, method: &'static str) {
            self.failures.lock().expect("failure lock").remove(method);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn record(&self, method: &'static str, call: String) -> Result<(), InfraError> {
            self.calls.lock().expect("calls lock").push(call);
            match self.failures.lock().expect("failure lock").get(method).cloned() {
                Some(failure) => Err(failure.into_error()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl SessionsApi for FakeSessionsApi {
        async fn list_sessions(&self, _access_token: &str) -> Result<Vec<SessionDto>, InfraError> {
            self.record("list", "list".to_string())?;
            Ok(self.remote.lock().expect("remote lock").clone())
        }

        async fn list_public_sessions(&self) -> Result<Vec<SessionDto>, InfraError> {
            self.record("public", "public".to_string())?;
            Ok(self.public.lock().expect("public lock").clone())
        }

        async fn create_session(
            &self,
            _access_token: &str,
            session: &SessionDto,
        ) -> Result<SessionDto, InfraError> {
            self.record("create", format!("create:{}", session.title))?;
            let mut created = session.clone();
            created.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.remote.lock().expect("remote lock").push(created.clone());
            Ok(created)
        }

        async fn update_session(
            &self,
            _access_token: &str,
            id: i64,
            session: &SessionDto,
        ) -> Result<(), InfraError> {
            self.record("update", format!("update:{id}"))?;
            let mut remote = self.remote.lock().expect("remote lock");
            if let Some(existing) = remote.iter_mut().find(|entry| entry.id == Some(id)) {
                *existing = session.clone();
            }
            Ok(())
        }

        async fn delete_session(&self, _access_token: &str, id: i64) -> Result<(), InfraError> {
            self.record("delete", format!("delete:{id}"))?;
            self.remote
                .lock()
                .expect("remote lock")
                .retain(|entry| entry.id != Some(id));
            Ok(())
        }

        async fn toggle_visibility(&self, _access_token: &str, id: i64) -> Result<(), InfraError> {
            self.record("toggle", format!("toggle:{id}"))?;
            self.remote
                .lock()
                .expect("remote lock")
                .retain(|entry| entry.id != Some(id));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeAuth {
        token: StdMutex<Option<String>>,
    }

    impl FakeAuth {
        fn signed_in() -> Self {
            Self {
                token: StdMutex::new(Some("token-abc".to_string())),
            }
        }

        fn sign_out(&self) {
            *self.token.lock().expect("token lock") = None;
        }
    }

    impl AuthProvider for FakeAuth {
        fn access_token(&self) -> Option<String> {
            self.token.lock().expect("token lock").clone()
        }
    }

    type TestService = SessionsService<FakeSessionsApi, FakeAuth, InMemoryKeyValueStore>;

    struct Harness {
        api: Arc<FakeSessionsApi>,
        auth: Arc<FakeAuth>,
        medium: Arc<InMemoryKeyValueStore>,
        service: TestService,
    }

    impl Harness {
        fn new(api: FakeSessionsApi, auth: FakeAuth, local: &[Session]) -> Self {
            let medium = Arc::new(InMemoryKeyValueStore::default());
            let seed = LocalSessionStore::new(Arc::clone(&medium));
            seed.save_local(local).expect("seed local sessions");

            let api = Arc::new(api);
            let auth = Arc::new(auth);
            let service = SessionsService::new(
                Arc::clone(&api),
                Arc::clone(&auth),
                LocalSessionStore::new(Arc::clone(&medium)),
            );
            Self {
                api,
                auth,
                medium,
                service,
            }
        }

        fn local(&self) -> Vec<Session> {
            LocalSessionStore::new(Arc::clone(&self.medium)).load_local()
        }

        fn hidden(&self) -> BTreeSet<i64> {
            LocalSessionStore::new(Arc::clone(&self.medium)).load_hidden_ids()
        }

        fn names(&self) -> Vec<String> {
            self.service
                .snapshot()
                .into_iter()
                .map(|session| session.name)
                .collect()
        }
    }

    fn local_session(name: &str) -> Session {
        Session::new(name, None, vec![Task::simple("Read", 600)])
    }

    fn synced_session(id: i64, name: &str) -> Session {
        let mut session = Session::new(name, Some(1800), vec![Task::simple("Drill", 1800)]);
        session.id = Some(id);
        session
    }

    fn system_session(id: i64, name: &str) -> Session {
        let mut session = synced_session(id, name);
        session.is_system_generated = true;
        session
    }

    #[tokio::test]
    async fn unauthenticated_refresh_publishes_public_then_local_only() {
        let api = FakeSessionsApi::default();
        api.set_public(vec![system_session(1, "Deep focus")]);
        let harness = Harness::new(
            api,
            FakeAuth::default(),
            &[local_session("Guest plan"), synced_session(5, "Stale remote copy")],
        );

        let view = harness.service.refresh().await;
        assert_eq!(
            view.iter().map(|session| session.name.as_str()).collect::<Vec<_>>(),
            vec!["Deep focus", "Guest plan"]
        );
        assert!(view[0].is_system_generated);
        assert_eq!(harness.names(), vec!["Deep focus", "Guest plan"]);
        assert_eq!(harness.local().len(), 2);
    }

    #[tokio::test]
    async fn unauthenticated_refresh_failure_falls_back_to_local_only() {
        let api = FakeSessionsApi::default();
        api.fail("public", FakeFailure::Network);
        let harness = Harness::new(api, FakeAuth::default(), &[local_session("Guest plan")]);

        let view = harness.service.refresh().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].name, "Guest plan");
    }

    #[tokio::test]
    async fn authenticated_refresh_merges_and_prunes_remote_copies_from_local_store() {
        let api = FakeSessionsApi::with_remote(vec![synced_session(9, "Organic chemistry")]);
        let harness = Harness::new(
            api,
            FakeAuth::signed_in(),
            &[synced_session(9, "Organic chemistry"), local_session("Before login")],
        );

        let view = harness.service.refresh().await;
        assert_eq!(
            view.iter().map(|session| session.name.as_str()).collect::<Vec<_>>(),
            vec!["Organic chemistry", "Before login"]
        );
        let local = harness.local();
        assert_eq!(local.len(), 1);
        assert!(local[0].is_local_only());
    }

    #[tokio::test]
    async fn authenticated_refresh_failure_keeps_local_store() {
        let api = FakeSessionsApi::default();
        api.fail("list", FakeFailure::Api(503, "Service unavailable".to_string()));
        let seeded = vec![synced_session(9, "Cached"), local_session("Offline")];
        let harness = Harness::new(api, FakeAuth::signed_in(), &seeded);

        let view = harness.service.refresh().await;
        assert_eq!(view, seeded);
        assert_eq!(harness.local(), seeded);
    }

    #[tokio::test]
    async fn refresh_twice_yields_same_view() {
        let api = FakeSessionsApi::with_remote(vec![
            synced_session(1, "Algebra"),
            system_session(2, "Template"),
        ]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[local_session("Notes")]);

        let first = harness.service.refresh().await;
        let second = harness.service.refresh().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn deleting_local_session_as_guest_skips_network() {
        let harness = Harness::new(
            FakeSessionsApi::default(),
            FakeAuth::default(),
            &[local_session("Keep"), local_session("Drop me")],
        );

        assert!(harness.service.delete_session(1).await.expect("delete"));
        assert_eq!(harness.names(), vec!["Keep"]);
        assert_eq!(harness.local().len(), 1);
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn deleting_synced_session_as_guest_requires_sign_in() {
        let harness = Harness::new(
            FakeSessionsApi::default(),
            FakeAuth::default(),
            &[synced_session(42, "Synced")],
        );
        let before_local = harness.local();
        let before_view = harness.service.snapshot();

        let error = harness.service.delete_session(0).await.expect_err("must reject");
        assert!(matches!(error, InfraError::SignInRequired));
        assert_eq!(
            error.to_string(),
            "Please sign in to delete or edit synced sessions."
        );
        assert_eq!(harness.local(), before_local);
        assert_eq!(harness.service.snapshot(), before_view);
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn deleting_system_session_hides_it_remotely() {
        let api = FakeSessionsApi::with_remote(vec![system_session(7, "Template")]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        harness.service.refresh().await;

        assert!(harness.service.delete_session(0).await.expect("hide"));
        assert!(harness.service.snapshot().is_empty());
        assert_eq!(harness.api.calls(), vec!["list", "toggle:7"]);
        assert!(harness.local().is_empty());
        assert!(harness.hidden().is_empty());
    }

    #[tokio::test]
    async fn failed_toggle_hides_locally_and_retries_on_refresh() {
        let api = FakeSessionsApi::with_remote(vec![
            system_session(7, "Template"),
            synced_session(8, "Mine"),
        ]);
        api.fail("toggle", FakeFailure::Network);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        harness.service.refresh().await;

        assert!(harness.service.delete_session(0).await.expect("hide"));
        assert_eq!(harness.names(), vec!["Mine"]);
        assert_eq!(harness.hidden(), BTreeSet::from([7]));

        // still failing: stays hidden locally
        let view = harness.service.refresh().await;
        assert_eq!(view.len(), 1);
        assert_eq!(harness.hidden(), BTreeSet::from([7]));

        harness.api.heal("toggle");
        let view = harness.service.refresh().await;
        assert_eq!(view.len(), 1);
        assert!(harness.hidden().is_empty());
        assert_eq!(
            harness.api.calls().iter().filter(|call| *call == "toggle:7").count(),
            3
        );
    }

    #[tokio::test]
    async fn failed_remote_delete_propagates_and_keeps_view() {
        let api = FakeSessionsApi::with_remote(vec![synced_session(9, "Physics")]);
        api.fail("delete", FakeFailure::Network);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        harness.service.refresh().await;
        let before = harness.service.snapshot();

        let error = harness.service.delete_session(0).await.expect_err("must fail");
        assert!(matches!(error, InfraError::Network(_)));
        assert_eq!(harness.service.snapshot(), before);
    }

    #[tokio::test]
    async fn remote_delete_removes_from_view() {
        let api = FakeSessionsApi::with_remote(vec![
            synced_session(9, "Physics"),
            synced_session(10, "History"),
        ]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        harness.service.refresh().await;

        assert!(harness.service.delete_session(0).await.expect("delete"));
        assert_eq!(harness.names(), vec!["History"]);
        assert!(harness.api.calls().contains(&"delete:9".to_string()));
    }

    #[tokio::test]
    async fn authenticated_delete_of_local_session_cleans_store() {
        let api = FakeSessionsApi::with_remote(vec![synced_session(9, "Physics")]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[local_session("Pre-login")]);
        harness.service.refresh().await;

        assert!(harness.service.delete_session(1).await.expect("delete"));
        assert_eq!(harness.names(), vec!["Physics"]);
        assert!(harness.local().is_empty());
        assert!(!harness.api.calls().iter().any(|call| call.starts_with("delete")));
    }

    #[tokio::test]
    async fn delete_out_of_range_is_a_noop() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        assert!(!harness.service.delete_session(3).await.expect("noop"));
    }

    #[tokio::test]
    async fn structurally_identical_local_sessions_delete_one_at_a_time() {
        let twin = local_session("Twin");
        let harness = Harness::new(
            FakeSessionsApi::default(),
            FakeAuth::default(),
            &[twin.clone(), twin],
        );

        assert!(harness.service.delete_session(0).await.expect("delete first"));
        assert_eq!(harness.local().len(), 1);
        assert_eq!(harness.service.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn authenticated_create_assigns_server_id() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::signed_in(), &[]);
        let saved = harness
            .service
            .save(local_session("Linear algebra"), None, None)
            .await
            .expect("create");

        assert_eq!(saved.id, Some(100));
        assert_eq!(harness.api.calls(), vec!["create:Linear algebra"]);
        assert!(harness.local().is_empty());
        assert!(harness.service.snapshot().is_empty());

        let view = harness.service.refresh().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, Some(100));
    }

    #[tokio::test]
    async fn authenticated_create_moves_local_session_out_of_store() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let guest = harness
            .service
            .save(local_session("Draft"), None, None)
            .await
            .expect("guest save");
        assert_eq!(harness.local().len(), 1);

        *harness.auth.token.lock().expect("token lock") = Some("token".to_string());
        let synced = harness.service.save(guest, None, None).await.expect("sync");
        assert!(synced.id.is_some());
        assert!(synced.local_key.is_none());
        assert!(harness.local().is_empty());
    }

    #[tokio::test]
    async fn authenticated_update_uses_put() {
        let api = FakeSessionsApi::with_remote(vec![synced_session(9, "Physics")]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        let mut edited = synced_session(9, "Physics II");
        edited.tasks.push(Task::with_subtasks(
            "Optics",
            vec![Subtask::new("Lenses", 300)],
        ));

        let saved = harness.service.save(edited, Some(0), None).await.expect("update");
        assert_eq!(saved.id, Some(9));
        assert_eq!(harness.api.calls(), vec!["update:9"]);
        assert_eq!(harness.service.refresh().await[0].name, "Physics II");
    }

    #[tokio::test]
    async fn authenticated_save_failure_propagates_message() {
        let api = FakeSessionsApi::default();
        api.fail("create", FakeFailure::Api(400, "Title is required".to_string()));
        let harness = Harness::new(api, FakeAuth::signed_in(), &[local_session("Offline")]);
        let before = harness.service.snapshot();

        let error = harness
            .service
            .save(local_session("Broken"), None, None)
            .await
            .expect_err("must fail");
        assert_eq!(error.to_string(), "Title is required");
        assert_eq!(harness.service.snapshot(), before);
        assert_eq!(harness.local().len(), 1);
    }

    #[tokio::test]
    async fn editing_system_session_is_rejected() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::signed_in(), &[]);
        let error = harness
            .service
            .save(system_session(7, "Template"), None, None)
            .await
            .expect_err("must reject");
        assert!(matches!(error, InfraError::InvalidSession(_)));
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn guest_cannot_save_synced_session() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let error = harness
            .service
            .save(synced_session(3, "Synced"), None, None)
            .await
            .expect_err("must reject");
        assert!(matches!(error, InfraError::SignInRequired));
    }

    #[tokio::test]
    async fn invalid_session_is_rejected_before_io() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::signed_in(), &[]);
        let mut invalid = local_session("   ");
        invalid.tasks.clear();
        let error = harness
            .service
            .save(invalid, None, None)
            .await
            .expect_err("blank name");
        assert!(matches!(error, InfraError::InvalidSession(_)));
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn guest_save_appends_then_updates_by_local_key() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let saved = harness
            .service
            .save(local_session("Reading"), None, None)
            .await
            .expect("append");
        assert!(saved.local_key.is_some());
        assert_eq!(harness.local().len(), 1);

        let mut edited = saved.clone();
        edited.name = "Reading, revised".to_string();
        harness.service.save(edited, None, None).await.expect("update");

        let local = harness.local();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name, "Reading, revised");
        assert_eq!(local[0].local_key, saved.local_key);
        assert_eq!(harness.names(), vec!["Reading, revised"]);
    }

    #[tokio::test]
    async fn guest_save_resolves_index_then_original() {
        let legacy_a = local_session("Legacy A");
        let legacy_b = local_session("Legacy B");
        let harness = Harness::new(
            FakeSessionsApi::default(),
            FakeAuth::default(),
            &[legacy_a.clone(), legacy_b.clone()],
        );

        harness
            .service
            .save(local_session("By index"), Some(0), None)
            .await
            .expect("by index");
        harness
            .service
            .save(local_session("By original"), Some(9), Some(&legacy_b))
            .await
            .expect("by original");

        let names = harness
            .local()
            .into_iter()
            .map(|session| session.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["By index", "By original"]);
    }

    #[tokio::test]
    async fn guest_save_keeps_synced_entries_in_view() {
        let api = FakeSessionsApi::default();
        api.set_public(vec![system_session(1, "Template")]);
        let harness = Harness::new(api, FakeAuth::default(), &[]);
        harness.service.refresh().await;

        harness
            .service
            .save(local_session("Mine"), None, None)
            .await
            .expect("save");
        assert_eq!(harness.names(), vec!["Template", "Mine"]);
    }

    #[tokio::test]
    async fn published_index_maps_to_local_position() {
        let api = FakeSessionsApi::default();
        api.set_public(vec![system_session(1, "Template")]);
        let legacy = local_session("Legacy");
        let harness = Harness::new(api, FakeAuth::default(), &[legacy]);
        harness.service.refresh().await;
        assert_eq!(harness.names(), vec!["Template", "Legacy"]);

        assert_eq!(harness.service.local_index_of(0), None);
        assert_eq!(harness.service.local_index_of(1), Some(0));
        assert_eq!(harness.service.local_index_of(7), None);

        let index = harness.service.local_index_of(1);
        harness
            .service
            .save(local_session("Legacy, revised"), index, None)
            .await
            .expect("save");
        assert_eq!(harness.names(), vec!["Template", "Legacy, revised"]);
    }

    #[tokio::test]
    async fn duplicate_is_independent_and_unsynced_for_guest() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let mut original = system_session(5, "Deep work");
        original.tasks[0].id = Some(50);

        let mut copy = harness.service.duplicate(&original).await.expect("duplicate");
        assert_eq!(copy.id, None);
        assert_eq!(copy.name, "Deep work (copy)");
        assert!(!copy.is_system_generated);
        assert_eq!(copy.tasks[0].id, None);

        copy.tasks[0].name = "Changed".to_string();
        assert_eq!(original.tasks[0].name, "Drill");
        assert_eq!(harness.local().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_is_created_remotely_when_signed_in() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::signed_in(), &[]);
        let copy = harness
            .service
            .duplicate(&system_session(5, "Deep work"))
            .await
            .expect("duplicate");
        assert_eq!(copy.id, Some(100));
        assert_eq!(harness.api.calls(), vec!["create:Deep work (copy)"]);
    }

    #[tokio::test]
    async fn untimed_tasks_survive_duplicate_and_import() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let mut open_study = Session::new("Open study", None, vec![Task::simple("Free reading", 0)]);
        open_study.id = Some(5);
        open_study.is_system_generated = true;

        let copy = harness.service.duplicate(&open_study).await.expect("duplicate");
        assert_eq!(copy.name, "Open study (copy)");
        assert_eq!(copy.tasks[0].duration_seconds, 0);

        let exported = harness.service.export_json(&[copy]).expect("export");
        let imported = harness.service.import_json(&exported).await.expect("import");
        assert_eq!(imported.len(), 1);
        assert_eq!(harness.local().len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_every_publish() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let mut receiver = harness.service.subscribe();
        assert!(receiver.borrow_and_update().is_empty());

        harness
            .service
            .save(local_session("Watched"), None, None)
            .await
            .expect("save");
        assert!(receiver.has_changed().expect("sender alive"));
        assert_eq!(receiver.borrow_and_update()[0].name, "Watched");
    }

    #[tokio::test]
    async fn clear_remote_sessions_keeps_only_local() {
        let api = FakeSessionsApi::with_remote(vec![synced_session(9, "Physics")]);
        let harness = Harness::new(
            api,
            FakeAuth::signed_in(),
            &[synced_session(9, "Physics"), local_session("Mine")],
        );
        harness.auth.sign_out();

        let view = harness
            .service
            .clear_remote_sessions()
            .await
            .expect("clear");
        assert_eq!(view.len(), 1);
        assert_eq!(harness.local().len(), 1);
        assert_eq!(harness.names(), vec!["Mine"]);
    }

    #[tokio::test]
    async fn export_then_import_creates_fresh_local_sessions() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let exported = harness
            .service
            .export_json(&[synced_session(9, "Physics"), local_session("Mine")])
            .expect("export");

        let imported = harness.service.import_json(&exported).await.expect("import");
        assert_eq!(imported.len(), 2);
        assert!(imported.iter().all(Session::is_local_only));
        assert_ne!(imported[0].local_key, imported[1].local_key);
        assert_eq!(harness.local().len(), 2);

        assert!(harness.service.import_json("{not json").await.is_err());
    }

    #[tokio::test]
    async fn find_index_by_id_reads_published_view() {
        let api = FakeSessionsApi::with_remote(vec![
            synced_session(3, "A"),
            synced_session(4, "B"),
        ]);
        let harness = Harness::new(api, FakeAuth::signed_in(), &[]);
        harness.service.refresh().await;
        assert_eq!(harness.service.find_index_by_id(4), Some(1));
        assert_eq!(harness.service.find_index_by_id(99), None);
    }

    #[tokio::test]
    async fn concurrent_guest_saves_are_serialized() {
        let harness = Harness::new(FakeSessionsApi::default(), FakeAuth::default(), &[]);
        let (first, second) = tokio::join!(
            harness.service.save(local_session("One"), None, None),
            harness.service.save(local_session("Two"), None, None),
        );
        first.expect("first");
        second.expect("second");
        assert_eq!(harness.local().len(), 2);
        assert_eq!(harness.service.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn malformed_local_payload_starts_empty() {
        let medium = Arc::new(InMemoryKeyValueStore::default());
        medium.set(DEFAULT_SESSIONS_KEY, "[{broken").expect("seed");
        let service = SessionsService::new(
            Arc::new(FakeSessionsApi::default()),
            Arc::new(FakeAuth::default()),
            LocalSessionStore::new(medium),
        );
        assert!(service.snapshot().is_empty());
        assert!(service.refresh().await.is_empty());
    }
}
