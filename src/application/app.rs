use crate::application::auth::{AuthProvider, CredentialAuthProvider};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::logging::init_tracing;
use crate::application::sessions_service::SessionsService;
use crate::application::timer_runner::{NoopPlatform, TimerPlatform, TimerRunner};
use crate::domain::models::Session;
use crate::infrastructure::config::{ConfigBundle, resolve_api_base_url};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalSessionStore;
use crate::infrastructure::sessions_api_client::{ReqwestSessionsApi, SessionsApi};
use crate::infrastructure::storage::{KeyValueStore, SqliteKeyValueStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type DesktopApp = App<
    ReqwestSessionsApi,
    CredentialAuthProvider<KeyringCredentialStore>,
    SqliteKeyValueStore,
>;

/// Everything a UI surface needs: the session reconciler, config and timers.
pub struct App<A, P, K>
where
    A: SessionsApi,
    P: AuthProvider,
    K: KeyValueStore,
{
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    configs: ConfigBundle,
    auth: Arc<P>,
    sessions: SessionsService<A, P, K>,
}

impl DesktopApp {
    /// Prepares the workspace, installs logging and wires the production stack.
    pub fn open(workspace_root: &Path) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        if !init_tracing(&bootstrap.logs_dir)? {
            tracing::debug!("tracing subscriber already installed");
        }

        let base_url = resolve_api_base_url(&bootstrap.configs.app, |key| std::env::var(key).ok())?;
        let api = Arc::new(ReqwestSessionsApi::new(&base_url)?);
        let auth = Arc::new(CredentialAuthProvider::new(Arc::new(
            KeyringCredentialStore::for_api(&bootstrap.configs.app.credential_service, &base_url),
        )));
        let medium = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));

        tracing::info!(
            workspace = %bootstrap.workspace_root.display(),
            api = %base_url,
            "opened workspace"
        );
        Ok(Self::from_parts(
            bootstrap.workspace_root,
            bootstrap.logs_dir,
            bootstrap.configs,
            api,
            auth,
            medium,
        ))
    }
}

impl<A, P, K> App<A, P, K>
where
    A: SessionsApi,
    P: AuthProvider,
    K: KeyValueStore,
{
    pub fn from_parts(
        workspace_root: PathBuf,
        logs_dir: PathBuf,
        configs: ConfigBundle,
        api: Arc<A>,
        auth: Arc<P>,
        medium: Arc<K>,
    ) -> Self {
        let store = LocalSessionStore::with_keys(
            medium,
            configs.app.sessions_storage_key.clone(),
            configs.app.hidden_sessions_storage_key.clone(),
        );
        let sessions = SessionsService::new(api, Arc::clone(&auth), store);
        Self {
            workspace_root,
            logs_dir,
            configs,
            auth,
            sessions,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn configs(&self) -> &ConfigBundle {
        &self.configs
    }

    pub fn auth(&self) -> &P {
        &self.auth
    }

    pub fn sessions(&self) -> &SessionsService<A, P, K> {
        &self.sessions
    }

    /// Logs the failure and renders it for a UI surface.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }

    pub fn timer_for(&self, index: usize) -> Result<TimerRunner<NoopPlatform>, InfraError> {
        self.timer_with_platform(index, Arc::new(NoopPlatform))
    }

    pub fn timer_with_platform<T>(
        &self,
        index: usize,
        platform: Arc<T>,
    ) -> Result<TimerRunner<T>, InfraError>
    where
        T: TimerPlatform + 'static,
    {
        let session = self.session_at(index)?;
        TimerRunner::new(
            session,
            self.configs.timer.alarm_settings(),
            Duration::from_millis(self.configs.timer.tick_millis),
            platform,
        )
    }

    fn session_at(&self, index: usize) -> Result<Session, InfraError> {
        self.sessions
            .snapshot()
            .into_iter()
            .nth(index)
            .ok_or(InfraError::SessionNotFound(index))
    }
}

impl<A, S, K> App<A, CredentialAuthProvider<S>, K>
where
    A: SessionsApi,
    S: CredentialStore,
    K: KeyValueStore,
{
    /// Drops the stored token and every synced session from view.
    pub async fn sign_out(&self) -> Result<Vec<Session>, InfraError> {
        self.auth.sign_out()?;
        self.sessions.clear_remote_sessions().await
    }
}
