use crate::domain::models::OAuthToken;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const DEFAULT_LEEWAY_SECONDS: i64 = 60;

/// Opaque sign-in capability consumed by the reconciler.
pub trait AuthProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct CredentialAuthProvider<S>
where
    S: CredentialStore,
{
    credential_store: Arc<S>,
    leeway_seconds: i64,
    now_provider: NowProvider,
}

impl<S> CredentialAuthProvider<S>
where
    S: CredentialStore,
{
    pub fn new(credential_store: Arc<S>) -> Self {
        Self {
            credential_store,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_leeway_seconds(mut self, leeway_seconds: i64) -> Self {
        self.leeway_seconds = leeway_seconds.max(0);
        self
    }

    pub fn current_token(&self) -> Option<OAuthToken> {
        match self.credential_store.load_token() {
            Ok(Some(token)) if token.is_valid_at((self.now_provider)(), self.leeway_seconds) => {
                Some(token)
            }
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "failed to read stored token; treating as signed out");
                None
            }
        }
    }

    pub fn sign_out(&self) -> Result<(), InfraError> {
        self.credential_store.delete_token()?;
        tracing::info!("signed out");
        Ok(())
    }
}

impl<S> AuthProvider for CredentialAuthProvider<S>
where
    S: CredentialStore,
{
    fn access_token(&self) -> Option<String> {
        self.current_token().map(|token| token.access_token)
    }
}
