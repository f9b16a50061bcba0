use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;

pub const DEFAULT_CREDENTIAL_SERVICE: &str = "prayatna.oauth";
const FALLBACK_ACCOUNT: &str = "default";

/// Holds the signed-in user's token. Acquiring one happens elsewhere.
pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

/// OS keychain entry holding the token for one sessions API.
///
/// The account is the API's `host[:port]`, so pointing the app at another
/// backend never reuses a token issued for the previous one.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn for_api(service_name: impl Into<String>, api_base_url: &str) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_for_api(api_base_url),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        if token.access_token.trim().is_empty() {
            return Err(InfraError::Credential(
                "refusing to store an empty access token".to_string(),
            ));
        }
        let payload = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };
        decode_token(&payload)
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

fn account_for_api(api_base_url: &str) -> String {
    url::Url::parse(api_base_url)
        .ok()
        .and_then(|url| {
            let host = url.host_str()?.to_ascii_lowercase();
            Some(match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            })
        })
        .unwrap_or_else(|| FALLBACK_ACCOUNT.to_string())
}

/// A blank stored token reads as signed out.
fn decode_token(payload: &str) -> Result<Option<OAuthToken>, InfraError> {
    let token = serde_json::from_str::<OAuthToken>(payload)
        .map_err(|error| InfraError::Credential(format!("stored token is unreadable: {error}")))?;
    Ok((!token.access_token.trim().is_empty()).then_some(token))
}

#[cfg(test)]
pub(crate) use testing::InMemoryCredentialStore;
