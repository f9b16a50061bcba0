use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_dto::SessionDto;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use url::Url;

const FALLBACK_ERROR_MESSAGE: &str = "Failed to save session. Please try again.";

/// Remote session endpoints. Every authenticated call takes the bearer token
/// explicitly; acquiring it is someone else's job.
#[async_trait]
pub trait SessionsApi: Send + Sync {
    async fn list_sessions(&self, access_token: &str) -> Result<Vec<SessionDto>, InfraError>;

    async fn list_public_sessions(&self) -> Result<Vec<SessionDto>, InfraError>;

    async fn create_session(
        &self,
        access_token: &str,
        session: &SessionDto,
    ) -> Result<SessionDto, InfraError>;

    async fn update_session(
        &self,
        access_token: &str,
        id: i64,
        session: &SessionDto,
    ) -> Result<(), InfraError>;

    async fn delete_session(&self, access_token: &str, id: i64) -> Result<(), InfraError>;

    async fn toggle_visibility(&self, access_token: &str, id: i64) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSessionsApi {
    client: Client,
    base_url: Url,
}

impl ReqwestSessionsApi {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid api base url '{base_url}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "api base url cannot be a base: {base_url}"
            )));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn ensure_token(access_token: &str) -> Result<(), InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::SignInRequired);
        }
        Ok(())
    }

    fn request(&self, method: Method, url: Url, access_token: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("{action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading {action} response: {error}")))?;

        if !status.is_success() {
            return Err(InfraError::Api {
                status: status.as_u16(),
                message: resolve_api_error_message(status.as_u16(), &body),
            });
        }
        Ok(body)
    }

    fn parse_sessions(body: &str, action: &str) -> Result<Vec<SessionDto>, InfraError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: Option<Vec<SessionDto>> = serde_json::from_str(body).map_err(|error| {
            InfraError::Network(format!("invalid {action} payload: {error}"))
        })?;
        Ok(parsed.unwrap_or_default())
    }
}

#[async_trait]
impl SessionsApi for ReqwestSessionsApi {
    async fn list_sessions(&self, access_token: &str) -> Result<Vec<SessionDto>, InfraError> {
        Self::ensure_token(access_token)?;
        let url = self.endpoint(&["api", "sessions"])?;
        let body = self
            .execute(self.request(Method::GET, url, Some(access_token)), "list sessions")
            .await?;
        Self::parse_sessions(&body, "session list")
    }

    async fn list_public_sessions(&self) -> Result<Vec<SessionDto>, InfraError> {
        let url = self.endpoint(&["api", "Sessions", "public"])?;
        let body = self
            .execute(self.request(Method::GET, url, None), "list public sessions")
            .await?;
        Self::parse_sessions(&body, "public session list")
    }

    async fn create_session(
        &self,
        access_token: &str,
        session: &SessionDto,
    ) -> Result<SessionDto, InfraError> {
        Self::ensure_token(access_token)?;
        let url = self.endpoint(&["api", "sessions"])?;
        let body = self
            .execute(
                self.request(Method::POST, url, Some(access_token)).json(session),
                "create session",
            )
            .await?;
        let created: SessionDto = serde_json::from_str(&body).map_err(|error| {
            InfraError::Network(format!("invalid session create payload: {error}"))
        })?;
        if created.id.is_none() {
            return Err(InfraError::Network(
                "session create response did not include id".to_string(),
            ));
        }
        Ok(created)
    }

    async fn update_session(
        &self,
        access_token: &str,
        id: i64,
        session: &SessionDto,
    ) -> Result<(), InfraError> {
        Self::ensure_token(access_token)?;
        let url = self.endpoint(&["api", "sessions", &id.to_string()])?;
        self.execute(
            self.request(Method::PUT, url, Some(access_token)).json(session),
            "update session",
        )
        .await?;
        Ok(())
    }

    async fn delete_session(&self, access_token: &str, id: i64) -> Result<(), InfraError> {
        Self::ensure_token(access_token)?;
        let url = self.endpoint(&["api", "sessions", &id.to_string()])?;
        self.execute(
            self.request(Method::DELETE, url, Some(access_token)),
            "delete session",
        )
        .await?;
        Ok(())
    }

    async fn toggle_visibility(&self, access_token: &str, id: i64) -> Result<(), InfraError> {
        Self::ensure_token(access_token)?;
        let url = self.endpoint(&["api", "Sessions", &id.to_string(), "toggle-visibility"])?;
        self.execute(
            self.request(Method::POST, url, Some(access_token)),
            "toggle session visibility",
        )
        .await?;
        Ok(())
    }
}

/// Human-readable message from an error response body.
pub fn resolve_api_error_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status_fallback(status);
    }

    let parsed = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value,
        Err(_) => return trimmed.to_string(),
    };

    // a JSON string may itself carry an encoded payload
    let payload = match &parsed {
        serde_json::Value::String(inner) => match serde_json::from_str::<serde_json::Value>(inner) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => return non_empty(inner).unwrap_or_else(|| status_fallback(status)),
        },
        _ => parsed,
    };

    message_from_payload(&payload).unwrap_or_else(|| status_fallback(status))
}

fn message_from_payload(payload: &serde_json::Value) -> Option<String> {
    let lookup = |pointer: &str| {
        payload
            .pointer(pointer)
            .and_then(serde_json::Value::as_str)
            .and_then(non_empty)
    };

    if let Some(message) = lookup("/message")
        .or_else(|| lookup("/error_description"))
        .or_else(|| lookup("/error"))
        .or_else(|| lookup("/error/message"))
        .or_else(|| lookup("/detail"))
        .or_else(|| lookup("/title"))
    {
        return Some(message);
    }

    match payload.get("errors") {
        Some(serde_json::Value::Array(items)) => join_messages(items.iter()),
        Some(serde_json::Value::Object(fields)) => join_messages(fields.values().flat_map(|value| {
            match value {
                serde_json::Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            }
        })),
        _ => None,
    }
}

fn join_messages<'a>(values: impl Iterator<Item = &'a serde_json::Value>) -> Option<String> {
    let messages = values
        .filter_map(|value| match value {
            serde_json::Value::String(text) => non_empty(text),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect::<Vec<_>>();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn status_fallback(status: u16) -> String {
    if status == 0 {
        FALLBACK_ERROR_MESSAGE.to_string()
    } else {
        format!("Request failed ({status})")
    }
}
