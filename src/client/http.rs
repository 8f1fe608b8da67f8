//! `reqwest` transport for the API, with transparent token renewal.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Method, StatusCode, header::HeaderMap};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::coordinator::{ExchangeError, RefreshExchange, SessionError};
use super::session::SessionContext;
use crate::auth::{
    AuthErrorKind, NEW_ACCESS_TOKEN_HEADER, NEW_REFRESH_TOKEN_HEADER, NEW_TOKENS_FIELD, UserInfo,
};
use crate::jwt::TokenPair;

const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("server returned {status}: {body}")]
    Api { status: StatusCode, body: Value },
}

/// A decoded API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// JSON body, `Null` when empty or not JSON.
    pub body: Value,
    /// Whether the server rotated the session's tokens on this response.
    pub rotated: bool,
}

/// Refresh exchange over HTTP against `POST /auth/refresh`.
#[derive(Clone)]
pub struct HttpRefreshExchange {
    http: reqwest::Client,
    url: Url,
}

impl HttpRefreshExchange {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }
}

impl RefreshExchange for HttpRefreshExchange {
    fn exchange(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenPair, ExchangeError>> {
        let http = self.http.clone();
        let url = self.url.clone();
        async move {
            let response = http
                .post(url)
                .json(&json!({ "refreshToken": refresh_token }))
                .send()
                .await
                .map_err(|e| ExchangeError::Network(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ExchangeError::Rejected);
            }
            if !status.is_success() {
                return Err(ExchangeError::Network(format!(
                    "refresh endpoint returned {status}"
                )));
            }

            response
                .json::<TokenPair>()
                .await
                .map_err(|e| ExchangeError::Network(e.to_string()))
        }
        .boxed()
    }
}

/// API client that keeps its session alive.
///
/// Rotated tokens delivered out-of-band are adopted from every response. A
/// call rejected with an expired or missing token triggers one refresh
/// (shared with every concurrent caller) and is replayed exactly once.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    refresh_url: Url,
    session: SessionContext,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let refresh_url = base_url.join(REFRESH_PATH)?;
        let session =
            SessionContext::new(HttpRefreshExchange::new(http.clone(), refresh_url.clone()));
        Ok(Self {
            http,
            base_url,
            refresh_url,
            session,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<UserInfo, ClientError> {
        let body = json!({ "email": email, "password": password, "name": name });
        self.start_session("auth/register", &body).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserInfo, ClientError> {
        let body = json!({ "email": email, "password": password });
        self.start_session("auth/login", &body).await
    }

    /// End the session on the server. Local tokens are dropped either way.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.post("auth/logout", &json!({})).await;
        self.session.clear();
        let response = result?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Api {
                status: response.status,
                body: response.body,
            })
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Send an authenticated request, refreshing and replaying once if the
    /// access token was rejected.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ClientError> {
        let url = self.base_url.join(path)?;
        let sent_access = self.session.access_token();

        let response = self
            .dispatch(method.clone(), url.clone(), body, sent_access.as_deref())
            .await?;

        if response.status != StatusCode::UNAUTHORIZED
            || url == self.refresh_url
            || !triggers_refresh(&response.body)
        {
            return Ok(response);
        }

        let replay_access = if response.rotated {
            self.session
                .access_token()
                .ok_or(SessionError::SessionExpired)?
        } else {
            self.session
                .refresh_after_rejection(sent_access.as_deref())
                .await?
                .access_token
        };

        debug!(path, "Replaying request after refresh");
        self.dispatch(method, url, body, Some(&replay_access)).await
    }

    async fn start_session(&self, path: &str, body: &Value) -> Result<UserInfo, ClientError> {
        let url = self.base_url.join(path)?;
        let response = self.dispatch(Method::POST, url, Some(body), None).await?;
        if !response.status.is_success() {
            return Err(ClientError::Api {
                status: response.status,
                body: response.body,
            });
        }

        let tokens: TokenPair = serde_json::from_value(response.body.clone()).map_err(|_| {
            ClientError::Api {
                status: response.status,
                body: response.body.clone(),
            }
        })?;
        let user: UserInfo = serde_json::from_value(response.body["user"].clone()).map_err(|_| {
            ClientError::Api {
                status: response.status,
                body: response.body.clone(),
            }
        })?;

        self.session.adopt(tokens);
        Ok(user)
    }

    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let mut request = self.http.request(method, url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let header_pair = rotated_from_headers(response.headers());
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        let rotated = header_pair.or_else(|| rotated_from_body(&body));
        if let Some(pair) = &rotated {
            debug!("Adopting tokens rotated by the server");
            self.session.adopt(pair.clone());
        }

        Ok(ApiResponse {
            status,
            body,
            rotated: rotated.is_some(),
        })
    }
}

/// Whether a 401 body describes a token that a refresh could fix.
fn triggers_refresh(body: &Value) -> bool {
    let terminal = [
        AuthErrorKind::InvalidToken.code(),
        AuthErrorKind::WrongTokenKind.code(),
    ];
    match body.get("code").and_then(Value::as_str) {
        Some(code) => !terminal.contains(&code),
        None => true,
    }
}

fn rotated_from_headers(headers: &HeaderMap) -> Option<TokenPair> {
    let access = headers.get(NEW_ACCESS_TOKEN_HEADER)?.to_str().ok()?;
    let refresh = headers.get(NEW_REFRESH_TOKEN_HEADER)?.to_str().ok()?;
    Some(TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    })
}

fn rotated_from_body(body: &Value) -> Option<TokenPair> {
    serde_json::from_value(body.get(NEW_TOKENS_FIELD)?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_triggers_refresh() {
        assert!(triggers_refresh(&json!({ "code": "token_expired" })));
        assert!(triggers_refresh(&json!({ "code": "not_authenticated" })));
        assert!(triggers_refresh(&json!({ "error": "Unauthorized" })));
        assert!(triggers_refresh(&Value::Null));
        assert!(!triggers_refresh(&json!({ "code": "invalid_token" })));
        assert!(!triggers_refresh(&json!({ "code": "wrong_token_kind" })));
    }

    #[test]
    fn test_rotated_from_headers_needs_both() {
        let mut headers = HeaderMap::new();
        headers.insert(NEW_ACCESS_TOKEN_HEADER, HeaderValue::from_static("a"));
        assert_eq!(rotated_from_headers(&headers), None);

        headers.insert(NEW_REFRESH_TOKEN_HEADER, HeaderValue::from_static("r"));
        assert_eq!(
            rotated_from_headers(&headers),
            Some(TokenPair {
                access_token: "a".into(),
                refresh_token: "r".into(),
            })
        );
    }

    #[test]
    fn test_rotated_from_body() {
        let body = json!({ "user": {}, "newTokens": { "accessToken": "a", "refreshToken": "r" } });
        assert_eq!(
            rotated_from_body(&body).map(|pair| pair.access_token),
            Some("a".to_string())
        );
        assert_eq!(rotated_from_body(&json!({ "user": {} })), None);
    }

    #[test]
    fn test_refresh_url_joins_base() {
        let client = ApiClient::new(
            Url::parse("http://127.0.0.1:7291/").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.refresh_url.as_str(), "http://127.0.0.1:7291/auth/refresh");
    }
}
