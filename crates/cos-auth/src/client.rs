//! HTTP client for the auth and matchmaking endpoints.

use std::time::Duration;

use cos_settings::{AccountSettings, AiSettings, ApiSettings};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::AuthError;
use crate::token::AuthToken;

/// Control-plane endpoint handed out by the lobby.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct LobbyEndpoint {
    /// Credential to present as the first frame on the socket.
    pub jwt: String,
    /// Websocket URL of the lobby socket server.
    pub url: String,
}

impl std::fmt::Debug for LobbyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyEndpoint")
            .field("jwt", &"<redacted>")
            .field("url", &self.url)
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    expires_at: f64,
}

/// Thin wrapper over a pooled `reqwest` client bound to one API base.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client for the configured API base.
    pub fn new(settings: &ApiSettings) -> Result<Self, AuthError> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/')).map_err(|e| {
            AuthError::InvalidUrl {
                url: settings.base_url.clone(),
                message: e.to_string(),
            }
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self { http, base_url })
    }

    /// The API base this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        let joined = format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));
        Url::parse(&joined).map_err(|e| AuthError::InvalidUrl {
            url: joined,
            message: e.to_string(),
        })
    }

    /// Log in with the account's password grant.
    #[tracing::instrument(skip_all, fields(email = %account.email))]
    pub async fn login(&self, account: &AccountSettings) -> Result<AuthToken, AuthError> {
        let body = json!({
            "email": account.email,
            "password": account.secret,
            "grant_iden": account.grant_iden,
        });

        let resp = self
            .http
            .post(self.endpoint("/api/1/auth/sessions")?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            return Err(AuthError::Status { status, body: text });
        }

        let data: LoginResponse = serde_json::from_str(&text)?;
        let token = AuthToken::from_unix(data.token, data.expires_at);
        info!(expires_at = %token.expires_at, "logged in");
        Ok(token)
    }

    /// Queue the AI personality and fetch the lobby socket endpoint.
    #[tracing::instrument(skip_all, fields(ai = %ai.name, role = %ai.role))]
    pub async fn request_lobby_endpoint(
        &self,
        ai: &AiSettings,
        auth: &AuthToken,
    ) -> Result<LobbyEndpoint, AuthError> {
        let body = json!({
            "name": ai.name,
            "uid": ai.uid,
            "version": ai.version,
            "role": ai.role.name(),
            "client_allow_list": ai.client_allow_list,
            "max_concurrent_instances": ai.max_concurrent_instances,
        });

        let resp = self
            .http
            .post(self.endpoint("/api/1/play/ai")?)
            .bearer_auth(&auth.token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            return Err(AuthError::Status { status, body: text });
        }

        let endpoint: LobbyEndpoint = serde_json::from_str(&text)?;
        debug!(url = %endpoint.url, "lobby endpoint assigned");
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cos_core::Role;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&ApiSettings {
            base_url: server.uri(),
            ..ApiSettings::default()
        })
        .unwrap()
    }

    fn account() -> AccountSettings {
        AccountSettings {
            email: "ai@example.com".into(),
            grant_iden: "pa_xyz".into(),
            secret: "hunter2".into(),
        }
    }

    // -- construction --

    #[test]
    fn invalid_base_url_rejected() {
        let err = ApiClient::new(&ApiSettings {
            base_url: "not a url".into(),
            ..ApiSettings::default()
        })
        .unwrap_err();
        assert_matches!(err, AuthError::InvalidUrl { .. });
    }

    #[test]
    fn endpoint_joins_path() {
        let client = ApiClient::new(&ApiSettings {
            base_url: "https://example.com/".into(),
            ..ApiSettings::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("/api/1/play/ai").unwrap().as_str(),
            "https://example.com/api/1/play/ai"
        );
    }

    // -- login --

    #[tokio::test]
    async fn login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/1/auth/sessions"))
            .and(body_json(serde_json::json!({
                "email": "ai@example.com",
                "password": "hunter2",
                "grant_iden": "pa_xyz",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok-1",
                "expires_at": 1_700_000_000.25,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server).login(&account()).await.unwrap();
        assert_eq!(token.token, "tok-1");
        assert_eq!(token.expires_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn login_rejected_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/1/auth/sessions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bad grant"))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&account()).await.unwrap_err();
        assert_matches!(err, AuthError::Status { status: 403, ref body } if body == "bad grant");
    }

    #[tokio::test]
    async fn login_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/1/auth/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"token\": 1}"))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&account()).await.unwrap_err();
        assert_matches!(err, AuthError::Json(_));
    }

    // -- request_lobby_endpoint --

    #[tokio::test]
    async fn lobby_request_sends_ai_config_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/1/play/ai"))
            .and(header("authorization", "Bearer tok-1"))
            .and(body_json(serde_json::json!({
                "name": "Tester",
                "uid": "tester-ai",
                "version": "1.2.3",
                "role": "military",
                "client_allow_list": ["u1"],
                "max_concurrent_instances": 3,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jwt": "lobby-jwt",
                "url": "wss://lobby.example/ws",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ai = AiSettings {
            name: "Tester".into(),
            uid: "tester-ai".into(),
            version: "1.2.3".into(),
            role: Role::Military,
            client_allow_list: vec!["u1".into()],
            max_concurrent_instances: 3,
        };
        let auth = AuthToken::from_unix("tok-1".into(), 0.0);

        let endpoint = client_for(&server)
            .request_lobby_endpoint(&ai, &auth)
            .await
            .unwrap();
        assert_eq!(endpoint.jwt, "lobby-jwt");
        assert_eq!(endpoint.url, "wss://lobby.example/ws");
    }

    #[tokio::test]
    async fn lobby_request_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/1/play/ai"))
            .respond_with(ResponseTemplate::new(500).set_body_string("queue down"))
            .mount(&server)
            .await;

        let auth = AuthToken::from_unix("tok".into(), 0.0);
        let err = client_for(&server)
            .request_lobby_endpoint(&AiSettings::default(), &auth)
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Status { status: 500, .. });
        assert!(!err.is_unauthorized());
    }
}
