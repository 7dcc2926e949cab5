use base64::Engine as _;
use serde::Deserialize;
use sha2::Digest;
use tracing::{debug, warn};

use crate::constants::{OAUTH_AUTHORIZE_URL, OAUTH_CLIENT_ID, OAUTH_SCOPES, OAUTH_TOKEN_URL};
use crate::error::{GatewayError, GatewayResult};

/// Credentials returned by the token endpoint. `expires_at` is absolute
/// milliseconds, derived from the endpoint's relative `expires_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub fn generate_pkce_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn pkce_challenge_s256(verifier: &str) -> String {
    let digest = sha2::Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Builds the vendor authorize URL with the Codex CLI's simplified-flow
/// parameters. The browser dance itself belongs to the host.
pub fn build_authorize_url(
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> GatewayResult<String> {
    let params = [
        ("client_id", OAUTH_CLIENT_ID),
        ("redirect_uri", redirect_uri),
        ("response_type", "code"),
        ("scope", OAUTH_SCOPES),
        ("state", state),
        ("code_challenge", code_challenge),
        ("code_challenge_method", "S256"),
        ("codex_cli_simplified_flow", "true"),
        ("id_token_add_organizations", "true"),
        ("prompt", "login"),
    ];
    let url = url::Url::parse_with_params(OAUTH_AUTHORIZE_URL, &params)
        .map_err(|e| GatewayError::Config(format!("invalid authorize URL: {}", e)))?;
    Ok(url.to_string())
}

/// Token endpoint client. Never retries; the account manager decides what a
/// failure means for the account.
#[derive(Debug, Clone)]
pub struct TokenService {
    client: reqwest::Client,
    token_url: String,
}

impl TokenService {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            token_url: OAUTH_TOKEN_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    /// Exchanges an authorization code for a token bundle. All three response
    /// fields are required.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> GatewayResult<TokenBundle> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", OAUTH_CLIENT_ID),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::TokenRefreshFailed(format!(
                "code exchange returned {}: {}",
                status, body
            )));
        }

        let parsed = response
            .json::<TokenEndpointResponse>()
            .await
            .map_err(|e| GatewayError::TokenRefreshFailed(format!("unparseable response: {}", e)))?;

        let (Some(access), Some(refresh), Some(expires_in)) = (
            parsed.access_token,
            parsed.refresh_token,
            parsed.expires_in,
        ) else {
            return Err(GatewayError::TokenRefreshFailed(
                "token response missing access_token, refresh_token, or expires_in".to_string(),
            ));
        };

        debug!("code exchange succeeded, access token expires in {}s", expires_in);
        Ok(TokenBundle {
            access_token: access,
            refresh_token: refresh,
            expires_at: chrono::Utc::now().timestamp_millis() + expires_in * 1000,
        })
    }

    /// Refreshes an access token. The vendor may rotate the refresh token;
    /// when it does not, the caller's token is carried forward.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> GatewayResult<TokenBundle> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", OAUTH_CLIENT_ID),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("token refresh returned {}", status);
            return Err(GatewayError::TokenRefreshFailed(format!(
                "refresh returned {}: {}",
                status, body
            )));
        }

        let parsed = response
            .json::<TokenEndpointResponse>()
            .await
            .map_err(|e| GatewayError::TokenRefreshFailed(format!("unparseable response: {}", e)))?;

        let (Some(access), Some(expires_in)) = (parsed.access_token, parsed.expires_in) else {
            return Err(GatewayError::TokenRefreshFailed(
                "refresh response missing access_token or expires_in".to_string(),
            ));
        };

        Ok(TokenBundle {
            access_token: access,
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at: chrono::Utc::now().timestamp_millis() + expires_in * 1000,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn pkce_challenge_is_url_safe_and_deterministic() {
        let verifier = generate_pkce_verifier();
        assert!(verifier.len() >= 43);
        let c1 = pkce_challenge_s256(&verifier);
        let c2 = pkce_challenge_s256(&verifier);
        assert_eq!(c1, c2);
        assert!(!c1.contains('+') && !c1.contains('/') && !c1.contains('='));
    }

    #[test]
    fn authorize_url_carries_simplified_flow_params() {
        let url = build_authorize_url("http://localhost:1455/auth/callback", "st-1", "chal").unwrap();
        assert!(url.starts_with(OAUTH_AUTHORIZE_URL));
        assert!(url.contains("state=st-1"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("codex_cli_simplified_flow=true"));
        assert!(url.contains(OAUTH_CLIENT_ID));
    }

    #[tokio::test]
    async fn exchange_code_parses_full_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=ver"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let service = TokenService::with_endpoint(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
        );
        let before = chrono::Utc::now().timestamp_millis();
        let bundle = service
            .exchange_code("code", "ver", "http://localhost:1455/auth/callback")
            .await
            .unwrap();
        assert_eq!(bundle.access_token, "at-1");
        assert_eq!(bundle.refresh_token, "rt-1");
        assert!(bundle.expires_at >= before + 3_600_000);
    }

    #[tokio::test]
    async fn exchange_code_rejects_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let service = TokenService::with_endpoint(reqwest::Client::new(), server.uri());
        let err = service
            .exchange_code("code", "ver", "uri")
            .await
            .expect_err("missing refresh_token must fail");
        assert!(matches!(err, GatewayError::TokenRefreshFailed(_)));
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 1800
            })))
            .mount(&server)
            .await;

        let service = TokenService::with_endpoint(reqwest::Client::new(), server.uri());
        let bundle = service.refresh_access_token("rt-old").await.unwrap();
        assert_eq!(bundle.access_token, "at-2");
        assert_eq!(bundle.refresh_token, "rt-old");
    }

    #[tokio::test]
    async fn refresh_adopts_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-3",
                "refresh_token": "rt-new",
                "expires_in": 1800
            })))
            .mount(&server)
            .await;

        let service = TokenService::with_endpoint(reqwest::Client::new(), server.uri());
        let bundle = service.refresh_access_token("rt-old").await.unwrap();
        assert_eq!(bundle.refresh_token, "rt-new");
    }

    #[tokio::test]
    async fn refresh_surfaces_non_2xx_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let service = TokenService::with_endpoint(reqwest::Client::new(), server.uri());
        let err = service
            .refresh_access_token("rt-dead")
            .await
            .expect_err("400 must fail");
        match err {
            GatewayError::TokenRefreshFailed(msg) => assert!(msg.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
