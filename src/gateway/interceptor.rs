//! The request interceptor: select an account, guarantee a token, rewrite
//! and send, classify failures, rotate, and hand the final response back to
//! the host.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{classify, is_misreported_quota_404};
use super::instructions::InstructionsCatalog;
use super::request_log::RequestLogger;
use super::sse;
use super::transform::Transformer;
use crate::config::PluginConfig;
use crate::constants::{
    CODEX_RESPONSES_PATH_SEGMENT, HEADER_ACCOUNT_ID, HEADER_CONVERSATION_ID, HEADER_OPENAI_BETA,
    HEADER_ORIGINATOR, HEADER_SESSION_ID, MAX_RETRIES, OPENAI_BETA_VALUE, ORIGINATOR_VALUE,
    RESPONSES_PATH_SEGMENT,
};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Account, RateLimitReason};
use crate::pool::{store, AccountManager};
use crate::sinks::HostSinks;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pub enum UpstreamBody {
    Buffered(Bytes),
    Stream(ByteStream),
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            UpstreamBody::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// What the host receives back: the upstream response, possibly with a
/// remapped status and a collapsed body.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn buffered(status: StatusCode, headers: HeaderMap, bytes: Bytes) -> Self {
        Self {
            status,
            headers,
            body: UpstreamBody::Buffered(bytes),
        }
    }

    fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        Self {
            status,
            headers,
            body: UpstreamBody::Stream(Box::pin(response.bytes_stream())),
        }
    }
}

/// A model call as the host hands it over.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
}

/// Swaps the trailing `/responses` segment for the Codex backend route. The
/// rest of the URL, including any query string, is untouched.
fn rewrite_url(url: &str) -> String {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let rewritten = match path.strip_suffix(RESPONSES_PATH_SEGMENT) {
        Some(prefix) => format!("{}{}", prefix, CODEX_RESPONSES_PATH_SEGMENT),
        None => path.to_string(),
    };
    match query {
        Some(query) => format!("{}?{}", rewritten, query),
        None => rewritten,
    }
}

/// Builds the upstream header set from the host's headers: bearer auth for
/// the selected account, the Codex identification headers, and session
/// headers mirroring the prompt cache key. Any host `x-api-key` is dropped.
fn compose_headers(
    original: &HeaderMap,
    account: &Account,
    prompt_cache_key: Option<&str>,
) -> GatewayResult<HeaderMap> {
    let mut headers = original.clone();
    headers.remove("x-api-key");

    let access_token = account
        .access_token
        .as_deref()
        .ok_or_else(|| GatewayError::Config("account has no access token".to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|_| GatewayError::Config("access token is not header-safe".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);

    if let Some(account_id) = account.account_id.as_deref() {
        if let Ok(value) = HeaderValue::from_str(account_id) {
            headers.insert(HeaderName::from_static(HEADER_ACCOUNT_ID), value);
        }
    }
    headers.insert(
        HeaderName::from_static(HEADER_OPENAI_BETA),
        HeaderValue::from_static(OPENAI_BETA_VALUE),
    );
    headers.insert(
        HeaderName::from_static(HEADER_ORIGINATOR),
        HeaderValue::from_static(ORIGINATOR_VALUE),
    );

    match prompt_cache_key.and_then(|key| HeaderValue::from_str(key).ok()) {
        Some(value) => {
            headers.insert(HeaderName::from_static(HEADER_CONVERSATION_ID), value.clone());
            headers.insert(HeaderName::from_static(HEADER_SESSION_ID), value);
        }
        None => {
            headers.remove(HEADER_CONVERSATION_ID);
            headers.remove(HEADER_SESSION_ID);
        }
    }

    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// The gateway facade the host embeds as its fetch function.
pub struct CodexGateway {
    manager: Arc<AccountManager>,
    transformer: Transformer,
    http: reqwest::Client,
    request_logger: RequestLogger,
}

impl CodexGateway {
    pub fn new(config: PluginConfig, sinks: HostSinks) -> Self {
        let http = reqwest::Client::new();
        let manager = Arc::new(AccountManager::new(
            store::storage_path(),
            config.strategy,
            crate::auth::TokenService::new(http.clone()),
            sinks,
        ));
        let transformer = Transformer::new(&config, InstructionsCatalog::default());
        let request_logger = RequestLogger::new(config.request_logging);
        Self {
            manager,
            transformer,
            http,
            request_logger,
        }
    }

    pub(crate) fn with_parts(
        manager: Arc<AccountManager>,
        transformer: Transformer,
        http: reqwest::Client,
        request_logger: RequestLogger,
    ) -> Self {
        Self {
            manager,
            transformer,
            http,
            request_logger,
        }
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        &self.manager
    }

    /// See [`Transformer::set_known_host_prompt`].
    pub fn set_known_host_prompt(&mut self, prompt: Option<String>) {
        self.transformer.set_known_host_prompt(prompt);
    }

    /// Intercepts one outbound model call. Retries rotate accounts on
    /// rate-limit and auth failures up to the retry cap; everything else is
    /// surfaced unchanged.
    pub async fn handle(
        &self,
        request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<UpstreamResponse> {
        let trace_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        let Some((mut index, _)) = self.manager.select_account().await else {
            return Err(GatewayError::NoAccounts(
                "no accounts configured, or every account is disabled".to_string(),
            ));
        };

        // The rewrite happens once; retries resend the same body.
        let outcome = self.transformer.transform(&request.body);
        let url = rewrite_url(&request.url);
        if self.request_logger.is_enabled() {
            let payload = serde_json::from_str(&outcome.body)
                .unwrap_or_else(|_| json!(outcome.body.clone()));
            self.request_logger.dump(&trace_id, "request", &payload).await;
        }

        let mut attempt: u32 = 0;
        loop {
            // S1: make sure the selected account holds a live token.
            let account = loop {
                match self.manager.ensure_access_token(index).await {
                    Some(account) => break account,
                    None => {
                        if attempt >= MAX_RETRIES {
                            return Err(GatewayError::NoAccounts(
                                "token refresh failed for every candidate account".to_string(),
                            ));
                        }
                        attempt += 1;
                        match self.manager.select_account().await {
                            Some((next, _)) => index = next,
                            None => {
                                return Err(GatewayError::NoAccounts(
                                    "no account left to rotate to".to_string(),
                                ))
                            }
                        }
                    }
                }
            };

            // S2: send.
            let headers =
                compose_headers(&request.headers, &account, outcome.prompt_cache_key.as_deref())?;
            debug!(
                "[{}] attempt {} via account #{} ({})",
                trace_id,
                attempt,
                index,
                account.display_label()
            );
            let send = self
                .http
                .post(&url)
                .headers(headers)
                .body(outcome.body.clone())
                .send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                result = send => result?,
            };
            let status = response.status();

            // S3: dispatch.
            if status.is_success() {
                self.manager.record_success(index).await;
                self.request_logger
                    .dump(&trace_id, "response", &json!({ "status": status.as_u16() }))
                    .await;
                let upstream = UpstreamResponse::from_reqwest(response);
                return sse::finalize_response(upstream, outcome.is_stream, cancel).await;
            }

            if matches!(status.as_u16(), 429 | 404 | 503 | 529) {
                let response_headers = response.headers().clone();
                let text = tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    text = response.text() => text.unwrap_or_default(),
                };
                let reason = classify(status.as_u16(), &text);

                if status.as_u16() == 404 && reason == RateLimitReason::Unknown {
                    // A genuine 404: no penalty, no rotation.
                    debug!("[{}] real 404 from upstream, surfacing unchanged", trace_id);
                    return Ok(UpstreamResponse::buffered(
                        status,
                        response_headers,
                        Bytes::from(text),
                    ));
                }

                warn!(
                    "[{}] upstream {} classified as {}",
                    trace_id,
                    status,
                    reason.as_str()
                );
                self.manager.mark_rate_limited(index, reason).await;

                if attempt < MAX_RETRIES {
                    if let Some((next, _)) = self.manager.select_account().await {
                        attempt += 1;
                        index = next;
                        continue;
                    }
                }

                let surfaced_status = if is_misreported_quota_404(status.as_u16(), &text) {
                    StatusCode::TOO_MANY_REQUESTS
                } else {
                    status
                };
                self.request_logger
                    .dump(
                        &trace_id,
                        "response",
                        &json!({ "status": surfaced_status.as_u16(), "reason": reason.as_str() }),
                    )
                    .await;
                return Ok(UpstreamResponse::buffered(
                    surfaced_status,
                    response_headers,
                    Bytes::from(text),
                ));
            }

            if status == StatusCode::UNAUTHORIZED {
                warn!("[{}] upstream 401 on account #{}", trace_id, index);
                self.manager.record_failure(index).await;
                if attempt < MAX_RETRIES {
                    if let Some((next, _)) = self.manager.select_account().await {
                        attempt += 1;
                        index = next;
                        continue;
                    }
                }
                return Ok(UpstreamResponse::from_reqwest(response));
            }

            // Any other status is not ours to handle.
            info!("[{}] surfacing upstream {} unchanged", trace_id, status);
            return Ok(UpstreamResponse::from_reqwest(response));
        }
    }
}
