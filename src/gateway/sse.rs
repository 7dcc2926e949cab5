//! SSE handling for the upstream responses stream. Streaming callers get
//! the body passed through untouched; non-streaming callers get the stream
//! collapsed into the single final response object.

use bytes::Bytes;
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::interceptor::{UpstreamBody, UpstreamResponse};
use crate::error::{GatewayError, GatewayResult};

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Scans accumulated SSE text for the first completion event and returns its
/// `response` payload.
pub fn extract_final_response(raw: &str) -> Option<Value> {
    for line in raw.split('\n') {
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        match event.get("type").and_then(Value::as_str) {
            Some("response.done") | Some("response.completed") => {
                if let Some(response) = event.get("response") {
                    return Some(response.clone());
                }
            }
            _ => {}
        }
    }
    None
}

/// Applies the caller's streaming preference to a successful upstream
/// response.
pub async fn finalize_response(
    response: UpstreamResponse,
    is_stream: bool,
    cancel: &CancellationToken,
) -> GatewayResult<UpstreamResponse> {
    if is_stream {
        let mut response = response;
        if !response.headers.contains_key(CONTENT_TYPE) {
            response.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
            );
        }
        return Ok(response);
    }

    let UpstreamResponse {
        status,
        mut headers,
        body,
    } = response;
    let raw = drain_to_string(body, cancel).await?;

    match extract_final_response(&raw) {
        Some(final_response) => {
            debug!("collapsed SSE stream into final response object");
            headers.remove(http::header::CONTENT_LENGTH);
            headers.remove(http::header::TRANSFER_ENCODING);
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            let bytes = Bytes::from(serde_json::to_vec(&final_response).unwrap_or_default());
            Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Buffered(bytes),
            })
        }
        None => {
            // No completion event; hand back whatever the upstream said.
            headers.remove(http::header::CONTENT_LENGTH);
            headers.remove(http::header::TRANSFER_ENCODING);
            Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Buffered(Bytes::from(raw)),
            })
        }
    }
}

async fn drain_to_string(body: UpstreamBody, cancel: &CancellationToken) -> GatewayResult<String> {
    match body {
        UpstreamBody::Buffered(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        UpstreamBody::Stream(mut stream) => {
            let mut collected = Vec::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => collected.extend_from_slice(&bytes),
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    },
                }
            }
            Ok(String::from_utf8_lossy(&collected).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;

    fn stream_body(chunks: Vec<&'static str>) -> UpstreamBody {
        UpstreamBody::Stream(Box::pin(futures::stream::iter(
            chunks.into_iter().map(|chunk| Ok(Bytes::from_static(chunk.as_bytes()))),
        )))
    }

    fn response(body: UpstreamBody) -> UpstreamResponse {
        UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    #[test]
    fn extracts_first_completion_event() {
        let raw = concat!(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\"}}\n",
            "data: {\"type\":\"response.done\",\"response\":{\"id\":\"r2\"}}\n",
        );
        let response = extract_final_response(raw).unwrap();
        assert_eq!(response["id"], "r1");
    }

    #[test]
    fn ignores_non_data_lines_and_bad_json() {
        let raw = concat!(
            ": heartbeat\n",
            "event: something\n",
            "data: not json\n",
            "data: {\"type\":\"response.done\",\"response\":{\"ok\":true}}\n",
        );
        let response = extract_final_response(raw).unwrap();
        assert_eq!(response["ok"], true);
    }

    #[test]
    fn no_completion_event_yields_none() {
        assert!(extract_final_response("data: {\"type\":\"response.created\"}\n").is_none());
        assert!(extract_final_response("").is_none());
    }

    #[tokio::test]
    async fn non_streaming_collapses_to_json() {
        let final_obj = json!({ "id": "resp_1", "output": [] });
        let frame = format!(
            "data: {}\n",
            json!({ "type": "response.completed", "response": final_obj }),
        );
        let leaked: &'static str = Box::leak(frame.into_boxed_str());
        let cancel = CancellationToken::new();
        let result = finalize_response(response(stream_body(vec![leaked])), false, &cancel)
            .await
            .unwrap();

        assert_eq!(
            result.headers.get(CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );
        let UpstreamBody::Buffered(bytes) = result.body else {
            panic!("expected buffered body");
        };
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, final_obj);
    }

    #[tokio::test]
    async fn missing_completion_falls_back_to_raw_text() {
        let cancel = CancellationToken::new();
        let result = finalize_response(
            response(stream_body(vec!["data: {\"type\":\"response.created\"}\n"])),
            false,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        let UpstreamBody::Buffered(bytes) = result.body else {
            panic!("expected buffered body");
        };
        assert!(String::from_utf8_lossy(&bytes).contains("response.created"));
    }

    #[tokio::test]
    async fn streaming_passthrough_gets_content_type_when_absent() {
        let cancel = CancellationToken::new();
        let result = finalize_response(response(stream_body(vec!["data: x\n"])), true, &cancel)
            .await
            .unwrap();
        assert_eq!(
            result.headers.get(CONTENT_TYPE).unwrap(),
            EVENT_STREAM_CONTENT_TYPE
        );
        assert!(matches!(result.body, UpstreamBody::Stream(_)));
    }

    #[tokio::test]
    async fn streaming_passthrough_keeps_existing_content_type() {
        let mut upstream = response(stream_body(vec!["data: x\n"]));
        upstream
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        let cancel = CancellationToken::new();
        let result = finalize_response(upstream, true, &cancel).await.unwrap();
        assert_eq!(result.headers.get(CONTENT_TYPE).unwrap(), "text/event-stream");
    }

    #[tokio::test]
    async fn cancellation_aborts_the_drain() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pending = UpstreamBody::Stream(Box::pin(futures::stream::pending()));
        let err = finalize_response(response(pending), false, &cancel)
            .await
            .expect_err("cancelled drain must fail");
        assert!(matches!(err, GatewayError::Cancelled));
    }

    #[tokio::test]
    async fn multi_chunk_frames_reassemble() {
        let cancel = CancellationToken::new();
        let result = finalize_response(
            response(stream_body(vec![
                "data: {\"type\":\"respon",
                "se.done\",\"response\":{\"id\":\"r9\"}}\n",
            ])),
            false,
            &cancel,
        )
        .await
        .unwrap();
        let UpstreamBody::Buffered(bytes) = result.body else {
            panic!("expected buffered body");
        };
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["id"], "r9");
    }
}
