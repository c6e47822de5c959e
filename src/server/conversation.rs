use crate::error::RelayError;
use crate::models::chat::ConversationRequest;
use crate::relay::sse::DONE_SENTINEL;
use crate::relay::{ ChunkStream, RelayOutput };
use crate::server::api::{ error_response, AppState };
use std::convert::Infallible;
use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, State },
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
    Json,
};
use bytes::Bytes;
use futures::{ stream, Stream, StreamExt };
use log::{ debug, error, info, warn };
use tokio_util::sync::DropGuard;
use uuid::Uuid;

fn sse_frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", data))
}

enum Frames<S> {
    Open {
        chunks: S,
        _guard: DropGuard,
        sent: usize,
    },
    Closed,
}

/// Re-frames decoded chunks for the browser and appends `[DONE]` when the upstream
/// sequence finishes. A read error ends the body without the marker.
fn sse_body<S>(
    request_id: Uuid,
    chunks: S,
    guard: DropGuard
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
    where S: Stream<Item = Result<String, RelayError>> + Send + Unpin + 'static
{
    let start = Frames::Open { chunks, _guard: guard, sent: 0 };
    stream::unfold(start, move |state| async move {
        let Frames::Open { mut chunks, _guard, sent } = state else {
            return None;
        };
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let next = Frames::Open { chunks, _guard, sent: sent + 1 };
                Some((Ok::<_, Infallible>(sse_frame(&chunk)), next))
            }
            Some(Err(e)) => {
                error!("[{}] Stream interrupted after {} chunk(s): {}", request_id, sent, e);
                None
            }
            None => {
                debug!("[{}] Stream finished after {} chunk(s)", request_id, sent);
                Some((Ok::<_, Infallible>(sse_frame(DONE_SENTINEL)), Frames::Closed))
            }
        }
    })
}

/// Waits for the first chunk so a failure before anything is relayed becomes a
/// plain error response instead of an empty event stream.
async fn streaming_response(
    request_id: Uuid,
    mut chunks: ChunkStream,
    guard: DropGuard
) -> Response {
    let first = match chunks.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => {
            error!("[{}] Stream failed before the first chunk: {}", request_id, e);
            return error_response(e.status_code(), e.to_string());
        }
        None => None,
    };

    let chunks = stream::iter(first.map(Ok)).chain(chunks);
    let body = Body::from_stream(sse_body(request_id, chunks, guard));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    ).into_response()
}

fn complete_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub async fn conversation_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConversationRequest>, JsonRejection>
) -> Response {
    let request_id = Uuid::new_v4();

    if !state.settings.enabled {
        warn!("[{}] Rejected conversation request: Foundry is not enabled", request_id);
        return error_response(StatusCode::BAD_REQUEST, "Foundry is not enabled");
    }

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("[{}] Invalid request body: {}", request_id, rejection.body_text());
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text())
            );
        }
    };

    if request.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "messages is required");
    }

    info!(
        "[{}] Conversation request with {} message(s), stream={}",
        request_id,
        request.messages.len(),
        request.stream
    );

    // Cancelled on shutdown through the parent, or when the response body is dropped.
    let cancel = state.shutdown.child_token();
    match state.client.forward(&request.messages, request.stream, cancel.clone()).await {
        Ok(RelayOutput::Stream(chunks)) => {
            streaming_response(request_id, chunks, cancel.drop_guard()).await
        }
        Ok(RelayOutput::Complete(body)) => {
            debug!("[{}] Relaying {} byte response", request_id, body.len());
            complete_response(body)
        }
        Err(e) => {
            error!("[{}] Error during conversation with Foundry: {}", request_id, e);
            error_response(e.status_code(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialSource;
    use crate::config::FoundrySettings;
    use crate::models::chat::ChatMessage;
    use crate::relay::foundry::tests::stalled_error_upstream;
    use crate::relay::FoundryClient;
    use crate::relay::AgentClient;
    use crate::server::api::build_router;
    use crate::server::api::tests::{ body_string, foundry_state, settings, state_with };
    use async_trait::async_trait;
    use axum::http::Request;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::io;
    use std::sync::{ Arc, Mutex };
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const RESPONSES_PATH: &str = "/api/projects/proj/applications/app/protocols/openai/responses";

    fn post_json(body: &str) -> Request<Body> {
        Request::post("/api/conversation")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_message(response: Response) -> String {
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    /// Streams the given lines, then fails the read.
    struct BrokenStreamClient {
        before_failure: &'static [u8],
    }

    #[async_trait]
    impl AgentClient for BrokenStreamClient {
        async fn forward(
            &self,
            _messages: &[ChatMessage],
            _stream: bool,
            cancel: CancellationToken
        ) -> Result<RelayOutput, RelayError> {
            let parts: Vec<io::Result<Bytes>> = vec![
                Ok(Bytes::from_static(self.before_failure)),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            ];
            Ok(RelayOutput::Stream(ChunkStream::from_bytes(stream::iter(parts), cancel)))
        }
    }

    /// Keeps the token handed to it so tests can observe cancellation.
    #[derive(Default)]
    struct RecordingClient {
        token: Mutex<Option<CancellationToken>>,
    }

    #[async_trait]
    impl AgentClient for RecordingClient {
        async fn forward(
            &self,
            _messages: &[ChatMessage],
            _stream: bool,
            cancel: CancellationToken
        ) -> Result<RelayOutput, RelayError> {
            *self.token.lock().unwrap() = Some(cancel);
            Ok(RelayOutput::Stream(ChunkStream::from_chunks(vec!["x".into()])))
        }
    }

    #[tokio::test]
    async fn disabled_relay_rejects_without_contacting_upstream() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.any_request();
            then.status(200);
        }).await;
        let app = build_router(foundry_state(false, &server.base_url()), None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, "Foundry is not enabled");
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let app = build_router(foundry_state(true, "http://127.0.0.1:9"), None);
        let response = app.oneshot(post_json(r#"{"messages":[]}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, "messages is required");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let app = build_router(foundry_state(true, "http://127.0.0.1:9"), None);
        let response = app.oneshot(post_json("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_message(response).await.starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn streams_chunks_as_sse_and_terminates_with_done() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST)
                .path(RESPONSES_PATH)
                .json_body(serde_json::json!({ "input": "hi", "stream": true }));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: A\n\ndata: B\n\ndata: [DONE]\n\n");
        }).await;
        let app = build_router(foundry_state(true, &server.base_url()), None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(body_string(response).await, "data: A\n\ndata: B\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn non_streaming_body_is_passed_through() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST)
                .path(RESPONSES_PATH)
                .json_body(serde_json::json!({ "input": "hi", "stream": false }));
            then.status(200).body(r#"{"x":1}"#);
        }).await;
        let app = build_router(foundry_state(true, &server.base_url()), None);

        let response = app
            .oneshot(
                post_json(r#"{"messages":[{"role":"user","content":"hi"}],"stream":false}"#)
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_string(response).await, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn missing_user_message_is_bad_request() {
        let app = build_router(foundry_state(true, "http://127.0.0.1:9"), None);
        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"assistant","content":"hello"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, "no user message found");
    }

    #[tokio::test]
    async fn upstream_failure_is_internal_error() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path(RESPONSES_PATH);
            then.status(502).body("bad gateway");
        }).await;
        let app = build_router(foundry_state(true, &server.base_url()), None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let message = error_message(response).await;
        assert!(message.contains("502"));
        assert!(message.contains("bad gateway"));
    }

    #[tokio::test]
    async fn mid_stream_failure_truncates_without_done() {
        let client = BrokenStreamClient { before_failure: b"data: A\n" };
        let state = state_with(settings(true, "http://127.0.0.1:9"), Arc::new(client));
        let app = build_router(state, None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "data: A\n\n");
    }

    #[tokio::test]
    async fn failure_before_first_chunk_is_error_response() {
        let client = BrokenStreamClient { before_failure: b"" };
        let state = state_with(settings(true, "http://127.0.0.1:9"), Arc::new(client));
        let app = build_router(state, None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert!(error_message(response).await.contains("reset"));
    }

    #[tokio::test]
    async fn empty_upstream_stream_still_sends_done() {
        let client = BrokenStreamClient { before_failure: b"data: [DONE]\n" };
        let state = state_with(settings(true, "http://127.0.0.1:9"), Arc::new(client));
        let app = build_router(state, None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn stalled_upstream_error_body_ends_in_timeout_response() {
        let settings = Arc::new(FoundrySettings {
            enabled: true,
            project: "proj".into(),
            application: "app".into(),
            endpoint: stalled_error_upstream().await,
            response_timeout_secs: 1,
            ..Default::default()
        });
        let client = FoundryClient::new(
            reqwest::Client::new(),
            settings.clone(),
            CredentialSource::StaticToken("t".into())
        );
        let app = build_router(state_with(settings, Arc::new(client)), None);

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            app.oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
        ).await
            .expect("handler should answer once the deadline passes")
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error_message(response).await.contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn dropping_the_response_cancels_the_relay() {
        let client = Arc::new(RecordingClient::default());
        let state = state_with(settings(true, "http://127.0.0.1:9"), client.clone());
        let app = build_router(state, None);

        let response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();
        let token = client.token.lock().unwrap().clone().unwrap();
        assert!(!token.is_cancelled());

        drop(response);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_streams() {
        let client = Arc::new(RecordingClient::default());
        let state = state_with(settings(true, "http://127.0.0.1:9"), client.clone());
        let shutdown = state.shutdown.clone();
        let app = build_router(state, None);

        let _response = app
            .oneshot(post_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)).await
            .unwrap();
        shutdown.cancel();

        let token = client.token.lock().unwrap().clone().unwrap();
        assert!(token.is_cancelled());
    }
}
