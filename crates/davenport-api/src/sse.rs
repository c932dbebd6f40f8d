//! Server-sent event framing for streamed chat turns.
//!
//! Each [`StreamEvent`] becomes one `data: <json>\n\n` frame with no
//! `event:` line; clients dispatch on the JSON `type` field.

use std::convert::Infallible;
use std::time::Duration;

use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::warn;

use davenport_chat::ChatEventStream;
use davenport_core::types::StreamEvent;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub fn frame(event: &StreamEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        warn!(error = %e, kind = event.kind(), "Failed to encode stream event");
        Event::default().data(r#"{"type":"error","text":"failed to encode event"}"#)
    })
}

/// Turn a chat event stream into a `text/event-stream` response with
/// caching and proxy buffering disabled.
pub fn chat_event_response(events: ChatEventStream, keep_alive: Duration) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(frame(&event)));
    let sse = Sse::new(frames).keep_alive(KeepAlive::new().interval(keep_alive));

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        sse,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_response_headers_and_frames() {
        let events: ChatEventStream = stream::iter(vec![
            StreamEvent::Session {
                conversation_id: "conv_1".to_string(),
            },
            StreamEvent::Delta {
                text: "Foo".to_string(),
            },
        ])
        .boxed();

        let resp = chat_event_response(events, Duration::from_secs(15));
        let headers = resp.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            text,
            "data: {\"type\":\"session\",\"conversation_id\":\"conv_1\"}\n\n\
             data: {\"type\":\"delta\",\"text\":\"Foo\"}\n\n"
        );
    }
}
