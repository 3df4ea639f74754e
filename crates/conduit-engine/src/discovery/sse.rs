//! MCP over a server-sent event stream.
//!
//! Requests are POSTed to the endpoint the server announces first; replies
//! arrive on the event stream and are matched by JSON-RPC id.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    initialize_request, initialized_notification, reply_for, tools_list_request, DiscoveryClient,
    DiscoveryError, INITIALIZE_ID, TOOLS_LIST_ID,
};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Line reader over a chunked body with a per-read timeout.
struct EventLines {
    inner: ByteStream,
    buf: Vec<u8>,
    read_timeout: Duration,
}

impl EventLines {
    fn new(inner: ByteStream, read_timeout: Duration) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            read_timeout,
        }
    }

    async fn next_line(&mut self) -> Result<String, DiscoveryError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }
            let chunk = tokio::time::timeout(self.read_timeout, self.inner.next())
                .await
                .map_err(|_| DiscoveryError::Timeout("event stream"))?;
            match chunk {
                Some(bytes) => self.buf.extend_from_slice(&bytes?),
                None => return Err(DiscoveryError::Closed),
            }
        }
    }

    /// The first `data:` line that looks like a path or URL.
    async fn endpoint(&mut self, max_lines: usize) -> Result<String, DiscoveryError> {
        for _ in 0..max_lines {
            let line = self.next_line().await?;
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.starts_with('/') || data.starts_with("http") {
                    return Ok(data.to_string());
                }
            }
        }
        Err(DiscoveryError::NoEndpoint)
    }

    /// Scan up to `max_lines` lines for the reply to `id`, discarding others.
    async fn reply(&mut self, id: u64, max_lines: usize) -> Result<Value, DiscoveryError> {
        for _ in 0..max_lines {
            let line = self.next_line().await?;
            if let Some(data) = line.strip_prefix("data:") {
                if let Some(reply) = reply_for(data, id) {
                    return Ok(reply);
                }
            }
        }
        Err(DiscoveryError::NoReply(id))
    }
}

/// POST without waiting for the response, so the event stream keeps being
/// read while the server handles the request.
fn post_detached(client: &DiscoveryClient, endpoint: &Url, body: Value) {
    let request = client
        .http
        .post(endpoint.clone())
        .timeout(client.read_timeout)
        .json(&body);
    tokio::spawn(async move {
        if let Err(e) = request.send().await.and_then(|r| r.error_for_status()) {
            debug!(error = %e, "mcp request post failed");
        }
    });
}

pub(super) async fn list_tools(
    client: &DiscoveryClient,
    url: &str,
) -> Result<Value, DiscoveryError> {
    let base = Url::parse(url)?;
    let response = tokio::time::timeout(
        client.read_timeout,
        client
            .http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send(),
    )
    .await
    .map_err(|_| DiscoveryError::Timeout("event stream connect"))??
    .error_for_status()?;

    let mut lines = EventLines::new(Box::pin(response.bytes_stream()), client.read_timeout);
    let endpoint = base.join(&lines.endpoint(client.max_scan_lines).await?)?;
    debug!(%endpoint, "mcp message endpoint");

    post_detached(client, &endpoint, initialize_request());
    lines.reply(INITIALIZE_ID, client.max_scan_lines).await?;

    client
        .http
        .post(endpoint.clone())
        .timeout(client.read_timeout)
        .json(&initialized_notification())
        .send()
        .await?
        .error_for_status()?;

    post_detached(client, &endpoint, tools_list_request());
    lines.reply(TOOLS_LIST_ID, client.max_scan_lines).await
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::sse::{Event as SseEvent, Sse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use conduit_settings::McpServerConfig;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeServer {
        outbox: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
        received: Arc<Mutex<Vec<String>>>,
        endpoint: &'static str,
    }

    async fn open_stream(
        State(server): State<FakeServer>,
    ) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *server.outbox.lock() = Some(tx);
        let endpoint = server.endpoint;
        Sse::new(async_stream::stream! {
            yield Ok(SseEvent::default().event("endpoint").data(endpoint));
            while let Some(msg) = rx.recv().await {
                yield Ok(SseEvent::default().event("message").data(msg));
            }
        })
    }

    async fn receive(State(server): State<FakeServer>, Json(body): Json<Value>) -> StatusCode {
        let method = body["method"].as_str().unwrap_or_default().to_string();
        server.received.lock().push(method.clone());
        let outbox = server.outbox.lock().clone();
        if let Some(tx) = outbox {
            match body.get("id").and_then(Value::as_u64) {
                Some(1) => {
                    let reply = json!({"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}});
                    let _ = tx.send(reply.to_string());
                }
                Some(2) => {
                    // unrelated traffic first
                    let _ = tx.send(json!({"jsonrpc":"2.0","id":7,"result":{}}).to_string());
                    let _ = tx.send("not json".to_string());
                    let _ = tx.send(
                        json!({"jsonrpc":"2.0","id":2,"result":{"tools":[
                            {"name":"search","description":"Search the web"},
                            {"name":"fetch","description":"Fetch a page"}
                        ]}})
                        .to_string(),
                    );
                }
                _ => {}
            }
        }
        StatusCode::ACCEPTED
    }

    async fn spawn_server(endpoint: &'static str) -> (String, FakeServer) {
        let server = FakeServer {
            endpoint,
            ..FakeServer::default()
        };
        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages", post(receive))
            .with_state(server.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/sse"), server)
    }

    fn client() -> DiscoveryClient {
        DiscoveryClient::with_limits(Duration::from_secs(2), Duration::from_secs(2), 200)
    }

    #[tokio::test]
    async fn discovers_tools_over_event_stream() {
        let (url, server) = spawn_server("/messages?sessionId=abc").await;
        let tools = client().discover("srv", &McpServerConfig::sse(url)).await;

        let names: Vec<String> = tools.iter().map(|t| t.qualified_name()).collect();
        assert_eq!(names, vec!["mcp__srv__search", "mcp__srv__fetch"]);
        assert_eq!(tools[0].description, "Search the web");

        let received = server.received.lock().clone();
        assert_eq!(received, vec!["initialize", "notifications/initialized", "tools/list"]);
    }

    #[tokio::test]
    async fn server_without_endpoint_yields_nothing() {
        let (url, _server) = spawn_server("waiting").await;
        let client = DiscoveryClient::with_limits(
            Duration::from_secs(1),
            Duration::from_millis(300),
            200,
        );
        assert!(client.discover("srv", &McpServerConfig::sse(url)).await.is_empty());
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_joined() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"event: endpoint\ndata: /mes")),
            Ok(Bytes::from_static(b"sages\n\ndata: {\"id\":1,")),
            Ok(Bytes::from_static(b"\"result\":{}}\r\n")),
        ];
        let mut lines = EventLines::new(
            Box::pin(futures::stream::iter(chunks)),
            Duration::from_secs(1),
        );
        assert_eq!(lines.endpoint(10).await.unwrap(), "/messages");
        let reply = lines.reply(1, 10).await.unwrap();
        assert_eq!(reply["result"], json!({}));
        assert!(matches!(lines.next_line().await, Err(DiscoveryError::Closed)));
    }

    #[tokio::test]
    async fn reply_scan_is_bounded() {
        let noise: Vec<reqwest::Result<Bytes>> = (0..50)
            .map(|i| Ok(Bytes::from(format!("data: {{\"id\":{}}}\n", 100 + i))))
            .collect();
        let source = Box::pin(futures::stream::iter(noise));
        let mut lines = EventLines::new(source, Duration::from_secs(1));
        assert!(matches!(lines.reply(2, 10).await, Err(DiscoveryError::NoReply(2))));
    }
}
