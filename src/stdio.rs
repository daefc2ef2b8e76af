//! JSON-lines transport for the service API.
//!
//! Each stdin line is one request object, optionally carrying a numeric `id`.
//! Responses are written as `{"id": .., "response": ..}`; events are written
//! as they are emitted, in their own wire format. Requests run as separate
//! tasks, so a `cancel_translation` is answered while a `translate` is still
//! streaming.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SettingsStore;
use crate::error::{ParatransError, Result};
use crate::events::{EventSink, SinkError, TranslationEvent};
use crate::service::{Request, Response, TranslationService};

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response {
        id: Option<u64>,
        response: Response,
    },
    Event(TranslationEvent),
}

/// Forwards job events to the output writer.
struct OutboundSink(mpsc::UnboundedSender<Outbound>);

impl EventSink for OutboundSink {
    fn emit(&self, event: TranslationEvent) -> std::result::Result<(), SinkError> {
        self.0
            .send(Outbound::Event(event))
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Split a request line into its envelope id and the request itself.
pub fn parse_envelope(line: &str) -> (Option<u64>, std::result::Result<Request, String>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return (None, Err(format!("Invalid JSON: {}", e))),
    };
    let id = value.get("id").and_then(Value::as_u64);

    let request = serde_json::from_value::<Request>(value).map_err(|e| {
        if e.to_string().contains("unknown variant") {
            "Unknown action".to_string()
        } else {
            format!("Invalid request: {}", e)
        }
    });
    (id, request)
}

pub struct StdioServer {
    service: Arc<TranslationService>,
    tx: mpsc::UnboundedSender<Outbound>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl StdioServer {
    pub fn new(store: SettingsStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = OutboundSink(tx.clone());
        let service = Arc::new(TranslationService::new(store, Arc::new(sink)));
        Self { service, tx, rx }
    }

    pub fn service(&self) -> &Arc<TranslationService> {
        &self.service
    }

    /// Serve requests from `input` until it closes, then wait for running
    /// requests and return the writer once every message is flushed.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { service, tx, rx } = self;
        let writer = tokio::spawn(write_outbound(rx, output));

        let mut lines = input.lines();
        let mut requests = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (id, request) = parse_envelope(line);
            let request = match request {
                Ok(request) => request,
                Err(message) => {
                    warn!("Rejected request line: {}", message);
                    if tx
                        .send(Outbound::Response {
                            id,
                            response: Response::error(message),
                        })
                        .is_err()
                    {
                        debug!("Output closed before response {:?}", id);
                    }
                    continue;
                }
            };

            let service = service.clone();
            let tx = tx.clone();
            requests.spawn(async move {
                let response = service.handle(request).await;
                if tx.send(Outbound::Response { id, response }).is_err() {
                    debug!("Output closed before response {:?}", id);
                }
            });
        }

        info!("Input closed, waiting for {} running requests", requests.len());
        while let Some(joined) = requests.join_next().await {
            if let Err(e) = joined {
                warn!("Request task failed: {}", e);
            }
        }

        // The writer stops once every sender, including the service's sink,
        // is gone.
        drop(service);
        drop(tx);

        writer
            .await
            .map_err(|e| ParatransError::Io(std::io::Error::other(e)))?
    }
}

async fn write_outbound<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut output: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_for(endpoint: &str, dir: &TempDir) -> SettingsStore {
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            format!(
                "[global]\ntarget_lang = \"fr\"\nollama_url = \"{}\"\n\n[client]\nmax_retries = 0\nprobe_timeout_ms = 500\n",
                endpoint
            ),
        )
        .unwrap();
        SettingsStore::open(&path).unwrap()
    }

    fn output_lines(output: Vec<u8>) -> Vec<Value> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn response_with_id(lines: &[Value], id: u64) -> Value {
        lines
            .iter()
            .find(|l| l["id"] == json!(id))
            .map(|l| l["response"].clone())
            .unwrap_or_else(|| panic!("no response with id {}", id))
    }

    #[test]
    fn test_parse_envelope() {
        let (id, request) = parse_envelope(r#"{"id":7,"action":"get_models"}"#);
        assert_eq!(id, Some(7));
        assert_eq!(request, Ok(Request::GetModels));

        let (id, request) = parse_envelope(r#"{"action":"get_settings","domain":"example.com"}"#);
        assert_eq!(id, None);
        assert_eq!(
            request,
            Ok(Request::GetSettings {
                domain: Some("example.com".to_string())
            })
        );

        let (id, request) = parse_envelope(r#"{"id":3,"action":"reload"}"#);
        assert_eq!(id, Some(3));
        assert_eq!(request, Err("Unknown action".to_string()));

        assert!(parse_envelope("{not json").1.is_err());
    }

    #[tokio::test]
    async fn test_closed_output_ends_with_error() {
        let dir = TempDir::new().unwrap();
        let server = StdioServer::new(store_for("http://127.0.0.1:1", &dir));
        let (output, reader) = tokio::io::duplex(64);
        drop(reader);

        let input = "garbage\n{\"id\":1,\"action\":\"bogus\"}\n{\"id\":2,\"action\":\"get_settings\"}\n";
        let result = server.run(input.as_bytes(), output).await;

        assert!(matches!(result, Err(ParatransError::Io(_))));
    }

    #[tokio::test]
    async fn test_answers_each_request_by_id() {
        let dir = TempDir::new().unwrap();
        let server = StdioServer::new(store_for("http://127.0.0.1:1", &dir));

        let input = "{\"id\":1,\"action\":\"get_settings\"}\n\n\
                     {\"id\":2,\"action\":\"bogus\"}\n\
                     {\"id\":3,\"action\":\"cancel_translation\"}\n\
                     garbage\n";
        let output = server.run(input.as_bytes(), Vec::new()).await.unwrap();
        let lines = output_lines(output);

        assert_eq!(lines.len(), 4);
        assert_eq!(response_with_id(&lines, 1)["target_lang"], "fr");
        assert_eq!(response_with_id(&lines, 1)["auto_translate"], false);
        assert_eq!(response_with_id(&lines, 2), json!({"error": "Unknown action"}));
        assert_eq!(response_with_id(&lines, 3), json!({"success": true}));
        assert!(lines.iter().any(|l| l["id"].is_null() && l["response"]["error"].is_string()));
    }

    #[tokio::test]
    async fn test_translate_writes_events_then_response() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body("{\"message\":{\"content\":\"Bon\"}}\n{\"message\":{\"content\":\"jour\"}}\n")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let stdio = StdioServer::new(store_for(&server.url(), &dir));

        let input = r#"{"id":9,"action":"translate","paragraphs":[{"id":"p1","text":"Hello"}],"target_lang":"fr"}"#;
        let output = stdio.run(input.as_bytes(), Vec::new()).await.unwrap();
        let lines = output_lines(output);

        assert_eq!(lines.first(), Some(&json!({"action": "progress", "current": 1, "total": 1})));
        assert!(lines.contains(&json!({
            "action": "translation_chunk",
            "paragraph_id": "p1",
            "text": "Bonjour",
            "done": true
        })));
        assert_eq!(
            lines.last(),
            Some(&json!({"id": 9, "response": {"success": true, "cancelled": false}}))
        );
    }
}
