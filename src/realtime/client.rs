use anyhow::{Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::messages::ClientEvent;

const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
const AZURE_REALTIME_PATH: &str = "/openai/realtime";
const AZURE_API_VERSION: &str = "2024-10-01-preview";

/// Which service hosts the realtime model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    OpenAi { model: String },
    Azure { endpoint: String, deployment: String },
}

/// Opaque credentials for the realtime endpoint
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub endpoint: Endpoint,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Credentials {
    /// WebSocket URL for this endpoint
    pub fn url(&self) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { model } => format!("{}?model={}", OPENAI_REALTIME_URL, model),
            Endpoint::Azure {
                endpoint,
                deployment,
            } => azure_url(endpoint, deployment),
        }
    }

    /// Authentication headers for this endpoint
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match &self.endpoint {
            Endpoint::OpenAi { .. } => vec![
                ("Authorization", format!("Bearer {}", self.api_key)),
                ("OpenAI-Beta", "realtime=v1".to_string()),
            ],
            Endpoint::Azure { .. } => vec![("api-key", self.api_key.clone())],
        }
    }
}

fn azure_url(endpoint: &str, deployment: &str) -> String {
    let endpoint = endpoint.trim();
    let endpoint = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        endpoint.to_string()
    };

    let (base, query) = match endpoint.split_once('?') {
        Some((base, query)) => (base.trim_end_matches('/').to_string(), query.to_string()),
        None => (endpoint.trim_end_matches('/').to_string(), String::new()),
    };

    let base = if base.ends_with(AZURE_REALTIME_PATH) {
        base
    } else {
        format!("{}{}", base, AZURE_REALTIME_PATH)
    };

    let mut params: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if !params.iter().any(|p| p.starts_with("api-version=")) {
        params.push(format!("api-version={}", AZURE_API_VERSION));
    }
    if !params.iter().any(|p| p.starts_with("deployment=")) {
        params.push(format!("deployment={}", deployment));
    }

    format!("{}?{}", base, params.join("&"))
}

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket is not open")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bidirectional message channel to the realtime endpoint
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Send one client event
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError>;

    /// Next inbound text message; `None` once the transport has closed
    async fn recv(&self) -> Option<Result<String, TransportError>>;

    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Establishes a transport for a session
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn RealtimeTransport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Connect to the realtime endpoint
    pub async fn connect(credentials: &Credentials) -> Result<Self> {
        let url = credentials.url();
        info!("Connecting to realtime endpoint at {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .context("Invalid realtime endpoint URL")?;
        for (name, value) in credentials.headers() {
            let value = HeaderValue::from_str(&value).context("Invalid header value")?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _) = connect_async(request)
            .await
            .context("Failed to connect to realtime endpoint")?;

        info!("Connected to realtime endpoint successfully");

        let (sink, stream) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        })
    }

    fn classify(&self, err: tungstenite::Error) -> TransportError {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                self.closed.store(true, Ordering::SeqCst);
                TransportError::Closed
            }
            other => TransportError::Send(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let payload = serde_json::to_string(event)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(|e| self.classify(e))
    }

    async fn recv(&self) -> Option<Result<String, TransportError>> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => info!("Realtime socket closed: {} {}", frame.code, frame.reason),
                        None => info!("Realtime socket closed"),
                    }
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    if matches!(
                        e,
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
                    ) {
                        self.closed.store(true, Ordering::SeqCst);
                        return None;
                    }
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing realtime socket");
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector producing WebSocket transports
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait::async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn RealtimeTransport>> {
        let transport = WebSocketTransport::connect(credentials).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure(endpoint: &str) -> Credentials {
        Credentials {
            api_key: "secret".to_string(),
            endpoint: Endpoint::Azure {
                endpoint: endpoint.to_string(),
                deployment: "gpt-4o-realtime-preview".to_string(),
            },
        }
    }

    #[test]
    fn test_openai_url() {
        let creds = Credentials {
            api_key: "secret".to_string(),
            endpoint: Endpoint::OpenAi {
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            },
        };
        assert_eq!(
            creds.url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
        );
        assert_eq!(creds.headers()[0].1, "Bearer secret");
    }

    #[test]
    fn test_azure_url_from_bare_host() {
        assert_eq!(
            azure("https://example.openai.azure.com/").url(),
            "wss://example.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_azure_url_keeps_existing_query() {
        assert_eq!(
            azure("https://example.openai.azure.com/openai/realtime?api-version=2025-01-01&deployment=mine").url(),
            "wss://example.openai.azure.com/openai/realtime?api-version=2025-01-01&deployment=mine"
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let printed = format!("{:?}", azure("https://example.openai.azure.com"));
        assert!(!printed.contains("secret"));
    }
}
