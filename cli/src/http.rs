// HTTP plumbing shared by every process: the JSON bodies on the wire, a small
// hyper client with a per-request timeout, and the core `Transport` and
// `Directory` traits implemented on top of it.

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request};
use onionnet_core::{Directory, NodeId, RelayDescriptor, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Body of every `POST /message`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

/// Body of `POST /sendMessage` on a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub message: String,
    #[serde(rename = "destinationUserId")]
    pub destination_user_id: NodeId,
}

/// Reply to `GET /getNodeRegistry`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistry {
    pub nodes: Vec<RelayDescriptor>,
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    pub async fn get(&self, url: &str) -> Result<Bytes, TransportError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Body::empty())
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;
        self.exchange(url, request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<Bytes, TransportError> {
        let json = serde_json::to_vec(body)
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;
        self.exchange(url, request).await
    }

    /// Send one request and read the whole reply within the timeout.
    async fn exchange(&self, url: &str, request: Request<Body>) -> Result<Bytes, TransportError> {
        let call = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;

            if !status.is_success() {
                return Err(TransportError::Rejected {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Ok(body)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(url.to_string())),
        }
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Delivers onions and plaintexts as `POST http://<address>/message`
#[derive(Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        let url = format!("http://{}/message", address);
        debug!(%url, size = body.len(), "POST message");
        self.http
            .post_json(&url, &MessageBody { message: body.to_string() })
            .await?;
        Ok(())
    }
}

// ============================================================================
// REGISTRY CLIENT
// ============================================================================

/// Talks to the registry process at `host:port`
#[derive(Clone)]
pub struct RegistryClient {
    address: String,
    http: HttpClient,
}

impl RegistryClient {
    pub fn new(address: impl Into<String>, http: HttpClient) -> Self {
        Self {
            address: address.into(),
            http,
        }
    }

    pub async fn register(&self, descriptor: &RelayDescriptor) -> Result<(), TransportError> {
        let url = format!("http://{}/registerNode", self.address);
        self.http.post_json(&url, descriptor).await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for RegistryClient {
    async fn list_relays(&self) -> Result<Vec<RelayDescriptor>, TransportError> {
        let url = format!("http://{}/getNodeRegistry", self.address);
        let body = self.http.get(&url).await?;
        let registry: NodeRegistry =
            serde_json::from_slice(&body).map_err(|e| TransportError::Rejected {
                status: 200,
                body: format!("Malformed registry reply: {}", e),
            })?;
        Ok(registry.nodes)
    }
}
