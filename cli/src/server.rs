// HTTP surface of the three process kinds: registry, relay and user.
//
// Every process serves `GET /status`. Handlers stay thin: they decode the
// JSON body, call into the core node and map its error to a status code.

use anyhow::{Context, Result};
use onionnet_core::{
    KeyPair, NodeId, OnionMessage, OnionNetError, PortAddressBook, ProtocolError, RelayDescriptor,
    RelayNode, RelayRegistry, TransportError, UserNode,
};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::http::{
    HttpClient, HttpTransport, MessageBody, NodeRegistry, RegistryClient, SendRequest,
};

/// Largest request body any endpoint accepts
const MAX_BODY_BYTES: u64 = 1024 * 1024;

const REGISTER_ATTEMPTS: u32 = 20;
const REGISTER_RETRY_DELAY: Duration = Duration::from_millis(250);

// ============================================================================
// SHARED FILTERS AND REPLIES
// ============================================================================

fn with_state<T: Clone + Send>(
    state: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn status_route() -> impl Filter<Extract = (&'static str,), Error = Rejection> + Clone {
    warp::path!("status").and(warp::get()).map(|| "live")
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn result_reply<T: Serialize>(value: Option<T>) -> warp::reply::Json {
    warp::reply::json(&json!({ "result": value }))
}

fn success_reply() -> warp::reply::Response {
    warp::reply::json(&json!({ "status": "success" })).into_response()
}

fn error_reply(message: String, status: StatusCode) -> warp::reply::Response {
    let body = warp::reply::json(&json!({ "error": message }));
    warp::reply::with_status(body, status).into_response()
}

/// Malformed input is the caller's fault; a dead next hop is a gateway failure.
pub fn status_for(err: &OnionNetError) -> StatusCode {
    match err {
        OnionNetError::Crypto(_) => StatusCode::BAD_REQUEST,
        OnionNetError::Protocol(ProtocolError::InsufficientRelays { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OnionNetError::Protocol(_) => StatusCode::BAD_REQUEST,
        OnionNetError::Transport(TransportError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        OnionNetError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub fn registry_routes(
    registry: Arc<RelayRegistry>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let register = warp::path!("registerNode")
        .and(warp::post())
        .and(json_body())
        .and(with_state(registry.clone()))
        .and_then(handle_register);

    let list = warp::path!("getNodeRegistry")
        .and(warp::get())
        .and(with_state(registry))
        .map(|registry: Arc<RelayRegistry>| {
            warp::reply::json(&NodeRegistry { nodes: registry.list() })
        });

    status_route().or(register).or(list)
}

async fn handle_register(
    descriptor: RelayDescriptor,
    registry: Arc<RelayRegistry>,
) -> Result<warp::reply::Response, Rejection> {
    match registry.register(descriptor) {
        Ok(()) => Ok(success_reply()),
        Err(e) => {
            warn!(error = %e, "Registration rejected");
            Ok(error_reply(e.to_string(), StatusCode::BAD_REQUEST))
        }
    }
}

// ============================================================================
// RELAY
// ============================================================================

pub fn relay_routes(
    node: Arc<RelayNode>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let message = warp::path!("message")
        .and(warp::post())
        .and(json_body())
        .and(with_state(node.clone()))
        .and_then(handle_relay_message);

    let encrypted = warp::path!("getLastReceivedEncryptedMessage")
        .and(warp::get())
        .and(with_state(node.clone()))
        .map(|node: Arc<RelayNode>| result_reply(node.observation().last_received_encrypted));

    let decrypted = warp::path!("getLastReceivedDecryptedMessage")
        .and(warp::get())
        .and(with_state(node.clone()))
        .map(|node: Arc<RelayNode>| result_reply(node.observation().last_decrypted));

    let destination = warp::path!("getLastMessageDestination")
        .and(warp::get())
        .and(with_state(node))
        .map(|node: Arc<RelayNode>| result_reply(node.observation().last_destination));

    status_route()
        .or(message)
        .or(encrypted)
        .or(decrypted)
        .or(destination)
}

async fn handle_relay_message(
    body: MessageBody,
    node: Arc<RelayNode>,
) -> Result<warp::reply::Response, Rejection> {
    match node.handle(OnionMessage::from(body.message)).await {
        Ok(_) => Ok(success_reply()),
        Err(e) => Ok(error_reply(e.to_string(), status_for(&e))),
    }
}

// ============================================================================
// USER
// ============================================================================

pub fn user_routes(
    node: Arc<UserNode>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let message = warp::path!("message")
        .and(warp::post())
        .and(json_body())
        .and(with_state(node.clone()))
        .map(|body: MessageBody, node: Arc<UserNode>| {
            node.receive(body.message);
            success_reply()
        });

    let send = warp::path!("sendMessage")
        .and(warp::post())
        .and(json_body())
        .and(with_state(node.clone()))
        .and_then(handle_send_message);

    let received = warp::path!("getLastReceivedMessage")
        .and(warp::get())
        .and(with_state(node.clone()))
        .map(|node: Arc<UserNode>| result_reply(node.observation().last_received));

    let sent = warp::path!("getLastSentMessage")
        .and(warp::get())
        .and(with_state(node.clone()))
        .map(|node: Arc<UserNode>| result_reply(node.observation().last_sent));

    let circuit = warp::path!("getLastCircuit")
        .and(warp::get())
        .and(with_state(node))
        .map(|node: Arc<UserNode>| result_reply(node.observation().last_circuit));

    status_route()
        .or(message)
        .or(send)
        .or(received)
        .or(sent)
        .or(circuit)
}

async fn handle_send_message(
    request: SendRequest,
    node: Arc<UserNode>,
) -> Result<warp::reply::Response, Rejection> {
    match node
        .send_message(&request.message, request.destination_user_id)
        .await
    {
        Ok(receipt) => Ok(warp::reply::json(&json!({
            "status": "success",
            "circuitId": receipt.circuit_id.to_string(),
            "relays": receipt.relay_ids,
        }))
        .into_response()),
        Err(e) => {
            warn!(user_id = node.user_id(), error = %e, "Send failed");
            Ok(error_reply(e.to_string(), status_for(&e)))
        }
    }
}

// ============================================================================
// PROCESS START-UP
// ============================================================================

fn http_client(config: &Config) -> HttpClient {
    HttpClient::new(config.request_timeout())
}

/// Claim the listen port up front so a taken port fails start-up.
async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

pub async fn spawn_registry(config: &Config) -> Result<JoinHandle<()>> {
    let addr = config.socket_addr(config.registry_port)?;
    let listener = bind(addr).await?;
    let registry = Arc::new(RelayRegistry::new());

    info!(%addr, "Registry listening");
    Ok(tokio::spawn(async move {
        warp::serve(registry_routes(registry)).incoming(listener).run().await;
    }))
}

/// Start serving, then register with the registry.
///
/// Uses `keys` when given, otherwise generates a fresh pair.
pub async fn spawn_relay(
    config: &Config,
    relay_id: NodeId,
    keys: Option<KeyPair>,
) -> Result<(Arc<RelayNode>, JoinHandle<()>)> {
    let port = config.relay_port(relay_id)?;
    let addr = config.socket_addr(port)?;
    let listener = bind(addr).await?;

    let keys = match keys {
        Some(keys) => keys,
        None => tokio::task::spawn_blocking(KeyPair::generate)
            .await
            .context("Key generation task failed")?
            .context("Failed to generate relay key pair")?,
    };

    let http = http_client(config);
    let registry = RegistryClient::new(config.registry_address(), http.clone());
    let node = Arc::new(RelayNode::new(
        relay_id,
        format!("{}:{}", config.host, port),
        Arc::new(keys),
        Arc::new(registry.clone()),
        Arc::new(PortAddressBook::new(config.host.clone(), config.base_user_port)),
        Arc::new(HttpTransport::new(http)),
    ));

    let routes = relay_routes(node.clone());
    let handle = tokio::spawn(async move {
        warp::serve(routes).incoming(listener).run().await;
    });

    let descriptor = node.descriptor().context("Failed to encode relay public key")?;
    if let Err(e) = register_with_retry(&registry, &descriptor).await {
        handle.abort();
        return Err(e);
    }
    info!(relay_id, %addr, "Relay listening");

    Ok((node, handle))
}

/// The registry may still be starting; keep trying while it is unreachable.
async fn register_with_retry(
    registry: &RegistryClient,
    descriptor: &RelayDescriptor,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match registry.register(descriptor).await {
            Ok(()) => return Ok(()),
            Err(e @ TransportError::Rejected { .. }) => {
                return Err(e).context(format!("Registry refused relay {}", descriptor.relay_id));
            }
            Err(e) if attempt >= REGISTER_ATTEMPTS => {
                return Err(e).context("Registry unreachable");
            }
            Err(e) => {
                warn!(
                    relay_id = descriptor.relay_id,
                    attempt,
                    error = %e,
                    "Registration failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(REGISTER_RETRY_DELAY).await;
            }
        }
    }
}

pub async fn spawn_user(
    config: &Config,
    user_id: NodeId,
) -> Result<(Arc<UserNode>, JoinHandle<()>)> {
    let addr = config.socket_addr(config.user_port(user_id)?)?;
    let listener = bind(addr).await?;

    let http = http_client(config);
    let node = Arc::new(
        UserNode::new(
            user_id,
            Arc::new(RegistryClient::new(config.registry_address(), http.clone())),
            Arc::new(HttpTransport::new(http)),
        )
        .with_hops(config.circuit_hops),
    );

    let routes = user_routes(node.clone());
    let handle = tokio::spawn(async move {
        warp::serve(routes).incoming(listener).run().await;
    });
    info!(user_id, %addr, "User listening");

    Ok((node, handle))
}

/// Registry, `relays` relays and `users` users in one process
pub async fn launch(config: &Config, relays: u64, users: u64) -> Result<Vec<JoinHandle<()>>> {
    if relays < config.circuit_hops as u64 {
        warn!(
            relays,
            hops = config.circuit_hops,
            "Fewer relays than circuit hops; sends will fail"
        );
    }

    let mut handles = vec![spawn_registry(config).await?];
    for relay_id in 0..relays {
        let (_, handle) = spawn_relay(config, relay_id, None).await?;
        handles.push(handle);
    }
    for user_id in 0..users {
        let (_, handle) = spawn_user(config, user_id).await?;
        handles.push(handle);
    }
    Ok(handles)
}
