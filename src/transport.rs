//! Network transport module
//!
//! This module exposes the messaging operations over HTTP/1.1 and provides the
//! matching client:
//! - `GET /messages/conversations` - conversation list
//! - `POST /messages/start` - resolve a conversation before opening it
//! - `GET /messages/{userId}?page=&limit=` - history page (marks read)
//! - `POST /messages/{userId}/read` - explicit read receipt
//! - `POST /messages/send` - send a message
//! - `DELETE /messages/conversations/{userId}` - delete a conversation
//! - `GET /health` - liveness probe
//!
//! The viewer is identified by the `x-user-id` header, which the identity
//! provider in front of this service is trusted to set.

use crate::{
    conversation::{self, ConversationSummary},
    messaging,
    pager::{self, MessagePage},
    protocol::{
        self, ConversationResponse, ConversationsResponse, DeleteResponse, ErrorResponse,
        MarkReadResponse, MessagesResponse, SendRequest, SendResponse, StartConversationRequest,
        VIEWER_HEADER,
    },
    storage::{DirectMessage, Settings, Storage, UserId},
    sync::MessagesApi,
    Error, Result,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// HTTP status for an error class
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Authorization(_) => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error class for an HTTP status returned by the server
pub fn error_from_status(status: StatusCode, reason: String) -> Error {
    match status {
        StatusCode::BAD_REQUEST => Error::Validation(reason),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authorization(reason),
        StatusCode::NOT_FOUND => Error::NotFound(reason),
        s if s.is_server_error() => Error::Transient(reason),
        s => Error::Storage(format!("Unexpected status {}: {}", s, reason)),
    }
}

/// Messaging HTTP server
pub struct Server {
    store: Arc<Mutex<Storage>>,
    settings: Arc<Settings>,
    local_addr: Option<SocketAddr>,
    listener_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server over a shared store
    pub fn new(store: Arc<Mutex<Storage>>, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            local_addr: None,
            listener_task: None,
        }
    }

    /// Bind to `addr` and start serving in the background
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was requested.
    pub async fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        info!("Starting messaging server on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transient(format!("Failed to bind to {}: {}", addr, e)))?;

        let actual_addr = listener
            .local_addr()
            .map_err(|e| Error::Transient(format!("Failed to get local address: {}", e)))?;
        self.local_addr = Some(actual_addr);

        let store = self.store.clone();
        let settings = self.settings.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote_addr)) => {
                        debug!("Accepted connection from {}", remote_addr);

                        let io = TokioIo::new(stream);
                        let store = store.clone();
                        let settings = settings.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, store.clone(), settings.clone())
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!("Error serving connection: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        });
        self.listener_task = Some(task);

        info!("Messaging server listening on {}", actual_addr);
        Ok(actual_addr)
    }

    /// Stop accepting connections
    pub fn shutdown(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
            info!("Messaging server stopped");
        }
    }

    /// Get the local listening address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle incoming HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    store: Arc<Mutex<Storage>>,
    settings: Arc<Settings>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match route(req, store, settings).await {
        Ok(response) => Ok(response),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("{} {} failed: {}", method, path, e);
            } else {
                debug!("{} {} rejected ({}): {}", method, path, status, e);
            }
            Ok(error_response(&e))
        }
    }
}

async fn route(
    req: Request<Incoming>,
    store: Arc<Mutex<Storage>>,
    settings: Arc<Settings>,
) -> Result<Response<Full<Bytes>>> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(text_response(StatusCode::OK, "ok")),

        (&Method::GET, ["messages", "conversations"]) => {
            let viewer = viewer_of(&req)?;
            let store = store.lock().await;
            let conversations = conversation::list_conversations(&store, &*store, &viewer)?;
            json_response(&ConversationsResponse {
                success: true,
                conversations,
            })
        }

        (&Method::POST, ["messages", "start"]) => {
            let viewer = viewer_of(&req)?;
            let body: StartConversationRequest = read_json(req).await?;
            let counterpart = UserId::parse(&body.user_id)?;
            let store = store.lock().await;
            let conversation =
                conversation::start_conversation(&store, &*store, &viewer, &counterpart)?;
            json_response(&ConversationResponse {
                success: true,
                conversation,
            })
        }

        (&Method::POST, ["messages", "send"]) => {
            let viewer = viewer_of(&req)?;
            let body: SendRequest = read_json(req).await?;
            let receiver = UserId::parse(&body.receiver_id)?;
            let store = store.lock().await;
            let message = messaging::send(&store, &*store, &viewer, &receiver, &body.text)?;
            json_response(&SendResponse {
                success: true,
                message,
            })
        }

        (&Method::DELETE, ["messages", "conversations", user_id]) => {
            let viewer = viewer_of(&req)?;
            let counterpart = UserId::parse(user_id)?;
            let store = store.lock().await;
            let deleted = messaging::delete_conversation(&store, &viewer, &counterpart)?;
            json_response(&DeleteResponse {
                success: true,
                deleted,
            })
        }

        (&Method::POST, ["messages", user_id, "read"]) => {
            let viewer = viewer_of(&req)?;
            let counterpart = UserId::parse(user_id)?;
            let store = store.lock().await;
            let modified_count = messaging::mark_read(&store, &viewer, &counterpart)?;
            json_response(&MarkReadResponse {
                success: true,
                modified_count,
            })
        }

        (&Method::GET, ["messages", user_id]) => {
            let viewer = viewer_of(&req)?;
            let counterpart = UserId::parse(user_id)?;
            let (page_number, limit) = page_query(req.uri().query())?;
            let page_size = match limit {
                Some(limit) => limit,
                None => settings.effective_page_size(None),
            };
            let store = store.lock().await;
            let page = pager::page_bounded(
                &store,
                &*store,
                &viewer,
                &counterpart,
                page_number,
                page_size,
                settings.max_page_size,
            )?;
            json_response(&MessagesResponse {
                success: true,
                page,
            })
        }

        _ => {
            debug!("Received unsupported request: {} {}", method, path);
            Ok(text_response(StatusCode::NOT_FOUND, "Not Found"))
        }
    }
}

/// Extract the authenticated viewer from the request headers
fn viewer_of<B>(req: &Request<B>) -> Result<UserId> {
    let value = req
        .headers()
        .get(VIEWER_HEADER)
        .ok_or_else(|| Error::Authorization("Missing viewer identity".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| Error::Authorization("Invalid viewer identity".to_string()))?;
    UserId::parse(value).map_err(|_| Error::Authorization("Invalid viewer identity".to_string()))
}

/// Parse `page` (default 1) and `limit` from a query string
fn page_query(query: Option<&str>) -> Result<(usize, Option<usize>)> {
    let mut page = 1;
    let mut limit = None;

    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let parse = |v: &str| {
            v.parse::<usize>()
                .map_err(|_| Error::Validation(format!("Invalid {} parameter: {}", key, v)))
        };
        match key {
            "page" => page = parse(value)?,
            "limit" => limit = Some(parse(value)?),
            _ => {}
        }
    }

    Ok((page, limit))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req.collect().await?.to_bytes();
    protocol::from_json(&body)
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Full<Bytes>>> {
    let body = protocol::to_json(value)?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn text_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ErrorResponse::from_error(err)).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status_for(err);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// HTTP client for the messaging server, acting as one viewer
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    viewer: UserId,
}

impl HttpApi {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:8080`)
    pub fn new(base_url: impl Into<String>, viewer: UserId) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            viewer,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .header(VIEWER_HEADER, self.viewer.to_string())
            .send()
            .await
            .map_err(|e| Error::Transient(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            warn!("Request to messaging server failed with {}: {}", status, reason);
            // reqwest 0.11 carries its own http version; map through the numeric code
            let status = StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(error_from_status(status, reason));
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

impl MessagesApi for HttpApi {
    fn viewer(&self) -> UserId {
        self.viewer
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response: ConversationsResponse = self
            .execute(self.client.get(self.url("/messages/conversations")))
            .await?;
        Ok(response.conversations)
    }

    async fn messages(&self, counterpart: &UserId, page: usize, page_size: usize) -> Result<MessagePage> {
        let url = self.url(&format!(
            "/messages/{}?page={}&limit={}",
            counterpart, page, page_size
        ));
        let response: MessagesResponse = self.execute(self.client.get(url)).await?;
        Ok(response.page)
    }

    async fn send(&self, receiver: &UserId, text: &str) -> Result<DirectMessage> {
        let body = SendRequest {
            receiver_id: receiver.to_string(),
            text: text.to_string(),
        };
        let response: SendResponse = self
            .execute(self.client.post(self.url("/messages/send")).json(&body))
            .await?;
        Ok(response.message)
    }

    async fn mark_read(&self, counterpart: &UserId) -> Result<usize> {
        let url = self.url(&format!("/messages/{}/read", counterpart));
        let response: MarkReadResponse = self.execute(self.client.post(url)).await?;
        Ok(response.modified_count)
    }

    async fn delete_conversation(&self, counterpart: &UserId) -> Result<usize> {
        let url = self.url(&format!("/messages/conversations/{}", counterpart));
        let response: DeleteResponse = self.execute(self.client.delete(url)).await?;
        Ok(response.deleted)
    }

    async fn start_conversation(&self, counterpart: &UserId) -> Result<ConversationSummary> {
        let body = StartConversationRequest {
            user_id: counterpart.to_string(),
        };
        let response: ConversationResponse = self
            .execute(self.client.post(self.url("/messages/start")).json(&body))
            .await?;
        Ok(response.conversation)
    }
}
