//! Axum binding for the HTTP tunnel
//!
//! Each request is served by a spawned task driving the [`Multiplexer`].
//! The handler waits only until that task commits the response (first
//! flush, error, or completion); the rest of the body is streamed from the
//! task through a channel, so long-poll reads don't hold up axum.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, BodyDataStream, Bytes};
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::http::{Multiplexer, TunnelRequest, TunnelResponse};

/// Body chunks buffered between the tunnel task and hyper.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Router serving the tunnel endpoint at `path` for GET and POST.
pub fn router(multiplexer: Arc<Multiplexer>, path: &str) -> Router {
    Router::new()
        .route(path, get(handle_tunnel).post(handle_tunnel))
        .with_state(multiplexer)
}

/// Serve the tunnel endpoint on `listener` until `shutdown` completes.
///
/// Every tunnel is closed on shutdown, which also ends in-flight reads so
/// the server can drain.
pub async fn serve<F>(
    listener: TcpListener,
    multiplexer: Arc<Multiplexer>,
    path: &str,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(multiplexer.clone(), path);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            multiplexer.shutdown().await;
        })
        .await
}

async fn handle_tunnel(
    State(multiplexer): State<Arc<Multiplexer>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let mut request = AxumRequest::new(query.unwrap_or_default(), headers, body);
    let (mut response, committed) = ChannelResponse::new();

    tokio::spawn(async move {
        if let Err(e) = multiplexer.handle(&mut request, &mut response).await {
            log::debug!("Unable to send tunnel response: {}", e);
        }
        response.finish().await;
    });

    match committed.await {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// [`TunnelRequest`] over an axum request.
pub struct AxumRequest {
    query: String,
    headers: HeaderMap,
    body: BodyDataStream,
    pending: Bytes,
}

impl AxumRequest {
    pub fn new(query: String, headers: HeaderMap, body: Body) -> Self {
        Self {
            query,
            headers,
            body: body.into_data_stream(),
            pending: Bytes::new(),
        }
    }
}

#[async_trait]
impl TunnelRequest for AxumRequest {
    fn query(&self) -> &str {
        &self.query
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.body.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(io::Error::other(e)),
                None => return Ok(0),
            }
        }

        let length = self.pending.len().min(buf.len());
        buf[..length].copy_from_slice(&self.pending.split_to(length));
        Ok(length)
    }
}

/// [`TunnelResponse`] handing its head to the axum handler on commit and
/// streaming the body afterwards.
pub struct ChannelResponse {
    status: StatusCode,
    headers: HeaderMap,
    buffer: Vec<u8>,
    commit: Option<oneshot::Sender<Response>>,
    body: Option<mpsc::Sender<Bytes>>,
}

impl ChannelResponse {
    /// A response and the receiver its head is delivered to.
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (commit, committed) = oneshot::channel();
        let response = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            buffer: Vec::new(),
            commit: Some(commit),
            body: None,
        };
        (response, committed)
    }

    fn deliver(&mut self, body: Body) -> io::Result<()> {
        let Some(commit) = self.commit.take() else {
            return Ok(());
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        commit.send(response).map_err(|_| disconnected())
    }

    /// Complete the response. An uncommitted response is sent whole.
    pub async fn finish(mut self) {
        if self.commit.is_some() {
            let body = Body::from(std::mem::take(&mut self.buffer));
            if self.deliver(body).is_err() {
                log::debug!("HTTP client went away before the response was sent.");
            }
        } else if !self.buffer.is_empty() {
            if let Err(e) = self.send_buffer().await {
                log::debug!("Unable to finish tunnel response: {}", e);
            }
        }
    }

    async fn send_buffer(&mut self) -> io::Result<()> {
        let Some(body) = &self.body else {
            return Err(disconnected());
        };
        let chunk = Bytes::from(std::mem::take(&mut self.buffer));
        body.send(chunk).await.map_err(|_| disconnected())
    }
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "HTTP client disconnected")
}

#[async_trait]
impl TunnelResponse for ChannelResponse {
    fn set_header(&mut self, name: &str, value: &str) {
        if self.is_committed() {
            log::warn!("Ignoring header \"{}\" set after commit.", name);
            return;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => log::warn!("Ignoring invalid header \"{}\".", name),
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.is_committed() && self.body.is_none() {
            return Err(disconnected());
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if !self.is_committed() {
            let (tx, rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
            });
            self.body = Some(tx);
            self.deliver(Body::from_stream(stream))?;
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.send_buffer().await
    }

    fn is_committed(&self) -> bool {
        self.commit.is_none()
    }

    async fn send_error(&mut self, status: u16) -> io::Result<()> {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.buffer.clear();
        self.deliver(Body::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_request_reads_body_in_pieces() {
        let mut headers = HeaderMap::new();
        headers.insert("Guacamole-Connection", HeaderValue::from_static("desktop"));
        let mut request = AxumRequest::new(
            "write:abc".to_string(),
            headers,
            Body::from("4.sync,1.1;3.nop;"),
        );

        assert_eq!(request.query(), "write:abc");
        assert_eq!(request.header("guacamole-connection"), Some("desktop"));
        assert_eq!(request.header("Missing"), None);

        let mut received = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = request.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"4.sync,1.1;3.nop;");
    }

    #[tokio::test]
    async fn test_response_streams_after_flush() {
        let (mut response, committed) = ChannelResponse::new();
        response.set_content_type("application/octet-stream");
        response.write(b"3.nop;").await.unwrap();
        assert!(!response.is_committed());

        response.flush().await.unwrap();
        assert!(response.is_committed());
        let head = committed.await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(
            head.headers().get("content-type").unwrap(),
            "application/octet-stream"
        );

        response.write(b"0.;").await.unwrap();
        let finishing = tokio::spawn(response.finish());
        assert_eq!(body_of(head).await, b"3.nop;0.;");
        finishing.await.unwrap();
    }

    #[tokio::test]
    async fn test_unflushed_response_sent_on_finish() {
        let (mut response, committed) = ChannelResponse::new();
        response.set_header("Cache-Control", "no-cache");
        response.write(b"3f2b8c1e").await.unwrap();
        response.finish().await;

        let head = committed.await.unwrap();
        assert_eq!(head.headers().get("cache-control").unwrap(), "no-cache");
        assert_eq!(body_of(head).await, b"3f2b8c1e");
    }

    #[tokio::test]
    async fn test_send_error_commits_headers() {
        let (mut response, committed) = ChannelResponse::new();
        response.write(b"partial").await.unwrap();
        response.set_header("Guacamole-Status-Code", "516");
        response.send_error(404).await.unwrap();
        assert!(response.is_committed());

        let head = committed.await.unwrap();
        assert_eq!(head.status(), StatusCode::NOT_FOUND);
        assert_eq!(head.headers().get("guacamole-status-code").unwrap(), "516");
        assert!(body_of(head).await.is_empty());
    }

    #[tokio::test]
    async fn test_flush_fails_when_client_gone() {
        let (mut response, committed) = ChannelResponse::new();
        drop(committed);
        response.write(b"3.nop;").await.unwrap();
        assert!(response.flush().await.is_err());
    }
}
