//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. The accept loop stops
//! when the shutdown flag flips; connections already accepted finish on
//! their own tasks.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::lookup::RegistrationLookup;
use crate::routes;
use crate::session::SessionHandle;
use crate::types::ServiceError;

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Read side of the session manager
    pub session: SessionHandle,
    pub lookup: RegistrationLookup,
}

impl AppState {
    pub fn new(args: Args, session: SessionHandle) -> Self {
        let lookup = RegistrationLookup::new(args.retry_policy());
        Self {
            args,
            session,
            lookup,
        }
    }
}

/// Run the HTTP server until `shutdown` becomes true
pub async fn run(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServiceError> {
    let listen = state.args.listen();
    let listener = TcpListener::bind(listen).await?;

    info!("wa-check listening on {}", listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .preserve_header_case(true)
                            .title_case_headers(true)
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("HTTP server shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Route a request
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::POST, "/check-whatsapp") => {
            let body = read_body(req, addr).await;
            routes::check_whatsapp(state, body).await
        }
        _ => routes::not_found_response(&path),
    };

    Ok(response)
}

/// Collect the request body; an unreadable or oversized body reads as empty
async fn read_body(req: Request<Incoming>, addr: SocketAddr) -> Bytes {
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("[{}] Failed to read request body: {}", addr, e);
            Bytes::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::session::SessionSnapshot;

    async fn start_server() -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        // Grab a free port, then hand it to the server
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let args = Args::parse_from([
            "wa-check",
            "--host",
            "127.0.0.1",
            "--port",
            &addr.port().to_string(),
        ]);
        let state = Arc::new(AppState::new(
            args,
            SessionHandle::fixed(SessionSnapshot::default()),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            run(state, rx).await.unwrap();
        });

        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        (addr, tx, handle)
    }

    async fn send(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_routes_over_tcp() {
        let (addr, shutdown, handle) = start_server().await;

        let unknown = send(
            addr,
            "GET /elsewhere HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(unknown.starts_with("HTTP/1.1 404"), "{}", unknown);

        let wrong_method = send(
            addr,
            "GET /check-whatsapp HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(wrong_method.starts_with("HTTP/1.1 404"), "{}", wrong_method);

        let body = r#"{"phoneNumber":"48991196884"}"#;
        let disconnected = send(
            addr,
            &format!(
                "POST /check-whatsapp HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
        )
        .await;
        assert!(disconnected.starts_with("HTTP/1.1 500"), "{}", disconnected);
        assert!(disconnected.contains("WhatsApp não está conectado."));

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
