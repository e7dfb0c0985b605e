mod forward;
mod round_robin;

use crate::forward::{ForwardError, Forwarder, ForwarderConfig};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn backend_unavailable() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(BoxBody::new(
            http_body_util::Empty::new().map_err(|never| match never {}),
        ))
        .expect("building a status-only response never fails")
}

async fn proxy_service(
    forwarder: Arc<Forwarder>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    match forwarder.forward(method, uri, req.into_body()).await {
        Ok(resp) => Ok(resp.map(BoxBody::new)),
        Err(e) => {
            match e {
                ForwardError::NoHealthyBackends => tracing::warn!("no backends configured"),
                ForwardError::Build => tracing::warn!("failed to build forwarded request"),
                ForwardError::Connection => tracing::warn!("backend connection failed"),
            }
            Ok(backend_unavailable())
        }
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting global tracing subscriber");

    let config = ForwarderConfig::from_env();
    let timeout_ms: u64 = std::env::var("FORWARD_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5_000);
    let forwarder = Arc::new(Forwarder::new(config, timeout_ms));

    let addr = SocketAddr::from(([0, 0, 0, 0], 9999));

    let socket = TcpSocket::new_v4().expect("creating tcp socket");
    socket.set_reuseaddr(true).expect("setting SO_REUSEADDR");
    socket.set_reuseport(true).expect("setting SO_REUSEPORT");
    socket.bind(addr).expect("binding proxy listen address");
    let listener = socket.listen(16 * 1024).expect("listening on proxy socket");

    tracing::warn!(addr = %addr, "proxy listening");

    loop {
        let (tcp_stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let _ = tcp_stream.set_nodelay(true);

        let forwarder = forwarder.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(tcp_stream);
            let service = service_fn(move |req| proxy_service(forwarder.clone(), req));

            let conn = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service);

            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection ended with error");
            }
        });
    }
}
