use crate::round_robin::RoundRobin;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixConnector, Uri};
use std::time::Duration;

#[derive(Debug)]
pub enum ForwardError {
    NoHealthyBackends,
    Build,
    Connection,
}

pub struct ForwarderConfig {
    pub backends: Vec<String>,
}

impl ForwarderConfig {
    pub fn from_env() -> Self {
        Self {
            backends: std::env::var("BACKENDS")
                .unwrap_or_else(|_| "/tmp/intake-0.sock,/tmp/intake-1.sock".to_string())
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Forwards requests to one of a fixed set of `intake` instances listening
/// on Unix domain sockets, selected round-robin.
pub struct Forwarder {
    backends: RoundRobin,
    client: Client<UnixConnector, Incoming>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, timeout_ms: u64) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new())
            .pool_max_idle_per_host(2048)
            .pool_idle_timeout(Duration::from_secs(2))
            .http1_max_buf_size(16 * 1024)
            .build(UnixConnector);

        Self {
            backends: RoundRobin::new(config.backends),
            client,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub async fn forward(
        &self,
        method: Method,
        uri: hyper::Uri,
        body: Incoming,
    ) -> Result<Response<Incoming>, ForwardError> {
        let backend = self.backends.select().ok_or(ForwardError::NoHealthyBackends)?;

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let forward_uri = Uri::new(backend, path_and_query);

        let request = Request::builder()
            .method(method)
            .uri(forward_uri)
            .body(body)
            .map_err(|_| ForwardError::Build)?;

        tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ForwardError::Connection)?
            .map_err(|_| ForwardError::Connection)
    }
}
