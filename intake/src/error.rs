use std::fmt;

/// Errors from a single upstream processor call. Callers don't need to
/// distinguish transport failures from non-200 responses — both are
/// retried identically — so a single variant set is enough.
#[derive(Debug)]
pub enum UpstreamError {
    Transport(hyper_util::client::legacy::Error),
    Rejected(hyper::StatusCode),
    Timeout,
    Body(hyper::Error),
    Build(String),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Transport(e) => write!(f, "transport error: {e}"),
            UpstreamError::Rejected(status) => write!(f, "upstream rejected with {status}"),
            UpstreamError::Timeout => write!(f, "upstream call timed out"),
            UpstreamError::Body(e) => write!(f, "body error: {e}"),
            UpstreamError::Build(msg) => write!(f, "request build error: {msg}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Errors from the persistence adapter. `DuplicateKey` is handled by the
/// caller as success rather than propagated as a failure.
#[derive(Debug)]
pub enum DbError {
    PoolInit(String),
    PoolExhausted(String),
    Query(tokio_postgres::Error),
    DuplicateKey,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PoolInit(msg) => write!(f, "database pool init failed: {msg}"),
            DbError::PoolExhausted(msg) => write!(f, "database pool exhausted: {msg}"),
            DbError::Query(e) => write!(f, "database query failed: {e}"),
            DbError::DuplicateKey => write!(f, "duplicate correlation id"),
        }
    }
}

impl std::error::Error for DbError {}

impl DbError {
    /// Postgres SQLSTATE 23505 is `unique_violation`.
    pub fn from_query_error(e: tokio_postgres::Error) -> Self {
        if e.code().map(|c| c.code() == "23505").unwrap_or(false) {
            DbError::DuplicateKey
        } else {
            DbError::Query(e)
        }
    }
}

#[derive(Debug)]
pub struct ListenError(pub String);

impl fmt::Display for ListenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to bind listener: {}", self.0)
    }
}

impl std::error::Error for ListenError {}
