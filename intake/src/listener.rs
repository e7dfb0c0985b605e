//! Listener abstraction over TCP and Unix domain sockets, so the rest of
//! the front-end can accept connections without caring which transport
//! is configured.

use crate::config::ListenAddr;
use crate::error::ListenError;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

pub enum Connection {
    Tcp(TokioIo<TcpStream>),
    Unix(TokioIo<UnixStream>),
}

impl Listener {
    pub async fn bind(addr: &ListenAddr) -> Result<Self, ListenError> {
        match addr {
            ListenAddr::Tcp(bind_addr) => {
                let listener = TcpListener::bind(bind_addr)
                    .await
                    .map_err(|e| ListenError(format!("tcp bind {bind_addr}: {e}")))?;
                tracing::info!(addr = %bind_addr, "listening on tcp");
                Ok(Listener::Tcp(listener))
            }
            ListenAddr::Unix(path) => {
                // A stale socket file from a previous run (e.g. after a
                // crash) would otherwise make bind fail with AddrInUse.
                if std::fs::metadata(path).is_ok() {
                    std::fs::remove_file(path)
                        .map_err(|e| ListenError(format!("removing stale socket {path}: {e}")))?;
                }
                let listener = UnixListener::bind(path)
                    .map_err(|e| ListenError(format!("unix bind {path}: {e}")))?;
                // Worker processes outside this container's user/group
                // still need to connect through the socket, mirroring the
                // reference lineage's 0666 permission bits.
                set_world_rw(path)
                    .map_err(|e| ListenError(format!("chmod {path}: {e}")))?;
                tracing::info!(path = %path, "listening on unix socket");
                Ok(Listener::Unix(listener))
            }
        }
    }

    pub async fn accept(&self) -> std::io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::Tcp(TokioIo::new(stream)))
            }
            Listener::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::Unix(TokioIo::new(stream)))
            }
        }
    }
}

#[cfg(unix)]
fn set_world_rw(path: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn set_world_rw(_path: &str) -> std::io::Result<()> {
    Ok(())
}
