//! TCP RPC server
//!
//! Accepts connections and serves one framed query per connection.

use crate::dht::rpc::QueryHandler;
use crate::error::Result;
use crate::peer::PeerId;
use crate::protocol::message::{Query, Reply, Response};
use crate::protocol::wire::{read_frame, write_frame};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace};

/// Time a peer gets to send its query after connecting
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Listening side of the RPC transport
pub struct RpcServer {
    listener: TcpListener,
    local_id: PeerId,
}

impl RpcServer {
    /// Bind to `addr`; port 0 picks a free port
    pub async fn bind(addr: SocketAddr, local_id: PeerId) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind RPC server to {}: {}", addr, e);
            e
        })?;
        Ok(Self { listener, local_id })
    }

    /// The bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task each
    pub async fn serve(self, handler: Arc<dyn QueryHandler>) -> Result<()> {
        info!("RPC server listening on {}", self.local_addr()?);
        loop {
            let (socket, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually transient: a reset before accept, or out of descriptors
                    debug!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let handler = handler.clone();
            let local_id = self.local_id;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(socket, handler, local_id).await {
                    debug!("Connection from {} failed: {}", remote, e);
                }
            });
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Arc<dyn QueryHandler>,
    local_id: PeerId,
) -> io::Result<()> {
    let query: io::Result<Query> = match timeout(READ_TIMEOUT, read_frame(&mut socket)).await {
        Ok(result) => result,
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "no query received")),
    };

    let reply = match query {
        Ok(query) => {
            trace!("Serving {}", query.request.name());
            handler.handle_query(query).await
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Reply::new(
            local_id,
            Response::Error {
                message: format!("malformed query: {}", e),
            },
        ),
        Err(e) => return Err(e),
    };
    write_frame(&mut socket, &reply).await
}
