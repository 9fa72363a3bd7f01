//! TCP server exposing the topic operations
//!
//! Each connection reads calls in order and answers every call with a reply
//! carrying the same request id. The service talks to SQLite and blocks, so
//! calls run on the blocking thread pool.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ErrorKind, Message, Outcome, Request, WireError};

/// Default cap on simultaneous connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Handles authenticated calls
///
/// Implementations resolve the bearer token themselves and return every
/// failure as a typed [`WireError`].
pub trait TopicService: Send + Sync + 'static {
    fn handle(&self, token: &str, request: Request) -> Outcome;
}

/// Server state shared across tasks
struct ServerState {
    connections: HashMap<u64, SocketAddr>,
    next_connection_id: u64,
    max_connections: usize,
}

/// Topic server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Start a server on all interfaces
    pub async fn start<S: TopicService>(
        port: u16,
        service: Arc<S>,
        max_connections: usize,
    ) -> Result<Self> {
        Self::start_on(SocketAddr::from(([0, 0, 0, 0], port)), service, max_connections).await
    }

    /// Start a server on a specific address
    pub async fn start_on<S: TopicService>(
        addr: SocketAddr,
        service: Arc<S>,
        max_connections: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, max_connections, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            service,
            shutdown_tx.clone(),
        ));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open client connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop<S: TopicService>(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    service: Arc<S>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            service.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Claim a connection slot
async fn register(state: &Arc<RwLock<ServerState>>, addr: SocketAddr) -> Result<u64> {
    let mut s = state.write().await;
    if s.connections.len() >= s.max_connections {
        return Err(Error::ServerFull);
    }
    let id = s.next_connection_id;
    s.next_connection_id += 1;
    s.connections.insert(id, addr);
    Ok(id)
}

/// Handle a single client connection
async fn handle_connection<S: TopicService>(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    service: Arc<S>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let connection_id = match register(&state, addr).await {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Connection refused");
            let refusal = Message::Rejected {
                reason: e.to_string(),
            };
            let _ = write_frame(&mut writer, &refusal).await;
            return;
        }
    };

    info!(addr = %addr, connection_id, "Client connected");

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = shutdown_rx.recv() => break,
        };

        match frame {
            Ok(msg) => {
                if let Err(e) = handle_message(msg, &mut writer, &service).await {
                    debug!(connection_id, error = %e, "Write failed");
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!(connection_id, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(connection_id, error = %e, "Read error");
                break;
            }
        }
    }

    state.write().await.connections.remove(&connection_id);
    info!(addr = %addr, connection_id, "Client disconnected");
}

/// Answer one incoming message
async fn handle_message<S: TopicService>(
    msg: Message,
    writer: &mut WriteHalf<TcpStream>,
    service: &Arc<S>,
) -> Result<()> {
    match msg {
        Message::Call {
            request_id,
            token,
            request,
        } => {
            debug!(request_id, ?request, "Call received");
            let service = Arc::clone(service);
            let outcome = tokio::task::spawn_blocking(move || service.handle(&token, request))
                .await
                .unwrap_or_else(|e| {
                    error!(request_id, error = %e, "Service call panicked");
                    Outcome::Error {
                        error: WireError::new(ErrorKind::Internal, "internal error"),
                    }
                });
            write_frame(writer, &Message::Reply { request_id, outcome }).await
        }
        Message::Ping => write_frame(writer, &Message::Pong).await,
        _ => {
            debug!("Ignoring unexpected message type");
            Ok(())
        }
    }
}
