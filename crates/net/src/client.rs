//! TCP client for the topic server
//!
//! One connection carries any number of concurrent calls; replies are
//! matched back to callers by request id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, Outcome, Request, TopicView};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    token: String,
    next_request_id: AtomicU64,
    state: Arc<RwLock<ClientState>>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

struct ClientState {
    connection: ConnectionState,
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    pong_waiters: Vec<oneshot::Sender<()>>,
    /// Reason given by the server when it refused the connection
    rejection: Option<String>,
}

impl ClientState {
    /// Error for callers that find the connection gone
    fn closed_error(&self) -> Error {
        match &self.rejection {
            Some(reason) => Error::Rejected(reason.clone()),
            None => Error::NotConnected,
        }
    }
}

enum ClientCommand {
    Send(Message),
    Disconnect,
}

impl Client {
    /// Connect to a topic server, authenticating every call with `token`
    pub async fn connect(addr: SocketAddr, token: impl Into<String>) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        let state = Arc::new(RwLock::new(ClientState {
            connection: ConnectionState::Connected,
            pending: HashMap::new(),
            pong_waiters: Vec::new(),
            rejection: None,
        }));

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(reader_task(reader, state.clone()));
        tokio::spawn(writer_task(writer, cmd_rx));

        Ok(Client {
            token: token.into(),
            next_request_id: AtomicU64::new(1),
            state,
            cmd_tx,
        })
    }

    /// Read a topic snapshot
    pub async fn get_topic(&self, topic_id: Uuid) -> Result<TopicView> {
        self.call(Request::GetTopic { topic_id }).await
    }

    /// Request a status change using one of the wire status literals
    pub async fn set_status(&self, topic_id: Uuid, status: &str) -> Result<TopicView> {
        self.call(Request::SetStatus {
            topic_id,
            status: status.to_string(),
        })
        .await
    }

    /// Supervisor shortcut: attach and accept a student in one step
    pub async fn assign_student(&self, topic_id: Uuid, producer_id: Uuid) -> Result<TopicView> {
        self.call(Request::AssignStudent {
            topic_id,
            producer_id,
        })
        .await
    }

    /// Send a request and wait for its reply.
    ///
    /// A typed refusal from the service comes back as [`Error::Service`].
    pub async fn call(&self, request: Request) -> Result<TopicView> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut s = self.state.write().await;
            if s.connection == ConnectionState::Disconnected {
                return Err(s.closed_error());
            }
            s.pending.insert(request_id, tx);
        }

        let call = Message::Call {
            request_id,
            token: self.token.clone(),
            request,
        };
        if self.cmd_tx.send(ClientCommand::Send(call)).await.is_err() {
            self.state.write().await.pending.remove(&request_id);
            return Err(Error::NotConnected);
        }

        match rx.await {
            Ok(outcome) => outcome.into_result().map_err(Error::Service),
            Err(_) => Err(self.state.read().await.closed_error()),
        }
    }

    /// Round-trip a ping
    pub async fn ping(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut s = self.state.write().await;
            if s.connection == ConnectionState::Disconnected {
                return Err(s.closed_error());
            }
            s.pong_waiters.push(tx);
        }

        self.cmd_tx
            .send(ClientCommand::Send(Message::Ping))
            .await
            .map_err(|_| Error::NotConnected)?;

        match rx.await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.state.read().await.closed_error()),
        }
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }
}

/// Route replies to waiting callers until the connection ends
async fn reader_task(mut reader: ReadHalf<TcpStream>, state: Arc<RwLock<ClientState>>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Message::Reply {
                request_id,
                outcome,
            }) => {
                let waiter = state.write().await.pending.remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(request_id, "Reply for unknown request"),
                }
            }
            Ok(Message::Pong) => {
                let mut s = state.write().await;
                if !s.pong_waiters.is_empty() {
                    let _ = s.pong_waiters.remove(0).send(());
                }
            }
            Ok(Message::Rejected { reason }) => {
                warn!(reason = %reason, "Connection rejected");
                state.write().await.rejection = Some(reason);
                break;
            }
            Ok(_) => debug!("Ignoring unexpected message type"),
            Err(Error::ConnectionClosed) => {
                debug!("Connection closed by server");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiting caller
    let mut s = state.write().await;
    s.connection = ConnectionState::Disconnected;
    s.pending.clear();
    s.pong_waiters.clear();
}

/// Writer task - sends queued messages to the server
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut cmd_rx: mpsc::Receiver<ClientCommand>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ClientCommand::Send(msg) => {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    debug!(error = %e, "Write failed");
                    break;
                }
            }
            ClientCommand::Disconnect => break,
        }
    }
    let _ = writer.shutdown().await;
}
