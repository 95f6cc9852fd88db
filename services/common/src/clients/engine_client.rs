//! Engine client with serialized lock-step requests and bounded reconnects
//!
//! One logical connection to one engine address. Callers queue behind a
//! mutex so exactly one request is in flight. A failed send or receive tears
//! the connection down; the next attempt reconnects. After `max_attempts`
//! failures the last error is surfaced and the link is marked `Failed`
//! until a later request succeeds.

use super::engine_protocol::{
    AccountSnapshot, CancelAck, EnginePosition, EngineRequest, Movers, OrderAck, OrderRequest,
    decode_account, decode_cancel, decode_movers, decode_order_ack, decode_orders,
    decode_positions,
};
use crate::config::EngineLinkConfig;
use crate::constants::MAX_ENGINE_FRAME_BYTES;
use crate::errors::{TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A live, framed connection to the engine
#[async_trait]
pub trait EngineConnection: Send {
    /// Send one request frame
    async fn send(&mut self, frame: &[u8]) -> TransportResult<()>;

    /// Receive one reply frame
    async fn recv(&mut self) -> TransportResult<Vec<u8>>;
}

/// Factory for engine connections
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> TransportResult<Box<dyn EngineConnection>>;

    fn address(&self) -> &str;
}

/// Newline-delimited JSON over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Accepts `tcp://host:port` or bare `host:port`
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    fn socket_addr(&self) -> &str {
        self.address
            .strip_prefix("tcp://")
            .unwrap_or(&self.address)
    }
}

#[async_trait]
impl EngineConnector for TcpConnector {
    async fn connect(&self) -> TransportResult<Box<dyn EngineConnection>> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(self.socket_addr())).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::ConnectFailed(format!("{}: {e}", self.address)));
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    op: "connect",
                    after: self.connect_timeout,
                });
            }
        };
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Box::new(TcpConnection {
            reader: BufReader::new(read),
            writer: write,
        }))
    }

    fn address(&self) -> &str {
        &self.address
    }
}

struct TcpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl EngineConnection for TcpConnection {
    async fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        self.writer.write_all(frame).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(1024);
        let limit = MAX_ENGINE_FRAME_BYTES as u64;
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_ENGINE_FRAME_BYTES {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "engine frame exceeds size limit",
                )));
            }
            return Err(TransportError::Closed);
        }
        buf.pop();
        Ok(buf)
    }
}

/// Link state as seen by health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Last exchange succeeded
    Connected,
    /// No live connection. The next request establishes one.
    Reconnecting,
    /// Retry budget was spent on the last request
    Failed,
}

/// Snapshot of the link for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub address: String,
    pub last_error: Option<String>,
    pub reconnects: u64,
}

/// Typed operations against the engine
#[async_trait]
pub trait EngineApi: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> TransportResult<OrderAck>;

    async fn positions(&self) -> TransportResult<Vec<EnginePosition>>;

    async fn account(&self) -> TransportResult<AccountSnapshot>;

    async fn movers(&self) -> TransportResult<Movers>;

    async fn cancel_order(&self, order_id: &str) -> TransportResult<CancelAck>;

    async fn open_orders(&self) -> TransportResult<Vec<Value>>;

    /// Whether the most recent exchange succeeded
    fn is_connected(&self) -> bool;
}

/// Engine client
pub struct EngineClient {
    connector: Arc<dyn EngineConnector>,
    config: EngineLinkConfig,
    link: Mutex<Option<Box<dyn EngineConnection>>>,
    status: RwLock<LinkStatus>,
}

impl EngineClient {
    /// Create a client. No connection is made until `connect` or the first request.
    pub fn new(connector: Arc<dyn EngineConnector>, config: EngineLinkConfig) -> Self {
        let status = LinkStatus {
            state: LinkState::Reconnecting,
            address: connector.address().to_string(),
            last_error: None,
            reconnects: 0,
        };
        Self {
            connector,
            config,
            link: Mutex::new(None),
            status: RwLock::new(status),
        }
    }

    /// Create a client for a TCP engine address
    pub fn tcp(address: &str, config: EngineLinkConfig) -> Self {
        let connector = TcpConnector::new(address, config.connect_timeout());
        Self::new(Arc::new(connector), config)
    }

    /// Establish the connection eagerly
    pub async fn connect(&self) -> TransportResult<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }
        info!(address = %self.connector.address(), "Connecting to engine");
        match self.connector.connect().await {
            Ok(conn) => {
                *link = Some(conn);
                self.mark(LinkState::Connected, None);
                Ok(())
            }
            Err(e) => {
                self.mark(LinkState::Reconnecting, Some(e.to_string()));
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status.read().clone()
    }

    /// Send a request and return the decoded JSON reply
    pub async fn request(&self, request: &EngineRequest) -> TransportResult<Value> {
        let payload = serde_json::to_vec(request).map_err(TransportError::Encode)?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut link = self.link.lock().await;
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=max_attempts {
            if link.is_none() {
                if attempt > 1 {
                    self.status.write().reconnects += 1;
                }
                match self.connector.connect().await {
                    Ok(conn) => {
                        debug!(address = %self.connector.address(), attempt, "Engine connection established");
                        *link = Some(conn);
                    }
                    Err(e) => {
                        warn!(
                            address = %self.connector.address(),
                            attempt,
                            max_attempts,
                            error = %e,
                            "Engine connect failed"
                        );
                        self.mark(LinkState::Reconnecting, Some(e.to_string()));
                        last_error = Some(e);
                        continue;
                    }
                }
            }

            let Some(conn) = link.as_mut() else {
                continue;
            };

            match self.exchange(conn.as_mut(), &payload).await {
                Ok(frame) => {
                    self.mark(LinkState::Connected, None);
                    return serde_json::from_slice(&frame).map_err(TransportError::Decode);
                }
                Err(e) => {
                    warn!(
                        kind = request.kind(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Engine exchange failed, dropping connection"
                    );
                    *link = None;
                    self.mark(LinkState::Reconnecting, Some(e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string());
        error!(kind = request.kind(), attempts = max_attempts, error = %last, "Engine request exhausted retries");
        self.mark(LinkState::Failed, Some(last.clone()));
        Err(TransportError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }

    async fn exchange(
        &self,
        conn: &mut dyn EngineConnection,
        payload: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let send_timeout = self.config.send_timeout();
        match timeout(send_timeout, conn.send(payload)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    op: "send",
                    after: send_timeout,
                });
            }
        }

        let recv_timeout = self.config.recv_timeout();
        match timeout(recv_timeout, conn.recv()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                op: "recv",
                after: recv_timeout,
            }),
        }
    }

    fn mark(&self, state: LinkState, error: Option<String>) {
        let mut status = self.status.write();
        status.state = state;
        if error.is_some() || state == LinkState::Connected {
            status.last_error = error;
        }
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn submit_order(&self, order: &OrderRequest) -> TransportResult<OrderAck> {
        let reply = self.request(&EngineRequest::Order(order.clone())).await?;
        decode_order_ack(reply)
    }

    async fn positions(&self) -> TransportResult<Vec<EnginePosition>> {
        decode_positions(self.request(&EngineRequest::Positions).await?)
    }

    async fn account(&self) -> TransportResult<AccountSnapshot> {
        decode_account(self.request(&EngineRequest::Account).await?)
    }

    async fn movers(&self) -> TransportResult<Movers> {
        decode_movers(self.request(&EngineRequest::Movers).await?)
    }

    async fn cancel_order(&self, order_id: &str) -> TransportResult<CancelAck> {
        let request = EngineRequest::CancelOrder {
            order_id: order_id.to_string(),
        };
        decode_cancel(self.request(&request).await?)
    }

    async fn open_orders(&self) -> TransportResult<Vec<Value>> {
        decode_orders(self.request(&EngineRequest::OpenOrders).await?)
    }

    fn is_connected(&self) -> bool {
        self.status.read().state == LinkState::Connected
    }
}
