//! Backing data-store nodes
//!
//! The core only needs two capabilities from a node: `PING` and executing a
//! single-key command. `RespConnector` speaks the Redis serialization
//! protocol over one persistent TCP connection per node; `MemoryConnector`
//! keeps everything in process and lets callers kill and revive nodes.

use crate::common::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Token a healthy node answers to `PING`
pub const PONG: &str = "PONG";

/// Largest bulk reply accepted, matches the key/value token limit
const MAX_BULK_LEN: i64 = 1024 * 1024;

/// Commands understood by backing nodes and recorded in modification logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Get,
    Set,
    Del,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Get => "GET",
            Command::Set => "SET",
            Command::Del => "DEL",
        }
    }

    /// Does this command modify the key space?
    pub fn is_write(&self) -> bool {
        !matches!(self, Command::Get)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Command::Get),
            "SET" => Ok(Command::Set),
            "DEL" => Ok(Command::Del),
            other => Err(Error::Other(format!("unsupported command: {}", other))),
        }
    }
}

/// Capability interface of a backing node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Health check, succeeds only when the node answers `PONG`
    async fn ping(&self) -> Result<()>;

    /// Execute one command, `None` is the nil reply
    async fn exec(&self, command: Command, key: &str, value: Option<&str>)
        -> Result<Option<String>>;
}

/// Dials backing nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeClient>>;
}

// ============================================================================
// RESP over TCP
// ============================================================================

/// Decoded RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

/// Dials nodes with a fixed connect timeout.
/// Commands share the same deadline unless `with_command_timeout` says otherwise.
pub struct RespConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RespConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout: connect_timeout,
        }
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

#[async_trait]
impl Connector for RespConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeClient>> {
        let client = RespClient::connect(address, self.connect_timeout)
            .await?
            .with_command_timeout(self.command_timeout);
        Ok(Arc::new(client))
    }
}

/// Persistent connection to one node.
///
/// A connection that failed or stalled mid-command is dropped and
/// re-dialed on the next call, so a node that came back after a restart is
/// reachable again.
pub struct RespClient {
    address: String,
    connect_timeout: Duration,
    command_timeout: Duration,
    stream: tokio::sync::Mutex<Option<BufStream<TcpStream>>>,
}

impl RespClient {
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = dial(address, connect_timeout).await?;
        tracing::info!(node = %address, "Connected to node");
        Ok(Self {
            address: address.to_string(),
            connect_timeout,
            command_timeout: connect_timeout,
            stream: tokio::sync::Mutex::new(Some(stream)),
        })
    }

    /// Deadline for writing one command and reading its reply
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn roundtrip(&self, args: &[&str]) -> Result<Reply> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            tracing::debug!(node = %self.address, "Re-dialing node");
            *guard = Some(dial(&self.address, self.connect_timeout).await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::Internal("connection slot empty after dial".into()));
        };

        let exchange = async {
            match write_command(stream, args).await {
                Ok(()) => read_reply(stream, &self.address).await,
                Err(e) => Err(e),
            }
        };
        let result = match tokio::time::timeout(self.command_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{}: no reply within {:?}",
                self.address, self.command_timeout
            ))),
        };

        if let Err(ref e) = result {
            if e.is_retryable() {
                // The stream may hold half a reply, never reuse it
                *guard = None;
            }
        }
        result
    }
}

#[async_trait]
impl NodeClient for RespClient {
    async fn ping(&self) -> Result<()> {
        match self.roundtrip(&["PING"]).await? {
            Reply::Simple(s) if s.contains(PONG) => Ok(()),
            other => Err(Error::Protocol {
                node: self.address.clone(),
                reason: format!("unexpected PING reply: {:?}", other),
            }),
        }
    }

    async fn exec(
        &self,
        command: Command,
        key: &str,
        value: Option<&str>,
    ) -> Result<Option<String>> {
        let mut args = vec![command.as_str(), key];
        if let (Command::Set, Some(v)) = (command, value) {
            args.push(v);
        }
        match self.roundtrip(&args).await? {
            Reply::Simple(s) => Ok(Some(s)),
            Reply::Integer(i) => Ok(Some(i.to_string())),
            Reply::Bulk(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Reply::Bulk(None) => Ok(None),
            Reply::Error(reason) => Err(Error::CommandRejected {
                node: self.address.clone(),
                reason,
            }),
        }
    }
}

async fn dial(address: &str, connect_timeout: Duration) -> Result<BufStream<TcpStream>> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(BufStream::new(stream))
        }
        Ok(Err(e)) => Err(Error::ConnectionFailed(format!("{}: {}", address, e))),
        Err(_) => Err(Error::ConnectionFailed(format!(
            "{}: connect timed out after {:?}",
            address, connect_timeout
        ))),
    }
}

/// Encode a command as a RESP array of bulk strings
fn encode_command(args: &[&str]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf
}

async fn write_command(stream: &mut BufStream<TcpStream>, args: &[&str]) -> Result<()> {
    let buf = encode_command(args);
    stream
        .write_all(&buf)
        .await
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::ConnectionFailed(e.to_string()))
}

async fn read_reply<R>(reader: &mut R, node: &str) -> Result<Reply>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let protocol = |reason: String| Error::Protocol {
        node: node.to_string(),
        reason,
    };

    let mut line = Vec::new();
    let n = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
    if n == 0 {
        return Err(Error::ConnectionFailed(format!(
            "{}: connection closed by peer",
            node
        )));
    }
    if !line.ends_with(b"\r\n") || line.len() < 3 {
        return Err(protocol("reply line not terminated by CRLF".into()));
    }
    let body = String::from_utf8_lossy(&line[1..line.len() - 2]).into_owned();

    match line[0] {
        b'+' => Ok(Reply::Simple(body)),
        b'-' => Ok(Reply::Error(body)),
        b':' => body
            .parse()
            .map(Reply::Integer)
            .map_err(|_| protocol(format!("bad integer reply: {}", body))),
        b'$' => {
            let len: i64 = body
                .parse()
                .map_err(|_| protocol(format!("bad bulk length: {}", body)))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            if len > MAX_BULK_LEN {
                return Err(protocol(format!(
                    "bulk length {} exceeds {} bytes",
                    len, MAX_BULK_LEN
                )));
            }
            let mut data = vec![0u8; len as usize + 2];
            reader
                .read_exact(&mut data)
                .await
                .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
            if !data.ends_with(b"\r\n") {
                return Err(protocol("bulk reply not terminated by CRLF".into()));
            }
            data.truncate(len as usize);
            Ok(Reply::Bulk(Some(data)))
        }
        other => Err(protocol(format!(
            "unsupported reply type {:?}",
            other as char
        ))),
    }
}

// ============================================================================
// In-memory nodes
// ============================================================================

#[derive(Default)]
struct MemoryNodeState {
    data: Mutex<HashMap<String, String>>,
    down: AtomicBool,
    /// Writes still to be refused
    refused_writes: AtomicUsize,
}

/// Handle to an in-process node
#[derive(Clone)]
pub struct MemoryNode {
    address: String,
    state: Arc<MemoryNodeState>,
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn ping(&self) -> Result<()> {
        self.ensure_up()
    }

    async fn exec(
        &self,
        command: Command,
        key: &str,
        value: Option<&str>,
    ) -> Result<Option<String>> {
        self.ensure_up()?;
        if command.is_write() && self.take_refused_write() {
            return Err(Error::CommandRejected {
                node: self.address.clone(),
                reason: "write refused".into(),
            });
        }
        let mut data = self.state.data.lock();
        match command {
            Command::Get => Ok(data.get(key).cloned()),
            Command::Set => {
                let value = value.ok_or_else(|| Error::CommandRejected {
                    node: self.address.clone(),
                    reason: "SET without value".into(),
                })?;
                data.insert(key.to_string(), value.to_string());
                Ok(Some("OK".to_string()))
            }
            Command::Del => {
                let removed = data.remove(key).is_some() as i64;
                Ok(Some(removed.to_string()))
            }
        }
    }
}

impl MemoryNode {
    fn ensure_up(&self) -> Result<()> {
        if self.state.down.load(Ordering::SeqCst) {
            Err(Error::ConnectionFailed(format!(
                "{}: connection refused",
                self.address
            )))
        } else {
            Ok(())
        }
    }

    fn take_refused_write(&self) -> bool {
        self.state
            .refused_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Creates in-memory nodes on first dial and keeps them across re-dials
#[derive(Default)]
pub struct MemoryConnector {
    nodes: Mutex<HashMap<String, Arc<MemoryNodeState>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, address: &str) -> Arc<MemoryNodeState> {
        self.nodes
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Make the node refuse every call
    pub fn kill(&self, address: &str) {
        self.state(address).down.store(true, Ordering::SeqCst);
    }

    /// Bring a killed node back, its data survives
    pub fn revive(&self, address: &str) {
        self.state(address).down.store(false, Ordering::SeqCst);
    }

    /// Refuse the next `count` writes while the node keeps answering PING
    pub fn refuse_writes(&self, address: &str, count: usize) {
        self.state(address)
            .refused_writes
            .store(count, Ordering::SeqCst);
    }

    pub fn is_up(&self, address: &str) -> bool {
        !self.state(address).down.load(Ordering::SeqCst)
    }

    /// Value stored on a node, bypassing liveness
    pub fn peek(&self, address: &str, key: &str) -> Option<String> {
        self.state(address).data.lock().get(key).cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeClient>> {
        let node = MemoryNode {
            address: address.to_string(),
            state: self.state(address),
        };
        node.ensure_up()?;
        Ok(Arc::new(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_encode_command() {
        let buf = encode_command(&["SET", "k", "v1"]);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nv1\r\n");
    }

    #[test]
    fn test_command_parse() {
        assert_eq!("set".parse::<Command>().unwrap(), Command::Set);
        assert_eq!("DEL".parse::<Command>().unwrap(), Command::Del);
        assert!("FLUSHALL".parse::<Command>().is_err());
        assert!(!Command::Get.is_write());
    }

    #[tokio::test]
    async fn test_read_replies() {
        let raw: &[u8] = b"+PONG\r\n-ERR wrong type\r\n:1\r\n$5\r\nhello\r\n$-1\r\n";
        let mut reader = BufReader::new(raw);

        assert_eq!(
            read_reply(&mut reader, "n").await.unwrap(),
            Reply::Simple("PONG".into())
        );
        assert_eq!(
            read_reply(&mut reader, "n").await.unwrap(),
            Reply::Error("ERR wrong type".into())
        );
        assert_eq!(
            read_reply(&mut reader, "n").await.unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(
            read_reply(&mut reader, "n").await.unwrap(),
            Reply::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(
            read_reply(&mut reader, "n").await.unwrap(),
            Reply::Bulk(None)
        );
        assert!(matches!(
            read_reply(&mut reader, "n").await,
            Err(Error::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_reply_rejects_garbage() {
        let raw: &[u8] = b"?what\r\n";
        let mut reader = BufReader::new(raw);
        assert!(matches!(
            read_reply(&mut reader, "n").await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_resp_client_against_fake_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufStream::new(socket);
            let mut line = Vec::new();
            // PING: *1 $4 PING
            for _ in 0..3 {
                line.clear();
                socket.read_until(b'\n', &mut line).await.unwrap();
            }
            socket.write_all(b"+PONG\r\n").await.unwrap();
            socket.flush().await.unwrap();
            // GET k: *2 $3 GET $1 k
            for _ in 0..5 {
                line.clear();
                socket.read_until(b'\n', &mut line).await.unwrap();
            }
            socket.write_all(b"$2\r\nv1\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        let client = RespClient::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        client.ping().await.unwrap();
        assert_eq!(
            client.exec(Command::Get, "k", None).await.unwrap(),
            Some("v1".to_string())
        );
    }

    #[tokio::test]
    async fn test_oversized_bulk_reply_rejected() {
        let raw: &[u8] = b"$9999999999\r\n";
        let mut reader = BufReader::new(raw);
        assert!(matches!(
            read_reply(&mut reader, "n").await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_node_times_out() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Accept and hold connections without ever answering
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = RespClient::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap()
            .with_command_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        assert!(matches!(client.ping().await, Err(Error::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        // The stalled stream was dropped, the next call re-dials
        assert!(client.stream.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Port 1 on localhost is essentially never listening
        let result = RespClient::connect("127.0.0.1:1", Duration::from_millis(500)).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_memory_node_kill_and_revive() {
        let connector = MemoryConnector::new();
        let node = connector.connect("m1").await.unwrap();

        node.exec(Command::Set, "k", Some("v")).await.unwrap();
        assert_eq!(
            node.exec(Command::Get, "k", None).await.unwrap(),
            Some("v".to_string())
        );

        connector.kill("m1");
        assert!(node.ping().await.is_err());
        assert!(connector.connect("m1").await.is_err());

        connector.revive("m1");
        node.ping().await.unwrap();
        assert_eq!(connector.peek("m1", "k"), Some("v".to_string()));

        assert_eq!(
            node.exec(Command::Del, "k", None).await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(node.exec(Command::Get, "k", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_node_refused_writes() {
        let connector = MemoryConnector::new();
        let node = connector.connect("m1").await.unwrap();
        connector.refuse_writes("m1", 1);

        node.ping().await.unwrap();
        assert!(matches!(
            node.exec(Command::Set, "k", Some("v")).await,
            Err(Error::CommandRejected { .. })
        ));
        node.exec(Command::Set, "k", Some("v")).await.unwrap();
        assert_eq!(connector.peek("m1", "k"), Some("v".to_string()));
    }
}
