//! Client side of the line protocol: one request in flight per connection.

use super::protocol::{error_from_rpc, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use coz_common::{Error, ProcessId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Where a connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Agent socket of a process on this host.
    Unix(PathBuf),
    /// Control service, as `host:port`.
    Tcp(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => f.write_str(addr),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Remote(JsonRpcError),
}

impl RpcError {
    /// Map a failure during an established session.
    ///
    /// Channel failures become `TargetUnreachable`; errors the peer reported
    /// keep their own kind.
    pub fn into_unreachable(self, pid: ProcessId, endpoint: &Endpoint) -> Error {
        let endpoint = endpoint.to_string();
        match self {
            RpcError::Remote(err) => error_from_rpc(err, pid, &endpoint),
            RpcError::Malformed(message) => Error::Protocol { endpoint, message },
            other => Error::TargetUnreachable {
                pid,
                endpoint,
                cause: other.to_string(),
            },
        }
    }

    /// Map a failure while attaching. Channel failures become `AttachFailed`.
    pub fn into_attach_failed(self, pid: ProcessId, endpoint: &Endpoint) -> Error {
        let endpoint = endpoint.to_string();
        match self {
            RpcError::Remote(err) => error_from_rpc(err, pid, &endpoint),
            other => Error::AttachFailed {
                pid,
                endpoint,
                cause: other.to_string(),
            },
        }
    }

    fn is_timeout(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// Either kind of byte stream.
#[derive(Debug)]
pub(crate) enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub(crate) fn try_clone(&self) -> io::Result<Stream> {
        match self {
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
        }
    }

    pub(crate) fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            Stream::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

struct Channel {
    reader: BufReader<Stream>,
    writer: Stream,
    /// Bytes of a response line not yet terminated when a read timed out.
    line: Vec<u8>,
}

/// Lazily connected request/response channel.
///
/// A call that times out keeps the stream: the peer still answers it, and
/// that late answer is kept for [`take_late`](Self::take_late) when it
/// shows up ahead of a later response. Any other transport failure drops
/// the stream and the next call reconnects.
pub struct RpcConnection {
    endpoint: Endpoint,
    channel: Option<Channel>,
    next_id: u64,
    connect_timeout: Duration,
    rpc_timeout: Duration,
    /// Timed-out request ids still owed an answer, with their method.
    pending: BTreeMap<u64, String>,
    /// Results that arrived after their call gave up, in arrival order.
    late: Vec<(String, Value)>,
}

impl RpcConnection {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration, rpc_timeout: Duration) -> Self {
        RpcConnection {
            endpoint,
            channel: None,
            next_id: 1,
            connect_timeout,
            rpc_timeout,
            pending: BTreeMap::new(),
            late: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Establish the stream now instead of on first call.
    pub fn connect(&mut self) -> Result<(), RpcError> {
        if self.channel.is_none() {
            self.channel = Some(self.open()?);
        }
        Ok(())
    }

    fn open(&self) -> Result<Channel, RpcError> {
        let stream = match &self.endpoint {
            Endpoint::Unix(path) => UnixStream::connect(path)
                .map(Stream::Unix)
                .map_err(RpcError::Connect)?,
            Endpoint::Tcp(addr) => {
                Stream::Tcp(connect_tcp(addr, self.connect_timeout).map_err(RpcError::Connect)?)
            }
        };
        stream.set_timeouts(Some(self.rpc_timeout))?;
        let writer = stream.try_clone()?;
        debug!(endpoint = %self.endpoint, "connected");
        Ok(Channel {
            reader: BufReader::new(stream),
            writer,
            line: Vec::new(),
        })
    }

    /// Send one request and wait for its response.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.connect()?;
        let id = self.next_id;
        self.next_id += 1;
        let result = self.exchange(id, method, params);
        match &result {
            Err(RpcError::Timeout(_)) => {
                self.pending.insert(id, method.to_string());
            }
            Err(RpcError::Connect(_))
            | Err(RpcError::Io(_))
            | Err(RpcError::Closed)
            | Err(RpcError::Malformed(_)) => {
                // Answers owed on the old stream will never arrive.
                self.channel = None;
                self.pending.clear();
            }
            _ => {}
        }
        result
    }

    /// Take the late results of timed-out `method` calls.
    pub fn take_late(&mut self, method: &str) -> Vec<Value> {
        let (taken, kept) = std::mem::take(&mut self.late)
            .into_iter()
            .partition(|(m, _)| m == method);
        self.late = kept;
        taken.into_iter().map(|(_, value)| value).collect()
    }

    /// [`call`](Self::call) and decode the result.
    pub fn call_as<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params)?;
        serde_json::from_value(value).map_err(|e| {
            RpcError::Malformed(format!("unexpected result for {}: {}", method, e))
        })
    }

    fn exchange(&mut self, id: u64, method: &str, params: Value) -> Result<Value, RpcError> {
        let timeout = self.rpc_timeout;
        let Some(channel) = self.channel.as_mut() else {
            return Err(RpcError::Closed);
        };

        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)
            .map_err(|e| RpcError::Malformed(format!("request encoding: {}", e)))?;
        trace!(endpoint = %self.endpoint, id, method, "send");
        // A half-written request would desync the stream, so write failures
        // of any kind drop it.
        write_line(&mut channel.writer, &line)?;

        loop {
            let n = channel
                .reader
                .read_until(b'\n', &mut channel.line)
                .map_err(|e| map_io(e, timeout))?;
            if n == 0 || channel.line.last() != Some(&b'\n') {
                return Err(RpcError::Closed);
            }
            let raw = std::mem::take(&mut channel.line);
            let text = std::str::from_utf8(&raw)
                .map_err(|e| RpcError::Malformed(e.to_string()))?
                .trim();
            if text.is_empty() {
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_str(text)
                .map_err(|e| RpcError::Malformed(e.to_string()))?;
            let answered = response.id.as_ref().and_then(Value::as_u64);
            if answered == Some(id) {
                return match (response.result, response.error) {
                    (_, Some(err)) => Err(RpcError::Remote(err)),
                    (Some(result), None) => Ok(result),
                    (None, None) => Ok(Value::Null),
                };
            }
            // A parse error reply has no id and answers this request.
            if response.id.is_none() {
                if let Some(err) = response.error {
                    return Err(RpcError::Remote(err));
                }
            }
            match answered.and_then(|stale| self.pending.remove(&stale)) {
                Some(late_method) => {
                    debug!(endpoint = %self.endpoint, id = ?answered, method = %late_method, "late response");
                    if let (Some(result), None) = (response.result, response.error) {
                        self.late.push((late_method, result));
                    }
                }
                None => {
                    trace!(endpoint = %self.endpoint, expected = id, got = ?response.id, "skipping stale response");
                }
            }
        }
    }
}

fn map_io(err: io::Error, timeout: Duration) -> RpcError {
    if RpcError::is_timeout(&err) {
        RpcError::Timeout(timeout)
    } else {
        RpcError::Io(err)
    }
}

pub(crate) fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn connect_tcp(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no addresses", addr),
        )
    }))
}
