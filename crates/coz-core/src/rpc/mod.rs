//! Newline-delimited JSON-RPC 2.0 transport shared by the agent endpoint,
//! the control service and the client proxies.

pub mod connection;
pub mod protocol;

pub use connection::{Endpoint, RpcConnection, RpcError};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// How often a blocked connection re-checks the shutdown flag.
pub(crate) const SHUTDOWN_POLL: std::time::Duration = std::time::Duration::from_millis(200);

/// Serve one connection: read lines, dispatch, write responses.
///
/// The reader must have a read timeout set so the loop can observe
/// `shutdown`. Returns when the peer closes the stream or shutdown is
/// requested.
pub(crate) fn serve_lines<R, W, F>(
    reader: R,
    mut writer: W,
    shutdown: &AtomicBool,
    mut handle: F,
) -> io::Result<()>
where
    R: Read,
    W: Write,
    F: FnMut(&str) -> Option<JsonRpcResponse>,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                // Partial line stays in buf for the next read.
                continue;
            }
            Err(e) => return Err(e),
        }
        if buf.last() != Some(&b'\n') {
            // EOF in the middle of a line; handle what arrived.
            let line = String::from_utf8_lossy(&buf).into_owned();
            respond(&mut writer, &line, &mut handle)?;
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        respond(&mut writer, &line, &mut handle)?;
    }
}

fn respond<W, F>(writer: &mut W, line: &str, handle: &mut F) -> io::Result<()>
where
    W: Write,
    F: FnMut(&str) -> Option<JsonRpcResponse>,
{
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    // Notifications (no id) get no response
    if let Some(resp) = handle(trimmed) {
        let json = serde_json::to_string(&resp).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Serialization failed"}}"#
                .to_string()
        });
        connection::write_line(writer, &json)?;
    }
    Ok(())
}
