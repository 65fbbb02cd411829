use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value};

use crate::dispatch::Request;
use crate::jobs::Shutdown;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const CLIENT_READ_POLL: Duration = Duration::from_millis(200);
const CLIENT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages delivered to the interactive loop.
#[derive(Debug)]
pub enum Control {
    Request {
        request: Request,
        reply: Sender<Value>,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum TransportError {
    Bind {
        addr: String,
        error: std::io::Error,
    },
    Connect {
        addr: String,
        error: std::io::Error,
    },
    Io(std::io::Error),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Bind { addr, error } => write!(f, "failed to bind {addr}: {error}"),
            TransportError::Connect { addr, error } => {
                write!(f, "failed to connect to {addr}: {error}")
            }
            TransportError::Io(err) => write!(f, "transport i/o failed: {err}"),
            TransportError::Encode(err) => write!(f, "failed to encode request: {err}"),
            TransportError::Decode(err) => write!(f, "invalid reply: {err}"),
            TransportError::Closed => write!(f, "connection closed before a reply arrived"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Line-delimited JSON request/reply listener.
///
/// Each connection gets its own reader thread. A connection answers one request
/// before reading its next line, and the interactive loop handles requests from
/// all connections one at a time in arrival order.
pub struct CommandServer {
    listener: TcpListener,
}

impl CommandServer {
    pub fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|error| TransportError::Bind {
            addr: addr.to_owned(),
            error,
        })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(
        self,
        tx: Sender<Control>,
        shutdown: Shutdown,
    ) -> Result<JoinHandle<()>, TransportError> {
        self.listener.set_nonblocking(true)?;
        Ok(thread::spawn(move || self.serve(&tx, &shutdown)))
    }

    fn serve(&self, tx: &Sender<Control>, shutdown: &Shutdown) {
        let mut clients: Vec<JoinHandle<()>> = Vec::new();
        while !shutdown.is_requested() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "client connected");
                    let tx = tx.clone();
                    let shutdown = shutdown.clone();
                    clients.push(thread::spawn(move || {
                        if let Err(err) = handle_client(stream, &tx, &shutdown) {
                            tracing::warn!(%peer, "client connection failed: {err}");
                        }
                    }));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    shutdown.wait_timeout(ACCEPT_POLL);
                }
                Err(err) => {
                    tracing::warn!("accept failed: {err}");
                    shutdown.wait_timeout(ACCEPT_POLL);
                }
            }
            clients.retain(|client| !client.is_finished());
        }
        for client in clients {
            let _ = client.join();
        }
        tracing::debug!("command server stopped");
    }
}

fn handle_client(
    stream: TcpStream,
    tx: &Sender<Control>,
    shutdown: &Shutdown,
) -> Result<(), TransportError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_POLL))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut line = Vec::new();

    loop {
        if shutdown.is_requested() {
            return Ok(());
        }
        // Timed-out reads keep their partial bytes in `line`.
        let at_eof = match reader.read_until(b'\n', &mut line) {
            Ok(0) if line.is_empty() => return Ok(()),
            Ok(_) => !line.ends_with(b"\n"),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let raw = String::from_utf8_lossy(&line).trim().to_owned();
        line.clear();
        if raw.is_empty() {
            if at_eof {
                return Ok(());
            }
            continue;
        }

        let reply = match serde_json::from_str::<Request>(&raw) {
            Ok(request) => {
                tracing::info!(cmd = %request.cmd, "request received");
                let (reply_tx, reply_rx) = mpsc::channel();
                if tx
                    .send(Control::Request {
                        request,
                        reply: reply_tx,
                    })
                    .is_err()
                {
                    return Ok(());
                }
                match wait_for_reply(&reply_rx, shutdown) {
                    Some(reply) => reply,
                    None => return Ok(()),
                }
            }
            Err(err) => json!({ "error": format!("Invalid request: {err}") }),
        };
        write_reply(&mut writer, &reply)?;
        if at_eof {
            return Ok(());
        }
    }
}

fn wait_for_reply(reply_rx: &Receiver<Value>, shutdown: &Shutdown) -> Option<Value> {
    loop {
        match reply_rx.recv_timeout(CLIENT_READ_POLL) {
            Ok(reply) => return Some(reply),
            Err(RecvTimeoutError::Timeout) if !shutdown.is_requested() => continue,
            Err(_) => return None,
        }
    }
}

fn write_reply<W: Write>(writer: &mut W, reply: &Value) -> Result<(), TransportError> {
    serde_json::to_writer(&mut *writer, reply).map_err(TransportError::Encode)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// One request/reply round trip, used by `barkeep send`.
pub fn send_request(addr: &str, request: &Request) -> Result<Value, TransportError> {
    let stream = TcpStream::connect(addr).map_err(|error| TransportError::Connect {
        addr: addr.to_owned(),
        error,
    })?;
    stream.set_read_timeout(Some(CLIENT_REPLY_TIMEOUT))?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    serde_json::to_writer(&mut writer, request).map_err(TransportError::Encode)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let mut reply = String::new();
    if BufReader::new(stream).read_line(&mut reply)? == 0 {
        return Err(TransportError::Closed);
    }
    serde_json::from_str(reply.trim()).map_err(TransportError::Decode)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
