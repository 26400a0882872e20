//! TCP listener and per-device session tasks
//!
//! Each connection gets a reader task that turns lines into
//! [`SessionEvent`]s and a writer task that drains the session's outbound
//! queue. Neither task touches controller state.

use super::message::{decode_line, encode_line, ControllerMessage, DeviceMessage};
use super::{SessionEvent, SessionId};
use crate::flow::DeviceId;
use crate::{Error, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bind the southbound listener
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("southbound listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Pause after a failed accept, so descriptor exhaustion does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of inbound device connections
pub trait Acceptor {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept device connections until the event channel closes
///
/// A failed accept only affects the connection being accepted; the loop
/// logs it and keeps listening.
pub async fn serve<A>(listener: A, events: mpsc::Sender<SessionEvent>) -> Result<()>
where
    A: Acceptor + Send + Sync + 'static,
{
    let mut next_session: SessionId = 0;

    loop {
        let accepted = listener.accept().await;
        if events.is_closed() {
            return Ok(());
        }

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("southbound accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        next_session += 1;
        let session = next_session;
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = run_session(stream, peer, session, events).await {
                warn!("session {} ({}): {}", session, peer, e);
            }
        });
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    session: SessionId,
    events: mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let device = handshake(&mut lines).await?;
    info!("session {}: device {} connected from {}", session, device, peer);

    let (sender, outbound) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write_half, outbound, device));

    let opened = SessionEvent::Opened {
        device,
        session,
        sender,
    };
    if events.send(opened).await.is_err() {
        return Ok(());
    }

    let result = read_loop(&mut lines, device, session, &events).await;

    let _ = events.send(SessionEvent::Closed { device, session }).await;
    info!("session {}: device {} disconnected", session, device);
    result
}

async fn handshake(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Result<DeviceId> {
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| Error::Southbound("connection closed before hello".into()))?;

    match decode_line(&line)? {
        DeviceMessage::Hello { device_id } => Ok(device_id),
        other => Err(Error::Southbound(format!(
            "expected hello, got {:?}",
            other
        ))),
    }
}

async fn read_loop(
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    device: DeviceId,
    session: SessionId,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("device {}: skipping undecodable line: {}", device, e);
                continue;
            }
        };

        let Some(event) = message.into_event(device) else {
            debug!("device {}: repeated hello ignored", device);
            continue;
        };

        let message = SessionEvent::Message {
            device,
            session,
            event,
        };
        if events.send(message).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ControllerMessage>,
    device: DeviceId,
) {
    while let Some(message) = outbound.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("device {}: cannot encode message: {}", device, e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("device {}: write failed: {}", device, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::DeviceEvent;
    use crate::flow::Output;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    /// Listener whose first `failures` accepts fail like an aborted handshake
    struct FlakyListener {
        inner: TcpListener,
        failures: AtomicUsize,
    }

    impl Acceptor for FlakyListener {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(io::Error::from(io::ErrorKind::ConnectionAborted));
            }
            self.inner.accept().await
        }
    }

    async fn start() -> (SocketAddr, mpsc::Receiver<SessionEvent>) {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(serve(listener, tx));
        (addr, rx)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (addr, mut events) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"{\"type\":\"hello\",\"device_id\":5}\n")
            .await
            .unwrap();

        let sender = match events.recv().await.unwrap() {
            SessionEvent::Opened { device, sender, .. } => {
                assert_eq!(device, 5);
                sender
            }
            other => panic!("unexpected event {:?}", other),
        };

        client
            .write_all(b"garbage\n{\"type\":\"ready\"}\n")
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            SessionEvent::Message { event, .. } => assert_eq!(event, DeviceEvent::Ready(5)),
            other => panic!("unexpected event {:?}", other),
        }

        sender
            .send(ControllerMessage::PacketOut {
                in_port: None,
                output: Output::Port(2),
                buffer_id: None,
                data: Some(vec![1, 2]),
            })
            .unwrap();
        drop(sender);

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert!(received.contains("\"type\":\"packet_out\""));
        assert!(received.ends_with('\n'));

        drop(client);
        match events.recv().await.unwrap() {
            SessionEvent::Closed { device, .. } => assert_eq!(device, 5),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_without_hello_is_dropped() {
        let (addr, mut events) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"{\"type\":\"ready\"}\n").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_listener() {
        let inner = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = inner.local_addr().unwrap();
        let listener = FlakyListener {
            inner,
            failures: AtomicUsize::new(2),
        };
        let (tx, mut events) = mpsc::channel(16);
        let server = tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"{\"type\":\"hello\",\"device_id\":8}\n")
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Opened { device, .. } => assert_eq!(device, 8),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!server.is_finished());
        server.abort();
    }
}
