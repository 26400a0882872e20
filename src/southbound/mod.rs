//! Southbound device sessions
//!
//! Devices connect over TCP and speak line-delimited JSON. Session tasks
//! only translate between the wire and [`SessionEvent`]s; all controller
//! state stays with the single event loop that consumes them.

pub mod message;
pub mod server;

pub use message::{ControllerMessage, DeviceMessage};
pub use server::{bind, serve, Acceptor};

use crate::dataplane::DeviceEvent;
use crate::flow::{Command, DeviceId};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Connection sequence number, unique for the process lifetime
pub type SessionId = u64;

/// What a session task reports to the event loop
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake finished; `sender` reaches the device
    Opened {
        device: DeviceId,
        session: SessionId,
        sender: mpsc::UnboundedSender<ControllerMessage>,
    },
    Message {
        device: DeviceId,
        session: SessionId,
        event: DeviceEvent,
    },
    Closed {
        device: DeviceId,
        session: SessionId,
    },
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    sender: mpsc::UnboundedSender<ControllerMessage>,
}

/// The live session of each connected device
///
/// A device that reconnects replaces its previous session; late events
/// from the replaced session are stale and must be dropped.
#[derive(Debug, Default)]
pub struct Sessions {
    by_device: HashMap<DeviceId, Session>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns true if it replaced an older one.
    pub fn attach(
        &mut self,
        device: DeviceId,
        session: SessionId,
        sender: mpsc::UnboundedSender<ControllerMessage>,
    ) -> bool {
        self.by_device
            .insert(device, Session { id: session, sender })
            .is_some()
    }

    pub fn is_current(&self, device: DeviceId, session: SessionId) -> bool {
        self.by_device
            .get(&device)
            .is_some_and(|s| s.id == session)
    }

    /// Drop a session. Returns false if it was already replaced.
    pub fn detach(&mut self, device: DeviceId, session: SessionId) -> bool {
        if self.is_current(device, session) {
            self.by_device.remove(&device);
            true
        } else {
            false
        }
    }

    /// Hand a command to its device's writer. Fire-and-forget.
    pub fn deliver(&self, command: Command) {
        let device = command.device();
        match self.by_device.get(&device) {
            Some(session) => {
                if session.sender.send(command.into()).is_err() {
                    debug!("device {}: writer gone, command dropped", device);
                }
            }
            None => debug!("device {}: no session, command dropped", device),
        }
    }

    pub fn len(&self) -> usize {
        self.by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FramePayload, Output};

    fn emit(device: DeviceId) -> Command {
        Command::EmitFrame {
            device,
            in_port: None,
            output: Output::Flood,
            payload: FramePayload::Data(vec![0]),
        }
    }

    #[test]
    fn test_deliver_routes_by_device() {
        let mut sessions = Sessions::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        sessions.attach(1, 10, tx1);
        sessions.attach(2, 11, tx2);

        sessions.deliver(emit(2));
        sessions.deliver(emit(3));

        assert!(rx1.try_recv().is_err());
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ControllerMessage::PacketOut { .. }
        ));
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let mut sessions = Sessions::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        assert!(!sessions.attach(1, 10, old_tx));
        assert!(sessions.attach(1, 11, new_tx));

        assert!(!sessions.is_current(1, 10));
        assert!(!sessions.detach(1, 10));
        assert_eq!(sessions.len(), 1);

        assert!(sessions.detach(1, 11));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_deliver_to_closed_writer_is_ignored() {
        let mut sessions = Sessions::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.attach(1, 10, tx);
        drop(rx);

        sessions.deliver(emit(1));
        assert_eq!(sessions.len(), 1);
    }
}
