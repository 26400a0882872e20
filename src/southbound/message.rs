//! Line-delimited JSON wire messages
//!
//! Every message is one JSON object on its own line, tagged by `"type"`.

use crate::dataplane::DeviceEvent;
use crate::flow::{
    Command, DeviceId, FlowAction, FlowMatch, FramePayload, Output, PortNo, RuleKey,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Messages a device sends to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// First message on a connection
    Hello { device_id: DeviceId },
    Ready,
    PacketIn {
        in_port: PortNo,
        #[serde(default)]
        buffer_id: Option<u32>,
        data: Vec<u8>,
    },
    /// The device refused a rule
    Error {
        #[serde(default)]
        rule_key: Option<String>,
        reason: String,
    },
}

impl DeviceMessage {
    /// Translate into a dispatcher event for `device`
    ///
    /// `Hello` is consumed by the session handshake and yields nothing.
    pub fn into_event(self, device: DeviceId) -> Option<DeviceEvent> {
        match self {
            DeviceMessage::Hello { .. } => None,
            DeviceMessage::Ready => Some(DeviceEvent::Ready(device)),
            DeviceMessage::PacketIn {
                in_port,
                buffer_id,
                data,
            } => Some(DeviceEvent::FrameReceived {
                device,
                in_port,
                data,
                buffer_id,
            }),
            DeviceMessage::Error { rule_key, reason } => {
                let rule_key = rule_key.and_then(|key| match key.parse::<RuleKey>() {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!("device {}: {}", device, e);
                        None
                    }
                });
                Some(DeviceEvent::RuleRejected {
                    device,
                    rule_key,
                    reason,
                })
            }
        }
    }
}

/// Messages the controller sends to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    FlowMod {
        priority: u16,
        #[serde(rename = "match")]
        matcher: FlowMatch,
        actions: Vec<FlowAction>,
        rule_key: Option<RuleKey>,
        buffer_id: Option<u32>,
    },
    PacketOut {
        in_port: Option<PortNo>,
        output: Output,
        buffer_id: Option<u32>,
        data: Option<Vec<u8>>,
    },
}

impl From<Command> for ControllerMessage {
    fn from(command: Command) -> Self {
        match command {
            Command::InstallRule {
                rule, buffer_id, ..
            } => ControllerMessage::FlowMod {
                priority: rule.priority,
                matcher: rule.matcher,
                actions: rule.actions,
                rule_key: rule.rule_key,
                buffer_id,
            },
            Command::EmitFrame {
                in_port,
                output,
                payload,
                ..
            } => {
                let (buffer_id, data) = match payload {
                    FramePayload::Data(data) => (None, Some(data)),
                    FramePayload::Buffered(id) => (Some(id), None),
                };
                ControllerMessage::PacketOut {
                    in_port,
                    output,
                    buffer_id,
                    data,
                }
            }
        }
    }
}

/// Decode one line received from a device
pub fn decode_line(line: &str) -> Result<DeviceMessage> {
    serde_json::from_str(line.trim()).map_err(|e| Error::Parse(e.to_string()))
}

/// Encode a controller message as one newline-terminated line
pub fn encode_line(message: &ControllerMessage) -> Result<String> {
    let mut line = serde_json::to_string(message).map_err(|e| Error::Parse(e.to_string()))?;
    line.push('\n');
    Ok(line)
}
