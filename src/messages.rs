// messages.rs
//
// Wire envelopes for the persistent connections, one closed enum per
// direction. Every message carries a `type` discriminator; a tag that does
// not deserialize into one of these variants is a malformed message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{IrrigationState, RobotStatus, ShuttersState};

/// Messages a device connection may send to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceMessage {
    /// First-message credential. Anything else as the first message is
    /// fatal to the connection.
    Auth { secret: String },
    /// Wholesale state replacement. The blob is interpreted per class by
    /// the hub; the registry stores whatever parses, plus a timestamp.
    State { data: serde_json::Value },
    /// Acknowledgment of a forwarded command. Observed only, no state
    /// effect.
    Ack {
        #[serde(default)]
        command: Option<String>,
    },
    /// Irrigation run finished; forwarded verbatim to controllers.
    IrrigationDone {
        #[serde(default)]
        result: serde_json::Value,
    },
    /// Result of a previously forwarded command; forwarded verbatim to
    /// controllers.
    CommandResult {
        #[serde(default)]
        result: serde_json::Value,
    },
}

/// Messages the hub sends to a device connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubToDevice {
    AuthOk,
    AuthRejected,
    /// Ask the device to push its current full state.
    RequestState,
    /// Forwarded shutters command.
    Command {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<u8>,
    },
    /// Forwarded irrigation command.
    IrrigationCommand {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
    /// Ask the shutters device for its schedule table. No response
    /// correlation exists; any answer comes back as a COMMAND_RESULT.
    GetSchedules,
}

/// Messages a controller connection may send to the hub. Every
/// command-bearing message carries the controller token; the token is not
/// session-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerMessage {
    /// Plain shutters command. Silently dropped when no shutters device is
    /// live; only the HTTP equivalent reports that case.
    Command {
        token: String,
        action: String,
        #[serde(default)]
        channel: Option<u8>,
        #[serde(default)]
        value: Option<u8>,
    },
    IrrigationCommand {
        token: String,
        action: String,
        #[serde(default)]
        duration: Option<u64>,
    },
    RobotCommand {
        token: String,
        #[serde(rename = "robotId")]
        robot_id: String,
        command: String,
    },
}

/// Messages the hub fans out to controller connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubToController {
    StateUpdate { data: ShuttersState },
    IrrigationUpdate { data: IrrigationState },
    RobotsUpdate { data: HashMap<String, RobotStatus> },
    IrrigationDone { result: serde_json::Value },
    CommandResult { result: serde_json::Value },
    Error { message: String, code: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_tag_round_trips() {
        let msg: DeviceMessage = serde_json::from_str(r#"{"type":"AUTH","secret":"s"}"#).unwrap();
        assert_eq!(
            msg,
            DeviceMessage::Auth {
                secret: "s".to_string()
            }
        );
    }

    #[test]
    fn hub_to_device_unit_variants_serialize_with_tag_only() {
        let json = serde_json::to_value(&HubToDevice::AuthOk).unwrap();
        assert_eq!(json, serde_json::json!({"type": "AUTH_OK"}));
        let json = serde_json::to_value(&HubToDevice::RequestState).unwrap();
        assert_eq!(json, serde_json::json!({"type": "REQUEST_STATE"}));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let res = serde_json::from_str::<DeviceMessage>(r#"{"type":"BOGUS"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn robot_command_uses_camel_case_id() {
        let msg: ControllerMessage = serde_json::from_str(
            r#"{"type":"ROBOT_COMMAND","token":"t","robotId":"vac1","command":"start"}"#,
        )
        .unwrap();
        match msg {
            ControllerMessage::RobotCommand { robot_id, command, .. } => {
                assert_eq!(robot_id, "vac1");
                assert_eq!(command, "start");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn ack_command_field_is_optional() {
        let msg: DeviceMessage = serde_json::from_str(r#"{"type":"ACK"}"#).unwrap();
        assert_eq!(msg, DeviceMessage::Ack { command: None });
    }
}
