//! Protocol types for CLI-daemon communication.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":"1","command":{"action":"submit","request":"espresso","parameter":0}}
//! <- {"id":"1","success":true,"data":{"type":"accepted","request":"espresso","parameter":0}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::{RequestKind, StatusReport};

/// A request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Commands the daemon can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Hand a request to the controller.
    Submit {
        request: RequestKind,
        #[serde(default)]
        parameter: i32,
    },
    /// Read the published status.
    Status,
    /// Read event log entries newer than `after`.
    Events {
        #[serde(default)]
        after: u64,
    },
    /// Stop the controller and the daemon.
    Shutdown,
}

/// A response from daemon to CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// The controller took the request.
    Accepted { request: RequestKind, parameter: i32 },
    Status(StatusReport),
    Events { entries: Vec<EventEntry> },
    /// Generic success message.
    Ok { message: String },
}

/// One diagnostic log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub seq: u64,
    /// Local time, RFC 3339.
    pub timestamp: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ApplianceState;

    #[test]
    fn submit_wire_format() {
        let request = Request {
            id: "7".into(),
            command: Command::Submit {
                request: RequestKind::SetAroma,
                parameter: 3,
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"id":"7","command":{"action":"submit","request":"set_aroma","parameter":3}}"#
        );
        assert_eq!(serde_json::from_str::<Request>(&json).unwrap(), request);
    }

    #[test]
    fn parameter_and_after_are_optional() {
        let cmd: Command = serde_json::from_str(r#"{"action":"submit","request":"coffee"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Submit {
                request: RequestKind::Coffee,
                parameter: 0
            }
        );
        let cmd: Command = serde_json::from_str(r#"{"action":"events"}"#).unwrap();
        assert_eq!(cmd, Command::Events { after: 0 });
    }

    #[test]
    fn status_response_is_flattened() {
        let response = Response::success(
            "1",
            ResponseData::Status(StatusReport {
                state: ApplianceState::Idle,
                error: String::new(),
                busy: false,
                out_of_coffee: true,
            }),
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["data"]["type"], "status");
        assert_eq!(value["data"]["state"], "idle");
        assert_eq!(value["data"]["out_of_coffee"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_response_omits_data() {
        let response = Response::error("2", ApiError::controller_unavailable());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("data").is_none());
        assert_eq!(value["error"]["code"], "CONTROLLER_UNAVAILABLE");
    }
}
