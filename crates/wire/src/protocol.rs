//! Typed request and response shapes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Management commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "BACKUP")]
    Backup,
    #[serde(rename = "LIST_BACKUP")]
    ListBackup,
    #[serde(rename = "RESTORE")]
    Restore,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "STATUS")]
    Status,
    #[serde(rename = "DETAILS")]
    Details,
    #[serde(rename = "ISALIVE")]
    IsAlive,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "RESET")]
    Reset,
    #[serde(rename = "RELOAD")]
    Reload,
    #[serde(rename = "ARCHIVE")]
    Archive,
    #[serde(rename = "VERIFY")]
    Verify,
    #[serde(rename = "RETAIN")]
    Retain,
}

/// One request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The verb
    pub command: Command,
    /// Verb-specific arguments
    #[serde(default)]
    pub arguments: Value,
}

impl Request {
    /// Request with an argument object.
    pub fn new(command: Command, arguments: Value) -> Self {
        Request { command, arguments }
    }

    /// Request with no arguments.
    pub fn bare(command: Command) -> Self {
        Request {
            command,
            arguments: Value::Null,
        }
    }

    /// String argument lookup.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key)?.as_str()
    }
}

/// One response frame. Streaming commands emit several, ending with
/// `final: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the command name
    #[serde(rename = "Response")]
    pub response: String,
    /// RFC 3339 server time
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// Whether the verb succeeded
    #[serde(rename = "Outcome")]
    pub outcome: bool,
    /// Verb-specific payload
    #[serde(rename = "Data", default)]
    pub data: Value,
    /// Last message of this reply stream
    #[serde(rename = "Final", default)]
    pub final_message: bool,
}

impl Response {
    /// Successful terminal response.
    pub fn ok(command: &str, data: Value) -> Self {
        Response {
            response: command.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            outcome: true,
            data,
            final_message: true,
        }
    }

    /// Non-terminal streamed item.
    pub fn item(command: &str, data: Value) -> Self {
        Response {
            final_message: false,
            ..Response::ok(command, data)
        }
    }

    /// Failed terminal response.
    pub fn error(command: &str, detail: &str) -> Self {
        Response {
            response: command.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            outcome: false,
            data: serde_json::json!({ "Error": detail }),
            final_message: true,
        }
    }
}
