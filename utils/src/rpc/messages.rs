use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const UPLOAD_ACTION: &str = "upload";

/// Client-to-relay request, `{"action": "upload", "filename": "<name>"}` on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Upload { filename: String },
}

impl Command {
    pub fn upload(filename: impl Into<String>) -> Self {
        Command::Upload {
            filename: filename.into(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Upload { .. } => UPLOAD_ACTION,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Upload { filename } => write!(f, "upload {}", filename),
        }
    }
}

/// Loose shape of an incoming command, checked field by field so every
/// malformed request still gets a precise error response.
#[derive(Deserialize, Debug)]
struct RawCommand {
    action: Option<String>,
    filename: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command")]
    InvalidJson,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Upload failed")]
    UploadFailed,
}

/// Decodes a frame payload into a [`Command`].
pub fn parse_command(payload: &[u8]) -> Result<Command, CommandError> {
    let raw: RawCommand = serde_json::from_slice(payload).map_err(|_| CommandError::InvalidJson)?;
    let action = raw.action.ok_or(CommandError::MissingField("action"))?;

    match action.as_str() {
        UPLOAD_ACTION => {
            let filename = raw.filename.ok_or(CommandError::MissingField("filename"))?;
            Ok(Command::Upload { filename })
        }
        _ => Err(CommandError::UnsupportedAction(action)),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Relay-to-client result, `{"status": "success"|"error", "message": "<text>"}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub message: String,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }

    pub fn upload_successful() -> Self {
        Self::success("Upload successful")
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<CommandError> for Response {
    fn from(err: CommandError) -> Self {
        Response::error(err.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            Status::Success => write!(f, "success: {}", self.message),
            Status::Error => write!(f, "error: {}", self.message),
        }
    }
}
