use crate::rpc::message_codec::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod client;
pub mod events;
pub mod message_codec;
pub mod messages;
pub mod server;

pub const DEFAULT_PORT: u16 = 12345;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelaySettings {
    pub listen_address: String,
    pub listen_port: u16,
    /// Directory every requested filename is resolved against
    pub base_dir: PathBuf,
    pub max_frame_len: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            listen_port: DEFAULT_PORT,
            base_dir: PathBuf::from("."),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}
