//! Command Handler
//!
//! Routes parsed commands to the storage engine and enforces the
//! read-only policy on replica nodes.

use std::sync::Arc;

use crate::config::ReplicaType;
use crate::engine::Engine;
use crate::error::{Error, Result};

use super::parser::{parse, Command};

/// Success response body
pub const RESPONSE_OK: &str = "OK";

/// Response body for HELP and ?
pub const HELP_TEXT: &str = "Available commands:
  SET <key> <value>  - store a value
  GET <key>          - fetch a value
  DEL <key>          - remove a key
  CLEAR              - remove all keys
  HELP or ?          - show this message";

/// Dispatches client commands against the engine
pub struct Handler {
    engine: Arc<Engine>,
    role: ReplicaType,
}

impl Handler {
    pub fn new(engine: Arc<Engine>, role: ReplicaType) -> Self {
        Self { engine, role }
    }

    /// Handle one request line and produce the response body
    pub async fn handle(&self, input: &str) -> Result<String> {
        let command = parse(input)?;

        if self.role == ReplicaType::Replica && !command.is_read_only() {
            return Err(Error::ReadOnlyReplica);
        }

        match command {
            Command::Set { key, value } => {
                self.engine.set(key.as_bytes(), value.as_bytes()).await?;
                Ok(RESPONSE_OK.to_string())
            }
            Command::Get { key } => match self.engine.get(key.as_bytes()).await {
                Some(value) => Ok(String::from_utf8_lossy(&value).into_owned()),
                None => Err(Error::KeyNotFound),
            },
            Command::Delete { key } => {
                self.engine.delete(key.as_bytes()).await?;
                Ok(RESPONSE_OK.to_string())
            }
            Command::Clear => {
                self.engine.clear().await?;
                Ok(RESPONSE_OK.to_string())
            }
            Command::Help => Ok(HELP_TEXT.to_string()),
        }
    }
}
