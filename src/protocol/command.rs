//! Command definitions
//!
//! Represents commands from clients.

use crate::error::AllyError;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Put = 0x02,
    Ping = 0x04,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Ping (health check)
    Ping,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Put { .. } => CommandType::Put,
            Command::Ping => CommandType::Ping,
        }
    }
}

impl TryFrom<u8> for CommandType {
    type Error = AllyError;

    fn try_from(byte: u8) -> Result<Self, AllyError> {
        match byte {
            0x01 => Ok(CommandType::Get),
            0x02 => Ok(CommandType::Put),
            0x04 => Ok(CommandType::Ping),
            _ => Err(AllyError::Protocol(format!(
                "Unknown command type: 0x{:02x}",
                byte
            ))),
        }
    }
}
