//! Engine tuning shared by every host.

use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::pipeline::DEFAULT_SEND_SLOTS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bytes per chunk handed to the transport.
    pub chunk_size: usize,
    /// Chunks allowed in flight at once.
    pub send_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            send_slots: DEFAULT_SEND_SLOTS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.send_slots == 0 || self.send_slots > usize::from(u16::MAX) {
            return Err(ConfigError::SendSlots(self.send_slots));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("send_slots must be between 1 and 65535, got {0}")]
    SendSlots(usize),
    #[error("response_unit_size must be greater than zero")]
    ZeroResponseUnit,
}
