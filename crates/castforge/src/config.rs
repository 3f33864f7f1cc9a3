//! Factory configuration.

use castforge_encoder::{CompressionSettings, PoolConfig};
use serde::{Deserialize, Serialize};

use crate::{CastforgeError, DuplicatePolicy};

/// Settings for a [`PacketFactory`](crate::PacketFactory).
///
/// Every field has a default, so a config document only needs to name
/// what it changes:
///
/// ```rust
/// use castforge::FactoryConfig;
///
/// let config = FactoryConfig::from_json(r#"{
///     "save_uncompressed": true,
///     "compression": { "threshold": 512 }
/// }"#).unwrap();
/// assert!(config.save_uncompressed);
/// assert_eq!(config.compression.threshold, 512);
/// assert_eq!(config.compression.level, 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// How the compressed cache variant and one-off packets are framed.
    pub compression: CompressionSettings,

    /// Also keep an uncompressed copy of every prepared packet, for
    /// connections that haven't switched compression on yet.
    pub save_uncompressed: bool,

    /// How dispatchers hand prepared buffers to the connection by default.
    pub duplicate_policy: DuplicatePolicy,

    /// Buffer pool sizing.
    pub pool: PoolConfig,
}

impl FactoryConfig {
    /// Parses a JSON config document.
    ///
    /// # Errors
    /// Returns [`CastforgeError::Config`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, CastforgeError> {
        Ok(serde_json::from_str(json)?)
    }
}
