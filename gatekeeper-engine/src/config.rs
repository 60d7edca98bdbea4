// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use gatekeeper_messenger::MessengerConfig;
use serde::{Deserialize, Serialize};

/// Default time after which an unused, offline user is evicted.
pub const DEFAULT_HOUSEKEEPER_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval between two housekeeper sweeps.
pub const DEFAULT_HOUSEKEEPER_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound of concurrently exported user shards.
pub const DEFAULT_EXPORT_MAX_SHARDS: usize = 15;

/// Default number of users per export shard.
pub const DEFAULT_EXPORT_SHARD_SIZE: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of this engine instance, used as `server` context and in export headers.
    pub server_name: String,

    /// Users not used for this long are evicted unless their session is online.
    #[serde(with = "duration_secs")]
    pub housekeeper_timeout: Duration,

    /// Interval of the background housekeeper.
    #[serde(with = "duration_secs")]
    pub housekeeper_interval: Duration,

    /// Remove expired temporary nodes from loaded holders on every housekeeper tick.
    pub expiry_audit: bool,

    /// Refuse inserting nodes which are almost equal to an existing node instead of replacing
    /// them.
    pub strict_insertion: bool,

    /// Broadcast mutations to other instances and act on theirs.
    pub messenger_enabled: bool,

    /// Give users without any parent group the default group when they are loaded.
    pub apply_default_group: bool,

    /// Upper bound of concurrently exported user shards.
    pub export_max_shards: usize,

    /// Number of users per export shard.
    pub export_shard_size: usize,

    pub messenger: MessengerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: "global".to_string(),
            housekeeper_timeout: DEFAULT_HOUSEKEEPER_TIMEOUT,
            housekeeper_interval: DEFAULT_HOUSEKEEPER_INTERVAL,
            expiry_audit: true,
            strict_insertion: false,
            messenger_enabled: true,
            apply_default_group: true,
            export_max_shards: DEFAULT_EXPORT_MAX_SHARDS,
            export_shard_size: DEFAULT_EXPORT_SHARD_SIZE,
            messenger: MessengerConfig::default(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
