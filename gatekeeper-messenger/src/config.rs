// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::dedup::DEFAULT_DEDUP_WINDOW;

/// Default capacity of the channel delivering accepted messages to subscribers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Number of recently seen message ids remembered for deduplication.
    pub dedup_window: usize,

    /// Capacity of the channel delivering accepted messages.
    ///
    /// Subscribers falling further behind than this miss messages. This degrades to stale
    /// caches until the next full reload.
    pub channel_capacity: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
