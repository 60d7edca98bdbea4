// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for testing engines and code embedding them.
use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::{ContextSet, Node};
use gatekeeper_messenger::{MemoryHub, MemoryTransport, PingId};
use gatekeeper_store::Storage;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::events::{Event, EventBus};

pub type MemoryEngine<S> = Engine<S, MemoryTransport>;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Configuration with a recognisable server name and the background housekeeper practically
/// disabled, so tests drive it with [`Engine::tick`].
pub fn test_config(server_name: &str) -> EngineConfig {
    EngineConfig {
        server_name: server_name.to_string(),
        housekeeper_interval: Duration::from_secs(60 * 60),
        ..EngineConfig::default()
    }
}

/// Starts an engine on the given storage, connected to the other engines of the hub.
pub async fn spawn_engine<S: Storage>(
    storage: S,
    hub: &MemoryHub,
    config: EngineConfig,
) -> MemoryEngine<S> {
    let ping_id: PingId = config
        .server_name
        .parse()
        .unwrap_or_else(|_| PingId::random());
    Engine::builder(storage, hub.transport())
        .config(config)
        .ping_id(ping_id)
        .spawn()
        .await
        .expect("engine starts on healthy storage")
}

/// Builds a permanent permission node.
pub fn node(permission: &str, value: bool) -> Node {
    Node::builder(permission)
        .value(value)
        .build()
        .expect("valid permission")
}

pub fn context(pairs: &[(&str, &str)]) -> ContextSet {
    ContextSet::from_pairs(pairs.iter().copied()).expect("valid context")
}

/// Collects every event emitted on the bus.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        bus.subscribe(move |event| events.lock().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|event| f(event)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Polls the condition until it holds, panicking after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not become true in time");
}
