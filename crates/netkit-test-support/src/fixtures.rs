//! Test fixtures and environment helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use netkit_core::Connectivity;
use serde_json::{Map, Value};

/// Connectivity double toggled by tests.
#[derive(Debug, Clone)]
pub struct ToggleConnectivity {
    online: Arc<AtomicBool>,
}

impl ToggleConnectivity {
    /// Start in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Flip reachability.
    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for ToggleConnectivity {
    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Unwrap a JSON object literal into a body map. Non-objects yield an empty map.
#[must_use]
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
