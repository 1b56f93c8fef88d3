//! Device status cache.
//!
//! A flat string map shared by the reactor and the bus notice handlers.
//! Keys are namespaced by the bus group they came from:
//!
//! - `szyc:train_num`, `szyc:carriage_num`, `szyc:position_num`
//! - `base_info:firmware`, `base_info:device_type`, `base_info:model`, ...

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

pub const TRAIN_NUM: &str = "szyc:train_num";
pub const CARRIAGE_NUM: &str = "szyc:carriage_num";
pub const POSITION_NUM: &str = "szyc:position_num";
pub const FIRMWARE: &str = "base_info:firmware";
pub const DEVICE_TYPE: &str = "base_info:device_type";
pub const MODEL: &str = "base_info:model";

/// Group prefix for train identity items.
pub const SZYC_GROUP: &str = "szyc";
/// Group prefix for device description items.
pub const BASE_INFO_GROUP: &str = "base_info";

/// Cloneable handle to the shared cache.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatusCache {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl DeviceStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // A panicking writer cannot leave a half-written String behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    /// Store every member of a bus `items` object as `<group>:<name>`.
    ///
    /// Strings are stored as-is, numbers and booleans in their JSON text
    /// form; nulls, arrays and objects are skipped. Returns how many
    /// entries were written.
    pub fn update_group(&self, group: &str, items: &serde_json::Map<String, Value>) -> usize {
        let mut map = self.lock();
        let mut written = 0;
        for (name, value) in items {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            map.insert(format!("{group}:{name}"), text);
            written += 1;
        }
        written
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
