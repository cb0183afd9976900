//! Per-session scratch storage.
//!
//! Each session has an input and an output map of JSON values. The maps live
//! only as long as the session: they are never persisted and are dropped when
//! the session closes or expires.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value;

/// Which half of the environment to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Input,
    Output,
}

#[derive(Debug, Default)]
struct SessionEnvironment {
    input: BTreeMap<String, Value>,
    output: BTreeMap<String, Value>,
}

impl SessionEnvironment {
    fn slot(&self, slot: Slot) -> &BTreeMap<String, Value> {
        match slot {
            Slot::Input => &self.input,
            Slot::Output => &self.output,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut BTreeMap<String, Value> {
        match slot {
            Slot::Input => &mut self.input,
            Slot::Output => &mut self.output,
        }
    }
}

/// Environments of all live sessions, keyed by uuid.
#[derive(Debug, Default)]
pub(crate) struct Environments {
    sessions: RwLock<HashMap<String, SessionEnvironment>>,
}

impl Environments {
    pub(crate) fn get(&self, uuid: &str, slot: Slot, key: &str) -> Option<Value> {
        self.sessions
            .read()
            .unwrap()
            .get(uuid)
            .and_then(|env| env.slot(slot).get(key).cloned())
    }

    /// Store `value` under `key`, or remove the key when `value` is `None`.
    /// Returns the previous value.
    pub(crate) fn set(
        &self,
        uuid: &str,
        slot: Slot,
        key: &str,
        value: Option<Value>,
    ) -> Option<Value> {
        let mut sessions = self.sessions.write().unwrap();
        match value {
            Some(value) => sessions
                .entry(uuid.to_string())
                .or_default()
                .slot_mut(slot)
                .insert(key.to_string(), value),
            None => sessions
                .get_mut(uuid)
                .and_then(|env| env.slot_mut(slot).remove(key)),
        }
    }

    /// Keys in sorted order.
    pub(crate) fn keys(&self, uuid: &str, slot: Slot) -> Vec<String> {
        self.sessions
            .read()
            .unwrap()
            .get(uuid)
            .map(|env| env.slot(slot).keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn all(&self, uuid: &str, slot: Slot) -> BTreeMap<String, Value> {
        self.sessions
            .read()
            .unwrap()
            .get(uuid)
            .map(|env| env.slot(slot).clone())
            .unwrap_or_default()
    }

    /// Drop everything stored for `uuid`. Returns whether anything was stored.
    pub(crate) fn clear(&self, uuid: &str) -> bool {
        self.sessions.write().unwrap().remove(uuid).is_some()
    }

    pub(crate) fn clear_all(&self) {
        self.sessions.write().unwrap().clear();
    }
}
