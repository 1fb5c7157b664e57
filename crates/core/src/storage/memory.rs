//! In-memory backend
//!
//! Keeps payloads in a mutex-guarded map. Used by tests and by embedders
//! that ship the payload somewhere else themselves.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

use super::StateStore;

#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, user_id: &str) -> Result<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slots.get(user_id).cloned())
    }

    fn save(&self, user_id: &str, payload: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(user_id.to_string(), payload.to_string());
        Ok(())
    }

    fn location_hint(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_independent() {
        let store = MemoryStore::new();
        store.save("a", "1").unwrap();
        store.save("b", "2").unwrap();
        assert_eq!(store.load("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.load("b").unwrap().as_deref(), Some("2"));
        assert_eq!(store.load("c").unwrap(), None);
    }
}
