//! Tracks which terrain instance is authoritative

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::error::Error;
use crate::core::types::Result;

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    active: Option<(u64, String)>,
}

/// Shared registry allowing at most one active terrain.
///
/// Clones share state. Pass the same registry to every terrain the host
/// creates; the first to register wins.
#[derive(Debug, Clone, Default)]
pub struct TerrainRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TerrainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the active slot. Fails with `AlreadyActive` naming the holder.
    pub fn register(&self, name: &str) -> Result<Registration> {
        let mut state = self.lock();
        if let Some((_, active)) = &state.active {
            return Err(Error::AlreadyActive(active.clone()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.active = Some((id, name.to_string()));
        Ok(Registration {
            registry: self.clone(),
            id,
        })
    }

    /// Name of the active terrain
    pub fn active(&self) -> Option<String> {
        self.lock().active.as_ref().map(|(_, name)| name.clone())
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    fn unregister(&self, id: u64) {
        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|(active, _)| *active == id) {
            state.active = None;
        }
    }
}

/// Held by the active terrain; dropping it frees the slot
#[derive(Debug)]
pub struct Registration {
    registry: TerrainRegistry,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_registration_fails() {
        let registry = TerrainRegistry::new();
        let first = registry.register("alpha").unwrap();
        assert_eq!(registry.active().as_deref(), Some("alpha"));

        match registry.clone().register("beta") {
            Err(Error::AlreadyActive(name)) => assert_eq!(name, "alpha"),
            other => panic!("expected AlreadyActive, got {:?}", other.map(|_| ())),
        }

        drop(first);
        assert!(!registry.is_active());
        let _second = registry.register("beta").unwrap();
        assert_eq!(registry.active().as_deref(), Some("beta"));
    }
}
