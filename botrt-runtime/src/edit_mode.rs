//! Realtime edit-mode gate
//!
//! Every bot mutation asks the gate how the bot's space treats writes. The
//! provider is consulted on every call and may be swapped at any time.

use botrt_types::{RealtimeEditMode, Space};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decides the edit mode of a space
pub trait EditModeProvider: Send + Sync {
    fn edit_mode(&self, space: &Space) -> RealtimeEditMode;
}

impl<F> EditModeProvider for F
where
    F: Fn(&Space) -> RealtimeEditMode + Send + Sync,
{
    fn edit_mode(&self, space: &Space) -> RealtimeEditMode {
        self(space)
    }
}

/// Built-in mapping of the well-known spaces
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEditModes;

impl EditModeProvider for DefaultEditModes {
    fn edit_mode(&self, space: &Space) -> RealtimeEditMode {
        match space.as_str() {
            Space::HISTORY | Space::ERROR | Space::ADMIN => RealtimeEditMode::Delayed,
            Space::CERTIFIED | Space::BOOTSTRAP => RealtimeEditMode::None,
            _ => RealtimeEditMode::Immediate,
        }
    }
}

/// Explicit overrides on top of [`DefaultEditModes`]
#[derive(Debug, Clone, Default)]
pub struct EditModeMap {
    modes: BTreeMap<String, RealtimeEditMode>,
}

impl EditModeMap {
    pub fn new(modes: BTreeMap<String, RealtimeEditMode>) -> Self {
        Self { modes }
    }

    pub fn with(mut self, space: impl Into<String>, mode: RealtimeEditMode) -> Self {
        self.modes.insert(space.into(), mode);
        self
    }
}

impl EditModeProvider for EditModeMap {
    fn edit_mode(&self, space: &Space) -> RealtimeEditMode {
        self.modes
            .get(space.as_str())
            .copied()
            .unwrap_or_else(|| DefaultEditModes.edit_mode(space))
    }
}

/// An [`EditModeMap`] a host can change while the runtime holds it.
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct SharedEditModes {
    modes: Arc<RwLock<EditModeMap>>,
}

impl SharedEditModes {
    pub fn new(map: EditModeMap) -> Self {
        Self {
            modes: Arc::new(RwLock::new(map)),
        }
    }

    pub fn set(&self, space: impl Into<String>, mode: RealtimeEditMode) {
        self.modes.write().modes.insert(space.into(), mode);
    }

    /// Drop an override so the space falls back to its default mode
    pub fn reset(&self, space: &str) {
        self.modes.write().modes.remove(space);
    }
}

impl EditModeProvider for SharedEditModes {
    fn edit_mode(&self, space: &Space) -> RealtimeEditMode {
        self.modes.read().edit_mode(space)
    }
}

/// Holds the current provider
#[derive(Clone)]
pub struct EditModeGate {
    provider: Arc<dyn EditModeProvider>,
}

impl EditModeGate {
    pub fn new(provider: Arc<dyn EditModeProvider>) -> Self {
        Self { provider }
    }

    pub fn mode_for(&self, space: &Space) -> RealtimeEditMode {
        self.provider.edit_mode(space)
    }

    pub fn set_provider(&mut self, provider: Arc<dyn EditModeProvider>) {
        self.provider = provider;
    }
}

impl Default for EditModeGate {
    fn default() -> Self {
        Self::new(Arc::new(DefaultEditModes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modes() {
        let gate = EditModeGate::default();
        assert_eq!(gate.mode_for(&Space::shared()), RealtimeEditMode::Immediate);
        assert_eq!(gate.mode_for(&Space::temp_local()), RealtimeEditMode::Immediate);
        assert_eq!(gate.mode_for(&Space::temp_shared()), RealtimeEditMode::Immediate);
        assert_eq!(gate.mode_for(&Space::history()), RealtimeEditMode::Delayed);
        assert_eq!(gate.mode_for(&Space::admin()), RealtimeEditMode::Delayed);
        assert_eq!(gate.mode_for(&Space::certified()), RealtimeEditMode::None);
        assert_eq!(gate.mode_for(&Space::bootstrap()), RealtimeEditMode::None);
        assert_eq!(gate.mode_for(&Space::new("custom")), RealtimeEditMode::Immediate);
    }

    #[test]
    fn test_map_overrides_fall_back_to_defaults() {
        let map = EditModeMap::default().with("delayed", RealtimeEditMode::Delayed);
        assert_eq!(map.edit_mode(&Space::new("delayed")), RealtimeEditMode::Delayed);
        assert_eq!(map.edit_mode(&Space::certified()), RealtimeEditMode::None);
    }

    #[test]
    fn test_provider_is_swappable() {
        let mut gate = EditModeGate::default();
        gate.set_provider(Arc::new(|_: &Space| RealtimeEditMode::None));
        assert_eq!(gate.mode_for(&Space::shared()), RealtimeEditMode::None);
    }

    #[test]
    fn test_shared_modes_change_in_place() {
        let shared = SharedEditModes::default();
        let gate = EditModeGate::new(Arc::new(shared.clone()));
        assert_eq!(gate.mode_for(&Space::shared()), RealtimeEditMode::Immediate);

        shared.set("shared", RealtimeEditMode::Delayed);
        assert_eq!(gate.mode_for(&Space::shared()), RealtimeEditMode::Delayed);

        shared.reset("shared");
        assert_eq!(gate.mode_for(&Space::shared()), RealtimeEditMode::Immediate);
    }
}
