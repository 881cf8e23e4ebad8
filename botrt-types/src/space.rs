use serde::{Deserialize, Serialize};
use std::fmt;

/// The storage space a bot lives in
///
/// Spaces are open-ended strings; the well-known ones have constructors.
/// A bot without an explicit space is in [`Space::shared`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Space(String);

impl Space {
    pub const SHARED: &'static str = "shared";
    pub const LOCAL: &'static str = "local";
    pub const TEMP_LOCAL: &'static str = "tempLocal";
    pub const TEMP_SHARED: &'static str = "tempShared";
    pub const HISTORY: &'static str = "history";
    pub const ERROR: &'static str = "error";
    pub const ADMIN: &'static str = "admin";
    pub const CERTIFIED: &'static str = "certified";
    pub const BOOTSTRAP: &'static str = "bootstrap";

    /// Mask spaces from highest to lowest priority
    pub const MASK_PRIORITY: [&'static str; 4] =
        [Self::TEMP_LOCAL, Self::LOCAL, Self::TEMP_SHARED, Self::SHARED];

    pub fn new(name: impl Into<String>) -> Self {
        Space(name.into())
    }

    pub fn shared() -> Self {
        Space::new(Self::SHARED)
    }

    pub fn local() -> Self {
        Space::new(Self::LOCAL)
    }

    pub fn temp_local() -> Self {
        Space::new(Self::TEMP_LOCAL)
    }

    pub fn temp_shared() -> Self {
        Space::new(Self::TEMP_SHARED)
    }

    pub fn history() -> Self {
        Space::new(Self::HISTORY)
    }

    pub fn error() -> Self {
        Space::new(Self::ERROR)
    }

    pub fn admin() -> Self {
        Space::new(Self::ADMIN)
    }

    pub fn certified() -> Self {
        Space::new(Self::CERTIFIED)
    }

    pub fn bootstrap() -> Self {
        Space::new(Self::BOOTSTRAP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Space {
    fn default() -> Self {
        Space::shared()
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Space {
    fn from(value: &str) -> Self {
        Space::new(value)
    }
}

impl From<String> for Space {
    fn from(value: String) -> Self {
        Space(value)
    }
}

/// How mutations to bots in a space are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeEditMode {
    /// Applied to the live store and emitted as an action
    Immediate,
    /// Emitted as an action only; the live store keeps the old state
    Delayed,
    /// Dropped entirely
    None,
}
