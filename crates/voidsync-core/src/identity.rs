//! Device identity.
//!
//! A device identity is a stable id plus a friendly display name and emoji.
//! Where it is persisted is the caller's concern, expressed through
//! [`IdentityProvider`].

use crate::error::{Error, Result};
use crate::ids::random_base36;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ADJECTIVES: &[&str] = &[
    "Swift", "Brave", "Calm", "Daring", "Eager", "Fancy", "Gentle", "Happy", "Icy", "Jolly",
    "Keen", "Lucky", "Merry", "Noble", "Proud", "Quick", "Royal", "Sunny", "Tidy", "Vivid",
];

const ANIMALS: &[&str] = &[
    "Fox", "Bear", "Cat", "Dog", "Eagle", "Frog", "Goat", "Hawk", "Ibis", "Jay", "Kiwi", "Lion",
    "Mole", "Newt", "Owl", "Puma", "Quail", "Ram", "Seal", "Tiger",
];

const EMOJIS: &[&str] = &[
    "🦊", "🐻", "🐱", "🐶", "🦅", "🐸", "🐐", "🐦", "🥝", "🦁", "🐹", "🦎", "🦉", "🐆", "🐤", "🐏",
    "🦭", "🐯", "🚀", "⭐", "🌙", "🔥", "💎", "🎯", "🎨", "🎸", "🌈", "🍀",
];

/// Length of a generated device id
pub const DEVICE_ID_LEN: usize = 8;

/// Stable per-device identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// 8 lowercase base-36 characters
    pub id: String,
    /// "Adjective Animal"
    pub name: String,
    /// Display emoji
    pub emoji: String,
}

impl DeviceIdentity {
    /// Create an identity from explicit parts
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            emoji: emoji.into(),
        }
    }

    /// Generate a random identity
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
        let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Owl");
        let emoji = EMOJIS.choose(&mut rng).copied().unwrap_or("🦉");

        Self {
            id: random_base36(DEVICE_ID_LEN),
            name: format!("{adjective} {animal}"),
            emoji: emoji.to_string(),
        }
    }
}

/// Source of the local device identity
pub trait IdentityProvider: Send + Sync {
    /// Load a previously persisted identity, if any
    ///
    /// # Errors
    /// Returns `Error::Identity` or `Error::Io` if storage cannot be read.
    fn load(&self) -> Result<Option<DeviceIdentity>>;

    /// Generate and persist a new identity, replacing any existing one
    ///
    /// # Errors
    /// Returns `Error::Identity` or `Error::Io` if storage cannot be written.
    fn create(&self) -> Result<DeviceIdentity>;

    /// Load the persisted identity or create one
    ///
    /// # Errors
    /// Propagates errors from [`load`](Self::load) and [`create`](Self::create).
    fn load_or_create(&self) -> Result<DeviceIdentity> {
        match self.load()? {
            Some(identity) => Ok(identity),
            None => self.create(),
        }
    }
}

/// Identity kept in memory only
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    slot: Mutex<Option<DeviceIdentity>>,
}

impl MemoryIdentityProvider {
    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider preloaded with `identity`
    #[must_use]
    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| Error::Identity(Cow::Borrowed("identity lock poisoned")))?;
        Ok(slot.clone())
    }

    fn create(&self) -> Result<DeviceIdentity> {
        let identity = DeviceIdentity::generate();
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::Identity(Cow::Borrowed("identity lock poisoned")))?;
        *slot = Some(identity.clone());
        Ok(identity)
    }
}

/// Identity persisted as a JSON file
#[derive(Debug, Clone)]
pub struct FileIdentityProvider {
    path: PathBuf,
}

impl FileIdentityProvider {
    /// Store the identity at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityProvider for FileIdentityProvider {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<DeviceIdentity>(&content) {
            Ok(identity) if !identity.id.is_empty() => Ok(Some(identity)),
            Ok(_) => {
                tracing::warn!("Identity file {} has an empty id, regenerating", self.path.display());
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    "Identity file {} is corrupted ({}), regenerating",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn create(&self) -> Result<DeviceIdentity> {
        let identity = DeviceIdentity::generate();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&identity)?;
        std::fs::write(&self.path, content)?;

        tracing::info!(
            "Created device identity {} ({} {})",
            identity.id,
            identity.emoji,
            identity.name
        );
        Ok(identity)
    }
}
