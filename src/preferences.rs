//! Persisted user preferences: theme mode and whether onboarding was seen.
//!
//! Stored as one JSON document. A missing or unreadable file yields defaults; every
//! setter rewrites the whole document.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;
use crate::paths::config_dir;

const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemeMode {
    /// Unknown values fall back to [`ThemeMode::System`].
    pub fn from_value(value: &str) -> Self {
        match value {
            "light" => Self::Light,
            "dark" => Self::Dark,
            _ => Self::System,
        }
    }
}

impl<'de> Deserialize<'de> for ThemeMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.map(|v| Self::from_value(&v)).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme_mode: ThemeMode,
    pub onboarding_seen: bool,
}

pub struct PreferenceStore {
    path: PathBuf,
    cached: Mutex<Option<Preferences>>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Store at `<config dir>/preferences.json`.
    pub fn from_environment() -> Self {
        Self::new(config_dir().join(PREFERENCES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Preferences {
        let mut guard = self.cached.lock();
        *guard.get_or_insert_with(|| read_preferences(&self.path))
    }

    pub fn set_theme_mode(&self, mode: ThemeMode) -> Result<Preferences, AppError> {
        self.update(|prefs| prefs.theme_mode = mode)
    }

    pub fn set_onboarding_seen(&self, seen: bool) -> Result<Preferences, AppError> {
        self.update(|prefs| prefs.onboarding_seen = seen)
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<Preferences, AppError> {
        let mut guard = self.cached.lock();
        let mut prefs = (*guard).unwrap_or_else(|| read_preferences(&self.path));
        apply(&mut prefs);
        write_preferences(&self.path, &prefs)?;
        *guard = Some(prefs);
        Ok(prefs)
    }
}

fn read_preferences(path: &Path) -> Preferences {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Preferences::default(),
    };
    match serde_json::from_str(&contents) {
        Ok(prefs) => prefs,
        Err(e) => {
            log::warn!(
                target: "audio_trim::preferences",
                "Ignoring unreadable preferences at {}: {}",
                path.display(),
                e
            );
            Preferences::default()
        }
    }
}

fn write_preferences(path: &Path, prefs: &Preferences) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Preferences(format!("create {}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(prefs)
        .map_err(|e| AppError::Preferences(format!("serialize: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| AppError::Preferences(format!("write {}: {}", path.display(), e)))?;
    log::debug!(target: "audio_trim::preferences", "Saved preferences: {:?}", prefs);
    Ok(())
}
