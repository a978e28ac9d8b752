//! Profile store: loads `profiles.toml` from `$TURNSHOT_HOME` with
//! sensible defaults.
//!
//! The store is read-only to the core with one exception: recording
//! which profile is active. External edits are observed through an
//! mtime-poll subscription; the legacy flat "words to redact" shape is
//! migrated to ordered from/to pairs here, at the loading boundary,
//! never inside the mask engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::profile::{MaskRule, StyleProfile};

/// Poll period for the store reload watcher.
pub const STORE_POLL_PERIOD: Duration = Duration::from_millis(800);

/// Resolves the turnshot home directory: `$TURNSHOT_HOME`, falling back
/// to `~/.turnshot`.
pub fn turnshot_home() -> PathBuf {
    if let Some(home) = std::env::var_os("TURNSHOT_HOME") {
        return PathBuf::from(home);
    }
    let base = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    base.join(".turnshot")
}

/// Path of the profiles file inside `home`.
pub fn profiles_path(home: &Path) -> PathBuf {
    home.join("profiles.toml")
}

/// On-disk profile shape, including the legacy fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawProfile {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width_px: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    padding_px: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    canvas_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_name: Option<String>,
    mask_case_insensitive: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mask_rules: Vec<MaskRule>,
    /// Legacy shape: bare words, each redacted to a `*` run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mask_words: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProfilesFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<String>,
    #[serde(rename = "profile")]
    profiles: Vec<RawProfile>,
}

fn adapt_profile(raw: RawProfile) -> StyleProfile {
    let defaults = StyleProfile::default();

    // Legacy word lists take precedence when present, matching how the
    // old shape was read before pairs existed.
    let rules: Vec<MaskRule> = if raw.mask_words.is_empty() {
        raw.mask_rules
            .into_iter()
            .map(|r| MaskRule::new(r.from.trim().to_string(), r.to))
            .filter(|r| !r.from.is_empty())
            .collect()
    } else {
        raw.mask_words
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .map(MaskRule::redact)
            .collect()
    };

    StyleProfile {
        id: raw.id,
        name: raw.name,
        width_px: raw.width_px.unwrap_or(defaults.width_px),
        padding_px: raw.padding_px.unwrap_or(defaults.padding_px),
        scale: raw.scale.unwrap_or(defaults.scale),
        canvas_bg: raw.canvas_bg.unwrap_or(defaults.canvas_bg),
        user_bg: raw.user_bg.unwrap_or(defaults.user_bg),
        assistant_bg: raw.assistant_bg.unwrap_or(defaults.assistant_bg),
        user_name: raw.user_name.unwrap_or(defaults.user_name),
        assistant_name: raw.assistant_name.unwrap_or(defaults.assistant_name),
        mask_case_insensitive: raw.mask_case_insensitive,
        mask_rules: rules,
    }
}

fn to_raw(profile: &StyleProfile) -> RawProfile {
    RawProfile {
        id: profile.id.clone(),
        name: profile.name.clone(),
        width_px: Some(profile.width_px),
        padding_px: Some(profile.padding_px),
        scale: Some(profile.scale),
        canvas_bg: Some(profile.canvas_bg.clone()),
        user_bg: Some(profile.user_bg.clone()),
        assistant_bg: Some(profile.assistant_bg.clone()),
        user_name: Some(profile.user_name.clone()),
        assistant_name: Some(profile.assistant_name.clone()),
        mask_case_insensitive: profile.mask_case_insensitive,
        mask_rules: profile.mask_rules.clone(),
        mask_words: Vec::new(),
    }
}

/// Loaded profile collection plus the active-profile pointer.
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<StyleProfile>,
    active_id: Option<String>,
}

impl ProfileStore {
    /// Opens the store at `path`, seeding a default profile file when
    /// none exists yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            seed_default_file(&path)?;
        }
        let mut store = Self {
            path,
            profiles: Vec::new(),
            active_id: None,
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-reads the file, picking up external edits.
    pub fn reload(&mut self) -> Result<()> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: ProfilesFile = toml::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        let profiles: Vec<StyleProfile> =
            file.profiles.into_iter().map(adapt_profile).collect();
        if profiles.is_empty() {
            bail!("{} contains no profiles", self.path.display());
        }

        self.active_id = file
            .active
            .filter(|id| profiles.iter().any(|p| &p.id == id))
            .or_else(|| Some(profiles[0].id.clone()));
        self.profiles = profiles;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> &[StyleProfile] {
        &self.profiles
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// The active profile, falling back to the first one.
    pub fn active(&self) -> &StyleProfile {
        self.active_id
            .as_ref()
            .and_then(|id| self.profiles.iter().find(|p| &p.id == id))
            .unwrap_or(&self.profiles[0])
    }

    /// Records a new active profile id — the only write this store
    /// performs. Profile contents are rewritten unchanged.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.profiles.iter().any(|p| p.id == id) {
            bail!("no profile with id {id:?}");
        }
        self.active_id = Some(id.to_string());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let file = ProfilesFile {
            active: self.active_id.clone(),
            profiles: self.profiles.iter().map(to_raw).collect(),
        };
        let text = toml::to_string_pretty(&file).context("serializing profiles")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, text)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

fn seed_default_file(path: &Path) -> Result<()> {
    let file = ProfilesFile {
        active: Some("default".to_string()),
        profiles: vec![to_raw(&StyleProfile::default())],
    };
    let text = toml::to_string_pretty(&file).context("serializing default profiles")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Spawns an mtime poller for `path`; the returned channel ticks every
/// time the file changes on disk. Receivers decide when to reload.
pub fn spawn_reload_watcher(path: PathBuf, period: Duration) -> watch::Receiver<u64> {
    let (tx, rx) = watch::channel(0u64);
    tokio::spawn(async move {
        let mut last: Option<SystemTime> = modified_at(&path);
        let mut ticks = 0u64;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let current = modified_at(&path);
            if current != last {
                last = current;
                ticks += 1;
                if tx.send(ticks).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
