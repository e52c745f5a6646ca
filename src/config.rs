use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::CoordinatorSettings;
use crate::navigation::graph::UiElement;
use crate::navigation::navigator::NavigatorSettings;
use crate::scenario_engine::monitor::MonitorConfig;
use crate::scenario_engine::poller::PollSpec;
use crate::scenario_engine::state::LoopConfig;
use crate::scenarios::arena::ArenaConfig;
use crate::scenarios::dungeon::DungeonConfig;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "GAMEPILOT_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub input: InputConfig,
    pub paths: PathsConfig,
    pub navigation: NavigationConfig,
    pub monitor: MonitorConfig,
    pub run: LoopConfig,
    pub arena: ArenaConfig,
    pub dungeon: DungeonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Substring of the game window title.
    pub title: String,
    /// Title bar height cropped from every capture.
    pub crop_top: u32,
    pub capture_retries: u32,
    pub capture_retry_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Raid: Shadow Legends".into(),
            crop_top: 31,
            capture_retries: 60,
            capture_retry_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Pause after every click, drag or key press.
    pub settle_ms: u64,
    pub drag_steps: u32,
    pub step_delay_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            drag_steps: 20,
            step_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub screens_dir: PathBuf,
    pub templates_dir: PathBuf,
    /// Run history location; the user data dir when unset.
    pub history_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            screens_dir: PathBuf::from("screens"),
            templates_dir: PathBuf::from("templates"),
            history_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Match threshold for elements without their own.
    pub threshold: f32,
    pub hop_attempts: u32,
    pub hop_interval_ms: u64,
    pub element_attempts: u32,
    pub element_interval_ms: u64,
    pub action_retries: u32,
    pub popup_close: Option<UiElement>,
    pub max_popup_sweeps: u32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            hop_attempts: 10,
            hop_interval_ms: 500,
            element_attempts: 10,
            element_interval_ms: 500,
            action_retries: 3,
            popup_close: None,
            max_popup_sweeps: 5,
        }
    }
}

impl NavigationConfig {
    pub fn navigator_settings(&self) -> NavigatorSettings {
        NavigatorSettings {
            hop_wait: PollSpec::millis(self.hop_attempts, self.hop_interval_ms),
            element_wait: PollSpec::millis(self.element_attempts, self.element_interval_ms),
            action_retries: self.action_retries.max(1),
            popup_close: self.popup_close.clone(),
            max_popup_sweeps: self.max_popup_sweeps,
        }
    }
}

impl AppConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            capture_retries: self.window.capture_retries.max(1),
            capture_retry_delay: Duration::from_millis(self.window.capture_retry_ms),
            settle: Duration::from_millis(self.input.settle_ms),
        }
    }

    /// Makes relative data paths relative to the config file.
    fn anchor_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.paths.screens_dir);
        anchor(&mut self.paths.templates_dir);
        if let Some(history) = self.paths.history_dir.as_mut() {
            anchor(history);
        }
    }
}

/// Explicit path, then `GAMEPILOT_CONFIG`, then next to the executable, then
/// the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PilotResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(PilotError::Config(format!("{} does not exist", path.display())));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(env_path);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config from {CONFIG_ENV}");
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV} points to a missing file");
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(format!(
        "{CONFIG_FILE} not found next to executable or in working directory"
    )))
}

pub fn parse_config(content: &str) -> PilotResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config(explicit: Option<&Path>) -> PilotResult<AppConfig> {
    let path = resolve_config_path(explicit)?;
    let content = std::fs::read_to_string(&path)?;
    let mut config = parse_config(&content)?;
    if let Some(base) = path.parent() {
        config.anchor_paths(base);
    }
    tracing::info!(path = %path.display(), window = %config.window.title, "config loaded");
    Ok(config)
}
