use serde::{Deserialize, Serialize};

use crate::navigation::graph::ScreenId;

/// Outcome bookkeeping of one list item (opponent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FightStatus {
    #[default]
    NotFought,
    Fighting,
    Won,
    Lost,
}

/// Lifecycle of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Preparing { scenario: String },
    Farming { scenario: String, round: u32 },
    Done { summary: String },
    Cancelled,
    Failed { error: String },
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The game mode has nothing left to do (no tokens, no keys, target met).
    Finished,
    LoopLimit,
    Cancelled,
    Interrupted { screen: ScreenId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub mode: LoopMode,
    /// Rounds to play at most; `None` plays until the mode finishes.
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub max_duration_minutes: Option<u32>,
    #[serde(default = "default_max_failures")]
    pub max_failures: Option<u32>,
}

fn default_max_failures() -> Option<u32> {
    Some(3)
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mode: LoopMode::default(),
            max_rounds: None,
            max_duration_minutes: None,
            max_failures: default_max_failures(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    UntilDone,
    Timed,
    FailureLimit,
}
