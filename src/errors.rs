use std::time::Duration;

use thiserror::Error;

use crate::navigation::graph::ScreenId;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Screen graph error: {0}")]
    Graph(String),

    #[error("Transition {from} -> {target} points at a screen missing from the graph")]
    DanglingTransition { from: ScreenId, target: ScreenId },

    #[error("Screen {0} is not part of the screen graph")]
    UnknownScreen(ScreenId),

    #[error("Element '{element}' is not defined on screen {screen}")]
    UnknownElement { screen: ScreenId, element: String },

    #[error("Current screen could not be identified")]
    CurrentScreenUnknown,

    #[error("No path from {from} to {to}")]
    NoPath { from: ScreenId, to: ScreenId },

    #[error("Hop {hop} ({from} -> {to} via '{trigger}') failed after {elapsed:?}: {reason}")]
    HopFailed {
        hop: usize,
        from: ScreenId,
        to: ScreenId,
        trigger: String,
        elapsed: Duration,
        reason: String,
    },

    #[error("Timed out waiting for {what} after {attempts} attempts ({elapsed:?})")]
    TimedOut {
        what: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("List item could not be brought into view after {attempts} scroll attempts")]
    ItemUnreachable { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Task cancelled")]
    Cancelled,
}

impl PilotError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PilotError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PilotError::TimedOut { .. })
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
