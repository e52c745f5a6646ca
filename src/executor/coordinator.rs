use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::errors::{PilotError, PilotResult};
use crate::executor::input::{Drag, InputDevice};
use crate::perception::screenshot::FrameSource;
use crate::perception::types::{Frame, Point, Rect, Snapshot};
use crate::scenario_engine::poller::Poller;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Capture attempts before giving up on a frame.
    pub capture_retries: u32,
    pub capture_retry_delay: Duration,
    /// Pause after every input action so animations can finish.
    pub settle: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            capture_retries: 60,
            capture_retry_delay: Duration::from_millis(30),
            settle: Duration::from_millis(300),
        }
    }
}

/// The single access point to the game window. Captures and input actions
/// from the main flow and the monitor are serialized through one lock.
pub struct Coordinator {
    source: Arc<dyn FrameSource>,
    input: Arc<dyn InputDevice>,
    gate: Mutex<()>,
    poller: Poller,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        source: Arc<dyn FrameSource>,
        input: Arc<dyn InputDevice>,
        poller: Poller,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            source,
            input,
            gate: Mutex::new(()),
            poller,
            settings,
        }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Latest frame, retrying while the capture backend is not ready.
    pub async fn frame(&self) -> PilotResult<Frame> {
        for attempt in 0..self.settings.capture_retries.max(1) {
            self.poller.check()?;
            let captured = {
                let _guard = self.gate.lock().await;
                self.source.capture().await?
            };
            if let Some(frame) = captured {
                return Ok(frame);
            }
            tracing::debug!(attempt, "frame not ready");
            self.poller.delay(self.settings.capture_retry_delay).await?;
        }
        Err(PilotError::CaptureUnavailable(format!(
            "no frame after {} attempts",
            self.settings.capture_retries
        )))
    }

    pub async fn snapshot(&self, region: Rect) -> PilotResult<Snapshot> {
        self.frame().await?.snapshot(region)
    }

    pub async fn click(&self, at: Point) -> PilotResult<()> {
        self.poller.check()?;
        {
            let _guard = self.gate.lock().await;
            self.input.click(at).await?;
        }
        self.poller.delay(self.settings.settle).await
    }

    pub async fn drag(&self, drag: Drag) -> PilotResult<()> {
        self.poller.check()?;
        {
            let _guard = self.gate.lock().await;
            self.input.drag(drag.from, drag.to, drag.hold()).await?;
        }
        self.poller.delay(self.settings.settle).await
    }

    pub async fn key_press(&self, key: &str) -> PilotResult<()> {
        self.poller.check()?;
        {
            let _guard = self.gate.lock().await;
            self.input.key_press(key).await?;
        }
        self.poller.delay(self.settings.settle).await
    }
}
