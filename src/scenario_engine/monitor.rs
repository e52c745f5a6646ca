//! Background watcher for interrupt screens (lost connection, maintenance,
//! forced update) that can appear at any time during a run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::PilotResult;
use crate::executor::coordinator::Coordinator;
use crate::navigation::graph::ScreenId;
use crate::navigation::identifier::ScreenIdentifier;
use crate::scenario_engine::event_bus::{EventBus, PilotEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptAction {
    /// Press `element` of the interrupt screen and keep going.
    Click,
    /// Cancel the run.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRule {
    pub screen: ScreenId,
    pub action: InterruptAction,
    #[serde(default)]
    pub element: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub rules: Vec<InterruptRule>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
            rules: vec![
                InterruptRule {
                    screen: ScreenId::ConnectionIssue,
                    action: InterruptAction::Click,
                    element: Some("Retry".into()),
                },
                InterruptRule {
                    screen: ScreenId::NeedUpgradeGame,
                    action: InterruptAction::Stop,
                    element: None,
                },
                InterruptRule {
                    screen: ScreenId::TechWork,
                    action: InterruptAction::Stop,
                    element: None,
                },
            ],
        }
    }
}

/// Running monitor. Dropping the handle without [`MonitorHandle::stop`]
/// leaves the task running until the run token is cancelled.
pub struct MonitorHandle {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<Option<ScreenId>>,
}

impl MonitorHandle {
    /// Stops the monitor and waits for it. Returns the interrupt screen that
    /// stopped the run, if any.
    pub async fn stop(self) -> Option<ScreenId> {
        self.cancel_token.cancel();
        match self.join_handle.await {
            Ok(stopped) => stopped,
            Err(e) => {
                tracing::warn!("monitor task failed: {e}");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

pub struct InterruptMonitor {
    coordinator: Arc<Coordinator>,
    identifier: Arc<ScreenIdentifier>,
    config: MonitorConfig,
    events: EventBus,
}

impl InterruptMonitor {
    pub fn new(
        coordinator: Arc<Coordinator>,
        identifier: Arc<ScreenIdentifier>,
        config: MonitorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            coordinator,
            identifier,
            config,
            events,
        }
    }

    /// Starts polling. The monitor ends with the run token, on
    /// [`MonitorHandle::stop`], or after a `stop` rule cancelled the run.
    pub fn spawn(self) -> MonitorHandle {
        let cancel_token = self.coordinator.poller().token().child_token();
        let token = cancel_token.clone();
        let join_handle = tokio::spawn(async move { self.run_loop(token).await });
        MonitorHandle {
            cancel_token,
            join_handle,
        }
    }

    async fn run_loop(self, cancel_token: CancellationToken) -> Option<ScreenId> {
        let interval = Duration::from_millis(self.config.interval_ms);
        tracing::debug!(rules = self.config.rules.len(), ?interval, "interrupt monitor started");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.check().await {
                Ok(Some(screen)) => {
                    tracing::warn!(screen = %screen, "interrupt screen stops the run");
                    self.coordinator.poller().token().cancel();
                    return Some(screen);
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => tracing::warn!(error = %e, "interrupt check failed"),
            }
        }
        tracing::debug!("interrupt monitor stopped");
        None
    }

    /// One look at the screen. Returns the screen when a `stop` rule fired.
    pub async fn check(&self) -> PilotResult<Option<ScreenId>> {
        if self.config.rules.is_empty() {
            return Ok(None);
        }
        let candidates: Vec<ScreenId> = self.config.rules.iter().map(|r| r.screen).collect();
        let frame = self.coordinator.frame().await?;
        let Some(screen) = self.identifier.identify(&frame, Some(&candidates))? else {
            return Ok(None);
        };
        let Some(rule) = self.config.rules.iter().find(|r| r.screen == screen.id) else {
            return Ok(None);
        };

        self.events.send(PilotEvent::Interrupt {
            screen: screen.id,
            action: format!("{:?}", rule.action).to_lowercase(),
            timestamp: chrono::Utc::now(),
        });

        match rule.action {
            InterruptAction::Stop => Ok(Some(screen.id)),
            InterruptAction::Click => {
                let Some(name) = &rule.element else {
                    tracing::warn!(screen = %screen.id, "click rule without element");
                    return Ok(None);
                };
                let element = screen.require_element(name)?;
                if let Some(key) = element.key.as_deref().filter(|_| !element.has_template()) {
                    self.coordinator.key_press(key).await?;
                } else if let Some(found) = self.identifier.locate(&frame, element)? {
                    tracing::warn!(
                        screen = %screen.id,
                        element = %element.name,
                        "handling interrupt"
                    );
                    self.coordinator.click(found.rect.center()).await?;
                } else {
                    tracing::debug!(
                        screen = %screen.id,
                        element = %element.name,
                        "interrupt element not visible"
                    );
                }
                Ok(None)
            }
        }
    }
}
