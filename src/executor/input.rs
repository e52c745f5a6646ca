// Physical input simulation through enigo.
use std::time::Duration;

use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::perception::screenshot::WindowLocator;
use crate::perception::types::Point;

/// Fire-and-forget input. Points are in frame coordinates; there is no
/// feedback channel, success is judged from later frames.
#[async_trait]
pub trait InputDevice: Send + Sync {
    async fn click(&self, at: Point) -> PilotResult<()>;
    async fn drag(&self, from: Point, to: Point, hold: Duration) -> PilotResult<()>;
    async fn key_press(&self, key: &str) -> PilotResult<()>;
}

/// A configured drag gesture, e.g. one list scroll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Drag {
    pub from: Point,
    pub to: Point,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

impl Drag {
    pub const fn vertical(x: i32, from_y: i32, to_y: i32) -> Self {
        Self {
            from: Point::new(x, from_y),
            to: Point::new(x, to_y),
            hold_ms: 500,
        }
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

fn default_hold_ms() -> u64 {
    500
}

/// enigo-backed [`InputDevice`] targeting the game window.
pub struct EnigoInput {
    locator: WindowLocator,
    drag_steps: u32,
    step_delay: Duration,
}

impl EnigoInput {
    pub fn new(locator: WindowLocator, drag_steps: u32, step_delay: Duration) -> Self {
        Self {
            locator,
            drag_steps: drag_steps.max(1),
            step_delay,
        }
    }

    async fn run<F>(&self, op: F) -> PilotResult<()>
    where
        F: FnOnce(&mut Enigo, Point) -> Result<(), enigo::InputError> + Send + 'static,
    {
        let locator = self.locator.clone();
        tokio::task::spawn_blocking(move || {
            let origin = locator
                .origin()?
                .ok_or_else(|| PilotError::Input("game window not found".into()))?;
            let mut enigo = Enigo::new(&Settings::default())
                .map_err(|e| PilotError::Input(e.to_string()))?;
            op(&mut enigo, origin).map_err(|e| PilotError::Input(e.to_string()))
        })
        .await
        .map_err(|e| PilotError::Input(e.to_string()))?
    }
}

#[async_trait]
impl InputDevice for EnigoInput {
    async fn click(&self, at: Point) -> PilotResult<()> {
        tracing::debug!(x = at.x, y = at.y, "click");
        self.run(move |enigo, origin| {
            enigo.move_mouse(origin.x + at.x, origin.y + at.y, Coordinate::Abs)?;
            enigo.button(Button::Left, Direction::Click)
        })
        .await
    }

    async fn drag(&self, from: Point, to: Point, hold: Duration) -> PilotResult<()> {
        tracing::debug!(from_x = from.x, from_y = from.y, to_x = to.x, to_y = to.y, "drag");
        let steps = self.drag_steps as i32;
        let step_delay = self.step_delay;
        self.run(move |enigo, origin| {
            enigo.move_mouse(origin.x + from.x, origin.y + from.y, Coordinate::Abs)?;
            enigo.button(Button::Left, Direction::Press)?;
            for i in 1..=steps {
                let x = from.x + (to.x - from.x) * i / steps;
                let y = from.y + (to.y - from.y) * i / steps;
                enigo.move_mouse(origin.x + x, origin.y + y, Coordinate::Abs)?;
                std::thread::sleep(step_delay);
            }
            // keep the list from flinging
            std::thread::sleep(hold);
            enigo.button(Button::Left, Direction::Release)
        })
        .await
    }

    async fn key_press(&self, key: &str) -> PilotResult<()> {
        let key = parse_key(key)?;
        self.run(move |enigo, _| enigo.key(key, Direction::Click)).await
    }
}

fn parse_key(name: &str) -> PilotResult<Key> {
    let key = match name.trim().to_ascii_lowercase().as_str() {
        "esc" | "escape" => Key::Escape,
        "enter" | "return" => Key::Return,
        "space" => Key::Space,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return Err(PilotError::Input(format!("unsupported key '{name}'"))),
            }
        }
    };
    Ok(key)
}
