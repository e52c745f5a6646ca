//! Synthetic frames and scripted fakes for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{GrayImage, Luma};
use tokio_util::sync::CancellationToken;

use crate::errors::PilotResult;
use crate::executor::coordinator::{Coordinator, CoordinatorSettings};
use crate::executor::input::InputDevice;
use crate::navigation::graph::{Screen, ScreenGraph};
use crate::navigation::identifier::ScreenIdentifier;
use crate::navigation::navigator::{Navigator, NavigatorSettings};
use crate::perception::screenshot::FrameSource;
use crate::perception::templates::TemplateStore;
use crate::perception::types::{Frame, Point};
use crate::scenario_engine::poller::{PollSpec, Poller};

pub const BACKGROUND: u8 = 20;
pub const BRIGHT: u8 = 255;
pub const MARKER_SIZE: u32 = 12;
pub const BUTTON_SIZE: u32 = 8;

pub fn blank(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([BACKGROUND]))
}

/// 12x12 marker: three bright corners plus one pixel that depends on `id`
/// (unique below 100). The corners pin the only exact alignment, so no
/// shifted window of one marker reproduces another.
pub fn marker(id: u32) -> GrayImage {
    let inner = (1 + id % 10, 1 + (id / 10) % 10);
    let mut img = blank(MARKER_SIZE, MARKER_SIZE);
    for (x, y) in [(0, 0), (11, 0), (11, 11), inner] {
        img.put_pixel(x, y, Luma([BRIGHT]));
    }
    img
}

/// 8x8 marker whose bright pixels have pairwise distinct offsets, so any
/// shifted window overlaps it in at most one bright pixel.
pub fn button_marker() -> GrayImage {
    let mut img = blank(BUTTON_SIZE, BUTTON_SIZE);
    for (x, y) in [(0, 0), (3, 1), (6, 4), (2, 6)] {
        img.put_pixel(x, y, Luma([BRIGHT]));
    }
    img
}

pub fn stamp(canvas: &mut GrayImage, img: &GrayImage, x: u32, y: u32) {
    stamp_clipped(canvas, img, x as i64, y as i64);
}

/// Like [`stamp`], but the image may hang over any edge of the canvas.
pub fn stamp_clipped(canvas: &mut GrayImage, img: &GrayImage, x: i64, y: i64) {
    image::imageops::replace(canvas, img, x, y);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Click(Point),
    Drag(Point, Point),
    Key(String),
}

/// A game the tests script: `render` draws the current state and `react`
/// updates it for every input gesture.
pub trait Scripted: Send + 'static {
    fn render(&self) -> Option<GrayImage>;
    fn react(&mut self, gesture: &Gesture);
}

/// Shared handle that acts as both the capture backend and the input device.
pub struct FakeGame<S: Scripted> {
    pub state: Arc<Mutex<S>>,
    pub gestures: Arc<Mutex<Vec<Gesture>>>,
}

impl<S: Scripted> Clone for FakeGame<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            gestures: self.gestures.clone(),
        }
    }
}

impl<S: Scripted> FakeGame<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            gestures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.gestures.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> usize {
        self.gestures()
            .iter()
            .filter(|g| matches!(g, Gesture::Click(_)))
            .count()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn apply(&self, gesture: Gesture) {
        self.state.lock().unwrap().react(&gesture);
        self.gestures.lock().unwrap().push(gesture);
    }
}

#[async_trait]
impl<S: Scripted> FrameSource for FakeGame<S> {
    async fn capture(&self) -> PilotResult<Option<Frame>> {
        Ok(self.state.lock().unwrap().render().map(Frame::new))
    }
}

#[async_trait]
impl<S: Scripted> InputDevice for FakeGame<S> {
    async fn click(&self, at: Point) -> PilotResult<()> {
        self.apply(Gesture::Click(at));
        Ok(())
    }

    async fn drag(&self, from: Point, to: Point, _hold: Duration) -> PilotResult<()> {
        self.apply(Gesture::Drag(from, to));
        Ok(())
    }

    async fn key_press(&self, key: &str) -> PilotResult<()> {
        self.apply(Gesture::Key(key.to_string()));
        Ok(())
    }
}

/// Navigator over `game` with millisecond waits and no settle delay.
pub fn navigator<S: Scripted>(
    game: &FakeGame<S>,
    screens: Vec<Screen>,
    templates: TemplateStore,
    cancel: CancellationToken,
) -> Navigator {
    let identifier = ScreenIdentifier::new(
        Arc::new(ScreenGraph::build(screens).unwrap()),
        Arc::new(templates),
        0.95,
    );
    let coordinator = Coordinator::new(
        Arc::new(game.clone()),
        Arc::new(game.clone()),
        Poller::new(cancel),
        CoordinatorSettings {
            capture_retries: 2,
            capture_retry_delay: Duration::from_millis(1),
            settle: Duration::ZERO,
        },
    );
    let settings = NavigatorSettings {
        hop_wait: PollSpec::millis(5, 1),
        element_wait: PollSpec::millis(5, 1),
        ..NavigatorSettings::default()
    };
    Navigator::new(Arc::new(coordinator), Arc::new(identifier), settings)
}
