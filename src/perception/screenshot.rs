// Window capture via xcap.
use async_trait::async_trait;
use image::{GrayImage, RgbaImage};

use crate::config::WindowConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{Frame, Point};

/// Produces the latest full-window frame. `Ok(None)` means the window is not
/// ready yet (not found, minimized, or still starting).
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> PilotResult<Option<Frame>>;
}

/// Finds the game window by title. Shared by capture and input so that frame
/// coordinates map onto the same window.
#[derive(Debug, Clone)]
pub struct WindowLocator {
    title: String,
    crop_top: u32,
}

impl WindowLocator {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            title: config.title.clone(),
            crop_top: config.crop_top,
        }
    }

    fn find(&self) -> PilotResult<Option<xcap::Window>> {
        let windows =
            xcap::Window::all().map_err(|e| PilotError::CaptureUnavailable(e.to_string()))?;
        Ok(windows
            .into_iter()
            .find(|w| !w.is_minimized() && w.title().contains(self.title.as_str())))
    }

    /// Screen position of frame pixel (0, 0). Blocking.
    pub fn origin(&self) -> PilotResult<Option<Point>> {
        Ok(self
            .find()?
            .map(|w| Point::new(w.x(), w.y() + self.crop_top as i32)))
    }

    /// Captures the window and converts it to grayscale. Blocking.
    pub fn grab(&self) -> PilotResult<Option<Frame>> {
        let Some(window) = self.find()? else {
            tracing::debug!(title = %self.title, "game window not found");
            return Ok(None);
        };
        let shot = window
            .capture_image()
            .map_err(|e| PilotError::CaptureUnavailable(e.to_string()))?;
        let (width, height) = (shot.width(), shot.height());
        let Some(rgba) = RgbaImage::from_raw(width, height, shot.as_raw().to_vec()) else {
            return Err(PilotError::CaptureUnavailable(
                "captured buffer does not match its dimensions".into(),
            ));
        };
        if height <= self.crop_top || width == 0 {
            return Ok(None);
        }
        Ok(Some(Frame::new(to_gray(&rgba, self.crop_top))))
    }
}

fn to_gray(rgba: &RgbaImage, crop_top: u32) -> GrayImage {
    let body = image::imageops::crop_imm(
        rgba,
        0,
        crop_top,
        rgba.width(),
        rgba.height() - crop_top,
    )
    .to_image();
    image::DynamicImage::ImageRgba8(body).to_luma8()
}

/// xcap-backed [`FrameSource`] for the configured game window.
pub struct WindowCapture {
    locator: WindowLocator,
}

impl WindowCapture {
    pub fn new(locator: WindowLocator) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl FrameSource for WindowCapture {
    async fn capture(&self) -> PilotResult<Option<Frame>> {
        let locator = self.locator.clone();
        tokio::task::spawn_blocking(move || locator.grab())
            .await
            .map_err(|e| PilotError::CaptureUnavailable(e.to_string()))?
    }
}
