use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

/// Axis-aligned rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    #[serde(alias = "X")]
    pub x: u32,
    #[serde(alias = "Y")]
    pub y: u32,
    #[serde(alias = "Width")]
    pub width: u32,
    #[serde(alias = "Height")]
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the two rectangles share a region of positive area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x as i32
            && p.y >= self.y as i32
            && p.x < self.right() as i32
            && p.y < self.bottom() as i32
    }

    pub fn translate(&self, dx: u32, dy: u32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }

    /// Cuts the rectangle down to a `width` x `height` frame. `None` when
    /// nothing of it remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        if self.x >= right || self.y >= bottom {
            return None;
        }
        Some(Rect::new(self.x, self.y, right - self.x, bottom - self.y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    #[serde(alias = "X")]
    pub x: i32,
    #[serde(alias = "Y")]
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A located occurrence of a template. Absence is expressed as `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub rect: Rect,
    /// Normalized cross-correlation in `[0, 1]`.
    pub score: f32,
}

impl Match {
    pub fn translate(self, dx: u32, dy: u32) -> Match {
        Match {
            rect: self.rect.translate(dx, dy),
            score: self.score,
        }
    }
}

/// One captured window image, grayscale. Owned by whoever captured it.
#[derive(Debug, Clone)]
pub struct Frame {
    image: GrayImage,
}

impl Frame {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width(), self.height())
    }

    /// Copies `region` out of the frame. The region must lie fully inside.
    pub fn snapshot(&self, region: Rect) -> PilotResult<Snapshot> {
        if region.is_empty() || !self.bounds().contains(&region) {
            return Err(PilotError::InvalidInput(format!(
                "snapshot region {region:?} outside frame {}x{}",
                self.width(),
                self.height()
            )));
        }
        let image = image::imageops::crop_imm(
            &self.image,
            region.x,
            region.y,
            region.width,
            region.height,
        )
        .to_image();
        Ok(Snapshot { image, region })
    }
}

/// An owned copy of a frame region, remembered together with where it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    image: GrayImage,
    region: Rect,
}

impl Snapshot {
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn region(&self) -> Rect {
        self.region
    }

    /// Compares two snapshots of equal size.
    pub fn same_as(&self, other: &Snapshot, threshold: f32) -> PilotResult<bool> {
        Ok(crate::perception::matcher::find_best(&other.image, &self.image, None, threshold)?
            .is_some())
    }

    /// Looks for this snapshot anywhere in `frame`, in frame coordinates.
    pub fn find_in(&self, frame: &Frame, threshold: f32) -> PilotResult<Option<Match>> {
        crate::perception::matcher::find_best(frame.image(), &self.image, None, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(!a.intersects(&Rect::new(10, 0, 5, 5)));
        assert!(!a.intersects(&Rect::new(0, 10, 5, 5)));
        assert!(a.intersects(&Rect::new(9, 9, 5, 5)));
    }

    #[test]
    fn clamp_cuts_to_frame() {
        let r = Rect::new(90, 10, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(Rect::new(90, 10, 10, 20)));
        assert_eq!(Rect::new(100, 0, 5, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn snapshot_outside_frame_is_rejected() {
        let frame = Frame::new(GrayImage::new(10, 10));
        assert!(frame.snapshot(Rect::new(5, 5, 6, 2)).is_err());
        let snap = frame.snapshot(Rect::new(2, 3, 4, 5)).unwrap();
        assert_eq!(snap.image().dimensions(), (4, 5));
        assert_eq!(snap.region(), Rect::new(2, 3, 4, 5));
    }
}
