//! Template matching over grayscale frames.
//!
//! Both entry points compute a normalized cross-correlation surface between
//! the needle and the searched part of the haystack. Results are relative to
//! the search area's origin; use [`locate`] / [`locate_all`] when frame
//! coordinates are needed.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{Match, Rect};

/// Rounding slack for scores that land a hair above 1.0.
const SCORE_EPSILON: f32 = 1e-3;

type Surface = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Best match of `needle` inside `area` of `haystack`, or `None` when the
/// maximum similarity falls outside `[threshold, 1.0]`.
pub fn find_best(
    haystack: &GrayImage,
    needle: &GrayImage,
    area: Option<Rect>,
    threshold: f32,
) -> PilotResult<Option<Match>> {
    let Some(surface) = similarity_surface(haystack, needle, area)? else {
        return Ok(None);
    };

    let mut best: Option<(u32, u32, f32)> = None;
    for (x, y, px) in surface.enumerate_pixels() {
        let score = px[0];
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, _, b)| score > b) {
            best = Some((x, y, score));
        }
    }

    Ok(best.and_then(|(x, y, score)| {
        accept(score, threshold).map(|score| Match {
            rect: Rect::new(x, y, needle.width(), needle.height()),
            score,
        })
    }))
}

/// Every non-overlapping match above `threshold`, strongest first.
pub fn find_all(
    haystack: &GrayImage,
    needle: &GrayImage,
    area: Option<Rect>,
    threshold: f32,
) -> PilotResult<Vec<Match>> {
    let Some(surface) = similarity_surface(haystack, needle, area)? else {
        return Ok(Vec::new());
    };

    let candidates: Vec<Match> = surface
        .enumerate_pixels()
        .filter(|(_, _, px)| px[0].is_finite())
        .filter_map(|(x, y, px)| {
            accept(px[0], threshold).map(|score| Match {
                rect: Rect::new(x, y, needle.width(), needle.height()),
                score,
            })
        })
        .collect();

    Ok(suppress_overlapping(candidates))
}

/// Greedy non-max suppression: accept the strongest remaining candidate and
/// drop everything that intersects it. Equal scores are ordered top-to-bottom,
/// then left-to-right.
pub fn suppress_overlapping(mut candidates: Vec<Match>) -> Vec<Match> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.rect.y.cmp(&b.rect.y))
            .then(a.rect.x.cmp(&b.rect.x))
    });

    let mut keep: Vec<Match> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| !k.rect.intersects(&candidate.rect)) {
            keep.push(candidate);
        }
    }
    keep
}

/// [`find_best`] translated back into haystack coordinates.
pub fn locate(
    haystack: &GrayImage,
    needle: &GrayImage,
    area: Option<Rect>,
    threshold: f32,
) -> PilotResult<Option<Match>> {
    let (dx, dy) = origin(area);
    Ok(find_best(haystack, needle, area, threshold)?.map(|m| m.translate(dx, dy)))
}

/// [`find_all`] translated back into haystack coordinates.
pub fn locate_all(
    haystack: &GrayImage,
    needle: &GrayImage,
    area: Option<Rect>,
    threshold: f32,
) -> PilotResult<Vec<Match>> {
    let (dx, dy) = origin(area);
    Ok(find_all(haystack, needle, area, threshold)?
        .into_iter()
        .map(|m| m.translate(dx, dy))
        .collect())
}

fn origin(area: Option<Rect>) -> (u32, u32) {
    area.map_or((0, 0), |a| (a.x, a.y))
}

fn accept(score: f32, threshold: f32) -> Option<f32> {
    if score > 1.0 + SCORE_EPSILON {
        tracing::debug!(score, "similarity above 1.0 rejected");
        return None;
    }
    (score >= threshold).then(|| score.min(1.0))
}

fn similarity_surface(
    haystack: &GrayImage,
    needle: &GrayImage,
    area: Option<Rect>,
) -> PilotResult<Option<Surface>> {
    if haystack.width() == 0 || haystack.height() == 0 {
        return Err(PilotError::InvalidInput("haystack image is empty".into()));
    }
    if needle.width() == 0 || needle.height() == 0 {
        return Err(PilotError::InvalidInput("needle image is empty".into()));
    }

    let full = Rect::new(0, 0, haystack.width(), haystack.height());
    let region = match area {
        None => full,
        Some(a) => match a.clamp_to(haystack.width(), haystack.height()) {
            Some(r) => r,
            None => return Ok(None),
        },
    };
    if needle.width() > region.width || needle.height() > region.height {
        return Ok(None);
    }

    let surface = if region == full {
        match_template(haystack, needle, MatchTemplateMethod::CrossCorrelationNormalized)
    } else {
        let cropped =
            image::imageops::crop_imm(haystack, region.x, region.y, region.width, region.height)
                .to_image();
        match_template(&cropped, needle, MatchTemplateMethod::CrossCorrelationNormalized)
    };
    Ok(Some(surface))
}
