use std::sync::Arc;

use crate::errors::{PilotError, PilotResult};
use crate::navigation::graph::{Screen, ScreenGraph, ScreenId, UiElement};
use crate::perception::matcher;
use crate::perception::templates::TemplateStore;
use crate::perception::types::{Frame, Match, Rect};

/// Answers "which screen is this frame?" and "where is this element?".
pub struct ScreenIdentifier {
    graph: Arc<ScreenGraph>,
    templates: Arc<TemplateStore>,
    threshold: f32,
}

impl ScreenIdentifier {
    /// `threshold` applies to elements that do not carry their own.
    pub fn new(graph: Arc<ScreenGraph>, templates: Arc<TemplateStore>, threshold: f32) -> Self {
        Self {
            graph,
            templates,
            threshold,
        }
    }

    pub fn graph(&self) -> &ScreenGraph {
        &self.graph
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn threshold_for(&self, element: &UiElement) -> f32 {
        element.threshold.unwrap_or(self.threshold)
    }

    /// Best occurrence of `element` in `frame`, in frame coordinates.
    pub fn locate(&self, frame: &Frame, element: &UiElement) -> PilotResult<Option<Match>> {
        let template = self.template_of(element)?;
        matcher::locate(
            frame.image(),
            &template,
            element.search_area(),
            self.threshold_for(element),
        )
    }

    /// Like [`Self::locate`] but widens the search area to the full frame
    /// width, keeping its vertical band.
    pub fn locate_horizontal(
        &self,
        frame: &Frame,
        element: &UiElement,
    ) -> PilotResult<Option<Match>> {
        let template = self.template_of(element)?;
        let band = element
            .search_area()
            .map(|a| Rect::new(0, a.y, frame.width(), a.height));
        matcher::locate(frame.image(), &template, band, self.threshold_for(element))
    }

    /// Every non-overlapping occurrence of `element`, in frame coordinates.
    pub fn locate_all(&self, frame: &Frame, element: &UiElement) -> PilotResult<Vec<Match>> {
        let template = self.template_of(element)?;
        matcher::locate_all(
            frame.image(),
            &template,
            element.search_area(),
            self.threshold_for(element),
        )
    }

    pub fn is_visible(&self, frame: &Frame, element: &UiElement) -> PilotResult<bool> {
        Ok(self.locate(frame, element)?.is_some())
    }

    /// All verification images found. Screens without any never match.
    pub fn screen_matches(&self, frame: &Frame, screen: &Screen) -> PilotResult<bool> {
        if !screen.is_identifiable() {
            return Ok(false);
        }
        for image in &screen.verification {
            if !self.is_visible(frame, image)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_screen_visible(&self, frame: &Frame, id: ScreenId) -> PilotResult<bool> {
        let screen = self.graph.require(id)?;
        self.screen_matches(frame, screen)
    }

    /// First screen, in candidate order, whose verification images are all
    /// present. With no candidates every graph screen is tried in
    /// configuration order.
    pub fn identify(
        &self,
        frame: &Frame,
        candidates: Option<&[ScreenId]>,
    ) -> PilotResult<Option<&Screen>> {
        let found = match candidates {
            Some(ids) => {
                let mut found = None;
                for &id in ids {
                    let screen = self.graph.require(id)?;
                    if self.screen_matches(frame, screen)? {
                        found = Some(screen);
                        break;
                    }
                }
                found
            }
            None => {
                let mut found = None;
                for screen in self.graph.screens() {
                    if self.screen_matches(frame, screen)? {
                        found = Some(screen);
                        break;
                    }
                }
                found
            }
        };

        match found {
            Some(screen) => tracing::debug!(screen = %screen.id, "screen identified"),
            None => tracing::debug!("no candidate screen matched"),
        }
        Ok(found)
    }

    fn template_of(&self, element: &UiElement) -> PilotResult<Arc<image::GrayImage>> {
        if !element.has_template() {
            return Err(PilotError::InvalidInput(format!(
                "element '{}' has no template to match",
                element.name
            )));
        }
        self.templates.get(&element.template)
    }
}
