use async_trait::async_trait;
use image::GrayImage;
use regex::Regex;

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{Frame, Rect};

/// Text recognition backend. Only scenario code reads text, for counters
/// such as arena tokens or dungeon keys.
#[async_trait]
pub trait TextReader: Send + Sync {
    async fn read_text(&self, image: &GrayImage, region: Rect, digits_only: bool)
        -> PilotResult<String>;
}

/// A `current/max` counter as shown next to resource icons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub current: u32,
    pub max: Option<u32>,
}

/// Parses `"7/10"`, `"7 / 10"` or a bare `"7"`.
pub fn parse_counter(text: &str) -> PilotResult<Counter> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let re = Regex::new(r"^(\d+)(?:/(\d+))?$").map_err(|e| PilotError::Ocr(e.to_string()))?;
    let caps = re
        .captures(&compact)
        .ok_or_else(|| PilotError::Ocr(format!("not a counter: '{text}'")))?;
    let current = caps[1]
        .parse()
        .map_err(|_| PilotError::Ocr(format!("counter out of range: '{text}'")))?;
    let max = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Ok(Counter { current, max })
}

/// Reads a counter from `region`. Unreadable text is logged and reported as
/// unknown; backend failures propagate.
pub async fn read_counter(
    reader: &dyn TextReader,
    frame: &Frame,
    region: Rect,
) -> PilotResult<Option<Counter>> {
    let text = reader.read_text(frame.image(), region, true).await?;
    match parse_counter(&text) {
        Ok(counter) => {
            tracing::debug!(current = counter.current, max = ?counter.max, "counter read");
            Ok(Some(counter))
        }
        Err(e) => {
            tracing::warn!(error = %e, "counter unreadable");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl TextReader for Fixed {
        async fn read_text(
            &self,
            _image: &GrayImage,
            _region: Rect,
            _digits_only: bool,
        ) -> PilotResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn unreadable_counter_is_unknown() {
        let frame = Frame::new(GrayImage::new(4, 4));
        let region = Rect::new(0, 0, 4, 4);
        assert_eq!(
            read_counter(&Fixed("3/10"), &frame, region).await.unwrap(),
            Some(Counter { current: 3, max: Some(10) })
        );
        assert_eq!(read_counter(&Fixed("~~"), &frame, region).await.unwrap(), None);
    }

    #[test]
    fn parses_counters() {
        assert_eq!(
            parse_counter(" 7 / 10 ").unwrap(),
            Counter { current: 7, max: Some(10) }
        );
        assert_eq!(parse_counter("0").unwrap(), Counter { current: 0, max: None });
        assert!(parse_counter("x/10").is_err());
        assert!(parse_counter("").is_err());
    }
}
