//! Semantic parse result types.

use serde::{Deserialize, Serialize};

/// Options for a parse task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Extra settle time after the load event, in milliseconds.
    #[serde(default = "default_wait_for_load_ms")]
    pub wait_for_load_ms: u64,
    /// Also wait for the network to go idle.
    #[serde(default)]
    pub network_idle: bool,
    /// Capture a full-page screenshot.
    #[serde(default)]
    pub screenshot: bool,
    /// Navigation timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_wait_for_load_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            wait_for_load_ms: default_wait_for_load_ms(),
            network_idle: false,
            screenshot: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Page-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMeta {
    /// Final URL after redirects.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Declared document language, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Axis-aligned element bounds in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A classified interactive element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// CSS selector that re-locates the element.
    pub selector: String,
    /// Semantic role (button, link, textbox, ...).
    pub role: String,
    /// Classification confidence in [0, 1].
    pub confidence: f32,
    /// On-screen bounds, absent for detached elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Visible label or text, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A ranked block of page content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Extracted text.
    pub text: String,
    /// Importance score in [0, 1].
    pub importance: f32,
    /// Rank among the page's blocks (0 = most important).
    pub rank: usize,
}

/// Structured semantic model of a parsed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    /// Page metadata.
    pub page: PageMeta,
    /// Classified interactive elements.
    pub elements: Vec<InteractiveElement>,
    /// Ranked content blocks.
    pub blocks: Vec<ContentBlock>,
    /// Fingerprint over the normalized DOM, used as a cache key component.
    pub content_hash: String,
    /// Base64 screenshot, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// Set when extraction only partially succeeded.
    pub degraded: bool,
    /// Aggregate confidence in [0, 1]; lowered for degraded results.
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let options: ParseOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(options.wait_for_load_ms, 500);
        assert_eq!(options.timeout_ms, 30_000);
        assert!(!options.network_idle);
        assert!(!options.screenshot);
    }

    #[test]
    fn test_result_serialization_skips_empties() {
        let result = ParseResult {
            page: PageMeta {
                url: "https://example.com/".to_string(),
                title: "Example".to_string(),
                language: None,
            },
            elements: vec![],
            blocks: vec![],
            content_hash: "abc".to_string(),
            screenshot: None,
            degraded: false,
            confidence: 1.0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("screenshot").is_none());
        assert!(json["page"].get("language").is_none());
    }
}
