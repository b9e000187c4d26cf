//! The semantic parse pipeline.
//!
//! Each phase is an explicit unit of work: navigate, wait, metadata,
//! fingerprint, elements, blocks, screenshot. Cancellation is checked at
//! phase boundaries and progress is reported after each phase. Extraction
//! failures degrade the result instead of discarding it; only navigation
//! failures and cancellation abort the parse.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pagepilot_browser::PageDriver;
use pagepilot_core::{
    AutomationError, PageMeta, ParseOptions, ParseResult, ParserConfig, ProgressReporter,
};

use crate::cache::{CacheKey, ResultCache};
use crate::scoring::{
    aggregate_confidence, classify_element, content_hash, rank_blocks, RawBlock, RawElement,
};

/// Collects candidate interactive nodes with the attributes the classifier
/// needs. Selector generation prefers IDs, falls back to a positional path.
const ELEMENTS_SCRIPT: &str = r#"
(function() {
  const selectorFor = (el) => {
    if (el.id) return '#' + CSS.escape(el.id);
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && parts.length < 5) {
      let part = node.tagName.toLowerCase();
      const parent = node.parentElement;
      if (parent) {
        const siblings = Array.from(parent.children).filter(c => c.tagName === node.tagName);
        if (siblings.length > 1) part += ':nth-of-type(' + (siblings.indexOf(node) + 1) + ')';
      }
      parts.unshift(part);
      node = parent;
    }
    return parts.join(' > ');
  };
  const nodes = document.querySelectorAll(
    'a, button, input, select, textarea, form, [role], [onclick]');
  return Array.from(nodes).slice(0, 500).map(el => {
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return {
      selector: selectorFor(el),
      tag: el.tagName.toLowerCase(),
      role: el.getAttribute('role'),
      aria_label: el.getAttribute('aria-label'),
      visible: rect.width > 0 && rect.height > 0 &&
               style.visibility !== 'hidden' && style.display !== 'none',
      disabled: !!el.disabled,
      text: (el.innerText || el.value || '').trim().slice(0, 120),
      rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
    };
  });
})()
"#;

/// Collects text segments with their tag and document position.
const BLOCKS_SCRIPT: &str = r#"
(function() {
  const nodes = document.querySelectorAll(
    'h1, h2, h3, h4, p, article, li, td, blockquote');
  return Array.from(nodes).slice(0, 300).map((el, index) => ({
    text: (el.innerText || '').trim().slice(0, 2000),
    tag: el.tagName.toLowerCase(),
    position: index,
  })).filter(b => b.text.length > 0);
})()
"#;

/// Normalized DOM text for fingerprinting: scripts and styles excluded,
/// whitespace collapsed, lowercased.
const NORMALIZE_SCRIPT: &str = r#"
(function() {
  const clone = document.body ? document.body.cloneNode(true) : null;
  if (!clone) return '';
  clone.querySelectorAll('script, style, noscript').forEach(n => n.remove());
  return (clone.innerText || '').replace(/\s+/g, ' ').trim().toLowerCase();
})()
"#;

/// Semantic page parser.
pub struct SemanticParser {
    config: ParserConfig,
    cache: Arc<ResultCache>,
    cache_ttl: Duration,
}

impl SemanticParser {
    pub fn new(config: ParserConfig, cache: Arc<ResultCache>, cache_ttl: Duration) -> Self {
        Self {
            config,
            cache,
            cache_ttl,
        }
    }

    /// Parse `url` using an acquired context's driver.
    pub async fn parse(
        &self,
        driver: Arc<dyn PageDriver>,
        url: &str,
        options: &ParseOptions,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<ParseResult, AutomationError> {
        let mut degraded = false;

        self.checkpoint(cancel)?;
        progress.report(5, "navigate");
        let timeout = Duration::from_millis(if options.timeout_ms > 0 {
            options.timeout_ms
        } else {
            self.config.navigation_timeout_ms
        });
        driver.navigate(url, timeout).await?;

        self.checkpoint(cancel)?;
        progress.report(20, "wait");
        driver
            .wait_for_load(Duration::from_millis(options.wait_for_load_ms))
            .await?;
        if options.network_idle {
            driver
                .wait_for_network_idle(Duration::from_millis(self.config.network_idle_timeout_ms))
                .await?;
        }

        self.checkpoint(cancel)?;
        progress.report(35, "metadata");
        let title = match driver.title().await {
            Ok(title) => title,
            Err(e) => {
                warn!("Title extraction failed: {}", e);
                degraded = true;
                String::new()
            }
        };
        let final_url = driver.current_url().await.unwrap_or_else(|_| url.to_string());
        let language = match driver.evaluate("document.documentElement.lang || ''").await {
            Ok(value) => value.as_str().filter(|s| !s.is_empty()).map(str::to_string),
            Err(e) => {
                warn!("Language extraction failed: {}", e);
                degraded = true;
                None
            }
        };

        self.checkpoint(cancel)?;
        progress.report(50, "fingerprint");
        let hash = match driver.evaluate(NORMALIZE_SCRIPT).await {
            Ok(value) => content_hash(value.as_str().unwrap_or_default()),
            Err(e) => {
                // No DOM fingerprint; fall back to an identity the cache
                // will effectively never hit.
                warn!("DOM normalization failed: {}", e);
                degraded = true;
                content_hash(&format!("{}::{}", url, title))
            }
        };

        let key = CacheKey::new(url, &hash);
        if let Some(hit) = self.cache.get(&key) {
            info!("Cache hit for {} ({})", key.url, &hash[..12.min(hash.len())]);
            progress.report(100, "cache_hit");
            return Ok(hit);
        }

        self.checkpoint(cancel)?;
        progress.report(65, "elements");
        let elements = match self.extract_elements(&driver).await {
            Ok(elements) => elements,
            Err(e) => {
                warn!("Element extraction failed: {}", e);
                degraded = true;
                Vec::new()
            }
        };

        self.checkpoint(cancel)?;
        progress.report(80, "content");
        let blocks = match self.extract_blocks(&driver).await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Content extraction failed: {}", e);
                degraded = true;
                Vec::new()
            }
        };

        let screenshot = if options.screenshot {
            self.checkpoint(cancel)?;
            progress.report(90, "screenshot");
            match driver.screenshot(true).await {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Screenshot failed: {}", e);
                    degraded = true;
                    None
                }
            }
        } else {
            None
        };

        let confidence = aggregate_confidence(&elements, degraded);
        let result = ParseResult {
            page: PageMeta {
                url: final_url,
                title,
                language,
            },
            elements,
            blocks,
            content_hash: hash,
            screenshot,
            degraded,
            confidence,
        };

        self.cache.set(key, result.clone(), self.cache_ttl);
        progress.report(100, "done");
        debug!(
            "Parsed {}: {} elements, {} blocks, degraded={}",
            url,
            result.elements.len(),
            result.blocks.len(),
            degraded
        );
        Ok(result)
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), AutomationError> {
        if cancel.is_cancelled() {
            return Err(AutomationError::Cancelled);
        }
        Ok(())
    }

    async fn extract_elements(
        &self,
        driver: &Arc<dyn PageDriver>,
    ) -> Result<Vec<pagepilot_core::InteractiveElement>, AutomationError> {
        let value = driver.evaluate(ELEMENTS_SCRIPT).await?;
        let raws: Vec<RawElement> = serde_json::from_value(value)
            .map_err(|e| AutomationError::Protocol(format!("bad element payload: {}", e)))?;
        Ok(raws
            .iter()
            .take(self.config.max_elements)
            .map(classify_element)
            .collect())
    }

    async fn extract_blocks(
        &self,
        driver: &Arc<dyn PageDriver>,
    ) -> Result<Vec<pagepilot_core::ContentBlock>, AutomationError> {
        let value = driver.evaluate(BLOCKS_SCRIPT).await?;
        let raws: Vec<RawBlock> = serde_json::from_value(value)
            .map_err(|e| AutomationError::Protocol(format!("bad block payload: {}", e)))?;
        Ok(rank_blocks(raws, self.config.max_blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pagepilot_browser::testing::FakeDriver;
    use serde_json::json;

    // The pipeline's evaluate calls happen in a fixed order:
    // language, normalize, elements, blocks.
    fn queue_happy_page(driver: &FakeDriver) {
        driver.set_title("Login");
        driver.queue_eval(json!("en"));
        driver.queue_eval(json!("welcome please sign in"));
        driver.queue_eval(json!([
            {
                "selector": "#submit",
                "tag": "button",
                "visible": true,
                "text": "Sign in",
                "rect": { "x": 0.0, "y": 0.0, "width": 80.0, "height": 24.0 },
            },
        ]));
        driver.queue_eval(json!([
            { "text": "Welcome back", "tag": "h1", "position": 0 },
        ]));
    }

    fn parser_with_cache() -> (SemanticParser, Arc<ResultCache>) {
        let cache = Arc::new(ResultCache::new());
        let parser = SemanticParser::new(
            ParserConfig::default(),
            cache.clone(),
            Duration::from_secs(60),
        );
        (parser, cache)
    }

    #[tokio::test]
    async fn test_full_parse_populates_cache() {
        let driver = FakeDriver::new();
        queue_happy_page(&driver);
        let (parser, cache) = parser_with_cache();

        let progress_log: Arc<Mutex<Vec<(u8, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let log = progress_log.clone();
        let reporter = move |percent: u8, step: &str| {
            log.lock().push((percent, step.to_string()));
        };

        let result = parser
            .parse(
                driver.clone(),
                "https://example.com/login",
                &ParseOptions::default(),
                &CancellationToken::new(),
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(result.page.title, "Login");
        assert_eq!(result.page.language.as_deref(), Some("en"));
        assert_eq!(result.elements.len(), 1);
        assert_eq!(result.elements[0].role, "button");
        assert_eq!(result.blocks.len(), 1);
        assert!(!result.degraded);
        assert_eq!(cache.len(), 1);

        let log = progress_log.lock();
        assert_eq!(log.last().map(|(p, _)| *p), Some(100));
        // Progress is non-decreasing across checkpoints.
        assert!(log.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_extraction() {
        let first = FakeDriver::new();
        queue_happy_page(&first);
        let (parser, _cache) = parser_with_cache();
        let cancel = CancellationToken::new();
        let options = ParseOptions::default();

        let original = parser
            .parse(
                first.clone(),
                "https://example.com/login",
                &options,
                &cancel,
                &pagepilot_core::NoopProgress,
            )
            .await
            .unwrap();

        // Second visit: same normalized DOM, so same fingerprint.
        let second = FakeDriver::new();
        second.set_title("Login");
        second.queue_eval(json!("en"));
        second.queue_eval(json!("welcome please sign in"));

        let hit = parser
            .parse(
                second.clone(),
                "https://example.com/login",
                &options,
                &cancel,
                &pagepilot_core::NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(hit.content_hash, original.content_hash);
        assert_eq!(hit.elements.len(), 1);
        // Only language + fingerprint evaluations ran on the second driver.
        let evals = second
            .calls()
            .iter()
            .filter(|call| call.as_str() == "evaluate")
            .count();
        assert_eq!(evals, 2);
    }

    #[tokio::test]
    async fn test_partial_extraction_degrades() {
        let driver = FakeDriver::new();
        driver.fail_next("title", AutomationError::Protocol("ctx gone".to_string()));
        driver.queue_eval(json!(""));
        driver.queue_eval(json!("some content"));
        // Both extraction scripts return payloads that fail to decode.
        driver.queue_eval(json!("not an array"));
        driver.queue_eval(json!({ "oops": true }));
        let (parser, _cache) = parser_with_cache();

        let result = parser
            .parse(
                driver.clone(),
                "https://example.com/",
                &ParseOptions::default(),
                &CancellationToken::new(),
                &pagepilot_core::NoopProgress,
            )
            .await
            .unwrap();

        assert!(result.degraded);
        assert!(result.elements.is_empty());
        assert!(result.blocks.is_empty());
        assert!(result.confidence < 0.5);
    }

    #[tokio::test]
    async fn test_navigation_failure_aborts() {
        let driver = FakeDriver::new();
        driver.fail_next(
            "navigate",
            AutomationError::NavigationTimeout {
                url: "https://slow.example.com".to_string(),
                timeout_ms: 30_000,
            },
        );
        let (parser, cache) = parser_with_cache();

        let result = parser
            .parse(
                driver.clone(),
                "https://slow.example.com",
                &ParseOptions::default(),
                &CancellationToken::new(),
                &pagepilot_core::NoopProgress,
            )
            .await;

        assert!(matches!(
            result,
            Err(AutomationError::NavigationTimeout { .. })
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_navigation() {
        let driver = FakeDriver::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (parser, _cache) = parser_with_cache();

        let result = parser
            .parse(
                driver.clone(),
                "https://example.com",
                &ParseOptions::default(),
                &cancel,
                &pagepilot_core::NoopProgress,
            )
            .await;

        assert!(matches!(result, Err(AutomationError::Cancelled)));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_screenshot_collected_when_requested() {
        let driver = FakeDriver::new();
        queue_happy_page(&driver);
        let (parser, _cache) = parser_with_cache();
        let options = ParseOptions {
            screenshot: true,
            ..ParseOptions::default()
        };

        let result = parser
            .parse(
                driver.clone(),
                "https://example.com/login",
                &options,
                &CancellationToken::new(),
                &pagepilot_core::NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(result.screenshot.as_deref(), Some("fake-screenshot-1"));
    }
}
