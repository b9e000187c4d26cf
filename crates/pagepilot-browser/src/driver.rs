//! The page driver seam.
//!
//! Everything above the pool talks to a browser through [`PageDriver`]; the
//! production implementation drives a CDP session, tests substitute scripted
//! fakes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use pagepilot_core::{AutomationError, BoundingBox, FingerprintProfile};

use crate::cdp::CdpSession;

/// Poll interval for readiness/selector waits.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet window required before the network counts as idle.
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Observable state of a located element, used for preconditions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementState {
    /// A node matched the selector.
    pub exists: bool,
    /// Non-zero rendered size and not `visibility: hidden`.
    pub visible: bool,
    /// Not `disabled`.
    pub enabled: bool,
    /// Connected to the document.
    pub attached: bool,
    /// Viewport-relative bounds, when rendered.
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

impl ElementState {
    /// Whether the element can be acted upon.
    pub fn actionable(&self) -> bool {
        self.exists && self.visible && self.enabled && self.attached
    }
}

/// Async interface to a single isolated page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait until the document is complete.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), AutomationError>;

    /// Extra settle time after load.
    async fn wait_for_load(&self, settle: Duration) -> Result<(), AutomationError>;

    /// Best-effort wait until no new resources arrive for a quiet window.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AutomationError>;

    /// Wait for a selector to match, polling until `timeout`.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String, AutomationError>;

    /// Document title.
    async fn title(&self) -> Result<String, AutomationError>;

    /// Evaluate a JavaScript expression, returning its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, AutomationError>;

    /// Inspect an element for precondition checks.
    async fn element_state(&self, selector: &str) -> Result<ElementState, AutomationError>;

    /// Click the matched element.
    async fn click(&self, selector: &str) -> Result<(), AutomationError>;

    /// Type text into the matched element.
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> Result<(), AutomationError>;

    /// Select a value in a `<select>`.
    async fn select(&self, selector: &str, value: &str) -> Result<(), AutomationError>;

    /// Submit the form containing the matched element.
    async fn submit(&self, selector: &str) -> Result<(), AutomationError>;

    /// Hover over the matched element.
    async fn hover(&self, selector: &str) -> Result<(), AutomationError>;

    /// Press a single key.
    async fn press_key(&self, key: &str) -> Result<(), AutomationError>;

    /// Scroll the window by the given deltas.
    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<(), AutomationError>;

    /// Capture a base64 screenshot.
    async fn screenshot(&self, full_page: bool) -> Result<String, AutomationError>;

    /// Reload the page and wait for it to complete.
    async fn refresh(&self) -> Result<(), AutomationError>;

    /// Apply a fingerprint profile (user agent, viewport).
    async fn apply_profile(&self, profile: &FingerprintProfile) -> Result<(), AutomationError>;

    /// Cheap liveness probe.
    async fn is_healthy(&self) -> bool;

    /// Tear the page down. Idempotent.
    async fn close(&self);
}

/// Production driver over a CDP session.
pub struct CdpDriver {
    session: CdpSession,
}

impl CdpDriver {
    pub fn new(session: CdpSession) -> Self {
        Self { session }
    }

    /// Quote a selector for safe embedding in a script.
    fn quoted(selector: &str) -> String {
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
    }

    /// Run a script against the first match of `selector`.
    ///
    /// The script body sees the element as `el` and must return a JSON
    /// value; a missing element surfaces as `ElementNotFound`.
    async fn with_element(
        &self,
        selector: &str,
        body: &str,
    ) -> Result<serde_json::Value, AutomationError> {
        let script = format!(
            "(function() {{ const el = document.querySelector({sel}); \
             if (!el) return null; return (function(el) {{ {body} }})(el); }})()",
            sel = Self::quoted(selector),
            body = body,
        );
        let value = self.session.evaluate(&script).await?;
        if value.is_null() {
            return Err(AutomationError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(value)
    }

    async fn wait_document_complete(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.session.evaluate("document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), AutomationError> {
        let result = self
            .session
            .call("Page.navigate", Some(json!({ "url": url })))
            .await?;

        // Chrome reports network-level failures inline rather than as a
        // protocol error.
        if let Some(error_text) = result["errorText"].as_str() {
            if !error_text.is_empty() {
                return Err(AutomationError::Network(format!(
                    "{} while loading {}",
                    error_text, url
                )));
            }
        }

        self.wait_document_complete(url, timeout).await
    }

    async fn wait_for_load(&self, settle: Duration) -> Result<(), AutomationError> {
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AutomationError> {
        let deadline = Instant::now() + timeout;
        let mut last_count: i64 = -1;
        let mut quiet_since = Instant::now();

        while Instant::now() < deadline {
            let count = self
                .session
                .evaluate("performance.getEntriesByType('resource').length")
                .await?
                .as_i64()
                .unwrap_or(0);

            if count == last_count {
                if quiet_since.elapsed() >= NETWORK_QUIET_WINDOW {
                    return Ok(());
                }
            } else {
                last_count = count;
                quiet_since = Instant::now();
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Idle never settled; proceed with what loaded so far.
        warn!("Network idle wait expired after {:?}", timeout);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let probe = format!(
            "document.querySelector({}) !== null",
            Self::quoted(selector)
        );
        let deadline = Instant::now() + timeout;
        loop {
            if self.session.evaluate(&probe).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        let value = self.session.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String, AutomationError> {
        let value = self.session.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, AutomationError> {
        Ok(self.session.evaluate(script).await?)
    }

    async fn element_state(&self, selector: &str) -> Result<ElementState, AutomationError> {
        let script = format!(
            "(function() {{ const el = document.querySelector({sel}); \
             if (!el) return {{ exists: false, visible: false, enabled: false, attached: false }}; \
             const rect = el.getBoundingClientRect(); \
             const style = window.getComputedStyle(el); \
             return {{ \
               exists: true, \
               attached: el.isConnected, \
               visible: rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none', \
               enabled: !el.disabled, \
               bounding_box: {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }} \
             }}; }})()",
            sel = Self::quoted(selector),
        );
        let value = self.session.evaluate(&script).await?;
        serde_json::from_value(value)
            .map_err(|e| AutomationError::Protocol(format!("bad element state: {}", e)))
    }

    async fn click(&self, selector: &str) -> Result<(), AutomationError> {
        self.with_element(selector, "el.click(); return true;")
            .await?;
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> Result<(), AutomationError> {
        let clear = if clear_first {
            "el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true }));"
        } else {
            ""
        };
        self.with_element(selector, &format!("el.focus(); {} return true;", clear))
            .await?;
        self.session
            .call("Input.insertText", Some(json!({ "text": text })))
            .await?;
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str) -> Result<(), AutomationError> {
        let body = format!(
            "el.value = {val}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return el.value === {val};",
            val = Self::quoted(value),
        );
        let matched = self.with_element(selector, &body).await?;
        if matched.as_bool() != Some(true) {
            return Err(AutomationError::ValidationFailed {
                reason: format!("option {:?} not present in {}", value, selector),
            });
        }
        Ok(())
    }

    async fn submit(&self, selector: &str) -> Result<(), AutomationError> {
        self.with_element(
            selector,
            "const form = el.closest('form'); if (!form) return null; \
             if (form.requestSubmit) form.requestSubmit(); else form.submit(); return true;",
        )
        .await?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), AutomationError> {
        self.with_element(
            selector,
            "el.dispatchEvent(new MouseEvent('mouseover', { bubbles: true })); \
             el.dispatchEvent(new MouseEvent('mouseenter')); return true;",
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        let text = if key.chars().count() == 1 {
            Some(key.to_string())
        } else {
            None
        };
        for event_type in ["rawKeyDown", "keyUp"] {
            self.session
                .call(
                    "Input.dispatchKeyEvent",
                    Some(json!({
                        "type": event_type,
                        "key": key,
                        "text": text,
                    })),
                )
                .await?;
        }
        Ok(())
    }

    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<(), AutomationError> {
        self.session
            .evaluate(&format!("window.scrollBy({}, {})", delta_x, delta_y))
            .await?;
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<String, AutomationError> {
        // JPEG at moderate quality; PNG screenshots of full pages get large.
        let result = self
            .session
            .call(
                "Page.captureScreenshot",
                Some(json!({
                    "format": "jpeg",
                    "quality": 60,
                    "captureBeyondViewport": full_page,
                })),
            )
            .await?;
        result["data"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AutomationError::Protocol("screenshot returned no data".to_string()))
    }

    async fn refresh(&self) -> Result<(), AutomationError> {
        self.session.call("Page.reload", None).await?;
        let url = self.current_url().await.unwrap_or_default();
        self.wait_document_complete(&url, Duration::from_secs(30))
            .await
    }

    async fn apply_profile(&self, profile: &FingerprintProfile) -> Result<(), AutomationError> {
        self.session
            .call(
                "Emulation.setUserAgentOverride",
                Some(json!({ "userAgent": profile.user_agent })),
            )
            .await?;
        self.session
            .call(
                "Emulation.setDeviceMetricsOverride",
                Some(json!({
                    "width": profile.viewport_width,
                    "height": profile.viewport_height,
                    "deviceScaleFactor": 1.0,
                    "mobile": false,
                })),
            )
            .await?;
        debug!("Applied fingerprint profile: {}", profile.user_agent);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        matches!(
            self.session.evaluate("1 + 1").await,
            Ok(value) if value.as_i64() == Some(2)
        )
    }

    async fn close(&self) {
        self.session.close().await;
    }
}
