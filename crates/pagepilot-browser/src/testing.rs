//! Scripted fakes for driver-level testing.
//!
//! `FakeDriver` records every operation and can be scripted to fail
//! specific operations or report specific element states, which is how the
//! parser, executor and coordinator test their failure paths without a
//! browser.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use pagepilot_core::{AutomationError, FingerprintProfile};

use crate::driver::{ElementState, PageDriver};
use crate::pool::ContextFactory;

fn actionable_state() -> ElementState {
    ElementState {
        exists: true,
        visible: true,
        enabled: true,
        attached: true,
        bounding_box: None,
    }
}

#[derive(Default)]
struct FakeState {
    url: String,
    title: String,
    calls: Vec<String>,
    eval_results: VecDeque<Value>,
    failures: HashMap<String, VecDeque<AutomationError>>,
    element_states: HashMap<String, VecDeque<ElementState>>,
    screenshots_taken: usize,
    closed: bool,
}

/// A scripted in-memory page driver.
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                title: "Fake Page".to_string(),
                ..FakeState::default()
            }),
        }
    }
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the title reported by the fake page.
    pub fn set_title(&self, title: &str) {
        self.state.lock().title = title.to_string();
    }

    /// Queue a result for the next `evaluate` call (FIFO).
    pub fn queue_eval(&self, value: Value) {
        self.state.lock().eval_results.push_back(value);
    }

    /// Script the next occurrence of `op` to fail with `err`.
    ///
    /// Ops are named after the trait methods: `navigate`, `click`,
    /// `evaluate`, `element_state`, `screenshot`, ...
    pub fn fail_next(&self, op: &str, err: AutomationError) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Queue an element state for a selector; the last queued state sticks.
    pub fn push_element_state(&self, selector: &str, state: ElementState) {
        self.state
            .lock()
            .element_states
            .entry(selector.to_string())
            .or_default()
            .push_back(state);
    }

    /// Every operation performed, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Whether `close` was called.
    pub fn was_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn check_fail(&self, op: &str) -> Result<(), AutomationError> {
        let mut state = self.state.lock();
        if let Some(queue) = state.failures.get_mut(op) {
            if let Some(err) = queue.pop_front() {
                state.calls.push(format!("{}!failed", op));
                return Err(err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), AutomationError> {
        self.check_fail("navigate")?;
        let mut state = self.state.lock();
        state.url = url.to_string();
        state.calls.push(format!("navigate:{}", url));
        Ok(())
    }

    async fn wait_for_load(&self, _settle: Duration) -> Result<(), AutomationError> {
        self.check_fail("wait_for_load")?;
        self.record("wait_for_load".to_string());
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), AutomationError> {
        self.check_fail("network_idle")?;
        self.record("network_idle".to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), AutomationError> {
        self.check_fail("wait_for_selector")?;
        self.record(format!("wait_for_selector:{}", selector));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        self.check_fail("current_url")?;
        Ok(self.state.lock().url.clone())
    }

    async fn title(&self) -> Result<String, AutomationError> {
        self.check_fail("title")?;
        Ok(self.state.lock().title.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value, AutomationError> {
        self.check_fail("evaluate")?;
        let mut state = self.state.lock();
        state.calls.push("evaluate".to_string());
        Ok(state.eval_results.pop_front().unwrap_or(Value::Null))
    }

    async fn element_state(&self, selector: &str) -> Result<ElementState, AutomationError> {
        self.check_fail("element_state")?;
        let mut state = self.state.lock();
        state.calls.push(format!("element_state:{}", selector));
        let result = match state.element_states.get_mut(selector) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_else(actionable_state),
            None => actionable_state(),
        };
        Ok(result)
    }

    async fn click(&self, selector: &str) -> Result<(), AutomationError> {
        self.check_fail("click")?;
        self.record(format!("click:{}", selector));
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        _clear_first: bool,
    ) -> Result<(), AutomationError> {
        self.check_fail("type")?;
        self.record(format!("type:{}:{}", selector, text));
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str) -> Result<(), AutomationError> {
        self.check_fail("select")?;
        self.record(format!("select:{}:{}", selector, value));
        Ok(())
    }

    async fn submit(&self, selector: &str) -> Result<(), AutomationError> {
        self.check_fail("submit")?;
        self.record(format!("submit:{}", selector));
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), AutomationError> {
        self.check_fail("hover")?;
        self.record(format!("hover:{}", selector));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        self.check_fail("key_press")?;
        self.record(format!("key_press:{}", key));
        Ok(())
    }

    async fn scroll(&self, delta_x: f64, delta_y: f64) -> Result<(), AutomationError> {
        self.check_fail("scroll")?;
        self.record(format!("scroll:{}:{}", delta_x, delta_y));
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<String, AutomationError> {
        self.check_fail("screenshot")?;
        let mut state = self.state.lock();
        state.screenshots_taken += 1;
        let n = state.screenshots_taken;
        state
            .calls
            .push(format!("screenshot:{}", if full_page { "full" } else { "viewport" }));
        Ok(format!("fake-screenshot-{}", n))
    }

    async fn refresh(&self) -> Result<(), AutomationError> {
        self.check_fail("refresh")?;
        self.record("refresh".to_string());
        Ok(())
    }

    async fn apply_profile(&self, profile: &FingerprintProfile) -> Result<(), AutomationError> {
        self.check_fail("apply_profile")?;
        self.record(format!("apply_profile:{}", profile.user_agent));
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.state.lock().closed
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.calls.push("close".to_string());
    }
}

/// Factory producing fake drivers; counts creations and can fail on demand.
#[derive(Default)]
pub struct FakeFactory {
    created: AtomicUsize,
    fail_next: AtomicBool,
    drivers: Mutex<Vec<Arc<FakeDriver>>>,
}

impl FakeFactory {
    /// Number of drivers created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Make the next `create` call fail with a network error.
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// All drivers handed out, in creation order.
    pub fn drivers(&self) -> Vec<Arc<FakeDriver>> {
        self.drivers.lock().clone()
    }
}

#[async_trait]
impl ContextFactory for FakeFactory {
    async fn create(
        &self,
        _profile: &FingerprintProfile,
    ) -> Result<Arc<dyn PageDriver>, AutomationError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AutomationError::Network("factory down".to_string()));
        }
        let driver = FakeDriver::new();
        self.created.fetch_add(1, Ordering::SeqCst);
        self.drivers.lock().push(driver.clone());
        Ok(driver)
    }
}
