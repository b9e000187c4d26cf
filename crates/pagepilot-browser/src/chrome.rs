//! Chrome process management and the production context factory.
//!
//! One Chrome process serves the whole pool; isolation comes from CDP
//! browser contexts, one per pooled slot.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use pagepilot_core::{AutomationError, FingerprintProfile, PoolConfig};

use crate::cdp::CdpConnection;
use crate::driver::{CdpDriver, PageDriver};
use crate::pool::ContextFactory;

/// Launches and supervises a Chrome process with remote debugging enabled.
pub struct ChromeLauncher {
    headless: bool,
    debug_port: u16,
    process: tokio::sync::Mutex<Option<Child>>,
}

impl ChromeLauncher {
    pub fn new(headless: bool, debug_port: u16) -> Self {
        Self {
            headless,
            debug_port,
            process: tokio::sync::Mutex::new(None),
        }
    }

    /// CDP endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.debug_port)
    }

    /// Find a Chrome executable.
    pub fn find_chrome() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];

        #[cfg(target_os = "linux")]
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ];

        #[cfg(target_os = "windows")]
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ];

        candidates
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    async fn is_running(&self) -> bool {
        reqwest::get(format!("{}/json/version", self.endpoint()))
            .await
            .is_ok()
    }

    /// Launch Chrome if nothing is listening on the debug port yet.
    pub async fn ensure_running(&self) -> Result<(), AutomationError> {
        if self.is_running().await {
            return Ok(());
        }

        let chrome = Self::find_chrome().ok_or_else(|| {
            AutomationError::Internal("no Chrome executable found".to_string())
        })?;
        let data_dir = std::env::temp_dir().join(format!("pagepilot-chrome-{}", self.debug_port));
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            warn!("Failed to create Chrome data dir: {}", e);
        }

        let mut cmd = Command::new(&chrome);
        cmd.arg(format!("--remote-debugging-port={}", self.debug_port))
            .arg(format!("--user-data-dir={}", data_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-gpu")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if self.headless {
            cmd.arg("--headless=new");
        }

        let child = cmd
            .spawn()
            .map_err(|e| AutomationError::Internal(format!("failed to launch Chrome: {}", e)))?;
        info!("Launched Chrome (pid {:?}) on port {}", child.id(), self.debug_port);
        *self.process.lock().await = Some(child);

        // Wait for the debug endpoint to come up.
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if self.is_running().await {
                return Ok(());
            }
        }
        Err(AutomationError::Internal(
            "Chrome did not start within timeout".to_string(),
        ))
    }

    /// Kill the Chrome process if this launcher started it.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.process.lock().await.take() {
            info!("Shutting down Chrome");
            let _ = child.kill().await;
        }
    }
}

/// Production factory: one shared CDP connection, one isolated browser
/// context per created driver.
pub struct CdpContextFactory {
    launcher: ChromeLauncher,
    connection: tokio::sync::Mutex<Option<Arc<CdpConnection>>>,
}

impl CdpContextFactory {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            launcher: ChromeLauncher::new(config.headless, config.debug_port),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<Arc<CdpConnection>, AutomationError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        self.launcher.ensure_running().await?;
        let conn = Arc::new(
            CdpConnection::connect(&self.launcher.endpoint())
                .await
                .map_err(AutomationError::from)?,
        );
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Tear down the connection and the launched browser.
    pub async fn shutdown(&self) {
        self.connection.lock().await.take();
        self.launcher.shutdown().await;
    }
}

#[async_trait]
impl ContextFactory for CdpContextFactory {
    async fn create(
        &self,
        profile: &FingerprintProfile,
    ) -> Result<Arc<dyn PageDriver>, AutomationError> {
        let conn = self.connection().await?;
        let session = conn
            .create_isolated_session()
            .await
            .map_err(AutomationError::from)?;
        let driver = CdpDriver::new(session);
        driver.apply_profile(profile).await?;
        Ok(Arc::new(driver))
    }
}
