//! Chrome binding of the publish-target step vocabulary.
//!
//! The target's creator studio has no publish API, so each step is bound to
//! DOM automation: cookie injection for the session, CDP file-input injection
//! for media submission, and script evaluation for the progress/confirmation
//! probes. Every step is bounded by `step_timeout`; the machine owns the
//! longer polling budgets.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, GetCookiesParams, SetCookiesParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::{PortageError, Result as AppResult};
use crate::config::PublishConfig;
use crate::publish::session::{SessionCookie, SessionStore};
use crate::publish::{
    ConfirmSignal, PublishError, PublishMetadata, PublishTarget, ReadinessSignal,
};

const FILE_INPUT_SELECTOR: &str = "input[type=file]";
const TAG_ZONE_SELECTOR: &str = ".zone-container";

/// Probes upload progress: an explicit failure marker beats everything, the
/// reupload control only renders once the media is processed.
const READINESS_SCRIPT: &str = r#"
(() => {
    const failed = Array.from(document.querySelectorAll('div.progress-div div'))
        .some(el => el.textContent.includes('上传失败'));
    if (failed) return 'failed';
    const ready = Array.from(document.querySelectorAll('label'))
        .some(el => el.textContent.includes('重新上传'));
    if (ready) return 'ready';
    return 'pending';
})()
"#;

const TITLE_SCRIPT: &str = r#"
(() => {
    const input = document.querySelector('input[placeholder*="标题"]');
    if (!input) return false;
    const setter = Object.getOwnPropertyDescriptor(
        window.HTMLInputElement.prototype, 'value').set;
    setter.call(input, __TITLE__);
    input.dispatchEvent(new Event('input', { bubbles: true }));
    return true;
})()
"#;

const COVER_SCRIPT: &str = r#"
(() => {
    const candidates = Array.from(document.querySelectorAll('div'))
        .filter(el => el.children.length === 0
            && el.textContent.trim() === '选择封面');
    if (candidates.length > 0) candidates[0].click();
    const bubble = document.querySelector('[class^="recommend-bubble"]');
    if (bubble) bubble.click();
    return candidates.length;
})()
"#;

const TRIGGER_SCRIPT: &str = r#"
(() => {
    const button = Array.from(document.querySelectorAll('button'))
        .find(el => el.textContent.trim() === '发布');
    if (!button) return false;
    button.click();
    return true;
})()
"#;

const MANAGE_SURFACE_SCRIPT: &str = r#"
(() => document.body.innerText.includes('作品管理'))()
"#;

const LOGGED_OUT_SCRIPT: &str = r#"
(() => document.body.innerText.includes('扫码登录'))()
"#;

struct Driver {
    browser: Browser,
    page: Page,
}

pub struct ChromeTarget {
    config: PublishConfig,
    session: SessionStore,
    driver: Mutex<Option<Driver>>,
}

impl ChromeTarget {
    pub fn new(config: PublishConfig, session: SessionStore) -> Self {
        Self {
            config,
            session,
            driver: Mutex::new(None),
        }
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.config.step_timeout_secs)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, PublishError>
    where
        F: std::future::Future<Output = Result<T, PublishError>>,
    {
        tokio::time::timeout(self.step_timeout(), fut)
            .await
            .map_err(|_| PublishError::Step(format!("{} timed out", what)))?
    }

    async fn with_page<T, F, Fut>(&self, what: &str, f: F) -> Result<T, PublishError>
    where
        F: FnOnce(Page) -> Fut,
        Fut: std::future::Future<Output = Result<T, PublishError>>,
    {
        let page = {
            let driver = self.driver.lock().await;
            let driver = driver
                .as_ref()
                .ok_or_else(|| PublishError::Step("no active session".into()))?;
            driver.page.clone()
        };
        self.bounded(what, f(page)).await
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(
        page: &Page,
        script: &str,
        what: &str,
    ) -> Result<T, PublishError> {
        page.evaluate(script)
            .await
            .map_err(|e| PublishError::Step(format!("{}: {}", what, e)))?
            .into_value()
            .map_err(|e| PublishError::Step(format!("{} result: {:?}", what, e)))
    }

    /// Wait for the page URL to reach the given prefix.
    async fn wait_for_url(page: &Page, prefix: &str) -> Result<(), PublishError> {
        loop {
            let url = page
                .url()
                .await
                .map_err(|e| PublishError::Step(format!("reading page url: {}", e)))?
                .unwrap_or_default();
            if url.starts_with(prefix) {
                return Ok(());
            }
            debug!(current = %url, expected = %prefix, "Waiting for navigation");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

pub(crate) fn to_cookie_param(cookie: &SessionCookie) -> Result<CookieParam, PublishError> {
    CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure)
        .build()
        .map_err(PublishError::Step)
}

pub(crate) fn render_title_script(title: &str) -> String {
    let encoded = serde_json::to_string(title).unwrap_or_else(|_| "\"\"".to_string());
    TITLE_SCRIPT.replace("__TITLE__", &encoded)
}

/// Launch a browser with the arguments the target's pages tolerate, and keep
/// its CDP event handler drained in the background.
pub(crate) async fn launch_browser(headless: bool) -> Result<Browser, PublishError> {
    let mut builder = BrowserConfig::builder()
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer");

    if !headless {
        builder = builder.with_head();
    }

    let browser_config = builder
        .build()
        .map_err(|e| PublishError::Step(format!("Failed to build browser config: {}", e)))?;

    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
        PublishError::Step(format!(
            "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
            e
        ))
    })?;

    tokio::spawn(async move {
        while let Some(_event) = handler.next().await {
            // Drain browser events.
        }
    });

    Ok(browser)
}

async fn export_cookies(page: &Page) -> Result<Vec<SessionCookie>, PublishError> {
    let returns = page
        .execute(GetCookiesParams::default())
        .await
        .map_err(|e| PublishError::Step(format!("exporting cookies: {}", e)))?;

    Ok(returns
        .result
        .cookies
        .iter()
        .map(|c| SessionCookie {
            name: c.name.clone(),
            value: c.value.clone(),
            domain: c.domain.clone(),
            path: c.path.clone(),
            expires: None,
            http_only: c.http_only,
            secure: c.secure,
        })
        .collect())
}

#[async_trait]
impl PublishTarget for ChromeTarget {
    async fn establish_session(&self) -> Result<(), PublishError> {
        let cookies = self
            .session
            .load()
            .map_err(|e| PublishError::Step(e.to_string()))?
            .ok_or(PublishError::AuthRequired)?;

        let browser = launch_browser(self.config.headless).await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PublishError::Step(format!("opening page: {}", e)))?;

        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        page.execute(SetCookiesParams::new(params))
            .await
            .map_err(|e| PublishError::Step(format!("importing session cookies: {}", e)))?;

        let upload_url = self.config.upload_url.clone();
        self.bounded("opening upload page", async {
            page.goto(upload_url.as_str())
                .await
                .map_err(|e| PublishError::Step(format!("navigating to upload page: {}", e)))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| PublishError::Step(format!("upload page navigation: {}", e)))?;
            Ok(())
        })
        .await?;

        // Stale cookies bounce to the login surface.
        let url = page
            .url()
            .await
            .map_err(|e| PublishError::Step(format!("reading page url: {}", e)))?
            .unwrap_or_default();
        let logged_out: bool = url.contains("login")
            || Self::evaluate(&page, LOGGED_OUT_SCRIPT, "login probe").await?;
        if logged_out {
            let _ = page.close().await;
            return Err(PublishError::AuthRequired);
        }

        *self.driver.lock().await = Some(Driver { browser, page });
        Ok(())
    }

    async fn submit_media(&self, path: &Path) -> Result<(), PublishError> {
        let path = path.to_string_lossy().to_string();
        self.with_page("submitting media", |page| async move {
            let input = page
                .find_element(FILE_INPUT_SELECTOR)
                .await
                .map_err(|e| PublishError::Step(format!("locating file input: {}", e)))?;

            let params = SetFileInputFilesParams::builder()
                .files(vec![path])
                .backend_node_id(input.backend_node_id)
                .build()
                .map_err(PublishError::Step)?;

            page.execute(params)
                .await
                .map_err(|e| PublishError::Step(format!("handing over media file: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn check_readiness(&self) -> Result<ReadinessSignal, PublishError> {
        self.with_page("readiness probe", |page| async move {
            let signal: String = Self::evaluate(&page, READINESS_SCRIPT, "readiness probe").await?;
            Ok(match signal.as_str() {
                "ready" => ReadinessSignal::Ready,
                "failed" => ReadinessSignal::Failed,
                _ => ReadinessSignal::Pending,
            })
        })
        .await
    }

    async fn fill_metadata(&self, meta: &PublishMetadata) -> Result<(), PublishError> {
        let publish_url = self.config.publish_url.clone();
        let meta = meta.clone();
        self.with_page("filling metadata", |page| async move {
            // Handing over the file redirects to the publish form.
            Self::wait_for_url(&page, &publish_url).await?;

            let filled: bool =
                Self::evaluate(&page, &render_title_script(&meta.title), "title fill").await?;
            if !filled {
                warn!("Title field not found; publishing without a title");
            }

            if !meta.tags.is_empty() {
                let zone = page
                    .find_element(TAG_ZONE_SELECTOR)
                    .await
                    .map_err(|e| PublishError::Step(format!("locating tag zone: {}", e)))?;
                zone.click()
                    .await
                    .map_err(|e| PublishError::Step(format!("focusing tag zone: {}", e)))?;
                for tag in &meta.tags {
                    zone.type_str(&format!("#{}", tag))
                        .await
                        .map_err(|e| PublishError::Step(format!("typing tag: {}", e)))?;
                    zone.press_key("Space")
                        .await
                        .map_err(|e| PublishError::Step(format!("committing tag: {}", e)))?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn select_cover(&self) -> Result<usize, PublishError> {
        self.with_page("selecting cover", |page| async move {
            let count: i64 = Self::evaluate(&page, COVER_SCRIPT, "cover selection").await?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    async fn trigger_publish(&self) -> Result<bool, PublishError> {
        self.with_page("triggering publish", |page| async move {
            Self::evaluate(&page, TRIGGER_SCRIPT, "publish trigger").await
        })
        .await
    }

    async fn check_confirmation(&self) -> Result<ConfirmSignal, PublishError> {
        let manage_url = self.config.manage_url.clone();
        self.with_page("confirmation probe", |page| async move {
            let url = page
                .url()
                .await
                .map_err(|e| PublishError::Step(format!("reading page url: {}", e)))?
                .unwrap_or_default();
            if url.starts_with(&manage_url) {
                return Ok(ConfirmSignal::Live);
            }

            let managing: bool =
                Self::evaluate(&page, MANAGE_SURFACE_SCRIPT, "manage probe").await?;
            if managing {
                return Ok(ConfirmSignal::Managing);
            }
            Ok(ConfirmSignal::Pending)
        })
        .await
    }

    async fn persist_session(&self) -> Result<(), PublishError> {
        let cookies = self
            .with_page("persisting session", |page| async move {
                export_cookies(&page).await
            })
            .await?;

        self.session
            .save(&cookies)
            .map_err(|e| PublishError::Step(format!("saving session: {}", e)))?;
        info!(path = %self.session.path().display(), "Session cookies persisted");
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut driver) = self.driver.lock().await.take() {
            let _ = driver.page.close().await;
            if let Err(e) = driver.browser.close().await {
                debug!("Browser close: {}", e);
            }
        }
    }
}

/// Open a visible browser on the target's home page and wait for the operator
/// to authenticate, then persist the session cookies.
pub async fn interactive_login(config: &PublishConfig, session: &SessionStore) -> AppResult<()> {
    let browser = launch_browser(false)
        .await
        .map_err(|e| PortageError::Browser(e.to_string()))?;

    let page = browser
        .new_page(config.home_url.as_str())
        .await
        .map_err(|e| PortageError::Browser(format!("opening login page: {}", e)))?;

    info!("Waiting for sign-in; scan the code in the browser window");

    let budget = Duration::from_secs(600);
    let started = tokio::time::Instant::now();
    loop {
        let url = page
            .url()
            .await
            .map_err(|e| PortageError::Browser(format!("reading page url: {}", e)))?
            .unwrap_or_default();
        if url.starts_with(&config.home_url) && !url.contains("login") {
            // Home URL plus an authenticated DOM means we're in.
            let logged_out: bool = page
                .evaluate(LOGGED_OUT_SCRIPT)
                .await
                .ok()
                .and_then(|v| v.into_value().ok())
                .unwrap_or(false);
            if !logged_out {
                break;
            }
        }
        if started.elapsed() >= budget {
            return Err(PortageError::Session("sign-in timed out".into()));
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    let cookies = export_cookies(&page)
        .await
        .map_err(|e| PortageError::Browser(e.to_string()))?;
    session.save(&cookies)?;
    info!(path = %session.path().display(), "Signed in; session saved");

    let _ = page.close().await;
    let mut browser = browser;
    let _ = browser.close().await;
    Ok(())
}
