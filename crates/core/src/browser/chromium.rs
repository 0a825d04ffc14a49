use super::{BrowserLauncher, PageDriver};
use crate::config::{env_bool, env_string};
use anyhow::Context;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    chrome_path: Option<PathBuf>,
    headless: bool,
}

impl ChromiumLauncher {
    pub fn from_env() -> Self {
        Self {
            chrome_path: env_string("CHROME_PATH").map(PathBuf::from),
            headless: env_bool("BROWSER_HEADLESS").unwrap_or(true),
        }
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        // A fresh profile per run keeps localStorage from a previous identity out of this one.
        let profile_dir = std::env::temp_dir().join(format!(
            "ordersheet-profile-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .request_timeout(REQUEST_TIMEOUT)
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(anyhow::Error::msg)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "cdp handler event error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let driver = ChromiumDriver::new(browser, None, handler_task, profile_dir);
                if let Err(close_err) = driver.close().await {
                    tracing::warn!(error = %close_err, "failed to close browser after page error");
                }
                return Err(err).context("failed to open browser tab");
            }
        };

        tracing::info!(headless = self.headless, "chromium session launched");
        Ok(Box::new(ChromiumDriver::new(
            browser,
            Some(page),
            handler_task,
            profile_dir,
        )))
    }
}

/// One Chromium process with a single tab.
pub struct ChromiumDriver {
    browser: tokio::sync::Mutex<Option<Browser>>,
    page: Option<Page>,
    handler_task: tokio::task::JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromiumDriver {
    fn new(
        browser: Browser,
        page: Option<Page>,
        handler_task: tokio::task::JoinHandle<()>,
        profile_dir: PathBuf,
    ) -> Self {
        Self {
            browser: tokio::sync::Mutex::new(Some(browser)),
            page,
            handler_task,
            profile_dir,
        }
    }

    fn page(&self) -> anyhow::Result<&Page> {
        self.page.as_ref().context("browser tab is not open")
    }
}

#[async_trait::async_trait]
impl PageDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.page()?
            .goto(url)
            .await
            .with_context(|| format!("goto {url} failed"))?;
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        self.page()?.reload().await.context("page reload failed")?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(anyhow::Error::msg)?;
        let res = self
            .page()?
            .evaluate_expression(params)
            .await
            .context("script evaluation failed")?;
        Ok(res.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .with_context(|| format!("element {selector} not found"))?;
        element
            .click()
            .await
            .with_context(|| format!("click on {selector} failed"))?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let closed = shutdown(&mut browser, CLOSE_GRACE).await;
        self.handler_task.abort();

        if let Err(err) = std::fs::remove_dir_all(&self.profile_dir) {
            tracing::debug!(error = %err, dir = %self.profile_dir.display(), "profile cleanup failed");
        }
        closed
    }
}

/// Process-level operations `shutdown` drives.
#[async_trait::async_trait]
trait BrowserProcess: Send {
    async fn request_close(&mut self) -> anyhow::Result<()>;
    async fn wait_exit(&mut self) -> anyhow::Result<()>;
    async fn force_kill(&mut self) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> anyhow::Result<()> {
        self.close().await.context("browser close failed")?;
        Ok(())
    }

    async fn wait_exit(&mut self) -> anyhow::Result<()> {
        self.wait().await.context("waiting for chromium exit failed")?;
        Ok(())
    }

    async fn force_kill(&mut self) -> anyhow::Result<()> {
        match self.kill().await {
            Some(res) => res.context("killing chromium failed"),
            None => Ok(()),
        }
    }
}

/// Asks the browser to close and waits for the process to exit, each step bounded by `grace`.
/// Falls back to killing the process when either step fails or stalls.
async fn shutdown(process: &mut dyn BrowserProcess, grace: Duration) -> anyhow::Result<()> {
    let graceful = match tokio::time::timeout(grace, process.request_close()).await {
        Ok(Ok(())) => match tokio::time::timeout(grace, process.wait_exit()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err,
            Err(_) => anyhow::anyhow!("chromium did not exit within {grace:?}"),
        },
        Ok(Err(err)) => err,
        Err(_) => anyhow::anyhow!("browser close did not complete within {grace:?}"),
    };

    tracing::warn!(error = %format!("{graceful:#}"), "graceful browser close failed; killing chromium");
    match tokio::time::timeout(grace, process.force_kill()).await {
        Ok(Ok(())) => Err(graceful.context("chromium was killed")),
        Ok(Err(err)) => Err(graceful.context(format!("{err:#}"))),
        Err(_) => Err(graceful.context(format!("chromium kill did not complete within {grace:?}"))),
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        // Last resort when `close` was never awaited; dropping `Browser` kills the child.
        self.handler_task.abort();
    }
}
