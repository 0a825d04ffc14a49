use super::{scripts, PageDriver, SessionOptions};
use crate::error::{FailureKind, RunFailure};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launched,
    Navigated,
    IdentityInjected,
    Reloaded,
    StateReady,
    ModeConfirmed,
    ModalOpen,
    Done,
}

/// Drives the simulation page from a blank tab to an open order sheet overlay.
///
/// The walk is strictly linear. Each bounded wait converts expiry into a classified
/// `RunFailure`; the caller owns the driver and closes it whatever happens here.
pub struct OrderSheetSession<'a> {
    driver: &'a dyn PageDriver,
    opts: &'a SessionOptions,
    state: SessionState,
}

#[derive(Debug, Deserialize)]
struct NetworkSnapshot {
    #[serde(default)]
    ready: String,
    #[serde(default)]
    resources: u64,
}

impl<'a> OrderSheetSession<'a> {
    pub fn new(driver: &'a dyn PageDriver, opts: &'a SessionOptions) -> Self {
        Self {
            driver,
            opts,
            state: SessionState::Launched,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn driver(&self) -> &'a dyn PageDriver {
        self.driver
    }

    /// Runs every transition up to `ModalOpen` as `identity`.
    pub async fn open_order_sheet(&mut self, identity: &str) -> anyhow::Result<()> {
        self.navigate().await?;
        self.inject_identity(identity).await?;
        self.reload().await?;
        self.wait_state_ready().await?;
        self.confirm_mode().await?;
        self.open_modal().await?;
        Ok(())
    }

    /// Marks extraction as handed off.
    pub fn finish(&mut self) {
        self.advance(SessionState::Done);
    }

    fn advance(&mut self, next: SessionState) {
        tracing::info!(from = ?self.state, to = ?next, "browser session transition");
        self.state = next;
    }

    async fn navigate(&mut self) -> anyhow::Result<()> {
        let url = self.opts.target_url.as_str();
        match tokio::time::timeout(self.opts.navigation_timeout, self.driver.goto(url)).await {
            Ok(res) => res.with_context(|| format!("navigation to {url} failed"))?,
            Err(_) => {
                return Err(RunFailure::new(
                    FailureKind::NavigationTimeout,
                    "navigate",
                    format!("load of {url} exceeded {:?}", self.opts.navigation_timeout),
                )
                .into())
            }
        }
        self.wait_network_quiet("navigate").await?;
        self.advance(SessionState::Navigated);
        Ok(())
    }

    async fn inject_identity(&mut self, identity: &str) -> anyhow::Result<()> {
        let script = scripts::set_identity(&self.opts.identity_storage_key, identity);
        let stored = self
            .driver
            .evaluate(&script)
            .await
            .context("failed to write identity into localStorage")?;
        anyhow::ensure!(
            stored == Value::Bool(true),
            "localStorage did not retain identity under {}",
            self.opts.identity_storage_key
        );
        self.advance(SessionState::IdentityInjected);
        Ok(())
    }

    async fn reload(&mut self) -> anyhow::Result<()> {
        match tokio::time::timeout(self.opts.navigation_timeout, self.driver.reload()).await {
            Ok(res) => res.context("reload failed")?,
            Err(_) => {
                return Err(RunFailure::new(
                    FailureKind::NavigationTimeout,
                    "reload",
                    format!("reload exceeded {:?}", self.opts.navigation_timeout),
                )
                .into())
            }
        }
        self.wait_network_quiet("reload").await?;
        self.advance(SessionState::Reloaded);
        Ok(())
    }

    async fn wait_state_ready(&mut self) -> anyhow::Result<()> {
        let started = Instant::now();
        self.poll_until_true(
            self.opts.readiness.script(),
            self.opts.state_timeout,
            FailureKind::StateTimeout,
            "state_ready",
        )
        .await?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis(),
            readiness = ?self.opts.readiness,
            "simulation state ready"
        );
        self.advance(SessionState::StateReady);
        Ok(())
    }

    async fn confirm_mode(&mut self) -> anyhow::Result<()> {
        let toggle = self
            .driver
            .evaluate(scripts::TOGGLE_STATE)
            .await
            .context("failed to read mode toggle")?;

        match toggle {
            Value::Bool(checked) if checked != self.opts.desired_toggle_checked => {
                self.driver
                    .click(scripts::TOGGLE_SELECTOR)
                    .await
                    .context("failed to click mode toggle")?;
                // No readiness signal exists for the recompute the toggle triggers.
                tracing::info!(
                    settle = ?self.opts.toggle_settle,
                    "mode toggled; waiting fixed settle delay"
                );
                tokio::time::sleep(self.opts.toggle_settle).await;
            }
            Value::Bool(_) => tracing::debug!("mode toggle already in desired state"),
            _ => tracing::debug!("mode toggle absent; skipping"),
        }

        self.advance(SessionState::ModeConfirmed);
        Ok(())
    }

    async fn open_modal(&mut self) -> anyhow::Result<()> {
        self.driver
            .click(scripts::ORDER_SHEET_BUTTON_SELECTOR)
            .await
            .context("failed to click order sheet button")?;
        self.poll_until_true(
            scripts::MODAL_VISIBLE,
            self.opts.modal_timeout,
            FailureKind::ModalTimeout,
            "modal_open",
        )
        .await?;
        self.advance(SessionState::ModalOpen);
        Ok(())
    }

    /// Polls `script` until it evaluates to `true`. Evaluation errors count as "not yet": the
    /// page may be mid-navigation and tear down the execution context.
    async fn poll_until_true(
        &self,
        script: &str,
        timeout: Duration,
        kind: FailureKind,
        stage: &'static str,
    ) -> anyhow::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.evaluate_before(script, deadline).await {
                Some(Ok(Value::Bool(true))) => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(stage, attempts, error = %err, "probe failed; retrying")
                }
                None => tracing::debug!(stage, attempts, "probe still running at deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RunFailure::new(
                    kind,
                    stage,
                    format!("signal not observed within {timeout:?} ({attempts} probes)"),
                )
                .into());
            }
            tokio::time::sleep(self.opts.poll_interval.min(deadline - now)).await;
        }
    }

    /// Evaluates `script`, giving up at `deadline`. `None` means the page did not answer in time.
    async fn evaluate_before(
        &self,
        script: &str,
        deadline: Instant,
    ) -> Option<anyhow::Result<Value>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::timeout(remaining, self.driver.evaluate(script))
            .await
            .ok()
    }

    /// Approximates network idle: document complete and no new resource entries for
    /// `network_idle`.
    async fn wait_network_quiet(&self, stage: &'static str) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.opts.navigation_timeout;
        let mut last_count: Option<u64> = None;
        let mut stable_since = Instant::now();

        loop {
            let probe = self.evaluate_before(scripts::NETWORK_SNAPSHOT, deadline).await;
            let now = Instant::now();
            match probe {
                Some(Ok(v)) => match serde_json::from_value::<NetworkSnapshot>(v) {
                    Ok(snap) if snap.ready == "complete" => {
                        if last_count == Some(snap.resources) {
                            if now.duration_since(stable_since) >= self.opts.network_idle {
                                return Ok(());
                            }
                        } else {
                            last_count = Some(snap.resources);
                            stable_since = now;
                        }
                    }
                    Ok(_) => last_count = None,
                    Err(err) => tracing::debug!(stage, error = %err, "unexpected network snapshot"),
                },
                Some(Err(err)) => {
                    tracing::debug!(stage, error = %err, "network probe failed; retrying")
                }
                None => tracing::debug!(stage, "network probe still running at deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RunFailure::new(
                    FailureKind::NavigationTimeout,
                    stage,
                    format!(
                        "network did not settle within {:?}",
                        self.opts.navigation_timeout
                    ),
                )
                .into());
            }
            tokio::time::sleep(self.opts.poll_interval.min(deadline - now)).await;
        }
    }
}
