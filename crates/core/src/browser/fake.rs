use super::{scripts, BrowserLauncher, PageDriver};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted stand-in for the simulation page.
#[derive(Debug)]
pub(crate) struct FakePage {
    /// Readiness polls that report "not ready" before the state appears; `None` never appears.
    pub ready_after_polls: Option<usize>,
    pub toggle: Mutex<Option<bool>>,
    pub modal_opens: bool,
    pub modal_text: Option<String>,
    pub summary: Value,
    pub summary_throws: bool,
    /// Navigation never completes.
    pub goto_hangs: bool,
    /// Readiness probes never return.
    pub readiness_hangs: bool,
    /// A new resource shows up on every network probe.
    pub network_busy: bool,

    pub network_probes: AtomicUsize,
    pub readiness_polls: AtomicUsize,
    pub modal_visible: AtomicBool,
    pub closed: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakePage {
    pub fn ready() -> Self {
        Self {
            ready_after_polls: Some(2),
            toggle: Mutex::new(Some(false)),
            modal_opens: true,
            modal_text: Some(
                "Order Sheet\n×\nTicker  Price  Qty\nAAPL  190.10  5\nMSFT  410.00  -2\nCopy Text\nClose"
                    .to_string(),
            ),
            summary: json!({
                "holdings": [{"quantity": 5, "ticker": "AAPL"}, {"quantity": 7}],
                "currentSeed": 100000.7,
                "pendingRebalance": 50000.9,
                "previewTotalAsset": "$152,340"
            }),
            summary_throws: false,
            goto_hangs: false,
            readiness_hangs: false,
            network_busy: false,
            network_probes: AtomicUsize::new(0),
            readiness_polls: AtomicUsize::new(0),
            modal_visible: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl PageDriver for Arc<FakePage> {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.record(format!("goto {url}"));
        if self.goto_hangs {
            return std::future::pending().await;
        }
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        self.record("reload".to_string());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<Value> {
        if script == scripts::NETWORK_SNAPSHOT {
            let probes = self.network_probes.fetch_add(1, Ordering::SeqCst);
            let resources = if self.network_busy { probes } else { 3 };
            return Ok(json!({"ready": "complete", "resources": resources}));
        }
        if script == scripts::STATE_READY_ELEMENT || script == scripts::STATE_READY_DOLLAR_TEXT {
            let polls = self.readiness_polls.fetch_add(1, Ordering::SeqCst);
            if self.readiness_hangs {
                return std::future::pending().await;
            }
            let ready = self.ready_after_polls.is_some_and(|n| polls >= n);
            return Ok(Value::Bool(ready));
        }
        if script == scripts::TOGGLE_STATE {
            return Ok(match *self.toggle.lock().unwrap() {
                Some(b) => Value::Bool(b),
                None => Value::Null,
            });
        }
        if script == scripts::MODAL_VISIBLE {
            return Ok(Value::Bool(self.modal_visible.load(Ordering::SeqCst)));
        }
        if script == scripts::MODAL_TEXT {
            return Ok(self
                .modal_text
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null));
        }
        if script == scripts::SIMULATION_SUMMARY {
            self.record("read summary".to_string());
            anyhow::ensure!(!self.summary_throws, "TypeError: s.holdings is not iterable");
            return Ok(self.summary.clone());
        }
        if script.contains("localStorage.setItem") {
            self.record(format!("identity {script}"));
            return Ok(Value::Bool(true));
        }
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        self.record(format!("click {selector}"));
        if selector == scripts::TOGGLE_SELECTOR {
            let mut toggle = self.toggle.lock().unwrap();
            anyhow::ensure!(toggle.is_some(), "no node found for selector {selector}");
            *toggle = (*toggle).map(|b| !b);
        }
        if selector == scripts::ORDER_SHEET_BUTTON_SELECTOR && self.modal_opens {
            self.modal_visible.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.record("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the shared fake and counts launches.
#[derive(Debug)]
pub(crate) struct FakeLauncher {
    pub page: Arc<FakePage>,
    pub launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Arc::new(page),
            launches: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.page.clone()))
    }
}
