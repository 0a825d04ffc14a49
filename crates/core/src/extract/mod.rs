use crate::browser::{scripts, PageDriver};
use crate::config::env_string;
use crate::domain::order_sheet::{ExtractedMessage, SimulationSummary};
use crate::error::{FailureKind, RunFailure};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

pub mod normalize;

pub use normalize::{normalize, NormalizeRules};

const ZERO_TOTAL_ASSET: &str = "$0";

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub native_title: String,
    pub header_title: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            native_title: normalize::DEFAULT_NATIVE_TITLE.to_string(),
            header_title: normalize::DEFAULT_HEADER_TITLE.to_string(),
        }
    }
}

impl ExtractOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(t) = env_string("ORDER_SHEET_TITLE") {
            out.native_title = t;
        }
        if let Some(h) = env_string("ORDER_SHEET_HEADER") {
            out.header_title = h;
        }
        out
    }

    pub fn rules(&self) -> NormalizeRules {
        NormalizeRules::new(self.native_title.clone(), self.header_title.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(default)]
    holdings: Vec<RawHolding>,
    #[serde(rename = "currentSeed")]
    current_seed: f64,
    #[serde(rename = "pendingRebalance", default)]
    pending_rebalance: Option<f64>,
    #[serde(rename = "previewTotalAsset", default)]
    preview_total_asset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHolding {
    #[serde(default)]
    quantity: Option<f64>,
}

/// `floor(current_seed + pending_rebalance)`, with a missing rebalance counting as zero.
pub fn effective_seed(current_seed: f64, pending_rebalance: Option<f64>) -> anyhow::Result<i64> {
    let total = current_seed + pending_rebalance.unwrap_or(0.0);
    anyhow::ensure!(total.is_finite(), "effective seed is not finite ({total})");
    anyhow::ensure!(
        total.abs() < i64::MAX as f64,
        "effective seed out of range ({total})"
    );
    Ok(total.floor() as i64)
}

fn summarize(raw: RawSummary) -> anyhow::Result<SimulationSummary> {
    let holdings_quantity = raw
        .holdings
        .iter()
        .map(|h| h.quantity.unwrap_or(0.0))
        .sum::<f64>();
    let effective_seed = effective_seed(raw.current_seed, raw.pending_rebalance)?;
    let total_asset_text = raw
        .preview_total_asset
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ZERO_TOTAL_ASSET.to_string());

    Ok(SimulationSummary {
        holdings_quantity,
        effective_seed,
        total_asset_text,
    })
}

/// Reads the in-memory result object. `Ok(None)` when the page never published it.
async fn read_summary(driver: &dyn PageDriver) -> anyhow::Result<Option<SimulationSummary>> {
    let v = driver
        .evaluate(scripts::SIMULATION_SUMMARY)
        .await
        .context("summary script evaluation failed")?;
    if v.is_null() {
        return Ok(None);
    }
    let raw = serde_json::from_value::<RawSummary>(v).context("unexpected lastFinalState shape")?;
    summarize(raw).map(Some)
}

/// Builds the run's message from an open order sheet overlay.
///
/// The overlay text is mandatory. The summary block is best effort: when it cannot be read the
/// message goes out with the body alone.
pub async fn extract(
    driver: &dyn PageDriver,
    rules: &NormalizeRules,
) -> anyhow::Result<ExtractedMessage> {
    let body = match driver
        .evaluate(scripts::MODAL_TEXT)
        .await
        .context("overlay text evaluation failed")?
    {
        Value::String(s) if !s.trim().is_empty() => s,
        other => {
            return Err(RunFailure::new(
                FailureKind::Extraction,
                "overlay_text",
                format!("overlay text unavailable (got {})", value_kind(&other)),
            )
            .into())
        }
    };

    let summary = match read_summary(driver).await {
        Ok(Some(summary)) => Some(summary),
        Ok(None) => {
            tracing::warn!(
                degraded = true,
                "lastFinalState absent; sending order sheet without summary"
            );
            None
        }
        Err(err) => {
            tracing::warn!(
                degraded = true,
                error = %format!("{err:#}"),
                "summary read failed; sending order sheet without summary"
            );
            None
        }
    };

    let normalized = normalize(&body, rules);
    tracing::info!(
        body_chars = normalized.chars().count(),
        has_summary = summary.is_some(),
        "order sheet extracted"
    );
    Ok(ExtractedMessage::new(rules.header.clone(), normalized, summary))
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "empty string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
