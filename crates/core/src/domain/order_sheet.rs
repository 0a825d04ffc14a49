use serde::{Deserialize, Serialize};
use std::fmt;

const SUMMARY_RULE: &str = "━━━━━━━━━━━━━━";

/// Values computed from the page's `lastFinalState`, appended below the order table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub holdings_quantity: f64,
    pub effective_seed: i64,
    pub total_asset_text: String,
}

/// The message delivered for one run. Built once by the extractor, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMessage {
    header: String,
    body: String,
    summary: Option<SimulationSummary>,
}

impl ExtractedMessage {
    /// `body` is the normalized overlay text, which already starts with `header`.
    pub fn new(header: String, body: String, summary: Option<SimulationSummary>) -> Self {
        Self {
            header,
            body,
            summary,
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn summary(&self) -> Option<&SimulationSummary> {
        self.summary.as_ref()
    }

    /// Telegram HTML rendering. Page text is escaped; only the header and summary values are
    /// emphasized.
    pub fn render_html(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 128);
        for (idx, line) in self.body.lines().enumerate() {
            if idx != 0 {
                out.push('\n');
            }
            if idx == 0 && line == self.header {
                out.push_str("<b>");
                out.push_str(&escape_html(line));
                out.push_str("</b>");
            } else {
                out.push_str(&escape_html(line));
            }
        }

        if let Some(summary) = &self.summary {
            out.push_str("\n\n");
            out.push_str(SUMMARY_RULE);
            out.push_str(&format!(
                "\n📦 Holdings qty: <b>{}</b>",
                format_quantity(summary.holdings_quantity)
            ));
            out.push_str(&format!(
                "\n💰 Seed: <b>{}</b>",
                group_thousands(summary.effective_seed)
            ));
            out.push_str(&format!(
                "\n🏦 Total asset: <b>{}</b>",
                escape_html(summary.total_asset_text.trim())
            ));
        }

        out
    }
}

impl fmt::Display for ExtractedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)?;
        if let Some(summary) = &self.summary {
            write!(
                f,
                "\n\n{SUMMARY_RULE}\n📦 Holdings qty: {}\n💰 Seed: {}\n🏦 Total asset: {}",
                format_quantity(summary.holdings_quantity),
                group_thousands(summary.effective_seed),
                summary.total_asset_text.trim()
            )?;
        }
        Ok(())
    }
}

/// `1234567` -> `1,234,567`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (idx, ch) in digits.chars().enumerate() {
        if idx != 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_quantity(q: f64) -> String {
    if q.fract() == 0.0 && q.abs() < i64::MAX as f64 {
        group_thousands(q as i64)
    } else {
        format!("{q:.4}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
