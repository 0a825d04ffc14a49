//! Page-side probes. Each expression evaluates to plain JSON (`returnByValue`).
//!
//! `lastFinalState` may be a top-level `let` binding rather than a `window` property, so it is
//! probed with `typeof` instead of `window.lastFinalState`.

pub const TOGGLE_SELECTOR: &str = "#toggleMode";
pub const ORDER_SHEET_BUTTON_SELECTOR: &str = "#btnOrderSheet";

/// `{ ready: document.readyState, resources: <resource timing entry count> }`
pub const NETWORK_SNAPSHOT: &str = r#"(() => ({
  ready: document.readyState,
  resources: (performance.getEntriesByType('resource') || []).length
}))()"#;

pub const STATE_READY_ELEMENT: &str = r#"(() =>
  typeof lastFinalState !== 'undefined' && !!lastFinalState &&
  !!document.getElementById('totalAsset')
)()"#;

pub const STATE_READY_DOLLAR_TEXT: &str = r#"(() => {
  if (typeof lastFinalState === 'undefined' || !lastFinalState) return false;
  const el = document.getElementById('totalAsset');
  return !!el && (el.innerText || el.textContent || '').includes('$');
})()"#;

/// `null` when the toggle is absent, otherwise its checked state.
pub const TOGGLE_STATE: &str = r#"(() => {
  const el = document.getElementById('toggleMode');
  return el ? !!el.checked : null;
})()"#;

pub const MODAL_VISIBLE: &str = r#"(() => {
  const el = document.getElementById('orderSheetModal');
  if (!el) return false;
  const style = getComputedStyle(el);
  return style.display !== 'none' && style.visibility !== 'hidden' && el.getClientRects().length > 0;
})()"#;

/// Overlay innerText, or `null` when the overlay is gone.
pub const MODAL_TEXT: &str = r#"(() => {
  const el = document.getElementById('orderSheetModal');
  return el ? el.innerText : null;
})()"#;

/// Raw supplementary fields, or `null` when the result object is absent.
pub const SIMULATION_SUMMARY: &str = r#"(() => {
  if (typeof lastFinalState === 'undefined' || !lastFinalState) return null;
  const s = lastFinalState;
  const preview = document.getElementById('previewTotalAsset');
  return {
    holdings: Array.isArray(s.holdings) ? s.holdings : [],
    currentSeed: s.currentSeed,
    pendingRebalance: s.pendingRebalance ?? null,
    previewTotalAsset: preview ? preview.innerText : null
  };
})()"#;

/// Writes the identity into the page's localStorage. Arguments are JSON-encoded so any id is a
/// valid JS string literal.
pub fn set_identity(storage_key: &str, identity: &str) -> String {
    let key = serde_json::Value::String(storage_key.to_string());
    let id = serde_json::Value::String(identity.to_string());
    format!("(() => {{ localStorage.setItem({key}, {id}); return localStorage.getItem({key}) === {id}; }})()")
}
