use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    Resolution,
    NavigationTimeout,
    StateTimeout,
    ModalTimeout,
    Extraction,
    Delivery,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Config => "config",
            FailureKind::Resolution => "resolution",
            FailureKind::NavigationTimeout => "navigation_timeout",
            FailureKind::StateTimeout => "state_timeout",
            FailureKind::ModalTimeout => "modal_timeout",
            FailureKind::Extraction => "extraction",
            FailureKind::Delivery => "delivery",
        }
    }
}

/// Classified run failure. Travels inside `anyhow::Error`; recover it with `classify`.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub stage: &'static str,
    pub detail: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run failed (kind={}, stage={}): {}",
            self.kind.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for RunFailure {}

/// Kind of the first `RunFailure` in the error chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<FailureKind> {
    err.chain()
        .find_map(|e| e.downcast_ref::<RunFailure>())
        .map(|f| f.kind)
}
