/// Button captions the overlay renders inline with its text. Matched as whole lines.
pub const DEFAULT_ARTIFACTS: [&str; 4] = ["Close", "Copy Text", "×", "✕"];
pub const DEFAULT_NATIVE_TITLE: &str = "Order Sheet";
pub const DEFAULT_HEADER_TITLE: &str = "📈 Daily Order Sheet";

#[derive(Debug, Clone)]
pub struct NormalizeRules {
    pub native_title: String,
    pub header: String,
    pub artifacts: Vec<String>,
}

impl NormalizeRules {
    pub fn new(native_title: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            native_title: native_title.into(),
            header: header.into(),
            artifacts: DEFAULT_ARTIFACTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_title(&self, line: &str, first_content: bool) -> bool {
        if line == self.native_title || line == self.header {
            return true;
        }
        first_content && !self.native_title.is_empty() && line.contains(self.native_title.as_str())
    }

    fn is_artifact(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.artifacts.iter().any(|a| a.to_lowercase() == line)
    }
}

/// Replaces the overlay title with the branded header, drops UI-only captions and trims.
/// The output always starts with `rules.header`, and `normalize(normalize(x)) == normalize(x)`.
///
/// The title line is the first line that equals the native title or the header, or the first
/// content line when it merely contains the native title (icons and counters around it).
pub fn normalize(raw: &str, rules: &NormalizeRules) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut header_placed = false;
    let mut seen_content = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if rules.is_artifact(trimmed) {
            continue;
        }
        if !header_placed && rules.is_title(trimmed, !seen_content) {
            lines.push(rules.header.as_str());
            header_placed = true;
            seen_content = true;
            continue;
        }
        seen_content |= !trimmed.is_empty();
        lines.push(line.trim_end());
    }

    let body = trim_blank_edges(&lines).join("\n");
    let body = body.trim();

    let body = body
        .strip_prefix(rules.header.as_str())
        .map(|rest| rest.trim_start_matches('\n'))
        .unwrap_or(body);
    if body.is_empty() {
        rules.header.clone()
    } else {
        format!("{}\n{}", rules.header, body)
    }
}

fn trim_blank_edges<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].to_vec(),
        _ => Vec::new(),
    }
}
