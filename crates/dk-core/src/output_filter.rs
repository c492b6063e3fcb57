use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dk_types::DockyardError;
use serde_json::Value;

/// Replacement for every registered secret.
pub const HIDDEN: &str = "[hidden]";
/// Marker inserted where over-long text was cut.
pub const TRIMMED: &str = "[trimmed]";

pub const DEFAULT_MAX_CHARS: usize = 4000;

/// Noise the Docker daemon prints on hosts without swap accounting.
const KERNEL_WARNINGS: &[&str] = &[
    "WARNING: Your kernel does not support swap limit capabilities or the cgroup is not mounted. Memory limited without swap.",
    "WARNING: Your kernel does not support swap limit capabilities. Limitation discarded.",
];

/// Redacts secrets, strips garbage and truncates text before it is logged or surfaced.
///
/// One filter belongs to one job execution. Values are kept longest first so a secret
/// that contains another registered secret is hidden whole.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    values: Vec<String>,
    max_chars: usize,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl OutputFilter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            values: Vec::new(),
            max_chars: max_chars.max(2),
        }
    }

    /// Register a secret together with its base64 and JSON-escaped forms.
    ///
    /// Output is filtered line by line, so every line of a multi-line secret (a PEM
    /// key, for instance) is registered on its own as well.
    pub fn add_value(&mut self, secret: &str) {
        if secret.trim().is_empty() {
            return;
        }
        self.insert(secret.to_string());
        self.insert(BASE64.encode(secret));
        if let Ok(quoted) = serde_json::to_string(secret) {
            let escaped = &quoted[1..quoted.len() - 1];
            if escaped != secret {
                self.insert(escaped.to_string());
            }
        }
        if secret.contains('\n') {
            for line in secret.lines().map(str::trim).filter(|l| !l.is_empty()) {
                self.insert(line.to_string());
                self.insert(BASE64.encode(line));
            }
        }
    }

    /// Register every scalar stored under a `#`-prefixed key anywhere in `tree`.
    pub fn collect_values(&mut self, tree: &Value) {
        match tree {
            Value::Object(map) => {
                for (key, value) in map {
                    if key.starts_with('#') {
                        self.collect_secret(value);
                    } else {
                        self.collect_values(value);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.collect_values(v)),
            _ => {}
        }
    }

    fn collect_secret(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.add_value(s),
            Value::Number(n) => self.add_value(&n.to_string()),
            Value::Array(items) => items.iter().for_each(|v| self.collect_secret(v)),
            Value::Object(map) => map.values().for_each(|v| self.collect_secret(v)),
            Value::Bool(_) | Value::Null => {}
        }
    }

    fn insert(&mut self, value: String) {
        if self.values.contains(&value) {
            return;
        }
        let pos = self
            .values
            .iter()
            .position(|v| v.len() < value.len())
            .unwrap_or(self.values.len());
        self.values.insert(pos, value);
    }

    pub fn secret_count(&self) -> usize {
        self.values.len()
    }

    /// Sanitize, redact, then truncate. Redaction runs first so the trim point never
    /// splits a secret into two unrecognisable halves.
    pub fn filter(&self, text: &str) -> String {
        self.truncate(&self.redact(&sanitize(text)))
    }

    /// Same as [`filter`](Self::filter) for raw process bytes; invalid UTF-8 is replaced.
    pub fn filter_bytes(&self, bytes: &[u8]) -> String {
        self.filter(&String::from_utf8_lossy(bytes))
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for value in &self.values {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), HIDDEN);
            }
        }
        out
    }

    /// Keep `max_chars / 2` characters from each end around a single marker.
    pub fn truncate(&self, text: &str) -> String {
        let total = text.chars().count();
        if total <= self.max_chars {
            return text.to_string();
        }
        let half = self.max_chars / 2;
        let head: String = text.chars().take(half).collect();
        let tail: String = text.chars().skip(total - half).collect();
        format!("{head}{TRIMMED}{tail}")
    }

    /// Pass every message carried by `err` through the filter.
    pub fn redact_error(&self, err: DockyardError) -> DockyardError {
        err.map_message(|m| self.filter(m))
    }
}

/// Drop control characters (except newline, carriage return, tab) and known kernel noise.
pub fn sanitize(text: &str) -> String {
    let mut out: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    for warning in KERNEL_WARNINGS {
        if out.contains(warning) {
            out = out.replace(warning, "");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_registered_values() {
        let mut filter = OutputFilter::default();
        filter.add_value("s3cr3t");
        assert_eq!(filter.filter("token=s3cr3t;"), "token=[hidden];");
    }

    #[test]
    fn redacts_encoded_forms() {
        let mut filter = OutputFilter::default();
        filter.add_value("pa\"ss");

        let b64 = BASE64.encode("pa\"ss");
        assert_eq!(filter.filter(&format!("auth {b64}")), "auth [hidden]");
        assert_eq!(filter.filter(r#"{"p":"pa\"ss"}"#), r#"{"p":"[hidden]"}"#);
    }

    #[test]
    fn longer_secret_hidden_whole() {
        let mut filter = OutputFilter::default();
        filter.add_value("abc");
        filter.add_value("abcdef");
        assert_eq!(filter.filter("x abcdef y abc"), "x [hidden] y [hidden]");
    }

    #[test]
    fn multi_line_secret_hidden_line_by_line() {
        let mut filter = OutputFilter::default();
        filter.collect_values(&json!({
            "#private_key": "-----BEGIN KEY-----\nMIIEsecretline1\n  MIIEsecretline2\n\n-----END KEY-----"
        }));

        assert_eq!(filter.filter("MIIEsecretline1"), "[hidden]");
        assert_eq!(filter.filter("key:   MIIEsecretline2  "), "key:   [hidden]  ");
        let encoded = BASE64.encode("MIIEsecretline2");
        assert_eq!(filter.filter(&encoded), "[hidden]");
        assert!(!filter.filter("-----BEGIN KEY-----").contains("BEGIN"));
    }

    #[test]
    fn ignores_blank_values() {
        let mut filter = OutputFilter::default();
        filter.add_value("");
        filter.add_value("   ");
        assert_eq!(filter.secret_count(), 0);
        assert_eq!(filter.filter("a b"), "a b");
    }

    #[test]
    fn collect_values_walks_hash_keys() {
        let mut filter = OutputFilter::default();
        filter.collect_values(&json!({
            "parameters": {
                "#password": "hunter2",
                "user": "bob",
                "nested": [{"#apiKey": "key-123"}, {"#pin": 4242}],
            }
        }));

        let out = filter.filter("bob hunter2 key-123 4242");
        assert_eq!(out, "bob [hidden] [hidden] [hidden]");
    }

    #[test]
    fn sanitize_strips_control_chars() {
        let filter = OutputFilter::default();
        assert_eq!(filter.filter("a\u{0}b\u{7}c\n\td"), "abc\n\td");
    }

    #[test]
    fn sanitize_strips_swap_warning() {
        let filter = OutputFilter::default();
        let text = format!("{}\nreal output", KERNEL_WARNINGS[0]);
        assert_eq!(filter.filter(&text), "\nreal output");
    }

    #[test]
    fn filter_bytes_replaces_invalid_utf8() {
        let filter = OutputFilter::default();
        let out = filter.filter_bytes(b"ok \xff end");
        assert!(out.starts_with("ok "));
        assert!(out.ends_with(" end"));
        assert!(out.contains('\u{FFFD}'));
    }

    #[test]
    fn truncate_keeps_head_and_tail() {
        let filter = OutputFilter::new(4000);
        let input: String = (0..5000).map(|i| if i < 2500 { 'a' } else { 'b' }).collect();

        let out = filter.filter(&input);

        assert_eq!(out.matches(TRIMMED).count(), 1);
        assert_eq!(out.chars().count(), 4000 + TRIMMED.len());
        assert!(out.starts_with(&"a".repeat(2000)));
        assert!(out.ends_with(&"b".repeat(2000)));
    }

    #[test]
    fn truncate_short_text_untouched() {
        let filter = OutputFilter::new(10);
        assert_eq!(filter.filter("0123456789"), "0123456789");
    }

    #[test]
    fn redaction_happens_before_truncation() {
        let mut filter = OutputFilter::new(20);
        let secret = "0123456789ABCDEFGHIJ";
        filter.add_value(secret);

        let out = filter.filter(&format!("xxxxxx{secret}yyyyyy"));
        assert!(!out.contains("0123"));
        assert!(!out.contains("GHIJ"));
        assert!(out.contains(HIDDEN));
    }

    #[test]
    fn redact_error_maps_message() {
        let mut filter = OutputFilter::default();
        filter.add_value("hunter2");
        let err = filter.redact_error(DockyardError::User("bad password hunter2".to_string()));
        assert_eq!(err.to_string(), "bad password [hidden]");
    }
}
