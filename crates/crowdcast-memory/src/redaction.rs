//! PII redaction.
//!
//! A fixed set of patterns (email, phone, street address) plus any custom
//! patterns from the policy. Matches are replaced with `[REDACTED]` and the
//! pattern name recorded as a note. A value that redacts down to nothing but
//! `[REDACTED]` tokens must not be stored.

use regex::{Regex, RegexBuilder};

use crate::policy::MemoryPolicy;

pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_PATTERNS: [(&str, &str); 3] = [
    ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ("phone", r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b"),
    (
        "address",
        r"\b\d{1,5}\s+[A-Za-z]{2,}\s+(Street|St|Road|Rd|Avenue|Ave|Boulevard|Blvd)\b",
    ),
];

pub struct Redactor {
    enabled: bool,
    patterns: Vec<(String, Regex)>,
    /// Names of custom patterns that failed to compile; surfaced as notes.
    invalid: Vec<String>,
}

impl Redactor {
    pub fn new(policy: &MemoryPolicy) -> Self {
        let enabled = policy.redaction.enabled;
        let mut patterns = Vec::new();
        let mut invalid = Vec::new();
        if enabled {
            for (name, pattern) in DEFAULT_PATTERNS {
                // fixed patterns are known-good
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("builtin redaction pattern");
                patterns.push((name.to_string(), re));
            }
            for custom in &policy.redaction.patterns {
                match RegexBuilder::new(&custom.regex).case_insensitive(true).build() {
                    Ok(re) => patterns.push((custom.name.clone(), re)),
                    Err(_) => invalid.push(format!("invalid_pattern:{}", custom.name)),
                }
            }
        }
        Self {
            enabled,
            patterns,
            invalid,
        }
    }

    /// Redact `text`, returning the scrubbed value and the ordered notes of
    /// patterns that fired (plus any invalid-pattern notes).
    pub fn apply(&self, text: &str) -> (String, Vec<String>) {
        if text.is_empty() || !self.enabled {
            return (text.to_string(), Vec::new());
        }
        let mut redacted = text.to_string();
        let mut notes = Vec::new();
        for (name, re) in &self.patterns {
            if re.is_match(&redacted) {
                redacted = re.replace_all(&redacted, REDACTED).into_owned();
                notes.push(name.clone());
            }
        }
        notes.extend(self.invalid.iter().cloned());
        (redacted, notes)
    }
}

/// True when nothing meaningful survives redaction.
pub fn is_effectively_empty(value: &str) -> bool {
    value.replace(REDACTED, "").trim().is_empty()
}
