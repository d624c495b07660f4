//! Decision model for relayed permission requests.
//!
//! A human can answer a permission request with a button press, a short
//! yes/no style reply, or arbitrary free text. Normalization of reply text
//! into a [`Decision`] lives here so every channel backend shares it.

use serde::{Deserialize, Serialize};

/// Outcome of a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "behavior", content = "message")]
pub enum Decision {
    /// Permission granted.
    Allow,
    /// Permission denied.
    Deny,
    /// Free-text instructions from the operator, passed through verbatim.
    Custom(String),
}

impl Decision {
    /// Short status label used when finalizing the channel message.
    pub fn status_label(&self) -> &str {
        match self {
            Self::Allow => "granted",
            Self::Deny => "denied",
            Self::Custom(_) => "answered",
        }
    }
}

/// Normalize operator reply text or callback payload into a [`Decision`].
///
/// Matching is case-insensitive and whitespace-trimmed. Anything that is
/// not a recognized affirmative or negative passes through verbatim.
pub fn normalize_decision(text: &str) -> Decision {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "allow" | "yes" | "y" | "\u{2705}" => Decision::Allow,
        "deny" | "no" | "n" | "\u{274C}" => Decision::Deny,
        _ => Decision::Custom(trimmed.to_string()),
    }
}

/// Truncate `text` to at most `max_chars` characters, appending an
/// ellipsis when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('\u{2026}');
    out
}
