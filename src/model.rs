//! `provider/model` reference strings.

use std::fmt;

/// A parsed `provider/model` reference. The model half may itself contain
/// slashes (e.g. `openrouter/meta-llama/llama-3-70b`), so parsing splits on
/// the first separator only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    /// Parse `provider/model`. Returns None when the separator is missing or
    /// either side is empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
