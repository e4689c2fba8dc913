use std::fmt;

use smol_str::SmolStr;

/// Comma-separated token header values (`Allow`, `Supported`, `Require`,
/// `Unsupported`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenList(pub Vec<SmolStr>);

impl TokenList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a header value on commas, dropping empty entries.
    pub fn parse(value: &str) -> Self {
        Self(
            value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(SmolStr::new)
                .collect(),
        )
    }

    pub fn tokens(&self) -> &[SmolStr] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Option tags and method names are matched ignoring case.
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Adds `token` unless it is already listed. Returns true if it was added.
    pub fn insert(&mut self, token: &str) -> bool {
        if self.contains(token) {
            return false;
        }
        self.0.push(SmolStr::new(token));
        true
    }

    /// Merges all tokens from `other`, skipping duplicates.
    pub fn merge(&mut self, other: &TokenList) {
        for token in other.tokens() {
            self.insert(token);
        }
    }
}

impl fmt::Display for TokenList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

pub type AllowHeader = TokenList;
pub type SupportedHeader = TokenList;
pub type RequireHeader = TokenList;
