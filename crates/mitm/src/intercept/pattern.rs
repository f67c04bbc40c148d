//! Table of recognised units and their replacements

use bytes::Bytes;

use super::InterceptPolicy;
use crate::unit::Tag;

/// Replace `pattern` with `replacement` at interception point `tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    /// Interception point the rule applies to
    pub tag: Tag,
    /// Unit bytes that trigger the rule, compared in full
    pub pattern: Bytes,
    /// Bytes forwarded instead
    pub replacement: Bytes,
}

impl PatternRule {
    /// Create a rule
    pub fn new(tag: Tag, pattern: impl Into<Bytes>, replacement: impl Into<Bytes>) -> Self {
        Self {
            tag,
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Create a rule from hex strings, as found in configuration files
    pub fn from_hex(tag: Tag, pattern: &str, replacement: &str) -> Result<Self, crate::Error> {
        let decode = |s: &str| {
            hex::decode(s.replace([' ', ':'], "")).map_err(|e| {
                crate::Error::Config(format!("invalid hex `{s}` in {tag} rule: {e}"))
            })
        };
        Ok(Self::new(tag, decode(pattern)?, decode(replacement)?))
    }

    fn matches(&self, tag: Tag, bytes: &[u8]) -> bool {
        self.tag == tag && self.pattern.as_ref() == bytes
    }
}

/// Ordered rule table; the first matching rule wins
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    rules: Vec<PatternRule>,
}

impl PatternTable {
    /// Create an empty table, which passes everything through
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule
    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a rule
    pub fn push(&mut self, rule: PatternRule) {
        self.rules.push(rule);
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Whether the table has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<PatternRule> for PatternTable {
    fn from_iter<I: IntoIterator<Item = PatternRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl InterceptPolicy for PatternTable {
    fn apply(&self, tag: Tag, bytes: &[u8]) -> Option<Bytes> {
        self.rules
            .iter()
            .find(|rule| rule.matches(tag, bytes))
            .map(|rule| rule.replacement.clone())
    }
}
