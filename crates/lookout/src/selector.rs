//! Selector rules and fallback chains.
//!
//! A [`SelectorChain`] is an ordered, non-empty list of [`SelectorRule`]s.
//! The resolver evaluates the rules in order and the first rule that yields
//! a usable match wins, so a fallback ladder such as "exact text, then loose
//! text" is data rather than nested branching.

use serde::{Deserialize, Serialize};

use crate::result::{LookoutError, LookoutResult};

/// A single element resolution rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SelectorRule {
    /// Accessible role, optionally filtered by accessible name
    Role {
        /// ARIA role (explicit or implicit), e.g. `button`, `dialog`
        role: String,
        /// Accessible name filter
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Require the whole name to match (case-sensitive)
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        exact: bool,
    },
    /// Innermost elements whose whole text equals the given text
    ExactText {
        /// Text to match
        text: String,
    },
    /// Innermost elements whose text contains the given text, ignoring case
    LooseText {
        /// Text to match
        text: String,
    },
    /// Element with the given `id` attribute
    ElementId {
        /// Element id
        id: String,
    },
    /// CSS selector
    Css {
        /// CSS selector
        css: String,
    },
    /// CSS selector filtered by contained text, ignoring case
    CssText {
        /// CSS selector
        css: String,
        /// Text the element must contain
        text: String,
    },
}

impl SelectorRule {
    /// Role rule with a loose accessible-name filter
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: false,
        }
    }

    /// Role rule without a name filter
    #[must_use]
    pub fn role_only(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
            exact: false,
        }
    }

    /// Exact text rule
    #[must_use]
    pub fn exact_text(text: impl Into<String>) -> Self {
        Self::ExactText { text: text.into() }
    }

    /// Loose text rule
    #[must_use]
    pub fn loose_text(text: impl Into<String>) -> Self {
        Self::LooseText { text: text.into() }
    }

    /// Element id rule
    #[must_use]
    pub fn element_id(id: impl Into<String>) -> Self {
        Self::ElementId { id: id.into() }
    }

    /// CSS rule
    #[must_use]
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css { css: css.into() }
    }

    /// CSS rule filtered by text
    #[must_use]
    pub fn css_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self::CssText {
            css: css.into(),
            text: text.into(),
        }
    }

    /// Stable identifier of the strategy this rule uses
    #[must_use]
    pub const fn strategy_id(&self) -> &'static str {
        match self {
            Self::Role { .. } => "role",
            Self::ExactText { .. } => "exact-text",
            Self::LooseText { .. } => "loose-text",
            Self::ElementId { .. } => "element-id",
            Self::Css { .. } => "css",
            Self::CssText { .. } => "css-text",
        }
    }
}

impl std::fmt::Display for SelectorRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role { role, name, exact } => match name {
                Some(n) if *exact => write!(f, "role={role}[name={n:?} exact]"),
                Some(n) => write!(f, "role={role}[name={n:?}]"),
                None => write!(f, "role={role}"),
            },
            Self::ExactText { text } => write!(f, "exact-text={text:?}"),
            Self::LooseText { text } => write!(f, "loose-text={text:?}"),
            Self::ElementId { id } => write!(f, "#{id}"),
            Self::Css { css } => write!(f, "css={css}"),
            Self::CssText { css, text } => write!(f, "css={css}[has-text={text:?}]"),
        }
    }
}

/// Ordered, non-empty list of candidate rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<SelectorRule>", into = "Vec<SelectorRule>")]
pub struct SelectorChain {
    rules: Vec<SelectorRule>,
}

impl SelectorChain {
    /// Build a chain from rules
    ///
    /// # Errors
    ///
    /// Returns an error if `rules` is empty
    pub fn new(rules: Vec<SelectorRule>) -> LookoutResult<Self> {
        if rules.is_empty() {
            return Err(LookoutError::config(
                "selector chain must contain at least one rule",
            ));
        }
        Ok(Self { rules })
    }

    /// Chain with a single rule
    #[must_use]
    pub fn single(rule: SelectorRule) -> Self {
        Self { rules: vec![rule] }
    }

    /// Append a fallback rule
    #[must_use]
    pub fn or(mut self, rule: SelectorRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[SelectorRule] {
        &self.rules
    }

    /// Primary (first) rule
    #[must_use]
    pub fn primary(&self) -> &SelectorRule {
        &self.rules[0]
    }

    /// Human-readable description of the whole chain
    #[must_use]
    pub fn describe(&self) -> String {
        self.rules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl From<SelectorRule> for SelectorChain {
    fn from(rule: SelectorRule) -> Self {
        Self::single(rule)
    }
}

impl TryFrom<Vec<SelectorRule>> for SelectorChain {
    type Error = LookoutError;

    fn try_from(rules: Vec<SelectorRule>) -> Result<Self, Self::Error> {
        Self::new(rules)
    }
}

impl From<SelectorChain> for Vec<SelectorRule> {
    fn from(chain: SelectorChain) -> Self {
        chain.rules
    }
}

/// What to do when a rule matches more than one element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiMatchPolicy {
    /// Take the first match in document order
    #[default]
    First,
    /// Treat the rule as ambiguous and stop with a resolution failure
    Reject,
}

// =============================================================================
// TEXT MATCHING
// =============================================================================

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-string match after whitespace normalisation, case-sensitive
#[must_use]
pub fn text_matches_exact(haystack: &str, needle: &str) -> bool {
    normalize_whitespace(haystack) == normalize_whitespace(needle)
}

/// Substring match after whitespace normalisation, case-insensitive
#[must_use]
pub fn text_matches_loose(haystack: &str, needle: &str) -> bool {
    normalize_whitespace(haystack)
        .to_lowercase()
        .contains(&normalize_whitespace(needle).to_lowercase())
}
