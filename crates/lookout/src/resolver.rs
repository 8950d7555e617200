//! Element resolution over a selector chain.
//!
//! Rules are evaluated in declared order against the live page:
//!
//! - exactly one match: resolved, later rules are not evaluated
//! - zero matches: advance to the next rule
//! - several matches: decided by [`MultiMatchPolicy`]
//!
//! Exhausting the chain yields [`Resolution::Unresolved`] carrying every
//! attempt, which is what failure reports show as the last observed state.

use serde::{Deserialize, Serialize};

use crate::selector::{MultiMatchPolicy, SelectorChain, SelectorRule};
use crate::session::{ElementRef, Page, PageResult};

/// A live element plus how it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Element reference (valid only while the session lives)
    pub element: ElementRef,
    /// Rule that produced the match
    pub rule: SelectorRule,
    /// Strategy identifier of that rule (`role`, `loose-text`, ...)
    pub strategy: String,
    /// Number of elements the rule matched (always >= 1)
    pub match_count: usize,
    /// Scope the rule was evaluated in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ElementRef>,
}

/// One evaluated rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAttempt {
    /// Rule evaluated
    pub rule: SelectorRule,
    /// Matches observed
    pub matches: usize,
}

/// Why a chain did not resolve
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Unresolved {
    /// Attempts in evaluation order
    pub tried: Vec<RuleAttempt>,
    /// A rule matched several elements and the policy rejected it
    pub ambiguous: bool,
}

impl Unresolved {
    /// `rule (n matches), ...` for diagnostics
    #[must_use]
    pub fn describe(&self) -> String {
        let tried = self
            .tried
            .iter()
            .map(|a| format!("{} ({} matches)", a.rule, a.matches))
            .collect::<Vec<_>>()
            .join(", ");
        if self.ambiguous {
            format!("ambiguous: {tried}")
        } else {
            format!("tried: {tried}")
        }
    }
}

/// Outcome of a single resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A rule produced a usable match
    Resolved(ResolvedTarget),
    /// No rule produced a usable match
    Unresolved(Unresolved),
}

impl Resolution {
    /// The resolved target, if any
    #[must_use]
    pub const fn target(&self) -> Option<&ResolvedTarget> {
        match self {
            Self::Resolved(t) => Some(t),
            Self::Unresolved(_) => None,
        }
    }
}

/// Resolve `chain` once against the current page state.
///
/// # Errors
///
/// Returns the page error if a query fails (including a stale `scope`).
pub async fn resolve(
    page: &dyn Page,
    chain: &SelectorChain,
    scope: Option<&ElementRef>,
    policy: MultiMatchPolicy,
) -> PageResult<Resolution> {
    let mut tried = Vec::with_capacity(chain.rules().len());
    for rule in chain.rules() {
        let matches = page.query(rule, scope).await?;
        tracing::debug!(rule = %rule, matches = matches.len(), "selector evaluated");
        tried.push(RuleAttempt {
            rule: rule.clone(),
            matches: matches.len(),
        });
        let count = matches.len();
        let Some(first) = matches.into_iter().next() else {
            continue;
        };
        if count > 1 && policy == MultiMatchPolicy::Reject {
            return Ok(Resolution::Unresolved(Unresolved {
                tried,
                ambiguous: true,
            }));
        }
        return Ok(Resolution::Resolved(ResolvedTarget {
            element: first,
            rule: rule.clone(),
            strategy: rule.strategy_id().to_string(),
            match_count: count,
            scope: scope.cloned(),
        }));
    }
    Ok(Resolution::Unresolved(Unresolved {
        tried,
        ambiguous: false,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::{NetworkActivity, PageError};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::path::PathBuf;

    /// Page answering each rule with a fixed number of matches
    struct CountingPage {
        counts: Vec<(SelectorRule, usize)>,
    }

    #[async_trait]
    impl Page for CountingPage {
        async fn goto(&mut self, _url: &str) -> PageResult<()> {
            Ok(())
        }

        async fn query(
            &self,
            rule: &SelectorRule,
            _scope: Option<&ElementRef>,
        ) -> PageResult<Vec<ElementRef>> {
            let n = self
                .counts
                .iter()
                .find(|(r, _)| r == rule)
                .map_or(0, |(_, n)| *n);
            Ok((0..n)
                .map(|i| ElementRef::new(format!("{}-{i}", rule.strategy_id())))
                .collect())
        }

        async fn click(&self, _element: &ElementRef) -> PageResult<()> {
            Err(PageError::Protocol("unsupported".into()))
        }

        async fn set_files(&self, _element: &ElementRef, _paths: &[PathBuf]) -> PageResult<()> {
            Err(PageError::Protocol("unsupported".into()))
        }

        async fn is_visible(&self, _element: &ElementRef) -> PageResult<bool> {
            Ok(true)
        }

        async fn text_content(&self, _element: &ElementRef) -> PageResult<String> {
            Ok(String::new())
        }

        async fn role(&self, _element: &ElementRef) -> PageResult<Option<String>> {
            Ok(None)
        }

        async fn network_activity(&self) -> PageResult<NetworkActivity> {
            Ok(NetworkActivity::default())
        }

        async fn screenshot(&self, _full_page: bool) -> PageResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn current_url(&self) -> String {
            String::new()
        }
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    mod fallback_tests {
        use super::*;

        #[test]
        fn test_exact_miss_falls_back_to_loose() {
            let exact = SelectorRule::exact_text("Momo");
            let loose = SelectorRule::loose_text("Momo");
            let page = CountingPage {
                counts: vec![(exact.clone(), 0), (loose.clone(), 1)],
            };
            let chain = SelectorChain::single(exact).or(loose);
            let resolution =
                block_on(resolve(&page, &chain, None, MultiMatchPolicy::First)).unwrap();
            let target = resolution.target().unwrap();
            assert_eq!(target.strategy, "loose-text");
            assert_eq!(target.match_count, 1);
        }

        #[test]
        fn test_single_match_short_circuits() {
            let role = SelectorRule::role("button", "Go");
            let text = SelectorRule::exact_text("Go");
            let page = CountingPage {
                counts: vec![(role.clone(), 1), (text.clone(), 1)],
            };
            let chain = SelectorChain::single(role).or(text);
            let resolution =
                block_on(resolve(&page, &chain, None, MultiMatchPolicy::First)).unwrap();
            assert_eq!(resolution.target().unwrap().strategy, "role");
        }

        #[test]
        fn test_exhausted_chain_lists_attempts() {
            let chain = SelectorChain::single(SelectorRule::role("button", "Nonexistent Button"))
                .or(SelectorRule::loose_text("Nonexistent"));
            let page = CountingPage { counts: vec![] };
            let resolution =
                block_on(resolve(&page, &chain, None, MultiMatchPolicy::First)).unwrap();
            let Resolution::Unresolved(miss) = resolution else {
                panic!("expected unresolved");
            };
            assert_eq!(miss.tried.len(), 2);
            assert!(!miss.ambiguous);
            assert!(miss.describe().contains("Nonexistent Button"));
        }
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_first_policy_takes_first_of_many() {
            let rule = SelectorRule::loose_text("Momo");
            let page = CountingPage {
                counts: vec![(rule.clone(), 3)],
            };
            let resolution = block_on(resolve(
                &page,
                &SelectorChain::single(rule),
                None,
                MultiMatchPolicy::First,
            ))
            .unwrap();
            let target = resolution.target().unwrap();
            assert_eq!(target.element.id(), "loose-text-0");
            assert_eq!(target.match_count, 3);
        }

        #[test]
        fn test_reject_policy_reports_ambiguity() {
            let rule = SelectorRule::loose_text("Momo");
            let page = CountingPage {
                counts: vec![(rule.clone(), 2)],
            };
            let resolution = block_on(resolve(
                &page,
                &SelectorChain::single(rule),
                None,
                MultiMatchPolicy::Reject,
            ))
            .unwrap();
            assert!(matches!(
                resolution,
                Resolution::Unresolved(Unresolved { ambiguous: true, .. })
            ));
        }
    }

    mod property_tests {
        use super::*;

        proptest! {
            #[test]
            fn prop_never_resolves_on_zero_match_rule(
                counts in proptest::collection::vec(0usize..3, 1..6),
                reject in any::<bool>(),
            ) {
                let rules: Vec<SelectorRule> = (0..counts.len())
                    .map(|i| SelectorRule::element_id(format!("el-{i}")))
                    .collect();
                let page = CountingPage {
                    counts: rules.iter().cloned().zip(counts.iter().copied()).collect(),
                };
                let chain = SelectorChain::new(rules.clone()).unwrap();
                let policy = if reject { MultiMatchPolicy::Reject } else { MultiMatchPolicy::First };
                let resolution = block_on(resolve(&page, &chain, None, policy)).unwrap();

                let first_hit = counts.iter().position(|&n| n > 0);
                match resolution {
                    Resolution::Resolved(target) => {
                        let idx = first_hit.unwrap();
                        prop_assert!(target.match_count >= 1);
                        prop_assert_eq!(&target.rule, &rules[idx]);
                        if reject {
                            prop_assert_eq!(target.match_count, 1);
                        }
                    }
                    Resolution::Unresolved(miss) => {
                        match first_hit {
                            None => {
                                prop_assert!(!miss.ambiguous);
                                prop_assert_eq!(miss.tried.len(), rules.len());
                            }
                            Some(idx) => {
                                prop_assert!(reject && counts[idx] > 1);
                                prop_assert!(miss.ambiguous);
                            }
                        }
                    }
                }
            }
        }
    }
}
