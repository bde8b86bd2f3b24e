//! Query cost estimation and admission control.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]
//!
//! Bounds the work a retrieval request can demand *before* it reaches the
//! backend. Admission is a two-step decision with a fixed order: the cost
//! ceiling is checked first, then the free-text search term is scanned for
//! graph-query-language keywords (defense in depth against injection into
//! a downstream graph backend).

use crate::models::MemoryQuery;
use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Result limit assumed when a query omits its own, so omission cannot be
/// used to bypass limit-based denial.
pub const DEFAULT_RESULT_LIMIT: usize = 100;

/// Flat cost charged to every query.
pub const BASE_COST: f64 = 10.0;

/// Cost per active filter predicate.
pub const FILTER_COST: f64 = 5.0;

/// Cost per requested result row.
pub const RESULT_COST_PER_ITEM: f64 = 0.1;

/// Flat surcharge for a content search.
pub const CONTENT_SEARCH_COST: f64 = 20.0;

/// Per-character surcharge for a content search term.
pub const CONTENT_SEARCH_COST_PER_CHAR: f64 = 0.05;

/// Flat surcharge for a tag search.
pub const TAG_SEARCH_COST: f64 = 10.0;

static GRAPH_KEYWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:match|merge|create|delete|detach|set|remove|drop|call|union|unwind|foreach|load\s+csv)\b",
    )
    .expect("static regex: graph query keyword denylist")
});

/// Computed admission price of a retrieval request. Ephemeral; never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostDescriptor {
    /// Flat per-query cost.
    pub base: f64,
    /// Cost of active filter predicates.
    pub filter: f64,
    /// Cost of the requested (or defaulted) result count.
    pub result: f64,
    /// Content-search and tag-search surcharges.
    pub complexity: f64,
}

impl CostDescriptor {
    /// Total cost: the sum of all components.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.base + self.filter + self.result + self.complexity
    }
}

/// Outcome of admission validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The query is admissible at the given cost.
    Granted(CostDescriptor),
    /// The cost ceiling was exceeded. Checked before the injection scan.
    CostExceeded {
        /// The computed cost.
        cost: CostDescriptor,
        /// The ceiling that was exceeded.
        max_cost: f64,
    },
    /// A graph-query keyword was found in the search term.
    InjectionDetected(CostDescriptor),
}

impl Admission {
    /// Returns the denial reason, if any. Reasons name the rule, never the
    /// search term itself.
    #[must_use]
    pub fn denial_reason(&self) -> Option<String> {
        match self {
            Self::Granted(_) => None,
            Self::CostExceeded { cost, max_cost } => Some(format!(
                "query cost {:.1} exceeds admission ceiling {max_cost:.1}",
                cost.total()
            )),
            Self::InjectionDetected(_) => Some(
                "search term matches the graph-query keyword denylist".to_string(),
            ),
        }
    }

    /// Converts the outcome into a `Result`, mapping denials to
    /// [`Error::SecurityViolation`].
    pub fn into_result(self) -> Result<CostDescriptor> {
        match self {
            Self::Granted(cost) => Ok(cost),
            denied => Err(Error::violation(
                denied.denial_reason().unwrap_or_default(),
            )),
        }
    }

    /// Returns true if the query was admitted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Computes the admission cost of a query.
///
/// The total is non-decreasing in the result limit, the number of active
/// filters, and the presence of content or tag search.
#[must_use]
pub fn estimate(query: &MemoryQuery) -> CostDescriptor {
    #[allow(clippy::cast_precision_loss)]
    let filter = FILTER_COST * query.active_filter_count() as f64;

    #[allow(clippy::cast_precision_loss)]
    let result = RESULT_COST_PER_ITEM * query.limit.unwrap_or(DEFAULT_RESULT_LIMIT) as f64;

    let mut complexity = 0.0;
    if let Some(term) = query.content_search.as_deref() {
        #[allow(clippy::cast_precision_loss)]
        let term_len = term.chars().count() as f64;
        complexity += CONTENT_SEARCH_COST + CONTENT_SEARCH_COST_PER_CHAR * term_len;
    }
    if !query.tags.is_empty() {
        complexity += TAG_SEARCH_COST;
    }

    CostDescriptor {
        base: BASE_COST,
        filter,
        result,
        complexity,
    }
}

/// Returns true if a free-text search term contains a denylisted
/// graph-query-language keyword.
#[must_use]
pub fn contains_injection(term: &str) -> bool {
    GRAPH_KEYWORD_REGEX.is_match(term)
}

/// Validates a query for admission against a cost ceiling.
///
/// The cost ceiling is evaluated first; the injection scan runs only on
/// queries that passed it. This order is fixed for determinism.
#[must_use]
pub fn validate(query: &MemoryQuery, max_cost: f64) -> Admission {
    let cost = estimate(query);
    if cost.total() > max_cost {
        return Admission::CostExceeded { cost, max_cost };
    }
    if query
        .content_search
        .as_deref()
        .is_some_and(contains_injection)
    {
        return Admission::InjectionDetected(cost);
    }
    Admission::Granted(cost)
}
