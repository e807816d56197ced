//! Filtering over the live variable set.
//!
//! A [`StateQuery`] is a conjunction of optional predicates (prefix,
//! category, region, tags). The [`QueryEngine`] applies one to a borrowed
//! variable map; the store wraps it behind its read lock. Deleted variables
//! never match and history is never consulted.

use std::collections::{BTreeMap, BTreeSet};

use chronicle_types::{StateCategory, StateVariable, WorldRegion};

/// A combinable filter over state variables.
///
/// Each populated field adds a predicate; an empty query matches every live
/// variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateQuery {
    /// Keys must start with this prefix.
    pub prefix: Option<String>,
    /// Variables must be in this category.
    pub category: Option<StateCategory>,
    /// Variables must be in this region.
    pub region: Option<WorldRegion>,
    /// Tags to test; ignored when empty.
    pub tags: BTreeSet<String>,
    /// `true`: at least one tag must be present. `false`: all of them.
    pub match_any: bool,
}

impl StateQuery {
    /// A query matching every live variable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to keys starting with `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Restrict to one category.
    #[must_use]
    pub const fn with_category(mut self, category: StateCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Restrict to one region.
    #[must_use]
    pub const fn with_region(mut self, region: WorldRegion) -> Self {
        self.region = Some(region);
        self
    }

    /// Restrict by tags, requiring all of them or (with `match_any`) any.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I, match_any: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.match_any = match_any;
        self
    }

    /// Whether `var` satisfies every populated predicate.
    pub fn matches(&self, var: &StateVariable) -> bool {
        if !var.active {
            return false;
        }
        if let Some(prefix) = &self.prefix {
            if !var.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.category.is_some_and(|c| c != var.category) {
            return false;
        }
        if self.region.is_some_and(|r| r != var.region) {
            return false;
        }
        if self.tags.is_empty() {
            return true;
        }
        if self.match_any {
            var.has_any_tag(self.tags.iter())
        } else {
            var.has_all_tags(self.tags.iter())
        }
    }
}

/// Runs queries against a borrowed variable map.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    variables: &'a BTreeMap<String, StateVariable>,
}

impl<'a> QueryEngine<'a> {
    /// Create an engine over `variables`.
    pub const fn new(variables: &'a BTreeMap<String, StateVariable>) -> Self {
        Self { variables }
    }

    /// Every live variable matching `query`, keyed by state key.
    pub fn run(&self, query: &StateQuery) -> BTreeMap<String, StateVariable> {
        // A prefix lets us walk only the matching key range.
        let candidates: Box<dyn Iterator<Item = (&String, &StateVariable)> + '_> =
            match &query.prefix {
                Some(prefix) => Box::new(
                    self.variables
                        .range::<String, _>(prefix.clone()..)
                        .take_while(move |(k, _)| k.starts_with(prefix.as_str())),
                ),
                None => Box::new(self.variables.iter()),
            };

        candidates
            .filter(|(_, var)| query.matches(var))
            .map(|(k, var)| (k.clone(), var.clone()))
            .collect()
    }

    /// Live variables in `category`.
    pub fn by_category(&self, category: StateCategory) -> BTreeMap<String, StateVariable> {
        self.run(&StateQuery::new().with_category(category))
    }

    /// Live variables in `region`.
    pub fn by_region(&self, region: WorldRegion) -> BTreeMap<String, StateVariable> {
        self.run(&StateQuery::new().with_region(region))
    }

    /// Live variables carrying all (or, with `match_any`, any) of `tags`.
    pub fn by_tags<I, S>(&self, tags: I, match_any: bool) -> BTreeMap<String, StateVariable>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run(&StateQuery::new().with_tags(tags, match_any))
    }

    /// Live variables whose key starts with `prefix`.
    pub fn by_prefix(&self, prefix: &str) -> BTreeMap<String, StateVariable> {
        self.run(&StateQuery::new().with_prefix(prefix))
    }
}
