//! Derived state: values computed from other state variables.
//!
//! A [`DerivedStateRule`] names a key, the keys it depends on, and a pure
//! calculator. The [`DerivedStateEngine`] keeps the rules in a dependency
//! graph that is checked for cycles at registration time, and produces the
//! topological recalculation order the store follows after every write.
//!
//! # Recalculation policy
//!
//! Derived values are recomputed eagerly. When a key changes, every rule
//! that depends on it (directly or transitively) is re-evaluated in
//! topological order, and each result is written back into the store with
//! `ChangeType::Calculated`. A calculator error makes that rule's value
//! absent for the cascade; downstream rules see `None` for it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use chronicle_types::{StateCategory, StateValue, WorldRegion};

use crate::StateError;

/// Tag added to every derived variable.
pub const DERIVED_TAG: &str = "derived";

/// Key of the built-in world population rule.
pub const POPULATION_TOTAL_KEY: &str = "world.population.total";

/// Dependencies of the built-in world population rule.
pub const POPULATION_KEYS: [&str; 4] = [
    "world.population.humans",
    "world.population.elves",
    "world.population.dwarves",
    "world.population.orcs",
];

/// Dependency values handed to a calculator. Missing keys map to `None`.
pub type DependencyValues = BTreeMap<String, Option<StateValue>>;

/// A pure function computing a derived value from its dependencies.
pub type Calculator = Arc<dyn Fn(&DependencyValues) -> Result<StateValue, String> + Send + Sync>;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A registered derived value.
#[derive(Clone)]
pub struct DerivedStateRule {
    /// The derived key.
    pub key: String,
    /// Keys the calculator reads, in the order given at construction.
    pub dependencies: Vec<String>,
    /// The calculator.
    pub calculator: Calculator,
    /// Category the derived variable is written with.
    pub category: StateCategory,
    /// Region the derived variable is written with.
    pub region: WorldRegion,
    /// Tags the derived variable is written with; always includes
    /// [`DERIVED_TAG`].
    pub tags: BTreeSet<String>,
    /// Human-readable description.
    pub description: String,
    /// Free-form annotations.
    pub metadata: BTreeMap<String, String>,
}

impl core::fmt::Debug for DerivedStateRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DerivedStateRule")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .field("category", &self.category)
            .field("region", &self.region)
            .field("tags", &self.tags)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl DerivedStateRule {
    /// Create a rule with category `Other`, region `Global`, and the
    /// `derived` tag.
    pub fn new<I, S, F>(key: impl Into<String>, dependencies: I, calculator: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&DependencyValues) -> Result<StateValue, String> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            calculator: Arc::new(calculator),
            category: StateCategory::Other,
            region: WorldRegion::Global,
            tags: BTreeSet::from([DERIVED_TAG.to_owned()]),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the category.
    #[must_use]
    pub const fn with_category(mut self, category: StateCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the region.
    #[must_use]
    pub const fn with_region(mut self, region: WorldRegion) -> Self {
        self.region = region;
        self
    }

    /// Add tags. The `derived` tag is always kept.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Run the calculator.
    pub fn compute(&self, inputs: &DependencyValues) -> Result<StateValue, String> {
        (self.calculator)(inputs)
    }

    /// Describe the rule without its calculator.
    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            key: self.key.clone(),
            dependencies: self.dependencies.clone(),
            category: self.category,
            region: self.region,
            tags: self.tags.clone(),
            description: self.description.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Serializable description of a registered rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    /// The derived key.
    pub key: String,
    /// Keys the calculator reads.
    pub dependencies: Vec<String>,
    /// Category of the derived variable.
    pub category: StateCategory,
    /// Region of the derived variable.
    pub region: WorldRegion,
    /// Tags of the derived variable.
    pub tags: BTreeSet<String>,
    /// Human-readable description.
    pub description: String,
    /// Free-form annotations.
    pub metadata: BTreeMap<String, String>,
}

/// Sum every numeric dependency, treating missing and non-numeric inputs
/// as zero.
pub fn sum_numbers(inputs: &DependencyValues) -> StateValue {
    let total: f64 = inputs
        .values()
        .filter_map(|v| v.as_ref().and_then(StateValue::as_number))
        .sum();
    StateValue::Number(total)
}

/// The built-in rule totalling the world's population groups.
pub fn population_total_rule() -> DerivedStateRule {
    DerivedStateRule::new(POPULATION_TOTAL_KEY, POPULATION_KEYS, |inputs| {
        Ok(sum_numbers(inputs))
    })
    .with_category(StateCategory::Population)
    .with_tags(["population"])
    .with_description("Total population across all peoples")
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The registered rules and their dependency graph.
#[derive(Debug, Default)]
pub struct DerivedStateEngine {
    /// Rules by derived key.
    rules: BTreeMap<String, DerivedStateRule>,
    /// Reverse edges: dependency key -> derived keys reading it.
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// Last value computed for each derived key during a cascade.
    cache: BTreeMap<String, StateValue>,
}

impl DerivedStateEngine {
    /// Create an engine with no rules.
    pub const fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
            dependents: BTreeMap::new(),
            cache: BTreeMap::new(),
        }
    }

    /// Return the number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Return whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `key` is a derived key.
    pub fn contains(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    /// Register a new rule.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::DuplicateRule`] if a rule for the key exists,
    /// or [`StateError::CycleDetected`] if the rule's dependencies lead back
    /// to its own key. The engine is unchanged on error.
    pub fn register(&mut self, rule: DerivedStateRule) -> Result<(), StateError> {
        if self.rules.contains_key(&rule.key) {
            return Err(StateError::DuplicateRule(rule.key));
        }
        if let Some(path) = self.find_cycle(&rule.key, &rule.dependencies) {
            return Err(StateError::CycleDetected {
                key: rule.key,
                path,
            });
        }

        tracing::debug!(
            key = %rule.key,
            dependencies = rule.dependencies.len(),
            "Registered derived rule"
        );
        self.link(&rule);
        self.rules.insert(rule.key.clone(), rule);
        Ok(())
    }

    /// Replace an existing rule, re-validating the graph.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RuleNotFound`] if no rule exists for the key,
    /// or [`StateError::CycleDetected`] if the new dependencies would form
    /// a cycle. The old rule stays in place on error.
    pub fn update(&mut self, rule: DerivedStateRule) -> Result<(), StateError> {
        if !self.rules.contains_key(&rule.key) {
            return Err(StateError::RuleNotFound(rule.key));
        }
        // Path search stops at the rule's own key, so the old edges of the
        // rule being replaced never participate.
        if let Some(path) = self.find_cycle(&rule.key, &rule.dependencies) {
            return Err(StateError::CycleDetected {
                key: rule.key,
                path,
            });
        }

        if let Some(old) = self.rules.remove(&rule.key) {
            self.unlink(&old);
        }
        self.cache.remove(&rule.key);
        tracing::debug!(key = %rule.key, "Updated derived rule");
        self.link(&rule);
        self.rules.insert(rule.key.clone(), rule);
        Ok(())
    }

    /// Remove a rule and its cached value. Returns `false` if none existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(old) = self.rules.remove(key) else {
            return false;
        };
        self.unlink(&old);
        self.cache.remove(key);
        tracing::debug!(key, "Removed derived rule");
        true
    }

    /// The rule for `key`.
    pub fn rule(&self, key: &str) -> Option<&DerivedStateRule> {
        self.rules.get(key)
    }

    /// Description of the rule for `key`.
    pub fn rule_info(&self, key: &str) -> Option<RuleInfo> {
        self.rules.get(key).map(DerivedStateRule::info)
    }

    /// Derived keys that read `key` directly.
    pub fn dependent_keys(&self, key: &str) -> Vec<String> {
        self.dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every derived key, sorted.
    pub fn derived_keys(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    /// The last value a cascade computed for `key`.
    pub fn cached(&self, key: &str) -> Option<&StateValue> {
        self.cache.get(key)
    }

    /// Record the value a cascade computed for `key`.
    pub fn store_cached(&mut self, key: &str, value: StateValue) {
        self.cache.insert(key.to_owned(), value);
    }

    /// Forget the cached value for `key`.
    pub fn invalidate(&mut self, key: &str) {
        self.cache.remove(key);
    }

    /// Forget every cached value.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Derived keys affected by a change to `changed`, in the order they
    /// must be recomputed.
    ///
    /// Includes direct and transitive dependents. A rule always comes after
    /// every affected rule it depends on; ties are broken by key order.
    pub fn cascade_order(&self, changed: &str) -> Vec<String> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut frontier: Vec<&str> = vec![changed];
        while let Some(key) = frontier.pop() {
            if let Some(readers) = self.dependents.get(key) {
                for reader in readers {
                    if affected.insert(reader.clone()) {
                        frontier.push(reader);
                    }
                }
            }
        }
        self.topological(&affected)
    }

    /// Evaluate `key` against current values, recursively evaluating any
    /// dependency that is itself derived.
    ///
    /// Returns `None` if `key` has no rule or its calculator fails.
    pub fn evaluate(&self, key: &str, lookup: &dyn Fn(&str) -> Option<StateValue>) -> Option<StateValue> {
        let rule = self.rules.get(key)?;
        let inputs: DependencyValues = rule
            .dependencies
            .iter()
            .map(|dep| {
                let value = if self.rules.contains_key(dep) {
                    self.evaluate(dep, lookup)
                } else {
                    lookup(dep)
                };
                (dep.clone(), value)
            })
            .collect();
        run_calculator(rule, &inputs)
    }

    /// Evaluate `key` reading every dependency, derived or not, through
    /// `lookup`. Used by cascades, where upstream rules were already
    /// recomputed.
    pub fn compute_shallow(
        &self,
        key: &str,
        lookup: &dyn Fn(&str) -> Option<StateValue>,
    ) -> Option<StateValue> {
        let rule = self.rules.get(key)?;
        let inputs: DependencyValues = rule
            .dependencies
            .iter()
            .map(|dep| (dep.clone(), lookup(dep)))
            .collect();
        run_calculator(rule, &inputs)
    }

    /// Add `rule.key` to each dependency's reader set.
    fn link(&mut self, rule: &DerivedStateRule) {
        for dep in &rule.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(rule.key.clone());
        }
    }

    /// Remove `rule.key` from each dependency's reader set.
    fn unlink(&mut self, rule: &DerivedStateRule) {
        for dep in &rule.dependencies {
            if let Some(readers) = self.dependents.get_mut(dep) {
                readers.remove(&rule.key);
                if readers.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    /// If adding `key -> dependencies` closes a cycle, return the cycle as
    /// a key path starting and ending at `key`.
    fn find_cycle(&self, key: &str, dependencies: &[String]) -> Option<Vec<String>> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        for dep in dependencies {
            if let Some(mut path) = self.path_to(dep, key, &mut visited) {
                path.insert(0, key.to_owned());
                return Some(path);
            }
        }
        None
    }

    /// Depth-first search along rule dependencies from `from` to `target`.
    fn path_to(&self, from: &str, target: &str, visited: &mut BTreeSet<String>) -> Option<Vec<String>> {
        if from == target {
            return Some(vec![from.to_owned()]);
        }
        if !visited.insert(from.to_owned()) {
            return None;
        }
        let rule = self.rules.get(from)?;
        for dep in &rule.dependencies {
            if let Some(mut path) = self.path_to(dep, target, visited) {
                path.insert(0, from.to_owned());
                return Some(path);
            }
        }
        None
    }

    /// Kahn's algorithm restricted to `subset`.
    fn topological(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        for key in subset {
            let count = self.rules.get(key).map_or(0, |rule| {
                rule.dependencies
                    .iter()
                    .filter(|d| subset.contains(*d))
                    .count()
            });
            indegree.insert(key.as_str(), count);
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(subset.len());

        while let Some(key) = ready.pop_first() {
            order.push(key.to_owned());
            if let Some(readers) = self.dependents.get(key) {
                for reader in readers {
                    if let Some(n) = indegree.get_mut(reader.as_str()) {
                        *n = n.saturating_sub(1);
                        if *n == 0 {
                            ready.insert(reader.as_str());
                        }
                    }
                }
            }
        }
        order
    }
}

/// Run a rule's calculator, logging and swallowing failures.
fn run_calculator(rule: &DerivedStateRule, inputs: &DependencyValues) -> Option<StateValue> {
    match rule.compute(inputs) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key = %rule.key, error = %error, "Derived calculator failed");
            None
        }
    }
}
