//! The observance catalog: the one shared, mutable piece of state.
//!
//! Readers take an `Arc` to an immutable [`CatalogSnapshot`] and evaluate
//! against it for as long as they like. Writers build a complete new snapshot
//! and swap it in, so a reader sees either the whole old rule set or the whole
//! new one.

use crate::error::{Error, Result};
use crate::expand::{Expander, Expansion};
use crate::policy::{ObservanceCategory, PolicyOverrides};
use crate::rule::RecurrenceRule;
use crate::window::TimeWindow;
use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Who is attending; only nationality tags influence rule selection.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendeeContext {
    #[serde(default)]
    pub nationality_tags: BTreeSet<String>,
    #[serde(default)]
    pub is_organizer: bool,
}

impl AttendeeContext {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nationality_tags: tags.into_iter().map(Into::into).collect(),
            is_organizer: false,
        }
    }
}

#[derive(Debug)]
pub struct CatalogSnapshot {
    version: u64,
    rules: BTreeMap<String, RecurrenceRule>,
    fingerprint: String,
}

impl CatalogSnapshot {
    pub fn new(version: u64, rules: Vec<RecurrenceRule>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for rule in rules {
            rule.validate()?;
            if by_id.contains_key(&rule.id) {
                return Err(Error::InvalidRule(format!("duplicate rule id '{}'", rule.id)));
            }
            by_id.insert(rule.id.clone(), rule);
        }

        let canonical = serde_json::to_vec(&by_id.values().collect::<Vec<_>>())?;
        let fingerprint = hex::encode(Sha256::digest(&canonical));

        Ok(Self {
            version,
            rules: by_id,
            fingerprint,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// SHA-256 of the canonical rule set, for audit trails.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn rules(&self) -> impl Iterator<Item = &RecurrenceRule> {
        self.rules.values()
    }

    pub fn rule(&self, id: &str) -> Option<&RecurrenceRule> {
        self.rules.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules of the given categories that apply to attendees with `tags`,
    /// ordered by rule id.
    pub fn rules_for(
        &self,
        categories: &BTreeSet<ObservanceCategory>,
        tags: &BTreeSet<String>,
    ) -> Vec<&RecurrenceRule> {
        self.rules
            .values()
            .filter(|r| categories.contains(&r.category) && r.applies_to(tags))
            .collect()
    }

    /// Every applicable instance in `categories` touching `window`.
    pub fn instances_in(
        &self,
        categories: &BTreeSet<ObservanceCategory>,
        context: &AttendeeContext,
        window: &TimeWindow,
        expander: &Expander<'_>,
    ) -> Result<Expansion> {
        let mut out = Expansion::default();
        for rule in self.rules_for(categories, &context.nationality_tags) {
            out.extend(expander.expand(rule, window)?);
        }
        Ok(out)
    }

    /// Widest before/after buffers any instance can carry.
    pub fn max_buffers(&self, overrides: Option<&PolicyOverrides>) -> (Duration, Duration) {
        let policies = self.rules.values().map(|r| {
            overrides
                .and_then(|o| o.get(&r.category))
                .cloned()
                .unwrap_or_else(|| r.effective_policy())
        });
        let (before, after) = policies.fold((0u32, 0u32), |(b, a), p| {
            (b.max(p.buffer_before_mins), a.max(p.buffer_after_mins))
        });
        (
            Duration::minutes(before as i64),
            Duration::minutes(after as i64),
        )
    }
}

/// Holder of the current snapshot.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
    // Serializes writers; readers never touch it.
    writer: Mutex<()>,
}

impl Catalog {
    /// An empty catalog; reads fail with `CatalogUnavailable` until the first publish.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<RecurrenceRule>) -> Result<Self> {
        let catalog = Self::new();
        catalog.publish(rules)?;
        Ok(catalog)
    }

    pub fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        self.current.read().clone().ok_or(Error::CatalogUnavailable)
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replaces the whole rule set.
    pub fn publish(&self, rules: Vec<RecurrenceRule>) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.writer.lock();
        self.swap(rules)
    }

    /// Adds a rule, or replaces the rule with the same id.
    pub fn upsert(&self, rule: RecurrenceRule) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.writer.lock();
        let mut rules = self.current_rules();
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        self.swap(rules)
    }

    pub fn remove(&self, id: &str) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.writer.lock();
        let mut rules = self.current_rules();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(Error::RuleNotFound(id.to_string()));
        }
        self.swap(rules)
    }

    fn current_rules(&self) -> Vec<RecurrenceRule> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.rules().cloned().collect())
            .unwrap_or_default()
    }

    // Caller must hold `writer`.
    fn swap(&self, rules: Vec<RecurrenceRule>) -> Result<Arc<CatalogSnapshot>> {
        let version = self.current.read().as_ref().map_or(0, |s| s.version) + 1;
        let next = Arc::new(CatalogSnapshot::new(version, rules)?);
        *self.current.write() = Some(Arc::clone(&next));
        info!(
            version,
            rules = next.len(),
            fingerprint = %next.fingerprint(),
            "published catalog snapshot"
        );
        Ok(next)
    }
}
