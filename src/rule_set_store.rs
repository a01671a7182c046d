use std::sync::{Arc, RwLock};

use crate::rule_set::RuleSet;

/// `RuleSetStore` holds the most recently published [`RuleSet`] and allows concurrent access for
/// the loader thread and request threads.
///
/// Publishing swaps the `Arc`, so a reader keeps a consistent rule set for as long as it holds its
/// clone, even while a refresh lands.
#[derive(Default)]
pub struct RuleSetStore {
    rule_set: RwLock<Option<Arc<RuleSet>>>,
}

impl RuleSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_rule_set(&self) -> Option<Arc<RuleSet>> {
        // A poisoned lock reads as "no rules yet".
        self.rule_set.read().ok()?.clone()
    }

    /// Publish a new rule set, returning the previous one.
    pub fn set_rule_set(&self, rule_set: RuleSet) -> Option<Arc<RuleSet>> {
        let rule_set = Arc::new(rule_set);
        let mut slot = self.rule_set.write().ok()?;
        slot.replace(rule_set)
    }
}
