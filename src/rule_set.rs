//! The versioned rule set artifact.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{condition::Condition, Error, Result};

/// Rule sets whose `version` does not start with this prefix are rejected.
pub const SUPPORTED_ARTIFACT_MAJOR_VERSION: &str = "1.";

const DEFAULT_GLOBAL_MBOX: &str = "target-global-mbox";

/// Immutable rule set. A new instance replaces the previous one on every successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub version: String,
    #[serde(default = "default_global_mbox")]
    pub global_mbox: String,
    pub rules: Rules,
    #[serde(default)]
    pub local_mboxes: HashSet<String>,
    #[serde(default)]
    pub remote_mboxes: HashSet<String>,
    #[serde(default)]
    pub local_views: HashSet<String>,
    #[serde(default)]
    pub remote_views: HashSet<String>,
    #[serde(default)]
    pub geo_targeting_enabled: bool,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_global_mbox() -> String {
    DEFAULT_GLOBAL_MBOX.to_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    #[serde(default)]
    pub mboxes: HashMap<String, Vec<Rule>>,
    #[serde(default)]
    pub views: HashMap<String, Vec<Rule>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub condition: Condition,
    #[serde(default)]
    pub consequence: Map<String, Value>,
    #[serde(default)]
    pub rule_key: Option<String>,
    #[serde(default)]
    pub property_tokens: Vec<String>,
    #[serde(default)]
    pub meta: RuleMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMeta {
    #[serde(default)]
    pub activity_id: Option<i64>,
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub experience_id: Option<i64>,
    #[serde(default)]
    pub environment_id: Option<i64>,
    #[serde(default)]
    pub offer_ids: Vec<i64>,
    #[serde(default)]
    pub audience_ids: Vec<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuleSet {
    /// Parse and validate a rule set artifact.
    ///
    /// The artifact is either accepted as a whole or rejected: an unsupported version, a body
    /// that does not parse, or missing rule maps all fail.
    pub fn from_slice(body: &[u8]) -> Result<RuleSet> {
        let value: Value =
            serde_json::from_slice(body).map_err(|err| Error::ArtifactParse(Arc::new(err)))?;

        // Check the version first. A future major version may not follow this schema at all.
        if let Some(version) = value.get("version").and_then(Value::as_str) {
            if !version.starts_with(SUPPORTED_ARTIFACT_MAJOR_VERSION) {
                return Err(Error::UnsupportedArtifactVersion(version.to_owned()));
            }
        }

        if value.get("rules").map_or(true, Value::is_null) {
            return Err(Error::MissingRules);
        }

        serde_json::from_value(value).map_err(|err| Error::ArtifactParse(Arc::new(err)))
    }

    /// Rules keyed on the mbox `name`, in evaluation order.
    pub fn mbox_rules(&self, name: &str) -> &[Rule] {
        self.rules
            .mboxes
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rules keyed on the global mbox, used for page-load requests.
    pub fn global_mbox_rules(&self) -> &[Rule] {
        self.mbox_rules(&self.global_mbox)
    }

    /// Rules keyed on the view `name`, in evaluation order.
    pub fn view_rules(&self, name: &str) -> &[Rule] {
        self.rules
            .views
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rules of every view ordered by view name, used when a view request names no view.
    pub fn all_view_rules(&self) -> impl Iterator<Item = &Rule> {
        let mut names: Vec<&String> = self.rules.views.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| self.rules.views[name].iter())
    }
}

impl Rule {
    /// Activity id used to seed allocation.
    pub fn allocation_seed(&self) -> String {
        self.meta
            .activity_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    }

    /// `true` if the rule is scoped to property tokens and `token` is not among them.
    pub fn property_token_mismatch(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) if !token.is_empty() && !self.property_tokens.is_empty() => {
                !self.property_tokens.iter().any(|t| t == token)
            }
            _ => false,
        }
    }

    /// Consequence sub-list under `key`, or `Null` if absent.
    pub(crate) fn consequence_value(&self, key: &str) -> Value {
        self.consequence.get(key).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
pub(crate) fn load_fixture() -> RuleSet {
    let body = std::fs::read("tests/data/rules.json").expect("Failed to read tests/data/rules.json");
    RuleSet::from_slice(&body).unwrap()
}
