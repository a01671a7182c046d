//! Diagnostic trace of a locally decided request.
use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::{
    delivery::{DeliveryRequest, Notification, RequestDetails, TraceMap},
    rule_set::{Rule, RuleSet},
    RuleLoader,
};

const MATCHED_IDS_KEY: &str = "matchedSegmentIds";
const UNMATCHED_IDS_KEY: &str = "unmatchedSegmentIds";
const MATCHED_RULES_KEY: &str = "matchedRuleConditions";
const UNMATCHED_RULES_KEY: &str = "unmatchedRuleConditions";

/// Loader facts recorded in the `artifact` section of a trace.
#[derive(Debug, Clone, Default)]
pub struct ArtifactTrace {
    pub polling_interval: Duration,
    pub retrieval_count: u64,
    pub last_retrieved: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

impl ArtifactTrace {
    pub fn from_loader(loader: &RuleLoader) -> ArtifactTrace {
        ArtifactTrace {
            polling_interval: loader.polling_interval(),
            retrieval_count: loader.num_fetches(),
            last_retrieved: loader.last_fetch(),
            location: loader.location().map(String::from),
        }
    }
}

/// Collects which rules matched and which did not while one request is decided.
///
/// Campaigns are keyed on activity id: the first rule of an activity creates its campaign summary
/// and target bucket, later rules of the same activity only append audience ids and conditions.
pub struct TraceHandler {
    trace: TraceMap,
    global_mbox: String,
    campaigns: BTreeMap<i64, Map<String, Value>>,
    evaluated_targets: BTreeMap<i64, Map<String, Value>>,
}

impl TraceHandler {
    pub fn new(
        client: &str,
        artifact: &ArtifactTrace,
        rule_set: &RuleSet,
        request: &DeliveryRequest,
    ) -> TraceHandler {
        let mut trace = TraceMap::new();
        trace.insert("clientCode".into(), client.into());
        trace.insert("artifact".into(), artifact_trace(artifact, rule_set).into());
        let mut profile = Map::new();
        if let Some(id) = &request.id {
            profile.insert("visitorId".into(), to_value(id));
        }
        trace.insert("profile".into(), profile.into());

        TraceHandler {
            trace,
            global_mbox: rule_set.global_mbox.clone(),
            campaigns: BTreeMap::new(),
            evaluated_targets: BTreeMap::new(),
        }
    }

    /// Record the request item being decided.
    pub fn update_request(
        &mut self,
        request: &DeliveryRequest,
        details: RequestDetails,
        execute: bool,
    ) {
        let mut req = Map::new();
        req.insert(
            "sessionId".into(),
            request.session_id.clone().map_or(Value::Null, Value::from),
        );
        req.insert(
            "requestType".into(),
            if execute { "execute" } else { "prefetch" }.into(),
        );
        let item = match details {
            RequestDetails::View(view) => {
                req.insert("view".into(), to_value(view));
                None
            }
            RequestDetails::Mbox(mbox) => Some(to_value(mbox)),
            RequestDetails::PageLoad(page_load) => Some(to_value(page_load)),
        };
        // Page-load items are traced as the global mbox.
        if let Some(mut mbox) = item {
            if let Value::Object(fields) = &mut mbox {
                fields
                    .entry("name")
                    .or_insert_with(|| self.global_mbox.clone().into());
            }
            req.insert("mbox".into(), mbox);
        }
        if let Some(url) = details.address().and_then(|address| address.url.as_deref()) {
            req.insert("url".into(), url.into());
            if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_owned)) {
                req.insert("host".into(), host.into());
            }
        }
        self.trace.insert("request".into(), req.into());
    }

    /// Record the evaluation of `rule` against `context`.
    ///
    /// Rules without an activity id are not traced.
    pub fn add_campaign(&mut self, rule: &Rule, context: &Value, matched: bool) {
        let Some(activity_id) = rule.meta.activity_id else {
            return;
        };

        self.campaigns.entry(activity_id).or_insert_with(|| {
            let mut campaign = campaign_trace(rule);
            campaign.insert("branchId".into(), json!(rule.meta.experience_id));
            campaign.insert("offers".into(), json!(rule.meta.offer_ids));
            campaign.insert("environmentId".into(), json!(rule.meta.environment_id));
            campaign.insert("metrics".into(), rule.consequence_value("metrics"));
            campaign
        });

        let target = self
            .evaluated_targets
            .entry(activity_id)
            .or_insert_with(|| {
                let mut target = campaign_trace(rule);
                target.insert("context".into(), context.clone());
                for key in [
                    MATCHED_IDS_KEY,
                    UNMATCHED_IDS_KEY,
                    MATCHED_RULES_KEY,
                    UNMATCHED_RULES_KEY,
                ] {
                    target.insert(key.into(), Value::Array(Vec::new()));
                }
                target
            });

        let (ids_key, rules_key) = if matched {
            (MATCHED_IDS_KEY, MATCHED_RULES_KEY)
        } else {
            (UNMATCHED_IDS_KEY, UNMATCHED_RULES_KEY)
        };
        if let Some(Value::Array(ids)) = target.get_mut(ids_key) {
            ids.extend(rule.meta.audience_ids.iter().map(|&id| Value::from(id)));
        }
        if let Some(Value::Array(rules)) = target.get_mut(rules_key) {
            rules.push(rule.condition.as_json().clone());
        }
    }

    /// Record the notification created when `rule` was applied to an execute item.
    pub fn add_notification(&mut self, rule: &Rule, notification: &Notification) {
        let Some(campaign) = rule
            .meta
            .activity_id
            .and_then(|activity_id| self.campaigns.get_mut(&activity_id))
        else {
            return;
        };
        let notifications = campaign
            .entry("notifications")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(notifications) = notifications {
            notifications.push(to_value(notification));
        }
    }

    /// Snapshot of the trace collected so far. Take a fresh one after every rule, the collections
    /// keep growing.
    pub fn current_trace(&self) -> TraceMap {
        let mut trace = self.trace.clone();
        trace.insert(
            "campaigns".into(),
            Value::Array(self.campaigns.values().cloned().map(Value::Object).collect()),
        );
        trace.insert(
            "evaluatedCampaignTargets".into(),
            Value::Array(
                self.evaluated_targets
                    .values()
                    .cloned()
                    .map(Value::Object)
                    .collect(),
            ),
        );
        trace
    }
}

fn artifact_trace(artifact: &ArtifactTrace, rule_set: &RuleSet) -> Map<String, Value> {
    let mut trace = rule_set.meta.clone();
    trace.insert("artifactVersion".into(), rule_set.version.clone().into());
    trace.insert(
        "pollingInterval".into(),
        (artifact.polling_interval.as_millis() as u64).into(),
    );
    trace.insert(
        "artifactRetrievalCount".into(),
        artifact.retrieval_count.into(),
    );
    trace.insert(
        "artifactLocation".into(),
        artifact.location.clone().map_or(Value::Null, Value::from),
    );
    trace.insert(
        "artifactLastRetrieved".into(),
        artifact
            .last_retrieved
            .map_or(Value::Null, |at| {
                at.format("%Y-%m-%dT%H:%MZ").to_string().into()
            }),
    );
    trace
}

fn campaign_trace(rule: &Rule) -> Map<String, Value> {
    let mut campaign = Map::new();
    campaign.insert("id".into(), json!(rule.meta.activity_id));
    campaign.insert("activityName".into(), json!(rule.meta.activity_name));
    campaign.insert("activityType".into(), json!(rule.meta.activity_type));
    campaign
}

fn to_value(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
