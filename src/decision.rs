//! Per-item rule evaluation and response assembly.
use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    allocation::{compute_allocation, Murmur3Hasher},
    collator::{custom_params, geo_params, page_params, time_params, user_params, Params},
    delivery::{
        DeliveryOption, DeliveryRequest, ExecuteResponse, MboxResponse, Metric, MetricType,
        Notification, NotificationMbox, NotificationPageLoad, NotificationView, PageLoadResponse,
        PrefetchResponse, RequestDetails, TraceMap, View,
    },
    rule_set::{Rule, RuleSet},
    trace::TraceHandler,
    ClientConfig, Error, Result,
};

/// Where the decisions for an item go.
pub enum ResponseTarget<'r> {
    Prefetch(&'r mut PrefetchResponse),
    /// Execute items also produce display notifications.
    Execute {
        response: &'r mut ExecuteResponse,
        notifications: &'r mut Vec<Notification>,
    },
}

impl ResponseTarget<'_> {
    pub fn is_execute(&self) -> bool {
        matches!(self, ResponseTarget::Execute { .. })
    }
}

/// Inputs shared by every item of one request.
pub struct DecisionContext<'a> {
    pub request: &'a DeliveryRequest,
    pub rule_set: &'a RuleSet,
    pub visitor_id: &'a str,
    /// Geo parameters, resolved once per request.
    pub geo: Params,
}

/// Decides request items against a rule set.
pub struct DecisionHandler {
    config: ClientConfig,
}

impl DecisionHandler {
    pub fn new(config: ClientConfig) -> DecisionHandler {
        DecisionHandler { config }
    }

    /// Build the per-request context, looking up geo information if the rule set needs it.
    pub fn context<'a>(
        &self,
        request: &'a DeliveryRequest,
        rule_set: &'a RuleSet,
        visitor_id: &'a str,
    ) -> DecisionContext<'a> {
        DecisionContext {
            request,
            rule_set,
            visitor_id,
            geo: self.resolve_geo(request, rule_set),
        }
    }

    fn resolve_geo(&self, request: &DeliveryRequest, rule_set: &RuleSet) -> Params {
        if !rule_set.geo_targeting_enabled {
            return Params::new();
        }
        let Some(geo) = request.context.as_ref().and_then(|c| c.geo.as_ref()) else {
            return Params::new();
        };

        if !geo.needs_lookup() {
            return geo_params(geo);
        }
        let ip_address = geo.ip_address.as_deref().unwrap_or_default();
        match self.config.geo_client.lookup_geo(ip_address) {
            Some(resolved) => geo_params(&resolved),
            None => {
                log::debug!(target: "local_decisioning", ip_address; "geo lookup returned nothing");
                Params::new()
            }
        }
    }

    /// Evaluate the rules of one item in order and write exactly one response slot for it.
    ///
    /// An mbox item takes the first rule that applies. View and page-load items take every
    /// applying rule, except that a rule is skipped once another rule with the same `ruleKey`
    /// applied.
    pub fn handle_details(
        &self,
        ctx: &DecisionContext,
        details: RequestDetails,
        target: &mut ResponseTarget,
        mut trace: Option<&mut TraceHandler>,
    ) {
        if let Some(trace) = trace.as_deref_mut() {
            trace.update_request(ctx.request, details, target.is_execute());
        }

        let property_token = ctx.request.property_token();
        let mut applied_keys = HashSet::new();
        let mut handled = false;
        for rule in candidate_rules(ctx.rule_set, details) {
            if rule.property_token_mismatch(property_token) {
                continue;
            }
            if let Some(key) = rule.rule_key.as_deref() {
                if applied_keys.contains(key) {
                    continue;
                }
            }
            if !self.evaluate_rule(ctx, details, rule, trace.as_deref_mut()) {
                continue;
            }
            if !self.apply_consequence(rule, details, target, trace.as_deref_mut()) {
                continue;
            }

            handled = true;
            if matches!(details, RequestDetails::Mbox(_)) {
                break;
            }
            if let Some(key) = rule.rule_key.as_deref() {
                applied_keys.insert(key);
            }
        }

        if !handled {
            unhandled_response(details, target, trace.as_deref());
        }
    }

    fn evaluate_rule(
        &self,
        ctx: &DecisionContext,
        details: RequestDetails,
        rule: &Rule,
        trace: Option<&mut TraceHandler>,
    ) -> bool {
        let context = self.evaluation_context(ctx, details, rule);
        log::trace!(target: "local_decisioning",
                    activity_id:serde = rule.meta.activity_id,
                    rule_key:serde = rule.rule_key,
                    context:serde;
                    "evaluating rule");

        match rule.condition.evaluate(&context) {
            Ok(matched) => {
                if let Some(trace) = trace {
                    trace.add_campaign(rule, &context, matched);
                }
                matched
            }
            Err(err) => {
                let err = Error::from(err);
                log::warn!(target: "local_decisioning",
                           activity_id:serde = rule.meta.activity_id;
                           "hit exception while evaluating local-decisioning rule: {err:?}");
                self.config.report(&err);
                false
            }
        }
    }

    fn evaluation_context(
        &self,
        ctx: &DecisionContext,
        details: RequestDetails,
        rule: &Rule,
    ) -> Value {
        let allocation = compute_allocation(
            &Murmur3Hasher,
            self.config.client(),
            &rule.allocation_seed(),
            ctx.visitor_id,
        );

        let mut context = time_params(Utc::now());
        context.insert("allocation".into(), allocation.into());
        context.insert("user".into(), user_params(ctx.request).into());
        context.insert("page".into(), page_params(ctx.request, details, false).into());
        context.insert(
            "referring".into(),
            page_params(ctx.request, details, true).into(),
        );
        context.insert("mbox".into(), custom_params(details).into());
        context.insert("geo".into(), ctx.geo.clone().into());
        Value::Object(context)
    }

    /// Write the consequence of a matched rule into `target`. Returns `true` if it was applied.
    fn apply_consequence(
        &self,
        rule: &Rule,
        details: RequestDetails,
        target: &mut ResponseTarget,
        trace: Option<&mut TraceHandler>,
    ) -> bool {
        log::trace!(target: "local_decisioning",
                    activity_id:serde = rule.meta.activity_id,
                    consequence:serde = rule.consequence;
                    "applying rule");

        match self.try_apply_consequence(rule, details, target, trace) {
            Ok(applied) => applied,
            Err(err) => {
                log::warn!(target: "local_decisioning",
                           activity_id:serde = rule.meta.activity_id;
                           "unable to apply local-decisioning rule consequence: {err:?}");
                self.config.report(&err);
                false
            }
        }
    }

    fn try_apply_consequence(
        &self,
        rule: &Rule,
        details: RequestDetails,
        target: &mut ResponseTarget,
        mut trace: Option<&mut TraceHandler>,
    ) -> Result<bool> {
        if rule.consequence.is_empty() {
            return Ok(false);
        }

        let mbox = match details {
            RequestDetails::View(_) => {
                let ResponseTarget::Prefetch(prefetch) = target else {
                    // Views are prefetch only.
                    return Ok(false);
                };
                let mut view: View = convert(Value::Object(rule.consequence.clone()))?;
                view.trace = current_trace(trace.as_deref());
                prefetch.views.push(view);
                return Ok(true);
            }
            RequestDetails::Mbox(mbox) => Some(mbox),
            RequestDetails::PageLoad(_) => None,
        };

        let mut options: Vec<DeliveryOption> = consequence_list(rule, "options")?;
        let metrics: Vec<Metric> = consequence_list(rule, "metrics")?;

        if let ResponseTarget::Execute { notifications, .. } = target {
            let notification = create_notification(details, &options);
            if let Some(trace) = trace.as_deref_mut() {
                trace.add_notification(rule, &notification);
            }
            notifications.push(notification);
            // Event tokens are consumed by the notification, not echoed to the caller.
            for option in &mut options {
                option.event_token = None;
            }
        }

        let trace = current_trace(trace.as_deref());
        match mbox {
            Some(mbox) => {
                let response = MboxResponse {
                    index: mbox.index,
                    name: mbox.name.clone(),
                    options,
                    metrics,
                    trace,
                    ..Default::default()
                };
                match target {
                    ResponseTarget::Prefetch(prefetch) => prefetch.mboxes.push(response),
                    ResponseTarget::Execute { response: execute, .. } => {
                        execute.mboxes.push(response)
                    }
                }
            }
            None => {
                let page_load = match target {
                    ResponseTarget::Prefetch(prefetch) => &mut prefetch.page_load,
                    ResponseTarget::Execute { response, .. } => &mut response.page_load,
                }
                .get_or_insert_with(PageLoadResponse::default);
                page_load.trace = trace;
                page_load.options.extend(options);
                for metric in metrics {
                    if !page_load.metrics.contains(&metric) {
                        page_load.metrics.push(metric);
                    }
                }
            }
        }
        Ok(true)
    }
}

fn candidate_rules<'a>(rule_set: &'a RuleSet, details: RequestDetails) -> Vec<&'a Rule> {
    match details {
        RequestDetails::View(view) => match view.name.as_deref() {
            Some(name) => rule_set.view_rules(name).iter().collect(),
            None => rule_set.all_view_rules().collect(),
        },
        RequestDetails::Mbox(mbox) => mbox
            .name
            .as_deref()
            .map(|name| rule_set.mbox_rules(name))
            .unwrap_or_default()
            .iter()
            .collect(),
        RequestDetails::PageLoad(_) => rule_set.global_mbox_rules().iter().collect(),
    }
}

/// Write an empty response slot for an item no rule applied to.
fn unhandled_response(
    details: RequestDetails,
    target: &mut ResponseTarget,
    trace: Option<&TraceHandler>,
) {
    let trace = current_trace(trace);
    match (details, target) {
        (RequestDetails::View(view), ResponseTarget::Prefetch(prefetch)) => {
            prefetch.views.push(View {
                name: view.name.clone(),
                key: view.key.clone(),
                trace,
                ..Default::default()
            });
        }
        (RequestDetails::View(view), ResponseTarget::Execute { .. }) => {
            log::warn!(target: "local_decisioning",
                       view:serde = view.name;
                       "views cannot be executed, dropping view item");
        }
        (RequestDetails::Mbox(mbox), target) => {
            let response = MboxResponse {
                index: mbox.index,
                name: mbox.name.clone(),
                trace,
                ..Default::default()
            };
            match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.mboxes.push(response),
                ResponseTarget::Execute { response: execute, .. } => execute.mboxes.push(response),
            }
        }
        (RequestDetails::PageLoad(_), target) => {
            let response = PageLoadResponse {
                trace,
                ..Default::default()
            };
            match target {
                ResponseTarget::Prefetch(prefetch) => prefetch.page_load = Some(response),
                ResponseTarget::Execute { response: execute, .. } => {
                    execute.page_load = Some(response)
                }
            }
        }
    }
}

fn create_notification(details: RequestDetails, options: &[DeliveryOption]) -> Notification {
    let mut notification = Notification {
        id: Uuid::new_v4().to_string(),
        impression_id: Uuid::new_v4().to_string(),
        notification_type: MetricType::Display,
        timestamp: Utc::now().timestamp_millis(),
        tokens: options
            .iter()
            .filter_map(|option| option.event_token.clone())
            .collect(),
        mbox: None,
        view: None,
        page_load: None,
    };
    match details {
        RequestDetails::Mbox(mbox) => {
            notification.mbox = Some(NotificationMbox {
                name: mbox.name.clone(),
                state: None,
            });
        }
        RequestDetails::View(view) => {
            notification.view = Some(NotificationView {
                name: view.name.clone(),
                key: view.key.clone(),
                state: None,
            });
        }
        RequestDetails::PageLoad(_) => {
            notification.page_load = Some(NotificationPageLoad::default());
        }
    }
    notification
}

fn current_trace(trace: Option<&TraceHandler>) -> Option<TraceMap> {
    trace.map(TraceHandler::current_trace)
}

/// Convert the consequence sub-list under `key`. A missing list is empty.
fn consequence_list<T: DeserializeOwned>(rule: &Rule, key: &str) -> Result<Vec<T>> {
    match rule.consequence_value(key) {
        Value::Null => Ok(Vec::new()),
        value => convert(value),
    }
}

fn convert<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| Error::ConsequenceConversion(Arc::new(err)))
}
