use std::collections::BTreeSet;

use serde::Serialize;

use crate::{delivery::DeliveryRequest, rule_set::RuleSet};

/// Outcome of [`evaluate_local_execution`]: whether a request can be fully decided locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalExecutionEvaluation {
    pub eligible: bool,
    /// Why the request is not eligible. `None` if it is.
    pub reason: Option<String>,
    /// Mbox names that need the remote service, sorted.
    pub remote_mboxes: Vec<String>,
    /// View names that need the remote service, sorted.
    pub remote_views: Vec<String>,
}

impl LocalExecutionEvaluation {
    fn eligible() -> Self {
        LocalExecutionEvaluation {
            eligible: true,
            ..Default::default()
        }
    }

    fn ineligible(reason: impl Into<String>) -> Self {
        LocalExecutionEvaluation {
            eligible: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Determine whether `request` can be fully executed locally against `rule_set`, and why not.
///
/// A name counts as remote if the rule set does not cover it locally, or if it is listed as both
/// local and remote. An mbox without a name is never covered locally and is reported with an
/// empty name. A prefetch of a single unnamed view stands for all views, which makes every
/// remote view of the rule set remote for the request.
pub fn evaluate_local_execution(
    request: Option<&DeliveryRequest>,
    rule_set: Option<&RuleSet>,
) -> LocalExecutionEvaluation {
    let Some(request) = request else {
        return LocalExecutionEvaluation::ineligible("Given request cannot be null");
    };
    let Some(rule_set) = rule_set else {
        return LocalExecutionEvaluation::ineligible(
            "Local-decisioning rule set not yet available",
        );
    };

    let remote_mboxes = remote_mboxes(request, rule_set);
    let remote_views = remote_views(request, rule_set);
    if remote_mboxes.is_empty() && remote_views.is_empty() {
        return LocalExecutionEvaluation::eligible();
    }

    let mut parts = Vec::with_capacity(2);
    if !remote_mboxes.is_empty() {
        parts.push(format!("mboxes {}", list(&remote_mboxes)));
    }
    if !remote_views.is_empty() {
        parts.push(format!("views {}", list(&remote_views)));
    }
    LocalExecutionEvaluation {
        eligible: false,
        reason: Some(format!("remote activities in: {}", parts.join(", "))),
        remote_mboxes,
        remote_views,
    }
}

fn list(names: &[String]) -> String {
    format!("[{}]", names.join(", "))
}

fn remote_mboxes(request: &DeliveryRequest, rule_set: &RuleSet) -> Vec<String> {
    let mut names = BTreeSet::new();
    if let Some(prefetch) = &request.prefetch {
        if prefetch.page_load.is_some() {
            names.insert(rule_set.global_mbox.as_str());
        }
        names.extend(prefetch.mboxes.iter().map(|m| m.name.as_deref().unwrap_or_default()));
    }
    if let Some(execute) = &request.execute {
        if execute.page_load.is_some() {
            names.insert(rule_set.global_mbox.as_str());
        }
        names.extend(execute.mboxes.iter().map(|m| m.name.as_deref().unwrap_or_default()));
    }

    names
        .into_iter()
        .filter(|name| !rule_set.local_mboxes.contains(*name) || rule_set.remote_mboxes.contains(*name))
        .map(str::to_owned)
        .collect()
}

fn remote_views(request: &DeliveryRequest, rule_set: &RuleSet) -> Vec<String> {
    let views = request
        .prefetch
        .as_ref()
        .map(|prefetch| prefetch.views.as_slice())
        .unwrap_or_default();

    if let [single] = views {
        if single.name.is_none() {
            let mut all: Vec<String> = rule_set.remote_views.iter().cloned().collect();
            all.sort();
            return all;
        }
    }

    views
        .iter()
        .filter_map(|view| view.name.as_deref())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|name| !rule_set.local_views.contains(*name) || rule_set.remote_views.contains(*name))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::evaluate_local_execution;
    use crate::{
        delivery::{
            DeliveryRequest, ExecuteRequest, MboxRequest, PageLoadRequest, PrefetchRequest,
            ViewRequest,
        },
        rule_set::load_fixture,
    };

    fn prefetch_views(names: &[Option<&str>]) -> DeliveryRequest {
        DeliveryRequest {
            prefetch: Some(PrefetchRequest {
                views: names
                    .iter()
                    .map(|name| ViewRequest {
                        name: name.map(str::to_owned),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn execute_mboxes(names: &[&str]) -> DeliveryRequest {
        DeliveryRequest {
            execute: Some(ExecuteRequest {
                mboxes: names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| MboxRequest::new(*name, i as i32 + 1))
                    .collect(),
                page_load: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn fails_closed_without_request_or_rules() {
        let rule_set = load_fixture();
        let evaluation = evaluate_local_execution(None, Some(&rule_set));
        assert!(!evaluation.eligible);
        assert_eq!(
            evaluation.reason.as_deref(),
            Some("Given request cannot be null")
        );

        let evaluation = evaluate_local_execution(Some(&DeliveryRequest::default()), None);
        assert!(!evaluation.eligible);
        assert_eq!(
            evaluation.reason.as_deref(),
            Some("Local-decisioning rule set not yet available")
        );
    }

    #[test]
    fn local_mboxes_are_eligible() {
        let rule_set = load_fixture();
        let request = execute_mboxes(&["server-side-mbox", "allocation-mbox"]);
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert!(evaluation.eligible);
        assert!(evaluation.reason.is_none());
    }

    #[test]
    fn unknown_and_overlapping_mboxes_are_remote() {
        let rule_set = load_fixture();
        let request = execute_mboxes(&["server-side-mbox", "unmapped", "remote-and-local-mbox"]);
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert!(!evaluation.eligible);
        assert_eq!(
            evaluation.remote_mboxes,
            vec!["remote-and-local-mbox".to_owned(), "unmapped".to_owned()]
        );
        assert_eq!(
            evaluation.reason.as_deref(),
            Some("remote activities in: mboxes [remote-and-local-mbox, unmapped]")
        );
    }

    #[test]
    fn unnamed_mbox_is_remote() {
        let rule_set = load_fixture();
        let mut request = execute_mboxes(&["server-side-mbox"]);
        request.execute.as_mut().unwrap().mboxes.push(MboxRequest {
            index: Some(2),
            ..Default::default()
        });

        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert!(!evaluation.eligible);
        assert_eq!(evaluation.remote_mboxes, vec![String::new()]);

        let request = DeliveryRequest {
            prefetch: Some(PrefetchRequest {
                mboxes: vec![MboxRequest::default()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!evaluate_local_execution(Some(&request), Some(&rule_set)).eligible);
    }

    #[test]
    fn page_load_counts_as_global_mbox() {
        let mut rule_set = load_fixture();
        let request = DeliveryRequest {
            prefetch: Some(PrefetchRequest {
                page_load: Some(PageLoadRequest::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(evaluate_local_execution(Some(&request), Some(&rule_set)).eligible);

        rule_set.local_mboxes.remove("target-global-mbox");
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert_eq!(evaluation.remote_mboxes, vec!["target-global-mbox".to_owned()]);
    }

    #[test]
    fn views() {
        let rule_set = load_fixture();

        let request = prefetch_views(&[Some("home"), Some("checkout")]);
        assert!(evaluate_local_execution(Some(&request), Some(&rule_set)).eligible);

        let request = prefetch_views(&[Some("home"), Some("remote-view"), Some("nowhere")]);
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert!(!evaluation.eligible);
        assert_eq!(
            evaluation.remote_views,
            vec!["nowhere".to_owned(), "remote-view".to_owned()]
        );
        assert_eq!(
            evaluation.reason.as_deref(),
            Some("remote activities in: views [nowhere, remote-view]")
        );
    }

    #[test]
    fn all_views_request_takes_every_remote_view() {
        let rule_set = load_fixture();
        let request = prefetch_views(&[None]);
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert!(!evaluation.eligible);
        assert_eq!(evaluation.remote_views, vec!["remote-view".to_owned()]);

        let mut rule_set = rule_set;
        rule_set.remote_views.clear();
        assert!(evaluate_local_execution(Some(&request), Some(&rule_set)).eligible);
    }

    #[test]
    fn reason_lists_mboxes_then_views() {
        let rule_set = load_fixture();
        let mut request = execute_mboxes(&["remote-only-mbox"]);
        request.prefetch = prefetch_views(&[Some("remote-view")]).prefetch;
        let evaluation = evaluate_local_execution(Some(&request), Some(&rule_set));
        assert_eq!(
            evaluation.reason.as_deref(),
            Some("remote activities in: mboxes [remote-only-mbox], views [remote-view]")
        );
    }
}
