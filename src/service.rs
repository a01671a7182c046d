use serde::Serialize;
use uuid::Uuid;

use crate::{
    decision::{DecisionHandler, ResponseTarget},
    delivery::{
        DeliveryRequest, DeliveryResponse, ExecuteResponse, Notification, PrefetchResponse,
        RequestDetails, VisitorId,
    },
    rule_set::RuleSet,
    trace::{ArtifactTrace, TraceHandler},
    ClientConfig,
};

/// A delivery response produced on-device, along with the display notifications the caller should
/// send for its execute items.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDeliveryResponse {
    pub response: DeliveryResponse,
    pub notifications: Vec<Notification>,
    pub status: u16,
    pub message: String,
}

impl LocalDeliveryResponse {
    pub const OK_MESSAGE: &'static str = "Local-decisioning response";
    pub const UNAVAILABLE_MESSAGE: &'static str = "Local-decisioning rules not available";

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Decides whole delivery requests against a rule set.
pub struct LocalDecisioningService {
    config: ClientConfig,
    decision_handler: DecisionHandler,
}

impl LocalDecisioningService {
    pub fn new(config: ClientConfig) -> LocalDecisioningService {
        LocalDecisioningService {
            decision_handler: DecisionHandler::new(config.clone()),
            config,
        }
    }

    /// Decide every prefetch and execute item of `request`.
    ///
    /// Without a rule set the response carries status 500 and no decisions. A visitor id is
    /// created (and returned in the response `id`) if the request has none usable for allocation.
    pub fn execute_request(
        &self,
        request: &DeliveryRequest,
        rule_set: Option<&RuleSet>,
        artifact: &ArtifactTrace,
    ) -> LocalDeliveryResponse {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut response = DeliveryResponse {
            client: Some(self.config.client().to_owned()),
            request_id: Some(request_id),
            id: request.id.clone(),
            ..Default::default()
        };

        let Some(rule_set) = rule_set else {
            log::warn!(target: "local_decisioning",
                       request_id:serde = response.request_id;
                       "local-decisioning request before rules were loaded");
            response.status = 500;
            return LocalDeliveryResponse {
                response,
                notifications: Vec::new(),
                status: 500,
                message: LocalDeliveryResponse::UNAVAILABLE_MESSAGE.to_owned(),
            };
        };

        let visitor_id = match request.id.as_ref().and_then(VisitorId::allocation_id) {
            Some(id) => id.to_owned(),
            None => {
                let id = Uuid::new_v4().to_string();
                log::debug!(target: "local_decisioning", visitor_id = id.as_str(); "created visitor id");
                response
                    .id
                    .get_or_insert_with(VisitorId::default)
                    .tnt_id = Some(id.clone());
                id
            }
        };

        let mut trace = request.trace.as_ref().map(|_| {
            TraceHandler::new(self.config.client(), artifact, rule_set, request)
        });
        let ctx = self.decision_handler.context(request, rule_set, &visitor_id);
        let mut notifications = Vec::new();

        let prefetch_items = prefetch_items(request);
        if !prefetch_items.is_empty() {
            let mut prefetch = PrefetchResponse::default();
            for details in prefetch_items {
                self.decision_handler.handle_details(
                    &ctx,
                    details,
                    &mut ResponseTarget::Prefetch(&mut prefetch),
                    trace.as_mut(),
                );
            }
            response.prefetch = Some(prefetch);
        }

        let execute_items = execute_items(request);
        if !execute_items.is_empty() {
            let mut execute = ExecuteResponse::default();
            for details in execute_items {
                self.decision_handler.handle_details(
                    &ctx,
                    details,
                    &mut ResponseTarget::Execute {
                        response: &mut execute,
                        notifications: &mut notifications,
                    },
                    trace.as_mut(),
                );
            }
            response.execute = Some(execute);
        }

        response.status = 200;
        LocalDeliveryResponse {
            response,
            notifications,
            status: 200,
            message: LocalDeliveryResponse::OK_MESSAGE.to_owned(),
        }
    }
}

fn prefetch_items(request: &DeliveryRequest) -> Vec<RequestDetails> {
    let Some(prefetch) = &request.prefetch else {
        return Vec::new();
    };
    prefetch
        .mboxes
        .iter()
        .map(RequestDetails::from)
        .chain(prefetch.views.iter().map(RequestDetails::from))
        .chain(prefetch.page_load.iter().map(RequestDetails::from))
        .collect()
}

fn execute_items(request: &DeliveryRequest) -> Vec<RequestDetails> {
    let Some(execute) = &request.execute else {
        return Vec::new();
    };
    execute
        .mboxes
        .iter()
        .map(RequestDetails::from)
        .chain(execute.page_load.iter().map(RequestDetails::from))
        .collect()
}
