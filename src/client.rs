use std::sync::Arc;

use crate::{
    attributes::Attributes,
    delivery::DeliveryRequest,
    evaluator::{evaluate_local_execution, LocalExecutionEvaluation},
    rule_loader::RuleLoader,
    rule_set::RuleSet,
    service::{LocalDecisioningService, LocalDeliveryResponse},
    trace::ArtifactTrace,
    ClientConfig, Result,
};

/// An on-device decisioning client.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use local_decisioning::{Client, ClientConfig};
/// Client::new(ClientConfig::from_client_code("acme"));
/// ```
pub struct Client {
    config: ClientConfig,
    rule_loader: RuleLoader,
    service: LocalDecisioningService,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use local_decisioning::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_client_code("acme"));
    /// ```
    pub fn new(config: ClientConfig) -> Self {
        Client {
            rule_loader: RuleLoader::new(config.clone()),
            service: LocalDecisioningService::new(config.clone()),
            config,
        }
    }

    #[cfg(test)]
    fn new_with_rule_loader(config: ClientConfig, rule_loader: RuleLoader) -> Self {
        Client {
            rule_loader,
            service: LocalDecisioningService::new(config.clone()),
            config,
        }
    }

    /// Configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start polling for rule sets in the background. Does nothing if local decisioning is not
    /// enabled or the loader is already running.
    pub fn start_rule_loader(&self) -> Result<()> {
        self.rule_loader.start()
    }

    /// Stop polling. Decisions keep using the last published rule set.
    pub fn stop_rule_loader(&self) {
        self.rule_loader.stop();
    }

    /// Block until the first rule set is published, or the loader gives up or is stopped.
    pub fn wait_for_rules(&self) -> Result<()> {
        self.rule_loader.wait_for_rules()
    }

    /// The most recently published rule set.
    pub fn latest_rules(&self) -> Option<Arc<RuleSet>> {
        self.rule_loader.latest_rules()
    }

    /// The background rule loader.
    pub fn rule_loader(&self) -> &RuleLoader {
        &self.rule_loader
    }

    /// Determine whether `request` can be decided entirely on-device with the current rule set.
    pub fn evaluate_local_execution(&self, request: &DeliveryRequest) -> LocalExecutionEvaluation {
        let rule_set = self.latest_rules();
        let evaluation = evaluate_local_execution(Some(request), rule_set.as_deref());
        log::trace!(target: "local_decisioning",
                    evaluation:serde;
                    "evaluated local execution");
        evaluation
    }

    /// Decide `request` on-device against the current rule set.
    ///
    /// Items the rule set has no local rules for come back as empty entries. Use
    /// [`Client::evaluate_local_execution`] to find out beforehand.
    pub fn get_local_offers(&self, request: &DeliveryRequest) -> LocalDeliveryResponse {
        let rule_set = self.latest_rules();
        let artifact = ArtifactTrace::from_loader(&self.rule_loader);
        let response = self
            .service
            .execute_request(request, rule_set.as_deref(), &artifact);
        log::trace!(target: "local_decisioning",
                    status = response.status,
                    notifications = response.notifications.len();
                    "decided request locally");
        response
    }

    /// Decide `request` on-device and read feature values from the JSON offers.
    pub fn get_attributes(&self, request: &DeliveryRequest) -> Attributes {
        Attributes::new(self.get_local_offers(request).response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::Client;
    use crate::{
        delivery::{DeliveryRequest, ExecuteRequest, MboxRequest, VisitorId},
        rule_loader::{
            tests::{fixture_body, ok, ScriptedFetcher},
            RuleLoader,
        },
        ClientConfig, Error,
    };

    fn request(mbox: &str) -> DeliveryRequest {
        DeliveryRequest {
            id: Some(VisitorId {
                tnt_id: Some("visitor-1".into()),
                ..Default::default()
            }),
            execute: Some(ExecuteRequest {
                mboxes: vec![MboxRequest::new(mbox, 1)],
                page_load: None,
            }),
            ..Default::default()
        }
    }

    fn loaded_client() -> Client {
        let config = ClientConfig::from_client_code("acme").local_environment("production");
        let loader = RuleLoader::with_fetcher(
            config.clone(),
            ScriptedFetcher::new([Ok(ok(fixture_body(), "\"v1\""))]),
        );
        let client = Client::new_with_rule_loader(config, loader);
        client.start_rule_loader().unwrap();
        client.wait_for_rules().unwrap();
        client
    }

    #[test]
    fn returns_unavailable_while_no_rules() {
        let client = Client::new(ClientConfig::from_client_code("acme"));
        assert!(client.latest_rules().is_none());

        let evaluation = client.evaluate_local_execution(&request("server-side-mbox"));
        assert!(!evaluation.eligible);

        let response = client.get_local_offers(&request("server-side-mbox"));
        assert_eq!(response.status, 500);

        assert!(matches!(
            client.wait_for_rules(),
            Err(Error::LocalDecisioningDisabled)
        ));
    }

    #[test]
    fn decides_once_rules_are_loaded() {
        let client = loaded_client();

        assert!(
            client
                .evaluate_local_execution(&request("server-side-mbox"))
                .eligible
        );
        let response = client.get_local_offers(&request("server-side-mbox"));
        assert!(response.is_success());
        let execute = response.response.execute.unwrap();
        assert_eq!(execute.mboxes[0].options[0].content, Some(json!("<b>hi</b>")));
        assert_eq!(client.rule_loader().num_fetches(), 1);

        client.stop_rule_loader();
        // Published rules survive stopping the loader.
        assert!(client.latest_rules().is_some());
    }

    #[test]
    fn attributes_from_local_offers() {
        let client = loaded_client();
        let mut request = request("param-mbox");
        request.execute.as_mut().unwrap().mboxes[0]
            .parameters
            .insert("color".into(), "BLUE".into());

        let attributes = client.get_attributes(&request);
        assert!(attributes.feature_boolean("param-mbox", "enabled"));
        assert_eq!(attributes.feature_integer("param-mbox", "size"), 3);
        assert_eq!(attributes.feature_double("param-mbox", "ratio"), 0.5);
        assert_eq!(
            attributes.feature_string("param-mbox", "color").as_deref(),
            Some("blue")
        );
    }

    #[test]
    fn recovered_errors_reach_exception_handler() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let config = {
            let reported = reported.clone();
            ClientConfig::from_client_code("acme")
                .local_environment("production")
                .exception_handler(move |err: &Error| reported.lock().unwrap().push(err.clone()))
        };
        let loader = RuleLoader::with_fetcher(
            config.clone(),
            ScriptedFetcher::new([Ok(ok(fixture_body(), "\"v1\""))]),
        );
        let client = Client::new_with_rule_loader(config, loader);
        client.start_rule_loader().unwrap();
        client.wait_for_rules().unwrap();

        client.get_local_offers(&request("bad-condition-mbox"));
        assert!(matches!(
            reported.lock().unwrap().as_slice(),
            [Error::RuleEvaluation(_)]
        ));
    }
}
