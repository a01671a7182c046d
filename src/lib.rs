//! On-device decisioning for audience targeting and experimentation rules.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that downloads a rule set artifact in the background and
//! decides delivery requests against it without a network round-trip. Each mbox, view or page-load
//! item of a [`DeliveryRequest`](delivery::DeliveryRequest) is matched against the rules published
//! for it; the consequences of the matching rules make up the
//! [`LocalDeliveryResponse`].
//!
//! Not every activity can be decided on-device. [`Client::evaluate_local_execution()`] tells
//! whether a request is fully covered by the current rule set, and names the mboxes and views that
//! still need the remote delivery service.
//!
//! ```no_run
//! # use local_decisioning::{ClientConfig, delivery::{DeliveryRequest, ExecuteRequest, MboxRequest}};
//! # fn main() -> local_decisioning::Result<()> {
//! let client = ClientConfig::from_client_code("acme")
//!     .local_environment("production")
//!     .to_client();
//! client.start_rule_loader()?;
//! client.wait_for_rules()?;
//!
//! let request = DeliveryRequest {
//!     execute: Some(ExecuteRequest {
//!         mboxes: vec![MboxRequest::new("hero-banner", 1)],
//!         page_load: None,
//!     }),
//!     ..Default::default()
//! };
//! let response = client.get_local_offers(&request);
//! // Display notifications for execute items go to the delivery service.
//! println!("{:?}", response.notifications);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Errors hit while deciding a request (a rule that cannot be evaluated, a malformed consequence)
//! never fail the request. They are logged and passed to the [`ExceptionHandler`] configured with
//! [`ClientConfig::exception_handler()`], and the affected rule is skipped.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `local_decisioning` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into rule loading.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod allocation;
mod attributes;
mod client;
mod collator;
mod condition;
mod config;
mod decision;
pub mod delivery;
mod error;
mod evaluator;
mod exception_handler;
mod geo;
mod rule_loader;
mod rule_set;
mod rule_set_store;
mod service;
mod trace;

pub use allocation::{compute_allocation, Hasher, Murmur3Hasher};
pub use attributes::Attributes;
pub use client::Client;
pub use condition::{Condition, ConditionError};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use evaluator::{evaluate_local_execution, LocalExecutionEvaluation};
pub use exception_handler::ExceptionHandler;
pub use geo::GeoClient;
pub use rule_loader::{ArtifactFetcher, ArtifactResponse, LoaderState, RuleLoader};
pub use rule_set::{Rule, RuleMeta, RuleSet, Rules};
pub use service::{LocalDecisioningService, LocalDeliveryResponse};
pub use trace::ArtifactTrace;
