//! Delivery request and response records exchanged with the host SDK.
//!
//! These mirror the delivery API schema closely so responses produced locally can be merged with
//! (or substituted for) responses from the remote service.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Free-form trace payload attached to response items.
pub type TraceMap = serde_json::Map<String, serde_json::Value>;

/// A single delivery request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteRequest>,
}

impl DeliveryRequest {
    /// Property token the request is scoped to, if any.
    pub fn property_token(&self) -> Option<&str> {
        self.property.as_ref()?.token.as_deref()
    }

    /// Request-level address, used when an item does not carry its own.
    pub fn address(&self) -> Option<&Address> {
        self.context.as_ref()?.address.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tnt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_party_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing_cloud_visitor_id: Option<String>,
}

impl VisitorId {
    /// The identifier used for allocation: tntId, then marketingCloudVisitorId, then
    /// thirdPartyId.
    pub fn allocation_id(&self) -> Option<&str> {
        [
            &self.tnt_id,
            &self.marketing_cloud_visitor_id,
            &self.third_party_id,
        ]
        .into_iter()
        .find_map(|id| id.as_deref().filter(|id| !id.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<Browser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Application>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_offset_in_minutes: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referring_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Geo {
    /// `true` if the record carries an IP address but none of the resolved location fields.
    pub fn needs_lookup(&self) -> bool {
        fn is_empty(value: &Option<String>) -> bool {
            value.as_deref().map_or(true, str::is_empty)
        }

        !is_empty(&self.ip_address)
            && is_empty(&self.city)
            && is_empty(&self.state_code)
            && is_empty(&self.country_code)
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Browser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_gl_renderer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Presence of this record on a request turns on trace collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchRequest {
    #[serde(default)]
    pub mboxes: Vec<MboxRequest>,
    #[serde(default)]
    pub views: Vec<ViewRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub mboxes: Vec<MboxRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MboxRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub profile_parameters: HashMap<String, String>,
}

impl MboxRequest {
    pub fn new(name: impl Into<String>, index: i32) -> MboxRequest {
        MboxRequest {
            index: Some(index),
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub profile_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLoadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub profile_parameters: HashMap<String, String>,
}

/// One item of a delivery request.
#[derive(Debug, Clone, Copy, From)]
pub enum RequestDetails<'a> {
    Mbox(&'a MboxRequest),
    View(&'a ViewRequest),
    PageLoad(&'a PageLoadRequest),
}

impl<'a> RequestDetails<'a> {
    pub fn address(&self) -> Option<&'a Address> {
        match self {
            RequestDetails::Mbox(mbox) => mbox.address.as_ref(),
            RequestDetails::View(view) => view.address.as_ref(),
            RequestDetails::PageLoad(page_load) => page_load.address.as_ref(),
        }
    }

    pub fn parameters(&self) -> &'a HashMap<String, String> {
        match self {
            RequestDetails::Mbox(mbox) => &mbox.parameters,
            RequestDetails::View(view) => &view.parameters,
            RequestDetails::PageLoad(page_load) => &page_load.parameters,
        }
    }
}

/// A delivery response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<View>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

/// Mbox entry of a prefetch or execute response. Prefetch entries may additionally carry
/// `state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MboxResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DeliveryOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DeliveryOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLoadResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DeliveryOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Html,
    Json,
    Redirect,
    Dynamic,
    Actions,
}

/// A content option. Named `DeliveryOption` to stay clear of [`std::option::Option`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOption {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_tokens: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Click,
    Display,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
}

/// Display notification recorded for a locally executed item. Handed to the host transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub impression_id: String,
    #[serde(rename = "type")]
    pub notification_type: MetricType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbox: Option<NotificationMbox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<NotificationView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load: Option<NotificationPageLoad>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMbox {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPageLoad {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{DeliveryOption, DeliveryRequest, Geo, OptionType, VisitorId};

    #[test]
    fn parses_request_with_missing_collections() {
        let request: DeliveryRequest = serde_json::from_str(
            r#"
              {
                "id": { "tntId": "338e3c1e51f7416a8e1ccba4f81acea0.28_0" },
                "property": { "token": "abc" },
                "execute": { "mboxes": [{ "name": "hero", "index": 1 }] },
                "prefetch": { "pageLoad": {} }
              }
            "#,
        )
        .unwrap();

        assert_eq!(request.property_token(), Some("abc"));
        let execute = request.execute.unwrap();
        assert_eq!(execute.mboxes[0].name.as_deref(), Some("hero"));
        assert!(execute.page_load.is_none());
        let prefetch = request.prefetch.unwrap();
        assert!(prefetch.mboxes.is_empty() && prefetch.views.is_empty());
        assert!(prefetch.page_load.is_some());
    }

    #[test]
    fn option_type_is_serialized_as_type() {
        let option: DeliveryOption = serde_json::from_value(serde_json::json!({
            "type": "html",
            "content": "<b>hi</b>",
            "eventToken": "T1"
        }))
        .unwrap();
        assert_eq!(option.option_type, Some(OptionType::Html));
        assert_eq!(option.event_token.as_deref(), Some("T1"));

        let value = serde_json::to_value(&DeliveryOption {
            event_token: None,
            ..option
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "html", "content": "<b>hi</b>" })
        );
    }

    #[test]
    fn allocation_id_prefers_tnt_id() {
        let id = VisitorId {
            tnt_id: Some("tnt".into()),
            third_party_id: Some("third".into()),
            marketing_cloud_visitor_id: Some("mcid".into()),
        };
        assert_eq!(id.allocation_id(), Some("tnt"));

        let id = VisitorId {
            tnt_id: None,
            third_party_id: Some("third".into()),
            marketing_cloud_visitor_id: Some("mcid".into()),
        };
        assert_eq!(id.allocation_id(), Some("mcid"));

        assert_eq!(VisitorId::default().allocation_id(), None);
    }

    #[test]
    fn geo_needs_lookup_only_with_bare_ip() {
        let geo = Geo {
            ip_address: Some("10.0.0.1".into()),
            ..Default::default()
        };
        assert!(geo.needs_lookup());

        let geo = Geo {
            ip_address: Some("10.0.0.1".into()),
            city: Some("Lisbon".into()),
            ..Default::default()
        };
        assert!(!geo.needs_lookup());

        assert!(!Geo::default().needs_lookup());
    }
}
