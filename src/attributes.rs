use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::delivery::{DeliveryResponse, MboxResponse, OptionType};

/// Feature values read from the JSON offers of a delivery response.
///
/// The JSON options of every mbox response with the same name, prefetch first and then execute,
/// are merged into one map per mbox. Later keys win.
///
/// ```
/// # use local_decisioning::{Attributes, delivery::{DeliveryResponse, ExecuteResponse, MboxResponse, DeliveryOption, OptionType}};
/// let response = DeliveryResponse {
///     execute: Some(ExecuteResponse {
///         mboxes: vec![MboxResponse {
///             name: Some("feature-flags".into()),
///             options: vec![DeliveryOption {
///                 option_type: Some(OptionType::Json),
///                 content: Some(serde_json::json!({"enabled": true, "limit": "12.7"})),
///                 ..Default::default()
///             }],
///             ..Default::default()
///         }],
///         page_load: None,
///     }),
///     ..Default::default()
/// };
/// let attributes = Attributes::new(response);
/// assert!(attributes.feature_boolean("feature-flags", "enabled"));
/// assert_eq!(attributes.feature_integer("feature-flags", "limit"), 12);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    response: DeliveryResponse,
    content: HashMap<String, Map<String, Value>>,
}

impl Attributes {
    pub fn new(response: DeliveryResponse) -> Attributes {
        let prefetch = response
            .prefetch
            .iter()
            .flat_map(|prefetch| prefetch.mboxes.iter());
        let execute = response
            .execute
            .iter()
            .flat_map(|execute| execute.mboxes.iter());

        let mut content: HashMap<String, Map<String, Value>> = HashMap::new();
        for mbox in prefetch.chain(execute) {
            let Some(name) = &mbox.name else {
                continue;
            };
            content
                .entry(name.clone())
                .or_default()
                .extend(json_content(mbox));
        }

        Attributes { response, content }
    }

    /// The response the attributes were read from.
    pub fn response(&self) -> &DeliveryResponse {
        &self.response
    }

    /// Merged JSON content of `mbox`, or `None` if the response has no such mbox.
    pub fn to_map(&self, mbox: &str) -> Option<&Map<String, Value>> {
        self.content.get(mbox)
    }

    /// `true` only if `key` holds a JSON boolean `true`.
    pub fn feature_boolean(&self, mbox: &str, key: &str) -> bool {
        self.value(mbox, key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// String form of the value under `key`. Non-string values are rendered as JSON.
    pub fn feature_string(&self, mbox: &str, key: &str) -> Option<String> {
        match self.value(mbox, key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            value => Some(value.to_string()),
        }
    }

    /// Numbers are truncated toward zero, numeric strings are parsed first. Anything else is `0`.
    pub fn feature_integer(&self, mbox: &str, key: &str) -> i32 {
        self.feature_double(mbox, key) as i32
    }

    /// Numbers and numeric strings. Anything else is `0.0`.
    pub fn feature_double(&self, mbox: &str, key: &str) -> f64 {
        match self.value(mbox, key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                log::debug!(target: "local_decisioning", mbox, key; "feature value is not numeric");
                0.0
            }),
            _ => 0.0,
        }
    }

    fn value(&self, mbox: &str, key: &str) -> Option<&Value> {
        self.content.get(mbox)?.get(key)
    }
}

fn json_content(mbox: &MboxResponse) -> impl Iterator<Item = (String, Value)> + '_ {
    mbox.options
        .iter()
        .filter(|option| option.option_type == Some(OptionType::Json))
        .filter_map(|option| match &option.content {
            Some(Value::Object(fields)) => Some(fields),
            _ => None,
        })
        .flat_map(|fields| fields.iter().map(|(k, v)| (k.clone(), v.clone())))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Attributes;
    use crate::delivery::{
        DeliveryOption, DeliveryResponse, ExecuteResponse, MboxResponse, OptionType,
        PrefetchResponse,
    };

    fn mbox(name: &str, option_type: OptionType, content: serde_json::Value) -> MboxResponse {
        MboxResponse {
            name: Some(name.into()),
            options: vec![DeliveryOption {
                option_type: Some(option_type),
                content: Some(content),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn attributes() -> Attributes {
        Attributes::new(DeliveryResponse {
            prefetch: Some(PrefetchResponse {
                mboxes: vec![
                    mbox(
                        "flags",
                        OptionType::Json,
                        json!({"enabled": true, "size": 3, "ratio": 0.5, "color": "blue"}),
                    ),
                    mbox("flags", OptionType::Html, json!("<b>ignored</b>")),
                ],
                ..Default::default()
            }),
            execute: Some(ExecuteResponse {
                mboxes: vec![mbox(
                    "flags",
                    OptionType::Json,
                    json!({"color": "red", "limit": "-7.9", "nested": {"a": 1}}),
                )],
                page_load: None,
            }),
            ..Default::default()
        })
    }

    #[test]
    fn execute_content_overrides_prefetch() {
        let attributes = attributes();
        assert_eq!(
            attributes.feature_string("flags", "color").as_deref(),
            Some("red")
        );
        assert_eq!(attributes.to_map("flags").unwrap().len(), 6);
        assert!(attributes.to_map("missing").is_none());
    }

    #[test]
    fn coercions() {
        let attributes = attributes();
        assert!(attributes.feature_boolean("flags", "enabled"));
        assert!(!attributes.feature_boolean("flags", "color"));
        assert!(!attributes.feature_boolean("missing", "enabled"));

        assert_eq!(attributes.feature_integer("flags", "size"), 3);
        assert_eq!(attributes.feature_integer("flags", "ratio"), 0);
        assert_eq!(attributes.feature_integer("flags", "limit"), -7);
        assert_eq!(attributes.feature_integer("flags", "color"), 0);

        assert_eq!(attributes.feature_double("flags", "ratio"), 0.5);
        assert_eq!(attributes.feature_double("flags", "limit"), -7.9);
        assert_eq!(attributes.feature_double("flags", "enabled"), 0.0);

        assert_eq!(
            attributes.feature_string("flags", "size").as_deref(),
            Some("3")
        );
        assert_eq!(
            attributes.feature_string("flags", "nested").as_deref(),
            Some(r#"{"a":1}"#)
        );
        assert_eq!(attributes.feature_string("flags", "absent"), None);
    }
}
