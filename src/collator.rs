//! Collators extract the flat parameter maps rule conditions are evaluated against.
//!
//! Every collator is a pure function of the request (and, for time, of the current instant). The
//! output maps become the `user`, `page`, `referring`, `mbox` and `geo` objects of the evaluation
//! context, while time parameters sit at its top level.
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use url::Url;

use crate::delivery::{Address, DeliveryRequest, Geo, RequestDetails};

pub type Params = Map<String, Value>;

const LOWER_CASE_POSTFIX: &str = "_lc";

/// `current_timestamp` (milliseconds), `current_day` (ISO weekday, `1` is Monday) and
/// `current_time` (`HHmm`), all in UTC.
pub fn time_params(now: DateTime<Utc>) -> Params {
    let mut params = Params::new();
    params.insert("current_timestamp".into(), now.timestamp_millis().into());
    params.insert("current_day".into(), now.format("%u").to_string().into());
    params.insert("current_time".into(), now.format("%H%M").to_string().into());
    params
}

/// Browser and platform derived from the request's user agent.
pub fn user_params(request: &DeliveryRequest) -> Params {
    let mut params = Params::new();
    let Some(user_agent) = request
        .context
        .as_ref()
        .and_then(|context| context.user_agent.as_deref())
    else {
        return params;
    };

    let (browser_type, browser_version) = browser_from_user_agent(user_agent);
    params.insert("browserType".into(), browser_type.into());
    params.insert("platform".into(), platform_from_user_agent(user_agent).into());
    if let Some(version) = browser_version {
        params.insert("browserVersion".into(), version.into());
    }
    params
}

/// Parts of the current page url (or of the referring url if `referring` is set).
///
/// The item's own address takes precedence over the request-level one.
pub fn page_params(request: &DeliveryRequest, details: RequestDetails, referring: bool) -> Params {
    let address: Option<&Address> = details.address().or_else(|| request.address());
    let url = address.and_then(|address| {
        if referring {
            address.referring_url.as_deref()
        } else {
            address.url.as_deref()
        }
    });

    let mut params = Params::new();
    if let Some(url) = url.filter(|url| !url.is_empty()) {
        insert_with_lower_case(&mut params, "url", url);
        if let Ok(parsed) = Url::parse(url) {
            add_url_parts(&mut params, &parsed);
        }
    }
    params
}

fn add_url_parts(params: &mut Params, url: &Url) {
    if let Some(host) = url.host_str() {
        insert_with_lower_case(params, "domain", host);
        let (subdomain, top_level_domain) = split_host(host);
        insert_with_lower_case(params, "subdomain", subdomain);
        insert_with_lower_case(params, "topLevelDomain", top_level_domain);
    }
    insert_with_lower_case(params, "path", url.path());
    insert_with_lower_case(params, "query", url.query().unwrap_or_default());
    insert_with_lower_case(params, "fragment", url.fragment().unwrap_or_default());
}

/// Split a host into subdomain and top level domain. Public suffixes are not consulted: the top
/// level domain is the last label and the subdomain is everything in front of the registrable
/// name, minus a leading `www`.
fn split_host(host: &str) -> (&str, &str) {
    let labels = host.split('.').count();
    if labels < 2 || host.parse::<std::net::IpAddr>().is_ok() {
        return ("", "");
    }

    let top_level_domain = host.rsplit('.').next().unwrap_or_default();
    let subdomain = if labels > 2 {
        // Byte offset of the registrable name (second to last label).
        let mut cut = host.len();
        for _ in 0..2 {
            cut = host[..cut].rfind('.').unwrap_or(0);
        }
        let subdomain = &host[..cut];
        match subdomain.strip_prefix("www") {
            Some("") => "",
            Some(rest) if rest.starts_with('.') => &rest[1..],
            _ => subdomain,
        }
    } else {
        ""
    };
    (subdomain, top_level_domain)
}

/// Custom parameters of the request item, each with a lower-cased `_lc` twin.
pub fn custom_params(details: RequestDetails) -> Params {
    let mut params = Params::new();
    for (key, value) in details.parameters() {
        insert_with_lower_case(&mut params, key, value);
    }
    params
}

/// Resolved geo fields.
pub fn geo_params(geo: &Geo) -> Params {
    let mut params = Params::new();
    let strings = [
        ("country", &geo.country_code),
        ("region", &geo.state_code),
        ("city", &geo.city),
    ];
    for (key, value) in strings {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            params.insert(key.into(), value.into());
        }
    }
    if let Some(latitude) = geo.latitude {
        params.insert("latitude".into(), latitude.into());
    }
    if let Some(longitude) = geo.longitude {
        params.insert("longitude".into(), longitude.into());
    }
    params
}

fn insert_with_lower_case(params: &mut Params, key: &str, value: &str) {
    params.insert(key.to_owned(), value.into());
    params.insert(
        format!("{key}{LOWER_CASE_POSTFIX}"),
        value.to_lowercase().into(),
    );
}

fn browser_from_user_agent(user_agent: &str) -> (&'static str, Option<String>) {
    // Order matters: Edge and Opera user agents also claim to be Chrome, Chrome claims to be
    // Safari.
    const BROWSERS: &[(&str, &str)] = &[
        ("Edg/", "edge"),
        ("Edge/", "edge"),
        ("OPR/", "opera"),
        ("Opera/", "opera"),
        ("Firefox/", "firefox"),
        ("FxiOS/", "firefox"),
        ("CriOS/", "chrome"),
        ("Chrome/", "chrome"),
        ("MSIE ", "ie"),
        ("Trident/", "ie"),
        ("Version/", "safari"),
    ];

    for (marker, browser) in BROWSERS {
        if let Some(start) = user_agent.find(marker) {
            let version = if *marker == "Trident/" {
                user_agent
                    .find("rv:")
                    .map(|rv| major_version(&user_agent[rv + 3..]))
            } else {
                Some(major_version(&user_agent[start + marker.len()..]))
            };
            if *browser == "safari" && !user_agent.contains("Safari/") {
                continue;
            }
            return (*browser, version.filter(|v| !v.is_empty()));
        }
    }
    ("unknown", None)
}

fn major_version(rest: &str) -> String {
    rest.chars().take_while(char::is_ascii_digit).collect()
}

fn platform_from_user_agent(user_agent: &str) -> &'static str {
    if user_agent.contains("Android") {
        "android"
    } else if user_agent.contains("iPhone")
        || user_agent.contains("iPad")
        || user_agent.contains("iPod")
    {
        "ios"
    } else if user_agent.contains("Windows") {
        "windows"
    } else if user_agent.contains("Mac OS") || user_agent.contains("Macintosh") {
        "mac"
    } else if user_agent.contains("Linux") || user_agent.contains("X11") {
        "linux"
    } else {
        "unknown"
    }
}
