use crate::delivery::Geo;

/// Resolves an IP address into geo fields.
///
/// Only consulted when the active rule set enables geo targeting and the request carries an IP
/// address without any resolved location. The engine calls it at most once per request.
pub trait GeoClient {
    /// Look up `ip_address`. Returning `None` leaves the geo context empty.
    fn lookup_geo(&self, ip_address: &str) -> Option<Geo>;
}

pub(crate) struct NoopGeoClient;
impl GeoClient for NoopGeoClient {
    fn lookup_geo(&self, _ip_address: &str) -> Option<Geo> {
        None
    }
}

impl<T: Fn(&str) -> Option<Geo>> GeoClient for T {
    fn lookup_geo(&self, ip_address: &str) -> Option<Geo> {
        self(ip_address)
    }
}
