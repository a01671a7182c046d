use std::{sync::Arc, time::Duration};

use crate::{
    exception_handler::NoopExceptionHandler, geo::NoopGeoClient, Client, ExceptionHandler,
    GeoClient,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use local_decisioning::ClientConfig;
/// let client = ClientConfig::from_client_code("acme")
///     .local_environment("production")
///     .exception_handler(|err: &local_decisioning::Error| {
///         eprintln!("local decisioning: {err}");
///     })
///     .to_client();
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) client: String,
    pub(crate) local_environment: Option<String>,
    pub(crate) polling_interval: Duration,
    pub(crate) artifact_base_url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) socket_timeout: Duration,
    pub(crate) exception_handler: Arc<dyn ExceptionHandler + Send + Sync>,
    pub(crate) geo_client: Arc<dyn GeoClient + Send + Sync>,
}

impl ClientConfig {
    /// Default base URL the rule set artifact is downloaded from.
    pub const DEFAULT_ARTIFACT_BASE_URL: &'static str = "https://assets.adobetarget.com";

    /// Rule sets are never polled more often than this, whatever
    /// [`ClientConfig::polling_interval`] says.
    pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// Default connect timeout for artifact downloads.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default socket (read) timeout for artifact downloads.
    pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a default configuration for the specified client code.
    ///
    /// Local decisioning stays disabled until a [local
    /// environment](ClientConfig::local_environment) is set.
    ///
    /// ```
    /// # use local_decisioning::ClientConfig;
    /// ClientConfig::from_client_code("acme");
    /// ```
    pub fn from_client_code(client: impl Into<String>) -> Self {
        ClientConfig {
            client: client.into(),
            local_environment: None,
            polling_interval: ClientConfig::MIN_POLLING_INTERVAL,
            artifact_base_url: ClientConfig::DEFAULT_ARTIFACT_BASE_URL.to_owned(),
            connect_timeout: ClientConfig::DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: ClientConfig::DEFAULT_SOCKET_TIMEOUT,
            exception_handler: Arc::new(NoopExceptionHandler),
            geo_client: Arc::new(NoopGeoClient),
        }
    }

    /// Enable local decisioning against the rule set published for `environment`.
    pub fn local_environment(mut self, environment: impl Into<String>) -> Self {
        self.local_environment = Some(environment.into());
        self
    }

    /// Set the rule set polling interval. Values below
    /// [`ClientConfig::MIN_POLLING_INTERVAL`] are raised to the minimum.
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Override base URL for artifact downloads. Clients should use the default setting in most
    /// cases.
    pub fn artifact_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.artifact_base_url = base_url.into();
        self
    }

    /// Set the connect timeout used for artifact downloads.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket timeout used for artifact downloads.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set the handler receiving errors the engine recovered from.
    ///
    /// ```
    /// # use local_decisioning::ClientConfig;
    /// let config = ClientConfig::from_client_code("acme").exception_handler(|err: &local_decisioning::Error| {
    ///     println!("{:?}", err);
    /// });
    /// ```
    pub fn exception_handler(
        mut self,
        exception_handler: impl ExceptionHandler + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Arc::new(exception_handler);
        self
    }

    /// Set the geo client used to resolve IP addresses when the rule set enables geo targeting.
    pub fn geo_client(mut self, geo_client: impl GeoClient + Send + Sync + 'static) -> Self {
        self.geo_client = Arc::new(geo_client);
        self
    }

    /// Client code this configuration belongs to.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Effective polling interval.
    pub fn effective_polling_interval(&self) -> Duration {
        std::cmp::max(ClientConfig::MIN_POLLING_INTERVAL, self.polling_interval)
    }

    /// Returns `true` if a local environment is configured.
    pub fn is_local_decisioning_enabled(&self) -> bool {
        self.local_environment.is_some()
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use local_decisioning::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_client_code("acme").to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }

    pub(crate) fn report(&self, error: &crate::Error) {
        self.exception_handler.handle_exception(error);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;

    #[test]
    fn polling_interval_never_drops_below_minimum() {
        let config =
            ClientConfig::from_client_code("acme").polling_interval(Duration::from_secs(10));
        assert_eq!(
            config.effective_polling_interval(),
            ClientConfig::MIN_POLLING_INTERVAL
        );

        let config =
            ClientConfig::from_client_code("acme").polling_interval(Duration::from_secs(600));
        assert_eq!(config.effective_polling_interval(), Duration::from_secs(600));
    }

    #[test]
    fn local_decisioning_requires_environment() {
        assert!(!ClientConfig::from_client_code("acme").is_local_decisioning_enabled());
        assert!(ClientConfig::from_client_code("acme")
            .local_environment("production")
            .is_local_decisioning_enabled());
    }
}
