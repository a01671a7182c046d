//! A background loader thread that downloads the rule set artifact and publishes it to a
//! [`RuleSetStore`].
//!
//! The loader starts in [`LoaderState::Bootstrapping`]. Failed downloads are retried with a
//! growing delay until the first rule set is published, after which the loader polls at the
//! regular interval and failures only keep the last good rule set. If the bootstrap retries run
//! out, local decisioning is disabled until the loader is restarted.
use std::{
    sync::{
        mpsc::{RecvTimeoutError, SyncSender},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use reqwest::{
    header::{ACCEPT, ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{
    rule_set::RuleSet, rule_set_store::RuleSetStore, ClientConfig, Error, Result,
};

/// Bootstrap attempts after the first failed download before local decisioning is disabled.
pub const MAX_RETRIES: u32 = 10;

/// Delay added per bootstrap retry: the n-th retry waits `n * RETRY_STEP`.
pub const RETRY_STEP: Duration = Duration::from_secs(10);

const ARTIFACT_FILE_NAME: &str = "rules.json";

/// Raw artifact response as seen by the loader.
#[derive(Debug, Clone, Default)]
pub struct ArtifactResponse {
    pub status: u16,
    /// Reason phrase for `status`, used in error reports.
    pub reason: String,
    pub etag: Option<String>,
    pub body: Vec<u8>,
}

/// Transport used to download the rule set artifact.
pub trait ArtifactFetcher {
    /// GET `url` with `Accept: application/json`, sending `etag` as `If-None-Match` if present.
    fn fetch(&self, url: &Url, etag: Option<&str>) -> Result<ArtifactResponse>;
}

/// The default [`ArtifactFetcher`] backed by a blocking `reqwest` client.
pub struct HttpArtifactFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
}

impl HttpArtifactFetcher {
    pub fn new(config: &ClientConfig) -> Result<HttpArtifactFetcher> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.socket_timeout)
            .build()?;
        Ok(HttpArtifactFetcher { client })
    }
}

impl ArtifactFetcher for HttpArtifactFetcher {
    fn fetch(&self, url: &Url, etag: Option<&str>) -> Result<ArtifactResponse> {
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json");
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send()?;
        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = if status == StatusCode::OK {
            response.bytes()?.to_vec()
        } else {
            Vec::new()
        };

        Ok(ArtifactResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            etag,
            body,
        })
    }
}

/// Retry state of the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// No rule set has been published yet. `retries` counts failed attempts since the last
    /// successful download.
    Bootstrapping { retries: u32 },
    /// At least one rule set has been published.
    SteadyState,
    /// Bootstrap retries are exhausted. Terminal until the loader is restarted.
    Disabled,
}

impl Default for LoaderState {
    fn default() -> Self {
        LoaderState::Bootstrapping { retries: 0 }
    }
}

impl LoaderState {
    /// State after a load attempt. `loaded` is the outcome of the attempt, `has_rules` whether a
    /// rule set has ever been published.
    pub fn next(self, loaded: bool, has_rules: bool) -> LoaderState {
        match self {
            LoaderState::Disabled => LoaderState::Disabled,
            _ if has_rules => LoaderState::SteadyState,
            LoaderState::SteadyState => LoaderState::SteadyState,
            LoaderState::Bootstrapping { .. } if loaded => LoaderState::Bootstrapping { retries: 0 },
            LoaderState::Bootstrapping { retries } if retries < MAX_RETRIES => {
                LoaderState::Bootstrapping {
                    retries: retries + 1,
                }
            }
            LoaderState::Bootstrapping { .. } => LoaderState::Disabled,
        }
    }

    /// Delay before the next load attempt, or `None` if no further attempt should be made.
    pub fn next_delay(&self, polling_interval: Duration) -> Option<Duration> {
        match *self {
            LoaderState::Bootstrapping { retries: 0 } | LoaderState::SteadyState => {
                Some(polling_interval)
            }
            LoaderState::Bootstrapping { retries } => Some(RETRY_STEP * retries),
            LoaderState::Disabled => None,
        }
    }
}

/// Artifact location for the configured client and environment, if local decisioning is enabled.
pub fn artifact_url(config: &ClientConfig) -> Result<Url> {
    let environment = config
        .local_environment
        .as_deref()
        .ok_or(Error::LocalDecisioningDisabled)?;
    let base = config.artifact_base_url.trim_end_matches('/');
    Url::parse(&format!(
        "{}/{}/{}/{}",
        base,
        config.client,
        environment.to_lowercase(),
        ARTIFACT_FILE_NAME
    ))
    .map_err(Error::InvalidBaseUrl)
}

#[derive(Debug, Default)]
struct LoaderStatus {
    state: LoaderState,
    etag: Option<String>,
    num_fetches: u64,
    last_fetch: Option<DateTime<Utc>>,
}

/// State shared between [`RuleLoader`] handles and the loader thread.
struct Shared {
    config: ClientConfig,
    store: RuleSetStore,
    status: Mutex<LoaderStatus>,
    /// Holds `None` until the first rule set is published or the loader gives up.
    first_result: (Mutex<Option<Result<()>>>, Condvar),
}

impl Shared {
    fn new(config: ClientConfig) -> Shared {
        Shared {
            config,
            store: RuleSetStore::new(),
            status: Mutex::new(LoaderStatus::default()),
            first_result: (Mutex::new(None), Condvar::new()),
        }
    }

    /// Download the artifact once and publish it if it's new. Failures are logged and reported
    /// before being returned.
    fn load(&self, fetcher: &dyn ArtifactFetcher, url: &Url) -> Result<()> {
        let result = self.try_load(fetcher, url);
        if let Err(err) = &result {
            log::warn!(target: "local_decisioning", url = url.as_str(); "failed to load local-decisioning rule set: {err}");
            self.config.report(err);
        }
        result
    }

    fn try_load(&self, fetcher: &dyn ArtifactFetcher, url: &Url) -> Result<()> {
        let etag = self.lock_status()?.etag.clone();

        log::debug!(target: "local_decisioning", url = url.as_str(); "fetching local-decisioning rule set");
        let response = fetcher.fetch(url, etag.as_deref())?;

        match response.status {
            304 => {
                log::debug!(target: "local_decisioning", "local-decisioning rule set not modified");
                self.record_fetch()?;
                Ok(())
            }
            200 => {
                let rule_set = RuleSet::from_slice(&response.body)?;
                log::debug!(target: "local_decisioning", version = rule_set.version.as_str(); "publishing local-decisioning rule set");
                self.store.set_rule_set(rule_set);
                self.lock_status()?.etag = response.etag;
                self.record_fetch()?;
                self.set_first_result(Ok(()));
                Ok(())
            }
            status => Err(Error::InvalidArtifactStatus {
                status,
                reason: response.reason,
            }),
        }
    }

    /// Advance the retry state after a load attempt and return the new state.
    fn advance(&self, loaded: bool) -> Result<LoaderState> {
        let has_rules = self.store.get_rule_set().is_some();
        let mut status = self.lock_status()?;
        status.state = status.state.next(loaded, has_rules);
        Ok(status.state)
    }

    fn record_fetch(&self) -> Result<()> {
        let mut status = self.lock_status()?;
        status.num_fetches += 1;
        status.last_fetch = Some(Utc::now());
        Ok(())
    }

    fn set_first_result(&self, value: Result<()>) {
        if let Ok(mut result) = self.first_result.0.lock() {
            if result.is_none() {
                *result = Some(value);
                self.first_result.1.notify_all();
            }
        }
    }

    fn lock_status(&self) -> Result<std::sync::MutexGuard<'_, LoaderStatus>> {
        self.status.lock().map_err(|_| Error::LoaderThreadPanicked)
    }
}

enum Command {
    Refresh,
    Stop,
}

struct LoaderThread {
    join_handle: std::thread::JoinHandle<()>,
    /// Used to send commands to the loader thread.
    command_sender: SyncSender<Command>,
}

/// Loads the rule set artifact in the background and serves the latest published rule set.
///
/// Use [`Client::start_rule_loader`](crate::Client::start_rule_loader) to start it.
pub struct RuleLoader {
    shared: Arc<Shared>,
    fetcher: Option<Arc<dyn ArtifactFetcher + Send + Sync>>,
    thread: Mutex<Option<LoaderThread>>,
}

impl RuleLoader {
    /// Create a loader that downloads the artifact over HTTP.
    pub fn new(config: ClientConfig) -> RuleLoader {
        RuleLoader {
            shared: Arc::new(Shared::new(config)),
            fetcher: None,
            thread: Mutex::new(None),
        }
    }

    /// Create a loader using a custom transport.
    pub fn with_fetcher(
        config: ClientConfig,
        fetcher: impl ArtifactFetcher + Send + Sync + 'static,
    ) -> RuleLoader {
        RuleLoader {
            shared: Arc::new(Shared::new(config)),
            fetcher: Some(Arc::new(fetcher)),
            thread: Mutex::new(None),
        }
    }

    /// Start the loader thread. The first download is issued immediately.
    ///
    /// Does nothing if the loader is already running or if no local environment is configured.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock().map_err(|_| Error::LoaderThreadPanicked)?;
        if thread.as_ref().is_some_and(|t| !t.join_handle.is_finished()) {
            return Ok(());
        }
        if !self.shared.config.is_local_decisioning_enabled() {
            log::debug!(target: "local_decisioning", "no local environment configured, not starting rule loader");
            return Ok(());
        }

        let url = artifact_url(&self.shared.config)?;
        let fetcher: Arc<dyn ArtifactFetcher + Send + Sync> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpArtifactFetcher::new(&self.shared.config)?),
        };

        {
            let mut status = self.shared.lock_status()?;
            status.state = LoaderState::default();
        }
        if let Ok(mut result) = self.shared.first_result.0.lock() {
            // Restarting after the loader gave up gets another set of bootstrap retries.
            if matches!(*result, Some(Err(_))) {
                *result = None;
            }
        }

        let (command_sender, command_receiver) = std::sync::mpsc::sync_channel::<Command>(1);
        let shared = Arc::clone(&self.shared);
        let polling_interval = shared.config.effective_polling_interval();

        let join_handle = std::thread::Builder::new()
            .name("local-decisioning-rule-loader".to_owned())
            .spawn(move || {
                let mut delay = Duration::ZERO;
                loop {
                    match command_receiver.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) | Ok(Command::Refresh) => {}
                        Ok(Command::Stop) => {
                            log::debug!(target: "local_decisioning", "rule loader thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The loader handle is gone, nobody can read published rules anymore.
                            return;
                        }
                    }

                    let loaded = shared.load(&*fetcher, &url).is_ok();
                    let state = match shared.advance(loaded) {
                        Ok(state) => state,
                        Err(err) => {
                            shared.set_first_result(Err(err));
                            return;
                        }
                    };
                    match state.next_delay(polling_interval) {
                        Some(next) => {
                            if let LoaderState::Bootstrapping { retries } = state {
                                if retries > 0 {
                                    log::debug!(target: "local_decisioning", "download of local-decisioning rules failed, retrying in {next:?}");
                                }
                            }
                            delay = next;
                        }
                        None => {
                            log::warn!(target: "local_decisioning", "exhausted retries trying to download local-decisioning rules, local decisioning disabled");
                            shared.set_first_result(Err(Error::LocalDecisioningDisabled));
                            return;
                        }
                    }
                }
            })?;

        *thread = Some(LoaderThread {
            join_handle,
            command_sender,
        });
        Ok(())
    }

    /// Stop the loader thread. Already published rules stay available, and callers blocked in
    /// [`RuleLoader::wait_for_rules`] before any rules were published get
    /// [`Error::LocalDecisioningDisabled`].
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        if let Ok(mut thread) = self.thread.lock() {
            if let Some(thread) = thread.take() {
                // Error means that the receiver was dropped (thread exited). Nothing to do.
                let _ = thread.command_sender.try_send(Command::Stop);
            }
        }
        self.shared.set_first_result(Err(Error::LocalDecisioningDisabled));
    }

    /// Stop the loader thread and block waiting for it to exit.
    pub fn shutdown(&self) -> Result<()> {
        let thread = self
            .thread
            .lock()
            .map_err(|_| Error::LoaderThreadPanicked)?
            .take();
        self.shared.set_first_result(Err(Error::LocalDecisioningDisabled));
        if let Some(thread) = thread {
            let _ = thread.command_sender.send(Command::Stop);
            thread
                .join_handle
                .join()
                .map_err(|_| Error::LoaderThreadPanicked)?;
        }
        Ok(())
    }

    /// Ask the running loader thread to download the artifact now. The regular schedule restarts
    /// from this download.
    pub fn refresh(&self) {
        if let Ok(thread) = self.thread.lock() {
            if let Some(thread) = thread.as_ref() {
                // A full channel means a command is already pending.
                let _ = thread.command_sender.try_send(Command::Refresh);
            }
        }
    }

    /// The most recently published rule set. Never blocks on network I/O.
    pub fn latest_rules(&self) -> Option<Arc<RuleSet>> {
        self.shared.store.get_rule_set()
    }

    /// Block waiting for the first rule set to get published.
    ///
    /// Returns [`Error::LocalDecisioningDisabled`] if no local environment is configured, the
    /// bootstrap retries were exhausted, or the loader is not running and has published nothing.
    pub fn wait_for_rules(&self) -> Result<()> {
        if !self.shared.config.is_local_decisioning_enabled() {
            return Err(Error::LocalDecisioningDisabled);
        }

        // Thread lock is released before waiting so that `stop()` can get through.
        let running = self
            .thread
            .lock()
            .map_err(|_| Error::LoaderThreadPanicked)?
            .as_ref()
            .is_some_and(|t| !t.join_handle.is_finished());

        let (lock, condvar) = &self.shared.first_result;
        let mut result = lock.lock().map_err(|_| Error::LoaderThreadPanicked)?;
        if result.is_none() && !running {
            return Err(Error::LocalDecisioningDisabled);
        }
        loop {
            match &*result {
                Some(result) => return result.clone(),
                None => {
                    result = condvar
                        .wait(result)
                        .map_err(|_| Error::LoaderThreadPanicked)?;
                }
            }
        }
    }

    /// Current retry state.
    pub fn state(&self) -> LoaderState {
        self.shared
            .lock_status()
            .map(|status| status.state)
            .unwrap_or(LoaderState::Disabled)
    }

    /// `true` if rules can never be loaded by this loader in its current run.
    pub fn is_disabled(&self) -> bool {
        !self.shared.config.is_local_decisioning_enabled() || self.state() == LoaderState::Disabled
    }

    /// Effective polling interval.
    pub fn polling_interval(&self) -> Duration {
        self.shared.config.effective_polling_interval()
    }

    /// Number of successful downloads, counting "not modified" answers.
    pub fn num_fetches(&self) -> u64 {
        self.shared
            .lock_status()
            .map(|status| status.num_fetches)
            .unwrap_or_default()
    }

    /// Time of the last successful download.
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.shared.lock_status().ok()?.last_fetch
    }

    /// Artifact location, if local decisioning is configured.
    pub fn location(&self) -> Option<Url> {
        artifact_url(&self.shared.config).ok()
    }
}

impl Drop for RuleLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use reqwest::Url;

    use super::{
        artifact_url, ArtifactFetcher, ArtifactResponse, LoaderState, RuleLoader, Shared,
        MAX_RETRIES, RETRY_STEP,
    };
    use crate::{ClientConfig, Error, Result};

    /// Fetcher answering from a script. Records the ETag sent with every request.
    #[derive(Default)]
    pub(crate) struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<ArtifactResponse>>>,
        pub(crate) sent_etags: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(responses: impl IntoIterator<Item = Result<ArtifactResponse>>) -> Self {
            ScriptedFetcher {
                responses: Mutex::new(responses.into_iter().collect()),
                sent_etags: Mutex::default(),
            }
        }
    }

    impl ArtifactFetcher for ScriptedFetcher {
        fn fetch(&self, _url: &Url, etag: Option<&str>) -> Result<ArtifactResponse> {
            self.sent_etags.lock().unwrap().push(etag.map(str::to_owned));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(not_modified()))
        }
    }

    impl<T: ArtifactFetcher> ArtifactFetcher for Arc<T> {
        fn fetch(&self, url: &Url, etag: Option<&str>) -> Result<ArtifactResponse> {
            (**self).fetch(url, etag)
        }
    }

    pub(crate) fn fixture_body() -> Vec<u8> {
        std::fs::read("tests/data/rules.json").expect("Failed to read tests/data/rules.json")
    }

    pub(crate) fn ok(body: Vec<u8>, etag: &str) -> ArtifactResponse {
        ArtifactResponse {
            status: 200,
            reason: "OK".to_owned(),
            etag: Some(etag.to_owned()),
            body,
        }
    }

    pub(crate) fn not_modified() -> ArtifactResponse {
        ArtifactResponse {
            status: 304,
            reason: "Not Modified".to_owned(),
            ..Default::default()
        }
    }

    fn config(reported: &Arc<Mutex<Vec<String>>>) -> ClientConfig {
        let reported = Arc::clone(reported);
        ClientConfig::from_client_code("acme")
            .local_environment("Production")
            .exception_handler(move |err: &Error| reported.lock().unwrap().push(err.to_string()))
    }

    fn url() -> Url {
        Url::parse("https://assets.example.com/acme/production/rules.json").unwrap()
    }

    #[test]
    fn artifact_url_lower_cases_environment() {
        let url = artifact_url(
            &ClientConfig::from_client_code("acme")
                .local_environment("Production")
                .artifact_base_url("https://cdn.example.com/"),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cdn.example.com/acme/production/rules.json"
        );

        assert!(matches!(
            artifact_url(&ClientConfig::from_client_code("acme")),
            Err(Error::LocalDecisioningDisabled)
        ));
        assert!(matches!(
            artifact_url(
                &ClientConfig::from_client_code("acme")
                    .local_environment("production")
                    .artifact_base_url("not a base url")
            ),
            Err(Error::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn not_modified_keeps_same_rule_set() {
        let reported = Arc::default();
        let shared = Shared::new(config(&reported));
        let fetcher = ScriptedFetcher::new([Ok(ok(fixture_body(), "\"v1\"")), Ok(not_modified())]);

        shared.load(&fetcher, &url()).unwrap();
        let before = shared.store.get_rule_set().unwrap();

        shared.load(&fetcher, &url()).unwrap();
        let after = shared.store.get_rule_set().unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(
            *fetcher.sent_etags.lock().unwrap(),
            vec![None, Some("\"v1\"".to_owned())]
        );
        assert_eq!(shared.status.lock().unwrap().num_fetches, 2);
        assert!(reported.lock().unwrap().is_empty());
    }

    #[test]
    fn unsupported_version_keeps_prior_rule_set() {
        let reported: Arc<Mutex<Vec<String>>> = Arc::default();
        let shared = Shared::new(config(&reported));
        let fetcher = ScriptedFetcher::new([
            Ok(ok(fixture_body(), "\"v1\"")),
            Ok(ok(
                br#"{"version": "2.0.0", "rules": {"mboxes": {}, "views": {}}}"#.to_vec(),
                "\"v2\"",
            )),
        ]);

        shared.load(&fetcher, &url()).unwrap();
        let before = shared.store.get_rule_set().unwrap();

        let result = shared.load(&fetcher, &url());
        assert!(matches!(result, Err(Error::UnsupportedArtifactVersion(v)) if v == "2.0.0"));

        let after = shared.store.get_rule_set().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        // ETag of the rejected artifact is not kept.
        assert_eq!(
            shared.status.lock().unwrap().etag.as_deref(),
            Some("\"v1\"")
        );
        assert_eq!(
            *reported.lock().unwrap(),
            vec!["unknown rules version: 2.0.0".to_owned()]
        );
    }

    #[test]
    fn unsupported_version_without_prior_rule_set() {
        let reported = Arc::default();
        let shared = Shared::new(config(&reported));
        let fetcher = ScriptedFetcher::new([Ok(ok(
            br#"{"version": "0.9", "rules": {"mboxes": {}, "views": {}}}"#.to_vec(),
            "\"v0\"",
        ))]);

        assert!(shared.load(&fetcher, &url()).is_err());
        assert!(shared.store.get_rule_set().is_none());
        assert_eq!(shared.status.lock().unwrap().num_fetches, 0);
    }

    #[test]
    fn bad_status_is_reported() {
        let reported: Arc<Mutex<Vec<String>>> = Arc::default();
        let shared = Shared::new(config(&reported));
        let fetcher = ScriptedFetcher::new([Ok(ArtifactResponse {
            status: 403,
            reason: "Forbidden".to_owned(),
            ..Default::default()
        })]);

        let result = shared.load(&fetcher, &url());
        assert!(matches!(
            result,
            Err(Error::InvalidArtifactStatus { status: 403, .. })
        ));
        assert!(shared.store.get_rule_set().is_none());
        assert_eq!(reported.lock().unwrap().len(), 1);
        assert!(reported.lock().unwrap()[0].contains("403 : Forbidden"));
    }

    #[test]
    fn bootstrap_retries_back_off_then_disable() {
        let interval = Duration::from_secs(300);
        let mut state = LoaderState::default();
        assert_eq!(state.next_delay(interval), Some(interval));

        for attempt in 1..=MAX_RETRIES {
            state = state.next(false, false);
            assert_eq!(state, LoaderState::Bootstrapping { retries: attempt });
            assert_eq!(state.next_delay(interval), Some(RETRY_STEP * attempt));
        }

        state = state.next(false, false);
        assert_eq!(state, LoaderState::Disabled);
        assert_eq!(state.next_delay(interval), None);
        // Terminal.
        assert_eq!(state.next(true, true), LoaderState::Disabled);
    }

    #[test]
    fn failures_after_publish_keep_regular_schedule() {
        let interval = Duration::from_secs(300);
        let state = LoaderState::Bootstrapping { retries: 3 }.next(true, true);
        assert_eq!(state, LoaderState::SteadyState);

        let state = state.next(false, true);
        assert_eq!(state, LoaderState::SteadyState);
        assert_eq!(state.next_delay(interval), Some(interval));
    }

    #[test]
    fn loader_thread_publishes_rules() {
        let reported = Arc::default();
        let fetcher = Arc::new(ScriptedFetcher::new([Ok(ok(fixture_body(), "\"v1\""))]));
        let loader = RuleLoader::with_fetcher(config(&reported), Arc::clone(&fetcher));
        assert!(loader.latest_rules().is_none());

        loader.start().unwrap();
        // Second start is a no-op.
        loader.start().unwrap();
        loader.wait_for_rules().unwrap();

        let rules = loader.latest_rules().unwrap();
        assert!(rules.version.starts_with("1."));
        assert_eq!(loader.state(), LoaderState::SteadyState);
        assert_eq!(loader.num_fetches(), 1);
        assert!(loader.last_fetch().is_some());
        assert_eq!(loader.polling_interval(), ClientConfig::MIN_POLLING_INTERVAL);
        assert_eq!(
            loader.location().unwrap().as_str(),
            "https://assets.adobetarget.com/acme/production/rules.json"
        );

        loader.shutdown().unwrap();
        assert_eq!(fetcher.sent_etags.lock().unwrap().len(), 1);
        // Rules survive stopping the loader.
        assert!(loader.latest_rules().is_some());
    }

    fn server_error() -> ArtifactResponse {
        ArtifactResponse {
            status: 500,
            reason: "Internal Server Error".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn wait_for_rules_before_start_does_not_block() {
        let reported = Arc::default();
        let loader = RuleLoader::with_fetcher(config(&reported), ScriptedFetcher::default());

        assert!(matches!(
            loader.wait_for_rules(),
            Err(Error::LocalDecisioningDisabled)
        ));
    }

    #[test]
    fn stopping_bootstrapping_loader_releases_waiters() {
        let _ = env_logger::builder().is_test(true).try_init();

        let reported: Arc<Mutex<Vec<String>>> = Arc::default();
        let fetcher = Arc::new(ScriptedFetcher::new([Ok(server_error())]));
        let loader = Arc::new(RuleLoader::with_fetcher(
            config(&reported),
            Arc::clone(&fetcher),
        ));
        loader.start().unwrap();

        let waiter = {
            let loader = Arc::clone(&loader);
            std::thread::spawn(move || loader.wait_for_rules())
        };
        // The first download fails, so the loader sits in its first retry delay.
        while fetcher.sent_etags.lock().unwrap().is_empty() {
            std::thread::sleep(Duration::from_millis(5));
        }

        loader.shutdown().unwrap();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(Error::LocalDecisioningDisabled)
        ));
        assert!(matches!(
            loader.wait_for_rules(),
            Err(Error::LocalDecisioningDisabled)
        ));
        assert!(loader.latest_rules().is_none());
    }

    #[test]
    fn restart_after_stop_waits_for_new_run() {
        let reported = Arc::default();
        let fetcher = Arc::new(ScriptedFetcher::new([Ok(ok(fixture_body(), "\"v1\""))]));
        let loader = RuleLoader::with_fetcher(config(&reported), Arc::clone(&fetcher));

        loader.stop();
        assert!(loader.wait_for_rules().is_err());

        loader.start().unwrap();
        loader.wait_for_rules().unwrap();
        loader.shutdown().unwrap();
        // Rules published before stopping keep `wait_for_rules` successful.
        loader.wait_for_rules().unwrap();
    }

    #[test]
    fn loader_without_environment_never_starts() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let loader =
            RuleLoader::with_fetcher(ClientConfig::from_client_code("acme"), Arc::clone(&fetcher));

        loader.start().unwrap();
        assert!(loader.is_disabled());
        assert!(matches!(
            loader.wait_for_rules(),
            Err(Error::LocalDecisioningDisabled)
        ));
        loader.shutdown().unwrap();
        assert!(fetcher.sent_etags.lock().unwrap().is_empty());
    }
}
