use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use slog::{debug, Logger};
use url::Url;

use crate::errors::CoreError;

/// Key under which disclosure acceptance is persisted on-device. It
/// outlives the process; once set, the disclosure step is skipped until
/// explicitly reset.
pub const DISCLOSURE_FLAG: &str = "location_disclosure_accepted";

/// Outcome of a single OS permission interaction. Denial is a value, not
/// an error; the core keeps running in degraded mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// The OS permission surface for location access.
pub trait PermissionProvider: Send + Sync {
    fn query_foreground(&self) -> BoxFuture<'static, PermissionStatus>;

    fn request_foreground(&self) -> BoxFuture<'static, PermissionStatus>;

    fn query_background(&self) -> BoxFuture<'static, PermissionStatus>;

    fn request_background(&self) -> BoxFuture<'static, PermissionStatus>;
}

/// Durable key-value storage on the device, for the disclosure flag.
pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'static, Result<Option<String>, CoreError>>;

    fn set(&self, key: &str, value: &str) -> BoxFuture<'static, Result<(), CoreError>>;

    fn remove(&self, key: &str) -> BoxFuture<'static, Result<(), CoreError>>;
}

/// Process-local permission view, refreshed from the OS and the flag store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub foreground: bool,
    pub background: bool,
    pub disclosure_accepted: bool,
}

/// What the caller may do after a tracking request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackingConsent {
    /// Background tracking granted.
    Background,
    /// Only foreground tracking; `settings` is the advisory path to the
    /// system settings screen when background was denied outright.
    Foreground { settings: Option<Url> },
    /// The compliance disclosure has not been accepted yet. Background is
    /// not requested until it has been.
    NeedsDisclosure,
    /// No location at all; the trip flow continues without tracking.
    Unavailable { settings: Option<Url> },
}

/// Sequences location consent: foreground before background, and the
/// disclosure step strictly before any background request.
pub struct PermissionNegotiator {
    logger: Arc<Logger>,
    provider: Arc<dyn PermissionProvider>,
    flags: Arc<dyn FlagStore>,
    settings_url: Option<Url>,
    state: Mutex<PermissionState>,
}

impl PermissionNegotiator {
    pub fn new(
        logger: Arc<Logger>,
        provider: Arc<dyn PermissionProvider>,
        flags: Arc<dyn FlagStore>,
        settings_url: Option<Url>,
    ) -> Self {
        PermissionNegotiator {
            logger,
            provider,
            flags,
            settings_url,
            state: Mutex::new(PermissionState::default()),
        }
    }

    /// The last observed state. `refresh` or a consent call updates it.
    pub fn state(&self) -> PermissionState {
        *self.state.lock().expect("lock permission state")
    }

    /// Re-queries the OS and the persisted disclosure flag, e.g. at screen
    /// mount or on return from the system settings.
    pub async fn refresh(&self) -> Result<PermissionState, CoreError> {
        let foreground = self.provider.query_foreground().await.is_granted();
        let background = self.provider.query_background().await.is_granted();
        let disclosure_accepted = self.disclosure_accepted().await?;

        let state = PermissionState {
            foreground,
            background,
            disclosure_accepted,
        };
        *self.state.lock().expect("lock permission state") = state;

        Ok(state)
    }

    /// Records the user's acceptance of the background-location disclosure.
    /// Durable across restarts until [`reset_disclosure`] is called.
    ///
    /// [`reset_disclosure`]: PermissionNegotiator::reset_disclosure
    pub async fn accept_disclosure(&self) -> Result<(), CoreError> {
        self.flags.set(DISCLOSURE_FLAG, "true").await?;
        self.state
            .lock()
            .expect("lock permission state")
            .disclosure_accepted = true;

        Ok(())
    }

    pub async fn reset_disclosure(&self) -> Result<(), CoreError> {
        self.flags.remove(DISCLOSURE_FLAG).await?;
        self.state
            .lock()
            .expect("lock permission state")
            .disclosure_accepted = false;

        Ok(())
    }

    /// Negotiates consent for trip tracking.
    ///
    /// Foreground is settled first; background is only ever requested once
    /// the persisted disclosure flag reads accepted, and the disclosure
    /// step is re-entered on every call until then.
    pub async fn request_tracking(&self) -> Result<TrackingConsent, CoreError> {
        let mut foreground = self.provider.query_foreground().await;

        if !foreground.is_granted() {
            foreground = self.provider.request_foreground().await;
        }

        if !foreground.is_granted() {
            self.update(|state| {
                state.foreground = false;
                state.background = false;
            });
            debug!(self.logger, "foreground location denied, tracking unavailable");

            return Ok(TrackingConsent::Unavailable {
                settings: self.settings_url.clone(),
            });
        }

        self.update(|state| state.foreground = true);

        if self.provider.query_background().await.is_granted() {
            self.update(|state| state.background = true);

            return Ok(TrackingConsent::Background);
        }

        if !self.disclosure_accepted().await? {
            debug!(self.logger, "background tracking blocked on disclosure");

            return Ok(TrackingConsent::NeedsDisclosure);
        }

        if self.provider.request_background().await.is_granted() {
            self.update(|state| state.background = true);

            Ok(TrackingConsent::Background)
        } else {
            self.update(|state| state.background = false);
            debug!(self.logger, "background location denied, staying foreground-only");

            Ok(TrackingConsent::Foreground {
                settings: self.settings_url.clone(),
            })
        }
    }

    async fn disclosure_accepted(&self) -> Result<bool, CoreError> {
        let accepted = self
            .flags
            .get(DISCLOSURE_FLAG)
            .await?
            .map(|value| value == "true")
            .unwrap_or(false);

        self.update(|state| state.disclosure_accepted = accepted);

        Ok(accepted)
    }

    fn update<F: FnOnce(&mut PermissionState)>(&self, mutate: F) {
        mutate(&mut self.state.lock().expect("lock permission state"));
    }
}
