use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use url::Url;
use uuid::Uuid;

use crate::config::get_variable;
use crate::controller::TripPhaseController;
use crate::db::TripDb;
use crate::feed::ChangeFeed;
use crate::geo::Locator;
use crate::notify::{Announcer, Notifier};
use crate::permissions::{FlagStore, PermissionNegotiator, PermissionProvider};
use crate::reporter::{LocationReporter, ReporterConfig};

/// Everything a trip screen needs, wired once at startup and cloned into
/// each component. All collaborators are trait objects, so a test can swap
/// any of them without touching the rest.
#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn TripDb + Send + Sync>,
    pub feed: Arc<dyn ChangeFeed>,
    pub locator: Arc<dyn Locator>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub flags: Arc<dyn FlagStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
}

impl Environment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn TripDb + Send + Sync>,
        feed: Arc<dyn ChangeFeed>,
        locator: Arc<dyn Locator>,
        permissions: Arc<dyn PermissionProvider>,
        flags: Arc<dyn FlagStore>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            logger,
            db,
            feed,
            locator,
            permissions,
            flags,
            notifier,
            config,
        }
    }

    pub fn controller(&self, driver_id: Uuid) -> TripPhaseController {
        TripPhaseController::new(self.logger.clone(), self.db.clone(), driver_id)
    }

    pub fn reporter(&self) -> LocationReporter {
        LocationReporter::new(
            self.logger.clone(),
            self.db.clone(),
            self.locator.clone(),
            ReporterConfig {
                min_interval: self.config.sample_interval,
                min_displacement_meters: self.config.sample_displacement_meters,
            },
        )
    }

    pub fn negotiator(&self) -> PermissionNegotiator {
        PermissionNegotiator::new(
            self.logger.clone(),
            self.permissions.clone(),
            self.flags.clone(),
            self.config.settings_url.clone(),
        )
    }

    pub fn announcer(&self) -> Announcer {
        Announcer::new(
            self.logger.clone(),
            self.notifier.clone(),
            self.config.app_scope.clone(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub sample_interval: Duration,
    pub sample_displacement_meters: f64,
    pub app_scope: String,
    pub settings_url: Option<Url>,
}

impl Config {
    /// Reads the configuration from `TRIPFLOW_*` environment variables.
    /// Panics on missing or unparseable values, like the rest of startup.
    pub fn from_env() -> Self {
        let sample_interval = Duration::from_secs(
            get_variable("TRIPFLOW_SAMPLE_INTERVAL_SECONDS")
                .parse()
                .expect("TRIPFLOW_SAMPLE_INTERVAL_SECONDS must be a number of seconds"),
        );
        let sample_displacement_meters = get_variable("TRIPFLOW_SAMPLE_DISPLACEMENT_METERS")
            .parse()
            .expect("TRIPFLOW_SAMPLE_DISPLACEMENT_METERS must be a number of meters");
        let app_scope = get_variable("TRIPFLOW_APP_SCOPE");
        let settings_url = std::env::var("TRIPFLOW_SETTINGS_URL")
            .ok()
            .map(|value| Url::parse(&value).expect("TRIPFLOW_SETTINGS_URL must be a valid URL"));

        Self {
            sample_interval,
            sample_displacement_meters,
            app_scope,
            settings_url,
        }
    }
}
