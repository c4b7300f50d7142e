use serde::Deserialize;
use uuid::Uuid;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::errors::CoreError;
use crate::trip::TripPatch;

/// What happened to the watched record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One inbound change event: the kind plus partial before/after snapshots,
/// in the order the store committed them. No reordering happens on this
/// side; out-of-order delivery is the transport's failure to fix.
#[derive(Clone, Debug, Deserialize)]
pub struct TripChange {
    pub kind: ChangeKind,
    #[serde(default, rename = "new")]
    pub new_record: Option<TripPatch>,
    #[serde(default, rename = "old")]
    pub old_record: Option<TripPatch>,
}

impl TripChange {
    /// Whether this change touches the given trip.
    pub fn concerns(&self, trip_id: &Uuid) -> bool {
        let matches_id = |patch: &Option<TripPatch>| {
            patch
                .as_ref()
                .and_then(|p| p.id.as_ref())
                .map(|id| id == trip_id)
                .unwrap_or(false)
        };

        matches_id(&self.new_record) || matches_id(&self.old_record)
    }
}

/// The external change notification channel, filtered per trip by the
/// subscriber. Dropping the stream is the unsubscribe.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(
        &self,
        trip_id: &Uuid,
    ) -> BoxFuture<'static, Result<BoxStream<'static, TripChange>, CoreError>>;
}

pub use self::postgres::*;

mod postgres {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use futures::stream;
    use futures::{FutureExt, StreamExt};
    use slog::{debug, error, Logger};
    use sqlx::postgres::{PgListener, PgPool};
    use uuid::Uuid;

    use super::TripChange;
    use crate::errors::CoreError;

    /// The `NOTIFY` channel the trigger on `trips` publishes to.
    const TRIPS_CHANNEL: &str = "tripflow_trips";

    /// Change feed over Postgres `LISTEN`/`NOTIFY`. The payload is the JSON
    /// the `trips` trigger builds; malformed payloads and other trips'
    /// changes are skipped, not surfaced.
    pub struct PgChangeFeed {
        logger: Arc<Logger>,
        pool: PgPool,
    }

    impl PgChangeFeed {
        pub fn new(logger: Arc<Logger>, pool: PgPool) -> Self {
            PgChangeFeed { logger, pool }
        }
    }

    impl super::ChangeFeed for PgChangeFeed {
        fn subscribe(
            &self,
            trip_id: &Uuid,
        ) -> BoxFuture<'static, Result<futures::stream::BoxStream<'static, TripChange>, CoreError>>
        {
            let logger = self.logger.clone();
            let pool = self.pool.clone();
            let trip_id = *trip_id;

            async move {
                let mut listener = PgListener::connect_with(&pool)
                    .await
                    .map_err(|source| CoreError::Sqlx { source })?;
                listener
                    .listen(TRIPS_CHANNEL)
                    .await
                    .map_err(|source| CoreError::Sqlx { source })?;

                let stream = stream::unfold(listener, move |mut listener| {
                    let logger = logger.clone();

                    async move {
                        loop {
                            let notification = match listener.recv().await {
                                Ok(notification) => notification,
                                Err(e) => {
                                    error!(logger, "change feed connection lost";
                                           "error" => format!("{:?}", e));

                                    return None;
                                }
                            };

                            match serde_json::from_str::<TripChange>(notification.payload()) {
                                Ok(change) if change.concerns(&trip_id) => {
                                    return Some((change, listener));
                                }
                                Ok(_) => continue,
                                Err(e) => {
                                    debug!(logger, "skipping malformed change payload";
                                           "error" => format!("{}", e));

                                    continue;
                                }
                            }
                        }
                    }
                });

                Ok(stream.boxed())
            }
            .boxed()
        }
    }
}
