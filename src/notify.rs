use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use slog::{error, Logger};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::events::PhaseEvent;
use crate::trip::Trip;

/// One notification to hand to the external dispatch. Delivery (push
/// tokens, channels) is the dispatch's concern, not this crate's.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub target_user_id: Uuid,
    pub app_scope: String,
    pub kind: &'static str,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

/// The external notification dispatch. Futures are `'static` so sends can
/// be spawned fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: Outbound) -> BoxFuture<'static, Result<(), CoreError>>;
}

/// Maps phase events to recipients and fires the sends.
///
/// The plan is pure and separately testable; `announce` spawns each send
/// and only ever logs a failure. Notifications are best-effort, never
/// transactional with the transition that produced them.
pub struct Announcer {
    logger: Arc<Logger>,
    notifier: Arc<dyn Notifier>,
    app_scope: String,
}

impl Announcer {
    pub fn new(logger: Arc<Logger>, notifier: Arc<dyn Notifier>, app_scope: String) -> Self {
        Announcer {
            logger,
            notifier,
            app_scope,
        }
    }

    /// The recipient plan for one event: the dispatcher always hears about
    /// it; the facility contact cares about pickup arrival and completion;
    /// the rider cares about movement on their own trip.
    pub fn plan(&self, trip: &Trip, event: PhaseEvent) -> Vec<Outbound> {
        let mut targets: Vec<Uuid> = Vec::new();
        let mut push = |target: Option<Uuid>| {
            if let Some(target) = target {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        };

        push(trip.dispatcher_id);

        match event {
            PhaseEvent::Accepted | PhaseEvent::Rejected => {}
            PhaseEvent::Started | PhaseEvent::RideStarted => push(trip.rider_id),
            PhaseEvent::ArrivedAtPickup | PhaseEvent::Completed => {
                push(trip.facility_contact_id);
                push(trip.rider_id);
            }
        }

        targets
            .into_iter()
            .map(|target_user_id| Outbound {
                target_user_id,
                app_scope: self.app_scope.clone(),
                kind: event.kind(),
                title: event.title().to_owned(),
                body: format!(
                    "{}: {} to {}",
                    event.title(),
                    trip.pickup_address,
                    trip.destination_address
                ),
                payload: json!({
                    "trip_id": trip.id,
                    "event": event,
                    "trip_phase": trip.phase.as_str(),
                }),
            })
            .collect()
    }

    /// Fires every planned send without waiting on any of them.
    pub fn announce(&self, trip: &Trip, event: PhaseEvent) {
        for message in self.plan(trip, event) {
            let logger = self.logger.clone();
            let target = message.target_user_id;
            let send = self.notifier.notify(message);

            tokio::spawn(async move {
                if let Err(e) = send.await {
                    error!(logger, "failed to send notification";
                           "target" => target.to_string(),
                           "error" => format!("{:?}", e));
                }
            });
        }
    }
}

pub use self::postgres::*;

mod postgres {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::postgres::PgPool;

    use super::Outbound;
    use crate::errors::CoreError;

    /// Dispatch backed by the `notifications` relation; an external worker
    /// drains it against `push_tokens`.
    pub struct PgNotifier {
        pool: PgPool,
    }

    impl PgNotifier {
        pub fn new(pool: PgPool) -> Self {
            PgNotifier { pool }
        }
    }

    impl super::Notifier for PgNotifier {
        fn notify(&self, message: Outbound) -> BoxFuture<'static, Result<(), CoreError>> {
            let pool = self.pool.clone();

            async move {
                sqlx::query(include_str!("queries/create_notification.sql"))
                    .bind(message.target_user_id)
                    .bind(message.app_scope)
                    .bind(message.kind)
                    .bind(message.title)
                    .bind(message.body)
                    .bind(message.payload)
                    .execute(&pool)
                    .await
                    .map_err(|source| CoreError::Sqlx { source })?;

                Ok(())
            }
            .boxed()
        }
    }
}
