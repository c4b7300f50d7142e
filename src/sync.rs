use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use slog::{debug, Logger};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::feed::{ChangeFeed, ChangeKind, TripChange};
use crate::trip::Trip;

/// A live view of one trip record.
///
/// Subscribes to the change feed and folds every inbound event into a watch
/// channel, so a dispatcher editing the trip from another device is
/// reflected here without polling. The fold is a shallow merge; a deletion
/// clears the view. Stopping the handle (or dropping it) tears the
/// subscription down, so the task and the feed stream it owns never outlive
/// the screen that mounted it.
pub struct TripSync;

impl TripSync {
    pub async fn start(
        logger: Arc<Logger>,
        feed: Arc<dyn ChangeFeed>,
        trip: Trip,
    ) -> Result<(watch::Receiver<Option<Trip>>, SyncHandle), CoreError> {
        let trip_id = trip.id;
        let stream = feed.subscribe(&trip_id).await?;
        let (sender, receiver) = watch::channel(Some(trip.clone()));
        let (stop_sender, stop_receiver) = oneshot::channel();

        let task = tokio::spawn(fold(logger, trip_id, stream, Some(trip), sender, stop_receiver));

        Ok((
            receiver,
            SyncHandle {
                stop: Some(stop_sender),
                task,
            },
        ))
    }
}

/// Teardown handle for a running sync. Explicit stop and `Drop` both end
/// the task; the feed stream is dropped with it, which is the unsubscribe.
pub struct SyncHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stops the sync and waits for the task to wind down.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let _ = (&mut self.task).await;
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn fold(
    logger: Arc<Logger>,
    trip_id: Uuid,
    mut stream: BoxStream<'static, TripChange>,
    initial: Option<Trip>,
    sender: watch::Sender<Option<Trip>>,
    mut stop: oneshot::Receiver<()>,
) {
    // local copy of the folded state; the channel only ever sees complete
    // snapshots
    let mut current = initial;

    loop {
        let change = tokio::select! {
            _ = &mut stop => break,
            change = stream.next() => match change {
                Some(change) => change,
                None => {
                    debug!(logger, "change feed ended"; "trip" => trip_id.to_string());

                    break;
                }
            },
        };

        match change.kind {
            ChangeKind::Delete => {
                current = None;
            }
            ChangeKind::Insert | ChangeKind::Update => {
                if let (Some(trip), Some(patch)) = (current.as_mut(), change.new_record.as_ref())
                {
                    patch.apply(trip);
                }
            }
        }

        if sender.send(current.clone()).is_err() {
            // nobody is watching anymore
            break;
        }
    }
}
