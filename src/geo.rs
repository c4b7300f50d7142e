use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::location::Position;

/// Options passed to the provider's position watch: deliver a new fix when
/// either the interval elapses or the device moves by the given distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatchOptions {
    pub interval: Duration,
    pub displacement_meters: f64,
}

/// The device geolocation provider.
///
/// `watch` hands back a stream of fixes; dropping the stream stops the
/// underlying watch, so teardown is the owner's responsibility, not the
/// collector's.
pub trait Locator: Send + Sync {
    /// A single immediate fix, if the device can produce one.
    fn current(&self) -> BoxFuture<'static, Option<Position>>;

    /// A continuous watch honoring the given cadence options.
    fn watch(&self, options: WatchOptions) -> BoxStream<'static, Position>;
}
