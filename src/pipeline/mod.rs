pub mod publisher;
pub mod stats;
pub mod store;

pub use publisher::{StreamPublisher, Subscription, BOUNDARY};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use store::FrameStore;
