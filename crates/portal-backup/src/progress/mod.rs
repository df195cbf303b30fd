//! Progress state of long-running tasks and its publication.

pub mod handle;
pub mod publisher;
pub mod reporter;
pub mod state;
pub mod store;

pub use handle::ProgressHandle;
pub use publisher::{BroadcastPublisher, NoopPublisher, ProgressPublisher, PublishError, PublisherSet};
pub use reporter::{NoopProgress, ProgressReporter, ScaledProgress};
pub use state::{ProgressState, TaskKind};
pub use store::ProgressStore;
