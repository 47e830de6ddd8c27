pub mod matcher;
pub mod retry;
pub mod updater;

pub use matcher::{find_all_containers, find_container, ContainerMatch, SuffixKind};
pub use retry::RetryPolicy;
pub use updater::{reconcile, ImageChange, Outcome, PinTarget, ReconcileError};
