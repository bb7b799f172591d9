// Domain models

mod network;
mod sample;
mod traffic;

pub use network::InterfaceInfo;
pub use sample::{Sample, Speed};
pub use traffic::{ClassificationCounters, ClassificationEvent, Direction, RawCounterDelta};
