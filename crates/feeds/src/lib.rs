mod simulated;
mod snapshot;

pub use simulated::SimulatedFeed;
pub use snapshot::{InstrumentData, SnapshotFeed, SnapshotFile};
