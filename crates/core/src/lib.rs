pub mod cells;
pub mod error;
pub mod geo;
pub mod hlc;
pub mod ids;
pub mod models;
pub mod ovn;

pub use cells::{CellId, CellUnion, CoveringEngine, CoveringPolicy};
pub use error::CoreError;
pub use hlc::Hlc;
pub use ids::*;
pub use models::{IdentificationServiceArea, OperationalIntent, OperationalIntentState, Subscription};
pub use ovn::Ovn;
