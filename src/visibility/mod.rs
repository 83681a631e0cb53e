mod engine;
mod error;
mod propagation;
mod types;

pub use engine::{aircraft_is_visible, compute_visibility, satellite_is_visible};
pub use error::PropagationError;
pub use propagation::{aircraft_position, satellite_position, SkyPosition};
pub use types::{EcefPosition, ObjectKind, VisibilityReport, VisibleObject};
