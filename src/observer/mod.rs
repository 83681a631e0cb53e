mod frames;
mod location;

pub use frames::{
    ecef_to_enu, geodetic_to_ecef_km, teme_to_ecef_position, topocentric_from_ecef, Topocentric,
};
pub use location::ObserverLocation;
