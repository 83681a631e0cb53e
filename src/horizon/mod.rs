mod download;
mod error;
mod profile;

pub use download::download_profile;
pub use error::HorizonError;
pub use profile::{HorizonProfile, HorizonSample};
