pub mod config;
pub mod error;
pub mod fx;
pub mod phone;
pub mod text;
pub mod types;
pub mod vocab;

pub use config::Config;
pub use error::CarScoutError;
pub use types::*;
