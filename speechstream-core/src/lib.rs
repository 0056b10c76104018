pub mod bootstrap;
pub mod config;
pub mod convert;
pub mod error;
pub mod logging;
pub mod tts;

pub use config::Config;
pub use error::{Error, Result};
