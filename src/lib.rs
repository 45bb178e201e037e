pub mod backend;
pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod orchestration;
pub mod placement;
pub mod selection;
pub mod stats;
pub mod store;
pub mod stream;
pub mod util;

pub use error::{Error, Result};
