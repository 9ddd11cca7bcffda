// Configuration review harness library

pub mod api;
pub mod compose;
pub mod config;
pub mod error;
pub mod logging;
pub mod review;
pub mod scenarios;
pub mod services;
pub mod util;

pub use error::{HarnessError, Result};
