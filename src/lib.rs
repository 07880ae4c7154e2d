pub mod config;
pub mod crosswalk;
pub mod error;
pub mod geo;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod records;
