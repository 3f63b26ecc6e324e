pub mod analyze;
pub mod codec;
pub mod config;
pub mod logging;
pub mod options;
pub mod report;
pub mod source;
pub mod stats;
pub mod store;
