pub mod auth;
pub mod cli;
pub mod config;
pub mod policy;

pub use config::Configuration;
pub use policy::SeriesPolicy;
