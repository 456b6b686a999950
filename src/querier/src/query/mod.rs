pub mod error;
pub mod series;
pub mod store;
