pub mod query;
pub mod shape;

pub use query::error::QuerierError;
pub use query::series::{RawRow, SeriesQuerier, SeriesQueryBuilder, TimeWindow};
pub use query::store::CollectionStore;
pub use shape::shape;
