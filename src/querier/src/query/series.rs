//! Bucketed series queries
//!
//! One query per (collection, window, interval). The query resolves a date
//! and a value per document, keeps the documents inside the half-open
//! window `[start, end)` that also pass the optional filter, and then
//! either returns them as they are or groups them into interval buckets
//! and aggregates the values of each bucket.

use std::sync::Arc;

use async_trait::async_trait;
use common::policy::{
    AggregateFunction, Aggregation, DateSource, FilterSource, SeriesPolicy, ValueSource,
};
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::json::ArrayWriter;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::functions_aggregate::expr_fn::{
    array_agg, avg, count, count_distinct, max, min, stddev, stddev_pop, sum, var_pop, var_sample,
};
use datafusion::functions_nested::expr_fn::array_sort;
use datafusion::common::ScalarValue;
use datafusion::logical_expr::{Expr, ExprFunctionExt, ExprSchemable, cast, col, ident, lit, when};
use datafusion::prelude::DataFrame;
use serde_json::{Map, Value};

use super::error::QuerierError;
use super::store::CollectionStore;

/// Resolved per-document date, visible to the filter expression
pub const DATE_COLUMN: &str = "__date";
const VALUE_COLUMN: &str = "__value";

const OUTPUT_VALUE: &str = "value";
const OUTPUT_DATE: &str = "date";

/// Half-open `[start, end)` in epoch milliseconds. An inverted window is
/// not an error; it matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// `[value, timestamp]` as returned by the store. For bucketed queries the
/// value is the aggregate and the timestamp the bucket start.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub value: Value,
    pub timestamp: Value,
}

impl RawRow {
    pub fn new(value: impl Into<Value>, timestamp: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            timestamp: timestamp.into(),
        }
    }
}

#[async_trait]
pub trait SeriesQuerier: Send + Sync {
    /// Build and run the series query for one collection. `interval` is
    /// the bucket width in milliseconds and is ignored when no aggregation
    /// is configured.
    async fn build_and_run(
        &self,
        collection: &str,
        window: TimeWindow,
        interval: u64,
    ) -> Result<Vec<RawRow>, QuerierError>;
}

#[derive(Debug, Clone)]
pub struct SeriesQueryBuilder {
    store: CollectionStore,
    policy: Arc<SeriesPolicy>,
}

impl SeriesQueryBuilder {
    pub fn new(store: CollectionStore, policy: Arc<SeriesPolicy>) -> Self {
        Self { store, policy }
    }

    /// Turn a collection frame into the series query plan
    pub fn plan(
        &self,
        documents: DataFrame,
        window: TimeWindow,
        interval: u64,
    ) -> Result<DataFrame, QuerierError> {
        let date = match &self.policy.date {
            DateSource::Field(name) => field(&documents, name),
            DateSource::Expression(sql) => self.store.parse_expr(sql, documents.schema())?,
        };
        // Numeric dates are compared as they are; anything else is read as epoch ms
        let date_type = date.get_type(documents.schema())?;
        let date = if date_type.is_numeric() || date_type == DataType::Null {
            date
        } else {
            cast(date, DataType::Int64)
        };
        let in_window = col(DATE_COLUMN)
            .gt_eq(lit(window.start))
            .and(col(DATE_COLUMN).lt(lit(window.end)));

        let mut frame = documents
            .with_column(DATE_COLUMN, date)?
            .filter(in_window)?;

        match &self.policy.filter {
            FilterSource::None => {}
            FilterSource::Expression(sql) => {
                let predicate = self.store.parse_expr(sql, frame.schema())?;
                frame = frame.filter(predicate)?;
            }
        }

        let value = match &self.policy.value {
            ValueSource::Field(name) => field(&frame, name),
            ValueSource::Expression(sql) => self.store.parse_expr(sql, frame.schema())?,
        };
        let frame = frame.with_column(VALUE_COLUMN, value)?;

        let frame = match self.policy.aggregation {
            Aggregation::None => frame.select(vec![
                col(VALUE_COLUMN).alias(OUTPUT_VALUE),
                col(DATE_COLUMN).alias(OUTPUT_DATE),
            ])?,
            Aggregation::Function(function) => frame
                .aggregate(
                    vec![bucket_start(col(DATE_COLUMN), interval)?.alias(OUTPUT_DATE)],
                    vec![aggregate(function, col(VALUE_COLUMN))?.alias(OUTPUT_VALUE)],
                )?
                .select(vec![col(OUTPUT_VALUE), col(OUTPUT_DATE)])?,
        };
        Ok(frame)
    }
}

#[async_trait]
impl SeriesQuerier for SeriesQueryBuilder {
    async fn build_and_run(
        &self,
        collection: &str,
        window: TimeWindow,
        interval: u64,
    ) -> Result<Vec<RawRow>, QuerierError> {
        log::debug!(
            "Querying '{collection}' in [{}, {}) with interval {interval}ms, aggregation {}",
            window.start,
            window.end,
            self.policy.aggregation
        );

        let documents = self.store.collection(collection).await?;
        if documents.schema().fields().is_empty() {
            log::debug!("Collection '{collection}' has no documents");
            return Ok(Vec::new());
        }
        let batches = self.plan(documents, window, interval)?.collect().await?;
        let rows = decode_rows(&batches)?;

        log::debug!("Query on '{collection}' returned {} row(s)", rows.len());
        Ok(rows)
    }
}

/// A document field, or a typed null when no document carries it
fn field(frame: &DataFrame, name: &str) -> Expr {
    if frame.schema().has_column_with_unqualified_name(name) {
        ident(name)
    } else {
        lit(ScalarValue::Int64(None))
    }
}

/// `floor(date / interval) * interval` as Int64, rounding toward negative
/// infinity for dates before the epoch and for fractional dates. No
/// intermediate value leaves the range of the bucket start.
fn bucket_start(date: Expr, interval: u64) -> Result<Expr, QuerierError> {
    let interval = lit(i64::try_from(interval).unwrap_or(i64::MAX));
    let remainder = date.clone() % interval.clone();
    let start = when(
        remainder.clone().lt(lit(0)),
        date.clone() - remainder.clone() - interval,
    )
    .otherwise(date - remainder)?;
    Ok(cast(start, DataType::Int64))
}

fn aggregate(function: AggregateFunction, value: Expr) -> Result<Expr, QuerierError> {
    let expr = match function {
        AggregateFunction::Average | AggregateFunction::Avg => avg(value),
        AggregateFunction::Count | AggregateFunction::Length => count(value),
        AggregateFunction::CountDistinct | AggregateFunction::CountUnique => {
            count_distinct(value)
        }
        AggregateFunction::Max => max(value),
        AggregateFunction::Min => min(value),
        AggregateFunction::Sum => sum(value),
        // STDDEV and VARIANCE are the population variants
        AggregateFunction::Stddev | AggregateFunction::StddevPopulation => stddev_pop(value),
        AggregateFunction::StddevSample => stddev(value),
        AggregateFunction::Variance | AggregateFunction::VariancePopulation => var_pop(value),
        AggregateFunction::VarianceSample => var_sample(value),
        AggregateFunction::Unique => array_agg(value).distinct().build()?,
        AggregateFunction::SortedUnique => array_sort(
            array_agg(value).distinct().build()?,
            lit("ASC"),
            lit("NULLS FIRST"),
        ),
    };
    Ok(expr)
}

/// Decode `(value, date)` batches into rows via Arrow's JSON writer
fn decode_rows(batches: &[RecordBatch]) -> Result<Vec<RawRow>, QuerierError> {
    if batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = ArrayWriter::new(Vec::new());
    writer.write_batches(&batches.iter().collect::<Vec<_>>())?;
    writer.finish()?;
    let buffer = writer.into_inner();

    let objects: Vec<Map<String, Value>> = serde_json::from_slice(&buffer)?;
    Ok(objects
        .into_iter()
        .map(|mut object| RawRow {
            // null columns are left out of the JSON object
            value: object.remove(OUTPUT_VALUE).unwrap_or(Value::Null),
            timestamp: object.remove(OUTPUT_DATE).unwrap_or(Value::Null),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::policy::Aggregation;
    use datafusion::arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use serde_json::json;
    use std::collections::HashSet;

    fn documents() -> RecordBatch {
        RecordBatch::try_from_iter(vec![
            (
                "ts",
                Arc::new(Int64Array::from(vec![1000, 1500, 2200, 3000, 500])) as ArrayRef,
            ),
            (
                "v",
                Arc::new(Int64Array::from(vec![5, 3, 7, 11, 13])) as ArrayRef,
            ),
            (
                "host",
                Arc::new(StringArray::from(vec!["a", "b", "a", "a", "b"])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    fn policy(aggregation: Aggregation) -> SeriesPolicy {
        SeriesPolicy {
            date: DateSource::Field("ts".to_string()),
            value: ValueSource::Field("v".to_string()),
            filter: FilterSource::None,
            aggregation,
        }
    }

    fn builder(policy: SeriesPolicy) -> SeriesQueryBuilder {
        let store = CollectionStore::new();
        store.register_batch("m", documents()).unwrap();
        SeriesQueryBuilder::new(store, Arc::new(policy))
    }

    fn pairs(rows: &[RawRow]) -> HashSet<(String, String)> {
        rows.iter()
            .map(|row| (row.value.to_string(), row.timestamp.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_sum_per_bucket() {
        let builder = builder(policy(Aggregation::Function(AggregateFunction::Sum)));
        let rows = builder
            .build_and_run("m", TimeWindow::new(1000, 3000), 1000)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&RawRow::new(8, 1000)));
        assert!(rows.contains(&RawRow::new(7, 2000)));
    }

    #[tokio::test]
    async fn test_raw_rows_ignore_interval() {
        let builder = builder(policy(Aggregation::None));
        for interval in [1, 1000, 86_400_000] {
            let rows = builder
                .build_and_run("m", TimeWindow::new(1000, 3000), interval)
                .await
                .unwrap();
            assert_eq!(rows.len(), 3);
            assert_eq!(
                pairs(&rows),
                pairs(&[
                    RawRow::new(5, 1000),
                    RawRow::new(3, 1500),
                    RawRow::new(7, 2200)
                ])
            );
        }
    }

    #[tokio::test]
    async fn test_window_is_half_open() {
        let builder = builder(policy(Aggregation::None));
        let rows = builder
            .build_and_run("m", TimeWindow::new(1500, 2200), 1000)
            .await
            .unwrap();
        assert_eq!(rows, vec![RawRow::new(3, 1500)]);
    }

    #[tokio::test]
    async fn test_inverted_window_is_empty() {
        for aggregation in [
            Aggregation::None,
            Aggregation::Function(AggregateFunction::Sum),
        ] {
            let rows = builder(policy(aggregation))
                .build_and_run("m", TimeWindow::new(3000, 1000), 1000)
                .await
                .unwrap();
            assert!(rows.is_empty());
        }
    }

    #[tokio::test]
    async fn test_filter_expression() {
        let mut policy = policy(Aggregation::Function(AggregateFunction::Count));
        policy.filter = FilterSource::Expression("host = 'a'".to_string());

        let rows = builder(policy)
            .build_and_run("m", TimeWindow::new(0, 10_000), 1000)
            .await
            .unwrap();

        assert_eq!(
            pairs(&rows),
            pairs(&[
                RawRow::new(1, 1000),
                RawRow::new(1, 2000),
                RawRow::new(1, 3000)
            ])
        );
    }

    #[tokio::test]
    async fn test_filter_can_use_resolved_date() {
        let mut policy = policy(Aggregation::None);
        policy.filter = FilterSource::Expression(format!("{DATE_COLUMN} <> 1500"));

        let rows = builder(policy)
            .build_and_run("m", TimeWindow::new(1000, 3000), 1000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_date_and_value_expressions() {
        let mut policy = policy(Aggregation::Function(AggregateFunction::Max));
        policy.date = DateSource::Expression("ts * 2".to_string());
        policy.value = ValueSource::Expression("v * 10".to_string());

        let rows = builder(policy)
            .build_and_run("m", TimeWindow::new(2000, 4000), 1000)
            .await
            .unwrap();

        // ts * 2: 2000, 3000 fall inside, 4400 does not
        assert_eq!(
            pairs(&rows),
            pairs(&[RawRow::new(50, 2000), RawRow::new(30, 3000)])
        );
    }

    #[tokio::test]
    async fn test_average_is_floating_point() {
        let rows = builder(policy(Aggregation::Function(AggregateFunction::Average)))
            .build_and_run("m", TimeWindow::new(1000, 2000), 1000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value.as_f64(), Some(4.0));
        assert_eq!(rows[0].timestamp, json!(1000));
    }

    #[tokio::test]
    async fn test_sorted_unique_returns_arrays() {
        let store = CollectionStore::new();
        store
            .register_batch(
                "m",
                RecordBatch::try_from_iter(vec![
                    (
                        "ts",
                        Arc::new(Int64Array::from(vec![100, 200, 300, 400])) as ArrayRef,
                    ),
                    (
                        "v",
                        Arc::new(Int64Array::from(vec![3, 1, 3, 2])) as ArrayRef,
                    ),
                ])
                .unwrap(),
            )
            .unwrap();
        let builder = SeriesQueryBuilder::new(
            store,
            Arc::new(policy(Aggregation::Function(AggregateFunction::SortedUnique))),
        );

        let rows = builder
            .build_and_run("m", TimeWindow::new(0, 1000), 1000)
            .await
            .unwrap();
        assert_eq!(rows, vec![RawRow::new(json!([1, 2, 3]), 0)]);
    }

    #[tokio::test]
    async fn test_population_and_sample_deviation() {
        let store = CollectionStore::new();
        store
            .register_batch(
                "m",
                RecordBatch::try_from_iter(vec![
                    ("ts", Arc::new(Int64Array::from(vec![0, 1])) as ArrayRef),
                    ("v", Arc::new(Float64Array::from(vec![1.0, 3.0])) as ArrayRef),
                ])
                .unwrap(),
            )
            .unwrap();

        let run = |function| {
            let builder = SeriesQueryBuilder::new(
                store.clone(),
                Arc::new(policy(Aggregation::Function(function))),
            );
            async move {
                builder
                    .build_and_run("m", TimeWindow::new(0, 10), 10)
                    .await
                    .unwrap()
            }
        };

        let single = |rows: Vec<RawRow>| {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].timestamp, json!(0));
            rows[0].value.as_f64()
        };

        assert_eq!(single(run(AggregateFunction::Stddev).await), Some(1.0));
        let sample = single(run(AggregateFunction::StddevSample).await).unwrap();
        assert!((sample - 2f64.sqrt()).abs() < 1e-9);
        assert_eq!(single(run(AggregateFunction::VarianceSample).await), Some(2.0));
        assert_eq!(single(run(AggregateFunction::Variance).await), Some(1.0));
    }

    fn float_dates(dates: Vec<f64>) -> CollectionStore {
        let values = (1..=dates.len() as i64).collect::<Vec<_>>();
        let store = CollectionStore::new();
        store
            .register_batch(
                "m",
                RecordBatch::try_from_iter(vec![
                    ("ts", Arc::new(Float64Array::from(dates)) as ArrayRef),
                    ("v", Arc::new(Int64Array::from(values)) as ArrayRef),
                ])
                .unwrap(),
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_fractional_dates_are_returned_unchanged() {
        let store = float_dates(vec![999.5, 1000.5, -0.5]);
        let builder = SeriesQueryBuilder::new(store, Arc::new(policy(Aggregation::None)));

        let rows = builder
            .build_and_run("m", TimeWindow::new(1000, 2000), 1000)
            .await
            .unwrap();
        assert_eq!(rows, vec![RawRow::new(2, 1000.5)]);

        // -0.5 lies before a window starting at 0
        let rows = builder
            .build_and_run("m", TimeWindow::new(0, 1000), 1000)
            .await
            .unwrap();
        assert_eq!(rows, vec![RawRow::new(1, 999.5)]);
    }

    #[tokio::test]
    async fn test_fractional_dates_fall_into_floored_buckets() {
        let store = float_dates(vec![999.5, 1000.5, -0.5]);
        let builder = SeriesQueryBuilder::new(
            store,
            Arc::new(policy(Aggregation::Function(AggregateFunction::Sum))),
        );

        let rows = builder
            .build_and_run("m", TimeWindow::new(-1000, 2000), 1000)
            .await
            .unwrap();
        assert_eq!(
            pairs(&rows),
            pairs(&[
                RawRow::new(1, 0),
                RawRow::new(2, 1000),
                RawRow::new(3, -1000)
            ])
        );
    }

    #[tokio::test]
    async fn test_huge_interval_does_not_wrap() {
        let store = CollectionStore::new();
        store
            .register_batch(
                "m",
                RecordBatch::try_from_iter(vec![
                    ("ts", Arc::new(Int64Array::from(vec![-1500, 1000, 2000])) as ArrayRef),
                    ("v", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
                ])
                .unwrap(),
            )
            .unwrap();
        let builder = SeriesQueryBuilder::new(
            store,
            Arc::new(policy(Aggregation::Function(AggregateFunction::Sum))),
        );

        for interval in [i64::MAX as u64, u64::MAX] {
            let rows = builder
                .build_and_run("m", TimeWindow::new(-5000, 5000), interval)
                .await
                .unwrap();
            assert_eq!(
                pairs(&rows),
                pairs(&[RawRow::new(5, 0), RawRow::new(1, -i64::MAX)])
            );
        }
    }

    #[tokio::test]
    async fn test_collections_without_the_configured_fields_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.json"), "").unwrap();
        std::fs::write(dir.path().join("other.ndjson"), "{\"other\": 1}\n").unwrap();
        let store = CollectionStore::open(&common::config::StoreConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
        })
        .await
        .unwrap();

        for aggregation in [
            Aggregation::None,
            Aggregation::Function(AggregateFunction::Sum),
        ] {
            let builder = SeriesQueryBuilder::new(store.clone(), Arc::new(policy(aggregation)));
            for collection in ["empty", "other"] {
                let rows = builder
                    .build_and_run(collection, TimeWindow::new(0, 10), 1)
                    .await
                    .unwrap();
                assert!(rows.is_empty(), "{collection} returned {rows:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_pre_epoch_buckets() {
        let store = CollectionStore::new();
        store
            .register_batch(
                "m",
                RecordBatch::try_from_iter(vec![
                    ("ts", Arc::new(Int64Array::from(vec![-1500, -500])) as ArrayRef),
                    ("v", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
                ])
                .unwrap(),
            )
            .unwrap();
        let builder = SeriesQueryBuilder::new(
            store,
            Arc::new(policy(Aggregation::Function(AggregateFunction::Sum))),
        );

        let rows = builder
            .build_and_run("m", TimeWindow::new(-5000, 0), 1000)
            .await
            .unwrap();
        assert_eq!(
            pairs(&rows),
            pairs(&[RawRow::new(1, -2000), RawRow::new(2, -1000)])
        );
    }

    #[tokio::test]
    async fn test_malformed_expression_is_a_query_error() {
        let mut policy = policy(Aggregation::None);
        policy.filter = FilterSource::Expression("host = = 'a'".to_string());

        let err = builder(policy)
            .build_and_run("m", TimeWindow::new(0, 10_000), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, QuerierError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_a_query_error() {
        let err = builder(policy(Aggregation::None))
            .build_and_run("gone", TimeWindow::new(0, 10_000), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, QuerierError::UnknownCollection(_)));
    }

    #[test]
    fn test_decode_rows_keeps_nulls() {
        let batch = RecordBatch::try_from_iter(vec![
            (
                OUTPUT_VALUE,
                Arc::new(Int64Array::from(vec![Some(1), None])) as ArrayRef,
            ),
            (
                OUTPUT_DATE,
                Arc::new(Int64Array::from(vec![10, 20])) as ArrayRef,
            ),
        ])
        .unwrap();

        let rows = decode_rows(&[batch]).unwrap();
        assert_eq!(
            rows,
            vec![RawRow::new(1, 10), RawRow::new(Value::Null, 20)]
        );
        assert!(decode_rows(&[]).unwrap().is_empty());
    }
}
