//! Reshape raw series rows into SimpleJSON response fragments

use simplejson_api::{
    Column, Datapoint, ResponseFragment, TableFragment, TableRow, TargetType, TimeseriesFragment,
};

use crate::query::series::RawRow;

/// Build the fragment for one target. Rows keep the order they arrived in;
/// tables swap each `[value, timestamp]` into `[timestamp, value]`.
pub fn shape(target: &str, output_type: TargetType, rows: Vec<RawRow>) -> ResponseFragment {
    match output_type {
        TargetType::Timeseries => ResponseFragment::Timeseries(TimeseriesFragment {
            target: target.to_string(),
            datapoints: rows
                .into_iter()
                .map(|row| Datapoint(row.value, row.timestamp))
                .collect(),
        }),
        TargetType::Table => ResponseFragment::Table(TableFragment {
            target: target.to_string(),
            columns: vec![Column::new("date"), Column::new("value")],
            rows: rows
                .into_iter()
                .map(|row| TableRow(row.timestamp, row.value))
                .collect(),
        }),
    }
}
