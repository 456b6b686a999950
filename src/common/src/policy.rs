//! Series query policy
//!
//! The series section of the configuration carries optional overrides
//! (date/value expressions, an extra filter, an aggregation mode). They are
//! resolved once into the tagged choices below so the query builder can
//! match over them instead of probing for presence at every step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SeriesConfig;

/// Where the per-document timestamp comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSource {
    Field(String),
    Expression(String),
}

/// Where the per-document value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Field(String),
    Expression(String),
}

/// Additional predicate conjoined with the time range filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSource {
    None,
    Expression(String),
}

/// Aggregate functions accepted for bucketed queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Average,
    Avg,
    Count,
    CountDistinct,
    CountUnique,
    Length,
    Max,
    Min,
    SortedUnique,
    Stddev,
    StddevPopulation,
    StddevSample,
    Sum,
    Unique,
    Variance,
    VariancePopulation,
    VarianceSample,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 17] = [
        AggregateFunction::Average,
        AggregateFunction::Avg,
        AggregateFunction::Count,
        AggregateFunction::CountDistinct,
        AggregateFunction::CountUnique,
        AggregateFunction::Length,
        AggregateFunction::Max,
        AggregateFunction::Min,
        AggregateFunction::SortedUnique,
        AggregateFunction::Stddev,
        AggregateFunction::StddevPopulation,
        AggregateFunction::StddevSample,
        AggregateFunction::Sum,
        AggregateFunction::Unique,
        AggregateFunction::Variance,
        AggregateFunction::VariancePopulation,
        AggregateFunction::VarianceSample,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Average => "AVERAGE",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::CountDistinct => "COUNT_DISTINCT",
            AggregateFunction::CountUnique => "COUNT_UNIQUE",
            AggregateFunction::Length => "LENGTH",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::SortedUnique => "SORTED_UNIQUE",
            AggregateFunction::Stddev => "STDDEV",
            AggregateFunction::StddevPopulation => "STDDEV_POPULATION",
            AggregateFunction::StddevSample => "STDDEV_SAMPLE",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Unique => "UNIQUE",
            AggregateFunction::Variance => "VARIANCE",
            AggregateFunction::VariancePopulation => "VARIANCE_POPULATION",
            AggregateFunction::VarianceSample => "VARIANCE_SAMPLE",
        }
    }
}

const NO_AGGREGATION: &str = "NONE";

/// Configured aggregation mode, `NONE` meaning raw passthrough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregation {
    #[default]
    None,
    Function(AggregateFunction),
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::None => NO_AGGREGATION,
            Aggregation::Function(function) => function.as_str(),
        }
    }

    /// Every accepted name, in the order reported by configuration errors
    pub fn allowed_names() -> Vec<&'static str> {
        AggregateFunction::ALL
            .iter()
            .map(AggregateFunction::as_str)
            .chain(std::iter::once(NO_AGGREGATION))
            .collect()
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown aggregation function: {name}, allowed are {}", Aggregation::allowed_names().join(", "))]
pub struct UnknownAggregation {
    pub name: String,
}

impl FromStr for Aggregation {
    type Err = UnknownAggregation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        if upper == NO_AGGREGATION {
            return Ok(Aggregation::None);
        }

        AggregateFunction::ALL
            .iter()
            .find(|function| function.as_str() == upper)
            .map(|function| Aggregation::Function(*function))
            .ok_or_else(|| UnknownAggregation {
                name: s.to_string(),
            })
    }
}

impl TryFrom<String> for Aggregation {
    type Error = UnknownAggregation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Aggregation> for String {
    fn from(value: Aggregation) -> Self {
        value.as_str().to_string()
    }
}

/// Resolved form of the series configuration, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPolicy {
    pub date: DateSource,
    pub value: ValueSource,
    pub filter: FilterSource,
    pub aggregation: Aggregation,
}

impl SeriesPolicy {
    pub fn from_config(config: &SeriesConfig) -> Self {
        let date = match config.date_override() {
            Some(expression) => DateSource::Expression(expression.to_string()),
            None => DateSource::Field(config.date_field.clone()),
        };
        let value = match config.value_override() {
            Some(expression) => ValueSource::Expression(expression.to_string()),
            None => ValueSource::Field(config.value_field.clone()),
        };
        let filter = match config.filter_override() {
            Some(expression) => FilterSource::Expression(expression.to_string()),
            None => FilterSource::None,
        };

        Self {
            date,
            value,
            filter,
            aggregation: config.aggregation,
        }
    }
}
