//! Built-in reducers understood by every database host.
//!
//! Reducers receive `(keys, values, rereduce)`.

use serde_json::{Map, Value, json};

use super::{NativeCompiler, Scope};
use crate::errors::FunctionError;

pub(super) fn register(compiler: &mut NativeCompiler) {
    compiler
        .register("_sum", |_scope: &mut Scope<'_, '_>, args| sum(&reduce_values(&args)?))
        .register("_count", |_scope: &mut Scope<'_, '_>, args| {
            let values = reduce_values(&args)?;
            if is_rereduce(&args) {
                sum(&values)
            } else {
                Ok(json!(values.len()))
            }
        })
        .register("_stats", |_scope: &mut Scope<'_, '_>, args| {
            let values = reduce_values(&args)?;
            let stats = if is_rereduce(&args) {
                values.iter().map(Stats::from_summary).try_fold(Stats::EMPTY, |acc, next| {
                    next.map(|stats| acc.merge(stats))
                })?
            } else {
                values.iter().map(Stats::from_value).try_fold(Stats::EMPTY, |acc, next| {
                    next.map(|stats| acc.merge(stats))
                })?
            };
            Ok(stats.into_value())
        });
}

fn reduce_values(args: &[Value]) -> Result<Vec<Value>, FunctionError> {
    match args.get(1) {
        Some(Value::Array(values)) => Ok(values.clone()),
        _ => Err(FunctionError::fault(
            "builtin_reduce_error",
            "reducers expect an array of values",
        )),
    }
}

fn is_rereduce(args: &[Value]) -> bool {
    matches!(args.get(2), Some(Value::Bool(true)))
}

fn numeric(value: &Value) -> Result<f64, FunctionError> {
    value.as_f64().ok_or_else(|| {
        FunctionError::fault(
            "builtin_reduce_error",
            format!("expected a number, got {value}"),
        )
    })
}

/// Integer totals stay integers; anything fractional falls back to floats.
fn sum(values: &[Value]) -> Result<Value, FunctionError> {
    let integers: Option<Vec<i64>> = values.iter().map(Value::as_i64).collect();
    if let Some(total) = integers.and_then(|ints| ints.into_iter().try_fold(0_i64, i64::checked_add))
    {
        return Ok(json!(total));
    }
    let total = values.iter().map(numeric).sum::<Result<f64, _>>()?;
    Ok(json!(total))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Stats {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
    sumsqr: f64,
}

impl Stats {
    const EMPTY: Self = Self {
        sum: 0.0,
        count: 0,
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        sumsqr: 0.0,
    };

    fn from_value(value: &Value) -> Result<Self, FunctionError> {
        let number = numeric(value)?;
        Ok(Self {
            sum: number,
            count: 1,
            min: number,
            max: number,
            sumsqr: number * number,
        })
    }

    fn from_summary(value: &Value) -> Result<Self, FunctionError> {
        let field = |name: &str| {
            value
                .get(name)
                .ok_or_else(|| {
                    FunctionError::fault(
                        "builtin_reduce_error",
                        format!("stats summary is missing '{name}'"),
                    )
                })
                .and_then(numeric)
        };
        let count = value.get("count").and_then(Value::as_u64).ok_or_else(|| {
            FunctionError::fault("builtin_reduce_error", "stats summary has no integer count")
        })?;
        Ok(Self {
            sum: field("sum")?,
            count,
            min: field("min")?,
            max: field("max")?,
            sumsqr: field("sumsqr")?,
        })
    }

    fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sumsqr: self.sumsqr + other.sumsqr,
        }
    }

    fn into_value(self) -> Value {
        let mut summary = Map::new();
        summary.insert("sum".into(), json!(self.sum));
        summary.insert("count".into(), json!(self.count));
        if self.count > 0 {
            summary.insert("min".into(), json!(self.min));
            summary.insert("max".into(), json!(self.max));
        } else {
            summary.insert("min".into(), Value::Null);
            summary.insert("max".into(), Value::Null);
        }
        summary.insert("sumsqr".into(), json!(self.sumsqr));
        Value::Object(summary)
    }
}
