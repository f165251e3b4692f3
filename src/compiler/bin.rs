//! Histogram binning
//!
//! `bin(col;nbins;min;max)` maps each value to `[bucket, lower, upper]`.
//! Buckets `1..=nbins` divide `[min, max)` into equal widths. Values below
//! `min` land in bucket 0 with no lower bound, values at or above `max` in
//! bucket `nbins + 1` with no upper bound, and NULL stays NULL.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::catalog::Type;
use crate::error::{ErmError, ErmResult};

const BINNABLE: &[&str] = &[
    "int2",
    "int4",
    "int8",
    "float4",
    "float8",
    "numeric",
    "timestamp",
    "timestamptz",
    "date",
];

/// One evaluated bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub bucket: Option<u64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Check binning parameters
pub fn check_bounds(nbins: u32, min: f64, max: f64) -> ErmResult<()> {
    if nbins < 1 {
        return Err(ErmError::BadData("bin count must be at least 1".to_string()));
    }
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Err(ErmError::BadData(format!(
            "bin minimum {} must be less than maximum {}",
            min, max
        )));
    }
    Ok(())
}

/// Bin one value
pub fn evaluate_bin(value: Option<f64>, nbins: u32, min: f64, max: f64) -> ErmResult<Bin> {
    check_bounds(nbins, min, max)?;
    let v = match value {
        None => {
            return Ok(Bin {
                bucket: None,
                lower: None,
                upper: None,
            })
        }
        Some(v) => v,
    };
    let n = f64::from(nbins);
    let width = (max - min) / n;
    if v < min {
        return Ok(Bin {
            bucket: Some(0),
            lower: None,
            upper: Some(min),
        });
    }
    if v >= max {
        return Ok(Bin {
            bucket: Some(u64::from(nbins) + 1),
            lower: Some(max),
            upper: None,
        });
    }
    let bucket = (((v - min) / width).floor() as u64 + 1).min(u64::from(nbins));
    Ok(Bin {
        bucket: Some(bucket),
        lower: Some(min + (bucket - 1) as f64 * width),
        upper: Some(min + bucket as f64 * width),
    })
}

/// SQL producing `jsonb_build_array(bucket, lower, upper)` for a column
pub fn bin_sql(expr: &str, ctype: &Type, nbins: u32, min: &str, max: &str) -> ErmResult<String> {
    let storage = ctype.storage_type();
    let scalar = storage.scalar_name();
    if storage.is_array() || !BINNABLE.contains(&scalar) {
        return Err(ErmError::BadData(format!(
            "binning not supported for column type {}",
            ctype
        )));
    }
    let temporal = ctype.is_temporal();
    let (lo, hi) = if temporal {
        check_bounds(nbins, temporal_epoch(min)?, temporal_epoch(max)?)?;
        let lo = ctype.sql_literal(&ctype.parse_value(min)?)?;
        let hi = ctype.sql_literal(&ctype.parse_value(max)?)?;
        (
            format!("extract(epoch from {})", lo),
            format!("extract(epoch from {})", hi),
        )
    } else {
        let lo = parse_bound(min)?;
        let hi = parse_bound(max)?;
        check_bounds(nbins, lo, hi)?;
        (format!("{:?}::float8", lo), format!("{:?}::float8", hi))
    };
    let value = if temporal {
        format!("extract(epoch from {})", expr)
    } else {
        format!("({})::float8", expr)
    };
    let bucket = format!("width_bucket({}, {}, {}, {})", value, lo, hi, nbins);
    let width = format!("(({}) - ({})) / {}", hi, lo, nbins);
    let (lower, upper) = (
        format!(
            "CASE WHEN {b} = 0 THEN NULL ELSE {lo} + ({b} - 1) * {w} END",
            b = bucket,
            lo = lo,
            w = width
        ),
        format!(
            "CASE WHEN {b} > {n} THEN NULL ELSE {lo} + {b} * {w} END",
            b = bucket,
            n = nbins,
            lo = lo,
            w = width
        ),
    );
    let (lower, upper) = if temporal {
        (format!("to_timestamp({})", lower), format!("to_timestamp({})", upper))
    } else {
        (lower, upper)
    };
    Ok(format!("jsonb_build_array({}, {}, {})", bucket, lower, upper))
}

/// Seconds since the epoch for a date or timestamp bound, UTC unless an offset is given
fn temporal_epoch(text: &str) -> ErmResult<f64> {
    let text = text.trim();
    let naive = if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        ts.naive_utc()
    } else if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        ts
    } else if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        ts
    } else {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| ErmError::BadData(format!("invalid temporal bin bound \"{}\"", text)))?
    };
    let utc = naive.and_utc();
    Ok(utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_micros()) / 1e6)
}

fn parse_bound(text: &str) -> ErmResult<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| ErmError::BadData(format!("bin bound \"{}\" is not a number", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_bin_edges() {
        let below = evaluate_bin(Some(-5.0), 4, 0.0, 100.0).unwrap();
        assert_eq!((below.bucket, below.lower, below.upper), (Some(0), None, Some(0.0)));
        let above = evaluate_bin(Some(105.0), 4, 0.0, 100.0).unwrap();
        assert_eq!((above.bucket, above.lower, above.upper), (Some(5), Some(100.0), None));
        let null = evaluate_bin(None, 4, 0.0, 100.0).unwrap();
        assert_eq!((null.bucket, null.lower, null.upper), (None, None, None));
    }

    #[test]
    fn test_evaluate_bin_interior() {
        let b = evaluate_bin(Some(30.0), 4, 0.0, 100.0).unwrap();
        assert_eq!((b.bucket, b.lower, b.upper), (Some(2), Some(25.0), Some(50.0)));
        let b = evaluate_bin(Some(0.0), 4, 0.0, 100.0).unwrap();
        assert_eq!(b.bucket, Some(1));
        let b = evaluate_bin(Some(100.0), 4, 0.0, 100.0).unwrap();
        assert_eq!(b.bucket, Some(5));
    }

    #[test]
    fn test_bad_bounds() {
        assert!(matches!(evaluate_bin(Some(1.0), 0, 0.0, 1.0), Err(ErmError::BadData(_))));
        assert!(matches!(evaluate_bin(Some(1.0), 2, 5.0, 5.0), Err(ErmError::BadData(_))));
        assert!(bin_sql("t0.\"x\"", &Type::scalar("int4"), 4, "10", "0").is_err());
        assert!(bin_sql("t0.\"x\"", &Type::scalar("text"), 4, "0", "10").is_err());

        let date = Type::scalar("date");
        for (lo, hi) in [("2021-01-01", "2020-01-01"), ("2020-01-01", "2020-01-01"), ("2020-01-01", "soon")] {
            assert!(matches!(bin_sql("t0.\"d\"", &date, 4, lo, hi), Err(ErmError::BadData(_))));
        }
        let ts = Type::scalar("timestamptz");
        assert!(matches!(
            bin_sql("t0.\"ts\"", &ts, 4, "2020-01-01T12:00:00+02:00", "2020-01-01 10:00:00"),
            Err(ErmError::BadData(_))
        ));
        assert!(bin_sql("t0.\"ts\"", &ts, 4, "2020-01-01T12:00:00+02:00", "2020-01-01 10:00:01").is_ok());
    }

    #[test]
    fn test_bin_sql() {
        let sql = bin_sql("t0.\"x\"", &Type::scalar("int4"), 4, "0", "100").unwrap();
        assert!(sql.starts_with("jsonb_build_array(width_bucket((t0.\"x\")::float8, 0.0::float8, 100.0::float8, 4), "));
        let sql = bin_sql("t0.\"d\"", &Type::scalar("date"), 12, "2020-01-01", "2021-01-01").unwrap();
        assert!(sql.contains("width_bucket(extract(epoch from t0.\"d\"), extract(epoch from '2020-01-01'::date)"));
        assert!(sql.contains("to_timestamp("));
    }
}
