use crate::error::{IndexlibError, Result};

const DISTINCT_FIELD: &str = "distinct_field";
const DISTINCT_COUNT: &str = "distinct_count";
const DISTINCT_EXPAND_LIMIT: &str = "distinct_expand_limit";
const FILTER_FIELD: &str = "filter_field";
const FILTER_TYPE: &str = "filter_type";
const FILTER_MIN: &str = "filter_min";
const FILTER_MAX: &str = "filter_max";
const FILTER_MASK: &str = "filter_mask";
const BEGIN_TIME: &str = "begin_time";
const END_TIME: &str = "end_time";

const FILTER_TYPE_DEFAULT: &str = "Default";
const FILTER_TYPE_TIMESTAMP: &str = "FilterByTimeStamp";

/// Which documents a truncate keeps before selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterConstrain {
    /// Keep documents with `min <= value & mask <= max`.
    Range {
        field: String,
        min: i64,
        max: i64,
        mask: u64,
    },
    /// Keep documents with `begin <= value <= end`.
    Timestamp { field: String, begin: i64, end: i64 },
}

/// Filter and distinct constraints of a truncate profile, parsed from
/// `key=value;key=value` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiversityConstrain {
    pub distinct_field: Option<String>,
    /// Distinct values wanted among the selected documents.
    pub distinct_count: u64,
    /// Hard cap on the selection while chasing distinct values.
    pub distinct_expand_limit: u64,
    pub filter: Option<FilterConstrain>,
}

fn parse_pairs(params: &str) -> Result<Vec<(&str, &str)>> {
    params
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| IndexlibError::config(format!("truncate parameter '{pair}' is not key=value")))
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| IndexlibError::config(format!("truncate parameter {key}='{value}': {e}")))
}

impl DiversityConstrain {
    pub fn parse(params: &str) -> Result<Self> {
        let mut constrain = DiversityConstrain::default();
        let mut filter_field = None;
        let mut filter_type = None;
        let mut min = None;
        let mut max = None;
        let mut mask = None;
        let mut begin = None;
        let mut end = None;

        for (key, value) in parse_pairs(params)? {
            match key {
                DISTINCT_FIELD => constrain.distinct_field = Some(value.to_string()),
                DISTINCT_COUNT => constrain.distinct_count = parse_number(key, value)?,
                DISTINCT_EXPAND_LIMIT => constrain.distinct_expand_limit = parse_number(key, value)?,
                FILTER_FIELD => filter_field = Some(value.to_string()),
                FILTER_TYPE => filter_type = Some(value.to_string()),
                FILTER_MIN => min = Some(parse_number::<i64>(key, value)?),
                FILTER_MAX => max = Some(parse_number::<i64>(key, value)?),
                FILTER_MASK => mask = Some(parse_mask(value)?),
                BEGIN_TIME => begin = Some(parse_number::<i64>(key, value)?),
                END_TIME => end = Some(parse_number::<i64>(key, value)?),
                _ => {
                    return Err(IndexlibError::config(format!(
                        "unknown truncate parameter '{key}'"
                    )));
                }
            }
        }

        if let Some(field) = filter_field {
            let filter_type = filter_type.as_deref().unwrap_or(FILTER_TYPE_DEFAULT);
            constrain.filter = Some(match filter_type {
                FILTER_TYPE_DEFAULT => FilterConstrain::Range {
                    field,
                    min: min.unwrap_or(i64::MIN),
                    max: max.unwrap_or(i64::MAX),
                    mask: mask.unwrap_or(u64::MAX),
                },
                FILTER_TYPE_TIMESTAMP => {
                    let begin = begin.unwrap_or_else(|| {
                        log::warn!("timestamp filter on '{field}' has no {BEGIN_TIME}, using unbounded");
                        i64::MIN
                    });
                    let end = end.unwrap_or_else(|| {
                        log::warn!("timestamp filter on '{field}' has no {END_TIME}, using unbounded");
                        i64::MAX
                    });
                    FilterConstrain::Timestamp { field, begin, end }
                }
                other => {
                    return Err(IndexlibError::config(format!(
                        "unknown truncate filter type '{other}'"
                    )));
                }
            });
        } else if filter_type.is_some() {
            return Err(IndexlibError::config(format!(
                "{FILTER_TYPE} given without {FILTER_FIELD}"
            )));
        }

        constrain.validate()?;
        Ok(constrain)
    }

    pub fn need_distinct(&self) -> bool {
        self.distinct_field.is_some() && self.distinct_count > 0
    }

    pub fn need_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.distinct_field.is_some() && self.distinct_count == 0 {
            return Err(IndexlibError::config("distinct_field needs a positive distinct_count"));
        }
        if self.need_distinct() && self.distinct_expand_limit < self.distinct_count {
            return Err(IndexlibError::config(format!(
                "distinct_expand_limit {} is below distinct_count {}",
                self.distinct_expand_limit, self.distinct_count
            )));
        }
        match &self.filter {
            Some(FilterConstrain::Range { field, min, max, .. }) if min > max => Err(
                IndexlibError::config(format!("filter on '{field}' has min {min} above max {max}")),
            ),
            Some(FilterConstrain::Timestamp { field, begin, end }) if begin > end => {
                Err(IndexlibError::config(format!(
                    "timestamp filter on '{field}' begins at {begin} after its end {end}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Masks are written in decimal or as `0x` hex.
fn parse_mask(value: &str) -> Result<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)
            .map_err(|e| IndexlibError::config(format!("truncate parameter {FILTER_MASK}='{value}': {e}"))),
        None => parse_number(FILTER_MASK, value),
    }
}
