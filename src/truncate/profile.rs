use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::version::SortOrder;

use super::constrain::DiversityConstrain;
use super::distinctor::DocDistinctor;
use super::doc_filter::{DocValueLookup, create_doc_filter};

/// One sort key of a truncate profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    pub field: String,
    pub order: SortOrder,
}

impl SortParam {
    /// Parse `-price;+ts`: `-` sorts descending, `+` or no prefix ascending.
    pub fn parse_list(params: &str) -> Result<Vec<SortParam>> {
        params
            .split(';')
            .map(str::trim)
            .filter(|param| !param.is_empty())
            .map(|param| {
                let (order, field) = match param.as_bytes()[0] {
                    b'-' => (SortOrder::Descending, &param[1..]),
                    b'+' => (SortOrder::Ascending, &param[1..]),
                    _ => (SortOrder::Ascending, param),
                };
                let field = field.trim();
                if field.is_empty() {
                    return Err(IndexlibError::config(format!(
                        "sort parameter '{param}' names no field"
                    )));
                }
                Ok(SortParam {
                    field: field.to_string(),
                    order,
                })
            })
            .collect()
    }
}

/// How one truncated posting list is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateProfile {
    pub name: String,
    #[serde(default)]
    pub sort_params: Vec<SortParam>,
    /// Documents kept before distinct expansion.
    pub limit: usize,
    /// `key=value;...` filter and distinct parameters.
    #[serde(default)]
    pub diversity: String,
}

impl TruncateProfile {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        TruncateProfile {
            name: name.into(),
            sort_params: Vec::new(),
            limit,
            diversity: String::new(),
        }
    }

    pub fn with_sort(mut self, params: &str) -> Result<Self> {
        self.sort_params = SortParam::parse_list(params)?;
        Ok(self)
    }

    pub fn with_diversity(mut self, params: impl Into<String>) -> Self {
        self.diversity = params.into();
        self
    }

    pub fn constrain(&self) -> Result<DiversityConstrain> {
        if self.limit == 0 {
            return Err(IndexlibError::config(format!(
                "truncate profile '{}' has a zero limit",
                self.name
            )));
        }
        DiversityConstrain::parse(&self.diversity)
    }
}

fn compare_keys(a: &[Option<f64>], b: &[Option<f64>], params: &[SortParam]) -> Ordering {
    for ((x, y), param) in a.iter().zip(b).zip(params) {
        let ordering = match (x, y) {
            (Some(x), Some(y)) => match param.order {
                SortOrder::Ascending => x.total_cmp(y),
                SortOrder::Descending => y.total_cmp(x),
            },
            // missing values go last in either order
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Select the documents of a posting list kept by `profile`.
///
/// Filtered documents are dropped, the rest ranked by the sort params (ties
/// by doc id) and taken until `limit` is reached. With a distinct constraint
/// selection continues past the limit until enough distinct values are seen
/// or `distinct_expand_limit` documents are selected. The result is in doc id
/// order.
pub fn truncate_posting<I>(
    profile: &TruncateProfile,
    doc_ids: I,
    lookup: &dyn DocValueLookup,
) -> Result<Vec<DocId>>
where
    I: IntoIterator<Item = DocId>,
{
    let constrain = profile.constrain()?;
    let filter = constrain.filter.as_ref().map(create_doc_filter);

    let mut candidates = Vec::new();
    for doc_id in doc_ids {
        if let Some(filter) = &filter {
            if filter.is_filtered(doc_id, lookup)? {
                continue;
            }
        }
        let mut keys = Vec::with_capacity(profile.sort_params.len());
        for param in &profile.sort_params {
            keys.push(lookup.value(doc_id, &param.field)?.and_then(|v| v.as_f64()));
        }
        candidates.push((doc_id, keys));
    }
    candidates.sort_by(|(doc_a, keys_a), (doc_b, keys_b)| {
        compare_keys(keys_a, keys_b, &profile.sort_params).then(doc_a.cmp(doc_b))
    });

    let mut distinctor = match (&constrain.distinct_field, constrain.need_distinct()) {
        (Some(field), true) => Some(DocDistinctor::new(field.clone(), constrain.distinct_count)),
        _ => None,
    };
    let expand_limit = constrain.distinct_expand_limit as usize;

    let mut selected = Vec::with_capacity(profile.limit.min(candidates.len()));
    for (doc_id, _) in candidates {
        if selected.len() >= profile.limit {
            let keep_going = distinctor
                .as_ref()
                .is_some_and(|d| !d.is_satisfied() && selected.len() < expand_limit);
            if !keep_going {
                break;
            }
        }
        if let Some(distinctor) = distinctor.as_mut() {
            distinctor.add(doc_id, lookup)?;
        }
        selected.push(doc_id);
    }

    log::debug!(
        "truncate profile '{}' kept {} documents",
        profile.name,
        selected.len()
    );
    selected.sort_unstable();
    Ok(selected)
}
