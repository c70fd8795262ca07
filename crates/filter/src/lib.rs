//! Voltra filters: per-dataset filter definitions and the record predicate.
//!
//! A filter's `property` names where the comparison value comes from: a
//! literal constant, a `RECORD|`-marked path into the record, or a composite
//! expression (`FILTER_COMBINE`, `FILTER_DATE_YEAR`, `FILTER_DIVIDE`) over
//! `::`-separated arguments. Evaluation is pure and synchronous; anything
//! unresolvable makes the filter a no-op rather than an error.

#![forbid(unsafe_code)]

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::debug;
use voltra_core::{lookup_path, scalar_f64, scalar_string, EntityKind};

/// Prefix marking a property as a path into the record.
pub const RECORD_MARKER: &str = "RECORD|";
/// Separator between a composite operator and its arguments.
pub const PROPERTY_SEPARATOR: &str = "::";

pub const OP_COMBINE: &str = "FILTER_COMBINE";
pub const OP_DATE_YEAR: &str = "FILTER_DATE_YEAR";
pub const OP_DIVIDE: &str = "FILTER_DIVIDE";

/// One choice offered by a multiselect or dropdown filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterOption {
    pub label: String,
    pub value: serde_json::Value,
}

impl FilterOption {
    pub fn new(label: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { label: label.into(), value: value.into() }
    }
}

/// Input widget kind. The payload carries exactly the fields that kind
/// requires, so a definition cannot omit them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterInput {
    Text,
    Multiselect { options: Vec<FilterOption> },
    Dropdown { options: Vec<FilterOption> },
    Range { min: f64, max: f64 },
    YearMonth,
}

/// A concrete user selection, shaped by the input kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum FilterValue {
    Text(String),
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
    Range(f64, f64),
    YearMonth { year: i32, month0: u32 },
}

impl FilterValue {
    /// An unset selection admits every record.
    pub fn is_unset(&self) -> bool {
        match self {
            FilterValue::Text(s) => s.is_empty(),
            FilterValue::Many(vs) => vs.is_empty(),
            FilterValue::One(v) => {
                v.is_null() || matches!(v, serde_json::Value::String(s) if s.is_empty())
            }
            FilterValue::Range(..) | FilterValue::YearMonth { .. } => false,
        }
    }
}

/// Static description of one filterable field of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterDefinition {
    pub property: String,
    pub label: String,
    pub input: FilterInput,
    pub default_value: Option<FilterValue>,
}

impl FilterDefinition {
    /// Bind a user selection, producing the filter actually applied.
    pub fn with_value(&self, selected: Option<FilterValue>) -> AppliedFilter {
        AppliedFilter {
            property: self.property.clone(),
            input: self.input.clone(),
            selected,
        }
    }
}

/// A definition bound to a concrete selection. Sets of applied filters are
/// replaced wholesale on every submission, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedFilter {
    pub property: String,
    pub input: FilterInput,
    pub selected: Option<FilterValue>,
}

// ---------------- property helpers ----------------

/// `RECORD|`-mark a path so it resolves against the record.
pub fn record_path(path: &str) -> String {
    format!("{RECORD_MARKER}{path}")
}

/// Build a `FILTER_COMBINE` expression over record paths.
pub fn combine_paths(paths: &[&str]) -> String {
    let mut out = OP_COMBINE.to_string();
    for p in paths {
        out.push_str(PROPERTY_SEPARATOR);
        out.push_str(&record_path(p));
    }
    out
}

/// Build a `FILTER_DATE_YEAR` expression over a record path.
pub fn date_year_of(path: &str) -> String {
    format!("{OP_DATE_YEAR}{PROPERTY_SEPARATOR}{}", record_path(path))
}

/// Build a `FILTER_DIVIDE` expression; arguments are taken verbatim, so mix
/// record paths (via [`record_path`]) and literal constants freely.
pub fn divide_args(args: &[&str]) -> String {
    let mut out = OP_DIVIDE.to_string();
    for a in args {
        out.push_str(PROPERTY_SEPARATOR);
        out.push_str(a);
    }
    out
}

// ---------------- resolution ----------------

/// Resolve one non-composite property: a `RECORD|`-marked path reads the
/// record (absent path resolves to `None`), anything else is a literal.
fn resolve_single(raw: &serde_json::Value, property: &str) -> Option<serde_json::Value> {
    match property.find(RECORD_MARKER) {
        Some(at) => {
            let path = &property[at + RECORD_MARKER.len()..];
            lookup_path(raw, path).cloned()
        }
        None => Some(serde_json::Value::String(property.to_string())),
    }
}

/// Resolve a filter property against a record. `None` means the comparison
/// value is absent and the filter is skipped for this record.
pub fn resolve_property(raw: &serde_json::Value, property: &str) -> Option<serde_json::Value> {
    if !property.contains(PROPERTY_SEPARATOR) {
        return resolve_single(raw, property);
    }

    let mut parts = property.split(PROPERTY_SEPARATOR);
    let op = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match op {
        OP_COMBINE => {
            let mut joined = String::new();
            for a in &args {
                if let Some(s) = resolve_single(raw, a).as_ref().and_then(scalar_string) {
                    joined.push_str(&s);
                }
            }
            Some(serde_json::Value::String(joined))
        }
        OP_DATE_YEAR => {
            let secs = resolve_single(raw, args.first()?)
                .as_ref()
                .and_then(scalar_f64)? as i64;
            let dt = chrono::DateTime::from_timestamp(secs, 0)?;
            Some(serde_json::Value::from(dt.year()))
        }
        OP_DIVIDE => {
            let mut nums = args
                .iter()
                .map(|a| resolve_single(raw, a).as_ref().and_then(scalar_f64));
            let first = nums.next()??;
            let mut acc = first;
            for n in nums {
                acc /= n?;
            }
            // non-finite folds (division by zero) have no JSON form; skip
            serde_json::Number::from_f64(acc).map(serde_json::Value::Number)
        }
        other => {
            debug!(operator = other, "unrecognized composite operator; treating property as literal");
            Some(serde_json::Value::String(property.to_string()))
        }
    }
}

// ---------------- evaluation ----------------

fn passes_one(raw: &serde_json::Value, filter: &AppliedFilter) -> bool {
    let Some(selected) = &filter.selected else { return true };
    if selected.is_unset() {
        return true;
    }
    let Some(resolved) = resolve_property(raw, &filter.property) else { return true };

    match (&filter.input, selected) {
        (FilterInput::Text, FilterValue::Text(q)) => match scalar_string(&resolved) {
            Some(s) => s.to_lowercase().contains(&q.to_lowercase()),
            None => true,
        },
        (FilterInput::Multiselect { .. }, FilterValue::Many(chosen)) => {
            match scalar_string(&resolved) {
                Some(s) => chosen.iter().any(|c| scalar_string(c).as_deref() == Some(s.as_str())),
                None => true,
            }
        }
        (FilterInput::Dropdown { .. }, FilterValue::One(v)) => {
            match (scalar_string(&resolved), scalar_string(v)) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        (FilterInput::Range { .. }, FilterValue::Range(min, max)) => {
            match scalar_f64(&resolved) {
                Some(n) => *min <= n && n <= *max,
                None => true,
            }
        }
        (FilterInput::YearMonth, FilterValue::YearMonth { year, month0 }) => {
            match scalar_f64(&resolved)
                .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
            {
                Some(dt) => dt.year() == *year && dt.month0() == *month0,
                None => true,
            }
        }
        (input, value) => {
            debug!(?input, ?value, "selection shape does not match input kind; skipping filter");
            true
        }
    }
}

/// A record is admitted iff it passes every applied filter (logical AND).
pub fn record_passes_filters(raw: &serde_json::Value, filters: &[AppliedFilter]) -> bool {
    filters.iter().all(|f| passes_one(raw, f))
}

// ---------------- built-in registry ----------------

fn def(
    property: String,
    label: &str,
    input: FilterInput,
    default_value: Option<FilterValue>,
) -> FilterDefinition {
    FilterDefinition { property, label: label.to_string(), input, default_value }
}

fn country_options() -> Vec<FilterOption> {
    ["DE", "FR", "CH", "DK", "ES", "PT"]
        .iter()
        .map(|c| FilterOption::new(*c, *c))
        .collect()
}

fn year_options() -> Vec<FilterOption> {
    (2018..=2026).map(|y| FilterOption::new(y.to_string(), y)).collect()
}

/// The console's filterable fields, per dataset. Leaf declarations only; the
/// loader and evaluator are agnostic to what is listed here.
pub fn builtin_filters_for(kind: EntityKind) -> Vec<FilterDefinition> {
    match kind {
        EntityKind::ProducingAsset => vec![
            def(
                combine_paths(&[
                    "offChainProperties.facilityName",
                    "offChainProperties.city",
                    "offChainProperties.country",
                ]),
                "Search",
                FilterInput::Text,
                None,
            ),
            def(
                record_path("offChainProperties.country"),
                "Country",
                FilterInput::Dropdown { options: country_options() },
                None,
            ),
            def(
                record_path("offChainProperties.assetType"),
                "Asset Type",
                FilterInput::Multiselect {
                    options: ["Solar", "Wind", "BiomassGas", "RunRiverHydro"]
                        .iter()
                        .map(|t| FilterOption::new(*t, *t))
                        .collect(),
                },
                Some(FilterValue::Many(Vec::new())),
            ),
            def(
                divide_args(&[&record_path("offChainProperties.capacityWh"), "1000"]),
                "Nameplate Capacity (kW)",
                FilterInput::Range { min: 0.0, max: 10_000.0 },
                None,
            ),
        ],
        EntityKind::ConsumingAsset => vec![
            def(
                combine_paths(&[
                    "offChainProperties.facilityName",
                    "offChainProperties.city",
                    "offChainProperties.country",
                ]),
                "Search",
                FilterInput::Text,
                None,
            ),
            def(
                record_path("offChainProperties.country"),
                "Country",
                FilterInput::Dropdown { options: country_options() },
                None,
            ),
        ],
        EntityKind::Demand => vec![
            def(
                record_path("status"),
                "Status",
                FilterInput::Dropdown {
                    options: ["Active", "Paused", "Archived"]
                        .iter()
                        .map(|s| FilterOption::new(*s, *s))
                        .collect(),
                },
                None,
            ),
            def(
                record_path("offChainProperties.locationCountry"),
                "Country",
                FilterInput::Dropdown { options: country_options() },
                None,
            ),
            def(
                divide_args(&[&record_path("offChainProperties.targetWhPerPeriod"), "1000"]),
                "Energy per Period (kWh)",
                FilterInput::Range { min: 0.0, max: 1_000_000.0 },
                None,
            ),
            def(
                record_path("creationTime"),
                "Created",
                FilterInput::YearMonth,
                None,
            ),
        ],
        EntityKind::Supply => vec![
            def(
                record_path("assetId"),
                "Asset",
                FilterInput::Text,
                None,
            ),
            def(
                divide_args(&[&record_path("offChainProperties.availableWh"), "1000"]),
                "Available (kWh)",
                FilterInput::Range { min: 0.0, max: 1_000_000.0 },
                None,
            ),
            def(
                record_path("offChainProperties.price"),
                "Price (cents)",
                FilterInput::Range { min: 0.0, max: 100_000.0 },
                None,
            ),
        ],
        EntityKind::Agreement => vec![
            def(record_path("demandId"), "Demand", FilterInput::Text, None),
            def(record_path("supplyId"), "Supply", FilterInput::Text, None),
            def(
                record_path("offChainProperties.start"),
                "Start",
                FilterInput::YearMonth,
                None,
            ),
        ],
        EntityKind::Certificate => vec![
            def(record_path("owner"), "Owner", FilterInput::Text, None),
            def(
                record_path("status"),
                "Status",
                FilterInput::Dropdown {
                    options: ["Requested", "Active", "Claimed"]
                        .iter()
                        .map(|s| FilterOption::new(*s, *s))
                        .collect(),
                },
                None,
            ),
            def(
                date_year_of("creationTime"),
                "Creation Year",
                FilterInput::Dropdown { options: year_options() },
                None,
            ),
            def(
                record_path("creationTime"),
                "Created",
                FilterInput::YearMonth,
                None,
            ),
            def(
                record_path("priceCents"),
                "Price (cents)",
                FilterInput::Range { min: 0.0, max: 100_000.0 },
                None,
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset(country: &str, capacity_wh: u64) -> serde_json::Value {
        json!({
            "id": "0",
            "offChainProperties": {
                "facilityName": "Solar One",
                "city": "Zug",
                "country": country,
                "assetType": "Solar",
                "capacityWh": capacity_wh
            }
        })
    }

    fn text_filter(property: String, q: &str) -> AppliedFilter {
        AppliedFilter {
            property,
            input: FilterInput::Text,
            selected: Some(FilterValue::Text(q.to_string())),
        }
    }

    #[test]
    fn text_filter_is_case_insensitive_substring() {
        let rec = asset("DE", 100_000);
        let f = text_filter(record_path("offChainProperties.facilityName"), "sol");
        assert!(record_passes_filters(&rec, &[f]));

        let f = text_filter(record_path("offChainProperties.facilityName"), "WIND");
        assert!(!record_passes_filters(&rec, &[f]));
    }

    #[test]
    fn and_semantics_fail_any_fail_all() {
        // country matches but capacity (50 kW) is below the range
        let rec = asset("DE", 50_000);
        let country = AppliedFilter {
            property: record_path("offChainProperties.country"),
            input: FilterInput::Dropdown { options: country_options() },
            selected: Some(FilterValue::One(json!("DE"))),
        };
        let capacity = AppliedFilter {
            property: divide_args(&[&record_path("offChainProperties.capacityWh"), "1000"]),
            input: FilterInput::Range { min: 100.0, max: 200.0 },
            selected: Some(FilterValue::Range(100.0, 200.0)),
        };
        assert!(record_passes_filters(&rec, &[country.clone()]));
        assert!(!record_passes_filters(&rec, &[country, capacity]));
    }

    #[test]
    fn dropdown_matches_on_string_form() {
        let rec = json!({"status": "Active", "assetType": 1});
        let by_status = AppliedFilter {
            property: record_path("status"),
            input: FilterInput::Dropdown { options: vec![] },
            selected: Some(FilterValue::One(json!("Active"))),
        };
        assert!(record_passes_filters(&rec, &[by_status]));

        // numeric payload vs string option value
        let by_type = AppliedFilter {
            property: record_path("assetType"),
            input: FilterInput::Dropdown { options: vec![] },
            selected: Some(FilterValue::One(json!("1"))),
        };
        assert!(record_passes_filters(&rec, &[by_type]));
    }

    #[test]
    fn multiselect_membership() {
        let rec = json!({"offChainProperties": {"assetType": "Wind"}});
        let f = AppliedFilter {
            property: record_path("offChainProperties.assetType"),
            input: FilterInput::Multiselect { options: vec![] },
            selected: Some(FilterValue::Many(vec![json!("Solar"), json!("Wind")])),
        };
        assert!(record_passes_filters(&rec, &[f]));

        let f = AppliedFilter {
            property: record_path("offChainProperties.assetType"),
            input: FilterInput::Multiselect { options: vec![] },
            selected: Some(FilterValue::Many(vec![json!("Solar")])),
        };
        assert!(!record_passes_filters(&rec, &[f]));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let rec = json!({"priceCents": 150});
        let mk = |min: f64, max: f64| AppliedFilter {
            property: record_path("priceCents"),
            input: FilterInput::Range { min, max },
            selected: Some(FilterValue::Range(min, max)),
        };
        assert!(record_passes_filters(&rec, &[mk(150.0, 300.0)]));
        assert!(record_passes_filters(&rec, &[mk(0.0, 150.0)]));
        assert!(!record_passes_filters(&rec, &[mk(151.0, 300.0)]));
    }

    #[test]
    fn year_month_matches_utc_calendar() {
        // 2020-01-01T00:00:00Z
        let rec = json!({"creationTime": 1_577_836_800});
        let mk = |year: i32, month0: u32| AppliedFilter {
            property: record_path("creationTime"),
            input: FilterInput::YearMonth,
            selected: Some(FilterValue::YearMonth { year, month0 }),
        };
        assert!(record_passes_filters(&rec, &[mk(2020, 0)]));
        assert!(!record_passes_filters(&rec, &[mk(2020, 1)]));
        assert!(!record_passes_filters(&rec, &[mk(2019, 0)]));
    }

    #[test]
    fn date_year_composite_resolves_calendar_year() {
        let rec = json!({"creationTime": 1_577_836_800});
        let resolved = resolve_property(&rec, &date_year_of("creationTime")).unwrap();
        assert_eq!(resolved, json!(2020));
    }

    #[test]
    fn divide_composite_folds_left_to_right() {
        let rec = json!({"a": 1000, "b": 10});
        let prop = divide_args(&[&record_path("a"), &record_path("b")]);
        assert_eq!(resolve_property(&rec, &prop).unwrap(), json!(100.0));

        // literal divisor
        let prop = divide_args(&[&record_path("a"), "10", "10"]);
        assert_eq!(resolve_property(&rec, &prop).unwrap(), json!(10.0));
    }

    #[test]
    fn divide_by_zero_or_non_numeric_skips_filter() {
        let rec = json!({"a": 1000, "b": 0, "c": "words"});
        assert_eq!(resolve_property(&rec, &divide_args(&[&record_path("a"), &record_path("b")])), None);
        assert_eq!(resolve_property(&rec, &divide_args(&[&record_path("a"), &record_path("c")])), None);

        // an unresolvable comparison value admits the record
        let f = AppliedFilter {
            property: divide_args(&[&record_path("a"), &record_path("b")]),
            input: FilterInput::Range { min: 0.0, max: 1.0 },
            selected: Some(FilterValue::Range(0.0, 1.0)),
        };
        assert!(record_passes_filters(&rec, &[f]));
    }

    #[test]
    fn combine_concatenates_and_ignores_absent_parts() {
        let rec = json!({"offChainProperties": {"city": "Zug", "country": "CH"}});
        let prop = combine_paths(&[
            "offChainProperties.facilityName",
            "offChainProperties.city",
            "offChainProperties.country",
        ]);
        assert_eq!(resolve_property(&rec, &prop).unwrap(), json!("ZugCH"));
    }

    #[test]
    fn unknown_operator_falls_back_to_literal() {
        let rec = json!({"a": 1});
        let prop = format!("FILTER_SHOUT{PROPERTY_SEPARATOR}RECORD|a");
        assert_eq!(
            resolve_property(&rec, &prop).unwrap(),
            serde_json::Value::String(prop.clone())
        );
    }

    #[test]
    fn literal_property_compares_as_constant() {
        let rec = json!({"anything": true});
        let f = AppliedFilter {
            property: "fixed-value".to_string(),
            input: FilterInput::Text,
            selected: Some(FilterValue::Text("FIXED".to_string())),
        };
        assert!(record_passes_filters(&rec, &[f]));
        let f = AppliedFilter {
            property: "fixed-value".to_string(),
            input: FilterInput::Text,
            selected: Some(FilterValue::Text("other".to_string())),
        };
        assert!(!record_passes_filters(&rec, &[f]));
    }

    #[test]
    fn absent_path_admits_record() {
        let rec = json!({"offChainProperties": {}});
        let f = AppliedFilter {
            property: record_path("offChainProperties.country"),
            input: FilterInput::Dropdown { options: vec![] },
            selected: Some(FilterValue::One(json!("DE"))),
        };
        assert!(record_passes_filters(&rec, &[f]));
    }

    #[test]
    fn unset_selection_admits_all_kinds() {
        let rec = json!({"status": "Active", "priceCents": 10});
        let unset = vec![
            AppliedFilter {
                property: record_path("status"),
                input: FilterInput::Text,
                selected: Some(FilterValue::Text(String::new())),
            },
            AppliedFilter {
                property: record_path("status"),
                input: FilterInput::Multiselect { options: vec![] },
                selected: Some(FilterValue::Many(Vec::new())),
            },
            AppliedFilter {
                property: record_path("status"),
                input: FilterInput::Dropdown { options: vec![] },
                selected: Some(FilterValue::One(json!(""))),
            },
            AppliedFilter {
                property: record_path("status"),
                input: FilterInput::Dropdown { options: vec![] },
                selected: None,
            },
        ];
        assert!(record_passes_filters(&rec, &unset));
    }

    #[test]
    fn builtin_registry_shapes_are_complete() {
        for kind in EntityKind::ALL {
            let defs = builtin_filters_for(kind);
            assert!(!defs.is_empty(), "{kind}");
            for d in defs {
                match d.input {
                    FilterInput::Multiselect { ref options } | FilterInput::Dropdown { ref options } => {
                        assert!(!options.is_empty(), "{kind}: {} has no options", d.label)
                    }
                    FilterInput::Range { min, max } => {
                        assert!(min < max, "{kind}: {} has empty range", d.label)
                    }
                    _ => {}
                }
            }
        }
    }
}
