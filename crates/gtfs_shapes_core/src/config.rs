use std::collections::{BTreeMap, BTreeSet};

use gtfs_shapes_model::RouteType;
use rustc_hash::FxHashSet;

use crate::csv_reader::ExtraFields;

/// Trips column marking a trip as a duplicate that must not be counted
/// towards unique trip frequencies.
pub const TRIP_COUNT_NO_COUNT_FIELD: &str = "__trip_count_no_count";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("expected <key>=<value>, got '{0}'")]
    InvalidPair(String),
    #[error("invalid route type code '{0}'")]
    InvalidRouteType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// One polyline per aggregated shape.
    #[default]
    Shapes,
    /// One polyline per trip.
    Trips,
    /// One polyline per aggregated shape and route.
    Routes,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Shapes => "shapes",
            OutputMode::Trips => "trips",
            OutputMode::Routes => "routes",
        }
    }
}

/// Route types to export. An empty filter lets every route through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeFilter {
    codes: BTreeSet<i32>,
}

impl ModeFilter {
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Parses a comma separated list of `route_type` codes, e.g. `"0,1,3"`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let mut codes = BTreeSet::new();
        for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let code = part
                .parse::<i32>()
                .map_err(|_| ConfigError::InvalidRouteType(part.to_string()))?;
            codes.insert(code);
        }
        Ok(Self { codes })
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn allows(&self, route_type: RouteType) -> bool {
        self.codes.is_empty() || self.codes.contains(&route_type.code())
    }
}

/// Renames output attribute fields. Unmapped names pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldNameMap {
    names: BTreeMap<String, String>,
}

impl FieldNameMap {
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.names.insert(from.into(), to.into());
    }

    /// Adds a mapping given as `old=new`.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), ConfigError> {
        let (from, to) = split_pair(pair)?;
        self.insert(from, to);
        Ok(())
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.names.get(name).map(String::as_str).unwrap_or(name)
    }
}

/// Display names for route types, e.g. `3 => "Bus"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTypeNames {
    names: BTreeMap<i32, String>,
}

impl RouteTypeNames {
    pub fn insert(&mut self, code: i32, name: impl Into<String>) {
        self.names.insert(code, name.into());
    }

    /// Adds a name given as `code=name`.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), ConfigError> {
        let (code, name) = split_pair(pair)?;
        let code = code
            .parse::<i32>()
            .map_err(|_| ConfigError::InvalidRouteType(code.to_string()))?;
        self.insert(code, name);
        Ok(())
    }

    /// The configured name, or the numeric code when none is configured.
    pub fn name_for(&self, route_type: RouteType) -> String {
        let code = route_type.code();
        self.names
            .get(&code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}

/// Trip ids excluded from unique trip counts.
#[derive(Debug, Clone, Default)]
pub struct DuplicateSuppression {
    suppressed: FxHashSet<String>,
}

impl DuplicateSuppression {
    pub fn from_trip_ids<I, S>(trip_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suppressed: trip_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Trips whose marker column holds exactly `"1"`.
    pub fn from_extra_fields(trip_extra: &ExtraFields) -> Self {
        Self {
            suppressed: trip_extra
                .entries(TRIP_COUNT_NO_COUNT_FIELD)
                .filter(|(_, value)| *value == "1")
                .map(|(trip_id, _)| trip_id.to_string())
                .collect(),
        }
    }

    pub fn is_suppressed(&self, trip_id: &str) -> bool {
        self.suppressed.contains(trip_id)
    }

    pub fn len(&self) -> usize {
        self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }
}

/// Everything an export run needs besides the feed itself.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub mode: OutputMode,
    pub mode_filter: ModeFilter,
    /// SRID or projection definition of the output coordinates.
    pub projection: String,
    pub field_names: FieldNameMap,
    pub type_names: RouteTypeNames,
    /// Non-standard `routes.txt` columns copied into route outputs.
    pub route_fields: Vec<String>,
    pub write_stops: bool,
    pub write_route_overview: bool,
    /// Export only this trip, in the per-trip layout.
    pub trip_id: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            mode_filter: ModeFilter::default(),
            projection: "4326".to_string(),
            field_names: FieldNameMap::default(),
            type_names: RouteTypeNames::default(),
            route_fields: Vec::new(),
            write_stops: false,
            write_route_overview: false,
            trip_id: None,
        }
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str), ConfigError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(ConfigError::InvalidPair(pair.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mode_filter_allows_everything() {
        let filter = ModeFilter::default();
        assert!(filter.allows(RouteType::Bus));
        assert!(filter.allows(RouteType::Extended(700)));
    }

    #[test]
    fn mode_filter_parses_code_list() {
        let filter = ModeFilter::parse("0, 3,,700").unwrap();
        assert!(filter.allows(RouteType::Tram));
        assert!(filter.allows(RouteType::Bus));
        assert!(filter.allows(RouteType::Extended(700)));
        assert!(!filter.allows(RouteType::Rail));
        assert_eq!(
            ModeFilter::parse("3,bus"),
            Err(ConfigError::InvalidRouteType("bus".to_string()))
        );
    }

    #[test]
    fn field_names_fall_back_to_original() {
        let mut names = FieldNameMap::default();
        names.insert_pair("Route_id=RID").unwrap();
        assert_eq!(names.resolve("Route_id"), "RID");
        assert_eq!(names.resolve("Short_name"), "Short_name");
        assert!(names.insert_pair("novalue=").is_err());
    }

    #[test]
    fn route_type_names_fall_back_to_code() {
        let mut names = RouteTypeNames::default();
        names.insert_pair("3=Bus").unwrap();
        assert_eq!(names.name_for(RouteType::Bus), "Bus");
        assert_eq!(names.name_for(RouteType::Extended(109)), "109");
        assert!(names.insert_pair("x=Bus").is_err());
    }

    #[test]
    fn suppression_reads_marker_column() {
        let mut extra = ExtraFields::default();
        extra.insert(TRIP_COUNT_NO_COUNT_FIELD, "T1", "1");
        extra.insert(TRIP_COUNT_NO_COUNT_FIELD, "T2", "0");
        extra.insert(TRIP_COUNT_NO_COUNT_FIELD, "T3", "");

        let suppression = DuplicateSuppression::from_extra_fields(&extra);
        assert!(suppression.is_suppressed("T1"));
        assert!(!suppression.is_suppressed("T2"));
        assert!(!suppression.is_suppressed("T3"));
        assert_eq!(suppression.len(), 1);
    }
}
