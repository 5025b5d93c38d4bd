//! Attribute layouts of the output layers.

use gtfs_shapes_model::{Agency, GtfsColor, Route, Stop};

use crate::aggregate::{AggrShape, RouteStats};
use crate::config::RouteTypeNames;
use crate::csv_reader::ExtraFields;
use crate::index::TripView;
use crate::schema::{FieldSpec, FieldValue, Record};

const COUNT_WIDTH: usize = 32;
const FLOAT_WIDTH: usize = 32;
const FLOAT_DECIMALS: usize = 10;

/// One aggregated shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub id: String,
    pub trip_ids: String,
    pub route_ids: String,
    pub route_names: String,
}

impl ShapeRecord {
    pub fn layout() -> Vec<FieldSpec> {
        vec![
            FieldSpec::text("Id"),
            FieldSpec::text("TripIds"),
            FieldSpec::text("RouteIds"),
            FieldSpec::text("RouteNames"),
        ]
    }

    pub fn from_shape(shape: &AggrShape<'_>) -> Self {
        Self {
            id: shape.shape.id.to_string(),
            trip_ids: shape.trip_ids_joined(),
            route_ids: shape.route_ids_joined(),
            route_names: shape.route_names_joined(),
        }
    }
}

impl Record for ShapeRecord {
    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.id.as_str().into(),
            self.trip_ids.as_str().into(),
            self.route_ids.as_str().into(),
            self.route_names.as_str().into(),
        ]
    }
}

/// One trip with its route attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRecord {
    pub id: String,
    pub headsign: Option<String>,
    pub short_name: Option<String>,
    pub direction_id: Option<i32>,
    pub block_id: Option<String>,
    pub wheelchair_accessible: Option<i32>,
    pub bikes_allowed: Option<i32>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_desc: Option<String>,
    pub route_type: i32,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
}

impl TripRecord {
    pub fn layout() -> Vec<FieldSpec> {
        vec![
            FieldSpec::text("Id"),
            FieldSpec::text("Headsign"),
            FieldSpec::text("ShortName"),
            FieldSpec::number("Dir_id", 1),
            FieldSpec::text("BlockId"),
            FieldSpec::number("Wheelchr_a", 1),
            FieldSpec::number("Bikes_alwd", 1),
            FieldSpec::text("R_ShrtName"),
            FieldSpec::text("R_LongName"),
            FieldSpec::text("R_Desc"),
            FieldSpec::number("R_Type", 16),
            FieldSpec::text("R_URL"),
            FieldSpec::text("R_Color"),
            FieldSpec::text("R_TextColor"),
        ]
    }

    pub fn from_trip(view: &TripView<'_>) -> Self {
        let trip = view.trip;
        let route = view.route;
        Self {
            id: trip.trip_id.clone(),
            headsign: trip.trip_headsign.clone(),
            short_name: trip.trip_short_name.clone(),
            direction_id: trip.direction_id.and_then(|value| value.code()),
            block_id: trip.block_id.clone(),
            wheelchair_accessible: trip.wheelchair_accessible.and_then(|value| value.code()),
            bikes_allowed: trip.bikes_allowed.and_then(|value| value.code()),
            route_short_name: route.route_short_name.clone(),
            route_long_name: route.route_long_name.clone(),
            route_desc: route.route_desc.clone(),
            route_type: route.route_type.code(),
            route_url: route.route_url.clone(),
            route_color: route.route_color.map(color_hex),
            route_text_color: route.route_text_color.map(color_hex),
        }
    }
}

fn color_hex(color: GtfsColor) -> String {
    color.to_string()
}

impl Record for TripRecord {
    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.id.as_str().into(),
            FieldValue::text(self.headsign.as_deref()),
            FieldValue::text(self.short_name.as_deref()),
            FieldValue::integer(self.direction_id),
            FieldValue::text(self.block_id.as_deref()),
            FieldValue::integer(self.wheelchair_accessible),
            FieldValue::integer(self.bikes_allowed),
            FieldValue::text(self.route_short_name.as_deref()),
            FieldValue::text(self.route_long_name.as_deref()),
            FieldValue::text(self.route_desc.as_deref()),
            FieldValue::integer(Some(self.route_type)),
            FieldValue::text(self.route_url.as_deref()),
            FieldValue::text(self.route_color.as_deref()),
            FieldValue::text(self.route_text_color.as_deref()),
        ]
    }
}

/// Route attributes shared by the per-route layer and the route overview.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInfo {
    pub route_id: String,
    pub short_name: String,
    pub long_name: String,
    pub type_name: String,
    pub agency_name: String,
    pub agency_url: String,
    pub add_fields: Vec<String>,
}

impl RouteInfo {
    pub fn from_route(
        route: &Route,
        agency: Option<&Agency>,
        type_names: &RouteTypeNames,
        route_extra: &ExtraFields,
        route_fields: &[String],
    ) -> Self {
        Self {
            route_id: route.route_id.clone(),
            short_name: route.route_short_name.clone().unwrap_or_default(),
            long_name: route.route_long_name.clone().unwrap_or_default(),
            type_name: type_names.name_for(route.route_type),
            agency_name: agency
                .map(|agency| agency.agency_name.clone())
                .unwrap_or_default(),
            agency_url: agency
                .and_then(|agency| agency.agency_url.clone())
                .unwrap_or_default(),
            add_fields: route_fields
                .iter()
                .map(|field| {
                    route_extra
                        .get(field, &route.route_id)
                        .unwrap_or_default()
                        .to_string()
                })
                .collect(),
        }
    }
}

/// One route running along one aggregated shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteShapeRecord {
    pub route: RouteInfo,
    pub frequency: u64,
    pub km_len: f64,
    pub km_tot: f64,
    pub wheelchair_trips: Option<f64>,
    pub wheelchair_stops: Option<f64>,
}

impl RouteShapeRecord {
    pub fn layout(route_fields: &[String]) -> Vec<FieldSpec> {
        let mut layout = vec![
            FieldSpec::text("Route_id"),
            FieldSpec::text("Short_name"),
            FieldSpec::text("Long_name"),
            FieldSpec::text("Type"),
            FieldSpec::number("Frequency", COUNT_WIDTH),
            FieldSpec::float("Km_len", FLOAT_WIDTH, FLOAT_DECIMALS),
            FieldSpec::float("Km_tot", FLOAT_WIDTH, FLOAT_DECIMALS),
            FieldSpec::text("Agency_name"),
            FieldSpec::text("Agency_url"),
            FieldSpec::float("Wchair_tr", FLOAT_WIDTH, FLOAT_DECIMALS),
            FieldSpec::float("Wchair_st", FLOAT_WIDTH, FLOAT_DECIMALS),
        ];
        layout.extend(route_fields.iter().map(FieldSpec::text));
        layout
    }

    pub fn new(route: RouteInfo, shape: &AggrShape<'_>, stats: &RouteStats) -> Self {
        let km_len = shape.meter_length() / 1000.0;
        Self {
            route,
            frequency: stats.trip_count,
            km_len,
            km_tot: stats.trip_count as f64 * km_len,
            wheelchair_trips: stats.wheelchair_trip_ratio(),
            wheelchair_stops: stats.wheelchair_stop_ratio(),
        }
    }
}

impl Record for RouteShapeRecord {
    fn values(&self) -> Vec<FieldValue> {
        let mut values = vec![
            self.route.route_id.as_str().into(),
            self.route.short_name.as_str().into(),
            self.route.long_name.as_str().into(),
            self.route.type_name.as_str().into(),
            self.frequency.into(),
            self.km_len.into(),
            self.km_tot.into(),
            self.route.agency_name.as_str().into(),
            self.route.agency_url.as_str().into(),
            FieldValue::float(self.wheelchair_trips),
            FieldValue::float(self.wheelchair_stops),
        ];
        values.extend(self.route.add_fields.iter().map(|value| value.as_str().into()));
        values
    }
}

/// One stop of the stations layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub id: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub desc: Option<String>,
    pub zone_id: Option<String>,
    pub url: Option<String>,
    pub location_type: Option<i32>,
    pub parent_station: Option<String>,
    pub timezone: Option<String>,
    pub wheelchair_boarding: Option<i32>,
}

impl StopRecord {
    pub fn layout() -> Vec<FieldSpec> {
        vec![
            FieldSpec::text("Id"),
            FieldSpec::text("Code"),
            FieldSpec::text("Name"),
            FieldSpec::text("Desc"),
            FieldSpec::text("Zone_id"),
            FieldSpec::text("Url"),
            FieldSpec::number("Location_type", 1),
            FieldSpec::text("Parent_station"),
            FieldSpec::text("Timezone"),
            FieldSpec::number("Wheelchair_boarding", 1),
        ]
    }

    pub fn from_stop(stop: &Stop) -> Self {
        Self {
            id: stop.stop_id.clone(),
            code: stop.stop_code.clone(),
            name: stop.stop_name.clone(),
            desc: stop.stop_desc.clone(),
            zone_id: stop.zone_id.clone(),
            url: stop.stop_url.clone(),
            location_type: stop.location_type.and_then(|value| value.code()),
            parent_station: stop.parent_station.clone(),
            timezone: stop.stop_timezone.clone(),
            wheelchair_boarding: stop.wheelchair_boarding.and_then(|value| value.code()),
        }
    }
}

impl Record for StopRecord {
    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.id.as_str().into(),
            FieldValue::text(self.code.as_deref()),
            FieldValue::text(self.name.as_deref()),
            FieldValue::text(self.desc.as_deref()),
            FieldValue::text(self.zone_id.as_deref()),
            FieldValue::text(self.url.as_deref()),
            FieldValue::integer(self.location_type),
            FieldValue::text(self.parent_station.as_deref()),
            FieldValue::text(self.timezone.as_deref()),
            FieldValue::integer(self.wheelchair_boarding),
        ]
    }
}

/// Per-route totals over all aggregated shapes of the route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOverviewRecord {
    pub route: RouteInfo,
    /// Unique trip occurrences.
    pub frequency: u64,
    /// Mean length of a trip occurrence.
    pub km_len: Option<f64>,
    pub km_tot: f64,
    pub km_max: f64,
    pub wheelchair_trips: Option<f64>,
    pub wheelchair_stops: Option<f64>,
}

impl RouteOverviewRecord {
    pub fn header(route_fields: &[String]) -> Vec<&str> {
        let mut header = vec![
            "Route_id",
            "Short_name",
            "Long_name",
            "Type",
            "Frequency",
            "Km_len",
            "Km_tot",
            "Km_max",
            "Agency_name",
            "Agency_url",
            "Wchair_tr",
            "Wchair_st",
        ];
        header.extend(route_fields.iter().map(String::as_str));
        header
    }

    /// Folds the route's aggregated shapes into one row.
    pub fn from_shapes<'s, 'a: 's>(
        route: RouteInfo,
        shapes: impl IntoIterator<Item = &'s AggrShape<'a>>,
    ) -> Self {
        let mut totals = RouteStats::default();
        let mut meters_total = 0.0;
        let mut meters_max: f64 = 0.0;
        for shape in shapes {
            let stats = shape.stats_for(&route.route_id);
            meters_total += shape.meter_length() * stats.trip_count as f64;
            meters_max = meters_max.max(shape.meter_length());
            totals.add(&stats);
        }

        Self {
            route,
            frequency: totals.unique_trip_count,
            km_len: (totals.trip_count > 0)
                .then(|| meters_total / totals.trip_count as f64 / 1000.0),
            km_tot: meters_total / 1000.0,
            km_max: meters_max / 1000.0,
            wheelchair_trips: totals.wheelchair_trip_ratio(),
            wheelchair_stops: totals.wheelchair_stop_ratio(),
        }
    }

    /// CSV cells, floats with four decimals and empty cells for undefined
    /// ratios.
    pub fn cells(&self) -> Vec<String> {
        let format = |value: Option<f64>| {
            value
                .map(|value| format!("{value:.4}"))
                .unwrap_or_default()
        };
        let mut cells = vec![
            self.route.route_id.clone(),
            self.route.short_name.clone(),
            self.route.long_name.clone(),
            self.route.type_name.clone(),
            self.frequency.to_string(),
            format(self.km_len),
            format(Some(self.km_tot)),
            format(Some(self.km_max)),
            self.route.agency_name.clone(),
            self.route.agency_url.clone(),
            format(self.wheelchair_trips),
            format(self.wheelchair_stops),
        ];
        cells.extend(self.route.add_fields.iter().cloned());
        cells
    }
}
