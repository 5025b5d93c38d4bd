//! Grouping of trips into canonical shape records.
//!
//! Trips that run along the same shape over the same distance interval
//! (rounded to a tenth of a unit) share one [`AggrShape`]. Per-route
//! statistics are accumulated by expanding each trip's service calendar.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use gtfs_shapes_model::Route;
use tracing::{debug, info};

use crate::config::{DuplicateSuppression, ModeFilter};
use crate::index::{FeedIndex, ShapeGeometry, TripView};
use crate::length::segment_length_meters;
use crate::projection::{CoordinateProjector, ProjectionError};
use crate::segment::extract;

/// Shape id plus the rounded distance interval, if the trips provide one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregationKey {
    pub shape_id: String,
    /// Interval bounds in tenths of a distance unit.
    pub range: Option<(i64, i64)>,
}

impl AggregationKey {
    pub fn whole_shape(shape_id: impl Into<String>) -> Self {
        Self {
            shape_id: shape_id.into(),
            range: None,
        }
    }

    /// Sub-range key when both bounds are finite and ordered, otherwise the
    /// whole-shape key.
    pub fn for_bounds(shape_id: impl Into<String>, from: Option<f64>, to: Option<f64>) -> Self {
        Self {
            shape_id: shape_id.into(),
            range: valid_bounds(from, to).map(|(from, to)| (tenths(from), tenths(to))),
        }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((from, to)) => write!(
                f,
                "{}@{:.1}:{:.1}",
                self.shape_id,
                from as f64 / 10.0,
                to as f64 / 10.0
            ),
            None => f.write_str(&self.shape_id),
        }
    }
}

/// `value` in tenths, rounded the way it prints with one decimal.
fn tenths(value: f64) -> i64 {
    format!("{value:.1}")
        .replace('.', "")
        .parse()
        .unwrap_or_else(|_| (value * 10.0).round() as i64)
}

pub(crate) fn valid_bounds(from: Option<f64>, to: Option<f64>) -> Option<(f64, f64)> {
    match (from, to) {
        (Some(from), Some(to)) if from.is_finite() && to.is_finite() && from <= to => {
            Some((from, to))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    /// Trip occurrences over all active service days.
    pub trip_count: u64,
    /// Like `trip_count`, without trips marked as duplicates.
    pub unique_trip_count: u64,
    /// Stop visits that allow boarding or alighting.
    pub stop_count: u64,
    pub wheelchair_trips: u64,
    pub wheelchair_stops: u64,
}

impl RouteStats {
    pub fn add(&mut self, other: &RouteStats) {
        self.trip_count += other.trip_count;
        self.unique_trip_count += other.unique_trip_count;
        self.stop_count += other.stop_count;
        self.wheelchair_trips += other.wheelchair_trips;
        self.wheelchair_stops += other.wheelchair_stops;
    }

    /// Share of trip occurrences that are wheelchair accessible.
    pub fn wheelchair_trip_ratio(&self) -> Option<f64> {
        ratio(self.wheelchair_trips, self.trip_count)
    }

    /// Share of qualifying stop visits at accessible stops.
    pub fn wheelchair_stop_ratio(&self) -> Option<f64> {
        ratio(self.wheelchair_stops, self.stop_count)
    }
}

pub(crate) fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// All trips sharing one [`AggregationKey`].
#[derive(Debug, Clone)]
pub struct AggrShape<'a> {
    pub key: AggregationKey,
    pub shape: &'a ShapeGeometry<'a>,
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub trips: BTreeSet<&'a str>,
    pub routes: BTreeMap<&'a str, &'a Route>,
    pub route_stats: BTreeMap<&'a str, RouteStats>,
    meter_length: f64,
}

impl<'a> AggrShape<'a> {
    fn new(
        key: AggregationKey,
        shape: &'a ShapeGeometry<'a>,
        from: Option<f64>,
        to: Option<f64>,
    ) -> Self {
        let meter_length = segment_length_meters(&shape.points, from, to);
        Self {
            key,
            shape,
            from,
            to,
            trips: BTreeSet::new(),
            routes: BTreeMap::new(),
            route_stats: BTreeMap::new(),
            meter_length,
        }
    }

    pub fn meter_length(&self) -> f64 {
        self.meter_length
    }

    pub fn stats_for(&self, route_id: &str) -> RouteStats {
        self.route_stats.get(route_id).copied().unwrap_or_default()
    }

    pub fn trip_ids_joined(&self) -> String {
        self.trips.iter().copied().collect::<Vec<_>>().join(",")
    }

    pub fn route_ids_joined(&self) -> String {
        self.routes.keys().copied().collect::<Vec<_>>().join(",")
    }

    pub fn route_names_joined(&self) -> String {
        let mut names: Vec<&str> = self
            .routes
            .values()
            .map(|route| route.route_short_name.as_deref().unwrap_or_default())
            .collect();
        names.sort_unstable();
        names.join(",")
    }

    pub fn geometry<P>(&self, projector: &P) -> Result<Vec<[f64; 2]>, ProjectionError>
    where
        P: CoordinateProjector + ?Sized,
    {
        extract(&self.shape.points, self.from, self.to, projector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationConfig {
    pub mode_filter: ModeFilter,
    pub suppression: DuplicateSuppression,
}

#[derive(Debug, Default)]
pub struct Aggregation<'a> {
    pub shapes: BTreeMap<AggregationKey, AggrShape<'a>>,
    pub route_shapes: BTreeMap<&'a str, BTreeSet<AggregationKey>>,
}

impl<'a> Aggregation<'a> {
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Statistics of one route summed over all of its shapes.
    pub fn route_totals(&self, route_id: &str) -> RouteStats {
        let mut totals = RouteStats::default();
        for key in self.route_shapes.get(route_id).into_iter().flatten() {
            if let Some(shape) = self.shapes.get(key) {
                totals.add(&shape.stats_for(route_id));
            }
        }
        totals
    }
}

/// Skip reason of a trip, `None` when the trip takes part in aggregation.
fn skip_reason(trip: &TripView<'_>, mode_filter: &ModeFilter) -> Option<&'static str> {
    if trip.shape_id.is_none() {
        Some("no shape")
    } else if !mode_filter.allows(trip.route.route_type) {
        Some("route type filtered")
    } else if trip.stop_times.len() < 2 {
        Some("fewer than two stop times")
    } else {
        None
    }
}

/// Groups the trips of `index` into aggregated shapes.
pub fn aggregate<'a>(index: &'a FeedIndex<'a>, config: &AggregationConfig) -> Aggregation<'a> {
    let mut aggregation = Aggregation::default();
    let mut skipped = 0usize;

    for trip in index.trips() {
        if let Some(reason) = skip_reason(trip, &config.mode_filter) {
            debug!("skipping trip {}: {}", trip.id(), reason);
            skipped += 1;
            continue;
        }
        let Some(shape) = trip.shape_id.and_then(|shape_id| index.shape(shape_id)) else {
            skipped += 1;
            continue;
        };

        let (from, to) = trip.boundary_distances();
        let key = AggregationKey::for_bounds(shape.id, from, to);
        let bounds = valid_bounds(from, to);

        let route_id = trip.route_id();
        aggregation
            .route_shapes
            .entry(route_id)
            .or_default()
            .insert(key.clone());

        let aggr_shape = aggregation.shapes.entry(key.clone()).or_insert_with(|| {
            AggrShape::new(
                key,
                shape,
                bounds.map(|(from, _)| from),
                bounds.map(|(_, to)| to),
            )
        });
        aggr_shape.trips.insert(trip.id());
        aggr_shape.routes.insert(route_id, trip.route);

        let stats = aggr_shape.route_stats.entry(route_id).or_default();
        let Some(service) = index.services().get(trip.service_id()) else {
            debug!("trip {} has no calendar for service {}", trip.id(), trip.service_id());
            continue;
        };

        let qualifying_stops = trip
            .stop_times
            .iter()
            .filter(|stop_time| stop_time.allows_boarding_or_alighting())
            .count() as u64;
        let accessible_stops = trip
            .stop_times
            .iter()
            .filter(|stop_time| stop_time.is_wheelchair_accessible())
            .count() as u64;
        let suppressed = config.suppression.is_suppressed(trip.id());
        let accessible_trip = trip.trip.is_wheelchair_accessible();

        for _day in service.active_days() {
            stats.trip_count += 1;
            if !suppressed {
                stats.unique_trip_count += 1;
            }
            stats.stop_count += qualifying_stops;
            if accessible_trip {
                stats.wheelchair_trips += 1;
            }
            stats.wheelchair_stops += accessible_stops;
        }
    }

    info!(
        "aggregated {} trips into {} shapes over {} routes ({} skipped)",
        index.trips().len() - skipped,
        aggregation.shapes.len(),
        aggregation.route_shapes.len(),
        skipped
    );
    aggregation
}
