use gtfs_shapes_model::{Agency, Route, Stop, StopTime, Trip};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::feed::GtfsFeed;
use crate::segment::{LonLat, ShapePoint};
use crate::service::ServiceCalendar;

/// Ordered points of one shape.
#[derive(Debug, Clone)]
pub struct ShapeGeometry<'a> {
    pub id: &'a str,
    pub points: Vec<ShapePoint>,
}

#[derive(Debug, Clone, Copy)]
pub struct StopTimeView<'a> {
    pub stop_time: &'a StopTime,
    pub stop: Option<&'a Stop>,
    pub parent_station: Option<&'a Stop>,
}

impl<'a> StopTimeView<'a> {
    pub fn distance(&self) -> Option<f64> {
        self.stop_time.shape_dist_traveled
    }

    pub fn allows_boarding_or_alighting(&self) -> bool {
        self.stop_time.allows_boarding_or_alighting()
    }

    /// The stop, or its parent station, is wheelchair accessible.
    pub fn is_wheelchair_accessible(&self) -> bool {
        self.stop.is_some_and(Stop::is_wheelchair_accessible)
            || self
                .parent_station
                .is_some_and(Stop::is_wheelchair_accessible)
    }

    pub fn position(&self) -> Option<LonLat> {
        let stop = self.stop?;
        Some(LonLat::new(stop.stop_lon?, stop.stop_lat?))
    }
}

/// A trip linked to its route, agency, shape and ordered stop times.
#[derive(Debug, Clone)]
pub struct TripView<'a> {
    pub trip: &'a Trip,
    pub route: &'a Route,
    pub agency: Option<&'a Agency>,
    /// Id of the trip's shape, `None` when the trip has no usable shape.
    pub shape_id: Option<&'a str>,
    pub stop_times: Vec<StopTimeView<'a>>,
}

impl<'a> TripView<'a> {
    pub fn id(&self) -> &'a str {
        self.trip.trip_id.as_str()
    }

    pub fn route_id(&self) -> &'a str {
        self.route.route_id.as_str()
    }

    pub fn service_id(&self) -> &'a str {
        self.trip.service_id.as_str()
    }

    /// Distances traveled at the first and last stop.
    pub fn boundary_distances(&self) -> (Option<f64>, Option<f64>) {
        (
            self.stop_times.first().and_then(StopTimeView::distance),
            self.stop_times.last().and_then(StopTimeView::distance),
        )
    }

    /// Stop positions, used as the path of trips without a shape.
    pub fn stop_positions(&self) -> Vec<LonLat> {
        self.stop_times
            .iter()
            .filter_map(StopTimeView::position)
            .collect()
    }
}

/// Borrowed, cross-linked view over a loaded feed.
pub struct FeedIndex<'a> {
    feed: &'a GtfsFeed,
    trips: Vec<TripView<'a>>,
    trip_positions: FxHashMap<&'a str, usize>,
    shapes: FxHashMap<&'a str, ShapeGeometry<'a>>,
    routes: FxHashMap<&'a str, &'a Route>,
    agencies: FxHashMap<&'a str, &'a Agency>,
    single_agency: Option<&'a Agency>,
    services: ServiceCalendar,
}

impl<'a> FeedIndex<'a> {
    pub fn build(feed: &'a GtfsFeed) -> Self {
        let shapes = index_shapes(feed);

        let mut stops: FxHashMap<&'a str, &'a Stop> = FxHashMap::default();
        for stop in &feed.stops.rows {
            let stop_id = stop.stop_id.trim();
            if !stop_id.is_empty() {
                stops.insert(stop_id, stop);
            }
        }

        let mut routes: FxHashMap<&'a str, &'a Route> = FxHashMap::default();
        for route in &feed.routes.rows {
            let route_id = route.route_id.trim();
            if !route_id.is_empty() {
                routes.insert(route_id, route);
            }
        }

        let mut agencies: FxHashMap<&'a str, &'a Agency> = FxHashMap::default();
        for agency in &feed.agency.rows {
            if let Some(agency_id) = agency.agency_id.as_deref().map(str::trim) {
                agencies.insert(agency_id, agency);
            }
        }
        let single_agency = match feed.agency.rows.as_slice() {
            [agency] => Some(agency),
            _ => None,
        };

        let mut stop_times_by_trip: FxHashMap<&'a str, Vec<&'a StopTime>> = FxHashMap::default();
        for stop_time in &feed.stop_times.rows {
            let trip_id = stop_time.trip_id.trim();
            if trip_id.is_empty() {
                continue;
            }
            stop_times_by_trip.entry(trip_id).or_default().push(stop_time);
        }

        let mut trips = Vec::with_capacity(feed.trips.len());
        for trip in &feed.trips.rows {
            let trip_id = trip.trip_id.trim();
            if trip_id.is_empty() {
                continue;
            }
            let Some(route) = routes.get(trip.route_id.trim()).copied() else {
                warn!("trip {} references unknown route {}", trip_id, trip.route_id);
                continue;
            };
            let agency = resolve_agency(route, &agencies, single_agency);

            let shape_id = match trip.shape_id.as_deref().map(str::trim) {
                Some(shape_id) if shapes.contains_key(shape_id) => Some(shape_id),
                Some(shape_id) if !shape_id.is_empty() => {
                    warn!("trip {} references unknown shape {}", trip_id, shape_id);
                    None
                }
                _ => None,
            };

            let mut trip_stop_times = stop_times_by_trip.remove(trip_id).unwrap_or_default();
            trip_stop_times.sort_by_key(|stop_time| stop_time.stop_sequence);
            let stop_times = trip_stop_times
                .into_iter()
                .map(|stop_time| {
                    let stop = stops.get(stop_time.stop_id.trim()).copied();
                    if stop.is_none() {
                        debug!(
                            "stop time of trip {} references unknown stop {}",
                            trip_id, stop_time.stop_id
                        );
                    }
                    let parent_station = stop
                        .and_then(|stop| stop.parent_station.as_deref())
                        .and_then(|parent| stops.get(parent.trim()).copied());
                    StopTimeView {
                        stop_time,
                        stop,
                        parent_station,
                    }
                })
                .collect();

            trips.push(TripView {
                trip,
                route,
                agency,
                shape_id,
                stop_times,
            });
        }
        trips.sort_by(|a, b| a.id().cmp(b.id()));

        let trip_positions = trips
            .iter()
            .enumerate()
            .map(|(position, trip)| (trip.id(), position))
            .collect();

        Self {
            feed,
            trips,
            trip_positions,
            shapes,
            routes,
            agencies,
            single_agency,
            services: ServiceCalendar::from_feed(feed),
        }
    }

    pub fn feed(&self) -> &'a GtfsFeed {
        self.feed
    }

    /// All linked trips, ordered by trip id.
    pub fn trips(&self) -> &[TripView<'a>] {
        &self.trips
    }

    pub fn trip(&self, trip_id: &str) -> Option<&TripView<'a>> {
        self.trip_positions
            .get(trip_id)
            .and_then(|position| self.trips.get(*position))
    }

    pub fn shape(&self, shape_id: &str) -> Option<&ShapeGeometry<'a>> {
        self.shapes.get(shape_id)
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn route(&self, route_id: &str) -> Option<&'a Route> {
        self.routes.get(route_id).copied()
    }

    /// Agency named by the route, or the feed's only agency.
    pub fn agency_for(&self, route: &Route) -> Option<&'a Agency> {
        resolve_agency(route, &self.agencies, self.single_agency)
    }

    pub fn services(&self) -> &ServiceCalendar {
        &self.services
    }
}

fn resolve_agency<'a>(
    route: &Route,
    agencies: &FxHashMap<&'a str, &'a Agency>,
    single_agency: Option<&'a Agency>,
) -> Option<&'a Agency> {
    route
        .agency_id
        .as_deref()
        .and_then(|agency_id| agencies.get(agency_id.trim()).copied())
        .or(single_agency)
}

fn index_shapes(feed: &GtfsFeed) -> FxHashMap<&str, ShapeGeometry<'_>> {
    let mut rows_by_shape: FxHashMap<&str, Vec<&gtfs_shapes_model::Shape>> = FxHashMap::default();
    if let Some(shapes) = &feed.shapes {
        for row in &shapes.rows {
            let shape_id = row.shape_id.trim();
            if shape_id.is_empty() {
                continue;
            }
            rows_by_shape.entry(shape_id).or_default().push(row);
        }
    }

    rows_by_shape
        .into_iter()
        .map(|(id, mut rows)| {
            rows.sort_by_key(|row| row.shape_pt_sequence);
            let points = rows
                .into_iter()
                .map(|row| {
                    ShapePoint::new(row.shape_pt_lat, row.shape_pt_lon, row.shape_dist_traveled)
                })
                .collect();
            (id, ShapeGeometry { id, points })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::read_csv_table;

    fn feed() -> GtfsFeed {
        GtfsFeed {
            agency: read_csv_table("agency.txt", b"agency_name,agency_url\nOnly,https://only.example\n")
                .unwrap(),
            stops: read_csv_table(
                "stops.txt",
                b"stop_id,stop_lat,stop_lon,parent_station,wheelchair_boarding\n\
                  STA,47.0,8.0,,1\n\
                  A,47.0,8.0,STA,0\n\
                  B,47.1,8.1,,\n",
            )
            .unwrap(),
            routes: read_csv_table("routes.txt", b"route_id,route_type\nR1,3\n").unwrap(),
            trips: read_csv_table(
                "trips.txt",
                b"route_id,service_id,trip_id,shape_id\n\
                  R1,S,T2,SH1\n\
                  R1,S,T1,MISSING\n\
                  R9,S,T3,SH1\n",
            )
            .unwrap(),
            stop_times: read_csv_table(
                "stop_times.txt",
                b"trip_id,stop_id,stop_sequence,shape_dist_traveled\n\
                  T2,B,2,100\n\
                  T2,A,1,0\n",
            )
            .unwrap(),
            shapes: Some(
                read_csv_table(
                    "shapes.txt",
                    b"shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                      SH1,47.1,8.1,2\n\
                      SH1,47.0,8.0,1\n",
                )
                .unwrap(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn links_trips_in_id_order() {
        let feed = feed();
        let index = FeedIndex::build(&feed);

        let ids: Vec<_> = index.trips().iter().map(TripView::id).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert!(index.trip("T3").is_none());
        assert_eq!(index.trip("T1").unwrap().shape_id, None);
        assert_eq!(index.trip("T2").unwrap().shape_id, Some("SH1"));
    }

    #[test]
    fn orders_stop_times_and_shape_points() {
        let feed = feed();
        let index = FeedIndex::build(&feed);

        let trip = index.trip("T2").unwrap();
        assert_eq!(trip.boundary_distances(), (Some(0.0), Some(100.0)));
        assert_eq!(trip.stop_positions()[0], LonLat::new(8.0, 47.0));

        let shape = index.shape("SH1").unwrap();
        assert_eq!(shape.points[0].lat, 47.0);
        assert_eq!(shape.points[1].lat, 47.1);
    }

    #[test]
    fn resolves_parent_station_and_single_agency() {
        let feed = feed();
        let index = FeedIndex::build(&feed);

        let trip = index.trip("T2").unwrap();
        assert!(trip.stop_times[0].is_wheelchair_accessible());
        assert!(!trip.stop_times[1].is_wheelchair_accessible());
        assert_eq!(trip.agency.map(|agency| agency.agency_name.as_str()), Some("Only"));
    }
}
