//! Emission of the output layers.

use std::borrow::{Borrow, Cow};
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::aggregate::{valid_bounds, Aggregation, AggregationKey};
use crate::config::{ExportConfig, FieldNameMap};
use crate::engine::ExportError;
use crate::feed::GtfsFeed;
use crate::index::{FeedIndex, TripView};
use crate::progress::ProgressHandler;
use crate::projection::CoordinateProjector;
use crate::records::{
    RouteInfo, RouteOverviewRecord, RouteShapeRecord, ShapeRecord, StopRecord, TripRecord,
};
use crate::schema::{resolve_widths, FieldSpec, Record};
use crate::segment::{extract, project_all};
use crate::sink::{Geometry, GeometrySink, RouteOverviewWriter};

/// Files written for one output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub geometry: PathBuf,
    pub stations: PathBuf,
    pub overview: PathBuf,
}

impl OutputPaths {
    /// Derives `<stem>.geojson`, `<stem>.stations.geojson` and `<stem>.csv`
    /// next to `output`, dropping any extension it carries.
    pub fn from_output(output: &Path) -> Self {
        let stem = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "shapes".to_string());
        let dir = output.parent().unwrap_or_else(|| Path::new(""));
        Self {
            geometry: dir.join(format!("{stem}.geojson")),
            stations: dir.join(format!("{stem}.stations.geojson")),
            overview: dir.join(format!("{stem}.csv")),
        }
    }
}

/// One layer being streamed into a sink.
struct LayerWriter<'s> {
    layer: &'static str,
    sink: &'s mut dyn GeometrySink,
    progress: &'s dyn ProgressHandler,
}

impl<'s> LayerWriter<'s> {
    /// Resolves the schema over every record of the layer, then opens `sink`.
    fn begin<'r, R, I>(
        layer: &'static str,
        records: I,
        layout: &[FieldSpec],
        names: &FieldNameMap,
        sink: &'s mut dyn GeometrySink,
        progress: &'s dyn ProgressHandler,
    ) -> Result<Self, ExportError>
    where
        R: Record + 'r,
        I: IntoIterator<Item = &'r R>,
        I::IntoIter: ExactSizeIterator,
    {
        let records = records.into_iter();
        progress.on_start_layer(layer, records.len());
        let schema = resolve_widths(records, layout, names);
        sink.begin(&schema)?;
        Ok(Self {
            layer,
            sink,
            progress,
        })
    }

    fn write<R: Record>(&mut self, geometry: &Geometry, record: &R) -> Result<(), ExportError> {
        self.sink.write(geometry, &record.values())?;
        self.progress.increment_records_written();
        Ok(())
    }

    fn finish(self) -> Result<usize, ExportError> {
        let written = self.sink.finish()?;
        self.progress.on_finish_layer(self.layer);
        info!("wrote {} {} records", written, self.layer);
        Ok(written)
    }
}

/// Writes rows whose geometries are already computed.
fn write_layer<G, R>(
    layer: &'static str,
    rows: &[(G, R)],
    layout: &[FieldSpec],
    names: &FieldNameMap,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    G: Borrow<Geometry>,
    R: Record,
{
    let records = rows.iter().map(|(_, record)| record);
    let mut writer = LayerWriter::begin(layer, records, layout, names, sink, progress)?;
    for (geometry, record) in rows {
        writer.write(<G as Borrow<Geometry>>::borrow(geometry), record)?;
    }
    writer.finish()
}

/// Projected polyline of every aggregated shape, computed once per key.
fn shape_geometries<'k, P>(
    aggregation: &'k Aggregation<'_>,
    projector: &P,
) -> Result<BTreeMap<&'k AggregationKey, Geometry>, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    aggregation
        .shapes
        .iter()
        .map(|(key, shape)| -> Result<_, ExportError> {
            Ok((key, Geometry::LineString(shape.geometry(projector)?)))
        })
        .collect()
}

/// One polyline per aggregated shape.
pub fn write_shapes<P>(
    aggregation: &Aggregation<'_>,
    projector: &P,
    names: &FieldNameMap,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let geometries = shape_geometries(aggregation, projector)?;
    let rows: Vec<_> = aggregation
        .shapes
        .iter()
        .filter_map(|(key, shape)| Some((geometries.get(key)?, ShapeRecord::from_shape(shape))))
        .collect();
    write_layer("shapes", &rows, &ShapeRecord::layout(), names, sink, progress)
}

/// One polyline per aggregated shape and route running along it. Routes
/// sharing a shape share its geometry.
pub fn write_route_shapes<P>(
    index: &FeedIndex<'_>,
    aggregation: &Aggregation<'_>,
    config: &ExportConfig,
    projector: &P,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let geometries = shape_geometries(aggregation, projector)?;
    let mut rows = Vec::new();
    for (route_id, keys) in &aggregation.route_shapes {
        let Some(info) = route_info(index, route_id, config) else {
            continue;
        };
        for key in keys {
            let (Some(shape), Some(geometry)) = (aggregation.shapes.get(key), geometries.get(key))
            else {
                continue;
            };
            let record = RouteShapeRecord::new(info.clone(), shape, &shape.stats_for(route_id));
            rows.push((geometry, record));
        }
    }
    write_layer(
        "routes",
        &rows,
        &RouteShapeRecord::layout(&config.route_fields),
        &config.field_names,
        sink,
        progress,
    )
}

/// One polyline per trip passing the mode filter.
///
/// Field widths are resolved over the records first, geometries are then
/// streamed. Trips sharing an aggregation key share one cached geometry,
/// trips without a shape are drawn through their stops.
pub fn write_trips<P>(
    index: &FeedIndex<'_>,
    config: &ExportConfig,
    projector: &P,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let mut trips = Vec::new();
    let mut records = Vec::new();
    for trip in index.trips() {
        if !config.mode_filter.allows(trip.route.route_type) {
            debug!("skipping trip {}: route type filtered", trip.id());
            continue;
        }
        trips.push(trip);
        records.push(TripRecord::from_trip(trip));
    }

    let mut writer = LayerWriter::begin(
        "trips",
        &records,
        &TripRecord::layout(),
        &config.field_names,
        sink,
        progress,
    )?;
    let mut cache = TripGeometryCache::default();
    for (trip, record) in trips.into_iter().zip(&records) {
        let geometry = trip_geometry(index, trip, projector, &mut cache)?;
        writer.write(&geometry, record)?;
    }
    debug!("{} distinct trip geometries", cache.len());
    writer.finish()
}

/// The trip `trip_id` alone, in the per-trip layout. The mode filter does
/// not apply.
pub fn write_single_trip<P>(
    index: &FeedIndex<'_>,
    trip_id: &str,
    projector: &P,
    names: &FieldNameMap,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let trip = index
        .trip(trip_id)
        .ok_or_else(|| ExportError::UnknownTrip(trip_id.to_string()))?;
    let mut cache = TripGeometryCache::default();
    let geometry = trip_geometry(index, trip, projector, &mut cache)?;
    let rows = [(geometry, TripRecord::from_trip(trip))];
    write_layer("trips", &rows, &TripRecord::layout(), names, sink, progress)
}

type TripGeometryCache = FxHashMap<AggregationKey, Geometry>;

/// Geometry of one trip. Shaped trips borrow the cached polyline of their
/// aggregation key, the rest are drawn through their stops.
fn trip_geometry<'c, P>(
    index: &FeedIndex<'_>,
    trip: &TripView<'_>,
    projector: &P,
    cache: &'c mut TripGeometryCache,
) -> Result<Cow<'c, Geometry>, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let Some(shape) = trip.shape_id.and_then(|shape_id| index.shape(shape_id)) else {
        let coords = project_all(&trip.stop_positions(), projector)?;
        return Ok(Cow::Owned(Geometry::LineString(coords)));
    };

    let (from, to) = trip.boundary_distances();
    let geometry = match cache.entry(AggregationKey::for_bounds(shape.id, from, to)) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let bounds = valid_bounds(from, to);
            let coords = extract(
                &shape.points,
                bounds.map(|(from, _)| from),
                bounds.map(|(_, to)| to),
                projector,
            )?;
            entry.insert(Geometry::LineString(coords))
        }
    };
    Ok(Cow::Borrowed(geometry))
}

/// Point layer of every stop with a position, ordered by stop id.
pub fn write_stops<P>(
    feed: &GtfsFeed,
    projector: &P,
    names: &FieldNameMap,
    sink: &mut dyn GeometrySink,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError>
where
    P: CoordinateProjector + ?Sized,
{
    let mut stops: Vec<_> = feed.stops.rows.iter().collect();
    stops.sort_by(|a, b| a.stop_id.cmp(&b.stop_id));

    let mut rows = Vec::with_capacity(stops.len());
    for stop in stops {
        let (Some(lat), Some(lon)) = (stop.stop_lat, stop.stop_lon) else {
            debug!("stop {} has no position", stop.stop_id);
            continue;
        };
        let position = projector.project(lon, lat)?;
        rows.push((Geometry::Point(position), StopRecord::from_stop(stop)));
    }
    write_layer("stations", &rows, &StopRecord::layout(), names, sink, progress)
}

/// Per-route CSV totals over all aggregated shapes of each route.
pub fn write_route_overview(
    index: &FeedIndex<'_>,
    aggregation: &Aggregation<'_>,
    config: &ExportConfig,
    path: &Path,
    progress: &dyn ProgressHandler,
) -> Result<usize, ExportError> {
    let header: Vec<&str> = RouteOverviewRecord::header(&config.route_fields)
        .into_iter()
        .map(|name| config.field_names.resolve(name))
        .collect();

    progress.on_start_layer("route overview", aggregation.route_shapes.len());
    let mut writer = RouteOverviewWriter::create(path, &header)?;
    for (route_id, keys) in &aggregation.route_shapes {
        let Some(info) = route_info(index, route_id, config) else {
            continue;
        };
        let shapes = keys.iter().filter_map(|key| aggregation.shapes.get(key));
        let record = RouteOverviewRecord::from_shapes(info, shapes);
        writer.write_row(&record.cells())?;
        progress.increment_records_written();
    }
    let rows = writer.finish()?;
    progress.on_finish_layer("route overview");
    info!("wrote {} route overview rows", rows);
    Ok(rows)
}

fn route_info(index: &FeedIndex<'_>, route_id: &str, config: &ExportConfig) -> Option<RouteInfo> {
    let route = index.route(route_id)?;
    Some(RouteInfo::from_route(
        route,
        index.agency_for(route),
        &config.type_names,
        &index.feed().route_extra,
        &config.route_fields,
    ))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::aggregate::{aggregate, AggregationConfig};
    use crate::config::ModeFilter;
    use crate::csv_reader::read_csv_table;
    use crate::progress::NoOpProgressHandler;
    use crate::projection::Projector;
    use crate::schema::FieldValue;
    use crate::sink::MemorySink;

    fn feed() -> GtfsFeed {
        GtfsFeed {
            agency: read_csv_table("agency.txt", b"agency_name,agency_url\nTransit,https://t.example\n")
                .unwrap(),
            stops: read_csv_table(
                "stops.txt",
                b"stop_id,stop_name,stop_lat,stop_lon\n\
                  C,Gamma,0.0,2.0\n\
                  A,Alpha,0.0,0.0\n\
                  B,Beta,0.0,1.0\n\
                  X,Nowhere,,\n",
            )
            .unwrap(),
            routes: read_csv_table(
                "routes.txt",
                b"route_id,route_short_name,route_type\nBUS,10,3\nTRAM,T,0\n",
            )
            .unwrap(),
            trips: read_csv_table(
                "trips.txt",
                b"route_id,service_id,trip_id,shape_id\n\
                  BUS,D,T1,SH\n\
                  BUS,D,T2,SH\n\
                  TRAM,D,T3,\n",
            )
            .unwrap(),
            stop_times: read_csv_table(
                "stop_times.txt",
                b"trip_id,stop_id,stop_sequence,shape_dist_traveled\n\
                  T1,A,1,0\nT1,B,2,1000\n\
                  T2,A,1,0\nT2,C,2,2000\n\
                  T3,B,1,\nT3,C,2,\n",
            )
            .unwrap(),
            calendar: Some(
                read_csv_table(
                    "calendar.txt",
                    b"service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                      D,1,1,1,1,1,1,1,20240101,20240102\n",
                )
                .unwrap(),
            ),
            shapes: Some(
                read_csv_table(
                    "shapes.txt",
                    b"shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled\n\
                      SH,0.0,0.0,1,0\nSH,0.0,1.0,2,1000\nSH,0.0,2.0,3,2000\n",
                )
                .unwrap(),
            ),
            ..Default::default()
        }
    }

    fn line(sink: &MemorySink, position: usize) -> &[[f64; 2]] {
        match &sink.records[position].0 {
            Geometry::LineString(coords) => coords,
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn derives_output_paths_from_stem() {
        let paths = OutputPaths::from_output(Path::new("out/berlin.shp"));
        assert_eq!(paths.geometry, PathBuf::from("out/berlin.geojson"));
        assert_eq!(paths.stations, PathBuf::from("out/berlin.stations.geojson"));
        assert_eq!(paths.overview, PathBuf::from("out/berlin.csv"));
    }

    #[test]
    fn shapes_layer_has_one_row_per_key() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let aggregation = aggregate(&index, &AggregationConfig::default());
        let mut sink = MemorySink::default();

        let written = write_shapes(
            &aggregation,
            &Projector::Identity,
            &FieldNameMap::default(),
            &mut sink,
            &NoOpProgressHandler,
        )
        .unwrap();

        assert_eq!(written, 2);
        assert!(sink.finished);
        assert_eq!(line(&sink, 0), &[[0.0, 0.0], [1.0, 0.0]]);
        assert_eq!(line(&sink, 1).len(), 3);
        assert_eq!(sink.records[0].1[1], FieldValue::Text("T1".to_string()));
    }

    #[test]
    fn trips_layer_falls_back_to_stops() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let mut sink = MemorySink::default();

        write_trips(
            &index,
            &ExportConfig::default(),
            &Projector::Identity,
            &mut sink,
            &NoOpProgressHandler,
        )
        .unwrap();

        assert_eq!(sink.records.len(), 3);
        assert_eq!(line(&sink, 2), &[[1.0, 0.0], [2.0, 0.0]]);
    }

    #[test]
    fn trips_layer_applies_mode_filter() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let config = ExportConfig {
            mode_filter: ModeFilter::new([0]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();

        write_trips(
            &index,
            &config,
            &Projector::Identity,
            &mut sink,
            &NoOpProgressHandler,
        )
        .unwrap();

        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.records[0].1[0], FieldValue::Text("T3".to_string()));
    }

    #[test]
    fn trips_on_one_key_borrow_the_cached_geometry() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let calls = Cell::new(0);
        let counting = |lon: f64, lat: f64| {
            calls.set(calls.get() + 1);
            [lon, lat]
        };
        let mut cache = TripGeometryCache::default();
        let trip = index.trip("T1").unwrap();

        let first = trip_geometry(&index, trip, &counting, &mut cache).unwrap();
        assert!(matches!(first, Cow::Borrowed(Geometry::LineString(coords)) if coords.len() == 2));
        let projected = calls.get();
        let second = trip_geometry(&index, trip, &counting, &mut cache).unwrap();
        assert!(matches!(second, Cow::Borrowed(_)));
        assert_eq!(calls.get(), projected);

        let shapeless = index.trip("T3").unwrap();
        let geometry = trip_geometry(&index, shapeless, &counting, &mut cache).unwrap();
        assert!(matches!(geometry, Cow::Owned(_)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unknown_single_trip_is_an_error() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let mut sink = MemorySink::default();

        let result = write_single_trip(
            &index,
            "NOPE",
            &Projector::Identity,
            &FieldNameMap::default(),
            &mut sink,
            &NoOpProgressHandler,
        );

        assert!(matches!(result, Err(ExportError::UnknownTrip(id)) if id == "NOPE"));
        assert!(sink.schema.is_none());
    }

    #[test]
    fn route_layer_counts_trips_per_route() {
        let feed = feed();
        let index = FeedIndex::build(&feed);
        let aggregation = aggregate(&index, &AggregationConfig::default());
        let mut config = ExportConfig::default();
        config.type_names.insert(3, "Bus");
        let mut sink = MemorySink::default();

        write_route_shapes(
            &index,
            &aggregation,
            &config,
            &Projector::Identity,
            &mut sink,
            &NoOpProgressHandler,
        )
        .unwrap();

        assert_eq!(sink.records.len(), 2);
        let values = &sink.records[0].1;
        assert_eq!(values[0], FieldValue::Text("BUS".to_string()));
        assert_eq!(values[3], FieldValue::Text("Bus".to_string()));
        assert_eq!(values[4], FieldValue::Integer(2));
    }

    #[test]
    fn stops_layer_skips_stops_without_position() {
        let feed = feed();
        let mut sink = MemorySink::default();

        write_stops(
            &feed,
            &Projector::Identity,
            &FieldNameMap::default(),
            &mut sink,
            &NoOpProgressHandler,
        )
        .unwrap();

        let ids: Vec<_> = sink.records.iter().map(|(_, values)| values[0].clone()).collect();
        assert_eq!(ids, vec!["A".into(), "B".into(), FieldValue::from("C")]);
        assert_eq!(sink.records[1].0, Geometry::Point([1.0, 0.0]));
    }
}
