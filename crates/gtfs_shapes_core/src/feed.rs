use gtfs_shapes_model::{Agency, Calendar, CalendarDate, Route, Shape, Stop, StopTime, Trip};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{DuplicateSuppression, TRIP_COUNT_NO_COUNT_FIELD};
use crate::progress::{NoOpProgressHandler, ProgressHandler};
use crate::{CsvTable, ExtraFields, GtfsInput, GtfsInputError, GtfsInputReader};

pub const AGENCY_FILE: &str = "agency.txt";
pub const STOPS_FILE: &str = "stops.txt";
pub const ROUTES_FILE: &str = "routes.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const STOP_TIMES_FILE: &str = "stop_times.txt";
pub const CALENDAR_FILE: &str = "calendar.txt";
pub const CALENDAR_DATES_FILE: &str = "calendar_dates.txt";
pub const SHAPES_FILE: &str = "shapes.txt";

/// Non-standard columns to pick up while loading.
#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    pub route_fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GtfsFeed {
    pub agency: CsvTable<Agency>,
    pub stops: CsvTable<Stop>,
    pub routes: CsvTable<Route>,
    pub trips: CsvTable<Trip>,
    pub stop_times: CsvTable<StopTime>,
    pub calendar: Option<CsvTable<Calendar>>,
    pub calendar_dates: Option<CsvTable<CalendarDate>>,
    pub shapes: Option<CsvTable<Shape>>,
    pub route_extra: ExtraFields,
    pub trip_extra: ExtraFields,
}

impl GtfsFeed {
    pub fn from_input(input: &GtfsInput, options: &FeedOptions) -> Result<Self, GtfsInputError> {
        Self::from_reader(&input.reader(), options)
    }

    pub fn from_reader(
        reader: &GtfsInputReader,
        options: &FeedOptions,
    ) -> Result<Self, GtfsInputError> {
        Self::from_reader_with_progress(reader, options, &NoOpProgressHandler)
    }

    pub fn from_reader_with_progress(
        reader: &GtfsInputReader,
        options: &FeedOptions,
        progress: &dyn ProgressHandler,
    ) -> Result<Self, GtfsInputError> {
        let agency = load_required(reader, AGENCY_FILE, progress)?;
        let stops = load_required(reader, STOPS_FILE, progress)?;
        let routes = load_required(reader, ROUTES_FILE, progress)?;
        let trips = load_required(reader, TRIPS_FILE, progress)?;
        let stop_times = load_required(reader, STOP_TIMES_FILE, progress)?;

        let calendar = load_optional(reader, CALENDAR_FILE, progress)?;
        let calendar_dates = load_optional(reader, CALENDAR_DATES_FILE, progress)?;
        let shapes = load_optional(reader, SHAPES_FILE, progress)?;

        let route_extra = reader.read_extra_fields(ROUTES_FILE, "route_id", &options.route_fields)?;
        let trip_extra = reader.read_extra_fields(
            TRIPS_FILE,
            "trip_id",
            &[TRIP_COUNT_NO_COUNT_FIELD.to_string()],
        )?;

        let feed = Self {
            agency,
            stops,
            routes,
            trips,
            stop_times,
            calendar,
            calendar_dates,
            shapes,
            route_extra,
            trip_extra,
        };
        info!(
            "loaded feed: {} routes, {} trips, {} stop times, {} shape points",
            feed.routes.len(),
            feed.trips.len(),
            feed.stop_times.len(),
            feed.shapes.as_ref().map(CsvTable::len).unwrap_or_default()
        );
        Ok(feed)
    }

    /// Duplicate-suppression marker taken from the trips table, empty when
    /// the feed does not carry the marker column.
    pub fn duplicate_suppression(&self) -> DuplicateSuppression {
        DuplicateSuppression::from_extra_fields(&self.trip_extra)
    }
}

fn load_required<T: DeserializeOwned>(
    reader: &GtfsInputReader,
    file: &str,
    progress: &dyn ProgressHandler,
) -> Result<CsvTable<T>, GtfsInputError> {
    progress.on_start_file_load(file);
    let table = reader.read_required_csv(file)?;
    progress.on_finish_file_load(file);
    Ok(table)
}

fn load_optional<T: DeserializeOwned>(
    reader: &GtfsInputReader,
    file: &str,
    progress: &dyn ProgressHandler,
) -> Result<Option<CsvTable<T>>, GtfsInputError> {
    progress.on_start_file_load(file);
    let table = reader.read_optional_csv(file)?;
    progress.on_finish_file_load(file);
    Ok(table)
}
