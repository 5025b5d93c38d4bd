//! Aggregates the trips of a GTFS feed into canonical shape records and
//! writes them as line layers with per-route statistics.

pub mod aggregate;
pub mod config;
pub mod csv_reader;
pub mod engine;
pub mod feed;
pub mod index;
pub mod input;
pub mod length;
pub mod progress;
pub mod projection;
pub mod records;
pub mod schema;
pub mod segment;
pub mod service;
pub mod sink;
pub mod writer;

pub use aggregate::{
    aggregate, AggrShape, Aggregation, AggregationConfig, AggregationKey, RouteStats,
};
pub use config::{
    ConfigError, DuplicateSuppression, ExportConfig, FieldNameMap, ModeFilter, OutputMode,
    RouteTypeNames, TRIP_COUNT_NO_COUNT_FIELD,
};
pub use csv_reader::{read_csv_table, CsvParseError, CsvTable, ExtraFields};
pub use engine::{export_feed, export_input, ExportError, ExportSummary};
pub use feed::{FeedOptions, GtfsFeed};
pub use index::{FeedIndex, ShapeGeometry, StopTimeView, TripView};
pub use input::{GtfsInput, GtfsInputError, GtfsInputReader};
pub use length::{haversine_meters, path_length_meters, segment_length_meters};
pub use progress::{NoOpProgressHandler, ProgressHandler};
pub use projection::{CoordinateProjector, ProjectionError, Projector};
pub use schema::{FieldKind, FieldSpec, FieldValue, Record, ResolvedField, Schema, MAX_FIELD_WIDTH};
pub use segment::{extract, segment_coords, LonLat, ShapePoint};
pub use service::{Service, ServiceCalendar};
pub use sink::{GeoJsonSink, Geometry, GeometrySink, MemorySink, RouteOverviewWriter, SinkError};
pub use writer::OutputPaths;
