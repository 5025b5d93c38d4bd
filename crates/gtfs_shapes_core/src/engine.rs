use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::aggregate::{aggregate, AggregationConfig};
use crate::config::{ConfigError, ExportConfig, OutputMode};
use crate::feed::{FeedOptions, GtfsFeed};
use crate::index::FeedIndex;
use crate::progress::ProgressHandler;
use crate::projection::{ProjectionError, Projector};
use crate::sink::{GeoJsonSink, SinkError};
use crate::writer::{
    write_route_overview, write_route_shapes, write_shapes, write_single_trip, write_stops,
    write_trips, OutputPaths,
};
use crate::{GtfsInput, GtfsInputError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Input(#[from] GtfsInputError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trip '{0}' does not exist in the feed")]
    UnknownTrip(String),
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What one export run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub mode: OutputMode,
    pub aggregated_shapes: usize,
    pub records: usize,
    pub stations: Option<usize>,
    pub overview_rows: Option<usize>,
    pub outputs: Vec<PathBuf>,
}

/// Loads the feed behind `input` and writes every requested layer next to
/// `output`.
pub fn export_input(
    input: &GtfsInput,
    config: &ExportConfig,
    output: &Path,
    progress: &dyn ProgressHandler,
) -> Result<ExportSummary, ExportError> {
    let projector = Projector::from_spec(&config.projection)?;
    let options = FeedOptions {
        route_fields: config.route_fields.clone(),
    };
    let feed = GtfsFeed::from_reader_with_progress(&input.reader(), &options, progress)?;
    run(&feed, config, &projector, output, progress)
}

/// Writes every requested layer of an already loaded feed.
pub fn export_feed(
    feed: &GtfsFeed,
    config: &ExportConfig,
    output: &Path,
    progress: &dyn ProgressHandler,
) -> Result<ExportSummary, ExportError> {
    let projector = Projector::from_spec(&config.projection)?;
    run(feed, config, &projector, output, progress)
}

fn run(
    feed: &GtfsFeed,
    config: &ExportConfig,
    projector: &Projector,
    output: &Path,
    progress: &dyn ProgressHandler,
) -> Result<ExportSummary, ExportError> {
    let paths = OutputPaths::from_output(output);
    let index = FeedIndex::build(feed);
    info!(
        "indexed {} trips, {} shapes, {} services",
        index.trips().len(),
        index.shape_count(),
        index.services().len()
    );

    if let Some(trip_id) = &config.trip_id {
        if index.trip(trip_id).is_none() {
            return Err(ExportError::UnknownTrip(trip_id.clone()));
        }
        create_parent_dir(&paths.geometry)?;
        let mut sink = GeoJsonSink::create(&paths.geometry)?;
        let records = write_single_trip(
            &index,
            trip_id,
            projector,
            &config.field_names,
            &mut sink,
            progress,
        )?;
        let mut summary = ExportSummary {
            mode: OutputMode::Trips,
            aggregated_shapes: 0,
            records,
            stations: None,
            overview_rows: None,
            outputs: vec![paths.geometry.clone()],
        };
        write_stations(feed, config, projector, &paths, progress, &mut summary)?;
        return Ok(summary);
    }

    let aggregation_config = AggregationConfig {
        mode_filter: config.mode_filter.clone(),
        suppression: feed.duplicate_suppression(),
    };
    let aggregation = aggregate(&index, &aggregation_config);

    create_parent_dir(&paths.geometry)?;
    let mut sink = GeoJsonSink::create(&paths.geometry)?;
    let records = match config.mode {
        OutputMode::Shapes => write_shapes(
            &aggregation,
            projector,
            &config.field_names,
            &mut sink,
            progress,
        )?,
        OutputMode::Trips => write_trips(&index, config, projector, &mut sink, progress)?,
        OutputMode::Routes => {
            write_route_shapes(&index, &aggregation, config, projector, &mut sink, progress)?
        }
    };
    let mut summary = ExportSummary {
        mode: config.mode,
        aggregated_shapes: aggregation.len(),
        records,
        stations: None,
        overview_rows: None,
        outputs: vec![paths.geometry.clone()],
    };

    write_stations(feed, config, projector, &paths, progress, &mut summary)?;
    if config.write_route_overview {
        let rows = write_route_overview(&index, &aggregation, config, &paths.overview, progress)?;
        summary.overview_rows = Some(rows);
        summary.outputs.push(paths.overview.clone());
    }
    Ok(summary)
}

fn write_stations(
    feed: &GtfsFeed,
    config: &ExportConfig,
    projector: &Projector,
    paths: &OutputPaths,
    progress: &dyn ProgressHandler,
    summary: &mut ExportSummary,
) -> Result<(), ExportError> {
    if !config.write_stops {
        return Ok(());
    }
    let mut sink = GeoJsonSink::create(&paths.stations)?;
    let written = write_stops(feed, projector, &config.field_names, &mut sink, progress)?;
    summary.stations = Some(written);
    summary.outputs.push(paths.stations.clone());
    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<(), ExportError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|source| ExportError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}
