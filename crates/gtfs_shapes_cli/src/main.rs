use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use tempfile::NamedTempFile;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use gtfs_shapes_core::{
    export_input, ExportConfig, GtfsInput, ModeFilter, OutputMode, ProgressHandler,
};

/// Files loaded from every feed, required and optional.
const FEED_FILE_COUNT: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// One line per aggregated shape.
    Shapes,
    /// One line per trip.
    Trips,
    /// One line per aggregated shape and route.
    Routes,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shapes => OutputMode::Shapes,
            ModeArg::Trips => OutputMode::Trips,
            ModeArg::Routes => OutputMode::Routes,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "gtfs-shapes")]
#[command(about = "Aggregates GTFS trips into shape lines with route statistics")]
struct Args {
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    #[arg(short = 'u', long = "url")]
    url: Option<String>,

    #[arg(short = 's', long = "storage_directory", alias = "storage-directory")]
    storage_directory: Option<PathBuf>,

    /// Output path; its stem names every written file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[arg(short = 'm', long = "mode", value_enum, default_value_t = ModeArg::Shapes)]
    mode: ModeArg,

    /// Comma separated route_type codes to export, e.g. "0,3".
    #[arg(long = "mots")]
    mots: Option<String>,

    /// Output SRID or projection definition.
    #[arg(short = 'p', long = "projection", default_value = "4326")]
    projection: String,

    /// Renames an output field, e.g. "Km_len=length".
    #[arg(long = "field-map")]
    field_map: Vec<String>,

    /// Display name of a route type, e.g. "3=Bus".
    #[arg(long = "type-name")]
    type_name: Vec<String>,

    /// Non-standard routes.txt column copied into route outputs.
    #[arg(long = "route-field")]
    route_field: Vec<String>,

    #[arg(long = "stops")]
    stops: bool,

    #[arg(long = "route-overview")]
    route_overview: bool,

    /// Export only this trip.
    #[arg(long = "trip")]
    trip: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let config = build_config(&args)?;

    let source = resolve_input(&args)?;
    let input = &source.input;
    info!("input {:?} detected", input.source());

    let started_at = Instant::now();
    let progress = IndicatifHandler::new();
    let summary = export_input(input, &config, &args.output, &progress)
        .with_context(|| format!("export {}", input.path().display()))?;
    progress.finish();

    for output in &summary.outputs {
        info!("wrote {}", output.display());
    }
    info!(
        "{} mode: {} records from {} aggregated shapes in {:.2}s",
        summary.mode.as_str(),
        summary.records,
        summary.aggregated_shapes,
        started_at.elapsed().as_secs_f64()
    );
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<ExportConfig> {
    let mut config = ExportConfig {
        mode: args.mode.into(),
        projection: args.projection.clone(),
        route_fields: args.route_field.clone(),
        write_stops: args.stops,
        write_route_overview: args.route_overview,
        trip_id: args.trip.clone(),
        ..Default::default()
    };
    if let Some(mots) = &args.mots {
        config.mode_filter = ModeFilter::parse(mots).context("invalid --mots")?;
    }
    for pair in &args.field_map {
        config
            .field_names
            .insert_pair(pair)
            .context("invalid --field-map")?;
    }
    for pair in &args.type_name {
        config
            .type_names
            .insert_pair(pair)
            .context("invalid --type-name")?;
    }
    if args.trip.is_some() && args.mode != ModeArg::Shapes {
        info!("--trip always writes the per-trip layout, ignoring --mode");
    }
    Ok(config)
}

/// Feed to export. A feed downloaded without a storage directory lives in a
/// temporary file that is removed when this is dropped.
struct FeedSource {
    input: GtfsInput,
    _download: Option<NamedTempFile>,
}

fn resolve_input(args: &Args) -> anyhow::Result<FeedSource> {
    match (&args.input, &args.url) {
        (Some(_), Some(_)) => {
            bail!("--input and --url cannot be provided at the same time");
        }
        (None, None) => {
            bail!("one of --input or --url must be provided");
        }
        (Some(path), None) => {
            if args.storage_directory.is_some() {
                bail!("--storage_directory requires --url");
            }
            Ok(FeedSource {
                input: load_input(path)?,
                _download: None,
            })
        }
        (None, Some(url)) => {
            if url.trim().is_empty() {
                bail!("--url must not be empty");
            }
            match &args.storage_directory {
                Some(dir) => {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("create storage directory {}", dir.display()))?;
                    let path = dir.join(archive_name(url));
                    let mut file = File::create(&path)
                        .with_context(|| format!("create {}", path.display()))?;
                    download(url, &mut file)?;
                    Ok(FeedSource {
                        input: load_input(&path)?,
                        _download: None,
                    })
                }
                None => {
                    let mut archive = temporary_archive()?;
                    download(url, archive.as_file_mut())?;
                    Ok(FeedSource {
                        input: load_input(archive.path())?,
                        _download: Some(archive),
                    })
                }
            }
        }
    }
}

fn load_input(path: &Path) -> anyhow::Result<GtfsInput> {
    GtfsInput::from_path(path).with_context(|| format!("load input {}", path.display()))
}

fn temporary_archive() -> anyhow::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("gtfs_download_")
        .suffix(".zip")
        .tempfile()
        .context("create temporary download file")
}

/// File name a downloaded feed is stored under, always ending in `.zip`.
fn archive_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("gtfs.zip");
    if name.to_ascii_lowercase().ends_with(".zip") {
        name.to_string()
    } else {
        format!("{name}.zip")
    }
}

fn download(url: &str, target: &mut File) -> anyhow::Result<()> {
    let client = Client::builder()
        .user_agent(format!("gtfs-shapes/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("download {url}"))?;
    let bytes = response
        .copy_to(target)
        .with_context(|| format!("save download of {url}"))?;
    target.flush().context("flush download")?;
    info!("downloaded {} bytes from {}", bytes, url);
    Ok(())
}

struct IndicatifHandler {
    _multi: MultiProgress,
    loading_pb: ProgressBar,
    writing_pb: ProgressBar,
}

impl IndicatifHandler {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let loading_pb = multi.add(ProgressBar::new(FEED_FILE_COUNT));
        loading_pb.set_style(bar_style("{bar:40.cyan/blue}"));
        loading_pb.set_message("Waiting to load files...");

        let writing_pb = multi.add(ProgressBar::new(0));
        writing_pb.set_style(bar_style("{bar:40.magenta/magenta}"));
        writing_pb.set_message("Waiting to write...");

        Self {
            _multi: multi,
            loading_pb,
            writing_pb,
        }
    }

    fn finish(&self) {
        self.loading_pb.finish_and_clear();
        self.writing_pb.finish_and_clear();
    }
}

fn bar_style(bar: &str) -> ProgressStyle {
    let template = format!("{{spinner:.green}} [{{elapsed_precise}}] {bar} {{percent}}% {{msg}}");
    ProgressStyle::with_template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ProgressHandler for IndicatifHandler {
    fn on_start_file_load(&self, file: &str) {
        self.loading_pb.set_message(format!("Loading {}", file));
    }

    fn on_finish_file_load(&self, _file: &str) {
        self.loading_pb.inc(1);
    }

    fn on_start_layer(&self, layer: &str, records: usize) {
        self.writing_pb.reset();
        self.writing_pb.set_length(records as u64);
        self.writing_pb.set_message(format!("Writing {}", layer));
    }

    fn on_finish_layer(&self, layer: &str) {
        self.writing_pb.set_message(format!("Wrote {}", layer));
    }

    fn increment_records_written(&self) {
        self.writing_pb.inc(1);
    }
}
