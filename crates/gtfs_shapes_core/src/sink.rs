//! Output sinks.
//!
//! Every file sink writes to `<path>.tmp` and renames it onto `<path>` only
//! once the layer is complete, so a failed run never leaves a truncated file
//! under the final name.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use geojson::{Feature, JsonObject, JsonValue};
use tracing::{debug, warn};

use crate::schema::{truncate_to_width, FieldValue, ResolvedField, Schema};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode feature: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write csv row: {0}")]
    Csv(#[from] csv::Error),
    #[error("sink used before begin()")]
    NotStarted,
    #[error("record has {got} values, schema has {expected} fields")]
    ValueCount { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    LineString(Vec<[f64; 2]>),
    Point([f64; 2]),
}

impl Geometry {
    fn to_geojson(&self) -> Option<geojson::Geometry> {
        let value = match self {
            // A polyline needs two positions.
            Geometry::LineString(coords) if coords.len() < 2 => return None,
            Geometry::LineString(coords) => {
                geojson::Value::LineString(coords.iter().map(|coord| coord.to_vec()).collect())
            }
            Geometry::Point(coord) => geojson::Value::Point(coord.to_vec()),
        };
        Some(geojson::Geometry::new(value))
    }
}

/// Receives one layer: its schema, then one geometry and value row per record.
pub trait GeometrySink {
    fn begin(&mut self, schema: &Schema) -> Result<(), SinkError>;

    /// `values` follow the order of the schema fields.
    fn write(&mut self, geometry: &Geometry, values: &[FieldValue]) -> Result<(), SinkError>;

    /// Commits the layer and returns the number of records written.
    fn finish(&mut self) -> Result<usize, SinkError>;
}

/// A file that only appears under its final name once committed.
struct PendingFile {
    path: PathBuf,
    tmp_path: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn create(path: &Path) -> Result<(Self, File), SinkError> {
        let mut tmp_name = OsString::from(path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let file = File::create(&tmp_path).map_err(|source| SinkError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        Ok((
            Self {
                path: path.to_path_buf(),
                tmp_path,
                committed: false,
            },
            file,
        ))
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        fs::rename(&self.tmp_path, &self.path).map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.committed = true;
        debug!("wrote {}", self.path.display());
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = fs::remove_file(&self.tmp_path) {
                warn!("could not remove {}: {}", self.tmp_path.display(), err);
            }
        }
    }
}

/// Streams a GeoJSON `FeatureCollection`. The resolved schema is kept in a
/// `fields` member of the collection.
pub struct GeoJsonSink {
    // Declared before `file` so the writer is flushed and closed first.
    writer: Option<BufWriter<File>>,
    file: PendingFile,
    schema: Option<Schema>,
    written: usize,
}

impl GeoJsonSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let (file, handle) = PendingFile::create(path.as_ref())?;
        Ok(Self {
            writer: Some(BufWriter::new(handle)),
            file,
            schema: None,
            written: 0,
        })
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.file.tmp_path.clone(),
            source,
        }
    }
}

impl GeometrySink for GeoJsonSink {
    fn begin(&mut self, schema: &Schema) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotStarted)?;
        let header = format!(
            "{{\"type\":\"FeatureCollection\",\"fields\":{},\"features\":[",
            serde_json::to_string(schema)?
        );
        writer
            .write_all(header.as_bytes())
            .map_err(|err| self.io_error(err))?;
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn write(&mut self, geometry: &Geometry, values: &[FieldValue]) -> Result<(), SinkError> {
        let schema = self.schema.as_ref().ok_or(SinkError::NotStarted)?;
        if values.len() != schema.len() {
            return Err(SinkError::ValueCount {
                expected: schema.len(),
                got: values.len(),
            });
        }

        let properties: JsonObject = schema
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| (field.name.clone(), json_value(field, value)))
            .collect();
        let feature = Feature {
            bbox: None,
            geometry: geometry.to_geojson(),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        };

        let separator: &[u8] = if self.written == 0 { b"\n" } else { b",\n" };
        let writer = self.writer.as_mut().ok_or(SinkError::NotStarted)?;
        let result = writer
            .write_all(separator)
            .and_then(|_| {
                serde_json::to_writer(&mut *writer, &feature).map_err(std::io::Error::from)
            });
        result.map_err(|err| self.io_error(err))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<usize, SinkError> {
        if self.schema.is_none() {
            return Err(SinkError::NotStarted);
        }
        let mut writer = self.writer.take().ok_or(SinkError::NotStarted)?;
        writer
            .write_all(b"\n]}\n")
            .and_then(|_| writer.flush())
            .map_err(|err| self.io_error(err))?;
        drop(writer);
        self.file.commit()?;
        Ok(self.written)
    }
}

fn json_value(field: &ResolvedField, value: &FieldValue) -> JsonValue {
    match value {
        FieldValue::Text(text) => {
            JsonValue::String(truncate_to_width(text, field.width).to_string())
        }
        FieldValue::Integer(number) => JsonValue::from(*number),
        FieldValue::Float(number) if number.is_finite() => {
            let rounded = match field.decimals() {
                Some(decimals) => {
                    let scale = 10f64.powi(decimals as i32);
                    (number * scale).round() / scale
                }
                None => *number,
            };
            JsonValue::from(rounded)
        }
        FieldValue::Float(_) | FieldValue::Null => JsonValue::Null,
    }
}

/// Keeps a layer in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub schema: Option<Schema>,
    pub records: Vec<(Geometry, Vec<FieldValue>)>,
    pub finished: bool,
}

impl GeometrySink for MemorySink {
    fn begin(&mut self, schema: &Schema) -> Result<(), SinkError> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn write(&mut self, geometry: &Geometry, values: &[FieldValue]) -> Result<(), SinkError> {
        let schema = self.schema.as_ref().ok_or(SinkError::NotStarted)?;
        if values.len() != schema.len() {
            return Err(SinkError::ValueCount {
                expected: schema.len(),
                got: values.len(),
            });
        }
        self.records.push((geometry.clone(), values.to_vec()));
        Ok(())
    }

    fn finish(&mut self) -> Result<usize, SinkError> {
        self.finished = true;
        Ok(self.records.len())
    }
}

/// Writes the per-route CSV overview.
pub struct RouteOverviewWriter {
    writer: Option<csv::Writer<File>>,
    file: PendingFile,
    rows: usize,
}

impl RouteOverviewWriter {
    pub fn create<S: AsRef<str>>(path: impl AsRef<Path>, header: &[S]) -> Result<Self, SinkError> {
        let (file, handle) = PendingFile::create(path.as_ref())?;
        let mut writer = csv::Writer::from_writer(handle);
        writer.write_record(header.iter().map(|name| name.as_ref()))?;
        Ok(Self {
            writer: Some(writer),
            file,
            rows: 0,
        })
    }

    pub fn write_row<S: AsRef<str>>(&mut self, cells: &[S]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotStarted)?;
        writer.write_record(cells.iter().map(|cell| cell.as_ref()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize, SinkError> {
        let mut writer = self.writer.take().ok_or(SinkError::NotStarted)?;
        writer.flush().map_err(|source| SinkError::Io {
            path: self.file.tmp_path.clone(),
            source,
        })?;
        drop(writer);
        self.file.commit()?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldNameMap;
    use crate::schema::{resolve_widths, FieldSpec, Record};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos));
        fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    struct Row(Vec<FieldValue>);

    impl Record for Row {
        fn values(&self) -> Vec<FieldValue> {
            self.0.clone()
        }
    }

    fn schema() -> Schema {
        let rows = vec![Row(vec!["abcd".into(), FieldValue::Float(0.0)])];
        let layout = [FieldSpec::text("Name"), FieldSpec::float("Ratio", 32, 2)];
        let mut schema = resolve_widths(&rows, &layout, &FieldNameMap::default());
        schema.fields[0].width = 2;
        schema
    }

    #[test]
    fn geojson_sink_commits_on_finish() {
        let dir = temp_dir("geojson_sink");
        let path = dir.join("out.geojson");

        let mut sink = GeoJsonSink::create(&path).unwrap();
        sink.begin(&schema()).unwrap();
        sink.write(
            &Geometry::LineString(vec![[0.0, 0.0], [1.0, 1.0]]),
            &["abcd".into(), FieldValue::Float(0.12345)],
        )
        .unwrap();
        sink.write(&Geometry::Point([2.0, 3.0]), &["x".into(), FieldValue::Null])
            .unwrap();
        assert!(!path.exists());
        assert_eq!(sink.finish().unwrap(), 2);

        let text = fs::read_to_string(&path).unwrap();
        let collection: geojson::FeatureCollection = text
            .parse::<geojson::GeoJson>()
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(collection.features.len(), 2);
        let first = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(first["Name"], JsonValue::from("ab"));
        assert_eq!(first["Ratio"], JsonValue::from(0.12));
        let second = collection.features[1].properties.as_ref().unwrap();
        assert_eq!(second["Ratio"], JsonValue::Null);
        assert!(collection.foreign_members.unwrap().contains_key("fields"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dropped_sink_leaves_no_files() {
        let dir = temp_dir("geojson_sink_drop");
        let path = dir.join("out.geojson");
        {
            let mut sink = GeoJsonSink::create(&path).unwrap();
            sink.begin(&schema()).unwrap();
        }
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_mismatched_rows() {
        let mut sink = MemorySink::default();
        assert!(matches!(
            sink.write(&Geometry::Point([0.0, 0.0]), &[]),
            Err(SinkError::NotStarted)
        ));
        sink.begin(&schema()).unwrap();
        assert!(matches!(
            sink.write(&Geometry::Point([0.0, 0.0]), &["a".into()]),
            Err(SinkError::ValueCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn short_polyline_becomes_null_geometry() {
        assert!(Geometry::LineString(vec![[0.0, 0.0]]).to_geojson().is_none());
        assert!(Geometry::Point([0.0, 0.0]).to_geojson().is_some());
    }

    #[test]
    fn overview_writer_commits_csv() {
        let dir = temp_dir("overview_writer");
        let path = dir.join("out.csv");

        let mut writer = RouteOverviewWriter::create(&path, &["Route_id", "Km_len"]).unwrap();
        writer.write_row(&["R1", ""]).unwrap();
        assert_eq!(writer.finish().unwrap(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "Route_id,Km_len\nR1,\n");

        fs::remove_dir_all(&dir).ok();
    }
}
