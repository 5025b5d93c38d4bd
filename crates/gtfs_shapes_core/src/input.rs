use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::csv_reader::{read_csv_table, read_extra_fields, CsvParseError, CsvTable, ExtraFields};

#[derive(Debug, thiserror::Error)]
pub enum GtfsInputError {
    #[error("input path does not exist: {0}")]
    MissingPath(PathBuf),
    #[error("input path is neither a directory nor a zip archive: {0}")]
    InvalidPath(PathBuf),
    #[error("not a valid zip archive: {0}")]
    InvalidZip(PathBuf),
    #[error("missing required GTFS file {0}")]
    MissingFile(String),
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open zip archive {path}: {source}")]
    ZipArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to read {file} from zip archive: {source}")]
    ZipFile {
        file: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    Csv(#[from] CsvParseError),
}

/// Location of a GTFS feed: an unpacked directory or a zip archive.
#[derive(Debug, Clone)]
pub enum GtfsInput {
    Directory(PathBuf),
    Zip(PathBuf),
}

impl GtfsInput {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GtfsInputError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GtfsInputError::MissingPath(path.to_path_buf()));
        }
        if path.is_dir() {
            return Ok(GtfsInput::Directory(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(GtfsInputError::InvalidPath(path.to_path_buf()));
        }

        let mut magic = [0u8; 4];
        let mut file = File::open(path).map_err(|source| GtfsInputError::Io {
            file: path.display().to_string(),
            source,
        })?;
        let is_zip = file.read_exact(&mut magic).is_ok() && magic == *b"PK\x03\x04";
        if !is_zip {
            return Err(GtfsInputError::InvalidZip(path.to_path_buf()));
        }
        Ok(GtfsInput::Zip(path.to_path_buf()))
    }

    pub fn path(&self) -> &Path {
        match self {
            GtfsInput::Directory(path) | GtfsInput::Zip(path) => path,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            GtfsInput::Directory(_) => "directory",
            GtfsInput::Zip(_) => "zip",
        }
    }

    pub fn reader(&self) -> GtfsInputReader {
        GtfsInputReader {
            input: self.clone(),
        }
    }
}

pub struct GtfsInputReader {
    input: GtfsInput,
}

impl GtfsInputReader {
    /// Raw bytes of `file_name`, `None` if the feed does not contain it.
    pub fn read_bytes(&self, file_name: &str) -> Result<Option<Vec<u8>>, GtfsInputError> {
        match &self.input {
            GtfsInput::Directory(dir) => {
                let path = dir.join(file_name);
                if !path.is_file() {
                    return Ok(None);
                }
                std::fs::read(&path)
                    .map(Some)
                    .map_err(|source| GtfsInputError::Io {
                        file: file_name.to_string(),
                        source,
                    })
            }
            GtfsInput::Zip(path) => read_zip_entry(path, file_name),
        }
    }

    pub fn read_optional_csv<T: DeserializeOwned>(
        &self,
        file_name: &str,
    ) -> Result<Option<CsvTable<T>>, GtfsInputError> {
        let Some(data) = self.read_bytes(file_name)? else {
            debug!("{} not present in feed", file_name);
            return Ok(None);
        };
        Ok(Some(read_csv_table(file_name, &data)?))
    }

    pub fn read_required_csv<T: DeserializeOwned>(
        &self,
        file_name: &str,
    ) -> Result<CsvTable<T>, GtfsInputError> {
        self.read_optional_csv(file_name)?
            .ok_or_else(|| GtfsInputError::MissingFile(file_name.to_string()))
    }

    pub fn read_extra_fields(
        &self,
        file_name: &str,
        key_field: &str,
        fields: &[String],
    ) -> Result<ExtraFields, GtfsInputError> {
        if fields.is_empty() {
            return Ok(ExtraFields::default());
        }
        match self.read_bytes(file_name)? {
            Some(data) => Ok(read_extra_fields(file_name, &data, key_field, fields)?),
            None => Ok(ExtraFields::default()),
        }
    }
}

fn read_zip_entry(path: &Path, file_name: &str) -> Result<Option<Vec<u8>>, GtfsInputError> {
    let file = File::open(path).map_err(|source| GtfsInputError::Io {
        file: path.display().to_string(),
        source,
    })?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|source| GtfsInputError::ZipArchive {
            path: path.to_path_buf(),
            source,
        })?;

    // Some producers wrap the tables in a single top-level folder.
    let entry_name = archive
        .file_names()
        .find(|name| {
            *name == file_name
                || name
                    .rsplit_once('/')
                    .is_some_and(|(_, base)| base == file_name)
        })
        .map(str::to_string);
    let Some(entry_name) = entry_name else {
        return Ok(None);
    };

    let mut entry = archive
        .by_name(&entry_name)
        .map_err(|source| GtfsInputError::ZipFile {
            file: file_name.to_string(),
            source,
        })?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|source| GtfsInputError::Io {
            file: file_name.to_string(),
            source,
        })?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos))
    }

    #[test]
    fn rejects_missing_path() {
        let err = GtfsInput::from_path("/definitely/not/here").unwrap_err();
        assert!(matches!(err, GtfsInputError::MissingPath(_)));
    }

    #[test]
    fn reads_tables_from_directory() {
        let dir = temp_dir("gtfs_input_dir");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("stops.txt"), "stop_id\nS1\n").expect("write file");

        let input = GtfsInput::from_path(&dir).expect("input");
        assert_eq!(input.source(), "directory");
        let reader = input.reader();
        assert!(reader.read_bytes("stops.txt").unwrap().is_some());
        assert!(reader.read_bytes("shapes.txt").unwrap().is_none());
        assert!(matches!(
            reader.read_required_csv::<gtfs_shapes_model::Route>("routes.txt"),
            Err(GtfsInputError::MissingFile(_))
        ));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reads_tables_from_nested_zip() {
        let dir = temp_dir("gtfs_input_zip");
        fs::create_dir_all(&dir).expect("create dir");
        let zip_path = dir.join("feed.zip");
        {
            let file = File::create(&zip_path).expect("create zip");
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("feed/stops.txt", zip::write::FileOptions::default())
                .expect("start file");
            writer.write_all(b"stop_id\nS1\n").expect("write entry");
            writer.finish().expect("finish zip");
        }

        let input = GtfsInput::from_path(&zip_path).expect("input");
        assert_eq!(input.source(), "zip");
        let data = input.reader().read_bytes("stops.txt").unwrap();
        assert_eq!(data.as_deref(), Some(&b"stop_id\nS1\n"[..]));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_plain_files() {
        let dir = temp_dir("gtfs_input_plain");
        fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("feed.txt");
        fs::write(&path, "not a zip").expect("write file");

        assert!(matches!(
            GtfsInput::from_path(&path),
            Err(GtfsInputError::InvalidZip(_))
        ));

        fs::remove_dir_all(&dir).ok();
    }
}
