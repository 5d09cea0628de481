// file.rs — The `file` source kind: a JSON, YAML or TOML file, or a
// directory of them.
//
// A directory becomes an Object keyed by file stem, with sub-directories as
// nested Objects. Content is hashed on every fetch; when nothing changed
// since the previous fetch the source reports no new data.

use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::DataError;
use crate::registry::{Source, SourceConfig, SourceFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    fn from_path(path: &FsPath) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_name)
    }

    fn parse(self, text: &str) -> Result<Value, String> {
        match self {
            Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            Format::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

pub struct FileFactory;

impl SourceFactory for FileFactory {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn validate(&self, raw: &Map<String, Value>) -> Result<Arc<dyn SourceConfig>, DataError> {
        let path = match raw.get("path") {
            Some(Value::String(p)) if !p.is_empty() => PathBuf::from(p),
            Some(_) => return Err(DataError::field("path", "must be a non-empty string")),
            None => return Err(DataError::field("path", "is required")),
        };
        let format = match raw.get("format") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(
                Format::from_name(name)
                    .ok_or_else(|| DataError::field("format", format!("unsupported format \"{}\"", name)))?,
            ),
            Some(_) => return Err(DataError::field("format", "must be a string")),
        };
        Ok(Arc::new(FileConfig { path, format }))
    }
}

#[derive(Debug, Clone)]
pub struct FileConfig {
    pub path: PathBuf,
    /// Overrides detection by extension.
    pub format: Option<Format>,
}

impl SourceConfig for FileConfig {
    fn new_source(&self) -> Result<Box<dyn Source>, DataError> {
        Ok(Box::new(FileSource {
            config: self.clone(),
            last_hash: None,
        }))
    }
}

pub struct FileSource {
    config: FileConfig,
    last_hash: Option<String>,
}

#[async_trait]
impl Source for FileSource {
    async fn fetch(&mut self) -> Result<Option<Value>, DataError> {
        let config = self.config.clone();
        let (value, hash) = tokio::task::spawn_blocking(move || load(&config))
            .await
            .map_err(|e| DataError::fetch(format!("file loader task failed: {}", e)))??;
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return Ok(None);
        }
        self.last_hash = Some(hash);
        Ok(Some(value))
    }
}

fn load(config: &FileConfig) -> Result<(Value, String), DataError> {
    let mut hasher = Sha256::new();
    let value = if config.path.is_dir() {
        load_dir(&config.path, config.format, &mut hasher)?
    } else {
        load_file(&config.path, config.format, &mut hasher)?
    };
    Ok((value, format!("{:x}", hasher.finalize())))
}

fn load_file(path: &FsPath, format: Option<Format>, hasher: &mut Sha256) -> Result<Value, DataError> {
    let text = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(text.as_bytes());
    let format = format.or_else(|| Format::from_path(path)).unwrap_or(Format::Json);
    format
        .parse(&text)
        .map_err(|reason| DataError::fetch(format!("{}: {}", path.display(), reason)))
}

fn load_dir(dir: &FsPath, format: Option<Format>, hasher: &mut Sha256) -> Result<Value, DataError> {
    let io_err = |source: std::io::Error| DataError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort_by_key(|e| e.file_name());

    let mut map = Map::new();
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            map.insert(name, load_dir(&path, format, hasher)?);
            continue;
        }
        // Without an explicit format only recognised extensions are read.
        if format.is_none() && Format::from_path(&path).is_none() {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        map.insert(stem, load_file(&path, format, hasher)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn source(raw: Value) -> Box<dyn Source> {
        let Value::Object(map) = raw else { unreachable!() };
        FileFactory.validate(&map).unwrap().new_source().unwrap()
    }

    #[test]
    fn validate_requires_path() {
        assert!(FileFactory.validate(&Map::new()).is_err());
        let mut raw = Map::new();
        raw.insert("path".to_string(), json!("/x"));
        raw.insert("format".to_string(), json!("xml"));
        assert!(FileFactory.validate(&raw).is_err());
        assert_eq!(FileFactory.default_interval(), Duration::from_secs(30));
        assert_eq!(FileFactory.min_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unchanged_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("users.yaml");
        fs::write(&file, "alice: {admin: true}\n").unwrap();

        let mut src = source(json!({"path": file.to_string_lossy()}));
        assert_eq!(
            src.fetch().await.unwrap(),
            Some(json!({"alice": {"admin": true}}))
        );
        assert_eq!(src.fetch().await.unwrap(), None);

        fs::write(&file, "bob: {}\n").unwrap();
        assert_eq!(src.fetch().await.unwrap(), Some(json!({"bob": {}})));
    }

    #[tokio::test]
    async fn directory_becomes_object_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"x": 1}"#).unwrap();
        fs::write(dir.path().join("b.toml"), "y = 2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "skipped").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.yml"), "- 3\n").unwrap();

        let mut src = source(json!({"path": dir.path().to_string_lossy()}));
        assert_eq!(
            src.fetch().await.unwrap(),
            Some(json!({"a": {"x": 1}, "b": {"y": 2}, "nested": {"c": [3]}}))
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source(json!({"path": dir.path().join("gone.json").to_string_lossy()}));
        assert!(matches!(src.fetch().await, Err(DataError::Io { .. })));
    }
}
