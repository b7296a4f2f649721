//! Durable storage for user-editable device settings.
//!
//! Settings are written one key at a time as devices accept writes; the file
//! keeps everything from previous runs so the configuration frontend can read
//! it back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::BridgeError;

/// Receives accepted setting writes. The file-backed implementation below is
/// the default; tests substitute an in-memory one.
pub trait PersistenceSink {
    fn persist(&mut self, section: &str, key: &str, value: &str) -> Result<(), BridgeError>;
}

/// JSON file of sections, each a flat string map. Loaded once at startup and
/// rewritten in full on every change, through a temp file so a crash cannot
/// leave a half-written settings file.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl JsonFileSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let path = path.into();
        let sections = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file {} not found, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, sections })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    fn write_out(&self) -> Result<(), BridgeError> {
        let content = serde_json::to_string_pretty(&self.sections)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistenceSink for JsonFileSink {
    fn persist(&mut self, section: &str, key: &str, value: &str) -> Result<(), BridgeError> {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        if entry.as_deref() == Some(value) {
            return Ok(());
        }
        debug!("Persisting {section}.{key} = {value}");
        self.write_out()
    }
}

/// Warn if the settings file's directory is missing before the first write
/// would fail at an awkward time.
pub fn check_settings_path(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            warn!("Settings directory {} does not exist", parent.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");

        let mut sink = JsonFileSink::open(&path).expect("open");
        sink.persist("Tank_Sensor_1", "FluidType", "fuel").expect("persist");
        sink.persist("Tank_Sensor_1", "Capacity", "0.25").expect("persist");
        sink.persist("Relay_Module_1", "CustomName", "Pump box").expect("persist");

        let sink = JsonFileSink::open(&path).expect("reopen");
        assert_eq!(sink.get("Tank_Sensor_1", "FluidType"), Some("fuel"));
        assert_eq!(sink.get("Tank_Sensor_1", "Capacity"), Some("0.25"));
        assert_eq!(sink.get("Relay_Module_1", "CustomName"), Some("Pump box"));
    }

    #[test]
    fn unchanged_value_skips_the_rewrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");

        let mut sink = JsonFileSink::open(&path).expect("open");
        sink.persist("input_2", "Type", "bilge pump").expect("persist");
        let modified = fs::metadata(&path).expect("metadata").modified().expect("mtime");

        sink.persist("input_2", "Type", "bilge pump").expect("persist again");
        let modified_again = fs::metadata(&path).expect("metadata").modified().expect("mtime");
        assert_eq!(modified, modified_again);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonFileSink::open(dir.path().join("absent.json")).expect("open");
        assert_eq!(sink.get("anything", "at all"), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").expect("write");
        assert!(matches!(JsonFileSink::open(&path), Err(BridgeError::Json(_))));
    }
}
