//! Recording storage backends
//!
//! `LogStorage` only logs a summary of each sealed recording.
//! `JsonFileStorage` writes `<base_path>/<recording_id>.json`.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use contracts::{CollaboratorError, RecordingStorage, SyncedData};
use tracing::{debug, error, info, instrument};

/// Storage that logs recording summaries for debugging
pub struct LogStorage {
    name: String,
}

impl LogStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl RecordingStorage for LogStorage {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_storage_save",
        skip(self, recording_id, data),
        fields(storage = %self.name, recording_id = %recording_id)
    )]
    async fn save_recording(
        &self,
        recording_id: &str,
        data: &SyncedData,
    ) -> Result<(), CollaboratorError> {
        info!(
            robot_id = %data.robot_id,
            instance = data.instance,
            frames = data.frames.len(),
            start_time = data.start_time,
            end_time = data.end_time,
            "recording received"
        );
        Ok(())
    }
}

/// Storage that writes each recording to a JSON file
pub struct JsonFileStorage {
    name: String,
    base_path: PathBuf,
}

impl JsonFileStorage {
    /// Creates the base directory if needed
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            name: name.into(),
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn path_for(&self, recording_id: &str) -> PathBuf {
        self.base_path.join(format!("{recording_id}.json"))
    }

    fn write_recording(&self, recording_id: &str, data: &SyncedData) -> std::io::Result<()> {
        let path = self.path_for(recording_id);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, data)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        writer.flush()?;
        debug!(path = %path.display(), "recording written");
        Ok(())
    }
}

impl RecordingStorage for JsonFileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "json_file_storage_save",
        skip(self, recording_id, data),
        fields(storage = %self.name, recording_id = %recording_id, frames = data.frames.len())
    )]
    async fn save_recording(
        &self,
        recording_id: &str,
        data: &SyncedData,
    ) -> Result<(), CollaboratorError> {
        if recording_id.is_empty() || recording_id.contains(['/', '\\', '.']) {
            return Err(CollaboratorError::Permanent(format!(
                "recording id '{recording_id}' is not a valid file name"
            )));
        }

        self.write_recording(recording_id, data).map_err(|e| {
            error!(storage = %self.name, error = %e, "write failed");
            match e.kind() {
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                    CollaboratorError::Transient(e.to_string())
                }
                _ => CollaboratorError::Permanent(e.to_string()),
            }
        })
    }
}

/// Storage selected on the command line
pub enum RunStorage {
    Log(LogStorage),
    JsonFile(JsonFileStorage),
}

impl RunStorage {
    /// JSON files when an output directory is given, logging otherwise
    pub fn from_output_dir(output_dir: Option<&Path>) -> std::io::Result<Self> {
        Ok(match output_dir {
            Some(dir) => Self::JsonFile(JsonFileStorage::new("json_file", dir)?),
            None => Self::Log(LogStorage::new("log")),
        })
    }
}

impl RecordingStorage for RunStorage {
    fn name(&self) -> &str {
        match self {
            Self::Log(s) => s.name(),
            Self::JsonFile(s) => s.name(),
        }
    }

    async fn save_recording(
        &self,
        recording_id: &str,
        data: &SyncedData,
    ) -> Result<(), CollaboratorError> {
        match self {
            Self::Log(s) => s.save_recording(recording_id, data).await,
            Self::JsonFile(s) => s.save_recording(recording_id, data).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{InstanceKey, SyncPoint};
    use tempfile::tempdir;

    fn recording() -> SyncedData {
        let key = InstanceKey::new("robot-7", 0);
        SyncedData {
            frames: vec![SyncPoint::empty(&key, 1.0), SyncPoint::empty(&key, 1.1)],
            start_time: 1.0,
            end_time: 1.1,
            robot_id: key.robot_id.clone(),
            instance: 0,
        }
    }

    #[tokio::test]
    async fn test_log_storage_save() {
        let storage = LogStorage::new("test_log");
        assert!(storage.save_recording("rec-1", &recording()).await.is_ok());
    }

    #[tokio::test]
    async fn test_json_file_storage_write() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new("test_file", dir.path().join("recordings")).unwrap();

        storage.save_recording("rec-1", &recording()).await.unwrap();

        let content = fs::read_to_string(storage.path_for("rec-1")).unwrap();
        let restored: SyncedData = serde_json::from_str(&content).unwrap();
        assert_eq!(restored.frames.len(), 2);
        assert_eq!(restored.robot_id.as_str(), "robot-7");
    }

    #[tokio::test]
    async fn test_json_file_storage_rejects_path_ids() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new("test_file", dir.path()).unwrap();

        let err = storage
            .save_recording("../escape", &recording())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_run_storage_selection() {
        let dir = tempdir().unwrap();
        let storage = RunStorage::from_output_dir(Some(dir.path())).unwrap();
        assert_eq!(storage.name(), "json_file");
        assert_eq!(RunStorage::from_output_dir(None).unwrap().name(), "log");
    }
}
