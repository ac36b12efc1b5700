//! Lectern configuration.
//!
//! Loaded from `~/.lectern/config.toml` unless a path is given. Every key has
//! a default, so a missing file is only an error when the path was explicit.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lectern configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Stream the consumer reads training commands from.
    pub command_stream: String,

    /// Stream the consumer records its checkpoint on.
    pub checkpoint_stream: String,

    /// Event type of checkpoint events.
    pub checkpoint_event_type: String,

    /// Directory holding the command log streams.
    pub log_root: PathBuf,

    /// `SQLite` database file.
    pub database: PathBuf,

    /// Directory fitted model artifacts are saved to.
    pub artifact_dir: PathBuf,

    /// How many artifacts survive a save.
    pub artifact_retention: usize,

    pub data: DataSettings,
}

/// Where the ratings come from and how they're split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DataSettings {
    pub books: PathBuf,
    pub ratings: PathBuf,
    pub users: PathBuf,

    /// Share of each user's explicit ratings held out from training.
    pub test_size: f64,

    /// Share of the held-out ratings used for validation; the rest is test.
    pub validation_size: f64,

    /// Seed for every random choice made while splitting.
    pub seed: u64,

    /// Range of ratings after normalisation. Predictions are clipped to it.
    pub rating_scale: (f64, f64),
}

impl Default for Config {
    fn default() -> Self {
        let home = lectern_home().unwrap_or_else(|| PathBuf::from(".lectern"));
        Self {
            command_stream: "training-commands".into(),
            checkpoint_stream: "training-checkpoint".into(),
            checkpoint_event_type: "checkpoint".into(),
            log_root: home.join("log"),
            database: home.join("lectern.sqlite"),
            artifact_dir: home.join("artifacts"),
            artifact_retention: 1,
            data: DataSettings::default(),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        let data = lectern_home()
            .unwrap_or_else(|| PathBuf::from(".lectern"))
            .join("data");
        Self {
            books: data.join("Books.csv"),
            ratings: data.join("Ratings.csv"),
            users: data.join("Users.csv"),
            test_size: 0.2,
            validation_size: 0.5,
            seed: 42,
            rating_scale: (0.0, 1.0),
        }
    }
}

impl Config {
    /// Load config from `path`, or from `~/.lectern/config.toml` when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (
                Self::path().ok_or("could not determine home directory")?,
                false,
            ),
        };

        if !path.exists() {
            if explicit {
                return Err(format!("no config file found at {}", path.display()));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        config
            .validate()
            .map_err(|e| format!("{e} in {}", path.display()))?;
        Ok(config)
    }

    /// Writes the config to `path` unless a file is already there.
    ///
    /// Returns whether a file was written.
    pub fn write_if_missing(&self, path: &Path) -> Result<bool, String> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        let contents =
            toml::to_string(self).map_err(|e| format!("failed to serialize config: {e}"))?;
        fs::write(path, contents).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        Ok(true)
    }

    /// The config file path: `~/.lectern/config.toml`.
    pub fn path() -> Option<PathBuf> {
        lectern_home().map(|h| h.join("config.toml"))
    }

    fn validate(&self) -> Result<(), String> {
        if self.command_stream.is_empty() || self.checkpoint_stream.is_empty() {
            return Err("stream names must not be empty".into());
        }
        if self.command_stream == self.checkpoint_stream {
            return Err("command-stream and checkpoint-stream must differ".into());
        }
        if self.artifact_retention == 0 {
            return Err("artifact-retention must be at least 1".into());
        }
        let data = &self.data;
        if !(0.0..1.0).contains(&data.test_size) || data.test_size == 0.0 {
            return Err("data.test-size must be between 0 and 1".into());
        }
        if !(0.0..1.0).contains(&data.validation_size) || data.validation_size == 0.0 {
            return Err("data.validation-size must be between 0 and 1".into());
        }
        if !data.rating_scale.0.is_finite() || !data.rating_scale.1.is_finite() {
            return Err("data.rating-scale must be finite".into());
        }
        if data.rating_scale.0 >= data.rating_scale.1 {
            return Err("data.rating-scale must be an increasing pair".into());
        }
        Ok(())
    }
}

fn lectern_home() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".lectern"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "command-stream = \"commands\"\n\
             artifact-retention = 3\n\
             [data]\n\
             seed = 7\n",
        );

        let config = Config::load(Some(path.as_path())).unwrap();

        assert_eq!(config.command_stream, "commands");
        assert_eq!(config.checkpoint_stream, "training-checkpoint");
        assert_eq!(config.artifact_retention, 3);
        assert_eq!(config.data.seed, 7);
        assert_eq!(config.data.test_size, 0.2);
        assert_eq!(config.data.rating_scale, (0.0, 1.0));
    }

    #[test]
    fn missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(dir.path().join("nope.toml").as_path())).unwrap_err();

        assert!(err.contains("no config file found"));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "artifact-retention = 0\n");

        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(err.contains("artifact-retention"));
    }

    #[test]
    fn shared_stream_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "command-stream = \"x\"\ncheckpoint-stream = \"x\"\n",
        );

        assert!(Config::load(Some(path.as_path())).is_err());
    }

    #[test]
    fn non_finite_rating_scale_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[data]\nrating-scale = [nan, 1.0]\n");

        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(err.contains("rating-scale must be finite"));

        let path = write_config(&dir, "[data]\nrating-scale = [0.0, inf]\n");
        assert!(Config::load(Some(path.as_path())).is_err());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "command-stream = [\n");

        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(err.starts_with("invalid config at"));
    }

    #[test]
    fn written_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.log_root = dir.path().join("log");

        assert!(config.write_if_missing(&path).unwrap());
        assert!(!config.write_if_missing(&path).unwrap());
        assert_eq!(Config::load(Some(path.as_path())).unwrap(), config);
    }
}
