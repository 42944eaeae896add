use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{
    bluos,
    controller::{self, Command},
    gesture::Gesture,
    model_download,
};

pub const DEFAULT_CONFIG_FILE: &str = "gesture-remote.toml";
pub const CONFIG_PATH_ENV: &str = "GESTURE_REMOTE_CONFIG";
const ENV_PREFIX: &str = "GESTURE_REMOTE";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub recognizer: RecognizerConfig,
    pub device: DeviceConfig,
    pub preview: PreviewConfig,
    #[serde(default)]
    pub bindings: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub index: u32,
    /// Replays png/jpeg files from this directory instead of opening a camera.
    pub replay_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    pub num_hands: usize,
    pub workers: usize,
    pub queue_depth: usize,
    pub min_detection_confidence: f32,
    pub palm_model: PathBuf,
    pub handpose_model: PathBuf,
    pub classifier_model: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub volume_step: u8,
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    pub enabled: bool,
}

impl AppConfig {
    /// Loads from `$GESTURE_REMOTE_CONFIG`, or `gesture-remote.toml` in the
    /// working directory, then applies environment overrides such as
    /// `GESTURE_REMOTE__DEVICE__HOST`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        log::debug!("loading configuration from {path_str}");

        let settings = Config::builder()
            .set_default("camera.index", 0)?
            .set_default("recognizer.num_hands", 2)?
            .set_default("recognizer.workers", 2)?
            .set_default("recognizer.queue_depth", 4)?
            .set_default("recognizer.min_detection_confidence", 0.65)?
            .set_default(
                "recognizer.palm_model",
                path_default(model_download::default_palm_detector_model_path()),
            )?
            .set_default(
                "recognizer.handpose_model",
                path_default(model_download::default_handpose_estimator_model_path()),
            )?
            .set_default(
                "recognizer.classifier_model",
                path_default(model_download::default_gesture_classifier_model_path()),
            )?
            .set_default("device.host", "127.0.0.1")?
            .set_default("device.port", bluos::DEFAULT_PORT as i64)?
            .set_default("device.timeout_secs", bluos::DEFAULT_TIMEOUT.as_secs() as i64)?
            .set_default("device.volume_step", 5)?
            .set_default("preview.enabled", false)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        log::debug!("configuration: {config:#?}");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.recognizer;
        if r.num_hands == 0 {
            return Err(message("recognizer.num_hands must be greater than 0"));
        }
        if r.workers == 0 {
            return Err(message("recognizer.workers must be greater than 0"));
        }
        if r.queue_depth == 0 {
            return Err(message("recognizer.queue_depth must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&r.min_detection_confidence) {
            return Err(message(
                "recognizer.min_detection_confidence must be between 0 and 1",
            ));
        }
        if self.device.host.trim().is_empty() {
            return Err(message("device.host must not be empty"));
        }
        if self.device.volume_step > bluos::MAX_VOLUME {
            return Err(message("device.volume_step must be between 0 and 100"));
        }
        if self.device.timeout_secs == 0 {
            return Err(message("device.timeout_secs must be greater than 0"));
        }
        self.gesture_bindings()?;
        Ok(())
    }

    /// Configured bindings layered over the defaults.
    pub fn gesture_bindings(&self) -> Result<HashMap<Gesture, Command>, ConfigError> {
        let mut bindings = controller::default_bindings();
        for (gesture, command) in &self.bindings {
            let gesture: Gesture = gesture
                .parse()
                .map_err(|err| message(&format!("bindings: {err}")))?;
            if gesture.is_sentinel() {
                return Err(message("bindings: the None category cannot be bound"));
            }
            let command: Command = command
                .parse()
                .map_err(|err| message(&format!("bindings.{gesture}: {err}")))?;
            bindings.insert(gesture, command);
        }
        Ok(bindings)
    }
}

fn path_default(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn message(msg: &str) -> ConfigError {
    ConfigError::Message(msg.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/gesture-remote.toml").unwrap();
        assert_eq!(config.recognizer.num_hands, 2);
        assert_eq!(config.device.port, 11000);
        assert_eq!(config.device.timeout(), Duration::from_secs(10));
        assert!(!config.preview.enabled);
        assert!(config.camera.replay_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
            [device]
            host = "192.168.2.9"
            volume_step = 10

            [preview]
            enabled = true

            [bindings]
            Thumb_Up = "volume_up"
            Open_Palm = "next_track"
            "#,
        );
        let config = AppConfig::load_from_file(file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device.host, "192.168.2.9");
        assert_eq!(config.device.volume_step, 10);
        assert!(config.preview.enabled);

        let bindings = config.gesture_bindings().unwrap();
        assert_eq!(bindings[&Gesture::ThumbUp], Command::VolumeUp);
        assert_eq!(bindings[&Gesture::OpenPalm], Command::NextTrack);
        assert_eq!(bindings[&Gesture::ClosedFist], Command::Pause);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let file = write_config("[device]\nvolume_step = 150\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("[recognizer]\nworkers = 0\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("[recognizer]\nmin_detection_confidence = 1.5\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_bindings() {
        let file = write_config("[bindings]\nWave = \"play\"\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("[bindings]\nVictory = \"shuffle\"\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config("[bindings]\nNone = \"play\"\n");
        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }
}
