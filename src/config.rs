use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{files, playback};
use crate::store::{FieldDefault, FieldSpec, KeyValueStore, StoreError, Value};

pub static SETTINGS_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("data_directory", FieldDefault::Str("")),
    FieldSpec::new(
        "audio_extension",
        FieldDefault::Str(files::DEFAULT_AUDIO_EXTENSION),
    ),
    FieldSpec::new("require_playback_before_submit", FieldDefault::Bool(true)),
    FieldSpec::new("log_level", FieldDefault::Str("info")),
];

pub static SESSION_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("subject", FieldDefault::Str("999")),
    FieldSpec::new("condition", FieldDefault::Str("quiet")),
    FieldSpec::new("presentation_level", FieldDefault::Float(65.0)),
    FieldSpec::new("audio_files_path", FieldDefault::Str("")),
    FieldSpec::new("raw_level", FieldDefault::Float(-30.0)),
    FieldSpec::new("slm_reading", FieldDefault::Float(70.0)),
    FieldSpec::new("speaker_number", FieldDefault::Int(playback::ALL_SPEAKERS)),
    FieldSpec::new("audio_device_id", FieldDefault::Int(playback::DEFAULT_DEVICE_ID)),
];

/// Application settings, auto-saved whenever one of them changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Where trial logs go; empty means `<config dir>/data`
    pub data_directory: String,
    pub audio_extension: String,
    pub require_playback_before_submit: bool,
    pub log_level: String,
}

impl AppSettings {
    pub fn from_store(store: &KeyValueStore) -> Self {
        AppSettings {
            data_directory: read_str(store, "data_directory"),
            audio_extension: read_str(store, "audio_extension"),
            require_playback_before_submit: store
                .get_bool("require_playback_before_submit")
                .unwrap_or(true),
            log_level: read_str(store, "log_level"),
        }
    }

    pub fn data_dir(&self, config_dir: &Path) -> PathBuf {
        if self.data_directory.trim().is_empty() {
            config_dir.join(files::DATA_DIR_NAME)
        } else {
            PathBuf::from(&self.data_directory)
        }
    }
}

/// Parameters of one listening session, entered by the experimenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub subject: String,
    pub condition: String,
    /// Target presentation level in dB SPL
    pub presentation_level: f64,
    pub audio_files_path: String,
    /// Digital level (dB) played during calibration
    pub raw_level: f64,
    /// Sound level meter reading (dB SPL) for `raw_level`
    pub slm_reading: f64,
    /// 1-based output channel; 0 plays on every channel
    pub speaker_number: i64,
    /// Output device index; -1 picks the host default
    pub audio_device_id: i64,
}

impl SessionParameters {
    pub fn from_store(store: &KeyValueStore) -> Self {
        SessionParameters {
            subject: read_str(store, "subject"),
            condition: read_str(store, "condition"),
            presentation_level: store.get_float("presentation_level").unwrap_or(65.0),
            audio_files_path: read_str(store, "audio_files_path"),
            raw_level: store.get_float("raw_level").unwrap_or(-30.0),
            slm_reading: store.get_float("slm_reading").unwrap_or(70.0),
            speaker_number: store
                .get_int("speaker_number")
                .unwrap_or(playback::ALL_SPEAKERS),
            audio_device_id: store
                .get_int("audio_device_id")
                .unwrap_or(playback::DEFAULT_DEVICE_ID),
        }
    }

    /// Copy every field into `store`; hooks run for the fields that changed
    pub fn write_to(&self, store: &mut KeyValueStore) -> Result<(), StoreError> {
        store.set("subject", Value::Str(self.subject.clone()))?;
        store.set("condition", Value::Str(self.condition.clone()))?;
        store.set("presentation_level", Value::Float(self.presentation_level))?;
        store.set("audio_files_path", Value::Str(self.audio_files_path.clone()))?;
        store.set("raw_level", Value::Float(self.raw_level))?;
        store.set("slm_reading", Value::Float(self.slm_reading))?;
        store.set("speaker_number", Value::Int(self.speaker_number))?;
        store.set("audio_device_id", Value::Int(self.audio_device_id))?;
        Ok(())
    }

    /// Digital playback level (dB re full scale) that yields
    /// `presentation_level` given the calibration pair
    pub fn calibrated_level_db(&self) -> f64 {
        self.raw_level + (self.presentation_level - self.slm_reading)
    }

    pub fn stimulus_dir(&self) -> Option<PathBuf> {
        let path = self.audio_files_path.trim();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }

    /// YAML in the same layout as session.yaml
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize session parameters")
    }

    /// Validate parameter values
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            bail!("subject cannot be empty");
        }
        for (name, level) in [
            ("presentation_level", self.presentation_level),
            ("raw_level", self.raw_level),
            ("slm_reading", self.slm_reading),
        ] {
            if !level.is_finite() {
                bail!("{} must be a finite number", name);
            }
        }
        if self.speaker_number < 0 {
            bail!("speaker_number must be >= 0 (0 = all speakers)");
        }
        if self.audio_device_id < playback::DEFAULT_DEVICE_ID {
            bail!("audio_device_id must be >= -1 (-1 = default device)");
        }
        Ok(())
    }
}

fn read_str(store: &KeyValueStore, key: &str) -> String {
    store.get_str(key).unwrap_or_default().to_string()
}

/// Both persisted stores plus the directory they live in
pub struct Config {
    pub config_dir: PathBuf,
    pub settings: KeyValueStore,
    pub session: KeyValueStore,
}

impl Config {
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(files::CONFIG_DIR_NAME))
    }

    /// Load settings and session parameters from `config_dir`.
    ///
    /// Never fails: unreadable files leave the affected store at its
    /// defaults and every problem is returned for the operator to see.
    pub fn load(config_dir: impl Into<PathBuf>) -> (Self, Vec<StoreError>) {
        let config_dir = config_dir.into();
        let mut warnings = Vec::new();

        let mut settings =
            KeyValueStore::new(SETTINGS_SCHEMA, config_dir.join(files::SETTINGS_FILE));
        load_store(&mut settings, &mut warnings);
        settings.persist_on_change();

        let mut session = KeyValueStore::new(SESSION_SCHEMA, config_dir.join(files::SESSION_FILE));
        load_store(&mut session, &mut warnings);

        (
            Config {
                config_dir,
                settings,
                session,
            },
            warnings,
        )
    }

    pub fn app_settings(&self) -> AppSettings {
        AppSettings::from_store(&self.settings)
    }

    pub fn session_parameters(&self) -> SessionParameters {
        SessionParameters::from_store(&self.session)
    }

    /// Confirm edited session parameters: store and write them to disk
    pub fn confirm_session(&mut self, params: &SessionParameters) -> Result<()> {
        params.validate()?;
        params
            .write_to(&mut self.session)
            .context("Failed to update session parameters")?;
        self.session
            .save()
            .context("Failed to save session parameters")?;
        log::info!("Session parameters saved");
        Ok(())
    }

    /// Discard unsaved session edits by re-reading the file
    pub fn revert_session(&mut self) -> Vec<StoreError> {
        let mut warnings = Vec::new();
        load_store(&mut self.session, &mut warnings);
        warnings
    }
}

fn load_store(store: &mut KeyValueStore, warnings: &mut Vec<StoreError>) {
    match store.load() {
        Ok(report) => warnings.extend(report.mismatches),
        Err(e) => {
            log::warn!("{}; using defaults", e);
            store.reset_to_defaults();
            warnings.push(e);
        }
    }
}
