//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `domus.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use domus_adapter_virtual::DeviceKind;
use domus_app::ports::CalendarEntry;
use domus_app::settings::EngineSettings;
use domus_domain::id::DeviceId;
use domus_domain::program::ProgramDef;
use domus_domain::property::PropertySet;
use domus_domain::time::Timestamp;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine knobs.
    pub engine: EngineConfig,
    /// Persisted program location.
    pub program: ProgramConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Virtual devices to install. The demo home is used when empty.
    pub devices: Vec<DeviceConfig>,
    /// Events served by the static calendar.
    pub calendar: Vec<CalendarEventConfig>,
}

/// Engine configuration, mapped onto [`EngineSettings`].
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local offset for cron and calendar conditions, minutes east of UTC.
    pub utc_offset_minutes: i32,
    /// Maximum passes per simulation step.
    pub settle_rounds: usize,
    /// Calendar-event re-check period.
    pub calendar_poll_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Path of the program definition (JSON).
    pub path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// One virtual device.
#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
}

/// One calendar event, times in RFC 3339.
#[derive(Debug, Deserialize)]
pub struct CalendarEventConfig {
    pub title: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Config {
    /// Load configuration from `domus.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("domus.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DOMUS_PROGRAM") {
            self.program.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DOMUS_UTC_OFFSET_MINUTES")
            && let Ok(minutes) = val.parse()
        {
            self.engine.utc_offset_minutes = minutes;
        }
        if let Ok(val) = std::env::var("DOMUS_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.engine_settings()?;
        if self.engine.settle_rounds == 0 {
            return Err(ConfigError::Validation(
                "settle_rounds must be non-zero".to_string(),
            ));
        }
        if self.engine.calendar_poll_secs == 0 {
            return Err(ConfigError::Validation(
                "calendar_poll_secs must be non-zero".to_string(),
            ));
        }
        if let Some(event) = self.calendar.iter().find(|e| e.end <= e.start) {
            return Err(ConfigError::Validation(format!(
                "calendar event {:?} ends before it starts",
                event.title
            )));
        }
        Ok(())
    }

    /// Typed engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an out-of-range UTC offset.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let settings = EngineSettings {
            settle_rounds: self.engine.settle_rounds,
            calendar_poll: Duration::from_secs(self.engine.calendar_poll_secs),
            ..EngineSettings::default()
        };
        settings
            .with_offset_minutes(self.engine.utc_offset_minutes)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "utc_offset_minutes {} is out of range",
                    self.engine.utc_offset_minutes
                ))
            })
    }

    /// Read the program definition. A missing file is an empty program.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// program.
    pub fn load_program(&self) -> Result<ProgramDef, ConfigError> {
        let text = match std::fs::read_to_string(&self.program.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.program.path.display(), "no program file, starting empty");
                return Ok(ProgramDef::default());
            }
            Err(err) => return Err(ConfigError::Io(err)),
        };
        ProgramDef::from_json(&text).map_err(ConfigError::Program)
    }

    /// Events for the static calendar.
    #[must_use]
    pub fn calendar_entries(&self) -> Vec<CalendarEntry> {
        self.calendar
            .iter()
            .map(|event| CalendarEntry {
                title: event.title.clone(),
                start: event.start,
                end: event.end,
                fields: PropertySet::new().with("title", event.title.as_str()),
            })
            .collect()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self {
            utc_offset_minutes: 0,
            settle_rounds: settings.settle_rounds,
            calendar_poll_secs: settings.calendar_poll.as_secs(),
        }
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("program.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "domusd=info,domus_app=info,domus_adapter_virtual=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read file")]
    Io(#[from] std::io::Error),
    /// The program file is not a valid program definition.
    #[error("failed to parse program file")]
    Program(#[source] serde_json::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
