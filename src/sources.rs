use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, warn};

use crate::error::BuscoError;
use crate::schema;
use crate::settings::{RawSettings, SettingsOrigin, Value};

/// Environment variable naming a site-wide defaults file.
pub const CONFIG_ENV_VAR: &str = "BUSCO_CONFIG_FILE";

/// Section accepted as an alias for the top level in config files.
const RUN_SECTION: &str = "busco_run";

pub trait ConfigSource {
    fn read(&self) -> Result<RawSettings, BuscoError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
    fn read(&self) -> Result<RawSettings, BuscoError> {
        Ok(schema::defaults())
    }
}

/// Site or user wide defaults. The location comes from `BUSCO_CONFIG_FILE`
/// when set, otherwise the per-user config directory.
pub struct EnvironmentSource {
    path: Option<PathBuf>,
}

impl EnvironmentSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn discover() -> Self {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                ProjectDirs::from("org", "ezlab", "busco")
                    .map(|dirs| dirs.config_dir().join("config.toml"))
            });
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ConfigSource for EnvironmentSource {
    fn read(&self) -> Result<RawSettings, BuscoError> {
        match &self.path {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "reading environment defaults");
                parse_file(path, SettingsOrigin::Environment)
            }
            Some(path) => {
                debug!(path = %path.display(), "no environment defaults file");
                Ok(RawSettings::new(SettingsOrigin::Environment))
            }
            None => Ok(RawSettings::new(SettingsOrigin::Environment)),
        }
    }
}

/// The user supplied config file. An explicitly requested file must exist.
pub struct FileSource {
    path: PathBuf,
    required: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, required: bool) -> Self {
        Self {
            path: path.into(),
            required,
        }
    }
}

impl ConfigSource for FileSource {
    fn read(&self) -> Result<RawSettings, BuscoError> {
        if !self.path.exists() {
            if self.required {
                return Err(BuscoError::MissingConfigFile(self.path.clone()));
            }
            return Ok(RawSettings::new(SettingsOrigin::ConfigFile));
        }
        parse_file(&self.path, SettingsOrigin::ConfigFile)
    }
}

fn parse_file(path: &Path, origin: SettingsOrigin) -> Result<RawSettings, BuscoError> {
    let content = fs::read_to_string(path).map_err(|err| BuscoError::ConfigFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    parse_settings(&content, origin).map_err(|message| BuscoError::ConfigFile {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse sectioned key/value text: top-level keys are pipeline options, each
/// table is either `[busco_run]` or a dependency tool section.
pub fn parse_settings(content: &str, origin: SettingsOrigin) -> Result<RawSettings, String> {
    let table: toml::Table = toml::from_str(content).map_err(|err| err.to_string())?;
    let mut settings = RawSettings::new(origin);

    for (key, value) in table {
        match value {
            toml::Value::Table(section) if key == RUN_SECTION => {
                for (option, value) in section {
                    let value = convert(&option, value)?;
                    settings.set(&option, value);
                }
            }
            toml::Value::Table(section) => {
                if !schema::is_dependency_section(&key) {
                    warn!(section = %key, "config file section is not a known tool");
                }
                for (option, value) in section {
                    let value = convert(&format!("{key}.{option}"), value)?;
                    settings.set_tool(&key, &option, value);
                }
            }
            value => {
                let value = convert(&key, value)?;
                settings.set(&key, value);
            }
        }
    }

    Ok(settings)
}

fn convert(key: &str, value: toml::Value) -> Result<Value, String> {
    match value {
        toml::Value::Boolean(v) => Ok(Value::Bool(v)),
        toml::Value::Integer(v) => Ok(Value::Int(v)),
        toml::Value::Float(v) => Ok(Value::Float(v)),
        toml::Value::String(v) => Ok(Value::Text(v)),
        other => Err(format!(
            "unsupported value for `{key}`: {} values are not accepted",
            other.type_str()
        )),
    }
}
