//! # PMONotify Configuration Module
//!
//! This module provides configuration management for PMONotify, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//!
//! The notification timing constants (throttle interval, deferred
//! initialisation bound) are deliberately absent: they are fixed.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let enabled = config.get_notification_enabled()?;
//! config.set_simulator_producers(4)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("pmonotify.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_config("").unwrap_or_else(|err| {
        warn!(error = %err, "Failed to load PMONotify configuration, using embedded defaults");
        Config::embedded()
    }));
}

const ENV_CONFIG_DIR: &str = "PMONOTIFY_CONFIG";
const ENV_PREFIX: &str = "PMONOTIFY_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmonotify";

// Default values for configuration
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_NOTIFICATION_ENABLED: bool = true;
const DEFAULT_SIMULATOR_PRODUCERS: usize = 2;
const DEFAULT_SIMULATOR_EVENT_INTERVAL_MS: usize = 120;
const DEFAULT_SIMULATOR_DURATION_MS: usize = 3000;
const DEFAULT_SIMULATOR_PAUSE_EVERY: usize = 5;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path)? {
                Value::Number(n) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path)? {
                Value::Bool(b) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Settings of the `simulator` section, read as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub producers: usize,
    pub event_interval_ms: u64,
    pub duration_ms: u64,
    pub pause_every: usize,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            producers: DEFAULT_SIMULATOR_PRODUCERS,
            event_interval_ms: DEFAULT_SIMULATOR_EVENT_INTERVAL_MS as u64,
            duration_ms: DEFAULT_SIMULATOR_DURATION_MS as u64,
            pause_every: DEFAULT_SIMULATOR_PAUSE_EVERY,
        }
    }
}

/// Configuration manager for PMONotify
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let level = config.get_log_min_level()?;
/// println!("log level: {}", level);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    /// Empty for a configuration that is never written to disk.
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Le chemin spécifié n'est pas un répertoire: {}",
                path.display()
            ));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;
        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMONOTIFY_CONFIG` environment variable
    /// 3. `.pmonotify` in the current directory
    /// 4. `.pmonotify` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies `PMONOTIFY_CONFIG__*` environment overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        Self::load_config_with_overrides(directory, env::vars())
    }

    /// Same as [`Config::load_config`] with an explicit set of
    /// `PMONOTIFY_CONFIG__A__B=value` variables instead of the process
    /// environment.
    pub fn load_config_with_overrides(
        directory: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        // Try to load the configuration file
        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file=%path, "Loaded config file");
            data
        } else {
            info!(config_file=%path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &Self::lower_keys_value(external_value));
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_overrides(&mut config_value, vars);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// In-memory configuration built from the embedded defaults only.
    pub fn embedded() -> Self {
        let value = serde_yaml::from_str::<Value>(DEFAULT_CONFIG)
            .map(Self::lower_keys_value)
            .unwrap_or_else(|_| Value::Mapping(Mapping::new()));
        Config {
            config_dir: String::new(),
            path: String::new(),
            data: Mutex::new(value),
        }
    }

    pub fn get_config_dir(&self) -> &str {
        &self.config_dir
    }

    pub fn get_config_file(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("Configuration lock poisoned"))
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let yaml = serde_yaml::to_string(&*self.lock()?)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "logger", "min_level"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key_path = rest.split("__").collect::<Vec<_>>();
            let yaml_value = Self::convert_env_value(&value);
            if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                warn!(variable = %key, error = %err, "Ignoring configuration override");
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Gets the minimum log level from the configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Sets the minimum log level in the configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }

    impl_bool_config!(
        get_notification_enabled,
        set_notification_enabled,
        &["notification", "enabled"],
        DEFAULT_NOTIFICATION_ENABLED
    );

    impl_usize_config!(
        get_simulator_producers,
        set_simulator_producers,
        &["simulator", "producers"],
        DEFAULT_SIMULATOR_PRODUCERS
    );

    impl_usize_config!(
        get_simulator_event_interval_ms,
        set_simulator_event_interval_ms,
        &["simulator", "event_interval_ms"],
        DEFAULT_SIMULATOR_EVENT_INTERVAL_MS
    );

    impl_usize_config!(
        get_simulator_duration_ms,
        set_simulator_duration_ms,
        &["simulator", "duration_ms"],
        DEFAULT_SIMULATOR_DURATION_MS
    );

    impl_usize_config!(
        get_simulator_pause_every,
        set_simulator_pause_every,
        &["simulator", "pause_every"],
        DEFAULT_SIMULATOR_PAUSE_EVERY
    );

    /// Reads the whole `simulator` section, missing keys taking their default.
    pub fn get_simulator_settings(&self) -> Result<SimulatorSettings> {
        match self.get_value(&["simulator"]) {
            Ok(value) => Ok(serde_yaml::from_value(value)?),
            Err(_) => Ok(SimulatorSettings::default()),
        }
    }
}

/// Returns the global configuration instance, loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from `external` are merged into `default`
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // scalars and sequences are replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_merge_yaml_replaces_scalars_and_keeps_defaults() {
        let mut default = yaml("a: 1\nb:\n  c: 2\n  d: 3\n");
        merge_yaml(&mut default, &yaml("b:\n  c: 20\ne: 5\n"));
        assert_eq!(default, yaml("a: 1\nb:\n  c: 20\n  d: 3\ne: 5\n"));
    }

    #[test]
    fn test_lower_keys_value() {
        let lowered = Config::lower_keys_value(yaml("Host:\n  Logger:\n    MIN_LEVEL: debug\n"));
        assert_eq!(lowered, yaml("host:\n  logger:\n    min_level: debug\n"));
    }

    #[test]
    fn test_convert_env_value() {
        assert_eq!(Config::convert_env_value("12"), Value::Number(Number::from(12)));
        assert_eq!(Config::convert_env_value("false"), Value::Bool(false));
        assert_eq!(
            Config::convert_env_value("WARN"),
            Value::String("WARN".to_string())
        );
    }

    #[test]
    fn test_embedded_defaults() {
        let config = Config::embedded();
        assert!(config.get_notification_enabled().unwrap());
        assert_eq!(config.get_log_min_level().unwrap(), DEFAULT_LOG_MIN_LEVEL);
        assert_eq!(
            config.get_simulator_settings().unwrap(),
            SimulatorSettings::default()
        );
        // Never written anywhere.
        config.set_simulator_producers(9).unwrap();
        assert_eq!(config.get_simulator_producers().unwrap(), 9);
    }
}
