//! # PMOChannel Configuration Module
//!
//! This module provides configuration management for PMOChannel, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let level = config.get_log_min_level()?;
//! let data_dir = config.get_managed_dir(&["channel", "directory"], "channel")?;
//!
//! // Update configuration values
//! config.set_log_enable_console(false)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmochannel.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOChannel configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOCHANNEL_CONFIG";
const ENV_PREFIX: &str = "PMOCHANNEL_CONFIG__";
const DEFAULT_CONFIG_DIR: &str = ".pmochannel";

// Default values for configuration
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_CHANNEL_NAME: &str = "pmochannel";
const DEFAULT_BUILD_AHEAD_DAYS: usize = 1;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
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
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.is_empty() => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for PMOChannel
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let name = config.get_channel_name()?;
/// println!("Channel: {}", name);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn lock(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

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
        if Path::new(DEFAULT_CONFIG_DIR).exists() {
            return DEFAULT_CONFIG_DIR.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(DEFAULT_CONFIG_DIR);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        DEFAULT_CONFIG_DIR.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        // Create if doesn't exist
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        // Verify it's a directory
        if !path.is_dir() {
            return Err(anyhow!("Le chemin spécifié n'est pas un répertoire"));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        // Test read permission
        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOCHANNEL_CONFIG` environment variable
    /// 3. `.pmochannel` in the current directory
    /// 4. `.pmochannel` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid config directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    ///
    /// # Arguments
    ///
    /// * `directory` - The directory containing the config.yaml file, or empty to use defaults
    pub fn load_config(directory: &str) -> Result<Self> {
        // Obtenir le répertoire de configuration
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        // Construire le chemin du fichier config.yaml
        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        // Charger la configuration par défaut
        let mut default_value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        // Essayer de charger le fichier de configuration
        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file=%path, "Loaded config file");
            data
        } else {
            info!(config_file=%path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Merger avec la config par défaut (clés en minuscules des deux côtés)
        let external_value = Self::lower_keys_value(serde_yaml::from_slice(&yaml_data)?);
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = default_value;

        // Appliquer les overrides depuis les variables d'environnement
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Répertoire de configuration effectivement utilisé
    pub fn get_config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["channel", "build_timeout_secs"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
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
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
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
        Self::get_value_internal(&self.lock(), path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(e) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var=%key, error=%e, "Ignoring environment override");
                }
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
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        // Chemin relatif : le résoudre par rapport à config_dir
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory=%absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il est créé s'il n'existe pas ; la valeur par défaut est
    /// enregistrée dans la configuration si la clé est absente.
    ///
    /// # Exemple
    ///
    /// ```no_run
    /// use pmoconfig::get_config;
    ///
    /// let config = get_config();
    /// let dir = config.get_managed_dir(&["channel", "directory"], "channel")?;
    /// println!("Channel data directory: {}", dir);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_string_config!(
        get_channel_name,
        set_channel_name,
        &["channel", "name"],
        DEFAULT_CHANNEL_NAME
    );

    impl_usize_config!(
        get_build_ahead_days,
        set_build_ahead_days,
        &["channel", "build_ahead_days"],
        DEFAULT_BUILD_AHEAD_DAYS
    );
}

/// Returns the global configuration instance
///
/// The configuration is lazily loaded on first access.
///
/// # Panics
///
/// Panics on first access if the configuration directory cannot be created
/// or the configuration file cannot be parsed.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// For mappings, keys from `external` are merged recursively into `default`;
/// scalars and sequences from `external` replace the default ones.
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
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_are_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_log_enable_console().unwrap());
        assert_eq!(config.get_channel_name().unwrap(), "pmochannel");
        assert_eq!(
            config.get_value(&["channel", "build_timeout_secs"]).unwrap(),
            Value::Number(Number::from(120))
        );
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_external_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Channel:\n  Name: retro-tv\n  build_ahead_days: 3\n",
        )
        .unwrap();
        let config = load(&dir);

        assert_eq!(config.get_channel_name().unwrap(), "retro-tv");
        assert_eq!(config.get_build_ahead_days().unwrap(), 3);
        // Les clés absentes du fichier gardent la valeur intégrée
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_set_value_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        config.set_log_min_level("DEBUG".to_string()).unwrap();
        config.set_build_ahead_days(7).unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.get_log_min_level().unwrap(), "DEBUG");
        assert_eq!(reloaded.get_build_ahead_days().unwrap(), 7);
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        env::set_var("PMOCHANNEL_CONFIG__TESTS__OVERRIDE_PROBE", "42");
        let config = load(&dir);
        env::remove_var("PMOCHANNEL_CONFIG__TESTS__OVERRIDE_PROBE");

        assert_eq!(
            config.get_value(&["tests", "override_probe"]).unwrap(),
            Value::Number(Number::from(42))
        );
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        let managed = config.get_managed_dir(&["channel", "archive"], "archive").unwrap();

        assert_eq!(Path::new(&managed), dir.path().join("archive"));
        assert!(Path::new(&managed).is_dir());
        assert_eq!(
            config.get_value(&["channel", "archive"]).unwrap(),
            Value::String("archive".into())
        );
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        assert!(config.get_value(&["channel", "nope", "deeper"]).is_err());
    }
}
