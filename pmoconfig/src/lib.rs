//! # pmoconfig
//!
//! YAML configuration of PMORelay.
//!
//! The file `config.yaml` lives in a configuration directory. Its content is
//! layered over the defaults compiled into the binary (`pmorelay.yaml`), keys
//! are case-insensitive, and every change made through a setter is written
//! back to disk.
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let level = config.get_log_min_level()?;
//! config.set_http_port(port + 1)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Any key can be forced from the environment with
//! `PMORELAY_CONFIG__<SECTION>__<KEY>`, e.g.
//! `PMORELAY_CONFIG__RELAY__CHUNK_SIZE=8000`.

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

const DEFAULT_CONFIG: &str = include_str!("pmorelay.yaml");
const CONFIG_FILE: &str = "config.yaml";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMORelay configuration"));
}

const ENV_CONFIG_DIR: &str = "PMORELAY_CONFIG";
const ENV_PREFIX: &str = "PMORELAY_CONFIG__";
const DEFAULT_CONFIG_DIR: &str = ".pmorelay";

const DEFAULT_HTTP_PORT: u16 = 8004;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Getter/setter pair for an unsigned value with a fallback
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            Ok(match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map_or($default, |v| v as usize),
                _ => $default,
            })
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Getter/setter pair for a boolean with a fallback
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            Ok(match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            })
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Loaded configuration tree and the file it is persisted to
///
/// The binary uses the process-wide instance returned by [`get_config`];
/// tests build their own with [`Config::load_config`] on a temporary
/// directory.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    fn lock(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First usable candidate among: argument, `PMORELAY_CONFIG`,
    /// `./.pmorelay`, `~/.pmorelay`. Falls back to `./.pmorelay`.
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
            debug!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory from environment");
            return from_env;
        }

        let home = home_dir().map(|h| h.join(DEFAULT_CONFIG_DIR));
        [Some(PathBuf::from(DEFAULT_CONFIG_DIR)), home]
            .into_iter()
            .flatten()
            .find(|candidate| candidate.exists())
            .map(|candidate| candidate.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string())
    }

    /// Create `path` if needed and check that we can write into it
    fn prepare_config_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Cannot create config directory {}", path.display()))?;
        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let marker = path.join(".pmorelay_write_test");
        fs::write(&marker, b"")
            .with_context(|| format!("Config directory {} is not writable", path.display()))?;
        fs::remove_file(&marker)?;
        Ok(())
    }

    /// Resolve the configuration directory and make sure it is usable.
    ///
    /// See [`Config::load_config`] for the lookup order.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir = Self::find_config_dir(directory);
        Self::prepare_config_dir(Path::new(&dir))?;
        Ok(dir)
    }

    /// Load `config.yaml` from `directory`
    ///
    /// With an empty `directory` the lookup order is `PMORELAY_CONFIG`, then
    /// `.pmorelay` in the working directory, then `.pmorelay` in the home
    /// directory. The file content is merged over the embedded defaults,
    /// environment overrides are applied last, and the result is saved so
    /// the file always lists every key.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        let path = Path::new(&config_dir).join(CONFIG_FILE);

        let mut tree: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read(&path) {
            Ok(bytes) => {
                let external: Value = serde_yaml::from_slice(&bytes)
                    .with_context(|| format!("Invalid YAML in {}", path.display()))?;
                // an empty file parses as Null
                if !external.is_null() {
                    merge_yaml(&mut tree, &lower_keys_value(external));
                }
                info!(config_file = %path.display(), "Configuration loaded");
            }
            Err(_) => {
                info!(config_file = %path.display(), "No configuration file, writing defaults");
            }
        }

        let mut tree = lower_keys_value(tree);
        Self::apply_env_overrides(&mut tree);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(tree),
        };
        config.save()?;
        Ok(config)
    }

    /// Directory holding `config.yaml`
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Write the whole tree to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.path, yaml)
            .with_context(|| format!("Cannot write {}", self.path.display()))
    }

    /// Set the value at `path` (e.g. `&["relay", "chunk_size"]`), creating
    /// intermediate sections, then save.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        Self::insert_at(&mut self.lock(), path, value)?;
        self.save()
    }

    fn insert_at(node: &mut Value, path: &[&str], value: Value) -> Result<()> {
        let Some((head, rest)) = path.split_first() else {
            *node = value;
            return Ok(());
        };
        let Value::Mapping(map) = node else {
            return Err(anyhow!("Cannot set '{}' below a scalar", head));
        };

        let key = Value::String(head.to_lowercase());
        if rest.is_empty() {
            map.insert(key, value);
            return Ok(());
        }
        let child = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
        Self::insert_at(child, rest, value)
    }

    /// Value at `path`; an error if any section along it is missing
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        let mut node = &*data;
        for (depth, key) in path.iter().enumerate() {
            node = node
                .as_mapping()
                .and_then(|map| map.get(&Value::String(key.to_lowercase())))
                .ok_or_else(|| anyhow!("No configuration key {}", path[..=depth].join(".")))?;
        }
        Ok(node.clone())
    }

    fn apply_env_overrides(tree: &mut Value) {
        for (name, raw) in env::vars() {
            let Some(stripped) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path: Vec<&str> = stripped.split("__").collect();
            match Self::insert_at(tree, &path, Self::convert_env_value(&raw)) {
                Ok(()) => debug!(env_var = %name, "Configuration override applied"),
                Err(e) => warn!(env_var = %name, "Ignoring configuration override: {}", e),
            }
        }
    }

    /// `42`, `true` and `[a, b]` keep their YAML type; anything else is a string
    fn convert_env_value(raw: &str) -> Value {
        serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    /// Public base URL, `http://localhost:<port>` when unset
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s.trim_end_matches('/').to_string(),
            _ => format!("http://localhost:{}", self.get_http_port()),
        }
    }

    /// Listening port; invalid or missing values fall back to 8004
    pub fn get_http_port(&self) -> u16 {
        let port = match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Ok(Value::String(s)) => s.trim().parse::<u16>().ok(),
            _ => None,
        };
        port.unwrap_or_else(|| {
            warn!("Invalid or missing host.http_port, using {}", DEFAULT_HTTP_PORT);
            DEFAULT_HTTP_PORT
        })
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Initial log level (`ERROR` .. `TRACE`)
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Process-wide configuration, loaded on first access
///
/// # Panics
///
/// Panics on first access if no configuration directory can be created.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Lower-case every mapping key, recursively. Values are left alone.
fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys_value(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        other => other,
    }
}

/// Deep-merge `external` into `base`: sections merge key by key, scalars
/// and sequences are replaced.
fn merge_yaml(base: &mut Value, external: &Value) {
    match (base, external) {
        (Value::Mapping(base_map), Value::Mapping(ext_map)) => {
            for (key, ext_value) in ext_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_yaml(base_value, ext_value),
                    None => {
                        base_map.insert(key.clone(), ext_value.clone());
                    }
                }
            }
        }
        (slot, replacement) => *slot = replacement.clone(),
    }
}
