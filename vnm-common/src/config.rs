//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting that can come from more than one place:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "VNM_ROOT_FOLDER";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "VNM_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "vnm.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database and runtime files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP listen address for the service binary
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub activation: ActivationConfig,

    #[serde(default)]
    pub recheck: RecheckConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: default_bind_address(),
            logging: LoggingConfig::default(),
            import: ImportConfig::default(),
            probe: ProbeConfig::default(),
            activation: ActivationConfig::default(),
            recheck: RecheckConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stdout when absent
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// Import and deduplication policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Age after which a conflicting node may be replaced automatically
    #[serde(default = "default_freshness_window_days")]
    pub freshness_window_days: u32,
    /// Protocol stamped on imported nodes when the caller gives no hint
    #[serde(default = "default_protocol")]
    pub default_protocol: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            freshness_window_days: default_freshness_window_days(),
            default_protocol: default_protocol(),
        }
    }
}

/// Probe worker pool and collaborator commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Number of probes in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-node probe timeout
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Wall-clock bound on one batch call
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    /// Echo requests sent per reachability check
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    /// Reachability binary
    #[serde(default = "default_ping_command")]
    pub ping_command: String,
    /// Throughput command template; `{ip}`, `{login}`, `{password}` are substituted
    #[serde(default)]
    pub throughput_command: Option<String>,
    /// Measurements below this rate count as a failed throughput probe
    #[serde(default = "default_min_mbps")]
    pub min_mbps: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            probe_timeout_secs: default_probe_timeout_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            ping_count: default_ping_count(),
            ping_command: default_ping_command(),
            throughput_command: None,
            min_mbps: default_min_mbps(),
        }
    }
}

/// Service activation collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Command receiving the node as JSON on stdin and printing a service grant
    #[serde(default)]
    pub command: Option<String>,
}

/// Scheduled re-check of non-protected nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recheck_interval_secs")]
    pub interval_secs: u64,
    /// Only nodes untouched for this long are re-checked
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for RecheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_recheck_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:5740".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_freshness_window_days() -> u32 {
    28
}

fn default_protocol() -> String {
    "pptp".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_probe_timeout_secs() -> u64 {
    12
}

fn default_batch_timeout_secs() -> u64 {
    300
}

fn default_ping_count() -> u32 {
    3
}

fn default_ping_command() -> String {
    "ping".to_string()
}

fn default_min_mbps() -> f64 {
    1.0
}

fn default_recheck_interval_secs() -> u64 {
    3600
}

fn default_stale_after_secs() -> u64 {
    86_400
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("vnm"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vnm"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("vnm"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vnm"))
    } else {
        // ~/.local/share/vnm (or /var/lib/vnm for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("vnm"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vnm"))
    }
}

/// Locate the TOML config file for a module
///
/// Checks `VNM_CONFIG`, then `~/.config/vnm/<module>.toml`, then
/// `/etc/vnm/<module>.toml` (non-Windows only).
pub fn find_config_file(module_name: &str) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!("{} points at missing file: {}", CONFIG_PATH_ENV, path.display());
    }

    let file_name = format!("{}.toml", module_name);
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("vnm").join(&file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if !cfg!(target_os = "windows") {
        let system_config = PathBuf::from("/etc/vnm").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config for a module, falling back to defaults on any problem
pub fn load_or_default(explicit_path: Option<&Path>, module_name: &str) -> TomlConfig {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(module_name),
    };

    match path {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using compiled defaults", e);
                TomlConfig::default()
            }
        },
        None => {
            warn!("No config file found for {} - using compiled defaults", module_name);
            TomlConfig::default()
        }
    }
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    debug!("Wrote config file {}", path.display());
    Ok(())
}

/// Root folder resolver following the CLI → ENV → TOML → default priority
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_value: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_value = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            info!("Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = CompiledDefaults::for_current_platform().root_folder;
        info!(
            module = %self.module_name,
            "Root folder from compiled default: {}",
            path.display()
        );
        path
    }
}

/// Creates the root folder and names the files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}
