use crate::domain::{
    config::AppConfig,
    error::{SerialTermError, SerialTermResult},
};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".serialterm";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> SerialTermResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_project_config_path(&dir));

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager rooted at explicit paths
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration from files
    pub fn load_config(&self) -> SerialTermResult<AppConfig> {
        // Start with default configuration
        let mut config = AppConfig::default();

        if self.global_config_path.exists() {
            config = self.load_config_from_path(&self.global_config_path)?;
        }

        // Project configuration overrides the port and filter sections
        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = self.load_config_from_path(project_path)?;
                config.port = project_config.port;
                config.filter = project_config.filter;
            }
        }

        Ok(config)
    }

    /// Get global configuration path
    fn get_global_config_path() -> SerialTermResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SerialTermError::config("Could not determine home directory"))?;

        Ok(home.join(".config").join("serialterm").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        let mut path = start;

        loop {
            let config_path = path.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> SerialTermResult<AppConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            SerialTermError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            SerialTermError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &AppConfig) -> SerialTermResult<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| SerialTermError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content).map_err(|e| {
            SerialTermError::config(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Create default project configuration, returning its path
    pub fn init_project_config(&self, path: &Path) -> SerialTermResult<PathBuf> {
        let config_dir = path.join(CONFIG_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(SerialTermError::config(
                "Project configuration already exists",
            ));
        }

        fs::create_dir_all(&config_dir).map_err(|e| {
            SerialTermError::config(format!("Failed to create {} directory: {}", CONFIG_DIR, e))
        })?;

        self.save_config_to_path(&config_file, &AppConfig::default())?;

        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}
