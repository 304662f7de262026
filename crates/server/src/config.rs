use anyhow::Result;
use botsense_common::AppConfig;
use std::path::PathBuf;
use tracing::info;

/// Resolved configuration with the source path for reloading.
pub struct LoadedConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl LoadedConfig {
    pub fn load(path: &str) -> Result<Self> {
        info!(path = path, "loading configuration");
        let config = AppConfig::load(path)?;
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }

    /// Re-read the file. The previous configuration is kept on error.
    pub fn reload(&mut self) -> Result<&AppConfig> {
        let path_str = self.config_path.to_string_lossy().to_string();
        info!(path = %path_str, "reloading configuration");
        self.config = AppConfig::load(&path_str)?;
        Ok(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn load_and_reload_from_file() {
        let path = std::env::temp_dir().join(format!("botsense-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "rate_limit:\n  max_requests: 5\n").unwrap();

        let mut loaded = LoadedConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.config.rate_limit.max_requests, 5);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "  window_secs: 0").unwrap();
        assert!(loaded.reload().is_err());
        assert_eq!(loaded.config.rate_limit.max_requests, 5);

        std::fs::remove_file(&path).ok();
        assert!(LoadedConfig::load(path.to_str().unwrap()).is_err());
    }
}
