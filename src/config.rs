use std::env;
use std::path::PathBuf;

use crate::logger::{LogLevel, LoggerConfig};
use crate::resources::Device;

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub device: Device,
    pub lowvram: bool,
    pub compile: bool,
    pub fp16: bool,
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub weights_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: Option<u16>,
    pub output_dir: PathBuf,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub log_json: bool,
    pub resources: ResourceConfig,
    pub preview: PreviewConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        ResourceConfig {
            device: Device::Cuda(0),
            lowvram: false,
            compile: false,
            fp16: false,
        }
    }
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let device = match env::var("CASCADE_DEVICE") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                log::warn!("⚠️  {}, falling back to cuda:0", e);
                Device::Cuda(0)
            }),
            Err(_) => Device::Cuda(0),
        };

        ResourceConfig {
            device,
            lowvram: env_flag("CASCADE_LOWVRAM", false),
            compile: env_flag("CASCADE_COMPILE", false),
            fp16: env_flag("CASCADE_FP16", false),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_lowvram(mut self, enabled: bool) -> Self {
        self.lowvram = enabled;
        self
    }

    pub fn with_compile(mut self, enabled: bool) -> Self {
        self.compile = enabled;
        self
    }

    pub fn with_fp16(mut self, enabled: bool) -> Self {
        self.fp16 = enabled;
        self
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            enabled: true,
            weights_path: None,
        }
    }
}

impl PreviewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        PreviewConfig {
            enabled: env_flag("CASCADE_PREVIEW", true),
            weights_path: env::var("CASCADE_PREVIEWER_WEIGHTS").ok().map(PathBuf::from),
        }
    }

    pub fn disabled() -> Self {
        PreviewConfig {
            enabled: false,
            weights_path: None,
        }
    }

    pub fn with_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_path = Some(path.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: None,
            output_dir: PathBuf::from("outputs"),
            log_level: LogLevel::Info,
            log_file: None,
            log_json: false,
            resources: ResourceConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let port = env::var("PORT").ok().and_then(|port| port.parse().ok());
        let output_dir = env::var("CASCADE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("outputs"));
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|level| level.parse::<LogLevel>().ok())
            .unwrap_or(LogLevel::Info);

        Config {
            port,
            output_dir,
            log_level,
            log_file: env::var("LOG_FILE").ok().map(PathBuf::from),
            log_json: env_flag("LOG_JSON", false),
            resources: ResourceConfig::from_env(),
            preview: PreviewConfig::from_env(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Logger settings for the binary: `LOG_LEVEL`, plus JSON lines and a log file when asked for.
    pub fn logger_config(&self) -> LoggerConfig {
        let config = LoggerConfig::development()
            .with_level(self.log_level)
            .with_json_output(self.log_json);
        match &self.log_file {
            Some(path) => config.with_file_output(path),
            None => config,
        }
    }

    pub fn with_resources(mut self, config: ResourceConfig) -> Self {
        self.resources = config;
        self
    }

    pub fn with_preview(mut self, config: PreviewConfig) -> Self {
        self.preview = config;
        self
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(7860)
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name).ok().map_or(default, |val| parse_flag(&val))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.port_or_default(), 7860);
        assert!(config.preview.enabled);
        assert_eq!(config.resources.device, Device::Cuda(0));
        assert!(!config.resources.lowvram);
    }

    #[test]
    fn test_builders() {
        let config = Config::new()
            .with_port(9000)
            .with_output_dir("/tmp/out")
            .with_preview(PreviewConfig::disabled())
            .with_resources(ResourceConfig::new().with_lowvram(true).with_fp16(true));
        assert_eq!(config.port_or_default(), 9000);
        assert!(!config.preview.enabled);
        assert!(config.resources.lowvram);
        assert!(config.resources.fp16);
    }

    #[test]
    fn test_logger_config_follows_settings() {
        let mut config = Config::new();
        let logger = config.logger_config();
        assert_eq!(logger.min_level, LogLevel::Info);
        assert!(!logger.output_json);
        assert!(logger.log_file_path.is_none());

        config.log_level = LogLevel::Warn;
        config.log_json = true;
        config.log_file = Some(PathBuf::from("/tmp/rcascade-test.log"));
        let logger = config.logger_config();
        assert_eq!(logger.min_level, LogLevel::Warn);
        assert!(logger.output_json);
        assert_eq!(logger.log_file_path, Some(PathBuf::from("/tmp/rcascade-test.log")));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("ON"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
