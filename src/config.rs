use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::new());
}

/// Default size of the Annex B read-ahead buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 500_000;

/// Process wide defaults for new sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Read-ahead buffer of the Annex B framer in bytes.
    pub buffer_size: usize,
    /// Build a trace tree while parsing.
    pub trace: bool,
    /// Stop after this many frames were assembled.
    pub frame_limit: Option<usize>,
    /// Feed access units into the HRD simulator.
    pub hrd: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: DEFAULT_BUFFER_SIZE,
            trace: false,
            frame_limit: None,
            hrd: true,
        }
    }
}

impl Config {
    fn new() -> Self {
        let mut config = Config::default();

        // Environment first, then the config file on top
        for key in ["buffer_size", "trace", "frame_limit", "hrd"] {
            let var = format!("ESDEMUX_{}", key.to_uppercase());
            if let Ok(value) = env::var(&var) {
                config.apply(key, &value);
            }
        }

        let config_paths = ["./esdemux.toml", "./config/esdemux.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_file(&content);
                }
            }
        }

        config
    }

    /// Applies `key = value` lines, ignoring comments and unknown keys.
    pub fn apply_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.apply(key.trim(), value);
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "buffer_size" => match value.parse::<usize>() {
                Ok(size) if size >= 4 => self.buffer_size = size,
                _ => log::warn!("ignoring invalid buffer_size {:?}", value),
            },
            "trace" => self.trace = parse_bool(value).unwrap_or(self.trace),
            "hrd" => self.hrd = parse_bool(value).unwrap_or(self.hrd),
            "frame_limit" => {
                self.frame_limit = if value.is_empty() {
                    None
                } else {
                    match value.parse::<usize>() {
                        Ok(limit) => Some(limit),
                        Err(_) => {
                            log::warn!("ignoring invalid frame_limit {:?}", value);
                            self.frame_limit
                        }
                    }
                }
            }
            _ => log::debug!("unknown config key {}", key),
        }
    }

    /// Re-reads environment and config file.
    pub fn reload() {
        let new_config = Config::new();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns a copy of the current configuration
pub fn current() -> Config {
    CONFIG
        .read()
        .map(|config| config.clone())
        .unwrap_or_default()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# esdemux configuration
# Values here override the ESDEMUX_* environment variables.

buffer_size = 500000
trace = false
# frame_limit = 1000
hrd = true
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
