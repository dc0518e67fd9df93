use anyhow::Result;
use std::path::PathBuf;
use std::sync::Once;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Which surface is logging, also names the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Relay,
    Client,
    Put,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Relay => "relay",
            Component::Client => "client",
            Component::Put => "put",
        }
    }
}

pub struct LogConfig {
    pub component: Component,
    /// Directory where log files will be stored, `None` disables the file layer
    pub log_dir: Option<PathBuf>,
    pub max_level: Level,
    pub log_to_console: bool,
    /// Overrides `max_level` entirely when set
    pub env_filter: Option<String>,
    /// Dependency crates only allowed to log errors
    pub silent_deps: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            component: Component::Relay,
            log_dir: Some(PathBuf::from("logs")),
            max_level: Level::INFO,
            log_to_console: true,
            env_filter: None,
            silent_deps: vec!["hyper_util".into(), "reqwest".into(), "mio".into()],
        }
    }
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = initialize_logging_internal(config);
    });

    result
}

fn initialize_logging_internal(config: LogConfig) -> Result<()> {
    let mut layers = Vec::new();

    if config.log_to_console {
        let stdout_layer = fmt::Layer::new()
            .with_ansi(true)
            .with_target(true)
            .compact();

        layers.push(stdout_layer.with_filter(build_filter(&config)?).boxed());
    }

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;

        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{}.log", config.component.as_str()),
        );
        let file_layer = fmt::Layer::new()
            .with_ansi(false)
            .with_writer(file_appender)
            .with_target(true);

        layers.push(file_layer.with_filter(build_filter(&config)?).boxed());
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    Ok(())
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let mut filter = if let Some(filter_str) = &config.env_filter {
        EnvFilter::try_new(filter_str)?
    } else {
        EnvFilter::try_new(config.max_level.to_string())?
    };

    for dep in &config.silent_deps {
        filter = filter.add_directive(format!("{}=error", dep).parse()?);
    }

    Ok(filter)
}

pub fn parse_level(level: &str) -> Option<Level> {
    match level {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_silences_dependencies() {
        let filter = build_filter(&LogConfig::default())
            .unwrap()
            .to_string()
            .to_lowercase();
        assert!(filter.contains("reqwest=error"));
        assert!(filter.contains("info"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("verbose"), None);
    }
}
