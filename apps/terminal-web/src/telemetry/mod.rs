//! Operational logging for the service. The audit trail lives in
//! [`crate::audit`]; this module only wires `tracing` to stderr or a file.

fn env_truthy(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::{self, OpenOptions};
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "TERMINAL_WEB_LOG_FILTER";
    const TRACE_DEPS_ENV: &str = "TERMINAL_WEB_TRACE_DEPS";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        Warn,
        #[default]
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }
        install(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn install(config: &LogConfig) -> Result<(), InitError> {
        let (env_filter, throttled_deps) = build_env_filter(config.level.to_filter());

        let (writer, guard) = match &config.file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        if throttled_deps {
            tracing::debug!(
                target: "terminal_web::telemetry",
                "ssh transport traces capped at info; set {TRACE_DEPS_ENV}=1 to lift"
            );
        }
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> (EnvFilter, bool) {
        if let Ok(filter) = std::env::var(FILTER_ENV) {
            return (EnvFilter::new(filter), false);
        }
        let (filter, throttled) = default_filter_for(level);
        (EnvFilter::new(filter), throttled)
    }

    const NOISY_DEP_TARGETS: &[&str] = &["russh", "mio", "tokio_util"];

    pub(crate) fn default_filter_for(level: LevelFilter) -> (String, bool) {
        let base = match level {
            LevelFilter::TRACE => "info,terminal_web=trace",
            LevelFilter::DEBUG => "info,terminal_web=debug",
            LevelFilter::INFO => "info",
            LevelFilter::WARN => "warn",
            LevelFilter::ERROR => "error",
            LevelFilter::OFF => "off",
        };
        let allow_deps = super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false);
        if level >= LevelFilter::DEBUG && !allow_deps {
            let mut filter = base.to_owned();
            for target in NOISY_DEP_TARGETS {
                filter.push(',');
                filter.push_str(target);
                filter.push_str("=info");
            }
            (filter, true)
        } else {
            (base.to_owned(), false)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn debug_level_caps_transport_noise() {
            let (filter, throttled) = default_filter_for(LevelFilter::DEBUG);
            assert!(filter.starts_with("info,terminal_web=debug"));
            assert!(filter.contains("russh=info"));
            assert!(throttled);
        }

        #[test]
        fn info_level_passes_through() {
            let (filter, throttled) = default_filter_for(LevelFilter::INFO);
            assert_eq!(filter, "info");
            assert!(!throttled);
        }

        #[test]
        fn level_names_are_lowercase() {
            assert_eq!(LogLevel::Warn.as_str(), "warn");
            assert_eq!(LogLevel::default(), LogLevel::Info);
        }
    }
}
