use library::helpers::parse_seconds;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;

/// Output format of log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

#[derive(Debug, Error)]
#[error("unknown log format '{0}', expected one of text, compact or json")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(UnknownLogFormat(other.to_owned())),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Synchronous HTTP frontend for a pool of compile workers behind Redis")]
pub struct MainOptions {
    /// Log level filter, accepts any tracing env-filter directive
    #[structopt(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log: String,

    /// Format of log messages
    #[structopt(
        long,
        env,
        default_value = "text",
        possible_values = &["text", "compact", "json"],
        global = true
    )]
    pub log_format: LogFormat,

    /// Seconds the startup sequence may take before the bridge gives up
    #[structopt(long, env, default_value = "60", parse(try_from_str = parse_seconds))]
    pub startup_timeout: Duration,

    /// Seconds the shutdown sequence may take after all jobs have terminated
    #[structopt(long, env, default_value = "60", parse(try_from_str = parse_seconds))]
    pub shutdown_timeout: Duration,

    #[structopt(flatten)]
    pub gateway: modules::gateway::Options,
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn parse_log_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn read_lifecycle_timeouts() {
        let options = MainOptions::from_iter_safe(&[
            "bridge",
            "--id",
            "gw-1",
            "--startup-timeout",
            "5",
        ])
        .unwrap();

        assert_eq!(options.startup_timeout, Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(60));
    }
}
