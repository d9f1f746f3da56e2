//! Subscriber setup for the binaries.
//!
//! The library only emits `tracing` events; nothing in it installs a
//! subscriber.

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format {:?}; use pretty or json", s)),
        }
    }
}

/// The filter used when `RUST_LOG` is unset or unparseable.
fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs a global subscriber writing to stderr, so stdout stays free for
/// command output.
///
/// Fails if a subscriber is already installed.
pub fn init(format: LogFormat, default_level: &str) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("can't install log subscriber: {}", e))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_parse() {
        assert_eq!("pretty".parse(), Ok(LogFormat::Pretty));
        assert_eq!("JSON".parse(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
