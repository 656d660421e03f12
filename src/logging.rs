use anyhow::{anyhow, Context, Error};
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

use crate::config::Config;

/// Install the process logger: remote syslog over UDP when a host is
/// configured, stderr through `env_logger` otherwise.
pub fn init(config: &Config) -> Result<(), Error> {
    let Some((host, port)) = config.syslog_server() else {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(config.log_level.as_str()),
        )
        .init();
        return Ok(());
    };

    let level = syslog_level(&config.log_level)?;
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "everytherm".to_string(),
        pid: std::process::id(),
    };
    let logger = syslog::udp(formatter, ("0.0.0.0", 0), (host, port))
        .map_err(|e| anyhow!("connecting to syslog at {}:{}: {}", host, port, e))?;

    log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
        .context("a logger is already installed")?;
    log::set_max_level(level);

    Ok(())
}

/// Syslog has no per-module filtering, so only a bare level is accepted.
fn syslog_level(level: &str) -> Result<LevelFilter, Error> {
    level
        .parse()
        .with_context(|| format!("invalid log level for syslog: {}", level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_level() {
        assert_eq!(syslog_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(syslog_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert!(syslog_level("everytherm=debug").is_err());
    }
}
