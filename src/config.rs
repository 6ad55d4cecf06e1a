use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7788";
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_MAX_REQUEST: usize = 64 * 1024;

/// Server settings, usually built from the command line.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Holds `catalog.json` and the `tables/` directory
    pub data_dir: PathBuf,
    pub listen: String,
    /// Size of each connection's output buffer
    pub buffer_size: usize,
    /// Longest accepted request line, newline excluded
    pub max_request: usize,
}

impl ServerConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            listen: DEFAULT_LISTEN.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_request: DEFAULT_MAX_REQUEST,
        }
    }

    pub fn command() -> Command {
        Command::new("slotdb")
            .about("Fixed-width row store with a B-tree index, served over a line protocol")
            .arg(
                Arg::new("data")
                    .long("data")
                    .value_name("DIR")
                    .required(true)
                    .help("Data directory for catalog.json and table files"),
            )
            .arg(
                Arg::new("listen")
                    .long("listen")
                    .value_name("ADDR")
                    .default_value(DEFAULT_LISTEN)
                    .help("Listen address for the TCP server"),
            )
            .arg(
                Arg::new("buffer-size")
                    .long("buffer-size")
                    .value_name("BYTES")
                    .value_parser(value_parser!(usize))
                    .default_value("4096")
                    .help("Per-connection output buffer size"),
            )
            .arg(
                Arg::new("max-request")
                    .long("max-request")
                    .value_name("BYTES")
                    .value_parser(value_parser!(usize))
                    .default_value("65536")
                    .help("Longest accepted request line"),
            )
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let data_dir = matches
            .get_one::<String>("data")
            .context("--data is required")?;
        let listen = matches
            .get_one::<String>("listen")
            .context("--listen has no value")?;
        let buffer_size = *matches
            .get_one::<usize>("buffer-size")
            .context("--buffer-size has no value")?;
        let max_request = *matches
            .get_one::<usize>("max-request")
            .context("--max-request has no value")?;

        let config = Self {
            data_dir: PathBuf::from(data_dir),
            listen: listen.clone(),
            buffer_size,
            max_request,
        };
        config.check()?;
        Ok(config)
    }

    /// A select whose widest row does not fit the output buffer is refused
    /// when it runs; only zero sizes are rejected here.
    fn check(&self) -> Result<()> {
        anyhow::ensure!(self.buffer_size > 0, "--buffer-size must be positive");
        anyhow::ensure!(self.max_request > 0, "--max-request must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let matches = ServerConfig::command()
            .try_get_matches_from(["slotdb", "--data", "/tmp/db"])
            .unwrap();
        let config = ServerConfig::from_matches(&matches).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/db"));
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.max_request, DEFAULT_MAX_REQUEST);
    }

    #[test]
    fn test_overrides() {
        let matches = ServerConfig::command()
            .try_get_matches_from([
                "slotdb",
                "--data",
                "d",
                "--listen",
                "0.0.0.0:9000",
                "--buffer-size",
                "512",
                "--max-request",
                "100",
            ])
            .unwrap();
        let config = ServerConfig::from_matches(&matches).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.max_request, 100);
    }

    #[test]
    fn test_rejects_missing_data_and_zero_sizes() {
        assert!(ServerConfig::command()
            .try_get_matches_from(["slotdb"])
            .is_err());
        let matches = ServerConfig::command()
            .try_get_matches_from(["slotdb", "--data", "d", "--buffer-size", "0"])
            .unwrap();
        assert!(ServerConfig::from_matches(&matches).is_err());
    }
}
