//! Command-line argument parsing for the sockexec client
//!
//! Uses clap for argument parsing with derive macros.

use clap::Parser;
use std::path::PathBuf;

/// sockexec - interactive client for a sockexec server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server to connect to at startup (URL or configured remote name)
    ///
    /// Example: ws://127.0.0.1:8080 or devbox
    #[arg(long, short = 'u', env = "SOCKEXEC_URL")]
    pub url: Option<String>,

    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["sockexec"]);
        assert!(args.config.is_none());
        assert!(!args.verbose);
    }

    #[test]
    fn test_url_flag() {
        let args = Args::parse_from(["sockexec", "--url", "ws://127.0.0.1:8080"]);
        assert_eq!(args.url.as_deref(), Some("ws://127.0.0.1:8080"));

        let args = Args::parse_from(["sockexec", "-u", "devbox"]);
        assert_eq!(args.url.as_deref(), Some("devbox"));
    }

    #[test]
    fn test_config_and_verbose() {
        let args = Args::parse_from(["sockexec", "-c", "/tmp/client.toml", "-v"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/client.toml")));
        assert!(args.verbose);
    }
}
