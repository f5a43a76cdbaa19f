//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fetcher_core::Concurrency;
use fetcher_core::download::constants::READ_TIMEOUT_SECS;

/// Default number of concurrent jobs.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Fetch HTTP(S) resources concurrently.
///
/// URLs are read from the arguments, or one per line from stdin. Each URL is
/// saved under the output directory using the last path segment as the file
/// name; existing files are never overwritten.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to fetch (reads stdin when omitted)
    pub urls: Vec<String>,

    /// Directory that receives downloaded files
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Capture bodies in memory instead of writing files
    #[arg(long)]
    pub in_memory: bool,

    /// Maximum concurrent jobs (0 for unbounded)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Re-run jobs that failed with transient network or TLS errors
    #[arg(long)]
    pub retry_failed: bool,

    /// Whole-request timeout in seconds
    #[arg(
        long,
        default_value_t = READ_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the batch report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Concurrency limit selected by `--concurrency`.
    pub fn concurrency_limit(&self) -> Concurrency {
        match self.concurrency {
            0 => Concurrency::Unbounded,
            n => Concurrency::Limited(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["fetcher"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert!(!args.in_memory);
        assert_eq!(args.concurrency, DEFAULT_CONCURRENCY);
        assert!(!args.retry_failed);
        assert_eq!(args.timeout, 300);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
    }

    #[test]
    fn test_cli_positional_urls() {
        let args = Args::try_parse_from(["fetcher", "https://a.example/x", "https://b.example/y"])
            .unwrap();
        assert_eq!(args.urls, vec!["https://a.example/x", "https://b.example/y"]);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["fetcher", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["fetcher", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["fetcher", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_output_dir_short_and_long() {
        let args = Args::try_parse_from(["fetcher", "-o", "out"]).unwrap();
        assert_eq!(args.output_dir, PathBuf::from("out"));

        let args = Args::try_parse_from(["fetcher", "--output-dir", "/tmp/x"]).unwrap();
        assert_eq!(args.output_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_cli_concurrency_zero_is_unbounded() {
        let args = Args::try_parse_from(["fetcher", "-c", "0"]).unwrap();
        assert_eq!(args.concurrency_limit(), Concurrency::Unbounded);

        let args = Args::try_parse_from(["fetcher", "--concurrency", "1"]).unwrap();
        assert_eq!(args.concurrency_limit(), Concurrency::SERIAL);
    }

    #[test]
    fn test_cli_timeout_zero_rejected() {
        let err = Args::try_parse_from(["fetcher", "--timeout", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_flags() {
        let args =
            Args::try_parse_from(["fetcher", "--in-memory", "--retry-failed", "--json"]).unwrap();
        assert!(args.in_memory);
        assert!(args.retry_failed);
        assert!(args.json);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["fetcher", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["fetcher", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
