use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Resumable parallel uploader for S3-compatible storage", long_about = None)]
pub struct Cli {
    #[clap(help = "Local file, or directory with -r")]
    pub source: PathBuf,
    #[clap(help = "Destination bucket")]
    pub bucket: String,
    #[clap(help = "Destination key (a trailing / appends the source file name)")]
    pub dest: String,

    #[clap(short = 'r', long = "recursive", help = "Copy a directory tree", display_order = 1)]
    pub recursive: bool,
    #[clap(
        long = "check-size",
        action = clap::ArgAction::Set,
        default_value_t = true,
        help = "Skip files whose remote size matches",
        display_order = 2
    )]
    pub check_size: bool,
    #[clap(long = "check-md5", help = "Also require a matching MD5/ETag to skip", display_order = 3)]
    pub check_md5: bool,
    #[clap(short = 'n', long = "workers", default_value_t = 1, help = "Concurrent workers", display_order = 4)]
    pub workers: usize,
    #[clap(long = "part-size-mib", default_value_t = 20, help = "Multipart chunk size in MiB (min 5)")]
    pub part_size_mib: u64,
    #[clap(
        long = "acl",
        default_value = "private",
        help = "Canned ACL: private, public-read, public-read-write, authenticated-read, bucket-owner-read, bucket-owner-full-control"
    )]
    pub acl: String,
    #[clap(long = "content-type", default_value = "application/octet-stream")]
    pub content_type: String,

    #[clap(long = "region", env = "AWS_REGION", default_value = "ap-northeast-1")]
    pub region: String,
    #[clap(long = "endpoint", env = "S3CP_ENDPOINT", help = "Custom S3-compatible endpoint URL")]
    pub endpoint: Option<String>,
    #[clap(long = "path-style", help = "Use path-style bucket addressing")]
    pub path_style: bool,

    #[clap(long = "retry-initial-interval", default_value_t = 1000, help = "Initial retry delay (ms)")]
    pub retry_initial_interval: u64,
    #[clap(long = "retry-multiplier", default_value_t = 1.5)]
    pub retry_multiplier: f64,
    #[clap(long = "retry-randomization-factor", default_value_t = 0.5)]
    pub retry_randomization_factor: f64,
    #[clap(long = "retry-max-interval", default_value_t = 60, help = "Maximum retry delay (s)")]
    pub retry_max_interval: u64,
    #[clap(
        long = "retry-max-elapsed-time",
        default_value_t = 15,
        help = "Give up retrying after this many minutes (0 = never)"
    )]
    pub retry_max_elapsed_time: u64,

    #[clap(short = 'd', long = "log-level", default_value_t = 0, help = "0 warn, 1-2 info, 3 debug, 4 trace")]
    pub log_level: u8,
    #[clap(long = "json-log", help = "Print buffered logs as one JSON object on exit")]
    pub json_log: bool,
    #[clap(long = "log-file", help = "Also append logs to this file")]
    pub log_file: Option<PathBuf>,
    #[clap(long = "no-progress", help = "Hide the progress bar")]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::parse_from(["s3cp", "a.bin", "bk", "dst/"]);
        assert!(cli.check_size);
        assert!(!cli.check_md5);
        assert_eq!(cli.workers, 1);
        assert_eq!(cli.part_size_mib, 20);
        assert_eq!(cli.acl, "private");
        assert_eq!(cli.retry_initial_interval, 1000);
    }

    #[test]
    fn check_size_can_be_disabled() {
        let cli =
            Cli::parse_from(["s3cp", "--check-size", "false", "-r", "-n", "4", "dir", "bk", "x"]);
        assert!(!cli.check_size);
        assert!(cli.recursive);
        assert_eq!(cli.workers, 4);
    }
}
