use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::CopyError;
use crate::retry::BackoffPolicy;
use crate::store::{PutOptions, S3Options};

pub const MIB: u64 = 1024 * 1024;
/// Smallest part size S3 accepts for every part but the last.
pub const MIN_S3_PART_SIZE: u64 = 5 * MIB;
pub const DEFAULT_PART_SIZE: u64 = 20 * MIB;

const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "aws-exec-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
];

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: u8,
    pub json: bool,
    pub file: Option<PathBuf>,
}

/// Run-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: PathBuf,
    pub bucket: String,
    pub dest: String,
    pub recursive: bool,
    pub check_size: bool,
    pub check_md5: bool,
    pub workers: usize,
    pub part_size: u64,
    pub put: PutOptions,
    pub backoff: BackoffPolicy,
    pub s3: S3Options,
    pub log: LogConfig,
    pub show_progress: bool,
}

impl Config {
    /// Defaults for a copy of `source` to `bucket/dest`.
    pub fn new(source: impl Into<PathBuf>, bucket: &str, dest: &str) -> Self {
        Self {
            source: source.into(),
            bucket: bucket.to_string(),
            dest: dest.to_string(),
            recursive: false,
            check_size: true,
            check_md5: false,
            workers: 1,
            part_size: DEFAULT_PART_SIZE,
            put: PutOptions { acl: Some("private".to_string()), ..PutOptions::default() },
            backoff: BackoffPolicy::default(),
            s3: S3Options {
                region: "ap-northeast-1".to_string(),
                endpoint: None,
                force_path_style: false,
            },
            log: LogConfig { level: 0, json: false, file: None },
            show_progress: false,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, CopyError> {
        let cfg = Self {
            source: cli.source.clone(),
            bucket: cli.bucket.clone(),
            dest: cli.dest.clone(),
            recursive: cli.recursive,
            check_size: cli.check_size,
            check_md5: cli.check_md5,
            workers: cli.workers,
            part_size: cli.part_size_mib.saturating_mul(MIB),
            put: PutOptions { acl: Some(cli.acl.clone()), content_type: cli.content_type.clone() },
            backoff: BackoffPolicy {
                initial_interval: Duration::from_millis(cli.retry_initial_interval),
                multiplier: cli.retry_multiplier,
                randomization_factor: cli.retry_randomization_factor,
                max_interval: Duration::from_secs(cli.retry_max_interval),
                max_elapsed_time: Duration::from_secs(cli.retry_max_elapsed_time * 60),
            },
            s3: S3Options {
                region: cli.region.clone(),
                endpoint: cli.endpoint.clone(),
                force_path_style: cli.path_style,
            },
            log: LogConfig { level: cli.log_level, json: cli.json_log, file: cli.log_file.clone() },
            show_progress: !cli.no_progress && !cli.json_log,
        };
        cfg.validate()?;
        if cfg.part_size < MIN_S3_PART_SIZE {
            return Err(CopyError::InvalidArgs(format!(
                "--part-size-mib must be at least {}",
                MIN_S3_PART_SIZE / MIB
            )));
        }
        Ok(cfg)
    }

    /// Checks that hold for every backend. The S3 part-size floor is applied
    /// separately in `from_cli`.
    pub fn validate(&self) -> Result<(), CopyError> {
        if self.bucket.is_empty() {
            return Err(CopyError::InvalidArgs("bucket must not be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(CopyError::InvalidArgs("--workers must be at least 1".to_string()));
        }
        if self.part_size == 0 {
            return Err(CopyError::InvalidArgs("part size must be positive".to_string()));
        }
        if !(self.backoff.multiplier >= 1.0) {
            return Err(CopyError::InvalidArgs("--retry-multiplier must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.backoff.randomization_factor) {
            return Err(CopyError::InvalidArgs(
                "--retry-randomization-factor must be within [0, 1]".to_string(),
            ));
        }
        if let Some(acl) = &self.put.acl
            && !CANNED_ACLS.contains(&acl.as_str())
        {
            return Err(CopyError::InvalidArgs(format!("unknown ACL '{}'", acl)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_values_flow_into_config() {
        let cli = Cli::parse_from([
            "s3cp",
            "--retry-max-elapsed-time",
            "2",
            "--part-size-mib",
            "8",
            "-n",
            "3",
            "f",
            "bk",
            "k",
        ]);
        let cfg = Config::from_cli(&cli).expect("valid");
        assert_eq!(cfg.part_size, 8 * MIB);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.backoff.max_elapsed_time, Duration::from_secs(120));
    }

    #[test]
    fn rejects_bad_values() {
        let small = Cli::parse_from(["s3cp", "--part-size-mib", "4", "f", "bk", "k"]);
        assert!(Config::from_cli(&small).is_err());
        let zero = Cli::parse_from(["s3cp", "-n", "0", "f", "bk", "k"]);
        assert!(Config::from_cli(&zero).is_err());
        let acl = Cli::parse_from(["s3cp", "--acl", "everyone", "f", "bk", "k"]);
        assert!(Config::from_cli(&acl).is_err());
        let mut cfg = Config::new("f", "bk", "k");
        cfg.backoff.randomization_factor = 1.5;
        assert!(cfg.validate().is_err());
    }
}
