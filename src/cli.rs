use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, BackupMode, Config};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Mirror an object bucket into a compressed cold archive", long_about = None)]
pub struct Cli {
    #[clap(flatten)]
    pub global: GlobalArgs,
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[clap(long, global = true, env = "COLDMIRROR_SOURCE_ROOT", default_value = ".", help = "Directory holding the source bucket")]
    pub source_root: PathBuf,
    #[clap(long, global = true, env = "COLDMIRROR_SOURCE_BUCKET", default_value = "", hide_default_value(true), help = "Source (primary) bucket name")]
    pub source_bucket: String,
    #[clap(long, global = true, env = "COLDMIRROR_ARCHIVE_ROOT", help = "Directory holding the archive bucket (defaults to --source-root)")]
    pub archive_root: Option<PathBuf>,
    #[clap(long, global = true, env = "COLDMIRROR_ARCHIVE_SUFFIX", default_value = config::DEFAULT_ARCHIVE_SUFFIX, help = "Suffix appended to the source bucket to name the archive")]
    pub archive_suffix: String,
    #[clap(short = 'c', long, global = true, env = "COLDMIRROR_PARALLEL", default_value_t = config::DEFAULT_CONCURRENCY, help = "Number of objects transferred at once")]
    pub concurrency: usize,
    #[clap(long, global = true, env = "COLDMIRROR_FULL_BACKUP", help = "Rewrite every object instead of skipping unchanged ones")]
    pub full: bool,
    #[clap(long, global = true, default_value_t = config::DEFAULT_PAGE_SIZE, help = "Keys requested per listing page")]
    pub page_size: usize,
    #[clap(long, global = true, default_value_t = crate::codec::DEFAULT_LEVEL, help = "gzip compression level (0-9)")]
    pub level: u32,
    #[clap(long, global = true, default_value_t = 1, help = "Attempts per object, including the first")]
    pub max_retries: usize,
    #[clap(long, global = true, default_value_t = 100, help = "Linear backoff base between attempts, in milliseconds")]
    pub backoff_ms: u64,
    #[clap(long, global = true, env = "COLDMIRROR_HOME", help = "State directory for logs (default ~/.coldmirror)")]
    pub state_dir: Option<PathBuf>,
    #[clap(long, global = true, help = "Print a one-line JSON summary")]
    pub json: bool,
    #[clap(short, long, global = true, help = "Hide progress bars")]
    pub quiet: bool,
    #[clap(short, long, global = true, help = "Write a debug log into the state directory")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Back up the source bucket into the archive bucket (default)", display_order = 1)]
    Backup,
    #[clap(about = "Restore archived objects into the source bucket", display_order = 2)]
    Restore {
        #[clap(long, help = "Archive bucket to restore from (default <source-bucket><suffix>)")]
        archive_bucket: Option<String>,
    },
    #[clap(about = "Decompress a single archived object file", display_order = 3)]
    Decompress {
        file: PathBuf,
        #[clap(short, long, default_value = ".", help = "Directory for the decompressed file")]
        output_dir: PathBuf,
    },
}

impl GlobalArgs {
    pub fn to_config(&self) -> Config {
        Config {
            source_root: self.source_root.clone(),
            source_bucket: self.source_bucket.clone(),
            archive_root: self.archive_root.clone().unwrap_or_else(|| self.source_root.clone()),
            archive_suffix: self.archive_suffix.clone(),
            archive_bucket: None,
            concurrency: self.concurrency,
            mode: if self.full { BackupMode::Full } else { BackupMode::Incremental },
            page_size: self.page_size,
            level: self.level,
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
            state_dir: self.state_dir.clone().unwrap_or_else(config::default_state_dir),
            json: self.json,
            quiet: self.quiet,
            verbose: self.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "cm", "backup", "--source-bucket", "media", "--source-root", "/data", "-c", "9", "--full",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Backup)));
        let c = cli.global.to_config();
        assert_eq!(c.source_bucket, "media");
        assert_eq!(c.archive_root, PathBuf::from("/data"));
        assert_eq!(c.archive_bucket(), "media-archive");
        assert_eq!(c.concurrency, 9);
        assert_eq!(c.mode, BackupMode::Full);
    }

    #[test]
    fn restore_takes_archive_bucket() {
        let cli = Cli::try_parse_from(["cm", "restore", "--archive-bucket", "old", "--source-bucket", "m"])
            .unwrap();
        match cli.command {
            Some(Commands::Restore { archive_bucket }) => assert_eq!(archive_bucket.as_deref(), Some("old")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["cm", "--source-bucket", "m"]).unwrap();
        assert!(cli.command.is_none());
    }
}
