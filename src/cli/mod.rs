use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::scrape::{AlertArgs, ScrapeArgs};

/// Scrapes the Aare water temperature and manages the CronJob that runs it.
#[derive(Debug, Parser)]
#[command(name = "aare_scraper", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// Deployment config the CronJob descriptor is rendered from
    #[arg(
        short,
        long,
        env = "AARE_SCRAPER_CONFIG",
        default_value = "/etc/aare-scraper/deployment.yaml",
        global = true
    )]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Fetch the current reading and publish it to the backend, once
    Scrape {
        #[command(flatten)]
        scrape: ScrapeArgs,

        #[command(flatten)]
        alert: AlertArgs,
    },

    /// Render, verify or apply the CronJob descriptor
    #[command(subcommand)]
    Manifest(ManifestCommands),

    /// Inspect the configured schedule
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum ManifestCommands {
    /// Print the CronJob for an image tag
    Render {
        #[arg(long)]
        tag: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a CronJob YAML file against the execution policy
    Check { file: PathBuf },

    /// Render, verify, then server-side apply the CronJob
    Apply {
        #[arg(long)]
        tag: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum ScheduleCommands {
    /// Print upcoming run times in UTC
    Next {
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}
