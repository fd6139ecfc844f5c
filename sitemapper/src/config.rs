use crate::commands::{DEFAULT_BIND, DEFAULT_NATS_URL};
use crate::worker::DEFAULT_JOBS;
use anyhow::Context;
use clap::ArgMatches;
use sitemapper_core::nats::DEFAULT_ACK_WAIT;
use sitemapper_scanner::Politeness;
use sitemapper_scanner::crawler::{Crawler, DEFAULT_MAX_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use std::time::Duration;

/// Settings for one subcommand. Options the subcommand does not take keep
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub nats_url: String,
    pub ack_wait_secs: u64,
    pub jobs: usize,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
    pub politeness: Politeness,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            nats_url: DEFAULT_NATS_URL.to_string(),
            ack_wait_secs: DEFAULT_ACK_WAIT.as_secs(),
            jobs: DEFAULT_JOBS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            politeness: Politeness::default(),
        }
    }
}

impl Config {
    pub fn from_matches(args: &ArgMatches) -> Self {
        let defaults = Self::default();
        let per_branch = args
            .try_get_one::<bool>("per-branch-delay")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false);

        Self {
            bind: option(args, "bind").unwrap_or(defaults.bind),
            nats_url: option(args, "nats-url").unwrap_or(defaults.nats_url),
            ack_wait_secs: option(args, "ack-wait")
                .unwrap_or(defaults.ack_wait_secs)
                .max(1),
            jobs: option(args, "jobs").unwrap_or(defaults.jobs).max(1),
            max_concurrency: option(args, "max-concurrency")
                .unwrap_or(defaults.max_concurrency)
                .max(1),
            timeout_secs: option(args, "timeout").unwrap_or(defaults.timeout_secs),
            politeness: if per_branch {
                Politeness::PerBranch
            } else {
                Politeness::Shared
            },
        }
    }

    /// How long a worker may hold a request before the broker redelivers it.
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn crawler(&self) -> anyhow::Result<Crawler> {
        let crawler = Crawler::with_timeout(self.timeout_secs)
            .context("Failed to build the HTTP client")?
            .with_max_concurrency(self.max_concurrency)
            .with_politeness(self.politeness);
        Ok(crawler)
    }
}

fn option<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command_argument_builder;

    fn config_for(argv: &[&str]) -> Config {
        let matches = command_argument_builder()
            .try_get_matches_from(argv)
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        Config::from_matches(args)
    }

    #[test]
    fn test_work_options() {
        let config = config_for(&[
            "sitemapper",
            "work",
            "--nats-url",
            "nats://broker:4222",
            "--ack-wait",
            "1800",
            "--jobs",
            "8",
            "--max-concurrency",
            "2",
            "--timeout",
            "30",
            "--per-branch-delay",
        ]);
        assert_eq!(config.nats_url, "nats://broker:4222");
        assert_eq!(config.ack_wait(), Duration::from_secs(1800));
        assert_eq!(config.jobs, 8);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.politeness, Politeness::PerBranch);
        assert_eq!(config.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_options_outside_subcommand_keep_defaults() {
        let config = config_for(&["sitemapper", "serve", "--bind", "127.0.0.1:9000"]);
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.jobs, DEFAULT_JOBS);
        assert_eq!(config.ack_wait(), DEFAULT_ACK_WAIT);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.politeness, Politeness::Shared);
    }

    #[test]
    fn test_zero_jobs_is_clamped() {
        let config = config_for(&["sitemapper", "standalone", "--jobs", "0"]);
        assert_eq!(config.jobs, 1);
    }
}
