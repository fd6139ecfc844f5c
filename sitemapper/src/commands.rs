use crate::CLAP_STYLING;
use clap::{Arg, arg, command};
use url::Url;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitemapper")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitemapper")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-v --"verbose" "Log at debug level")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("serve")
                .about(
                    "Run the crawl gateway and result router. Crawl requests are queued for \
                workers and results are pushed to websocket clients.",
                )
                .arg(bind_arg())
                .arg(nats_arg())
                .arg(ack_wait_arg()),
        )
        .subcommand(
            command!("work")
                .about("Run a crawl worker consuming queued requests")
                .arg(nats_arg())
                .arg(ack_wait_arg())
                .arg(jobs_arg())
                .args(crawler_args()),
        )
        .subcommand(
            command!("standalone")
                .about("Run the gateway, router and a worker in one process with an in-memory queue")
                .arg(bind_arg())
                .arg(jobs_arg())
                .args(crawler_args()),
        )
        .subcommand(
            command!("crawl")
                .about("Crawl one site and print its sitemap as JSON")
                .arg(
                    arg!(<URL>)
                        .required(true)
                        .help("The URL to start crawling from")
                        .value_parser(clap::value_parser!(Url)),
                )
                .args(crawler_args()),
        )
}

fn bind_arg() -> Arg {
    arg!(-b --"bind" <ADDR>)
        .required(false)
        .help("Address the HTTP server listens on")
        .env("SITEMAPPER_BIND")
        .default_value(DEFAULT_BIND)
}

fn nats_arg() -> Arg {
    arg!(--"nats-url" <URL>)
        .required(false)
        .help("NATS server carrying the job queue and the sitemap cache")
        .env("SITEMAPPER_NATS_URL")
        .default_value(DEFAULT_NATS_URL)
}

fn ack_wait_arg() -> Arg {
    arg!(--"ack-wait" <SECONDS>)
        .required(false)
        .help("Seconds a queued crawl may run before the broker redelivers it")
        .env("SITEMAPPER_ACK_WAIT")
        .value_parser(clap::value_parser!(u64))
        .default_value("600")
}

fn jobs_arg() -> Arg {
    arg!(-j --"jobs" <NUM_JOBS>)
        .required(false)
        .help("Number of crawl jobs a worker runs at once")
        .env("SITEMAPPER_JOBS")
        .value_parser(clap::value_parser!(usize))
        .default_value("4")
}

fn crawler_args() -> [Arg; 3] {
    [
        arg!(-c --"max-concurrency" <NUM_REQUESTS>)
            .required(false)
            .help("Maximum page fetches in flight per crawl job")
            .env("SITEMAPPER_MAX_CONCURRENCY")
            .value_parser(clap::value_parser!(usize))
            .default_value("16"),
        arg!(-t --"timeout" <SECONDS>)
            .required(false)
            .help("Request timeout in seconds")
            .env("SITEMAPPER_TIMEOUT")
            .value_parser(clap::value_parser!(u64))
            .default_value("10"),
        arg!(--"per-branch-delay")
            .required(false)
            .help("Apply the crawl-delay separately in every branch instead of across the whole job")
            .action(clap::ArgAction::SetTrue),
    ]
}
