use sitemapper::commands::command_argument_builder;
use sitemapper::handlers::*;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional; real environment variables win
    dotenvy::dotenv().ok();

    let matches = command_argument_builder().get_matches();
    init_tracing(matches.get_flag("verbose"));

    let result = match matches.subcommand() {
        Some(("serve", args)) => handle_serve(args).await,
        Some(("work", args)) => handle_work(args).await,
        Some(("standalone", args)) => handle_standalone(args).await,
        Some(("crawl", args)) => handle_crawl(args).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
