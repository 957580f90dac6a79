use std::path::PathBuf;
use std::time::Instant;

use clap::{command, Arg, Command};

mod dump_tree;
mod listing_parsing;

fn cli() -> Command {
    command!()
        .arg(
            Arg::new("URL")
                .required(true)
                .help("The url of the repository directory to download"),
        )
        .arg(
            Arg::new("PATH")
                .required(false)
                .help("The directory to download to (defaults to the url's last segment)"),
        )
        .arg(
            Arg::new("TASKS")
                .short('t')
                .long("tasks")
                .default_value("64")
                .value_parser(clap::value_parser!(u16).range(1..))
                .help("Maximum number of concurrent downloads"),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let matches = cli().get_matches();
    let url = matches.get_one::<String>("URL").unwrap();
    let path = match matches.get_one::<String>("PATH") {
        Some(path) => path.clone(),
        None => listing_parsing::last_segment(url).to_string(),
    };
    let max_task_count = *matches.get_one::<u16>("TASKS").unwrap();

    let start = Instant::now();
    let crawler = dump_tree::Crawler::new(max_task_count);
    crawler.download_all(url, PathBuf::from(path)).await;
    println!("total time: {:.2} s", start.elapsed().as_secs_f64());

    Ok(())
}
