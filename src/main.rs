//! vstup-crawl CLI - admission data crawler command line interface.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use vstup_crawl::{
    proxy::ProxyEndpoint, Crawler, CrawlerConfig, CrawlStore, ProxyPool, RetryClient,
    TracingObserver,
};

/// vstup-crawl - Ukrainian university admission data crawler
#[derive(Parser)]
#[command(name = "vstup-crawl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the four-stage crawl
    Run(RunArgs),

    /// Validate a proxy list file without touching the network
    CheckProxies(CheckProxiesArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Proxy list file, one host:port:username:password per line
    #[arg(short, long, default_value = "proxies.txt")]
    proxies: String,

    /// Base URL of the admission site
    #[arg(long)]
    base_url: Option<String>,

    /// Admissions API endpoint
    #[arg(long)]
    api_url: Option<String>,

    /// Restrict the crawl to one city by exact name
    #[arg(long, conflicts_with = "all_cities")]
    city: Option<String>,

    /// Crawl every discovered city instead of the default one
    #[arg(long)]
    all_cities: bool,
}

#[derive(Parser)]
struct CheckProxiesArgs {
    /// Proxy list file to validate
    proxies: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run_crawl(args).await,
        Commands::CheckProxies(args) => check_proxies(args),
    }
}

async fn run_crawl(args: RunArgs) -> Result<()> {
    let mut config = CrawlerConfig::new();
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(api_url) = args.api_url {
        config = config.with_api_url(api_url);
    }
    if let Some(city) = args.city {
        config = config.with_city_filter(city);
    }
    if args.all_cities {
        config = config.all_cities();
    }

    let pool = {
        let mut rng = rand::thread_rng();
        Arc::new(ProxyPool::from_file(&args.proxies, &mut rng)?)
    };
    eprintln!("Loaded {} proxies from {}", pool.len(), args.proxies);

    let observer = Arc::new(TracingObserver);
    let gateway = Arc::new(RetryClient::new(pool, observer.clone()));
    let store = CrawlStore::in_memory();

    let cancel = CancellationToken::new();
    let signal_guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received, finishing the current unit of work...");
            signal_guard.cancel();
        }
    });

    let mut crawler = Crawler::new(config, gateway, store.clone()).with_observer(observer);
    let outcome = crawler.run(&cancel).await;

    let progress = crawler.progress();
    println!("\nStage: {}", progress.current_stage);
    println!("Overall: {:.1}%", progress.overall_percentage);
    println!("  Cities:       {}", store.cities.count().await?);
    println!("  Universities: {}", store.universities.count().await?);
    println!("  Offers:       {}", store.offers.count().await?);
    println!("  Applications: {}", store.applications.count().await?);
    println!("  Persons:      {}", store.persons.count().await?);

    outcome?;
    Ok(())
}

fn check_proxies(args: CheckProxiesArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.proxies)?;

    let mut valid = 0usize;
    let mut invalid = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match ProxyEndpoint::parse(line) {
            Some(endpoint) => {
                println!("  ok   {}", endpoint.label());
                valid += 1;
            }
            None => invalid.push(number + 1),
        }
    }

    println!("\n{} valid, {} invalid", valid, invalid.len());
    for number in &invalid {
        eprintln!("  line {}: expected host:port:username:password", number);
    }

    if valid == 0 {
        anyhow::bail!("No usable proxies in {}", args.proxies);
    }
    Ok(())
}
