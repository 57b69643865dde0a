use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use moin2md_core::config::{ConfigOverrides, RunConfig, load_run_config};
use moin2md_core::crawler::{CrawlReport, DeferredMoinClient, crawl};
use moin2md_core::page::{TranslateReport, translate_tree};

#[derive(Debug, Parser)]
#[command(
    name = "moin2md",
    version,
    about = "Migrate a MoinMoin wiki to a Markdown page tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Migration root directory")]
    root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Config file (moin2md.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "Wiki base URL")]
    url: Option<String>,
    #[arg(long, global = true, value_name = "NAME", help = "Wiki path segment on the server")]
    wiki: Option<String>,
    #[arg(long, global = true, value_name = "VALUE", help = "MoinMoin session cookie value")]
    session_cookie: Option<String>,
    #[arg(long, global = true, value_name = "NAME")]
    session_cookie_name: Option<String>,
    #[arg(long, global = true, help = "Print the full report as JSON")]
    json: bool,
    #[arg(long, global = true, help = "Print resolved configuration before running")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Download every wiki page as raw markup")]
    Crawl,
    #[command(about = "Rewrite the downloaded tree to Markdown in place")]
    Translate,
    #[command(about = "Crawl, then translate")]
    Migrate,
}

fn overrides_from_cli(cli: &Cli) -> ConfigOverrides {
    ConfigOverrides {
        config_path: cli.config.clone(),
        root_dir: cli.root.clone(),
        wiki_url: cli.url.clone(),
        wiki_name: cli.wiki.clone(),
        session_cookie_value: cli.session_cookie.clone(),
        session_cookie_name: cli.session_cookie_name.clone(),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = &cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    let config = load_run_config(&overrides_from_cli(&cli))?;
    if cli.diagnostics {
        print_diagnostics(&config);
    }

    match command {
        Commands::Crawl => run_crawl(&config, cli.json),
        Commands::Translate => run_translate(&config, cli.json),
        Commands::Migrate => {
            run_crawl(&config, cli.json)?;
            run_translate(&config, cli.json)
        }
    }
}

fn print_diagnostics(config: &RunConfig) {
    println!("[diagnostics]");
    println!("root_dir: {}", config.root_dir.display());
    println!("wiki_url: {}", config.wiki_url);
    println!("wiki_name: {}", config.wiki_name);
    println!("index_page: {}", config.index_page);
    println!("session_cookie_name: {}", config.session_cookie_name);
    println!(
        "session_cookie_set: {}",
        !config.session_cookie_value.is_empty()
    );
    println!("page_interval_ms: {}", config.page_interval_ms);
    println!("attachment_interval_ms: {}", config.attachment_interval_ms);
    println!("failure_backoff_ms: {}", config.failure_backoff_ms);
    println!("timeout_ms: {}", config.timeout_ms);
    println!("max_retries: {}", config.max_retries);
    println!();
}

fn run_crawl(config: &RunConfig, json: bool) -> Result<()> {
    let report = crawl(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_crawl_report(&report);
    Ok(())
}

fn print_crawl_report(report: &CrawlReport) {
    println!("crawl finished");
    println!("pages_listed: {}", report.pages_listed);
    println!("pages_written: {}", report.pages_written);
    println!("pages_skipped: {}", report.pages_skipped);
    println!("requests_sent: {}", report.requests_sent);
    print_warnings(&report.warnings);
}

fn run_translate(config: &RunConfig, json: bool) -> Result<()> {
    let mut fetcher = DeferredMoinClient::new(config);
    let report = translate_tree(config, &mut fetcher)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_translate_report(&report);
    Ok(())
}

fn print_translate_report(report: &TranslateReport) {
    println!("translate finished");
    println!("pages_translated: {}", report.pages_translated);
    println!("attachments_fetched: {}", report.attachments_fetched);
    print_warnings(&report.warnings);
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("warnings:");
    for warning in warnings {
        println!("  - {warning}");
    }
}
