use clap::{Arg, Command};
use log::LevelFilter;
use stackscout::allocation::AllocationEngine;
use stackscout::config::Config;
use stackscout::fetch::HttpFetcher;
use stackscout::ledger::{MemoryLedger, SqliteLedger};
use stackscout::pipeline::{LogOnlySender, Pipeline, StaticDiscovery};
use std::path::Path;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("stackscout")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Technology fingerprinting and outreach allocation pipeline")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("stackscout.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate configuration, signature catalog and rosters")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("scan")
                .long("scan")
                .value_name("DOMAIN")
                .help("Scan a single domain and print the result as JSON (no ledger writes)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("domains-file")
                .long("domains-file")
                .value_name("FILE")
                .help("File with one domain per line to feed the pipeline run"),
        )
        .arg(
            Arg::new("category")
                .long("category")
                .value_name("CATEGORY")
                .help("Override the rotated category for this run"),
        )
        .arg(
            Arg::new("skip-outreach")
                .long("skip-outreach")
                .help("Run the scan phase only")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show ledger statistics and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        match Config::default().save(Path::new(path)) {
            Ok(()) => println!("Default configuration written to {path}"),
            Err(e) => {
                eprintln!("Error writing configuration: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            eprintln!("Run with --generate-config {config_path} to create a starting point.");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid.");
                println!("  Personas: {}", config.personas.len());
                println!("  Categories: {}", config.categories.len());
                println!("  Per-inbox daily cap: {}", config.per_inbox_daily_cap);
                println!("  Global daily limit: {}", config.daily_send_limit);
            }
            Err(e) => {
                eprintln!("Configuration error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("stats") {
        match SqliteLedger::open(&config.ledger_path).and_then(|l| l.stats()) {
            Ok(stats) => {
                println!("Domains seen:  {}", stats.domains_seen);
                println!("Scans:         {}", stats.scans);
                println!("Assignments:   {}", stats.assignments);
                println!("Sends today:   {}", stats.sends_today);
            }
            Err(e) => {
                eprintln!("Error reading ledger: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(domain) = matches.get_one::<String>("scan") {
        scan_single(&config, domain).await;
        return;
    }

    let domains_file = match matches.get_one::<String>("domains-file") {
        Some(path) => path,
        None => {
            eprintln!(
                "No discovery source: provide --domains-file FILE (or --scan DOMAIN for a one-off)."
            );
            process::exit(1);
        }
    };

    let category_override = matches.get_one::<String>("category").map(|s| s.as_str());
    let skip_outreach = matches.get_flag("skip-outreach");
    if let Err(e) = run_pipeline(config, domains_file, category_override, skip_outreach).await {
        eprintln!("Run failed: {e}");
        process::exit(1);
    }
}

/// One-off scan against an in-memory ledger so ad hoc lookups never consume
/// dedup state.
async fn scan_single(config: &Config, domain: &str) {
    let fetcher = match HttpFetcher::new(config.fetch_timeout_seconds) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error building HTTP client: {e}");
            process::exit(1);
        }
    };
    let pipeline = match Pipeline::new(config.clone(), fetcher, MemoryLedger::new()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error initializing pipeline: {e}");
            process::exit(1);
        }
    };
    match pipeline.scan_domain(domain, "adhoc").await {
        Ok(Some(lead)) => {
            println!("{}", serde_json::to_string_pretty(&lead).unwrap_or_default());
        }
        Ok(None) => println!("Nothing to scan for '{domain}'."),
        Err(e) => {
            eprintln!("Scan failed: {e}");
            process::exit(1);
        }
    }
}

async fn run_pipeline(
    config: Config,
    domains_file: &str,
    category_override: Option<&str>,
    skip_outreach: bool,
) -> anyhow::Result<()> {
    config.validate()?;

    let domains: Vec<String> = std::fs::read_to_string(domains_file)
        .map_err(|e| anyhow::anyhow!("Failed to read {domains_file}: {e}"))?
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    log::info!("Loaded {} domains from {domains_file}", domains.len());

    let fetcher = HttpFetcher::new(config.fetch_timeout_seconds)?;
    let ledger = SqliteLedger::open(&config.ledger_path)?;
    let pipeline = Pipeline::new(config, fetcher, ledger)?;

    let discovery = StaticDiscovery { domains };
    let (mut leads, summary) = pipeline.run_scan_phase(&discovery, category_override).await?;

    println!("==================================================");
    println!("Scan phase complete");
    println!("  Category:          {}", summary.category);
    println!("  Domains discovered: {}", summary.domains_discovered);
    println!("  New domains:        {}", summary.domains_new);
    println!("  Already seen:       {}", summary.domains_skipped_seen);
    println!("  Leads with tech:    {}", summary.leads_with_tech);
    println!("  Emails found:       {}", summary.emails_found);
    println!("  Scan errors:        {}", summary.scan_errors);
    println!("==================================================");

    if skip_outreach {
        return Ok(());
    }

    let catalog = pipeline.config().signature_catalog()?;
    let mut engine = AllocationEngine::new(
        pipeline.config().variant_catalog(&catalog),
        pipeline.config().personas.clone(),
        pipeline.config().company.clone(),
        pipeline.config().per_inbox_daily_cap,
    )?;

    // The binary ships with the print-only transport; wire a real
    // SendTransport through the library API to deliver mail.
    let sender = LogOnlySender;
    let stats = pipeline
        .run_outreach_phase(&mut leads, &mut engine, &sender)
        .await?;

    println!("==================================================");
    println!("Outreach phase complete");
    println!("  Attempted: {}", stats.attempted);
    println!("  Sent:      {}", stats.sent);
    println!("  Deferred:  {}", stats.deferred);
    println!("  Failed:    {}", stats.failed);
    println!("  Skipped:   {}", stats.skipped);
    println!("==================================================");

    Ok(())
}
