use clap::Parser;
use harvest_runner::{BrowserSessionFactory, Config, Engine, Params, RunOutcome};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "rera-harvest")]
#[command(about = "Resumable extraction of paginated records through a live browser")]
#[command(version)]
struct Cli {
    /// Config file to run
    config: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// First page to extract (1-based)
    #[arg(long, conflicts_with = "start_position")]
    start_page: Option<u64>,

    /// First record to extract (0-based position)
    #[arg(long)]
    start_position: Option<u64>,

    /// Number of pages to extract
    #[arg(long, conflicts_with = "records")]
    pages: Option<u64>,

    /// Number of records to extract
    #[arg(long)]
    records: Option<u64>,

    /// Output CSV file (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Checkpoint file (overrides config)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Page-size target (widening stops at this size)
    #[arg(long)]
    page_size: Option<u32>,

    /// Failures tolerated per record before aborting
    #[arg(long)]
    retry_budget: Option<u32>,

    /// Ceiling for each readiness wait, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if self.headless {
            config.browser.headless = true;
        }
        if let Some(size) = self.page_size {
            let list = &mut config.list;
            if size <= list.page_size {
                list.widen = None;
                list.page_size = size;
            } else if let Some(ref mut widen) = list.widen {
                widen.steps.retain(|&step| step < size);
                widen.steps.push(size);
            } else {
                list.page_size = size;
            }
        }
        let run = &mut config.run;
        if self.start_page.is_some() {
            run.start_page = self.start_page;
            run.start_position = None;
        }
        if self.start_position.is_some() {
            run.start_position = self.start_position;
            run.start_page = None;
        }
        if self.pages.is_some() {
            run.pages = self.pages;
            run.records = None;
        }
        if self.records.is_some() {
            run.records = self.records;
            run.pages = None;
        }
        if let Some(budget) = self.retry_budget {
            run.retry_budget = budget;
        }
        if let Some(ms) = self.timeout_ms {
            run.wait_timeout_ms = ms;
        }
        if let Some(ref output) = self.output {
            config.output.path = output.clone();
        }
        if let Some(ref checkpoint) = self.checkpoint {
            config.output.checkpoint = Some(checkpoint.clone());
        }
    }
}

#[tokio::main]
async fn main() -> harvest_runner::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let params = Params::from_args(&cli.params)?;
    let mut config = Config::load_with_params(&cli.config, &params)?;
    cli.apply(&mut config);
    config.validate()?;

    let plan = config.list.target_page_size();
    let start = config.run.start_position(plan);

    if cli.check {
        println!("Config valid: {}", config.name);
        println!("  Target: {}", config.target.url);
        println!("  Page size: {}", plan);
        match config.run.end_position(start, plan) {
            Some(end) => println!("  Range: {}..{}", start, end),
            None => println!("  Range: {}.. (to the end of the list)", start),
        }
        println!("  Output: {}", config.output.path.display());
        println!("  Checkpoint: {}", config.output.checkpoint_path().display());
        println!("  Retry budget: {}", config.run.retry_budget);
        if !config.params.is_empty() {
            println!("  Parameters: {}", config.params.len());
            for (name, def) in &config.params {
                let req = if def.required { " (required)" } else { "" };
                let desc = def.description.as_deref().unwrap_or("");
                println!("    - {}{}: {}", name, req, desc);
            }
        }
        return Ok(());
    }

    println!("Running: {}", config.name);

    let factory = BrowserSessionFactory::new(config.browser.clone());
    let mut engine = Engine::new(config, factory)?;
    let report = engine.run().await?;

    // Print result
    println!();
    match report.outcome {
        RunOutcome::Aborted(ref reason) => {
            println!("✗ Aborted");
            println!("  Reason: {}", reason);
        }
        ref outcome => println!("✓ {}", outcome),
    }
    println!("  Records: {}", report.emitted);
    if report.skipped_duplicates > 0 {
        println!("  Already written: {}", report.skipped_duplicates);
    }
    println!(
        "  Positions: {}..{}",
        report.start_position, report.checkpoint
    );
    println!("  Page transitions: {}", report.page_transitions);
    println!("  Duration: {}ms", report.duration_ms);
    if report.retries > 0 {
        println!("  Retries: {}", report.retries);
    }
    if report.restarts > 0 {
        println!("  Session restarts: {}", report.restarts);
    }

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
