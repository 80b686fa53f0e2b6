mod output;

use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use modexp_analysis::call::{RecordLimits, DEFAULT_MAX_INPUT_BYTES};
use modexp_analysis::gas::{
    calculate, eip7883_cost, legacy_cost, GasInput, GasSchedule, REFERENCE_VECTORS,
};
use modexp_analysis::projection::{project_entities, PricingAssumptions, ENTITY_PROFILES};
use modexp_analysis::{ImpactAggregator, ImpactReport};
use modexp_data::loader::{
    discover_call_files, parse_call_parquet, parse_tx_metadata_parquet, CallFile, TxIndex,
};
use modexp_data::store::Store;
use modexp_data::types::{CallRecord, RawCall, RunRecord, RunTotals};
use output::{
    fmt_opt, fmt_percentiles, format_eth, lower_hex, render_projection_report, summary_json,
    truncate_hash, write_analysis_outputs, RunInfo,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

const QUICK_FILE_LIMIT: usize = 100;
const DEFAULT_COMPARE_SIZES: [u64; 7] = [32, 64, 128, 256, 512, 1024, 2048];

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
}

#[derive(Parser, Debug)]
#[command(name = "modexp-impact")]
#[command(about = "ModExp precompile repricing impact analysis (EIP-2565 vs EIP-7883)")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/modexp.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load per-block parquet files, price every call under both schedules and report.
    Analyze(AnalyzeArgs),
    /// Rebuild the report for a stored run.
    Report(ReportArgs),
    /// Check the calculator against the fixed reference vectors.
    Verify,
    /// Compare both schedules across input sizes.
    Compare(CompareArgs),
    /// Project monthly costs for representative caller profiles.
    Project(ProjectArgs),
    /// Show the latest stored run.
    Status,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory of `<block_number>.parquet` call files.
    #[arg(long)]
    data_dir: PathBuf,

    /// Transaction metadata parquet used to fill sender, contract and gas price.
    #[arg(long)]
    tx_data: Option<PathBuf>,

    /// Process at most this many files (most recent blocks first).
    #[arg(long)]
    limit: Option<usize>,

    /// Shortcut for `--limit 100`.
    #[arg(long)]
    quick: bool,

    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    #[arg(long, default_value = "analysis_output")]
    output_dir: PathBuf,

    /// Output format: table (default), json or csv.
    #[arg(long, default_value = "table")]
    output: String,

    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Largest accepted declared input length. Defaults to
    /// `MODEXP_MAX_INPUT_BYTES` or 65536.
    #[arg(long)]
    max_input_bytes: Option<u64>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Run to report on; defaults to the latest.
    #[arg(long)]
    run_id: Option<i64>,

    /// Write the markdown report to this file.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 20)]
    top: usize,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Base and modulus sizes in bytes.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_COMPARE_SIZES)]
    sizes: Vec<u64>,
}

#[derive(Args, Debug)]
struct ProjectArgs {
    #[arg(long, default_value_t = 3500.0)]
    eth_price_usd: f64,

    #[arg(long, default_value_t = 25.0)]
    gas_price_gwei: f64,

    #[arg(long, default_value_t = 30)]
    top: usize,

    /// Write the markdown projection report to this file.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Analyze(args) => handle_analyze(&ctx, args).await,
        Commands::Report(args) => handle_report(&ctx, args).await,
        Commands::Verify => handle_verify().await,
        Commands::Compare(args) => handle_compare(args).await,
        Commands::Project(args) => handle_project(args).await,
        Commands::Status => handle_status(&ctx).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Aggregated contents of one parquet file.
struct FileShard {
    aggregator: ImpactAggregator,
    records: Vec<CallRecord>,
}

fn process_file(file: &CallFile, tx_index: &TxIndex, limits: RecordLimits) -> Result<FileShard> {
    let rows = parse_call_parquet(file)?;
    let mut aggregator = ImpactAggregator::new(limits);
    let mut records = Vec::with_capacity(rows.len());

    for mut row in rows {
        tx_index.enrich(&mut row);
        if let Some(costed) = aggregator.observe(&row) {
            records.push(costed.to_record());
        }
    }

    Ok(FileShard {
        aggregator,
        records,
    })
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        output::ensure_dir(parent)?;
    }
    Ok(())
}

async fn handle_analyze(ctx: &AppContext, args: AnalyzeArgs) -> Result<()> {
    if args.batch_size == 0 {
        return Err(eyre!("--batch-size must be at least 1"));
    }

    let limits = match args.max_input_bytes {
        Some(0) => return Err(eyre!("--max-input-bytes must be positive")),
        Some(max_input_bytes) => RecordLimits { max_input_bytes },
        None => RecordLimits::from_env(),
    };

    let mut files = discover_call_files(&args.data_dir)?;
    let limit = if args.quick {
        Some(QUICK_FILE_LIMIT)
    } else {
        args.limit
    };
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    if files.is_empty() {
        return Err(eyre!(
            "no parquet call files found in {}",
            args.data_dir.display()
        ));
    }

    let tx_index = match &args.tx_data {
        Some(path) => {
            let rows = parse_tx_metadata_parquet(path)
                .wrap_err_with(|| format!("failed to load transaction data {}", path.display()))?;
            TxIndex::from_rows(rows)
        }
        None => TxIndex::default(),
    };
    let tx_index = Arc::new(tx_index);

    ensure_parent_dir(Path::new(&ctx.db_path))?;
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    let started_at = chrono::Utc::now();
    let data_dir = args.data_dir.display().to_string();
    let run_id = store
        .begin_run(started_at, &data_dir)
        .wrap_err("failed to register analysis run")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    info!(
        run_id,
        files = files.len(),
        batch_size = args.batch_size,
        max_input_bytes = limits.max_input_bytes,
        tx_index = tx_index.len(),
        "starting analysis"
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
        )
        .wrap_err("failed to create progress style")?,
    );

    let mut aggregator = ImpactAggregator::new(limits);
    let mut files_loaded = 0u64;
    let mut files_failed = 0u64;

    for batch in files.chunks(args.batch_size) {
        if interrupted.load(Ordering::SeqCst) {
            warn!(
                processed = files_loaded + files_failed,
                remaining = files.len() as u64 - files_loaded - files_failed,
                "interrupted; reporting partial results"
            );
            aggregator.mark_truncated();
            break;
        }

        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|file| {
                let tx_index = Arc::clone(&tx_index);
                tokio::task::spawn_blocking(move || process_file(&file, &tx_index, limits))
            })
            .collect();

        let mut batch_records = Vec::new();
        for (file, handle) in batch.iter().zip(handles) {
            match handle.await {
                Ok(Ok(shard)) => {
                    files_loaded += 1;
                    batch_records.extend(shard.records);
                    aggregator.merge(shard.aggregator);
                }
                Ok(Err(err)) => {
                    files_failed += 1;
                    warn!(
                        path = %file.path.display(),
                        error = %err,
                        "skipping unreadable call file"
                    );
                }
                Err(err) => {
                    files_failed += 1;
                    warn!(path = %file.path.display(), error = %err, "call file task failed");
                }
            }
            pb.inc(1);
        }

        store
            .insert_call_records(run_id, &batch_records)
            .wrap_err("failed to persist analyzed calls")?;
        pb.set_message(format!("{} calls", aggregator.total_calls()));
    }

    // a signal during the last batch still leaves the run complete
    if !aggregator.is_truncated() && files_loaded + files_failed < files.len() as u64 {
        aggregator.mark_truncated();
    }
    pb.finish_with_message(format!("{} calls", aggregator.total_calls()));

    store
        .insert_invalid_counts(run_id, aggregator.invalid_by_reason())
        .wrap_err("failed to persist invalid record counts")?;
    let totals = RunTotals {
        files_loaded,
        files_failed,
        total_calls: aggregator.total_calls(),
        invalid_records: aggregator.invalid_records(),
        truncated: aggregator.is_truncated(),
    };
    store
        .finish_run(run_id, &totals)
        .wrap_err("failed to finalize analysis run")?;

    let report = aggregator.finalize();
    let run = RunInfo {
        run_id,
        started_at: started_at.to_rfc3339(),
        data_dir,
        files_loaded,
        files_failed,
    };

    let written = write_analysis_outputs(&args.output_dir, &report, Some(&run), args.top)?;
    print_report(&report, Some(&run), &args.output, args.top)?;

    info!(
        run_id,
        files_loaded,
        files_failed,
        total_calls = report.summary.total_calls,
        invalid_records = report.summary.invalid_records,
        truncated = report.summary.truncated,
        outputs = written.len(),
        output_dir = %args.output_dir.display(),
        "analyze command completed"
    );

    Ok(())
}

/// Rebuild the report from stored calls. Stored rows already passed
/// validation, so no size limit is applied again.
fn rebuild_report(store: &Store, run: &RunRecord) -> Result<ImpactReport> {
    let records = store
        .load_call_records(run.id)
        .wrap_err("failed to load stored calls")?;
    let invalid_counts = store
        .load_invalid_counts(run.id)
        .wrap_err("failed to load invalid record counts")?;

    let mut aggregator = ImpactAggregator::new(RecordLimits {
        max_input_bytes: u64::MAX,
    });
    for record in &records {
        if aggregator.observe(&RawCall::from(record)).is_none() {
            warn!(tx_hash = %record.tx_hash, "stored call no longer validates");
        }
    }
    for (reason, count) in &invalid_counts {
        aggregator.record_invalid_count(reason, *count);
    }
    if run.truncated {
        aggregator.mark_truncated();
    }

    Ok(aggregator.finalize())
}

async fn handle_report(ctx: &AppContext, args: ReportArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let run = match args.run_id {
        Some(run_id) => store
            .get_run(run_id)
            .wrap_err("failed to query analysis run")?
            .ok_or_else(|| eyre!("run {run_id} not found in database"))?,
        None => store
            .latest_run()
            .wrap_err("failed to query analysis runs")?
            .ok_or_else(|| eyre!("no analysis runs in database; run `analyze` first"))?,
    };

    let report = rebuild_report(&store, &run)?;
    let info = RunInfo {
        run_id: run.id,
        started_at: run.started_at.clone(),
        data_dir: run.data_dir.clone(),
        files_loaded: run.files_loaded,
        files_failed: run.files_failed,
    };

    print_report(&report, Some(&info), "table", args.top)?;

    if let Some(path) = &args.output {
        ensure_parent_dir(path)?;
        let markdown = output::render_markdown_report(&report, Some(&info), args.top);
        std::fs::write(path, markdown)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote markdown report");
    }

    info!(
        run_id = run.id,
        total_calls = report.summary.total_calls,
        "report command completed"
    );
    Ok(())
}

async fn handle_verify() -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "B/E/M",
        "Exponent",
        "EIP-2565",
        "Expected",
        "EIP-7883",
        "Expected",
        "Result",
    ]);

    let mut failures = 0usize;
    for vector in REFERENCE_VECTORS {
        let input = GasInput::from_hex(
            vector.base_len,
            vector.exp_len,
            vector.mod_len,
            vector.exponent,
        )
        .wrap_err_with(|| format!("invalid reference exponent {}", vector.exponent))?;
        let legacy = legacy_cost(&input).wrap_err("legacy cost overflowed")?;
        let new = eip7883_cost(&input).wrap_err("EIP-7883 cost overflowed")?;
        let ok = legacy == vector.legacy && new == vector.eip7883;
        if !ok {
            failures += 1;
        }

        table.add_row(vec![
            format!("{}/{}/{}", vector.base_len, vector.exp_len, vector.mod_len),
            vector.exponent.to_string(),
            legacy.to_string(),
            vector.legacy.to_string(),
            new.to_string(),
            vector.eip7883.to_string(),
            if ok { "PASS" } else { "FAIL" }.to_string(),
        ]);
    }

    println!("\n{}\n", table);

    if failures > 0 {
        return Err(eyre!(
            "{failures} of {} reference vectors failed",
            REFERENCE_VECTORS.len()
        ));
    }

    info!(vectors = REFERENCE_VECTORS.len(), "verify command completed");
    Ok(())
}

async fn handle_compare(args: CompareArgs) -> Result<()> {
    const EXPONENT: &[u8] = &[0x01, 0x00, 0x01];

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Size", "EIP-2565", "EIP-7883", "Increase", "Ratio"]);

    for &size in &args.sizes {
        let input = GasInput::new(size, 32, size, EXPONENT);
        let legacy = calculate(GasSchedule::Eip2565, &input)
            .wrap_err_with(|| format!("cost overflowed at {size}"))?;
        let new = calculate(GasSchedule::Eip7883, &input)
            .wrap_err_with(|| format!("cost overflowed at {size}"))?;

        table.add_row(vec![
            format!("{size} bytes"),
            legacy.to_string(),
            new.to_string(),
            (i128::from(new) - i128::from(legacy)).to_string(),
            format!("{:.2}x", new as f64 / legacy as f64),
        ]);
    }

    println!("\nB = M = size, E = 32, exponent 0x10001\n{}\n", table);
    info!(sizes = args.sizes.len(), "compare command completed");
    Ok(())
}

async fn handle_project(args: ProjectArgs) -> Result<()> {
    let pricing = PricingAssumptions {
        eth_price_usd: args.eth_price_usd,
        gas_price_gwei: args.gas_price_gwei,
    };
    let report = project_entities(&ENTITY_PROFILES, &pricing).wrap_err("projection failed")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Rank",
        "Entity",
        "Daily Calls",
        "Monthly $ Increase",
        "Cost Ratio",
        "Sizes",
    ]);
    for (rank, entity) in report.entities.iter().take(args.top).enumerate() {
        table.add_row(vec![
            (rank + 1).to_string(),
            entity.entity_id.clone(),
            entity.daily_calls.to_string(),
            format!("${:.2}", entity.costs.monthly_usd_increase),
            format!("{:.2}x", entity.costs.cost_ratio),
            format!(
                "B{}/E{}/M{}",
                entity.input_size, entity.exponent_size, entity.input_size
            ),
        ]);
    }

    let mut by_type = Table::new();
    by_type.load_preset(UTF8_BORDERS_ONLY);
    by_type.set_header(vec![
        "Entity Type",
        "Count",
        "Daily Calls",
        "Monthly $ Current",
        "Monthly $ EIP-7883",
        "Monthly $ Increase",
        "% Increase",
    ]);
    for summary in &report.by_type {
        by_type.add_row(vec![
            summary.entity_type.to_string(),
            summary.entity_count.to_string(),
            summary.total_daily_calls.to_string(),
            format!("${:.2}", summary.total_monthly_current),
            format!("${:.2}", summary.total_monthly_new),
            format!("${:.2}", summary.total_monthly_increase),
            format!("{:.1}%", summary.pct_increase),
        ]);
    }

    println!(
        "\nAssumptions: ETH=${:.2}, gas={} gwei\n{}\n\n{}\n",
        pricing.eth_price_usd, pricing.gas_price_gwei, table, by_type
    );

    if let Some(path) = &args.output {
        ensure_parent_dir(path)?;
        std::fs::write(path, render_projection_report(&report, args.top))
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote projection report");
    }

    info!(
        entities = report.entities.len(),
        total_monthly_increase = report.total_monthly_increase,
        "project command completed"
    );
    Ok(())
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let db_size_str = if ctx.db_path == ":memory:" {
        "N/A (in-memory)".to_string()
    } else {
        match std::fs::metadata(&ctx.db_path) {
            Ok(metadata) => format!("{} MB", metadata.len() / 1_000_000),
            Err(_) => "N/A (file not found)".to_string(),
        }
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);
    table.add_row(vec!["DB Size", &db_size_str]);
    table.add_row(vec![
        "Default Max Input Bytes",
        &RecordLimits::from_env().max_input_bytes.to_string(),
    ]);

    let latest = store.latest_run().wrap_err("failed to query analysis runs")?;
    match &latest {
        Some(run) => {
            let stored = store
                .count_calls(run.id)
                .wrap_err("failed to count stored calls")?;
            table.add_row(vec!["Latest Run", &run.id.to_string()]);
            table.add_row(vec!["Started", &run.started_at]);
            table.add_row(vec!["Data Dir", &run.data_dir]);
            table.add_row(vec![
                "Files Loaded / Failed",
                &format!("{} / {}", run.files_loaded, run.files_failed),
            ]);
            table.add_row(vec!["Calls", &run.total_calls.to_string()]);
            table.add_row(vec!["Stored Calls", &stored.to_string()]);
            table.add_row(vec!["Invalid Records", &run.invalid_records.to_string()]);
            table.add_row(vec![
                "State",
                match (run.finished, run.truncated) {
                    (false, _) => "unfinished",
                    (true, true) => "finished (truncated)",
                    (true, false) => "finished",
                },
            ]);
        }
        None => {
            table.add_row(vec!["Latest Run", "No runs in database"]);
        }
    }

    println!("\n{}\n", table);

    info!(
        latest_run = latest.as_ref().map(|run| run.id),
        default_max_input_bytes = DEFAULT_MAX_INPUT_BYTES,
        db_path = %ctx.db_path,
        "status command completed"
    );
    Ok(())
}

fn print_report(
    report: &ImpactReport,
    run: Option<&RunInfo>,
    format: &str,
    top: usize,
) -> Result<()> {
    match format.to_lowercase().as_str() {
        "table" => print_report_table(report, top),
        "json" => {
            println!("{}", summary_json(report, run, top)?);
            Ok(())
        }
        "csv" => {
            print_report_csv(report);
            Ok(())
        }
        _ => Err(eyre!(
            "unknown output format '{}'; use 'table', 'json', or 'csv'",
            format
        )),
    }
}

fn print_report_table(report: &ImpactReport, top: usize) -> Result<()> {
    let s = &report.summary;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Total Calls".to_string(), s.total_calls.to_string()]);
    table.add_row(vec![
        "Unique Transactions".to_string(),
        s.unique_transactions.to_string(),
    ]);
    table.add_row(vec![
        "Calls Affected".to_string(),
        format!("{} ({:.1}%)", s.calls_with_increase, s.pct_calls_affected),
    ]);
    table.add_row(vec![
        "Calls With Decrease".to_string(),
        s.calls_with_decrease.to_string(),
    ]);
    table.add_row(vec![
        "Total Gas Increase".to_string(),
        format!(
            "{} (floored {})",
            s.total_cost_increase, s.total_cost_increase_floored
        ),
    ]);
    table.add_row(vec![
        "Avg / Median Increase".to_string(),
        format!(
            "{} / {}",
            fmt_opt(s.avg_increase, 1),
            fmt_opt(s.median_increase, 1)
        ),
    ]);
    table.add_row(vec![
        "Increase Percentiles".to_string(),
        fmt_percentiles(&s.increase_percentiles),
    ]);
    table.add_row(vec![
        "Ratio Percentiles".to_string(),
        fmt_percentiles(&s.ratio_percentiles),
    ]);
    table.add_row(vec![
        "Sizes > 32 Bytes (B/E/M)".to_string(),
        format!(
            "{} / {} / {}",
            s.calls_over_32_bytes.base,
            s.calls_over_32_bytes.exponent,
            s.calls_over_32_bytes.modulus
        ),
    ]);
    if let Some((lo, hi)) = s.block_range {
        table.add_row(vec!["Block Range".to_string(), format!("{lo} - {hi}")]);
    }
    table.add_row(vec![
        "Fee Increase".to_string(),
        format!("{} ({} priced calls)", format_eth(s.fee_increase_wei), s.priced_calls),
    ]);
    table.add_row(vec![
        "Invalid Records".to_string(),
        s.invalid_records.to_string(),
    ]);
    table.add_row(vec![
        "Legacy Mismatches".to_string(),
        s.legacy_mismatches.to_string(),
    ]);
    if s.truncated {
        table.add_row(vec!["Truncated".to_string(), "yes".to_string()]);
    }
    println!("\n{}\n", table);

    for (title, entities) in [("Senders", &report.senders), ("Contracts", &report.contracts)] {
        if entities.is_empty() {
            continue;
        }
        let mut entity_table = Table::new();
        entity_table.load_preset(UTF8_BORDERS_ONLY);
        entity_table.set_header(vec![
            "Rank",
            title,
            "Total Increase",
            "Avg Increase",
            "Calls",
            "Cost Ratio",
        ]);
        for (rank, entity) in entities.iter().take(top).enumerate() {
            entity_table.add_row(vec![
                (rank + 1).to_string(),
                truncate_hash(&lower_hex(&entity.address)),
                entity.total_increase.to_string(),
                format!("{:.1}", entity.avg_increase),
                entity.call_count.to_string(),
                format!("{}x", fmt_opt(entity.avg_cost_ratio, 2)),
            ]);
        }
        println!("Top impacted {}:\n{}\n", title.to_lowercase(), entity_table);
    }

    Ok(())
}

fn print_report_csv(report: &ImpactReport) {
    let s = &report.summary;
    println!("metric,value");
    println!("total_calls,{}", s.total_calls);
    println!("unique_transactions,{}", s.unique_transactions);
    println!("calls_with_increase,{}", s.calls_with_increase);
    println!("calls_with_decrease,{}", s.calls_with_decrease);
    println!("pct_calls_affected,{:.4}", s.pct_calls_affected);
    println!("total_current_cost,{}", s.total_current_cost);
    println!("total_new_cost,{}", s.total_new_cost);
    println!("total_cost_increase,{}", s.total_cost_increase);
    println!("total_cost_increase_floored,{}", s.total_cost_increase_floored);
    for point in &s.increase_percentiles {
        println!("increase_p{},{}", point.percentile, point.value);
    }
    for point in &s.ratio_percentiles {
        println!("ratio_p{},{}", point.percentile, point.value);
    }
    println!("calls_over_32_bytes_base,{}", s.calls_over_32_bytes.base);
    println!("calls_over_32_bytes_exponent,{}", s.calls_over_32_bytes.exponent);
    println!("calls_over_32_bytes_modulus,{}", s.calls_over_32_bytes.modulus);
    println!("invalid_records,{}", s.invalid_records);
    println!("legacy_mismatches,{}", s.legacy_mismatches);
    println!("fee_increase_wei,{}", s.fee_increase_wei);
    println!("truncated,{}", s.truncated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn rebuilt_report_matches_stored_run() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let run_id = store.begin_run(Utc::now(), "data").expect("begin run");

        let mut aggregator = ImpactAggregator::new(RecordLimits::default());
        let mut records = Vec::new();
        for i in 0..6u64 {
            let raw = RawCall {
                block_number: 500 + i,
                tx_hash: Some(format!("0x{:064x}", i / 2 + 1)),
                base_size: Some(if i % 2 == 0 { 32 } else { 512 }),
                exponent_size: Some(3),
                modulus_size: Some(64),
                exponent: Some("0x10001".to_string()),
                recorded_cost: (i == 0).then_some(250),
                from_address: Some(format!("0x{:040x}", i % 3 + 1)),
                to_address: Some(format!("0x{:040x}", 0xfe)),
                gas_price: None,
            };
            if let Some(costed) = aggregator.observe(&raw) {
                records.push(costed.to_record());
            }
        }
        aggregator.observe(&RawCall::default());

        store.insert_call_records(run_id, &records).expect("insert");
        store
            .insert_invalid_counts(run_id, aggregator.invalid_by_reason())
            .expect("insert invalid counts");
        store
            .finish_run(
                run_id,
                &RunTotals {
                    files_loaded: 1,
                    total_calls: aggregator.total_calls(),
                    invalid_records: aggregator.invalid_records(),
                    ..RunTotals::default()
                },
            )
            .expect("finish run");

        let run = store.get_run(run_id).expect("query").expect("run exists");
        let rebuilt = rebuild_report(&store, &run).expect("rebuild");
        assert_eq!(rebuilt, aggregator.finalize());
    }

    #[test]
    fn cli_parses_analyze_defaults() {
        let cli = Cli::try_parse_from(["modexp-impact", "analyze", "--data-dir", "data/modexp"])
            .expect("analyze args should parse");
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze command");
        };
        assert_eq!(args.batch_size, 1000);
        assert_eq!(args.top, 20);
        assert_eq!(args.output_dir, PathBuf::from("analysis_output"));
        assert!(args.max_input_bytes.is_none());
        assert_eq!(cli.db_path, "data/modexp.sqlite");
    }

    #[test]
    fn cli_parses_compare_sizes() {
        let cli = Cli::try_parse_from(["modexp-impact", "compare", "--sizes", "32,64"])
            .expect("compare args should parse");
        let Commands::Compare(args) = cli.command else {
            panic!("expected compare command");
        };
        assert_eq!(args.sizes, vec![32, 64]);

        let cli = Cli::try_parse_from(["modexp-impact", "compare"]).expect("defaults parse");
        let Commands::Compare(args) = cli.command else {
            panic!("expected compare command");
        };
        assert_eq!(args.sizes.len(), 7);
    }
}
