//! Output files and text rendering shared by the subcommands.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use color_eyre::eyre::{Context, Result};
use modexp_analysis::entity::{EntityImpact, PairImpact};
use modexp_analysis::projection::ProjectionReport;
use modexp_analysis::stats::PercentilePoint;
use modexp_analysis::ImpactReport;
use serde::Serialize;

pub const SUMMARY_JSON: &str = "analysis_summary.json";
pub const SENDERS_CSV: &str = "top_impacted_senders.csv";
pub const CONTRACTS_CSV: &str = "top_impacted_contracts.csv";
pub const ADDRESSES_CSV: &str = "top_impacted_addresses.csv";
pub const PAIRS_CSV: &str = "sender_contract_pairs.csv";
pub const REPORT_MD: &str = "eip7883_analysis_report.md";

/// Run metadata printed alongside a report.
#[derive(Clone, Debug, Serialize)]
pub struct RunInfo {
    pub run_id: i64,
    pub started_at: String,
    pub data_dir: String,
    pub files_loaded: u64,
    pub files_failed: u64,
}

/// Formats signed Wei as an ETH string with 6 decimal places.
///
/// Examples:
/// - `1_000_000_000_000_000_000` -> `"1.000000 ETH"`
/// - `-123_000_000_000_000` -> `"-0.000123 ETH"`
pub fn format_eth(wei: i128) -> String {
    const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;
    const SCALE: u128 = 1_000_000;

    let magnitude = wei.unsigned_abs();
    let whole = magnitude / WEI_PER_ETH;
    let fractional = ((magnitude % WEI_PER_ETH) * SCALE) / WEI_PER_ETH;
    let sign = if wei < 0 { "-" } else { "" };

    format!("{sign}{whole}.{fractional:06} ETH")
}

/// Truncate a hex hash/address for compact table display.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() > 14 {
        format!("{}…{}", &hash[..8], &hash[hash.len() - 4..])
    } else {
        hash.to_string()
    }
}

pub fn lower_hex(address: &Address) -> String {
    format!("{address:#x}")
}

pub fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.precision$}"))
}

pub fn fmt_percentiles(points: &[PercentilePoint]) -> String {
    if points.is_empty() {
        return "N/A".to_string();
    }
    points
        .iter()
        .map(|point| format!("p{}={:.2}", point.percentile, point.value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .wrap_err_with(|| format!("failed to create output directory {}", path.display()))?;
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).wrap_err_with(|| format!("failed to write {}", path.display()))
}

fn opt_to_csv(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

pub fn entities_csv(entities: &[EntityImpact], top: usize, with_users: bool) -> String {
    let mut out = String::from(
        "rank,address,total_increase,avg_increase,call_count,total_current_cost,total_new_cost,avg_cost_ratio",
    );
    if with_users {
        out.push_str(",unique_users");
    }
    out.push('\n');

    for (rank, entity) in entities.iter().take(top).enumerate() {
        let _ = write!(
            out,
            "{},{},{},{:.2},{},{},{},{}",
            rank + 1,
            lower_hex(&entity.address),
            entity.total_increase,
            entity.avg_increase,
            entity.call_count,
            entity.total_current_cost,
            entity.total_new_cost,
            opt_to_csv(entity.avg_cost_ratio),
        );
        if with_users {
            let _ = write!(out, ",{}", entity.unique_users.unwrap_or(0));
        }
        out.push('\n');
    }
    out
}

/// Senders and contracts in one list, ranked by total increase.
pub fn combined_addresses_csv(report: &ImpactReport, top: usize) -> String {
    let mut rows: Vec<(&str, &EntityImpact)> = report
        .senders
        .iter()
        .take(top)
        .map(|entity| ("sender", entity))
        .chain(
            report
                .contracts
                .iter()
                .take(top)
                .map(|entity| ("contract", entity)),
        )
        .collect();
    rows.sort_by(|a, b| {
        b.1.total_increase
            .cmp(&a.1.total_increase)
            .then(b.1.call_count.cmp(&a.1.call_count))
            .then(a.1.address.cmp(&b.1.address))
            .then(a.0.cmp(b.0))
    });

    let mut out = String::from("address,type,total_increase,avg_increase,call_count\n");
    for (kind, entity) in rows {
        let _ = writeln!(
            out,
            "{},{},{},{:.2},{}",
            lower_hex(&entity.address),
            kind,
            entity.total_increase,
            entity.avg_increase,
            entity.call_count
        );
    }
    out
}

pub fn pairs_csv(pairs: &[PairImpact], top: usize) -> String {
    let mut out = String::from(
        "rank,sender,contract,total_increase,avg_increase,call_count,total_current_cost,total_new_cost,avg_cost_ratio\n",
    );
    for (rank, pair) in pairs.iter().take(top).enumerate() {
        let _ = writeln!(
            out,
            "{},{},{},{},{:.2},{},{},{},{}",
            rank + 1,
            lower_hex(&pair.sender),
            lower_hex(&pair.contract),
            pair.total_increase,
            pair.avg_increase,
            pair.call_count,
            pair.total_current_cost,
            pair.total_new_cost,
            opt_to_csv(pair.avg_cost_ratio),
        );
    }
    out
}

/// JSON document written to `analysis_summary.json`.
#[derive(Serialize)]
struct SummaryDocument<'a> {
    run: Option<&'a RunInfo>,
    summary: &'a modexp_analysis::SummaryStats,
    patterns: &'a modexp_analysis::patterns::UsagePatterns,
    top_senders: &'a [EntityImpact],
    top_contracts: &'a [EntityImpact],
}

pub fn summary_json(report: &ImpactReport, run: Option<&RunInfo>, top: usize) -> Result<String> {
    let document = SummaryDocument {
        run,
        summary: &report.summary,
        patterns: &report.patterns,
        top_senders: &report.senders[..top.min(report.senders.len())],
        top_contracts: &report.contracts[..top.min(report.contracts.len())],
    };
    serde_json::to_string_pretty(&document).wrap_err("failed to serialize JSON")
}

/// Write the full set of analysis outputs into `dir`.
///
/// # Errors
/// Returns error if the directory cannot be created or a file cannot be written.
pub fn write_analysis_outputs(
    dir: &Path,
    report: &ImpactReport,
    run: Option<&RunInfo>,
    top: usize,
) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;

    let files = [
        (SUMMARY_JSON, summary_json(report, run, top)?),
        (SENDERS_CSV, entities_csv(&report.senders, top, false)),
        (CONTRACTS_CSV, entities_csv(&report.contracts, top, true)),
        (ADDRESSES_CSV, combined_addresses_csv(report, top)),
        (PAIRS_CSV, pairs_csv(&report.pairs, top)),
        (REPORT_MD, render_markdown_report(report, run, top)),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        write_file(&path, &content)?;
        written.push(path);
    }
    Ok(written)
}

fn entity_rows(out: &mut String, entities: &[EntityImpact], top: usize, with_users: bool) {
    if entities.is_empty() {
        out.push_str("_No calls carry address data. Pass `--tx-data` to attribute them._\n");
        return;
    }
    if with_users {
        out.push_str("| Rank | Address | Total Increase | Avg Increase | Calls | Unique Users | Cost Ratio |\n");
        out.push_str("|------|---------|----------------|--------------|-------|--------------|------------|\n");
    } else {
        out.push_str("| Rank | Address | Total Increase | Avg Increase | Calls | Cost Ratio |\n");
        out.push_str("|------|---------|----------------|--------------|-------|------------|\n");
    }
    for (rank, entity) in entities.iter().take(top).enumerate() {
        let ratio = fmt_opt(entity.avg_cost_ratio, 2);
        if with_users {
            let _ = writeln!(
                out,
                "| {} | `{}` | {} | {:.0} | {} | {} | {}x |",
                rank + 1,
                lower_hex(&entity.address),
                entity.total_increase,
                entity.avg_increase,
                entity.call_count,
                entity.unique_users.unwrap_or(0),
                ratio
            );
        } else {
            let _ = writeln!(
                out,
                "| {} | `{}` | {} | {:.0} | {} | {}x |",
                rank + 1,
                lower_hex(&entity.address),
                entity.total_increase,
                entity.avg_increase,
                entity.call_count,
                ratio
            );
        }
    }
}

/// Markdown report for one analysis.
pub fn render_markdown_report(report: &ImpactReport, run: Option<&RunInfo>, top: usize) -> String {
    let s = &report.summary;
    let p = &report.patterns;
    let mut out = String::new();

    let _ = writeln!(out, "# EIP-7883 ModExp Gas Cost Analysis\n");
    let _ = writeln!(
        out,
        "Generated {}.\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(run) = run {
        let _ = writeln!(
            out,
            "Run {} started {} over `{}` ({} files loaded, {} failed).\n",
            run.run_id, run.started_at, run.data_dir, run.files_loaded, run.files_failed
        );
    }
    if s.truncated {
        out.push_str("> **Partial results**: the run was interrupted before every file was processed.\n\n");
    }

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- **Calls analyzed**: {}", s.total_calls);
    let _ = writeln!(out, "- **Unique transactions**: {}", s.unique_transactions);
    let _ = writeln!(
        out,
        "- **Unique senders / contracts**: {} / {}",
        s.unique_senders, s.unique_contracts
    );
    let _ = writeln!(
        out,
        "- **Calls with a cost increase**: {} ({:.1}%)",
        s.calls_with_increase, s.pct_calls_affected
    );
    let _ = writeln!(out, "- **Calls with a cost decrease**: {}", s.calls_with_decrease);
    let _ = writeln!(
        out,
        "- **Total gas, current / EIP-7883**: {} / {}",
        s.total_current_cost, s.total_new_cost
    );
    let _ = writeln!(
        out,
        "- **Net additional gas**: {} (positive increases only: {})",
        s.total_cost_increase, s.total_cost_increase_floored
    );
    let _ = writeln!(
        out,
        "- **Average / median / max increase**: {} / {} / {}",
        fmt_opt(s.avg_increase, 1),
        fmt_opt(s.median_increase, 1),
        s.max_increase
            .map_or_else(|| "N/A".to_string(), |v| v.to_string())
    );
    if let Some((lo, hi)) = s.block_range {
        let _ = writeln!(out, "- **Block range**: {lo} to {hi}");
        let _ = writeln!(
            out,
            "- **Average additional gas per block**: {}",
            fmt_opt(s.avg_increase_per_block, 0)
        );
    }
    if s.priced_calls > 0 {
        let _ = writeln!(
            out,
            "- **Additional fees** ({} calls with a known gas price): {}",
            s.priced_calls,
            format_eth(s.fee_increase_wei)
        );
    }

    out.push_str("\n## Increase distribution (affected calls)\n\n");
    if s.increase_percentiles.is_empty() {
        out.push_str("No call sees a cost increase.\n");
    } else {
        out.push_str("| Percentile | Gas increase |\n|------------|--------------|\n");
        for point in &s.increase_percentiles {
            let _ = writeln!(out, "| p{} | {:.2} |", point.percentile, point.value);
        }
        out.push_str("\n| Percentile | Cost ratio |\n|------------|------------|\n");
        for point in &s.ratio_percentiles {
            let _ = writeln!(out, "| p{} | {:.3}x |", point.percentile, point.value);
        }
    }

    out.push_str("\n## Input sizes above 32 bytes\n\n");
    let _ = writeln!(out, "- Base: {} calls", s.calls_over_32_bytes.base);
    let _ = writeln!(out, "- Exponent: {} calls", s.calls_over_32_bytes.exponent);
    let _ = writeln!(out, "- Modulus: {} calls", s.calls_over_32_bytes.modulus);
    let _ = writeln!(out, "- All three exactly 32 bytes: {} calls", p.all_32_byte_calls);

    out.push_str("\n## Most impacted senders\n\n");
    entity_rows(&mut out, &report.senders, top, false);
    out.push_str("\n## Most impacted contracts\n\n");
    entity_rows(&mut out, &report.contracts, top, true);

    out.push_str("\n## Usage patterns\n\n");
    out.push_str("| Base | Exponent | Modulus | Calls |\n|------|----------|---------|-------|\n");
    for combo in &p.top_param_combos {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            combo.base_size, combo.exponent_size, combo.modulus_size, combo.count
        );
    }
    let _ = writeln!(
        out,
        "\nFermat exponents (3, 5, 17, 257, 65537): {} calls ({:.1}%).\n",
        p.fermat_calls, p.fermat_pct
    );
    out.push_str("| Current cost | Calls |\n|--------------|-------|\n");
    for bracket in &p.cost_brackets {
        let _ = writeln!(out, "| {} | {} |", bracket.label, bracket.count);
    }
    let _ = writeln!(
        out,
        "\nCalls per transaction: mean {}, max {}, {} transactions with more than one call.",
        fmt_opt(p.calls_per_tx.mean, 2),
        p.calls_per_tx.max,
        p.calls_per_tx.txs_with_multiple_calls
    );

    out.push_str("\n## Data quality\n\n");
    let _ = writeln!(out, "- Invalid records skipped: {}", s.invalid_records);
    for (reason, count) in &s.invalid_by_reason {
        let _ = writeln!(out, "  - {reason}: {count}");
    }
    let _ = writeln!(
        out,
        "- Recorded costs differing from the recomputed EIP-2565 cost: {}",
        s.legacy_mismatches
    );

    out
}

/// Markdown report for entity projections.
pub fn render_projection_report(report: &ProjectionReport, top: usize) -> String {
    let mut out = String::new();
    out.push_str("# EIP-7883 Entity Impact Projection\n\n");
    let _ = writeln!(
        out,
        "Assumptions: ETH = ${:.2}, gas price = {} gwei, 30-day month, exponent 0x10001.\n",
        report.pricing.eth_price_usd, report.pricing.gas_price_gwei
    );
    let _ = writeln!(out, "- **Entities**: {}", report.entities.len());
    let _ = writeln!(
        out,
        "- **Total monthly increase**: ${:.2}",
        report.total_monthly_increase
    );
    let _ = writeln!(
        out,
        "- **Average increase per entity**: ${:.2}/month",
        report.avg_monthly_increase_per_entity
    );
    let _ = writeln!(
        out,
        "- **Entities above $100 / $1000 per month**: {} / {}\n",
        report.entities_over_100_usd, report.entities_over_1000_usd
    );

    out.push_str("## Most impacted entities\n\n");
    out.push_str("| Rank | Entity | Daily Calls | Monthly Increase | Cost Ratio | Sizes |\n");
    out.push_str("|------|--------|-------------|------------------|------------|-------|\n");
    for (rank, entity) in report.entities.iter().take(top).enumerate() {
        let _ = writeln!(
            out,
            "| {} | {} | {} | ${:.2} | {:.2}x | B{}/E{}/M{} |",
            rank + 1,
            entity.entity_id,
            entity.daily_calls,
            entity.costs.monthly_usd_increase,
            entity.costs.cost_ratio,
            entity.input_size,
            entity.exponent_size,
            entity.input_size
        );
    }

    out.push_str("\n## By entity type\n");
    for summary in &report.by_type {
        let _ = writeln!(out, "\n### {}\n", summary.entity_type);
        let _ = writeln!(out, "- Entities: {}", summary.entity_count);
        let _ = writeln!(out, "- Daily calls: {}", summary.total_daily_calls);
        let _ = writeln!(
            out,
            "- Monthly cost: ${:.2} -> ${:.2} (+${:.2}, {:.1}%)",
            summary.total_monthly_current,
            summary.total_monthly_new,
            summary.total_monthly_increase,
            summary.pct_increase
        );
        let _ = writeln!(out, "- Average cost ratio: {:.2}x", summary.avg_cost_ratio);
    }
    out
}
