//! The module responsible for writing output data to disk.
use crate::config::{BlockKind, Config};
use crate::simulation::{StageResultMap, TimelineRow};
use anyhow::{Context, Result, ensure};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The root folder in which run-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "stride_results";

/// The output file name for the investment timeline
const TIMELINE_FILE_NAME: &str = "investment_timeline.csv";

/// The output file name for the full results of every stage
const STAGE_RESULTS_FILE_NAME: &str = "stage_results.toml";

/// Get the default output folder for the config file at `config_path`
pub fn get_output_dir(config_path: &Path) -> Result<PathBuf> {
    let config_name = config_path
        .file_stem()
        .context("Config path has no file name")?
        .to_str()
        .context("Invalid chars in config file name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, config_name].iter().collect())
}

/// Create a new output directory, replacing an existing one if allowed.
///
/// # Returns
///
/// `true` if an existing, non-empty folder was replaced, `false` otherwise. An error if the folder
/// exists, is not empty and `allow_overwrite` is false.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    if output_dir.is_dir() {
        if fs::read_dir(output_dir)?.next().is_none() {
            // already exists, but is empty
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Use --overwrite to replace it."
        );
        fs::remove_dir_all(output_dir)?;
        fs::create_dir_all(output_dir)?;
        return Ok(true);
    }

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(false)
}

fn fmt_cell(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Write the investment timeline (one row per stage) to a CSV file in `output_dir`
pub fn write_timeline_csv(
    config: &Config,
    timeline: &[TimelineRow],
    output_dir: &Path,
) -> Result<()> {
    let file_path = output_dir.join(TIMELINE_FILE_NAME);
    let mut writer = csv::Writer::from_path(&file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;

    let mut header = vec!["year".to_string()];
    for block in &config.investable_blocks {
        header.push(format!("{}_total", block.name));
        header.push(format!("{}_added", block.name));
        if block.is_bidirectional() {
            header.push(format!("{}_export_total", block.name));
            header.push(format!("{}_export_added", block.name));
        }
    }
    header.extend(["capex", "npv", "discount_factor", "npv_discounted"].map(String::from));
    writer.write_record(&header)?;

    for row in timeline {
        let mut record = vec![row.year.to_string()];
        for block in &config.investable_blocks {
            let capacity = row.blocks.get(&block.name).cloned().unwrap_or_default();
            record.push(fmt_cell(capacity.total));
            record.push(fmt_cell(capacity.added));
            if block.is_bidirectional() {
                record.push(fmt_cell(capacity.export_total));
                record.push(fmt_cell(capacity.export_added));
            }
        }
        record.push(fmt_cell(row.capex));
        record.push(fmt_cell(row.npv));
        record.push(row.discount_factor.to_string());
        record.push(fmt_cell(row.npv_discounted));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write every stage's result to a TOML file in `output_dir`, with one table per year
pub fn write_stage_results_toml(results: &StageResultMap, output_dir: &Path) -> Result<()> {
    // TOML keys must be strings
    let by_year: BTreeMap<String, _> = results
        .iter()
        .map(|(year, result)| (year.to_string(), result))
        .collect();
    let contents = toml::to_string(&by_year).context("Could not serialise stage results")?;

    let file_path = output_dir.join(STAGE_RESULTS_FILE_NAME);
    fs::write(&file_path, contents)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}

/// Format an amount of money for the log
pub fn format_money(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

/// Format a capacity in W or Wh for the log, in the display unit for the block kind
pub fn format_capacity(kind: BlockKind, value: Option<f64>) -> String {
    let (unit, divisor) = kind.display_unit();
    value.map_or_else(
        || "n/a".to_string(),
        |value| format!("{:.1} {unit}", value / divisor),
    )
}

/// A table of the capacities and costs of every stage so far, one line per row
pub fn format_trajectory(config: &Config, results: &StageResultMap) -> Vec<String> {
    let block_header = config
        .investable_blocks
        .iter()
        .map(|block| {
            let (unit, _) = block.kind.display_unit();
            format!("{:>14}", format!("{} ({unit})", block.name))
        })
        .join(" ");
    let mut lines = vec![
        "Trajectory:".to_string(),
        format!(
            "  {:>6} {:>10} {block_header} {:>14} {:>14}",
            "Year", "Status", "CAPEX", "NPV (disc.)"
        ),
    ];

    for result in results.values() {
        let capacities = config
            .investable_blocks
            .iter()
            .map(|block| {
                let value = result.total_size(block.name.as_str());
                let (_, divisor) = block.kind.display_unit();
                let cell =
                    value.map_or_else(|| "n/a".to_string(), |value| format!("{:.1}", value / divisor));
                format!("{cell:>14}")
            })
            .join(" ");
        lines.push(format!(
            "  {:>6} {:>10} {capacities} {:>14} {:>14}",
            result.year,
            result.status.to_string(),
            format_money(result.capex),
            format_money(result.npv_discounted)
        ));
    }

    lines
}
