//! Reading the results of a single stage from the optimiser's output folder.
use crate::config::{BlockKind, Config};
use crate::error::missing_output_err;
use crate::id::BlockID;
use crate::input::read_csv;
use crate::scenario::CellValue;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum::Display;

/// Suffix of the status file's name (prefixed with the result folder's name)
const STATUS_FILE_SUFFIX: &str = "_scenarios_status.csv";

/// Suffix of the summary file's name
const SUMMARY_FILE_SUFFIX: &str = "_summary.csv";

/// Assumed grid emissions factor (kg/kWh) when the output doesn't give one
pub const DEFAULT_CO2_SPEC_KG_PER_KWH: f64 = 0.4;

/// Assumed length of the simulated period (days) when the output doesn't give one
pub const DEFAULT_SIM_DURATION_DAYS: f64 = 50.0;

/// Energy in the output is in Wh
const WH_PER_KWH: f64 = 1000.0;

/// Whether the optimiser found a solution for a stage
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StageStatus {
    /// A solution was found
    Ok,
    /// No solution satisfies the constraints
    Infeasible,
    /// The status file was missing or unreadable
    Unknown,
}

impl StageStatus {
    /// Interpret the value of the status column
    fn from_status_cell(value: &str) -> Self {
        match value.trim() {
            "" => Self::Unknown,
            value if value.eq_ignore_ascii_case("infeasible") => Self::Infeasible,
            _ => Self::Ok,
        }
    }
}

/// A row of the optimiser's status file
#[derive(Deserialize)]
struct StatusRow {
    status: String,
}

/// Installed capacity of one investable block (W or Wh)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlockCapacity {
    /// Capacity at the end of the stage, including what existed before
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Capacity added during the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<f64>,
    /// For grid blocks, site-to-grid capacity at the end of the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_total: Option<f64>,
    /// For grid blocks, site-to-grid capacity added during the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_added: Option<f64>,
}

/// The outcome of a single stage.
///
/// Economic values cover the stage's duration and are undiscounted unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    /// Stage year
    pub year: u32,
    /// Solver status
    pub status: StageStatus,
    /// Factor applied to discount this stage's values to the first stage year
    pub discount_factor: f64,
    /// Net present value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npv: Option<f64>,
    /// `npv` multiplied by the discount factor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npv_discounted: Option<f64>,
    /// Net present cost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npc: Option<f64>,
    /// Capital expenditure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capex: Option<f64>,
    /// Operating expenditure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opex: Option<f64>,
    /// Levelised cost of energy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcoe: Option<f64>,
    /// Energy imported from the grid over the simulated period (kWh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_import_kwh: Option<f64>,
    /// Energy exported to the grid over the simulated period (kWh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_export_kwh: Option<f64>,
    /// Energy generated on site over the simulated period (kWh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_kwh: Option<f64>,
    /// Emissions over the simulated period (kg)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_sim_kg: Option<f64>,
    /// Emissions extrapolated to the whole stage (kg)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_stage_kg: Option<f64>,
    /// Ratio used to extrapolate emissions from the simulated period to the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_extrapolation_factor: Option<f64>,
    /// Length of the simulated period (days)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_duration_days: Option<f64>,
    /// Length of the stage (years)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_duration_years: Option<f64>,
    /// Whether simulated values were extrapolated to the stage duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensate: Option<bool>,
    /// Folder the results were read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_dir: Option<PathBuf>,
    /// Capacity of each investable block
    pub blocks: IndexMap<BlockID, BlockCapacity>,
}

impl StageResult {
    /// A result for a stage with no solution: everything is null except the status, year and
    /// discount factor.
    pub fn infeasible<'a, I>(year: u32, discount_factor: f64, blocks: I) -> Self
    where
        I: IntoIterator<Item = &'a BlockID>,
    {
        Self {
            year,
            status: StageStatus::Infeasible,
            discount_factor,
            blocks: blocks
                .into_iter()
                .map(|id| (id.clone(), BlockCapacity::default()))
                .collect(),
            npv: None,
            npv_discounted: None,
            npc: None,
            capex: None,
            opex: None,
            lcoe: None,
            grid_import_kwh: None,
            grid_export_kwh: None,
            generation_kwh: None,
            co2_sim_kg: None,
            co2_stage_kg: None,
            co2_extrapolation_factor: None,
            sim_duration_days: None,
            stage_duration_years: None,
            compensate: None,
            result_dir: None,
        }
    }

    /// Whether the stage had no solution
    pub fn is_infeasible(&self) -> bool {
        self.status == StageStatus::Infeasible
    }

    /// The total capacity of a block, if known
    pub fn total_size(&self, block: &str) -> Option<f64> {
        self.blocks.get(block)?.total
    }
}

/// The values in a summary file, keyed by block and key
struct Summary(HashMap<(String, String), CellValue>);

impl Summary {
    /// Read a summary file, taking values from the last column
    fn from_path(file_path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(file_path)?;
        let headers = reader.headers()?.clone();
        let block_idx = headers
            .iter()
            .position(|h| h == "Block")
            .context("Summary has no Block column")?;
        let key_idx = headers
            .iter()
            .position(|h| h == "Key")
            .context("Summary has no Key column")?;
        ensure!(headers.len() > 2, "Summary has no value column");
        let value_idx = headers.len() - 1;

        let mut values = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let field = |i| record.get(i).unwrap_or_default().trim().to_string();
            values
                .entry((field(block_idx), field(key_idx)))
                .or_insert_with(|| CellValue::parse(record.get(value_idx).unwrap_or_default()));
        }

        Ok(Self(values))
    }

    fn get(&self, block: &str, key: &str) -> Option<&CellValue> {
        self.0.get(&(block.to_string(), key.to_string()))
    }

    /// A numeric value, or `None` if absent, blank or not a number
    fn get_f64(&self, block: &str, key: &str) -> Option<f64> {
        self.get(block, key).and_then(CellValue::as_f64)
    }
}

/// Reads [`StageResult`]s from the optimiser's output folders
pub struct ResultsParser<'a> {
    config: &'a Config,
}

impl<'a> ResultsParser<'a> {
    /// Create a parser for the blocks declared in `config`
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn block_ids(&self) -> impl Iterator<Item = &'a BlockID> {
        self.config.investable_blocks.iter().map(|block| &block.name)
    }

    /// Parse the results of one stage.
    ///
    /// # Arguments
    ///
    /// * `result_dir` - The folder the optimiser wrote its output to
    /// * `year` - The stage year
    ///
    /// # Returns
    ///
    /// The stage result. A missing summary is an error unless the status file reports the stage
    /// as infeasible. An unreadable summary is treated as infeasible.
    pub fn parse(&self, result_dir: &Path, year: u32) -> Result<StageResult> {
        let discount_factor = self.config.discount_factor(year);
        let status = read_status(result_dir);

        let Some(summary_path) = find_summary_file(result_dir)? else {
            if status == StageStatus::Infeasible {
                warn!("Stage {year} was infeasible: no summary was produced");
                return Ok(self.infeasible(year, discount_factor, result_dir));
            }

            return Err(missing_output_err!(
                "No summary file found in {}",
                result_dir.display()
            ));
        };

        if status == StageStatus::Infeasible {
            warn!("Stage {year} was infeasible");
            return Ok(self.infeasible(year, discount_factor, result_dir));
        }

        let summary = match Summary::from_path(&summary_path) {
            Ok(summary) => summary,
            Err(err) => {
                warn!(
                    "Could not read summary file {}: {err:#}. Treating stage {year} as infeasible.",
                    summary_path.display()
                );
                return Ok(self.infeasible(year, discount_factor, result_dir));
            }
        };

        Ok(self.stage_result_from_summary(&summary, year, status, discount_factor, result_dir))
    }

    fn infeasible(&self, year: u32, discount_factor: f64, result_dir: &Path) -> StageResult {
        let mut result = StageResult::infeasible(year, discount_factor, self.block_ids());
        result.result_dir = Some(result_dir.to_path_buf());
        result
    }

    fn stage_result_from_summary(
        &self,
        summary: &Summary,
        year: u32,
        status: StageStatus,
        discount_factor: f64,
        result_dir: &Path,
    ) -> StageResult {
        const SCENARIO: &str = "scenario";

        let blocks = self
            .config
            .investable_blocks
            .iter()
            .map(|block| {
                let name = block.name.as_str();
                let capacity = if block.is_bidirectional() {
                    BlockCapacity {
                        total: summary.get_f64(name, "size_g2s_total"),
                        added: summary.get_f64(name, "size_g2s_additional"),
                        export_total: summary.get_f64(name, "size_s2g_total"),
                        export_added: summary.get_f64(name, "size_s2g_additional"),
                    }
                } else {
                    BlockCapacity {
                        total: summary.get_f64(name, "size_total"),
                        added: summary.get_f64(name, "size_additional"),
                        ..Default::default()
                    }
                };
                (block.name.clone(), capacity)
            })
            .collect();

        let grid = self
            .config
            .investable_blocks
            .iter()
            .find(|block| block.kind == BlockKind::Grid)
            .map(|block| block.name.as_str());
        let to_kwh = |wh: f64| wh / WH_PER_KWH;
        let grid_import_kwh = grid
            .and_then(|grid| summary.get_f64(grid, "e_del_sim"))
            .map(to_kwh);
        let grid_export_kwh = grid
            .and_then(|grid| summary.get_f64(grid, "e_pro_sim"))
            .map(to_kwh);
        let generation = self
            .config
            .investable_blocks
            .iter()
            .filter(|block| block.kind == BlockKind::Generator)
            .filter_map(|block| summary.get_f64(block.name.as_str(), "e_pro_sim"))
            .collect_vec();
        let generation_kwh = (!generation.is_empty()).then(|| to_kwh(generation.iter().sum()));

        // Emissions of the simulated period, extrapolated to the stage if requested
        let co2_spec = grid
            .and_then(|grid| summary.get_f64(grid, "co2_spec_g2s"))
            .unwrap_or(DEFAULT_CO2_SPEC_KG_PER_KWH);
        let co2_sim_kg = grid_import_kwh.map(|kwh| kwh * co2_spec);
        let sim_duration_days = summary
            .get_f64(SCENARIO, "sim_duration")
            .filter(|days| *days > 0.0)
            .unwrap_or(DEFAULT_SIM_DURATION_DAYS);
        let stage_duration_years = summary
            .get_f64(SCENARIO, "prj_duration_yrs")
            .unwrap_or_else(|| f64::from(self.config.stage_duration_years));
        let compensate = summary
            .get(SCENARIO, "compensate_sim_prj")
            .and_then(CellValue::as_bool)
            .unwrap_or(true);
        let co2_extrapolation_factor = if compensate {
            stage_duration_years * 365.0 / sim_duration_days
        } else {
            1.0
        };

        let npv = summary.get_f64(SCENARIO, "npv");
        StageResult {
            year,
            status,
            discount_factor,
            blocks,
            npv,
            npv_discounted: npv.map(|npv| npv * discount_factor),
            npc: summary.get_f64(SCENARIO, "npc"),
            capex: summary.get_f64(SCENARIO, "capex_prj"),
            opex: summary.get_f64(SCENARIO, "opex_prj"),
            lcoe: summary.get_f64(SCENARIO, "lcoe_total"),
            grid_import_kwh,
            grid_export_kwh,
            generation_kwh,
            co2_sim_kg,
            co2_stage_kg: co2_sim_kg.map(|kg| kg * co2_extrapolation_factor),
            co2_extrapolation_factor: Some(co2_extrapolation_factor),
            sim_duration_days: Some(sim_duration_days),
            stage_duration_years: Some(stage_duration_years),
            compensate: Some(compensate),
            result_dir: Some(result_dir.to_path_buf()),
        }
    }
}

/// Read the status of the last scenario in the status file.
///
/// A missing or unreadable file gives [`StageStatus::Unknown`].
fn read_status(result_dir: &Path) -> StageStatus {
    let Some(dir_name) = result_dir.file_name() else {
        return StageStatus::Unknown;
    };
    let mut file_name = dir_name.to_os_string();
    file_name.push(STATUS_FILE_SUFFIX);
    let file_path = result_dir.join(file_name);
    if !file_path.is_file() {
        return StageStatus::Unknown;
    }

    match read_last_status(&file_path) {
        Ok(status) => status,
        Err(err) => {
            warn!("Could not read status file {}: {err:#}", file_path.display());
            StageStatus::Unknown
        }
    }
}

fn read_last_status(file_path: &Path) -> Result<StageStatus> {
    let last = read_csv::<StatusRow>(file_path)?.last();

    Ok(last.map_or(StageStatus::Unknown, |row| {
        StageStatus::from_status_cell(&row.status)
    }))
}

/// Find the summary file in the result folder, if there is one
fn find_summary_file(result_dir: &Path) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(result_dir).map_err(|err| {
        missing_output_err!("Could not read {}: {err}", result_dir.display())
    })?;

    let mut summaries = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_summary = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(SUMMARY_FILE_SUFFIX));
        if is_summary && path.is_file() {
            summaries.push(path);
        }
    }
    summaries.sort();

    Ok(summaries.into_iter().next())
}
