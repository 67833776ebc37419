//! Defines the [`Config`] struct, which represents the contents of the planning configuration file.
use crate::error::{PlanningError, config_err};
use crate::id::BlockID;
use crate::input::{input_err_msg, is_sorted_and_unique, read_toml, resolve_path};
use crate::pathway::{
    DemandModel, EmissionsModel, EmissionsPathway, TechCostModel, discount_factor,
};
use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub mod blocks;
pub use blocks::{BlockKind, DemandBlock, InvestableBlock, ScenarioKeys};

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_invest_budget_per_kwh, f64, 3.0);
define_param_default!(default_fleet_log_seed, u64, 42);
define_param_default!(default_timeout_secs, u64, 3600);
define_param_default!(default_working_dir, PathBuf, PathBuf::from("."));

/// The "stages" section of the config file
#[derive(Debug, Deserialize, PartialEq)]
struct StagesSection {
    years: Vec<u32>,
    duration_years: u32,
}

/// The "emissions" section of the config file.
///
/// Which fields are required depends on the pathway, so they are checked after reading.
#[derive(Debug, Deserialize, PartialEq)]
struct EmissionsSection {
    pathway: String,
    base_year: Option<u32>,
    base_limit_kg: Option<f64>,
    final_year: Option<u32>,
    final_limit_kg: Option<f64>,
    annual_reduction_rate: Option<f64>,
}

/// The "economics" section of the config file
#[derive(Debug, Deserialize, PartialEq)]
struct EconomicsSection {
    wacc: f64,
    #[serde(default = "default_invest_budget_per_kwh")]
    invest_budget_per_kwh: f64,
}

/// The "blocks" section of the config file
#[derive(Debug, Deserialize, PartialEq)]
struct BlocksSection {
    #[serde(default)]
    investable: Vec<InvestableBlock>,
    #[serde(default)]
    demand: Vec<DemandBlock>,
}

/// Settings for synthesising usage logs for a grown fleet
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FleetLogSettings {
    /// Whether to generate scaled usage logs when the fleet grows
    #[serde(default)]
    pub enabled: bool,
    /// Seed for choosing which vehicles to clone
    #[serde(default = "default_fleet_log_seed")]
    pub seed: u64,
    /// Folder containing the usage logs named in the scenario
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
}

impl Default for FleetLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: default_fleet_log_seed(),
            input_dir: None,
        }
    }
}

/// How to invoke the external optimiser
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OptimizerSettings {
    /// Program and leading arguments
    pub command: Vec<String>,
    /// Working directory for the optimiser process
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// The optimiser's own settings file
    pub settings_path: PathBuf,
    /// Maximum time allowed for a single stage
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// The "scenario" section of the config file
#[derive(Debug, Deserialize, PartialEq)]
struct ScenarioSection {
    template: PathBuf,
    #[serde(flatten)]
    keys: ScenarioKeys,
}

/// Represents the contents of the entire config file.
#[derive(Debug, Deserialize, PartialEq)]
struct ConfigFile {
    stages: StagesSection,
    #[serde(default)]
    technology_costs: IndexMap<String, TechCostModel>,
    demand: DemandModel,
    emissions: EmissionsSection,
    economics: EconomicsSection,
    blocks: BlocksSection,
    scenario: ScenarioSection,
    #[serde(default)]
    fleet_log: FleetLogSettings,
    optimizer: OptimizerSettings,
}

/// Planning configuration.
///
/// Loaded once per run and read-only thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Stage years, in ascending order
    pub stages: Vec<u32>,
    /// Number of years covered by each stage
    pub stage_duration_years: u32,
    /// Cost models, keyed by technology name
    pub tech_costs: IndexMap<String, TechCostModel>,
    /// Fleet growth model
    pub demand: DemandModel,
    /// Emissions pathway
    pub emissions: EmissionsModel,
    /// Discount rate
    pub wacc: f64,
    /// Investment allowed per kWh of annual fleet energy demand
    pub invest_budget_per_kwh: f64,
    /// Scenario table used as the starting point for every stage
    pub template_path: PathBuf,
    /// Blocks in which the optimiser may invest
    pub investable_blocks: Vec<InvestableBlock>,
    /// Blocks representing the vehicle fleet
    pub demand_blocks: Vec<DemandBlock>,
    /// Location of stage-wide values in the scenario table
    pub scenario_keys: ScenarioKeys,
    /// Usage log scaling
    pub fleet_log: FleetLogSettings,
    /// External optimiser invocation
    pub optimizer: OptimizerSettings,
}

fn check_stages(years: &[u32], duration: u32) -> Result<()> {
    if years.is_empty() {
        Err(config_err!("Stage years are empty"))?;
    }
    if !is_sorted_and_unique(years) {
        Err(config_err!("Stage years must be in strictly ascending order"))?;
    }
    if duration == 0 {
        Err(config_err!("Stage duration must be greater than zero"))?;
    }

    Ok(())
}

fn check_tech_costs(tech_costs: &IndexMap<String, TechCostModel>, first_stage: u32) -> Result<()> {
    for (tech, model) in tech_costs {
        if !(0.0..1.0).contains(&model.annual_decline_rate) {
            Err(config_err!(
                "{tech} decline rate must be in [0, 1), got {}",
                model.annual_decline_rate
            ))?;
        }
        if !(model.base_cost.is_finite() && model.base_cost >= 0.0) {
            Err(config_err!("{tech} base cost must be a non-negative number"))?;
        }
        if first_stage < model.base_year {
            Err(config_err!(
                "First stage ({first_stage}) is before the {tech} cost base year ({})",
                model.base_year
            ))?;
        }
    }

    Ok(())
}

fn check_demand(demand: &DemandModel, first_stage: u32) -> Result<()> {
    if !(demand.annual_growth_rate.is_finite() && demand.annual_growth_rate >= 0.0) {
        Err(config_err!(
            "Demand growth rate must be >= 0, got {}",
            demand.annual_growth_rate
        ))?;
    }
    if demand.base_fleet_size == 0 {
        Err(config_err!("Base fleet size must be greater than zero"))?;
    }
    if !(demand.energy_per_vehicle_kwh.is_finite() && demand.energy_per_vehicle_kwh > 0.0) {
        Err(config_err!("Energy per vehicle must be greater than zero"))?;
    }
    if first_stage < demand.base_year {
        Err(config_err!(
            "First stage ({first_stage}) is before the demand base year ({})",
            demand.base_year
        ))?;
    }

    Ok(())
}

fn check_economics(economics: &EconomicsSection) -> Result<()> {
    if !(economics.wacc.is_finite() && economics.wacc > 0.0) {
        Err(config_err!("WACC must be positive, got {}", economics.wacc))?;
    }
    if !(economics.invest_budget_per_kwh.is_finite() && economics.invest_budget_per_kwh >= 0.0) {
        Err(config_err!("Investment budget per kWh must be >= 0"))?;
    }

    Ok(())
}

fn check_block_names(blocks: &BlocksSection) -> Result<()> {
    let mut names = IndexSet::new();
    let all_names = blocks
        .investable
        .iter()
        .map(|block| &block.name)
        .chain(blocks.demand.iter().map(|block| &block.name));
    for name in all_names {
        if !names.insert(name.clone()) {
            Err(config_err!("Block name {name} is not unique"))?;
        }
    }

    Ok(())
}

fn check_optimizer(optimizer: &OptimizerSettings) -> Result<()> {
    if optimizer.command.is_empty() {
        Err(config_err!("Optimiser command is empty"))?;
    }
    if optimizer.timeout_secs == 0 {
        Err(config_err!("Optimiser timeout must be greater than zero"))?;
    }

    Ok(())
}

/// Build the emissions model, checking the fields each pathway requires
fn to_emissions_model(section: &EmissionsSection, last_stage: u32) -> Result<EmissionsModel> {
    let pathway: EmissionsPathway = section
        .pathway
        .parse()
        .map_err(|_| config_err!("Unknown emissions pathway kind: {}", section.pathway))?;

    let require = |value: Option<f64>, field: &str| {
        value.ok_or_else(|| config_err!("emissions.{field} is required for the {pathway} pathway"))
    };
    let require_year = |value: Option<u32>, field: &str| {
        value.ok_or_else(|| config_err!("emissions.{field} is required for the {pathway} pathway"))
    };

    let model = match pathway {
        EmissionsPathway::None => EmissionsModel {
            pathway,
            base_year: section.base_year.unwrap_or_default(),
            base_limit_kg: section.base_limit_kg.unwrap_or_default(),
            final_year: section.final_year.unwrap_or_default(),
            final_limit_kg: section.final_limit_kg.unwrap_or_default(),
            annual_reduction_rate: section.annual_reduction_rate,
        },
        EmissionsPathway::Linear => {
            let final_year = require_year(section.final_year, "final_year")?;
            if final_year < last_stage {
                Err(config_err!(
                    "Emissions final year ({final_year}) must be >= last stage ({last_stage})"
                ))?;
            }

            EmissionsModel {
                pathway,
                base_year: require_year(section.base_year, "base_year")?,
                base_limit_kg: require(section.base_limit_kg, "base_limit_kg")?,
                final_year,
                final_limit_kg: require(section.final_limit_kg, "final_limit_kg")?,
                annual_reduction_rate: section.annual_reduction_rate,
            }
        }
        EmissionsPathway::ScienceBased => {
            let rate = require(section.annual_reduction_rate, "annual_reduction_rate")?;
            if !(0.0..=1.0).contains(&rate) {
                Err(config_err!(
                    "Annual reduction rate must be in [0, 1], got {rate}"
                ))?;
            }

            let base_year = require_year(section.base_year, "base_year")?;
            let base_limit_kg = require(section.base_limit_kg, "base_limit_kg")?;
            EmissionsModel {
                pathway,
                base_year,
                base_limit_kg,
                final_year: section.final_year.unwrap_or(base_year),
                final_limit_kg: section.final_limit_kg.unwrap_or(0.0),
                annual_reduction_rate: Some(rate),
            }
        }
    };

    Ok(model)
}

impl ConfigFile {
    /// Validate the file contents and convert into a [`Config`]
    fn into_config(self, config_dir: &Path) -> Result<Config> {
        check_stages(&self.stages.years, self.stages.duration_years)?;
        let first_stage = self.stages.years[0];
        let last_stage = *self.stages.years.last().unwrap(); // NB: checked above
        check_tech_costs(&self.technology_costs, first_stage)?;
        check_demand(&self.demand, first_stage)?;
        check_economics(&self.economics)?;
        check_block_names(&self.blocks)?;
        check_optimizer(&self.optimizer)?;
        let emissions = to_emissions_model(&self.emissions, last_stage)?;

        // Paths in the config file are relative to the file itself
        let mut optimizer = self.optimizer;
        optimizer.working_dir = resolve_path(config_dir, &optimizer.working_dir);
        optimizer.settings_path = resolve_path(config_dir, &optimizer.settings_path);
        let mut fleet_log = self.fleet_log;
        fleet_log.input_dir = Some(
            fleet_log
                .input_dir
                .map_or_else(|| config_dir.to_path_buf(), |p| resolve_path(config_dir, &p)),
        );

        Ok(Config {
            stages: self.stages.years,
            stage_duration_years: self.stages.duration_years,
            tech_costs: self.technology_costs,
            demand: self.demand,
            emissions,
            wacc: self.economics.wacc,
            invest_budget_per_kwh: self.economics.invest_budget_per_kwh,
            template_path: resolve_path(config_dir, &self.scenario.template),
            investable_blocks: self.blocks.investable,
            demand_blocks: self.blocks.demand,
            scenario_keys: self.scenario.keys,
            fleet_log,
            optimizer,
        })
    }
}

impl Config {
    /// Read and validate a config file.
    ///
    /// # Arguments
    ///
    /// * `file_path` - Path to the TOML config file
    ///
    /// # Returns
    ///
    /// The validated [`Config`] or an error if the file is missing, malformed or inconsistent.
    pub fn from_path(file_path: &Path) -> Result<Config> {
        let config_file: ConfigFile = read_toml(file_path)?;
        let config_dir = file_path.parent().unwrap_or(Path::new("."));
        config_file
            .into_config(config_dir)
            .with_context(|| input_err_msg(file_path))
    }

    /// Parse and validate config from a TOML string.
    ///
    /// Relative paths are resolved against `config_dir`.
    pub fn from_toml_str(toml_str: &str, config_dir: &Path) -> Result<Config> {
        let config_file: ConfigFile = toml::from_str(toml_str)?;
        config_file.into_config(config_dir)
    }

    /// Iterate over the stage years
    pub fn iter_stages(&self) -> impl Iterator<Item = u32> + '_ {
        self.stages.iter().copied()
    }

    /// The first stage year, to which all values are discounted
    pub fn first_stage(&self) -> u32 {
        self.stages[0]
    }

    /// The unit cost of the named technology in the given year
    pub fn unit_cost(&self, tech: &str, year: u32) -> Result<f64> {
        let model = self
            .tech_costs
            .get(tech)
            .ok_or_else(|| config_err!("No cost model for technology {tech}"))?;
        model.unit_cost(year)
    }

    /// The number of vehicles in the given year
    pub fn fleet_size(&self, year: u32) -> Result<u32> {
        self.demand.fleet_size(year)
    }

    /// The emissions limit (kg) for the given year
    pub fn emissions_limit(&self, year: u32) -> Result<f64> {
        self.emissions.limit(year)
    }

    /// The discount factor for the given stage year
    pub fn discount_factor(&self, year: u32) -> f64 {
        discount_factor(self.wacc, self.first_stage(), year)
    }

    /// All block names the scenario template must contain
    pub fn required_blocks(&self) -> impl Iterator<Item = &BlockID> {
        self.investable_blocks
            .iter()
            .map(|block| &block.name)
            .chain(self.demand_blocks.iter().map(|block| &block.name))
            .chain(std::iter::once(&self.scenario_keys.block))
    }
}

/// Whether the error is a [`PlanningError::Config`]
pub fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PlanningError>(),
        Some(PlanningError::Config(_))
    )
}
