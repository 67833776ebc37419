//! Builds the scenario for each stage from the template and the previous stage's result.
use super::{CellValue, ScenarioSnapshot, ScenarioTemplate};
use crate::config::blocks::{SIZE_G2S_EXISTING_KEY, SIZE_S2G_EXISTING_KEY};
use crate::config::{Config, DemandBlock};
use crate::error::validation_err;
use crate::fleet::{UsageLog, scale};
use crate::id::BlockID;
use crate::input::resolve_path;
use crate::pathway::UNBOUNDED_EMISSIONS_LIMIT;
use crate::results::StageResult;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// A usage log read from the template, ready for scaling
#[derive(Debug)]
struct BaseUsageLog {
    /// Where the log was read from
    path: PathBuf,
    log: UsageLog,
}

/// Builds a [`ScenarioSnapshot`] for each stage.
///
/// The template is checked against the configuration once, when the builder is created.
pub struct ScenarioBuilder<'a> {
    config: &'a Config,
    template: ScenarioTemplate,
    column: String,
    base_logs: IndexMap<BlockID, BaseUsageLog>,
}

impl<'a> ScenarioBuilder<'a> {
    /// Create a new [`ScenarioBuilder`].
    ///
    /// # Arguments
    ///
    /// * `config` - Planning configuration
    /// * `template` - The scenario template
    /// * `column` - Which scenario column to use (defaults to the first)
    ///
    /// # Returns
    ///
    /// The builder, or a validation error if the template lacks a configured block, the column
    /// doesn't exist or a usage log has the wrong number of vehicles.
    pub fn new(
        config: &'a Config,
        template: ScenarioTemplate,
        column: Option<&str>,
    ) -> Result<Self> {
        template.check_blocks(config.required_blocks())?;
        let snapshot = template.snapshot(column)?;
        let base_logs = if config.fleet_log.enabled {
            read_base_logs(config, &snapshot)?
        } else {
            IndexMap::new()
        };

        Ok(Self {
            config,
            template,
            column: snapshot.column().to_string(),
            base_logs,
        })
    }

    /// The name of the scenario column in use
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Build the scenario for one stage.
    ///
    /// # Arguments
    ///
    /// * `year` - The stage year
    /// * `prior` - The result of the previous stage, if there was one
    /// * `stage_dir` - Folder for files generated for this stage (e.g. scaled usage logs)
    pub fn build(
        &self,
        year: u32,
        prior: Option<&StageResult>,
        stage_dir: &Path,
    ) -> Result<ScenarioSnapshot> {
        let mut snapshot = self.template.snapshot(Some(&self.column))?;
        self.set_stage_duration(&mut snapshot);
        if let Some(prior) = prior {
            self.link_existing_capacity(&mut snapshot, prior);
        }
        self.set_unit_costs(&mut snapshot, year)?;
        self.set_demand(&mut snapshot, year, stage_dir)?;
        self.set_emissions_cap(&mut snapshot, year)?;

        // Must come last: it only applies if the template leaves the ceiling blank
        self.set_investment_ceiling(&mut snapshot, year)?;

        Ok(snapshot)
    }

    fn set_stage_duration(&self, snapshot: &mut ScenarioSnapshot) {
        let keys = &self.config.scenario_keys;
        set_cell(
            snapshot,
            &keys.block,
            &keys.duration_key,
            self.config.stage_duration_years,
        );
    }

    /// Carry forward the capacity installed by the previous stage
    fn link_existing_capacity(&self, snapshot: &mut ScenarioSnapshot, prior: &StageResult) {
        for block in &self.config.investable_blocks {
            let Some(capacity) = prior.blocks.get(&block.name) else {
                continue;
            };

            if block.is_bidirectional() {
                if let Some(total) = capacity.total {
                    set_cell(snapshot, &block.name, SIZE_G2S_EXISTING_KEY, total);
                }
                if let Some(total) = capacity.export_total {
                    set_cell(snapshot, &block.name, SIZE_S2G_EXISTING_KEY, total);
                }
            } else if let Some(total) = capacity.total {
                set_cell(snapshot, &block.name, &block.size_param, total);
            }
        }
    }

    fn set_unit_costs(&self, snapshot: &mut ScenarioSnapshot, year: u32) -> Result<()> {
        for tech in self.config.tech_costs.keys() {
            let cost = self.config.unit_cost(tech, year)?;
            for block in &self.config.investable_blocks {
                if !block.uses_technology(tech) {
                    continue;
                }

                match &block.cost_param {
                    Some(param) => set_cell(snapshot, &block.name, param, cost),
                    None => warn!(
                        "Block {} uses technology {tech} but has no cost parameter",
                        block.name
                    ),
                }
            }
        }

        Ok(())
    }

    fn set_demand(
        &self,
        snapshot: &mut ScenarioSnapshot,
        year: u32,
        stage_dir: &Path,
    ) -> Result<()> {
        let demand = &self.config.demand;
        if year <= demand.base_year || demand.annual_growth_rate <= 0.0 {
            return Ok(());
        }

        let fleet_size = self.config.fleet_size(year)?;
        let growth_factor = demand.growth_factor(year)?;
        for block in &self.config.demand_blocks {
            set_cell(snapshot, &block.name, &block.size_param, fleet_size);

            if let Some(param) = &block.consumption_param {
                match snapshot.get_f64(block.name.as_str(), param) {
                    Some(consumption) => {
                        set_cell(snapshot, &block.name, param, consumption * growth_factor);
                    }
                    None => warn!(
                        "{}.{param} is not a number, so cannot be scaled for fleet growth",
                        block.name
                    ),
                }
            }

            if fleet_size > demand.base_fleet_size {
                self.scale_usage_log(snapshot, block, year, fleet_size, stage_dir)?;
            }
        }

        Ok(())
    }

    /// Write a usage log for the grown fleet and point the scenario at it
    fn scale_usage_log(
        &self,
        snapshot: &mut ScenarioSnapshot,
        block: &DemandBlock,
        year: u32,
        fleet_size: u32,
        stage_dir: &Path,
    ) -> Result<()> {
        let (Some(param), Some(base)) = (&block.log_param, self.base_logs.get(&block.name)) else {
            return Ok(());
        };

        let scaled = scale(
            &base.log,
            self.config.demand.base_fleet_size,
            fleet_size,
            self.config.fleet_log.seed,
        )?;
        fs::create_dir_all(stage_dir)?;
        let file_path = stage_dir.join(format!("{}_log_{year}.csv", block.name));
        scaled
            .write_csv(&file_path)
            .with_context(|| format!("Could not write scaled usage log for {}", block.name))?;
        info!(
            "Scaled usage log {} to {fleet_size} vehicles: {}",
            base.path.display(),
            file_path.display()
        );

        let file_path = fs::canonicalize(&file_path).unwrap_or(file_path);
        set_cell(
            snapshot,
            &block.name,
            param,
            CellValue::Text(file_path.to_string_lossy().into_owned()),
        );

        Ok(())
    }

    fn set_emissions_cap(&self, snapshot: &mut ScenarioSnapshot, year: u32) -> Result<()> {
        let limit = self.config.emissions_limit(year)?;
        if limit >= UNBOUNDED_EMISSIONS_LIMIT {
            debug!("No emissions cap for {year}");
            return Ok(());
        }

        let keys = &self.config.scenario_keys;
        set_cell(snapshot, &keys.block, &keys.emissions_cap_key, limit);

        Ok(())
    }

    fn set_investment_ceiling(&self, snapshot: &mut ScenarioSnapshot, year: u32) -> Result<()> {
        let keys = &self.config.scenario_keys;
        if !snapshot.is_unset(keys.block.as_str(), &keys.investment_ceiling_key) {
            debug!("Using investment ceiling from scenario template");
            return Ok(());
        }

        let ceiling = investment_ceiling(self.config, year)?;
        set_cell(snapshot, &keys.block, &keys.investment_ceiling_key, ceiling);

        Ok(())
    }
}

/// The maximum investment allowed in a single stage.
///
/// This is the fleet's energy demand over the stage multiplied by the budget per kWh.
pub fn investment_ceiling(config: &Config, year: u32) -> Result<f64> {
    let fleet_size = config.fleet_size(year)?;
    Ok(f64::from(fleet_size)
        * config.demand.energy_per_vehicle_kwh
        * config.invest_budget_per_kwh
        * f64::from(config.stage_duration_years))
}

fn set_cell<V: Into<CellValue>>(
    snapshot: &mut ScenarioSnapshot,
    block: &BlockID,
    key: &str,
    value: V,
) {
    let value = value.into();
    debug!("Setting {block}.{key} = {value}");
    snapshot.set(block, key, value);
}

/// Read the usage log for each demand block which names one
fn read_base_logs(
    config: &Config,
    snapshot: &ScenarioSnapshot,
) -> Result<IndexMap<BlockID, BaseUsageLog>> {
    let log_dir = config
        .fleet_log
        .input_dir
        .as_deref()
        .unwrap_or(Path::new("."));

    let mut logs = IndexMap::new();
    for block in &config.demand_blocks {
        let Some(param) = &block.log_param else {
            continue;
        };
        let Some(file_name) = snapshot.get(block.name.as_str(), param).map(ToString::to_string)
        else {
            return Err(validation_err!(
                "Scenario has no {}.{param} naming the usage log",
                block.name
            ));
        };
        if file_name.is_empty() {
            Err(validation_err!("{}.{param} is blank", block.name))?;
        }

        let path = resolve_path(log_dir, Path::new(&file_name));
        let log = UsageLog::from_path(&path)?;
        let base_n = config.demand.base_fleet_size;
        if log.vehicle_count() != base_n as usize {
            Err(validation_err!(
                "Usage log {} has {} vehicles but the base fleet has {base_n}",
                path.display(),
                log.vehicle_count()
            ))?;
        }

        logs.insert(block.name.clone(), BaseUsageLog { path, log });
    }

    Ok(logs)
}
