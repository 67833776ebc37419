//! The sequential stage orchestrator, which runs every stage in turn.
//!
//! Each stage's scenario depends on the previous stage's result, so stages are run one at a time
//! in ascending year order. The run stops at the first infeasible stage and aborts on any error.
use crate::config::Config;
use crate::id::BlockID;
use crate::optimizer::Optimizer;
use crate::output::{format_capacity, format_money, format_trajectory};
use crate::results::{BlockCapacity, ResultsParser, StageResult};
use crate::scenario::ScenarioBuilder;
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stage results, keyed by year
pub type StageResultMap = BTreeMap<u32, StageResult>;

/// Where the orchestrator has got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No stage has run yet
    Pending,
    /// The stage for this year is running
    Running(u32),
    /// The stage for this year was infeasible, so no later stages were run
    InfeasibleStop(u32),
    /// A stage failed with an error
    Error,
    /// All stages completed
    Done,
}

/// One row of the investment timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    /// Stage year
    pub year: u32,
    /// Capacity of each investable block
    pub blocks: IndexMap<BlockID, BlockCapacity>,
    /// Capital expenditure
    pub capex: Option<f64>,
    /// Net present value
    pub npv: Option<f64>,
    /// Discount factor for the stage
    pub discount_factor: f64,
    /// Discounted net present value
    pub npv_discounted: Option<f64>,
}

impl From<&StageResult> for TimelineRow {
    fn from(result: &StageResult) -> Self {
        Self {
            year: result.year,
            blocks: result.blocks.clone(),
            capex: result.capex,
            npv: result.npv,
            discount_factor: result.discount_factor,
            npv_discounted: result.npv_discounted,
        }
    }
}

/// Metrics across all stages of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunAggregate {
    /// Sum of discounted NPVs (missing values count as zero)
    pub total_npv_discounted: f64,
    /// Sum of CAPEX (missing values count as zero)
    pub total_capex: f64,
    /// One row per stage, in year order
    pub timeline: Vec<TimelineRow>,
    /// All stage results
    pub results: StageResultMap,
}

impl RunAggregate {
    /// Aggregate the results of all stages
    pub fn from_results(results: StageResultMap) -> Self {
        let total_npv_discounted = results
            .values()
            .filter_map(|result| result.npv_discounted)
            .sum();
        let total_capex = results.values().filter_map(|result| result.capex).sum();
        let timeline = results.values().map(TimelineRow::from).collect();

        Self {
            total_npv_discounted,
            total_capex,
            timeline,
            results,
        }
    }
}

/// How a run ended, if it didn't end with an error
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every stage was solved
    Completed(RunAggregate),
    /// A stage had no solution
    Infeasible {
        /// The infeasible stage
        year: u32,
        /// Results of the stages run so far, including the infeasible one
        results: StageResultMap,
    },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(_) => write!(f, "completed"),
            Self::Infeasible { year, .. } => write!(f, "failed: infeasible at stage {year}"),
        }
    }
}

/// Runs every stage in turn, feeding each stage's result into the next
pub struct StageOrchestrator<'a, O: Optimizer> {
    config: &'a Config,
    builder: ScenarioBuilder<'a>,
    parser: ResultsParser<'a>,
    optimizer: O,
    stages_dir: PathBuf,
    state: RunState,
    results: StageResultMap,
}

impl<'a, O: Optimizer> StageOrchestrator<'a, O> {
    /// Create a new orchestrator.
    ///
    /// # Arguments
    ///
    /// * `config` - Planning configuration
    /// * `builder` - Builds each stage's scenario
    /// * `optimizer` - Solves each stage
    /// * `stages_dir` - Folder for files generated for individual stages
    pub fn new(
        config: &'a Config,
        builder: ScenarioBuilder<'a>,
        optimizer: O,
        stages_dir: &Path,
    ) -> Self {
        Self {
            config,
            builder,
            parser: ResultsParser::new(config),
            optimizer,
            stages_dir: stages_dir.to_path_buf(),
            state: RunState::Pending,
            results: StageResultMap::new(),
        }
    }

    /// The current state of the run
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Results of the stages completed so far
    pub fn results(&self) -> &StageResultMap {
        &self.results
    }

    /// Consume the orchestrator, returning its optimiser
    pub fn into_optimizer(self) -> O {
        self.optimizer
    }

    /// Run all stages.
    ///
    /// # Returns
    ///
    /// The run's outcome. Errors from any stage abort the run, leaving the results gathered so far
    /// available from [`StageOrchestrator::results`].
    pub fn run(&mut self) -> Result<RunOutcome> {
        ensure!(
            self.state == RunState::Pending,
            "Run has already been started"
        );

        let num_stages = self.config.stages.len();
        let mut previous_year = None;
        for (idx, year) in self.config.iter_stages().enumerate() {
            self.state = RunState::Running(year);
            info!("Stage {}/{num_stages}: {year}", idx + 1);

            let result = match self.run_stage(year, previous_year) {
                Ok(result) => result,
                Err(err) => {
                    self.state = RunState::Error;
                    return Err(err);
                }
            };
            log_stage_summary(self.config, &result);
            for line in format_trajectory(self.config, &self.results) {
                info!("{line}");
            }

            if result.is_infeasible() {
                self.state = RunState::InfeasibleStop(year);
                log_infeasibility_diagnostic(self.config, year);
                return Ok(RunOutcome::Infeasible {
                    year,
                    results: self.results.clone(),
                });
            }

            previous_year = Some(year);
        }

        self.state = RunState::Done;
        let aggregate = RunAggregate::from_results(self.results.clone());
        info!(
            "Total discounted NPV: {}",
            format_money(Some(aggregate.total_npv_discounted))
        );
        info!("Total CAPEX: {}", format_money(Some(aggregate.total_capex)));

        Ok(RunOutcome::Completed(aggregate))
    }

    /// Build, solve and parse a single stage, storing the result
    fn run_stage(&mut self, year: u32, previous_year: Option<u32>) -> Result<StageResult> {
        let prior = previous_year.and_then(|year| self.results.get(&year));
        let scenario = self.builder.build(year, prior, &self.stages_dir)?;
        let result_dir = self.optimizer.run(&scenario, year)?;
        let result = self.parser.parse(&result_dir, year)?;
        self.results.insert(year, result.clone());

        Ok(result)
    }
}

fn log_stage_summary(config: &Config, result: &StageResult) {
    info!("Stage {} finished with status: {}", result.year, result.status);
    if result.is_infeasible() {
        return;
    }

    info!("  NPV: {}", format_money(result.npv));
    info!(
        "  NPV (discounted, factor {:.4}): {}",
        result.discount_factor,
        format_money(result.npv_discounted)
    );
    info!("  CAPEX: {}", format_money(result.capex));
    info!("  OPEX: {}", format_money(result.opex));
    for block in &config.investable_blocks {
        let Some(capacity) = result.blocks.get(&block.name) else {
            continue;
        };
        info!(
            "  {}: {} total, {} added",
            block.name,
            format_capacity(block.kind, capacity.total),
            format_capacity(block.kind, capacity.added)
        );
        if block.is_bidirectional() {
            info!(
                "  {} (export): {} total",
                block.name,
                format_capacity(block.kind, capacity.export_total)
            );
        }
    }
    if let Some(co2) = result.co2_stage_kg {
        info!("  CO2 over stage: {co2:.0} kg");
    }
}

/// Suggest ways of making an infeasible stage feasible
fn log_infeasibility_diagnostic(config: &Config, year: u32) {
    warn!("Stage {year} is infeasible, so later stages were not run");
    match config.emissions_limit(year) {
        Ok(limit) if limit < crate::pathway::UNBOUNDED_EMISSIONS_LIMIT => warn!(
            "  - Increase the CO2 limit (currently {limit:.0} kg in {year}) or choose a less \
            strict emissions pathway"
        ),
        _ => {}
    }
    warn!(
        "  - Reduce the fleet growth rate (currently {:.1}% per year)",
        config.demand.annual_growth_rate * 100.0
    );
    warn!("  - Relax the technology cost assumptions or the investment budget");
    warn!("  - Check the scenario template for other binding constraints");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanningError;
    use crate::fixture::{config, template, write_result_dir};
    use crate::scenario::{ScenarioSnapshot, ScenarioTemplate};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};

    /// What the fake optimiser should do for a stage
    enum FakeStage {
        Solved(String),
        Infeasible,
        Fail,
    }

    /// An optimiser which writes canned results
    struct FakeOptimizer {
        dir: TempDir,
        stages: HashMap<u32, FakeStage>,
        scenarios: Vec<(u32, ScenarioSnapshot)>,
    }

    impl FakeOptimizer {
        fn new(stages: impl IntoIterator<Item = (u32, FakeStage)>) -> Self {
            Self {
                dir: tempdir().unwrap(),
                stages: stages.into_iter().collect(),
                scenarios: Vec::new(),
            }
        }
    }

    impl Optimizer for FakeOptimizer {
        fn run(&mut self, scenario: &ScenarioSnapshot, year: u32) -> Result<PathBuf> {
            self.scenarios.push((year, scenario.clone()));
            let name = format!("stage_{year}");
            match &self.stages[&year] {
                FakeStage::Solved(summary) => Ok(write_result_dir(
                    self.dir.path(),
                    &name,
                    Some("ok"),
                    Some(summary),
                )),
                FakeStage::Infeasible => Ok(write_result_dir(
                    self.dir.path(),
                    &name,
                    Some("infeasible"),
                    None,
                )),
                FakeStage::Fail => Err(PlanningError::OptimizerFailed {
                    year,
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "solver crashed".into(),
                }
                .into()),
            }
        }
    }

    fn summary(pv_total: f64, npv: f64, capex: f64) -> FakeStage {
        FakeStage::Solved(format!(
            "Block,Key,base\nscenario,npv,{npv}\nscenario,capex_prj,{capex}\n\
            pv,size_total,{pv_total}\npv,size_additional,{pv_total}\n"
        ))
    }

    fn run_with(
        config: &Config,
        template: ScenarioTemplate,
        optimizer: FakeOptimizer,
    ) -> (Result<RunOutcome>, RunState, StageResultMap, FakeOptimizer) {
        let dir = tempdir().unwrap();
        let builder = ScenarioBuilder::new(config, template, None).unwrap();
        let mut orchestrator = StageOrchestrator::new(config, builder, optimizer, dir.path());
        assert_eq!(orchestrator.state(), RunState::Pending);
        let outcome = orchestrator.run();
        let state = orchestrator.state();
        let results = orchestrator.results().clone();
        (outcome, state, results, orchestrator.into_optimizer())
    }

    #[rstest]
    fn test_run_completed(config: Config, template: ScenarioTemplate) {
        let optimizer = FakeOptimizer::new([
            (2025, summary(100_000.0, 1000.0, 500.0)),
            (2030, summary(150_000.0, 1000.0, 200.0)),
            (2035, summary(150_000.0, 2000.0, 0.0)),
        ]);
        let (outcome, state, results, optimizer) = run_with(&config, template, optimizer);

        assert_eq!(state, RunState::Done);
        assert_eq!(results.len(), 3);
        let RunOutcome::Completed(aggregate) = outcome.unwrap() else {
            panic!("Run should have completed");
        };
        assert_approx_eq!(f64, aggregate.total_capex, 700.0);
        // 1000 + 1000 * 1.08^-5 + 2000 * 1.08^-10
        assert_approx_eq!(
            f64,
            aggregate.total_npv_discounted,
            1000.0 + 680.583_197 + 926.386_977,
            epsilon = 1e-3
        );
        assert_eq!(
            aggregate.timeline.iter().map(|row| row.year).collect::<Vec<_>>(),
            [2025, 2030, 2035]
        );

        // Each stage starts from the capacity installed by the one before
        let pv_existing = optimizer
            .scenarios
            .iter()
            .map(|(_, s)| s.get_f64("pv", "size_existing").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(pv_existing, [0.0, 100_000.0, 150_000.0]);
    }

    #[rstest]
    fn test_run_infeasible_stops_early(config: Config, template: ScenarioTemplate) {
        let optimizer = FakeOptimizer::new([
            (2025, summary(100_000.0, 1000.0, 500.0)),
            (2030, FakeStage::Infeasible),
            (2035, summary(150_000.0, 2000.0, 0.0)),
        ]);
        let (outcome, state, results, optimizer) = run_with(&config, template, optimizer);

        assert_eq!(state, RunState::InfeasibleStop(2030));
        let outcome = outcome.unwrap();
        assert_eq!(outcome.to_string(), "failed: infeasible at stage 2030");
        let RunOutcome::Infeasible { year, results: reported } = outcome else {
            panic!("Run should have been infeasible");
        };
        assert_eq!(year, 2030);
        assert_eq!(reported, results);
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), [2025, 2030]);
        assert!(results[&2030].is_infeasible());
        assert_eq!(results[&2030].npv, None);
        // Stage 3 is never attempted
        assert_eq!(optimizer.scenarios.len(), 2);
    }

    #[rstest]
    fn test_run_error_aborts(config: Config, template: ScenarioTemplate) {
        let optimizer = FakeOptimizer::new([
            (2025, summary(100_000.0, 1000.0, 500.0)),
            (2030, FakeStage::Fail),
        ]);
        let (outcome, state, results, optimizer) = run_with(&config, template, optimizer);

        assert_eq!(state, RunState::Error);
        let err = outcome.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::OptimizerFailed { year: 2030, .. })
        ));
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), [2025]);
        assert_eq!(optimizer.scenarios.len(), 2);
    }

    #[rstest]
    fn test_run_twice(config: Config, template: ScenarioTemplate) {
        let dir = tempdir().unwrap();
        let optimizer = FakeOptimizer::new([
            (2025, summary(1.0, 1.0, 1.0)),
            (2030, summary(1.0, 1.0, 1.0)),
            (2035, summary(1.0, 1.0, 1.0)),
        ]);
        let builder = ScenarioBuilder::new(&config, template, None).unwrap();
        let mut orchestrator = StageOrchestrator::new(&config, builder, optimizer, dir.path());
        orchestrator.run().unwrap();
        assert!(orchestrator.run().is_err());
    }

    #[test]
    fn test_aggregate_treats_missing_as_zero() {
        let mut first = StageResult::infeasible(2025, 1.0, std::iter::empty::<&BlockID>());
        first.npv_discounted = Some(10.0);
        first.capex = Some(5.0);
        let second = StageResult::infeasible(2030, 0.5, std::iter::empty::<&BlockID>());
        let results: StageResultMap = [(2030, second), (2025, first)].into_iter().collect();

        let aggregate = RunAggregate::from_results(results);
        assert_approx_eq!(f64, aggregate.total_npv_discounted, 10.0);
        assert_approx_eq!(f64, aggregate.total_capex, 5.0);
        assert_eq!(aggregate.timeline[0].year, 2025);
        assert_eq!(aggregate.timeline[1].npv_discounted, None);
    }
}
