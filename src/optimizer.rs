//! Running the external optimiser for a single stage.
//!
//! The orchestrator only depends on the [`Optimizer`] trait. [`SubprocessOptimizer`] implements it
//! by writing the scenario to disk and running the optimiser as a child process.
use crate::config::OptimizerSettings;
use crate::error::{PlanningError, missing_output_err};
use crate::input::{input_err_msg, resolve_path};
use crate::scenario::ScenarioSnapshot;
use anyhow::{Context, Result, bail, ensure};
use log::{debug, info};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// How often to check whether the optimiser has finished
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Settings key for the folder the optimiser writes results to
const OUTPUT_PATH_KEY: &str = "path_output_data";

/// Settings key for the folder the optimiser reads input data from
const INPUT_PATH_KEY: &str = "path_input_data";

/// Name of the folder under the run folder where the optimiser writes results
pub const OPTIMIZER_OUTPUT_DIR_NAME: &str = "optimizer";

/// Name of the folder under the run folder for per-stage files
pub const STAGES_DIR_NAME: &str = "stages";

/// Solves the problem for a single stage
pub trait Optimizer {
    /// Run the optimiser on the scenario for one stage.
    ///
    /// # Returns
    ///
    /// The folder containing the optimiser's results.
    fn run(&mut self, scenario: &ScenarioSnapshot, year: u32) -> Result<PathBuf>;
}

/// Runs the optimiser as a child process, one process per stage.
///
/// Every run gets its own copy of the optimiser's settings file, pointing the optimiser's output
/// at a folder inside the run folder.
pub struct SubprocessOptimizer {
    settings: OptimizerSettings,
    run_settings_path: PathBuf,
    output_root: PathBuf,
    stages_dir: PathBuf,
}

impl SubprocessOptimizer {
    /// Prepare to run the optimiser, with all output under `run_dir`
    pub fn new(settings: &OptimizerSettings, run_dir: &Path) -> Result<Self> {
        let output_root = run_dir.join(OPTIMIZER_OUTPUT_DIR_NAME);
        let stages_dir = run_dir.join(STAGES_DIR_NAME);
        fs::create_dir_all(&output_root)?;
        fs::create_dir_all(&stages_dir)?;

        let run_settings_path = run_dir.join("settings.csv");
        write_run_settings(&settings.settings_path, &output_root, &run_settings_path)?;
        info!(
            "Optimiser results will be written to {}",
            output_root.display()
        );

        Ok(Self {
            settings: settings.clone(),
            run_settings_path,
            output_root,
            stages_dir,
        })
    }

    /// Folder for per-stage files (scenarios and logs)
    pub fn stages_dir(&self) -> &Path {
        &self.stages_dir
    }

    fn spawn(&self, scenario_path: &Path, year: u32) -> Result<(Child, PathBuf, PathBuf)> {
        let stdout_path = self.stages_dir.join(format!("optimizer_{year}.stdout.log"));
        let stderr_path = self.stages_dir.join(format!("optimizer_{year}.stderr.log"));
        let stdout_file = File::create(&stdout_path)?;
        let stderr_file = File::create(&stderr_path)?;

        let (program, args) = self
            .settings
            .command
            .split_first()
            .context("Optimiser command is empty")?;
        debug!(
            "Running {} --settings {} --scenario {}",
            self.settings.command.join(" "),
            self.run_settings_path.display(),
            scenario_path.display()
        );
        let child = Command::new(program)
            .args(args)
            .arg("--settings")
            .arg(&self.run_settings_path)
            .arg("--scenario")
            .arg(scenario_path)
            .current_dir(&self.settings.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .with_context(|| format!("Could not start optimiser: {program}"))?;

        Ok((child, stdout_path, stderr_path))
    }
}

impl Optimizer for SubprocessOptimizer {
    fn run(&mut self, scenario: &ScenarioSnapshot, year: u32) -> Result<PathBuf> {
        let scenario_path = self.stages_dir.join(format!("scenario_stage_{year}.csv"));
        scenario.write_csv(&scenario_path)?;
        info!("Running optimiser for stage {year}");

        // Result folders from earlier stages must not be mistaken for this stage's
        let earlier_dirs = output_dirs(&self.output_root)?;
        let (mut child, stdout_path, stderr_path) = self.spawn(&scenario_path, year)?;
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let Some(status) = wait_with_timeout(&mut child, timeout)? else {
            return Err(PlanningError::Timeout {
                year,
                secs: self.settings.timeout_secs,
            }
            .into());
        };

        if !status.success() {
            Err(PlanningError::OptimizerFailed {
                year,
                code: status.code(),
                stdout: fs::read_to_string(&stdout_path).unwrap_or_default(),
                stderr: fs::read_to_string(&stderr_path).unwrap_or_default(),
            })?;
        }

        let result_dir = latest_output_dir(&self.output_root, &earlier_dirs)?;
        info!("Stage {year} results: {}", result_dir.display());

        Ok(result_dir)
    }
}

/// Wait for a child process to exit, killing it if it takes longer than `timeout`.
///
/// # Returns
///
/// The exit status, or `None` if the process timed out.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let started_at = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started_at.elapsed() >= timeout {
            child.kill().ok();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Write a copy of the optimiser's settings file for this run.
///
/// The output path is pointed at `output_dir` (adding it if missing) and a relative input path is
/// made absolute, relative to the original settings file.
pub fn write_run_settings(settings_path: &Path, output_dir: &Path, dest: &Path) -> Result<()> {
    let mut reader =
        csv::Reader::from_path(settings_path).with_context(|| input_err_msg(settings_path))?;
    let headers = reader.headers()?.clone();
    let key_idx = headers.iter().position(|h| h == "key");
    let value_idx = headers.iter().position(|h| h == "value");
    let (Some(key_idx), Some(value_idx)) = (key_idx, value_idx) else {
        bail!(
            "{} must have key and value columns",
            settings_path.display()
        );
    };

    let settings_dir = settings_path.parent().unwrap_or(Path::new("."));
    let output_dir = fs::canonicalize(output_dir).unwrap_or_else(|_| output_dir.to_path_buf());
    let output_value = output_dir.to_string_lossy();
    let mut found_output = false;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| input_err_msg(settings_path))?;
        let mut row: Vec<String> = record.iter().map(String::from).collect();
        ensure!(
            row.len() > key_idx.max(value_idx),
            "Malformed row in {}",
            settings_path.display()
        );
        match row[key_idx].as_str() {
            OUTPUT_PATH_KEY => {
                row[value_idx] = output_value.to_string();
                found_output = true;
            }
            INPUT_PATH_KEY if !Path::new(&row[value_idx]).is_absolute() => {
                let input_dir = resolve_path(settings_dir, Path::new(&row[value_idx]));
                let input_dir = fs::canonicalize(&input_dir).unwrap_or(input_dir);
                row[value_idx] = input_dir.to_string_lossy().into_owned();
            }
            _ => {}
        }
        rows.push(row);
    }
    if !found_output {
        let mut row = vec![String::new(); headers.len()];
        row[key_idx] = OUTPUT_PATH_KEY.to_string();
        row[value_idx] = output_value.to_string();
        rows.push(row);
    }

    let mut writer = csv::Writer::from_path(dest)
        .with_context(|| format!("Could not create {}", dest.display()))?;
    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}

/// List the folders inside `output_root`
fn output_dirs(output_root: &Path) -> Result<HashSet<PathBuf>> {
    let mut dirs = HashSet::new();
    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.insert(entry.path());
        }
    }

    Ok(dirs)
}

/// Find the most recently modified folder inside `output_root`, ignoring those in `exclude`
pub fn latest_output_dir(output_root: &Path, exclude: &HashSet<PathBuf>) -> Result<PathBuf> {
    let entries = fs::read_dir(output_root).map_err(|err| {
        missing_output_err!("Could not read {}: {err}", output_root.display())
    })?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let path = entry.path();
        if exclude.contains(&path) {
            continue;
        }
        let modified = metadata.modified()?;
        if latest.as_ref().is_none_or(|(newest, _)| modified >= *newest) {
            latest = Some((modified, path));
        }
    }

    latest.map(|(_, path)| path).ok_or_else(|| {
        missing_output_err!(
            "The optimiser produced no new result folder in {}",
            output_root.display()
        )
    })
}
