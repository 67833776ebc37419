//! Fixtures for tests
use crate::config::Config;
use crate::fleet::UsageLog;
use crate::scenario::ScenarioTemplate;
use rstest::fixture;
use std::fs;
use std::path::{Path, PathBuf};

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A three-stage planning configuration with PV, storage, a grid connection and one fleet
pub const CONFIG_TOML: &str = r#"
[stages]
years = [2025, 2030, 2035]
duration_years = 5

[technology_costs.pv]
base_year = 2025
base_cost = 1.0
annual_decline_rate = 0.05

[technology_costs.ess]
base_year = 2025
base_cost = 0.5
annual_decline_rate = 0.08

[demand]
base_year = 2025
base_fleet_size = 10
annual_growth_rate = 0.1

[emissions]
pathway = "linear"
base_year = 2025
base_limit_kg = 500.0
final_year = 2050
final_limit_kg = 100.0

[economics]
wacc = 0.08

[scenario]
template = "scenarios.csv"

[[blocks.investable]]
name = "pv"
kind = "generator"
cost_param = "capex_spec"

[[blocks.investable]]
name = "ess"
kind = "storage"
cost_param = "capex_spec"

[[blocks.investable]]
name = "grid"
kind = "grid"

[[blocks.demand]]
name = "bev"
size_param = "num"
consumption_param = "consumption_yrl"
log_param = "filename"

[optimizer]
command = ["python3", "-m", "revoletion.main"]
settings_path = "settings.csv"
timeout_secs = 600
"#;

/// A scenario template matching [`CONFIG_TOML`], with two scenario columns
pub const TEMPLATE_CSV: &str = "\
block,key,base,high_pv
scenario,prj_duration,25,25
scenario,co2_max,,
scenario,invest_max,,
scenario,compensate_sim_prj,True,True
pv,size_existing,0,50000
pv,capex_spec,1.2,1.2
ess,size_existing,0,0
ess,capex_spec,0.6,0.6
grid,size_g2s_existing,10000,10000
grid,size_s2g_existing,0,0
bev,num,10,10
bev,consumption_yrl,150000,150000
bev,filename,bev_log.csv,bev_log.csv
";

/// A usage log for two vehicles over three time steps
pub const USAGE_LOG_CSV: &str = "\
time,bev0,bev0,bev0,bev1,bev1,bev1
,atbase,consumption,tour_dist,atbase,consumption,tour_dist
2025-01-01 00:00,True,0,0,False,0,12000
2025-01-01 00:15,False,1500,0,True,2500,0
2025-01-01 00:30,True,0,8000,True,0,0
";

#[fixture]
pub fn config() -> Config {
    Config::from_toml_str(CONFIG_TOML, Path::new("/cfg")).unwrap()
}

#[fixture]
pub fn template() -> ScenarioTemplate {
    ScenarioTemplate::from_reader(TEMPLATE_CSV.as_bytes()).unwrap()
}

#[fixture]
pub fn usage_log() -> UsageLog {
    UsageLog::from_reader(USAGE_LOG_CSV.as_bytes()).unwrap()
}

/// Create an optimiser result folder called `name` inside `parent`.
///
/// The status file is only written if `status` is given and the summary file only if `summary`
/// is given.
pub fn write_result_dir(
    parent: &Path,
    name: &str,
    status: Option<&str>,
    summary: Option<&str>,
) -> PathBuf {
    let dir = parent.join(name);
    fs::create_dir_all(&dir).unwrap();
    if let Some(status) = status {
        fs::write(
            dir.join(format!("{name}_scenarios_status.csv")),
            format!("scenario,status\n{name},{status}\n"),
        )
        .unwrap();
    }
    if let Some(summary) = summary {
        fs::write(dir.join(format!("{name}_summary.csv")), summary).unwrap();
    }

    dir
}
