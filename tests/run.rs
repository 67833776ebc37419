//! Integration tests for the `run` command.
#![cfg(unix)]
use std::fs;
use std::path::Path;
use stride::cli::{RunOpts, handle_run_command};
use stride::settings::Settings;
use tempfile::tempdir;

/// Stands in for the optimiser: adds 50 kW of PV at every stage and reports success
const FAKE_OPTIMIZER: &str = r#"
while [ $# -gt 0 ]; do
    case "$1" in
        --settings) settings="$2"; shift 2 ;;
        --scenario) scenario="$2"; shift 2 ;;
        *) shift ;;
    esac
done
out=$(grep '^path_output_data,' "$settings" | cut -d, -f2-)
year=$(basename "$scenario" .csv | sed 's/^scenario_stage_//')
existing=$(grep '^pv,size_existing,' "$scenario" | cut -d, -f3)
name="run_$year"
mkdir -p "$out/$name"
printf 'scenario,status\nbase,ok\n' > "$out/$name/${name}_scenarios_status.csv"
total=$(( ${existing%.*} + 50000 ))
printf 'Block,Key,base\nscenario,npv,1000\nscenario,capex_prj,500\npv,size_total,%s\npv,size_additional,50000\n' \
    "$total" > "$out/$name/${name}_summary.csv"
echo "solved stage $year"
"#;

const TEMPLATE_CSV: &str = "\
block,key,base
scenario,prj_duration,25
scenario,co2_max,
scenario,invest_max,
pv,size_existing,0
pv,capex_spec,1.2
bev,num,10
";

/// Write a two-stage configuration using the fake optimiser into `dir`
fn write_inputs(dir: &Path) -> std::path::PathBuf {
    fs::write(dir.join("optimizer.sh"), FAKE_OPTIMIZER).unwrap();
    fs::write(dir.join("scenarios.csv"), TEMPLATE_CSV).unwrap();
    fs::write(dir.join("settings.csv"), "key,value\nsolver,cbc\n").unwrap();

    let config = r#"
[stages]
years = [2025, 2030]
duration_years = 5

[technology_costs.pv]
base_year = 2025
base_cost = 1.0
annual_decline_rate = 0.05

[demand]
base_year = 2025
base_fleet_size = 10
annual_growth_rate = 0.1

[emissions]
pathway = "none"

[economics]
wacc = 0.08

[scenario]
template = "scenarios.csv"

[[blocks.investable]]
name = "pv"
kind = "generator"
cost_param = "capex_spec"

[[blocks.demand]]
name = "bev"
size_param = "num"

[optimizer]
command = ["sh", "optimizer.sh"]
settings_path = "settings.csv"
timeout_secs = 60
"#;
    let config_path = dir.join("depot.toml");
    fs::write(&config_path, config).unwrap();

    config_path
}

/// An integration test for the `run` command.
#[test]
fn test_handle_run_command() {
    unsafe { std::env::set_var("STRIDE_LOG_LEVEL", "off") };

    let input_dir = tempdir().unwrap();
    let config_path = write_inputs(input_dir.path());

    // Save results to non-existent directory to check that directory creation works
    let output_root = tempdir().unwrap();
    let output_dir = output_root.path().join("results");
    let opts = RunOpts {
        output_dir: Some(output_dir.clone()),
        ..Default::default()
    };
    handle_run_command(&config_path, &opts, Some(Settings::default())).unwrap();

    // The second stage starts from the PV installed in the first
    let scenario = fs::read_to_string(output_dir.join("stages/scenario_stage_2030.csv")).unwrap();
    assert!(scenario.starts_with("block,key,base\n"));
    assert!(scenario.contains("pv,size_existing,50000\n"));
    assert!(scenario.contains("bev,num,16\n"));
    assert_eq!(
        fs::read_to_string(output_dir.join("stages/optimizer_2025.stdout.log")).unwrap(),
        "solved stage 2025\n"
    );

    let timeline = fs::read_to_string(output_dir.join("investment_timeline.csv")).unwrap();
    let lines: Vec<_> = timeline.lines().collect();
    assert_eq!(
        lines[0],
        "year,pv_total,pv_added,capex,npv,discount_factor,npv_discounted"
    );
    assert!(lines[1].starts_with("2025,50000,50000,500,1000,1,1000"));
    assert!(lines[2].starts_with("2030,100000,50000,500,1000,"));

    let stage_results: toml::Table =
        toml::from_str(&fs::read_to_string(output_dir.join("stage_results.toml")).unwrap())
            .unwrap();
    assert_eq!(stage_results["2030"]["status"].as_str(), Some("ok"));

    let run_settings = fs::read_to_string(output_dir.join("settings.csv")).unwrap();
    assert!(run_settings.contains("path_output_data,"));
    assert!(output_dir.join("stride_info.log").is_file());

    // The output folder is now in use, so running again without --overwrite fails
    let err = handle_run_command(&config_path, &opts, Some(Settings::default())).unwrap_err();
    assert!(
        err.chain()
            .next()
            .unwrap()
            .to_string()
            .starts_with("Failed to create output directory")
    );
}
