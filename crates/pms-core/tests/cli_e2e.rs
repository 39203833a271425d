//! End-to-end tests for the pms-core binary.
//!
//! Every test points `--config` at a small settings file so runs stay fast
//! and never pick up a settings file from the host.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn pms_core() -> Command {
    let mut cmd = Command::cargo_bin("pms-core").expect("failed to find pms-core binary");
    cmd.env_remove("PMS_SETTINGS")
        .env_remove("PMS_LOG")
        .arg("--config")
        .arg(fixture("settings_fast.json"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

mod basics {
    use super::*;

    #[test]
    fn version_reports_schema_versions() {
        let out = json_stdout(pms_core().arg("version"));
        assert!(out["pms_core_version"].is_string());
        assert_eq!(out["scenario_schema_version"], "1.0.0");
    }

    #[test]
    fn help_exits_zero() {
        pms_core()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("utility"));
    }

    #[test]
    fn unknown_subcommand_is_args_error() {
        pms_core().arg("frobnicate").assert().code(10);
    }

    #[test]
    fn missing_required_budget_is_args_error() {
        pms_core()
            .args(["plan", "--scenario"])
            .arg(fixture("scenario_eight.json"))
            .assert()
            .code(10)
            .stderr(predicate::str::contains("--budget"));
    }
}

mod check {
    use super::*;

    #[test]
    fn check_reports_settings_source() {
        let out = json_stdout(pms_core().arg("check"));
        assert_eq!(out["command"], "check");
        assert_eq!(out["result"]["settings_ok"], true);
        assert!(out["run_id"].as_str().unwrap().starts_with("run-"));
    }

    #[test]
    fn log_timestamps_prefix_human_lines() {
        let stderr = |extra: &[&str]| {
            let out = pms_core()
                .env_remove("PMS_LOG_FORMAT")
                .args(["-v", "--log-format", "human"])
                .args(extra)
                .arg("check")
                .assert()
                .success()
                .get_output()
                .stderr
                .clone();
            String::from_utf8(out).unwrap()
        };
        let stamped = stderr(&["--log-timestamps"]);
        assert!(!stamped.is_empty());
        assert!(stamped.lines().all(|l| l.starts_with(|c: char| c.is_ascii_digit())));
        let plain = stderr(&[]);
        assert!(!plain.is_empty());
        assert!(plain.lines().all(|l| !l.starts_with(|c: char| c.is_ascii_digit())));
    }

    #[test]
    fn check_summarizes_scenario() {
        let out = json_stdout(
            pms_core()
                .args(["check", "--scenario"])
                .arg(fixture("scenario_eight.json")),
        );
        let scenario = &out["result"]["scenario"];
        assert_eq!(scenario["test_nodes"], 3);
        assert_eq!(scenario["supply_nodes"], 2);
        assert_eq!(scenario["total_tests"], 50);
        assert_eq!(scenario["total_positives"], 9);
    }

    #[test]
    fn missing_scenario_is_io_error() {
        pms_core()
            .args(["check", "--scenario", "/nonexistent/scenario.json"])
            .assert()
            .code(21);
    }
}

mod synth {
    use super::*;

    #[test]
    fn synth_writes_loadable_scenario() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.json");
        let out = json_stdout(
            pms_core()
                .args(["synth", "--supply-nodes", "2", "--test-nodes", "3", "--samples", "40"])
                .arg("--output")
                .arg(&path),
        );
        assert_eq!(out["result"]["total_tests"], 40);
        assert_eq!(out["result"]["num_draws"], 60);

        let checked = json_stdout(pms_core().args(["check", "--scenario"]).arg(&path));
        assert_eq!(checked["result"]["scenario"]["has_sourcing"], true);
        assert_eq!(checked["result"]["scenario"]["num_draws"], 60);
    }

    #[test]
    fn synth_is_deterministic_for_a_seed() {
        let run = || {
            pms_core()
                .args(["synth", "--no-draws", "--seed", "9"])
                .assert()
                .success()
                .get_output()
                .stdout
                .clone()
        };
        assert_eq!(run(), run());
    }
}

mod plan {
    use super::*;

    #[test]
    fn plan_materializes_every_budget() {
        let out = json_stdout(
            pms_core()
                .args(["plan", "--budget", "0,10,25", "--scenario"])
                .arg(fixture("scenario_eight.json")),
        );
        let plans = out["result"]["plans"].as_array().unwrap();
        assert_eq!(plans.len(), 6);
        for (k, budget) in [0u64, 10, 25].iter().enumerate() {
            let total: u64 = plans.iter().map(|row| row[k].as_u64().unwrap()).sum();
            assert_eq!(total, *budget);
        }
    }

    #[test]
    fn plan_with_design_file_concentrates_budget() {
        let out = json_stdout(
            pms_core()
                .args(["plan", "--budget", "30", "--scenario"])
                .arg(fixture("scenario_eight.json"))
                .arg("--design")
                .arg(fixture("design_corner.json")),
        );
        // Cell (2, 0) flattens to index 4.
        assert_eq!(out["result"]["plans"][4][0], 30);
    }

    #[test]
    fn design_not_summing_to_one_is_invalid_input() {
        pms_core()
            .args(["plan", "--budget", "30", "--scenario"])
            .arg(fixture("scenario_eight.json"))
            .arg("--design")
            .arg(fixture("design_bad_sum.json"))
            .assert()
            .code(12)
            .stderr(predicate::str::contains("design"));
    }

    #[test]
    fn budget_beyond_exact_range_is_invalid_input() {
        pms_core()
            .args(["plan", "--budget", "18446744073709551615", "--scenario"])
            .arg(fixture("scenario_eight.json"))
            .assert()
            .code(12)
            .stderr(predicate::str::contains("budget"));
    }

    #[test]
    fn summary_format_is_one_line() {
        pms_core()
            .args(["-f", "summary", "plan", "--budget", "5", "--scenario"])
            .arg(fixture("scenario_eight.json"))
            .assert()
            .success()
            .stdout(predicate::str::contains("6 cells x 1 budgets"));
    }
}

mod utility {
    use super::*;

    #[test]
    fn utility_reports_mean_and_band() {
        let out = json_stdout(
            pms_core()
                .args(["utility", "--budget", "30", "--trace", "2,0", "--omega", "4", "--sequential"])
                .arg("--scenario")
                .arg(fixture("scenario_eight.json")),
        );
        let result = &out["result"];
        assert_eq!(result["num_tests"], 30);
        assert_eq!(result["omega_count"], 4);
        assert_eq!(result["plan"][2][0], 30);
        let mean = result["mean"].as_f64().unwrap();
        assert!(mean >= 0.0);
        assert!(result["interval"][0].as_f64().unwrap() <= mean);
        assert_eq!(result["sampler"], "metropolis");
    }

    #[test]
    fn median_rule_is_rejected() {
        pms_core()
            .args(["utility", "--budget", "10", "--omega", "2", "--estimate", "median"])
            .arg("--scenario")
            .arg(fixture("scenario_eight.json"))
            .assert()
            .code(12)
            .stderr(predicate::str::contains("median"));
    }

    #[test]
    fn trace_out_of_range_is_invalid_input() {
        pms_core()
            .args(["utility", "--budget", "10", "--trace", "7,0", "--omega", "2"])
            .arg("--scenario")
            .arg(fixture("scenario_eight.json"))
            .assert()
            .code(12);
    }

    #[test]
    fn seed_flag_also_seeds_the_current_belief() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("settings.json");
        let mut body: Value =
            serde_json::from_str(&std::fs::read_to_string(fixture("settings_fast.json")).unwrap())
                .unwrap();
        body["utility"]["base_seed"] = 5.into();
        std::fs::write(&settings, body.to_string()).unwrap();

        let args = ["utility", "--budget", "20", "--omega", "4", "--sequential", "--scenario"];
        let from_flag = json_stdout(
            pms_core()
                .args(args)
                .arg(fixture("scenario_eight.json"))
                .args(["--seed", "5"]),
        );
        let from_settings = json_stdout(
            Command::cargo_bin("pms-core")
                .unwrap()
                .env_remove("PMS_SETTINGS")
                .env_remove("PMS_LOG")
                .arg("--config")
                .arg(&settings)
                .args(args)
                .arg(fixture("scenario_eight.json")),
        );
        assert_eq!(from_flag["result"]["mean"], from_settings["result"]["mean"]);
        assert_eq!(from_flag["result"]["std"], from_settings["result"]["std"]);
    }

    #[test]
    fn sweep_reports_marginal_deltas() {
        let out = json_stdout(
            pms_core()
                .args(["sweep", "--budget", "0,20", "--omega", "3"])
                .arg("--scenario")
                .arg(fixture("scenario_eight.json")),
        );
        let result = &out["result"];
        assert_eq!(result["budgets"].as_array().unwrap().len(), 2);
        assert_eq!(result["marginal"].as_array().unwrap().len(), 1);
    }
}
