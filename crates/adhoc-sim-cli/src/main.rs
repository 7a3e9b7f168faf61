use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use adhoc_abstract::{ScenarioOverride, ScenarioParams};
use adhoc_simulator::{ExperimentReport, ExperimentRunner, OutputOptions, write_header};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compare ad-hoc routing protocols over repeated simulation runs"
)]
struct Args {
    /// The name of the CSV output file name.
    #[arg(long = "CSVfileName", default_value = "Adhoc-routing.output.csv")]
    csv_file_name: PathBuf,

    /// Enable mobility tracing.
    #[arg(
        long = "traceMobility",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    trace_mobility: bool,

    /// 1=OLSR;2=AODV;3=DSDV;4=DSR
    #[arg(long, default_value_t = 2)]
    protocol: u32,

    /// Number of iterations to run.
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Override topology parameters from a TOML file.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Write a JSON report of the finished experiment.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

impl Args {
    /// Per-iteration files live next to the base file, named `<iteration><file name>`.
    fn output_options(&self) -> Result<OutputOptions> {
        let basename = self
            .csv_file_name
            .file_name()
            .and_then(|n| n.to_str())
            .context("CSV file name must name a UTF-8 file")?
            .to_string();
        let dir = match self.csv_file_name.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(OutputOptions {
            dir,
            csv_basename: basename,
            ..Default::default()
        })
    }

    fn scenario_params(&self) -> Result<ScenarioParams> {
        let mut params = ScenarioParams::default();
        if let Some(path) = &self.scenario {
            load_scenario(path)?.apply_to(&mut params);
        }
        params.trace_mobility = self.trace_mobility;
        Ok(params)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    info!("adhoc-routing starting…");
    run_experiment(&args)
}

fn run_experiment(args: &Args) -> Result<()> {
    let params = args.scenario_params()?;
    let output = args.output_options()?;

    // Blank out the last output file and write the column headers.
    write_header(&args.csv_file_name)
        .with_context(|| format!("Failed to prepare {}", args.csv_file_name.display()))?;

    let mut runner = ExperimentRunner::new(params, args.protocol, output);
    let mut iterations = Vec::with_capacity(args.runs);
    for _ in 0..args.runs {
        let report = runner.run_iteration().context("Experiment aborted")?;
        println!("\n{}", report.run_stats);
        iterations.push(report);
    }

    let final_report = runner.finish().context("No iterations completed")?;
    println!("\n\n{final_report}\n");
    info!("Experiment complete.");

    if let Some(trace_path) = &args.trace_out {
        let report = ExperimentReport {
            iterations,
            aggregate: *runner.aggregate(),
            final_report,
        };
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn load_scenario(path: &Path) -> Result<ScenarioOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: ScenarioOverride =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

fn write_trace(path: &Path, report: &ExperimentReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize experiment report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_use_experiment_spelling() {
        let args = Args::try_parse_from([
            "adhoc-routing",
            "--CSVfileName=results/run.csv",
            "--traceMobility=true",
            "--protocol=3",
        ])
        .unwrap();
        assert_eq!(args.protocol, 3);
        assert!(args.trace_mobility);
        let output = args.output_options().unwrap();
        assert_eq!(output.dir, PathBuf::from("results"));
        assert_eq!(output.csv_basename, "run.csv");
    }

    #[test]
    fn defaults_match_reference_experiment() {
        let args = Args::try_parse_from(["adhoc-routing"]).unwrap();
        assert_eq!(args.protocol, 2);
        assert_eq!(args.runs, 1);
        assert!(!args.trace_mobility);
        let output = args.output_options().unwrap();
        assert_eq!(output.dir, PathBuf::from("."));
        assert_eq!(output.csv_basename, "Adhoc-routing.output.csv");
        assert_eq!(args.scenario_params().unwrap(), ScenarioParams::default());
    }

    #[test]
    fn out_of_range_protocol_still_parses() {
        // Rejected by the runner, not by the flag parser.
        let args = Args::try_parse_from(["adhoc-routing", "--protocol=5"]).unwrap();
        assert_eq!(args.protocol, 5);
    }

    #[test]
    fn unknown_protocol_fails_with_header_only_output() {
        let dir = std::env::temp_dir().join(format!("adhoc-cli-bad-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let csv = dir.join("out.csv");
        let args = Args::try_parse_from([
            "adhoc-routing".to_string(),
            format!("--CSVfileName={}", csv.display()),
            "--protocol=5".to_string(),
        ])
        .unwrap();

        let err = run_experiment(&args).unwrap_err();
        assert!(format!("{err:#}").contains("No such protocol: 5"));
        let content = fs::read_to_string(&csv).unwrap();
        assert_eq!(content, format!("{}\n", adhoc_simulator::CSV_HEADER));
        assert!(!dir.join("1out.csv").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
