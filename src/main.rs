//! Command-line surface for the model-based test runner.

use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Parser, Subcommand};

use altwalker::config::{load_config, RunnerConfig};
use altwalker::error::{GeneratorError, UsageError};
use altwalker::exit_codes;
use altwalker::executor::ExecutorKind;
use altwalker::logging;
use altwalker::reporter::ReporterOptions;
use altwalker::run;
use altwalker::walker::CancelToken;

#[derive(Parser)]
#[command(
    name = "altwalker",
    version,
    about = "Run model-based tests along GraphWalker-generated paths"
)]
struct Cli {
    /// Config file (defaults to .altwalker.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate models and run GraphWalker's own check on them.
    Check {
        /// Model file followed by its generator expression; repeatable.
        #[arg(short = 'm', long = "model", num_args = 2, value_names = ["MODEL_PATH", "EXPRESSION"], required = true)]
        models: Vec<String>,
        /// Filter out elements marked as blocked.
        #[arg(long)]
        blocked: bool,
    },
    /// Check the test code defines a class per model and a method per element.
    Verify {
        /// Path to the tests.
        tests: PathBuf,
        #[arg(short = 'm', long = "model", required = true)]
        models: Vec<PathBuf>,
        /// Executor type: http, python, or dotnet.
        #[arg(short = 'x', long = "executor", visible_short_aliases = ['l'], default_value = "python")]
        executor: String,
        /// Executor service URL (http executor).
        #[arg(long)]
        url: Option<String>,
        /// Print ready-to-paste stubs for everything missing.
        #[arg(long)]
        suggestions: bool,
    },
    /// Generate a path online and execute it step by step.
    Online {
        /// Path to the tests.
        tests: PathBuf,
        #[arg(short = 'm', long = "model", num_args = 2, value_names = ["MODEL_PATH", "EXPRESSION"], required = true)]
        models: Vec<String>,
        #[arg(short = 'x', long = "executor", default_value = "python")]
        executor: String,
        #[arg(long)]
        url: Option<String>,
        /// Connect to a running GraphWalker service instead of spawning one.
        #[arg(long = "gw-host")]
        gw_host: Option<String>,
        /// Port for the GraphWalker service; 0 picks a free one.
        #[arg(long = "gw-port", default_value_t = 0)]
        gw_port: u16,
        #[arg(short = 'e', long = "start-element")]
        start_element: Option<String>,
        /// Pass current graph data to every step.
        #[arg(long)]
        verbose: bool,
        /// Report element coverage with every step.
        #[arg(long)]
        unvisited: bool,
        #[arg(long)]
        blocked: bool,
        #[arg(long = "report-file")]
        report_file: Option<PathBuf>,
        /// Record the executed path to path.json.
        #[arg(long = "report-path")]
        report_path: bool,
        #[arg(long = "report-path-file")]
        report_path_file: Option<PathBuf>,
        #[arg(long = "report-xml-file")]
        report_xml_file: Option<PathBuf>,
    },
    /// Generate a path without executing it.
    Offline {
        #[arg(short = 'm', long = "model", num_args = 2, value_names = ["MODEL_PATH", "EXPRESSION"], required = true)]
        models: Vec<String>,
        /// Write the path here instead of stdout.
        #[arg(short = 'f', long = "output-file")]
        output_file: Option<PathBuf>,
        #[arg(short = 'e', long = "start-element")]
        start_element: Option<String>,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        unvisited: bool,
        #[arg(long)]
        blocked: bool,
    },
    /// Replay a recorded path against the test code.
    Walk {
        /// Path to the tests.
        tests: PathBuf,
        /// Path file produced by `offline` or `--report-path`.
        steps: PathBuf,
        #[arg(short = 'x', long = "executor", default_value = "python")]
        executor: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "report-file")]
        report_file: Option<PathBuf>,
        #[arg(long = "report-path-file")]
        report_path_file: Option<PathBuf>,
        #[arg(long = "report-xml-file")]
        report_xml_file: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    match execute(cli) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit(classify(&err));
        }
    }
}

/// Map the error taxonomy onto the stable exit codes.
fn classify(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        exit_codes::USAGE
    } else if err.downcast_ref::<GeneratorError>().is_some() {
        exit_codes::GENERATOR
    } else {
        exit_codes::INTERNAL
    }
}

fn execute(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check { models, blocked } => {
            let models = pair_models(models)?;
            let output = run::check(&models, blocked, &config)?;
            println!("{}", output.trim_end());
            Ok(exit_codes::OK)
        }
        Command::Verify {
            tests,
            models,
            executor,
            url,
            suggestions,
        } => {
            let options = run::VerifyOptions {
                tests,
                models,
                executor_kind: parse_executor(&executor)?,
                executor_url: url,
                suggestions,
            };
            let report = run::verify(&options, &config)?;
            if report.passed() {
                println!("No issues found with the code.");
                Ok(exit_codes::OK)
            } else {
                for message in &report.messages {
                    println!("{message}");
                }
                if let Some(stubs) = &report.stubs {
                    println!("\nSuggested stubs:\n{stubs}");
                }
                Ok(exit_codes::FAILED)
            }
        }
        Command::Online {
            tests,
            models,
            executor,
            url,
            gw_host,
            gw_port,
            start_element,
            verbose,
            unvisited,
            blocked,
            report_file,
            report_path,
            report_path_file,
            report_xml_file,
        } => {
            let models = pair_models(models)?;
            let options = run::RunTestsOptions {
                tests,
                executor_kind: parse_executor(&executor)?,
                executor_url: url,
                gw_host,
                gw_port,
                start_element,
                verbose,
                unvisited,
                blocked,
                reporters: reporter_options(
                    report_file,
                    report_path,
                    report_path_file,
                    report_xml_file,
                    &config,
                ),
            };
            let report = run::online(&models, &options, &config, CancelToken::new())?;
            Ok(run_exit_code(&report))
        }
        Command::Offline {
            models,
            output_file,
            start_element,
            verbose,
            unvisited,
            blocked,
        } => {
            let models = pair_models(models)?;
            let options = run::OfflineCommandOptions {
                start_element,
                verbose,
                unvisited,
                blocked,
                output_file: output_file.clone(),
            };
            let steps = run::offline(&models, &options, &config)?;
            if output_file.is_none() {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            }
            Ok(exit_codes::OK)
        }
        Command::Walk {
            tests,
            steps,
            executor,
            url,
            report_file,
            report_path_file,
            report_xml_file,
        } => {
            let options = run::RunTestsOptions {
                tests,
                executor_kind: parse_executor(&executor)?,
                executor_url: url,
                reporters: reporter_options(
                    report_file,
                    false,
                    report_path_file,
                    report_xml_file,
                    &config,
                ),
                ..run::RunTestsOptions::default()
            };
            let report = run::walk(&steps, &options, &config, CancelToken::new())?;
            Ok(run_exit_code(&report))
        }
    }
}

fn run_exit_code(report: &run::RunReport) -> i32 {
    if report.outcome.passed {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

fn parse_executor(raw: &str) -> Result<ExecutorKind, UsageError> {
    raw.parse::<ExecutorKind>().map_err(UsageError)
}

/// Fold `-m PATH EXPRESSION` pairs back together.
fn pair_models(flat: Vec<String>) -> Result<Vec<(PathBuf, String)>, UsageError> {
    if flat.len() % 2 != 0 {
        return Err(UsageError(
            "each --model takes a model path and a generator expression".to_string(),
        ));
    }
    Ok(flat
        .chunks(2)
        .map(|pair| (PathBuf::from(&pair[0]), pair[1].clone()))
        .collect())
}

fn reporter_options(
    report_file: Option<PathBuf>,
    report_path: bool,
    report_path_file: Option<PathBuf>,
    report_xml_file: Option<PathBuf>,
    config: &RunnerConfig,
) -> ReporterOptions {
    let report_path_file = report_path_file
        .or_else(|| report_path.then(|| PathBuf::from("path.json")))
        .or(config.report.path_file.clone());
    ReporterOptions {
        report_file: report_file.or(config.report.file.clone()),
        report_path_file,
        report_xml_file: report_xml_file.or(config.report.xml_file.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check() {
        let cli = Cli::parse_from([
            "altwalker",
            "check",
            "-m",
            "models/login.json",
            "random(never)",
        ]);
        match cli.command {
            Command::Check { models, blocked } => {
                assert_eq!(models, vec!["models/login.json", "random(never)"]);
                assert!(!blocked);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn parse_online_with_reports() {
        let cli = Cli::parse_from([
            "altwalker",
            "online",
            "tests",
            "-m",
            "models/login.json",
            "random(vertex_coverage(100))",
            "-x",
            "http",
            "--url",
            "http://localhost:5000",
            "--report-path",
            "--report-xml-file",
            "report.xml",
        ]);
        match cli.command {
            Command::Online {
                tests,
                executor,
                report_path,
                report_xml_file,
                gw_port,
                ..
            } => {
                assert_eq!(tests, PathBuf::from("tests"));
                assert_eq!(executor, "http");
                assert!(report_path);
                assert_eq!(report_xml_file, Some(PathBuf::from("report.xml")));
                assert_eq!(gw_port, 0);
            }
            _ => panic!("expected online"),
        }
    }

    #[test]
    fn parse_walk() {
        let cli = Cli::parse_from(["altwalker", "walk", "tests", "path.json"]);
        match cli.command {
            Command::Walk { tests, steps, .. } => {
                assert_eq!(tests, PathBuf::from("tests"));
                assert_eq!(steps, PathBuf::from("path.json"));
            }
            _ => panic!("expected walk"),
        }
    }

    #[test]
    fn pair_models_folds_pairs() {
        let pairs = pair_models(vec![
            "a.json".to_string(),
            "random(never)".to_string(),
            "b.json".to_string(),
            "random(length(5))".to_string(),
        ])
        .expect("pairs");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0, PathBuf::from("b.json"));
        assert_eq!(pairs[1].1, "random(length(5))");
    }

    #[test]
    fn verify_accepts_language_alias() {
        let cli = Cli::parse_from([
            "altwalker",
            "verify",
            "tests",
            "-l",
            "dotnet",
            "-m",
            "models/login.json",
        ]);
        match cli.command {
            Command::Verify { executor, .. } => assert_eq!(executor, "dotnet"),
            _ => panic!("expected verify"),
        }
    }
}
