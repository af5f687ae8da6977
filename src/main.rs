//! Command-line front end: render setup documents and validate scenarios
//! offline, without touching the lab.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use ptp_harness::config::PtpLabConfig;
use ptp_harness::scenario::{resolve_alarm_spec, scenario_from_setup, Verification};
use ptp_harness::setup::SetupRenderer;

#[derive(Parser)]
#[command(name = "ptp-harness", about = "PTP lab verification harness", version)]
struct Cli {
    /// Lab topology file (JSON5).
    #[arg(long, global = true, default_value = "lab.json5")]
    lab: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a setup template against the lab topology and print the
    /// resulting document as JSON.
    RenderSetup {
        /// Setup template file (JSON5).
        template: PathBuf,
        /// Optional defaults document merged into the render context.
        #[arg(long)]
        defaults: Option<PathBuf>,
    },
    /// Parse a named scenario from a setup template and check it is
    /// well-formed, including alarm placeholder resolution.
    ValidateScenario {
        /// Setup template file (JSON5).
        template: PathBuf,
        /// Scenario name under `test_scenarios`.
        name: String,
        #[arg(long)]
        defaults: Option<PathBuf>,
    },
}

fn load_defaults(path: Option<&PathBuf>) -> anyhow::Result<Option<serde_json::Value>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let value = json5::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let lab = PtpLabConfig::from_file(&cli.lab)
        .with_context(|| format!("loading lab topology {}", cli.lab.display()))?;

    match cli.command {
        Command::RenderSetup { template, defaults } => {
            let defaults = load_defaults(defaults.as_ref())?;
            let document = SetupRenderer::new(&lab, defaults.as_ref())
                .render_file(&template)
                .with_context(|| format!("rendering {}", template.display()))?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::ValidateScenario {
            template,
            name,
            defaults,
        } => {
            let defaults = load_defaults(defaults.as_ref())?;
            let document = SetupRenderer::new(&lab, defaults.as_ref())
                .render_file(&template)
                .with_context(|| format!("rendering {}", template.display()))?;
            let scenario = scenario_from_setup(&document, &name)?;
            for step in &scenario.steps {
                for verification in &step.verification {
                    if let Verification::Alarm { expected_alarms, .. } = verification {
                        for spec in expected_alarms {
                            resolve_alarm_spec(spec, &lab)?.to_expected()?;
                        }
                    }
                }
            }
            info!(
                "Scenario '{name}' is well-formed ({} steps)",
                scenario.steps.len()
            );
        }
    }
    Ok(())
}
