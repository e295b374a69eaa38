//! VideoSpeed CLI
//!
//! Inspect the context-menu table and run scripted scenarios against the
//! simulated browser.

mod scenario;

use clap::{Parser, Subcommand};

use vs_core::find_closest_option;
use vs_core::types::{menu_options, validate_rate};

use crate::scenario::{check_rates, Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "vs-cli")]
#[command(about = "VideoSpeed extension tools")]
struct Cli {
    /// Log every message and storage change
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the context-menu rate table
    Menu,

    /// Show which menu entry a rate highlights
    Closest {
        /// Playback rate
        #[arg(short, long)]
        rate: f64,
    },

    /// Run a scenario file and print the final browser state as JSON
    Simulate {
        /// Scenario file
        #[arg(short, long)]
        scenario: String,

        /// Pretty-print the report
        #[arg(short, long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let result = match cli.command {
        Commands::Menu => cmd_menu(),
        Commands::Closest { rate } => cmd_closest(rate),
        Commands::Simulate { scenario, pretty } => cmd_simulate(&scenario, pretty),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_menu() -> Result<(), String> {
    println!("ID           TITLE    DEFAULT");
    for option in menu_options() {
        println!(
            "{:<12} {:<8} {}",
            option.id,
            option.title,
            if option.default { "yes" } else { "" }
        );
    }
    Ok(())
}

fn cmd_closest(rate: f64) -> Result<(), String> {
    let options = menu_options();
    let closest = find_closest_option(rate, &options).ok_or_else(|| "Menu table is empty".to_string())?;

    println!("{} -> {} ({})", rate, closest.title, closest.id);
    if let Err(e) = validate_rate(rate) {
        println!("  note: {}", e);
    }
    Ok(())
}

fn cmd_simulate(path: &str, pretty: bool) -> Result<(), String> {
    let scenario = Scenario::load(path).map_err(|e| e.to_string())?;
    check_rates(&scenario).map_err(|e| e.to_string())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    let report = runtime
        .block_on(ScenarioRunner::new().run(&scenario))
        .map_err(|e| e.to_string())?;

    let json = if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .map_err(|e| format!("Failed to encode report: {}", e))?;

    println!("{}", json);
    log::info!("Scenario '{}' passed {} step(s)", path, report.steps);
    Ok(())
}
