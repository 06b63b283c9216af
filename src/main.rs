//! ODE to FPAA Compiler CLI
//!
//! Usage:
//!   ode2fpaa lorenz.ode
//!   ode2fpaa lorenz.ode --scale --step 0.001 --csv lorenz.csv --fpaa lorenz.fpaa
//!   ode2fpaa lorenz.ode --settings fpaa.toml --json

use clap::Parser as ClapParser;
use colored::Colorize;
use log::LevelFilter;
use std::fs;
use std::path::PathBuf;

use fpaa_ode_compiler::{
    load_file, CodeGenerator, HardwareProgram, Model, Settings, Simulator, TimeSeries,
};

#[derive(ClapParser, Debug)]
#[command(name = "ode2fpaa")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Simulates ODE systems and compiles them to FPAA configurations")]
struct Args {
    /// Source file with one or more system blocks
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML settings file
    #[arg(long = "settings", value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Scale every variable onto the voltage limit
    #[arg(long = "scale")]
    scale: bool,

    /// Integration step
    #[arg(long = "step", value_name = "H")]
    step: Option<f64>,

    /// Keep declaration order instead of clustering similar expressions
    #[arg(long = "no-cluster")]
    no_cluster: bool,

    /// Write the time series as CSV
    #[arg(long = "csv", value_name = "PATH")]
    csv: Option<PathBuf>,

    /// Write the FPAA configuration
    #[arg(long = "fpaa", value_name = "PATH")]
    fpaa: Option<PathBuf>,

    /// Print the hardware program as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context.red(), error);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut settings = match &args.settings {
        Some(path) => Settings::load(path).unwrap_or_else(|e| fail("Settings error", e)),
        None => Settings::default(),
    };
    if args.scale {
        settings.simulation.scaled = true;
        settings.simulation.real_units = true;
    }
    if let Some(step) = args.step {
        if !(step.is_finite() && step > 0.0) {
            fail("Error", format!("step must be positive, got {}", step));
        }
        settings.simulation.step = step;
    }
    if args.no_cluster {
        settings.clustering.enabled = false;
    }

    let sources = load_file(&args.input).unwrap_or_else(|e| fail("Load error", e));
    let mut model =
        Model::compile(&sources, &settings).unwrap_or_else(|e| fail("Compilation error", e));

    let series = Simulator::new(settings.simulation.clone())
        .run(&mut model)
        .unwrap_or_else(|e| fail("Simulation error", e));

    let mut codegen = CodeGenerator::new(settings.fpaa.clone());
    let program = codegen.generate(&model);

    if let Some(path) = &args.csv {
        fs::write(path, series.to_csv()).unwrap_or_else(|e| {
            fail("Error", format!("Failed to write '{}': {}", path.display(), e))
        });
    }
    if let Some(path) = &args.fpaa {
        fs::write(path, program.to_config_format()).unwrap_or_else(|e| {
            fail("Error", format!("Failed to write '{}': {}", path.display(), e))
        });
    }

    if args.json_output {
        match program.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
        }
    } else {
        print_summary(&model, &series, &program, &settings);
        if args.csv.is_none() {
            print_series(&series, args.verbose);
        }
        if args.fpaa.is_none() {
            println!();
            println!("{}", "FPAA Configuration".bold().yellow());
            println!("{}", "-".repeat(50));
            print!("{}", program.to_config_format());
        }
    }
}

fn print_summary(model: &Model, series: &TimeSeries, program: &HardwareProgram, settings: &Settings) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    for ode in &model.systems {
        println!(
            "{} {}: {} declaration(s), time {}",
            "System".cyan(),
            ode.name.bold(),
            ode.declarations.len(),
            ode.total_time
        );
    }
    println!(
        "{}: {}",
        "Emitted".cyan(),
        series.columns.join(", ")
    );
    println!(
        "{}: {} step(s) of {}{}",
        "Simulation".cyan(),
        series.len(),
        settings.simulation.step,
        if model.scaled { ", scaled" } else { "" }
    );
    println!(
        "{}: {} group(s), {} CAB(s), voltage limit {}",
        "Hardware".cyan(),
        program.groups.len(),
        program.total_blocks,
        program.config.voltage_limit
    );

    for skipped in &program.skipped {
        println!(
            "{} {}.{}: {}",
            "Skipped".red(),
            skipped.system,
            skipped.variable,
            skipped.reason
        );
    }
    println!();
}

fn print_series(series: &TimeSeries, verbose: bool) {
    const HEAD: usize = 10;

    println!("{}", "Time Series".bold().yellow());
    println!("{}", "-".repeat(50));

    let csv = series.to_csv();
    let shown = if verbose { usize::MAX } else { HEAD + 1 };
    for line in csv.lines().take(shown) {
        println!("{}", line);
    }
    if !verbose && series.len() > HEAD {
        println!("({} rows, use -v or --csv for all)", series.len());
    }
}
