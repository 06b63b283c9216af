//! Simulate the Lorenz system scaled onto the fabric and print its configuration
//!
//! Run with: cargo run --example lorenz

use fpaa_ode_compiler::{generate_config, simulate, Settings};

const SOURCE: &str = include_str!("lorenz.ode");

fn main() {
    env_logger::init();

    let mut settings = Settings::default();
    settings.simulation.step = 0.001;
    settings.simulation.scaled = true;
    settings.simulation.real_units = true;

    let series = match simulate(SOURCE, &settings) {
        Ok(series) => series,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("Lorenz attractor: {} rows", series.len());
    for row in series.rows.iter().step_by(2000) {
        println!(
            "t = {:>6.2}  x = {:>8.3}  y = {:>8.3}  z = {:>8.3}",
            row[0], row[1], row[2], row[3]
        );
    }

    match generate_config(SOURCE, &settings) {
        Ok(program) => {
            println!();
            println!("{}", program);
            print!("{}", program.to_config_format());
        }
        Err(e) => {
            eprintln!("Code generation failed: {}", e);
            std::process::exit(1);
        }
    }
}
