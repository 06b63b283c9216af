//! Two oscillators coupled through the global emission table
//!
//! The driver publishes its position; the follower reads it one step late.
//!
//! Run with: cargo run --example coupled_oscillators

use fpaa_ode_compiler::{compile, CodeGenerator, Settings, Simulator};

const SOURCE: &str = "
system driver {
    var w = 1;
    interval [1, 1];
    var p = integ(v, 1);
    interval [-1, 1];
    var v = integ(-w * w * p, 0);
    interval [-1, 1];
    emit p as drive;
    time 10;
}

system follower {
    var c = 0.5;
    interval [0.5, 0.5];
    var q = integ(u, 0);
    interval [-2, 2];
    var u = integ(c * (drive - q) - q, 0);
    interval [-2, 2];
    var energy = q * q + u * u;
    interval [0, 8];
    emit q as follow;
    emit energy as energy;
    time 10;
}
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut settings = Settings::default();
    settings.simulation.step = 0.01;

    let mut model = compile(SOURCE, &settings)?;
    let series = Simulator::new(settings.simulation.clone()).run(&mut model)?;

    let drive = series.column("drive").unwrap_or_default();
    let follow = series.column("follow").unwrap_or_default();
    let energy = series.column("energy").unwrap_or_default();
    for i in (0..series.len()).step_by(100) {
        println!(
            "t = {:>5.2}  drive = {:>7.3}  follow = {:>7.3}  energy = {:>7.3}",
            series.rows[i][0], drive[i], follow[i], energy[i]
        );
    }

    let program = CodeGenerator::new(settings.fpaa.clone()).generate(&model);
    println!();
    println!("{}", program);
    Ok(())
}
