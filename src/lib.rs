//! ODE to FPAA Compiler
//!
//! This library compiles systems of coupled ordinary differential equations
//! into two artefacts: a fixed-step simulated time series of the emitted
//! variables, and a configuration for a field-programmable analog array.
//!
//! # Example
//!
//! ```rust
//! use fpaa_ode_compiler::{generate_config, simulate, Settings};
//!
//! let source = "
//!     system decay {
//!         var k = 0.5;
//!         interval [0.5, 0.5];
//!         var x = integ(-k * x, 1.0);
//!         interval [0, 1];
//!         emit x as decay_x;
//!         time 1;
//!     }
//! ";
//!
//! let settings = Settings::default();
//! let series = simulate(source, &settings).unwrap();
//! println!("{}", series.to_csv());
//!
//! let program = generate_config(source, &settings).unwrap();
//! println!("{}", program.to_config_format());
//! ```

pub mod ast;
pub mod cluster;
pub mod codegen;
pub mod config;
pub mod error;
pub mod eval;
pub mod hardware;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod scaling;
pub mod simulator;
pub mod system;

pub use ast::*;
pub use cluster::ClusterConfig;
pub use codegen::CodeGenerator;
pub use config::Settings;
pub use error::{CompileError, CompileResult};
pub use eval::{Binding, EvalContext, EvalMode, Evaluator};
pub use hardware::{FpaaConfig, HardwareProgram};
pub use loader::{load_file, load_source};
pub use parser::{compile_expression, Parser};
pub use simulator::{SimulationConfig, Simulator, TimeSeries};
pub use system::{GlobalTable, Interval, Model, Ode};

/// Load, compile, scale and cluster a source program
pub fn compile(source: &str, settings: &Settings) -> CompileResult<Model> {
    let systems = load_source(source)?;
    Model::compile(&systems, settings)
}

/// Compile a source program and run it to the shortest system's total time
pub fn simulate(source: &str, settings: &Settings) -> CompileResult<TimeSeries> {
    let mut model = compile(source, settings)?;
    Simulator::new(settings.simulation.clone()).run(&mut model)
}

/// Compile a source program into FPAA block groups
pub fn generate_config(source: &str, settings: &Settings) -> CompileResult<HardwareProgram> {
    let model = compile(source, settings)?;
    let mut codegen = CodeGenerator::new(settings.fpaa.clone());
    Ok(codegen.generate(&model))
}
