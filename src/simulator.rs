//! Fixed-step simulation of all systems in lock-step
//!
//! Each system integrates its own vector with classic RK4. Emitted values are
//! published to the global table only after every system has finished the
//! step, so within a step all systems see the previous step's globals.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::eval::{to_real, Binding, EvalContext, EvalMode, Evaluator};
use crate::system::{GlobalTable, Model, Ode};

/// Simulation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed integration step
    pub step: f64,
    /// Apply the scaling transform and integrate in normalised units
    pub scaled: bool,
    /// Report emitted values in real units even when integrating scaled
    pub real_units: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step: 0.01,
            scaled: false,
            real_units: false,
        }
    }
}

/// Time series of the global emission table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    /// Emitted aliases, in table order
    pub columns: Vec<String>,
    /// Elapsed time followed by one value per column
    pub rows: Vec<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row[0]).collect()
    }

    /// Values of one alias over time
    pub fn column(&self, alias: &str) -> Option<Vec<f64>> {
        let index = self.columns.iter().position(|c| c == alias)?;
        Some(self.rows.iter().map(|row| row[index + 1]).collect())
    }

    /// Comma-separated rows under a `time,<alias>...` header
    pub fn to_csv(&self) -> String {
        let mut output = String::from("time");
        for column in &self.columns {
            output.push(',');
            output.push_str(column);
        }
        output.push('\n');

        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            output.push_str(&line.join(","));
            output.push('\n');
        }
        output
    }
}

/// Classic fourth-order Runge-Kutta step for an autonomous system
pub fn rk4_step<F>(state: &[f64], h: f64, mut derivative: F) -> CompileResult<Vec<f64>>
where
    F: FnMut(&[f64]) -> CompileResult<Vec<f64>>,
{
    let offset = |base: &[f64], slope: &[f64], factor: f64| -> Vec<f64> {
        base.iter().zip(slope).map(|(x, k)| x + factor * k).collect()
    };

    let k1 = derivative(state)?;
    let k2 = derivative(&offset(state, &k1, h / 2.0))?;
    let k3 = derivative(&offset(state, &k2, h / 2.0))?;
    let k4 = derivative(&offset(state, &k3, h))?;

    Ok(state
        .iter()
        .enumerate()
        .map(|(i, x)| x + h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
        .collect())
}

/// Integration state of one system
struct SystemState<'a> {
    ode: &'a Ode,
    constants: Vec<Binding>,
    /// Every state variable, in declaration order
    states: Vec<Binding>,
    /// Declaration index of each entry in `states`
    state_declarations: Vec<usize>,
    /// Positions in `states` carried by the integration vector
    integrated: Vec<usize>,
    /// Positions in `states` recomputed from their expressions
    algebraic: Vec<usize>,
    vector: Vec<f64>,
}

impl<'a> SystemState<'a> {
    fn new(ode: &'a Ode, evaluator: Evaluator, globals: &GlobalTable) -> CompileResult<Self> {
        let mut states = Vec::new();
        let mut state_declarations = Vec::new();
        let mut integrated = Vec::new();
        let mut algebraic = Vec::new();

        for (index, declaration) in ode.declarations.iter().enumerate() {
            if !declaration.is_state() {
                continue;
            }
            if declaration.is_integrated() {
                integrated.push(states.len());
            } else {
                algebraic.push(states.len());
            }
            states.push(declaration.binding());
            state_declarations.push(index);
        }

        let vector = integrated.iter().map(|&i| states[i].value).collect();
        let mut system = Self {
            ode,
            constants: ode.constants(),
            states,
            state_declarations,
            integrated,
            algebraic,
            vector,
        };

        let mut states = system.states.clone();
        system.update_algebraic(&mut states, evaluator, globals)?;
        system.states = states;
        Ok(system)
    }

    /// Recompute algebraic variables in declaration order
    fn update_algebraic(
        &self,
        states: &mut [Binding],
        evaluator: Evaluator,
        globals: &GlobalTable,
    ) -> CompileResult<()> {
        for &position in &self.algebraic {
            let declaration = &self.ode.declarations[self.state_declarations[position]];
            let value = {
                let context = EvalContext::new(&self.constants, states, globals);
                evaluator
                    .evaluate_value(&declaration.expr, &context)
                    .map_err(|e| e.in_declaration(&self.ode.name, &declaration.name))?
            };
            states[position].value = value;
        }
        Ok(())
    }

    /// States with `vector` substituted for the integrated variables
    fn states_at(
        &self,
        vector: &[f64],
        evaluator: Evaluator,
        globals: &GlobalTable,
    ) -> CompileResult<Vec<Binding>> {
        let mut states = self.states.clone();
        for (slot, &position) in self.integrated.iter().enumerate() {
            states[position].value = vector[slot];
        }
        self.update_algebraic(&mut states, evaluator, globals)?;
        Ok(states)
    }

    fn derivatives(
        &self,
        vector: &[f64],
        evaluator: Evaluator,
        globals: &GlobalTable,
    ) -> CompileResult<Vec<f64>> {
        let states = self.states_at(vector, evaluator, globals)?;
        let context = EvalContext::new(&self.constants, &states, globals);

        self.integrated
            .iter()
            .map(|&position| {
                let declaration = &self.ode.declarations[self.state_declarations[position]];
                evaluator
                    .evaluate_derivative(&declaration.expr, &context)
                    .map_err(|e| e.in_declaration(&self.ode.name, &declaration.name))
            })
            .collect()
    }

    fn advance(&mut self, h: f64, evaluator: Evaluator, globals: &GlobalTable) -> CompileResult<()> {
        let next = rk4_step(&self.vector, h, |x| self.derivatives(x, evaluator, globals))?;
        self.states = self.states_at(&next, evaluator, globals)?;
        self.vector = next;
        Ok(())
    }
}

/// Lock-step driver for every system in a model
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Number of steps covering `[0, end)`
    fn step_count(&self, end: f64) -> usize {
        if !end.is_finite() || end <= 0.0 {
            return 0;
        }
        (end / self.config.step - 1e-9).ceil().max(0.0) as usize
    }

    /// Run until the shortest system's total time, updating the model's global table
    pub fn run(&self, model: &mut Model) -> CompileResult<TimeSeries> {
        let h = self.config.step;
        if !(h.is_finite() && h > 0.0) {
            return Err(CompileError::evaluation(format!("Invalid step size {}", h)));
        }

        let evaluator = Evaluator::new(if model.scaled {
            EvalMode::Scaled
        } else {
            EvalMode::Unscaled
        });
        let report_real = model.scaled && self.config.real_units;

        let Model {
            systems, globals, ..
        } = model;

        let mut states = systems
            .iter()
            .map(|ode| SystemState::new(ode, evaluator, globals))
            .collect::<CompileResult<Vec<_>>>()?;

        // Algebraic values are only known once their system is built
        for (index, state) in states.iter().enumerate() {
            for binding in &state.states {
                globals.publish(index, binding);
            }
        }

        let end = systems
            .iter()
            .map(|ode| ode.total_time)
            .fold(f64::INFINITY, f64::min);
        let steps = self.step_count(end);
        info!("Simulating {} system(s) for {} step(s) of {}", systems.len(), steps, h);

        let mut series = TimeSeries::new(globals.entries().iter().map(|e| e.alias.clone()).collect());

        for step in 0..steps {
            for state in states.iter_mut() {
                state.advance(h, evaluator, globals)?;
            }

            for (index, state) in states.iter().enumerate() {
                for binding in &state.states {
                    globals.publish(index, binding);
                }
            }

            let mut row = Vec::with_capacity(globals.len() + 1);
            row.push((step + 1) as f64 * h);
            row.extend(globals.entries().iter().map(|entry| {
                if report_real {
                    to_real(entry.value, entry.rho, entry.delta)
                } else {
                    entry.value
                }
            }));
            series.rows.push(row);
        }

        debug!("Simulation produced {} row(s)", series.len());
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::loader::load_source;

    fn run(source: &str, settings: &Settings) -> CompileResult<TimeSeries> {
        let sources = load_source(source)?;
        let mut model = Model::compile(&sources, settings)?;
        Simulator::new(settings.simulation.clone()).run(&mut model)
    }

    fn settings(step: f64) -> Settings {
        let mut settings = Settings::default();
        settings.simulation.step = step;
        settings
    }

    const CONSTANT_RATE: &str = "
        system ramp {
            var k = 5;
            interval [5, 5];
            var x = integ(k, 0);
            interval [-10, 10];
            emit x as x;
            time 1.0;
        }
    ";

    #[test]
    fn test_constant_rate_grows_linearly() {
        let series = run(CONSTANT_RATE, &settings(0.1)).unwrap();
        assert_eq!(series.len(), 10);

        let x = series.column("x").unwrap();
        let mut previous = 0.0;
        for value in &x {
            assert!((value - previous - 0.5).abs() < 1e-9, "{:?}", x);
            previous = *value;
        }
        assert!((x[9] - 5.0).abs() < 1e-9);

        let times = series.times();
        assert!((times[0] - 0.1).abs() < 1e-12);
        assert!((times[9] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaled_run_matches_unscaled_in_real_units() {
        let mut scaled = settings(0.1);
        scaled.simulation.scaled = true;
        scaled.simulation.real_units = true;

        let plain = run(CONSTANT_RATE, &settings(0.1)).unwrap();
        let real = run(CONSTANT_RATE, &scaled).unwrap();
        for (a, b) in plain.column("x").unwrap().iter().zip(real.column("x").unwrap()) {
            assert!((a - b).abs() < 1e-9);
        }

        scaled.simulation.real_units = false;
        let normalized = run(CONSTANT_RATE, &scaled).unwrap();
        // [-10, 10] onto +-1
        let last = normalized.column("x").unwrap()[9];
        assert!((last - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_decay_accuracy() {
        let source = "
            system decay {
                var x = integ(-x, 1);
                interval [0, 1];
                var half = x / 2;
                interval [0, 0.5];
                emit x as x;
                emit half as half;
                time 1;
            }
        ";
        let series = run(source, &settings(0.01)).unwrap();
        let x = series.column("x").unwrap();
        let half = series.column("half").unwrap();
        let expected = (-1.0f64).exp();
        assert!((x[x.len() - 1] - expected).abs() < 1e-8);
        assert!((half[half.len() - 1] - expected / 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_cross_system_coupling_lags_one_step() {
        let source = "
            system source {
                var s = integ(1, 0);
                interval [0, 10];
                emit s as shared;
                time 0.3;
            }
            system follower {
                var f = integ(shared, 0);
                interval [0, 10];
                emit f as follow;
                time 0.3;
            }
        ";
        let series = run(source, &settings(0.1)).unwrap();
        let shared = series.column("shared").unwrap();
        let follow = series.column("follow").unwrap();

        assert_eq!(series.len(), 3);
        for (a, b) in shared.iter().zip([0.1, 0.2, 0.3]) {
            assert!((a - b).abs() < 1e-12);
        }
        // The follower integrates the previous step's value of `shared`
        for (a, b) in follow.iter().zip([0.0, 0.01, 0.03]) {
            assert!((a - b).abs() < 1e-12, "{:?}", follow);
        }
    }

    #[test]
    fn test_algebraic_emit_is_visible_on_first_step() {
        let source = "
            system square {
                var q = integ(0, 2);
                interval [0, 4];
                var e = q * q;
                interval [0, 16];
                emit e as e;
                time 0.1;
            }
            system reader {
                var f = integ(e, 0);
                interval [0, 1];
                emit f as f;
                time 0.1;
            }
        ";
        let series = run(source, &settings(0.1)).unwrap();
        assert_eq!(series.len(), 1);
        assert!((series.column("e").unwrap()[0] - 4.0).abs() < 1e-12);
        // f reads e = q(0)^2 = 4 during the first step
        assert!((series.column("f").unwrap()[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_shortest_system_bounds_the_run() {
        let source = "
            system long { var a = integ(1, 0); interval [0, 10]; emit a as a; time 5; }
            system short { var b = integ(1, 0); interval [0, 10]; emit b as b; time 0.5; }
        ";
        let series = run(source, &settings(0.1)).unwrap();
        assert_eq!(series.len(), 5);
    }

    #[test]
    fn test_division_by_zero_aborts_run() {
        let source = "
            system bad {
                var z = 0;
                interval [0, 0];
                var x = integ(1 / z, 0);
                interval [-1, 1];
                time 1;
            }
        ";
        let err = run(source, &settings(0.1)).unwrap_err();
        assert!(err.is_evaluation_error());
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_csv_output() {
        let series = run(CONSTANT_RATE, &settings(0.5)).unwrap();
        assert_eq!(series.to_csv(), "time,x\n0.5,2.5\n1,5\n");
    }

    #[test]
    fn test_rk4_step_matches_polynomial() {
        // x' = 2 sqrt(x) from x(1) = 1 follows x = t^2
        let next = rk4_step(&[1.0], 0.1, |x| Ok(vec![2.0 * x[0].sqrt()])).unwrap();
        assert!((next[0] - 1.21).abs() < 1e-6);
    }
}
