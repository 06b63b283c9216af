//! Range scaling onto the fabric's voltage limit
//!
//! Each variable gets an affine map `x_norm = rho * (x_real - delta)` chosen
//! from its declared interval:
//! - state variable `[lo, hi]`: centred on the midpoint, `hi` maps to `+L`
//! - constant `[c, c]`: no offset, `|c|` maps to `L`

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ast::{Expr, NodeKind};
use crate::eval::{to_normalized, to_real};
use crate::system::{Interval, Ode};

/// Scale parameters of one variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    pub rho: f64,
    pub delta: f64,
}

impl ScaleFactors {
    /// Choose the map for an interval and voltage limit `L`
    pub fn for_interval(interval: Interval, limit: f64) -> Self {
        if interval.is_constant() {
            let magnitude = interval.lo.abs().max(interval.hi.abs());
            // A zero constant cannot be stretched; leave it unscaled
            let rho = if magnitude == 0.0 { 1.0 } else { limit / magnitude };
            Self { rho, delta: 0.0 }
        } else {
            Self {
                rho: 2.0 * limit / (interval.hi - interval.lo),
                delta: (interval.lo + interval.hi) / 2.0,
            }
        }
    }

    pub fn normalize(&self, real: f64) -> f64 {
        to_normalized(real, self.rho, self.delta)
    }

    pub fn denormalize(&self, normalized: f64) -> f64 {
        to_real(normalized, self.rho, self.delta)
    }
}

/// Rewrite one expression into normalised units; a second call is a no-op
pub fn scale_expr(expr: &mut Expr, interval: Interval, limit: f64) {
    if expr.scaled {
        return;
    }

    let factors = ScaleFactors::for_interval(interval, limit);
    expr.rho = factors.rho;
    expr.delta = factors.delta;

    if interval.is_constant() {
        expr.initial_condition *= factors.rho;
        if let NodeKind::Number(value) = &mut expr.root.kind {
            *value *= factors.rho;
        }
    } else {
        expr.initial_condition = factors.normalize(expr.initial_condition);
    }
    expr.scaled = true;
}

/// Scale every declaration of a system
pub fn scale_system(ode: &mut Ode, limit: f64) {
    for declaration in &mut ode.declarations {
        scale_expr(&mut declaration.expr, declaration.interval, limit);
        debug!(
            "{}: {} rho={} delta={}",
            ode.name, declaration.name, declaration.expr.rho, declaration.expr.delta
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile_expression;
    use proptest::prelude::*;

    #[test]
    fn test_state_variable_factors() {
        let factors = ScaleFactors::for_interval(Interval::new(-30.0, 50.0), 1.0);
        assert_eq!(factors.delta, 10.0);
        assert_eq!(factors.rho, 2.0 / 80.0);
        assert!((factors.normalize(50.0) - 1.0).abs() < 1e-12);
        assert!((factors.normalize(-30.0) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_factors() {
        let factors = ScaleFactors::for_interval(Interval::new(-4.0, -4.0), 2.0);
        assert_eq!(factors, ScaleFactors { rho: 0.5, delta: 0.0 });

        let zero = ScaleFactors::for_interval(Interval::new(0.0, 0.0), 2.0);
        assert_eq!(zero.rho, 1.0);
    }

    #[test]
    fn test_scale_constant_literal_in_place() {
        let mut expr = compile_expression("8").unwrap();
        scale_expr(&mut expr, Interval::new(8.0, 8.0), 2.0);
        assert_eq!(expr.initial_condition, 2.0);
        assert_eq!(expr.root.kind, NodeKind::Number(2.0));

        // Applied at most once
        scale_expr(&mut expr, Interval::new(8.0, 8.0), 2.0);
        assert_eq!(expr.initial_condition, 2.0);
    }

    #[test]
    fn test_scale_integrator_initial_condition() {
        let mut expr = compile_expression("integ(x, 3)").unwrap();
        scale_expr(&mut expr, Interval::new(0.0, 4.0), 1.0);
        // rho = 0.5, delta = 2 -> 0.5 * (3 - 2)
        assert_eq!(expr.initial_condition, 0.5);
        assert!(expr.scaled);
    }

    proptest! {
        #[test]
        fn prop_interval_ends_hit_the_limit(
            lo in -1.0e3f64..1.0e3,
            width in 1.0e-2f64..1.0e3,
            limit in 0.1f64..10.0,
        ) {
            let hi = lo + width;
            let factors = ScaleFactors::for_interval(Interval::new(lo, hi), limit);
            let tolerance = 1e-6;
            prop_assert!((factors.normalize(hi) - limit).abs() < tolerance);
            prop_assert!((factors.normalize(lo) + limit).abs() < tolerance);
        }

        #[test]
        fn prop_round_trip_recovers_value(
            lo in -1.0e3f64..1.0e3,
            width in 1.0e-2f64..1.0e3,
            v in -1.0e4f64..1.0e4,
        ) {
            let factors = ScaleFactors::for_interval(Interval::new(lo, lo + width), 1.0);
            let back = factors.denormalize(factors.normalize(v));
            prop_assert!((back - v).abs() <= 1e-9 * (v.abs() + lo.abs() + width + 1.0));
        }
    }
}
