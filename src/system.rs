//! ODE systems, the global emission table and model assembly
//!
//! A system is an ordered list of declarations. A declaration whose interval
//! collapses to a point is a constant; every other declaration is a state
//! variable, integrated when its expression is an integrator and recomputed
//! from its expression otherwise.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::cluster;
use crate::config::Settings;
use crate::error::{CompileError, CompileResult};
use crate::eval::Binding;
use crate::parser::compile_expression;
use crate::scaling;

/// Declared value range of a variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn is_constant(&self) -> bool {
        self.lo == self.hi
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Uncompiled declaration as read from the source text
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeclaration {
    pub name: String,
    pub text: String,
    pub interval: Interval,
}

/// `emit <source> as <alias>`
#[derive(Debug, Clone, PartialEq)]
pub struct EmitSource {
    pub source: String,
    pub alias: String,
}

/// One system as read from the source text
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSource {
    pub name: String,
    pub declarations: Vec<RawDeclaration>,
    pub total_time: f64,
    pub emits: Vec<EmitSource>,
}

/// A compiled declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub expr: Expr,
    pub interval: Interval,
}

impl Declaration {
    pub fn is_constant(&self) -> bool {
        self.interval.is_constant()
    }

    pub fn is_state(&self) -> bool {
        !self.interval.is_constant()
    }

    /// State variable carried in the integration vector
    pub fn is_integrated(&self) -> bool {
        self.is_state() && self.expr.is_integrator()
    }

    /// State variable recomputed from its expression
    pub fn is_algebraic(&self) -> bool {
        self.is_state() && !self.expr.is_integrator()
    }

    pub fn binding(&self) -> Binding {
        Binding::from_expr(self.name.clone(), &self.expr)
    }
}

/// One system of ODEs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ode {
    pub name: String,
    pub declarations: Vec<Declaration>,
    pub total_time: f64,
}

impl Ode {
    /// Compile every declaration; the first failure aborts the system
    pub fn compile(source: &SystemSource) -> CompileResult<Self> {
        let mut declarations = Vec::with_capacity(source.declarations.len());

        for raw in &source.declarations {
            let expr = compile_expression(&raw.text)
                .map_err(|e| e.in_declaration(&source.name, &raw.name))?;
            debug!("{}: {} = {}", source.name, raw.name, expr);
            declarations.push(Declaration {
                name: raw.name.clone(),
                expr,
                interval: raw.interval,
            });
        }

        Ok(Self {
            name: source.name.clone(),
            declarations,
            total_time: source.total_time,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    /// Bindings for every constant, in declaration order
    pub fn constants(&self) -> Vec<Binding> {
        self.declarations
            .iter()
            .filter(|d| d.is_constant())
            .map(Declaration::binding)
            .collect()
    }

    /// Bindings for every state variable at its initial value, in declaration order
    pub fn state_variables(&self) -> Vec<Binding> {
        self.declarations
            .iter()
            .filter(|d| d.is_state())
            .map(Declaration::binding)
            .collect()
    }

    pub fn integrated(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(|d| d.is_integrated())
    }
}

/// One exported name in the global emission table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmitEntry {
    pub alias: String,
    /// Index of the owning system
    pub system: usize,
    pub source: String,
    pub value: f64,
    pub rho: f64,
    pub delta: f64,
}

impl EmitEntry {
    pub fn new(
        alias: impl Into<String>,
        system: usize,
        source: impl Into<String>,
        value: f64,
        rho: f64,
        delta: f64,
    ) -> Self {
        Self {
            alias: alias.into(),
            system,
            source: source.into(),
            value,
            rho,
            delta,
        }
    }
}

/// Exported values shared between systems, in emit-declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalTable {
    entries: Vec<EmitEntry>,
}

impl GlobalTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: EmitEntry) {
        self.entries.push(entry);
    }

    pub fn get(&self, alias: &str) -> Option<&EmitEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    pub fn entries(&self) -> &[EmitEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aliases exported from one variable of one system
    pub fn aliases_of<'a>(&'a self, system: usize, source: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |e| e.system == system && e.source == source)
            .map(|e| e.alias.as_str())
    }

    /// Copy a variable's current value into every entry it feeds
    pub fn publish(&mut self, system: usize, binding: &Binding) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.system == system && e.source == binding.name)
        {
            entry.value = binding.value;
            entry.rho = binding.rho;
            entry.delta = binding.delta;
        }
    }
}

/// All compiled systems plus their shared emission table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub systems: Vec<Ode>,
    pub globals: GlobalTable,
    /// Whether the scaling transform was applied
    pub scaled: bool,
}

impl Model {
    /// Compile, optionally scale and cluster every system, then seed the emission table
    pub fn compile(sources: &[SystemSource], settings: &Settings) -> CompileResult<Self> {
        let scaled = settings.simulation.scaled;
        let mut systems = Vec::with_capacity(sources.len());

        for source in sources {
            let mut ode = Ode::compile(source)?;
            if scaled {
                scaling::scale_system(&mut ode, settings.fpaa.voltage_limit);
            }
            if settings.clustering.enabled {
                ode = cluster::reorder(ode, &settings.clustering);
            }
            systems.push(ode);
        }

        let mut globals = GlobalTable::new();
        for (index, (source, ode)) in sources.iter().zip(&systems).enumerate() {
            for emit in &source.emits {
                if globals.get(&emit.alias).is_some() {
                    return Err(CompileError::parse_error(format!(
                        "Duplicate emit alias '{}'",
                        emit.alias
                    ))
                    .in_declaration(&ode.name, &emit.source));
                }
                let declaration = ode.find(&emit.source).ok_or_else(|| {
                    CompileError::undefined(&emit.source).in_declaration(&ode.name, &emit.source)
                })?;
                let binding = declaration.binding();
                globals.push(EmitEntry::new(
                    &emit.alias,
                    index,
                    &emit.source,
                    binding.value,
                    binding.rho,
                    binding.delta,
                ));
            }
        }

        info!(
            "Compiled {} system(s), {} global emission(s){}",
            systems.len(),
            globals.len(),
            if scaled { ", scaled" } else { "" }
        );

        Ok(Self {
            systems,
            globals,
            scaled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(name: &str, text: &str, lo: f64, hi: f64) -> RawDeclaration {
        RawDeclaration {
            name: name.to_string(),
            text: text.to_string(),
            interval: Interval::new(lo, hi),
        }
    }

    fn decay_source() -> SystemSource {
        SystemSource {
            name: "decay".to_string(),
            declarations: vec![
                raw("k", "0.5", 0.5, 0.5),
                raw("x", "integ(-k * x, 1.0)", 0.0, 1.0),
                raw("y", "2 * x", 0.0, 2.0),
            ],
            total_time: 1.0,
            emits: vec![EmitSource {
                source: "x".to_string(),
                alias: "decay_x".to_string(),
            }],
        }
    }

    #[test]
    fn test_declaration_roles() {
        let ode = Ode::compile(&decay_source()).unwrap();
        let roles: Vec<(bool, bool, bool)> = ode
            .declarations
            .iter()
            .map(|d| (d.is_constant(), d.is_integrated(), d.is_algebraic()))
            .collect();
        assert_eq!(roles, vec![(true, false, false), (false, true, false), (false, false, true)]);

        let constants = ode.constants();
        assert_eq!(constants, vec![Binding::new("k", 0.5)]);
        let names: Vec<String> = ode.state_variables().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_parse_error_names_declaration() {
        let mut source = decay_source();
        source.declarations[1].text = "integ(-k * (x, 1.0)".to_string();
        let err = Ode::compile(&source).unwrap_err();
        assert!(err.is_parse_error());
        let message = err.to_string();
        assert!(message.contains("decay"), "{}", message);
        assert!(message.contains("'x'"), "{}", message);
    }

    #[test]
    fn test_model_seeds_globals() {
        let model = Model::compile(&[decay_source()], &Settings::default()).unwrap();
        assert_eq!(model.globals.len(), 1);
        let entry = &model.globals.entries()[0];
        assert_eq!(entry.alias, "decay_x");
        assert_eq!(entry.system, 0);
        assert_eq!(entry.value, 1.0);
        assert_eq!(model.globals.aliases_of(0, "x").collect::<Vec<_>>(), vec!["decay_x"]);
    }

    #[test]
    fn test_model_rejects_unknown_emit_source() {
        let mut source = decay_source();
        source.emits[0].source = "nope".to_string();
        let err = Model::compile(&[source], &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_publish_only_touches_owning_system() {
        let mut globals = GlobalTable::new();
        globals.push(EmitEntry::new("a_x", 0, "x", 0.0, 1.0, 0.0));
        globals.push(EmitEntry::new("b_x", 1, "x", 0.0, 1.0, 0.0));

        globals.publish(1, &Binding::scaled("x", 3.0, 2.0, 0.5));

        assert_eq!(globals.get("a_x").map(|e| e.value), Some(0.0));
        let b = globals.get("b_x").unwrap();
        assert_eq!((b.value, b.rho, b.delta), (3.0, 2.0, 0.5));
    }
}
