//! Code generator for FPAA block groups
//!
//! Every integrator-rooted state variable becomes one block group. Leaves
//! become input slots, internal nodes become CABs addressed by their
//! build-order identifier, and the variable plus its global aliases become
//! output pins.

use std::collections::HashMap;

use log::{info, warn};

use crate::ast::{Node, NodeKind};
use crate::error::{CompileError, CompileResult};
use crate::eval::{EvalContext, Scope};
use crate::hardware::{
    BlockGroup, BlockInput, CabBlock, CabOp, FpaaConfig, HardwareProgram, InputSlot, InputSource,
    SkippedGroup,
};
use crate::system::{Declaration, GlobalTable, Model, Ode};

/// Code generator for the analog fabric
pub struct CodeGenerator {
    config: FpaaConfig,
    group_counter: usize,
}

/// Slot allocation for one group
#[derive(Default)]
struct SlotTable {
    slots: Vec<InputSlot>,
    /// Leaf node id -> slot name
    by_leaf: HashMap<usize, String>,
}

impl SlotTable {
    /// Reuse a slot with the same resolved source, or open a new one
    fn assign(&mut self, leaf_id: usize, source: InputSource) {
        let name = match self.slots.iter().find(|slot| slot.source == source) {
            Some(slot) => slot.name.clone(),
            None => {
                let name = format!("in{}", self.slots.len());
                self.slots.push(InputSlot {
                    name: name.clone(),
                    source,
                });
                name
            }
        };
        self.by_leaf.insert(leaf_id, name);
    }
}

impl CodeGenerator {
    pub fn new(config: FpaaConfig) -> Self {
        Self {
            config,
            group_counter: 0,
        }
    }

    /// Generate block groups for every integrator in the model
    ///
    /// A failing expression is recorded as skipped; the rest still generate.
    pub fn generate(&mut self, model: &Model) -> HardwareProgram {
        let mut program = HardwareProgram::new(self.config.clone());

        for (index, ode) in model.systems.iter().enumerate() {
            self.generate_system(index, ode, &model.globals, &mut program);
        }

        info!(
            "Generated {} block group(s), {} CAB(s), {} skipped",
            program.groups.len(),
            program.total_blocks,
            program.skipped.len()
        );
        program
    }

    fn generate_system(
        &mut self,
        index: usize,
        ode: &Ode,
        globals: &GlobalTable,
        program: &mut HardwareProgram,
    ) {
        let constants = ode.constants();
        let variables = ode.state_variables();
        let context = EvalContext::new(&constants, &variables, globals);

        for declaration in ode.integrated() {
            match self.generate_group(index, ode, declaration, &context, globals) {
                Ok(group) => program.add_group(group),
                Err(e) => {
                    warn!("Skipping {}.{}: {}", ode.name, declaration.name, e);
                    program.skipped.push(SkippedGroup {
                        system: ode.name.clone(),
                        variable: declaration.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Build the block group for one integrator declaration
    pub fn generate_group(
        &mut self,
        system_index: usize,
        ode: &Ode,
        declaration: &Declaration,
        context: &EvalContext<'_>,
        globals: &GlobalTable,
    ) -> CompileResult<BlockGroup> {
        let expr = &declaration.expr;
        let mut table = SlotTable::default();

        for leaf in expr.root.leaves() {
            let source = resolve_leaf(leaf, context, &declaration.name)?;
            table.assign(leaf.id, source);
        }

        let mut blocks = Vec::new();
        emit_blocks(&expr.root, &table, expr.rho, &declaration.name, &mut blocks)?;

        if blocks.len() > self.config.cab_count {
            return Err(CompileError::config(
                &declaration.name,
                format!(
                    "needs {} CABs but the fabric has {}",
                    blocks.len(),
                    self.config.cab_count
                ),
            ));
        }

        let mut outputs = vec![declaration.name.clone()];
        outputs.extend(
            globals
                .aliases_of(system_index, &declaration.name)
                .map(str::to_string),
        );

        let index = self.group_counter;
        self.group_counter += 1;

        Ok(BlockGroup {
            index,
            system: ode.name.clone(),
            variable: declaration.name.clone(),
            inputs: table.slots,
            blocks,
            outputs,
        })
    }
}

/// Constant by name, else literal, else a live reference to a declared signal
fn resolve_leaf(leaf: &Node, context: &EvalContext<'_>, variable: &str) -> CompileResult<InputSource> {
    match &leaf.kind {
        NodeKind::Variable(name) => match context.lookup(name) {
            Ok(resolved) if resolved.scope == Scope::Constant => Ok(InputSource::Constant {
                name: name.clone(),
                value: resolved.value,
            }),
            Ok(_) => Ok(InputSource::External(name.clone())),
            Err(_) => Err(CompileError::config(
                variable,
                format!("unresolved reference '{}'", name),
            )),
        },
        NodeKind::Number(value) => Ok(InputSource::Literal(*value)),
        _ => Err(CompileError::config(
            variable,
            format!("node {} is not a leaf", leaf.id),
        )),
    }
}

/// Post-order walk emitting one CAB per internal node
fn emit_blocks(
    node: &Node,
    table: &SlotTable,
    scale: f64,
    variable: &str,
    blocks: &mut Vec<CabBlock>,
) -> CompileResult<BlockInput> {
    let (op, children): (CabOp, Vec<&Node>) = match &node.kind {
        NodeKind::Number(_) | NodeKind::Variable(_) => {
            return table
                .by_leaf
                .get(&node.id)
                .cloned()
                .map(BlockInput::Slot)
                .ok_or_else(|| {
                    CompileError::config(variable, format!("leaf {} has no input slot", node.id))
                });
        }
        NodeKind::Operator { op, left, right } => ((*op).into(), vec![&**left, &**right]),
        NodeKind::Wave { wave, operand } => ((*wave).into(), vec![&**operand]),
        NodeKind::Integrator { operand } => (CabOp::Integ, vec![&**operand]),
    };

    let mut inputs = Vec::with_capacity(children.len());
    for child in children {
        inputs.push(emit_blocks(child, table, scale, variable, blocks)?);
    }

    blocks.push(CabBlock {
        id: node.id,
        op,
        inputs,
        scale,
    });
    Ok(BlockInput::Block(node.id))
}
