//! Hardware interface definitions for the analog array
//!
//! An FPAA is built from configurable analog blocks (CABs), each performing
//! one operation on signals bounded by a symmetric voltage limit. One
//! integrator expression maps to one block group: its input slots, its CABs
//! and its output pins.

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, WaveKind};

/// Configuration for the target analog fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FpaaConfig {
    /// Symmetric signal limit `L` every variable is scaled onto
    pub voltage_limit: f64,
    /// Number of CABs available to one block group
    pub cab_count: usize,
}

impl FpaaConfig {
    pub fn new(voltage_limit: f64, cab_count: usize) -> Self {
        Self {
            voltage_limit,
            cab_count,
        }
    }
}

impl Default for FpaaConfig {
    fn default() -> Self {
        Self::new(1.0, 64)
    }
}

/// Operation performed by one CAB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CabOp {
    Integ,
    Sin,
    Cos,
    Sum,
    /// Subtraction
    Min,
    Mul,
    Div,
}

impl CabOp {
    pub fn name(&self) -> &'static str {
        match self {
            CabOp::Integ => "integ",
            CabOp::Sin => "sin",
            CabOp::Cos => "cos",
            CabOp::Sum => "sum",
            CabOp::Min => "min",
            CabOp::Mul => "mul",
            CabOp::Div => "div",
        }
    }
}

impl From<BinaryOp> for CabOp {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => CabOp::Sum,
            BinaryOp::Sub => CabOp::Min,
            BinaryOp::Mul => CabOp::Mul,
            BinaryOp::Div => CabOp::Div,
        }
    }
}

impl From<WaveKind> for CabOp {
    fn from(wave: WaveKind) -> Self {
        match wave {
            WaveKind::Sin => CabOp::Sin,
            WaveKind::Cos => CabOp::Cos,
        }
    }
}

impl std::fmt::Display for CabOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What drives an input slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputSource {
    /// A declared constant, resolved to its (possibly scaled) value
    Constant { name: String, value: f64 },
    /// A literal from the expression text
    Literal(f64),
    /// A live signal from another circuit
    External(String),
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Constant { value, .. } | InputSource::Literal(value) => {
                write!(f, "{}", value)
            }
            InputSource::External(name) => write!(f, "{}", name),
        }
    }
}

/// A named hardware input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub source: InputSource,
}

/// A CAB input: an input slot or another CAB's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockInput {
    Slot(String),
    Block(usize),
}

impl std::fmt::Display for BlockInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockInput::Slot(name) => write!(f, "{}", name),
            BlockInput::Block(id) => write!(f, "{}", cab_name(*id)),
        }
    }
}

/// Physical name of the CAB built for node `id`
pub fn cab_name(id: usize) -> String {
    format!("CAB_{}", id)
}

/// One configured analog block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CabBlock {
    /// Build-order identifier of the AST node this block implements
    pub id: usize,
    pub op: CabOp,
    pub inputs: Vec<BlockInput>,
    pub scale: f64,
}

/// The circuit for one integrator expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockGroup {
    pub index: usize,
    pub system: String,
    pub variable: String,
    pub inputs: Vec<InputSlot>,
    pub blocks: Vec<CabBlock>,
    /// Primary variable first, then global aliases in emit order
    pub outputs: Vec<String>,
}

impl BlockGroup {
    pub fn name(&self) -> String {
        format!("FPAASystem_{}", self.index)
    }
}

/// An expression whose block group could not be generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGroup {
    pub system: String,
    pub variable: String,
    pub reason: String,
}

/// A complete hardware program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProgram {
    /// Configuration for the target fabric
    pub config: FpaaConfig,
    /// Block groups in declaration order
    pub groups: Vec<BlockGroup>,
    /// Expressions that failed and were left out
    pub skipped: Vec<SkippedGroup>,
    /// Total CABs across all groups
    pub total_blocks: usize,
}

impl HardwareProgram {
    pub fn new(config: FpaaConfig) -> Self {
        Self {
            config,
            groups: Vec::new(),
            skipped: Vec::new(),
            total_blocks: 0,
        }
    }

    /// Add a group to the program
    pub fn add_group(&mut self, group: BlockGroup) {
        self.total_blocks += group.blocks.len();
        self.groups.push(group);
    }

    pub fn group_for(&self, variable: &str) -> Option<&BlockGroup> {
        self.groups.iter().find(|g| g.variable == variable)
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export in the fabric's configuration syntax
    pub fn to_config_format(&self) -> String {
        let mut output = String::new();

        for group in &self.groups {
            output.push_str(&format!(
                "#FPAA Config for expression of variable {}\n{} {{\n",
                group.variable,
                group.name()
            ));

            for slot in &group.inputs {
                output.push_str(&format!("    {} = {};\n", slot.name, slot.source));
            }

            for block in &group.blocks {
                output.push_str(&format!("    {} {{\n", cab_name(block.id)));
                output.push_str(&format!("        op = {};\n", block.op));
                for (i, input) in block.inputs.iter().enumerate() {
                    output.push_str(&format!("        inp{} = {};\n", i, input));
                }
                output.push_str(&format!("        scale = {};\n", block.scale));
                output.push_str("    };\n");
            }

            for (i, pin) in group.outputs.iter().enumerate() {
                output.push_str(&format!("    outp{} = {};\n", i, pin));
            }
            output.push_str("};\n\n");
        }

        output
    }
}

impl std::fmt::Display for HardwareProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Hardware Program")?;
        writeln!(f, "================")?;
        writeln!(f, "Voltage limit: {}", self.config.voltage_limit)?;
        writeln!(f, "CABs per group: {}", self.config.cab_count)?;
        writeln!(f, "Block groups: {}", self.groups.len())?;
        writeln!(f, "Total CABs: {}", self.total_blocks)?;
        writeln!(f)?;

        for group in &self.groups {
            writeln!(f, "{} ({}.{}):", group.name(), group.system, group.variable)?;
            writeln!(f, "  Inputs: {}", group.inputs.len())?;
            writeln!(f, "  CABs: {}", group.blocks.len())?;
            writeln!(f, "  Outputs: {}", group.outputs.join(", "))?;
        }

        for skipped in &self.skipped {
            writeln!(f, "Skipped {}.{}: {}", skipped.system, skipped.variable, skipped.reason)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_group() -> BlockGroup {
        BlockGroup {
            index: 0,
            system: "decay".to_string(),
            variable: "x".to_string(),
            inputs: vec![
                InputSlot {
                    name: "in0".to_string(),
                    source: InputSource::Constant {
                        name: "k".to_string(),
                        value: 0.5,
                    },
                },
                InputSlot {
                    name: "in1".to_string(),
                    source: InputSource::External("x".to_string()),
                },
            ],
            blocks: vec![
                CabBlock {
                    id: 3,
                    op: CabOp::Mul,
                    inputs: vec![BlockInput::Slot("in0".to_string()), BlockInput::Slot("in1".to_string())],
                    scale: 1.0,
                },
                CabBlock {
                    id: 4,
                    op: CabOp::Integ,
                    inputs: vec![BlockInput::Block(3)],
                    scale: 1.0,
                },
            ],
            outputs: vec!["x".to_string(), "decay_x".to_string()],
        }
    }

    #[test]
    fn test_cab_op_names() {
        assert_eq!(CabOp::from(BinaryOp::Sub).name(), "min");
        assert_eq!(CabOp::from(BinaryOp::Add).name(), "sum");
        assert_eq!(CabOp::from(WaveKind::Cos).name(), "cos");
    }

    #[test]
    fn test_config_format() {
        let mut program = HardwareProgram::new(FpaaConfig::default());
        program.add_group(sample_group());

        let expected = "\
#FPAA Config for expression of variable x
FPAASystem_0 {
    in0 = 0.5;
    in1 = x;
    CAB_3 {
        op = mul;
        inp0 = in0;
        inp1 = in1;
        scale = 1;
    };
    CAB_4 {
        op = integ;
        inp0 = CAB_3;
        scale = 1;
    };
    outp0 = x;
    outp1 = decay_x;
};

";
        assert_eq!(program.to_config_format(), expected);
        assert_eq!(program.total_blocks, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let mut program = HardwareProgram::new(FpaaConfig::default());
        program.add_group(sample_group());
        let json = program.to_json().unwrap();
        let back: HardwareProgram = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
