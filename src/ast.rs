//! Abstract Syntax Tree definitions for ODE right-hand sides
//!
//! Every node owns its children, so an expression is a strict tree. Each node
//! also carries the identifier it received when the tree was built; the code
//! generator uses it as the physical block address.

use serde::{Deserialize, Serialize};

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }

    pub fn apply(&self, left: f64, right: f64) -> f64 {
        match self {
            BinaryOp::Add => left + right,
            BinaryOp::Sub => left - right,
            BinaryOp::Mul => left * right,
            BinaryOp::Div => left / right,
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Unary trigonometric functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaveKind {
    Sin,
    Cos,
}

impl WaveKind {
    pub fn name(&self) -> &'static str {
        match self {
            WaveKind::Sin => "sin",
            WaveKind::Cos => "cos",
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        match self {
            WaveKind::Sin => value.sin(),
            WaveKind::Cos => value.cos(),
        }
    }
}

impl std::fmt::Display for WaveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A tree node with its build-order identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub kind: NodeKind,
}

/// Node kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Numeric literal
    Number(f64),

    /// Variable reference: a constant, a state variable or a global alias
    Variable(String),

    /// Binary arithmetic: `left op right`
    Operator {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },

    /// `sin(operand)` or `cos(operand)`
    Wave { wave: WaveKind, operand: Box<Node> },

    /// Analog integrator wrapping the derivative expression
    Integrator { operand: Box<Node> },
}

/// Structural label used when comparing trees: kind plus operator/function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    Number,
    Variable,
    Operator(BinaryOp),
    Wave(WaveKind),
    Integrator,
}

impl Node {
    pub fn new(id: usize, kind: NodeKind) -> Self {
        Self { id, kind }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Number(_) | NodeKind::Variable(_))
    }

    pub fn label(&self) -> NodeLabel {
        match &self.kind {
            NodeKind::Number(_) => NodeLabel::Number,
            NodeKind::Variable(_) => NodeLabel::Variable,
            NodeKind::Operator { op, .. } => NodeLabel::Operator(*op),
            NodeKind::Wave { wave, .. } => NodeLabel::Wave(*wave),
            NodeKind::Integrator { .. } => NodeLabel::Integrator,
        }
    }

    /// Left child; unary nodes keep their operand on the left
    pub fn left(&self) -> Option<&Node> {
        match &self.kind {
            NodeKind::Operator { left, .. } => Some(left),
            NodeKind::Wave { operand, .. } | NodeKind::Integrator { operand } => Some(operand),
            NodeKind::Number(_) | NodeKind::Variable(_) => None,
        }
    }

    pub fn right(&self) -> Option<&Node> {
        match &self.kind {
            NodeKind::Operator { right, .. } => Some(right),
            _ => None,
        }
    }

    /// Number of nodes in this subtree
    pub fn size(&self) -> usize {
        1 + self.left().map_or(0, Node::size) + self.right().map_or(0, Node::size)
    }

    /// Leaves in left-to-right order
    pub fn leaves(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Node>) {
        if self.is_leaf() {
            out.push(self);
            return;
        }
        if let Some(left) = self.left() {
            left.collect_leaves(out);
        }
        if let Some(right) = self.right() {
            right.collect_leaves(out);
        }
    }

    /// Names of every variable referenced in this subtree, left to right
    pub fn variables(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match &leaf.kind {
                NodeKind::Variable(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NodeKind::Number(n) => write!(f, "{}", n),
            NodeKind::Variable(name) => write!(f, "{}", name),
            NodeKind::Operator { op, left, right } => write!(f, "({} {} {})", left, op, right),
            NodeKind::Wave { wave, operand } => write!(f, "{}({})", wave, operand),
            NodeKind::Integrator { operand } => write!(f, "integ({})", operand),
        }
    }
}

/// One compiled declaration: the tree plus its scale parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub root: Node,
    /// Meaningful for integrator roots and constant-valued expressions
    pub initial_condition: f64,
    /// Multiplier from real to normalised units
    pub rho: f64,
    /// Offset subtracted before scaling
    pub delta: f64,
    /// Set once the scaling transform has rewritten this expression
    pub scaled: bool,
}

impl Expr {
    pub fn new(root: Node, initial_condition: f64) -> Self {
        Self {
            root,
            initial_condition,
            rho: 1.0,
            delta: 0.0,
            scaled: false,
        }
    }

    pub fn is_integrator(&self) -> bool {
        matches!(self.root.kind, NodeKind::Integrator { .. })
    }

    /// The derivative expression for integrators, the whole tree otherwise
    pub fn body(&self) -> &Node {
        match &self.root.kind {
            NodeKind::Integrator { operand } => operand,
            _ => &self.root,
        }
    }

    pub fn node_count(&self) -> usize {
        self.root.size()
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_integrator() {
            write!(f, "integ({}, {})", self.body(), self.initial_condition)
        } else {
            write!(f, "{}", self.root)
        }
    }
}
