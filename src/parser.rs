//! Expression compiler for ODE right-hand sides
//!
//! Parses declarations like:
//! - `sigma * (y - x)`
//! - `integ(x * (rho - z) - y, 1.0)`
//! - `-k * sin(theta)`
//!
//! The token stream is rewritten so that unary minus becomes a multiplication
//! by `-1`, converted to postfix with a precedence stack, and folded into a
//! tree in a single left-to-right scan. Node identifiers follow build order.

use crate::ast::{BinaryOp, Expr, Node, NodeKind, WaveKind};
use crate::error::{CompileError, CompileResult};
use crate::eval::{EvalContext, EvalMode, Evaluator};
use crate::lexer::{Lexer, Token};

/// One item of a postfix (reverse-Polish) stream
#[derive(Debug, Clone, PartialEq)]
pub enum PostfixItem {
    Number(f64),
    Variable(String),
    Operator(BinaryOp),
    Wave(WaveKind),
}

impl std::fmt::Display for PostfixItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostfixItem::Number(n) => write!(f, "{}", n),
            PostfixItem::Variable(name) => write!(f, "{}", name),
            PostfixItem::Operator(op) => write!(f, "{}", op),
            PostfixItem::Wave(wave) => write!(f, "{}", wave),
        }
    }
}

/// Parser for one declaration's right-hand side
pub struct Parser<'source> {
    source: &'source str,
    next_id: usize,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self { source, next_id: 1 }
    }

    /// Parse the declaration into an expression with its initial condition
    pub fn parse_expr(&mut self) -> CompileResult<Expr> {
        let tokens = Lexer::new(self.source).tokenize()?;
        if tokens.is_empty() {
            return Err(CompileError::parse_error("Empty expression"));
        }

        if tokens[0] == Token::Integ {
            let (inner, initial) = split_integrator(&tokens)?;
            let body = self.parse_body(inner)?;
            let root = Node::new(
                self.allocate_id(),
                NodeKind::Integrator {
                    operand: Box::new(body),
                },
            );
            return Ok(Expr::new(root, initial));
        }

        let root = self.parse_body(&tokens)?;
        let initial = if root.variables().is_empty() {
            // Literal-only declarations fold to their value
            let context = EvalContext::empty();
            Evaluator::new(EvalMode::Unscaled).evaluate_node(&root, &context)?
        } else {
            0.0
        };
        Ok(Expr::new(root, initial))
    }

    fn parse_body(&mut self, tokens: &[Token]) -> CompileResult<Node> {
        if tokens.is_empty() {
            return Err(CompileError::parse_error("Empty expression"));
        }
        if tokens.iter().any(|t| matches!(t, Token::Integ | Token::Comma)) {
            return Err(CompileError::parse_error(
                "'integ' is only allowed as the outermost form",
            ));
        }
        let rewritten = rewrite_unary_minus(tokens)?;
        let postfix = to_postfix(&rewritten)?;
        self.build_tree(postfix)
    }

    fn allocate_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Fold a postfix stream into a tree, numbering nodes as they are created
    fn build_tree(&mut self, postfix: Vec<PostfixItem>) -> CompileResult<Node> {
        let mut stack: Vec<Node> = Vec::new();

        for item in postfix {
            let node = match item {
                PostfixItem::Number(n) => Node::new(self.allocate_id(), NodeKind::Number(n)),
                PostfixItem::Variable(name) => {
                    Node::new(self.allocate_id(), NodeKind::Variable(name))
                }
                PostfixItem::Wave(wave) => {
                    let operand = stack.pop().ok_or_else(|| {
                        CompileError::parse_error(format!("Missing operand for {}", wave))
                    })?;
                    Node::new(
                        self.allocate_id(),
                        NodeKind::Wave {
                            wave,
                            operand: Box::new(operand),
                        },
                    )
                }
                PostfixItem::Operator(op) => {
                    let (right, left) = match (stack.pop(), stack.pop()) {
                        (Some(right), Some(left)) => (right, left),
                        _ => {
                            return Err(CompileError::parse_error(format!(
                                "Missing operand for '{}'",
                                op
                            )))
                        }
                    };
                    Node::new(
                        self.allocate_id(),
                        NodeKind::Operator {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    )
                }
            };
            stack.push(node);
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(root), true) => Ok(root),
            (None, _) => Err(CompileError::parse_error("Empty expression")),
            (Some(_), false) => Err(CompileError::parse_error(
                "Malformed expression: operands without an operator",
            )),
        }
    }
}

/// Compile one right-hand side
pub fn compile_expression(source: &str) -> CompileResult<Expr> {
    Parser::new(source).parse_expr()
}

/// Split `integ ( <inner> , [-]<number> )` into the inner tokens and the initial value
fn split_integrator(tokens: &[Token]) -> CompileResult<(&[Token], f64)> {
    let malformed = || {
        CompileError::parse_error("Malformed integrator, expected integ(<expr>, <number>)")
    };

    let n = tokens.len();
    if n < 6 || tokens[1] != Token::LParen || tokens[n - 1] != Token::RParen {
        return Err(malformed());
    }

    let magnitude = match &tokens[n - 2] {
        Token::Number(value) => *value,
        _ => return Err(malformed()),
    };
    let (initial, comma) = match tokens[n - 3] {
        Token::Minus => (-magnitude, n - 4),
        Token::Plus => (magnitude, n - 4),
        _ => (magnitude, n - 3),
    };
    if comma < 2 || tokens[comma] != Token::Comma {
        return Err(malformed());
    }

    Ok((&tokens[2..comma], initial))
}

/// A minus is unary at the start or right after an operator or '('
fn is_unary_position(previous: Option<&Token>) -> bool {
    match previous {
        None => true,
        Some(token) => token.is_operator() || matches!(token, Token::LParen | Token::Comma),
    }
}

/// Rewrite unary minus as multiplication by `-1`
///
/// A negated literal folds into a signed literal. Any other operand is
/// wrapped as `( -1 * operand )` so the rewrite binds tighter than the
/// surrounding operators.
fn rewrite_unary_minus(tokens: &[Token]) -> CompileResult<Vec<Token>> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut depth = 0usize;
    // Paren depths at which a pending `( -1 * ` wrapper must be closed
    let mut closers: Vec<usize> = Vec::new();

    fn close_operands(out: &mut Vec<Token>, depth: &mut usize, closers: &mut Vec<usize>) {
        while closers.last() == Some(&*depth) {
            out.push(Token::RParen);
            *depth -= 1;
            closers.pop();
        }
    }

    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if *token == Token::Minus && is_unary_position(out.last()) {
            match iter.peek() {
                None => return Err(CompileError::parse_error("Dangling unary minus")),
                Some(Token::Number(n)) => {
                    out.push(Token::Number(-n));
                    iter.next();
                    close_operands(&mut out, &mut depth, &mut closers);
                }
                Some(_) => {
                    out.push(Token::LParen);
                    depth += 1;
                    out.push(Token::Number(-1.0));
                    out.push(Token::Star);
                    closers.push(depth);
                }
            }
            continue;
        }

        out.push(token.clone());
        match token {
            Token::Number(_) | Token::Ident(_) => {
                close_operands(&mut out, &mut depth, &mut closers);
            }
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| CompileError::parse_error("Unmatched ')'"))?;
                close_operands(&mut out, &mut depth, &mut closers);
            }
            _ => {}
        }
    }

    Ok(out)
}

/// Convert infix tokens to postfix with a precedence stack
pub fn to_postfix(tokens: &[Token]) -> CompileResult<Vec<PostfixItem>> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<&Token> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Number(n) => output.push(PostfixItem::Number(*n)),
            Token::Ident(name) => output.push(PostfixItem::Variable(name.clone())),

            Token::Plus | Token::Minus => {
                while let Some(top) = stack.last() {
                    if !top.is_operator() {
                        break;
                    }
                    output.push(postfix_operator(top)?);
                    stack.pop();
                }
                stack.push(token);
            }

            Token::Star | Token::Slash => {
                while let Some(top) = stack.last() {
                    if !matches!(top, Token::Star | Token::Slash) {
                        break;
                    }
                    output.push(postfix_operator(top)?);
                    stack.pop();
                }
                stack.push(token);
            }

            Token::Sin | Token::Cos => {
                if tokens.get(i + 1) != Some(&Token::LParen) {
                    return Err(CompileError::parse_error(format!(
                        "Expected '(' after {}",
                        token
                    )));
                }
                stack.push(token);
            }

            Token::LParen => stack.push(token),

            Token::RParen => {
                loop {
                    match stack.pop() {
                        None => return Err(CompileError::parse_error("Unmatched ')'")),
                        Some(Token::LParen) => break,
                        Some(top) => output.push(postfix_operator(top)?),
                    }
                }
                if stack.last().map_or(false, |top| top.is_wave()) {
                    if let Some(wave) = stack.pop() {
                        output.push(postfix_operator(wave)?);
                    }
                }
            }

            Token::Integ | Token::Comma => {
                return Err(CompileError::parse_error(format!(
                    "Unexpected token '{}'",
                    token
                )))
            }
        }
    }

    while let Some(top) = stack.pop() {
        if *top == Token::LParen {
            return Err(CompileError::parse_error("Unmatched '('"));
        }
        output.push(postfix_operator(top)?);
    }

    Ok(output)
}

fn postfix_operator(token: &Token) -> CompileResult<PostfixItem> {
    match token {
        Token::Plus => Ok(PostfixItem::Operator(BinaryOp::Add)),
        Token::Minus => Ok(PostfixItem::Operator(BinaryOp::Sub)),
        Token::Star => Ok(PostfixItem::Operator(BinaryOp::Mul)),
        Token::Slash => Ok(PostfixItem::Operator(BinaryOp::Div)),
        Token::Sin => Ok(PostfixItem::Wave(WaveKind::Sin)),
        Token::Cos => Ok(PostfixItem::Wave(WaveKind::Cos)),
        other => Err(CompileError::parse_error(format!(
            "Unexpected token '{}'",
            other
        ))),
    }
}
