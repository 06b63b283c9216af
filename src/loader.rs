//! Loader for `.ode` source files
//!
//! ```text
//! // comment
//! system decay {
//!     var k = 0.5;
//!     interval [0.5, 0.5];
//!     var x = integ(-k * x, 1.0);
//!     interval [0, 1];
//!     emit x as decay_x;
//!     time 10;
//! }
//! ```
//!
//! `interval` statements pair with `var` statements by position. Expression
//! text is kept raw and handed to the expression compiler later.

use std::collections::HashSet;

use log::debug;
use logos::Logos;

use crate::error::{CompileError, CompileResult};
use crate::system::{EmitSource, Interval, RawDeclaration, SystemSource};

/// Tokens of the source file format
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum SourceToken {
    #[token("system")]
    System,

    #[token("var")]
    Var,

    #[token("interval")]
    Interval,

    #[token("time")]
    Time,

    #[token("emit")]
    Emit,

    #[token("as")]
    As,

    /// Everything after `=` up to the next `;`
    #[regex(r"=[^;]*", |lex| lex.slice()[1..].trim().to_string())]
    RawExpr(String),

    #[regex(r"-?[0-9]+\.?[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"-?\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,
}

impl std::fmt::Display for SourceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceToken::System => write!(f, "system"),
            SourceToken::Var => write!(f, "var"),
            SourceToken::Interval => write!(f, "interval"),
            SourceToken::Time => write!(f, "time"),
            SourceToken::Emit => write!(f, "emit"),
            SourceToken::As => write!(f, "as"),
            SourceToken::RawExpr(text) => write!(f, "= {}", text),
            SourceToken::Number(n) => write!(f, "{}", n),
            SourceToken::Ident(s) => write!(f, "{}", s),
            SourceToken::LBrace => write!(f, "{{"),
            SourceToken::RBrace => write!(f, "}}"),
            SourceToken::LBracket => write!(f, "["),
            SourceToken::RBracket => write!(f, "]"),
            SourceToken::Comma => write!(f, ","),
            SourceToken::Semicolon => write!(f, ";"),
        }
    }
}

/// Tokens paired with their 1-based line
fn tokenize(source: &str) -> CompileResult<Vec<(SourceToken, usize)>> {
    let mut lexer = SourceToken::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut scanned = 0;

    while let Some(result) = lexer.next() {
        let start = lexer.span().start;
        line += source[scanned..start].matches('\n').count();
        scanned = start;
        match result {
            Ok(token) => tokens.push((token, line)),
            Err(()) => {
                return Err(CompileError::load(
                    line,
                    format!("unexpected input '{}'", lexer.slice()),
                ))
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent reader over the token stream
struct SourceParser {
    tokens: Vec<(SourceToken, usize)>,
    position: usize,
    /// Aliases seen so far across the whole program
    aliases: HashSet<String>,
}

impl SourceParser {
    fn new(tokens: Vec<(SourceToken, usize)>) -> Self {
        Self {
            tokens,
            position: 0,
            aliases: HashSet::new(),
        }
    }

    fn peek(&self) -> Option<&SourceToken> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    /// Line of the current token, or of the last one at end of input
    fn line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line)
    }

    fn advance(&mut self) -> Option<SourceToken> {
        let token = self.tokens.get(self.position).map(|(token, _)| token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::load(self.line(), message)
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        match self.peek() {
            Some(token) => self.error(format!("expected {}, found '{}'", expected, token)),
            None => self.error(format!("expected {}, found end of input", expected)),
        }
    }

    fn expect(&mut self, expected: SourceToken) -> CompileResult<()> {
        if self.peek() == Some(&expected) {
            self.position += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", expected)))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.peek() {
            Some(SourceToken::Ident(name)) => {
                let name = name.clone();
                self.position += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn expect_number(&mut self) -> CompileResult<f64> {
        match self.peek() {
            Some(SourceToken::Number(value)) => {
                let value = *value;
                self.position += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("a number")),
        }
    }

    fn parse_program(&mut self) -> CompileResult<Vec<SystemSource>> {
        let mut systems = Vec::new();
        while self.peek().is_some() {
            let system = self.parse_system(systems.len())?;
            systems.push(system);
        }
        if systems.is_empty() {
            return Err(self.error("no systems declared"));
        }
        Ok(systems)
    }

    fn parse_system(&mut self, index: usize) -> CompileResult<SystemSource> {
        self.expect(SourceToken::System)?;
        let name = match self.peek() {
            Some(SourceToken::Ident(_)) => self.expect_ident()?,
            _ => format!("system{}", index),
        };
        self.expect(SourceToken::LBrace)?;

        let mut vars: Vec<(String, String)> = Vec::new();
        let mut intervals: Vec<Interval> = Vec::new();
        let mut total_time = None;
        let mut emits: Vec<EmitSource> = Vec::new();
        let mut emit_lines = Vec::new();

        loop {
            match self.advance() {
                Some(SourceToken::Var) => {
                    let var = self.expect_ident()?;
                    let text = match self.peek() {
                        Some(SourceToken::RawExpr(text)) => text.clone(),
                        _ => return Err(self.unexpected("'=' and an expression")),
                    };
                    self.position += 1;
                    if text.is_empty() {
                        return Err(self.error(format!("empty expression for '{}'", var)));
                    }
                    if vars.iter().any(|(existing, _)| existing == &var) {
                        return Err(self.error(format!("'{}' declared twice in '{}'", var, name)));
                    }
                    self.expect(SourceToken::Semicolon)?;
                    vars.push((var, text));
                }
                Some(SourceToken::Interval) => {
                    self.expect(SourceToken::LBracket)?;
                    let lo = self.expect_number()?;
                    self.expect(SourceToken::Comma)?;
                    let hi = self.expect_number()?;
                    self.expect(SourceToken::RBracket)?;
                    if lo > hi {
                        return Err(self.error(format!("interval [{}, {}] is reversed", lo, hi)));
                    }
                    self.expect(SourceToken::Semicolon)?;
                    intervals.push(Interval::new(lo, hi));
                }
                Some(SourceToken::Time) => {
                    let time = self.expect_number()?;
                    if total_time.is_some() {
                        return Err(self.error(format!("'{}' declares time twice", name)));
                    }
                    if time <= 0.0 {
                        return Err(self.error(format!("time must be positive, got {}", time)));
                    }
                    self.expect(SourceToken::Semicolon)?;
                    total_time = Some(time);
                }
                Some(SourceToken::Emit) => {
                    let line = self.line();
                    let source = self.expect_ident()?;
                    self.expect(SourceToken::As)?;
                    let alias = self.expect_ident()?;
                    if !self.aliases.insert(alias.clone()) {
                        return Err(self.error(format!("alias '{}' is already emitted", alias)));
                    }
                    self.expect(SourceToken::Semicolon)?;
                    emits.push(EmitSource { source, alias });
                    emit_lines.push(line);
                }
                Some(SourceToken::RBrace) => break,
                Some(_) => {
                    self.position -= 1;
                    return Err(self.unexpected("'var', 'interval', 'time', 'emit' or '}'"));
                }
                None => return Err(self.error(format!("unterminated system '{}'", name))),
            }
        }

        // The closing brace has been consumed
        let close_line = self.tokens[self.position - 1].1;

        if vars.len() != intervals.len() {
            return Err(CompileError::load(
                close_line,
                format!(
                    "'{}' has {} var(s) but {} interval(s)",
                    name,
                    vars.len(),
                    intervals.len()
                ),
            ));
        }
        let total_time = total_time
            .ok_or_else(|| CompileError::load(close_line, format!("'{}' declares no time", name)))?;

        for (emit, line) in emits.iter().zip(emit_lines) {
            if !vars.iter().any(|(var, _)| var == &emit.source) {
                return Err(CompileError::load(
                    line,
                    format!("emit source '{}' is not declared in '{}'", emit.source, name),
                ));
            }
        }

        let declarations: Vec<RawDeclaration> = vars
            .into_iter()
            .zip(intervals)
            .map(|((name, text), interval)| RawDeclaration {
                name,
                text,
                interval,
            })
            .collect();

        debug!(
            "Loaded system '{}': {} declaration(s), {} emit(s), time {}",
            name,
            declarations.len(),
            emits.len(),
            total_time
        );

        Ok(SystemSource {
            name,
            declarations,
            total_time,
            emits,
        })
    }
}

/// Read every system block from source text
pub fn load_source(source: &str) -> CompileResult<Vec<SystemSource>> {
    let tokens = tokenize(source)?;
    SourceParser::new(tokens).parse_program()
}

/// Read a source file from disk
pub fn load_file(path: impl AsRef<std::path::Path>) -> CompileResult<Vec<SystemSource>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| CompileError::load(0, format!("{}: {}", path.display(), e)))?;
    load_source(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LORENZ: &str = "
// Lorenz attractor
system lorenz {
    var sigma = 10;
    interval [10, 10];
    var x = integ(sigma * (y - x), 1.0);
    interval [-30, 30];
    var y = integ(x * (28 - z) - y, 1.0);
    interval [-30, 30];
    var z = integ(x * y - 8 / 3 * z, 1.0);
    interval [0, 60];
    emit x as lx; // exported
    time 20;
}
";

    fn line_of_error(err: CompileError) -> usize {
        match err {
            CompileError::LoadError { line, .. } => line,
            other => panic!("expected a load error, got {}", other),
        }
    }

    #[test]
    fn test_load_lorenz() {
        let systems = load_source(LORENZ).unwrap();
        assert_eq!(systems.len(), 1);
        let lorenz = &systems[0];
        assert_eq!(lorenz.name, "lorenz");
        assert_eq!(lorenz.total_time, 20.0);

        let names: Vec<&str> = lorenz.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sigma", "x", "y", "z"]);
        assert_eq!(lorenz.declarations[1].text, "integ(sigma * (y - x), 1.0)");
        assert_eq!(lorenz.declarations[0].interval, Interval::new(10.0, 10.0));
        assert_eq!(lorenz.declarations[3].interval, Interval::new(0.0, 60.0));

        assert_eq!(
            lorenz.emits,
            vec![EmitSource {
                source: "x".to_string(),
                alias: "lx".to_string(),
            }]
        );
    }

    #[test]
    fn test_negative_bounds_and_unnamed_systems() {
        let source = "
            system { var a = 1; interval [-.5, -0.25]; time 1; }
            system { var b = 2; interval [-1e1, 1e1]; time 2; }
        ";
        let systems = load_source(source).unwrap();
        assert_eq!(systems[0].name, "system0");
        assert_eq!(systems[1].name, "system1");
        assert_eq!(systems[0].declarations[0].interval, Interval::new(-0.5, -0.25));
        assert_eq!(systems[1].declarations[0].interval, Interval::new(-10.0, 10.0));
    }

    #[test]
    fn test_multiline_expression() {
        let source = "system s {\n    var x = integ(\n        -x,\n        1);\n    interval [0, 1];\n    time 1;\n}";
        let systems = load_source(source).unwrap();
        assert_eq!(systems[0].declarations[0].text, "integ(\n        -x,\n        1)");
    }

    #[test]
    fn test_interval_count_mismatch() {
        let source = "system s {\n  var a = 1;\n  var b = 2;\n  interval [0, 1];\n  time 1;\n}\n";
        let err = load_source(source).unwrap_err();
        assert!(err.to_string().contains("2 var(s) but 1 interval(s)"));
        assert_eq!(line_of_error(err), 6);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let cases = [
            ("system s {\n  var a = 1;\n  interval [2, 1];\n  time 1;\n}", 3),
            ("system s {\n  var a = 1;\n  interval [0, 1];\n  time 0;\n}", 4),
            ("system s {\n  var a = 1;\n  interval [0, 1];\n}", 4),
            ("system s {\n  var a = 1;\n  interval [0, 1];\n  time 1;\n  time 2;\n}", 5),
            ("system s {\n  var a = 1;\n  var a = 2;\n}", 3),
            ("system s {\n  var a = 1;\n  interval [0, 1];\n  time 1;\n  emit b as c;\n}", 5),
            ("system s {\n  var a = 1;\n  interval [0 1];\n}", 3),
            ("system s {\n  var a = 1;\n  $\n}", 3),
            ("system s {\n  var a = ;\n}", 2),
            ("system s {\n  var a = 1;\n", 2),
        ];
        for (source, line) in cases {
            let err = load_source(source).unwrap_err();
            assert_eq!(line_of_error(err), line, "{}", source);
        }
    }

    #[test]
    fn test_line_numbers_after_comments_and_earlier_systems() {
        let source = "// header\n\
            system a { var x = 1; interval [0, 1]; time 1; }\n\
            // between\n\
            \n\
            system b {\n  var y = integ(\n    y, 0);\n  interval [1, 0];\n}\n";
        let err = load_source(source).unwrap_err();
        assert_eq!(line_of_error(err), 8);
    }

    #[test]
    fn test_duplicate_alias_across_systems() {
        let source = "
            system a { var x = 1; interval [0, 1]; emit x as shared; time 1; }
            system b { var y = 1; interval [0, 1]; emit y as shared; time 1; }
        ";
        let err = load_source(source).unwrap_err();
        assert!(err.to_string().contains("'shared'"));
    }

    #[test]
    fn test_empty_source() {
        let err = load_source("// nothing here\n").unwrap_err();
        assert!(err.to_string().contains("no systems"));
    }
}
