//! Error types for the ODE to FPAA compiler

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Load error on line {line}: {message}")]
    LoadError { line: usize, message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Division by zero in {expression}")]
    DivisionByZero { expression: String },

    #[error("Evaluation error: {message}")]
    EvaluationError { message: String },

    #[error("Config error for variable {variable}: {message}")]
    ConfigError { variable: String, message: String },

    #[error("In system '{system}', variable '{variable}': {source}")]
    Declaration {
        system: String,
        variable: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("Settings error: {message}")]
    Settings { message: String },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn load(line: usize, msg: impl Into<String>) -> Self {
        CompileError::LoadError {
            line,
            message: msg.into(),
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        CompileError::UndefinedVariable { name: name.into() }
    }

    pub fn division_by_zero(expression: impl Into<String>) -> Self {
        CompileError::DivisionByZero {
            expression: expression.into(),
        }
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        CompileError::EvaluationError { message: msg.into() }
    }

    pub fn config(variable: impl Into<String>, msg: impl Into<String>) -> Self {
        CompileError::ConfigError {
            variable: variable.into(),
            message: msg.into(),
        }
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        CompileError::Settings { message: msg.into() }
    }

    /// Attach the declaration an error came from
    pub fn in_declaration(self, system: impl Into<String>, variable: impl Into<String>) -> Self {
        CompileError::Declaration {
            system: system.into(),
            variable: variable.into(),
            source: Box::new(self),
        }
    }

    /// True for the parse-time failures (lexing, grammar, integrator form)
    pub fn is_parse_error(&self) -> bool {
        match self {
            CompileError::LexerError { .. } | CompileError::ParseError { .. } => true,
            CompileError::Declaration { source, .. } => source.is_parse_error(),
            _ => false,
        }
    }

    /// True for failures raised while evaluating an expression tree
    pub fn is_evaluation_error(&self) -> bool {
        match self {
            CompileError::UndefinedVariable { .. }
            | CompileError::DivisionByZero { .. }
            | CompileError::EvaluationError { .. } => true,
            CompileError::Declaration { source, .. } => source.is_evaluation_error(),
            _ => false,
        }
    }
}
