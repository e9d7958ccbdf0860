use thiserror::Error;

/// Top-level error type for the simulator
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Malformed trace: {0}")]
    TraceError(#[from] TraceError),

    #[error("Execution error: {0}")]
    ExecutionError(#[from] ExecutionError),

    #[error("Coherence error: {0}")]
    CoherenceError(#[from] CoherenceError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Errors raised while turning trace text into requests.
/// Line numbers are 1-based.
#[derive(Error, Debug, PartialEq)]
pub enum TraceError {
    #[error("line {line}: expected at most {max} fields, found {found}")]
    FieldCount { line: usize, max: usize, found: usize },

    #[error("line {line}: invalid request format '{text}'")]
    InvalidFormat { line: usize, text: String },

    #[error("line {line}: invalid processor ID '{id}'")]
    InvalidProcessor { line: usize, id: String },

    #[error("line {line}: invalid operation '{op}'")]
    InvalidOperation { line: usize, op: String },

    #[error("line {line}: invalid number '{text}'")]
    InvalidNumber { line: usize, text: String },
}

/// Errors related to driving the simulation
#[derive(Error, Debug, PartialEq)]
pub enum ExecutionError {
    #[error("Barrier deadlock at cycle {cycle}: {pending} requests can never drain")]
    BarrierDeadlock { cycle: usize, pending: usize },
}

/// Violations found by the coherence audit
#[derive(Error, Debug, PartialEq)]
pub enum CoherenceError {
    #[error("Block {address:#06x} is Modified in cores {cores:?}")]
    MultipleWriters { address: u16, cores: Vec<usize> },

    #[error(
        "Block {address:#06x} is held by core {owner} in state {state} \
         while other cores hold copies {others:?}"
    )]
    StaleCopy {
        address: u16,
        owner: usize,
        state: char,
        others: Vec<usize>,
    },
}

/// Type alias for Result with SimulatorError
pub type SimulatorResult<T> = Result<T, SimulatorError>;
