// Formula parsing and evaluation

pub mod parser;
pub mod eval;
pub mod functions;
pub mod analyze;
