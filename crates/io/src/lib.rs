// Document codecs: definition JSON, instance containers, stack files

pub mod definition;
pub mod error;
pub mod ini;
pub mod instance;
pub mod source;
pub mod stack_file;

pub use definition::parse_definition;
pub use error::FormatError;
pub use instance::parse_instance;
pub use source::{DocumentFormat, TextSource};
pub use stack_file::{assemble_stack, parse_stack, StackFile, StackKind};

/// Suffix of global container stack files.
pub const GLOBAL_STACK_SUFFIX: &str = ".global.cfg";
/// Suffix of extruder container stack files.
pub const EXTRUDER_STACK_SUFFIX: &str = ".extruder.cfg";
