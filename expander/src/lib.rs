pub mod ampl;
pub mod assembler;
pub mod builtins;
pub mod command;
pub mod context;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod evaluator_helpers;
pub mod executor;
pub mod linear;
pub mod model;
pub mod runtime_value;
pub mod submodel;
pub mod symbols;

pub use assembler::DataMode;
pub use command::{Arguments, Command, CommandFactory, Invocation};
pub use context::{ExecutionContext, Fragment};
pub use error::{DiagnosticError, RuntimeError};
pub use executor::{Engine, TranslateOptions};
pub use linear::LinearConstraint;
pub use runtime_value::RuntimeValue;
pub use submodel::{Decoded, DecodedPath, Extraction, Submodel, SubmodelState, ValueLookup};
