use std::collections::BTreeMap;

use crate::environment::Environment;
use crate::runtime_value::RuntimeValue;
use crate::symbols::SymbolTable;

/// Names under which snippets read and write the output buffers.
pub const MODEL_BUFFER: &str = "_model";
pub const DEFS_BUFFER: &str = "_defs";
pub const DATA_BUFFER: &str = "_data";
pub const SETS_VIEW: &str = "_sets";
pub const PARAMS_VIEW: &str = "_params";

/// Text produced by one `$` construct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    /// Set and parameter declarations, placed before the model text.
    pub defs: String,
    /// Text replacing the construct in the document.
    pub model: String,
    /// Data-section text.
    pub data: String,
}

/// State shared by every `$` construct of one document.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub env: Environment,
    pub symbols: SymbolTable,
    pub model: String,
    pub defs: String,
    pub data: String,
}

impl ExecutionContext {
    pub fn new(bindings: &BTreeMap<String, RuntimeValue>) -> Self {
        ExecutionContext {
            env: Environment::with_bindings(bindings),
            ..ExecutionContext::default()
        }
    }

    /// Clear the three buffers before a construct runs.
    pub fn reset_buffers(&mut self) {
        self.model.clear();
        self.defs.clear();
        self.data.clear();
    }

    /// Move the buffers out as the construct's fragment.
    pub fn take_fragment(&mut self) -> Fragment {
        Fragment {
            defs: std::mem::take(&mut self.defs),
            model: std::mem::take(&mut self.model),
            data: std::mem::take(&mut self.data),
        }
    }

    /// Special names visible to snippets, if `name` is one.
    pub fn buffer(&self, name: &str) -> Option<RuntimeValue> {
        match name {
            MODEL_BUFFER => Some(RuntimeValue::String(self.model.clone())),
            DEFS_BUFFER => Some(RuntimeValue::String(self.defs.clone())),
            DATA_BUFFER => Some(RuntimeValue::String(self.data.clone())),
            SETS_VIEW => Some(self.symbols.sets_view()),
            PARAMS_VIEW => Some(self.symbols.params_view()),
            _ => None,
        }
    }

    /// Buffer assigned to by snippet code, if `name` is a writable buffer.
    pub fn buffer_mut(&mut self, name: &str) -> Option<&mut String> {
        match name {
            MODEL_BUFFER => Some(&mut self.model),
            DEFS_BUFFER => Some(&mut self.defs),
            DATA_BUFFER => Some(&mut self.data),
            _ => None,
        }
    }

    pub fn is_read_only(name: &str) -> bool {
        matches!(name, SETS_VIEW | PARAMS_VIEW)
    }
}
