use std::collections::HashMap;

use crate::runtime_value::RuntimeValue;

/// A single scope level. The bottom scope holds the document's variables;
/// comprehensions push a scope for their loop variables.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: HashMap<String, RuntimeValue>,
}

impl Scope {
    pub fn get_variable(&self, name: &str) -> Option<&RuntimeValue> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: RuntimeValue) {
        self.variables.insert(name.to_string(), value);
    }
}

/// Variables visible to snippets. Persists across all `$` constructs of one document.
#[derive(Debug, Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            scopes: vec![Scope::default()],
        }
    }

    /// An environment whose document scope starts with the given bindings.
    pub fn with_bindings<'a>(bindings: impl IntoIterator<Item = (&'a String, &'a RuntimeValue)>) -> Self {
        let mut env = Environment::new();
        for (name, value) in bindings {
            env.set_variable(name, value.clone());
        }
        env
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope. The document scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Look a variable up from the innermost scope outwards.
    pub fn get_variable(&self, name: &str) -> Option<&RuntimeValue> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get_variable(name))
    }

    /// Bind in the innermost scope.
    pub fn set_variable(&mut self, name: &str, value: RuntimeValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.set_variable(name, value);
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.get_variable(name).is_some()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_and_is_discarded() {
        let mut env = Environment::new();
        env.set_variable("x", RuntimeValue::Integer(1));
        env.push_scope();
        env.set_variable("x", RuntimeValue::Integer(2));
        assert_eq!(env.get_variable("x"), Some(&RuntimeValue::Integer(2)));
        env.pop_scope();
        assert_eq!(env.get_variable("x"), Some(&RuntimeValue::Integer(1)));
        env.pop_scope();
        assert!(env.has_variable("x"));
    }
}
