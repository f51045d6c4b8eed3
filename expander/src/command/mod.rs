//! Command dispatch: the `Command` trait, argument binding and the per-document registry.

pub mod atsp;
pub mod basic;
pub mod flow;
pub mod sos;

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;
use crate::submodel::{Submodel, SubmodelState};

/// The name of the command whose body is a snippet program.
pub const EXEC_COMMAND: &str = "EXEC";

// ------------------------------------------------------------------
// Arguments
// ------------------------------------------------------------------

/// Evaluated call arguments, `a, b, key=value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub positional: Vec<RuntimeValue>,
    pub keyword: Vec<(String, RuntimeValue)>,
}

impl Arguments {
    pub fn positional(values: Vec<RuntimeValue>) -> Self {
        Arguments {
            positional: values,
            keyword: Vec::new(),
        }
    }

    pub fn no_keywords(&self, callee: &str) -> Result<(), RuntimeError> {
        match self.keyword.first() {
            Some((key, _)) => Err(RuntimeError::argument(format!(
                "{}() got an unexpected keyword argument '{}'",
                callee, key
            ))),
            None => Ok(()),
        }
    }

    /// Match arguments against a parameter list; the first `required` parameters must be given.
    pub fn bind(
        self,
        callee: &str,
        params: &'static [&'static str],
        required: usize,
    ) -> Result<BoundArguments, RuntimeError> {
        if self.positional.len() > params.len() {
            return Err(RuntimeError::argument(format!(
                "{}() takes at most {} arguments ({} given)",
                callee,
                params.len(),
                self.positional.len()
            )));
        }
        let mut values: Vec<Option<RuntimeValue>> = vec![None; params.len()];
        for (slot, value) in values.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (key, value) in self.keyword {
            let Some(i) = params.iter().position(|p| *p == key) else {
                return Err(RuntimeError::argument(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    callee, key
                )));
            };
            if values[i].is_some() {
                return Err(RuntimeError::argument(format!(
                    "{}() got multiple values for argument '{}'",
                    callee, key
                )));
            }
            values[i] = Some(value);
        }
        if let Some(missing) = params[..required.min(params.len())]
            .iter()
            .zip(&values)
            .find(|(_, v)| v.is_none())
        {
            return Err(RuntimeError::argument(format!(
                "{}() missing required argument '{}'",
                callee, missing.0
            )));
        }
        Ok(BoundArguments {
            callee: callee.to_string(),
            params,
            values,
        })
    }
}

/// Arguments matched to parameter names.
#[derive(Debug)]
pub struct BoundArguments {
    callee: String,
    params: &'static [&'static str],
    values: Vec<Option<RuntimeValue>>,
}

impl BoundArguments {
    /// The argument for `name`; an explicit `None` counts as absent.
    pub fn take(&mut self, name: &str) -> Option<RuntimeValue> {
        let i = self.params.iter().position(|p| *p == name)?;
        match self.values[i].take() {
            Some(RuntimeValue::None) | None => None,
            value => value,
        }
    }

    pub fn required(&mut self, name: &str) -> Result<RuntimeValue, RuntimeError> {
        self.take(name).ok_or_else(|| {
            RuntimeError::argument(format!("{}() missing required argument '{}'", self.callee, name))
        })
    }

    pub fn flag(&mut self, name: &str) -> bool {
        self.take(name).is_some_and(|v| v.is_truthy())
    }
}

// ------------------------------------------------------------------
// Commands
// ------------------------------------------------------------------

/// One call of a command.
#[derive(Debug)]
pub struct Invocation<'a> {
    /// Raw text between `[` and `]`, if any.
    pub index: Option<&'a str>,
    pub arguments: Arguments,
    /// Namespace prefix unique to this call, e.g. `_sos17_`.
    pub prefix: String,
}

impl<'a> Invocation<'a> {
    pub fn require_index(&self, command: &str) -> Result<&'a str, RuntimeError> {
        self.index
            .ok_or_else(|| RuntimeError::Syntax(format!("${} requires an [index] argument", command)))
    }

    pub fn forbid_index(&self, command: &str) -> Result<(), RuntimeError> {
        match self.index {
            Some(_) => Err(RuntimeError::Syntax(format!(
                "${} does not take an [index] argument",
                command
            ))),
            None => Ok(()),
        }
    }
}

/// A generator invoked from documents or snippets.
///
/// One instance per command name lives for the whole document so that
/// submodels can answer post-solve queries about every call.
pub trait Command {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError>;

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        None
    }
}

pub type CommandFactory = fn() -> Box<dyn Command>;

/// Anything the evaluator can call commands through.
pub trait CommandHost {
    fn has_command(&self, name: &str) -> bool;

    fn call_command(
        &mut self,
        name: &str,
        index: Option<&str>,
        arguments: Arguments,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError>;
}

// ------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------

/// Command factories plus the instances and submodel states of the current document.
pub struct CommandRegistry {
    factories: BTreeMap<String, CommandFactory>,
    instances: HashMap<String, Box<dyn Command>>,
    states: BTreeMap<String, SubmodelState>,
    used_submodels: Vec<String>,
    next_prefix: usize,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            factories: BTreeMap::new(),
            instances: HashMap::new(),
            states: BTreeMap::new(),
            used_submodels: Vec::new(),
            next_prefix: 0,
        }
    }

    /// A registry with the declaration commands and the bundled submodels.
    pub fn with_defaults() -> Self {
        let mut registry = CommandRegistry::new();
        registry.register("SET", || Box::new(basic::SetCommand));
        registry.register("PARAM", || Box::new(basic::ParamCommand));
        registry.register("VAR", || Box::new(basic::VarCommand));
        registry.register("CON", || Box::new(basic::ConCommand));
        registry.register("STMT", || Box::new(basic::StmtCommand));
        registry.register("SOS1", || Box::new(sos::Sos1Command::default()));
        registry.register("SOS2", || Box::new(sos::Sos2Command::default()));
        registry.register("PWL", || Box::new(sos::PwlCommand::default()));
        registry.register("ATSP_MTZ", || Box::new(atsp::AtspCommand::new(atsp::Formulation::Mtz)));
        registry.register("ATSP_SCF", || Box::new(atsp::AtspCommand::new(atsp::Formulation::Scf)));
        registry.register("ATSP_MCF", || Box::new(atsp::AtspCommand::new(atsp::Formulation::Mcf)));
        registry.register("VBP_FLOW", || Box::new(flow::VbpFlowCommand::default()));
        registry
    }

    /// Register or replace a command. `EXEC` is reserved.
    pub fn register(&mut self, name: &str, factory: CommandFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Drop every instance and state; keep the factories.
    pub fn reset(&mut self) {
        self.instances.clear();
        self.states.clear();
        self.used_submodels.clear();
        self.next_prefix = 0;
    }

    /// `_<lowercase name><n>_`, unique within the document.
    pub fn new_prefix(&mut self, name: &str) -> String {
        let prefix = format!("_{}{}_", name.to_lowercase(), self.next_prefix);
        self.next_prefix += 1;
        prefix
    }

    /// Run one call of `name` against the context.
    pub fn invoke(
        &mut self,
        name: &str,
        index: Option<&str>,
        arguments: Arguments,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let factory = *self
            .factories
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownCommand(name.to_string()))?;
        let prefix = self.new_prefix(name);
        debug!(command = name, index, %prefix, "invoking command");

        let command = self
            .instances
            .entry(name.to_string())
            .or_insert_with(factory);
        command.evaluate(
            Invocation {
                index,
                arguments,
                prefix,
            },
            ctx,
        )?;
        if command.as_submodel().is_some() && !self.states.contains_key(name) {
            self.states.insert(name.to_string(), SubmodelState::Constructed);
            self.used_submodels.push(name.to_string());
        }
        Ok(())
    }

    /// Mark every constructed submodel as ready for post-solve queries.
    pub fn seal(&mut self) {
        for state in self.states.values_mut() {
            *state = SubmodelState::Queryable;
        }
    }

    /// Names of the submodel commands used by the document, in order of first use.
    pub fn submodel_names(&self) -> &[String] {
        &self.used_submodels
    }

    fn state(&self, name: &str) -> Result<SubmodelState, RuntimeError> {
        if let Some(state) = self.states.get(name) {
            return Ok(*state);
        }
        match self.factories.get(name) {
            Some(factory) if factory().as_submodel().is_some() => Ok(SubmodelState::Unconstructed),
            _ => Err(RuntimeError::UnknownSubmodel(name.to_string())),
        }
    }

    /// The submodel behind command `name`, once it can answer post-solve queries.
    pub fn submodel(&self, name: &str) -> Result<&dyn Submodel, RuntimeError> {
        let state = self.state(name)?;
        if state != SubmodelState::Queryable {
            return Err(RuntimeError::SubmodelNotReady {
                name: name.to_string(),
                state,
            });
        }
        self.instances
            .get(name)
            .and_then(|command| command.as_submodel())
            .ok_or_else(|| RuntimeError::UnknownSubmodel(name.to_string()))
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        CommandRegistry::with_defaults()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.factories.keys().collect::<Vec<_>>())
            .field("submodels", &self.states)
            .field("next_prefix", &self.next_prefix)
            .finish()
    }
}

impl CommandHost for CommandRegistry {
    fn has_command(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn call_command(
        &mut self,
        name: &str,
        index: Option<&str>,
        arguments: Arguments,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        self.invoke(name, index, arguments, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Command for Echo {
        fn evaluate(
            &mut self,
            invocation: Invocation<'_>,
            ctx: &mut ExecutionContext,
        ) -> Result<(), RuntimeError> {
            ctx.model.push_str(&invocation.prefix);
            Ok(())
        }
    }

    #[test]
    fn prefixes_are_unique_across_commands() {
        let mut registry = CommandRegistry::new();
        registry.register("ECHO", || Box::new(Echo));
        registry.register("OTHER", || Box::new(Echo));
        let mut ctx = ExecutionContext::default();
        registry.invoke("ECHO", None, Arguments::default(), &mut ctx).unwrap();
        registry.invoke("OTHER", None, Arguments::default(), &mut ctx).unwrap();
        registry.invoke("ECHO", None, Arguments::default(), &mut ctx).unwrap();
        assert_eq!(ctx.model, "_echo0__other1__echo2_");
    }

    #[test]
    fn unknown_command() {
        let mut registry = CommandRegistry::new();
        let mut ctx = ExecutionContext::default();
        let err = registry
            .invoke("NOPE", None, Arguments::default(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownCommand(name) if name == "NOPE"));
    }

    #[test]
    fn submodel_states() {
        let mut registry = CommandRegistry::with_defaults();
        assert!(matches!(
            registry.submodel("SOS1"),
            Err(RuntimeError::SubmodelNotReady {
                state: SubmodelState::Unconstructed,
                ..
            })
        ));
        assert!(matches!(
            registry.submodel("SET"),
            Err(RuntimeError::UnknownSubmodel(_))
        ));

        let mut ctx = ExecutionContext::default();
        let args = Arguments::positional(vec![vec!["x", "y"].into()]);
        registry.invoke("SOS1", None, args, &mut ctx).unwrap();
        assert!(matches!(
            registry.submodel("SOS1"),
            Err(RuntimeError::SubmodelNotReady {
                state: SubmodelState::Constructed,
                ..
            })
        ));
        registry.seal();
        assert!(registry.submodel("SOS1").is_ok());
        assert_eq!(registry.submodel_names(), ["SOS1".to_string()]);
    }

    #[test]
    fn binding_arguments() {
        let args = Arguments {
            positional: vec![1i64.into()],
            keyword: vec![("ub".to_string(), 5i64.into())],
        };
        let mut bound = args.bind("VAR", &["typ", "lb", "ub"], 1).unwrap();
        assert_eq!(bound.take("typ"), Some(1i64.into()));
        assert_eq!(bound.take("lb"), None);
        assert_eq!(bound.take("ub"), Some(5i64.into()));

        let args = Arguments::positional(vec![]);
        assert!(args.bind("CON", &["left", "sign", "right"], 3).is_err());
        let args = Arguments {
            positional: vec![],
            keyword: vec![("zz".to_string(), RuntimeValue::None)],
        };
        assert!(args.bind("VAR", &["typ"], 0).is_err());
    }
}
