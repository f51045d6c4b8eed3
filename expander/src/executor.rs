use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use mpl::document::{Region, RegionKind};
use mpl::parser::{Parser, parse_arguments, parse_expression, parse_instructions};
use tracing::{debug, trace};

use crate::assembler::{Assembler, DataMode};
use crate::command::{CommandFactory, CommandHost, CommandRegistry, EXEC_COMMAND};
use crate::context::{ExecutionContext, Fragment};
use crate::error::{DiagnosticError, RuntimeError};
use crate::evaluator::Evaluator;
use crate::linear::LinearConstraint;
use crate::runtime_value::RuntimeValue;
use crate::submodel::{Extraction, ValueLookup};
use crate::symbols::SymbolName;

/// How `translate_with` lays out its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslateOptions {
    pub data_mode: DataMode,
    /// Echo every construct as `/*EVALUATED:...*/` and mark block comments as ignored.
    pub comment_cmds: bool,
}

/// The macro expander: registered commands, caller bindings and the state of
/// the last translated document.
///
/// Submodels invoked by a document stay queryable through `extract` and
/// `separate` until the next call to `translate`.
#[derive(Debug, Default)]
pub struct Engine {
    registry: CommandRegistry,
    bindings: BTreeMap<String, RuntimeValue>,
    input: String,
    output: String,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    /// Register a command under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, factory: CommandFactory) -> Result<(), RuntimeError> {
        if name == EXEC_COMMAND {
            return Err(RuntimeError::Syntax(format!("{} is a reserved command name", name)));
        }
        let symbol = SymbolName::parse(name)?;
        if symbol.hidden {
            return Err(RuntimeError::InvalidName(name.to_string()));
        }
        self.registry.register(name, factory);
        Ok(())
    }

    /// Seed a variable visible to the snippets of every document.
    pub fn bind(&mut self, name: &str, value: RuntimeValue) {
        self.bindings.insert(name.to_string(), value);
    }

    pub fn translate(&mut self, text: &str) -> Result<String, DiagnosticError> {
        self.translate_with(text, TranslateOptions::default())
    }

    /// Expand every `$` construct of `text`.
    pub fn translate_with(
        &mut self,
        text: &str,
        options: TranslateOptions,
    ) -> Result<String, DiagnosticError> {
        self.registry.reset();
        let program = Parser::new(text.to_string(), 0)
            .parse()
            .map_err(|e| DiagnosticError::from_parse(e, text))?;

        let mut ctx = ExecutionContext::new(&self.bindings);
        let mut assembler = Assembler::new(options.data_mode, options.comment_cmds);
        for region in &program.regions {
            let raw = region.text(text);
            trace!(kind = ?region.kind, span = ?region.span, "region");
            match &region.kind {
                RegionKind::Literal => assembler.code(raw),
                RegionKind::StringLiteral => assembler.literal(raw),
                RegionKind::Comment if raw.starts_with("/*") => assembler.block_comment(raw),
                RegionKind::Comment => assembler.literal(raw),
                RegionKind::InlineEval { .. } | RegionKind::Command { .. } => {
                    let fragment = self
                        .dispatch(region, text, program.source_id, &mut ctx)
                        .map_err(|e| DiagnosticError::located(e, text, region, program.source_id))?;
                    assembler.fragment(raw, fragment);
                }
            }
        }

        self.registry.seal();
        Ok(assembler.finish())
    }

    /// Evaluate one construct with cleared buffers and return what it produced.
    pub fn dispatch(
        &mut self,
        region: &Region,
        source: &str,
        file_id: usize,
        ctx: &mut ExecutionContext,
    ) -> Result<Fragment, RuntimeError> {
        ctx.reset_buffers();
        match &region.kind {
            RegionKind::InlineEval { expression } => {
                debug!(construct = "${...}$", "evaluating");
                let value = parse_expression(&source[expression.clone()], expression.start, file_id)?;
                let value = Evaluator::new(ctx, &mut self.registry).evaluate(&value)?;
                let mut fragment = ctx.take_fragment();
                fragment.model = value.to_string();
                return Ok(fragment);
            }
            RegionKind::Command { name, index, body } if name == EXEC_COMMAND => {
                debug!(command = %name, "executing snippet");
                if index.is_some() {
                    return Err(RuntimeError::Syntax(format!(
                        "${} does not take an [index] argument",
                        EXEC_COMMAND
                    )));
                }
                let program = parse_instructions(&source[body.clone()], body.start, file_id)?;
                Evaluator::new(ctx, &mut self.registry).execute(&program)?;
            }
            RegionKind::Command { name, index, body } => {
                if !self.registry.has_command(name) {
                    return Err(RuntimeError::UnknownCommand(name.clone()));
                }
                let index = index.as_ref().map(|span| &source[span.clone()]);
                debug!(command = %name, index, "dispatching");
                let arguments = parse_arguments(&source[body.clone()], body.start, file_id)?;
                let arguments = Evaluator::new(ctx, &mut self.registry).evaluate_arguments(&arguments)?;
                self.registry.invoke(name, index, arguments, ctx)?;
            }
            _ => {}
        }
        Ok(ctx.take_fragment())
    }

    /// Translate a model file with commands echoed and the data in one section.
    ///
    /// Without `input` the last parsed input is translated again. The output
    /// is written to `output` when given and returned either way.
    pub fn parse(
        &mut self,
        input: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<String, DiagnosticError> {
        if let Some(path) = input {
            self.input = fs::read_to_string(path).map_err(RuntimeError::from)?;
        }
        let input = std::mem::take(&mut self.input);
        let result = self.translate_with(
            &input,
            TranslateOptions {
                data_mode: DataMode::Consolidated,
                comment_cmds: true,
            },
        );
        self.input = input;
        self.output = result?;
        if let Some(path) = output {
            fs::write(path, format!("{}\n", self.output)).map_err(RuntimeError::from)?;
        }
        Ok(self.output.clone())
    }

    /// Output of the last successful `parse`.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Submodel commands used by the last document, each once, in order of first use.
    pub fn submodels(&self) -> &[String] {
        self.registry.submodel_names()
    }

    /// Decode a solution through submodel `name`.
    pub fn extract<'a>(
        &'a self,
        name: &str,
        values: ValueLookup<'a>,
    ) -> Result<Extraction<'a>, RuntimeError> {
        Ok(self.registry.submodel(name)?.extract(values))
    }

    /// Valid inequalities of submodel `name` violated by a solution.
    pub fn separate(
        &self,
        name: &str,
        values: ValueLookup<'_>,
    ) -> Result<Vec<LinearConstraint>, RuntimeError> {
        Ok(self.registry.submodel(name)?.separate(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Invocation};
    use crate::submodel::SubmodelState;

    struct Shout;

    impl Command for Shout {
        fn evaluate(
            &mut self,
            invocation: Invocation<'_>,
            ctx: &mut ExecutionContext,
        ) -> Result<(), RuntimeError> {
            let text = invocation.arguments.positional[0].to_string();
            ctx.model.push_str(&text.to_uppercase());
            Ok(())
        }
    }

    #[test]
    fn inline_evaluation_is_replaced_by_its_value() {
        let mut engine = Engine::new();
        engine.bind("n", RuntimeValue::Integer(3));
        assert_eq!(engine.translate("param n := ${n * 2}$;").unwrap(), "param n := 6;");
    }

    #[test]
    fn registered_commands_are_dispatched() {
        let mut engine = Engine::new();
        engine.register("SHOUT", || Box::new(Shout)).unwrap();
        assert_eq!(engine.translate("# $SHOUT{'no'};\n$SHOUT{'hi'};").unwrap(), "# $SHOUT{'no'};\nHI");
        assert!(engine.register("EXEC", || Box::new(Shout)).is_err());
        assert!(engine.register("^X", || Box::new(Shout)).is_err());
    }

    #[test]
    fn exec_rejects_an_index() {
        let mut engine = Engine::new();
        let err = engine.translate("$EXEC[x]{y = 1};").unwrap_err();
        assert!(matches!(err.error, RuntimeError::Syntax(_)));
    }

    #[test]
    fn unknown_command() {
        let mut engine = Engine::new();
        let err = engine.translate("\n  $NOPE{1};").unwrap_err();
        assert!(matches!(err.error, RuntimeError::UnknownCommand(_)));
        assert_eq!(err.to_string(), "unknown command 'NOPE' (while evaluating $NOPE{...} at line 2 col 3)");
    }

    #[test]
    fn exec_variables_persist_across_constructs() {
        let mut engine = Engine::new();
        let out = engine.translate("$EXEC{k = 4};${k + 1}$").unwrap();
        assert_eq!(out, "5");
    }

    #[test]
    fn submodels_become_queryable_after_translate() {
        let mut engine = Engine::new();
        engine.translate("$SOS1{['a', 'b']};").unwrap();
        assert_eq!(engine.submodels(), ["SOS1".to_string()]);
        assert!(engine.separate("SOS1", &|_| 0.0).unwrap().is_empty());
        assert_eq!(engine.extract("SOS1", &|_| 0.0).unwrap().count(), 0);
        assert!(matches!(
            engine.extract("SOS2", &|_| 0.0),
            Err(RuntimeError::SubmodelNotReady {
                state: SubmodelState::Unconstructed,
                ..
            })
        ));

        engine.translate("var x;").unwrap();
        assert!(engine.submodels().is_empty());
    }
}
