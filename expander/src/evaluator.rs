use mpl::instruction::value::{Argument, BinaryOperator, Comprehension, Target, Value};
use mpl::instruction::{AssignOperator, Instruction};

use crate::builtins::{Builtin, call_builtin, call_method, has_method};
use crate::command::{Arguments, CommandHost};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::evaluator_helpers::{binary_op, unary_op};
use crate::runtime_value::RuntimeValue;

const MAX_DEPTH: usize = 256;

/// Evaluates snippet code against the execution context of a document.
///
/// Commands called from snippets are dispatched through `host`, so they get
/// fresh prefixes and write into the same buffers as document commands.
pub struct Evaluator<'a> {
    ctx: &'a mut ExecutionContext,
    host: &'a mut dyn CommandHost,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a mut ExecutionContext, host: &'a mut dyn CommandHost) -> Self {
        Evaluator { ctx, host }
    }

    pub fn evaluate(&mut self, value: &Value) -> Result<RuntimeValue, RuntimeError> {
        self.eval(value, 0)
    }

    /// Run the statements of an `$EXEC` body in order.
    pub fn execute(&mut self, instructions: &[Instruction]) -> Result<(), RuntimeError> {
        for instruction in instructions {
            match instruction {
                Instruction::Assignment {
                    target,
                    operator,
                    value,
                    ..
                } => {
                    let value = self.eval(value, 0)?;
                    self.assign(target, *operator, value)?;
                }
                Instruction::Expression { value, .. } => {
                    self.eval(value, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate a command body `a, b, key=value`.
    pub fn evaluate_arguments(&mut self, arguments: &[Argument]) -> Result<Arguments, RuntimeError> {
        self.arguments(arguments, 0)
    }

    fn arguments(&mut self, arguments: &[Argument], depth: usize) -> Result<Arguments, RuntimeError> {
        let mut evaluated = Arguments::default();
        for argument in arguments {
            match argument {
                Argument::Positional(value) => {
                    if !evaluated.keyword.is_empty() {
                        return Err(RuntimeError::Syntax(
                            "positional argument follows keyword argument".to_string(),
                        ));
                    }
                    evaluated.positional.push(self.eval(value, depth)?);
                }
                Argument::Keyword(name, value) => {
                    if evaluated.keyword.iter().any(|(k, _)| k == name) {
                        return Err(RuntimeError::Syntax(format!(
                            "keyword argument repeated: {}",
                            name
                        )));
                    }
                    let value = self.eval(value, depth)?;
                    evaluated.keyword.push((name.clone(), value));
                }
            }
        }
        Ok(evaluated)
    }

    fn eval(&mut self, value: &Value, depth: usize) -> Result<RuntimeValue, RuntimeError> {
        if depth > MAX_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        let depth = depth + 1;

        match value {
            // --- Literals ---
            Value::IntegerLiteral(n) => Ok(RuntimeValue::Integer(*n)),
            Value::FloatLiteral(f) => Ok(RuntimeValue::Float(*f)),
            Value::StringLiteral(s) => Ok(RuntimeValue::String(s.clone())),
            Value::BooleanLiteral(b) => Ok(RuntimeValue::Boolean(*b)),
            Value::NoneLiteral => Ok(RuntimeValue::None),

            // --- References ---
            Value::VariableReference(name, _) => self.lookup(name),

            // --- Displays ---
            Value::List(items) => Ok(RuntimeValue::List(self.eval_all(items, depth)?)),
            Value::Tuple(items) => Ok(RuntimeValue::Tuple(self.eval_all(items, depth)?)),
            Value::Dict(entries) => {
                let mut dict = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval(key, depth)?;
                    let value = self.eval(value, depth)?;
                    dict_insert(&mut dict, key, value);
                }
                Ok(RuntimeValue::Dict(dict))
            }
            Value::ListComprehension { element, clauses } => {
                let mut items = Vec::new();
                self.comprehend(clauses, depth, &mut |ev: &mut Evaluator<'_>| {
                    items.push(ev.eval(element, depth)?);
                    Ok(())
                })?;
                Ok(RuntimeValue::List(items))
            }
            Value::DictComprehension {
                key,
                value,
                clauses,
            } => {
                let mut dict = Vec::new();
                self.comprehend(clauses, depth, &mut |ev: &mut Evaluator<'_>| {
                    let k = ev.eval(key, depth)?;
                    let v = ev.eval(value, depth)?;
                    dict_insert(&mut dict, k, v);
                    Ok(())
                })?;
                Ok(RuntimeValue::Dict(dict))
            }

            // --- Operations ---
            Value::UnaryOperation { operator, operand } => {
                let operand = self.eval(operand, depth)?;
                unary_op(*operator, &operand)
            }
            Value::BinaryOperation {
                operator,
                left,
                right,
            } => {
                let left = self.eval(left, depth)?;
                match operator {
                    BinaryOperator::LogicalAnd if !left.is_truthy() => Ok(left),
                    BinaryOperator::LogicalOr if left.is_truthy() => Ok(left),
                    BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => {
                        self.eval(right, depth)
                    }
                    _ => {
                        let right = self.eval(right, depth)?;
                        binary_op(*operator, &left, &right)
                    }
                }
            }
            Value::Conditional {
                condition,
                true_branch,
                false_branch,
            } => {
                if self.eval(condition, depth)?.is_truthy() {
                    self.eval(true_branch, depth)
                } else {
                    self.eval(false_branch, depth)
                }
            }

            // --- Postfix ---
            Value::Call {
                callee, arguments, ..
            } => {
                let callee = self.eval(callee, depth)?;
                let arguments = self.arguments(arguments, depth)?;
                self.call(callee, arguments)
            }
            Value::Subscript { value, index, .. } => {
                let value = self.eval(value, depth)?;
                let index = self.eval(index, depth)?;
                subscript(value, &index)
            }
            Value::Attribute { value, name, .. } => {
                let receiver = self.eval(value, depth)?;
                if has_method(&receiver, name) {
                    Ok(RuntimeValue::Method {
                        receiver: Box::new(receiver),
                        name: name.clone(),
                    })
                } else {
                    Err(RuntimeError::AttributeError {
                        type_name: receiver.type_name().to_string(),
                        attribute: name.clone(),
                    })
                }
            }
        }
    }

    fn eval_all(&mut self, items: &[Value], depth: usize) -> Result<Vec<RuntimeValue>, RuntimeError> {
        items.iter().map(|item| self.eval(item, depth)).collect()
    }

    /// Buffers, then variables, then commands, then builtins.
    fn lookup(&self, name: &str) -> Result<RuntimeValue, RuntimeError> {
        if let Some(value) = self.ctx.buffer(name) {
            return Ok(value);
        }
        if let Some(value) = self.ctx.env.get_variable(name) {
            return Ok(value.clone());
        }
        if self.host.has_command(name) {
            return Ok(RuntimeValue::Command {
                name: name.to_string(),
                index: None,
            });
        }
        Builtin::from_name(name)
            .map(RuntimeValue::Builtin)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))
    }

    fn call(&mut self, callee: RuntimeValue, arguments: Arguments) -> Result<RuntimeValue, RuntimeError> {
        match callee {
            RuntimeValue::Builtin(builtin) => call_builtin(builtin, arguments),
            RuntimeValue::Method { receiver, name } => call_method(&receiver, &name, arguments),
            RuntimeValue::Command { name, index } => {
                self.host
                    .call_command(&name, index.as_deref(), arguments, self.ctx)?;
                Ok(RuntimeValue::None)
            }
            other => Err(RuntimeError::type_error("callable", other.type_name())),
        }
    }

    /// Run `emit` once per binding produced by the comprehension clauses.
    /// Loop variables live in a scope of their own.
    fn comprehend(
        &mut self,
        clauses: &[Comprehension],
        depth: usize,
        emit: &mut dyn FnMut(&mut Evaluator<'_>) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        self.ctx.env.push_scope();
        let result = self.comprehend_from(clauses, depth, emit);
        self.ctx.env.pop_scope();
        result
    }

    fn comprehend_from(
        &mut self,
        clauses: &[Comprehension],
        depth: usize,
        emit: &mut dyn FnMut(&mut Evaluator<'_>) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self);
        };
        for item in self.eval(&clause.iterable, depth)?.iterate()? {
            self.bind(&clause.target, item)?;
            if let Some(condition) = &clause.condition {
                if !self.eval(condition, depth)?.is_truthy() {
                    continue;
                }
            }
            self.comprehend_from(rest, depth, emit)?;
        }
        Ok(())
    }

    fn assign(
        &mut self,
        target: &Target,
        operator: AssignOperator,
        value: RuntimeValue,
    ) -> Result<(), RuntimeError> {
        let operator = match operator {
            AssignOperator::Assign => return self.bind(target, value),
            AssignOperator::Add => BinaryOperator::Addition,
            AssignOperator::Subtract => BinaryOperator::Subtraction,
            AssignOperator::Multiply => BinaryOperator::Multiplication,
        };
        let Target::Name(name) = target else {
            return Err(RuntimeError::Syntax(
                "augmented assignment needs a single name".to_string(),
            ));
        };
        let current = self.lookup(name)?;
        let updated = binary_op(operator, &current, &value)?;
        self.bind(target, updated)
    }

    /// Bind a value to a name or unpack it into a tuple of targets.
    fn bind(&mut self, target: &Target, value: RuntimeValue) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name) => {
                if ExecutionContext::is_read_only(name) {
                    return Err(RuntimeError::argument(format!("{} is read-only", name)));
                }
                if let Some(buffer) = self.ctx.buffer_mut(name) {
                    match value {
                        RuntimeValue::String(text) => *buffer = text,
                        other => return Err(RuntimeError::type_error("str", other.type_name())),
                    }
                    return Ok(());
                }
                self.ctx.env.set_variable(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() != targets.len() {
                    return Err(RuntimeError::argument(format!(
                        "cannot unpack {} values into {} names",
                        items.len(),
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.bind(target, item)?;
                }
                Ok(())
            }
        }
    }
}

fn dict_insert(dict: &mut Vec<(RuntimeValue, RuntimeValue)>, key: RuntimeValue, value: RuntimeValue) {
    match dict.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => dict.push((key, value)),
    }
}

fn sequence_index(len: usize, index: &RuntimeValue) -> Result<usize, RuntimeError> {
    let i = index.expect_integer()?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::IndexError(format!("{} (length {})", i, len)));
    }
    Ok(resolved as usize)
}

fn subscript(value: RuntimeValue, index: &RuntimeValue) -> Result<RuntimeValue, RuntimeError> {
    match value {
        RuntimeValue::List(items) | RuntimeValue::Tuple(items) => {
            let i = sequence_index(items.len(), index)?;
            Ok(items[i].clone())
        }
        RuntimeValue::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = sequence_index(chars.len(), index)?;
            Ok(RuntimeValue::String(chars[i].to_string()))
        }
        RuntimeValue::Dict(entries) => entries
            .into_iter()
            .find(|(key, _)| key == index)
            .map(|(_, value)| value)
            .ok_or_else(|| RuntimeError::KeyError(index.repr())),
        RuntimeValue::Command { name, index: None } => match index {
            RuntimeValue::String(text) => Ok(RuntimeValue::Command {
                name,
                index: Some(text.clone()),
            }),
            other => Err(RuntimeError::type_error("str index", other.type_name())),
        },
        other => Err(RuntimeError::type_error("subscriptable value", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRegistry;
    use mpl::parser::{parse_expression, parse_instructions};

    fn eval(source: &str) -> Result<RuntimeValue, RuntimeError> {
        let mut ctx = ExecutionContext::default();
        let mut registry = CommandRegistry::with_defaults();
        let value = parse_expression(source, 0, 0)?;
        Evaluator::new(&mut ctx, &mut registry).evaluate(&value)
    }

    fn exec(source: &str) -> ExecutionContext {
        let mut ctx = ExecutionContext::default();
        let mut registry = CommandRegistry::with_defaults();
        let program = parse_instructions(source, 0, 0).unwrap();
        Evaluator::new(&mut ctx, &mut registry).execute(&program).unwrap();
        ctx
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), RuntimeValue::Integer(7));
        assert_eq!(eval("7 // 2").unwrap(), RuntimeValue::Integer(3));
        assert_eq!(eval("-2 ** 2").unwrap(), RuntimeValue::Integer(-4));
        assert_eq!(eval("1 / 4").unwrap(), RuntimeValue::Float(0.25));
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(eval("0 and 1/0").unwrap(), RuntimeValue::Integer(0));
        assert_eq!(eval("'a' or 1/0").unwrap(), RuntimeValue::from("a"));
        assert!(matches!(eval("1 and 1/0"), Err(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn comprehensions() {
        assert_eq!(
            eval("[i*i for i in range(4) if i % 2 == 1]").unwrap(),
            RuntimeValue::List(vec![1i64.into(), 9i64.into()])
        );
        assert_eq!(
            eval("{k: v for k, v in zip('ab', [1, 2])}").unwrap(),
            RuntimeValue::Dict(vec![("a".into(), 1i64.into()), ("b".into(), 2i64.into())])
        );
        assert_eq!(
            eval("[(i, j) for i in range(2) for j in range(i)]").unwrap(),
            RuntimeValue::List(vec![RuntimeValue::Tuple(vec![1i64.into(), 0i64.into()])])
        );
    }

    #[test]
    fn loop_variables_do_not_leak() {
        let ctx = exec("xs = [i for i in range(3)]");
        assert!(!ctx.env.has_variable("i"));
        assert!(ctx.env.has_variable("xs"));
    }

    #[test]
    fn subscripts_and_methods() {
        assert_eq!(eval("[1, 2, 3][-1]").unwrap(), RuntimeValue::Integer(3));
        assert_eq!(eval("{'a': 1}['a']").unwrap(), RuntimeValue::Integer(1));
        assert!(matches!(eval("{'a': 1}['b']"), Err(RuntimeError::KeyError(_))));
        assert!(matches!(eval("[1][3]"), Err(RuntimeError::IndexError(_))));
        assert_eq!(eval("'-'.join(['a', 'b'])").unwrap(), RuntimeValue::from("a-b"));
        assert!(matches!(eval("(1).foo"), Err(RuntimeError::AttributeError { .. })));
    }

    #[test]
    fn statements_write_buffers() {
        let ctx = exec("x = 2\n_model += 'var y;'\nx *= 3; _defs = 'set I;'");
        assert_eq!(ctx.model, "var y;");
        assert_eq!(ctx.defs, "set I;");
        assert_eq!(ctx.env.get_variable("x"), Some(&RuntimeValue::Integer(6)));
    }

    #[test]
    fn symbol_views_are_read_only() {
        let mut ctx = ExecutionContext::default();
        let mut registry = CommandRegistry::with_defaults();
        let program = parse_instructions("_sets = {}", 0, 0).unwrap();
        let err = Evaluator::new(&mut ctx, &mut registry).execute(&program).unwrap_err();
        assert!(matches!(err, RuntimeError::ArgumentError(_)));
    }

    #[test]
    fn commands_are_callable() {
        let ctx = exec("VAR['y']('binary'); STMT('minimize z: y;')");
        assert_eq!(ctx.model, "var y, binary;minimize z: y;");
    }

    #[test]
    fn undefined_names() {
        assert!(matches!(eval("nope"), Err(RuntimeError::UndefinedVariable(n)) if n == "nope"));
        assert!(matches!(eval("3(1)"), Err(RuntimeError::TypeError { .. })));
    }
}
