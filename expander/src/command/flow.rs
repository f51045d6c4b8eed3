//! `$VBP_FLOW`: arc-flow formulation of (vector) bin packing.
//!
//! The graph has one layer per item type. A node is a load vector within a
//! layer; from layer `i` an arc either packs `k` copies of item `i` or passes
//! it over. Every node of the last layer has a loss arc into the sink, and a
//! feedback arc from the sink back to the source carries the number of bins.

use std::collections::{HashMap, HashSet};

use crate::command::{Command, Invocation};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::linear::{Operand, Sense};
use crate::model::{Model, VarType};
use crate::runtime_value::RuntimeValue;
use crate::submodel::{Decoded, DecodedPath, Extraction, Submodel, ValueLookup};
use crate::symbols::{HIDDEN_MARKER, parse_variable_list};

#[derive(Debug, Clone)]
struct FlowArc {
    from: usize,
    to: usize,
    /// Item packed by the arc and how many copies.
    item: Option<(usize, u64)>,
    var: String,
}

/// Layered arc-flow graph.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<(Vec<i64>, usize)>,
    index: HashMap<(Vec<i64>, usize), usize>,
    arcs: Vec<FlowArc>,
    source: usize,
    sink: usize,
}

impl FlowGraph {
    /// Build the graph for bins of size `capacity` and items `weights`, at
    /// most `copies[i]` copies of item `i` per bin. Arc variables are named
    /// `<prefix>f<n>` in creation order.
    pub fn build(capacity: &[i64], weights: &[Vec<i64>], copies: &[u64], prefix: &str) -> Self {
        let mut graph = FlowGraph::default();
        let (source, _) = graph.node(vec![0; capacity.len()], 0);
        graph.source = source;

        let mut frontier = vec![source];
        for (i, weight) in weights.iter().enumerate() {
            let mut next = Vec::new();
            for &u in &frontier {
                let load = graph.nodes[u].0.clone();
                for k in 1..=copies[i] {
                    let packed: Vec<i64> = load
                        .iter()
                        .zip(weight)
                        .map(|(l, w)| l + k as i64 * w)
                        .collect();
                    if packed.iter().zip(capacity).any(|(l, c)| l > c) {
                        break;
                    }
                    let (v, fresh) = graph.node(packed, i + 1);
                    if fresh {
                        next.push(v);
                    }
                    graph.arc(u, v, Some((i, k)), prefix);
                }
                let (v, fresh) = graph.node(load, i + 1);
                if fresh {
                    next.push(v);
                }
                graph.arc(u, v, None, prefix);
            }
            frontier = next;
        }

        let (sink, _) = graph.node(Vec::new(), weights.len() + 1);
        graph.sink = sink;
        for &u in &frontier {
            graph.arc(u, sink, None, prefix);
        }
        graph
    }

    fn node(&mut self, load: Vec<i64>, layer: usize) -> (usize, bool) {
        let key = (load, layer);
        if let Some(&id) = self.index.get(&key) {
            return (id, false);
        }
        let id = self.nodes.len();
        self.nodes.push(key.clone());
        self.index.insert(key, id);
        (id, true)
    }

    fn arc(&mut self, from: usize, to: usize, item: Option<(usize, u64)>, prefix: &str) {
        let var = format!("{}f{}", prefix, self.arcs.len());
        self.arcs.push(FlowArc { from, to, item, var });
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    /// Decompose an integral flow of at most `limit` units into source-sink paths.
    ///
    /// Each path is reported as the items it packs; identical patterns are
    /// merged, keeping the order in which they were first found.
    fn decompose(&self, flows: &[u64], limit: u64) -> Vec<(u64, Vec<(usize, u64)>)> {
        let mut remaining = flows.to_vec();
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (a, arc) in self.arcs.iter().enumerate() {
            outgoing[arc.from].push(a);
        }

        let mut left = limit;
        let mut patterns: Vec<(u64, Vec<(usize, u64)>)> = Vec::new();
        while left > 0 {
            let mut path = Vec::new();
            let mut node = self.source;
            while node != self.sink {
                match outgoing[node].iter().find(|&&a| remaining[a] > 0) {
                    Some(&a) => {
                        path.push(a);
                        node = self.arcs[a].to;
                    }
                    None => break,
                }
            }
            if node != self.sink || path.is_empty() {
                break;
            }
            let amount = path.iter().map(|&a| remaining[a]).min().unwrap_or(0).min(left);
            for &a in &path {
                remaining[a] -= amount;
            }
            left -= amount;

            let items: Vec<(usize, u64)> = path.iter().filter_map(|&a| self.arcs[a].item).collect();
            match patterns.iter_mut().find(|(_, p)| *p == items) {
                Some((count, _)) => *count += amount,
                None => patterns.push((amount, items)),
            }
        }
        patterns
    }
}

/// One call of `$VBP_FLOW`.
#[derive(Debug, Clone)]
struct FlowRun {
    zvar: String,
    graph: FlowGraph,
    labels: Vec<String>,
}

impl FlowRun {
    fn decode(&self, values: ValueLookup<'_>) -> Decoded {
        let value = values(&self.zvar);
        let flows: Vec<u64> = self
            .graph
            .arcs
            .iter()
            .map(|arc| values(&arc.var).round().max(0.0) as u64)
            .collect();
        let limit = value.round().max(0.0) as u64;
        let paths = self
            .graph
            .decompose(&flows, limit)
            .into_iter()
            .map(|(count, items)| DecodedPath {
                count,
                labels: items
                    .iter()
                    .flat_map(|&(i, k)| std::iter::repeat_n(self.labels[i].clone(), k as usize))
                    .collect(),
            })
            .collect();
        Decoded {
            variable: self.zvar.clone(),
            value,
            paths,
        }
    }
}

fn integer_vector(value: &RuntimeValue, what: &str) -> Result<Vec<i64>, RuntimeError> {
    match value {
        RuntimeValue::List(_) | RuntimeValue::Tuple(_) => value
            .iterate()?
            .iter()
            .map(RuntimeValue::expect_integer)
            .collect(),
        scalar if scalar.is_number() => Ok(vec![scalar.expect_integer()?]),
        other => Err(RuntimeError::type_error(format!("{} as integers", what), other.type_name())),
    }
}

/// Demand of one item type: a fixed count or a variable of the document.
enum Demand {
    Fixed(i64),
    Variable(String),
}

/// `$VBP_FLOW[Z]{W, w, b, bounds=None, labels=None, binary=False};`
#[derive(Debug, Default)]
pub struct VbpFlowCommand {
    runs: Vec<FlowRun>,
}

impl Command for VbpFlowCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let names = parse_variable_list(invocation.require_index("VBP_FLOW")?)?;
        let [zvar] = names.as_slice() else {
            return Err(RuntimeError::argument("VBP_FLOW takes a single variable name"));
        };
        let prefix = invocation.prefix;
        let mut args = invocation.arguments.bind(
            "VBP_FLOW",
            &["W", "w", "b", "bounds", "labels", "binary"],
            3,
        )?;
        let capacity = integer_vector(&args.required("W")?, "capacities")?;
        let weights = args
            .required("w")?
            .iterate()?
            .iter()
            .map(|w| integer_vector(w, "weights"))
            .collect::<Result<Vec<_>, _>>()?;
        let demands = args
            .required("b")?
            .iterate()?
            .into_iter()
            .map(|b| match b {
                RuntimeValue::String(var) => Ok(Demand::Variable(var)),
                other => other.expect_integer().map(Demand::Fixed),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let bounds = match args.take("bounds") {
            Some(bounds) => Some(integer_vector(&bounds, "bounds")?),
            None => None,
        };
        let labels = match args.take("labels") {
            Some(labels) => Some(
                labels
                    .iterate()?
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };
        let binary = args.flag("binary");

        let m = weights.len();
        if demands.len() != m
            || bounds.as_ref().is_some_and(|b| b.len() != m)
            || labels.as_ref().is_some_and(|l| l.len() != m)
        {
            return Err(RuntimeError::argument(
                "w, b, bounds and labels must have one entry per item",
            ));
        }
        if let Some(i) = weights.iter().position(|w| w.len() != capacity.len()) {
            return Err(RuntimeError::argument(format!(
                "item {} has {} weights for {} capacities",
                i + 1,
                weights[i].len(),
                capacity.len()
            )));
        }

        let mut copies = Vec::with_capacity(m);
        for (i, demand) in demands.iter().enumerate() {
            let mut limit = match demand {
                Demand::Fixed(n) => (*n).max(0),
                Demand::Variable(_) => capacity
                    .iter()
                    .zip(&weights[i])
                    .filter(|(_, w)| **w != 0)
                    .map(|(c, w)| c / w)
                    .min()
                    .ok_or_else(|| {
                        RuntimeError::argument(format!("item {} has no positive weight", i + 1))
                    })?,
            };
            if let (Demand::Variable(_), Some(bounds)) = (demand, &bounds) {
                limit = limit.min(bounds[i]);
            }
            if binary {
                limit = limit.min(1);
            }
            copies.push(limit.max(0) as u64);
        }

        let graph = FlowGraph::build(&capacity, &weights, &copies, &prefix);
        let labels = labels.unwrap_or_else(|| {
            demands
                .iter()
                .enumerate()
                .map(|(i, demand)| match demand {
                    Demand::Variable(var) => var.clone(),
                    Demand::Fixed(_) => format!("i={}", i + 1),
                })
                .collect()
        });

        let mut model = flow_model(zvar, &graph, &demands, bounds.as_deref())?;
        model.rename_cons(|name| format!("{}{}", prefix, name));
        let declared: HashSet<String> = demands
            .iter()
            .filter_map(|d| match d {
                Demand::Variable(var) => Some(var.clone()),
                Demand::Fixed(_) => None,
            })
            .collect();
        ctx.model.push_str(&model.to_ampl(&declared));

        self.runs.push(FlowRun {
            zvar: zvar.trim_start_matches(HIDDEN_MARKER).to_string(),
            graph,
            labels,
        });
        Ok(())
    }

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        Some(self)
    }
}

/// Flow conservation at every node plus one demand constraint per item.
fn flow_model(
    zvar: &str,
    graph: &FlowGraph,
    demands: &[Demand],
    bounds: Option<&[i64]>,
) -> Result<Model, RuntimeError> {
    let mut model = Model::new();
    model.add_var(Some(zvar), Some(0.0), None, VarType::Integer);
    for arc in &graph.arcs {
        let ub = match (arc.item, bounds) {
            (Some((i, _)), Some(bounds)) => Some(bounds[i] as f64),
            _ => None,
        };
        model.add_var(Some(&arc.var), Some(0.0), ub, VarType::Integer);
    }
    for demand in demands {
        if let Demand::Variable(var) = demand {
            model.add_var(Some(var), Some(0.0), None, VarType::Integer);
        }
    }

    for node in 0..graph.node_count() {
        let mut balance: Vec<Operand> = Vec::new();
        if node == graph.source {
            balance.push(Operand::Term(zvar.to_string(), 1.0));
        }
        if node == graph.sink {
            balance.push(Operand::Term(zvar.to_string(), -1.0));
        }
        for arc in &graph.arcs {
            if arc.to == node {
                balance.push(Operand::Term(arc.var.clone(), 1.0));
            }
            if arc.from == node {
                balance.push(Operand::Term(arc.var.clone(), -1.0));
            }
        }
        model.add_con(balance, Sense::Eq, 0.0)?;
    }

    for (i, demand) in demands.iter().enumerate() {
        let packed: Vec<Operand> = graph
            .arcs
            .iter()
            .filter_map(|arc| match arc.item {
                Some((item, k)) if item == i => Some(Operand::Term(arc.var.clone(), k as f64)),
                _ => None,
            })
            .collect();
        match demand {
            Demand::Fixed(0) if packed.is_empty() => continue,
            _ if packed.is_empty() => {
                return Err(RuntimeError::argument(format!(
                    "item {} does not fit in the bin",
                    i + 1
                )))
            }
            Demand::Variable(var) => model.add_con(packed, Sense::Eq, var.as_str())?,
            Demand::Fixed(n) if *n > 1 => model.add_con(packed, Sense::Ge, *n as f64)?,
            Demand::Fixed(n) => model.add_con(packed, Sense::Eq, *n as f64)?,
        };
    }
    Ok(model)
}

impl Submodel for VbpFlowCommand {
    fn extract<'a>(&'a self, values: ValueLookup<'a>) -> Extraction<'a> {
        Extraction::new(self.runs.iter().map(move |run| run.decode(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Arguments;

    fn ints(values: &[i64]) -> RuntimeValue {
        RuntimeValue::List(values.iter().map(|n| RuntimeValue::Integer(*n)).collect())
    }

    #[test]
    fn graph_layers_items_and_loss() {
        let graph = FlowGraph::build(&[5], &[vec![5]], &[2], "_v_");
        // S, packed, passed, T
        assert_eq!(graph.node_count(), 4);
        let vars: Vec<&str> = graph.arcs.iter().map(|a| a.var.as_str()).collect();
        assert_eq!(vars, ["_v_f0", "_v_f1", "_v_f2", "_v_f3"]);
        assert_eq!(graph.arcs[0].item, Some((0, 1)));
        assert_eq!(graph.arcs[1].item, None);
    }

    #[test]
    fn loads_are_shared_between_paths() {
        // Packing 2 then 3 or 3 then 2 in a bin of 5 reaches the same loads.
        let graph = FlowGraph::build(&[5], &[vec![2], vec![3]], &[2, 1], "");
        let loads: HashSet<i64> = graph.nodes.iter().filter(|n| n.1 == 2).map(|n| n.0[0]).collect();
        assert_eq!(loads, HashSet::from([0, 2, 3, 4, 5]));
    }

    #[test]
    fn model_and_extraction() {
        let mut command = VbpFlowCommand::default();
        let mut ctx = ExecutionContext::default();
        command
            .evaluate(
                Invocation {
                    index: Some("Z"),
                    arguments: Arguments::positional(vec![ints(&[5]), RuntimeValue::List(vec![ints(&[5])]), ints(&[2])]),
                    prefix: "_v_".to_string(),
                },
                &mut ctx,
            )
            .unwrap();
        assert!(ctx.model.contains("var Z, integer, >= 0;"));
        assert!(ctx.model.contains("var _v_f0, integer, >= 0;"));
        assert!(ctx.model.contains("s.t. _v_c0: +Z -_v_f0 -_v_f1 = 0;"));
        assert!(ctx.model.contains(": +_v_f0 >= 2;"));

        let lookup = |name: &str| match name {
            "Z" | "_v_f0" | "_v_f2" => 2.0,
            _ => 0.0,
        };
        let decoded: Vec<Decoded> = command.extract(&lookup).collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].value, 2.0);
        assert_eq!(
            decoded[0].paths,
            vec![DecodedPath {
                count: 2,
                labels: vec!["i=1".to_string()]
            }]
        );
    }

    #[test]
    fn variable_demand_uses_its_name_as_label() {
        let mut command = VbpFlowCommand::default();
        let mut ctx = ExecutionContext::default();
        let demands = RuntimeValue::List(vec!["n".into()]);
        command
            .evaluate(
                Invocation {
                    index: Some("^Z"),
                    arguments: Arguments::positional(vec![ints(&[10]), RuntimeValue::List(vec![ints(&[4])]), demands]),
                    prefix: "_v_".to_string(),
                },
                &mut ctx,
            )
            .unwrap();
        assert!(!ctx.model.contains("var Z"));
        assert!(!ctx.model.contains("var n"));
        assert!(ctx.model.contains("+_v_f0 +2*_v_f1 -n = 0;"));
        assert_eq!(command.runs[0].labels, vec!["n".to_string()]);
    }
}
