//! Asymmetric travelling salesman formulations: `$ATSP_MTZ`, `$ATSP_SCF` and `$ATSP_MCF`.
//!
//! Each call adds assignment constraints over the arc variables `x[u,v]`
//! (declared by the document), a subtour elimination formulation, and one
//! continuous variable per unordered node pair that sums both arc directions.
//! Those pair variables are what `separate` reasons about.

use std::collections::{HashMap, HashSet};

use crate::ampl::ampl_repr;
use crate::command::{Command, Invocation};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::linear::{LinearConstraint, Operand, Sense};
use crate::model::{Model, VarType};
use crate::runtime_value::RuntimeValue;
use crate::submodel::{Decoded, DecodedPath, Extraction, Submodel, ValueLookup};
use crate::symbols::SymbolName;

/// Arc values within this distance of 1 count as selected when separating.
const LINK_TOLERANCE: f64 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Formulation {
    /// Miller-Tucker-Zemlin potentials, optionally lifted (Desrochers-Laporte).
    Mtz,
    /// Single-commodity flow.
    Scf,
    /// Multi-commodity flow.
    Mcf,
}

impl Formulation {
    fn command_name(&self) -> &'static str {
        match self {
            Formulation::Mtz => "ATSP_MTZ",
            Formulation::Scf => "ATSP_SCF",
            Formulation::Mcf => "ATSP_MCF",
        }
    }
}

// ------------------------------------------------------------------
// Union-find
// ------------------------------------------------------------------

/// Disjoint sets with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
    groups: usize,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            rank: vec![0; n],
            groups: n,
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn link(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        self.groups -= 1;
    }

    pub fn group_count(&self) -> usize {
        self.groups
    }

    /// Members of each group, groups ordered by their smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for x in 0..self.parent.len() {
            let root = self.find(x);
            let slot = *by_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(x);
        }
        groups
    }
}

// ------------------------------------------------------------------
// Tours
// ------------------------------------------------------------------

/// One call: the graph and the names generated for it.
#[derive(Debug, Clone)]
struct Tour {
    xvar: String,
    nodes: Vec<RuntimeValue>,
    arcs: Vec<(usize, usize)>,
    start: usize,
    arc_vars: HashMap<(usize, usize), String>,
    /// Pair variable per unordered node pair `(min, max)`, in creation order.
    pair_vars: Vec<((usize, usize), String)>,
}

fn label(node: &RuntimeValue) -> String {
    match node {
        RuntimeValue::Tuple(items) => items.iter().map(label).collect::<Vec<_>>().join("_"),
        other => other.to_string(),
    }
}

impl Tour {
    fn new(
        xvar: &SymbolName,
        nodes: Vec<RuntimeValue>,
        arc_values: Vec<RuntimeValue>,
        start: Option<RuntimeValue>,
    ) -> Result<Self, RuntimeError> {
        if nodes.len() < 2 {
            return Err(RuntimeError::argument("a tour needs at least two nodes"));
        }
        let position = |node: &RuntimeValue| {
            nodes
                .iter()
                .position(|n| n == node)
                .ok_or_else(|| RuntimeError::argument(format!("node {} is not in V", node.repr())))
        };
        let mut arcs = Vec::new();
        for arc in &arc_values {
            match arc.iterate()?.as_slice() {
                [u, v] => arcs.push((position(u)?, position(v)?)),
                _ => return Err(RuntimeError::argument("arcs must be (u, v) pairs")),
            }
        }
        let start = match &start {
            Some(node) => position(node)?,
            None => 0,
        };

        let mut arc_vars = HashMap::new();
        for &(u, v) in &arcs {
            let name = format!("{}[{},{}]", xvar.name, ampl_repr(&nodes[u])?, ampl_repr(&nodes[v])?);
            arc_vars.insert((u, v), name);
        }
        Ok(Tour {
            xvar: xvar.name.clone(),
            nodes,
            arcs,
            start,
            arc_vars,
            pair_vars: Vec::new(),
        })
    }

    fn n(&self) -> f64 {
        self.nodes.len() as f64
    }

    fn x(&self, u: usize, v: usize) -> String {
        self.arc_vars.get(&(u, v)).cloned().unwrap_or_default()
    }

    fn add_assignment(&self, model: &mut Model) -> Result<(), RuntimeError> {
        for &(u, v) in &self.arcs {
            model.add_var(Some(&self.x(u, v)), Some(0.0), Some(1.0), VarType::Binary);
        }
        for k in 0..self.nodes.len() {
            let into: Vec<String> = self.arcs.iter().filter(|a| a.1 == k).map(|&(u, v)| self.x(u, v)).collect();
            let out: Vec<String> = self.arcs.iter().filter(|a| a.0 == k).map(|&(u, v)| self.x(u, v)).collect();
            if into.is_empty() || out.is_empty() {
                return Err(RuntimeError::argument(format!(
                    "node {} needs both an incoming and an outgoing arc",
                    self.nodes[k].repr()
                )));
            }
            model.add_con(into, Sense::Eq, 1.0)?;
            model.add_con(out, Sense::Eq, 1.0)?;
        }
        Ok(())
    }

    fn add_pair_vars(&mut self, model: &mut Model, prefix: &str) -> Result<(), RuntimeError> {
        let mut seen = HashSet::new();
        for &(u, v) in &self.arcs {
            let key = (u.min(v), u.max(v));
            if !seen.insert(key) {
                continue;
            }
            let name = format!("{}c_{}_{}", prefix, label(&self.nodes[key.0]), label(&self.nodes[key.1]));
            self.pair_vars.push((key, name));
        }
        for ((a, b), name) in &self.pair_vars {
            model.add_var(Some(name), Some(0.0), Some(1.0), VarType::Continuous);
            let sum: Vec<String> = [(*a, *b), (*b, *a)]
                .iter()
                .filter_map(|arc| self.arc_vars.get(arc).cloned())
                .collect();
            model.add_con(sum, Sense::Eq, name.as_str())?;
        }
        Ok(())
    }

    fn add_mtz(&self, model: &mut Model, lifted: bool, prefix: &str) -> Result<(), RuntimeError> {
        let u = |i: usize| format!("{}u_{}", prefix, label(&self.nodes[i]));
        for i in 0..self.nodes.len() {
            if i != self.start {
                model.add_var(Some(&u(i)), Some(0.0), None, VarType::Continuous);
            }
        }
        let arcs: HashSet<(usize, usize)> = self.arcs.iter().copied().collect();
        for &(i, j) in &self.arcs {
            if i == self.start || j == self.start {
                continue;
            }
            let mut terms = vec![
                Operand::Term(u(i), 1.0),
                Operand::Term(u(j), -1.0),
                Operand::Term(self.x(i, j), self.n() - 1.0),
            ];
            if lifted && arcs.contains(&(j, i)) {
                terms.push(Operand::Term(self.x(j, i), self.n() - 3.0));
            }
            model.add_con(terms, Sense::Le, self.n() - 2.0)?;
        }
        Ok(())
    }

    fn add_scf(&self, model: &mut Model, prefix: &str) -> Result<(), RuntimeError> {
        let y = |i: usize, j: usize| {
            format!("{}y_{}_{}", prefix, label(&self.nodes[i]), label(&self.nodes[j]))
        };
        for &(i, j) in &self.arcs {
            model.add_var(Some(&y(i, j)), Some(0.0), None, VarType::Continuous);
        }
        for &(i, j) in &self.arcs {
            let capacity = if j == self.start { self.n() - 1.0 } else { self.n() - 2.0 };
            model.add_con(y(i, j), Sense::Le, (self.x(i, j), capacity))?;
        }
        for k in 0..self.nodes.len() {
            let balance = self.balance(k, |i, j| y(i, j));
            let rhs = if k == self.start { self.n() - 1.0 } else { -1.0 };
            model.add_con(balance, Sense::Eq, rhs)?;
        }
        Ok(())
    }

    fn add_mcf(&self, model: &mut Model, prefix: &str) -> Result<(), RuntimeError> {
        let y = |i: usize, j: usize, k: usize| {
            format!(
                "{}y_{}_{}_{}",
                prefix,
                label(&self.nodes[i]),
                label(&self.nodes[j]),
                label(&self.nodes[k])
            )
        };
        let commodities: Vec<usize> = (0..self.nodes.len()).filter(|&k| k != self.start).collect();
        for &(i, j) in &self.arcs {
            for &k in &commodities {
                model.add_var(Some(&y(i, j, k)), Some(0.0), None, VarType::Continuous);
            }
        }
        for &(i, j) in &self.arcs {
            for &k in &commodities {
                model.add_con(y(i, j, k), Sense::Le, self.x(i, j))?;
            }
        }
        for node in 0..self.nodes.len() {
            for &k in &commodities {
                let balance = self.balance(node, |i, j| y(i, j, k));
                let rhs = if node == k {
                    1.0
                } else if node == self.start {
                    -1.0
                } else {
                    0.0
                };
                model.add_con(balance, Sense::Eq, rhs)?;
            }
        }
        Ok(())
    }

    /// Inflow minus outflow of `node` over the flow variables named by `var`.
    fn balance(&self, node: usize, var: impl Fn(usize, usize) -> String) -> Vec<Operand> {
        let inflow = self
            .arcs
            .iter()
            .filter(|a| a.1 == node)
            .map(|&(i, j)| Operand::Term(var(i, j), 1.0));
        let outflow = self
            .arcs
            .iter()
            .filter(|a| a.0 == node)
            .map(|&(i, j)| Operand::Term(var(i, j), -1.0));
        inflow.chain(outflow).collect()
    }

    /// Subtour elimination cuts violated by the pair variable values.
    fn cuts(&self, values: ValueLookup<'_>) -> Vec<LinearConstraint> {
        let mut sets = UnionFind::new(self.nodes.len());
        let pair_values: HashMap<&str, f64> = self
            .pair_vars
            .iter()
            .map(|(_, name)| (name.as_str(), values(name)))
            .collect();
        for ((a, b), name) in &self.pair_vars {
            if (1.0 - pair_values[name.as_str()]).abs() < LINK_TOLERANCE {
                sets.link(*a, *b);
            }
        }
        if sets.group_count() <= 1 {
            return Vec::new();
        }

        let mut cuts = Vec::new();
        for group in sets.groups() {
            if group.len() <= 2 {
                continue;
            }
            let members: HashSet<usize> = group.iter().copied().collect();
            let inside: Vec<&String> = self
                .pair_vars
                .iter()
                .filter(|((a, b), _)| members.contains(a) && members.contains(b))
                .map(|(_, name)| name)
                .collect();
            let total: f64 = inside.iter().map(|name| pair_values[name.as_str()]).sum();
            let limit = (group.len() - 1) as f64;
            if total > limit {
                let terms: Vec<String> = inside.into_iter().cloned().collect();
                if let Ok(cut) = LinearConstraint::new(&terms.into(), Sense::Le, &Operand::Constant(limit)) {
                    cuts.push(cut);
                }
            }
        }
        cuts
    }

    /// Follow selected arcs from the start node.
    fn decode(&self, values: ValueLookup<'_>) -> Decoded {
        let mut successor = HashMap::new();
        let mut total = 0.0;
        for &(u, v) in &self.arcs {
            let value = values(&self.x(u, v));
            total += value;
            if value > 0.5 {
                successor.entry(u).or_insert(v);
            }
        }
        let mut order = vec![self.start];
        let mut visited = HashSet::from([self.start]);
        let mut current = self.start;
        while let Some(&next) = successor.get(&current) {
            order.push(next);
            if !visited.insert(next) {
                break;
            }
            current = next;
        }
        Decoded {
            variable: self.xvar.clone(),
            value: total,
            paths: vec![DecodedPath {
                count: 1,
                labels: order.iter().map(|&i| label(&self.nodes[i])).collect(),
            }],
        }
    }
}

// ------------------------------------------------------------------
// Command
// ------------------------------------------------------------------

/// `$ATSP_MTZ[x]{V, A, start=None, DL=False};` and the flow variants.
#[derive(Debug)]
pub struct AtspCommand {
    formulation: Formulation,
    tours: Vec<Tour>,
}

impl AtspCommand {
    pub fn new(formulation: Formulation) -> Self {
        AtspCommand {
            formulation,
            tours: Vec::new(),
        }
    }
}

impl Command for AtspCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let command = self.formulation.command_name();
        let xvar = SymbolName::parse(invocation.require_index(command)?)?;
        let prefix = invocation.prefix;
        let params: &'static [&'static str] = match self.formulation {
            Formulation::Mtz => &["V", "A", "start", "DL"],
            Formulation::Scf | Formulation::Mcf => &["V", "A", "start"],
        };
        let mut args = invocation.arguments.bind(command, params, 2)?;
        let nodes = args.required("V")?.iterate()?;
        let arcs = args.required("A")?.iterate()?;
        let start = args.take("start");
        let lifted = args.flag("DL");

        let mut tour = Tour::new(&xvar, nodes, arcs, start)?;
        let mut model = Model::new();
        tour.add_assignment(&mut model)?;
        match self.formulation {
            Formulation::Mtz => tour.add_mtz(&mut model, lifted, &prefix)?,
            Formulation::Scf => tour.add_scf(&mut model, &prefix)?,
            Formulation::Mcf => tour.add_mcf(&mut model, &prefix)?,
        }
        tour.add_pair_vars(&mut model, &prefix)?;
        model.rename_cons(|name| format!("{}{}", prefix, name));

        ctx.model.push_str(&model.to_ampl(&HashSet::new()));
        self.tours.push(tour);
        Ok(())
    }

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        Some(self)
    }
}

impl Submodel for AtspCommand {
    fn extract<'a>(&'a self, values: ValueLookup<'a>) -> Extraction<'a> {
        Extraction::new(self.tours.iter().map(move |tour| tour.decode(values)))
    }

    fn separate(&self, values: ValueLookup<'_>) -> Vec<LinearConstraint> {
        self.tours.iter().flat_map(|tour| tour.cuts(values)).collect()
    }
}
