//! The top-level `Engine`: owns the two input documents, the reference
//! map, and the accumulated results of one run.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use periodix_common::{EngineError, RefKind, Series};
use periodix_parse::ast::AstNode;
use periodix_parse::Parser;

use crate::cluster::evaluate_cluster;
use crate::docs::{CalculationsDocument, InputsDocument};
use crate::interpreter::eval_series;
use crate::modules::{output_keys, run_module};
use crate::refmap::{build_reference_map, ReferenceMap};
use crate::scheduler::{build_schedule, CalcNode, NodeId};
use crate::timeline::{Timeline, YearMonth};

/// A value bound to a reference by [`Engine::override_input`]: either a
/// single scalar broadcast across every period, or an explicit
/// period-length array.
#[derive(Debug, Clone)]
pub enum OverrideValue {
    Scalar(f64),
    Array(Series),
}

impl From<f64> for OverrideValue {
    fn from(value: f64) -> Self {
        OverrideValue::Scalar(value)
    }
}

impl From<Series> for OverrideValue {
    fn from(value: Series) -> Self {
        OverrideValue::Array(value)
    }
}

impl From<Vec<f64>> for OverrideValue {
    fn from(values: Vec<f64>) -> Self {
        OverrideValue::Array(Series::from_vec(values))
    }
}

/// Compiles the two input documents into a dependency graph and evaluates
/// it once per [`Engine::run`]. Not reentrant: constructing a fresh
/// `Engine` is the supported way to evaluate a different set of
/// overrides, though calling `run` more than once on the same instance is
/// harmless (it simply rebuilds the reference map and recomputes
/// everything from scratch).
pub struct Engine {
    inputs: InputsDocument,
    calcs: CalculationsDocument,
    timeline: Timeline,
    overrides: FxHashMap<String, Series>,
    refmap: ReferenceMap,
    results: FxHashMap<String, Series>,
    errors: FxHashMap<String, EngineError>,
    module_outputs: FxHashMap<String, Series>,
    calc_name_to_id: FxHashMap<String, u32>,
}

impl Engine {
    pub fn new(inputs: InputsDocument, calcs: CalculationsDocument) -> Self {
        let start = YearMonth::new(inputs.config.start_year, inputs.config.start_month);
        let end = YearMonth::new(inputs.config.end_year, inputs.config.end_month);
        let timeline = Timeline::build(start, end);
        let refmap = ReferenceMap::new(timeline.periods());

        let calc_name_to_id = calcs
            .calculations
            .iter()
            .map(|c| (c.name.clone(), c.id))
            .collect();

        Self {
            inputs,
            calcs,
            timeline,
            overrides: FxHashMap::default(),
            refmap,
            results: FxHashMap::default(),
            errors: FxHashMap::default(),
            module_outputs: FxHashMap::default(),
            calc_name_to_id,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn errors(&self) -> &FxHashMap<String, EngineError> {
        &self.errors
    }

    /// Bind `reference` to a scalar (broadcast) or period-length array.
    /// Unknown references (names that never appear in the built reference
    /// map) are silently ignored when the override is applied at the
    /// start of `run`, matching the "silently ignores unknown refs" rule.
    pub fn override_input(&mut self, reference: &str, value: impl Into<OverrideValue>) {
        let periods = self.timeline.periods();
        let series = match value.into() {
            OverrideValue::Scalar(v) => Series::broadcast(v, periods),
            OverrideValue::Array(arr) => arr,
        };
        self.overrides.insert(reference.to_string(), series);
    }

    /// Convenience alias over [`Engine::override_input`] for the common
    /// case of overriding a single constant-group item (`C<group>.<item>`).
    pub fn override_constant(&mut self, group: u32, item: u32, value: f64) {
        self.override_input(&format!("C{group}.{item}"), value);
    }

    /// Execute the full calculation engine: build the reference map,
    /// apply buffered overrides on top of it, then schedule and evaluate
    /// every calculation and module. Returns the accumulated results.
    pub fn run(&mut self) -> &FxHashMap<String, Series> {
        let mut refmap = build_reference_map(&self.timeline, &self.inputs);
        for (name, series) in &self.overrides {
            if refmap.contains(name) {
                refmap.insert(name.clone(), series.clone());
            }
        }

        self.results.clear();
        self.errors.clear();
        self.module_outputs.clear();

        let m_ref_map = self.calcs.m_ref_map.clone();
        let m_ref_map = &m_ref_map;
        let mut asts: FxHashMap<u32, AstNode> = FxHashMap::default();
        let mut calc_nodes: Vec<CalcNode> = Vec::with_capacity(self.calcs.calculations.len());

        for calc in &self.calcs.calculations {
            match Parser::parse(&calc.formula) {
                Ok(ast) => {
                    let rewritten = rewrite_mrefs(ast, m_ref_map);
                    asts.insert(calc.id, rewritten.clone());
                    calc_nodes.push(CalcNode {
                        id: calc.id,
                        ast: Some(rewritten),
                    });
                }
                Err(e) => {
                    self.errors.insert(
                        format!("R{}", calc.id),
                        EngineError::parse(e.message).with_reference(format!("R{}", calc.id)).with_position(e.position),
                    );
                    calc_nodes.push(CalcNode { id: calc.id, ast: None });
                }
            }
        }

        let mut module_deps: Vec<(u32, FxHashSet<NodeId>)> = Vec::new();
        for (idx, module) in self.calcs.modules.iter().enumerate() {
            if module.converted {
                continue;
            }
            let module_id = (idx + 1) as u32;
            let mut deps = FxHashSet::default();
            for value in module.inputs.values() {
                if let Some(s) = value.as_str() {
                    if let Some(kind) = RefKind::parse(s) {
                        match kind {
                            RefKind::Formula(id) => {
                                deps.insert(NodeId::Formula(id));
                            }
                            RefKind::Module { module, .. } => {
                                deps.insert(NodeId::Module(module));
                            }
                            _ => {}
                        }
                    }
                }
            }
            module_deps.push((module_id, deps));
        }

        let schedule = build_schedule(&calc_nodes, &module_deps);
        let trigger = schedule.trigger_positions();
        let mut evaluated_clusters: FxHashSet<usize> = FxHashSet::default();

        for (pos, node) in schedule.order.iter().enumerate() {
            match node {
                NodeId::Formula(id) => {
                    if let Some(&cid) = schedule.node_to_cluster.get(id) {
                        let is_trigger = trigger.get(&cid) == Some(&pos);
                        if !is_trigger || !evaluated_clusters.insert(cid) {
                            continue;
                        }
                        let cluster = &schedule.clusters[&cid];
                        let results = evaluate_cluster(cluster, &asts, &refmap, &self.timeline);
                        for (member_id, series) in results {
                            self.write_formula_result(member_id, series, &mut refmap, m_ref_map);
                        }
                    } else {
                        let ast = asts.get(id);
                        match ast {
                            Some(ast) => match eval_series(ast, &refmap, &self.timeline) {
                                Ok(series) => self.write_formula_result(*id, series, &mut refmap, m_ref_map),
                                Err(e) => {
                                    self.errors.insert(format!("R{id}"), e.with_reference(format!("R{id}")));
                                    self.write_formula_result(*id, Series::zeros(self.timeline.periods()), &mut refmap, m_ref_map);
                                }
                            },
                            None => {
                                self.write_formula_result(*id, Series::zeros(self.timeline.periods()), &mut refmap, m_ref_map);
                            }
                        }
                    }
                }
                NodeId::Module(mid) => {
                    let Some(module) = self.calcs.modules.get((*mid - 1) as usize) else {
                        continue;
                    };
                    if !module.enabled {
                        debug!(module = mid, "module disabled, skipping evaluation");
                        continue;
                    }
                    let outputs = run_module(&module.template_id, &module.inputs, &refmap, &self.timeline);
                    if let Some(keys) = output_keys(&module.template_id) {
                        for (i, key) in keys.iter().enumerate() {
                            let out_idx = i + 1;
                            let series = outputs
                                .get(key)
                                .cloned()
                                .unwrap_or_else(|| Series::zeros(self.timeline.periods()));
                            let name = format!("M{mid}.{out_idx}");
                            refmap.insert(name.clone(), series.clone());
                            self.module_outputs.insert(name, series);
                        }
                    }
                }
            }
        }

        if !schedule.residual.is_empty() {
            for node in &schedule.residual {
                if let NodeId::Formula(id) = node {
                    self.errors.entry(format!("R{id}")).or_insert_with(|| {
                        EngineError::cycle("unresolvable hard dependency cycle").with_reference(format!("R{id}"))
                    });
                }
            }
        }

        info!(
            calculations = self.calcs.calculations.len(),
            modules = self.calcs.modules.len(),
            errors = self.errors.len(),
            "run complete"
        );

        self.refmap = refmap;
        &self.results
    }

    fn write_formula_result(
        &mut self,
        id: u32,
        series: Series,
        refmap: &mut ReferenceMap,
        m_ref_map: &std::collections::HashMap<String, String>,
    ) {
        let rref = format!("R{id}");
        refmap.insert(rref.clone(), series.clone());
        self.results.insert(rref.clone(), series.clone());
        for (mref, target) in m_ref_map {
            if *target == rref {
                refmap.insert(mref.clone(), series.clone());
                self.results.insert(mref.clone(), series.clone());
            }
        }
    }

    /// Look up a result by `R<id>` reference or by human-readable
    /// calculation name.
    pub fn get_result(&self, name_or_ref: &str) -> Option<&Series> {
        if let Some(s) = self.results.get(name_or_ref) {
            return Some(s);
        }
        let id = self.calc_name_to_id.get(name_or_ref)?;
        self.results.get(&format!("R{id}"))
    }

    /// Look up a raw input reference (calendar constant, flag,
    /// indexation factor, or input-group array) from the reference map
    /// built by the most recent `run`.
    pub fn get_input_ref(&self, reference: &str) -> Option<&Series> {
        self.refmap.get(reference)
    }

    pub fn module_output(&self, reference: &str) -> Option<&Series> {
        self.module_outputs.get(reference)
    }

    /// `(R<id>, name)` for every declared calculation, in document order.
    pub fn get_all_calculation_names(&self) -> Vec<(String, String)> {
        self.calcs
            .calculations
            .iter()
            .map(|c| (format!("R{}", c.id), c.name.clone()))
            .collect()
    }
}

/// Replace every `Reference` node whose name is a key in `m_ref_map` with
/// a reference to the mapped name. Operates on the parsed tree rather than
/// substituting into the formula text, so a rewritten M-ref can't
/// accidentally match inside an unrelated identifier.
fn rewrite_mrefs(ast: AstNode, m_ref_map: &std::collections::HashMap<String, String>) -> AstNode {
    if m_ref_map.is_empty() {
        return ast;
    }
    match ast {
        AstNode::Reference(name) => match m_ref_map.get(&name) {
            Some(target) => AstNode::Reference(target.clone()),
            None => AstNode::Reference(name),
        },
        AstNode::Unary { op, expr } => AstNode::Unary {
            op,
            expr: Box::new(rewrite_mrefs(*expr, m_ref_map)),
        },
        AstNode::Binary { op, lhs, rhs } => AstNode::Binary {
            op,
            lhs: Box::new(rewrite_mrefs(*lhs, m_ref_map)),
            rhs: Box::new(rewrite_mrefs(*rhs, m_ref_map)),
        },
        AstNode::Call { func, args } => AstNode::Call {
            func,
            args: args.into_iter().map(|a| rewrite_mrefs(a, m_ref_map)).collect(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::{Calculation, Config, InputGroup, InputItem, Module};

    fn base_inputs() -> InputsDocument {
        InputsDocument {
            config: Config {
                start_year: 2025,
                start_month: 1,
                end_year: 2025,
                end_month: 12,
            },
            key_periods: vec![],
            indices: vec![],
            input_glass_groups: vec![InputGroup {
                id: 1,
                group_type: "constant".into(),
                entry_mode: None,
                frequency: None,
                linked_key_period_id: None,
            }],
            input_glass: vec![InputItem {
                id: 1,
                group_id: 1,
                entry_mode: Some("constant".into()),
                value_frequency: None,
                value: Some(100.0),
                values: None,
                spread_method: None,
            }],
        }
    }

    fn calc(id: u32, name: &str, formula: &str) -> Calculation {
        Calculation {
            id,
            name: name.to_string(),
            kind: "flow".into(),
            formula: formula.to_string(),
        }
    }

    #[test]
    fn broadcasts_constant_through_a_formula_chain() {
        let calcs = CalculationsDocument {
            calculations: vec![calc(1, "Revenue", "C1"), calc(2, "Total", "CUMSUM(R1)")],
            modules: vec![],
            m_ref_map: Default::default(),
        };
        let mut engine = Engine::new(base_inputs(), calcs);
        engine.run();
        let r2 = engine.get_result("Total").unwrap();
        assert_eq!(r2.get(0), 100.0);
        assert_eq!(r2.get(11), 1200.0);
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn override_only_changes_downstream_of_the_overridden_reference() {
        let calcs = CalculationsDocument {
            calculations: vec![calc(1, "Revenue", "C1.1"), calc(2, "Unrelated", "5")],
            modules: vec![],
            m_ref_map: Default::default(),
        };
        let mut baseline = Engine::new(base_inputs(), calcs.clone());
        baseline.run();
        let base_unrelated = baseline.get_result("Unrelated").unwrap().clone();

        let mut overridden = Engine::new(base_inputs(), calcs);
        overridden.override_constant(1, 1, 250.0);
        overridden.run();

        assert_eq!(overridden.get_result("Revenue").unwrap().get(0), 250.0);
        assert_eq!(overridden.get_result("Unrelated").unwrap(), &base_unrelated);
    }

    #[test]
    fn soft_cycle_end_to_end() {
        let calcs = CalculationsDocument {
            calculations: vec![calc(10, "A", "R11 + 1"), calc(11, "B", "SHIFT(R10, 1)")],
            modules: vec![],
            m_ref_map: Default::default(),
        };
        let mut engine = Engine::new(base_inputs(), calcs);
        engine.run();
        let r10 = engine.get_result("R10").unwrap();
        assert_eq!(r10.get(0), 1.0);
        assert_eq!(r10.get(11), 12.0);
    }

    #[test]
    fn module_output_is_addressable_and_aliasable() {
        let mut inputs = base_inputs();
        inputs.input_glass.push(InputItem {
            id: 2,
            group_id: 1,
            entry_mode: Some("constant".into()),
            value_frequency: None,
            value: Some(1.0),
            values: None,
            spread_method: None,
        });

        let mut module_inputs = crate::docs::ModuleInputs::default();
        module_inputs.insert("dsrfActiveRef".into(), serde_json::json!(0.0));

        let calcs = CalculationsDocument {
            calculations: vec![calc(50, "Facility", "M1.1")],
            modules: vec![Module {
                template_id: "dsrf".into(),
                enabled: true,
                converted: false,
                inputs: module_inputs,
            }],
            m_ref_map: Default::default(),
        };
        let mut engine = Engine::new(inputs, calcs);
        engine.run();
        assert!(engine.module_output("M1.1").is_some());
        assert_eq!(engine.get_result("Facility").unwrap().get(0), 0.0);
    }
}
