//! Period-by-period evaluator for a soft-cycle cluster, operating on
//! parsed ASTs via [`crate::interpreter::eval_at_period`] instead of
//! re-parsing a rewritten expression string at every period.

use rustc_hash::FxHashMap;

use periodix_common::Series;
use periodix_parse::ast::AstNode;

use crate::interpreter::{eval_at_period, Resolver};
use crate::refmap::ReferenceMap;
use crate::scheduler::Cluster;
use crate::timeline::Timeline;

/// Resolves `R<id>` references against a cluster's own in-progress member
/// arrays first, falling back to the completed reference map for
/// everything else (inputs, already-scheduled formulas, module outputs).
struct ClusterResolver<'a> {
    refmap: &'a ReferenceMap,
    members: &'a FxHashMap<u32, Series>,
}

impl Resolver for ClusterResolver<'_> {
    fn at(&self, name: &str, t: usize) -> f64 {
        if let Some(id) = name.strip_prefix('R').and_then(|rest| rest.parse::<u32>().ok()) {
            if let Some(arr) = self.members.get(&id) {
                return arr.get(t);
            }
        }
        self.refmap.at(name, t)
    }
}

/// Evaluate every member of `cluster` for all `P` periods, in the
/// cluster's internal (topological) order, each period observing the
/// current period's already-evaluated earlier members and every prior
/// period's full results.
pub fn evaluate_cluster(
    cluster: &Cluster,
    asts: &FxHashMap<u32, AstNode>,
    refmap: &ReferenceMap,
    timeline: &Timeline,
) -> FxHashMap<u32, Series> {
    let periods = timeline.periods();
    let mut members: FxHashMap<u32, Series> = cluster
        .internal_order
        .iter()
        .map(|&id| (id, Series::zeros(periods)))
        .collect();

    for t in 0..periods {
        for &id in &cluster.internal_order {
            let value = match asts.get(&id) {
                Some(ast) => {
                    let resolver = ClusterResolver {
                        refmap,
                        members: &members,
                    };
                    eval_at_period(ast, &resolver, timeline, t)
                }
                None => 0.0,
            };
            members.get_mut(&id).unwrap().set(t, value);
        }
    }

    members
}
