// Copyright 2025 Martin Pool

//! **PriorityAware**: an EmptyFunction variant where target selection is a
//! weighted random draw over C6's function-degree score, so commits with a
//! large budget spend it on the functions most tests actually exercise
//! before thinning out to rarely-covered ones.

use anyhow::Result;
use async_trait::async_trait;

use crate::source_transform::{parse_definitions, with_path};
use crate::status::TestStatusDiff;
use crate::target::{StrategyTag, Target};
use crate::test_function_map::TestFunctionMap;

use super::{is_eligible, propose_for_site, skip_path, Candidate, MutationSite, SourceFile, Strategy, StrategyContext};

pub struct PriorityAwareStrategy {
    seed: u64,
}

impl PriorityAwareStrategy {
    pub fn new(seed: u64) -> Self {
        PriorityAwareStrategy { seed }
    }
}

#[async_trait]
impl Strategy for PriorityAwareStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::PriorityAware
    }

    async fn propose(&self, ctx: &StrategyContext<'_>, sources: &[SourceFile]) -> Result<Vec<Candidate>> {
        let mut eligible = Vec::new();
        for (source_index, source) in sources.iter().enumerate() {
            if skip_path(&source.relative_path) {
                continue;
            }
            let (functions, _classes) = parse_definitions(&source.text)?;
            for function in functions {
                let function = with_path(function, &source.relative_path);
                let site = MutationSite::Function(function);
                if is_eligible(&site.nodeids(), ctx.call_graph, ctx.already_mutated) {
                    eligible.push((source_index, site));
                }
            }
        }
        let order = weighted_draw_order(&eligible, ctx.call_graph, self.seed);

        let mut candidates = Vec::new();
        for index in order {
            let (source_index, site) = &eligible[index];
            let mut found = propose_for_site(ctx, self.tag(), &sources[*source_index], site, |_, _, _| false).await?;
            candidates.append(&mut found);
        }
        Ok(candidates)
    }

    fn score(&self, diff: &TestStatusDiff, targets: &[Target], call_graph: &TestFunctionMap) -> f64 {
        let base = diff.score();
        if base < 0.0 || targets.is_empty() {
            return base;
        }
        let mean_degree: f64 =
            targets.iter().map(|t| call_graph.degree_of(&t.nodeid()) as f64).sum::<f64>() / targets.len() as f64;
        base * mean_degree.max(1.0)
    }
}

/// Weighted-random draw without replacement over `sites`' call-graph
/// degree, implemented as Efraimidis-Spirakis A-ES sampling: give each item
/// a key `u^(1/weight)` for `u` uniform in `(0, 1]`, then sort descending.
/// Deterministic given `seed`, so mutation runs are reproducible.
fn weighted_draw_order(
    sites: &[(usize, MutationSite)],
    call_graph: &TestFunctionMap,
    seed: u64,
) -> Vec<usize> {
    let rng = fastrand::Rng::with_seed(seed);
    let mut keyed: Vec<(f64, usize)> = sites
        .iter()
        .enumerate()
        .map(|(i, (_, site))| {
            let weight = site
                .nodeids()
                .iter()
                .map(|id| call_graph.degree_of(id))
                .max()
                .unwrap_or(0)
                .max(1) as f64;
            let u = rng.f64().clamp(f64::EPSILON, 1.0);
            (u.powf(1.0 / weight), i)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.into_iter().map(|(_, i)| i).collect()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::path::TreeRelativePathBuf;
    use crate::source_transform::FunctionDef;
    use crate::textedit::{LineColumn, Span};

    fn function_site(name: &str) -> MutationSite {
        let span = Span {
            start: LineColumn { line: 1, column: 1 },
            end: LineColumn { line: 2, column: 1 },
        };
        MutationSite::Function(FunctionDef {
            target: Target::new(
                TreeRelativePathBuf::new(Utf8PathBuf::from("mod.py")),
                crate::target::TargetKind::Function,
                name,
                span,
            ),
            whole_span: span,
            signature_start: span.start,
            body_start: span.start,
            body_end: span.end,
            docstring_end: None,
            indent_column: 4,
        })
    }

    #[test]
    fn higher_degree_targets_are_favored_across_many_draws() {
        let mut test_to_functions = BTreeMap::new();
        for i in 0..10 {
            test_to_functions.insert(format!("t::{i}"), std::collections::BTreeSet::from(["mod.py::hot".to_string()]));
        }
        test_to_functions.insert("t::cold".to_string(), std::collections::BTreeSet::from(["mod.py::cold".to_string()]));
        let call_graph = TestFunctionMap::from_test_to_functions(test_to_functions);

        let sites = vec![(0usize, function_site("hot")), (0usize, function_site("cold"))];
        let mut hot_first_count = 0;
        for seed in 0..50u64 {
            let order = weighted_draw_order(&sites, &call_graph, seed);
            if order[0] == 0 {
                hot_first_count += 1;
            }
        }
        assert!(hot_first_count > 35, "expected the degree-10 target to usually sort first, got {hot_first_count}/50");
    }

    #[test]
    fn tag_is_priority_aware() {
        assert_eq!(PriorityAwareStrategy::new(1).tag(), StrategyTag::PriorityAware);
    }
}
