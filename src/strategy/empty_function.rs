// Copyright 2025 Martin Pool

//! **EmptyFunction**: the baseline strategy — target a single function at a
//! time, empty it, ask the model to refill it.

use anyhow::Result;
use async_trait::async_trait;

use crate::source_transform::parse_definitions;
use crate::target::StrategyTag;

use super::{is_eligible, propose_for_site, skip_path, Candidate, MutationSite, SourceFile, Strategy, StrategyContext};

pub struct EmptyFunctionStrategy;

#[async_trait]
impl Strategy for EmptyFunctionStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::EmptyFunction
    }

    async fn propose(&self, ctx: &StrategyContext<'_>, sources: &[SourceFile]) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for source in sources {
            if skip_path(&source.relative_path) {
                continue;
            }
            let (functions, _classes) = parse_definitions(&source.text)?;
            for function in functions {
                let function = crate::source_transform::with_path(function, &source.relative_path);
                let site = MutationSite::Function(function);
                if !is_eligible(&site.nodeids(), ctx.call_graph, ctx.already_mutated) {
                    continue;
                }
                let mut found = propose_for_site(ctx, self.tag(), source, &site, |_, _, _| false).await?;
                candidates.append(&mut found);
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_is_empty_function() {
        assert_eq!(EmptyFunctionStrategy.tag(), StrategyTag::EmptyFunction);
    }
}
