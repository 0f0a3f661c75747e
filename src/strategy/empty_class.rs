// Copyright 2025 Martin Pool

//! **EmptyClass**: target all methods of one class at once. Rejects a
//! candidate when the model's fill leaves the class with the same number of
//! `raise NotImplementedError` placeholders it started with — a sign the
//! model didn't actually fill anything in.

use anyhow::Result;
use async_trait::async_trait;

use crate::source_transform::{class_with_path, parse_definitions};
use crate::target::StrategyTag;

use super::{is_eligible, propose_for_site, skip_path, Candidate, MutationSite, SourceFile, Strategy, StrategyContext};

pub struct EmptyClassStrategy;

#[async_trait]
impl Strategy for EmptyClassStrategy {
    fn tag(&self) -> StrategyTag {
        StrategyTag::EmptyClass
    }

    async fn propose(&self, ctx: &StrategyContext<'_>, sources: &[SourceFile]) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for source in sources {
            if skip_path(&source.relative_path) {
                continue;
            }
            let (_functions, classes) = parse_definitions(&source.text)?;
            for class in classes {
                if class.methods.is_empty() {
                    continue;
                }
                let class = class_with_path(class, &source.relative_path);
                let site = MutationSite::Class(class);
                if !is_eligible(&site.nodeids(), ctx.call_graph, ctx.already_mutated) {
                    continue;
                }
                let mut found = propose_for_site(ctx, self.tag(), source, &site, same_placeholder_count).await?;
                candidates.append(&mut found);
            }
        }
        Ok(candidates)
    }
}

/// True when `spliced` still has exactly as many empty-body placeholders in
/// this site's span as the fully-emptied form did — the model's reply
/// didn't change anything observable.
fn same_placeholder_count(site: &MutationSite, empty_text: &str, spliced: &str) -> bool {
    site.placeholder_count(empty_text) == site.placeholder_count(spliced)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_is_empty_class() {
        assert_eq!(EmptyClassStrategy.tag(), StrategyTag::EmptyClass);
    }
}
