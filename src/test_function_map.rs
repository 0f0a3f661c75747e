// Copyright 2025 Martin Pool

//! [`TestFunctionMap`]: the bipartite test↔function map produced by the
//! dynamic call-graph targeter ([`crate::callgraph`]) and persisted
//! zstd-compressed JSON beside the other per-snapshot artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

const ZSTD_LEVEL: i32 = 3;

/// Two inverse mappings between test node-IDs and function node-IDs.
///
/// Constructed from either direction; the other is always derived so the
/// two stay consistent by construction rather than by later validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFunctionMap {
    function_to_tests: BTreeMap<String, BTreeSet<String>>,
    test_to_functions: BTreeMap<String, BTreeSet<String>>,
}

impl TestFunctionMap {
    /// Build the map from the direction the tracer actually produces:
    /// for each test, the set of functions whose lines it hit.
    pub fn from_test_to_functions(test_to_functions: BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut function_to_tests: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (test, functions) in &test_to_functions {
            for function in functions {
                function_to_tests
                    .entry(function.clone())
                    .or_default()
                    .insert(test.clone());
            }
        }
        TestFunctionMap {
            function_to_tests,
            test_to_functions,
        }
    }

    pub fn functions_for_test(&self, test_nodeid: &str) -> Option<&BTreeSet<String>> {
        self.test_to_functions.get(test_nodeid)
    }

    pub fn tests_for_function(&self, function_nodeid: &str) -> Option<&BTreeSet<String>> {
        self.function_to_tests.get(function_nodeid)
    }

    /// Union over every target's nodeid of the function→tests mapping.
    pub fn related_tests<'a>(&self, function_nodeids: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
        function_nodeids
            .filter_map(|nodeid| self.function_to_tests.get(nodeid))
            .flatten()
            .cloned()
            .collect()
    }

    /// How many distinct tests exercise `function_nodeid` — the sampling
    /// weight used by the priority-aware strategy.
    pub fn degree_of(&self, function_nodeid: &str) -> usize {
        self.function_to_tests
            .get(function_nodeid)
            .map_or(0, BTreeSet::len)
    }

    pub fn known_functions(&self) -> impl Iterator<Item = &str> {
        self.function_to_tests.keys().map(String::as_str)
    }

    /// An informational PageRank-style centrality score over the bipartite
    /// graph. Not on the critical path: `score()` on survivors uses plain
    /// node degree (see DESIGN.md's Open Question decision), but this is
    /// exposed for callers that want a richer ranking of targets.
    pub fn pagerank(&self, damping: f64, iterations: usize) -> BTreeMap<String, f64> {
        let mut nodes: BTreeSet<&str> = BTreeSet::new();
        nodes.extend(self.function_to_tests.keys().map(String::as_str));
        nodes.extend(self.test_to_functions.keys().map(String::as_str));
        let n = nodes.len().max(1);
        let mut rank: BTreeMap<&str, f64> = nodes.iter().map(|&n| (n, 1.0 / n as f64)).collect();
        let neighbors = |node: &str| -> Option<&BTreeSet<String>> {
            self.function_to_tests
                .get(node)
                .or_else(|| self.test_to_functions.get(node))
        };
        for _ in 0..iterations {
            let mut next: BTreeMap<&str, f64> = nodes.iter().map(|&n| (n, (1.0 - damping) / n as f64)).collect();
            for &node in &nodes {
                let Some(edges) = neighbors(node) else { continue };
                if edges.is_empty() {
                    continue;
                }
                let share = damping * rank[node] / edges.len() as f64;
                for target in edges {
                    if let Some(slot) = next.get_mut(target.as_str()) {
                        *slot += share;
                    }
                }
            }
            rank = next;
        }
        rank.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    /// Persist as zstd-compressed JSON, so later runs can reload without
    /// re-running the suite.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("serialize test-function map")?;
        let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL).context("zstd-compress test-function map")?;
        std::fs::write(path, compressed).with_context(|| format!("write {path}"))
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let compressed = std::fs::read(path).with_context(|| format!("read {path}"))?;
        let mut json = Vec::new();
        zstd::Decoder::new(compressed.as_slice())
            .context("open zstd stream")?
            .read_to_end(&mut json)
            .context("decompress test-function map")?;
        serde_json::from_slice(&json).context("parse test-function map json")
    }
}

/// Write `bytes` zstd-compressed, used for transcripts as well as the map.
pub fn zstd_write(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("create {path}"))?;
    let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_map() -> TestFunctionMap {
        let mut test_to_functions = BTreeMap::new();
        test_to_functions.insert(
            "t::a".to_string(),
            BTreeSet::from(["mod.py::f".to_string()]),
        );
        test_to_functions.insert(
            "t::b".to_string(),
            BTreeSet::from(["mod.py::f".to_string(), "mod.py::g".to_string()]),
        );
        TestFunctionMap::from_test_to_functions(test_to_functions)
    }

    #[test]
    fn inverse_mapping_is_derived() {
        let map = sample_map();
        assert_eq!(
            map.tests_for_function("mod.py::f").unwrap(),
            &BTreeSet::from(["t::a".to_string(), "t::b".to_string()])
        );
        assert_eq!(
            map.tests_for_function("mod.py::g").unwrap(),
            &BTreeSet::from(["t::b".to_string()])
        );
    }

    #[test]
    fn every_test_and_function_appears_on_both_sides() {
        let map = sample_map();
        for test in map.test_to_functions.keys() {
            assert!(map
                .function_to_tests
                .values()
                .any(|tests| tests.contains(test)));
        }
        for function in map.function_to_tests.keys() {
            assert!(map
                .test_to_functions
                .values()
                .any(|functions| functions.contains(function)));
        }
    }

    #[test]
    fn degree_counts_distinct_tests() {
        let map = sample_map();
        assert_eq!(map.degree_of("mod.py::f"), 2);
        assert_eq!(map.degree_of("mod.py::g"), 1);
        assert_eq!(map.degree_of("mod.py::missing"), 0);
    }

    #[test]
    fn related_tests_unions_across_targets() {
        let map = sample_map();
        let related = map.related_tests(["mod.py::f", "mod.py::g"].into_iter());
        assert_eq!(related, BTreeSet::from(["t::a".to_string(), "t::b".to_string()]));
    }

    #[test]
    fn round_trips_through_zstd_compressed_json() {
        let map = sample_map();
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("map.json.zst")).unwrap();
        map.save(&path).unwrap();
        let loaded = TestFunctionMap::load(&path).unwrap();
        assert_eq!(loaded.degree_of("mod.py::f"), 2);
    }
}
