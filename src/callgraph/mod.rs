// Copyright 2025 Martin Pool

//! Dynamic Call-Graph Targeter (component C6): inject a coverage-per-test
//! tracer into the container, run the suite, build the bipartite
//! test↔function map, persist and reload it.
//!
//! Grounded on
//! `original_source/swesynth/mutation/validator/test_mapper/dynamic/targeter.py`:
//! the tracer script is assembled by concatenating small Python fragments
//! (here embedded with `include_str!` rather than read from disk at
//! runtime, mirroring how the teacher inlines static text such as
//! `textedit.rs`'s `indoc!` blocks), project coverage config is sanitized
//! before the run, and the dump file is pulled back out of the container
//! afterward.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use tracing::{debug, warn};

use crate::container::{Container, ExecOutcome};
use crate::test_function_map::TestFunctionMap;

const CONSTANTS_PY: &str = include_str!("fragments/constants.py");
const COLLECTOR_PY: &str = include_str!("fragments/collector.py");
const UTILS_PY: &str = include_str!("fragments/utils.py");
const TRACER_PY: &str = include_str!("fragments/tracer.py");
const MAIN_PY: &str = include_str!("fragments/main.py");

const DUMP_PATH: &str = "/tmp/swemutate_test_function_map.json";
const FRAGMENT_DIR: &str = "/tmp/swemutate_tracer";

/// Disable any `dynamic_context = test_function` / `branch = true` /
/// `parallel = true` setting in a `.coveragerc`/`setup.cfg`/`pyproject.toml`
/// coverage section, since the tracer sets these itself and duplicate
/// settings corrupt the per-test context data.
pub fn sanitize_coverage_config_script(repo_dir: &Utf8Path) -> String {
    format!(
        "cd {repo_dir} && for f in .coveragerc setup.cfg pyproject.toml tox.ini; do \
         [ -f \"$f\" ] && sed -i -E \
         's/^(\\s*)(dynamic_context|branch|parallel)(\\s*=\\s*)(test_function|true|True)/\\1# \\2 disabled by swemutate\\3\\4/' \"$f\" || true; \
         done"
    )
}

/// Build the full tracer script by concatenating the embedded fragments,
/// each written as its own importable module so `main.py`'s plain `import`
/// statements resolve without a package layout.
fn build_tracer_script(repo_dir: &Utf8Path) -> Vec<(&'static str, &'static str)> {
    let _ = repo_dir;
    vec![
        ("constants.py", CONSTANTS_PY),
        ("collector.py", COLLECTOR_PY),
        ("utils.py", UTILS_PY),
        ("tracer.py", TRACER_PY),
        ("main.py", MAIN_PY),
    ]
}

/// Run the full dynamic call-graph build against a pristine snapshot's
/// container, and return the resulting [`TestFunctionMap`].
pub async fn build_test_function_map(
    container: &Container,
    repo_dir: &Utf8Path,
    timeout: Duration,
) -> Result<TestFunctionMap> {
    for (name, contents) in build_tracer_script(repo_dir) {
        container
            .copy_in(&format!("{FRAGMENT_DIR}/{name}"), contents.as_bytes())
            .await
            .with_context(|| format!("copy tracer fragment {name}"))?;
    }

    let sanitize = sanitize_coverage_config_script(repo_dir);
    container.exec(&sanitize, "sanitize-coverage-config", timeout).await?;

    container
        .exec(
            &format!("pip install -q pytest-cov tqdm pytest-remotedata || true"),
            "install-tracer-deps",
            timeout,
        )
        .await?;

    let run_script = format!("cd {repo_dir} && PYTHONPATH={FRAGMENT_DIR}:$PYTHONPATH python3 {FRAGMENT_DIR}/main.py");
    match container.exec(&run_script, "build-call-graph", timeout).await? {
        ExecOutcome::Finished { exit_code, transcript } if exit_code == 0 => {
            debug!("call-graph tracer finished");
        }
        ExecOutcome::Finished { exit_code, transcript } => {
            bail!("call-graph tracer exited with {exit_code}: {transcript}")
        }
        ExecOutcome::Timeout { .. } => bail!("call-graph build timed out"),
    }

    let dump = container
        .read_file_from_container(DUMP_PATH)
        .await
        .context("read test-function map dump from container")?;
    parse_dump(&dump)
}

fn parse_dump(dump: &str) -> Result<TestFunctionMap> {
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(dump).context("parse tracer dump json")?;
    let test_to_functions = raw.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect();
    Ok(TestFunctionMap::from_test_to_functions(test_to_functions))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitize_script_targets_known_config_files() {
        let script = sanitize_coverage_config_script(Utf8Path::new("/repo"));
        assert!(script.contains(".coveragerc"));
        assert!(script.contains("dynamic_context"));
    }

    #[test]
    fn parse_dump_builds_a_consistent_map() {
        let dump = r#"{"t::a": ["mod.py::f"], "t::b": ["mod.py::f", "mod.py::g"]}"#;
        let map = parse_dump(dump).unwrap();
        assert_eq!(map.degree_of("mod.py::f"), 2);
        assert_eq!(map.degree_of("mod.py::g"), 1);
    }

    #[test]
    fn fragment_list_is_importable_in_dependency_order() {
        let fragments = build_tracer_script(Utf8Path::new("/repo"));
        let names: Vec<_> = fragments.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["constants.py", "collector.py", "utils.py", "tracer.py", "main.py"]);
    }
}
