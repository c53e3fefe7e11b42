/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Translates a decoded action graph into native build steps.
//!
//! Depsets become phony nodes named after their content hash. Build statements become command,
//! write-file or runfiles steps whose paths live under the external tool's execution root.

mod ninja;

use std::{
    collections::HashSet,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use mixbuild_parse::{ActionGraph, ActionKind, BuildStatement, Depset};
use mixbuild_paths::BazelPaths;
use petgraph::{algo::toposort, graphmap::DiGraphMap};
use thiserror::Error;

pub use ninja::{write_ninja, NinjaWriteError};

/// Commands longer than this are written to a script and run from there.
pub const MAX_INLINE_COMMAND_LEN: usize = 16 * 1024;

/// Workspace status file. Changes to it must not rebuild dependents.
const VOLATILE_STATUS_FILE: &str = "bazel-out/volatile-status.txt";

pub fn depset_phony_name(hash: &str) -> String {
    format!("bazel_depset_{}", hash)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranslateError {
    #[error("depset {from} refers to unknown depset {to}")]
    DanglingDepset { from: String, to: String },
    #[error("build statement for {outputs:?} refers to unknown depset {hash}")]
    DanglingInput { outputs: Vec<String>, hash: String },
    #[error("depset {0} transitively contains itself")]
    DepsetCycle(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Phony,
    Command(String),
    /// Writes `content` verbatim to the single output.
    WriteFile(String),
    /// Writes a spilled command script to the single output.
    WriteScript(String),
    /// Creates the runfiles tree described by the input manifest in `out_dir`.
    BuildRunfiles { out_dir: String },
}

/// One native build step. All paths are native paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub rule: Rule,
    pub description: Option<String>,
    pub outputs: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub symlink_outputs: Vec<String>,
    pub inputs: Vec<String>,
    pub implicit_inputs: Vec<String>,
    pub order_inputs: Vec<String>,
    pub depfile: Option<String>,
}

impl Build {
    fn new(rule: Rule) -> Build {
        Build {
            rule,
            description: None,
            outputs: vec![],
            implicit_outputs: vec![],
            symlink_outputs: vec![],
            inputs: vec![],
            implicit_inputs: vec![],
            order_inputs: vec![],
            depfile: None,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self.rule {
            Rule::Command(ref c) => Some(c),
            _ => None,
        }
    }

    /// Everything this step produces, explicit or not.
    pub fn all_outputs(&self) -> impl Iterator<Item = &String> {
        self.outputs.iter().chain(self.implicit_outputs.iter())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Description {
    pub builds: Vec<Build>,
}

impl Description {
    /// The step producing `output`, if any.
    pub fn build_for(&self, output: &str) -> Option<&Build> {
        self.builds
            .iter()
            .find(|b| b.all_outputs().any(|o| o == output))
    }
}

/// Where translated paths point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateConfig {
    /// Working directory of every action, action paths are relative to it.
    pub execution_root: PathBuf,
    /// Directory spilled command scripts are written to.
    pub script_dir: PathBuf,
}

impl TranslateConfig {
    pub fn from_paths(paths: &BazelPaths) -> TranslateConfig {
        TranslateConfig {
            execution_root: paths.execution_root(),
            script_dir: paths.intermediates_dir().join("commands"),
        }
    }

    fn bazel_out_path(&self, path: &str) -> String {
        self.execution_root.join(path).display().to_string()
    }

    fn bazel_out_dir(&self) -> PathBuf {
        self.execution_root.join("bazel-out")
    }
}

/// Rejects depset references that point nowhere, and cycles among depsets.
fn check_depset_graph(graph: &ActionGraph) -> Result<(), TranslateError> {
    let known: HashSet<&str> = graph
        .depsets
        .iter()
        .map(|d| d.content_hash.as_str())
        .collect();
    let mut edges = DiGraphMap::<&str, ()>::new();
    for depset in &graph.depsets {
        edges.add_node(&depset.content_hash);
        for child in &depset.transitive_depset_hashes {
            if !known.contains(child.as_str()) {
                return Err(TranslateError::DanglingDepset {
                    from: depset.content_hash.clone(),
                    to: child.clone(),
                });
            }
            edges.add_edge(&depset.content_hash, child, ());
        }
    }
    toposort(&edges, None)
        .map_err(|cycle| TranslateError::DepsetCycle(cycle.node_id().to_owned()))?;

    for statement in &graph.statements {
        for hash in &statement.input_depset_hashes {
            if !known.contains(hash.as_str()) {
                return Err(TranslateError::DanglingInput {
                    outputs: statement.output_paths.clone(),
                    hash: hash.clone(),
                });
            }
        }
    }
    Ok(())
}

fn depset_build(depset: &Depset, config: &TranslateConfig) -> Build {
    let mut build = Build::new(Rule::Phony);
    build.outputs = vec![depset_phony_name(&depset.content_hash)];
    build.implicit_inputs = depset
        .transitive_depset_hashes
        .iter()
        .map(|h| depset_phony_name(h))
        .collect();
    for artifact in &depset.direct_artifacts {
        let path = config.bazel_out_path(artifact);
        if artifact == VOLATILE_STATUS_FILE {
            build.order_inputs.push(path);
        } else {
            build.implicit_inputs.push(path);
        }
    }
    build
}

fn assemble_command(statement: &BuildStatement, config: &TranslateConfig) -> String {
    let mut parts = vec![format!("cd '{}' &&", config.execution_root.display())];
    if !statement.output_paths.is_empty() {
        // -r because outputs may be tree artifacts.
        parts.push("rm -rf".to_owned());
        parts.extend(statement.output_paths.iter().map(|o| format!("'{}'", o)));
        parts.push("&&".to_owned());
    }
    parts.extend(
        statement
            .env
            .iter()
            .map(|pair| format!("{}={}", pair.key, pair.value)),
    );
    parts.push(statement.command.clone());
    if let Some(depfile) = &statement.depfile {
        // Depfile paths are relative to the execution root, but native paths are absolute.
        parts.push(format!(
            r#"&& sed -i'' -E 's@(^|\s|")bazel-out/@\1{}/@g' '{}'"#,
            config.bazel_out_dir().display(),
            depfile
        ));
    }
    parts.join(" ")
}

fn script_path(statement: &BuildStatement, index: usize, config: &TranslateConfig) -> PathBuf {
    match statement.output_paths.first() {
        Some(output) => config.script_dir.join(format!("{}.sh", output)),
        None => config.script_dir.join(format!("statement_{}.sh", index)),
    }
}

fn command_builds(statement: &BuildStatement, index: usize, config: &TranslateConfig) -> Vec<Build> {
    let full_command = assemble_command(statement, config);
    let mut builds = Vec::with_capacity(2);

    let (command, script) = if full_command.len() > MAX_INLINE_COMMAND_LEN {
        let script = script_path(statement, index, config).display().to_string();
        let mut write = Build::new(Rule::WriteScript(full_command));
        write.outputs = vec![script.clone()];
        write.description = Some(format!("script for {}", statement.mnemonic));
        builds.push(write);
        (format!("bash '{}'", script), Some(script))
    } else {
        (full_command, None)
    };

    let mut build = Build::new(Rule::Command(command));
    build.description = Some(format!(
        "{}: [{}]",
        statement.mnemonic,
        statement.output_paths.join(" ")
    ));
    build.implicit_outputs = statement
        .output_paths
        .iter()
        .map(|o| config.bazel_out_path(o))
        .collect();
    build.implicit_inputs = statement
        .input_paths
        .iter()
        .map(|i| config.bazel_out_path(i))
        .chain(
            statement
                .input_depset_hashes
                .iter()
                .map(|h| depset_phony_name(h)),
        )
        .chain(script)
        .collect();
    build.depfile = statement.depfile.as_ref().map(|d| config.bazel_out_path(d));
    build.symlink_outputs = statement
        .symlink_paths
        .iter()
        .map(|s| config.bazel_out_path(s))
        .collect();
    builds.push(build);
    builds
}

fn file_write_build(statement: &BuildStatement, config: &TranslateConfig) -> Build {
    let output = statement
        .output_paths
        .first()
        .map(|o| config.bazel_out_path(o));
    let mut build = Build::new(Rule::WriteFile(statement.file_contents.clone()));
    build.description = Some(format!(
        "{} {}",
        statement.mnemonic,
        statement.output_paths.first().map_or("", |s| s.as_str())
    ));
    build.outputs = output.into_iter().collect();
    build.implicit_inputs = statement
        .input_depset_hashes
        .iter()
        .map(|h| depset_phony_name(h))
        .collect();
    build
}

fn symlink_tree_build(statement: &BuildStatement, config: &TranslateConfig) -> Build {
    let manifest = config.bazel_out_path(statement.output_paths.first().map_or("", |s| s.as_str()));
    if Path::new(&manifest).file_name() != Some(OsStr::new("MANIFEST")) {
        panic!(
            "the base name of the symlink tree action should be MANIFEST, got {}",
            manifest
        );
    }
    let out_dir = Path::new(&manifest)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let mut build = Build::new(Rule::BuildRunfiles {
        out_dir: out_dir.clone(),
    });
    build.description = Some(format!("symlink tree for {}", out_dir));
    build.outputs = vec![manifest];
    build.inputs = statement
        .input_paths
        .iter()
        .take(1)
        .map(|i| config.bazel_out_path(i))
        .collect();
    build
}

/// Translates every depset and statement. Statements with no command are handled by their
/// mnemonic; any other statement without a command is a bug in the decoder and panics.
pub fn translate(graph: &ActionGraph, config: &TranslateConfig) -> Result<Description, TranslateError> {
    mixbuild_metrics::scoped_metric!("translate");
    check_depset_graph(graph)?;

    let mut builds = Vec::with_capacity(graph.depsets.len() + graph.statements.len());
    builds.extend(graph.depsets.iter().map(|d| depset_build(d, config)));

    for (index, statement) in graph.statements.iter().enumerate() {
        if !statement.command.is_empty() {
            builds.extend(command_builds(statement, index, config));
            continue;
        }
        match ActionKind::from_mnemonic(&statement.mnemonic) {
            ActionKind::FileWrite => builds.push(file_write_build(statement, config)),
            ActionKind::SymlinkTree => builds.push(symlink_tree_build(statement, config)),
            _ => panic!("unhandled build statement: {:?}", statement),
        }
    }
    Ok(Description { builds })
}
