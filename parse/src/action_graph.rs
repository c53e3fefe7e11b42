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

//! Decodes the `aquery --output=jsonproto` action graph into build statements and depsets.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::repr::{ActionKind, BuildStatement, Depset, KeyValuePair, BAZEL_TOOLS_DEPENDENCY_SENTINEL};

/// Dropped from depsets: the launcher generated by `TemplateExpand` replaces it.
const PY3_WRAPPER_FILE_NAME: &str = "/py3wrapper.sh";

/// Tokens whose aquery substitution is replaced when expanding templates.
const TEMPLATE_OVERRIDDEN_TOKENS: &[(&str, &str)] = &[("%python_binary%", "python3")];

#[derive(Error, Debug)]
pub enum ActionGraphError {
    #[error("malformed action graph: {0}")]
    Json(#[from] serde_json::Error),
    #[error("undefined path fragment id {0}")]
    UndefinedPathFragment(u32),
    #[error("fragment {id} ({label:?}) cannot refer to itself as parent")]
    SelfParentFragment { id: u32, label: String },
    #[error("undefined input artifactId {0}")]
    UndefinedArtifact(u32),
    #[error("undefined input depsetId {id} (referenced by depsetId {referenced_by})")]
    UndefinedChildDepset { id: u32, referenced_by: u32 },
    #[error("undefined input depsetId {0}")]
    UndefinedDepset(u32),
    #[error("depsetId {0} transitively contains itself")]
    DepsetCycle(u32),
    #[error("undefined input depset hash {0}")]
    UndefinedDepsetHash(String),
    #[error("undefined outputId {0}")]
    UndefinedOutput(u32),
    #[error("found multiple potential depfiles {0:?}, {1:?}")]
    MultipleDepfiles(String, String),
    #[error("received action with no command: [{0}]")]
    NoCommand(String),
    #[error("expect 1 input and 1 output to {mnemonic} action, got: input {inputs:?}, output {outputs:?}")]
    UnexpectedArity {
        mnemonic: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
    #[error("expect 1 output to template expand action, got: output {0:?}")]
    TemplateOutputs(Vec<String>),
    #[error("two different depsets have the same hash: {0:?}, {1:?}")]
    HashCollision(Depset, Depset),
}

type Result<T> = std::result::Result<T, ActionGraphError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Artifact {
    id: u32,
    path_fragment_id: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PathFragment {
    id: u32,
    label: String,
    parent_id: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DepSetOfFiles {
    id: u32,
    direct_artifact_ids: Vec<u32>,
    transitive_dep_set_ids: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Action {
    arguments: Vec<String>,
    environment_variables: Vec<KeyValuePair>,
    input_dep_set_ids: Vec<u32>,
    mnemonic: String,
    output_ids: Vec<u32>,
    template_content: String,
    substitutions: Vec<KeyValuePair>,
    file_contents: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ActionGraphContainer {
    artifacts: Vec<Artifact>,
    actions: Vec<Action>,
    dep_set_of_files: Vec<DepSetOfFiles>,
    path_fragments: Vec<PathFragment>,
}

/// Statements sorted by outputs and depsets sorted by hash, independent of the order or ids the
/// external tool used.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ActionGraph {
    pub statements: Vec<BuildStatement>,
    pub depsets: Vec<Depset>,
}

/// Hash of a depset's contents, used as its identifier.
pub fn depset_content_hash(direct_paths: &[String], transitive_hashes: &[String]) -> String {
    let mut hasher = Sha256::new();
    // Paths never contain newlines.
    hasher.update(direct_paths.join("\n").as_bytes());
    hasher.update(transitive_hashes.concat().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn expand_path_fragment(id: u32, fragments: &HashMap<u32, &PathFragment>) -> Result<String> {
    let mut labels = Vec::new();
    let mut current = id;
    // Zero terminates the chain.
    while current > 0 {
        let fragment = fragments
            .get(&current)
            .ok_or(ActionGraphError::UndefinedPathFragment(current))?;
        if fragment.parent_id == current {
            return Err(ActionGraphError::SelfParentFragment {
                id: current,
                label: fragment.label.clone(),
            });
        }
        if !fragment.label.is_empty() {
            labels.push(fragment.label.as_str());
        }
        current = fragment.parent_id;
    }
    labels.reverse();
    Ok(labels.join("/"))
}

struct ArtifactHandler<'a> {
    sentinel_needed: bool,
    artifact_paths: HashMap<u32, String>,
    middleman_inputs: HashMap<u32, &'a [u32]>,
    raw_depsets: HashMap<u32, &'a DepSetOfFiles>,
    depsets_by_id: HashMap<u32, Depset>,
    depsets_by_hash: HashMap<String, Depset>,
    flattened: HashMap<String, Vec<String>>,
}

impl<'a> ArtifactHandler<'a> {
    fn new(graph: &'a ActionGraphContainer) -> Result<ArtifactHandler<'a>> {
        let fragments: HashMap<u32, &PathFragment> =
            graph.path_fragments.iter().map(|f| (f.id, f)).collect();
        let mut artifact_paths = HashMap::new();
        for artifact in &graph.artifacts {
            artifact_paths.insert(
                artifact.id,
                expand_path_fragment(artifact.path_fragment_id, &fragments)?,
            );
        }

        let mut middleman_inputs = HashMap::new();
        for action in graph.actions.iter().filter(|a| a.mnemonic == "Middleman") {
            for output in &action.output_ids {
                middleman_inputs.insert(*output, action.input_dep_set_ids.as_slice());
            }
        }

        let mut handler = ArtifactHandler {
            sentinel_needed: false,
            artifact_paths,
            middleman_inputs,
            raw_depsets: graph.dep_set_of_files.iter().map(|d| (d.id, d)).collect(),
            depsets_by_id: HashMap::new(),
            depsets_by_hash: HashMap::new(),
            flattened: HashMap::new(),
        };
        let mut visiting = HashSet::new();
        for depset in &graph.dep_set_of_files {
            handler.populate(depset, &mut visiting)?;
        }
        Ok(handler)
    }

    fn populate(&mut self, depset: &'a DepSetOfFiles, visiting: &mut HashSet<u32>) -> Result<String> {
        if let Some(done) = self.depsets_by_id.get(&depset.id) {
            return Ok(done.content_hash.clone());
        }
        if !visiting.insert(depset.id) {
            return Err(ActionGraphError::DepsetCycle(depset.id));
        }

        let mut transitive_ids = depset.transitive_dep_set_ids.clone();
        let mut direct = Vec::new();
        for artifact_id in &depset.direct_artifact_ids {
            let path = self
                .artifact_paths
                .get(artifact_id)
                .ok_or(ActionGraphError::UndefinedArtifact(*artifact_id))?;
            if let Some(inputs) = self.middleman_inputs.get(artifact_id) {
                transitive_ids.extend_from_slice(inputs);
            } else if path.ends_with(PY3_WRAPPER_FILE_NAME) || path.starts_with("../bazel_tools") {
                // bazel_tools files carry timestamps far in the future and would keep dependents
                // permanently dirty.
            } else {
                direct.push(path.clone());
            }
        }

        let mut child_hashes = Vec::with_capacity(transitive_ids.len());
        for child_id in transitive_ids {
            let child = *self
                .raw_depsets
                .get(&child_id)
                .ok_or(ActionGraphError::UndefinedChildDepset {
                    id: child_id,
                    referenced_by: depset.id,
                })?;
            child_hashes.push(self.populate(child, visiting)?);
        }

        if direct.is_empty() && child_hashes.is_empty() {
            direct.push(BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned());
            self.sentinel_needed = true;
        }
        let resolved = Depset {
            content_hash: depset_content_hash(&direct, &child_hashes),
            direct_artifacts: direct,
            transitive_depset_hashes: child_hashes,
        };
        let hash = resolved.content_hash.clone();
        visiting.remove(&depset.id);
        self.depsets_by_hash.insert(hash.clone(), resolved.clone());
        self.depsets_by_id.insert(depset.id, resolved);
        Ok(hash)
    }

    fn depset_hashes(&self, ids: &[u32]) -> Result<Vec<String>> {
        ids.iter()
            .map(|id| {
                self.depsets_by_id
                    .get(id)
                    .map(|d| d.content_hash.clone())
                    .ok_or(ActionGraphError::UndefinedDepset(*id))
            })
            .collect()
    }

    fn flatten(&mut self, hash: &str) -> Result<Vec<String>> {
        if let Some(paths) = self.flattened.get(hash) {
            return Ok(paths.clone());
        }
        let depset = self
            .depsets_by_hash
            .get(hash)
            .cloned()
            .ok_or_else(|| ActionGraphError::UndefinedDepsetHash(hash.to_owned()))?;
        let mut paths = depset.direct_artifacts;
        for child in &depset.transitive_depset_hashes {
            paths.extend(self.flatten(child)?);
        }
        self.flattened.insert(hash.to_owned(), paths.clone());
        Ok(paths)
    }

    /// Flattened input paths. Only for actions that need their inputs spelled out.
    fn input_paths(&mut self, ids: &[u32]) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for hash in self.depset_hashes(ids)? {
            paths.extend(self.flatten(&hash)?);
        }
        Ok(paths)
    }

    /// Splits declared outputs into regular outputs and the (at most one) `.d` depfile.
    fn output_paths(&self, action: &Action) -> Result<(Vec<String>, Option<String>)> {
        let mut outputs = Vec::new();
        let mut depfile: Option<String> = None;
        for id in &action.output_ids {
            let path = self
                .artifact_paths
                .get(id)
                .ok_or(ActionGraphError::UndefinedOutput(*id))?;
            if path.ends_with(".d") {
                if let Some(previous) = depfile {
                    return Err(ActionGraphError::MultipleDepfiles(previous, path.clone()));
                }
                depfile = Some(path.clone());
            } else {
                outputs.push(path.clone());
            }
        }
        Ok((outputs, depfile))
    }

    fn generic_statement(&self, action: &Action) -> Result<BuildStatement> {
        let command = action
            .arguments
            .iter()
            .map(|arg| shell_escape::escape(arg.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let (output_paths, depfile) = self.output_paths(action)?;
        Ok(BuildStatement {
            command,
            depfile,
            output_paths,
            input_depset_hashes: self.depset_hashes(&action.input_dep_set_ids)?,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..Default::default()
        })
    }

    fn template_expand_statement(&self, action: &Action) -> Result<BuildStatement> {
        let (output_paths, depfile) = self.output_paths(action)?;
        if output_paths.len() != 1 {
            return Err(ActionGraphError::TemplateOutputs(output_paths));
        }
        // Newlines travel as literal `\n` through the echo and are restored by sed, so the
        // command stays on one line.
        let command = format!(
            r#"/bin/bash -c 'echo "{content}" | sed "s/\\\\n/\\n/g" > {out} && chmod a+x {out}'"#,
            content = escape_command_line_argument(&expand_template(action)),
            out = output_paths[0],
        );
        Ok(BuildStatement {
            command,
            depfile,
            output_paths,
            input_depset_hashes: self.depset_hashes(&action.input_dep_set_ids)?,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..Default::default()
        })
    }

    fn file_write_statement(&self, action: &Action) -> Result<BuildStatement> {
        let (output_paths, _) = self.output_paths(action)?;
        Ok(BuildStatement {
            output_paths,
            input_depset_hashes: self.depset_hashes(&action.input_dep_set_ids)?,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            file_contents: action.file_contents.clone(),
            ..Default::default()
        })
    }

    fn single_input_output(&mut self, action: &Action) -> Result<(Vec<String>, Option<String>, Vec<String>)> {
        let (output_paths, depfile) = self.output_paths(action)?;
        let input_paths = self.input_paths(&action.input_dep_set_ids)?;
        if input_paths.len() != 1 || output_paths.len() != 1 {
            return Err(ActionGraphError::UnexpectedArity {
                mnemonic: action.mnemonic.clone(),
                inputs: input_paths,
                outputs: output_paths,
            });
        }
        Ok((output_paths, depfile, input_paths))
    }

    fn symlink_tree_statement(&mut self, action: &Action) -> Result<BuildStatement> {
        // The command is supplied at translation time.
        let (output_paths, _, input_paths) = self.single_input_output(action)?;
        Ok(BuildStatement {
            output_paths,
            input_paths,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..Default::default()
        })
    }

    fn symlink_statement(&mut self, action: &Action) -> Result<BuildStatement> {
        let (output_paths, depfile, input_paths) = self.single_input_output(action)?;
        let out = &output_paths[0];
        let out_dir = match out.rfind('/') {
            Some(0) => "/",
            Some(i) => &out[..i],
            None => ".",
        };
        // Absolute link targets, some consumers mishandle relative ones.
        let command = format!(
            "mkdir -p {dir} && rm -f {out} && ln -sf $PWD/{input} {out}",
            dir = shell_escape::escape(out_dir.into()),
            out = shell_escape::escape(out.as_str().into()),
            input = shell_escape::escape(input_paths[0].as_str().into()),
        );
        Ok(BuildStatement {
            command,
            depfile,
            symlink_paths: output_paths.clone(),
            output_paths,
            input_paths,
            env: action.environment_variables.clone(),
            mnemonic: action.mnemonic.clone(),
            ..Default::default()
        })
    }

    fn statement(&mut self, action: &Action) -> Result<Option<BuildStatement>> {
        let statement = match ActionKind::from_mnemonic(&action.mnemonic) {
            ActionKind::Skipped => return Ok(None),
            ActionKind::Symlink => self.symlink_statement(action)?,
            ActionKind::TemplateExpand if action.arguments.is_empty() => {
                self.template_expand_statement(action)?
            }
            ActionKind::FileWrite => self.file_write_statement(action)?,
            ActionKind::SymlinkTree => self.symlink_tree_statement(action)?,
            _ if action.arguments.is_empty() => {
                return Err(ActionGraphError::NoCommand(action.mnemonic.clone()))
            }
            _ => self.generic_statement(action)?,
        };
        Ok(Some(statement))
    }
}

/// Applies the template's substitutions left to right, first matching key wins at each
/// position.
fn expand_template(action: &Action) -> String {
    let pairs: Vec<(&str, &str)> = action
        .substitutions
        .iter()
        .filter(|p| !p.key.is_empty())
        .map(|p| {
            let value = TEMPLATE_OVERRIDDEN_TOKENS
                .iter()
                .find(|(token, _)| *token == p.key)
                .map_or(p.value.as_str(), |(_, v)| *v);
            (p.key.as_str(), value)
        })
        .collect();

    let template = action.template_content.as_str();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'outer: while !rest.is_empty() {
        for (key, value) in &pairs {
            if rest.starts_with(key) {
                out.push_str(value);
                rest = &rest[key.len()..];
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Escapes for use inside a double quoted string that is itself in a single quoted
/// `bash -c` argument.
fn escape_command_line_argument(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '$' => out.push_str(r"\$"),
            '`' => out.push_str(r"\`"),
            '"' => out.push_str(r#"\""#),
            '\n' => out.push_str(r"\\n"),
            '\'' => out.push_str(r#"'"'"'"#),
            c => out.push(c),
        }
    }
    out
}

fn compare_statements(a: &BuildStatement, b: &BuildStatement) -> Ordering {
    // Each output has exactly one generating action, so outputs give a total order.
    a.output_paths
        .len()
        .cmp(&b.output_paths.len())
        .then_with(|| match (a.output_paths.first(), b.output_paths.first()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.command.cmp(&b.command),
        })
}

/// Decodes a jsonproto action graph.
pub fn parse_action_graph(json: &[u8]) -> Result<ActionGraph> {
    mixbuild_metrics::scoped_metric!("decode_action_graph");
    let container: ActionGraphContainer = serde_json::from_slice(json)?;
    let mut handler = ArtifactHandler::new(&container)?;

    let mut statements = Vec::with_capacity(container.actions.len());
    if handler.sentinel_needed {
        statements.push(BuildStatement {
            command: format!("touch '{}'", BAZEL_TOOLS_DEPENDENCY_SENTINEL),
            output_paths: vec![BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned()],
            mnemonic: BAZEL_TOOLS_DEPENDENCY_SENTINEL.to_owned(),
            ..Default::default()
        });
    }
    for action in &container.actions {
        if let Some(statement) = handler.statement(action)? {
            statements.push(statement);
        }
    }

    let mut by_hash: HashMap<&str, &Depset> = HashMap::new();
    let mut depsets = Vec::new();
    for depset in handler.depsets_by_id.values() {
        match by_hash.get(depset.content_hash.as_str()) {
            Some(previous) if *previous != depset => {
                return Err(ActionGraphError::HashCollision(
                    (*previous).clone(),
                    depset.clone(),
                ));
            }
            Some(_) => {
                tracing::trace!(hash = %depset.content_hash, "identical depsets share a hash");
            }
            None => {
                by_hash.insert(&depset.content_hash, depset);
                depsets.push(depset.clone());
            }
        }
    }

    statements.sort_by(compare_statements);
    depsets.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
    tracing::debug!(
        statements = statements.len(),
        depsets = depsets.len(),
        "decoded action graph"
    );
    Ok(ActionGraph {
        statements,
        depsets,
    })
}
