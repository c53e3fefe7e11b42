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

use serde::Deserialize;

/// Placeholder artifact put into depsets that would otherwise be empty.
pub const BAZEL_TOOLS_DEPENDENCY_SENTINEL: &str = "BAZEL_TOOLS_DEPENDENCY_SENTINEL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// A depset with artifact ids resolved to paths and identified by its content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Depset {
    pub content_hash: String,
    pub direct_artifacts: Vec<String>,
    pub transitive_depset_hashes: Vec<String>,
}

/// One action of the external action graph, ready to be registered as a native build step.
///
/// Inputs are either depset hashes or expanded paths, never both for the same file. Paths are
/// relative to the execution root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStatement {
    /// Empty only for `FileWrite`, `SourceSymlinkManifest` and `SymlinkTree`.
    pub command: String,
    pub depfile: Option<String>,
    pub output_paths: Vec<String>,
    pub symlink_paths: Vec<String>,
    pub env: Vec<KeyValuePair>,
    pub mnemonic: String,
    pub input_depset_hashes: Vec<String>,
    pub input_paths: Vec<String>,
    pub file_contents: String,
}

/// How a statement with a given mnemonic is decoded and later translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Not turned into a statement.
    Skipped,
    Symlink,
    TemplateExpand,
    FileWrite,
    SymlinkTree,
    Generic,
}

impl ActionKind {
    pub fn from_mnemonic(mnemonic: &str) -> ActionKind {
        match mnemonic {
            // Middleman inputs are folded into the depsets that reference them.
            "Middleman" | "PythonZipper" | "Fail" | "BaselineCoverage" => ActionKind::Skipped,
            "Symlink" | "SolibSymlink" | "ExecutableSymlink" => ActionKind::Symlink,
            "TemplateExpand" => ActionKind::TemplateExpand,
            "FileWrite" | "SourceSymlinkManifest" => ActionKind::FileWrite,
            "SymlinkTree" => ActionKind::SymlinkTree,
            _ => ActionKind::Generic,
        }
    }
}
