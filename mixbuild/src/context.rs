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

//! The bridge as seen by the native graph.
//!
//! Requests are enqueued while the native graph is being analyzed, answered in one cycle, and then
//! read back. A cycle runs three invocations in sequence: a cquery for per-target results, an
//! aquery for the action graph and a build of the phony root for the symlink forest.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use mixbuild_builder::{
    create_invocation, BazelCommand, BazelRunner, DefaultFlags, Invocation, RunError, RunName,
};
use mixbuild_desc::{
    cquery_starlark_contents, main_build_file_contents, main_bzl_contents, ProductTarget,
    BUILDROOT_LABEL, BUILD_FILE_NAME, CQUERY_FILE_NAME, CQUERY_OUTPUT_FILE_NAME,
    MAIN_BZL_FILE_NAME, MIXED_BUILDS_DIR, PHONYROOT_LABEL, WORKSPACE_FILE_NAME,
};
use mixbuild_interface::{
    ApexInfo, CcInfo, CcUnstrippedInfo, ConfigKey, CqueryRequest, GetApexInfo, GetCcInfo,
    GetCcUnstrippedInfo, GetOutputFiles, GetPythonBinary, RequestKey, RequestKind,
    ResultParseError,
};
use mixbuild_metrics::scoped_metric;
use mixbuild_parse::{parse_action_graph, ActionGraph, ActionGraphError, CorrelationError};
use mixbuild_paths::{absolute_path, BazelPaths};
use thiserror::Error;
use tracing::{debug, info};

use crate::{policy::DelegationPolicy, registry::RequestRegistry};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("delegation to bazel is disabled")]
    DelegationDisabled,
    #[error("no bazel response found for {0}")]
    NoResponse(RequestKey),
    #[error(transparent)]
    Result(#[from] ResultParseError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("cannot decode aquery output: {0}")]
    ActionGraph(#[from] ActionGraphError),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BridgeError + '_ {
    move |source| BridgeError::Io {
        path: path.to_owned(),
        source,
    }
}

pub fn cquery_command() -> BazelCommand {
    BazelCommand::new("cquery", format!("deps({}, 2)", BUILDROOT_LABEL))
}

pub fn aquery_command() -> BazelCommand {
    BazelCommand::new("aquery", format!("deps({})", BUILDROOT_LABEL))
}

pub fn build_command() -> BazelCommand {
    BazelCommand::new("build", PHONYROOT_LABEL)
}

/// Native code coverage instrumentation requested for the product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageConfig {
    pub enabled: bool,
    pub paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

impl CoverageConfig {
    pub fn to_flags(&self) -> Vec<String> {
        if !self.enabled {
            return vec![];
        }
        let mut flags = vec!["--collect_code_coverage".to_owned()];
        // The filter takes regular expressions, not globs.
        let include = self.paths.iter().map(|p| {
            if p == "*" {
                "+.*".to_owned()
            } else {
                format!("+{}", p)
            }
        });
        let exclude = self.exclude_paths.iter().map(|p| format!("-{}", p));
        let filter: Vec<String> = include.chain(exclude).collect();
        if !filter.is_empty() {
            flags.push(format!("--instrumentation_filter={}", filter.join(",")));
        }
        flags
    }
}

/// Everything besides paths and policy that shapes a cycle.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    pub target: ProductTarget,
    pub coverage: CoverageConfig,
    pub flags: DefaultFlags,
}

#[async_trait(?Send)]
pub trait BazelContext: Sync {
    /// Adds a request to the next cycle. Safe to call from many threads.
    fn queue_request(
        &self,
        label: &str,
        kind: RequestKind,
        config: ConfigKey,
    ) -> Result<(), BridgeError>;

    fn output_files(&self, label: &str, config: &ConfigKey) -> Result<Vec<String>, BridgeError>;
    fn cc_info(&self, label: &str, config: &ConfigKey) -> Result<CcInfo, BridgeError>;
    fn python_binary(&self, label: &str, config: &ConfigKey) -> Result<String, BridgeError>;
    fn apex_info(&self, label: &str, config: &ConfigKey) -> Result<ApexInfo, BridgeError>;
    fn cc_unstripped_info(
        &self,
        label: &str,
        config: &ConfigKey,
    ) -> Result<CcUnstrippedInfo, BridgeError>;

    /// Answers every queued request. Results of the previous cycle are discarded first.
    async fn invoke(&mut self) -> Result<(), BridgeError>;

    fn is_delegated(&self, module_name: &str) -> bool;

    fn output_base(&self) -> Option<&Path>;

    /// Actions of the last cycle, to be registered as native build steps.
    fn action_graph(&self) -> &ActionGraph;
}

pub struct RealBazelContext {
    paths: BazelPaths,
    runner: Box<dyn BazelRunner>,
    policy: DelegationPolicy,
    options: BridgeOptions,
    registry: RequestRegistry,
    results: BTreeMap<RequestKey, String>,
    graph: ActionGraph,
    generated_files: Vec<PathBuf>,
}

impl RealBazelContext {
    pub fn new(
        paths: BazelPaths,
        runner: Box<dyn BazelRunner>,
        policy: DelegationPolicy,
        options: BridgeOptions,
    ) -> RealBazelContext {
        RealBazelContext {
            paths,
            runner,
            policy,
            options,
            registry: RequestRegistry::new(),
            results: BTreeMap::new(),
            graph: ActionGraph::default(),
            generated_files: vec![],
        }
    }

    pub fn paths(&self) -> &BazelPaths {
        &self.paths
    }

    /// Files written by the last cycle. Changes to any of them must rerun the native generator.
    pub fn generated_files(&self) -> &[PathBuf] {
        &self.generated_files
    }

    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    fn result<R: CqueryRequest>(&self, label: &str, config: &ConfigKey) -> Result<R::Output, BridgeError> {
        let key = RequestKey::new(label, R::KIND, config.clone());
        match self.results.get(&key) {
            Some(raw) => Ok(R::parse_result(raw.trim())?),
            None => Err(BridgeError::NoResponse(key)),
        }
    }

    async fn write_file(&mut self, path: PathBuf, contents: String) -> Result<(), BridgeError> {
        tokio::fs::write(&path, contents)
            .await
            .map_err(io_error(&path))?;
        self.generated_files.push(path);
        Ok(())
    }

    fn invocation(
        &self,
        run_name: RunName,
        command: &BazelCommand,
        extra_flags: &[String],
    ) -> Result<Invocation, BridgeError> {
        create_invocation(
            &self.paths,
            run_name,
            command,
            &self.options.flags,
            extra_flags,
        )
        .map_err(io_error(self.paths.soong_out_dir()))
    }

    async fn run_cquery(&mut self, requests: &[RequestKey]) -> Result<(), BridgeError> {
        scoped_metric!("cquery");
        let injected = absolute_path(&self.paths.injected_files_dir())
            .map_err(io_error(self.paths.soong_out_dir()))?;
        let mixed_builds = injected.join(MIXED_BUILDS_DIR);
        tokio::fs::create_dir_all(&mixed_builds)
            .await
            .map_err(io_error(&mixed_builds))?;

        self.write_file(injected.join(WORKSPACE_FILE_NAME), String::new())
            .await?;
        let main_bzl = main_bzl_contents(&self.options.target);
        self.write_file(mixed_builds.join(MAIN_BZL_FILE_NAME), main_bzl)
            .await?;
        let build_file = main_build_file_contents(requests);
        self.write_file(mixed_builds.join(BUILD_FILE_NAME), build_file)
            .await?;
        let cquery_file = injected.join(CQUERY_FILE_NAME);
        let starlark = cquery_starlark_contents(requests, &self.options.target);
        self.write_file(cquery_file.clone(), starlark).await?;

        let invocation = self.invocation(
            RunName::CqueryBuildroot,
            &cquery_command(),
            &[
                "--output=starlark".to_owned(),
                format!("--starlark:file={}", cquery_file.display()),
            ],
        )?;
        let output = self.runner.issue(&invocation).await?;
        let printed = format!(
            "cquery command line:\n  {} \n\n\n{}",
            invocation.printable(),
            output.stdout
        );
        self.write_file(injected.join(CQUERY_OUTPUT_FILE_NAME), printed)
            .await?;

        self.results = mixbuild_parse::correlate(requests, &output.stdout, &output.stderr)?;
        debug!(results = self.results.len(), "correlated cquery results");
        Ok(())
    }

    async fn run_aquery(&mut self) -> Result<(), BridgeError> {
        scoped_metric!("aquery");
        // jsonproto rather than proto, which would need the tool's proto definitions.
        let mut flags = vec![
            "--output=jsonproto".to_owned(),
            "--include_file_write_contents".to_owned(),
        ];
        flags.extend(self.options.coverage.to_flags());
        let invocation = self.invocation(RunName::AqueryBuildroot, &aquery_command(), &flags)?;
        let output = self.runner.issue(&invocation).await?;
        self.graph = parse_action_graph(output.stdout.as_bytes())?;
        Ok(())
    }

    /// aquery does not create the symlink forest some source dependencies resolve through.
    async fn build_symlinks(&mut self) -> Result<(), BridgeError> {
        scoped_metric!("symlinks");
        let invocation = self.invocation(RunName::BuildPhonyRoot, &build_command(), &[])?;
        self.runner.issue(&invocation).await?;
        Ok(())
    }

    async fn write_deps_file(&self) -> Result<(), BridgeError> {
        let deps_file = self.paths.deps_file();
        if let Some(parent) = deps_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let deps: Vec<String> = self
            .generated_files
            .iter()
            .map(|p| p.display().to_string().replace(' ', "\\ "))
            .collect();
        let contents = format!("{}: {}\n", deps_file.display(), deps.join(" \\\n  "));
        tokio::fs::write(deps_file, contents)
            .await
            .map_err(io_error(deps_file))
    }
}

#[async_trait(?Send)]
impl BazelContext for RealBazelContext {
    fn queue_request(
        &self,
        label: &str,
        kind: RequestKind,
        config: ConfigKey,
    ) -> Result<(), BridgeError> {
        self.registry.enqueue(RequestKey::new(label, kind, config));
        Ok(())
    }

    fn output_files(&self, label: &str, config: &ConfigKey) -> Result<Vec<String>, BridgeError> {
        self.result::<GetOutputFiles>(label, config)
    }

    fn cc_info(&self, label: &str, config: &ConfigKey) -> Result<CcInfo, BridgeError> {
        self.result::<GetCcInfo>(label, config)
    }

    fn python_binary(&self, label: &str, config: &ConfigKey) -> Result<String, BridgeError> {
        self.result::<GetPythonBinary>(label, config)
    }

    fn apex_info(&self, label: &str, config: &ConfigKey) -> Result<ApexInfo, BridgeError> {
        self.result::<GetApexInfo>(label, config)
    }

    fn cc_unstripped_info(
        &self,
        label: &str,
        config: &ConfigKey,
    ) -> Result<CcUnstrippedInfo, BridgeError> {
        self.result::<GetCcUnstrippedInfo>(label, config)
    }

    async fn invoke(&mut self) -> Result<(), BridgeError> {
        scoped_metric!("bazel");
        if let Some(dir) = self.paths.metrics_dir() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }
        self.results.clear();
        self.graph = ActionGraph::default();
        self.generated_files.clear();

        let requests = self.registry.snapshot();
        self.run_cquery(&requests).await?;
        self.run_aquery().await?;
        self.build_symlinks().await?;
        self.write_deps_file().await?;
        self.registry.take();

        info!(
            requests = requests.len(),
            statements = self.graph.statements.len(),
            depsets = self.graph.depsets.len(),
            "bazel cycle complete"
        );
        Ok(())
    }

    fn is_delegated(&self, module_name: &str) -> bool {
        self.policy.is_delegated(module_name)
    }

    fn output_base(&self) -> Option<&Path> {
        Some(self.paths.output_base())
    }

    fn action_graph(&self) -> &ActionGraph {
        &self.graph
    }
}

/// Used when mixed builds are off. Nothing is delegated and asking for results is an error.
#[derive(Debug, Default)]
pub struct DisabledBazelContext {
    graph: ActionGraph,
}

impl DisabledBazelContext {
    pub fn new() -> DisabledBazelContext {
        DisabledBazelContext::default()
    }
}

#[async_trait(?Send)]
impl BazelContext for DisabledBazelContext {
    fn queue_request(&self, _: &str, _: RequestKind, _: ConfigKey) -> Result<(), BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn output_files(&self, _: &str, _: &ConfigKey) -> Result<Vec<String>, BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn cc_info(&self, _: &str, _: &ConfigKey) -> Result<CcInfo, BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn python_binary(&self, _: &str, _: &ConfigKey) -> Result<String, BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn apex_info(&self, _: &str, _: &ConfigKey) -> Result<ApexInfo, BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn cc_unstripped_info(&self, _: &str, _: &ConfigKey) -> Result<CcUnstrippedInfo, BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    async fn invoke(&mut self) -> Result<(), BridgeError> {
        Err(BridgeError::DelegationDisabled)
    }

    fn is_delegated(&self, _: &str) -> bool {
        false
    }

    fn output_base(&self) -> Option<&Path> {
        None
    }

    fn action_graph(&self) -> &ActionGraph {
        &self.graph
    }
}

/// Answers from per-label tables regardless of configuration. Labels missing from a table
/// answer with the default value.
#[derive(Debug, Default)]
pub struct MockBazelContext {
    pub output_base: PathBuf,
    pub output_files: HashMap<String, Vec<String>>,
    pub cc_info: HashMap<String, CcInfo>,
    pub python_binary: HashMap<String, String>,
    pub apex_info: HashMap<String, ApexInfo>,
    pub cc_unstripped_info: HashMap<String, CcUnstrippedInfo>,
    pub graph: ActionGraph,
    requests: RequestRegistry,
    invocations: usize,
}

impl MockBazelContext {
    pub fn new<P: Into<PathBuf>>(output_base: P) -> MockBazelContext {
        MockBazelContext {
            output_base: output_base.into(),
            ..Default::default()
        }
    }

    /// Requests queued so far, sorted.
    pub fn queued(&self) -> Vec<RequestKey> {
        self.requests.snapshot()
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }
}

fn lookup<T: Clone + Default>(table: &HashMap<String, T>, label: &str) -> T {
    table.get(label).cloned().unwrap_or_default()
}

#[async_trait(?Send)]
impl BazelContext for MockBazelContext {
    fn queue_request(
        &self,
        label: &str,
        kind: RequestKind,
        config: ConfigKey,
    ) -> Result<(), BridgeError> {
        self.requests.enqueue(RequestKey::new(label, kind, config));
        Ok(())
    }

    fn output_files(&self, label: &str, _: &ConfigKey) -> Result<Vec<String>, BridgeError> {
        Ok(lookup(&self.output_files, label))
    }

    fn cc_info(&self, label: &str, _: &ConfigKey) -> Result<CcInfo, BridgeError> {
        Ok(lookup(&self.cc_info, label))
    }

    fn python_binary(&self, label: &str, _: &ConfigKey) -> Result<String, BridgeError> {
        Ok(lookup(&self.python_binary, label))
    }

    fn apex_info(&self, label: &str, _: &ConfigKey) -> Result<ApexInfo, BridgeError> {
        Ok(lookup(&self.apex_info, label))
    }

    fn cc_unstripped_info(
        &self,
        label: &str,
        _: &ConfigKey,
    ) -> Result<CcUnstrippedInfo, BridgeError> {
        Ok(lookup(&self.cc_unstripped_info, label))
    }

    async fn invoke(&mut self) -> Result<(), BridgeError> {
        self.invocations += 1;
        self.requests.take();
        Ok(())
    }

    fn is_delegated(&self, _: &str) -> bool {
        true
    }

    fn output_base(&self) -> Option<&Path> {
        Some(&self.output_base)
    }

    fn action_graph(&self) -> &ActionGraph {
        &self.graph
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_coverage_flags() {
        assert!(CoverageConfig::default().to_flags().is_empty());
        let coverage = CoverageConfig {
            enabled: true,
            paths: vec!["*".to_owned(), "external/zlib".to_owned()],
            exclude_paths: vec!["external/zlib/test".to_owned()],
        };
        assert_eq!(
            coverage.to_flags(),
            vec![
                "--collect_code_coverage",
                "--instrumentation_filter=+.*,+external/zlib,-external/zlib/test",
            ]
        );
        let bare = CoverageConfig {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(bare.to_flags(), vec!["--collect_code_coverage"]);
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            cquery_command().to_string(),
            "cquery deps(@soong_injection//mixed_builds:buildroot, 2)"
        );
        assert_eq!(
            aquery_command().to_string(),
            "aquery deps(@soong_injection//mixed_builds:buildroot)"
        );
        assert_eq!(
            build_command().to_string(),
            "build @soong_injection//mixed_builds:phonyroot"
        );
    }

    #[tokio::test]
    async fn test_disabled_refuses_everything() {
        let mut ctx = DisabledBazelContext::new();
        assert!(!ctx.is_delegated("libc"));
        assert!(matches!(
            ctx.queue_request("//a:b", RequestKind::OutputFiles, ConfigKey::common()),
            Err(BridgeError::DelegationDisabled)
        ));
        assert!(matches!(
            ctx.cc_info("//a:b", &ConfigKey::common()),
            Err(BridgeError::DelegationDisabled)
        ));
        assert!(matches!(
            ctx.invoke().await,
            Err(BridgeError::DelegationDisabled)
        ));
        assert_eq!(ctx.output_base(), None);
    }

    #[tokio::test]
    async fn test_mock_answers_from_tables() {
        let mut ctx = MockBazelContext::new("/ob");
        ctx.output_files
            .insert("//a:b".to_owned(), vec!["bazel-out/b".to_owned()]);
        ctx.queue_request("//a:b", RequestKind::OutputFiles, ConfigKey::common())
            .unwrap();
        assert_eq!(ctx.queued().len(), 1);
        ctx.invoke().await.unwrap();
        assert!(ctx.queued().is_empty());
        assert_eq!(ctx.invocations(), 1);
        assert_eq!(
            ctx.output_files("//a:b", &ConfigKey::common()).unwrap(),
            vec!["bazel-out/b"]
        );
        assert_eq!(
            ctx.python_binary("//missing", &ConfigKey::common()).unwrap(),
            ""
        );
        assert_eq!(ctx.output_base(), Some(Path::new("/ob")));
    }
}
