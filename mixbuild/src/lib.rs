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

use anyhow::{self, Context};
use thiserror::Error;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use mixbuild_builder::{BuiltinRunner, DefaultFlags};
use mixbuild_desc::ProductTarget;
use mixbuild_interface::{ConfigKey, OsClass, OsType, RequestKind};
use mixbuild_paths::BazelPaths;
use mixbuild_tasks::{translate, write_ninja, TranslateConfig};

mod context;
mod policy;
mod registry;

pub use context::{
    aquery_command, build_command, cquery_command, BazelContext, BridgeError, BridgeOptions,
    CoverageConfig, DisabledBazelContext, MockBazelContext, RealBazelContext,
};
pub use policy::DelegationPolicy;
pub use registry::RequestRegistry;

/// Nothing to do with rustc debug vs. release.
#[derive(Debug, PartialEq, Eq)]
pub enum DebugMode {
    Stats,
}

#[derive(Error, Debug)]
#[error("Unknown debug setting '{0}'")]
pub struct DebugModeError(String);

impl std::str::FromStr for DebugMode {
    type Err = DebugModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stats" => Ok(DebugMode::Stats),
            e => Err(DebugModeError(e.to_owned())),
        }
    }
}

#[derive(Debug, Default)]
pub struct Config {
    pub execution_dir: Option<String>,
    pub soong_out: PathBuf,
    pub requests_file: Option<PathBuf>,
    pub enabled_file: Option<PathBuf>,
    pub disabled_file: Option<PathBuf>,
    pub default_delegated: bool,
    pub target: ProductTarget,
    pub coverage: CoverageConfig,
    pub ninja_file: Option<PathBuf>,
    pub runfiles_tool: Option<String>,
    pub debug_modes: Vec<DebugMode>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestFileError {
    #[error("line {line}: expected `<label> <kind> [<arch> [<os>]]`, got {text:?}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unknown request kind {kind:?}")]
    UnknownKind { line: usize, kind: String },
}

/// A request read from a requests file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub label: String,
    pub kind: RequestKind,
    pub config: ConfigKey,
}

fn os_type(name: &str) -> OsType {
    match name {
        "android" => OsType::android(),
        _ => OsType::new(name, OsClass::Host),
    }
}

/// Parses one request per line. A missing or `-` arch and OS mean the common configuration.
pub fn parse_requests(contents: &str) -> Result<Vec<RequestLine>, RequestFileError> {
    let mut requests = Vec::new();
    for (index, text) in contents.lines().enumerate() {
        let line = index + 1;
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < 2 || fields.len() > 4 {
            return Err(RequestFileError::Malformed {
                line,
                text: text.to_owned(),
            });
        }
        let kind = RequestKind::from_name(fields[1]).ok_or_else(|| RequestFileError::UnknownKind {
            line,
            kind: fields[1].to_owned(),
        })?;
        let arch = match fields.get(2) {
            Some(&"-") | None => "common",
            Some(arch) => *arch,
        };
        let os = match fields.get(3) {
            Some(&"-") | None => OsType::common_os(),
            Some(os) => os_type(os),
        };
        requests.push(RequestLine {
            label: fields[0].to_owned(),
            kind,
            config: ConfigKey::new(arch, os),
        });
    }
    Ok(requests)
}

fn read_names(path: &Option<PathBuf>) -> anyhow::Result<Vec<String>> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading module list {}", path.display()))?;
            Ok(DelegationPolicy::parse_names(&contents))
        }
        None => Ok(vec![]),
    }
}

fn default_runfiles_tool(paths: &BazelPaths) -> String {
    paths
        .out_dir()
        .join("host/linux-x86/bin/build-runfiles")
        .display()
        .to_string()
}

fn write_ninja_file(
    path: &Path,
    context: &RealBazelContext,
    runfiles_tool: &str,
) -> anyhow::Result<usize> {
    let description = translate(
        context.action_graph(),
        &TranslateConfig::from_paths(context.paths()),
    )?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_ninja(&description, runfiles_tool, &mut out)
        .with_context(|| format!("writing {}", path.display()))?;
    out.flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(description.builds.len())
}

pub fn run(config: Config) -> anyhow::Result<()> {
    if let Some(dir) = &config.execution_dir {
        std::env::set_current_dir(&dir).with_context(|| format!("changing to {} for -C", &dir))?;
    }

    let metrics_enabled = config.debug_modes.iter().any(|v| v == &DebugMode::Stats);
    if metrics_enabled {
        mixbuild_metrics::enable();
    }

    let paths = BazelPaths::from_env(&config.soong_out)?;
    let policy = DelegationPolicy::new(
        read_names(&config.enabled_file)?,
        read_names(&config.disabled_file)?,
        config.default_delegated,
    );
    let requests = match &config.requests_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading requests {}", path.display()))?;
            parse_requests(&contents).with_context(|| format!("in {}", path.display()))?
        }
        None => vec![],
    };
    let runfiles_tool = config
        .runfiles_tool
        .clone()
        .unwrap_or_else(|| default_runfiles_tool(&paths));

    let mut context = RealBazelContext::new(
        paths,
        Box::new(BuiltinRunner::default()),
        policy,
        BridgeOptions {
            target: config.target,
            coverage: config.coverage,
            flags: DefaultFlags::default(),
        },
    );
    for request in requests {
        context.queue_request(&request.label, request.kind, request.config)?;
    }
    tracing::info!(requests = context.pending_requests(), "starting bazel cycle");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime
        .block_on(context.invoke())
        .context("running bazel")?;

    if let Some(ninja_file) = &config.ninja_file {
        let builds = write_ninja_file(ninja_file, &context, &runfiles_tool)?;
        let term = console::Term::stderr();
        term.write_line(&format!(
            "{} {} build steps to {}",
            console::style("mixbuild:").bold(),
            builds,
            ninja_file.display()
        ))?;
    }

    if metrics_enabled {
        mixbuild_metrics::dump();
        if let Some(dir) = context.paths().metrics_dir() {
            mixbuild_metrics::write_to(dir)
                .with_context(|| format!("writing metrics to {}", dir.display()))?;
        }
    }
    Ok(())
}
