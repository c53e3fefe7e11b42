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

use std::{fmt, io, path::PathBuf};

use mixbuild_paths::{absolute_path, BazelPaths};

/// Verb plus the expression it is run against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BazelCommand {
    pub verb: &'static str,
    pub expression: String,
}

impl BazelCommand {
    pub fn new<S: Into<String>>(verb: &'static str, expression: S) -> BazelCommand {
        BazelCommand {
            verb,
            expression: expression.into(),
        }
    }
}

impl fmt::Display for BazelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb, self.expression)
    }
}

/// Names a run in profiles written to the metrics directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunName {
    CqueryBuildroot,
    AqueryBuildroot,
    BuildPhonyRoot,
}

impl RunName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunName::CqueryBuildroot => "cquery-buildroot",
            RunName::AqueryBuildroot => "aquery-buildroot",
            RunName::BuildPhonyRoot => "bazel-build-phony-root",
        }
    }
}

/// Flags passed to every invocation, after the command and before any extra flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultFlags {
    pub extra_toolchains: String,
    /// Host platform. Overridden per target by the generated configuration transitions.
    pub host_platform: String,
    pub disable_repository_download: bool,
    pub ui_event_filters: String,
    pub show_progress: bool,
    pub run_validations: bool,
}

impl Default for DefaultFlags {
    fn default() -> Self {
        DefaultFlags {
            extra_toolchains: "//prebuilts/clang/host/linux-x86:all".to_owned(),
            host_platform: "//build/bazel/platforms:linux_x86_64".to_owned(),
            disable_repository_download: true,
            ui_event_filters: "-INFO".to_owned(),
            show_progress: false,
            run_validations: false,
        }
    }
}

impl DefaultFlags {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--extra_toolchains={}", self.extra_toolchains),
            format!("--host_platform={}", self.host_platform),
        ];
        if self.disable_repository_download {
            args.push("--experimental_repository_disable_download".to_owned());
        }
        if !self.ui_event_filters.is_empty() {
            args.push(format!("--ui_event_filters={}", self.ui_event_filters));
        }
        let progress = if self.show_progress {
            "--show_progress"
        } else {
            "--noshow_progress"
        };
        args.push(progress.to_owned());
        let validations = if self.run_validations {
            "--run_validations"
        } else {
            "--norun_validations"
        };
        args.push(validations.to_owned());
        args
    }
}

/// A fully specified process invocation. Environment entries are overrides on top of the
/// inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: BazelCommand,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl Invocation {
    /// Shell-like rendering, environment overrides first.
    pub fn printable(&self) -> String {
        let env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut argv = vec![self.program.display().to_string()];
        argv.extend(self.args.iter().cloned());
        format!("{} \"{}\"", env.join(" "), argv.join("\" \""))
    }
}

fn pwd_override() -> Option<(String, String)> {
    // No /proc on macOS.
    if cfg!(target_os = "macos") {
        None
    } else {
        Some(("PWD".to_owned(), "/proc/self/cwd".to_owned()))
    }
}

pub fn create_invocation(
    paths: &BazelPaths,
    run_name: RunName,
    command: &BazelCommand,
    flags: &DefaultFlags,
    extra_flags: &[String],
) -> io::Result<Invocation> {
    let mut args = vec![
        format!(
            "--output_base={}",
            absolute_path(paths.output_base())?.display()
        ),
        command.verb.to_owned(),
        command.expression.clone(),
    ];
    if let Some(profile) = paths.metrics_filename(run_name.as_str()) {
        args.push(format!("--profile={}", profile.display()));
    }
    args.extend(flags.to_args());
    args.extend(extra_flags.iter().cloned());

    let mut env = vec![("HOME".to_owned(), paths.home_dir().display().to_string())];
    env.extend(pwd_override());
    env.push((
        "BUILD_DIR".to_owned(),
        absolute_path(paths.soong_out_dir())?.display().to_string(),
    ));
    // Absolute, so the wrapper script does not resolve it against the workspace directory.
    env.push((
        "OUT_DIR".to_owned(),
        absolute_path(&paths.out_dir())?.display().to_string(),
    ));
    // The toolchain comes from BUILD files, never from the host.
    env.push((
        "BAZEL_DO_NOT_DETECT_CPP_TOOLCHAIN".to_owned(),
        "1".to_owned(),
    ));

    Ok(Invocation {
        command: command.clone(),
        program: paths.bazel_path().to_owned(),
        args,
        env,
        cwd: absolute_path(&paths.synthetic_workspace_dir())?,
    })
}
