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

//! The set of directories the bridge reads from and writes into.
//!
//! Everything is derived from a handful of environment variables plus the native build's output
//! directory. Paths are resolved once, before any process is spawned.

use std::{
    env, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub const HOME_ENV: &str = "BAZEL_HOME";
pub const PATH_ENV: &str = "BAZEL_PATH";
pub const OUTPUT_BASE_ENV: &str = "BAZEL_OUTPUT_BASE";
pub const WORKSPACE_ENV: &str = "BAZEL_WORKSPACE";
pub const METRICS_DIR_ENV: &str = "BAZEL_METRICS_DIR";
pub const DEPS_FILE_ENV: &str = "BAZEL_DEPS_FILE";

/// Execution root of the main repository, relative to the output base.
const EXECROOT_MAIN: &str = "execroot/__main__";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathsError {
    /// Every unset variable is listed, not just the first one found.
    #[error("missing required env vars to use bazel: [{}]", .0.join(" "))]
    MissingEnvVars(Vec<String>),
    #[error("value of {var} is empty")]
    Empty { var: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BazelPaths {
    home_dir: PathBuf,
    bazel_path: PathBuf,
    output_base: PathBuf,
    workspace_dir: PathBuf,
    soong_out_dir: PathBuf,
    metrics_dir: Option<PathBuf>,
    deps_file: PathBuf,
}

impl BazelPaths {
    /// Reads the bridge's variables from the process environment.
    pub fn from_env<P: AsRef<Path>>(soong_out_dir: P) -> Result<BazelPaths, PathsError> {
        BazelPaths::from_lookup(soong_out_dir, |name| env::var(name).ok())
    }

    /// Like `from_env`, with a caller supplied lookup. Missing variables are all collected before
    /// failing.
    pub fn from_lookup<P, F>(soong_out_dir: P, lookup: F) -> Result<BazelPaths, PathsError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut required = |name: &str| -> PathBuf {
            match lookup(name) {
                Some(v) if !v.is_empty() => PathBuf::from(v),
                _ => {
                    missing.push(name.to_owned());
                    PathBuf::new()
                }
            }
        };
        let home_dir = required(HOME_ENV);
        let bazel_path = required(PATH_ENV);
        let output_base = required(OUTPUT_BASE_ENV);
        let workspace_dir = required(WORKSPACE_ENV);
        let deps_file = required(DEPS_FILE_ENV);
        if !missing.is_empty() {
            return Err(PathsError::MissingEnvVars(missing));
        }

        let soong_out_dir = soong_out_dir.as_ref();
        if soong_out_dir.as_os_str().is_empty() {
            return Err(PathsError::Empty {
                var: "soong out dir".to_owned(),
            });
        }
        let metrics_dir = lookup(METRICS_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(BazelPaths {
            home_dir,
            bazel_path,
            output_base,
            workspace_dir,
            soong_out_dir: soong_out_dir.to_owned(),
            metrics_dir,
            deps_file,
        })
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn bazel_path(&self) -> &Path {
        &self.bazel_path
    }

    pub fn output_base(&self) -> &Path {
        &self.output_base
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn soong_out_dir(&self) -> &Path {
        &self.soong_out_dir
    }

    pub fn metrics_dir(&self) -> Option<&Path> {
        self.metrics_dir.as_deref()
    }

    pub fn deps_file(&self) -> &Path {
        &self.deps_file
    }

    /// The top level output directory, parent of the soong out dir.
    pub fn out_dir(&self) -> PathBuf {
        match self.soong_out_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
            _ => PathBuf::from("."),
        }
    }

    /// Scratch space owned by the bridge.
    pub fn intermediates_dir(&self) -> PathBuf {
        self.soong_out_dir.join("bazel")
    }

    /// Root of the generated `@soong_injection` repository.
    pub fn injected_files_dir(&self) -> PathBuf {
        self.soong_out_dir.join("soong_injection")
    }

    /// Working directory for every invocation of the external tool.
    pub fn synthetic_workspace_dir(&self) -> PathBuf {
        self.soong_out_dir.join("workspace")
    }

    pub fn execution_root(&self) -> PathBuf {
        self.output_base.join(EXECROOT_MAIN)
    }

    /// `bazel-out` under the execution root. Action output paths are relative to the execution
    /// root and start with `bazel-out/`.
    pub fn bazel_out_dir(&self) -> PathBuf {
        self.execution_root().join("bazel-out")
    }

    /// Profile destination for a named run, if metrics are being collected.
    pub fn metrics_filename(&self, run_name: &str) -> Option<PathBuf> {
        self.metrics_dir
            .as_ref()
            .map(|d| d.join(format!("{}_bazel_profile.gz", run_name)))
    }
}

/// Makes `path` absolute against the current directory without touching the filesystem for
/// anything else.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (HOME_ENV, "/home/me"),
            (PATH_ENV, "/prebuilts/bazel"),
            (OUTPUT_BASE_ENV, "/out/bazel/output"),
            (WORKSPACE_ENV, "/src"),
            (DEPS_FILE_ENV, "/out/soong/bazel.list.d"),
        ]
    }

    #[test]
    fn test_all_present() {
        let paths = BazelPaths::from_lookup("/out/soong", lookup_from(&full_env())).unwrap();
        assert_eq!(paths.out_dir(), PathBuf::from("/out"));
        assert_eq!(
            paths.injected_files_dir(),
            PathBuf::from("/out/soong/soong_injection")
        );
        assert_eq!(
            paths.synthetic_workspace_dir(),
            PathBuf::from("/out/soong/workspace")
        );
        assert_eq!(
            paths.bazel_out_dir(),
            PathBuf::from("/out/bazel/output/execroot/__main__/bazel-out")
        );
        assert_eq!(paths.metrics_dir(), None);
        assert_eq!(paths.metrics_filename("cquery-buildroot"), None);
    }

    #[test]
    fn test_missing_vars_reported_together() {
        let env = vec![(HOME_ENV, "/home/me"), (WORKSPACE_ENV, "/src")];
        let err = BazelPaths::from_lookup("/out/soong", lookup_from(&env)).unwrap_err();
        assert_eq!(
            err,
            PathsError::MissingEnvVars(vec![
                PATH_ENV.to_owned(),
                OUTPUT_BASE_ENV.to_owned(),
                DEPS_FILE_ENV.to_owned()
            ])
        );
        insta::assert_snapshot!(err.to_string(), @"missing required env vars to use bazel: [BAZEL_PATH BAZEL_OUTPUT_BASE BAZEL_DEPS_FILE]");
    }

    #[test]
    fn test_empty_counts_as_missing() {
        let mut env = full_env();
        env.push((PATH_ENV, ""));
        let map: HashMap<_, _> = env.into_iter().collect();
        let err = BazelPaths::from_lookup("/out/soong", |n| map.get(n).map(|v| v.to_string()))
            .unwrap_err();
        assert_eq!(err, PathsError::MissingEnvVars(vec![PATH_ENV.to_owned()]));
    }

    #[test]
    fn test_metrics_dir() {
        let mut env = full_env();
        env.push((METRICS_DIR_ENV, "/out/metrics"));
        let paths = BazelPaths::from_lookup("/out/soong", lookup_from(&env)).unwrap();
        assert_eq!(
            paths.metrics_filename("aquery-buildroot"),
            Some(PathBuf::from("/out/metrics/aquery-buildroot_bazel_profile.gz"))
        );
    }

    #[test]
    fn test_relative_soong_out_dir() {
        let paths = BazelPaths::from_lookup("soong", lookup_from(&full_env())).unwrap();
        assert_eq!(paths.out_dir(), PathBuf::from("."));
        assert!(absolute_path(&paths.intermediates_dir())
            .unwrap()
            .is_absolute());
    }
}
