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

use std::{collections::HashMap, process::Stdio, sync::Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::invocation::{BazelCommand, Invocation};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("could not start bazel: {source}\n---command---\n{command}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bazel command failed: exit status {}\n---command---\n{command}\n---env---\n{env}\n---stderr---\n{stderr}---", .status.map_or_else(|| "unknown".to_owned(), |s| s.to_string()))]
    CommandFailed {
        status: Option<i32>,
        command: String,
        env: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes invocations of the external tool. A failed invocation is never retried.
#[async_trait(?Send)]
pub trait BazelRunner: Send + Sync {
    async fn issue(&self, invocation: &Invocation) -> Result<RunOutput, RunError>;
}

fn failed(invocation: &Invocation, status: Option<i32>, stderr: String) -> RunError {
    RunError::CommandFailed {
        status,
        command: invocation.printable(),
        env: invocation
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n"),
        stderr,
    }
}

/// Spawns the real process.
#[derive(Debug, Default)]
pub struct BuiltinRunner {}

#[async_trait(?Send)]
impl BazelRunner for BuiltinRunner {
    async fn issue(&self, invocation: &Invocation) -> Result<RunOutput, RunError> {
        tracing::debug!(command = %invocation.printable(), "running bazel");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RunError::SpawnFailed {
                command: invocation.printable(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(failed(invocation, output.status.code(), stderr));
        }
        Ok(RunOutput { stdout, stderr })
    }
}

/// Answers invocations from canned output and records what was asked. Commands with no canned
/// output succeed with empty output.
#[derive(Debug, Default)]
pub struct MockRunner {
    results: HashMap<BazelCommand, String>,
    failures: HashMap<BazelCommand, String>,
    issued: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> MockRunner {
        MockRunner::default()
    }

    pub fn with_result<S: Into<String>>(mut self, command: BazelCommand, stdout: S) -> Self {
        self.results.insert(command, stdout.into());
        self
    }

    /// Makes `command` exit with status 1 and the given stderr.
    pub fn with_failure<S: Into<String>>(mut self, command: BazelCommand, stderr: S) -> Self {
        self.failures.insert(command, stderr.into());
        self
    }

    pub fn issued(&self) -> Vec<Invocation> {
        match self.issued.lock() {
            Ok(issued) => issued.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait(?Send)]
impl BazelRunner for MockRunner {
    async fn issue(&self, invocation: &Invocation) -> Result<RunOutput, RunError> {
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(invocation.clone());
        }
        match self.failures.get(&invocation.command) {
            Some(stderr) => Err(failed(invocation, Some(1), stderr.clone())),
            None => Ok(RunOutput {
                stdout: self
                    .results
                    .get(&invocation.command)
                    .cloned()
                    .unwrap_or_default(),
                stderr: String::new(),
            }),
        }
    }
}
