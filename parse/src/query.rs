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

use std::collections::{BTreeMap, HashMap};

use mixbuild_interface::{RequestKey, RequestKind};
use thiserror::Error;

/// Separates the request id from its payload on every cquery output line.
pub const RESULT_SEPARATOR: &str = ">>";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("missing {kind} result for bazel target {id}. query output: [{output}], cquery err: [{stderr}]")]
    MissingResult {
        id: String,
        kind: &'static str,
        output: String,
        stderr: String,
    },
}

/// Payloads of one cquery run, keyed by id and, for tagged lines, by kind.
#[derive(Debug, Default)]
pub struct CqueryOutput<'a> {
    tagged: HashMap<&'a str, HashMap<RequestKind, &'a str>>,
    untagged: HashMap<&'a str, &'a str>,
}

impl<'a> CqueryOutput<'a> {
    /// A line is `id>>kind>>payload`, or `id>>payload` when it is not tagged with a kind name.
    /// Lines without the separator (tool chatter) are ignored. Payloads may contain `>>`.
    pub fn parse(output: &'a str) -> CqueryOutput<'a> {
        let mut parsed = CqueryOutput::default();
        for line in output.lines() {
            let mut parts = line.splitn(2, RESULT_SEPARATOR);
            let (id, rest) = match (parts.next(), parts.next()) {
                (Some(id), Some(rest)) => (id, rest),
                _ => continue,
            };
            let mut tagged = rest.splitn(2, RESULT_SEPARATOR);
            match (
                tagged.next().and_then(RequestKind::from_name),
                tagged.next(),
            ) {
                (Some(kind), Some(payload)) => {
                    parsed.tagged.entry(id).or_default().insert(kind, payload);
                }
                _ => {
                    parsed.untagged.insert(id, rest);
                }
            }
        }
        parsed
    }

    /// The payload for `kind` under `id`. A tagged line wins over an untagged one.
    pub fn get(&self, id: &str, kind: RequestKind) -> Option<&'a str> {
        self.tagged
            .get(id)
            .and_then(|kinds| kinds.get(&kind))
            .or_else(|| self.untagged.get(id))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.tagged.values().map(HashMap::len).sum::<usize>() + self.untagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pairs every request with its raw payload. A request with no corresponding line fails the
/// whole correlation.
pub fn correlate<'a, I>(
    requests: I,
    output: &str,
    stderr: &str,
) -> Result<BTreeMap<RequestKey, String>, CorrelationError>
where
    I: IntoIterator<Item = &'a RequestKey>,
{
    let parsed = CqueryOutput::parse(output);
    let mut results = BTreeMap::new();
    for request in requests {
        let id = request.cquery_id();
        match parsed.get(&id, request.kind()) {
            Some(payload) => {
                results.insert(request.clone(), payload.to_owned());
            }
            None => {
                return Err(CorrelationError::MissingResult {
                    id,
                    kind: request.kind().name(),
                    output: output.to_owned(),
                    stderr: stderr.to_owned(),
                })
            }
        }
    }
    Ok(results)
}
