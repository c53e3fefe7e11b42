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

//! Decoders for the two structured outputs of the external evaluator: the line oriented cquery
//! result and the action graph.

mod action_graph;
mod query;
mod repr;

pub use action_graph::{depset_content_hash, parse_action_graph, ActionGraph, ActionGraphError};
pub use query::{correlate, CorrelationError, CqueryOutput, RESULT_SEPARATOR};
pub use repr::{ActionKind, BuildStatement, Depset, KeyValuePair, BAZEL_TOOLS_DEPENDENCY_SENTINEL};
