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

//! Invocation of the external evaluator.
//!
//! Every invocation uses the same output base, working directory, flag profile and environment
//! overrides. Only the command, its expression and the extra flags vary.

mod invocation;
mod runner;

pub use invocation::{create_invocation, BazelCommand, DefaultFlags, Invocation, RunName};
pub use runner::{BazelRunner, BuiltinRunner, MockRunner, RunError, RunOutput};
