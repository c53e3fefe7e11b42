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

//! Types shared between the registry, the program generator and the result decoders.

mod config_key;
mod request;

pub use config_key::{ConfigKey, OsClass, OsType};
pub use request::{
    ApexInfo, CcInfo, CcUnstrippedInfo, CqueryRequest, GetApexInfo, GetCcInfo,
    GetCcUnstrippedInfo, GetOutputFiles, GetPythonBinary, RequestKind, ResultParseError,
};

use std::fmt;

/// Rewrites main repository labels (`//pkg:name`) into their explicit form (`@//pkg:name`), which
/// is how the external tool prints them back.
pub fn normalize_label(label: &str) -> String {
    if label.starts_with("//") {
        format!("@{}", label)
    } else {
        label.to_owned()
    }
}

/// A single request. The label is stored normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    label: String,
    kind: RequestKind,
    config: ConfigKey,
}

impl RequestKey {
    pub fn new(label: &str, kind: RequestKind, config: ConfigKey) -> RequestKey {
        RequestKey {
            label: normalize_label(label),
            kind,
            config,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn config(&self) -> &ConfigKey {
        &self.config
    }

    /// `label|arch|os`, the key a cquery output line is correlated on. The kind travels as a
    /// separate tag on the line.
    pub fn cquery_id(&self) -> String {
        format!("{}|{}", self.label, self.config.config_string())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.cquery_id())
    }
}

/// Splits an id produced by `RequestKey::cquery_id` back into label, arch and OS.
pub fn parse_cquery_id(id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = id.rsplitn(3, '|');
    let os = parts.next()?;
    let arch = parts.next()?;
    let label = parts.next()?;
    Some((label, arch, os))
}
