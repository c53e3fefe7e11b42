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

use std::collections::HashSet;

/// Decides per module name whether evaluation is delegated. Disabling wins over enabling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationPolicy {
    enabled: HashSet<String>,
    disabled: HashSet<String>,
    default_delegated: bool,
}

impl DelegationPolicy {
    pub fn new<I, J>(enabled: I, disabled: J, default_delegated: bool) -> DelegationPolicy
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        DelegationPolicy {
            enabled: enabled.into_iter().collect(),
            disabled: disabled.into_iter().collect(),
            default_delegated,
        }
    }

    /// Parses a list with one name per line. Blank lines and `#` comments are skipped.
    pub fn parse_names(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect()
    }

    pub fn is_delegated(&self, name: &str) -> bool {
        if self.disabled.contains(name) {
            false
        } else if self.enabled.contains(name) {
            true
        } else {
            self.default_delegated
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_precedence() {
        let policy = DelegationPolicy::new(names(&["libc", "both"]), names(&["libm", "both"]), false);
        assert!(policy.is_delegated("libc"));
        assert!(!policy.is_delegated("libm"));
        assert!(!policy.is_delegated("both"));
        assert!(!policy.is_delegated("other"));

        let by_default = DelegationPolicy::new(vec![], names(&["libm"]), true);
        assert!(by_default.is_delegated("other"));
        assert!(!by_default.is_delegated("libm"));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            DelegationPolicy::parse_names("libc\n\n  # comment\n libm \n"),
            names(&["libc", "libm"])
        );
    }
}
