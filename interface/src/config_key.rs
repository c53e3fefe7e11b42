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

use std::fmt;

/// Whether an OS runs on the device being built or on the build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OsClass {
    Device,
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsType {
    pub name: String,
    pub class: OsClass,
}

impl OsType {
    pub fn new<S: Into<String>>(name: S, class: OsClass) -> OsType {
        OsType {
            name: name.into(),
            class,
        }
    }

    pub fn android() -> OsType {
        OsType::new("android", OsClass::Device)
    }

    pub fn linux_glibc() -> OsType {
        OsType::new("linux_glibc", OsClass::Host)
    }

    /// Placeholder OS used for modules that are not OS specific.
    pub fn common_os() -> OsType {
        OsType::new("common_os", OsClass::Host)
    }
}

/// An (architecture, OS) pair that a request is evaluated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey {
    pub arch: String,
    pub os: OsType,
}

impl ConfigKey {
    pub fn new<S: Into<String>>(arch: S, os: OsType) -> ConfigKey {
        ConfigKey {
            arch: arch.into(),
            os,
        }
    }

    /// The architecture-independent configuration, `common` on `common_os`.
    pub fn common() -> ConfigKey {
        ConfigKey::new("common", OsType::common_os())
    }

    pub fn canonical_arch(&self) -> &str {
        match self.arch.as_str() {
            "" | "common" => match self.os.class {
                // Generic device configuration.
                OsClass::Device => "target",
                // Host is always x86_64 for now.
                OsClass::Host => "x86_64",
            },
            arch => arch,
        }
    }

    pub fn canonical_os(&self) -> &str {
        match self.os.name.as_str() {
            "" | "common_os" | "linux_glibc" => "linux",
            name => name,
        }
    }

    /// `arch|os` after canonicalization.
    pub fn config_string(&self) -> String {
        format!("{}|{}", self.canonical_arch(), self.canonical_os())
    }

    /// Returns a key whose names are already canonical. The OS class is kept.
    pub fn canonicalize(&self) -> ConfigKey {
        ConfigKey {
            arch: self.canonical_arch().to_owned(),
            os: OsType::new(self.canonical_os(), self.os.class),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_common_arch_device() {
        let key = ConfigKey::new("common", OsType::android());
        assert_eq!(key.config_string(), "target|android");
        let key = ConfigKey::new("", OsType::android());
        assert_eq!(key.config_string(), "target|android");
    }

    #[test]
    fn test_common_arch_host() {
        assert_eq!(ConfigKey::common().config_string(), "x86_64|linux");
        let key = ConfigKey::new("", OsType::linux_glibc());
        assert_eq!(key.config_string(), "x86_64|linux");
    }

    #[test]
    fn test_named_arch_and_os_pass_through() {
        let key = ConfigKey::new("arm64", OsType::android());
        assert_eq!(key.config_string(), "arm64|android");
        let key = ConfigKey::new("x86", OsType::new("darwin", OsClass::Host));
        assert_eq!(key.config_string(), "x86|darwin");
        let key = ConfigKey::new("arm64", OsType::new("", OsClass::Device));
        assert_eq!(key.config_string(), "arm64|linux");
    }

    #[test]
    fn test_canonicalize_keeps_class() {
        let key = ConfigKey::common().canonicalize();
        assert_eq!(key, ConfigKey::new("x86_64", OsType::new("linux", OsClass::Host)));
    }
}
