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

//! The closed set of things that can be asked about a delegated target.
//!
//! Every kind contributes a Starlark function to the generated cquery file. That function
//! produces a single line payload, which the same kind knows how to decode.

use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    OutputFiles,
    PythonBinary,
    CcInfo,
    ApexInfo,
    CcUnstrippedInfo,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::OutputFiles,
        RequestKind::PythonBinary,
        RequestKind::CcInfo,
        RequestKind::ApexInfo,
        RequestKind::CcUnstrippedInfo,
    ];

    /// Unique and alphanumeric, used to build Starlark identifiers.
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::OutputFiles => "getOutputFiles",
            RequestKind::PythonBinary => "getPythonBinary",
            RequestKind::CcInfo => "getCcInfo",
            RequestKind::ApexInfo => "getApexInfo",
            RequestKind::CcUnstrippedInfo => "getCcUnstrippedInfo",
        }
    }

    pub fn from_name(name: &str) -> Option<RequestKind> {
        RequestKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Body of a Starlark function taking `(target, id_string)` and returning a string with no
    /// newlines. Statements are indented by two spaces relative to the function.
    pub fn starlark_function_body(&self) -> &'static str {
        match self {
            RequestKind::OutputFiles => OUTPUT_FILES_BODY,
            RequestKind::PythonBinary => PYTHON_BINARY_BODY,
            RequestKind::CcInfo => CC_INFO_BODY,
            RequestKind::ApexInfo => APEX_INFO_BODY,
            RequestKind::CcUnstrippedInfo => CC_UNSTRIPPED_INFO_BODY,
        }
    }
}

#[derive(Error, Debug)]
#[error("cannot decode {kind} result {raw:?}: {source}")]
pub struct ResultParseError {
    pub kind: &'static str,
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// Typed decoding for a request kind.
pub trait CqueryRequest {
    type Output;
    const KIND: RequestKind;

    fn parse_result(raw: &str) -> Result<Self::Output, ResultParseError>;
}

fn parse_json<T: DeserializeOwned>(kind: RequestKind, raw: &str) -> Result<T, ResultParseError> {
    serde_json::from_str(raw).map_err(|source| ResultParseError {
        kind: kind.name(),
        raw: raw.to_owned(),
        source,
    })
}

pub struct GetOutputFiles;
pub struct GetPythonBinary;
pub struct GetCcInfo;
pub struct GetApexInfo;
pub struct GetCcUnstrippedInfo;

impl CqueryRequest for GetOutputFiles {
    type Output = Vec<String>;
    const KIND: RequestKind = RequestKind::OutputFiles;

    fn parse_result(raw: &str) -> Result<Vec<String>, ResultParseError> {
        parse_json(Self::KIND, raw)
    }
}

impl CqueryRequest for GetPythonBinary {
    type Output = String;
    const KIND: RequestKind = RequestKind::PythonBinary;

    fn parse_result(raw: &str) -> Result<String, ResultParseError> {
        Ok(raw.to_owned())
    }
}

impl CqueryRequest for GetCcInfo {
    type Output = CcInfo;
    const KIND: RequestKind = RequestKind::CcInfo;

    fn parse_result(raw: &str) -> Result<CcInfo, ResultParseError> {
        parse_json(Self::KIND, raw)
    }
}

impl CqueryRequest for GetApexInfo {
    type Output = ApexInfo;
    const KIND: RequestKind = RequestKind::ApexInfo;

    fn parse_result(raw: &str) -> Result<ApexInfo, ResultParseError> {
        parse_json(Self::KIND, raw)
    }
}

impl CqueryRequest for GetCcUnstrippedInfo {
    type Output = CcUnstrippedInfo;
    const KIND: RequestKind = RequestKind::CcUnstrippedInfo;

    fn parse_result(raw: &str) -> Result<CcUnstrippedInfo, ResultParseError> {
        parse_json(Self::KIND, raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CcInfo {
    pub output_files: Vec<String>,
    pub cc_object_files: Vec<String>,
    pub cc_shared_library_files: Vec<String>,
    pub cc_static_library_files: Vec<String>,
    pub includes: Vec<String>,
    pub system_includes: Vec<String>,
    pub headers: Vec<String>,
    /// Archives owned by the target itself, as opposed to its dependencies.
    pub root_static_archives: Vec<String>,
    pub root_dynamic_libraries: Vec<String>,
    pub tidy_files: Vec<String>,
    pub toc_file: String,
    pub unstripped_output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApexInfo {
    pub signed_output: String,
    pub unsigned_output: String,
    pub provides_native_libs: Vec<String>,
    pub requires_native_libs: Vec<String>,
    /// Public key followed by private key.
    pub bundle_key_info: Vec<String>,
    /// Certificate followed by private key.
    pub container_key_info: Vec<String>,
    pub package_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CcUnstrippedInfo {
    pub output_file: String,
    pub unstripped_output: String,
}

const OUTPUT_FILES_BODY: &str = "return json_encode([f.path for f in target.files.to_list()])";

const PYTHON_BINARY_BODY: &str = r#"return providers(target)["FilesToRunProvider"].executable.path"#;

const CC_INFO_BODY: &str = r#"output_files = [f.path for f in target.files.to_list()]
p = providers(target)
cc_info = p.get("CcInfo")
if not cc_info:
  fail("%s did not provide CcInfo" % id_string)

compilation = cc_info.compilation_context
includes = compilation.includes.to_list()
system_includes = compilation.system_includes.to_list()
headers = [f.path for f in compilation.headers.to_list()]

object_files = []
static_libraries = []
root_static_archives = []
linker_inputs = cc_info.linking_context.linker_inputs.to_list()

static_info_tag = "//build/bazel/rules/cc:cc_library_static.bzl%CcStaticLibraryInfo"
if static_info_tag in p:
  static_info = p[static_info_tag]
  object_files = [f.path for f in static_info.objects]
  root_static_archives = [static_info.root_static_archive.path]
else:
  for linker_input in linker_inputs:
    for library in linker_input.libraries:
      object_files += [o.path for o in library.objects]
      if library.static_library:
        static_libraries.append(library.static_library.path)
        if linker_input.owner == target.label:
          root_static_archives.append(library.static_library.path)

shared_libraries = []
root_shared_libraries = []
unstripped = ""
shared_info_tag = "//build/bazel/rules/cc:cc_library_shared.bzl%CcSharedLibraryOutputInfo"
unstripped_tag = "//build/bazel/rules/cc:stripped_cc_common.bzl%CcUnstrippedInfo"
if shared_info_tag in p:
  path = p[shared_info_tag].output_file.path
  shared_libraries.append(path)
  root_shared_libraries.append(path)
  unstripped = path
  if unstripped_tag in p:
    unstripped = p[unstripped_tag].unstripped.path
else:
  for linker_input in linker_inputs:
    for library in linker_input.libraries:
      if library.dynamic_library:
        shared_libraries.append(library.dynamic_library.path)
        if linker_input.owner == target.label:
          root_shared_libraries.append(library.dynamic_library.path)

toc_file = ""
toc_tag = "//build/bazel/rules/cc:generate_toc.bzl%CcTocInfo"
if toc_tag in p:
  toc_file = p[toc_tag].toc.path

tidy_files = []
tidy_info = p.get("//build/bazel/rules/cc:clang_tidy.bzl%ClangTidyInfo")
if tidy_info:
  tidy_files = [f.path for f in tidy_info.transitive_tidy_files.to_list()]

return json_encode({
  "OutputFiles": output_files,
  "CcObjectFiles": object_files,
  "CcSharedLibraryFiles": shared_libraries,
  "CcStaticLibraryFiles": static_libraries,
  "Includes": includes,
  "SystemIncludes": system_includes,
  "Headers": headers,
  "RootStaticArchives": root_static_archives,
  "RootDynamicLibraries": root_shared_libraries,
  "TidyFiles": tidy_files,
  "TocFile": toc_file,
  "UnstrippedOutput": unstripped,
})"#;

const APEX_INFO_BODY: &str = r#"info = providers(target)["//build/bazel/rules/apex:apex.bzl%ApexInfo"]
return json_encode({
  "signed_output": info.signed_output.path,
  "unsigned_output": info.unsigned_output.path,
  "provides_native_libs": [str(lib) for lib in info.provides_native_libs],
  "requires_native_libs": [str(lib) for lib in info.requires_native_libs],
  "bundle_key_info": [info.bundle_key_pair[0].path, info.bundle_key_pair[1].path],
  "container_key_info": [info.container_key_pair[0].path, info.container_key_pair[1].path],
  "package_name": info.package_name,
})"#;

const CC_UNSTRIPPED_INFO_BODY: &str = r#"p = providers(target)
output_path = target.files.to_list()[0].path
unstripped = output_path
unstripped_tag = "//build/bazel/rules/cc:stripped_cc_common.bzl%CcUnstrippedInfo"
if unstripped_tag in p:
  unstripped = p[unstripped_tag].unstripped.files.to_list()[0].path
return json_encode({
  "OutputFile": output_path,
  "UnstrippedOutput": unstripped,
})"#;
