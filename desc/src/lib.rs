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

//! Generates the Starlark program handed to the external evaluator.
//!
//! Three files make up the program: the rule definitions (`main.bzl`), the wiring file
//! (`BUILD.bazel`) that instantiates one configuration node per requested configuration, and
//! the cquery formatting file that prints one line per configured target. All of them are pure
//! functions of the request snapshot, and their output is byte-identical for equal snapshots.

use std::collections::{BTreeMap, BTreeSet};

use mixbuild_interface::{RequestKey, RequestKind};

/// Name of the repository the generated files are injected as.
pub const INJECTION_REPOSITORY: &str = "soong_injection";
pub const WORKSPACE_FILE_NAME: &str = "WORKSPACE.bazel";
pub const MIXED_BUILDS_DIR: &str = "mixed_builds";
pub const MAIN_BZL_FILE_NAME: &str = "main.bzl";
pub const BUILD_FILE_NAME: &str = "BUILD.bazel";
pub const CQUERY_FILE_NAME: &str = "buildroot.cquery";
pub const CQUERY_OUTPUT_FILE_NAME: &str = "cquery.out";

pub const BUILDROOT_LABEL: &str = "@soong_injection//mixed_builds:buildroot";
pub const PHONYROOT_LABEL: &str = "@soong_injection//mixed_builds:phonyroot";

/// Identifies the product platforms are generated for.
///
/// With an empty product, configurations map onto the checked in `<os>_<arch>` platforms.
/// Otherwise onto the injected `<product>-<variant>_<os>_<arch>` platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductTarget {
    pub product: String,
    pub variant: String,
}

impl ProductTarget {
    pub fn new<S: Into<String>>(product: S, variant: S) -> ProductTarget {
        ProductTarget {
            product: product.into(),
            variant: variant.into(),
        }
    }

    /// Prefix every platform name of this product starts with, possibly empty.
    pub fn platform_prefix(&self) -> String {
        if self.product.is_empty() {
            String::new()
        } else if self.variant.is_empty() {
            format!("{}_", self.product)
        } else {
            format!("{}-{}_", self.product, self.variant)
        }
    }

    fn platform_package(&self) -> &'static str {
        if self.product.is_empty() {
            "@//build/bazel/platforms"
        } else {
            "@soong_injection//product_config_platforms"
        }
    }
}

const GENERATED_HEADER: &str = "# This file is generated by mixbuild. Do not edit.";

pub fn main_bzl_contents(target: &ProductTarget) -> String {
    format!(
        r#"{header}

def _config_node_transition_impl(settings, attr):
    return {{
        "//command_line_option:platforms": "{package}:{prefix}%s_%s" % (attr.os, attr.arch),
    }}

_config_node_transition = transition(
    implementation = _config_node_transition_impl,
    inputs = [],
    outputs = [
        "//command_line_option:platforms",
    ],
)

def _passthrough_rule_impl(ctx):
    return [DefaultInfo(files = depset(ctx.files.deps))]

config_node = rule(
    implementation = _passthrough_rule_impl,
    attrs = {{
        "arch" : attr.string(mandatory = True),
        "os"   : attr.string(mandatory = True),
        "deps" : attr.label_list(cfg = _config_node_transition, allow_files = True),
        "_allowlist_function_transition": attr.label(default = "@bazel_tools//tools/allowlists/function_transition_allowlist"),
    }},
)

# Depends on every requested target. Building it builds everything delegated.
mixed_build_root = rule(
    implementation = _passthrough_rule_impl,
    attrs = {{
        "deps" : attr.label_list(),
    }},
)

def _phony_root_impl(ctx):
    return []

# Depends on targets without building them. Building it only creates the symlink forest of its
# dependencies.
phony_root = rule(
    implementation = _phony_root_impl,
    attrs = {{"deps" : attr.label_list()}},
)
"#,
        header = GENERATED_HEADER,
        package = target.platform_package(),
        prefix = target.platform_prefix(),
    )
}

/// Groups requested labels by canonical configuration string. Labels requested under several
/// kinds appear once.
fn labels_by_config<'a, I>(requests: I) -> BTreeMap<String, BTreeSet<&'a str>>
where
    I: IntoIterator<Item = &'a RequestKey>,
{
    let mut by_config: BTreeMap<String, BTreeSet<&'a str>> = BTreeMap::new();
    for request in requests {
        by_config
            .entry(request.config().config_string())
            .or_default()
            .insert(request.label());
    }
    by_config
}

const LIST_SEPARATOR: &str = ",\n            ";

pub fn main_build_file_contents<'a, I>(requests: I) -> String
where
    I: IntoIterator<Item = &'a RequestKey>,
{
    let mut config_nodes = String::new();
    let mut node_labels = Vec::new();
    for (config, labels) in labels_by_config(requests) {
        let tokens: Vec<&str> = config.split('|').collect();
        if tokens.len() != 2 {
            panic!("unexpected config string format: {}", config);
        }
        let (arch, os) = (tokens[0], tokens[1]);
        let node = format!("{}_{}", os, arch);
        node_labels.push(format!("\":{}\"", node));
        let deps: Vec<String> = labels.iter().map(|l| format!("\"{}\"", l)).collect();
        config_nodes.push_str(&format!(
            r#"
config_node(name = "{node}",
    arch = "{arch}",
    os = "{os}",
    deps = [{deps}],
)
"#,
            node = node,
            arch = arch,
            os = os,
            deps = deps.join(LIST_SEPARATOR),
        ));
    }

    format!(
        r#"{header}
load(":main.bzl", "config_node", "mixed_build_root", "phony_root")
{config_nodes}
mixed_build_root(name = "buildroot",
    deps = [{roots}],
)

phony_root(name = "phonyroot",
    deps = [":buildroot"],
)
"#,
        header = GENERATED_HEADER,
        config_nodes = config_nodes,
        roots = node_labels.join(LIST_SEPARATOR),
    )
}

fn indent(body: &str) -> String {
    body.lines().map(|line| format!("  {}\n", line)).collect()
}

/// Starlark string literal for an id. Ids are labels plus configuration tokens, none of which
/// need escaping beyond quotes and backslashes.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

const JSON_ENCODE_FN: &str = r#"# json.encode() is not available to cquery.
# Dicts may hold anything but a dict, lists only hold primitives.
def json_encode(input):
  def encode_primitive(p):
    t = type(p)
    if t == "string" or t == "int":
      return repr(p)
    fail("unsupported value '%s' of type '%s'" % (p, type(p)))

  def encode_list(list):
    return "[%s]" % ", ".join([encode_primitive(item) for item in list])

  def encode_list_or_primitive(v):
    return encode_list(v) if type(v) == "list" else encode_primitive(v)

  if type(input) == "dict":
    # Output is read line by line, so no newlines between entries.
    kv_pairs = [("%s: %s" % (encode_primitive(k), encode_list_or_primitive(v))) for (k, v) in input.items()]
    return "{ %s }" % ", ".join(kv_pairs)
  else:
    return encode_list_or_primitive(input)
"#;

fn get_arch_fn(target: &ProductTarget) -> String {
    format!(
        r#"def get_arch(target):
  buildoptions = build_options(target)
  if buildoptions == None:
    # File targets have no build options and are not tied to a platform, use the host.
    return "x86_64|linux"
  platforms = buildoptions["//command_line_option:platforms"]
  if len(platforms) != 1:
    # A configured target has exactly one platform, each architecture of a label is its own
    # configured target.
    fail("expected exactly 1 platform for " + str(target.label) + " but got " + str(platforms))
  platform_name = platforms[0].name
  if platform_name == "host":
    return "HOST"
  if not platform_name.startswith("{prefix}"):
    fail("expected platform name of the form '{prefix}android_<arch>' or '{prefix}linux_<arch>', but was " + str(platforms))
  platform_name = platform_name[len("{prefix}"):]
  if platform_name.startswith("android_"):
    return platform_name[len("android_"):] + "|android"
  elif platform_name.startswith("linux_"):
    return platform_name[len("linux_"):] + "|linux"
  fail("expected platform name of the form '{prefix}android_<arch>' or '{prefix}linux_<arch>', but was " + str(platforms))
  return "UNKNOWN"
"#,
        prefix = target.platform_prefix()
    )
}

pub fn cquery_starlark_contents<'a, I>(requests: I, target: &ProductTarget) -> String
where
    I: IntoIterator<Item = &'a RequestKey>,
{
    let mut ids_by_kind: BTreeMap<RequestKind, BTreeSet<String>> = BTreeMap::new();
    for request in requests {
        ids_by_kind
            .entry(request.kind())
            .or_default()
            .insert(request.cquery_id());
    }

    let mut tables = String::new();
    let mut functions = String::new();
    let mut switch = String::new();
    for (kind, ids) in &ids_by_kind {
        let table = format!("{}_Labels", kind.name());
        let function = format!("{}_Fn", kind.name());
        let entries: Vec<String> = ids.iter().map(|id| format!("{} : True", quote(id))).collect();
        tables.push_str(&format!(
            "\n{} = {{\n  {}\n}}\n",
            table,
            entries.join(",\n  ")
        ));
        functions.push_str(&format!(
            "\ndef {}(target, id_string):\n{}",
            function,
            indent(kind.starlark_function_body())
        ));
        switch.push_str(&format!(
            "  if id_string in {table}:\n    results.append(id_string + \">>{kind}>>\" + {function}(target, id_string))\n",
            table = table,
            kind = kind.name(),
            function = function
        ));
    }

    format!(
        r#"{header}

{json_encode}
# Label tables
{tables}
# Functions
{functions}
{get_arch}
def format(target):
  id_string = str(target.label) + "|" + get_arch(target)

  # Main repository labels may print without their leading "@".
  if id_string.startswith("//"):
    id_string = "@" + id_string

  # One line per kind the target was requested under.
  results = []
{switch}  if results:
    return "\n".join(results)

  # Not requested directly, a dependency of a requested target.
  return id_string + ">>NONE"
"#,
        header = GENERATED_HEADER,
        json_encode = JSON_ENCODE_FN,
        tables = tables,
        functions = functions,
        get_arch = get_arch_fn(target),
        switch = switch,
    )
}
