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

use std::io::{self, Write};

use thiserror::Error;

use super::{Build, Description, Rule};

#[derive(Error, Debug)]
pub enum NinjaWriteError {
    #[error("command for {output} contains a newline")]
    NewlineInCommand { output: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

const COMMAND_RULE: &str = "mixed_command";
const WRITE_FILE_RULE: &str = "mixed_write_file";
const WRITE_SCRIPT_RULE: &str = "mixed_write_script";
const BUILD_RUNFILES_RULE: &str = "mixed_build_runfiles";

fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '$' | ' ' | ':' => {
                escaped.push('$');
                escaped.push(c);
            }
            '\n' => escaped.push_str("$\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_value(value: &str) -> String {
    value.replace('$', "$$")
}

/// Decodes the single line rspfile back into the original bytes. `%b` undoes `escape_content`
/// exactly since every backslash in the content is escaped.
const DECODE_RSPFILE: &str = "printf '%b' \"$$(cat ${out}.rsp)\" >${out}";

/// File contents travel through a single line rspfile_content.
fn escape_content(content: &str) -> String {
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '$' => escaped.push_str("$$"),
            // Leading whitespace of a value is dropped unless escaped.
            ' ' => escaped.push_str("$ "),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn write_rules<W: Write>(runfiles_tool: &str, out: &mut W) -> io::Result<()> {
    writeln!(out, "rule {}", COMMAND_RULE)?;
    writeln!(out, "  command = ${{cmd}}")?;
    writeln!(out, "  description = ${{desc}}")?;
    writeln!(out)?;
    writeln!(out, "rule {}", WRITE_FILE_RULE)?;
    writeln!(out, "  command = {}", DECODE_RSPFILE)?;
    writeln!(out, "  rspfile = ${{out}}.rsp")?;
    writeln!(out, "  rspfile_content = ${{content}}")?;
    writeln!(out, "  description = ${{desc}}")?;
    writeln!(out)?;
    writeln!(out, "rule {}", WRITE_SCRIPT_RULE)?;
    writeln!(out, "  command = {} && chmod +x ${{out}}", DECODE_RSPFILE)?;
    writeln!(out, "  rspfile = ${{out}}.rsp")?;
    writeln!(out, "  rspfile_content = ${{content}}")?;
    writeln!(out, "  description = ${{desc}}")?;
    writeln!(out)?;
    writeln!(out, "rule {}", BUILD_RUNFILES_RULE)?;
    writeln!(
        out,
        "  command = {} ${{in}} ${{out_dir}}",
        escape_value(runfiles_tool)
    )?;
    writeln!(out, "  description = ${{desc}}")?;
    writeln!(out)
}

fn join_paths(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| escape_path(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_build<W: Write>(build: &Build, out: &mut W) -> Result<(), NinjaWriteError> {
    let rule = match build.rule {
        Rule::Phony => "phony",
        Rule::Command(_) => COMMAND_RULE,
        Rule::WriteFile(_) => WRITE_FILE_RULE,
        Rule::WriteScript(_) => WRITE_SCRIPT_RULE,
        Rule::BuildRunfiles { .. } => BUILD_RUNFILES_RULE,
    };

    write!(out, "build")?;
    if !build.outputs.is_empty() {
        write!(out, " {}", join_paths(&build.outputs))?;
    }
    if !build.implicit_outputs.is_empty() {
        write!(out, " | {}", join_paths(&build.implicit_outputs))?;
    }
    write!(out, ": {}", rule)?;
    if !build.inputs.is_empty() {
        write!(out, " {}", join_paths(&build.inputs))?;
    }
    if !build.implicit_inputs.is_empty() {
        write!(out, " | {}", join_paths(&build.implicit_inputs))?;
    }
    if !build.order_inputs.is_empty() {
        write!(out, " || {}", join_paths(&build.order_inputs))?;
    }
    writeln!(out)?;

    match &build.rule {
        Rule::Phony => {}
        Rule::Command(command) => {
            if command.contains('\n') {
                return Err(NinjaWriteError::NewlineInCommand {
                    output: build.all_outputs().next().cloned().unwrap_or_default(),
                });
            }
            writeln!(out, "  cmd = {}", escape_value(command))?;
        }
        Rule::WriteFile(content) | Rule::WriteScript(content) => {
            writeln!(out, "  content = {}", escape_content(content))?;
        }
        Rule::BuildRunfiles { out_dir } => {
            writeln!(out, "  out_dir = {}", escape_value(out_dir))?;
        }
    }
    if let Some(desc) = &build.description {
        writeln!(out, "  desc = {}", escape_value(desc))?;
    }
    if let Some(depfile) = &build.depfile {
        writeln!(out, "  depfile = {}", escape_value(depfile))?;
        writeln!(out, "  deps = gcc")?;
    }
    if !build.symlink_outputs.is_empty() {
        let symlinks: Vec<String> = build.symlink_outputs.iter().map(|s| escape_value(s)).collect();
        writeln!(out, "  symlink_outputs = {}", symlinks.join(" "))?;
    }
    Ok(())
}

/// Writes the rule preamble followed by every build, in order. `runfiles_tool` is the program
/// that materializes a runfiles tree from its manifest.
pub fn write_ninja<W: Write>(
    description: &Description,
    runfiles_tool: &str,
    out: &mut W,
) -> Result<(), NinjaWriteError> {
    write_rules(runfiles_tool, out)?;
    for build in &description.builds {
        write_build(build, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use insta::assert_snapshot;

    fn render(description: &Description) -> String {
        let mut out = Vec::new();
        for build in &description.builds {
            write_build(build, &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    fn build(rule: Rule) -> Build {
        Build {
            rule,
            description: None,
            outputs: vec![],
            implicit_outputs: vec![],
            symlink_outputs: vec![],
            inputs: vec![],
            implicit_inputs: vec![],
            order_inputs: vec![],
            depfile: None,
        }
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("a b:c$d"), "a$ b$:c$$d");
        assert_eq!(escape_path("plain/path.o"), "plain/path.o");
    }

    #[test]
    fn test_escape_content() {
        assert_eq!(escape_content("a\nb $x"), "a\\nb$ $$x");
        assert_eq!(escape_content(r"s/\n/ /"), r"s/\\n/$ /");
    }

    /// Reads a value back the way ninja does, for the escapes `escape_content` produces.
    fn unescape_value(value: &str) -> String {
        let mut chars = value.chars();
        let mut out = String::new();
        while let Some(c) = chars.next() {
            match c {
                '$' => out.extend(chars.next()),
                _ => out.push(c),
            }
        }
        out
    }

    #[cfg(unix)]
    fn decode_with_shell(content: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let rsp = dir.path().join("out.rsp");
        std::fs::write(&rsp, unescape_value(&escape_content(content))).unwrap();
        let command = DECODE_RSPFILE
            .replace("$$", "$")
            .replace("${out}", &out.display().to_string());
        let status = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .status()
            .unwrap();
        assert!(status.success());
        std::fs::read_to_string(&out).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_content_survives_decoding() {
        for content in &[
            "line one\nline two\n",
            r"printf 'a\nb' | sed 's/\\n/ /g'",
            "  indented\ttab\r\n$HOME \\",
            "#!/bin/bash\nset -e\necho \"multi\nline\"\n",
        ] {
            assert_eq!(&decode_with_shell(content), content);
        }
    }

    #[test]
    fn test_write_rules_decode_rspfile() {
        let mut out = Vec::new();
        write_rules("build-runfiles", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_snapshot!(text, @r###"
        rule mixed_command
          command = ${cmd}
          description = ${desc}

        rule mixed_write_file
          command = printf '%b' "$$(cat ${out}.rsp)" >${out}
          rspfile = ${out}.rsp
          rspfile_content = ${content}
          description = ${desc}

        rule mixed_write_script
          command = printf '%b' "$$(cat ${out}.rsp)" >${out} && chmod +x ${out}
          rspfile = ${out}.rsp
          rspfile_content = ${content}
          description = ${desc}

        rule mixed_build_runfiles
          command = build-runfiles ${in} ${out_dir}
          description = ${desc}
        "###);
    }

    #[test]
    fn test_command_build() {
        let mut b = build(Rule::Command("echo $HOME > x".to_owned()));
        b.description = Some("Genrule: [x]".to_owned());
        b.implicit_outputs = vec!["/e/x".to_owned()];
        b.implicit_inputs = vec!["bazel_depset_ab".to_owned(), "/e/in put".to_owned()];
        b.depfile = Some("/e/x.d".to_owned());
        b.symlink_outputs = vec!["/e/x".to_owned()];
        let mut phony = build(Rule::Phony);
        phony.outputs = vec!["bazel_depset_ab".to_owned()];
        phony.order_inputs = vec!["/e/bazel-out/volatile-status.txt".to_owned()];
        let text = render(&Description {
            builds: vec![phony, b],
        });
        assert_snapshot!(text, @r###"
        build bazel_depset_ab: phony || /e/bazel-out/volatile-status.txt
        build | /e/x: mixed_command | bazel_depset_ab /e/in$ put
          cmd = echo $$HOME > x
          desc = Genrule: [x]
          depfile = /e/x.d
          deps = gcc
          symlink_outputs = /e/x
        "###);
    }

    #[test]
    fn test_newline_in_command() {
        let mut b = build(Rule::Command("a\nb".to_owned()));
        b.implicit_outputs = vec!["/e/x".to_owned()];
        let mut out = Vec::new();
        match write_build(&b, &mut out) {
            Err(NinjaWriteError::NewlineInCommand { output }) => assert_eq!(output, "/e/x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_preamble_declares_rules() {
        let mut out = Vec::new();
        write_ninja(&Description::default(), "/tools/build-runfiles", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for rule in &[
            COMMAND_RULE,
            WRITE_FILE_RULE,
            WRITE_SCRIPT_RULE,
            BUILD_RUNFILES_RULE,
        ] {
            assert!(text.contains(&format!("rule {}\n", rule)), "{}", rule);
        }
        assert!(text.contains("command = /tools/build-runfiles ${in} ${out_dir}\n"));
    }
}
