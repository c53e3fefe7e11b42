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

use mixbuild_parse::{
    depset_content_hash, parse_action_graph, ActionGraphError, KeyValuePair,
    BAZEL_TOOLS_DEPENDENCY_SENTINEL,
};
use serde_json::{json, Value};

const A_C_HASH: &str = "ad4573f052ff7302a57fd72c2fa41f65cadbe842043b962738f9038a38531e84";

// Fragment ids: 1 bazel-out, 2 bazel-out/a.o, 3 bazel-out/a.d, 4 a.c, 5 b.c, 6 c.c,
// 7 bazel-out/b.o.
fn fragments() -> Value {
    json!([
        {"id": 1, "label": "bazel-out"},
        {"id": 2, "label": "a.o", "parentId": 1},
        {"id": 3, "label": "a.d", "parentId": 1},
        {"id": 4, "label": "a.c"},
        {"id": 5, "label": "b.c"},
        {"id": 6, "label": "c.c"},
        {"id": 7, "label": "b.o", "parentId": 1},
    ])
}

// Artifact ids match their fragment ids.
fn artifacts() -> Value {
    json!((1..=7).map(|i| json!({"id": i, "pathFragmentId": i})).collect::<Vec<_>>())
}

fn graph(actions: Value, depsets: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "artifacts": artifacts(),
        "actions": actions,
        "depSetOfFiles": depsets,
        "pathFragments": fragments(),
    }))
    .unwrap()
}

#[test]
fn test_generic_action_with_depfile() {
    let input = graph(
        json!([{
            "mnemonic": "CppCompile",
            "arguments": ["cc", "-c", "a.c", "-DMSG=a b", "-o", "bazel-out/a.o"],
            "environmentVariables": [{"key": "PATH", "value": "/bin"}],
            "inputDepSetIds": [1],
            "outputIds": [2, 3],
        }]),
        json!([{"id": 1, "directArtifactIds": [4]}]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.statements.len(), 1);
    let statement = &graph.statements[0];
    assert_eq!(statement.command, "cc -c a.c '-DMSG=a b' -o bazel-out/a.o");
    assert_eq!(statement.output_paths, vec!["bazel-out/a.o"]);
    assert_eq!(statement.depfile.as_deref(), Some("bazel-out/a.d"));
    assert_eq!(statement.input_depset_hashes, vec![A_C_HASH]);
    assert_eq!(
        statement.env,
        vec![KeyValuePair {
            key: "PATH".to_owned(),
            value: "/bin".to_owned()
        }]
    );
    assert_eq!(graph.depsets.len(), 1);
    assert_eq!(graph.depsets[0].direct_artifacts, vec!["a.c"]);
}

#[test]
fn test_depset_hash_is_over_contents() {
    let input = graph(
        json!([]),
        json!([
            {"id": 10, "directArtifactIds": [5, 6], "transitiveDepSetIds": [11]},
            {"id": 11, "directArtifactIds": [4]},
        ]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.depsets.len(), 2);
    let parent = graph
        .depsets
        .iter()
        .find(|d| d.direct_artifacts.len() == 2)
        .unwrap();
    assert_eq!(parent.transitive_depset_hashes, vec![A_C_HASH]);
    assert_eq!(
        parent.content_hash,
        "194d5ce025e8217dafdc8bd3800755ba3f531be5ad064478a403eb7674c9ad98"
    );
    assert_eq!(
        parent.content_hash,
        depset_content_hash(&parent.direct_artifacts, &parent.transitive_depset_hashes)
    );
    // Sorted by hash.
    assert!(graph.depsets[0].content_hash < graph.depsets[1].content_hash);
}

#[test]
fn test_same_contents_same_hash() {
    let input = graph(
        json!([]),
        json!([
            {"id": 1, "directArtifactIds": [4]},
            {"id": 2, "directArtifactIds": [4]},
        ]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.depsets.len(), 1);
    assert_eq!(graph.depsets[0].content_hash, A_C_HASH);
}

#[test]
fn test_middleman_inputs_substitute() {
    let input = graph(
        json!([
            {"mnemonic": "Middleman", "inputDepSetIds": [2], "outputIds": [7]},
            {
                "mnemonic": "Genrule",
                "arguments": ["touch", "bazel-out/a.o"],
                "inputDepSetIds": [1],
                "outputIds": [2],
            },
        ]),
        json!([
            {"id": 1, "directArtifactIds": [7, 5]},
            {"id": 2, "directArtifactIds": [4]},
        ]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.statements.len(), 1);
    assert_eq!(graph.statements[0].mnemonic, "Genrule");
    let outer = graph
        .depsets
        .iter()
        .find(|d| d.direct_artifacts == vec!["b.c"])
        .unwrap();
    assert_eq!(outer.transitive_depset_hashes, vec![A_C_HASH]);
}

#[test]
fn test_empty_depset_gets_sentinel() {
    let input = graph(
        json!([{
            "mnemonic": "Genrule",
            "arguments": ["touch", "bazel-out/a.o"],
            "inputDepSetIds": [1],
            "outputIds": [2],
        }]),
        json!([{"id": 1}]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.depsets[0].direct_artifacts, vec![BAZEL_TOOLS_DEPENDENCY_SENTINEL]);
    let sentinel = graph
        .statements
        .iter()
        .find(|s| s.mnemonic == BAZEL_TOOLS_DEPENDENCY_SENTINEL)
        .unwrap();
    assert_eq!(sentinel.command, "touch 'BAZEL_TOOLS_DEPENDENCY_SENTINEL'");
    assert_eq!(sentinel.output_paths, vec![BAZEL_TOOLS_DEPENDENCY_SENTINEL]);
}

#[test]
fn test_bazel_tools_artifacts_dropped() {
    let input = serde_json::to_vec(&json!({
        "artifacts": [
            {"id": 1, "pathFragmentId": 2},
            {"id": 2, "pathFragmentId": 4},
            {"id": 3, "pathFragmentId": 5},
        ],
        "depSetOfFiles": [{"id": 1, "directArtifactIds": [1, 2, 3]}],
        "pathFragments": [
            {"id": 1, "label": ".."},
            {"id": 2, "label": "bazel_tools", "parentId": 1},
            {"id": 3, "label": "bin"},
            {"id": 4, "label": "py3wrapper.sh", "parentId": 3},
            {"id": 5, "label": "a.c"},
        ],
    }))
    .unwrap();
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(graph.depsets[0].direct_artifacts, vec!["a.c"]);
}

#[test]
fn test_skipped_mnemonics() {
    let actions: Vec<Value> = ["PythonZipper", "Fail", "BaselineCoverage"]
        .iter()
        .map(|m| json!({"mnemonic": m, "arguments": ["x"], "outputIds": [2]}))
        .collect();
    let graph = parse_action_graph(&graph(json!(actions), json!([]))).unwrap();
    assert!(graph.statements.is_empty());
}

#[test]
fn test_symlink_action() {
    let input = graph(
        json!([{
            "mnemonic": "SolibSymlink",
            "inputDepSetIds": [1],
            "outputIds": [2],
        }]),
        json!([{"id": 1, "directArtifactIds": [4]}]),
    );
    let graph = parse_action_graph(&input).unwrap();
    let statement = &graph.statements[0];
    assert_eq!(
        statement.command,
        "mkdir -p bazel-out && rm -f bazel-out/a.o && ln -sf $PWD/a.c bazel-out/a.o"
    );
    assert_eq!(statement.symlink_paths, vec!["bazel-out/a.o"]);
    assert_eq!(statement.input_paths, vec!["a.c"]);
    assert!(statement.input_depset_hashes.is_empty());
}

#[test]
fn test_symlink_needs_one_input() {
    let input = graph(
        json!([{"mnemonic": "Symlink", "inputDepSetIds": [1], "outputIds": [2]}]),
        json!([{"id": 1, "directArtifactIds": [4, 5]}]),
    );
    match parse_action_graph(&input) {
        Err(ActionGraphError::UnexpectedArity { inputs, .. }) => {
            assert_eq!(inputs, vec!["a.c", "b.c"])
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_template_expand() {
    let input = graph(
        json!([{
            "mnemonic": "TemplateExpand",
            "templateContent": "#!/bin/bash\nexec %python_binary% \"$@\" 'x'",
            "substitutions": [{"key": "%python_binary%", "value": "py3wrapper.sh"}],
            "outputIds": [2],
        }]),
        json!([]),
    );
    let graph = parse_action_graph(&input).unwrap();
    assert_eq!(
        graph.statements[0].command,
        r##"/bin/bash -c 'echo "#!/bin/bash\\nexec python3 \"\$@\" '"'"'x'"'"'" | sed "s/\\\\n/\\n/g" > bazel-out/a.o && chmod a+x bazel-out/a.o'"##
    );
}

#[test]
fn test_file_write_keeps_contents() {
    let input = graph(
        json!([{
            "mnemonic": "FileWrite",
            "fileContents": "line one\nline two $HOME",
            "outputIds": [2],
        }]),
        json!([]),
    );
    let graph = parse_action_graph(&input).unwrap();
    let statement = &graph.statements[0];
    assert_eq!(statement.command, "");
    assert_eq!(statement.file_contents, "line one\nline two $HOME");
    assert_eq!(statement.output_paths, vec!["bazel-out/a.o"]);
}

#[test]
fn test_statements_sorted() {
    let input = graph(
        json!([
            {"mnemonic": "Genrule", "arguments": ["touch"], "outputIds": [7, 2]},
            {"mnemonic": "Genrule", "arguments": ["b"], "outputIds": [7]},
            {"mnemonic": "Genrule", "arguments": ["a"], "outputIds": [2]},
        ]),
        json!([]),
    );
    let graph = parse_action_graph(&input).unwrap();
    let commands: Vec<_> = graph.statements.iter().map(|s| s.command.as_str()).collect();
    assert_eq!(commands, vec!["a", "b", "touch"]);
}

#[test]
fn test_no_command() {
    let input = graph(json!([{"mnemonic": "CppLink", "outputIds": [2]}]), json!([]));
    let err = parse_action_graph(&input).unwrap_err();
    assert_eq!(err.to_string(), "received action with no command: [CppLink]");
}

#[test]
fn test_multiple_depfiles() {
    let input = serde_json::to_vec(&json!({
        "artifacts": [{"id": 1, "pathFragmentId": 1}, {"id": 2, "pathFragmentId": 2}],
        "actions": [{"mnemonic": "Cc", "arguments": ["cc"], "outputIds": [1, 2]}],
        "pathFragments": [{"id": 1, "label": "x.d"}, {"id": 2, "label": "y.d"}],
    }))
    .unwrap();
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::MultipleDepfiles(_, _))
    ));
}

#[test]
fn test_self_parent_fragment() {
    let input = serde_json::to_vec(&json!({
        "artifacts": [{"id": 1, "pathFragmentId": 1}],
        "pathFragments": [{"id": 1, "label": "loop", "parentId": 1}],
    }))
    .unwrap();
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::SelfParentFragment { id: 1, .. })
    ));
}

#[test]
fn test_undefined_references() {
    let input = graph(json!([]), json!([{"id": 1, "directArtifactIds": [99]}]));
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::UndefinedArtifact(99))
    ));

    let input = graph(json!([]), json!([{"id": 1, "transitiveDepSetIds": [5]}]));
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::UndefinedChildDepset {
            id: 5,
            referenced_by: 1
        })
    ));

    let input = graph(
        json!([{"mnemonic": "Genrule", "arguments": ["x"], "inputDepSetIds": [3], "outputIds": [2]}]),
        json!([]),
    );
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::UndefinedDepset(3))
    ));
}

#[test]
fn test_depset_cycle() {
    let input = graph(
        json!([]),
        json!([
            {"id": 1, "transitiveDepSetIds": [2]},
            {"id": 2, "transitiveDepSetIds": [1]},
        ]),
    );
    assert!(matches!(
        parse_action_graph(&input),
        Err(ActionGraphError::DepsetCycle(_))
    ));
}

#[test]
fn test_malformed_json() {
    assert!(matches!(
        parse_action_graph(b"{\"actions\": 3}"),
        Err(ActionGraphError::Json(_))
    ));
}
