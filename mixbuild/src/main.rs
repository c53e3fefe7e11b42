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

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tracing_subscriber::EnvFilter;

use mixbuild::{run, Config, CoverageConfig, DebugMode};
use mixbuild_desc::ProductTarget;

const HELP: &str = "\
usage: mixbuild [options]

options:
  -C DIR                       change to DIR before doing anything else
  --soong-out DIR              soong output directory [default: out/soong]
  --requests FILE              requests, one `<label> <kind> [<arch> [<os>]]` per line
  --enabled FILE               module names always delegated
  --disabled FILE              module names never delegated
  --default-delegated          delegate modules in neither list
  --product NAME               product platforms are generated for
  --variant NAME               build variant of the product
  --clang-coverage             collect native code coverage
  --coverage-path PATH         instrument PATH, may be repeated
  --coverage-exclude-path PATH do not instrument PATH, may be repeated
  --runfiles-tool PATH         program creating runfiles trees
  -o FILE                      write translated build steps to FILE
  -d MODE                      enable debugging (use '-d list' to list modes)
";

fn comma_separated(values: Vec<String>) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_args() -> anyhow::Result<Option<Config>> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{}", HELP);
        return Ok(None);
    }
    let debug: Vec<String> = args.values_from_str("-d")?;
    if debug.iter().any(|d| d == "list") {
        println!("debugging modes:\n  stats  print operation counts/timing info");
        return Ok(None);
    }
    let debug_modes = debug
        .iter()
        .map(|d| d.parse::<DebugMode>())
        .collect::<Result<Vec<_>, _>>()?;

    let product: Option<String> = args.opt_value_from_str("--product")?;
    let variant: Option<String> = args.opt_value_from_str("--variant")?;
    let config = Config {
        execution_dir: args.opt_value_from_str("-C")?,
        soong_out: args
            .opt_value_from_str("--soong-out")?
            .unwrap_or_else(|| PathBuf::from("out/soong")),
        requests_file: args.opt_value_from_str("--requests")?,
        enabled_file: args.opt_value_from_str("--enabled")?,
        disabled_file: args.opt_value_from_str("--disabled")?,
        default_delegated: args.contains("--default-delegated"),
        target: ProductTarget::new(product.unwrap_or_default(), variant.unwrap_or_default()),
        coverage: CoverageConfig {
            enabled: args.contains("--clang-coverage"),
            paths: comma_separated(args.values_from_str("--coverage-path")?),
            exclude_paths: comma_separated(args.values_from_str("--coverage-exclude-path")?),
        },
        ninja_file: args.opt_value_from_str("-o")?,
        runfiles_tool: args.opt_value_from_str("--runfiles-tool")?,
        debug_modes,
    };

    let rest = args.free()?;
    if !rest.is_empty() {
        return Err(anyhow!("unexpected arguments: {}", rest.join(" ")));
    }
    Ok(Some(config))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match parse_args().context("parsing arguments")? {
        Some(config) => run(config),
        None => Ok(()),
    }
}
