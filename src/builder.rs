//! Operation catalog → clap `Command` tree
//!
//! Builds the dynamic `call <group> <operation>` tree for the API playground.
//! Groups come from the first OpenAPI tag; operation names from the
//! operationId, or from method and path when there is none.

use std::collections::{BTreeMap, HashMap, HashSet};

use clap::{Arg, ArgAction, Command};

use crate::spec::{is_bool_schema, ApiOperation, RequestBody};

/// Argument ids and long names every operation command already uses,
/// clap's own `--help` included. Parameters with these names are not exposed
/// as arguments; pass them via `--path-params` or `--query-params` instead.
pub const RESERVED_ARGS: [&str; 7] = [
    "help",
    "json",
    "json-body",
    "field",
    "path-params",
    "query-params",
    "generate",
];

/// Build the playground command tree.
///
/// Structure: `call <group> <operation> [path params] [--query ...] [--json | --field ...]`
pub fn build_playground_command(ops: &[ApiOperation]) -> Command {
    let mut root = Command::new("call")
        .about("Call an operation from the backend's OpenAPI catalog")
        .subcommand_required(true)
        .arg_required_else_help(true);

    for (group_name, group_ops) in group_operations(ops) {
        let mut group_cmd = Command::new(group_name.clone())
            .about(format!("Operations tagged {}", group_ops[0].group()))
            .subcommand_required(true)
            .arg_required_else_help(true);

        for (cmd_name, op) in command_names(&group_ops) {
            group_cmd = group_cmd.subcommand(build_operation_command(op, &cmd_name));
        }
        root = root.subcommand(group_cmd);
    }

    root
}

/// Find the operation behind a `<group> <operation>` command pair.
pub fn find_operation_by_command<'a>(
    ops: &'a [ApiOperation],
    group_name: &str,
    op_name: &str,
) -> Option<&'a ApiOperation> {
    let groups = group_operations(ops);
    let group_ops = groups.get(group_name)?;
    command_names(group_ops)
        .into_iter()
        .find(|(name, _)| name == op_name)
        .map(|(_, op)| op)
}

fn group_operations(ops: &[ApiOperation]) -> BTreeMap<String, Vec<&ApiOperation>> {
    let mut groups: BTreeMap<String, Vec<&ApiOperation>> = BTreeMap::new();
    for op in ops {
        groups.entry(normalize_group(op.group())).or_default().push(op);
    }
    groups
}

/// Command names within one group; colliding names get a `-{method}` suffix.
fn command_names<'a>(ops: &[&'a ApiOperation]) -> Vec<(String, &'a ApiOperation)> {
    let mut name_count: HashMap<String, usize> = HashMap::new();
    for op in ops {
        *name_count.entry(command_base_name(op)).or_default() += 1;
    }

    ops.iter()
        .map(|op| {
            let base = command_base_name(op);
            let name = if name_count.get(&base).copied().unwrap_or(0) > 1 {
                format!("{}-{}", base, op.method.to_lowercase())
            } else {
                base
            };
            (name, *op)
        })
        .collect()
}

pub fn command_base_name(op: &ApiOperation) -> String {
    let name = match op.operation_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => normalize_operation_id(id),
        None => normalize_group(&format!("{} {}", op.method, op.path)),
    };
    if name.is_empty() {
        op.method.to_lowercase()
    } else {
        name
    }
}

fn build_operation_command(op: &ApiOperation, cmd_name: &str) -> Command {
    let about = if op.summary.is_empty() {
        op.label()
    } else {
        format!("{} ({})", op.summary, op.label())
    };
    let mut cmd = Command::new(cmd_name.to_owned()).about(about);
    let mut taken: HashSet<&str> = RESERVED_ARGS.into_iter().collect();

    // Path parameters → positional args
    for param in op.path_params() {
        if !taken.insert(param.name.as_str()) {
            continue;
        }
        cmd = cmd.arg(Arg::new(param.name.clone()).help(param.description.clone()));
    }

    // Query parameters → --name options
    for param in op.query_params() {
        if !taken.insert(param.name.as_str()) {
            continue;
        }
        let arg = Arg::new(param.name.clone())
            .long(param.name.clone())
            .help(param.description.clone());
        let arg = if is_bool_schema(&param.schema) {
            arg.action(ArgAction::SetTrue)
        } else {
            arg.action(ArgAction::Set)
        };
        cmd = cmd.arg(arg);
    }

    cmd = cmd
        .arg(
            Arg::new("path-params")
                .long("path-params")
                .value_name("JSON")
                .help("Path parameters as a JSON object"),
        )
        .arg(
            Arg::new("query-params")
                .long("query-params")
                .value_name("JSON")
                .help("Query parameters as a JSON object"),
        )
        .arg(
            Arg::new("generate")
                .long("generate")
                .short('g')
                .value_parser(["schema", "sample", "llm"])
                .help("Generate input first; explicit values override it"),
        );

    if op.request_body != RequestBody::None {
        cmd = cmd
            .arg(
                Arg::new("json-body")
                    .long("json")
                    .short('j')
                    .help("Request body as JSON string")
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("field")
                    .long("field")
                    .short('f')
                    .help("Set body field: key=value (repeatable)")
                    .action(ArgAction::Append),
            );
    }

    cmd
}

/// Subcommand name for a tag: `Internal Debug`, `internal_debug` and
/// `internal-debug` all map to `internal-debug`.
pub fn normalize_group(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// camelCase / snake_case operationId → kebab-case command name.
pub fn normalize_operation_id(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut kebab = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || (prev.is_uppercase() && next_is_lower) {
                kebab.push('-');
            }
        }
        kebab.push(c);
    }
    normalize_group(&kebab)
}
