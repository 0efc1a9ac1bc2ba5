use std::sync::LazyLock;

use regex::Regex;

// Timeline labels have the form: name = op(arg, arg, ...).
static OP_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*) = (.*)\((.*)\)").unwrap());

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpLabel<'a> {
    pub name: &'a str,
    pub op: &'a str,
    pub inputs: Vec<&'a str>,
}

impl OpLabel<'_> {
    pub fn is_unknown(&self) -> bool {
        self.op == UNKNOWN
    }
}

/// Parses the fields in a node timeline label. Labels that don't match
/// return `unknown` for both name and op, with no inputs.
pub fn parse_op_label(label: &str) -> OpLabel<'_> {
    let Some(captures) = OP_LABEL.captures(label) else {
        return OpLabel {
            name: UNKNOWN,
            op: UNKNOWN,
            inputs: Vec::new(),
        };
    };
    let group = |i| captures.get(i).map_or("", |m| m.as_str());
    let inputs = match group(3) {
        "" => Vec::new(),
        args => args.split(", ").collect(),
    };
    OpLabel {
        name: group(1),
        op: group(2),
        inputs,
    }
}

/// The op type and inputs shown for an event. Falls back to the node
/// name when the label can't be parsed.
pub fn op_and_inputs(node_name: &str, label: &str) -> (String, Vec<String>) {
    let parsed = parse_op_label(label);
    if parsed.is_unknown() {
        (node_name.to_owned(), Vec::new())
    } else {
        (
            parsed.op.to_owned(),
            parsed.inputs.into_iter().map(str::to_owned).collect(),
        )
    }
}
