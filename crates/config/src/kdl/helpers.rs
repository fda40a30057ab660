//! Accessors for KDL child nodes of the form `name value...`.

use ::kdl::KdlNode;

/// Find the first child node called `name`.
pub fn find_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// First positional argument of `node`, as a string.
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

/// `name "value"` child as a string.
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    find_child(node, name).and_then(get_first_arg_string)
}

/// `name 42` child as an integer.
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    find_child(node, name)?
        .entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .and_then(|entry| entry.value().as_integer())
}

/// `name #true` child as a bool.
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    find_child(node, name)?
        .entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .and_then(|entry| entry.value().as_bool())
}

/// All positional string arguments of the `name` child.
pub fn get_string_args(node: &KdlNode, name: &str) -> Vec<String> {
    find_child(node, name)
        .map(|child| {
            child
                .entries()
                .iter()
                .filter(|entry| entry.name().is_none())
                .filter_map(|entry| entry.value().as_string())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
