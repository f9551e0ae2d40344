//! Derived nodes built from several input nodes
//!
//! The derived status is the OR of the inputs: loading if any input loads,
//! otherwise errored if any input errored, otherwise idle if any input is
//! idle, otherwise ready. Errors stay local to their input; the derived
//! node only flags them.

use super::node::{Node, NodeStatus};

fn derived_status<V>(nodes: &[Node<V>]) -> NodeStatus {
    if nodes.iter().any(Node::is_loading) {
        NodeStatus::Loading
    } else if nodes.iter().any(Node::has_error) {
        NodeStatus::Error
    } else if nodes.iter().any(Node::is_idle) {
        NodeStatus::Idle
    } else {
        NodeStatus::Ready
    }
}

fn derived_shell<V, W>(nodes: &[Node<V>]) -> Node<W> {
    let mut node = Node::idle(None);
    node.status = derived_status(nodes);
    node.error = nodes.iter().find_map(|n| n.error.clone());
    node.is_refreshing = nodes.iter().any(|n| n.is_refreshing);
    node.is_stale = nodes.iter().any(|n| n.is_stale);
    node.last_fetched_at = nodes.iter().filter_map(|n| n.last_fetched_at).min();
    node
}

/// Strict combination
///
/// The combiner runs only once every non-`Error` input is `Ready`, and
/// receives the values of those ready inputs in input order.
pub fn combine<V, W>(nodes: &[Node<V>], combiner: impl FnOnce(Vec<&V>) -> W) -> Node<W> {
    let mut derived = derived_shell(nodes);

    let all_settled = nodes.iter().all(|n| n.is_ready() || n.has_error());
    if all_settled {
        let values = nodes
            .iter()
            .filter(|n| n.is_ready())
            .filter_map(Node::value)
            .collect();
        derived.value = Some(combiner(values));
    }
    derived
}

/// Partial combination
///
/// The combiner always runs with whatever each input currently holds
/// (including the last good value of an errored input); the derived
/// status still reports loading and error flags.
pub fn combine_partial<V, W>(
    nodes: &[Node<V>],
    combiner: impl FnOnce(Vec<Option<&V>>) -> W,
) -> Node<W> {
    let mut derived = derived_shell(nodes);
    derived.value = Some(combiner(nodes.iter().map(Node::value).collect()));
    derived
}
