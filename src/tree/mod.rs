//! Tree reconstruction from a flat node snapshot.
//!
//! Nodes attach under their `parent_id` when that parent is present in the
//! snapshot. Everything else becomes a root: nodes without a parent, nodes
//! whose parent is missing, and the first node (in display order) of any
//! parent cycle. Siblings and roots are ordered by `created_at`, then `id`.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::storage::HistoryNode;

/// Deepest forest the HTTP surface will serialize as nested JSON.
pub const MAX_NESTED_DEPTH: usize = 256;

/// A node with its reconstructed children.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: HistoryNode,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            count += 1;
            stack.extend(tree.children.iter());
        }
        count
    }

    /// Length of the longest root-to-leaf path, counted in nodes.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((tree, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(tree.children.iter().map(|child| (child, level + 1)));
        }
        deepest
    }
}

// Chains can be arbitrarily long; the derived drop would recurse per level.
impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut tree) = pending.pop() {
            pending.append(&mut tree.children);
        }
    }
}

fn display_order(a: &HistoryNode, b: &HistoryNode) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Build a display forest from the nodes returned by a timeline listing.
///
/// Never fails and uses no recursion, so chain length is bounded only by
/// memory. When the same id appears more than once the last occurrence
/// wins, matching the store's upsert semantics.
pub fn build_forest(nodes: Vec<HistoryNode>) -> Vec<TreeNode> {
    let mut by_id: HashMap<String, HistoryNode> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        by_id.insert(node.id.clone(), node);
    }

    let mut nodes: Vec<HistoryNode> = by_id.into_values().collect();
    nodes.sort_by(display_order);

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        let parent = node
            .parent_id
            .as_deref()
            .and_then(|p| index.get(p).copied())
            .filter(|&p| p != i);

        match parent {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }
    drop(index);

    // Pre-order walk from every root, then from anything left over, which
    // sits on a parent cycle. Edges back into visited nodes are cut.
    let count = nodes.len();
    let mut visited = vec![false; count];
    let mut kept: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut order = Vec::with_capacity(count);
    let mut tops = Vec::new();

    for start in roots.into_iter().chain(0..count) {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        tops.push(start);

        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            order.push(i);
            for &child in &children[i] {
                if !visited[child] {
                    visited[child] = true;
                    kept[i].push(child);
                    stack.push(child);
                }
            }
        }
    }

    // Descendants follow their ancestor in pre-order, so building in
    // reverse finishes every child before its parent.
    let mut slots: Vec<Option<HistoryNode>> = nodes.into_iter().map(Some).collect();
    let mut built: Vec<Option<TreeNode>> = (0..count).map(|_| None).collect();

    for &i in order.iter().rev() {
        let kids = kept[i].iter().filter_map(|&c| built[c].take()).collect();
        if let Some(node) = slots[i].take() {
            built[i] = Some(TreeNode {
                node,
                children: kids,
            });
        }
    }

    let mut forest: Vec<TreeNode> = tops.into_iter().filter_map(|i| built[i].take()).collect();
    forest.sort_by(|a, b| display_order(&a.node, &b.node));
    forest
}

/// Render a forest as indented text, one node per line.
pub fn render(forest: &[TreeNode]) -> String {
    let mut out = String::new();
    let mut stack: Vec<(&TreeNode, usize)> = forest.iter().rev().map(|t| (t, 0)).collect();

    while let Some((tree, depth)) = stack.pop() {
        let label = if tree.node.offset == 0 {
            "POINT OF DIVERGENCE".to_string()
        } else {
            format!("YEAR +{}", tree.node.offset)
        };
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "[{}] ({}) {}\n",
            label, tree.node.origin, tree.node.description
        ));
        stack.extend(tree.children.iter().rev().map(|child| (child, depth + 1)));
    }
    out
}
