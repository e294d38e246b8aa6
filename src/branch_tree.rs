//! Newick trees annotated with the per-branch ratios of a codeml run.
//!
//! codeml names branches `parent..child` using its own node numbers: tips are
//! numbered `1..=n` (by the leading number of their label when present, else
//! in order of appearance), the root is `n + 1` and the remaining internal
//! nodes follow in preorder.

use crate::output_parser::{extract_branch_omegas, extract_tree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_length: Option<f64>,
    pub node_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub omega: Option<f64>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(TreeNode::leaf_count).sum()
        }
    }

    pub fn leaf_labels(&self) -> Vec<String> {
        if self.is_leaf() {
            return self.label.iter().cloned().collect();
        }
        self.children.iter().flat_map(TreeNode::leaf_labels).collect()
    }
}

struct NewickParser<'a> {
    chars: Vec<char>,
    pos: usize,
    text: &'a str,
}

impl<'a> NewickParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.trim().chars().collect(),
            pos: 0,
            text,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, what: &str) -> String {
        format!("Could not parse tree '{}': {what} at position {}", self.text.trim(), self.pos)
    }

    fn read_until_delimiter(&mut self, stop: &[char]) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stop.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect::<String>().trim().to_string()
    }

    fn parse_subtree(&mut self) -> Result<TreeNode, String> {
        let mut node = TreeNode::default();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                node.children.push(self.parse_subtree()?);
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
        let label = self.read_until_delimiter(&['(', ')', ',', ':', ';']);
        if !label.is_empty() {
            node.label = Some(label);
        }
        if self.peek() == Some(':') {
            self.pos += 1;
            let raw = self.read_until_delimiter(&['(', ')', ',', ';']);
            node.branch_length = Some(
                raw.parse::<f64>()
                    .map_err(|_| self.error(&format!("bad branch length '{raw}'")))?,
            );
        }
        if node.is_leaf() && node.label.is_none() {
            return Err(self.error("empty leaf"));
        }
        Ok(node)
    }
}

pub fn parse_newick(text: &str) -> Result<TreeNode, String> {
    let mut parser = NewickParser::new(text);
    let root = parser.parse_subtree()?;
    match parser.peek() {
        Some(';') | None => Ok(root),
        Some(_) => Err(parser.error("trailing characters")),
    }
}

fn leading_number(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn number_tips(node: &mut TreeNode, next: &mut u32, used: &mut Vec<u32>, ntips: u32) {
    if node.is_leaf() {
        let wanted = node
            .label
            .as_deref()
            .and_then(leading_number)
            .filter(|n| (1..=ntips).contains(n) && !used.contains(n));
        let number = match wanted {
            Some(n) => n,
            None => {
                while used.contains(next) {
                    *next += 1;
                }
                *next
            }
        };
        used.push(number);
        node.node_number = number;
        return;
    }
    for child in node.children.iter_mut() {
        number_tips(child, next, used, ntips);
    }
}

fn number_internal(node: &mut TreeNode, next: &mut u32) {
    if node.is_leaf() {
        return;
    }
    node.node_number = *next;
    *next += 1;
    for child in node.children.iter_mut() {
        number_internal(child, next);
    }
}

/// Assigns codeml node numbers to every node of the tree.
pub fn number_nodes(root: &mut TreeNode) {
    let ntips = root.leaf_count() as u32;
    let mut next_tip = 1;
    let mut used = vec![];
    number_tips(root, &mut next_tip, &mut used, ntips);
    let mut next_internal = ntips + 1;
    number_internal(root, &mut next_internal);
}

fn annotate(node: &mut TreeNode, parent: Option<u32>, branch_omegas: &BTreeMap<String, f64>) {
    if let Some(parent) = parent {
        let id = format!("{parent}..{}", node.node_number);
        node.omega = branch_omegas.get(&id).copied();
        node.branch_id = Some(id);
    }
    let number = node.node_number;
    for child in node.children.iter_mut() {
        annotate(child, Some(number), branch_omegas);
    }
}

/// Numbers the tree and attaches each branch's ratio from `branch_omegas`.
pub fn annotate_tree(root: &mut TreeNode, branch_omegas: &BTreeMap<String, f64>) {
    number_nodes(root);
    annotate(root, None, branch_omegas);
}

/// The tree printed in a codeml output file, annotated with its branch table.
pub fn tree_with_omega(text: &str) -> Option<TreeNode> {
    let newick = extract_tree(text)?;
    let mut root = match parse_newick(&newick) {
        Ok(root) => root,
        Err(e) => {
            log::debug!("{e}");
            return None;
        }
    };
    annotate_tree(&mut root, &extract_branch_omegas(text));
    Some(root)
}

/// Whether a Newick string carries foreground tags such as `#1`.
pub fn has_foreground_tags(newick: &str) -> bool {
    newick.contains("#1") || newick.contains('$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_parser::fixtures::M0_OUTPUT;

    #[test]
    fn parses_lengths_and_labels() {
        let root = parse_newick("((human:0.1,chimp:0.2)anc:0.05,mouse:0.3);").unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].label.as_deref(), Some("anc"));
        assert_eq!(root.children[0].branch_length, Some(0.05));
        assert_eq!(root.leaf_labels(), vec!["human", "chimp", "mouse"]);
    }

    #[test]
    fn rejects_unbalanced_trees() {
        assert!(parse_newick("((a,b);").is_err());
        assert!(parse_newick("(a,b)c:x;").is_err());
        assert!(parse_newick("(a,,b);").is_err());
    }

    #[test]
    fn numbering_follows_codeml() {
        let mut root = parse_newick("((a,b),(c,d));").unwrap();
        number_nodes(&mut root);
        assert_eq!(root.node_number, 5);
        assert_eq!(root.children[0].node_number, 6);
        assert_eq!(root.children[1].node_number, 7);
        assert_eq!(root.children[1].children[1].node_number, 4);
    }

    #[test]
    fn numbered_tips_keep_their_numbers() {
        let mut root = parse_newick("((3_x,1_y),2_z);").unwrap();
        number_nodes(&mut root);
        assert_eq!(root.children[0].children[0].node_number, 3);
        assert_eq!(root.children[0].children[1].node_number, 1);
        assert_eq!(root.children[1].node_number, 2);
    }

    #[test]
    fn output_tree_gets_branch_omegas() {
        let root = tree_with_omega(M0_OUTPUT).unwrap();
        assert_eq!(root.node_number, 4);
        let clade = &root.children[0];
        assert_eq!(clade.branch_id.as_deref(), Some("4..5"));
        assert_eq!(clade.omega, Some(0.40));
        assert_eq!(clade.children[1].omega, Some(0.44));
        // out-of-bounds ratio for 4..3 is not attached
        assert_eq!(root.children[1].branch_id.as_deref(), Some("4..3"));
        assert_eq!(root.children[1].omega, None);
    }

    #[test]
    fn foreground_tags() {
        assert!(has_foreground_tags("((a #1,b),c);"));
        assert!(!has_foreground_tags("((a,b),c);"));
    }
}
