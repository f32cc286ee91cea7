//! Parser for the VAPIX flat-key text format.
//!
//! Axis devices serialize nested parameter and status trees as one
//! `dotted.path.key=value` pair per line:
//!
//! ```text
//! root.Brand.ProdNbr=Q6075-E
//! Sensor.S0.Name=Main
//! Sensor.S0.Fahrenheit=101.30
//! ```
//!
//! [`parse`] rebuilds the nesting as a [`ParsedTree`]. Values are kept as
//! the raw trimmed strings; callers decide how to interpret them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing flat-key text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A non-empty line has no `=` delimiter.
    #[error("line {line_number}: missing '=' delimiter in {line:?}")]
    MalformedLine { line_number: usize, line: String },

    /// A key descends through a component that already holds a scalar value.
    #[error("line {line_number}: key '{key}' descends through a scalar value")]
    KeyConflict { line_number: usize, key: String },
}

/// A node in a [`ParsedTree`]: either a leaf value or a nested tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Value(String),
    Tree(ParsedTree),
}

impl Node {
    /// The leaf value, if this node is a scalar.
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Node::Value(v) => Some(v),
            Node::Tree(_) => None,
        }
    }

    /// The nested tree, if this node is a branch.
    pub fn as_tree(&self) -> Option<&ParsedTree> {
        match self {
            Node::Tree(t) => Some(t),
            Node::Value(_) => None,
        }
    }
}

/// Nested mapping rebuilt from flat-key text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTree {
    entries: BTreeMap<String, Node>,
}

impl ParsedTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a direct child.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }

    /// Look up a direct child that is itself a tree.
    pub fn get_tree(&self, key: &str) -> Option<&ParsedTree> {
        self.get(key).and_then(Node::as_tree)
    }

    /// Follow a path of components from this tree.
    ///
    /// # Example
    /// ```
    /// use axis_common::flatkey::parse;
    ///
    /// let tree = parse("root.Brand.ProdNbr=Q6075-E").unwrap();
    /// let node = tree.get_path(&["root", "Brand", "ProdNbr"]).unwrap();
    /// assert_eq!(node.as_value(), Some("Q6075-E"));
    /// ```
    pub fn get_path(&self, path: &[&str]) -> Option<&Node> {
        let (last, parents) = path.split_last()?;
        let mut tree = self;
        for component in parents {
            tree = tree.get_tree(component)?;
        }
        tree.get(last)
    }

    /// Follow a path and return the leaf value at its end.
    pub fn get_value_path(&self, path: &[&str]) -> Option<&str> {
        self.get_path(path).and_then(Node::as_value)
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over direct children in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reconstruct the flat-key lines for this tree.
    ///
    /// Parsing the output yields a tree equal to `self`.
    pub fn flatten(&self) -> String {
        self.to_string()
    }

    fn assign(&mut self, key: &str, value: &str, line_number: usize) -> Result<(), ParseError> {
        let mut tree = self;
        let mut components = key.split('.').peekable();

        while let Some(component) = components.next() {
            if components.peek().is_none() {
                tree.entries
                    .insert(component.to_string(), Node::Value(value.to_string()));
                break;
            }

            let node = tree
                .entries
                .entry(component.to_string())
                .or_insert_with(|| Node::Tree(ParsedTree::new()));

            tree = match node {
                Node::Tree(child) => child,
                Node::Value(_) => {
                    return Err(ParseError::KeyConflict {
                        line_number,
                        key: key.to_string(),
                    });
                }
            };
        }

        Ok(())
    }

    fn write_lines(&self, prefix: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, node) in &self.entries {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };

            match node {
                Node::Value(v) => writeln!(f, "{}={}", path, v)?,
                Node::Tree(child) => child.write_lines(&path, f)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for ParsedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_lines("", f)
    }
}

impl FromStr for ParsedTree {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse flat-key text into a [`ParsedTree`].
///
/// Each line is split on its first `=`; the trimmed key is split on `.` and
/// the trimmed value is stored at the resulting path. Blank lines are skipped
/// and a repeated key keeps its last value.
///
/// # Example
/// ```
/// use axis_common::flatkey::parse;
///
/// let tree = parse("a.b.c=1\na.b.d=2\n").unwrap();
/// assert_eq!(tree.get_value_path(&["a", "b", "c"]), Some("1"));
/// assert_eq!(tree.get_value_path(&["a", "b", "d"]), Some("2"));
/// ```
pub fn parse(text: &str) -> Result<ParsedTree, ParseError> {
    let mut tree = ParsedTree::new();

    for (index, line) in text.trim().lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let line_number = index + 1;
        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseError::MalformedLine {
                line_number,
                line: line.to_string(),
            });
        };

        tree.assign(key.trim(), value.trim(), line_number)?;
    }

    Ok(tree)
}
