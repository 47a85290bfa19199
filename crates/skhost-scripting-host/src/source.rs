//! Structural parse of a script file into an indentation tree
//!
//! A line ending with `:` opens a section; the more deeply indented lines that
//! follow belong to it. `#` starts a comment and `##` stands for a literal `#`.

use std::path::{Path, PathBuf};

use crate::error::{ErrorReporter, ScriptError};

/// A single line without children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNode {
    pub key: String,
    pub line: usize,
}

/// A line ending with `:` and the lines nested under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    pub key: String,
    pub line: usize,
    pub children: Vec<Node>,
}

impl SectionNode {
    /// Entries directly under this section, in file order
    pub fn entries(&self) -> impl Iterator<Item = &EntryNode> {
        self.children.iter().filter_map(|node| match node {
            Node::Entry(entry) => Some(entry),
            Node::Section(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Entry(EntryNode),
    Section(SectionNode),
}

impl Node {
    pub fn key(&self) -> &str {
        match self {
            Node::Entry(entry) => &entry.key,
            Node::Section(section) => &section.key,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Node::Entry(entry) => entry.line,
            Node::Section(section) => section.line,
        }
    }
}

/// Parsed file: its top-level nodes in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    path: PathBuf,
    nodes: Vec<Node>,
}

impl SourceTree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}

/// Read and parse one script file
pub fn read_source(path: &Path, reporter: &dyn ErrorReporter) -> Result<SourceTree, ScriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Source {
        path: path.to_path_buf(),
        source,
    })?;
    parse_source(path, &text, reporter)
}

struct OpenSection {
    indent: usize,
    child_indent: Option<usize>,
    section: SectionNode,
}

/// Parse script text into a [`SourceTree`]
///
/// Lines with unexpected indentation are reported and skipped. Mixing tabs
/// and spaces for indentation fails the whole file.
pub fn parse_source(
    path: &Path,
    text: &str,
    reporter: &dyn ErrorReporter,
) -> Result<SourceTree, ScriptError> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<OpenSection> = Vec::new();
    let mut indent_char: Option<char> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = strip_comment(raw);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            continue;
        }

        let prefix = &content[..content.len() - content.trim_start().len()];
        for c in prefix.chars() {
            match indent_char {
                None => indent_char = Some(c),
                Some(expected) if expected != c => {
                    return Err(ScriptError::parse(
                        path,
                        Some(line),
                        "indentation mixes tabs and spaces",
                    ));
                }
                Some(_) => {}
            }
        }
        let indent = prefix.chars().count();

        while stack.last().is_some_and(|open| indent <= open.indent) {
            close_section(&mut stack, &mut root);
        }

        let expected = match stack.last_mut() {
            Some(open) => *open.child_indent.get_or_insert(indent),
            None => 0,
        };
        if indent != expected {
            reporter.report(&ScriptError::parse(
                path,
                Some(line),
                format!("unexpected indentation (expected {expected}, found {indent}), line skipped"),
            ));
            continue;
        }

        if let Some(key) = trimmed.strip_suffix(':') {
            stack.push(OpenSection {
                indent,
                child_indent: None,
                section: SectionNode {
                    key: key.trim_end().to_string(),
                    line,
                    children: Vec::new(),
                },
            });
        } else {
            let entry = Node::Entry(EntryNode {
                key: trimmed.to_string(),
                line,
            });
            match stack.last_mut() {
                Some(open) => open.section.children.push(entry),
                None => root.push(entry),
            }
        }
    }

    while !stack.is_empty() {
        close_section(&mut stack, &mut root);
    }

    Ok(SourceTree {
        path: path.to_path_buf(),
        nodes: root,
    })
}

fn close_section(stack: &mut Vec<OpenSection>, root: &mut Vec<Node>) {
    if let Some(open) = stack.pop() {
        let node = Node::Section(open.section);
        match stack.last_mut() {
            Some(parent) => parent.section.children.push(node),
            None => root.push(node),
        }
    }
}

/// Drop the comment part of a line; `##` is kept as a literal `#`
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' {
            if chars.peek() == Some(&'#') {
                chars.next();
                out.push('#');
                continue;
            }
            break;
        }
        out.push(c);
    }
    out.truncate(out.trim_end().len());
    out
}
