//! Python syntax checks
//!
//! Validity follows the Python 3 grammar as implemented by `rustpython-parser`;
//! tree-sitter classifies the top-level statements of code that passed.

use rustpython_parser::{parse, Mode};
use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

/// Source name reported in parse errors
const SOURCE_PATH: &str = "<completion>";

#[derive(Debug, Error)]
#[error("Failed to load Python grammar: {0}")]
pub struct GrammarError(#[from] tree_sitter::LanguageError);

/// Python grammar handle
///
/// Cheap to clone and safe to share; a fresh parser is created per check.
#[derive(Clone)]
pub struct PythonSyntax {
    language: Language,
}

impl PythonSyntax {
    /// Load the grammar, failing if the linked grammar ABI is unsupported.
    pub fn new() -> Result<Self, GrammarError> {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        Parser::new().set_language(&language)?;
        Ok(Self { language })
    }

    fn parse_tree(&self, code: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        parser.set_language(&self.language).ok()?;
        parser.parse(code, None)
    }

    /// True when `code` compiles as a Python 3 module.
    ///
    /// Python 2 statements (`print 'x'`, `exec 'x'`) and indentation errors
    /// are rejected.
    pub fn is_valid(&self, code: &str) -> bool {
        parse(code, Mode::Module, SOURCE_PATH).is_ok()
    }

    /// True when `code` is valid and has at least one top-level statement
    /// that is neither a comment nor a bare string literal.
    pub fn has_executable_statement(&self, code: &str) -> bool {
        if !self.is_valid(code) {
            return false;
        }
        let Some(tree) = self.parse_tree(code) else {
            return false;
        };

        let root = tree.root_node();
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            if !is_inert(node) {
                return true;
            }
        }
        false
    }
}

fn is_inert(node: Node<'_>) -> bool {
    match node.kind() {
        "comment" => true,
        "expression_statement" => {
            node.named_child_count() == 1
                && node
                    .named_child(0)
                    .is_some_and(|child| matches!(child.kind(), "string" | "concatenated_string"))
        }
        _ => false,
    }
}
