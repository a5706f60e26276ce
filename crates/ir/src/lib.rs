//! Intermediate representation for PHP sources.
//!
//! The parser adapter lowers the concrete syntax tree produced by
//! tree-sitter into a [`FileAst`]: a flat arena of typed [`AstNode`]s
//! addressed by [`NodeId`], with a parent index built once at lowering
//! time. Every later phase (gadget extraction, taint tracking, trigger
//! templates) works on this arena instead of on the grammar's raw nodes.

pub mod ast;

use serde::{Deserialize, Serialize};

pub use ast::{
    ArrayKey, AssignOp, AstNode, FileAst, Literal, NodeId, NodeKind, Param, Visibility,
};

/// 1-based position of a node in its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests;
