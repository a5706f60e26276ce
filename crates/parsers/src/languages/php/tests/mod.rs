//! Lowering tests for the PHP front end.

mod errors;

use crate::parse_php;
use ir::{FileAst, NodeId, NodeKind};

fn parse_snippet(code: &str) -> FileAst {
    parse_php(code, "<mem>").expect("parse php snippet")
}

fn first_of(ast: &FileAst, kind: &str) -> NodeId {
    *ast.find_by_kind(ast.root(), kind)
        .first()
        .unwrap_or_else(|| panic!("no {kind} node"))
}

fn kind_of(ast: &FileAst, id: NodeId) -> &NodeKind {
    ast.kind(id).expect("node exists")
}
