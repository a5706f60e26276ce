//! Helpers for walking one variable scope of a [`FileAst`].

use ir::{AssignOp, FileAst, Literal, NodeId, NodeKind};
use std::collections::HashMap;

use crate::catalog;
use crate::model::ArgRef;

/// Nodes of the scope rooted at `scope` in pre-order, without descending
/// into nested functions, closures or classes.
pub(crate) fn scope_nodes(ast: &FileAst, scope: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![scope];
    while let Some(id) = stack.pop() {
        out.push(id);
        for &child in ast.children(id).iter().rev() {
            if ast.kind(child).is_some_and(|k| k.is_scope()) {
                continue;
            }
            stack.push(child);
        }
    }
    out
}

/// Nearest enclosing function-like scope of `id`, or the program root.
pub(crate) fn enclosing_scope(ast: &FileAst, id: NodeId) -> NodeId {
    ast.enclosing(id, |k| {
        matches!(
            k,
            NodeKind::MethodDecl { .. } | NodeKind::FunctionDecl { .. } | NodeKind::Closure { .. }
        )
    })
    .unwrap_or_else(|| ast.root())
}

/// Namespace in effect at `id`: either an enclosing `namespace X { }` block
/// or the last `namespace X;` statement before it at top level.
pub(crate) fn namespace_of(ast: &FileAst, id: NodeId) -> Option<String> {
    if let Some(ns) = ast.enclosing(id, |k| matches!(k, NodeKind::Namespace { .. })) {
        if let Some(NodeKind::Namespace { name }) = ast.kind(ns) {
            return name.clone();
        }
    }
    let top = ast
        .ancestors(id)
        .find(|&a| ast.parent(a) == Some(ast.root()))
        .unwrap_or(id);
    let before: Vec<NodeId> = ast
        .children(ast.root())
        .iter()
        .copied()
        .take_while(|&c| c < top)
        .collect();
    before
        .into_iter()
        .rev()
        .find_map(|c| match ast.kind(c) {
            Some(NodeKind::Namespace { name }) => Some(name.clone()),
            _ => None,
        })
        .flatten()
}

/// `$this->name` with a literal property name.
pub(crate) fn this_property(ast: &FileAst, id: NodeId) -> Option<&str> {
    match ast.kind(id)? {
        NodeKind::PropertyFetch {
            property: Some(p), ..
        } => {
            let object = ast.child(id, 0)?;
            matches!(ast.kind(object), Some(NodeKind::Variable { name }) if name == "this")
                .then_some(p.as_str())
        }
        _ => None,
    }
}

pub(crate) fn is_this(ast: &FileAst, id: NodeId) -> bool {
    matches!(ast.kind(id), Some(NodeKind::Variable { name }) if name == "this")
}

/// Strips parentheses around an expression.
pub(crate) fn unparen(ast: &FileAst, mut id: NodeId) -> NodeId {
    while let Some(NodeKind::Paren) = ast.kind(id) {
        match ast.child(id, 0) {
            Some(inner) => id = inner,
            None => break,
        }
    }
    id
}

pub(crate) fn literal_text(lit: &Literal) -> String {
    match lit {
        Literal::Null => "null".into(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Str(s) => s.clone(),
    }
}

/// Method body with its parameters and the local variables that alias
/// `$this` properties or parameters.
pub(crate) struct MethodContext<'a> {
    pub ast: &'a FileAst,
    pub nodes: Vec<NodeId>,
    params: Vec<String>,
    aliases: HashMap<String, ArgRef>,
    /// Variables that alias a property, with the assignment node.
    pub property_aliases: Vec<(String, String, NodeId)>,
}

impl<'a> MethodContext<'a> {
    pub fn new(ast: &'a FileAst, method: NodeId, params: &[String]) -> Self {
        let nodes = match ast.child(method, 0) {
            Some(body) => scope_nodes(ast, body),
            None => Vec::new(),
        };
        let mut ctx = Self {
            ast,
            nodes,
            params: params.to_vec(),
            aliases: HashMap::new(),
            property_aliases: Vec::new(),
        };
        for i in 0..ctx.nodes.len() {
            let id = ctx.nodes[i];
            let Some(NodeKind::Assign { op }) = ast.kind(id) else {
                continue;
            };
            if !matches!(op, AssignOp::Plain | AssignOp::Ref) {
                continue;
            }
            let (Some(lhs), Some(rhs)) = (ast.child(id, 0), ast.child(id, 1)) else {
                continue;
            };
            let Some(NodeKind::Variable { name }) = ast.kind(lhs) else {
                continue;
            };
            let value = ctx.arg_ref(rhs);
            if let ArgRef::Property(p) = &value {
                ctx.property_aliases.push((name.clone(), p.clone(), id));
            }
            if value.is_slot() {
                ctx.aliases.insert(name.clone(), value);
            } else {
                ctx.aliases.remove(name);
            }
        }
        ctx
    }

    /// Classifies an expression from the attacker's point of view.
    pub fn arg_ref(&self, id: NodeId) -> ArgRef {
        let ast = self.ast;
        let id = unparen(ast, id);
        if let Some(p) = this_property(ast, id) {
            return ArgRef::Property(p.to_string());
        }
        match ast.kind(id) {
            Some(NodeKind::Variable { name }) => {
                if let Some(i) = self.params.iter().position(|p| p == name) {
                    ArgRef::Param(i)
                } else if let Some(alias) = self.aliases.get(name) {
                    alias.clone()
                } else if catalog::is_superglobal(name) {
                    ArgRef::Tainted(format!("${name}"))
                } else {
                    ArgRef::Other
                }
            }
            Some(NodeKind::Subscript) => match ast.child(id, 0).map(|b| self.arg_ref(b)) {
                Some(ArgRef::Tainted(s)) => ArgRef::Tainted(s),
                _ => ArgRef::Other,
            },
            Some(NodeKind::Cast { to }) if to == "string" => {
                ast.child(id, 0).map_or(ArgRef::Other, |c| self.arg_ref(c))
            }
            Some(NodeKind::Literal(lit)) => ArgRef::Literal(literal_text(lit)),
            _ => ArgRef::Other,
        }
    }

    /// Arguments of a call node whose argument list sits at `args_index`.
    pub fn call_args(&self, call: NodeId, args_index: usize) -> Vec<ArgRef> {
        self.ast
            .child(call, args_index)
            .map(|args| {
                self.ast
                    .children(args)
                    .iter()
                    .map(|&a| self.arg_ref(a))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_named(ast: &FileAst, name: &str) -> NodeId {
        ast.find_all(ast.root(), |k| matches!(k, NodeKind::Call { name: Some(f) } if f == name))[0]
    }

    #[test]
    fn both_namespace_forms() {
        let ast = parsers::parse_php("<?php\nnamespace A\\B;\nclass X {}\n", "a.php").unwrap();
        let class = ast.find_by_kind(ast.root(), "ClassDecl")[0];
        assert_eq!(namespace_of(&ast, class).as_deref(), Some("A\\B"));

        let ast = parsers::parse_php("<?php\nnamespace C { class Y {} }\n", "c.php").unwrap();
        let class = ast.find_by_kind(ast.root(), "ClassDecl")[0];
        assert_eq!(namespace_of(&ast, class).as_deref(), Some("C"));

        let ast = parsers::parse_php("<?php\nclass Z {}\n", "z.php").unwrap();
        let class = ast.find_by_kind(ast.root(), "ClassDecl")[0];
        assert_eq!(namespace_of(&ast, class), None);
    }

    #[test]
    fn closures_are_separate_scopes() {
        let src = "<?php\nfunction f() { a(); $g = function () { b(); }; }\n";
        let ast = parsers::parse_php(src, "f.php").unwrap();
        let func = ast.find_by_kind(ast.root(), "FunctionDecl")[0];
        let a = call_named(&ast, "a");
        let b = call_named(&ast, "b");

        let nodes = scope_nodes(&ast, func);
        assert!(nodes.contains(&a));
        assert!(!nodes.contains(&b));
        assert_eq!(enclosing_scope(&ast, a), func);
        assert!(matches!(
            ast.kind(enclosing_scope(&ast, b)),
            Some(NodeKind::Closure { .. })
        ));
    }
}
