//! Arena representation of a PHP syntax tree.
//!
//! Nodes are stored in pre-order: a node's id is always smaller than the
//! ids of its descendants, so iterating `nodes` in order visits the file in
//! document order. Parent links live in a separate index so the nodes
//! themselves stay plain data.

use serde::{Deserialize, Serialize};

use crate::Location;

/// Stable identifier of a node inside one [`FileAst`].
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar literal as written in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    /// `=`
    Plain,
    /// `=&`
    Ref,
    /// `.=`
    Concat,
    /// Any other compound operator (`+=`, `??=`, ...).
    Other,
}

/// Formal parameter of a method or function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Visibility when the parameter is a promoted constructor property.
    pub promoted: Option<Visibility>,
}

/// Key of an array element, when it is a literal.
pub type ArrayKey = Option<String>;

/// Typed node kinds.
///
/// Child layout is fixed per kind and documented on each variant; the
/// extractor relies on these positions instead of probing field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Program,
    /// `namespace Foo;` (no children) or `namespace Foo { ... }`.
    Namespace { name: Option<String> },
    /// Children: class members.
    ClassDecl {
        name: Option<String>,
        parent: Option<String>,
        interfaces: Vec<String>,
        is_abstract: bool,
    },
    InterfaceDecl { name: Option<String> },
    TraitDecl { name: Option<String> },
    /// Children: [`NodeKind::PropertyElement`]s.
    PropertyDecl {
        visibility: Option<Visibility>,
        is_static: bool,
    },
    PropertyElement {
        name: String,
        default: Option<Literal>,
    },
    /// Children: `[body]` when the method is not abstract.
    MethodDecl {
        name: String,
        visibility: Option<Visibility>,
        is_static: bool,
        is_abstract: bool,
        params: Vec<Param>,
    },
    /// Children: `[body]`.
    FunctionDecl { name: String, params: Vec<Param> },
    /// Anonymous function or arrow function. Children: `[body]`.
    Closure { params: Vec<Param> },
    /// Compound statement. Children: statements.
    Block,
    /// Children: `[lhs, rhs]`.
    Assign { op: AssignOp },
    /// Children: `[callee, arguments]`. `name` is set when the callee is a
    /// plain or qualified name.
    Call { name: Option<String> },
    /// Children: `[object, method_name, arguments]`. `method` is set when
    /// the method name is a literal identifier.
    MemberCall { method: Option<String>, nullsafe: bool },
    /// Children: `[scope, method_name, arguments]`.
    StaticCall {
        scope: Option<String>,
        method: Option<String>,
    },
    /// Children: argument expressions.
    Arguments,
    /// Children: `[object, property_name]`.
    PropertyFetch {
        property: Option<String>,
        nullsafe: bool,
    },
    /// Children: `[scope, property_name]`.
    StaticPropertyFetch {
        scope: Option<String>,
        property: Option<String>,
    },
    /// Children: `[base]` or `[base, index]`.
    Subscript,
    /// `$name`; `$this` is stored as `this`.
    Variable { name: String },
    /// Identifier or qualified name.
    Name { value: String },
    /// Children: `[class]` or `[class, arguments]`.
    New { class: Option<String> },
    /// Children: `[expr]`.
    Clone,
    /// Children: `[left, right]`.
    BinaryOp { op: String },
    /// Children: `[value]`.
    Cast { to: String },
    /// Children: `[inner]`.
    Paren,
    /// Children: echoed expressions.
    Echo,
    /// Children: `[expr]`.
    Print,
    /// Double-quoted string or heredoc with interpolation. Children: parts.
    Interpolated,
    Literal(Literal),
    /// Children: [`NodeKind::ArrayElement`]s.
    ArrayLit,
    /// Children: `[value]` or `[key, value]`.
    ArrayElement { key: ArrayKey, has_key: bool },
    /// `include`, `require`, ... Children: `[path]`.
    Include { kind: String },
    /// Children: checked expressions.
    Isset,
    /// Children: unset expressions.
    Unset,
    /// `exit`/`die`. Children: optional status.
    Exit,
    /// Children: `[expr]`.
    Throw,
    /// Children: optional value.
    Return,
    /// Syntax error recovered by the grammar.
    Error,
    /// Any construct the analysis does not need to distinguish.
    Other { kind: String },
}

impl NodeKind {
    /// Short name of the kind, used by [`FileAst::find_by_kind`].
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program => "Program",
            NodeKind::Namespace { .. } => "Namespace",
            NodeKind::ClassDecl { .. } => "ClassDecl",
            NodeKind::InterfaceDecl { .. } => "InterfaceDecl",
            NodeKind::TraitDecl { .. } => "TraitDecl",
            NodeKind::PropertyDecl { .. } => "PropertyDecl",
            NodeKind::PropertyElement { .. } => "PropertyElement",
            NodeKind::MethodDecl { .. } => "MethodDecl",
            NodeKind::FunctionDecl { .. } => "FunctionDecl",
            NodeKind::Closure { .. } => "Closure",
            NodeKind::Block => "Block",
            NodeKind::Assign { .. } => "Assign",
            NodeKind::Call { .. } => "Call",
            NodeKind::MemberCall { .. } => "MemberCall",
            NodeKind::StaticCall { .. } => "StaticCall",
            NodeKind::Arguments => "Arguments",
            NodeKind::PropertyFetch { .. } => "PropertyFetch",
            NodeKind::StaticPropertyFetch { .. } => "StaticPropertyFetch",
            NodeKind::Subscript => "Subscript",
            NodeKind::Variable { .. } => "Variable",
            NodeKind::Name { .. } => "Name",
            NodeKind::New { .. } => "New",
            NodeKind::Clone => "Clone",
            NodeKind::BinaryOp { .. } => "BinaryOp",
            NodeKind::Cast { .. } => "Cast",
            NodeKind::Paren => "Paren",
            NodeKind::Echo => "Echo",
            NodeKind::Print => "Print",
            NodeKind::Interpolated => "Interpolated",
            NodeKind::Literal(_) => "Literal",
            NodeKind::ArrayLit => "ArrayLit",
            NodeKind::ArrayElement { .. } => "ArrayElement",
            NodeKind::Include { .. } => "Include",
            NodeKind::Isset => "Isset",
            NodeKind::Unset => "Unset",
            NodeKind::Exit => "Exit",
            NodeKind::Throw => "Throw",
            NodeKind::Return => "Return",
            NodeKind::Error => "Error",
            NodeKind::Other { .. } => "Other",
        }
    }

    /// Declarations that open a new variable scope.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::MethodDecl { .. }
                | NodeKind::FunctionDecl { .. }
                | NodeKind::Closure { .. }
                | NodeKind::ClassDecl { .. }
                | NodeKind::InterfaceDecl { .. }
                | NodeKind::TraitDecl { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    /// Position of the node in the arena.
    pub id: NodeId,
    pub kind: NodeKind,
    /// Children in source order.
    pub children: Vec<NodeId>,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAst {
    pub file_path: String,
    /// Flat node arena; `nodes[i].id == i`.
    pub nodes: Vec<AstNode>,
    /// Parent of every node, indexed by id.
    parents: Vec<Option<NodeId>>,
    /// Number of syntax errors the grammar recovered from.
    pub error_count: usize,
}

impl FileAst {
    /// Creates an arena holding only the [`NodeKind::Program`] root.
    pub fn new(file_path: String) -> Self {
        let mut ast = Self {
            file_path,
            nodes: Vec::new(),
            parents: Vec::new(),
            error_count: 0,
        };
        ast.push(None, NodeKind::Program, Location { line: 1, column: 1 });
        ast
    }

    /// Id of the program root.
    pub fn root(&self) -> NodeId {
        0
    }

    /// Appends a node and links it under `parent`.
    pub fn push(&mut self, parent: Option<NodeId>, kind: NodeKind, location: Location) -> NodeId {
        let id = self.nodes.len();
        if matches!(kind, NodeKind::Error) {
            self.error_count += 1;
        }
        self.nodes.push(AstNode {
            id,
            kind,
            children: Vec::new(),
            location,
        });
        self.parents.push(parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            p.children.push(id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&AstNode> {
        self.nodes.get(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id).map(|n| &n.kind)
    }

    /// Gets the parent node of `id`, if any.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id).copied().flatten()
    }

    /// Returns the direct children of node `id`.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Child of `id` at position `idx` in the kind's fixed layout.
    pub fn child(&self, id: NodeId, idx: usize) -> Option<NodeId> {
        self.children(id).get(idx).copied()
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Nearest strict ancestor whose kind satisfies `pred`.
    pub fn enclosing<P>(&self, id: NodeId, pred: P) -> Option<NodeId>
    where
        P: Fn(&NodeKind) -> bool,
    {
        self.ancestors(id)
            .find(|&a| self.kind(a).is_some_and(|k| pred(k)))
    }

    /// Pre-order walk starting at `from`. The callback receives each node
    /// and its parent (`None` for `from` itself when it is the root).
    pub fn traverse<F>(&self, from: NodeId, mut visit: F)
    where
        F: FnMut(&AstNode, Option<&AstNode>),
    {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let parent = self.parent(id).and_then(|p| self.nodes.get(p));
            visit(node, parent);
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
    }

    /// All nodes under `from` (inclusive) in pre-order.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.traverse(from, |n, _| out.push(n.id));
        out
    }

    /// Nodes under `from` (inclusive) whose kind satisfies `pred`.
    pub fn find_all<P>(&self, from: NodeId, pred: P) -> Vec<NodeId>
    where
        P: Fn(&NodeKind) -> bool,
    {
        let mut out = Vec::new();
        self.traverse(from, |n, _| {
            if pred(&n.kind) {
                out.push(n.id);
            }
        });
        out
    }

    /// Nodes under `from` (inclusive) whose [`NodeKind::name`] equals `kind`.
    ///
    /// # Example
    /// ```
    /// use ir::{FileAst, Location, NodeKind};
    /// let mut ast = FileAst::new("a.php".into());
    /// let root = ast.root();
    /// ast.push(Some(root), NodeKind::Echo, Location { line: 2, column: 1 });
    /// assert_eq!(ast.find_by_kind(root, "Echo").len(), 1);
    /// ```
    pub fn find_by_kind(&self, from: NodeId, kind: &str) -> Vec<NodeId> {
        self.find_all(from, |k| k.name() == kind)
    }

    pub fn location_of(&self, id: NodeId) -> Option<Location> {
        self.nodes.get(id).map(|n| n.location)
    }

    /// Exports the AST to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
