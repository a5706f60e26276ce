//! tree-sitter-php front end.
//!
//! The grammar's concrete syntax tree is lowered into [`ir::FileAst`]. Only
//! the constructs the gadget analysis inspects get a dedicated
//! [`NodeKind`]; everything else becomes [`NodeKind::Other`] with its named
//! children lowered underneath, so nested expressions stay reachable.

use crate::ParseError;
use ir::{AssignOp, FileAst, Literal, Location, NodeId, NodeKind, Param, Visibility};
use std::sync::Mutex;
use tracing::debug;

#[cfg(test)]
mod tests;

// Parser pool to avoid concurrency issues with tree-sitter
static PARSER_POOL: Mutex<Vec<tree_sitter::Parser>> = Mutex::new(Vec::new());

fn get_parser() -> tree_sitter::Parser {
    let mut pool = PARSER_POOL.lock().expect("parser pool lock poisoned");
    if let Some(mut parser) = pool.pop() {
        parser.reset();
        parser
    } else {
        tree_sitter::Parser::new()
    }
}

fn return_parser(mut parser: tree_sitter::Parser) {
    let mut pool = PARSER_POOL.lock().expect("parser pool lock poisoned");
    if pool.len() < 10 {
        parser.reset();
        pool.push(parser);
    }
}

/// Parses PHP source text into a [`FileAst`].
///
/// Syntax errors are tolerated: the grammar's error nodes become
/// [`NodeKind::Error`] and are counted in [`FileAst::error_count`]. An error
/// is returned only when nothing can be salvaged.
///
/// # Example
/// ```
/// use parsers::parse_php;
/// let ast = parse_php("<?php echo $_GET['x'];", "a.php").unwrap();
/// assert_eq!(ast.find_by_kind(ast.root(), "Echo").len(), 1);
/// assert!(parse_php("   ", "b.php").is_err());
/// ```
pub fn parse_php(source: &str, file_id: &str) -> Result<FileAst, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::new(file_id, "empty input"));
    }
    if source.contains('\0') {
        return Err(ParseError::new(file_id, "binary content"));
    }

    let mut parser = get_parser();
    if let Err(e) = parser.set_language(tree_sitter_php::language()) {
        return Err(ParseError::new(file_id, format!("load php grammar: {e}")));
    }
    let tree = parser.parse(source, None);
    return_parser(parser);
    let tree = tree.ok_or_else(|| ParseError::new(file_id, "parser produced no tree"))?;

    let mut lowerer = Lowerer {
        src: source.as_bytes(),
        ast: FileAst::new(file_id.to_string()),
    };
    let root = lowerer.ast.root();
    let program = tree.root_node();
    lowerer.lower_named_children(program, root);
    if program.is_error() {
        lowerer.ast.error_count += 1;
    }
    let ast = lowerer.ast;

    let top = ast.children(root);
    let salvageable = top
        .iter()
        .any(|&c| !matches!(ast.kind(c), Some(NodeKind::Error)));
    if !salvageable && ast.error_count > 0 {
        return Err(ParseError::new(file_id, "no salvageable statement"));
    }
    if ast.error_count > 0 {
        debug!(file = %file_id, errors = ast.error_count, "Recovered from PHP syntax errors");
    }
    debug!(file = %file_id, nodes = ast.len(), "PHP parsing completed");
    Ok(ast)
}

struct Lowerer<'a> {
    src: &'a [u8],
    ast: FileAst,
}

fn location(node: tree_sitter::Node) -> Location {
    let pos = node.start_position();
    Location {
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

fn named_children(node: tree_sitter::Node) -> Vec<tree_sitter::Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn all_children(node: tree_sitter::Node) -> Vec<tree_sitter::Node> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Value of a quoted literal. Double-quoted text has its escapes decoded;
/// `None` when the decoded bytes are not valid UTF-8 or an escape is
/// invalid.
fn unquote(text: &str) -> Option<String> {
    let t = text.trim_start_matches(['b', 'B']);
    let bytes = t.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == b'\'' && last == b'\'' {
            return Some(unescape_single(&t[1..t.len() - 1]));
        }
        if first == b'"' && last == b'"' {
            return unescape_double(&t[1..t.len() - 1]);
        }
    }
    Some(text.to_string())
}

fn unescape_single(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next @ ('\\' | '\'')) = chars.peek() {
                out.push(next);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn unescape_double(inner: &str) -> Option<String> {
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let simple = match bytes[i + 1] {
            b'n' => Some(b'\n'),
            b't' => Some(b'\t'),
            b'r' => Some(b'\r'),
            b'v' => Some(0x0b),
            b'e' => Some(0x1b),
            b'f' => Some(0x0c),
            b'\\' => Some(b'\\'),
            b'$' => Some(b'$'),
            b'"' => Some(b'"'),
            _ => None,
        };
        if let Some(b) = simple {
            out.push(b);
            i += 2;
            continue;
        }
        match bytes[i + 1] {
            b'x' if bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit) => {
                let digits = digit_run(&bytes[i + 2..], 2, u8::is_ascii_hexdigit);
                out.push(u8::from_str_radix(digits, 16).ok()?);
                i += 2 + digits.len();
            }
            b'0'..=b'7' => {
                let digits = digit_run(&bytes[i + 1..], 3, |b| (b'0'..=b'7').contains(b));
                let value = u32::from_str_radix(digits, 8).ok()?;
                out.push((value & 0xff) as u8);
                i += 1 + digits.len();
            }
            b'u' if bytes.get(i + 2) == Some(&b'{') => {
                let close = bytes[i + 3..].iter().position(|&b| b == b'}')?;
                let hex = std::str::from_utf8(&bytes[i + 3..i + 3 + close]).ok()?;
                let c = char::from_u32(u32::from_str_radix(hex, 16).ok()?)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                i += 4 + close;
            }
            _ => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

/// Leading run of at most `max` bytes matching `pred`, as text.
fn digit_run(bytes: &[u8], max: usize, pred: impl Fn(&u8) -> bool) -> &str {
    let n = bytes.iter().take(max).take_while(|&&b| pred(&b)).count();
    std::str::from_utf8(&bytes[..n]).unwrap_or_default()
}

fn parse_int(text: &str) -> Option<i64> {
    let t = text.replace('_', "");
    let lower = t.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else if lower.len() > 1 && lower.starts_with('0') {
        i64::from_str_radix(lower.trim_start_matches("0o").trim_start_matches('0'), 8)
            .ok()
            .or(Some(0))
    } else {
        lower.parse().ok()
    }
}

fn visibility_of(text: &str) -> Option<Visibility> {
    match text.to_ascii_lowercase().as_str() {
        "public" => Some(Visibility::Public),
        "protected" => Some(Visibility::Protected),
        "private" => Some(Visibility::Private),
        _ => None,
    }
}

/// Interpolated parts of a double-quoted string or heredoc.
const INTERPOLATION_KINDS: &[&str] = &[
    "variable_name",
    "dynamic_variable_name",
    "member_access_expression",
    "nullsafe_member_access_expression",
    "subscript_expression",
    "member_call_expression",
    "nullsafe_member_call_expression",
    "function_call_expression",
];

impl<'a> Lowerer<'a> {
    fn text(&self, node: tree_sitter::Node) -> &'a str {
        node.utf8_text(self.src).unwrap_or_default()
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind, node: tree_sitter::Node) -> NodeId {
        self.ast.push(Some(parent), kind, location(node))
    }

    fn lower_named_children(&mut self, node: tree_sitter::Node, parent: NodeId) {
        for child in named_children(node) {
            self.lower(child, parent);
        }
    }

    /// Lowers `node` as exactly one child of `parent`, so fixed child
    /// layouts keep their positions even when a slot is absent.
    fn lower_slot(&mut self, node: Option<tree_sitter::Node>, parent: NodeId, at: tree_sitter::Node) {
        let lowered = node.and_then(|n| self.lower(n, parent));
        if lowered.is_none() {
            self.push(
                parent,
                NodeKind::Other {
                    kind: "missing".into(),
                },
                at,
            );
        }
    }

    /// Identifier slot of a member access or call.
    fn lower_member_name(&mut self, name: Option<tree_sitter::Node>, parent: NodeId, at: tree_sitter::Node) {
        match name {
            Some(n) if n.kind() == "name" => {
                let value = self.text(n).to_string();
                self.push(parent, NodeKind::Name { value }, n);
            }
            other => self.lower_slot(other, parent, at),
        }
    }

    fn lower_arguments(&mut self, args: Option<tree_sitter::Node>, parent: NodeId, at: tree_sitter::Node) {
        let id = self.push(parent, NodeKind::Arguments, args.unwrap_or(at));
        let Some(args) = args else {
            return;
        };
        for arg in named_children(args) {
            match arg.kind() {
                "argument" => {
                    // Named arguments carry the label first; the value is last.
                    let value = arg
                        .named_child_count()
                        .checked_sub(1)
                        .and_then(|i| arg.named_child(i));
                    self.lower_slot(value, id, arg);
                }
                "variadic_placeholder" | "comment" => {}
                _ => {
                    self.lower(arg, id);
                }
            }
        }
    }

    fn params(&self, node: Option<tree_sitter::Node>) -> Vec<Param> {
        let Some(node) = node else {
            return Vec::new();
        };
        named_children(node)
            .into_iter()
            .filter_map(|p| {
                let name_node = p.child_by_field_name("name").or_else(|| {
                    named_children(p)
                        .into_iter()
                        .find(|c| c.kind() == "variable_name")
                })?;
                let name = self.text(name_node).trim_start_matches('$').to_string();
                let promoted = if p.kind() == "property_promotion_parameter" {
                    let vis = p
                        .child_by_field_name("visibility")
                        .or_else(|| {
                            named_children(p)
                                .into_iter()
                                .find(|c| c.kind() == "visibility_modifier")
                        })
                        .and_then(|v| visibility_of(self.text(v)));
                    Some(vis.unwrap_or(Visibility::Public))
                } else {
                    None
                };
                Some(Param { name, promoted })
            })
            .collect()
    }

    fn literal(&self, node: tree_sitter::Node) -> Option<Literal> {
        let text = self.text(node);
        match node.kind() {
            "integer" => parse_int(text).map(Literal::Int),
            "float" => text.replace('_', "").parse().ok().map(Literal::Float),
            "boolean" => Some(Literal::Bool(text.eq_ignore_ascii_case("true"))),
            "null" => Some(Literal::Null),
            "string" | "nowdoc" => unquote(text).map(Literal::Str),
            "encapsed_string" if self.interpolations(node).is_empty() => {
                unquote(text).map(Literal::Str)
            }
            "unary_op_expression" if text.starts_with('-') => {
                match node.named_child(0).and_then(|n| self.literal(n)) {
                    Some(Literal::Int(i)) => Some(Literal::Int(-i)),
                    Some(Literal::Float(f)) => Some(Literal::Float(-f)),
                    _ => None,
                }
            }
            "parenthesized_expression" => node.named_child(0).and_then(|n| self.literal(n)),
            _ => None,
        }
    }

    fn interpolations(&self, node: tree_sitter::Node<'a>) -> Vec<tree_sitter::Node<'a>> {
        let mut out = Vec::new();
        let mut stack: Vec<tree_sitter::Node> = named_children(node).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            if INTERPOLATION_KINDS.contains(&n.kind()) {
                out.push(n);
            } else {
                stack.extend(named_children(n).into_iter().rev());
            }
        }
        out
    }

    fn modifiers(&self, node: tree_sitter::Node) -> (Option<Visibility>, bool, bool) {
        let mut visibility = None;
        let mut is_static = false;
        let mut is_abstract = false;
        for c in all_children(node) {
            match c.kind() {
                "visibility_modifier" => visibility = visibility_of(self.text(c)),
                "static_modifier" => is_static = true,
                "abstract_modifier" => is_abstract = true,
                _ => {}
            }
        }
        (visibility, is_static, is_abstract)
    }

    fn clause_names(&self, clause: tree_sitter::Node) -> Vec<String> {
        named_children(clause)
            .into_iter()
            .filter(|c| matches!(c.kind(), "name" | "qualified_name"))
            .map(|c| self.text(c).trim_start_matches('\\').to_string())
            .collect()
    }

    fn field_text(&self, node: tree_sitter::Node, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_string())
    }

    /// Lowers one grammar node under `parent` and returns the new node id,
    /// or `None` when the node produced nothing (comments, tags) or was
    /// spliced into `parent`.
    fn lower(&mut self, node: tree_sitter::Node, parent: NodeId) -> Option<NodeId> {
        if node.is_missing() {
            self.ast.error_count += 1;
            return None;
        }
        if node.is_error() {
            let id = self.push(parent, NodeKind::Error, node);
            self.lower_named_children(node, id);
            return Some(id);
        }
        let id = match node.kind() {
            "comment" | "php_tag" | "text_interpolation" | "text" => return None,
            "expression_statement" => {
                self.lower_named_children(node, parent);
                return None;
            }
            "namespace_definition" => {
                let name = self.field_text(node, "name");
                let id = self.push(parent, NodeKind::Namespace { name }, node);
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_named_children(body, id);
                }
                id
            }
            "class_declaration" => {
                let name = self.field_text(node, "name");
                let mut parent_name = None;
                let mut interfaces = Vec::new();
                for c in all_children(node) {
                    match c.kind() {
                        "base_clause" => parent_name = self.clause_names(c).into_iter().next(),
                        "class_interface_clause" => interfaces = self.clause_names(c),
                        _ => {}
                    }
                }
                let (_, _, is_abstract) = self.modifiers(node);
                let id = self.push(
                    parent,
                    NodeKind::ClassDecl {
                        name,
                        parent: parent_name,
                        interfaces,
                        is_abstract,
                    },
                    node,
                );
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_named_children(body, id);
                }
                id
            }
            "interface_declaration" | "trait_declaration" => {
                let name = self.field_text(node, "name");
                let kind = if node.kind() == "interface_declaration" {
                    NodeKind::InterfaceDecl { name }
                } else {
                    NodeKind::TraitDecl { name }
                };
                let id = self.push(parent, kind, node);
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_named_children(body, id);
                }
                id
            }
            "property_declaration" => {
                let (visibility, is_static, _) = self.modifiers(node);
                let id = self.push(
                    parent,
                    NodeKind::PropertyDecl {
                        visibility,
                        is_static,
                    },
                    node,
                );
                for element in named_children(node)
                    .into_iter()
                    .filter(|c| c.kind() == "property_element")
                {
                    let parts = named_children(element);
                    let Some(var) = parts.iter().find(|c| c.kind() == "variable_name") else {
                        continue;
                    };
                    let name = self.text(*var).trim_start_matches('$').to_string();
                    let default = parts
                        .iter()
                        .find(|c| c.kind() != "variable_name")
                        .and_then(|init| {
                            if init.kind() == "property_initializer" {
                                init.named_child(0)
                            } else {
                                Some(*init)
                            }
                        })
                        .and_then(|v| self.literal(v));
                    self.push(id, NodeKind::PropertyElement { name, default }, element);
                }
                id
            }
            "method_declaration" => {
                let name = self.field_text(node, "name").unwrap_or_default();
                let (visibility, is_static, is_abstract) = self.modifiers(node);
                let params = self.params(node.child_by_field_name("parameters"));
                let id = self.push(
                    parent,
                    NodeKind::MethodDecl {
                        name,
                        visibility,
                        is_static,
                        is_abstract,
                        params,
                    },
                    node,
                );
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower(body, id);
                }
                id
            }
            "function_definition" => {
                let name = self.field_text(node, "name").unwrap_or_default();
                let params = self.params(node.child_by_field_name("parameters"));
                let id = self.push(parent, NodeKind::FunctionDecl { name, params }, node);
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower(body, id);
                }
                id
            }
            "anonymous_function_creation_expression" | "arrow_function" => {
                let params = self.params(node.child_by_field_name("parameters"));
                let id = self.push(parent, NodeKind::Closure { params }, node);
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower(body, id);
                }
                id
            }
            "compound_statement" => {
                let id = self.push(parent, NodeKind::Block, node);
                self.lower_named_children(node, id);
                id
            }
            "assignment_expression" | "reference_assignment_expression" | "augmented_assignment_expression" => {
                let op = match node.kind() {
                    "assignment_expression" => AssignOp::Plain,
                    "reference_assignment_expression" => AssignOp::Ref,
                    _ => {
                        let op = node
                            .child_by_field_name("operator")
                            .or_else(|| node.child(1))
                            .map(|o| o.kind())
                            .unwrap_or_default();
                        if op == ".=" {
                            AssignOp::Concat
                        } else {
                            AssignOp::Other
                        }
                    }
                };
                let id = self.push(parent, NodeKind::Assign { op }, node);
                self.lower_slot(node.child_by_field_name("left"), id, node);
                self.lower_slot(node.child_by_field_name("right"), id, node);
                id
            }
            "function_call_expression" => {
                let callee = node.child_by_field_name("function");
                let name = callee
                    .filter(|c| matches!(c.kind(), "name" | "qualified_name"))
                    .map(|c| self.text(c).trim_start_matches('\\').to_string());
                let args = node.child_by_field_name("arguments");
                let special = match name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("isset") => Some(NodeKind::Isset),
                    Some("unset") => Some(NodeKind::Unset),
                    Some("exit") | Some("die") => Some(NodeKind::Exit),
                    _ => None,
                };
                if let Some(kind) = special {
                    let id = self.push(parent, kind, node);
                    if let Some(args) = args {
                        for arg in named_children(args) {
                            let value = if arg.kind() == "argument" {
                                arg.named_child(0)
                            } else {
                                Some(arg)
                            };
                            if let Some(v) = value {
                                self.lower(v, id);
                            }
                        }
                    }
                    id
                } else {
                    let id = self.push(parent, NodeKind::Call { name }, node);
                    self.lower_slot(callee, id, node);
                    self.lower_arguments(args, id, node);
                    id
                }
            }
            "member_call_expression" | "nullsafe_member_call_expression" => {
                let name = node.child_by_field_name("name");
                let method = name
                    .filter(|n| n.kind() == "name")
                    .map(|n| self.text(n).to_string());
                let nullsafe = node.kind().starts_with("nullsafe");
                let id = self.push(parent, NodeKind::MemberCall { method, nullsafe }, node);
                self.lower_slot(node.child_by_field_name("object"), id, node);
                self.lower_member_name(name, id, node);
                self.lower_arguments(node.child_by_field_name("arguments"), id, node);
                id
            }
            "scoped_call_expression" => {
                let scope_node = node.child_by_field_name("scope");
                let scope = scope_node.map(|s| self.text(s).trim_start_matches('\\').to_string());
                let name = node.child_by_field_name("name");
                let method = name
                    .filter(|n| n.kind() == "name")
                    .map(|n| self.text(n).to_string());
                let id = self.push(parent, NodeKind::StaticCall { scope, method }, node);
                self.lower_member_name(scope_node, id, node);
                self.lower_member_name(name, id, node);
                self.lower_arguments(node.child_by_field_name("arguments"), id, node);
                id
            }
            "member_access_expression" | "nullsafe_member_access_expression" => {
                let name = node.child_by_field_name("name");
                let property = name
                    .filter(|n| n.kind() == "name")
                    .map(|n| self.text(n).to_string());
                let nullsafe = node.kind().starts_with("nullsafe");
                let id = self.push(parent, NodeKind::PropertyFetch { property, nullsafe }, node);
                self.lower_slot(node.child_by_field_name("object"), id, node);
                self.lower_member_name(name, id, node);
                id
            }
            "scoped_property_access_expression" => {
                let scope_node = node.child_by_field_name("scope");
                let scope = scope_node.map(|s| self.text(s).to_string());
                let name = node.child_by_field_name("name");
                let property = name.map(|n| self.text(n).trim_start_matches('$').to_string());
                let id = self.push(parent, NodeKind::StaticPropertyFetch { scope, property }, node);
                self.lower_member_name(scope_node, id, node);
                self.lower_slot(name, id, node);
                id
            }
            "subscript_expression" => {
                let id = self.push(parent, NodeKind::Subscript, node);
                self.lower_slot(node.named_child(0), id, node);
                if let Some(index) = node.named_child(1) {
                    self.lower_slot(Some(index), id, node);
                }
                id
            }
            "variable_name" => {
                let name = self.text(node).trim_start_matches('$').to_string();
                self.push(parent, NodeKind::Variable { name }, node)
            }
            "name" | "qualified_name" => {
                let value = self.text(node).to_string();
                self.push(parent, NodeKind::Name { value }, node)
            }
            "object_creation_expression" => {
                let class = named_children(node)
                    .into_iter()
                    .find(|c| matches!(c.kind(), "name" | "qualified_name"))
                    .map(|c| self.text(c).trim_start_matches('\\').to_string());
                let id = self.push(parent, NodeKind::New { class }, node);
                for c in named_children(node) {
                    if c.kind() == "arguments" {
                        self.lower_arguments(Some(c), id, node);
                    } else {
                        self.lower(c, id);
                    }
                }
                id
            }
            "clone_expression" => {
                let id = self.push(parent, NodeKind::Clone, node);
                self.lower_slot(node.named_child(0), id, node);
                id
            }
            "binary_expression" => {
                let op = node
                    .child_by_field_name("operator")
                    .or_else(|| node.child(1))
                    .map(|o| self.text(o).to_ascii_lowercase())
                    .unwrap_or_default();
                let id = self.push(parent, NodeKind::BinaryOp { op }, node);
                self.lower_slot(node.child_by_field_name("left"), id, node);
                self.lower_slot(node.child_by_field_name("right"), id, node);
                id
            }
            "cast_expression" => {
                let to = node
                    .child_by_field_name("type")
                    .map(|t| {
                        self.text(t)
                            .trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
                            .to_ascii_lowercase()
                    })
                    .unwrap_or_default();
                let value = node.child_by_field_name("value").or_else(|| {
                    node.named_child_count()
                        .checked_sub(1)
                        .and_then(|i| node.named_child(i))
                });
                let id = self.push(parent, NodeKind::Cast { to }, node);
                self.lower_slot(value, id, node);
                id
            }
            "parenthesized_expression" => {
                let id = self.push(parent, NodeKind::Paren, node);
                self.lower_slot(node.named_child(0), id, node);
                id
            }
            "echo_statement" => {
                let id = self.push(parent, NodeKind::Echo, node);
                let mut stack: Vec<_> = named_children(node).into_iter().rev().collect();
                while let Some(c) = stack.pop() {
                    if c.kind() == "sequence_expression" {
                        stack.extend(named_children(c).into_iter().rev());
                    } else {
                        self.lower(c, id);
                    }
                }
                id
            }
            "print_intrinsic" | "print_expression" => {
                let id = self.push(parent, NodeKind::Print, node);
                self.lower_slot(node.named_child(0), id, node);
                id
            }
            "encapsed_string" | "heredoc" => {
                let parts = self.interpolations(node);
                let constant = if parts.is_empty() { unquote(self.text(node)) } else { None };
                if let Some(value) = constant {
                    self.push(parent, NodeKind::Literal(Literal::Str(value)), node)
                } else {
                    let id = self.push(parent, NodeKind::Interpolated, node);
                    for p in parts {
                        self.lower(p, id);
                    }
                    id
                }
            }
            "string" | "nowdoc" | "integer" | "float" | "boolean" | "null" => {
                let lit = self
                    .literal(node)
                    .unwrap_or_else(|| Literal::Str(self.text(node).to_string()));
                self.push(parent, NodeKind::Literal(lit), node)
            }
            "array_creation_expression" => {
                let id = self.push(parent, NodeKind::ArrayLit, node);
                for element in named_children(node) {
                    if element.kind() != "array_element_initializer" {
                        self.lower(element, id);
                        continue;
                    }
                    let parts = named_children(element);
                    let has_key = parts.len() >= 2;
                    let key = if has_key {
                        match self.literal(parts[0]) {
                            Some(Literal::Str(s)) => Some(s),
                            Some(Literal::Int(i)) => Some(i.to_string()),
                            _ => None,
                        }
                    } else {
                        None
                    };
                    let el = self.push(id, NodeKind::ArrayElement { key, has_key }, element);
                    for p in parts.into_iter().take(2) {
                        self.lower_slot(Some(p), el, element);
                    }
                }
                id
            }
            "include_expression" | "include_once_expression" | "require_expression" | "require_once_expression" => {
                let kind = node.kind().trim_end_matches("_expression").to_string();
                let id = self.push(parent, NodeKind::Include { kind }, node);
                self.lower_slot(node.named_child(0), id, node);
                id
            }
            "unset_statement" => {
                let id = self.push(parent, NodeKind::Unset, node);
                self.lower_named_children(node, id);
                id
            }
            "exit_statement" => {
                let id = self.push(parent, NodeKind::Exit, node);
                self.lower_named_children(node, id);
                id
            }
            "throw_expression" | "throw_statement" => {
                let id = self.push(parent, NodeKind::Throw, node);
                self.lower_named_children(node, id);
                id
            }
            "return_statement" => {
                let id = self.push(parent, NodeKind::Return, node);
                self.lower_named_children(node, id);
                id
            }
            other => {
                let id = self.push(
                    parent,
                    NodeKind::Other {
                        kind: other.to_string(),
                    },
                    node,
                );
                self.lower_named_children(node, id);
                id
            }
        };
        Some(id)
    }
}
