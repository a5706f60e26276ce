//! Intra-scope taint tracking.
//!
//! One forward pass over the assignments of a scope, without fixpoint
//! iteration: a variable carries the source of the last value assigned to
//! it, and `.=` can only add taint.

use ir::{AssignOp, FileAst, Location, NodeId, NodeKind};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::catalog;
use crate::scope::{literal_text, scope_nodes, unparen};

/// Origin of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TaintSource {
    /// Request superglobal, stored with its `$`.
    Superglobal(String),
    /// Call to a function returning external data, stored as `name()`.
    SourceFunction(String),
    LiteralSafe,
    Unknown,
}

impl TaintSource {
    pub fn label(&self) -> String {
        match self {
            TaintSource::Superglobal(s) | TaintSource::SourceFunction(s) => s.clone(),
            TaintSource::LiteralSafe => "literal".into(),
            TaintSource::Unknown => "unknown".into(),
        }
    }

    pub fn is_user_controlled(&self) -> bool {
        is_user_controlled(&self.label())
    }
}

impl std::fmt::Display for TaintSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintKey {
    Var(String),
    /// `$object->property`, keyed by the variable holding the object.
    Prop { object: String, property: String },
}

impl std::fmt::Display for TaintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaintKey::Var(v) => write!(f, "${v}"),
            TaintKey::Prop { object, property } => write!(f, "${object}->{property}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaintFact {
    pub key: TaintKey,
    pub source: TaintSource,
    pub location: Location,
    /// Right-hand side of the assignment that produced the fact.
    pub origin: NodeId,
}

/// Taint state of one scope after its forward pass.
#[derive(Debug, Clone, Default)]
pub struct TaintMap {
    vars: HashMap<String, TaintFact>,
    props: HashMap<(String, String), TaintFact>,
}

impl TaintMap {
    pub fn var(&self, name: &str) -> Option<&TaintFact> {
        self.vars.get(name)
    }

    pub fn prop(&self, object: &str, property: &str) -> Option<&TaintFact> {
        self.props.get(&(object.to_string(), property.to_string()))
    }

    /// Every fact, in source order.
    pub fn facts(&self) -> Vec<&TaintFact> {
        let mut out: Vec<_> = self.vars.values().chain(self.props.values()).collect();
        out.sort_by_key(|f| (f.location.line, f.location.column, f.origin));
        out
    }

    pub fn len(&self) -> usize {
        self.vars.len() + self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&mut self, key: TaintKey, source: TaintSource, location: Location, origin: NodeId) {
        let fact = TaintFact {
            key: key.clone(),
            source,
            location,
            origin,
        };
        match key {
            TaintKey::Var(v) => {
                self.vars.insert(v, fact);
            }
            TaintKey::Prop { object, property } => {
                self.props.insert((object, property), fact);
            }
        }
    }
}

/// Runs the forward pass over the assignments of `scope`, which is a
/// method, function, closure or the program root.
pub fn build_taint_map(ast: &FileAst, scope: NodeId) -> TaintMap {
    let mut map = TaintMap::default();
    for id in scope_nodes(ast, scope) {
        let Some(NodeKind::Assign { op }) = ast.kind(id) else {
            continue;
        };
        let (Some(lhs), Some(rhs)) = (ast.child(id, 0), ast.child(id, 1)) else {
            continue;
        };
        let source = classify_source(ast, rhs, &map);
        let location = ast.location_of(id).unwrap_or_default();
        let tainted = source.is_user_controlled();
        match (op, ast.kind(lhs)) {
            (AssignOp::Plain | AssignOp::Ref, Some(NodeKind::Variable { name })) if name != "this" => {
                map.record(TaintKey::Var(name.clone()), source, location, rhs);
            }
            (AssignOp::Concat, Some(NodeKind::Variable { name })) if tainted => {
                map.record(TaintKey::Var(name.clone()), source, location, rhs);
            }
            (AssignOp::Plain | AssignOp::Ref | AssignOp::Concat, Some(NodeKind::Subscript)) if tainted => {
                if let Some(base) = subscript_base(ast, lhs) {
                    map.record(TaintKey::Var(base), source, location, rhs);
                }
            }
            (
                AssignOp::Plain | AssignOp::Ref | AssignOp::Concat,
                Some(NodeKind::PropertyFetch {
                    property: Some(property),
                    ..
                }),
            ) => {
                let object = ast.child(lhs, 0).and_then(|o| match ast.kind(o) {
                    Some(NodeKind::Variable { name }) => Some(name.clone()),
                    _ => None,
                });
                if let Some(object) = object {
                    if *op != AssignOp::Concat || tainted {
                        let key = TaintKey::Prop {
                            object,
                            property: property.clone(),
                        };
                        map.record(key, source, location, rhs);
                    }
                }
            }
            _ => {}
        }
    }
    map
}

/// Innermost variable written through `$a['x']['y'] = ...`.
fn subscript_base(ast: &FileAst, mut id: NodeId) -> Option<String> {
    loop {
        match ast.kind(id)? {
            NodeKind::Subscript => id = ast.child(id, 0)?,
            NodeKind::Variable { name } => return Some(name.clone()),
            _ => return None,
        }
    }
}

/// Where the value of `expr` comes from, given the facts gathered so far.
pub fn classify_source(ast: &FileAst, expr: NodeId, map: &TaintMap) -> TaintSource {
    let expr = unparen(ast, expr);
    match ast.kind(expr) {
        Some(NodeKind::Variable { name }) => {
            if catalog::is_superglobal(name) {
                TaintSource::Superglobal(format!("${name}"))
            } else {
                map.var(name)
                    .map(|f| f.source.clone())
                    .unwrap_or(TaintSource::Unknown)
            }
        }
        Some(NodeKind::Subscript) | Some(NodeKind::Cast { .. }) => ast
            .child(expr, 0)
            .map_or(TaintSource::Unknown, |c| classify_source(ast, c, map)),
        Some(NodeKind::Assign { .. }) => ast
            .child(expr, 1)
            .map_or(TaintSource::Unknown, |c| classify_source(ast, c, map)),
        Some(NodeKind::Call { name: Some(f) }) => {
            if catalog::is_source_function(f) {
                TaintSource::SourceFunction(format!("{}()", catalog::normalize_function(f)))
            } else if catalog::is_wrapper(f) {
                first_argument(ast, expr)
                    .map_or(TaintSource::Unknown, |a| classify_source(ast, a, map))
            } else {
                TaintSource::Unknown
            }
        }
        Some(NodeKind::BinaryOp { op }) if op == "." => {
            let parts: Vec<TaintSource> = ast
                .children(expr)
                .iter()
                .map(|&c| classify_source(ast, c, map))
                .collect();
            merge(parts)
        }
        Some(NodeKind::Interpolated) => {
            let parts: Vec<TaintSource> = ast
                .children(expr)
                .iter()
                .map(|&c| classify_source(ast, c, map))
                .collect();
            merge(parts)
        }
        Some(NodeKind::PropertyFetch {
            property: Some(property),
            ..
        }) => {
            let object = ast.child(expr, 0).and_then(|o| match ast.kind(o) {
                Some(NodeKind::Variable { name }) => Some(name.as_str()),
                _ => None,
            });
            object
                .and_then(|o| map.prop(o, property))
                .map(|f| f.source.clone())
                .unwrap_or(TaintSource::Unknown)
        }
        Some(NodeKind::Literal(_)) => TaintSource::LiteralSafe,
        _ => TaintSource::Unknown,
    }
}

/// Concatenation: the leftmost controlled part wins; all-literal stays safe.
fn merge(parts: Vec<TaintSource>) -> TaintSource {
    if let Some(tainted) = parts.iter().find(|s| s.is_user_controlled()) {
        return tainted.clone();
    }
    if !parts.is_empty() && parts.iter().all(|s| *s == TaintSource::LiteralSafe) {
        TaintSource::LiteralSafe
    } else {
        TaintSource::Unknown
    }
}

pub(crate) fn first_argument(ast: &FileAst, call: NodeId) -> Option<NodeId> {
    ast.child(call, 1).and_then(|args| ast.child(args, 0))
}

fn superglobal_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let names = catalog::superglobals().join("|");
        Regex::new(&format!(r"^\$?(?:{names})\b")).ok()
    })
    .as_ref()
}

fn call_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^\\?([A-Za-z_][A-Za-z0-9_\\]*)\s*\((.*)\)$").ok())
        .as_ref()
}

/// Whether a source label or a rendered expression denotes attacker input:
/// a request superglobal, a call to an input-reading function, or either of
/// those wrapped in decoders.
///
/// # Example
/// ```
/// use engine::is_user_controlled;
/// assert!(is_user_controlled("$_GET['data']"));
/// assert!(is_user_controlled("base64_decode($_GET['data'])"));
/// assert!(is_user_controlled("file_get_contents()"));
/// assert!(!is_user_controlled("\"safe\""));
/// ```
pub fn is_user_controlled(source: &str) -> bool {
    let mut text = source.trim().trim_end_matches(';').trim();
    for _ in 0..16 {
        while let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            text = inner.trim();
        }
        if superglobal_re().is_some_and(|re| re.is_match(text)) {
            return true;
        }
        let Some(caps) = call_re().and_then(|re| re.captures(text)) else {
            return false;
        };
        let (Some(name), Some(args)) = (caps.get(1), caps.get(2)) else {
            return false;
        };
        if catalog::is_source_function(name.as_str()) {
            return true;
        }
        if !catalog::is_wrapper(name.as_str()) {
            return false;
        }
        text = args.as_str().trim();
    }
    false
}

/// Compact source-like rendering of an expression, for narratives.
pub fn render(ast: &FileAst, id: NodeId) -> String {
    match ast.kind(id) {
        Some(NodeKind::Variable { name }) => format!("${name}"),
        Some(NodeKind::Name { value }) => value.clone(),
        Some(NodeKind::Literal(ir::Literal::Str(s))) => format!("'{s}'"),
        Some(NodeKind::Literal(lit)) => literal_text(lit),
        Some(NodeKind::Subscript) => {
            let base = ast.child(id, 0).map(|b| render(ast, b)).unwrap_or_default();
            let index = ast.child(id, 1).map(|i| render(ast, i)).unwrap_or_default();
            format!("{base}[{index}]")
        }
        Some(NodeKind::PropertyFetch { property, .. }) => {
            let object = ast.child(id, 0).map(|o| render(ast, o)).unwrap_or_default();
            format!("{object}->{}", property.as_deref().unwrap_or("{expr}"))
        }
        Some(NodeKind::Call { name }) => {
            let callee = name
                .clone()
                .or_else(|| ast.child(id, 0).map(|c| render(ast, c)))
                .unwrap_or_default();
            let args: Vec<String> = ast
                .child(id, 1)
                .map(|a| ast.children(a).iter().map(|&c| render(ast, c)).collect())
                .unwrap_or_default();
            format!("{callee}({})", args.join(", "))
        }
        Some(NodeKind::BinaryOp { op }) => {
            let parts: Vec<String> = ast.children(id).iter().map(|&c| render(ast, c)).collect();
            parts.join(&format!(" {op} "))
        }
        Some(NodeKind::Paren) => {
            format!("({})", ast.child(id, 0).map(|c| render(ast, c)).unwrap_or_default())
        }
        Some(NodeKind::Cast { to }) => {
            format!("({to}) {}", ast.child(id, 0).map(|c| render(ast, c)).unwrap_or_default())
        }
        Some(other) => format!("<{}>", other.name().to_ascii_lowercase()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(src: &str) -> (FileAst, TaintMap) {
        let ast = parsers::parse_php(src, "t.php").unwrap();
        let map = build_taint_map(&ast, ast.root());
        (ast, map)
    }

    #[test]
    fn superglobal_and_source_functions() {
        let (_, map) = map_of(
            "<?php $a = $_GET['data']; $b = file_get_contents('php://input'); $c = 'safe';",
        );
        assert_eq!(map.var("a").unwrap().source, TaintSource::Superglobal("$_GET".into()));
        assert_eq!(
            map.var("b").unwrap().source,
            TaintSource::SourceFunction("file_get_contents()".into())
        );
        assert_eq!(map.var("c").unwrap().source, TaintSource::LiteralSafe);
        assert!(!map.var("c").unwrap().source.is_user_controlled());
    }

    #[test]
    fn propagation_through_variables_wrappers_and_concat() {
        let (_, map) = map_of(
            r#"<?php
            $raw = $_COOKIE['s'];
            $dec = base64_decode($raw);
            $msg = "prefix" . $dec;
            $twice = $_POST['x'] . $_GET['y'];
            "#,
        );
        assert_eq!(map.var("dec").unwrap().source, TaintSource::Superglobal("$_COOKIE".into()));
        assert_eq!(map.var("msg").unwrap().source, TaintSource::Superglobal("$_COOKIE".into()));
        // left operand wins
        assert_eq!(map.var("twice").unwrap().source, TaintSource::Superglobal("$_POST".into()));
    }

    #[test]
    fn reassignment_clears_and_concat_assign_adds() {
        let (_, map) = map_of(
            r#"<?php
            $a = $_GET['a'];
            $a = 'fixed';
            $b = 'x';
            $b .= $_REQUEST['b'];
            $c = $_GET['c'];
            $c .= 'suffix';
            "#,
        );
        assert_eq!(map.var("a").unwrap().source, TaintSource::LiteralSafe);
        assert_eq!(map.var("b").unwrap().source, TaintSource::Superglobal("$_REQUEST".into()));
        assert_eq!(map.var("c").unwrap().source, TaintSource::Superglobal("$_GET".into()));
    }

    #[test]
    fn property_writes_are_tracked() {
        let (ast, map) = map_of("<?php $o->name = $_GET['n']; $v = $o->name;");
        assert_eq!(
            map.prop("o", "name").unwrap().source,
            TaintSource::Superglobal("$_GET".into())
        );
        assert!(map.var("v").unwrap().source.is_user_controlled());
        assert_eq!(map.facts().len(), 2);
        assert_eq!(render(&ast, map.var("v").unwrap().origin), "$o->name");
    }

    #[test]
    fn function_scopes_are_separate() {
        let (ast, map) = map_of("<?php function f() { $in = $_GET['q']; } $out = 1;");
        assert!(map.var("in").is_none());
        let f = ast.find_by_kind(ast.root(), "FunctionDecl")[0];
        let inner = build_taint_map(&ast, f);
        assert!(inner.var("in").is_some());
    }

    #[test]
    fn user_controlled_labels() {
        assert!(is_user_controlled("$_GET['data']"));
        assert!(is_user_controlled("_SERVER"));
        assert!(is_user_controlled("base64_decode($_GET['data'])"));
        assert!(is_user_controlled("gzuncompress(base64_decode($_COOKIE['x']))"));
        assert!(is_user_controlled("fread()"));
        assert!(!is_user_controlled("\"safe\""));
        assert!(!is_user_controlled("'safe'"));
        assert!(!is_user_controlled("$_GETTER"));
        assert!(!is_user_controlled("md5($_GET['x'])"));
        assert!(!is_user_controlled("unknown"));
    }
}
