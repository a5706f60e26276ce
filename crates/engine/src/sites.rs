//! Discovery of `unserialize()` calls and the provenance of their input.

use ir::{FileAst, Literal, Location, NodeId, NodeKind};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::catalog;
use crate::scope::{enclosing_scope, unparen};
use crate::taint::{build_taint_map, classify_source, first_argument, is_user_controlled, render, TaintMap, TaintSource};
use crate::SourceUnit;

const MAX_TRACE_STEPS: usize = 8;

/// The `allowed_classes` option of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "classes", rename_all = "snake_case")]
pub enum AllowedClasses {
    Any,
    /// `allowed_classes => false`: every object becomes
    /// `__PHP_Incomplete_Class`.
    None,
    Only(Vec<String>),
}

impl AllowedClasses {
    /// Whether objects of `class` (qualified name) survive deserialization.
    pub fn permits(&self, class: &str) -> bool {
        match self {
            AllowedClasses::Any => true,
            AllowedClasses::None => false,
            AllowedClasses::Only(list) => {
                let class = class.trim_start_matches('\\');
                list.iter()
                    .any(|c| c.trim_start_matches('\\').eq_ignore_ascii_case(class))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnserializeSite {
    pub file_id: String,
    pub location: Location,
    /// The argument as written.
    pub argument: String,
    pub source: TaintSource,
    pub user_controlled: bool,
    /// Decoding functions applied to the input, outermost first.
    pub wrappers: Vec<String>,
    /// Request parameter carrying the payload, such as `data` for
    /// `$_GET['data']`.
    pub param_name: Option<String>,
    pub allowed_classes: AllowedClasses,
}

impl UnserializeSite {
    /// The input goes through `base64_decode` before reaching `unserialize`.
    pub fn expects_base64(&self) -> bool {
        self.wrappers.iter().any(|w| w == "base64_decode")
    }
}

pub fn find_unserialize_sites(unit: &SourceUnit) -> Vec<UnserializeSite> {
    let ast = &unit.ast;
    let calls = ast.find_all(ast.root(), |k| {
        matches!(k, NodeKind::Call { name: Some(n) } if catalog::normalize_function(n) == "unserialize")
    });
    let mut maps: HashMap<NodeId, TaintMap> = HashMap::new();
    let mut out = Vec::new();
    for call in calls {
        let Some(arg) = first_argument(ast, call) else {
            continue;
        };
        let scope = enclosing_scope(ast, call);
        let map = maps
            .entry(scope)
            .or_insert_with(|| build_taint_map(ast, scope));
        let source = classify_source(ast, arg, map);
        let argument = render(ast, arg);
        let (wrappers, param_name) = trace(ast, arg, call, map);
        let user_controlled = source.is_user_controlled() || is_user_controlled(&argument);
        let site = UnserializeSite {
            file_id: unit.file_id.clone(),
            location: ast.location_of(call).unwrap_or_default(),
            argument,
            source,
            user_controlled,
            wrappers,
            param_name,
            allowed_classes: allowed_classes(ast, call),
        };
        debug!(
            file = %unit.file_id,
            line = site.location.line,
            source = %site.source,
            user_controlled = site.user_controlled,
            "Found unserialize call"
        );
        out.push(site);
    }
    out
}

/// Follows the argument back through decoders and variable assignments
/// made before `call`, collecting wrapper names and the request parameter.
fn trace(ast: &FileAst, arg: NodeId, call: NodeId, map: &TaintMap) -> (Vec<String>, Option<String>) {
    let mut wrappers = Vec::new();
    let mut param = None;
    let mut current = arg;
    for _ in 0..MAX_TRACE_STEPS {
        current = unparen(ast, current);
        match ast.kind(current) {
            Some(NodeKind::Call { name: Some(f) }) if catalog::is_wrapper(f) => {
                wrappers.push(catalog::normalize_function(f));
                match first_argument(ast, current) {
                    Some(inner) => current = inner,
                    None => break,
                }
            }
            Some(NodeKind::Variable { name }) if !catalog::is_superglobal(name) => {
                match map.var(name).filter(|f| f.origin < call) {
                    Some(fact) => current = fact.origin,
                    None => break,
                }
            }
            Some(NodeKind::Subscript) => {
                param = request_parameter(ast, current);
                break;
            }
            _ => break,
        }
    }
    (wrappers, param)
}

/// `data` for `$_GET['data']`.
fn request_parameter(ast: &FileAst, subscript: NodeId) -> Option<String> {
    let base = ast.child(subscript, 0)?;
    let index = ast.child(subscript, 1)?;
    match (ast.kind(base)?, ast.kind(index)?) {
        (NodeKind::Variable { name }, NodeKind::Literal(Literal::Str(key)))
            if catalog::is_superglobal(name) =>
        {
            Some(key.clone())
        }
        _ => None,
    }
}

fn allowed_classes(ast: &FileAst, call: NodeId) -> AllowedClasses {
    let Some(options) = ast.child(call, 1).and_then(|args| ast.child(args, 1)) else {
        return AllowedClasses::Any;
    };
    if !matches!(ast.kind(options), Some(NodeKind::ArrayLit)) {
        return AllowedClasses::Any;
    }
    let entry = ast.children(options).iter().copied().find(|&el| {
        matches!(
            ast.kind(el),
            Some(NodeKind::ArrayElement { key: Some(k), .. }) if k == "allowed_classes"
        )
    });
    let Some(value) = entry.and_then(|el| ast.children(el).last().copied()) else {
        return AllowedClasses::Any;
    };
    match ast.kind(value) {
        Some(NodeKind::Literal(Literal::Bool(false))) => AllowedClasses::None,
        Some(NodeKind::ArrayLit) => AllowedClasses::Only(
            ast.children(value)
                .iter()
                .filter_map(|&el| {
                    let v = ast.children(el).last().copied()?;
                    match ast.kind(v)? {
                        NodeKind::Literal(Literal::Str(s)) => Some(s.clone()),
                        NodeKind::Other { .. } => class_constant(ast, v),
                        _ => None,
                    }
                })
                .collect(),
        ),
        _ => AllowedClasses::Any,
    }
}

/// `Foo::class` lowered as an opaque node with a `Name` child.
fn class_constant(ast: &FileAst, id: NodeId) -> Option<String> {
    ast.children(id).iter().find_map(|&c| match ast.kind(c) {
        Some(NodeKind::Name { value }) if !value.eq_ignore_ascii_case("class") => {
            Some(value.trim_start_matches('\\').to_string())
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites(src: &str) -> Vec<UnserializeSite> {
        let unit = SourceUnit {
            file_id: "t.php".into(),
            ast: parsers::parse_php(src, "t.php").unwrap(),
        };
        find_unserialize_sites(&unit)
    }

    #[test]
    fn direct_request_input() {
        let found = sites("<?php $o = unserialize($_GET['data']);");
        assert_eq!(found.len(), 1);
        let site = &found[0];
        assert!(site.user_controlled);
        assert_eq!(site.source, TaintSource::Superglobal("$_GET".into()));
        assert_eq!(site.param_name.as_deref(), Some("data"));
        assert_eq!(site.allowed_classes, AllowedClasses::Any);
        assert!(!site.expects_base64());
    }

    #[test]
    fn traces_wrappers_through_variables() {
        let found = sites(
            r#"<?php
            function load() {
                $raw = $_COOKIE['session'];
                $blob = base64_decode($raw);
                return unserialize(gzuncompress($blob));
            }"#,
        );
        let site = &found[0];
        assert!(site.user_controlled);
        assert_eq!(site.wrappers, ["gzuncompress", "base64_decode"]);
        assert_eq!(site.param_name.as_deref(), Some("session"));
        assert!(site.expects_base64());
    }

    #[test]
    fn literal_input_is_not_controlled() {
        let found = sites(r#"<?php $x = unserialize('a:0:{}');"#);
        assert!(!found[0].user_controlled);
        assert_eq!(found[0].source, TaintSource::LiteralSafe);
    }

    #[test]
    fn reads_allowed_classes() {
        let found = sites(
            r#"<?php
            unserialize($_POST['a'], ['allowed_classes' => false]);
            unserialize($_POST['b'], ['allowed_classes' => ['Safe', 'App\Dto']]);
            unserialize($_POST['c'], ['max_depth' => 4]);
            "#,
        );
        assert_eq!(found[0].allowed_classes, AllowedClasses::None);
        assert!(!found[0].allowed_classes.permits("Logger"));
        assert!(found[1].allowed_classes.permits("safe"));
        assert!(found[1].allowed_classes.permits("\\App\\Dto"));
        assert!(!found[1].allowed_classes.permits("Logger"));
        assert_eq!(found[2].allowed_classes, AllowedClasses::Any);
    }
}
