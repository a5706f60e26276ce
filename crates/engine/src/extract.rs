//! Builds [`ClassEntity`] values from one parsed source unit.

use ir::{FileAst, Location, NodeId, NodeKind, Param, Visibility};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::catalog::{self, SinkTier};
use crate::model::{
    ArgRef, BodyRef, ClassEntity, DangerousCall, GuardValue, MagicKind, MethodEntity,
    PropertyEntity, PropertyGuard, SelfCall, SoftWarning,
};
use crate::scope::{is_this, namespace_of, this_property, unparen, MethodContext};
use crate::SourceUnit;

/// Classes found in one unit plus the problems met on the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub classes: Vec<ClassEntity>,
    pub warnings: Vec<SoftWarning>,
}

/// Extracts every named class of `unit`, matching magic method names
/// exactly.
pub fn extract_classes(unit: &SourceUnit) -> Extraction {
    extract_classes_with(unit, false)
}

pub fn extract_classes_with(unit: &SourceUnit, case_insensitive_magic: bool) -> Extraction {
    let ast = &unit.ast;
    let mut out = Extraction::default();
    for id in ast.find_all(ast.root(), |k| matches!(k, NodeKind::ClassDecl { .. })) {
        let mut extractor = ClassExtractor {
            unit,
            case_insensitive_magic,
            warnings: &mut out.warnings,
        };
        if let Some(class) = extractor.class(id) {
            debug!(
                file = %unit.file_id,
                class = %class.qualified_name(),
                magic = class.magic_methods.len(),
                "Extracted class"
            );
            out.classes.push(class);
        }
    }
    out
}

struct ClassExtractor<'a> {
    unit: &'a SourceUnit,
    case_insensitive_magic: bool,
    warnings: &'a mut Vec<SoftWarning>,
}

impl ClassExtractor<'_> {
    fn warn(&mut self, location: Option<Location>, message: String) {
        warn!(file = %self.unit.file_id, "{message}");
        self.warnings.push(SoftWarning {
            file_id: self.unit.file_id.clone(),
            location,
            message,
        });
    }

    fn class(&mut self, id: NodeId) -> Option<ClassEntity> {
        let unit = self.unit;
        let ast = &unit.ast;
        let location = ast.location_of(id).unwrap_or_default();
        let Some(NodeKind::ClassDecl {
            name,
            parent,
            interfaces,
            is_abstract,
        }) = ast.kind(id)
        else {
            return None;
        };
        let Some(name) = name.clone() else {
            self.warn(Some(location), "class declaration without a name skipped".into());
            return None;
        };
        let mut class = ClassEntity {
            name,
            namespace: namespace_of(ast, id),
            parent_name: parent.clone(),
            interface_names: interfaces.iter().cloned().collect::<BTreeSet<_>>(),
            properties: Vec::new(),
            magic_methods: BTreeMap::new(),
            regular_methods: Vec::new(),
            source_file_id: unit.file_id.clone(),
            location,
            is_abstract: *is_abstract,
        };
        let declared_in = class.qualified_name();

        for &member in ast.children(id) {
            match ast.kind(member) {
                Some(NodeKind::PropertyDecl {
                    visibility,
                    is_static,
                }) => {
                    for &element in ast.children(member) {
                        let Some(NodeKind::PropertyElement { name, default }) = ast.kind(element)
                        else {
                            continue;
                        };
                        class.properties.push(PropertyEntity {
                            name: name.clone(),
                            visibility: visibility.unwrap_or(Visibility::Public),
                            is_static: *is_static,
                            default: default.clone(),
                            declared_in: declared_in.clone(),
                            location: ast.location_of(element).unwrap_or_default(),
                        });
                    }
                }
                Some(NodeKind::MethodDecl { name, params, .. }) => {
                    if name.eq_ignore_ascii_case("__construct") {
                        promote_params(ast, member, params, &declared_in, &mut class.properties);
                    }
                    let method = self.method(member);
                    match method.magic_kind {
                        Some(kind) if class.magic_methods.contains_key(&kind) => {
                            self.warn(
                                Some(method.location),
                                format!("duplicate {kind} in {declared_in} ignored"),
                            );
                        }
                        Some(kind) => {
                            class.magic_methods.insert(kind, method);
                        }
                        None => class.regular_methods.push(method),
                    }
                }
                _ => {}
            }
        }
        mark_dangerous_local(&mut class);
        Some(class)
    }

    fn method(&self, id: NodeId) -> MethodEntity {
        let ast = &self.unit.ast;
        let location = ast.location_of(id).unwrap_or_default();
        let (name, visibility, is_static, is_abstract, params) = match ast.kind(id) {
            Some(NodeKind::MethodDecl {
                name,
                visibility,
                is_static,
                is_abstract,
                params,
            }) => (name.clone(), *visibility, *is_static, *is_abstract, params.clone()),
            _ => Default::default(),
        };
        let params: Vec<String> = params.into_iter().map(|p| p.name).collect();
        let has_body = !is_abstract && ast.child(id, 0).is_some();
        let mut method = MethodEntity {
            magic_kind: MagicKind::from_method_name(&name, self.case_insensitive_magic),
            name,
            visibility: visibility.unwrap_or(Visibility::Public),
            is_static,
            params,
            body: has_body.then(|| BodyRef {
                file_id: self.unit.file_id.clone(),
                node: id,
            }),
            location,
            dangerous_calls: Vec::new(),
            self_calls: Vec::new(),
            resets: Vec::new(),
            aborts: false,
            is_dangerous: false,
        };
        if has_body {
            collect_body_facts(ast, id, &mut method);
        }
        method
    }
}

fn promote_params(
    ast: &FileAst,
    method: NodeId,
    params: &[Param],
    declared_in: &str,
    properties: &mut Vec<PropertyEntity>,
) {
    for param in params {
        let Some(visibility) = param.promoted else {
            continue;
        };
        if properties.iter().any(|p| p.name == param.name) {
            continue;
        }
        properties.push(PropertyEntity {
            name: param.name.clone(),
            visibility,
            is_static: false,
            default: None,
            declared_in: declared_in.to_string(),
            location: ast.location_of(method).unwrap_or_default(),
        });
    }
}

/// Records dangerous calls, `$this` calls, property resets and aborts of
/// one method body.
fn collect_body_facts(ast: &FileAst, id: NodeId, method: &mut MethodEntity) {
    let ctx = MethodContext::new(ast, id, &method.params);
    for &n in &ctx.nodes {
        let location = ast.location_of(n).unwrap_or_default();
        match ast.kind(n) {
            Some(NodeKind::Call { name: Some(f) }) => {
                if let Some(spec) = catalog::sink(f) {
                    method.dangerous_calls.push(DangerousCall {
                        function: catalog::normalize_function(f),
                        tier: spec.tier,
                        location,
                        args: ctx.call_args(n, 1),
                        callee: None,
                        guards: property_guards(ast, n, id),
                    });
                }
            }
            Some(NodeKind::Call { name: None }) => {
                let callee = ast.child(n, 0).map_or(ArgRef::Other, |c| ctx.arg_ref(c));
                if callee.is_slot() {
                    method.dangerous_calls.push(DangerousCall {
                        function: "dynamic call".into(),
                        tier: SinkTier::CallbackInvocation,
                        location,
                        args: ctx.call_args(n, 1),
                        callee: Some(callee),
                        guards: property_guards(ast, n, id),
                    });
                }
            }
            Some(NodeKind::Include { kind }) => {
                method.dangerous_calls.push(DangerousCall {
                    function: kind.clone(),
                    tier: SinkTier::CodeExec,
                    location,
                    args: ast.child(n, 0).map(|c| ctx.arg_ref(c)).into_iter().collect(),
                    callee: None,
                    guards: property_guards(ast, n, id),
                });
            }
            Some(kind @ (NodeKind::Echo | NodeKind::Print)) if echoes_secret(ast, n) => {
                let guards = property_guards(ast, n, id);
                if !guards.is_empty() {
                    method.dangerous_calls.push(DangerousCall {
                        function: if matches!(kind, NodeKind::Echo) { "echo" } else { "print" }.into(),
                        tier: SinkTier::Disclosure,
                        location,
                        args: Vec::new(),
                        callee: None,
                        guards,
                    });
                }
            }
            Some(NodeKind::MemberCall {
                method: Some(m), ..
            }) if ast.child(n, 0).is_some_and(|o| is_this(ast, o)) => {
                method.self_calls.push(SelfCall {
                    method: m.clone(),
                    args: ctx.call_args(n, 2),
                    location,
                });
            }
            Some(NodeKind::StaticCall {
                scope: Some(scope),
                method: Some(m),
            }) if ["self", "static", "parent"]
                .iter()
                .any(|s| scope.eq_ignore_ascii_case(s)) =>
            {
                method.self_calls.push(SelfCall {
                    method: m.clone(),
                    args: ctx.call_args(n, 2),
                    location,
                });
            }
            Some(NodeKind::Assign { .. }) => {
                if let Some(p) = ast.child(n, 0).and_then(|lhs| this_property(ast, lhs)) {
                    if !method.resets.iter().any(|r| r == p) {
                        method.resets.push(p.to_string());
                    }
                }
            }
            Some(NodeKind::Throw) | Some(NodeKind::Exit) => method.aborts = true,
            _ => {}
        }
    }
}

/// Conditions of the `if` statements whose then-branch holds `node`,
/// innermost first. Stops at the method node.
fn property_guards(ast: &FileAst, node: NodeId, method: NodeId) -> Vec<PropertyGuard> {
    let mut out = Vec::new();
    let mut below = node;
    for a in ast.ancestors(node) {
        if a == method {
            break;
        }
        let is_if = matches!(ast.kind(a), Some(NodeKind::Other { kind }) if kind == "if_statement");
        if is_if && ast.child(a, 1) == Some(below) {
            if let Some(cond) = ast.child(a, 0) {
                let location = ast.location_of(a).unwrap_or_default();
                guard_conditions(ast, cond, location, &mut out);
            }
        }
        below = a;
    }
    out
}

fn guard_conditions(ast: &FileAst, id: NodeId, location: Location, out: &mut Vec<PropertyGuard>) {
    let id = unparen(ast, id);
    match ast.kind(id) {
        Some(NodeKind::BinaryOp { op }) if op == "&&" || op == "and" => {
            for &c in ast.children(id) {
                guard_conditions(ast, c, location, out);
            }
        }
        Some(NodeKind::BinaryOp { op }) if op == "==" || op == "===" => {
            let (Some(l), Some(r)) = (ast.child(id, 0), ast.child(id, 1)) else {
                return;
            };
            let (l, r) = (unparen(ast, l), unparen(ast, r));
            let (property, other) = match (this_property(ast, l), this_property(ast, r)) {
                (Some(p), None) => (p, r),
                (None, Some(p)) => (p, l),
                _ => return,
            };
            if let Some(NodeKind::Literal(lit)) = ast.kind(other) {
                if let Some(value) = GuardValue::from_literal(lit) {
                    out.push(PropertyGuard {
                        property: property.to_string(),
                        value,
                        location,
                    });
                }
            }
        }
        _ => {
            if let Some(p) = this_property(ast, id) {
                out.push(PropertyGuard {
                    property: p.to_string(),
                    value: GuardValue::Bool(true),
                    location,
                });
            }
        }
    }
}

/// Echoed text, variables or constants that name a secret.
fn echoes_secret(ast: &FileAst, echo: NodeId) -> bool {
    ast.find_all(echo, |k| match k {
        NodeKind::Literal(ir::Literal::Str(s)) => catalog::names_secret(s),
        NodeKind::Variable { name } => catalog::names_secret(name),
        NodeKind::Name { value } => catalog::names_secret(value),
        NodeKind::PropertyFetch { property: Some(p), .. } => catalog::names_secret(p),
        _ => false,
    })
    .into_iter()
    .next()
    .is_some()
}

/// Flags magic methods that reach a sink through the class's own methods.
/// Inherited helpers are taken into account later by the catalogue.
fn mark_dangerous_local(class: &mut ClassEntity) {
    let mut flags = Vec::new();
    for (kind, method) in &class.magic_methods {
        if !kind.can_be_dangerous() {
            continue;
        }
        let mut seen = HashSet::from([method.name.to_ascii_lowercase()]);
        let mut queue = vec![method];
        let mut dangerous = false;
        while let Some(m) = queue.pop() {
            if !m.dangerous_calls.is_empty() {
                dangerous = true;
                break;
            }
            for call in &m.self_calls {
                if seen.insert(call.method.to_ascii_lowercase()) {
                    if let Some(callee) = class.find_method(&call.method) {
                        queue.push(callee);
                    }
                }
            }
        }
        flags.push((*kind, dangerous));
    }
    for (kind, dangerous) in flags {
        if let Some(m) = class.magic_methods.get_mut(&kind) {
            m.is_dangerous = dangerous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(src: &str) -> SourceUnit {
        SourceUnit {
            file_id: "t.php".into(),
            ast: parsers::parse_php(src, "t.php").unwrap(),
        }
    }

    #[test]
    fn collects_properties_and_magic_methods() {
        let u = unit(
            r#"<?php
            namespace App\Log;
            class Logger extends Base implements Countable {
                private $logFile = '/tmp/log';
                protected static $count;
                var $data;
                public function __construct(private $sink) {}
                public function __wakeup() {
                    file_put_contents($this->logFile, $this->data);
                }
                function helper() {}
            }"#,
        );
        let ex = extract_classes(&u);
        assert!(ex.warnings.is_empty());
        let class = &ex.classes[0];
        assert_eq!(class.qualified_name(), "App\\Log\\Logger");
        assert_eq!(class.parent_name.as_deref(), Some("Base"));
        assert!(class.interface_names.contains("Countable"));

        let names: Vec<_> = class.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["logFile", "count", "data", "sink"]);
        assert_eq!(
            class.property("logFile").unwrap().serialized_key(),
            "\0App\\Log\\Logger\0logFile"
        );
        assert_eq!(class.property("data").unwrap().visibility, Visibility::Public);
        assert!(class.property("count").unwrap().is_static);

        let wakeup = &class.magic_methods[&MagicKind::Wakeup];
        assert!(wakeup.is_dangerous);
        assert_eq!(wakeup.dangerous_calls[0].function, "file_put_contents");
        assert_eq!(
            wakeup.dangerous_calls[0].args,
            [ArgRef::Property("logFile".into()), ArgRef::Property("data".into())]
        );
        assert_eq!(class.regular_methods.len(), 1);
    }

    #[test]
    fn magic_names_are_case_sensitive_unless_asked() {
        let u = unit("<?php class A { function __ToString() { return system($this->c); } }");
        assert!(extract_classes(&u).classes[0].magic_methods.is_empty());
        let relaxed = extract_classes_with(&u, true);
        assert!(relaxed.classes[0]
            .magic_methods
            .contains_key(&MagicKind::ToString));
    }

    #[test]
    fn follows_helpers_for_the_dangerous_flag() {
        let u = unit(
            r#"<?php class Job {
                public $cmd;
                function __destruct() { $this->run($this->cmd); }
                private function run($c) { exec($c); }
                function __invoke() { system($this->cmd); }
            }"#,
        );
        let class = &extract_classes(&u).classes[0];
        let destruct = &class.magic_methods[&MagicKind::Destruct];
        assert!(destruct.is_dangerous);
        assert_eq!(destruct.self_calls[0].args, [ArgRef::Property("cmd".into())]);
        // __invoke never marks a method dangerous on its own
        assert!(!class.magic_methods[&MagicKind::Invoke].is_dangerous);
    }

    #[test]
    fn records_dynamic_calls_resets_and_aborts() {
        let u = unit(
            r#"<?php class G {
                function __wakeup() { $this->fn = null; throw new Exception("no"); }
                function __call($n, $a) { $f = $this->fn; $f($a); }
            }"#,
        );
        let class = &extract_classes(&u).classes[0];
        let wakeup = &class.magic_methods[&MagicKind::Wakeup];
        assert_eq!(wakeup.resets, ["fn"]);
        assert!(wakeup.aborts);
        let call = &class.magic_methods[&MagicKind::Call].dangerous_calls[0];
        assert!(call.is_dynamic());
        assert_eq!(call.callee, Some(ArgRef::Property("fn".into())));
        assert_eq!(call.args, [ArgRef::Param(1)]);
    }

    #[test]
    fn guards_come_from_enclosing_then_branches() {
        let u = unit(
            r#"<?php class Gate {
                function __destruct() {
                    if ($this->role === 'admin') {
                        if (3 == $this->level && $this->ok) { system($this->cmd); }
                    } else {
                        echo $flag;
                    }
                    if ($this->debug) { echo "hello"; }
                    if ($this->show) { echo $this->password; }
                }
            }"#,
        );
        let class = &extract_classes(&u).classes[0];
        let calls = &class.magic_methods[&MagicKind::Destruct].dangerous_calls;
        assert_eq!(calls.len(), 2);
        let guards: Vec<(&str, &GuardValue)> = calls[0]
            .guards
            .iter()
            .map(|g| (g.property.as_str(), &g.value))
            .collect();
        assert_eq!(
            guards,
            [
                ("level", &GuardValue::Int(3)),
                ("ok", &GuardValue::Bool(true)),
                ("role", &GuardValue::Str("admin".into())),
            ]
        );
        // The else branch and the plain greeting are not guarded secrets.
        assert_eq!(calls[1].function, "echo");
        assert_eq!(calls[1].tier, SinkTier::Disclosure);
        assert_eq!(calls[1].guards[0].property, "show");
    }

    #[test]
    fn duplicate_magic_method_is_a_warning() {
        let u = unit("<?php class D { function __wakeup() {} function __wakeup() {} }");
        let ex = extract_classes(&u);
        assert_eq!(ex.classes.len(), 1);
        assert_eq!(ex.warnings.len(), 1);
    }
}
