//! Gadget catalogue entities.

use ir::{Literal, Location, NodeId, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

use crate::catalog::SinkTier;
use crate::serialize::encode_property_key;

/// Magic methods the PHP runtime invokes implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MagicKind {
    Construct,
    Destruct,
    Call,
    CallStatic,
    Get,
    Set,
    Isset,
    Unset,
    Sleep,
    Wakeup,
    Serialize,
    Unserialize,
    ToString,
    Invoke,
    SetState,
    Clone,
    DebugInfo,
}

impl MagicKind {
    pub const ALL: [MagicKind; 17] = [
        MagicKind::Construct,
        MagicKind::Destruct,
        MagicKind::Call,
        MagicKind::CallStatic,
        MagicKind::Get,
        MagicKind::Set,
        MagicKind::Isset,
        MagicKind::Unset,
        MagicKind::Sleep,
        MagicKind::Wakeup,
        MagicKind::Serialize,
        MagicKind::Unserialize,
        MagicKind::ToString,
        MagicKind::Invoke,
        MagicKind::SetState,
        MagicKind::Clone,
        MagicKind::DebugInfo,
    ];

    pub fn method_name(&self) -> &'static str {
        match self {
            MagicKind::Construct => "__construct",
            MagicKind::Destruct => "__destruct",
            MagicKind::Call => "__call",
            MagicKind::CallStatic => "__callStatic",
            MagicKind::Get => "__get",
            MagicKind::Set => "__set",
            MagicKind::Isset => "__isset",
            MagicKind::Unset => "__unset",
            MagicKind::Sleep => "__sleep",
            MagicKind::Wakeup => "__wakeup",
            MagicKind::Serialize => "__serialize",
            MagicKind::Unserialize => "__unserialize",
            MagicKind::ToString => "__toString",
            MagicKind::Invoke => "__invoke",
            MagicKind::SetState => "__set_state",
            MagicKind::Clone => "__clone",
            MagicKind::DebugInfo => "__debugInfo",
        }
    }

    /// Recognizes a magic method by name.
    ///
    /// # Example
    /// ```
    /// use engine::MagicKind;
    /// assert_eq!(MagicKind::from_method_name("__toString", false), Some(MagicKind::ToString));
    /// assert_eq!(MagicKind::from_method_name("__tostring", false), None);
    /// assert_eq!(MagicKind::from_method_name("__tostring", true), Some(MagicKind::ToString));
    /// ```
    pub fn from_method_name(name: &str, case_insensitive: bool) -> Option<Self> {
        MagicKind::ALL.into_iter().find(|k| {
            if case_insensitive {
                k.method_name().eq_ignore_ascii_case(name)
            } else {
                k.method_name() == name
            }
        })
    }

    /// Runtime event that makes PHP call this method.
    pub fn trigger_description(&self) -> &'static str {
        match self {
            MagicKind::Construct => "object construction",
            MagicKind::Destruct => "object destruction, automatic after unserialize",
            MagicKind::Call => "call of an inaccessible method",
            MagicKind::CallStatic => "static call of an inaccessible method",
            MagicKind::Get => "read of an inaccessible property",
            MagicKind::Set => "write to an inaccessible property",
            MagicKind::Isset => "isset() on an inaccessible property",
            MagicKind::Unset => "unset() on an inaccessible property",
            MagicKind::Sleep => "serialize()",
            MagicKind::Wakeup => "unserialize(), before any other method",
            MagicKind::Serialize => "serialize() on PHP 7.4+",
            MagicKind::Unserialize => "unserialize() on PHP 7.4+",
            MagicKind::ToString => "use of the object as a string",
            MagicKind::Invoke => "call of the object as a function",
            MagicKind::SetState => "var_export()",
            MagicKind::Clone => "clone of the object",
            MagicKind::DebugInfo => "var_dump()",
        }
    }

    /// Entry points reachable straight out of `unserialize`.
    pub fn is_entry(&self) -> bool {
        matches!(self, MagicKind::Wakeup | MagicKind::Destruct)
    }

    /// Kinds that can mark a gadget as dangerous.
    pub fn can_be_dangerous(&self) -> bool {
        matches!(
            self,
            MagicKind::Wakeup | MagicKind::Destruct | MagicKind::ToString | MagicKind::Call
        )
    }
}

impl std::fmt::Display for MagicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}

/// Method occupying one step of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum GadgetMethod {
    Magic(MagicKind),
    Regular(String),
}

impl GadgetMethod {
    pub fn name(&self) -> &str {
        match self {
            GadgetMethod::Magic(k) => k.method_name(),
            GadgetMethod::Regular(n) => n,
        }
    }

    pub fn magic(&self) -> Option<MagicKind> {
        match self {
            GadgetMethod::Magic(k) => Some(*k),
            GadgetMethod::Regular(_) => None,
        }
    }
}

impl std::fmt::Display for GadgetMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What an expression inside a method refers to, as far as the attacker is
/// concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgRef {
    /// `$this->name`, set by the attacker in the serialized object.
    Property(String),
    /// Positional parameter of the enclosing method.
    Param(usize),
    /// Request data such as `$_GET`.
    Tainted(String),
    Literal(String),
    Other,
}

impl ArgRef {
    pub fn is_slot(&self) -> bool {
        matches!(self, ArgRef::Property(_) | ArgRef::Param(_))
    }

    /// Rewrites a parameter reference through the arguments a caller passed.
    pub fn remap(&self, params: &[ArgRef]) -> ArgRef {
        match self {
            ArgRef::Param(i) => params.get(*i).cloned().unwrap_or(ArgRef::Other),
            other => other.clone(),
        }
    }
}

impl std::fmt::Display for ArgRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgRef::Property(p) => write!(f, "$this->{p}"),
            ArgRef::Param(i) => write!(f, "param #{i}"),
            ArgRef::Tainted(s) => f.write_str(s),
            ArgRef::Literal(s) => write!(f, "'{s}'"),
            ArgRef::Other => f.write_str("<expr>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntity {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub default: Option<Literal>,
    /// Class that declares the property; private keys embed it.
    pub declared_in: String,
    pub location: Location,
}

impl PropertyEntity {
    /// Key PHP writes for this property in serialized form.
    pub fn serialized_key(&self) -> String {
        encode_property_key(self.visibility, &self.declared_in, &self.name)
    }
}

/// Scalar an `if` compares a property against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GuardValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl GuardValue {
    /// `None` for floats.
    pub fn from_literal(lit: &Literal) -> Option<Self> {
        match lit {
            Literal::Null => Some(GuardValue::Null),
            Literal::Bool(b) => Some(GuardValue::Bool(*b)),
            Literal::Int(i) => Some(GuardValue::Int(*i)),
            Literal::Str(s) => Some(GuardValue::Str(s.clone())),
            Literal::Float(_) => None,
        }
    }
}

impl std::fmt::Display for GuardValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardValue::Null => f.write_str("null"),
            GuardValue::Bool(b) => write!(f, "{b}"),
            GuardValue::Int(i) => write!(f, "{i}"),
            GuardValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

/// `if ($this->property == value)` around a call. A bare `if ($this->p)`
/// is recorded as a comparison with `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyGuard {
    pub property: String,
    pub value: GuardValue,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerousCall {
    pub function: String,
    pub tier: SinkTier,
    pub location: Location,
    pub args: Vec<ArgRef>,
    /// Callee of a dynamic call such as `($this->fn)($x)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee: Option<ArgRef>,
    /// Conditions on the object that must hold for the call to run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards: Vec<PropertyGuard>,
}

impl DangerousCall {
    pub fn is_dynamic(&self) -> bool {
        self.callee.is_some()
    }
}

/// `$this->method(args)` inside a method body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfCall {
    pub method: String,
    pub args: Vec<ArgRef>,
    pub location: Location,
}

/// Where a method body lives: the file's AST and the method node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRef {
    pub file_id: String,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntity {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub magic_kind: Option<MagicKind>,
    pub params: Vec<String>,
    /// `None` for abstract methods.
    pub body: Option<BodyRef>,
    pub location: Location,
    pub dangerous_calls: Vec<DangerousCall>,
    pub self_calls: Vec<SelfCall>,
    /// Properties assigned through `$this->prop = ...`.
    pub resets: Vec<String>,
    /// Body throws or calls `exit`/`die`.
    pub aborts: bool,
    pub is_dangerous: bool,
}

impl MethodEntity {
    pub fn gadget_method(&self) -> GadgetMethod {
        match self.magic_kind {
            Some(k) => GadgetMethod::Magic(k),
            None => GadgetMethod::Regular(self.name.clone()),
        }
    }

    /// Callable from outside the object.
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntity {
    pub name: String,
    pub namespace: Option<String>,
    pub parent_name: Option<String>,
    pub interface_names: BTreeSet<String>,
    pub properties: Vec<PropertyEntity>,
    pub magic_methods: BTreeMap<MagicKind, MethodEntity>,
    pub regular_methods: Vec<MethodEntity>,
    pub source_file_id: String,
    pub location: Location,
    pub is_abstract: bool,
}

impl ClassEntity {
    /// Fully qualified name, as written in serialized payloads.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}\\{}", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodEntity> {
        self.magic_methods.values().chain(self.regular_methods.iter())
    }

    /// Declared method by name; PHP method names ignore case.
    pub fn find_method(&self, name: &str) -> Option<&MethodEntity> {
        self.methods().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn method(&self, method: &GadgetMethod) -> Option<&MethodEntity> {
        match method {
            GadgetMethod::Magic(k) => self.magic_methods.get(k),
            GadgetMethod::Regular(n) => self.find_method(n),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyEntity> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Non-fatal problem met while extracting the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftWarning {
    pub file_id: String,
    pub location: Option<Location>,
    pub message: String,
}

impl std::fmt::Display for SoftWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{}:{}: {}", self.file_id, loc, self.message),
            None => write!(f, "{}: {}", self.file_id, self.message),
        }
    }
}

/// Method reached from a chain step through `$this->helper()` calls.
#[derive(Debug, Clone)]
pub struct Reached<'a> {
    pub class: &'a ClassEntity,
    pub method: &'a MethodEntity,
    /// What each parameter of `method` refers to in the step method.
    pub params: Vec<ArgRef>,
}

const MAX_REACHED_METHODS: usize = 32;

/// Merged view of every class in the analysed sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalogue {
    classes: Vec<ClassEntity>,
    /// Lowercased qualified name to index.
    #[serde(skip)]
    by_name: HashMap<String, usize>,
    /// Lowercased short name to every class carrying it.
    #[serde(skip)]
    by_short: HashMap<String, Vec<usize>>,
    warnings: Vec<SoftWarning>,
}

fn qualified_key(name: &str) -> String {
    name.trim_start_matches('\\').to_ascii_lowercase()
}

fn short_key(name: &str) -> String {
    let name = name.trim_start_matches('\\');
    name.rsplit('\\').next().unwrap_or(name).to_ascii_lowercase()
}

impl Catalogue {
    /// Builds the catalogue. The first definition of a qualified class name
    /// wins; later ones are reported as warnings.
    pub fn new(classes: impl IntoIterator<Item = ClassEntity>) -> Self {
        let mut cat = Catalogue::default();
        for class in classes {
            let qualified = class.qualified_name();
            let key = qualified_key(&qualified);
            if let Some(&existing) = cat.by_name.get(&key) {
                let first = &cat.classes[existing];
                let message = format!(
                    "duplicate class {} ignored, first defined in {}",
                    qualified, first.source_file_id
                );
                warn!(class = %qualified, file = %class.source_file_id, "Duplicate class definition");
                cat.warnings.push(SoftWarning {
                    file_id: class.source_file_id.clone(),
                    location: Some(class.location),
                    message,
                });
                continue;
            }
            let index = cat.classes.len();
            cat.by_name.insert(key, index);
            cat.by_short.entry(short_key(&class.name)).or_default().push(index);
            cat.classes.push(class);
        }
        cat.mark_dangerous();
        cat
    }

    pub fn classes(&self) -> &[ClassEntity] {
        &self.classes
    }

    pub fn warnings(&self) -> &[SoftWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class by qualified name, ignoring case. A bare name with no global
    /// class of that name resolves only when one class carries it.
    ///
    /// # Example
    /// ```
    /// use engine::{extract_classes, Catalogue, SourceUnit};
    /// let src = "<?php namespace A; class Logger {} namespace B; class Logger {} class Only {}";
    /// let unit = SourceUnit::new("a.php", parsers::parse_php(src, "a.php").unwrap());
    /// let cat = Catalogue::new(extract_classes(&unit).classes);
    /// assert_eq!(cat.len(), 3);
    /// assert_eq!(cat.get("b\\logger").unwrap().qualified_name(), "B\\Logger");
    /// assert!(cat.get("Logger").is_none());
    /// assert_eq!(cat.get("Only").unwrap().qualified_name(), "B\\Only");
    /// ```
    pub fn get(&self, name: &str) -> Option<&ClassEntity> {
        if let Some(&i) = self.by_name.get(&qualified_key(name)) {
            return self.classes.get(i);
        }
        if name.trim_start_matches('\\').contains('\\') {
            return None;
        }
        self.unique_short(name)
    }

    fn unique_short(&self, name: &str) -> Option<&ClassEntity> {
        match self.by_short.get(&short_key(name)).map(Vec::as_slice) {
            Some([only]) => self.classes.get(*only),
            _ => None,
        }
    }

    /// Resolves a class reference written inside `namespace`, the way PHP
    /// does for names without `use` imports: `\X` is fully qualified,
    /// other names are relative to the namespace. Falls back to the global
    /// class, then to a short name carried by a single class.
    pub fn resolve_in(&self, namespace: Option<&str>, name: &str) -> Option<&ClassEntity> {
        if name.starts_with('\\') {
            return self.by_name.get(&qualified_key(name)).and_then(|&i| self.classes.get(i));
        }
        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            if let Some(&i) = self.by_name.get(&qualified_key(&format!("{ns}\\{name}"))) {
                return self.classes.get(i);
            }
        }
        if let Some(&i) = self.by_name.get(&qualified_key(name)) {
            return self.classes.get(i);
        }
        self.unique_short(name)
    }

    /// Parent class of `class`, resolved against its namespace.
    pub fn parent_of(&self, class: &ClassEntity) -> Option<&ClassEntity> {
        class
            .parent_name
            .as_deref()
            .and_then(|p| self.resolve_in(class.namespace.as_deref(), p))
    }

    /// Classes that can be instantiated by `unserialize`.
    pub fn concrete(&self) -> impl Iterator<Item = &ClassEntity> {
        self.classes.iter().filter(|c| !c.is_abstract)
    }

    /// `class` followed by its known ancestors, nearest first. Stops at
    /// unknown parents and at inheritance cycles.
    pub fn ancestors<'a>(&'a self, class: &'a ClassEntity) -> Vec<&'a ClassEntity> {
        let mut out = vec![class];
        let mut seen = HashSet::from([qualified_key(&class.qualified_name())]);
        let mut current = class;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(qualified_key(&parent.qualified_name())) {
                break;
            }
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Finds `method` on `class` or the nearest ancestor defining it.
    /// Returns the declaring class with the method.
    pub fn resolve_method<'a>(
        &'a self,
        class: &'a ClassEntity,
        method: &GadgetMethod,
    ) -> Option<(&'a ClassEntity, &'a MethodEntity)> {
        self.ancestors(class)
            .into_iter()
            .find_map(|c| c.method(method).map(|m| (c, m)))
    }

    pub fn resolve_named<'a>(
        &'a self,
        class: &'a ClassEntity,
        name: &str,
    ) -> Option<(&'a ClassEntity, &'a MethodEntity)> {
        self.ancestors(class)
            .into_iter()
            .find_map(|c| c.find_method(name).map(|m| (c, m)))
    }

    /// Non-static properties an instance of `class` carries, inherited ones
    /// included, in PHP's declaration order (root ancestor first). A
    /// redeclared public or protected property replaces the inherited one;
    /// private properties of ancestors keep their own slot.
    pub fn all_properties<'a>(&'a self, class: &'a ClassEntity) -> Vec<&'a PropertyEntity> {
        let mut out: Vec<&PropertyEntity> = Vec::new();
        for c in self.ancestors(class).into_iter().rev() {
            for prop in c.properties.iter().filter(|p| !p.is_static) {
                if prop.visibility == Visibility::Private {
                    out.push(prop);
                    continue;
                }
                match out
                    .iter()
                    .position(|p| p.visibility != Visibility::Private && p.name == prop.name)
                {
                    Some(i) => out[i] = prop,
                    None => out.push(prop),
                }
            }
        }
        out
    }

    /// Whether code outside the object can read or write `name` directly.
    pub fn has_public_property(&self, class: &ClassEntity, name: &str) -> bool {
        self.all_properties(class)
            .iter()
            .any(|p| p.name == name && p.visibility == Visibility::Public)
    }

    /// `method` plus every method reachable from it through `$this->m()`
    /// calls, resolved through inheritance.
    pub fn reachable<'a>(&'a self, class: &'a ClassEntity, method: &'a MethodEntity) -> Vec<Reached<'a>> {
        let root_params = (0..method.params.len()).map(ArgRef::Param).collect();
        let mut out = vec![Reached {
            class: self
                .resolve_method(class, &method.gadget_method())
                .map(|(c, _)| c)
                .unwrap_or(class),
            method,
            params: root_params,
        }];
        let mut seen = HashSet::from([method.name.to_ascii_lowercase()]);
        let mut i = 0;
        while i < out.len() && out.len() < MAX_REACHED_METHODS {
            let current = out[i].clone();
            i += 1;
            for call in &current.method.self_calls {
                if !seen.insert(call.method.to_ascii_lowercase()) {
                    continue;
                }
                let Some((decl, callee)) = self.resolve_named(class, &call.method) else {
                    continue;
                };
                let params = call.args.iter().map(|a| a.remap(&current.params)).collect();
                out.push(Reached {
                    class: decl,
                    method: callee,
                    params,
                });
            }
        }
        out
    }

    /// Dangerous calls made by `method` directly or through helpers, with
    /// arguments rewritten into the terms of `method` itself.
    pub fn reachable_sinks(&self, class: &ClassEntity, method: &MethodEntity) -> Vec<DangerousCall> {
        self.reachable(class, method)
            .into_iter()
            .flat_map(|r| {
                r.method.dangerous_calls.iter().map(move |call| DangerousCall {
                    args: call.args.iter().map(|a| a.remap(&r.params)).collect(),
                    callee: call.callee.as_ref().map(|c| c.remap(&r.params)),
                    ..call.clone()
                })
            })
            .collect()
    }

    fn mark_dangerous(&mut self) {
        let mut flags = Vec::new();
        for (ci, class) in self.classes.iter().enumerate() {
            for method in class.magic_methods.values() {
                let dangerous = method.magic_kind.is_some_and(|k| k.can_be_dangerous())
                    && !self.reachable_sinks(class, method).is_empty();
                flags.push((ci, method.magic_kind, dangerous));
            }
        }
        for (ci, kind, dangerous) in flags {
            if let Some(m) = kind.and_then(|k| self.classes[ci].magic_methods.get_mut(&k)) {
                m.is_dangerous = dangerous;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str, vis: Visibility, class: &str) -> PropertyEntity {
        PropertyEntity {
            name: name.into(),
            visibility: vis,
            is_static: false,
            default: None,
            declared_in: class.into(),
            location: Location::default(),
        }
    }

    fn class(name: &str, parent: Option<&str>, props: Vec<PropertyEntity>) -> ClassEntity {
        ClassEntity {
            name: name.into(),
            namespace: None,
            parent_name: parent.map(str::to_string),
            interface_names: BTreeSet::new(),
            properties: props,
            magic_methods: BTreeMap::new(),
            regular_methods: Vec::new(),
            source_file_id: "t.php".into(),
            location: Location::default(),
            is_abstract: false,
        }
    }

    #[test]
    fn inherited_properties_follow_php_layout() {
        let base = class(
            "Base",
            None,
            vec![
                prop("secret", Visibility::Private, "Base"),
                prop("name", Visibility::Protected, "Base"),
            ],
        );
        let child = class(
            "Child",
            Some("Base"),
            vec![
                prop("secret", Visibility::Private, "Child"),
                prop("name", Visibility::Public, "Child"),
            ],
        );
        let cat = Catalogue::new([base, child]);
        let child = cat.get("child").unwrap();
        let keys: Vec<_> = cat
            .all_properties(child)
            .iter()
            .map(|p| p.serialized_key())
            .collect();
        assert_eq!(keys, ["\0Base\0secret", "name", "\0Child\0secret"]);
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let a = class("A", Some("B"), vec![]);
        let b = class("B", Some("A"), vec![]);
        let cat = Catalogue::new([a, b]);
        let a = cat.get("A").unwrap();
        assert_eq!(cat.ancestors(a).len(), 2);
    }

    #[test]
    fn duplicate_classes_keep_the_first_definition() {
        let mut second = class("Dup", None, vec![]);
        second.source_file_id = "other.php".into();
        let cat = Catalogue::new([class("Dup", None, vec![]), second]);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.get("dup").unwrap().source_file_id, "t.php");
        assert!(cat.get("App\\Dup").is_none());
        assert_eq!(cat.warnings().len(), 1);
    }

    fn in_namespace(mut class: ClassEntity, ns: &str) -> ClassEntity {
        class.namespace = Some(ns.into());
        class
    }

    #[test]
    fn same_short_name_in_two_namespaces() {
        let safe = in_namespace(class("Logger", None, vec![]), "Safe");
        let evil = in_namespace(class("Logger", None, vec![]), "Evil");
        let cat = Catalogue::new([safe, evil]);
        assert_eq!(cat.len(), 2);
        assert!(cat.warnings().is_empty());
        assert_eq!(cat.get("evil\\logger").unwrap().qualified_name(), "Evil\\Logger");
        assert_eq!(cat.get("\\Safe\\Logger").unwrap().qualified_name(), "Safe\\Logger");
        assert!(cat.get("Logger").is_none());
    }

    #[test]
    fn parents_resolve_against_the_child_namespace() {
        let app_base = in_namespace(class("Base", None, vec![]), "App");
        let lib_base = in_namespace(class("Base", None, vec![]), "Lib");
        let global = class("Root", None, vec![]);
        let child = in_namespace(class("Child", Some("Base"), vec![]), "Lib");
        let leaf = in_namespace(class("Leaf", Some("\\App\\Base"), vec![]), "Lib");
        let orphan = in_namespace(class("Orphan", Some("Root"), vec![]), "Lib");
        let cat = Catalogue::new([app_base, lib_base, global, child, leaf, orphan]);

        let parent = |name: &str| {
            let c = cat.get(name).unwrap();
            cat.parent_of(c).map(|p| p.qualified_name())
        };
        assert_eq!(parent("Lib\\Child").as_deref(), Some("Lib\\Base"));
        assert_eq!(parent("Lib\\Leaf").as_deref(), Some("App\\Base"));
        assert_eq!(parent("Lib\\Orphan").as_deref(), Some("Root"));
    }

    #[test]
    fn remap_rewrites_params_only() {
        let params = vec![ArgRef::Property("data".into())];
        assert_eq!(ArgRef::Param(0).remap(&params), ArgRef::Property("data".into()));
        assert_eq!(ArgRef::Param(3).remap(&params), ArgRef::Other);
        assert_eq!(
            ArgRef::Property("x".into()).remap(&params),
            ArgRef::Property("x".into())
        );
    }
}
