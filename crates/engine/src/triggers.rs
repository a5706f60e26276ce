//! Trigger templates: places in a method body where an attacker-chosen
//! object makes PHP call one of its methods.
//!
//! The class that ends up in the slot is unknown when the body is scanned,
//! so a template only records the slot, the provoking shape and the
//! arguments passed along. Chain search instantiates templates against the
//! catalogue.

use ir::{AssignOp, FileAst, Location, NodeId, NodeKind};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::catalog;
use crate::model::{ArgRef, Catalogue, ClassEntity, GadgetMethod, MagicKind, MethodEntity};
use crate::scope::{is_this, MethodContext};
use crate::SourceUnit;

/// Operation applied to the object held in a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TriggerShape {
    StringContext,
    Invoke,
    /// `$obj->$name()` with a name the attacker may choose.
    MissingMethodCall,
    NamedMethodCall { method: String },
    PropertyRead { property: String },
    PropertyWrite { property: String },
    Isset { property: String },
    Unset { property: String },
    Clone,
}

impl TriggerShape {
    /// Magic method the shape provokes. Named calls reach a regular method
    /// or `__call`, decided per candidate class.
    pub fn target(&self) -> Option<MagicKind> {
        match self {
            TriggerShape::StringContext => Some(MagicKind::ToString),
            TriggerShape::Invoke => Some(MagicKind::Invoke),
            TriggerShape::MissingMethodCall => Some(MagicKind::Call),
            TriggerShape::NamedMethodCall { .. } => None,
            TriggerShape::PropertyRead { .. } => Some(MagicKind::Get),
            TriggerShape::PropertyWrite { .. } => Some(MagicKind::Set),
            TriggerShape::Isset { .. } => Some(MagicKind::Isset),
            TriggerShape::Unset { .. } => Some(MagicKind::Unset),
            TriggerShape::Clone => Some(MagicKind::Clone),
        }
    }

    /// Property the candidate must not expose publicly for the magic
    /// accessor to fire.
    fn accessed_property(&self) -> Option<&str> {
        match self {
            TriggerShape::PropertyRead { property }
            | TriggerShape::PropertyWrite { property }
            | TriggerShape::Isset { property }
            | TriggerShape::Unset { property } => Some(property),
            _ => None,
        }
    }

    pub fn describe(&self, slot: &ArgRef) -> String {
        match self {
            TriggerShape::StringContext => format!("{slot} used as a string"),
            TriggerShape::Invoke => format!("{slot} called as a function"),
            TriggerShape::MissingMethodCall => format!("{slot}->$method() with a chosen name"),
            TriggerShape::NamedMethodCall { method } => format!("{slot}->{method}()"),
            TriggerShape::PropertyRead { property } => format!("read of {slot}->{property}"),
            TriggerShape::PropertyWrite { property } => format!("write to {slot}->{property}"),
            TriggerShape::Isset { property } => format!("isset({slot}->{property})"),
            TriggerShape::Unset { property } => format!("unset({slot}->{property})"),
            TriggerShape::Clone => format!("clone {slot}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Invoked by the runtime on unserialize or destruction.
    Auto,
    /// Provoked by an operation in a gadget body.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn score_penalty(&self) -> u32 {
        match self {
            Confidence::High => 0,
            Confidence::Medium => 5,
            Confidence::Low => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerTemplate {
    /// Qualified name of the class declaring the method.
    pub from_class: String,
    pub from_method: GadgetMethod,
    /// Where the provoking object comes from.
    pub slot: ArgRef,
    pub shape: TriggerShape,
    /// Arguments the provoked method receives.
    pub call_args: Vec<ArgRef>,
    /// Source of the method name for [`TriggerShape::MissingMethodCall`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_slot: Option<ArgRef>,
    pub file_id: String,
    pub location: Location,
    pub trigger_type: TriggerType,
    pub confidence: Confidence,
}

impl TriggerTemplate {
    pub fn description(&self) -> String {
        self.shape.describe(&self.slot)
    }

    /// The template as seen from a caller whose arguments are `params`.
    pub fn remap(&self, params: &[ArgRef]) -> TriggerTemplate {
        TriggerTemplate {
            slot: self.slot.remap(params),
            call_args: self.call_args.iter().map(|a| a.remap(params)).collect(),
            method_slot: self.method_slot.as_ref().map(|m| m.remap(params)),
            ..self.clone()
        }
    }
}

/// `$var = $this->prop` inside a gadget body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyFlow {
    pub property_name: String,
    pub from_class: String,
    pub to_variable: String,
    /// What the variable is then used for.
    pub used_as: String,
    pub location: Location,
}

/// Concrete edge between two gadgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEdge {
    pub from_class: String,
    pub from_method: GadgetMethod,
    pub to_class: String,
    pub to_method: GadgetMethod,
    pub trigger_type: TriggerType,
    pub confidence: Confidence,
    pub description: String,
    pub location: Location,
}

/// Class able to fill the slot of a template.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub class: &'a ClassEntity,
    pub method: &'a MethodEntity,
    pub gadget: GadgetMethod,
    /// What the target method's parameters receive, in the caller's terms.
    pub args: Vec<ArgRef>,
}

/// Every template of the analysed code, indexed by declaring method.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerGraph {
    templates: Vec<TriggerTemplate>,
    flows: Vec<PropertyFlow>,
    #[serde(skip)]
    index: HashMap<(String, String), Vec<usize>>,
}

fn method_key(class: &str, method: &str) -> (String, String) {
    (class.to_ascii_lowercase(), method.to_ascii_lowercase())
}

impl TriggerGraph {
    pub fn templates(&self) -> &[TriggerTemplate] {
        &self.templates
    }

    pub fn flows(&self) -> &[PropertyFlow] {
        &self.flows
    }

    fn push(&mut self, template: TriggerTemplate) {
        let key = method_key(&template.from_class, template.from_method.name());
        self.index
            .entry(key)
            .or_default()
            .push(self.templates.len());
        self.templates.push(template);
    }

    /// Templates raised by `method` on an instance of `class`, including
    /// those of helpers it calls through `$this`, with slots expressed in
    /// `method`'s own terms. Templates whose slot is not attacker reachable
    /// are dropped.
    pub fn outgoing(
        &self,
        catalogue: &Catalogue,
        class: &ClassEntity,
        method: &MethodEntity,
    ) -> Vec<TriggerTemplate> {
        let mut out = Vec::new();
        for reached in catalogue.reachable(class, method) {
            let key = method_key(&reached.class.qualified_name(), &reached.method.name);
            for &i in self.index.get(&key).into_iter().flatten() {
                let template = self.templates[i].remap(&reached.params);
                if template.slot.is_slot() {
                    out.push(template);
                }
            }
        }
        out
    }

    /// Concrete classes whose method `template` can provoke, in catalogue
    /// order.
    pub fn instantiate<'a>(
        &self,
        catalogue: &'a Catalogue,
        template: &TriggerTemplate,
    ) -> Vec<Candidate<'a>> {
        let mut out = Vec::new();
        for class in catalogue.concrete() {
            if let Some(candidate) = candidate(catalogue, class, template) {
                out.push(candidate);
            }
        }
        out
    }

    /// Every template instantiated against every matching class.
    pub fn edges(&self, catalogue: &Catalogue) -> Vec<TriggerEdge> {
        let mut out = Vec::new();
        for template in &self.templates {
            for c in self.instantiate(catalogue, template) {
                out.push(TriggerEdge {
                    from_class: template.from_class.clone(),
                    from_method: template.from_method.clone(),
                    to_class: c.class.qualified_name(),
                    to_method: c.gadget,
                    trigger_type: template.trigger_type,
                    confidence: template.confidence,
                    description: template.description(),
                    location: template.location,
                });
            }
        }
        out
    }
}

fn candidate<'a>(
    catalogue: &'a Catalogue,
    class: &'a ClassEntity,
    template: &TriggerTemplate,
) -> Option<Candidate<'a>> {
    if let TriggerShape::NamedMethodCall { method } = &template.shape {
        if let Some((_, m)) = catalogue.resolve_named(class, method) {
            if m.is_public() && !m.is_static && m.body.is_some() {
                return Some(Candidate {
                    class,
                    method: m,
                    gadget: m.gadget_method(),
                    args: template.call_args.clone(),
                });
            }
        }
        let (_, call) = catalogue.resolve_method(class, &GadgetMethod::Magic(MagicKind::Call))?;
        return Some(Candidate {
            class,
            method: call,
            gadget: GadgetMethod::Magic(MagicKind::Call),
            args: vec![ArgRef::Literal(method.clone()), ArgRef::Other],
        });
    }
    let kind = template.shape.target()?;
    if let Some(property) = template.shape.accessed_property() {
        if catalogue.has_public_property(class, property) {
            return None;
        }
    }
    let (_, m) = catalogue.resolve_method(class, &GadgetMethod::Magic(kind))?;
    Some(Candidate {
        class,
        method: m,
        gadget: GadgetMethod::Magic(kind),
        args: template.call_args.clone(),
    })
}

/// Scans every method body in the catalogue for trigger shapes.
pub fn build_trigger_edges(catalogue: &Catalogue, units: &[SourceUnit]) -> TriggerGraph {
    let asts: HashMap<&str, &FileAst> = units
        .iter()
        .map(|u| (u.file_id.as_str(), &u.ast))
        .collect();
    let mut graph = TriggerGraph::default();
    for class in catalogue.classes() {
        let from_class = class.qualified_name();
        for method in class.methods() {
            let Some(body) = &method.body else {
                continue;
            };
            let Some(ast) = asts.get(body.file_id.as_str()) else {
                continue;
            };
            let mut scan = BodyScan {
                ctx: MethodContext::new(ast, body.node, &method.params),
                from_class: &from_class,
                from_method: method.gadget_method(),
                file_id: &body.file_id,
                out: Vec::new(),
            };
            scan.run();
            let BodyScan { ctx, out, .. } = scan;
            for (variable, property, assign) in &ctx.property_aliases {
                let used_as = out
                    .iter()
                    .find(|t| t.slot == ArgRef::Property(property.clone()))
                    .map(|t| t.description())
                    .unwrap_or_else(|| "value".into());
                graph.flows.push(PropertyFlow {
                    property_name: property.clone(),
                    from_class: from_class.clone(),
                    to_variable: variable.clone(),
                    used_as,
                    location: ast.location_of(*assign).unwrap_or_default(),
                });
            }
            for template in out {
                graph.push(template);
            }
        }
    }
    debug!(
        templates = graph.templates.len(),
        flows = graph.flows.len(),
        "Built trigger templates"
    );
    graph
}

struct BodyScan<'a> {
    ctx: MethodContext<'a>,
    from_class: &'a str,
    from_method: GadgetMethod,
    file_id: &'a str,
    out: Vec<TriggerTemplate>,
}

impl BodyScan<'_> {
    fn emit(
        &mut self,
        at: NodeId,
        slot: ArgRef,
        shape: TriggerShape,
        call_args: Vec<ArgRef>,
        confidence: Confidence,
    ) {
        if !slot.is_slot() {
            return;
        }
        if self.out.iter().any(|t| t.slot == slot && t.shape == shape) {
            return;
        }
        self.out.push(TriggerTemplate {
            from_class: self.from_class.to_string(),
            from_method: self.from_method.clone(),
            slot,
            shape,
            call_args,
            method_slot: None,
            file_id: self.file_id.to_string(),
            location: self.ctx.ast.location_of(at).unwrap_or_default(),
            trigger_type: TriggerType::Manual,
            confidence,
        });
    }

    fn string_use(&mut self, at: NodeId, expr: NodeId, confidence: Confidence) {
        let slot = self.ctx.arg_ref(expr);
        self.emit(at, slot, TriggerShape::StringContext, Vec::new(), confidence);
    }

    /// `$slot->property` with a literal property name, where the object is
    /// not `$this`.
    fn fetched(&self, id: NodeId) -> Option<(ArgRef, String)> {
        let ast = self.ctx.ast;
        let NodeKind::PropertyFetch {
            property: Some(p), ..
        } = ast.kind(id)?
        else {
            return None;
        };
        let object = ast.child(id, 0)?;
        if is_this(ast, object) {
            return None;
        }
        Some((self.ctx.arg_ref(object), p.clone()))
    }

    fn run(&mut self) {
        let ast = self.ctx.ast;
        for i in 0..self.ctx.nodes.len() {
            let n = self.ctx.nodes[i];
            let Some(kind) = ast.kind(n) else {
                continue;
            };
            match kind {
                NodeKind::BinaryOp { op } if op == "." => {
                    for &c in ast.children(n) {
                        self.string_use(n, c, Confidence::High);
                    }
                }
                NodeKind::Assign {
                    op: AssignOp::Concat,
                } => {
                    for &c in ast.children(n) {
                        self.string_use(n, c, Confidence::High);
                    }
                }
                NodeKind::Echo | NodeKind::Print | NodeKind::Interpolated => {
                    for &c in ast.children(n) {
                        self.string_use(n, c, Confidence::High);
                    }
                }
                NodeKind::Cast { to } if to == "string" => {
                    if let Some(c) = ast.child(n, 0) {
                        self.string_use(n, c, Confidence::High);
                    }
                }
                NodeKind::Call { name: Some(f) } => self.named_call(n, f),
                NodeKind::Call { name: None } => {
                    if let Some(callee) = ast.child(n, 0) {
                        let slot = self.ctx.arg_ref(callee);
                        let args = self.ctx.call_args(n, 1);
                        self.emit(n, slot, TriggerShape::Invoke, args, Confidence::High);
                    }
                }
                NodeKind::MemberCall { method, .. } => {
                    let Some(object) = ast.child(n, 0) else {
                        continue;
                    };
                    if is_this(ast, object) {
                        continue;
                    }
                    let slot = self.ctx.arg_ref(object);
                    let args = self.ctx.call_args(n, 2);
                    match method {
                        Some(m) => {
                            let shape = TriggerShape::NamedMethodCall { method: m.clone() };
                            self.emit(n, slot, shape, args, Confidence::High);
                        }
                        None => {
                            let name_slot = ast.child(n, 1).map(|c| self.ctx.arg_ref(c));
                            let confidence = if name_slot.as_ref().is_some_and(|s| s.is_slot()) {
                                Confidence::Medium
                            } else {
                                Confidence::Low
                            };
                            let call_args = vec![name_slot.clone().unwrap_or(ArgRef::Other), ArgRef::Other];
                            let before = self.out.len();
                            self.emit(n, slot, TriggerShape::MissingMethodCall, call_args, confidence);
                            if let Some(t) = self.out.get_mut(before) {
                                t.method_slot = name_slot.filter(|s| s.is_slot());
                            }
                        }
                    }
                }
                NodeKind::PropertyFetch { .. } => {
                    let Some((slot, property)) = self.fetched(n) else {
                        continue;
                    };
                    let parent = ast.parent(n);
                    let parent_kind = parent.and_then(|p| ast.kind(p));
                    if matches!(parent_kind, Some(NodeKind::Isset) | Some(NodeKind::Unset)) {
                        continue;
                    }
                    let written = matches!(parent_kind, Some(NodeKind::Assign { .. }))
                        && parent.and_then(|p| ast.child(p, 0)) == Some(n);
                    if written {
                        let value = parent
                            .and_then(|p| ast.child(p, 1))
                            .map_or(ArgRef::Other, |v| self.ctx.arg_ref(v));
                        let args = vec![ArgRef::Literal(property.clone()), value];
                        let shape = TriggerShape::PropertyWrite { property };
                        self.emit(n, slot, shape, args, Confidence::Medium);
                    } else {
                        let args = vec![ArgRef::Literal(property.clone())];
                        let shape = TriggerShape::PropertyRead { property };
                        self.emit(n, slot, shape, args, Confidence::Medium);
                    }
                }
                NodeKind::Isset | NodeKind::Unset => {
                    let isset = matches!(kind, NodeKind::Isset);
                    for &c in ast.children(n) {
                        let Some((slot, property)) = self.fetched(c) else {
                            continue;
                        };
                        let args = vec![ArgRef::Literal(property.clone())];
                        let shape = if isset {
                            TriggerShape::Isset { property }
                        } else {
                            TriggerShape::Unset { property }
                        };
                        self.emit(n, slot, shape, args, Confidence::Medium);
                    }
                }
                NodeKind::Clone => {
                    if let Some(c) = ast.child(n, 0) {
                        let slot = self.ctx.arg_ref(c);
                        self.emit(n, slot, TriggerShape::Clone, Vec::new(), Confidence::Medium);
                    }
                }
                _ => {}
            }
        }
    }

    /// Calls to built-ins: callables are invoked, string arguments of
    /// sinks and string functions are converted.
    fn named_call(&mut self, n: NodeId, function: &str) {
        let ast = self.ctx.ast;
        let Some(args) = ast.child(n, 1) else {
            return;
        };
        let callable = catalog::callable_arg(function);
        let converts = catalog::consumes_strings(function) || catalog::sink(function).is_some();
        let values: Vec<NodeId> = ast.children(args).to_vec();
        for (i, &arg) in values.iter().enumerate() {
            if callable == Some(i) {
                let slot = self.ctx.arg_ref(arg);
                let passed = values
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, &a)| self.ctx.arg_ref(a))
                    .collect();
                self.emit(n, slot, TriggerShape::Invoke, passed, Confidence::High);
            } else if converts {
                self.string_use(n, arg, Confidence::Medium);
            }
        }
    }
}
