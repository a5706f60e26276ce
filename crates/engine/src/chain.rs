//! Depth-bounded search for POP chains.
//!
//! Each search starts from a `__wakeup` or `__destruct` of a class that a
//! user-controlled `unserialize()` may instantiate, and walks trigger
//! templates. At every hop the class filling the slot is chosen from the
//! catalogue. Paths are simple: a class appears at most once per chain.
//!
//! A sink inside `if ($this->p == 'x')` only runs when the payload sets
//! `p`, so guard literals become assignments too. A one-object chain whose
//! sink needs nothing but guard values is a property injection.

use ir::Location;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::catalog::{self, SinkTier, SinkValue};
use crate::model::{
    ArgRef, Catalogue, ClassEntity, GadgetMethod, GuardValue, MagicKind, MethodEntity,
    PropertyGuard,
};
use crate::options::AnalysisOptions;
use crate::sites::{AllowedClasses, UnserializeSite};
use crate::triggers::{Confidence, TriggerEdge, TriggerGraph, TriggerType};

/// Property of the object at `step`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SlotRef {
    pub step: usize,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    /// The object of another step.
    Object(usize),
    /// A method name no class in the chain defines.
    PivotMethod,
    Sink(SinkValue),
    /// Literal an `if` around the sink compares the property against.
    Guard(GuardValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    /// Nested objects ending in a sink fed by the payload.
    Gadget,
    /// A single object whose property values open a guarded sink.
    PropertyInjection,
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChainKind::Gadget => "gadget chain",
            ChainKind::PropertyInjection => "property injection",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAssignment {
    pub step: usize,
    pub property: String,
    pub value: SlotValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStep {
    /// Qualified name of the object's class.
    pub class: String,
    pub method: GadgetMethod,
    /// How the runtime gets to this method.
    pub trigger: String,
    /// Where the previous objects keep this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<SlotRef>,
    pub file_id: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkRef {
    pub function: String,
    pub tier: SinkTier,
    /// Step whose object reaches the sink.
    pub step: usize,
    pub class: String,
    pub method: String,
    /// The sink's key argument comes from the payload.
    pub controlled: bool,
    pub location: Location,
}

/// How the payload reaches the vulnerable `unserialize()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub param_name: Option<String>,
    pub source: String,
    pub wrappers: Vec<String>,
    pub base64: bool,
    pub file_id: String,
    pub location: Location,
}

impl From<&UnserializeSite> for Delivery {
    fn from(site: &UnserializeSite) -> Self {
        Delivery {
            param_name: site.param_name.clone(),
            source: site.source.label(),
            wrappers: site.wrappers.clone(),
            base64: site.expects_base64(),
            file_id: site.file_id.clone(),
            location: site.location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub id: String,
    pub entry_class: String,
    pub entry_method: MagicKind,
    pub kind: ChainKind,
    pub steps: Vec<ChainStep>,
    /// Edges between consecutive steps.
    pub edges: Vec<TriggerEdge>,
    pub sink: SinkRef,
    pub assignments: Vec<SlotAssignment>,
    pub exploitability: u32,
    pub requires_wakeup_bypass: bool,
    /// Classes whose `__wakeup` must be skipped.
    pub bypass_classes: Vec<String>,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn dedup_key(&self) -> String {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}::{}", s.class.to_ascii_lowercase(), s.method))
            .collect();
        format!(
            "{}|{}|{}|{}",
            self.entry_class.to_ascii_lowercase(),
            self.entry_method,
            self.sink.function,
            steps.join(">")
        )
    }
}

/// Finds chains from every entry point a controlled site can instantiate.
/// No controlled site or no dangerous terminal gives an empty list.
pub fn detect_chains(
    catalogue: &Catalogue,
    graph: &TriggerGraph,
    sites: &[UnserializeSite],
    opts: &AnalysisOptions,
) -> Vec<Chain> {
    let controlled: Vec<&UnserializeSite> = sites.iter().filter(|s| s.user_controlled).collect();
    if controlled.is_empty() {
        debug!("No user-controlled unserialize call, skipping chain search");
        return Vec::new();
    }
    let mut found = Vec::new();
    'classes: for class in catalogue.concrete() {
        let name = class.qualified_name();
        // One search per distinct restriction; the first site of each wins.
        let mut permitting: Vec<&UnserializeSite> = Vec::new();
        for site in controlled.iter().filter(|s| s.allowed_classes.permits(&name)) {
            if !permitting.iter().any(|p| p.allowed_classes == site.allowed_classes) {
                permitting.push(site);
            }
        }
        for (site, kind) in permitting
            .iter()
            .flat_map(|site| [MagicKind::Wakeup, MagicKind::Destruct].map(|kind| (*site, kind)))
        {
            let Some((_, method)) = catalogue.resolve_method(class, &GadgetMethod::Magic(kind)) else {
                continue;
            };
            let mut search = Search {
                catalogue,
                graph,
                opts,
                budget: opts.max_chains.saturating_sub(found.len()),
                allowed: &site.allowed_classes,
                delivery: Delivery::from(site),
                path: vec![Frame {
                    class,
                    method,
                    gadget: GadgetMethod::Magic(kind),
                    incoming: Vec::new(),
                    holder: None,
                    pivot: None,
                    edge: None,
                }],
                found: Vec::new(),
            };
            search.extend();
            debug!(entry = %name, method = %kind, chains = search.found.len(), "Searched entry point");
            found.append(&mut search.found);
            if found.len() >= opts.max_chains {
                break 'classes;
            }
        }
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut chains: Vec<Chain> = Vec::new();
    for chain in found {
        let key = chain.dedup_key();
        match index.get(&key).copied() {
            Some(i) => {
                if chain.exploitability > chains[i].exploitability {
                    chains[i] = chain;
                }
            }
            None => {
                index.insert(key, chains.len());
                chains.push(chain);
            }
        }
    }
    chains.sort_by(|a, b| {
        (Reverse(a.exploitability), a.steps.len(), &a.id).cmp(&(
            Reverse(b.exploitability),
            b.steps.len(),
            &b.id,
        ))
    });
    info!(chains = chains.len(), "Chain search finished");
    chains
}

struct Frame<'a> {
    class: &'a ClassEntity,
    method: &'a MethodEntity,
    gadget: GadgetMethod,
    /// Arguments the method receives, in the previous step's terms.
    incoming: Vec<ArgRef>,
    holder: Option<SlotRef>,
    pivot: Option<SlotRef>,
    edge: Option<TriggerEdge>,
}

/// Sink reachable from one step, with arguments in that step's terms.
struct StepSink {
    step: usize,
    function: String,
    tier: SinkTier,
    method: String,
    location: Location,
    args: Vec<ArgRef>,
    callee: Option<ArgRef>,
    guards: Vec<PropertyGuard>,
    key_bound: bool,
}

struct Search<'a> {
    catalogue: &'a Catalogue,
    graph: &'a TriggerGraph,
    opts: &'a AnalysisOptions,
    budget: usize,
    allowed: &'a AllowedClasses,
    delivery: Delivery,
    path: Vec<Frame<'a>>,
    found: Vec<Chain>,
}

/// Resolves an argument of `step` to the payload property providing it.
fn bind(path: &[Frame], step: usize, arg: &ArgRef) -> Option<SlotRef> {
    match arg {
        ArgRef::Property(p) => Some(SlotRef {
            step,
            property: p.clone(),
        }),
        ArgRef::Param(k) if step > 0 => {
            let passed = path.get(step)?.incoming.get(*k)?;
            bind(path, step - 1, passed)
        }
        _ => None,
    }
}

impl<'a> Search<'a> {
    fn occupied(&self, slot: &SlotRef) -> bool {
        self.path
            .iter()
            .any(|f| f.holder.as_ref() == Some(slot) || f.pivot.as_ref() == Some(slot))
    }

    fn on_path(&self, class: &ClassEntity) -> bool {
        let name = class.qualified_name().to_ascii_lowercase();
        self.path
            .iter()
            .any(|f| f.class.qualified_name().to_ascii_lowercase() == name)
    }

    fn extend(&mut self) {
        if self.found.len() >= self.budget {
            return;
        }
        let step = self.path.len() - 1;
        if self.is_terminal(step) {
            self.record();
        }
        if self.path.len() >= self.opts.max_depth.max(1) {
            return;
        }
        let (class, method) = (self.path[step].class, self.path[step].method);
        let from_gadget = self.path[step].gadget.clone();
        for template in self.graph.outgoing(self.catalogue, class, method) {
            let Some(holder) = bind(&self.path, step, &template.slot) else {
                continue;
            };
            if self.occupied(&holder) {
                continue;
            }
            let pivot = template
                .method_slot
                .as_ref()
                .and_then(|m| bind(&self.path, step, m))
                .filter(|p| *p != holder && !self.occupied(p));
            let candidates: Vec<_> = self
                .graph
                .instantiate(self.catalogue, &template)
                .into_iter()
                .filter(|c| self.allowed.permits(&c.class.qualified_name()) && !self.on_path(c.class))
                .take(self.opts.max_branching)
                .collect();
            for candidate in candidates {
                let edge = TriggerEdge {
                    from_class: class.qualified_name(),
                    from_method: from_gadget.clone(),
                    to_class: candidate.class.qualified_name(),
                    to_method: candidate.gadget.clone(),
                    trigger_type: TriggerType::Manual,
                    confidence: template.confidence,
                    description: template.description(),
                    location: template.location,
                };
                self.path.push(Frame {
                    class: candidate.class,
                    method: candidate.method,
                    gadget: candidate.gadget,
                    incoming: candidate.args,
                    holder: Some(holder.clone()),
                    pivot: pivot.clone(),
                    edge: Some(edge),
                });
                self.extend();
                self.path.pop();
                if self.found.len() >= self.budget {
                    return;
                }
            }
        }
    }

    fn sinks_at(&self, step: usize) -> Vec<StepSink> {
        let frame = &self.path[step];
        let mut out = Vec::new();
        for reached in self.catalogue.reachable(frame.class, frame.method) {
            for call in &reached.method.dangerous_calls {
                let args: Vec<ArgRef> = call.args.iter().map(|a| a.remap(&reached.params)).collect();
                let callee = call.callee.as_ref().map(|c| c.remap(&reached.params));
                let key = match &callee {
                    Some(c) => Some(c.clone()),
                    None => catalog::sink(&call.function)
                        .and_then(|spec| spec.args.first())
                        .and_then(|&(i, _)| args.get(i).cloned()),
                };
                let key_bound = key
                    .and_then(|k| bind(&self.path, step, &k))
                    .is_some_and(|slot| !self.occupied(&slot));
                out.push(StepSink {
                    step,
                    function: call.function.clone(),
                    tier: call.tier,
                    method: reached.method.name.clone(),
                    location: call.location,
                    args,
                    callee,
                    guards: call.guards.clone(),
                    key_bound,
                });
            }
        }
        out
    }

    fn is_terminal(&self, step: usize) -> bool {
        self.path[step].method.is_dangerous || self.sinks_at(step).iter().any(|s| s.key_bound)
    }

    fn record(&mut self) {
        let last = self.path.len() - 1;
        let all_sinks: Vec<StepSink> = (0..self.path.len()).flat_map(|i| self.sinks_at(i)).collect();
        // The terminal step owns the sink; earlier sinks only feed assignments.
        let Some(sink) = all_sinks
            .iter()
            .filter(|s| s.step == last)
            .max_by_key(|s| (s.key_bound, Reverse(s.tier)))
        else {
            return;
        };
        let assignments = self.assignments(sink, &all_sinks);
        let bypass_classes = self.bypass_classes(&assignments);
        let entry = &self.path[0];
        let entry_kind = entry.gadget.magic().unwrap_or(MagicKind::Destruct);
        let kind = if self.path.len() == 1 && !sink.key_bound && !sink.guards.is_empty() {
            ChainKind::PropertyInjection
        } else {
            ChainKind::Gadget
        };
        let confidence = self
            .path
            .iter()
            .filter_map(|f| f.edge.as_ref().map(|e| e.confidence))
            .max()
            .unwrap_or(Confidence::High);

        let mut score: u32 = 100;
        score = score.saturating_sub(10 * (self.path.len() as u32 - 1));
        score = score.saturating_sub(sink.tier.score_penalty());
        if entry_kind == MagicKind::Wakeup {
            score = score.saturating_sub(10);
        }
        if !bypass_classes.is_empty() {
            score = score.saturating_sub(10);
        }
        score = score.saturating_sub(confidence.score_penalty());

        let steps: Vec<ChainStep> = self
            .path
            .iter()
            .map(|f| ChainStep {
                class: f.class.qualified_name(),
                method: f.gadget.clone(),
                trigger: match &f.edge {
                    Some(e) => e.description.clone(),
                    None => entry_kind.trigger_description().to_string(),
                },
                holder: f.holder.clone(),
                file_id: f
                    .method
                    .body
                    .as_ref()
                    .map(|b| b.file_id.clone())
                    .unwrap_or_else(|| f.class.source_file_id.clone()),
                location: f.method.location,
            })
            .collect();
        let sink_ref = SinkRef {
            function: sink.function.clone(),
            tier: sink.tier,
            step: sink.step,
            class: steps[sink.step].class.clone(),
            method: sink.method.clone(),
            controlled: sink.key_bound,
            location: sink.location,
        };
        let fingerprint = format!(
            "{}|{}|{}",
            entry.class.qualified_name(),
            steps
                .iter()
                .map(|s| format!("{}::{}", s.class, s.method))
                .collect::<Vec<_>>()
                .join(">"),
            sink_ref.function
        );
        let chain = Chain {
            id: blake3::hash(fingerprint.as_bytes()).to_hex().to_string(),
            entry_class: entry.class.qualified_name(),
            entry_method: entry_kind,
            kind,
            edges: self.path.iter().filter_map(|f| f.edge.clone()).collect(),
            steps,
            sink: sink_ref,
            assignments,
            exploitability: score.min(100),
            requires_wakeup_bypass: !bypass_classes.is_empty(),
            bypass_classes,
            confidence,
            delivery: Some(self.delivery.clone()),
        };
        debug!(
            entry = %chain.entry_class,
            steps = chain.steps.len(),
            sink = %chain.sink.function,
            score = chain.exploitability,
            "Recorded chain"
        );
        self.found.push(chain);
    }

    /// Payload content: nested objects first, then pivots, then the guards
    /// of the chosen sink, then sink arguments in severity order. A slot
    /// keeps its first value.
    fn assignments(&self, chosen: &StepSink, sinks: &[StepSink]) -> Vec<SlotAssignment> {
        let mut out: Vec<SlotAssignment> = Vec::new();
        let mut taken: HashSet<SlotRef> = HashSet::new();
        let mut assign = |out: &mut Vec<SlotAssignment>, slot: SlotRef, value: SlotValue| {
            if taken.insert(slot.clone()) {
                out.push(SlotAssignment {
                    step: slot.step,
                    property: slot.property,
                    value,
                });
            }
        };
        for (i, frame) in self.path.iter().enumerate() {
            if let Some(holder) = &frame.holder {
                assign(&mut out, holder.clone(), SlotValue::Object(i));
            }
        }
        for frame in &self.path {
            if let Some(pivot) = &frame.pivot {
                assign(&mut out, pivot.clone(), SlotValue::PivotMethod);
            }
        }
        for guard in &chosen.guards {
            let slot = SlotRef {
                step: chosen.step,
                property: guard.property.clone(),
            };
            assign(&mut out, slot, SlotValue::Guard(guard.value.clone()));
        }
        let mut ordered: Vec<&StepSink> = sinks.iter().collect();
        ordered.sort_by_key(|s| (s.tier, Reverse(s.key_bound), Reverse(s.step)));
        for sink in ordered {
            let wanted: Vec<(ArgRef, SinkValue)> = match &sink.callee {
                Some(callee) => {
                    let mut v = vec![(callee.clone(), SinkValue::Callback)];
                    if let Some(first) = sink.args.first() {
                        v.push((first.clone(), SinkValue::Command));
                    }
                    v
                }
                None => catalog::sink(&sink.function)
                    .map(|spec| {
                        spec.args
                            .iter()
                            .filter_map(|&(i, value)| sink.args.get(i).map(|a| (a.clone(), value)))
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            for (arg, value) in wanted {
                if let Some(slot) = bind(&self.path, sink.step, &arg) {
                    assign(&mut out, slot, SlotValue::Sink(value));
                }
            }
        }
        out
    }

    /// Classes whose `__wakeup` would undo the payload: it resets a property
    /// the chain sets on that object, or aborts. The entry `__wakeup` itself
    /// must run and is never bypassed.
    fn bypass_classes(&self, assignments: &[SlotAssignment]) -> Vec<String> {
        let mut out = Vec::new();
        for (i, frame) in self.path.iter().enumerate() {
            if i == 0 && frame.gadget == GadgetMethod::Magic(MagicKind::Wakeup) {
                continue;
            }
            let wakeup = GadgetMethod::Magic(MagicKind::Wakeup);
            let Some((_, method)) = self.catalogue.resolve_method(frame.class, &wakeup) else {
                continue;
            };
            let reached = self.catalogue.reachable(frame.class, method);
            let aborts = reached.iter().any(|r| r.method.aborts);
            let resets_used = reached.iter().flat_map(|r| &r.method.resets).any(|p| {
                assignments
                    .iter()
                    .any(|a| a.step == i && &a.property == p)
            });
            if aborts || resets_used {
                let name = frame.class.qualified_name();
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_classes;
    use crate::sites::find_unserialize_sites;
    use crate::triggers::build_trigger_edges;
    use crate::SourceUnit;

    fn chains(src: &str, opts: &AnalysisOptions) -> Vec<Chain> {
        let unit = SourceUnit {
            file_id: "t.php".into(),
            ast: parsers::parse_php(src, "t.php").unwrap(),
        };
        let catalogue = Catalogue::new(extract_classes(&unit).classes);
        let units = [unit];
        let graph = build_trigger_edges(&catalogue, &units);
        let sites = find_unserialize_sites(&units[0]);
        detect_chains(&catalogue, &graph, &sites, opts)
    }

    #[test]
    fn no_controlled_site_means_no_chain() {
        let found = chains(
            "<?php class A { public $c; function __destruct() { system($this->c); } }
             unserialize('O:1:\"A\":0:{}');",
            &AnalysisOptions::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn dynamic_invoke_in_entry_is_a_chain() {
        let found = chains(
            "<?php class A { public $fn; public $arg; function __destruct() { ($this->fn)($this->arg); } }
             unserialize($_GET['x']);",
            &AnalysisOptions::default(),
        );
        assert_eq!(found.len(), 1);
        let chain = &found[0];
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.sink.function, "dynamic call");
        assert!(chain.sink.controlled);
        assert!(chain.assignments.contains(&SlotAssignment {
            step: 0,
            property: "fn".into(),
            value: SlotValue::Sink(SinkValue::Callback),
        }));
        assert!(chain.assignments.contains(&SlotAssignment {
            step: 0,
            property: "arg".into(),
            value: SlotValue::Sink(SinkValue::Command),
        }));
    }

    #[test]
    fn depth_limit_cuts_long_chains() {
        let src = "<?php
            class A { public $b; function __destruct() { echo $this->b; } }
            class B { public $c; function __toString() { return $this->c->go(); } }
            class C { public $cmd; function go() { system($this->cmd); return ''; } }
            unserialize($_POST['p']);";
        let full = chains(src, &AnalysisOptions::default());
        assert!(full.iter().any(|c| c.len() == 3));
        let short = chains(
            src,
            &AnalysisOptions {
                max_depth: 2,
                ..AnalysisOptions::default()
            },
        );
        assert!(short.iter().all(|c| c.len() <= 2));
        assert!(!short.iter().any(|c| c.sink.function == "system"));
    }

    #[test]
    fn wakeup_guard_requires_bypass() {
        let found = chains(
            "<?php
            class Guarded {
                public $cmd;
                function __wakeup() { $this->cmd = 'true'; }
                function __destruct() { system($this->cmd); }
            }
            unserialize($_COOKIE['s']);",
            &AnalysisOptions::default(),
        );
        let destruct = found
            .iter()
            .find(|c| c.entry_method == MagicKind::Destruct)
            .unwrap();
        assert!(destruct.requires_wakeup_bypass);
        assert_eq!(destruct.bypass_classes, ["Guarded"]);
        let wakeup = found.iter().find(|c| c.entry_method == MagicKind::Wakeup);
        assert!(wakeup.is_none());
    }

    #[test]
    fn scores_prefer_short_execution_chains() {
        let found = chains(
            "<?php
            class Exec { public $c; function __destruct() { system($this->c); } }
            class Write { public $f; public $d; function __destruct() { file_put_contents($this->f, $this->d); } }
            unserialize($_GET['d']);",
            &AnalysisOptions::default(),
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].entry_class, "Exec");
        assert_eq!(found[0].exploitability, 95);
        assert_eq!(found[1].exploitability, 80);
    }
}
