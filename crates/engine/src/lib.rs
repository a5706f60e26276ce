//! POP-chain detection over lowered PHP sources.
//!
//! The pipeline runs in stages: classes are extracted into a [`Catalogue`],
//! `unserialize()` sites are classified, trigger templates are collected
//! from gadget bodies, chains are searched from every auto-triggered entry
//! point and each chain is turned into a serialized payload.

use ir::FileAst;
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod catalog;
pub mod chain;
pub mod error;
pub mod extract;
pub mod model;
pub mod options;
pub mod payload;
mod scope;
pub mod serialize;
pub mod sites;
pub mod taint;
pub mod triggers;

pub use chain::{
    detect_chains, Chain, ChainKind, ChainStep, Delivery, SinkRef, SlotAssignment, SlotRef, SlotValue,
};
pub use error::PayloadError;
pub use extract::{extract_classes, extract_classes_with, Extraction};
pub use model::{
    ArgRef, Catalogue, ClassEntity, DangerousCall, GadgetMethod, GuardValue, MagicKind, MethodEntity,
    PropertyEntity, PropertyGuard, SoftWarning,
};
pub use options::{AnalysisOptions, PayloadOptions};
pub use payload::{synthesize_payload, SerializedPayload};
pub use sites::{find_unserialize_sites, AllowedClasses, UnserializeSite};
pub use taint::{build_taint_map, classify_source, is_user_controlled, TaintMap, TaintSource};
pub use triggers::{
    build_trigger_edges, Confidence, PropertyFlow, TriggerEdge, TriggerGraph, TriggerShape, TriggerTemplate,
    TriggerType,
};

/// One parsed file.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Stable identifier, usually the path relative to the scan root.
    pub file_id: String,
    pub ast: FileAst,
}

impl SourceUnit {
    pub fn new(file_id: impl Into<String>, ast: FileAst) -> Self {
        Self {
            file_id: file_id.into(),
            ast,
        }
    }
}

/// A chain with the outcome of its payload synthesis.
#[derive(Debug, Clone, Serialize)]
pub struct ChainFinding {
    pub chain: Chain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<SerializedPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_error: Option<PayloadError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    pub units: usize,
    pub classes: usize,
    pub sites: usize,
    pub controlled_sites: usize,
    pub templates: usize,
    pub edges: usize,
    pub chains: usize,
    pub payload_failures: usize,
}

/// Everything one run found. Warnings never stop the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub catalogue: Catalogue,
    pub sites: Vec<UnserializeSite>,
    pub templates: Vec<TriggerTemplate>,
    pub flows: Vec<PropertyFlow>,
    pub edges: Vec<TriggerEdge>,
    pub chains: Vec<ChainFinding>,
    pub warnings: Vec<SoftWarning>,
    pub stats: AnalysisStats,
}

impl AnalysisReport {
    pub fn classes(&self) -> &[ClassEntity] {
        self.catalogue.classes()
    }
}

/// Runs every stage over `units`.
pub fn analyze(units: &[SourceUnit], opts: &AnalysisOptions) -> AnalysisReport {
    let mut warnings = Vec::new();
    let mut classes = Vec::new();
    for unit in units {
        let extraction = extract_classes_with(unit, opts.case_insensitive_magic);
        debug!(file = %unit.file_id, classes = extraction.classes.len(), "Extracted classes");
        classes.extend(extraction.classes);
        warnings.extend(extraction.warnings);
    }
    let catalogue = Catalogue::new(classes);
    warnings.extend(catalogue.warnings().iter().cloned());

    let sites: Vec<UnserializeSite> = units.iter().flat_map(find_unserialize_sites).collect();
    let controlled_sites = sites.iter().filter(|s| s.user_controlled).count();
    let graph = build_trigger_edges(&catalogue, units);
    let edges = graph.edges(&catalogue);
    info!(
        classes = catalogue.len(),
        sites = sites.len(),
        controlled = controlled_sites,
        templates = graph.templates().len(),
        "Built gadget catalogue"
    );

    let mut payload_failures = 0;
    let chains: Vec<ChainFinding> = detect_chains(&catalogue, &graph, &sites, opts)
        .into_iter()
        .map(|chain| {
            if opts.skip_payloads {
                return ChainFinding {
                    chain,
                    payload: None,
                    payload_error: None,
                };
            }
            match synthesize_payload(&chain, &catalogue, &opts.payload) {
                Ok(payload) => ChainFinding {
                    chain,
                    payload: Some(payload),
                    payload_error: None,
                },
                Err(e) => {
                    warn!(chain = %chain.id, error = %e, "Payload synthesis failed");
                    payload_failures += 1;
                    ChainFinding {
                        chain,
                        payload: None,
                        payload_error: Some(e),
                    }
                }
            }
        })
        .collect();

    let stats = AnalysisStats {
        units: units.len(),
        classes: catalogue.len(),
        sites: sites.len(),
        controlled_sites,
        templates: graph.templates().len(),
        edges: edges.len(),
        chains: chains.len(),
        payload_failures,
    };
    AnalysisReport {
        sites,
        templates: graph.templates().to_vec(),
        flows: graph.flows().to_vec(),
        edges,
        chains,
        warnings,
        stats,
        catalogue,
    }
}
