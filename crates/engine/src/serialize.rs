//! PHP `serialize()` wire format.
//!
//! The writer records where each object's declared property count sits in
//! the output so the `__wakeup` bypass can patch it in place, and the reader
//! re-parses a payload to compare declared and written counts.

use ir::Visibility;
use serde::Serialize;
use std::ops::Range;

use crate::error::PayloadError;

/// Value tree mirroring what `unserialize` rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<(PhpValue, PhpValue)>),
    Object(PhpObject),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhpObject {
    pub class: String,
    /// Encoded property keys with their values, in write order.
    pub properties: Vec<(String, PhpValue)>,
}

impl PhpObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            properties: Vec::new(),
        }
    }

    /// Sets an existing key or appends a new one.
    pub fn set(&mut self, key: &str, value: PhpValue) {
        match self.properties.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.properties.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Position of one object's property count in serialized output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSpan {
    pub class: String,
    pub count: usize,
    /// Byte range of the decimal count.
    pub count_range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Serialized {
    pub text: String,
    pub objects: Vec<ObjectSpan>,
}

/// Object header read back from serialized data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectHeader {
    pub class: String,
    pub declared: usize,
    pub actual: usize,
    pub count_range: Range<usize>,
}

/// Key PHP uses for a property of the given visibility.
///
/// # Example
/// ```
/// use engine::serialize::encode_property_key;
/// use ir::Visibility;
/// assert_eq!(encode_property_key(Visibility::Public, "Logger", "data"), "data");
/// assert_eq!(encode_property_key(Visibility::Protected, "Logger", "data"), "\0*\0data");
/// assert_eq!(encode_property_key(Visibility::Private, "Logger", "data"), "\0Logger\0data");
/// ```
pub fn encode_property_key(visibility: Visibility, class: &str, name: &str) -> String {
    match visibility {
        Visibility::Public => name.to_string(),
        Visibility::Protected => format!("\0*\0{name}"),
        Visibility::Private => format!("\0{class}\0{name}"),
    }
}

/// Inverse of [`encode_property_key`]. The class is only known for private
/// keys.
pub fn decode_property_key(key: &str) -> (Visibility, Option<String>, String) {
    if let Some(rest) = key.strip_prefix('\0') {
        if let Some((scope, name)) = rest.split_once('\0') {
            if scope == "*" {
                return (Visibility::Protected, None, name.to_string());
            }
            return (Visibility::Private, Some(scope.to_string()), name.to_string());
        }
    }
    (Visibility::Public, None, key.to_string())
}

/// Serializes `value` the way PHP's `serialize()` does.
pub fn serialize(value: &PhpValue) -> Serialized {
    let mut out = Serialized {
        text: String::new(),
        objects: Vec::new(),
    };
    write_value(value, &mut out);
    out
}

fn write_str(s: &str, out: &mut String) {
    out.push_str(&format!("s:{}:\"{}\";", s.len(), s));
}

/// PHP spells the non-finite values in upper case.
fn php_float(f: f64) -> String {
    if f.is_nan() {
        "NAN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "INF" } else { "-INF" }.into()
    } else {
        f.to_string()
    }
}

fn write_value(value: &PhpValue, out: &mut Serialized) {
    match value {
        PhpValue::Null => out.text.push_str("N;"),
        PhpValue::Bool(b) => out.text.push_str(if *b { "b:1;" } else { "b:0;" }),
        PhpValue::Int(i) => out.text.push_str(&format!("i:{i};")),
        PhpValue::Float(f) => out.text.push_str(&format!("d:{};", php_float(*f))),
        PhpValue::Str(s) => write_str(s, &mut out.text),
        PhpValue::Array(items) => {
            out.text.push_str(&format!("a:{}:{{", items.len()));
            for (k, v) in items {
                write_value(k, out);
                write_value(v, out);
            }
            out.text.push('}');
        }
        PhpValue::Object(obj) => {
            out.text
                .push_str(&format!("O:{}:\"{}\":", obj.class.len(), obj.class));
            let start = out.text.len();
            let count = obj.properties.len();
            out.text.push_str(&count.to_string());
            out.objects.push(ObjectSpan {
                class: obj.class.clone(),
                count,
                count_range: start..out.text.len(),
            });
            out.text.push_str(":{");
            for (k, v) in &obj.properties {
                write_str(k, &mut out.text);
                write_value(v, out);
            }
            out.text.push('}');
        }
    }
}

/// Rewrites the declared property count of the given objects to
/// `count + 1`, the inflated header that keeps vulnerable PHP versions from
/// calling `__wakeup`.
pub fn inflate_property_counts(serialized: &Serialized, classes: &[String]) -> String {
    let mut text = serialized.text.clone();
    let mut spans: Vec<&ObjectSpan> = serialized
        .objects
        .iter()
        .filter(|o| classes.iter().any(|c| c.eq_ignore_ascii_case(&o.class)))
        .collect();
    // Patch back to front so earlier ranges stay valid.
    spans.sort_by_key(|o| std::cmp::Reverse(o.count_range.start));
    for span in spans {
        text.replace_range(span.count_range.clone(), &(span.count + 1).to_string());
    }
    text
}

/// Parses serialized data and returns the header of every object in it.
///
/// # Example
/// ```
/// use engine::serialize::parse_serialized;
/// let headers = parse_serialized("O:1:\"A\":2:{s:1:\"x\";i:1;s:1:\"y\";N;}").unwrap();
/// assert_eq!((headers[0].declared, headers[0].actual), (2, 2));
/// ```
pub fn parse_serialized(input: &str) -> Result<Vec<ObjectHeader>, PayloadError> {
    let mut reader = Reader {
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
        headers: Vec::new(),
    };
    reader.value()?;
    if reader.pos != reader.bytes.len() {
        return Err(reader.error("trailing data"));
    }
    Ok(reader.headers)
}

/// Deepest array/object nesting the reader accepts.
pub const MAX_NESTING: usize = 128;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    headers: Vec<ObjectHeader>,
}

impl<'a> Reader<'a> {
    fn error(&self, reason: &str) -> PayloadError {
        PayloadError::Malformed {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), PayloadError> {
        if self.bytes.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    /// Reads up to `end`, consuming the terminator.
    fn until(&mut self, end: u8) -> Result<&'a str, PayloadError> {
        let bytes: &'a [u8] = self.bytes;
        let start = self.pos;
        let len = bytes[start..]
            .iter()
            .position(|&b| b == end)
            .ok_or_else(|| self.error(&format!("missing '{}'", end as char)))?;
        self.pos = start + len + 1;
        std::str::from_utf8(&bytes[start..start + len]).map_err(|_| self.error("invalid utf-8"))
    }

    fn number(&mut self, end: u8) -> Result<usize, PayloadError> {
        let text = self.until(end)?;
        text.parse().map_err(|_| self.error("invalid length"))
    }

    fn string_body(&mut self) -> Result<(), PayloadError> {
        let len = self.number(b':')?;
        self.expect(b'"')?;
        if len > self.bytes.len() - self.pos {
            return Err(self.error("string length past end of input"));
        }
        self.pos += len;
        self.expect(b'"')
    }

    fn value(&mut self) -> Result<(), PayloadError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = self.tagged();
        self.depth -= 1;
        result
    }

    fn tagged(&mut self) -> Result<(), PayloadError> {
        let tag = *self.bytes.get(self.pos).ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match tag {
            b'N' => self.expect(b';'),
            b'b' | b'i' | b'd' => {
                self.expect(b':')?;
                self.until(b';').map(|_| ())
            }
            b's' => {
                self.expect(b':')?;
                self.string_body()?;
                self.expect(b';')
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.number(b':')?;
                self.expect(b'{')?;
                for _ in 0..count {
                    self.value()?;
                    self.value()?;
                }
                self.expect(b'}')
            }
            b'O' => {
                self.expect(b':')?;
                let len = self.number(b':')?;
                self.expect(b'"')?;
                let start = self.pos;
                if len > self.bytes.len() - start {
                    return Err(self.error("class name past end of input"));
                }
                let class = std::str::from_utf8(&self.bytes[start..start + len])
                    .map_err(|_| self.error("invalid class name"))?
                    .to_string();
                self.pos += len;
                self.expect(b'"')?;
                self.expect(b':')?;
                let count_start = self.pos;
                let declared = self.number(b':')?;
                let count_range = count_start..self.pos - 1;
                self.expect(b'{')?;
                let index = self.headers.len();
                self.headers.push(ObjectHeader {
                    class,
                    declared,
                    actual: 0,
                    count_range,
                });
                let mut actual = 0;
                while self.bytes.get(self.pos) != Some(&b'}') {
                    if self.pos >= self.bytes.len() {
                        return Err(self.error("unterminated object"));
                    }
                    self.value()?;
                    self.value()?;
                    actual += 1;
                }
                self.pos += 1;
                self.headers[index].actual = actual;
                Ok(())
            }
            _ => Err(self.error("unknown type tag")),
        }
    }
}
