//! XMP (RDF/XML) sidecar codec.
//!
//! Descriptions and tags use the Dublin Core keys every photo manager
//! understands (`dc:description`, `dc:subject`), dimensions use the TIFF
//! keys, and the remaining fields live under the `scene:` namespace.

use std::fmt::Display;
use std::io;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};

use super::{DecodeError, SidecarCodec, SidecarDocument};
use crate::metadata::MetadataRecord;

pub const NS_X: &str = "adobe:ns:meta/";
pub const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
pub const NS_TIFF: &str = "http://ns.adobe.com/tiff/1.0/";
pub const NS_SCENE: &str = "http://ns.scene-index.org/1.0/";

#[derive(Debug, Clone, Copy, Default)]
pub struct XmpCodec;

impl SidecarCodec for XmpCodec {
    fn suffix(&self) -> &str {
        "xmp"
    }

    fn decode(&self, bytes: &[u8]) -> Result<SidecarDocument, DecodeError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DecodeError(format!("sidecar is not UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let properties = Parser::default().run(text)?;
        into_document(properties)
    }

    fn encode(&self, record: &MetadataRecord) -> io::Result<Vec<u8>> {
        write_document(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

fn write_document(record: &MetadataRecord) -> quick_xml::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::with_capacity(1024), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("x:xmpmeta").with_attributes([("xmlns:x", NS_X)]),
    ))?;
    writer.write_event(Event::Start(
        BytesStart::new("rdf:RDF").with_attributes([("xmlns:rdf", NS_RDF)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("rdf:Description").with_attributes([
        ("rdf:about", ""),
        ("xmlns:dc", NS_DC),
        ("xmlns:tiff", NS_TIFF),
        ("xmlns:scene", NS_SCENE),
    ])))?;

    if let Some(description) = record.description.as_deref() {
        writer.write_event(Event::Start(BytesStart::new("dc:description")))?;
        writer.write_event(Event::Start(BytesStart::new("rdf:Alt")))?;
        let li = writer
            .create_element("rdf:li")
            .with_attribute(("xml:lang", "x-default"));
        if description.is_empty() {
            li.write_empty()?;
        } else {
            li.write_text_content(BytesText::new(description))?;
        }
        writer.write_event(Event::End(BytesEnd::new("rdf:Alt")))?;
        writer.write_event(Event::End(BytesEnd::new("dc:description")))?;
    }

    if !record.tags().is_empty() {
        writer.write_event(Event::Start(BytesStart::new("dc:subject")))?;
        writer.write_event(Event::Start(BytesStart::new("rdf:Bag")))?;
        for tag in record.tags() {
            writer
                .create_element("rdf:li")
                .write_text_content(BytesText::new(tag.as_str()))?;
        }
        writer.write_event(Event::End(BytesEnd::new("rdf:Bag")))?;
        writer.write_event(Event::End(BytesEnd::new("dc:subject")))?;
    }

    simple_property(&mut writer, "dc:source", record.source.as_deref())?;

    if let Some((width, height)) = record.dimensions() {
        simple_property(&mut writer, "tiff:ImageWidth", Some(&width.to_string()))?;
        simple_property(&mut writer, "tiff:ImageLength", Some(&height.to_string()))?;
    }

    simple_property(&mut writer, "scene:scene", record.scene.as_deref())?;
    simple_property(&mut writer, "scene:mood", record.mood.as_deref())?;
    simple_property(&mut writer, "scene:style", record.style.as_deref())?;
    simple_property(&mut writer, "scene:subject", record.subject.as_deref())?;
    simple_property(&mut writer, "scene:time_of_day", record.time_of_day.as_deref())?;
    simple_property(&mut writer, "scene:colors", record.colors.as_deref())?;
    simple_property(&mut writer, "scene:recommended_screen", record.recommended_screen())?;
    simple_property(&mut writer, "scene:ai_model", record.ai_model.as_deref())?;

    writer.write_event(Event::End(BytesEnd::new("rdf:Description")))?;
    writer.write_event(Event::End(BytesEnd::new("rdf:RDF")))?;
    writer.write_event(Event::End(BytesEnd::new("x:xmpmeta")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes `<qname>value</qname>`, or `<qname/>` for an empty value.
fn simple_property<W: io::Write>(
    writer: &mut Writer<W>,
    qname: &str,
    value: Option<&str>,
) -> quick_xml::Result<()> {
    match value {
        None => {}
        Some("") => {
            writer.create_element(qname).write_empty()?;
        }
        Some(value) => {
            writer
                .create_element(qname)
                .write_text_content(BytesText::new(value))?;
        }
    }
    Ok(())
}

fn xml_error<E: Display>(e: E) -> DecodeError {
    DecodeError(format!("invalid XML: {}", e))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Text(String),
    List(Vec<String>),
    /// A property with structure this codec does not read (nested
    /// resources, an empty `rdf:Alt`).
    Absent,
}

impl Value {
    /// Single-valued view. Lists are joined; an empty text stays `Some("")`.
    fn into_text(self) -> Option<String> {
        match self {
            Value::Text(text) => Some(text),
            Value::List(items) if items.is_empty() => None,
            Value::List(items) => Some(items.join(", ")),
            Value::Absent => None,
        }
    }

    fn into_items(self) -> Vec<String> {
        match self {
            Value::Text(text) => text.split(',').map(str::to_string).collect(),
            Value::List(items) => items,
            Value::Absent => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Property {
    ns: String,
    local: String,
    qname: String,
    value: Value,
}

struct Element {
    ns: String,
    local: String,
    qname: String,
    attrs: Vec<Attribute>,
}

impl Element {
    fn is(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    fn attr(&self, qname: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.qname == qname)
            .map(|a| a.value.as_str())
    }
}

struct Attribute {
    ns: String,
    local: String,
    qname: String,
    value: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Container {
    None,
    List,
    Alt,
}

struct ListItem {
    depth: usize,
    text: String,
    default_lang: bool,
}

/// A property element of `rdf:Description` being read.
struct PendingProperty {
    ns: String,
    local: String,
    qname: String,
    depth: usize,
    text: String,
    container: Container,
    nested: bool,
    items: Vec<String>,
    default_item: Option<String>,
    item: Option<ListItem>,
}

impl PendingProperty {
    fn new(el: Element, depth: usize) -> Self {
        let text = el.attr("rdf:resource").unwrap_or_default().to_string();
        Self {
            ns: el.ns,
            local: el.local,
            qname: el.qname,
            depth,
            text,
            container: Container::None,
            nested: false,
            items: Vec::new(),
            default_item: None,
            item: None,
        }
    }

    fn open_child(&mut self, el: &Element, depth: usize) {
        if self.item.is_some() {
            return;
        }
        if self.container == Container::None && el.ns == NS_RDF {
            match el.local.as_str() {
                "Bag" | "Seq" => self.container = Container::List,
                "Alt" => self.container = Container::Alt,
                _ => self.nested = true,
            }
        } else if self.container != Container::None && el.is(NS_RDF, "li") {
            self.item = Some(ListItem {
                depth,
                text: String::new(),
                default_lang: el.attr("xml:lang") == Some("x-default"),
            });
        } else {
            self.nested = true;
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(item) = self.item.as_mut() {
            item.text.push_str(text);
        } else if self.container == Container::None && !self.nested {
            self.text.push_str(text);
        }
    }

    fn close_child(&mut self, depth: usize) {
        if self.item.as_ref().map_or(false, |i| i.depth == depth) {
            if let Some(item) = self.item.take() {
                if item.default_lang && self.default_item.is_none() {
                    self.default_item = Some(item.text.clone());
                }
                self.items.push(item.text);
            }
        }
    }

    fn finish(self) -> Property {
        let value = match self.container {
            Container::None if self.nested => Value::Absent,
            Container::None => Value::Text(self.text),
            Container::List => Value::List(self.items),
            Container::Alt => self
                .default_item
                .or_else(|| self.items.into_iter().next())
                .map_or(Value::Absent, Value::Text),
        };
        Property {
            ns: self.ns,
            local: self.local,
            qname: self.qname,
            value,
        }
    }
}

#[derive(Default)]
struct Parser {
    saw_rdf: bool,
    description: Option<usize>,
    current: Option<PendingProperty>,
    properties: Vec<Property>,
}

impl Parser {
    fn run(mut self, text: &str) -> Result<Vec<Property>, DecodeError> {
        let mut reader = NsReader::from_str(text);
        reader.config_mut().trim_text(false);
        let mut depth = 0usize;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(e) => {
                    depth += 1;
                    let el = element(&reader, &e)?;
                    self.open(el, depth);
                }
                Event::Empty(e) => {
                    let el = element(&reader, &e)?;
                    self.open(el, depth + 1);
                    self.close(depth + 1);
                }
                Event::End(_) => {
                    self.close(depth);
                    depth = depth.saturating_sub(1);
                }
                Event::Text(t) => {
                    if let Some(prop) = self.current.as_mut() {
                        prop.push_text(&t.unescape().map_err(xml_error)?);
                    }
                }
                Event::CData(c) => {
                    if let Some(prop) = self.current.as_mut() {
                        prop.push_text(std::str::from_utf8(&c).map_err(xml_error)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(DecodeError("unexpected end of document".to_string()));
        }
        if !self.saw_rdf {
            return Err(DecodeError("no rdf:RDF element".to_string()));
        }
        Ok(self.properties)
    }

    fn open(&mut self, el: Element, depth: usize) {
        if el.is(NS_RDF, "RDF") {
            self.saw_rdf = true;
        }

        if let Some(prop) = self.current.as_mut() {
            prop.open_child(&el, depth);
            return;
        }

        match self.description {
            Some(d) if depth == d + 1 => {
                self.current = Some(PendingProperty::new(el, depth));
            }
            None if el.is(NS_RDF, "Description") => {
                self.description = Some(depth);
                // Simple properties may be written as attributes.
                for attr in el.attrs {
                    if attr.ns.is_empty() || attr.ns == NS_RDF || attr.qname.starts_with("xml:") {
                        continue;
                    }
                    self.properties.push(Property {
                        ns: attr.ns,
                        local: attr.local,
                        qname: attr.qname,
                        value: Value::Text(attr.value),
                    });
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, depth: usize) {
        if let Some(prop) = self.current.as_mut() {
            if prop.depth == depth {
                if let Some(prop) = self.current.take() {
                    self.properties.push(prop.finish());
                }
            } else {
                prop.close_child(depth);
            }
            return;
        }

        if self.description == Some(depth) {
            self.description = None;
        }
    }
}

fn namespace(result: ResolveResult) -> String {
    match result {
        ResolveResult::Bound(Namespace(ns)) => String::from_utf8_lossy(ns).into_owned(),
        _ => String::new(),
    }
}

fn element(reader: &NsReader<&[u8]>, e: &BytesStart) -> Result<Element, DecodeError> {
    let (ns, local) = reader.resolve_element(e.name());
    let ns = namespace(ns);
    let local = String::from_utf8_lossy(local.as_ref()).into_owned();
    let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (attr_ns, attr_local) = reader.resolve_attribute(attr.key);
        attrs.push(Attribute {
            ns: namespace(attr_ns),
            local: String::from_utf8_lossy(attr_local.as_ref()).into_owned(),
            qname: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value: attr.unescape_value().map_err(xml_error)?.into_owned(),
        });
    }

    Ok(Element {
        ns,
        local,
        qname,
        attrs,
    })
}

/// A blank value counts as missing; anything else must be a positive integer.
fn parse_dimension(qname: &str, value: Option<String>) -> Result<Option<u32>, DecodeError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(DecodeError(format!("{} is not a positive integer: {:?}", qname, value))),
    }
}

fn into_document(properties: Vec<Property>) -> Result<SidecarDocument, DecodeError> {
    let mut doc = SidecarDocument::default();
    let record = &mut doc.record;
    let mut width = None;
    let mut height = None;

    for prop in properties {
        match (prop.ns.as_str(), prop.local.as_str()) {
            (NS_DC, "description") => record.description = prop.value.into_text(),
            (NS_DC, "subject") => record.set_tags(prop.value.into_items()),
            (NS_DC, "source") => record.source = prop.value.into_text(),
            (NS_TIFF, "ImageWidth") => {
                width = parse_dimension(&prop.qname, prop.value.into_text())?
            }
            (NS_TIFF, "ImageLength") => {
                height = parse_dimension(&prop.qname, prop.value.into_text())?
            }
            (NS_SCENE, "scene") => record.scene = prop.value.into_text(),
            (NS_SCENE, "mood") => record.mood = prop.value.into_text(),
            (NS_SCENE, "style") => record.style = prop.value.into_text(),
            (NS_SCENE, "subject") => record.subject = prop.value.into_text(),
            (NS_SCENE, "time_of_day") => record.time_of_day = prop.value.into_text(),
            (NS_SCENE, "colors") => record.colors = prop.value.into_text(),
            (NS_SCENE, "ai_model") => record.ai_model = prop.value.into_text(),
            // Derived from the dimensions below, never trusted from disk.
            (NS_SCENE, "recommended_screen") => {}
            _ => {
                doc.extra
                    .insert(prop.qname, prop.value.into_text().unwrap_or_default());
            }
        }
    }

    if let (Some(w), Some(h)) = (width, height) {
        record
            .set_dimensions(w, h)
            .map_err(|e| DecodeError(e.to_string()))?;
    }

    Ok(doc)
}
