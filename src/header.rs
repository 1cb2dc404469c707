//! XML header model.
//!
//! The header is held as a plain element tree. The codec only interprets
//! the `Image` element and a handful of its attributes:
//!
//! | Attribute      | Form                                      |
//! |----------------|-------------------------------------------|
//! | `geometry`     | `width:height[:channels]`                 |
//! | `sampleFormat` | `UInt8` … `Float64`                       |
//! | `compression`  | `codec[+sh]:uncompressedSize[:itemSize]`  |
//! | `checksum`     | `hashtype:hexdigest`                      |
//! | `location`     | `attachment:offset:length`, `inline:enc`, `embedded` |
//!
//! Everything else in the document is preserved verbatim on re-serialization
//! (mixed text/element ordering inside a single element is not).

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::checksum::ChecksumDescriptor;
use crate::codec::CompressionDescriptor;
use crate::error::{Result, XisfError};
use crate::metadata::ImageMetaData;
use crate::sample::SampleFormat;

pub const XISF_NAMESPACE:    &str = "http://www.pixinsight.com/xisf";
pub const XISF_VERSION:      &str = "1.0";
pub const CREATOR_APPLICATION: &str = concat!("xisfcodec ", env!("CARGO_PKG_VERSION"));

pub const ATTR_GEOMETRY:      &str = "geometry";
pub const ATTR_SAMPLE_FORMAT: &str = "sampleFormat";
pub const ATTR_COMPRESSION:   &str = "compression";
pub const ATTR_CHECKSUM:      &str = "checksum";
pub const ATTR_LOCATION:      &str = "location";

// ── Element tree ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name:       String,
    pub attributes: Vec<(String, String)>,
    pub children:   Vec<XmlElement>,
    pub text:       String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Element name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace an existing attribute in place, or append it.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None         => self.attributes.push((key.to_owned(), value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    pub fn child_mut(&mut self, local_name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find(|c| c.local_name() == local_name)
    }

    pub fn children_named<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.local_name() == local_name)
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Parsed `geometry` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width:    u32,
    pub height:   u32,
    pub channels: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, channels: 1 }
    }

    /// Accepts `width:height` and `width:height:channels`. Only
    /// single-channel images can be decoded.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || XisfError::InvalidGeometry(value.to_owned());
        let dims = value
            .trim()
            .split(':')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        let geometry = match dims.as_slice() {
            [w, h]    => Geometry { width: *w, height: *h, channels: 1 },
            [w, h, c] => Geometry { width: *w, height: *h, channels: *c },
            _         => return Err(invalid()),
        };
        if geometry.width == 0 || geometry.height == 0 {
            return Err(invalid());
        }
        if geometry.channels != 1 {
            return Err(XisfError::InvalidGeometry(format!(
                "{value}: only single-channel images are supported"
            )));
        }
        Ok(geometry)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.width, self.height, self.channels)
    }
}

// ── Location ────────────────────────────────────────────────────────────────

/// Text encodings allowed for inline and embedded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Base64,
    Hex,
}

impl DataEncoding {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "base64" => Ok(DataEncoding::Base64),
            "hex"    => Ok(DataEncoding::Hex),
            other    => Err(XisfError::InvalidFormat(format!("unknown data encoding '{other}'"))),
        }
    }

    /// Decode element text; embedded whitespace and line breaks are ignored.
    pub fn decode(self, text: &str) -> Result<Vec<u8>> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        match self {
            DataEncoding::Base64 => STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| XisfError::InvalidFormat(format!("bad base64 data: {e}"))),
            DataEncoding::Hex => hex::decode(compact)
                .map_err(|e| XisfError::InvalidFormat(format!("bad hex data: {e}"))),
        }
    }
}

/// Parsed `location` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Attachment { offset: u64, length: u64 },
    /// Encoded pixel bytes are the text of the `Image` element itself.
    Inline(DataEncoding),
    /// Encoded pixel bytes live in a `<Data>` child element.
    Embedded,
}

impl Location {
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        match parts.as_slice() {
            ["attachment", offset, length] => {
                let offset = offset.parse::<u64>();
                let length = length.parse::<u64>();
                match (offset, length) {
                    (Ok(offset), Ok(length)) => Ok(Location::Attachment { offset, length }),
                    _ => Err(XisfError::InvalidFormat(format!("bad attachment location '{value}'"))),
                }
            }
            ["inline", encoding] => Ok(Location::Inline(DataEncoding::parse(encoding)?)),
            ["embedded"]         => Ok(Location::Embedded),
            _ => Err(XisfError::InvalidFormat(format!("unsupported location '{value}'"))),
        }
    }

    pub fn to_attribute(&self) -> String {
        match self {
            Location::Attachment { offset, length } => format!("attachment:{offset}:{length}"),
            Location::Inline(DataEncoding::Base64)  => "inline:base64".to_owned(),
            Location::Inline(DataEncoding::Hex)     => "inline:hex".to_owned(),
            Location::Embedded                      => "embedded".to_owned(),
        }
    }
}

// ── Header ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    root: XmlElement,
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    /// Fresh document: `<xisf>` root plus a `<Metadata>` block.
    pub fn new() -> Self {
        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut metadata = XmlElement::new("Metadata");
        metadata.children.push(
            XmlElement::new("Property")
                .with_attr("id", "XISF:CreationTime")
                .with_attr("type", "TimeDate")
                .with_attr("value", created),
        );
        metadata.children.push(
            XmlElement::new("Property")
                .with_attr("id", "XISF:CreatorApplication")
                .with_attr("type", "String")
                .with_text(CREATOR_APPLICATION),
        );

        let mut root = XmlElement::new("xisf")
            .with_attr("version", XISF_VERSION)
            .with_attr("xmlns", XISF_NAMESPACE)
            .with_attr("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance")
            .with_attr(
                "xsi:schemaLocation",
                "http://www.pixinsight.com/xisf http://pixinsight.com/xisf/xisf-1.0.xsd",
            );
        root.children.push(metadata);
        Self { root }
    }

    pub fn from_root(root: XmlElement) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    /// Parse header bytes. Any UTF-8 or XML error is `InvalidFormat`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| XisfError::InvalidFormat(format!("header is not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(parse_err)? {
                Event::Start(e) => stack.push(element_from(&e)?),
                Event::Empty(e) => {
                    let el = element_from(&e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| XisfError::InvalidFormat("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape().map_err(parse_err)?);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XisfError::InvalidFormat("header ends inside an element".into()));
        }
        let root = root.ok_or_else(|| XisfError::InvalidFormat("header has no root element".into()))?;
        if root.local_name() != "xisf" {
            return Err(XisfError::InvalidFormat(format!(
                "unexpected root element <{}>", root.name
            )));
        }
        Ok(Self { root })
    }

    /// Serialize to UTF-8. The byte count of the result is what the file
    /// preamble records.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_err)?;
        write_element(&mut writer, &self.root)?;
        Ok(writer.into_inner())
    }

    pub fn has_image(&self) -> bool {
        self.root.child("Image").is_some()
    }

    pub fn image(&self) -> Result<&XmlElement> {
        self.root
            .child("Image")
            .ok_or_else(|| XisfError::InvalidFormat("header has no Image element".into()))
    }

    pub fn image_mut(&mut self) -> Result<&mut XmlElement> {
        self.root
            .child_mut("Image")
            .ok_or_else(|| XisfError::InvalidFormat("header has no Image element".into()))
    }

    /// Append the `Image` element describing a single-channel image.
    pub fn add_image(&mut self, geometry: Geometry, format: SampleFormat, meta: &ImageMetaData) {
        let mut image = XmlElement::new("Image")
            .with_attr(ATTR_GEOMETRY, geometry.to_string())
            .with_attr(ATTR_SAMPLE_FORMAT, format.name());
        if format.is_float() {
            image.set_attr("bounds", "0:1");
        }
        image.set_attr("colorSpace", "Gray");

        if let Some(pattern) = &meta.bayer_pattern {
            image.children.push(
                XmlElement::new("ColorFilterArray")
                    .with_attr("pattern", pattern.as_str())
                    .with_attr("width", "2")
                    .with_attr("height", "2"),
            );
        }
        for kw in meta.to_fits_keywords() {
            image.children.push(
                XmlElement::new("FITSKeyword")
                    .with_attr("name", kw.name)
                    .with_attr("value", kw.value)
                    .with_attr("comment", kw.comment),
            );
        }
        self.root.children.push(image);
    }

    pub fn geometry(&self) -> Result<Geometry> {
        let value = self
            .image()?
            .attr(ATTR_GEOMETRY)
            .ok_or_else(|| XisfError::InvalidGeometry("missing geometry attribute".into()))?;
        Geometry::parse(value)
    }

    pub fn sample_format(&self) -> Result<SampleFormat> {
        let value = self
            .image()?
            .attr(ATTR_SAMPLE_FORMAT)
            .ok_or_else(|| XisfError::UnsupportedSampleFormat("missing sampleFormat attribute".into()))?;
        SampleFormat::parse(value)
    }

    /// `None` when the block is stored uncompressed.
    pub fn compression(&self) -> Result<Option<CompressionDescriptor>> {
        self.image()?
            .attr(ATTR_COMPRESSION)
            .map(CompressionDescriptor::parse)
            .transpose()
    }

    pub fn checksum(&self) -> Result<Option<ChecksumDescriptor>> {
        self.image()?
            .attr(ATTR_CHECKSUM)
            .map(ChecksumDescriptor::parse)
            .transpose()
    }

    pub fn location(&self) -> Result<Option<Location>> {
        self.image()?
            .attr(ATTR_LOCATION)
            .map(Location::parse)
            .transpose()
    }

    /// Record where and how the data block is stored. Absent descriptors
    /// clear any stale attribute.
    pub fn set_data_attributes(
        &mut self,
        location: Location,
        compression: Option<&CompressionDescriptor>,
        checksum: Option<&ChecksumDescriptor>,
    ) -> Result<()> {
        let image = self.image_mut()?;
        image.set_attr(ATTR_LOCATION, location.to_attribute());
        match compression {
            Some(c) => image.set_attr(ATTR_COMPRESSION, c.to_attribute()),
            None    => { image.remove_attr(ATTR_COMPRESSION); }
        }
        match checksum {
            Some(c) => image.set_attr(ATTR_CHECKSUM, c.to_attribute()),
            None    => { image.remove_attr(ATTR_CHECKSUM); }
        }
        Ok(())
    }
}

// ── quick-xml plumbing ──────────────────────────────────────────────────────

fn parse_err(e: quick_xml::Error) -> XisfError {
    XisfError::InvalidFormat(format!("malformed header XML: {e}"))
}

fn write_err<E: fmt::Display>(e: E) -> XisfError {
    XisfError::Xml(e.to_string())
}

fn element_from(e: &BytesStart<'_>) -> Result<XmlElement> {
    let mut el = XmlElement::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XisfError::InvalidFormat(format!("malformed attribute: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(parse_err)?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_none() => *root = Some(el),
        None => return Err(XisfError::InvalidFormat("header has more than one root element".into())),
    }
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if el.children.is_empty() && el.text.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_err);
    }
    writer.write_event(Event::Start(start)).map_err(write_err)?;
    if !el.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&el.text)))
            .map_err(write_err)?;
    }
    for child in &el.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(write_err)
}
