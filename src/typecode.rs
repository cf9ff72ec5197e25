//! Type codes: descriptors that convert between XML elements and values.
//!
//! A [`TypeCode`] names the element it reads or writes and describes its
//! shape. The generic `any` kind infers the shape from `xsi:type` (or the
//! element structure) when parsing and from the value when serializing.

use crate::config::SoapVersion;
use crate::error::SoapError;
use crate::parser::{is_xml_char, Element, SOAP_11_NS, SOAP_12_NS, SOAP_ENC_NS, XSD_NS, XSI_NS};
use crate::value::SoapValue;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Accessor name for items of the generic list shape.
pub const LIST_ITEM_NAME: &str = "return";

/// Accessor name for items of an untyped SOAP-ENC array.
const ARRAY_ITEM_NAME: &str = "item";

const INTEGER_TYPES: &[&str] = &[
    "int",
    "integer",
    "long",
    "short",
    "byte",
    "unsignedInt",
    "unsignedShort",
    "unsignedByte",
    "nonNegativeInteger",
    "positiveInteger",
    "negativeInteger",
    "nonPositiveInteger",
];

/// Describes how one element maps to a [`SoapValue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCode {
    /// Element name (`pname`)
    pub name: String,

    #[serde(flatten)]
    pub kind: TypeKind,

    /// Element may be absent or nil
    #[serde(default)]
    pub optional: bool,
}

/// Shape of a type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypeKind {
    /// Shape decided at runtime; `aslist` writes a list as repeated children
    Any {
        #[serde(default)]
        aslist: bool,
    },
    String,
    Integer,
    Boolean,
    Double,
    Struct {
        fields: Vec<TypeCode>,
    },
    Array {
        item: Box<TypeCode>,
    },
}

impl TypeCode {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    /// Generic type code.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Any { aslist: false })
    }

    /// Generic list-shaped type code, used for unregistered return values.
    pub fn any_list(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Any { aslist: true })
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Parse an element against this type code.
    pub fn parse(&self, element: &Element) -> Result<SoapValue, SoapError> {
        if element.is_nil() {
            return Ok(SoapValue::Null);
        }

        match &self.kind {
            TypeKind::Any { .. } => parse_any(element),
            TypeKind::String => Ok(SoapValue::String(element.text.clone())),
            TypeKind::Integer => parse_integer(element),
            TypeKind::Boolean => parse_boolean(element),
            TypeKind::Double => parse_double(element),
            TypeKind::Struct { fields } => {
                let mut members = Vec::with_capacity(fields.len());
                for field in fields {
                    match element.child(&field.name) {
                        Some(child) => members.push((field.name.clone(), field.parse(child)?)),
                        None if field.optional => {}
                        None => {
                            return Err(SoapError::MissingElement(format!(
                                "{}/{}",
                                element.local_name, field.name
                            )))
                        }
                    }
                }
                Ok(SoapValue::Struct(members))
            }
            TypeKind::Array { item } => element
                .children
                .iter()
                .map(|child| item.parse(child))
                .collect::<Result<Vec<_>, _>>()
                .map(SoapValue::List),
        }
    }

    /// Write `value` as an element described by this type code.
    pub fn serialize_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        value: &SoapValue,
    ) -> Result<(), SoapError> {
        if let SoapValue::Null = value {
            if self.optional || matches!(self.kind, TypeKind::Any { .. }) {
                return write_nil(writer, &self.name);
            }
            return Err(self.mismatch(value));
        }

        match (&self.kind, value) {
            (TypeKind::Any { aslist: true }, SoapValue::List(items)) => {
                check_name(&self.name)?;
                write_event(writer, Event::Start(BytesStart::new(self.name.as_str())))?;
                for item in items {
                    write_any(writer, LIST_ITEM_NAME, item)?;
                }
                write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
            }
            (TypeKind::Any { .. }, _) => write_any(writer, &self.name, value),
            (TypeKind::String, SoapValue::String(s)) => {
                write_leaf(writer, &self.name, "xsd:string", s)
            }
            (TypeKind::Integer, SoapValue::Integer(i)) => {
                write_leaf(writer, &self.name, integer_type(*i), &i.to_string())
            }
            (TypeKind::Boolean, SoapValue::Boolean(b)) => {
                write_leaf(writer, &self.name, "xsd:boolean", if *b { "true" } else { "false" })
            }
            (TypeKind::Double, SoapValue::Double(d)) => {
                write_leaf(writer, &self.name, "xsd:double", &format_double(*d))
            }
            (TypeKind::Double, SoapValue::Integer(i)) => {
                write_leaf(writer, &self.name, "xsd:double", &format_double(*i as f64))
            }
            (TypeKind::Struct { fields }, SoapValue::Struct(_)) => {
                check_name(&self.name)?;
                write_event(writer, Event::Start(BytesStart::new(self.name.as_str())))?;
                for field in fields {
                    match value.member(&field.name) {
                        Some(member) => field.serialize_xml(writer, member)?,
                        None if field.optional => {}
                        None => {
                            return Err(SoapError::MissingElement(format!(
                                "{}/{}",
                                self.name, field.name
                            )))
                        }
                    }
                }
                write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
            }
            (TypeKind::Array { item }, SoapValue::List(items)) => {
                check_name(&self.name)?;
                let mut start = BytesStart::new(self.name.as_str());
                start.push_attribute(("xsi:type", "SOAP-ENC:Array"));
                write_event(writer, Event::Start(start))?;
                for entry in items {
                    item.serialize_xml(writer, entry)?;
                }
                write_event(writer, Event::End(BytesEnd::new(self.name.as_str())))
            }
            _ => Err(self.mismatch(value)),
        }
    }

    fn mismatch(&self, value: &SoapValue) -> SoapError {
        SoapError::TypeMismatch {
            element: self.name.clone(),
            expected: self.kind_name().to_string(),
            found: value.kind().to_string(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            TypeKind::Any { .. } => "any",
            TypeKind::String => "string",
            TypeKind::Integer => "integer",
            TypeKind::Boolean => "boolean",
            TypeKind::Double => "double",
            TypeKind::Struct { .. } => "struct",
            TypeKind::Array { .. } => "array",
        }
    }
}

/// Serialize `value` into a complete SOAP envelope whose body holds a single
/// element described by `typecode`.
pub fn serialize_envelope(
    version: SoapVersion,
    typecode: &TypeCode,
    value: &SoapValue,
) -> Result<String, SoapError> {
    let envelope_ns = match version {
        SoapVersion::Soap11 => SOAP_11_NS,
        SoapVersion::Soap12 => SOAP_12_NS,
    };

    let mut writer = Writer::new(Vec::new());
    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut envelope = BytesStart::new("soap:Envelope");
    envelope.push_attribute(("xmlns:soap", envelope_ns));
    envelope.push_attribute(("xmlns:xsi", XSI_NS));
    envelope.push_attribute(("xmlns:xsd", XSD_NS));
    envelope.push_attribute(("xmlns:SOAP-ENC", SOAP_ENC_NS));
    write_event(&mut writer, Event::Start(envelope))?;
    write_event(&mut writer, Event::Start(BytesStart::new("soap:Body")))?;

    typecode.serialize_xml(&mut writer, value)?;

    write_event(&mut writer, Event::End(BytesEnd::new("soap:Body")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("soap:Envelope")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| SoapError::Serialization(format!("envelope is not UTF-8: {}", e)))
}

fn parse_any(element: &Element) -> Result<SoapValue, SoapError> {
    match element.xsi_type() {
        Some(t) if INTEGER_TYPES.contains(&t) => parse_integer(element),
        Some("boolean") => parse_boolean(element),
        Some("double") | Some("float") | Some("decimal") => parse_double(element),
        Some("string") => Ok(SoapValue::String(element.text.clone())),
        Some(t) if t.ends_with("Array") => parse_list(element),
        _ if element.attribute_ns(SOAP_ENC_NS, "arrayType").is_some()
            || element.attribute("SOAP-ENC:arrayType").is_some() =>
        {
            parse_list(element)
        }
        _ if !element.children.is_empty() => element
            .children
            .iter()
            .map(|child| Ok((child.local_name.clone(), parse_any(child)?)))
            .collect::<Result<Vec<_>, SoapError>>()
            .map(SoapValue::Struct),
        _ => Ok(SoapValue::String(element.text.clone())),
    }
}

fn parse_list(element: &Element) -> Result<SoapValue, SoapError> {
    element
        .children
        .iter()
        .map(parse_any)
        .collect::<Result<Vec<_>, _>>()
        .map(SoapValue::List)
}

fn parse_integer(element: &Element) -> Result<SoapValue, SoapError> {
    element
        .text
        .trim()
        .parse::<i64>()
        .map(SoapValue::Integer)
        .map_err(|_| text_mismatch(element, "integer"))
}

fn parse_boolean(element: &Element) -> Result<SoapValue, SoapError> {
    match element.text.trim() {
        "true" | "1" => Ok(SoapValue::Boolean(true)),
        "false" | "0" => Ok(SoapValue::Boolean(false)),
        _ => Err(text_mismatch(element, "boolean")),
    }
}

fn parse_double(element: &Element) -> Result<SoapValue, SoapError> {
    let text = element.text.trim();
    let value = match text {
        "INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        _ => text
            .parse::<f64>()
            .map_err(|_| text_mismatch(element, "double"))?,
    };
    Ok(SoapValue::Double(value))
}

fn text_mismatch(element: &Element, expected: &str) -> SoapError {
    SoapError::TypeMismatch {
        element: element.local_name.clone(),
        expected: expected.to_string(),
        found: format!("{:?}", element.text),
    }
}

fn write_any<W: Write>(writer: &mut Writer<W>, name: &str, value: &SoapValue) -> Result<(), SoapError> {
    match value {
        SoapValue::Null => write_nil(writer, name),
        SoapValue::Boolean(b) => {
            write_leaf(writer, name, "xsd:boolean", if *b { "true" } else { "false" })
        }
        SoapValue::Integer(i) => write_leaf(writer, name, integer_type(*i), &i.to_string()),
        SoapValue::Double(d) => write_leaf(writer, name, "xsd:double", &format_double(*d)),
        SoapValue::String(s) => write_leaf(writer, name, "xsd:string", s),
        SoapValue::List(items) => {
            check_name(name)?;
            let mut start = BytesStart::new(name);
            start.push_attribute(("xsi:type", "SOAP-ENC:Array"));
            write_event(writer, Event::Start(start))?;
            for item in items {
                write_any(writer, ARRAY_ITEM_NAME, item)?;
            }
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
        SoapValue::Struct(members) => {
            check_name(name)?;
            write_event(writer, Event::Start(BytesStart::new(name)))?;
            for (member_name, member) in members {
                write_any(writer, member_name, member)?;
            }
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
    }
}

fn write_leaf<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    xsi_type: &str,
    text: &str,
) -> Result<(), SoapError> {
    check_name(name)?;
    if let Some(c) = text.chars().find(|c| !is_xml_char(*c)) {
        return Err(SoapError::Serialization(format!(
            "<{}> contains U+{:04X}, which XML cannot carry",
            name, c as u32
        )));
    }
    let mut start = BytesStart::new(name);
    start.push_attribute(("xsi:type", xsi_type));
    write_event(writer, Event::Start(start))?;
    write_event(writer, Event::Text(BytesText::new(text)))?;
    write_event(writer, Event::End(BytesEnd::new(name)))
}

fn write_nil<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<(), SoapError> {
    check_name(name)?;
    let mut start = BytesStart::new(name);
    start.push_attribute(("xsi:nil", "true"));
    write_event(writer, Event::Empty(start))
}

fn write_event<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), SoapError> {
    writer
        .write_event(event)
        .map_err(|e| SoapError::Serialization(format!("XML write error: {}", e)))
}

/// Reject names that cannot be used as an XML element name.
fn check_name(name: &str) -> Result<(), SoapError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(SoapError::Serialization(format!(
            "{:?} is not a valid element name",
            name
        )))
    }
}

fn integer_type(i: i64) -> &'static str {
    if i32::try_from(i).is_ok() {
        "xsd:int"
    } else {
        "xsd:long"
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        let text = if d > 0.0 { "INF" } else { "-INF" };
        text.to_string()
    } else {
        d.to_string()
    }
}
