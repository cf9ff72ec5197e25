//! SOAP XML parsing utilities.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).
//! Envelopes are read into a small element tree; bodies of RPC calls are
//! short, and the type codes need random access to children.

use crate::config::SoapVersion;
use crate::error::SoapError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// Parsed SOAP envelope.
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// Detected SOAP version
    pub version: SoapVersion,
    /// Children of the SOAP Header (empty when there is no header)
    pub header: Vec<Element>,
    /// First child element of the SOAP Body
    pub body_root: Option<Element>,
}

/// An attribute with its namespace resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name as written
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    /// Unescaped value
    pub value: String,
}

/// An XML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
    /// Text content; whitespace-only text is dropped for elements with children
    pub text: String,
}

impl Element {
    /// First child with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name == local_name)
    }

    /// Attribute value by local name and namespace.
    pub fn attribute_ns(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    /// Attribute value by qualified name, as written.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Local part of `xsi:type`, if present.
    pub fn xsi_type(&self) -> Option<&str> {
        self.attribute_ns(XSI_NS, "type")
            .or_else(|| self.attribute("xsi:type"))
            .map(|t| t.rsplit(':').next().unwrap_or(t))
    }

    /// Whether `xsi:nil` is set.
    pub fn is_nil(&self) -> bool {
        matches!(
            self.attribute_ns(XSI_NS, "nil").or_else(|| self.attribute("xsi:nil")),
            Some("true") | Some("1")
        )
    }
}

/// Parse raw bytes as SOAP envelope.
pub fn parse_soap_envelope(data: &[u8]) -> Result<SoapEnvelope, SoapError> {
    let root = parse_document(data)?;

    let version = match (root.local_name.as_str(), root.namespace.as_deref()) {
        ("Envelope", Some(SOAP_11_NS)) => SoapVersion::Soap11,
        ("Envelope", Some(SOAP_12_NS)) => SoapVersion::Soap12,
        _ => {
            return Err(SoapError::InvalidEnvelope(format!(
                "root element {} is not a SOAP Envelope with a recognized namespace",
                root.name
            )))
        }
    };
    let envelope_ns = root.namespace.clone();

    let mut header = Vec::new();
    let mut body = None;
    for child in root.children {
        if child.namespace != envelope_ns {
            continue;
        }
        match child.local_name.as_str() {
            "Header" if body.is_none() => header = child.children,
            "Body" => body = Some(child),
            _ => {}
        }
    }

    let body = body.ok_or_else(|| SoapError::InvalidEnvelope("missing SOAP Body".to_string()))?;

    Ok(SoapEnvelope {
        version,
        header,
        body_root: body.children.into_iter().next(),
    })
}

/// Parse a standalone XML document into its root element.
pub fn parse_document(data: &[u8]) -> Result<Element, SoapError> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| SoapError::XmlParse(format!("Invalid UTF-8: {}", e)))?;

    check_xxe_patterns(xml_str)?;
    check_xml_chars(xml_str)?;

    let mut reader = Reader::from_str(xml_str);

    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let element = open_element(e, &mut scopes)?;
                stack.push(element);
            }

            Ok(Event::Empty(ref e)) => {
                let element = open_element(e, &mut scopes)?;
                scopes.pop();
                close_element(element, &mut stack, &mut root)?;
            }

            Ok(Event::End(_)) => {
                scopes.pop();
                let element = stack
                    .pop()
                    .ok_or_else(|| SoapError::XmlParse("unbalanced end tag".to_string()))?;
                close_element(element, &mut stack, &mut root)?;
            }

            Ok(Event::Text(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| SoapError::XmlParse(format!("XML parse error: {}", err)))?;
                    check_xml_chars(&text)?;
                    current.text.push_str(&text);
                }
            }

            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }

            Ok(Event::DocType(_)) => {
                return Err(SoapError::XxeDetected(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SoapError::XmlParse(format!("XML parse error: {}", e)));
            }

            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(SoapError::XmlParse(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| SoapError::XmlParse("document has no root element".to_string()))
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<(), SoapError> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(SoapError::XxeDetected(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(SoapError::XxeDetected(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Whether `c` may appear in an XML 1.0 document.
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&c)
        || ('\u{E000}'..='\u{FFFD}').contains(&c)
        || c >= '\u{10000}'
}

fn check_xml_chars(text: &str) -> Result<(), SoapError> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(SoapError::XmlParse(format!(
            "character U+{:04X} is not allowed in XML",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// Build an element from its start tag and push its namespace scope.
fn open_element(
    e: &BytesStart,
    scopes: &mut Vec<Vec<(String, String)>>,
) -> Result<Element, SoapError> {
    let mut declarations = Vec::new();
    let mut raw_attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|err| SoapError::XmlParse(format!("Invalid attribute: {}", err)))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| SoapError::XmlParse(format!("Invalid UTF-8: {}", err)))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| SoapError::XmlParse(format!("Invalid attribute value: {}", err)))?
            .into_owned();
        check_xml_chars(&value)?;

        if key == "xmlns" {
            declarations.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }
    scopes.push(declarations);

    let name = qualified_name_str(e)?;
    let (prefix, local_name) = split_name(&name);
    let namespace = resolve_prefix(scopes, prefix.unwrap_or(""));

    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local) = split_name(&key);
            // Unprefixed attributes are in no namespace.
            let namespace = prefix.and_then(|p| resolve_prefix(scopes, p));
            Attribute {
                local_name: local.to_string(),
                name: key.clone(),
                namespace,
                value,
            }
        })
        .collect();

    Ok(Element {
        local_name: local_name.to_string(),
        name: name.clone(),
        namespace,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Attach a finished element to its parent, or make it the root.
fn close_element(
    mut element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), SoapError> {
    if !element.children.is_empty() && element.text.trim().is_empty() {
        element.text.clear();
    }

    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(SoapError::XmlParse(
                "document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn resolve_prefix(scopes: &[Vec<(String, String)>], prefix: &str) -> Option<String> {
    if prefix == "xml" {
        return Some("http://www.w3.org/XML/1998/namespace".to_string());
    }
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty())
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Extract qualified name from element.
fn qualified_name_str(e: &BytesStart) -> Result<String, SoapError> {
    let name = e.name();
    std::str::from_utf8(name.as_ref())
        .map(String::from)
        .map_err(|err| SoapError::XmlParse(format!("Invalid UTF-8 in element name: {}", err)))
}

/// Extract SOAPAction from HTTP header value (removes quotes).
pub fn parse_soap_action(header_value: &str) -> String {
    header_value.trim().trim_matches('"').to_string()
}
