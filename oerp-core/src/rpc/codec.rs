//! # JSON <-> XML-RPC Codec
//!
//! This module transcodes `serde_json::Value` to XML-RPC documents (and vice versa), so the
//! rest of the crate only ever deals with JSON-shaped data.
//!
//! ## How it works
//!
//! 1. **Encoder (JSON -> XML)**: builds a `<methodCall>` document. Integers become `<int>`,
//!    other numbers `<double>`, `null` becomes `<nil/>`, arrays and objects become
//!    `<array>` and `<struct>`.
//!
//! 2. **Decoder (XML -> JSON)**: reads the `<methodResponse>` into a small element tree with
//!    `quick-xml`, then maps it back to a `serde_json::Value`. A `<fault>` is turned into a
//!    [`TransportError::Fault`]: OpenERP puts the error message in `faultCode` and the server
//!    traceback in `faultString`.
//!
//! `<dateTime.iso8601>` and `<base64>` values are kept as strings, the way the server reads
//! them back.
use super::TransportError;
use quick_xml::{Reader, escape::escape, events::Event};
use serde_json::{Map, Number, Value};
use std::fmt::Write;

/// Serializes a call to `method` with positional `params` into an XML-RPC document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Null => out.push_str("<nil/>"),
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => {
                let _ = write!(out, "<int>{i}</int>");
            }
            (None, Some(u)) => {
                let _ = write!(out, "<int>{u}</int>");
            }
            _ => {
                let _ = write!(out, "<double>{}</double>", n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Object(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Parses a `<methodResponse>` document.
///
/// # Returns
///
/// * `Ok(Value)` - The single returned parameter.
/// * `Err(TransportError::Fault)` - The server answered with a fault.
/// * `Err(TransportError::Malformed)` - The document is not a valid XML-RPC response.
pub fn decode_response(xml: &str) -> Result<Value, TransportError> {
    let root = parse_document(xml)?;

    if root.name != "methodResponse" {
        return Err(malformed(format!(
            "expected <methodResponse>, found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| malformed("<fault> without <value>"))?;
        return Err(fault_from(decode_value(value)?));
    }

    root.child("params")
        .and_then(|params| params.child("param"))
        .and_then(|param| param.child("value"))
        .ok_or_else(|| malformed("response without <params><param><value>"))
        .and_then(decode_value)
}

fn fault_from(value: Value) -> TransportError {
    let code = value.get("faultCode").cloned().unwrap_or(Value::Null);
    let string = value
        .get("faultString")
        .and_then(Value::as_str)
        .map(str::to_string);

    let message = match code {
        Value::String(s) if !s.trim().is_empty() => s,
        Value::Number(n) => string
            .clone()
            .unwrap_or_else(|| format!("XML-RPC fault {n}")),
        _ => string.clone().unwrap_or_else(|| "Unknown XML-RPC fault".to_string()),
    };

    TransportError::Fault {
        message,
        traceback: string,
    }
}

fn decode_value(element: &Element) -> Result<Value, TransportError> {
    let Some(typed) = element.elements().next() else {
        // A <value> without type element is an implicit string.
        return Ok(Value::String(element.text()));
    };

    match typed.name.as_str() {
        "int" | "i4" | "i8" => typed
            .text()
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| malformed(format!("invalid <{}>: {e}", typed.name))),
        "boolean" => match typed.text().trim() {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("invalid <boolean> '{other}'"))),
        },
        "double" => {
            let raw = typed.text();
            let parsed = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| malformed(format!("invalid <double>: {e}")))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| malformed(format!("non finite <double> '{}'", raw.trim())))
        }
        "string" => Ok(Value::String(typed.text())),
        "dateTime.iso8601" | "base64" => Ok(Value::String(typed.text().trim().to_string())),
        "nil" => Ok(Value::Null),
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| malformed("<array> without <data>"))?;
            data.elements()
                .filter(|e| e.name == "value")
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = Map::new();
            for member in typed.elements().filter(|e| e.name == "member") {
                let name = member
                    .child("name")
                    .ok_or_else(|| malformed("<member> without <name>"))?
                    .text();
                let value = member
                    .child("value")
                    .ok_or_else(|| malformed("<member> without <value>"))?;
                members.insert(name, decode_value(value)?);
            }
            Ok(Value::Object(members))
        }
        other => Err(malformed(format!("unknown value type <{other}>"))),
    }
}

fn malformed(msg: impl Into<String>) -> TransportError {
    TransportError::Malformed(msg.into())
}

/// A minimal XML element tree, enough to walk an XML-RPC document.
#[derive(Debug, Default)]
struct Element {
    name: String,
    children: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

fn parse_document(xml: &str) -> Result<Element, TransportError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("invalid XML: {e}")))?;

        match event {
            Event::Start(start) => stack.push(Element {
                name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                children: Vec::new(),
            }),
            Event::Empty(empty) => {
                let element = Element {
                    name: String::from_utf8_lossy(empty.name().as_ref()).into_owned(),
                    children: Vec::new(),
                };
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| malformed(format!("invalid text: {e}")))?;
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.children.push(Node::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }

    root.ok_or_else(|| malformed("empty document"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => *root = Some(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_call() {
        let xml = encode_call(
            "execute",
            &[
                json!("demo"),
                json!(1),
                json!("a<b"),
                json!([42]),
                json!({"credit_limit": 250.5, "active": true, "comment": null}),
            ],
        );

        assert!(xml.starts_with("<?xml version=\"1.0\"?>\n<methodCall><methodName>execute</methodName>"));
        assert!(xml.contains("<param><value><string>demo</string></value></param>"));
        assert!(xml.contains("<param><value><int>1</int></value></param>"));
        assert!(xml.contains("<string>a&lt;b</string>"));
        assert!(xml.contains("<array><data><value><int>42</int></value></data></array>"));
        assert!(xml.contains("<member><name>credit_limit</name><value><double>250.5</double></value></member>"));
        assert!(xml.contains("<member><name>active</name><value><boolean>1</boolean></value></member>"));
        assert!(xml.contains("<member><name>comment</name><value><nil/></value></member>"));
    }

    #[test]
    fn test_decode_read_response() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><array><data>
<value><struct>
<member>
<name>id</name>
<value><int>42</int></value>
</member>
<member>
<name>name</name>
<value><string>Acme &amp; Sons</string></value>
</member>
<member>
<name>credit_limit</name>
<value><double>100.0</double></value>
</member>
<member>
<name>country_id</name>
<value><array><data>
<value><int>74</int></value>
<value>France</value>
</data></array></value>
</member>
<member>
<name>comment</name>
<value><boolean>0</boolean></value>
</member>
</struct></value>
</data></array></value>
</param>
</params>
</methodResponse>
"#;

        let value = decode_response(xml).unwrap();

        assert_eq!(
            value,
            json!([{
                "id": 42,
                "name": "Acme & Sons",
                "credit_limit": 100.0,
                "country_id": [74, "France"],
                "comment": false,
            }])
        );
    }

    #[test]
    fn test_decode_fault() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
<fault>
<value><struct>
<member>
<name>faultCode</name>
<value><string>Object res.foo doesn't exist</string></value>
</member>
<member>
<name>faultString</name>
<value><string>Traceback (most recent call last): ...</string></value>
</member>
</struct></value>
</fault>
</methodResponse>
"#;

        match decode_response(xml) {
            Err(TransportError::Fault { message, traceback }) => {
                assert_eq!(message, "Object res.foo doesn't exist");
                assert_eq!(
                    traceback.as_deref(),
                    Some("Traceback (most recent call last): ...")
                );
            }
            other => panic!("Expected a fault, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_response("<html><body>Bad gateway</body></html>"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            decode_response("<methodResponse><params>"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            decode_response("<methodResponse><params><param><value><int>x</int></value></param></params></methodResponse>"),
            Err(TransportError::Malformed(_))
        ));
    }
}
