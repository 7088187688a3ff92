//! XML encoding of the legacy packet format.
//!
//! A legacy packet is a list of named objects. In XML every object becomes
//! one element under `<packet>`: its keys become attributes, except
//! `content`, which becomes the element's text. Decoding reverses this so the
//! XML and JSON encodings normalize to the same `[{"name": {...}}, ...]`
//! shape; attribute values decode as strings.

use std::fmt::Display;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::error::{Cause, Error, Result};

/// Key whose value is written as element text instead of an attribute.
pub const CONTENT_KEY: &str = "content";

const ROOT: &str = "packet";

/// Encode named objects as a `<packet>` document.
pub fn encode_packet<'a, I>(entries: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a Map<String, Value>)>,
{
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Start(BytesStart::new(ROOT)))
        .map_err(encode_error)?;

    for (name, fields) in entries {
        let mut element = BytesStart::new(name);
        for (key, value) in fields {
            if key != CONTENT_KEY {
                element.push_attribute((key.as_str(), attribute_text(value).as_str()));
            }
        }
        match fields.get(CONTENT_KEY) {
            Some(content) => {
                let content = attribute_text(content);
                writer
                    .write_event(Event::Start(element))
                    .map_err(encode_error)?;
                writer
                    .write_event(Event::Text(BytesText::new(&content)))
                    .map_err(encode_error)?;
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(encode_error)?;
            }
            None => writer
                .write_event(Event::Empty(element))
                .map_err(encode_error)?,
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(encode_error)?;
    String::from_utf8(writer.into_inner()).map_err(encode_error)
}

/// Decode a `<packet>` document (or a single bare element) into an array of
/// single-key objects.
pub fn decode_packet(text: &str) -> Result<Value> {
    let mut reader = Reader::from_str(text);
    let mut entries = Vec::new();
    let mut current: Option<(String, Map<String, Value>)> = None;
    // depth of elements nested inside the current entry; they are skipped
    let mut nested = 0usize;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                if current.is_some() {
                    nested += 1;
                    continue;
                }
                let (name, fields) = element(&start)?;
                if name != ROOT {
                    current = Some((name, fields));
                }
            }
            Event::Empty(start) => {
                if current.is_some() {
                    continue;
                }
                let (name, fields) = element(&start)?;
                if name != ROOT {
                    entries.push(entry(name, fields));
                }
            }
            Event::Text(text) => {
                if let Some((_, fields)) = current.as_mut().filter(|_| nested == 0) {
                    let text = text.unescape().map_err(malformed)?;
                    append_content(fields, &text);
                }
            }
            Event::CData(data) => {
                if let Some((_, fields)) = current.as_mut().filter(|_| nested == 0) {
                    let data = data.into_inner();
                    append_content(fields, &String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                if nested > 0 {
                    nested -= 1;
                } else if let Some((name, fields)) = current.take() {
                    entries.push(entry(name, fields));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Value::Array(entries))
}

fn element(start: &BytesStart<'_>) -> Result<(String, Map<String, Value>)> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut fields = Map::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(malformed)?;
        fields.insert(key, Value::String(value.into_owned()));
    }
    Ok((name, fields))
}

fn entry(name: String, fields: Map<String, Value>) -> Value {
    let mut object = Map::new();
    object.insert(name, Value::Object(fields));
    Value::Object(object)
}

fn append_content(fields: &mut Map<String, Value>, text: &str) {
    match fields.get_mut(CONTENT_KEY) {
        Some(Value::String(content)) => content.push_str(text),
        _ => {
            fields.insert(CONTENT_KEY.to_string(), Value::String(text.to_string()));
        }
    }
}

fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => if *flag { "1" } else { "0" }.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn malformed(err: impl Display) -> Error {
    Error::protocol("malformed XML response").with_cause(Cause::Io(err.to_string()))
}

fn encode_error(err: impl Display) -> Error {
    Error::protocol("could not encode XML packet").with_cause(Cause::Io(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_encode_attributes_and_content() {
        let thread = fields(json!({"thread": "1", "nicoru": 3, "user_id": ""}));
        let leaves = fields(json!({"thread": "1", "content": "0-1:100,100,nicoru:100"}));
        let xml = encode_packet([("thread", &thread), ("thread_leaves", &leaves)]).unwrap();

        assert_eq!(
            xml,
            "<packet><thread nicoru=\"3\" thread=\"1\" user_id=\"\"/>\
             <thread_leaves thread=\"1\">0-1:100,100,nicoru:100</thread_leaves></packet>"
        );
    }

    #[test]
    fn test_encode_escapes() {
        let chat = fields(json!({"mail": "\"big\"", "content": "a < b & c"}));
        let xml = encode_packet([("chat", &chat)]).unwrap();
        assert!(xml.contains("mail=\"&quot;big&quot;\""));
        assert!(xml.contains(">a &lt; b &amp; c</chat>"));
    }

    #[test]
    fn test_decode_packet() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<packet>
  <thread resultcode="0" thread="1" last_res="12" ticket="0x1"/>
  <leaf thread="1" count="12"/>
  <chat thread="1" no="1" vpos="100" date="1500000000" mail="184">first &amp; best</chat>
</packet>"#;
        let value = decode_packet(xml).unwrap();
        assert_eq!(
            value,
            json!([
                {"thread": {"resultcode": "0", "thread": "1", "last_res": "12", "ticket": "0x1"}},
                {"leaf": {"thread": "1", "count": "12"}},
                {"chat": {"thread": "1", "no": "1", "vpos": "100", "date": "1500000000",
                          "mail": "184", "content": "first & best"}}
            ])
        );
    }

    #[test]
    fn test_decode_bare_element() {
        let value = decode_packet(r#"<chat_result thread="1" status="0" no="13"/>"#).unwrap();
        assert_eq!(
            value,
            json!([{"chat_result": {"thread": "1", "status": "0", "no": "13"}}])
        );
    }

    #[test]
    fn test_decode_cdata_and_nested_elements() {
        let xml = "<packet><chat no=\"1\"><![CDATA[<raw>]]><b>ignored</b></chat></packet>";
        let value = decode_packet(xml).unwrap();
        assert_eq!(value, json!([{"chat": {"no": "1", "content": "<raw>"}}]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_packet("<packet><chat no=\"1></packet>").is_err());
    }

    #[test]
    fn test_roundtrip_through_xml() {
        let chat = fields(json!({"thread": "9", "content": "hello"}));
        let xml = encode_packet([("chat", &chat)]).unwrap();
        assert_eq!(decode_packet(&xml).unwrap(), json!([{"chat": {"thread": "9", "content": "hello"}}]));
    }
}
