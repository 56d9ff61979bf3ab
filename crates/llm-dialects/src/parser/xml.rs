use std::borrow::Cow;

use quick_xml::escape::unescape;
use serde_json::{Map, Value};

use super::{ToolCallParser, validate_call};
use crate::dialect::xml_tools::FUNCTION_CALLS_CLOSE;
use crate::error::LlmError;
use crate::stream::{StopReason, StreamEvent};
use crate::tool::{ToolCall, ToolDefinition};

const FUNCTION_CALLS_OPEN: &str = "<function_calls>";

/// Finds `<function_calls>` blocks in streamed text.
///
/// Text before the opening tag is forwarded as it arrives. A chunk ending in
/// something that could be the start of the tag (`<func`) is held back
/// until the next chunk decides it. Everything from the tag onward is
/// captured and parsed once the response ends; text after the closing tag
/// is dropped.
#[derive(Debug, Default)]
pub struct XmlToolParser {
    tools: Vec<ToolDefinition>,
    held: String,
    captured: Option<String>,
    finished: bool,
}

impl XmlToolParser {
    /// A parser validating calls against `tools` (empty accepts any call).
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    fn push_text(&mut self, text: &str) -> Option<StreamEvent> {
        if let Some(captured) = &mut self.captured {
            captured.push_str(text);
            return None;
        }
        self.held.push_str(text);
        let release = if let Some(pos) = self.held.find(FUNCTION_CALLS_OPEN) {
            self.captured = Some(self.held.split_off(pos));
            std::mem::take(&mut self.held)
        } else {
            let keep = partial_marker_len(&self.held);
            let split = self.held.len() - keep;
            let rest = self.held.split_off(split);
            std::mem::replace(&mut self.held, rest)
        };
        (!release.is_empty()).then_some(StreamEvent::TextDelta(release))
    }

    fn close(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;
        let mut out = Vec::new();
        if !self.held.is_empty() {
            out.push(StreamEvent::TextDelta(std::mem::take(&mut self.held)));
        }
        if let Some(captured) = self.captured.take() {
            let calls = parse_function_calls(&captured)?;
            tracing::debug!(calls = calls.len(), "function_calls block parsed");
            for (index, call) in calls.into_iter().enumerate() {
                validate_call(&self.tools, &call)?;
                out.push(StreamEvent::ToolCallComplete {
                    index: u32::try_from(index).unwrap_or(u32::MAX),
                    call,
                });
            }
        }
        Ok(out)
    }
}

impl ToolCallParser for XmlToolParser {
    fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, LlmError> {
        match event {
            StreamEvent::TextDelta(text) => Ok(self.push_text(&text).into_iter().collect()),
            StreamEvent::Done { stop_reason } => {
                let mut out = self.close()?;
                let called = out
                    .iter()
                    .any(|e| matches!(e, StreamEvent::ToolCallComplete { .. }));
                out.push(StreamEvent::Done {
                    stop_reason: if called { StopReason::ToolUse } else { stop_reason },
                });
                Ok(out)
            }
            other => Ok(vec![other]),
        }
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        self.close()
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the
/// opening tag.
fn partial_marker_len(text: &str) -> usize {
    (1..FUNCTION_CALLS_OPEN.len())
        .rev()
        .find(|&n| text.ends_with(&FUNCTION_CALLS_OPEN[..n]))
        .unwrap_or(0)
}

const INVOKE_OPEN: &str = "<invoke>";
const INVOKE_CLOSE: &str = "</invoke>";

#[derive(Default)]
struct Invoke {
    name: Option<String>,
    arguments: Map<String, Value>,
}

/// Parses every `<invoke>` in the first `<function_calls>` block of `raw`.
///
/// Model output in this convention is rarely well-formed XML, so the block
/// is scanned leniently: a parameter's value is the raw text up to its
/// matching close tag, with entities decoded where they parse. A missing
/// `</function_calls>` is tolerated, since generation usually stops on that
/// very sequence. Values that look like JSON arrays or objects are decoded;
/// everything else stays a string. Calls are given ids `tool_0`, `tool_1`,
/// and so on.
pub fn parse_function_calls(raw: &str) -> Result<Vec<ToolCall>, LlmError> {
    let Some(start) = raw.find(FUNCTION_CALLS_OPEN) else {
        return Ok(Vec::new());
    };
    let captured = &raw[start..];
    let block = &captured[FUNCTION_CALLS_OPEN.len()..];
    let block = block.find(FUNCTION_CALLS_CLOSE).map_or(block, |end| &block[..end]);

    let mut calls = Vec::new();
    let mut rest = block;
    while let Some(open) = rest.find(INVOKE_OPEN) {
        let (invoke, after) = scan_invoke(&rest[open + INVOKE_OPEN.len()..]);
        let call = finish_invoke(invoke, calls.len())
            .map_err(|message| LlmError::malformed_tool_call(message, captured.to_owned()))?;
        calls.push(call);
        rest = after;
    }
    Ok(calls)
}

/// Reads one invoke body, returning it and the text after `</invoke>`. A
/// following `<invoke>` also ends the body when the close tag is missing.
fn scan_invoke(mut text: &str) -> (Invoke, &str) {
    let mut invoke = Invoke::default();
    while let Some(at) = text.find('<') {
        text = &text[at..];
        if let Some(after) = text.strip_prefix(INVOKE_CLOSE) {
            return (invoke, after);
        }
        if text.starts_with(INVOKE_OPEN) {
            return (invoke, text);
        }
        let Some((element, after)) = read_element(text) else {
            text = &text[1..];
            continue;
        };
        match element.name {
            "tool_name" => invoke.name = Some(unescape_lenient(element.content).trim().to_owned()),
            "parameters" => {
                for param in elements(element.content) {
                    invoke
                        .arguments
                        .insert(param.name.to_owned(), parameter_value(param.content));
                }
            }
            _ => {}
        }
        text = after;
    }
    (invoke, "")
}

struct Element<'a> {
    name: &'a str,
    content: &'a str,
}

/// Reads the element opening at the start of `text`, returning it and the
/// text after its close tag. An unclosed element runs to the end of `text`.
/// `None` when `text` does not start with an opening tag.
fn read_element(text: &str) -> Option<(Element<'_>, &str)> {
    let inner = text.strip_prefix('<')?;
    let name_len = inner
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(inner.len());
    let name = &inner[..name_len];
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        return None;
    }
    let tag_end = inner.find('>')?;
    let after_tag = &inner[tag_end + 1..];
    if inner[..tag_end].ends_with('/') {
        return Some((Element { name, content: "" }, after_tag));
    }
    Some(match matching_close(after_tag, name) {
        Some((content_end, close_end)) => (
            Element {
                name,
                content: &after_tag[..content_end],
            },
            &after_tag[close_end..],
        ),
        None => (
            Element {
                name,
                content: after_tag,
            },
            "",
        ),
    })
}

/// Top-level elements of `text`, skipping anything that is not a tag.
fn elements(mut text: &str) -> impl Iterator<Item = Element<'_>> {
    std::iter::from_fn(move || {
        while let Some(at) = text.find('<') {
            let tail = &text[at..];
            if let Some((element, after)) = read_element(tail) {
                text = after;
                return Some(element);
            }
            text = &tail[1..];
        }
        None
    })
}

/// Byte range `(start, end)` of the `</name>` closing the element whose
/// content begins `text`, counting nested elements of the same name.
fn matching_close(text: &str, name: &str) -> Option<(usize, usize)> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut depth = 0_usize;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('<') {
        let at = pos + offset;
        let tail = &text[at..];
        if let Some(cdata) = tail.strip_prefix("<![CDATA[") {
            pos = at + cdata.find("]]>").map_or(tail.len(), |end| "<![CDATA[".len() + end + 3);
            continue;
        }
        if tail.starts_with(&close) {
            if depth == 0 {
                return Some((at, at + close.len()));
            }
            depth -= 1;
            pos = at + close.len();
        } else if tail
            .strip_prefix(open.as_str())
            .is_some_and(|t| t.starts_with(|c: char| c == '>' || c.is_whitespace()))
        {
            if !tail.find('>').is_some_and(|end| tail[..end].ends_with('/')) {
                depth += 1;
            }
            pos = at + open.len();
        } else {
            pos = at + 1;
        }
    }
    None
}

/// Decodes the entities in `raw` that parse and keeps every other `&`
/// literally.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if let Ok(text) = unescape(raw) {
        return text;
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&end| {
                !tail[1..end].contains(|c: char| matches!(c, '&' | '<') || c.is_whitespace())
            })
            .and_then(|end| unescape(&tail[..=end]).ok().map(|text| (text, end + 1)));
        match decoded {
            Some((text, len)) => {
                out.push_str(&text);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn finish_invoke(invoke: Invoke, index: usize) -> Result<ToolCall, String> {
    let name = invoke
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| format!("invoke {index} has no tool_name"))?;
    Ok(ToolCall::new(format!("tool_{index}"), name, invoke.arguments))
}

fn parameter_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Some(cdata) = trimmed.strip_prefix("<![CDATA[").and_then(|t| t.strip_suffix("]]>")) {
        return Value::String(cdata.to_owned());
    }
    let text = unescape_lenient(raw);
    let json = text.trim();
    if json.starts_with('[') || json.starts_with('{') {
        if let Ok(value) = serde_json::from_str(json) {
            return value;
        }
    }
    Value::String(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::collect_tool_calls;
    use crate::tool::{ParamType, Parameter};
    use serde_json::json;

    fn texts(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_image_prompts_decode_as_json_array() {
        let raw = "<function_calls>\n<invoke>\n<tool_name>image</tool_name>\n<parameters>\n<prompts>[\"a\",\"b\"]</prompts>\n</parameters>\n</invoke>\n</function_calls>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "image");
        assert_eq!(calls[0].arguments["prompts"], json!(["a", "b"]));
        assert_eq!(calls[0].id, "tool_0");
    }

    #[test]
    fn test_missing_close_tag_is_tolerated() {
        let raw = "<function_calls><invoke><tool_name>search</tool_name><parameters><q>rust &amp; xml</q></parameters></invoke>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls[0].arguments["q"], json!("rust & xml"));
    }

    #[test]
    fn test_multiple_invokes_get_sequential_ids() {
        let raw = "<function_calls><invoke><tool_name>a</tool_name><parameters><x>1</x></parameters></invoke><invoke><tool_name>b</tool_name><parameters><flag/></parameters></invoke></function_calls>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].id, "tool_1");
        assert_eq!(calls[0].arguments["x"], json!("1"));
        assert_eq!(calls[1].arguments["flag"], json!(""));
    }

    #[test]
    fn test_invoke_without_name_is_malformed() {
        let raw = "<function_calls><invoke><parameters><x>1</x></parameters></invoke></function_calls>";
        let err = parse_function_calls(raw).unwrap_err();
        assert!(matches!(err, LlmError::ToolCallMalformed { .. }));
    }

    #[test]
    fn test_marker_split_across_chunks_is_held_back() {
        let mut parser = XmlToolParser::default();
        let mut out = parser.push(StreamEvent::TextDelta("Let me look. <func".into())).unwrap();
        assert_eq!(texts(&out), "Let me look. ");
        out.extend(
            parser
                .push(StreamEvent::TextDelta(
                    "tion_calls><invoke><tool_name>search</tool_name><parameters><q>hi</q></parameters></invoke>".into(),
                ))
                .unwrap(),
        );
        out.extend(
            parser
                .push(StreamEvent::Done {
                    stop_reason: StopReason::StopSequence,
                })
                .unwrap(),
        );
        assert_eq!(texts(&out), "Let me look. ");
        assert!(out.iter().any(
            |e| matches!(e, StreamEvent::ToolCallComplete { call, .. } if call.name == "search")
        ));
        assert_eq!(
            out.last(),
            Some(&StreamEvent::Done {
                stop_reason: StopReason::ToolUse
            })
        );
    }

    #[test]
    fn test_false_marker_prefix_is_released() {
        let mut parser = XmlToolParser::default();
        let first = parser.push(StreamEvent::TextDelta("a <fun".into())).unwrap();
        assert_eq!(texts(&first), "a ");
        let second = parser.push(StreamEvent::TextDelta("ny> b".into())).unwrap();
        assert_eq!(texts(&second), "<funny> b");
        assert!(parser.finish().unwrap().is_empty());
    }

    #[test]
    fn test_trailing_held_text_flushed_on_finish() {
        let mut parser = XmlToolParser::default();
        parser.push(StreamEvent::TextDelta("ends with <".into())).unwrap();
        let out = parser.finish().unwrap();
        assert_eq!(texts(&out), "<");
        assert!(parser.finish().unwrap().is_empty());
    }

    #[test]
    fn test_calls_validated_against_tools() {
        let tools = vec![
            ToolDefinition::new("search", "find things")
                .with_parameter(Parameter::new("q", ParamType::String, "query").required()),
        ];
        let mut parser = XmlToolParser::new(tools);
        let raw = "<function_calls><invoke><tool_name>search</tool_name><parameters></parameters></invoke></function_calls>";
        let err =
            collect_tool_calls(&mut parser, [StreamEvent::TextDelta(raw.into())]).unwrap_err();
        assert!(matches!(err, LlmError::ToolCallMalformed { message, .. } if message.contains("`q`")));
    }

    #[test]
    fn test_raw_angle_bracket_in_value_kept() {
        let raw = "<function_calls><invoke><tool_name>run</tool_name><parameters><code>if a < b: print(a)</code></parameters></invoke></function_calls>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls[0].arguments["code"], json!("if a < b: print(a)"));
    }

    #[test]
    fn test_inline_markup_in_value_kept_whole() {
        let raw = "<function_calls><invoke><tool_name>post</tool_name><parameters><body>Hello <b>world</b> & friends</body><title>x &lt; y</title></parameters></invoke></function_calls>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls[0].arguments["body"], json!("Hello <b>world</b> & friends"));
        assert_eq!(calls[0].arguments["title"], json!("x < y"));
    }

    #[test]
    fn test_nested_same_name_and_cdata_values() {
        let raw = "<function_calls><invoke><tool_name>post</tool_name><parameters><div><div>inner</div> outer</div><src><![CDATA[a </src> b]]></src></parameters></invoke></function_calls>";
        let calls = parse_function_calls(raw).unwrap();
        assert_eq!(calls[0].arguments["div"], json!("<div>inner</div> outer"));
        assert_eq!(calls[0].arguments["src"], json!("a </src> b"));
        assert_eq!(calls[0].name, "post");
    }

    #[test]
    fn test_missing_invoke_close_before_next_invoke() {
        let raw = "<function_calls><invoke><tool_name>a</tool_name><parameters><x>1</x></parameters><invoke><tool_name>b</tool_name></invoke>";
        let calls = parse_function_calls(raw).unwrap();
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
