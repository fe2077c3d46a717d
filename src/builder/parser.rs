// In: src/builder/parser.rs

//! Incremental MediaWiki export parser.
//!
//! Pulls `quick-xml` events from any `BufRead` and turns every `<revision>` into one
//! `Block`. Only one revision subtree is held in memory at a time, and since events
//! are pulled from the reader's own buffer, a revision may straddle any number of
//! decoder reads.
//!
//! Revision subtrees are converted the usual "xml as dict" way: child elements become
//! keys, attributes become `@name`, text next to attributes or children becomes
//! `#text`, repeated names become arrays and empty elements become `null`.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::block::{Block, Metadata};
use crate::error::{BloarkError, CodecError};

type Attrs = Vec<(String, String)>;

/// One element of the revision subtree under construction.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Attrs,
    children: Vec<(String, Value)>,
    text: String,
}

impl Node {
    fn new(name: String, attrs: Attrs) -> Self {
        Self {
            name,
            attrs,
            ..Self::default()
        }
    }

    fn into_value(self) -> Value {
        if self.attrs.is_empty() && self.children.is_empty() {
            return if self.text.is_empty() {
                Value::Null
            } else {
                Value::String(self.text)
            };
        }

        let mut map = Map::new();
        for (key, value) in self.attrs {
            map.insert(format!("@{}", key), Value::String(value));
        }
        for (key, value) in self.children {
            let merged = match map.remove(&key) {
                None => value,
                Some(Value::Array(mut items)) => {
                    items.push(value);
                    Value::Array(items)
                }
                Some(previous) => Value::Array(vec![previous, value]),
            };
            map.insert(key, merged);
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text));
        }
        Value::Object(map)
    }
}

/// Owned view of the events the state machine cares about.
enum Item {
    Open(String, Attrs),
    Leaf(String, Attrs),
    Close,
    Text(String),
    Eof,
    Skip,
}

#[derive(Debug, Default)]
struct PageState {
    id: Option<String>,
    title: Option<String>,
    seq: i64,
}

pub struct RevisionParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    path: PathBuf,
    source: String,
    /// Open elements outside of the current revision.
    stack: Vec<String>,
    page: PageState,
    /// Open elements of the current revision, outermost first.
    revision: Vec<Node>,
    done: bool,
}

impl<R: BufRead> RevisionParser<R> {
    pub fn new(inner: R, path: &Path) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            path: path.to_path_buf(),
            source,
            stack: Vec::new(),
            page: PageState::default(),
            revision: Vec::new(),
            done: false,
        }
    }

    fn read_item(&mut self) -> Result<Item, BloarkError> {
        self.buf.clear();
        let event = match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => event,
            Err(quick_xml::Error::Io(e)) => {
                return Err(CodecError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
            Err(e) => {
                return Err(BloarkError::Xml(format!(
                    "{} at byte {} of {}",
                    e,
                    self.reader.buffer_position(),
                    self.path.display()
                )))
            }
        };
        let item = match event {
            Event::Start(e) => Item::Open(element_name(&e), attributes(&e)?),
            Event::Empty(e) => Item::Leaf(element_name(&e), attributes(&e)?),
            Event::End(_) => Item::Close,
            Event::Text(e) => Item::Text(e.unescape()?.into_owned()),
            Event::CData(e) => Item::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()),
            Event::Eof => Item::Eof,
            _ => Item::Skip,
        };
        Ok(item)
    }

    /// Outer `Err` is fatal for the stream; inner `Err` only costs one revision.
    fn advance(&mut self) -> Result<Option<Result<Block, BloarkError>>, BloarkError> {
        loop {
            match self.read_item()? {
                Item::Open(name, attrs) => {
                    if !self.revision.is_empty() {
                        self.revision.push(Node::new(name, attrs));
                    } else if self.at_page_level() && name == "revision" {
                        self.revision.push(Node::new(name, attrs));
                    } else {
                        if self.stack.len() == 1 && name == "page" {
                            self.page = PageState::default();
                        }
                        self.stack.push(name);
                    }
                }
                Item::Leaf(name, attrs) => {
                    if let Some(parent) = self.revision.last_mut() {
                        let value = Node::new(name.clone(), attrs).into_value();
                        parent.children.push((name, value));
                    } else if self.at_page_level() && name == "revision" {
                        let seq = self.next_seq();
                        return Ok(Some(self.finish_revision(Node::new(name, attrs), seq)));
                    }
                }
                Item::Close => {
                    if let Some(node) = self.revision.pop() {
                        match self.revision.last_mut() {
                            Some(parent) => {
                                let name = node.name.clone();
                                parent.children.push((name, node.into_value()));
                            }
                            None => {
                                let seq = self.next_seq();
                                return Ok(Some(self.finish_revision(node, seq)));
                            }
                        }
                    } else {
                        self.stack.pop();
                    }
                }
                Item::Text(text) => {
                    if let Some(node) = self.revision.last_mut() {
                        node.text.push_str(&text);
                    } else if self.stack.len() == 3 && self.stack[1] == "page" {
                        match self.stack[2].as_str() {
                            "id" => self.page.id = Some(text.trim().to_string()),
                            "title" => self.page.title = Some(text.trim().to_string()),
                            _ => {}
                        }
                    }
                }
                Item::Eof => {
                    if !self.stack.is_empty() || !self.revision.is_empty() {
                        return Err(BloarkError::Xml(format!(
                            "unexpected end of stream inside <{}> in {}",
                            self.stack.last().map(String::as_str).unwrap_or("revision"),
                            self.path.display()
                        )));
                    }
                    return Ok(None);
                }
                Item::Skip => {}
            }
        }
    }

    fn at_page_level(&self) -> bool {
        self.stack.len() == 2 && self.stack[1] == "page"
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.page.seq;
        self.page.seq += 1;
        seq
    }

    fn finish_revision(&self, node: Node, seq: i64) -> Result<Block, BloarkError> {
        let article_id = self.page.id.clone().ok_or_else(|| {
            BloarkError::Parse(format!(
                "revision {} of a page without <id> in {}",
                seq, self.source
            ))
        })?;

        let mut revision = match node.into_value() {
            Value::Object(map) => map,
            _ => {
                return Err(BloarkError::Parse(format!(
                    "empty revision {} of page {} in {}",
                    seq, article_id, self.source
                )))
            }
        };

        let revision_id = match revision.remove("id") {
            Some(Value::String(id)) => id,
            _ => {
                return Err(BloarkError::Parse(format!(
                    "revision {} of page {} has no <id>",
                    seq, article_id
                )))
            }
        };
        if revision.get("text").and_then(revision_text_of).is_none() {
            return Err(BloarkError::Parse(format!(
                "revision {} of page {} has no text body",
                revision_id, article_id
            )));
        }
        if let Some(parent) = revision.remove("parentid") {
            revision.insert("parent_id".to_string(), parent);
        }
        let timestamp = revision
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);
        revision.insert("revision_id".to_string(), Value::String(revision_id.clone()));
        revision.insert("article_id".to_string(), Value::String(article_id.clone()));

        let mut metadata = Metadata::new();
        metadata.insert("article_id".into(), article_id.as_str().into());
        if let Some(title) = &self.page.title {
            metadata.insert("title".into(), title.as_str().into());
        }
        metadata.insert("revision_id".into(), revision_id.into());
        if let Some(ts) = timestamp {
            metadata.insert("timestamp".into(), ts.into());
        }
        metadata.insert("seq".into(), seq.into());
        metadata.insert("source".into(), self.source.as_str().into());

        Ok(Block::new(article_id, Value::Object(revision), metadata))
    }
}

impl<R: BufRead> Iterator for RevisionParser<R> {
    type Item = Result<Block, BloarkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// The wiki text of a converted `<text>` element, whether or not it had attributes.
pub fn revision_text_of(text: &Value) -> Option<&str> {
    match text {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("#text").and_then(Value::as_str),
        _ => None,
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Attrs, BloarkError> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| BloarkError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MetaValue;

    const DUMP: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.10/" version="0.10">
  <siteinfo><sitename>Wikipedia</sitename></siteinfo>
  <page>
    <title>Alpha</title>
    <ns>0</ns>
    <id>10</id>
    <revision>
      <id>100</id>
      <timestamp>2001-01-01T00:00:00Z</timestamp>
      <contributor><username>Ann</username><id>7</id></contributor>
      <minor />
      <text bytes="24" xml:space="preserve">Hello &amp; welcome</text>
    </revision>
    <revision>
      <id>101</id>
      <parentid>100</parentid>
      <timestamp>2001-01-02T00:00:00Z</timestamp>
      <text bytes="0" deleted="deleted" />
    </revision>
    <revision>
      <id>102</id>
      <parentid>100</parentid>
      <timestamp>2001-01-03T00:00:00Z</timestamp>
      <text><![CDATA[Raw <b>text</b>]]></text>
    </revision>
  </page>
  <page>
    <title>Beta</title>
    <id>20</id>
    <revision><id>200</id><text>Second</text></revision>
  </page>
</mediawiki>"#;

    fn parse(xml: &str) -> Vec<Result<Block, BloarkError>> {
        RevisionParser::new(xml.as_bytes(), Path::new("dump.xml")).collect()
    }

    #[test]
    fn test_revisions_become_blocks_grouped_by_page() {
        let items = parse(DUMP);
        assert_eq!(items.len(), 4);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.group, "10");
        assert_eq!(first.content["revision_id"], "100");
        assert_eq!(first.content["article_id"], "10");
        assert!(first.content.get("id").is_none());
        assert_eq!(first.content["text"]["#text"], "Hello & welcome");
        assert_eq!(first.content["text"]["@bytes"], "24");
        assert_eq!(first.content["contributor"]["username"], "Ann");
        assert!(first.content["minor"].is_null());
        assert_eq!(first.meta("title").and_then(MetaValue::as_str), Some("Alpha"));
        assert_eq!(first.meta("seq").and_then(MetaValue::as_i64), Some(0));
        assert_eq!(first.meta("source").and_then(MetaValue::as_str), Some("dump.xml"));
        assert_eq!(
            first.meta("timestamp").and_then(MetaValue::as_str),
            Some("2001-01-01T00:00:00Z")
        );

        // Deleted text is a block-scoped parse error.
        let second = items[1].as_ref().unwrap_err();
        assert!(second.is_block_scoped());

        let third = items[2].as_ref().unwrap();
        assert_eq!(third.content["parent_id"], "100");
        assert_eq!(third.content["text"], "Raw <b>text</b>");
        assert_eq!(third.meta("seq").and_then(MetaValue::as_i64), Some(2));

        let fourth = items[3].as_ref().unwrap();
        assert_eq!(fourth.group, "20");
        assert_eq!(fourth.meta("title").and_then(MetaValue::as_str), Some("Beta"));
        assert_eq!(fourth.meta("seq").and_then(MetaValue::as_i64), Some(0));
    }

    #[test]
    fn test_tiny_read_buffer_yields_the_same_blocks() {
        let whole = parse(DUMP);
        let reader = std::io::BufReader::with_capacity(3, DUMP.as_bytes());
        let chunked: Vec<_> = RevisionParser::new(reader, Path::new("dump.xml")).collect();

        assert_eq!(chunked.len(), whole.len());
        for (a, b) in chunked.iter().zip(&whole) {
            match (a, b) {
                (Ok(a), Ok(b)) => assert_eq!(a, b),
                (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string()),
                _ => panic!("outcomes differ: {a:?} vs {b:?}"),
            }
        }
        assert_eq!(chunked.iter().filter(|i| i.is_ok()).count(), 3);
    }

    #[test]
    fn test_repeated_children_become_arrays() {
        let node = Node {
            name: "revision".into(),
            attrs: vec![],
            children: vec![
                ("tag".into(), Value::String("a".into())),
                ("tag".into(), Value::String("b".into())),
                ("tag".into(), Value::String("c".into())),
            ],
            text: String::new(),
        };
        assert_eq!(node.into_value(), serde_json::json!({"tag": ["a", "b", "c"]}));
    }

    #[test]
    fn test_page_without_id_yields_parse_error() {
        let xml = "<mediawiki><page><title>X</title><revision><id>1</id><text>t</text></revision></page></mediawiki>";
        let items = parse(xml);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(BloarkError::Parse(_))));
    }

    #[test]
    fn test_truncated_stream_is_fatal_and_stops() {
        let cut = &DUMP[..DUMP.find("<page>\n    <title>Beta").unwrap() + 30];
        let items = parse(cut);
        let last = items.last().unwrap();
        assert!(matches!(last, Err(e) if !e.is_block_scoped()));
        assert_eq!(items.iter().filter(|i| i.is_ok()).count(), 2);
    }
}
