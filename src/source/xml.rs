use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::data::attributes::Attributes;
use crate::data::osm::{ElementType, Member, Node, OsmElement, Relation, Way};
use crate::errors::{Error, ErrorKind, Result};
use crate::pipeline::WorkQueue;
use crate::source::{estimate_count, OsmSource};

const XML_BYTES_PER_ELEMENT: u64 = 90;
const XZ_BYTES_PER_ELEMENT: u64 = 9;

/// OSM XML file, plain or `.xz` compressed. Decoding is single threaded.
pub struct XmlSource {
    name: String,
    path: PathBuf,
}

enum ParserState {
    Top,
    Node(Node),
    Way(Way),
    Relation(Relation),
}

fn parse_error(message: String) -> Error {
    Error::new(ErrorKind::Parse, message)
}

fn number<T: str::FromStr>(value: &[u8], name: &str) -> Result<T> {
    str::from_utf8(value)?
        .parse()
        .map_err(|_| parse_error(format!("Bad {} attribute {:?}", name, String::from_utf8_lossy(value))))
}

fn parse_node(el: &BytesStart) -> Result<Node> {
    let mut id = None;
    let mut lat = None;
    let mut lon = None;
    for attribute in el.attributes() {
        let attribute = attribute?;
        match attribute.key.as_ref() {
            b"id" => id = Some(number(&attribute.value, "id")?),
            b"lat" => lat = Some(number(&attribute.value, "lat")?),
            b"lon" => lon = Some(number(&attribute.value, "lon")?),
            _ => (),
        }
    }
    match (id, lat, lon) {
        (Some(id), Some(lat), Some(lon)) => Ok(Node {
            id,
            lat,
            lon,
            tags: Attributes::new(),
        }),
        _ => Err(parse_error("node without id, lat or lon".to_string())),
    }
}

fn parse_id(el: &BytesStart, what: &str) -> Result<i64> {
    for attribute in el.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == b"id" {
            return number(&attribute.value, "id");
        }
    }
    Err(parse_error(format!("{what} without id")))
}

fn parse_tag(el: &BytesStart) -> Result<(String, String)> {
    let mut key = None;
    let mut value = None;
    for attribute in el.attributes() {
        let attribute = attribute?;
        match attribute.key.as_ref() {
            b"k" => key = Some(attribute.unescape_value()?.into_owned()),
            b"v" => value = Some(attribute.unescape_value()?.into_owned()),
            _ => (),
        }
    }
    key.zip(value)
        .ok_or_else(|| parse_error("tag without k or v".to_string()))
}

fn parse_node_ref(el: &BytesStart) -> Result<i64> {
    for attribute in el.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == b"ref" {
            return number(&attribute.value, "ref");
        }
    }
    Err(parse_error("nd without ref".to_string()))
}

fn parse_member(el: &BytesStart) -> Result<Member> {
    let mut member_type = None;
    let mut reference = None;
    let mut role = String::new();
    for attribute in el.attributes() {
        let attribute = attribute?;
        match attribute.key.as_ref() {
            b"type" => member_type = ElementType::parse(str::from_utf8(&attribute.value)?),
            b"ref" => reference = Some(number(&attribute.value, "ref")?),
            b"role" => role = attribute.unescape_value()?.into_owned(),
            _ => (),
        }
    }
    match (member_type, reference) {
        (Some(member_type), Some(reference)) => Ok(Member {
            member_type,
            reference,
            role,
        }),
        _ => Err(parse_error("member without type or ref".to_string())),
    }
}

impl ParserState {
    fn add_tag(&mut self, el: &BytesStart) -> Result<()> {
        let tags = match self {
            ParserState::Node(node) => &mut node.tags,
            ParserState::Way(way) => &mut way.tags,
            ParserState::Relation(relation) => &mut relation.tags,
            ParserState::Top => return Ok(()),
        };
        let (key, value) = parse_tag(el)?;
        tags.insert(key, value);
        Ok(())
    }

    fn finish(&mut self) -> Option<OsmElement> {
        match std::mem::replace(self, ParserState::Top) {
            ParserState::Top => None,
            ParserState::Node(node) => Some(OsmElement::Node(node)),
            ParserState::Way(way) => Some(OsmElement::Way(way)),
            ParserState::Relation(relation) => Some(OsmElement::Relation(relation)),
        }
    }
}

impl XmlSource {
    pub fn new(name: &str, path: &Path) -> Self {
        XmlSource {
            name: name.to_string(),
            path: path.to_path_buf(),
        }
    }

    fn is_compressed(&self) -> bool {
        self.path.extension().is_some_and(|extension| extension == "xz")
    }

    fn create_osm_reader(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let file_reader = BufReader::new(fs::File::open(&self.path)?);
        let input: Box<dyn BufRead> = if self.is_compressed() {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);
        Ok(reader)
    }
}

impl OsmSource for XmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self) -> Result<u64> {
        let bytes_per_element = if self.is_compressed() {
            XZ_BYTES_PER_ELEMENT
        } else {
            XML_BYTES_PER_ELEMENT
        };
        estimate_count(&self.path, bytes_per_element)
    }

    fn read(&self, _threads: usize, next: &WorkQueue<OsmElement>) -> Result<()> {
        let mut reader = self.create_osm_reader()?;
        let mut buf = Vec::new();
        let mut state = ParserState::Top;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,
                Event::Start(e) => match e.name().as_ref() {
                    b"node" => state = ParserState::Node(parse_node(&e)?),
                    b"way" => {
                        state = ParserState::Way(Way {
                            id: parse_id(&e, "way")?,
                            node_ids: Vec::new(),
                            tags: Attributes::new(),
                        })
                    }
                    b"relation" => {
                        state = ParserState::Relation(Relation {
                            id: parse_id(&e, "relation")?,
                            members: Vec::new(),
                            tags: Attributes::new(),
                        })
                    }
                    _ => (),
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"node" => next.put(OsmElement::Node(parse_node(&e)?))?,
                    b"way" => next.put(OsmElement::Way(Way {
                        id: parse_id(&e, "way")?,
                        node_ids: Vec::new(),
                        tags: Attributes::new(),
                    }))?,
                    b"relation" => next.put(OsmElement::Relation(Relation {
                        id: parse_id(&e, "relation")?,
                        members: Vec::new(),
                        tags: Attributes::new(),
                    }))?,
                    b"tag" => state.add_tag(&e)?,
                    b"nd" => {
                        if let ParserState::Way(way) = &mut state {
                            way.node_ids.push(parse_node_ref(&e)?);
                        }
                    }
                    b"member" => {
                        if let ParserState::Relation(relation) = &mut state {
                            relation.members.push(parse_member(&e)?);
                        }
                    }
                    _ => (),
                },
                Event::End(e) => {
                    if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                        if let Some(element) = state.finish() {
                            next.put(element)?;
                        }
                    }
                }
                Event::Text(e) => {
                    warn!(source = self.name.as_str(); "Unexpected text in OSM file: {:?}", e);
                }
                _ => (),
            }
            buf.clear();
        }
        Ok(())
    }
}
