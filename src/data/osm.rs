use crate::data::attributes::Attributes;

pub type OsmId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn parse(value: &str) -> Option<ElementType> {
        match value {
            "node" => Some(ElementType::Node),
            "way" => Some(ElementType::Way),
            "relation" => Some(ElementType::Relation),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ElementType::Node => 0,
            ElementType::Way => 1,
            ElementType::Relation => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: OsmId,
    pub lon: f64,
    pub lat: f64,
    pub tags: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: OsmId,
    pub node_ids: Vec<OsmId>,
    pub tags: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub member_type: ElementType,
    pub reference: OsmId,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: OsmId,
    pub members: Vec<Member>,
    pub tags: Attributes,
}

impl Relation {
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.has(key, value)
    }

    pub fn is_multipolygon(&self) -> bool {
        self.has_tag("type", "multipolygon")
    }

    pub fn way_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|member| member.member_type == ElementType::Way)
    }
}

/// One raw element as streamed from a source, in file order.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmElement {
    pub fn id(&self) -> OsmId {
        match self {
            OsmElement::Node(node) => node.id,
            OsmElement::Way(way) => way.id,
            OsmElement::Relation(relation) => relation.id,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            OsmElement::Node(_) => ElementType::Node,
            OsmElement::Way(_) => ElementType::Way,
            OsmElement::Relation(_) => ElementType::Relation,
        }
    }
}
