use std::path::{Path, PathBuf};

use log::debug;
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};
use rayon::prelude::*;

use crate::data::attributes::Attributes;
use crate::data::osm::{ElementType, Member, Node, OsmElement, Relation, Way};
use crate::errors::Result;
use crate::pipeline::WorkQueue;
use crate::source::{estimate_count, OsmSource};

const PBF_BYTES_PER_ELEMENT: u64 = 8;

/// Blobs decoded together; each batch is emitted in file order.
const BLOBS_PER_THREAD: usize = 4;

/// OSM PBF file. Blobs are decompressed and decoded on a rayon pool in batches, and the
/// decoded elements are pushed downstream in file order.
pub struct PbfSource {
    name: String,
    path: PathBuf,
}

impl PbfSource {
    pub fn new(name: &str, path: &Path) -> Self {
        PbfSource {
            name: name.to_string(),
            path: path.to_path_buf(),
        }
    }
}

fn convert(element: Element) -> Result<OsmElement> {
    Ok(match element {
        Element::Node(node) => OsmElement::Node(Node {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
            tags: Attributes::from_tags(node.tags()),
        }),
        Element::DenseNode(node) => OsmElement::Node(Node {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
            tags: Attributes::from_tags(node.tags()),
        }),
        Element::Way(way) => OsmElement::Way(Way {
            id: way.id(),
            node_ids: way.refs().collect(),
            tags: Attributes::from_tags(way.tags()),
        }),
        Element::Relation(relation) => {
            let mut members = Vec::new();
            for member in relation.members() {
                members.push(Member {
                    member_type: match member.member_type {
                        RelMemberType::Node => ElementType::Node,
                        RelMemberType::Way => ElementType::Way,
                        RelMemberType::Relation => ElementType::Relation,
                    },
                    reference: member.member_id,
                    role: member.role()?.to_string(),
                });
            }
            OsmElement::Relation(Relation {
                id: relation.id(),
                members,
                tags: Attributes::from_tags(relation.tags()),
            })
        }
    })
}

fn decode_blob(blob: osmpbf::Blob) -> Result<Vec<OsmElement>> {
    match blob.decode()? {
        BlobDecode::OsmData(block) => block.elements().map(convert).collect(),
        BlobDecode::OsmHeader(_) => Ok(Vec::new()),
        BlobDecode::Unknown(kind) => {
            debug!(blob_type = kind; "Skipping unknown blob");
            Ok(Vec::new())
        }
    }
}

impl OsmSource for PbfSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self) -> Result<u64> {
        estimate_count(&self.path, PBF_BYTES_PER_ELEMENT)
    }

    fn read(&self, threads: usize, next: &WorkQueue<OsmElement>) -> Result<()> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("pbf-decode-{index}"))
            .build()?;
        let mut blobs = BlobReader::from_path(&self.path)?;
        let batch_size = threads * BLOBS_PER_THREAD;
        loop {
            let batch = blobs.by_ref().take(batch_size).collect::<std::result::Result<Vec<_>, _>>()?;
            if batch.is_empty() {
                break;
            }
            let decoded: Vec<Vec<OsmElement>> =
                pool.install(|| batch.into_par_iter().map(decode_blob).collect::<Result<_>>())?;
            for element in decoded.into_iter().flatten() {
                next.put(element)?;
            }
        }
        Ok(())
    }
}
