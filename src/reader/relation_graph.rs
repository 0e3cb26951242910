use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::sync::Arc;

use crate::data::feature::RelationMembership;
use crate::data::osm::{OsmId, Relation};
use crate::memory::{hash_map_size, hash_set_size, MemoryEstimate};
use crate::profile::RelationInfo;

/// Relation side tables collected in pass 1.
///
/// Holds the info a profile kept for each relation, the relations (and member roles) each
/// way belongs to, and the set of ways that outline a multipolygon. Filled by a single
/// writer, then frozen and shared read-only.
#[derive(Debug, Default)]
pub struct RelationGraph {
    relation_info: HashMap<OsmId, Vec<Arc<dyn RelationInfo>>>,
    relation_info_bytes: u64,
    way_list_bytes: u64,
    way_to_relations: HashMap<OsmId, Vec<(OsmId, u32)>>,
    roles: Vec<String>,
    role_ids: HashMap<String, u32>,
    ways_in_multipolygon: HashSet<OsmId>,
}

impl RelationGraph {
    pub fn new() -> Self {
        RelationGraph::default()
    }

    fn intern_role(&mut self, role: &str) -> u32 {
        if let Some(id) = self.role_ids.get(role) {
            return *id;
        }
        let id = self.roles.len() as u32;
        self.roles.push(role.to_string());
        self.role_ids.insert(role.to_string(), id);
        id
    }

    /// Records one relation. `infos` is what the profile returned from preprocessing;
    /// an empty list keeps nothing.
    pub fn add_relation(&mut self, relation: &Relation, infos: Option<Vec<Arc<dyn RelationInfo>>>) {
        if let Some(infos) = infos.filter(|infos| !infos.is_empty()) {
            self.relation_info_bytes += infos
                .iter()
                .map(|info| info.estimate_memory_usage_bytes() + size_of::<Arc<dyn RelationInfo>>() as u64)
                .sum::<u64>();
            let known = self.relation_info.contains_key(&relation.id);
            self.relation_info.entry(relation.id).or_default().extend(infos);
            if !known {
                for member in relation.way_members() {
                    let role = self.intern_role(&member.role);
                    self.way_to_relations
                        .entry(member.reference)
                        .or_default()
                        .push((relation.id, role));
                    self.way_list_bytes += size_of::<(OsmId, u32)>() as u64;
                }
            }
        }
        if relation.is_multipolygon() {
            self.ways_in_multipolygon
                .extend(relation.way_members().map(|member| member.reference));
        }
    }

    pub fn freeze(mut self) -> Arc<RelationGraph> {
        self.relation_info.shrink_to_fit();
        self.way_to_relations.shrink_to_fit();
        self.ways_in_multipolygon.shrink_to_fit();
        Arc::new(self)
    }

    pub fn relation_info(&self, relation_id: OsmId) -> &[Arc<dyn RelationInfo>] {
        self.relation_info
            .get(&relation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every (relation, role, info) a way takes part in. A relation that appears twice in
    /// a way's member list (for example a route passing the same way in both directions)
    /// yields one membership per occurrence.
    pub fn memberships(&self, way_id: OsmId) -> Vec<RelationMembership> {
        let Some(relations) = self.way_to_relations.get(&way_id) else {
            return Vec::new();
        };
        relations
            .iter()
            .flat_map(|(relation_id, role)| {
                let role = self.roles.get(*role as usize).cloned().unwrap_or_default();
                self.relation_info(*relation_id)
                    .iter()
                    .map(move |info| RelationMembership {
                        relation_id: *relation_id,
                        role: role.clone(),
                        info: Arc::clone(info),
                    })
            })
            .collect()
    }

    pub fn is_in_multipolygon(&self, way_id: OsmId) -> bool {
        self.ways_in_multipolygon.contains(&way_id)
    }

    pub fn relations_with_info(&self) -> usize {
        self.relation_info.len()
    }

    pub fn ways_with_relations(&self) -> usize {
        self.way_to_relations.len()
    }

    pub fn multipolygon_ways(&self) -> usize {
        self.ways_in_multipolygon.len()
    }
}

impl MemoryEstimate for RelationGraph {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        hash_map_size(&self.relation_info)
            + self.relation_info_bytes
            + hash_map_size(&self.way_to_relations)
            + self.way_list_bytes
            + hash_set_size(&self.ways_in_multipolygon)
            + self.roles.iter().map(|role| role.len() as u64 * 2).sum::<u64>()
    }
}
