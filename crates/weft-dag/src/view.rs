//! Immutable snapshot of one object family as a DAG.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_repo::ObjectRepository;
use weft_types::{Actor, Object, ObjectId, Page, Paged};

use crate::error::{DagError, DagResult};

/// One object as seen by the DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: ObjectId,
    pub parent_id: Option<ObjectId>,
    /// Distance from the root; equal to the object's depth.
    pub level: u32,
    pub version: u64,
    pub created_by: Actor,
    pub tombstoned: bool,
    pub processing_failed: bool,
}

impl From<&Object> for DagNode {
    fn from(object: &Object) -> Self {
        Self {
            id: object.id,
            parent_id: object.parent_id,
            level: object.depth,
            version: object.version,
            created_by: object.created_by.clone(),
            tombstoned: object.is_tombstoned(),
            processing_failed: object.metadata.is_processing_failed(),
        }
    }
}

/// A parent → child derivation link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagEdge {
    pub parent: ObjectId,
    pub child: ObjectId,
}

/// A point-in-time view of every object sharing one `root_id`.
///
/// Built from the repository's family query and never mutated; a stale
/// view is replaced, not patched.
#[derive(Clone, Debug)]
pub struct DagView {
    root_id: ObjectId,
    nodes: HashMap<ObjectId, DagNode>,
    /// Children of each node, sorted by id.
    children: HashMap<ObjectId, Vec<ObjectId>>,
    /// Node ids per level, sorted by id.
    levels: BTreeMap<u32, Vec<ObjectId>>,
    built_at: Instant,
}

impl DagView {
    /// Build the view for the family rooted at `root_id`.
    pub fn build(repo: &dyn ObjectRepository, root_id: &ObjectId) -> DagResult<Self> {
        let family = repo.family(root_id)?;
        let root_id = family.first().map(|o| o.root_id).unwrap_or(*root_id);
        let view = Self::from_objects(root_id, &family)?;
        debug!(root = %root_id, nodes = view.len(), depth = view.depth(), "dag view built");
        Ok(view)
    }

    /// Assemble a view from already-loaded family members.
    pub fn from_objects(root_id: ObjectId, objects: &[Object]) -> DagResult<Self> {
        if objects.is_empty() {
            return Err(DagError::EmptyFamily(root_id));
        }
        let mut nodes = HashMap::with_capacity(objects.len());
        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        let mut levels: BTreeMap<u32, Vec<ObjectId>> = BTreeMap::new();

        for object in objects {
            let node = DagNode::from(object);
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(node.id);
            }
            levels.entry(node.level).or_default().push(node.id);
            nodes.insert(node.id, node);
        }
        if !nodes.contains_key(&root_id) {
            return Err(DagError::NodeNotFound(root_id));
        }
        for list in children.values_mut() {
            list.sort();
        }
        for list in levels.values_mut() {
            list.sort();
        }

        Ok(Self {
            root_id,
            nodes,
            children,
            levels,
            built_at: Instant::now(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn root_id(&self) -> ObjectId {
        self.root_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &ObjectId) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    /// When the view was built.
    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    /// Deepest level present in the family.
    pub fn depth(&self) -> u32 {
        self.levels.keys().next_back().copied().unwrap_or(0)
    }

    pub fn level(&self, id: &ObjectId) -> DagResult<u32> {
        self.nodes
            .get(id)
            .map(|n| n.level)
            .ok_or(DagError::NodeNotFound(*id))
    }

    pub fn children_of(&self, id: &ObjectId) -> &[ObjectId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All derivation edges, ordered by parent then child.
    pub fn edges(&self) -> Vec<DagEdge> {
        let mut edges: Vec<DagEdge> = self
            .children
            .iter()
            .flat_map(|(parent, kids)| {
                kids.iter().map(|child| DagEdge {
                    parent: *parent,
                    child: *child,
                })
            })
            .collect();
        edges.sort_by_key(|e| (e.parent, e.child));
        edges
    }

    /// Node ids per level, shallowest first.
    pub fn levels(&self) -> &BTreeMap<u32, Vec<ObjectId>> {
        &self.levels
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Descendants of `id` (excluding `id`), grouped by level, shallowest
    /// level first. Ids within a level are sorted.
    pub fn descendants_by_level(&self, id: &ObjectId) -> DagResult<Vec<Vec<ObjectId>>> {
        self.level(id)?;
        let mut grouped: BTreeMap<u32, Vec<ObjectId>> = BTreeMap::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<ObjectId> = self.children_of(id).iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                grouped.entry(node.level).or_default().push(current);
            }
            queue.extend(self.children_of(&current).iter().copied());
        }

        Ok(grouped
            .into_values()
            .map(|mut ids| {
                ids.sort();
                ids
            })
            .collect())
    }

    /// Every node ordered so that parents precede children (Kahn's
    /// algorithm, ties broken by id).
    pub fn topological_order(&self) -> DagResult<Vec<ObjectId>> {
        let mut in_degree: HashMap<ObjectId, usize> = self
            .nodes
            .values()
            .map(|n| {
                let has_parent = n.parent_id.is_some_and(|p| self.nodes.contains_key(&p));
                (n.id, usize::from(has_parent))
            })
            .collect();

        let mut ready: Vec<ObjectId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort();
        let mut queue: VecDeque<ObjectId> = ready.into();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for child in self.children_of(&id) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .keys()
                .find(|id| !order.contains(id))
                .copied()
                .unwrap_or(self.root_id);
            return Err(DagError::BrokenChain(stuck));
        }
        Ok(order)
    }

    /// The chain of ids from the root down to `id`, inclusive.
    pub fn path_to_root(&self, id: &ObjectId) -> DagResult<Vec<ObjectId>> {
        let mut path = Vec::new();
        let mut current = *id;
        loop {
            let node = self.nodes.get(&current).ok_or(DagError::NodeNotFound(current))?;
            path.push(current);
            match node.parent_id {
                Some(parent) if path.len() <= self.nodes.len() => current = parent,
                Some(_) => return Err(DagError::BrokenChain(*id)),
                None => break,
            }
        }
        if path.last() != Some(&self.root_id) {
            return Err(DagError::BrokenChain(*id));
        }
        path.reverse();
        Ok(path)
    }

    /// Root-to-leaf paths for every leaf under the root, in id order.
    pub fn paths(&self) -> DagResult<Vec<Vec<ObjectId>>> {
        let mut leaves: Vec<ObjectId> = self
            .nodes
            .keys()
            .filter(|id| self.children_of(id).is_empty())
            .copied()
            .collect();
        leaves.sort();
        leaves.iter().map(|leaf| self.path_to_root(leaf)).collect()
    }

    /// Every parent chain ends at the root and levels grow by one per edge.
    pub fn is_well_formed(&self) -> bool {
        self.nodes.values().all(|node| match node.parent_id {
            None => node.id == self.root_id && node.level == 0,
            Some(parent) => self
                .nodes
                .get(&parent)
                .is_some_and(|p| p.level + 1 == node.level),
        }) && self.topological_order().is_ok()
    }

    /// Nodes in topological order, one page at a time.
    pub fn page(&self, page: Page) -> DagResult<Paged<DagNode>> {
        let ordered = self
            .topological_order()?
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).cloned())
            .collect();
        Ok(page.apply(ordered))
    }
}
