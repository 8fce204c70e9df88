//! # Allocation Groups
//!
//! Named nodes of the memory-accounting tree.
//!
//! ## Layout
//!
//! Nodes live in one contiguous arena owned by the profiler and link to
//! each other by index:
//!
//! ```text
//! [0] root ──first_child──► [2] Audio ──next_sibling──► [1] Render
//!                                                          │ first_child
//!                                                          ▼
//!                                                     [3] Render/Meshes
//! ```
//!
//! Slots are never freed. A [`GroupId`] is therefore a stable identity.
//!
//! ## Totals
//!
//! Each node keeps `own` totals (operations reported directly against it)
//! and `inclusive` totals (own plus every descendant). An operation on a
//! node adjusts its own totals and the inclusive totals of the node and
//! all its ancestors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::{self, TopGuard};
use crate::error::AccountingError;
use crate::event::{EventKind, GroupDeclaration, GroupId, Totals};
use crate::profiler::Profiler;

/// Separator between name-path segments.
pub const PATH_SEPARATOR: char = '/';

/// One arena slot.
pub(crate) struct GroupNode {
    name: Arc<str>,
    path: Arc<str>,
    parent: Option<GroupId>,
    first_child: Option<GroupId>,
    next_sibling: Option<GroupId>,
    own: Totals,
    inclusive: Totals,
}

/// Index-linked group tree.
pub(crate) struct GroupArena {
    nodes: Vec<GroupNode>,
    by_path: HashMap<Arc<str>, GroupId>,
}

impl GroupArena {
    /// Creates an arena holding only the root.
    pub(crate) fn new() -> Self {
        let root_path: Arc<str> = Arc::from("");
        let mut by_path = HashMap::new();
        by_path.insert(Arc::clone(&root_path), GroupId::ROOT);
        Self {
            nodes: vec![GroupNode {
                name: Arc::clone(&root_path),
                path: root_path,
                parent: None,
                first_child: None,
                next_sibling: None,
                own: Totals::ZERO,
                inclusive: Totals::ZERO,
            }],
            by_path,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: GroupId) -> &GroupNode {
        &self.nodes[id.index()]
    }

    /// Returns the group for `path`, creating missing ancestors first.
    ///
    /// `declared` is called once per newly created node, parents before
    /// children.
    pub(crate) fn find_or_create(
        &mut self,
        path: &str,
        mut declared: impl FnMut(GroupDeclaration),
    ) -> GroupId {
        let normalized = normalize_path(path);
        if let Some(&id) = self.by_path.get(normalized.as_str()) {
            return id;
        }

        let mut parent = GroupId::ROOT;
        let mut prefix_end = 0;
        for segment in normalized.split(PATH_SEPARATOR) {
            prefix_end += if prefix_end == 0 { segment.len() } else { segment.len() + 1 };
            let prefix = &normalized[..prefix_end];
            parent = match self.by_path.get(prefix) {
                Some(&id) => id,
                None => {
                    let id = self.insert(parent, segment, prefix);
                    declared(self.declaration(id));
                    id
                }
            };
        }
        parent
    }

    fn insert(&mut self, parent: GroupId, name: &str, path: &str) -> GroupId {
        let id = GroupId::from_raw(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        let path: Arc<str> = Arc::from(path);
        let previous_first = self.nodes[parent.index()].first_child;
        self.nodes.push(GroupNode {
            name: Arc::from(name),
            path: Arc::clone(&path),
            parent: Some(parent),
            first_child: None,
            next_sibling: previous_first,
            own: Totals::ZERO,
            inclusive: Totals::ZERO,
        });
        self.nodes[parent.index()].first_child = Some(id);
        self.by_path.insert(path, id);
        id
    }

    /// Applies one operation to `id` and its ancestors, or to nothing.
    pub(crate) fn apply(&mut self, id: GroupId, kind: EventKind, amount: u64) -> Result<(), AccountingError> {
        let own = self.node(id).own.apply(id, kind, amount)?;

        // Inclusive totals are sums of own totals, so once the own update
        // is valid these can only fail on overflow. Check before writing.
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            node.inclusive.apply(current, kind, amount)?;
            cursor = node.parent;
        }

        self.nodes[id.index()].own = own;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &mut self.nodes[current.index()];
            node.inclusive = node.inclusive.apply(current, kind, amount)?;
            cursor = node.parent;
        }
        Ok(())
    }

    pub(crate) fn declaration(&self, id: GroupId) -> GroupDeclaration {
        let node = self.node(id);
        GroupDeclaration {
            id,
            parent: node.parent,
            path: Arc::clone(&node.path),
        }
    }

    pub(crate) fn contains(&self, id: GroupId) -> bool {
        id.index() < self.nodes.len()
    }

    pub(crate) fn path(&self, id: GroupId) -> Arc<str> {
        Arc::clone(&self.node(id).path)
    }

    pub(crate) fn name(&self, id: GroupId) -> Arc<str> {
        Arc::clone(&self.node(id).name)
    }

    pub(crate) fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.node(id).parent
    }

    pub(crate) fn children(&self, id: GroupId) -> Vec<GroupId> {
        let mut children = Vec::new();
        let mut cursor = self.node(id).first_child;
        while let Some(child) = cursor {
            children.push(child);
            cursor = self.node(child).next_sibling;
        }
        children
    }

    pub(crate) fn stats(&self, id: GroupId) -> GroupStats {
        let node = self.node(id);
        GroupStats {
            own: node.own,
            inclusive: node.inclusive,
        }
    }

    /// Every node in creation order (parents always precede children).
    pub(crate) fn snapshot(&self) -> Vec<GroupSnapshot> {
        (0..self.nodes.len())
            .map(|index| {
                let id = GroupId::from_raw(u32::try_from(index).unwrap_or(u32::MAX));
                let stats = self.stats(id);
                GroupSnapshot {
                    declaration: self.declaration(id),
                    own: stats.own,
                    inclusive: stats.inclusive,
                }
            })
            .collect()
    }
}

/// Collapses empty segments: `"/Render//Meshes/"` becomes `"Render/Meshes"`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
        if !normalized.is_empty() {
            normalized.push(PATH_SEPARATOR);
        }
        normalized.push_str(segment);
    }
    normalized
}

/// Totals of one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Bytes reported directly against this group.
    pub own: Totals,
    /// Own bytes plus all descendants.
    pub inclusive: Totals,
}

/// One node captured by [`Profiler::snapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Identity and position in the tree.
    pub declaration: GroupDeclaration,
    /// Directly attributed totals.
    pub own: Totals,
    /// Totals including descendants.
    pub inclusive: Totals,
}

/// Handle to a node of a profiler's group tree.
///
/// Handles are cheap to clone. Two handles compare equal when they refer
/// to the same node of the same profiler.
#[derive(Clone)]
pub struct AllocationGroup {
    profiler: Profiler,
    id: GroupId,
}

impl AllocationGroup {
    pub(crate) const fn new(profiler: Profiler, id: GroupId) -> Self {
        Self { profiler, id }
    }

    /// Returns the group at `path` in the process-wide profiler.
    ///
    /// Missing ancestors are created. Asking twice for the same path
    /// returns handles to the same node.
    #[must_use]
    pub fn get(path: &str) -> Self {
        Profiler::global().group(path)
    }

    /// Returns the process-wide root group.
    #[must_use]
    pub fn root() -> Self {
        Profiler::global().root()
    }

    /// Returns the group's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Returns the profiler that owns this group.
    #[inline]
    #[must_use]
    pub const fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Returns the full name-path. Empty for the root.
    #[must_use]
    pub fn path(&self) -> Arc<str> {
        self.profiler.with_groups(|groups| groups.path(self.id))
    }

    /// Returns the last path segment.
    #[must_use]
    pub fn name(&self) -> Arc<str> {
        self.profiler.with_groups(|groups| groups.name(self.id))
    }

    /// Returns the parent group, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.profiler
            .with_groups(|groups| groups.parent(self.id))
            .map(|id| Self::new(self.profiler.clone(), id))
    }

    /// Returns the direct children, most recently created first.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.profiler
            .with_groups(|groups| groups.children(self.id))
            .into_iter()
            .map(|id| Self::new(self.profiler.clone(), id))
            .collect()
    }

    /// Returns (creating if needed) the child named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let path = self.path();
        if path.is_empty() {
            self.profiler.group(name)
        } else {
            self.profiler.group(&format!("{path}{PATH_SEPARATOR}{name}"))
        }
    }

    /// Returns the group's current totals.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        self.profiler.with_groups(|groups| groups.stats(self.id))
    }

    /// Reports `bytes` newly reserved.
    ///
    /// # Errors
    ///
    /// Fails only if the total would overflow.
    pub fn allocate(&self, bytes: u64) -> Result<(), AccountingError> {
        self.profiler.report(self.id, EventKind::Allocate, bytes)
    }

    /// Reports `bytes` of reservation given back.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `bytes` reserved bytes are unused.
    pub fn free(&self, bytes: u64) -> Result<(), AccountingError> {
        self.profiler.report(self.id, EventKind::Free, bytes)
    }

    /// Reports `bytes` of reservation put into use.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `bytes` reserved bytes are unused.
    pub fn acquire(&self, bytes: u64) -> Result<(), AccountingError> {
        self.profiler.report(self.id, EventKind::Acquire, bytes)
    }

    /// Reports `bytes` no longer in use but still reserved.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `bytes` are in use.
    pub fn release(&self, bytes: u64) -> Result<(), AccountingError> {
        self.profiler.report(self.id, EventKind::Release, bytes)
    }

    /// Inserts a navigation marker attributed to this group.
    pub fn mark(&self, marker: u64) {
        self.profiler.mark(self.id, marker);
    }

    /// Makes this group the thread's current group until the guard drops.
    #[must_use = "the group is popped as soon as the guard is dropped"]
    pub fn place_on_top(&self) -> TopGuard {
        context::place_on_top(self)
    }
}

impl PartialEq for AllocationGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.profiler.ptr_eq(&other.profiler)
    }
}

impl Eq for AllocationGroup {}

impl fmt::Debug for AllocationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationGroup")
            .field("id", &self.id)
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilerConfig;

    fn profiler() -> Profiler {
        Profiler::new(ProfilerConfig::default()).unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/Render//Meshes/"), "Render/Meshes");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("///"), "");
    }

    #[test]
    fn test_get_is_idempotent() {
        let profiler = profiler();
        let a = profiler.group("Render/Meshes");
        let b = profiler.group("/Render/Meshes/");
        assert_eq!(a, b);

        a.allocate(128).unwrap();
        assert_eq!(b.stats().own.reserved, 128);
        assert_eq!(profiler.group_count(), 3);
    }

    #[test]
    fn test_ancestors_are_created() {
        let profiler = profiler();
        let meshes = profiler.group("Render/Meshes");
        let render = meshes.parent().unwrap();
        assert_eq!(&*render.path(), "Render");
        assert_eq!(&*meshes.name(), "Meshes");
        assert_eq!(render.parent().unwrap(), profiler.root());
        assert!(profiler.root().parent().is_none());
    }

    #[test]
    fn test_children_link_through_siblings() {
        let profiler = profiler();
        let root = profiler.root();
        let render = root.child("Render");
        let audio = root.child("Audio");
        let meshes = render.child("Meshes");

        assert_eq!(root.children(), vec![audio, render.clone()]);
        assert_eq!(render.children(), vec![meshes]);
    }

    #[test]
    fn test_parent_totals_include_descendants() {
        let profiler = profiler();
        let render = profiler.group("Render");
        let meshes = profiler.group("Render/Meshes");
        let textures = profiler.group("Render/Textures");

        render.allocate(10).unwrap();
        meshes.allocate(100).unwrap();
        meshes.acquire(60).unwrap();
        textures.allocate(50).unwrap();
        textures.acquire(50).unwrap();

        let stats = render.stats();
        assert_eq!(stats.own, Totals::new(10, 0));
        assert_eq!(stats.inclusive, Totals::new(160, 110));
        assert_eq!(profiler.root().stats().inclusive, Totals::new(160, 110));
    }

    #[test]
    fn test_rejected_operation_changes_nothing() {
        let profiler = profiler();
        let parent = profiler.group("Parent");
        let child = profiler.group("Parent/Child");
        parent.allocate(100).unwrap();

        // The parent has room, but the child has reserved nothing itself.
        assert!(child.acquire(10).is_err());
        assert_eq!(child.stats(), GroupStats::default());
        assert_eq!(parent.stats().inclusive, Totals::new(100, 0));
    }
}
