//! Task graph arena
//!
//! Blocks and edges are stored by id. Every structural change goes through
//! [`TaskGraph`] so that both endpoint clusters of an edge always list it and
//! the operand groups stay current.

use crate::block::{BlockKind, ComputeBlock, Precision, StorageKind, TaskBlock};
use crate::check;
use crate::edge::{Edge, Endpoint, RearrangeInfo};
use crate::error::{GraphError, Result};
use crate::footprint;
use crate::ids::{EdgeId, IdAllocator, TaskId};
use crate::shape::{Shape, Window};
use crate::split::{SplitModes, SplitVector, Splitter};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Dataflow graph of task blocks
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    blocks: BTreeMap<TaskId, TaskBlock>,
    edges: BTreeMap<EdgeId, Edge>,
    groups: BTreeMap<TaskId, BTreeSet<TaskId>>,
    ids: IdAllocator,
}

impl TaskGraph {
    /// Empty graph with a fresh id allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty graph whose ids start at `first`
    pub fn with_first_id(first: u32) -> Self {
        Self {
            ids: IdAllocator::starting_at(first),
            ..Self::default()
        }
    }

    /// The graph's id allocator
    #[must_use]
    pub const fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub(crate) fn ids_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    /// Re-seed the allocator from the ids present in the graph
    pub fn reseed_ids(&mut self) {
        self.ids.reset();
        for id in self.blocks.keys() {
            self.ids.observe(id.raw());
        }
        for id in self.edges.keys() {
            self.ids.observe(id.raw());
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Add an unconnected storage block
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` for an empty shape.
    pub fn add_storage(&mut self, kind: StorageKind, shape: Shape, precision: Precision) -> Result<TaskId> {
        let id = self.ids.task();
        self.insert_block(TaskBlock::storage(id, kind, shape, precision)?)?;
        Ok(id)
    }

    /// Add an unconnected computation block
    ///
    /// # Errors
    ///
    /// Returns error if the block description is invalid.
    pub fn add_compute(&mut self, block: ComputeBlock) -> Result<TaskId> {
        let id = self.ids.task();
        self.insert_block(TaskBlock::compute(id, block)?)?;
        Ok(id)
    }

    /// Insert a block built elsewhere; its ports must be unconnected
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the id is taken by a block or an edge, and
    /// `UnsupportedBlock` if the block already lists edges.
    pub fn insert_block(&mut self, block: TaskBlock) -> Result<()> {
        self.insert_block_deferred(block)?;
        self.rebuild_groups();
        Ok(())
    }

    /// [`Self::insert_block`] without regrouping; groups stay stale until
    /// [`Self::rebuild_groups`]
    pub(crate) fn insert_block_deferred(&mut self, block: TaskBlock) -> Result<()> {
        let id = block.id();
        if self.blocks.contains_key(&id) || self.edges.contains_key(&EdgeId::new(id.raw())) {
            return Err(GraphError::DuplicateId {
                id: id.raw(),
                reason: "block id already in use".to_string(),
            });
        }
        if block.edge_ids().next().is_some() {
            return Err(GraphError::unsupported(id, "inserted blocks must be unconnected"));
        }
        self.ids.observe(id.raw());
        tracing::debug!("Added block {}", block);
        self.blocks.insert(id, block);
        Ok(())
    }

    /// Remove a block and every edge attached to it
    ///
    /// # Errors
    ///
    /// Returns `UnknownTask` if absent.
    pub fn remove_block(&mut self, id: TaskId) -> Result<TaskBlock> {
        let block = self.remove_block_deferred(id)?;
        self.rebuild_groups();
        Ok(block)
    }

    pub(crate) fn remove_block_deferred(&mut self, id: TaskId) -> Result<TaskBlock> {
        let attached: Vec<EdgeId> = self.block_ref(id)?.edge_ids().collect();
        for edge in attached {
            self.detach_edge(edge);
        }
        let block = self.blocks.remove(&id).ok_or(GraphError::UnknownTask(id))?;
        tracing::debug!("Removed block {}", block);
        Ok(block)
    }

    /// Block by id
    #[must_use]
    pub fn block(&self, id: TaskId) -> Option<&TaskBlock> {
        self.blocks.get(&id)
    }

    /// Block by id, as an error when absent
    ///
    /// # Errors
    ///
    /// Returns `UnknownTask` if absent.
    pub fn block_ref(&self, id: TaskId) -> Result<&TaskBlock> {
        self.blocks.get(&id).ok_or(GraphError::UnknownTask(id))
    }

    /// Whether `id` names a block
    #[must_use]
    pub fn contains_block(&self, id: TaskId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Blocks in id order
    pub fn blocks(&self) -> impl Iterator<Item = &TaskBlock> {
        self.blocks.values()
    }

    /// Number of blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    // ── Edges ───────────────────────────────────────────────────────────

    /// Connect two ports without rearrangement
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` if the window sizes differ or a window is
    /// outside its cluster, and `UnknownTask`/`UnknownPort` for bad
    /// endpoints.
    pub fn connect(
        &mut self,
        src: TaskId,
        src_port: usize,
        src_window: Window,
        dst: TaskId,
        dst_port: usize,
        dst_window: Window,
    ) -> Result<EdgeId> {
        self.insert_edge(
            Endpoint::new(src, src_port, src_window),
            Endpoint::new(dst, dst_port, dst_window),
            Vec::new(),
        )
    }

    /// Connect output port 0 of `src` to the whole of input `dst_port`
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` if the two clusters differ in extent.
    pub fn connect_whole(&mut self, src: TaskId, dst: TaskId, dst_port: usize) -> Result<EdgeId> {
        let from = *self.block_ref(src)?.output(0)?.shape();
        let to = *self.block_ref(dst)?.input(dst_port)?.shape();
        self.connect(src, 0, Window::full(from), dst, dst_port, Window::full(to))
    }

    /// Connect two ports through a reshape or permutation
    ///
    /// # Errors
    ///
    /// Returns `ShapeViolation` if the windows carry different volumes or
    /// lie outside their clusters.
    pub fn connect_rearranged(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        rearrange: Vec<RearrangeInfo>,
    ) -> Result<EdgeId> {
        self.insert_edge(src, dst, rearrange)
    }

    fn insert_edge(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        rearrange: Vec<RearrangeInfo>,
    ) -> Result<EdgeId> {
        let id = self.insert_edge_deferred(src, dst, rearrange)?;
        self.rebuild_groups();
        Ok(id)
    }

    pub(crate) fn insert_edge_deferred(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        rearrange: Vec<RearrangeInfo>,
    ) -> Result<EdgeId> {
        if src.task == dst.task {
            return Err(GraphError::shape(src.task, "a block cannot feed itself"));
        }
        let src_shape = *self.block_ref(src.task)?.output(src.port)?.shape();
        let dst_shape = *self.block_ref(dst.task)?.input(dst.port)?.shape();

        if !src.window.within(&src_shape) {
            return Err(GraphError::shape(
                src.task,
                format!("source window {} outside output cluster {src_shape}", src.window),
            ));
        }
        if !dst.window.within(&dst_shape) {
            return Err(GraphError::shape(
                dst.task,
                format!("destination window {} outside input cluster {dst_shape}", dst.window),
            ));
        }
        let identity = rearrange.iter().all(|r| *r == RearrangeInfo::Identity);
        if identity
            && !(src.window.size.agrees_with(&dst.window.size)
                && src.window.volume() == dst.window.volume())
        {
            return Err(GraphError::shape(
                dst.task,
                format!(
                    "window sizes differ: {} from {} vs {}",
                    src.window.size, src.task, dst.window.size
                ),
            ));
        }
        if !identity && src.window.volume() != dst.window.volume() {
            return Err(GraphError::shape(
                dst.task,
                format!(
                    "rearranged volumes differ: {} vs {}",
                    src.window.volume(),
                    dst.window.volume()
                ),
            ));
        }

        let id = self.ids.edge();
        if let Some(block) = self.blocks.get_mut(&src.task) {
            block.attach_output(src.port, id)?;
        }
        if let Some(block) = self.blocks.get_mut(&dst.task) {
            block.attach_input(dst.port, id)?;
        }
        let edge = Edge {
            id,
            src,
            dst,
            rearrange,
        };
        tracing::debug!("Connected {}", edge);
        self.edges.insert(id, edge);
        Ok(id)
    }

    /// Remove an edge from both endpoint clusters
    ///
    /// # Errors
    ///
    /// Returns `UnknownEdge` if absent.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge> {
        let edge = self.detach_edge(id).ok_or(GraphError::UnknownEdge(id))?;
        self.rebuild_groups();
        Ok(edge)
    }

    fn detach_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        for task in [edge.src.task, edge.dst.task] {
            if let Some(block) = self.blocks.get_mut(&task) {
                block.detach(id);
            }
        }
        Some(edge)
    }

    /// Edge by id
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Edge by id, as an error when absent
    ///
    /// # Errors
    ///
    /// Returns `UnknownEdge` if absent.
    pub fn edge_ref(&self, id: EdgeId) -> Result<&Edge> {
        self.edges.get(&id).ok_or(GraphError::UnknownEdge(id))
    }

    /// Edges in id order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Number of edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges arriving at `id`, in port then attachment order
    #[must_use]
    pub fn input_edges(&self, id: TaskId) -> Vec<&Edge> {
        self.blocks.get(&id).map_or_else(Vec::new, |b| {
            b.input_clusters()
                .iter()
                .flat_map(|c| c.edges())
                .filter_map(|e| self.edges.get(e))
                .collect()
        })
    }

    /// Edges leaving `id`, in port then attachment order
    #[must_use]
    pub fn output_edges(&self, id: TaskId) -> Vec<&Edge> {
        self.blocks.get(&id).map_or_else(Vec::new, |b| {
            b.output_clusters()
                .iter()
                .flat_map(|c| c.edges())
                .filter_map(|e| self.edges.get(e))
                .collect()
        })
    }

    /// Blocks feeding `id`
    #[must_use]
    pub fn producers(&self, id: TaskId) -> BTreeSet<TaskId> {
        self.input_edges(id).iter().map(|e| e.src.task).collect()
    }

    /// Blocks fed by `id`
    #[must_use]
    pub fn consumers(&self, id: TaskId) -> BTreeSet<TaskId> {
        self.output_edges(id).iter().map(|e| e.dst.task).collect()
    }

    /// Bytes an edge carries, at the producer's precision
    ///
    /// # Errors
    ///
    /// Returns `UnknownEdge`/`UnknownTask` for dangling ids.
    pub fn edge_bytes(&self, id: EdgeId) -> Result<usize> {
        let edge = self.edge_ref(id)?;
        let precision = self.block_ref(edge.src.task)?.precision();
        Ok(precision.bytes_for(edge.volume()))
    }

    // ── Groups ──────────────────────────────────────────────────────────

    /// Computation id → exclusive storage operands
    #[must_use]
    pub const fn groups(&self) -> &BTreeMap<TaskId, BTreeSet<TaskId>> {
        &self.groups
    }

    /// Storage operands owned by computation `id`
    #[must_use]
    pub fn group(&self, id: TaskId) -> Option<&BTreeSet<TaskId>> {
        self.groups.get(&id)
    }

    /// Computation owning storage block `id`, if any
    #[must_use]
    pub fn owner_of(&self, id: TaskId) -> Option<TaskId> {
        self.groups
            .iter()
            .find(|(_, members)| members.contains(&id))
            .map(|(owner, _)| *owner)
    }

    /// Recompute operand groups: a storage block belongs to a computation
    /// when every edge leaving it goes to that computation
    pub fn rebuild_groups(&mut self) {
        let mut groups: BTreeMap<TaskId, BTreeSet<TaskId>> = self
            .blocks
            .values()
            .filter(|b| b.is_compute())
            .map(|b| (b.id(), BTreeSet::new()))
            .collect();

        for block in self.blocks.values().filter(|b| !b.is_compute()) {
            let consumers = self.consumers(block.id());
            let mut it = consumers.iter();
            if let (Some(only), None) = (it.next(), it.next()) {
                if let Some(members) = groups.get_mut(only) {
                    members.insert(block.id());
                }
            }
        }
        self.groups = groups;
    }

    // ── Whole-graph queries ─────────────────────────────────────────────

    /// Kahn topological order, ties broken by id
    ///
    /// # Errors
    ///
    /// Returns `Cycle` if some blocks cannot be ordered.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut indegree: BTreeMap<TaskId, usize> =
            self.blocks.keys().map(|id| (*id, 0)).collect();
        for edge in self.edges.values() {
            if let Some(d) = indegree.get_mut(&edge.dst.task) {
                *d += 1;
            }
        }
        let mut ready: BTreeSet<TaskId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.blocks.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for edge in self.output_edges(id) {
                if let Some(d) = indegree.get_mut(&edge.dst.task) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(edge.dst.task);
                    }
                }
            }
        }

        if order.len() == self.blocks.len() {
            Ok(order)
        } else {
            Err(GraphError::Cycle {
                remaining: self.blocks.len() - order.len(),
            })
        }
    }

    /// Blocks reachable from `id` by following edges forward
    #[must_use]
    pub fn downstream(&self, id: TaskId) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<TaskId> = self.consumers(id).into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.consumers(next));
            }
        }
        seen
    }

    /// Memory footprint of a storage block
    #[must_use]
    pub fn storage_footprint(&self, id: TaskId, alignment: usize) -> Option<usize> {
        match self.blocks.get(&id)?.kind() {
            BlockKind::Storage(s) => Some(footprint::storage_bytes(&s.shape, s.precision, alignment)),
            BlockKind::Compute(_) => None,
        }
    }

    /// Run the id, connection, tiling and acyclicity checks
    ///
    /// # Errors
    ///
    /// Returns the first failure, as the variant of the checker that found
    /// it.
    pub fn validate(&self) -> Result<()> {
        check::check_ids(self)?;
        check::check_connections(self)?;
        check::check_tiling(self)?;
        self.topological_order()?;
        Ok(())
    }

    /// Split a computation block and its exclusive operands
    ///
    /// # Errors
    ///
    /// See [`Splitter::split`].
    pub fn split(&mut self, node: TaskId, vector: SplitVector, modes: SplitModes) -> Result<Vec<TaskId>> {
        Splitter::new(self).split(node, vector, modes)
    }
}
