//! Splitting a computation block into equivalent sub-blocks
//!
//! A [`SplitVector`] gives a partition factor per splittable axis. The block
//! is cut into the Cartesian product of the per-axis intervals. Each copy
//! gets its own copy of every exclusive storage operand, trimmed to the part
//! the copy reads, so a copy and its operands can be placed on one core.
//! Edges to shared neighbours are rebuilt by intersecting the original
//! windows with each copy's window.
//!
//! Splitting the reduction axis of `CC`, `CC2D` or `CVM` turns the copies
//! into 32-bit partial sums and inserts one `CADD` that accumulates them and
//! takes over the original outputs.

mod interval;

pub use interval::{average_split, receptive_field, ReceptiveField};

use crate::block::{BiasType, ComputeBlock, ComputeOp, Padding, Precision, TaskBlock};
use crate::edge::{Edge, Endpoint, RearrangeInfo};
use crate::error::{GraphError, Result};
use crate::graph::TaskGraph;
use crate::ids::TaskId;
use crate::shape::{Axis, Shape, Window};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

/// How one axis is partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// Contiguous intervals of near-equal length
    #[default]
    Average,
}

/// Partition mode per splittable axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitModes {
    /// Mode along `y`
    pub y: SplitMode,
    /// Mode along `x`
    pub x: SplitMode,
    /// Mode along `f`
    pub f: SplitMode,
    /// Mode along `r`
    pub r: SplitMode,
}

impl SplitModes {
    /// Mode along `axis`; non-splittable axes report the default
    #[must_use]
    pub const fn along(&self, axis: Axis) -> SplitMode {
        match axis {
            Axis::Y => self.y,
            Axis::X => self.x,
            Axis::F => self.f,
            Axis::R => self.r,
            _ => SplitMode::Average,
        }
    }
}

/// Partition factor per splittable axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitVector {
    /// Parts along `y`
    pub y: usize,
    /// Parts along `x`
    pub x: usize,
    /// Parts along `f`
    pub f: usize,
    /// Parts along `r`
    pub r: usize,
}

impl Default for SplitVector {
    fn default() -> Self {
        Self::ONE
    }
}

impl SplitVector {
    /// No split
    pub const ONE: Self = Self {
        y: 1,
        x: 1,
        f: 1,
        r: 1,
    };

    /// Create a split vector
    pub const fn new(y: usize, x: usize, f: usize, r: usize) -> Self {
        Self { y, x, f, r }
    }

    /// Builder: set one factor
    #[must_use]
    pub fn with(mut self, axis: Axis, parts: usize) -> Self {
        self.set(axis, parts);
        self
    }

    /// Factor along `axis`; kernel and input axes are always 1
    #[must_use]
    pub const fn along(&self, axis: Axis) -> usize {
        match axis {
            Axis::Y => self.y,
            Axis::X => self.x,
            Axis::F => self.f,
            Axis::R => self.r,
            _ => 1,
        }
    }

    /// Set the factor along a splittable axis; other axes are ignored
    pub fn set(&mut self, axis: Axis, parts: usize) {
        match axis {
            Axis::Y => self.y = parts,
            Axis::X => self.x = parts,
            Axis::F => self.f = parts,
            Axis::R => self.r = parts,
            _ => {}
        }
    }

    /// Whether every factor is 1
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::ONE
    }

    /// Number of copies produced
    #[must_use]
    pub const fn copies(&self) -> usize {
        self.y * self.x * self.f * self.r
    }
}

impl fmt::Display for SplitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(y={}, x={}, f={}, r={})", self.y, self.x, self.f, self.r)
    }
}

/// Edge to create once the original block is gone
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEdge {
    src: Endpoint,
    dst: Endpoint,
    rearrange: Vec<RearrangeInfo>,
}

/// One compute copy before it is committed
struct CopyPlan {
    block: TaskBlock,
    window: Window,
    r_index: usize,
}

/// Splits computation blocks of one graph
pub struct Splitter<'g> {
    graph: &'g mut TaskGraph,
}

impl<'g> Splitter<'g> {
    /// Splitter working on `graph`
    pub fn new(graph: &'g mut TaskGraph) -> Self {
        Self { graph }
    }

    /// Split `node` by `vector` and return the ids of every new block:
    /// compute copies each followed by their operand copies, then the
    /// accumulation block if one was inserted.
    ///
    /// Factors on an axis the block cannot split (global pooling window,
    /// `CADD` addends, `CLUT` table) are logged and treated as 1. A vector
    /// of all ones leaves the graph untouched and returns an empty list.
    ///
    /// # Errors
    ///
    /// - `UnsupportedBlock` for storage blocks
    /// - `ShapeViolation` for a zero factor, a factor above 1 on an absent
    ///   axis, or a factor above the axis extent
    /// - `UnsupportedRearrange` if an edge with a reshape or permutation
    ///   would have to be cut
    pub fn split(&mut self, node: TaskId, vector: SplitVector, modes: SplitModes) -> Result<Vec<TaskId>> {
        let original = self.graph.block_ref(node)?.clone();
        let compute = original
            .as_compute()
            .cloned()
            .ok_or_else(|| GraphError::unsupported(node, "only computation blocks can be split"))?;

        let factors = effective_factors(node, &compute, vector)?;
        if factors.is_identity() {
            tracing::debug!("Split of {node} by {vector} is a no-op");
            return Ok(Vec::new());
        }

        let intervals: Vec<Vec<Range<usize>>> = Axis::SPLITTABLE
            .iter()
            .map(|&axis| match modes.along(axis) {
                SplitMode::Average if compute.shape.has(axis) => {
                    average_split(compute.shape.get(axis), factors.along(axis))
                }
                SplitMode::Average => vec![0..0],
            })
            .collect();
        let reduce = factors.r > 1 && compute.op.is_reduction();

        let operands: BTreeSet<TaskId> = self.graph.group(node).cloned().unwrap_or_default();
        let accumulator = if reduce { Some(self.graph.ids_mut().task()) } else { None };

        let mut created = Vec::new();
        let mut blocks = Vec::new();
        let mut pending = Vec::new();

        for ranges in cartesian(&intervals) {
            let mut plan = self.plan_copy(&compute, factors, &ranges, reduce)?;
            plan.r_index = intervals[3].iter().position(|r| *r == ranges[3]).unwrap_or(0);
            let copy_id = plan.block.id();
            created.push(copy_id);

            let copy_ports = plan.block.input_clusters().len();
            for (port, (_, map)) in compute.input_ports().iter().enumerate() {
                if port >= copy_ports {
                    continue;
                }
                let required = map.window(&plan.window);
                for edge in original.input(port)?.edges() {
                    let edge = self.graph.edge_ref(*edge)?.clone();
                    let Some(part) = overlap(&edge.dst.window, &required) else {
                        continue;
                    };
                    let src_part = carry(&edge, &edge.dst.window, &part, &edge.src.window)?;
                    let dst = Endpoint::new(copy_id, port, required.localize(&part));

                    if operands.contains(&edge.src.task) {
                        let operand = self.copy_operand(edge.src.task, &src_part, &mut pending)?;
                        created.push(operand.id());
                        pending.push(PendingEdge {
                            src: Endpoint::new(operand.id(), edge.src.port, Window::full(src_part.size)),
                            dst,
                            rearrange: edge.rearrange.clone(),
                        });
                        blocks.push(operand);
                    } else {
                        pending.push(PendingEdge {
                            src: Endpoint::new(edge.src.task, edge.src.port, src_part),
                            dst,
                            rearrange: edge.rearrange.clone(),
                        });
                    }
                }
            }

            let out_window = compute.output_map().window(&plan.window);
            if let Some(acc) = accumulator {
                pending.push(PendingEdge {
                    src: Endpoint::new(copy_id, 0, Window::full(out_window.size)),
                    dst: Endpoint::new(acc, plan.r_index, out_window),
                    rearrange: Vec::new(),
                });
            } else {
                for edge in original.output(0)?.edges() {
                    let edge = self.graph.edge_ref(*edge)?.clone();
                    let Some(part) = overlap(&edge.src.window, &out_window) else {
                        continue;
                    };
                    let dst_part = carry(&edge, &edge.src.window, &part, &edge.dst.window)?;
                    pending.push(PendingEdge {
                        src: Endpoint::new(copy_id, 0, out_window.localize(&part)),
                        dst: Endpoint::new(edge.dst.task, edge.dst.port, dst_part),
                        rearrange: edge.rearrange.clone(),
                    });
                }
            }
            blocks.push(plan.block);
        }

        if let Some(acc) = accumulator {
            let shape = Shape {
                r: factors.r,
                ..Shape::yxf(compute.shape.y, compute.shape.x, compute.shape.f)
            };
            let cadd = ComputeBlock::new(
                ComputeOp::Cadd {
                    bit_shift: compute.op.bit_shift().unwrap_or(0),
                },
                shape,
                compute.precision,
                BiasType::None,
            );
            blocks.push(TaskBlock::compute(acc, cadd)?);
            created.push(acc);
            for edge in original.output(0)?.edges() {
                let edge = self.graph.edge_ref(*edge)?;
                pending.push(PendingEdge {
                    src: Endpoint::new(acc, 0, edge.src.window),
                    dst: edge.dst,
                    rearrange: edge.rearrange.clone(),
                });
            }
        }

        let pruned = prune_duplicates(&mut pending);
        if pruned > 0 {
            tracing::debug!("Pruned {pruned} duplicate edge(s) while splitting {node}");
        }

        let committed = self.commit(node, &operands, blocks, pending);
        self.graph.rebuild_groups();
        committed?;

        tracing::info!(
            "Split {node} ({}) by {factors} into {} block(s){}",
            compute.op,
            created.len(),
            if reduce { " with accumulation" } else { "" }
        );
        Ok(created)
    }

    /// Swap the original block and its operands for the planned copies.
    /// Operand groups are left stale for the caller to rebuild once.
    fn commit(
        &mut self,
        node: TaskId,
        operands: &BTreeSet<TaskId>,
        blocks: Vec<TaskBlock>,
        pending: Vec<PendingEdge>,
    ) -> Result<()> {
        for operand in operands {
            self.graph.remove_block_deferred(*operand)?;
        }
        self.graph.remove_block_deferred(node)?;
        for block in blocks {
            self.graph.insert_block_deferred(block)?;
        }
        for edge in pending {
            self.graph.insert_edge_deferred(edge.src, edge.dst, edge.rearrange)?;
        }
        Ok(())
    }

    /// Build one compute copy covering `ranges` (one per splittable axis)
    fn plan_copy(
        &mut self,
        compute: &ComputeBlock,
        factors: SplitVector,
        ranges: &[Range<usize>],
        reduce: bool,
    ) -> Result<CopyPlan> {
        let mut window = Window::full(compute.shape);
        for (&axis, range) in Axis::SPLITTABLE.iter().zip(ranges) {
            if compute.shape.has(axis) {
                window.position.set(axis, range.start);
                window.size.set(axis, range.len());
            }
        }

        let mut block = compute.clone();
        if let Some(kernel) = compute.op.window() {
            let mut padding: Padding = kernel.padding;
            for (out_axis, in_axis, range) in [(Axis::Y, Axis::Iy, &ranges[0]), (Axis::X, Axis::Ix, &ranges[1])] {
                if factors.along(out_axis) == 1 {
                    continue;
                }
                let k = compute.shape.get(if in_axis == Axis::Iy { Axis::Ky } else { Axis::Kx });
                let (pad_before, _) = kernel.padding.along(in_axis);
                let field = receptive_field(
                    range,
                    kernel.stride_along(in_axis),
                    kernel.effective_kernel(in_axis, k),
                    pad_before,
                    compute.shape.get(in_axis),
                );
                window.position.set(in_axis, field.input.start);
                window.size.set(in_axis, field.input.len());
                padding.set_along(in_axis, field.pad_before, field.pad_after);
            }
            if let Some(w) = block.op.window_mut() {
                w.padding = padding;
            }
        }
        block.shape = window.size;

        if reduce {
            block.precision = Precision::Int32;
            block.op.set_bit_shift(0);
            if ranges[3].start > 0 {
                block.bias = BiasType::None;
            }
        }

        let id = self.graph.ids_mut().task();
        Ok(CopyPlan {
            block: TaskBlock::compute(id, block)?,
            window,
            r_index: 0,
        })
    }

    /// Copy the part `part` of operand `operand` and rebuild the edges that
    /// feed that part
    fn copy_operand(&mut self, operand: TaskId, part: &Window, pending: &mut Vec<PendingEdge>) -> Result<TaskBlock> {
        let source = self.graph.block_ref(operand)?.clone();
        let id = self.graph.ids_mut().task();
        let copy = source.copy_like(id, part.size)?;

        for edge in self.graph.input_edges(operand) {
            let Some(piece) = overlap(&edge.dst.window, part) else {
                continue;
            };
            let src_piece = carry(edge, &edge.dst.window, &piece, &edge.src.window)?;
            pending.push(PendingEdge {
                src: Endpoint::new(edge.src.task, edge.src.port, src_piece),
                dst: Endpoint::new(id, edge.dst.port, part.localize(&piece)),
                rearrange: edge.rearrange.clone(),
            });
        }
        Ok(copy)
    }
}

/// Validate `vector` against `compute` and clamp axes the block refuses to
/// split
fn effective_factors(node: TaskId, compute: &ComputeBlock, vector: SplitVector) -> Result<SplitVector> {
    let mut factors = vector;
    for axis in Axis::SPLITTABLE {
        let parts = vector.along(axis);
        if parts == 0 {
            return Err(GraphError::shape(node, format!("split factor 0 on axis {axis}")));
        }
        if parts == 1 {
            continue;
        }
        if let Some(reason) = refuses_split(compute, axis) {
            tracing::warn!("{node} ({}): {reason}; splitting {axis} by 1 instead of {parts}", compute.op);
            factors.set(axis, 1);
            continue;
        }
        let extent = compute.shape.get(axis);
        if extent == 0 {
            return Err(GraphError::shape(
                node,
                format!("cannot split absent axis {axis} by {parts}"),
            ));
        }
        if parts > extent {
            return Err(GraphError::shape(
                node,
                format!("split factor {parts} exceeds {axis} extent {extent}"),
            ));
        }
    }
    Ok(factors)
}

/// Why `compute` cannot be split along `axis`, if it cannot
fn refuses_split(compute: &ComputeBlock, axis: Axis) -> Option<&'static str> {
    match (&compute.op, axis) {
        (ComputeOp::Cavg { window, .. }, Axis::Y | Axis::X) => {
            let (in_axis, k) = if axis == Axis::Y {
                (Axis::Iy, compute.shape.ky)
            } else {
                (Axis::Ix, compute.shape.kx)
            };
            let (before, after) = window.padding.along(in_axis);
            let padded = compute.shape.get(in_axis) + before + after;
            (window.effective_kernel(in_axis, k) >= padded).then_some("global pooling window covers the whole input")
        }
        (ComputeOp::Cadd { .. }, Axis::R) => Some("accumulation addends cannot be split"),
        (ComputeOp::Clut, Axis::R) => Some("lookup table cannot be split"),
        _ => None,
    }
}

/// Positive-volume intersection
fn overlap(a: &Window, b: &Window) -> Option<Window> {
    a.intersect(b).filter(|w| w.volume() > 0)
}

/// Map `part` of `from` (one end of `edge`) onto the other end `to`
fn carry(edge: &Edge, from: &Window, part: &Window, to: &Window) -> Result<Window> {
    if edge.is_identity() {
        Ok(from.project(part, to))
    } else if part == from {
        Ok(*to)
    } else {
        Err(GraphError::UnsupportedRearrange { edge: edge.id })
    }
}

/// Drop repeated connections, keeping the first; returns how many were dropped
fn prune_duplicates(pending: &mut Vec<PendingEdge>) -> usize {
    let before = pending.len();
    let mut kept: Vec<PendingEdge> = Vec::with_capacity(before);
    for edge in pending.drain(..) {
        if !kept.contains(&edge) {
            kept.push(edge);
        }
    }
    *pending = kept;
    before - pending.len()
}

/// Every combination of one interval per axis, first axis outermost
fn cartesian(intervals: &[Vec<Range<usize>>]) -> Vec<Vec<Range<usize>>> {
    intervals.iter().fold(vec![Vec::new()], |acc, axis| {
        acc.into_iter()
            .flat_map(|prefix| {
                axis.iter().map(move |range| {
                    let mut next = prefix.clone();
                    next.push(range.clone());
                    next
                })
            })
            .collect()
    })
}
