//! Graph integrity checkers
//!
//! Each checker reports through its own [`GraphError`] variant so a caller
//! can tell which invariant broke after a structural pass.

use crate::error::{GraphError, Result};
use crate::graph::TaskGraph;
use crate::shape::Window;

/// Task and edge ids share one space; no id may name both, and the
/// allocator must be ahead of every id in use
///
/// # Errors
///
/// Returns `DuplicateId` on the first collision.
pub fn check_ids(graph: &TaskGraph) -> Result<()> {
    let next = graph.ids().peek();
    for block in graph.blocks() {
        let raw = block.id().raw();
        if graph.edge(crate::EdgeId::new(raw)).is_some() {
            return Err(GraphError::DuplicateId {
                id: raw,
                reason: "used by both a block and an edge".to_string(),
            });
        }
        if raw >= next {
            return Err(GraphError::DuplicateId {
                id: raw,
                reason: format!("block id not below the allocator's next id {next}"),
            });
        }
    }
    for edge in graph.edges() {
        if edge.id.raw() >= next {
            return Err(GraphError::DuplicateId {
                id: edge.id.raw(),
                reason: format!("edge id not below the allocator's next id {next}"),
            });
        }
    }
    Ok(())
}

/// Every edge is listed by exactly the two clusters it names, every cluster
/// lists only edges that point back at it, and every window is in bounds
///
/// # Errors
///
/// Returns `Connection` on the first inconsistency.
pub fn check_connections(graph: &TaskGraph) -> Result<()> {
    for edge in graph.edges() {
        let src = graph
            .block(edge.src.task)
            .ok_or_else(|| GraphError::connection(edge.id, format!("source {} missing", edge.src.task)))?;
        let dst = graph
            .block(edge.dst.task)
            .ok_or_else(|| GraphError::connection(edge.id, format!("destination {} missing", edge.dst.task)))?;

        let out = src
            .output_clusters()
            .get(edge.src.port)
            .ok_or_else(|| GraphError::connection(edge.id, format!("{} has no output port {}", src.id(), edge.src.port)))?;
        let inp = dst
            .input_clusters()
            .get(edge.dst.port)
            .ok_or_else(|| GraphError::connection(edge.id, format!("{} has no input port {}", dst.id(), edge.dst.port)))?;

        if !out.edges().contains(&edge.id) {
            return Err(GraphError::connection(edge.id, "not listed by source cluster"));
        }
        if !inp.edges().contains(&edge.id) {
            return Err(GraphError::connection(edge.id, "not listed by destination cluster"));
        }
        if !edge.src.window.within(out.shape()) {
            return Err(GraphError::connection(edge.id, "source window out of bounds"));
        }
        if !edge.dst.window.within(inp.shape()) {
            return Err(GraphError::connection(edge.id, "destination window out of bounds"));
        }
    }

    for block in graph.blocks() {
        let sides = [
            (block.input_clusters(), true),
            (block.output_clusters(), false),
        ];
        for (clusters, incoming) in sides {
            for (port, cluster) in clusters.iter().enumerate() {
                for id in cluster.edges() {
                    let edge = graph
                        .edge(*id)
                        .ok_or_else(|| GraphError::connection(*id, format!("listed by {} but missing", block.id())))?;
                    let end = if incoming { edge.dst } else { edge.src };
                    if end.task != block.id() || end.port != port {
                        return Err(GraphError::connection(
                            *id,
                            format!("listed by {} port {port} but points elsewhere", block.id()),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Every input cluster is exactly tiled by its edges' destination windows
///
/// # Errors
///
/// Returns `Tiling` naming the block and port of the first gap or overlap.
pub fn check_tiling(graph: &TaskGraph) -> Result<()> {
    for block in graph.blocks() {
        for (port, cluster) in block.input_clusters().iter().enumerate() {
            let windows: Vec<Window> = cluster
                .edges()
                .iter()
                .filter_map(|id| graph.edge(*id))
                .map(|e| e.dst.window)
                .collect();

            for (i, a) in windows.iter().enumerate() {
                if !a.within(cluster.shape()) {
                    return Err(GraphError::tiling(block.id(), port, format!("window {a} out of bounds")));
                }
                for b in &windows[i + 1..] {
                    if a.intersect(b).is_some_and(|w| w.volume() > 0) {
                        return Err(GraphError::tiling(block.id(), port, format!("windows {a} and {b} overlap")));
                    }
                }
            }

            let covered: usize = windows.iter().map(Window::volume).sum();
            let expected = cluster.shape().volume();
            if covered != expected {
                return Err(GraphError::tiling(
                    block.id(),
                    port,
                    format!("edges cover {covered} of {expected} elements"),
                ));
            }
        }
    }
    Ok(())
}
