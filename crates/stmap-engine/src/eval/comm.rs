//! Bandwidth-shared transfer simulation
//!
//! Each routed edge is a transfer of a fixed number of bytes along a chain
//! of hops. Transfers that are on the same hop at the same time split its
//! bandwidth evenly. The simulation is event driven:
//!
//! 1. pop every transfer tied for the earliest ready time, and peek the
//!    next ready time still queued;
//! 2. group the popped transfers by the hop each is on;
//! 3. give each the share `bandwidth / n` of its hop and work out when it
//!    would finish the hop at that rate;
//! 4. advance everyone to the earliest of those finishes or the next
//!    queued ready time, whichever comes first, since a transfer joining
//!    a hop changes the shares;
//! 5. transfers that finished their hop move to the next one (or finish),
//!    the rest are requeued with their partial progress.
//!
//! [`CommEvaluator::evaluate`] returns as soon as at least one transfer
//! completes its last hop.

use crate::action::ActionModel;
use crate::error::{EngineError, Result};
use crate::route::{self, Hop};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use stmap_chip::{HardwareConfig, MLCoord};
use stmap_graph::EdgeId;
use tracing::debug;

/// Relative slack when deciding a hop is finished
const EPSILON: f64 = 1e-9;

/// Simulated time in cycles, totally ordered
#[derive(Debug, Clone, Copy)]
struct Time(f64);

impl PartialEq for Time {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Time {}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Progress of one transfer on one hop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HopRecord {
    /// When the transfer first used the hop
    pub start: f64,
    /// When it finished the hop
    pub end: Option<f64>,
    /// Fraction of the transfer's bytes through the hop
    pub percent: f64,
}

/// Constant-rate stretch of one transfer on one hop
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSegment {
    /// Transfer
    pub edge: EdgeId,
    /// Link used
    pub hop: Hop,
    /// Segment start
    pub from: f64,
    /// Segment end
    pub to: f64,
    /// Bytes per cycle granted
    pub rate: f64,
    /// Link capacity
    pub bandwidth: f64,
}

#[derive(Debug, Clone)]
struct Transfer {
    bytes: f64,
    hops: Vec<(Hop, f64)>,
    next: usize,
    finished: Option<f64>,
}

/// Event-driven simulator of concurrent transfers
#[derive(Debug, Clone)]
pub struct CommEvaluator {
    bandwidths: Vec<f64>,
    transfers: BTreeMap<EdgeId, Transfer>,
    records: BTreeMap<(EdgeId, usize), HopRecord>,
    queue: BinaryHeap<Reverse<(Time, EdgeId)>>,
    trace: Vec<TraceSegment>,
    now: f64,
}

impl CommEvaluator {
    /// Empty simulation using the link bandwidths of `hw`
    pub fn new(hw: &HardwareConfig) -> Self {
        Self {
            bandwidths: hw.space.iter().map(|l| l.bandwidth).collect(),
            transfers: BTreeMap::new(),
            records: BTreeMap::new(),
            queue: BinaryHeap::new(),
            trace: Vec::new(),
            now: 0.0,
        }
    }

    /// Simulation of every routed edge of a placement, all ready at time 0
    ///
    /// # Errors
    ///
    /// Returns `Route` for a route crossing a level without bandwidth and
    /// graph errors for routes of edges no longer in the graph.
    pub fn from_placement(model: &ActionModel) -> Result<Self> {
        let mut eval = Self::new(model.config());
        for (edge, path) in model.context().routes() {
            let bytes = model.graph().edge_bytes(edge)?;
            eval.add_transfer(edge, bytes, 0.0, path)?;
        }
        Ok(eval)
    }

    /// Queue a transfer of `bytes` along the columns of `path`, ready at
    /// `start`
    ///
    /// # Errors
    ///
    /// Returns `Route` if the edge is already queued or a hop has no
    /// positive bandwidth.
    pub fn add_transfer(&mut self, edge: EdgeId, bytes: usize, start: f64, path: &[MLCoord]) -> Result<()> {
        if self.transfers.contains_key(&edge) {
            return Err(EngineError::route(edge, "transfer already queued"));
        }
        let mut hops = Vec::new();
        for hop in route::hops(path) {
            let bandwidth = hop
                .level()
                .and_then(|l| self.bandwidths.get(l).copied())
                .filter(|b| *b > 0.0)
                .ok_or_else(|| {
                    EngineError::route(edge, format!("no bandwidth between {} and {}", hop.from, hop.to))
                })?;
            hops.push((hop, bandwidth));
        }
        #[allow(clippy::cast_precision_loss)]
        let bytes = bytes as f64;
        self.transfers.insert(
            edge,
            Transfer {
                bytes,
                hops,
                next: 0,
                finished: None,
            },
        );
        self.queue.push(Reverse((Time(start), edge)));
        Ok(())
    }

    /// Time of the last completion returned
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Whether transfers remain queued
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Completion time of a finished transfer
    #[must_use]
    pub fn finish_time(&self, edge: EdgeId) -> Option<f64> {
        self.transfers.get(&edge).and_then(|t| t.finished)
    }

    /// Progress record of a transfer on its `hop`-th hop
    #[must_use]
    pub fn record(&self, edge: EdgeId, hop: usize) -> Option<&HopRecord> {
        self.records.get(&(edge, hop))
    }

    /// Every constant-rate segment simulated so far
    #[must_use]
    pub fn trace(&self) -> &[TraceSegment] {
        &self.trace
    }

    /// Total rate granted on `hop` at instant `t`
    #[must_use]
    pub fn load_at(&self, hop: &Hop, t: f64) -> f64 {
        self.trace
            .iter()
            .filter(|s| s.hop == *hop && s.from <= t && t < s.to)
            .map(|s| s.rate)
            .sum()
    }

    /// Pop every transfer tied for the earliest ready time
    fn pop_earliest(&mut self) -> Option<(f64, Vec<EdgeId>)> {
        let Reverse((first, edge)) = self.queue.pop()?;
        let mut batch = vec![edge];
        while let Some(Reverse((t, _))) = self.queue.peek() {
            if *t != first {
                break;
            }
            if let Some(Reverse((_, e))) = self.queue.pop() {
                batch.push(e);
            }
        }
        Some((first.0, batch))
    }

    /// Advance until at least one transfer completes
    ///
    /// Returns the transfers that completed and the time they did, or
    /// `None` once nothing is queued.
    pub fn evaluate(&mut self) -> Option<(Vec<EdgeId>, f64)> {
        loop {
            let (start, batch) = self.pop_earliest()?;
            let next_ready = self.queue.peek().map(|Reverse((t, _))| t.0);

            // Empty transfers and transfers with no hop left are done on arrival.
            let (done, moving): (Vec<EdgeId>, Vec<EdgeId>) = batch.into_iter().partition(|e| {
                self.transfers
                    .get(e)
                    .map_or(true, |t| t.bytes <= 0.0 || t.next >= t.hops.len())
            });
            if !done.is_empty() {
                for edge in &moving {
                    self.queue.push(Reverse((Time(start), *edge)));
                }
                return Some(self.complete(done, start));
            }

            let mut groups: BTreeMap<Hop, Vec<EdgeId>> = BTreeMap::new();
            for edge in moving {
                if let Some(t) = self.transfers.get(&edge) {
                    groups.entry(t.hops[t.next].0.clone()).or_default().push(edge);
                }
            }

            // Candidate finish of every transfer at its fair share.
            let mut plans: Vec<(EdgeId, Hop, f64, f64, f64)> = Vec::new();
            for (hop, edges) in &groups {
                #[allow(clippy::cast_precision_loss)]
                let n = edges.len() as f64;
                for edge in edges {
                    let Some(t) = self.transfers.get(edge) else {
                        continue;
                    };
                    let bandwidth = t.hops[t.next].1;
                    let share = bandwidth / n;
                    let record = self.records.entry((*edge, t.next)).or_insert(HopRecord {
                        start,
                        end: None,
                        percent: 0.0,
                    });
                    let remaining = t.bytes * (1.0 - record.percent);
                    plans.push((*edge, hop.clone(), share, bandwidth, start + remaining / share));
                }
            }

            let earliest_finish = plans.iter().map(|p| p.4).fold(f64::INFINITY, f64::min);
            let deadline = next_ready.map_or(earliest_finish, |r| r.min(earliest_finish));

            let mut finished = Vec::new();
            for (edge, hop, share, bandwidth, finish) in plans {
                let Some(t) = self.transfers.get_mut(&edge) else {
                    continue;
                };
                let index = t.next;
                if deadline > start {
                    self.trace.push(TraceSegment {
                        edge,
                        hop,
                        from: start,
                        to: deadline,
                        rate: share,
                        bandwidth,
                    });
                }
                let record = self.records.entry((edge, index)).or_insert(HopRecord {
                    start,
                    end: None,
                    percent: 0.0,
                });
                if finish - deadline <= EPSILON * finish.abs().max(1.0) {
                    record.percent = 1.0;
                    record.end = Some(deadline);
                    t.next += 1;
                    if t.next >= t.hops.len() {
                        finished.push(edge);
                        continue;
                    }
                } else {
                    record.percent += (deadline - start) * share / t.bytes;
                }
                self.queue.push(Reverse((Time(deadline), edge)));
            }

            if !finished.is_empty() {
                return Some(self.complete(finished, deadline));
            }
        }
    }

    fn complete(&mut self, mut edges: Vec<EdgeId>, at: f64) -> (Vec<EdgeId>, f64) {
        edges.sort_unstable();
        for edge in &edges {
            if let Some(t) = self.transfers.get_mut(edge) {
                t.finished = Some(at);
            }
        }
        self.now = at;
        debug!("{} transfer(s) complete at t={at}", edges.len());
        (edges, at)
    }

    /// Run until every transfer has completed; returns each completion in
    /// order
    pub fn run_to_completion(&mut self) -> Vec<(EdgeId, f64)> {
        let mut done = Vec::new();
        while let Some((edges, at)) = self.evaluate() {
            done.extend(edges.into_iter().map(|e| (e, at)));
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(x: usize) -> MLCoord {
        MLCoord::from_levels(vec![[0, 0].into(), [x, 0].into()])
    }

    fn line(bandwidth: f64) -> HardwareConfig {
        let mut hw = HardwareConfig::single_chip(4, 1);
        hw.space[1].bandwidth = bandwidth;
        hw
    }

    fn e(id: u32) -> EdgeId {
        EdgeId::new(id)
    }

    #[test]
    fn test_late_joiner_shares_bandwidth() {
        let mut sim = CommEvaluator::new(&line(10.0));
        let path = [col(0), col(1)];
        sim.add_transfer(e(1), 100, 0.0, &path).unwrap();
        sim.add_transfer(e(2), 50, 5.0, &path).unwrap();

        let (done, t) = sim.evaluate().unwrap();
        assert_eq!(done, vec![e(1), e(2)]);
        assert!((t - 15.0).abs() < 1e-9);
        assert!(sim.evaluate().is_none());

        let hop = &route::hops(&path)[0];
        assert!((sim.load_at(hop, 2.0) - 10.0).abs() < 1e-9);
        assert!((sim.load_at(hop, 7.0) - 10.0).abs() < 1e-9);
        for s in sim.trace().iter().filter(|s| s.from >= 5.0) {
            assert!((s.rate - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_transfer_moving_onto_a_busy_hop_shares_it() {
        let mut sim = CommEvaluator::new(&line(10.0));
        let path = [col(0), col(1), col(2)];
        sim.add_transfer(e(1), 100, 0.0, &path).unwrap();
        sim.add_transfer(e(2), 200, 0.0, &path[1..]).unwrap();

        // e1 reaches the second link at 10 while e2 still has 100 bytes on it
        let done = sim.run_to_completion();
        assert_eq!(done.len(), 2);
        for (_, t) in &done {
            assert!((t - 30.0).abs() < 1e-9);
        }

        let second = &route::hops(&path)[1];
        assert!((sim.load_at(second, 5.0) - 10.0).abs() < 1e-9);
        assert!((sim.load_at(second, 15.0) - 10.0).abs() < 1e-9);
        for s in sim.trace().iter().filter(|s| s.hop == *second && s.from >= 10.0) {
            assert!((s.rate - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_disjoint_hops_do_not_interfere() {
        let mut sim = CommEvaluator::new(&line(10.0));
        sim.add_transfer(e(1), 100, 0.0, &[col(0), col(1)]).unwrap();
        sim.add_transfer(e(2), 100, 0.0, &[col(2), col(3)]).unwrap();
        let done = sim.run_to_completion();
        assert_eq!(done, vec![(e(1), 10.0), (e(2), 10.0)]);
    }

    #[test]
    fn test_multi_hop_pipelines_through_links() {
        let mut sim = CommEvaluator::new(&line(10.0));
        sim.add_transfer(e(1), 100, 0.0, &[col(0), col(1), col(2), col(3)]).unwrap();
        let (_, t) = sim.evaluate().unwrap();
        assert!((t - 30.0).abs() < 1e-9);
        let record = sim.record(e(1), 1).unwrap();
        assert_eq!(record.end, Some(20.0));
        assert!((record.start - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_local_and_empty_transfers_finish_on_arrival() {
        let mut sim = CommEvaluator::new(&line(10.0));
        sim.add_transfer(e(1), 0, 3.0, &[col(0), col(1)]).unwrap();
        sim.add_transfer(e(2), 64, 4.0, &[col(2)]).unwrap();
        assert_eq!(sim.evaluate(), Some((vec![e(1)], 3.0)));
        assert_eq!(sim.evaluate(), Some((vec![e(2)], 4.0)));
        assert!(sim.is_idle());
    }

    #[test]
    fn test_fair_share_never_exceeds_link() {
        let mut sim = CommEvaluator::new(&line(8.0));
        let path = [col(0), col(1), col(2)];
        for (i, start) in [0.0, 1.0, 1.0, 6.5].iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            sim.add_transfer(e(i as u32 + 1), 40 + 10 * i, *start, &path).unwrap();
        }
        let done = sim.run_to_completion();
        assert_eq!(done.len(), 4);
        for s in sim.trace() {
            let load = sim.load_at(&s.hop, s.from);
            assert!(load <= s.bandwidth + 1e-9, "hop over-subscribed: {load}");
            let sharing = sim
                .trace()
                .iter()
                .filter(|o| o.hop == s.hop && o.from <= s.from && s.from < o.to)
                .count();
            #[allow(clippy::cast_precision_loss)]
            let fair = s.bandwidth / sharing as f64;
            assert!((s.rate - fair).abs() < 1e-9);
        }
    }

    #[test]
    fn test_duplicate_and_missing_bandwidth_rejected() {
        let mut sim = CommEvaluator::new(&line(0.0));
        assert!(matches!(
            sim.add_transfer(e(1), 8, 0.0, &[col(0), col(1)]),
            Err(EngineError::Route { .. })
        ));
        let mut sim = CommEvaluator::new(&line(1.0));
        sim.add_transfer(e(1), 8, 0.0, &[col(0)]).unwrap();
        assert!(sim.add_transfer(e(1), 8, 0.0, &[col(0)]).is_err());
    }
}
