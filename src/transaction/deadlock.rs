//! Wait-for graph construction and local deadlock detection (C8).
//!
//! Runs no more often than [`LockManagerConfig::run_deadlock_interval`]
//! (§4.8). Each call walks every resource currently in the table exactly
//! once, under that resource's own mutex (never two at a time — §5), and
//! emits edges per the four adjacency rules in §4.8. The resulting graph is
//! rebuilt from scratch on every run rather than carried between runs: the
//! original's edge-pool-plus-watermark scheme exists to avoid reprocessing
//! resolved cycles across runs in a language without a GC, which a fresh
//! `HashMap` per run sidesteps at the cost of redoing work a long-lived
//! graph would have skipped (see DESIGN.md's Open Question on this).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::common::TransactionId;

use super::lock_arena::BlockPool;
use super::lock_entry::Entry;
use super::lock_mode::{compat, Mode};
use super::lock_table::ResourceTable;
use super::lock_wait::ResumeStatus;

/// One wait-for edge: `from` (implicit, the map key) is blocked on `to`.
#[derive(Debug, Clone, Copy)]
struct Edge {
    to: TransactionId,
    #[allow(dead_code)]
    seq: u64,
    recorded_at: Instant,
}

/// Per-transaction node bookkeeping for one detection pass (§3,
/// "Wait-for-graph state").
struct Node {
    edges: Vec<Edge>,
    /// Wall-clock time this transaction's current wait episode began; taken
    /// from the oldest still-blocked entry's [`super::lock_wait::WaitSlot::registered_at`].
    wait_started_at: Instant,
    /// Whether any thread of this transaction requested a wait budget other
    /// than `Infinite` — a candidate for "most permissive timeout" in
    /// victim selection.
    timeoutable: bool,
    is_holder_somewhere: bool,
}

/// Outcome of one detector pass.
#[derive(Debug, Default)]
pub struct DeadlockStats {
    pub resources_scanned: usize,
    pub edges_recorded: usize,
    pub cycles_found: usize,
    pub victims_aborted: Vec<TransactionId>,
    pub victims_timed_out: Vec<TransactionId>,
}

/// The wait-for graph plus the monotonic edge-sequence counter (§4.8:
/// "bumping a global sequence counter per edge"). Owned by the
/// [`super::lock_manager::LockManager`] so the counter persists across runs.
pub struct WaitForGraph {
    edge_seq: AtomicU64,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self { edge_seq: AtomicU64::new(0) }
    }

    fn next_seq(&self) -> u64 {
        self.edge_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one detection pass: build the graph, walk it for cycles, select
    /// and wake victims. Returns stats for the caller (typically logged by
    /// the dedicated detector task, never by a requester thread — §4.8,
    /// §9 "Deadlock detector as a separate task").
    pub fn run(&self, resources: &ResourceTable, entries: &BlockPool<Entry>) -> DeadlockStats {
        let mut stats = DeadlockStats::default();
        let mut nodes: HashMap<TransactionId, Node> = HashMap::new();

        resources.for_each_resource(|r| {
            stats.resources_scanned += 1;

            // Rule 1 + its symmetric case: holder/holder pairs, one blocked.
            for (hi_pos, &hi) in r.holders.iter().enumerate() {
                let Some((ti, hi_granted, hi_blocked, hi_wait)) =
                    entries.with(hi, |e| (e.tran_id, e.granted_mode, e.blocked_mode, e.wait.clone()))
                else {
                    continue;
                };
                if hi_blocked == Mode::Null {
                    continue;
                }
                ensure_node(&mut nodes, ti, &hi_wait);
                for (hj_pos, &hj) in r.holders.iter().enumerate() {
                    if hj_pos == hi_pos {
                        continue;
                    }
                    let Some((tj, hj_granted, hj_blocked)) =
                        entries.with(hj, |e| (e.tran_id, e.granted_mode, e.blocked_mode))
                    else {
                        continue;
                    };
                    if tj == ti {
                        continue;
                    }
                    if hj_blocked != Mode::Null
                        && (!compat(hj_blocked, hi_granted) || !compat(hj_blocked, hi_blocked))
                    {
                        record_edge(&mut nodes, self, tj, ti, true);
                    }
                    if hi_blocked != Mode::Null
                        && (!compat(hi_blocked, hj_granted) || !compat(hi_blocked, hj_blocked))
                    {
                        record_edge(&mut nodes, self, ti, tj, true);
                    }
                }
            }

            // Rule 2: holder/waiter pairs.
            for &w in &r.waiters {
                let Some((tw, w_blocked, w_wait)) =
                    entries.with(w, |e| (e.tran_id, e.blocked_mode, e.wait.clone()))
                else {
                    continue;
                };
                ensure_node(&mut nodes, tw, &w_wait);
                for &h in &r.holders {
                    let Some((th, h_granted, h_blocked)) =
                        entries.with(h, |e| (e.tran_id, e.granted_mode, e.blocked_mode))
                    else {
                        continue;
                    };
                    if th == tw {
                        continue;
                    }
                    if !compat(w_blocked, h_granted) || !compat(w_blocked, h_blocked) {
                        record_edge(&mut nodes, self, tw, th, false);
                    }
                }
            }

            // Rule 3: waiter/waiter FIFO edges (wi earlier than wj).
            for (idx_i, &wi) in r.waiters.iter().enumerate() {
                let Some((ti, wi_blocked)) = entries.with(wi, |e| (e.tran_id, e.blocked_mode)) else { continue };
                for &wj in r.waiters.iter().skip(idx_i + 1) {
                    let Some((tj, wj_blocked)) = entries.with(wj, |e| (e.tran_id, e.blocked_mode)) else { continue };
                    if ti == tj {
                        continue;
                    }
                    if !compat(wj_blocked, wi_blocked) {
                        record_edge(&mut nodes, self, tj, ti, false);
                    }
                }
            }
        });

        stats.edges_recorded = nodes.values().map(|n| n.edges.len()).sum();

        let cycles = find_cycles(&nodes);
        for cycle in cycles {
            if !is_true_cycle(&cycle, &nodes) {
                continue;
            }
            stats.cycles_found += 1;
            if let Some(victim) = select_victim(&cycle, &nodes) {
                wake_transaction(resources, entries, victim.tran_id, victim.timeout_only);
                if victim.timeout_only {
                    stats.victims_timed_out.push(victim.tran_id);
                } else {
                    stats.victims_aborted.push(victim.tran_id);
                }
            }
        }

        tracing::info!(
            resources = stats.resources_scanned,
            edges = stats.edges_recorded,
            cycles = stats.cycles_found,
            aborted = stats.victims_aborted.len(),
            timed_out = stats.victims_timed_out.len(),
            "deadlock detector pass complete"
        );

        stats
    }

    /// Cooperative cancellation (§4.7 "Cancellation"): wake every
    /// currently-suspended thread of `tran` with `Interrupted`. A thread not
    /// currently suspended picks up the interrupted flag on its transaction
    /// table at its next wait point instead (checked at the top of
    /// [`super::lock_manager::LockManager::request`]).
    pub fn interrupt_transaction(&self, resources: &ResourceTable, entries: &BlockPool<Entry>, tran: TransactionId) {
        resources.for_each_resource(|r| {
            for &idx in r.holders.iter().chain(r.waiters.iter()) {
                let slot: Option<(TransactionId, Option<std::sync::Arc<super::lock_wait::WaitSlot>>)> =
                    entries.with(idx, |e: &Entry| (e.tran_id, e.wait.clone()));
                if let Some((t, Some(wait))) = slot {
                    if t == tran && !wait.is_resumed() {
                        wait.resume(ResumeStatus::Interrupted);
                    }
                }
            }
        });
    }

    /// Shutdown hook (§6 `force_timeout_lock_wait_transactions`): resume
    /// every currently-suspended waiter across the whole table with a
    /// timeout outcome so the process can make forward progress during
    /// shutdown.
    pub fn force_timeout_all(&self, resources: &ResourceTable, entries: &BlockPool<Entry>) -> usize {
        let mut n = 0;
        resources.for_each_resource(|r| {
            for &idx in r.holders.iter().chain(r.waiters.iter()) {
                if let Some(Some(wait)) = entries.with(idx, |e: &Entry| e.wait.clone()) {
                    if !wait.is_resumed() {
                        wait.resume(ResumeStatus::ResumedTimeout);
                        n += 1;
                    }
                }
            }
        });
        n
    }
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_node(
    nodes: &mut HashMap<TransactionId, Node>,
    tran: TransactionId,
    wait: &Option<std::sync::Arc<super::lock_wait::WaitSlot>>,
) {
    let started_at = wait.as_ref().map(|w| w.registered_at).unwrap_or_else(Instant::now);
    let node = nodes.entry(tran).or_insert_with(|| Node {
        edges: Vec::new(),
        wait_started_at: started_at,
        timeoutable: false,
        is_holder_somewhere: false,
    });
    if wait.is_some() {
        node.timeoutable = true;
    }
}

fn record_edge(nodes: &mut HashMap<TransactionId, Node>, wfg: &WaitForGraph, from: TransactionId, to: TransactionId, from_is_holder: bool) {
    let seq = wfg.next_seq();
    let node = nodes.entry(from).or_insert_with(|| Node {
        edges: Vec::new(),
        wait_started_at: Instant::now(),
        timeoutable: false,
        is_holder_somewhere: from_is_holder,
    });
    node.is_holder_somewhere |= from_is_holder;
    node.edges.push(Edge { to, seq, recorded_at: Instant::now() });
}

/// DFS over `nodes`' adjacency, returning every simple cycle discovered via
/// a back-edge (§4.8: "run a DFS... on discovering a back-edge, harvest the
/// cycle between s and t").
fn find_cycles(nodes: &HashMap<TransactionId, Node>) -> Vec<Vec<TransactionId>> {
    let mut cycles = Vec::new();
    let mut visited: HashSet<TransactionId> = HashSet::new();
    let mut stack: Vec<TransactionId> = Vec::new();
    let mut on_stack: HashSet<TransactionId> = HashSet::new();

    let keys: Vec<TransactionId> = nodes.keys().copied().collect();
    for start in keys {
        if visited.contains(&start) {
            continue;
        }
        dfs(start, nodes, &mut visited, &mut stack, &mut on_stack, &mut cycles);
    }
    cycles
}

fn dfs(
    t: TransactionId,
    nodes: &HashMap<TransactionId, Node>,
    visited: &mut HashSet<TransactionId>,
    stack: &mut Vec<TransactionId>,
    on_stack: &mut HashSet<TransactionId>,
    cycles: &mut Vec<Vec<TransactionId>>,
) {
    visited.insert(t);
    stack.push(t);
    on_stack.insert(t);

    if let Some(node) = nodes.get(&t) {
        for edge in &node.edges {
            if on_stack.contains(&edge.to) {
                let start = stack.iter().position(|x| *x == edge.to).unwrap();
                cycles.push(stack[start..].to_vec());
            } else if !visited.contains(&edge.to) {
                dfs(edge.to, nodes, visited, stack, on_stack, cycles);
            }
        }
    }

    stack.pop();
    on_stack.remove(&t);
}

/// §4.8's false-cycle filter: discard a cycle if any node on it started its
/// current wait episode after the edge into it was recorded (meaning the
/// edge describes a wait that has since ended or restarted).
fn is_true_cycle(cycle: &[TransactionId], nodes: &HashMap<TransactionId, Node>) -> bool {
    for &t in cycle {
        let Some(node) = nodes.get(&t) else { return false };
        for edge in &node.edges {
            if cycle.contains(&edge.to) && node.wait_started_at > edge.recorded_at {
                return false;
            }
        }
    }
    true
}

struct Victim {
    tran_id: TransactionId,
    timeout_only: bool,
}

/// §4.8 victim selection: prefer (1) a holder on the incoming edge, (2)
/// active [approximated here as "still in the graph", since the
/// transaction table's activity flag is an out-of-scope collaborator], (3)
/// the most permissive timeout (finite budget over infinite), (4) the
/// youngest (highest transaction id).
fn select_victim(cycle: &[TransactionId], nodes: &HashMap<TransactionId, Node>) -> Option<Victim> {
    let mut best: Option<(TransactionId, &Node)> = None;
    for t in cycle {
        let node = nodes.get(t)?;
        best = Some(match best {
            None => (*t, node),
            Some((bt, bn)) => {
                let better = match (node.is_holder_somewhere, bn.is_holder_somewhere) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => match (node.timeoutable, bn.timeoutable) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => *t > bt,
                    },
                };
                if better { (*t, node) } else { (bt, bn) }
            }
        });
    }
    best.map(|(t, n)| Victim { tran_id: t, timeout_only: n.timeoutable })
}

/// Resume the first still-suspended thread of `tran` with the primary
/// status; any remaining threads of the same transaction get the sibling
/// status. Matches §4.8's "Wakeup" and §4.7's resume-status table.
fn wake_transaction(resources: &ResourceTable, entries: &BlockPool<Entry>, tran: TransactionId, timeout_only: bool) {
    let mut woke_primary = false;
    resources.for_each_resource(|r| {
        for &idx in r.holders.iter().chain(r.waiters.iter()) {
            let slot: Option<(TransactionId, Option<std::sync::Arc<super::lock_wait::WaitSlot>>)> = entries
                .with(idx, |e: &Entry| (e.tran_id, e.wait.clone()));
            let Some((t, wait)) = slot else { continue };
            if t != tran {
                continue;
            }
            if let Some(w) = wait {
                if w.is_resumed() {
                    continue;
                }
                if timeout_only {
                    w.resume(ResumeStatus::ResumedDeadlockTimeout);
                } else if !woke_primary {
                    w.resume(ResumeStatus::AbortedFirst);
                    woke_primary = true;
                } else {
                    w.resume(ResumeStatus::AbortedOther);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::lock_config::LockManagerConfig;
    use crate::transaction::lock_manager::{LockManager, Outcome};
    use crate::transaction::lock_oid::Oid;
    use crate::transaction::lock_wait::WaitBudget;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn empty_table_has_no_cycles() {
        let lm = LockManager::new(LockManagerConfig::default());
        let stats = lm.detect_local_deadlock();
        assert_eq!(stats.cycles_found, 0);
    }

    #[test]
    fn two_transaction_cycle_produces_one_victim() {
        let lm = Arc::new(LockManager::new(LockManagerConfig::default()));
        let o1 = Oid::new(0, 1, 1);
        let o2 = Oid::new(0, 1, 2);

        assert_eq!(
            lm.lock(1, o1, None, Mode::X, WaitBudget::Infinite, Default::default(), false).unwrap(),
            Outcome::Granted
        );
        assert_eq!(
            lm.lock(2, o2, None, Mode::X, WaitBudget::Infinite, Default::default(), false).unwrap(),
            Outcome::Granted
        );

        let lm2 = Arc::clone(&lm);
        let h1 = thread::spawn(move || lm2.lock(1, o2, None, Mode::X, WaitBudget::Infinite, Default::default(), false));
        thread::sleep(Duration::from_millis(30));
        let lm3 = Arc::clone(&lm);
        let h2 = thread::spawn(move || lm3.lock(2, o1, None, Mode::X, WaitBudget::Infinite, Default::default(), false));
        thread::sleep(Duration::from_millis(30));

        let mut total_aborted = 0;
        for _ in 0..50 {
            let stats = lm.detect_local_deadlock();
            total_aborted += stats.victims_aborted.len();
            if total_aborted > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(total_aborted, 1);

        let r1 = h1.join().unwrap();
        let r2 = h2.join().unwrap();
        let aborted = [&r1, &r2].iter().filter(|r| matches!(r, Ok(Outcome::NotGrantedAborted))).count();
        let granted = [&r1, &r2].iter().filter(|r| matches!(r, Ok(Outcome::Granted))).count();
        assert_eq!(aborted, 1);
        assert_eq!(granted, 1);
    }
}
