// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Claim gates.
//!
//! Every suspension is guarded by a chain of gates from the suspension
//! itself up to the continuation that created it. A channel may only hand a
//! value to a waiter (or accept one from it) after claiming the waiter's
//! whole chain, and a rendezvous claims both parties' chains atomically.
//! This is what lets Select abandon its losing branches and lets
//! cancellation retire pending waiters without ever dropping a value that a
//! sender believes was delivered.
//!
//! Gate kinds:
//! - `Once`: claimable exactly once (the suspension's own gate)
//! - `Exclusive`: the first branch to claim wins, later claims from the
//!   same branch still succeed (a Select group)
//! - `Shared`: any claim succeeds until the gate is closed (a Collect
//!   group, a whole continuation)
//!
//! Gate state is monotonic: a claim that fails once fails forever.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateKind {
    Once,
    Exclusive,
    Shared,
}

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    winner: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct Gate {
    kind: GateKind,
    state: Mutex<GateState>,
}

impl Gate {
    pub fn new(kind: GateKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(GateState::default()),
        })
    }

    /// Make every future claim through this gate fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn addr(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

/// One link of a claim chain: a gate, the branch this path enters it
/// through, and the enclosing link.
#[derive(Debug)]
pub(crate) struct GateNode {
    gate: Arc<Gate>,
    branch: usize,
    parent: Option<Arc<GateNode>>,
}

impl GateNode {
    /// Top of a chain, e.g. a continuation.
    pub fn root(kind: GateKind) -> Arc<Self> {
        Arc::new(Self {
            gate: Gate::new(kind),
            branch: 0,
            parent: None,
        })
    }

    /// Enter `gate` through `branch` below this node.
    pub fn child(self: &Arc<Self>, gate: &Arc<Gate>, branch: usize) -> Arc<Self> {
        Arc::new(Self {
            gate: gate.clone(),
            branch,
            parent: Some(self.clone()),
        })
    }

    /// A fresh `Once` gate, optionally below `parent`.
    pub fn once(parent: Option<Arc<GateNode>>) -> Self {
        Self {
            gate: Gate::new(GateKind::Once),
            branch: 0,
            parent,
        }
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// Claim only this node's own gate, ignoring the chain above it. Used
    /// to force a terminal result (cancellation, timeout) onto a waiter.
    pub fn claim_local(&self) -> bool {
        let mut state = self.gate.state.lock();
        if !admits(self.gate.kind, &state, self.branch) {
            return false;
        }
        commit(self.gate.kind, &mut state, self.branch);
        true
    }
}

fn admits(kind: GateKind, state: &GateState, branch: usize) -> bool {
    if state.closed {
        return false;
    }
    match kind {
        GateKind::Exclusive => state.winner.map_or(true, |w| w == branch),
        GateKind::Once | GateKind::Shared => true,
    }
}

fn commit(kind: GateKind, state: &mut GateState, branch: usize) {
    match kind {
        GateKind::Once => state.closed = true,
        GateKind::Exclusive => state.winner = Some(branch),
        GateKind::Shared => {}
    }
}

/// Claim every chain in `nodes` as one atomic step. Either all links are
/// committed or none are.
///
/// Locks are taken in gate address order, so concurrent claims over
/// overlapping chains cannot deadlock.
pub(crate) fn claim_all(nodes: &[&GateNode]) -> bool {
    with_locked(nodes, true)
}

/// Would `claim_all(nodes)` succeed right now? Does not commit.
pub(crate) fn claimable(nodes: &[&GateNode]) -> bool {
    with_locked(nodes, false)
}

fn with_locked(nodes: &[&GateNode], commit_links: bool) -> bool {
    let mut links: Vec<(&Arc<Gate>, usize)> = Vec::new();
    for node in nodes {
        let mut cursor = Some(*node);
        while let Some(n) = cursor {
            links.push((&n.gate, n.branch));
            cursor = n.parent.as_deref();
        }
    }

    let mut gates: Vec<&Arc<Gate>> = links.iter().map(|(g, _)| *g).collect();
    gates.sort_by_key(|g| g.addr());
    gates.dedup_by_key(|g| g.addr());
    let mut guards: Vec<MutexGuard<'_, GateState>> = gates.iter().map(|g| g.state.lock()).collect();

    // Branch each gate is entered through by this claim. Two links through
    // the same Once gate, or through one Exclusive gate via different
    // branches, can never both hold.
    let mut entered: Vec<Option<usize>> = vec![None; gates.len()];
    for (gate, branch) in &links {
        let idx = match gates.binary_search_by_key(&gate.addr(), |g| g.addr()) {
            Ok(idx) => idx,
            Err(_) => return false,
        };
        if !admits(gate.kind, &guards[idx], *branch) {
            return false;
        }
        match (gate.kind, entered[idx]) {
            (GateKind::Once, Some(_)) => return false,
            (GateKind::Exclusive, Some(prev)) if prev != *branch => return false,
            _ => entered[idx] = Some(*branch),
        }
    }

    if commit_links {
        for (idx, gate) in gates.iter().enumerate() {
            if let Some(branch) = entered[idx] {
                commit(gate.kind, &mut guards[idx], branch);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_gate_claims_once() {
        let node = GateNode::once(None);
        assert!(claimable(&[&node]));
        assert!(claim_all(&[&node]));
        assert!(!claimable(&[&node]));
        assert!(!claim_all(&[&node]));
        assert!(!node.claim_local());
    }

    #[test]
    fn exclusive_gate_admits_only_the_winner() {
        let root = GateNode::root(GateKind::Shared);
        let group = Gate::new(GateKind::Exclusive);
        let a = GateNode::once(Some(root.child(&group, 0)));
        let a_again = GateNode::once(Some(root.child(&group, 0)));
        let b = GateNode::once(Some(root.child(&group, 1)));

        assert!(claim_all(&[&a]));
        assert!(!claim_all(&[&b]));
        // Same branch may claim again through a new suspension.
        assert!(claim_all(&[&a_again]));
    }

    #[test]
    fn closed_root_blocks_the_whole_chain() {
        let root = GateNode::root(GateKind::Shared);
        let group = Gate::new(GateKind::Shared);
        let waiter = GateNode::once(Some(root.child(&group, 3)));
        root.gate().close();
        assert!(!claimable(&[&waiter]));
        assert!(!claim_all(&[&waiter]));
        // Forcing ignores the chain above.
        assert!(waiter.claim_local());
    }

    #[test]
    fn pair_claim_is_atomic() {
        let sender = GateNode::once(None);
        let receiver = GateNode::once(None);
        receiver.gate().close();
        assert!(!claim_all(&[&receiver, &sender]));
        // The failed pair did not consume the sender.
        assert!(claim_all(&[&sender]));
    }

    #[test]
    fn opposing_select_branches_cannot_pair() {
        let root = GateNode::root(GateKind::Shared);
        let group = Gate::new(GateKind::Exclusive);
        let send = GateNode::once(Some(root.child(&group, 0)));
        let recv = GateNode::once(Some(root.child(&group, 1)));
        assert!(claimable(&[&send]));
        assert!(claimable(&[&recv]));
        assert!(!claim_all(&[&send, &recv]));
    }
}
