//! Multi-head dependency graph (C1). Adapted from the teacher's preference
//! for compact per-item structures (`types.rs`'s `StatesToTokenMaps`
//! comment: split into per-state maps rather than one giant table) into a
//! per-child small vector of heads instead of a single adjacency matrix.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// (head index, label id) pair. Label is an index into the label
/// dictionary rather than a `String` to keep the graph allocation-free in
/// the common single-head case.
pub type HeadArc = (u32, u32);

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// `heads[child]` holds every (head, label) pair recorded for that
    /// child. Index 0 is unused (ROOT has no head of its own).
    heads: Vec<SmallVec<[HeadArc; 2]>>,
}

impl DependencyGraph {
    /// `n` is the number of real tokens; internal storage is `n + 1` long
    /// so child indices can be used directly.
    pub fn new(n: usize) -> Self {
        DependencyGraph {
            heads: vec![SmallVec::new(); n + 1],
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.heads.len().saturating_sub(1)
    }

    /// Refuses self-loops and cycles, per §4.2's `add_arc` invariant.
    pub fn add_arc(&mut self, head: u32, child: u32, label: u32) -> bool {
        if head == child {
            return false;
        }
        // Reject when `child` is already an ancestor of `head` (walking
        // upward from `head` already reaches `child`): adding head->child
        // would then close a cycle.
        if self.has_path_to(head, child) {
            return false;
        }
        self.heads[child as usize].push((head, label));
        true
    }

    pub fn has_head(&self, child: u32) -> bool {
        !self.heads[child as usize].is_empty()
    }

    pub fn heads_of(&self, child: u32) -> &[HeadArc] {
        &self.heads[child as usize]
    }

    pub fn first_head(&self, child: u32) -> Option<HeadArc> {
        self.heads[child as usize].first().copied()
    }

    /// Depth-first reachability over the head edges: true when a directed
    /// path `a -> ... -> b` exists (i.e. `b` is an ancestor reachable by
    /// walking heads from `a`). Used for cycle detection before `add_arc`
    /// commits a new edge `b -> a`.
    pub fn has_path_to(&self, a: u32, b: u32) -> bool {
        if a == b {
            return true;
        }
        let mut seen: FxHashSet<u32> = FxHashSet::default();
        let mut stack = vec![a];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for &(head, _) in self.heads_of(node) {
                if head == b {
                    return true;
                }
                stack.push(head);
            }
        }
        false
    }

    /// Every real token (1..=n) has at least one head — invariant 1 from
    /// the testable properties.
    pub fn is_complete(&self) -> bool {
        (1..self.heads.len()).all(|i| self.has_head(i as u32))
    }

    pub fn headless_tokens(&self) -> Vec<u32> {
        (1..self.heads.len() as u32)
            .filter(|&i| !self.has_head(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_arc_rejects_self_loop() {
        let mut g = DependencyGraph::new(2);
        assert!(!g.add_arc(1, 1, 0));
    }

    #[test]
    fn add_arc_rejects_cycle() {
        let mut g = DependencyGraph::new(3);
        assert!(g.add_arc(1, 2, 0));
        assert!(g.add_arc(2, 3, 0));
        assert!(!g.add_arc(3, 1, 0));
    }

    #[test]
    fn multi_head_child_keeps_both_arcs() {
        let mut g = DependencyGraph::new(3);
        assert!(g.add_arc(1, 3, 0));
        assert!(g.add_arc(2, 3, 1));
        assert_eq!(g.heads_of(3).len(), 2);
    }

    #[test]
    fn completeness_and_headless_tokens() {
        let mut g = DependencyGraph::new(2);
        assert!(!g.is_complete());
        assert_eq!(g.headless_tokens(), vec![1, 2]);
        g.add_arc(0, 1, 0);
        g.add_arc(1, 2, 0);
        assert!(g.is_complete());
        assert!(g.headless_tokens().is_empty());
    }
}
