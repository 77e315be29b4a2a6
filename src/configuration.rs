//! Mutable parser state (C2): stack, input buffer, pass buffer and the
//! partial graph under construction, plus the incremental valency
//! counters and left/right child/head lookups the feature extractor
//! needs. A compact owned record, per the design note "configuration as
//! value-with-methods" — children and heads are kept as small per-token
//! arrays for O(1) leftmost/rightmost queries rather than walking the
//! graph.

use crate::graph::DependencyGraph;
use smallvec::SmallVec;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Configuration {
    stack: Vec<u32>,
    buffer: VecDeque<u32>,
    pass: VecDeque<u32>,
    graph: DependencyGraph,
    left_children: Vec<SmallVec<[u32; 2]>>,
    right_children: Vec<SmallVec<[u32; 2]>>,
    left_heads: Vec<SmallVec<[u32; 2]>>,
    right_heads: Vec<SmallVec<[u32; 2]>>,
}

impl Configuration {
    pub fn new(n: usize) -> Self {
        Configuration {
            stack: vec![0],
            buffer: (1..=n as u32).collect(),
            pass: VecDeque::new(),
            graph: DependencyGraph::new(n),
            left_children: vec![SmallVec::new(); n + 1],
            right_children: vec![SmallVec::new(); n + 1],
            left_heads: vec![SmallVec::new(); n + 1],
            right_heads: vec![SmallVec::new(); n + 1],
        }
    }

    /// A throwaway configuration sharing this one's graph/child/head
    /// state but with the stack and buffer reset to a single candidate
    /// pair `(a, b)`. Used by headless repair to score a prospective
    /// directional label without mutating the live configuration
    /// (SPEC_FULL §4.2, grounded on `get_best_label`'s reseeding).
    pub fn probe(&self, a: u32, b: u32) -> Configuration {
        let mut c = self.clone();
        c.stack = vec![a];
        c.buffer = VecDeque::from(vec![b]);
        c.pass = VecDeque::new();
        c
    }

    pub fn num_tokens(&self) -> usize {
        self.graph.num_tokens()
    }

    // --- positional access, out-of-range -> None (the caller maps this
    // to the dictionary's NIL global id) ---

    pub fn stack_get(&self, i: usize) -> Option<u32> {
        let len = self.stack.len();
        if i >= len {
            None
        } else {
            Some(self.stack[len - 1 - i])
        }
    }

    pub fn buffer_get(&self, i: usize) -> Option<u32> {
        self.buffer.get(i).copied()
    }

    pub fn pass_get(&self, i: usize) -> Option<u32> {
        self.pass.get(i).copied()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pass_is_empty(&self) -> bool {
        self.pass.is_empty()
    }

    pub fn pass_len(&self) -> usize {
        self.pass.len()
    }

    // --- stack/buffer/pass mutation, shared by both transition systems ---

    pub fn push_stack(&mut self, token: u32) {
        self.stack.push(token);
    }

    pub fn pop_stack(&mut self) -> Option<u32> {
        self.stack.pop()
    }

    pub fn shift(&mut self) -> Option<u32> {
        let token = self.buffer.pop_front()?;
        self.stack.push(token);
        Some(token)
    }

    /// List-system `Pass`: moves the top of the stack to the front of the
    /// pass buffer.
    pub fn pass_top(&mut self) -> Option<u32> {
        let token = self.stack.pop()?;
        self.pass.push_front(token);
        Some(token)
    }

    /// List-system `Shift`: empties the pass buffer back onto the stack
    /// (in reverse, so the nearest-to-top is first pushed) and advances
    /// past the buffer front, if any. When the buffer is already
    /// exhausted but the pass buffer still holds tokens with no further
    /// arc to form, this still drains the pass buffer onto the stack so
    /// those tokens can reach `NoArc` and the configuration can progress
    /// to its terminal state.
    pub fn unload_pass_and_shift(&mut self) -> Option<u32> {
        let token = self.buffer.pop_front();
        while let Some(t) = self.pass.pop_back() {
            self.stack.push(t);
        }
        if let Some(tok) = token {
            self.stack.push(tok);
        }
        token
    }

    // --- graph mutation ---

    pub fn add_arc(&mut self, head: u32, child: u32, label: u32) -> bool {
        if !self.graph.add_arc(head, child, label) {
            return false;
        }
        if child < head {
            self.left_children[head as usize].push(child);
            self.left_children[head as usize].sort_unstable();
            self.left_heads[child as usize].push(head);
            self.left_heads[child as usize].sort_unstable();
        } else {
            self.right_children[head as usize].push(child);
            self.right_children[head as usize].sort_unstable();
            self.right_heads[child as usize].push(head);
            self.right_heads[child as usize].sort_unstable();
        }
        true
    }

    pub fn has_head(&self, child: u32) -> bool {
        self.graph.has_head(child)
    }

    pub fn has_path_to(&self, a: u32, b: u32) -> bool {
        self.graph.has_path_to(a, b)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn into_graph(self) -> DependencyGraph {
        self.graph
    }

    // --- leftmost/rightmost child & head lookups (§4.2) ---

    pub fn left_child(&self, k: u32) -> Option<u32> {
        self.left_children[k as usize].first().copied()
    }

    pub fn right_child(&self, k: u32) -> Option<u32> {
        self.right_children[k as usize].last().copied()
    }

    /// Leftmost head positioned left of `k`, mirroring the child
    /// definition (there may be more than one with multi-head output).
    pub fn left_head(&self, k: u32) -> Option<u32> {
        self.left_heads[k as usize].first().copied()
    }

    /// Rightmost head positioned right of `k`.
    pub fn right_head(&self, k: u32) -> Option<u32> {
        self.right_heads[k as usize].last().copied()
    }

    pub fn arc_label_to(&self, child: u32, head: u32) -> Option<u32> {
        self.graph
            .heads_of(child)
            .iter()
            .find(|&&(h, _)| h == head)
            .map(|&(_, label)| label)
    }

    // --- valency (§4.2/§4.3) ---

    pub fn lvalency(&self, k: u32) -> i64 {
        self.left_children[k as usize].len() as i64
    }
    pub fn rvalency(&self, k: u32) -> i64 {
        self.right_children[k as usize].len() as i64
    }
    pub fn lhvalency(&self, k: u32) -> i64 {
        self.left_heads[k as usize].len() as i64
    }
    pub fn rhvalency(&self, k: u32) -> i64 {
        self.right_heads[k as usize].len() as i64
    }

    /// Distance between stack-top and buffer-front, `0` if either side is
    /// empty.
    pub fn distance(&self) -> i64 {
        match (self.stack.last(), self.buffer.front()) {
            (Some(&s), Some(&b)) => (b as i64 - s as i64).abs(),
            _ => 0,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_configuration_shape() {
        let c = Configuration::new(3);
        assert_eq!(c.stack_get(0), Some(0));
        assert_eq!(c.buffer_get(0), Some(1));
        assert!(c.pass_is_empty());
    }

    #[test]
    fn shift_moves_buffer_front_to_stack_top() {
        let mut c = Configuration::new(2);
        assert_eq!(c.shift(), Some(1));
        assert_eq!(c.stack_get(0), Some(1));
        assert_eq!(c.stack_get(1), Some(0));
        assert_eq!(c.buffer_get(0), Some(2));
    }

    #[test]
    fn add_arc_updates_left_right_children() {
        let mut c = Configuration::new(2);
        c.shift();
        c.shift();
        assert!(c.add_arc(2, 1, 0));
        assert_eq!(c.left_child(2), Some(1));
        assert_eq!(c.lvalency(2), 1);
        assert_eq!(c.lhvalency(1), 1);
    }

    #[test]
    fn out_of_range_positions_are_none() {
        let c = Configuration::new(1);
        assert_eq!(c.stack_get(5), None);
        assert_eq!(c.buffer_get(5), None);
        assert_eq!(c.pass_get(0), None);
    }

    #[test]
    fn probe_resets_stack_and_buffer_only() {
        let mut c = Configuration::new(3);
        c.shift();
        c.add_arc(1, 0, 0); // unrelated state that should carry over
        let p = c.probe(2, 3);
        assert_eq!(p.stack_get(0), Some(2));
        assert_eq!(p.buffer_get(0), Some(3));
        assert!(p.pass_is_empty());
    }
}
