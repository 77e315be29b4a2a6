//! List-based system (§4.1): tokens can revisit the top of the stack via
//! the pass buffer, so `LeftArc`/`RightArc` may add more than one head per
//! child — this is the system that actually achieves multi-head,
//! non-projective output (arc-eager's oracle only ever assigns one
//! primary head, see `arc_eager.rs`).

use super::{gold_arc_label, Action, ParsingSystem};
use crate::configuration::Configuration;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, Default)]
pub struct ListSystem;

impl ParsingSystem for ListSystem {
    fn transitions(&self, num_labels: u32) -> Vec<Action> {
        let mut actions = vec![Action::Shift, Action::Pass, Action::NoArc];
        for l in 0..num_labels {
            actions.push(Action::LeftArc(l));
            actions.push(Action::RightArc(l));
        }
        actions
    }

    fn is_terminal(&self, c: &Configuration) -> bool {
        c.buffer_is_empty() && c.pass_is_empty()
    }

    fn can_apply(&self, c: &Configuration, action: &Action) -> bool {
        match *action {
            Action::Shift => {
                !c.buffer_is_empty() || (c.stack_len() == 0 && c.pass_len() > 0)
            }
            Action::Pass => c.stack_len() > 0,
            Action::NoArc => c.stack_len() > 0,
            Action::LeftArc(_) => match (c.stack_get(0), c.buffer_get(0)) {
                (Some(s), Some(b)) => s != 0 && !c.graph().has_path_to(b, s),
                _ => false,
            },
            Action::RightArc(_) => match (c.stack_get(0), c.buffer_get(0)) {
                (Some(s), Some(b)) => !c.graph().has_path_to(s, b),
                _ => false,
            },
            Action::Reduce | Action::NoShift => false,
        }
    }

    fn apply(&self, c: &mut Configuration, action: &Action) {
        match *action {
            Action::Shift => {
                c.unload_pass_and_shift();
            }
            Action::Pass => {
                c.pass_top();
            }
            Action::NoArc => {
                c.pass_top();
            }
            Action::LeftArc(label) => {
                let s = c.stack_get(0).expect("LeftArc requires stack top");
                let b = c.buffer_get(0).expect("LeftArc requires buffer front");
                c.add_arc(b, s, label);
                c.pass_top();
            }
            Action::RightArc(label) => {
                let s = c.stack_get(0).expect("RightArc requires stack top");
                let b = c.buffer_get(0).expect("RightArc requires buffer front");
                c.add_arc(s, b, label);
                c.pass_top();
            }
            Action::Reduce | Action::NoShift => {}
        }
    }

    fn get_oracle(&self, c: &Configuration, gold: &DependencyGraph) -> Option<Action> {
        let s = c.stack_get(0);
        let b = c.buffer_get(0);

        if let (Some(s), Some(b)) = (s, b) {
            if s != 0 {
                if let Some(label) = gold_arc_label(gold, s, b) {
                    if !already_has_arc(c, b, s) && !c.graph().has_path_to(b, s) {
                        return Some(Action::LeftArc(label));
                    }
                }
            }
            if let Some(label) = gold_arc_label(gold, b, s) {
                if !already_has_arc(c, s, b) && !c.graph().has_path_to(s, b) {
                    return Some(Action::RightArc(label));
                }
            }
        }

        if let Some(s) = s {
            if remaining_gold_arc_possible(c, gold, s) {
                return Some(Action::Pass);
            }
            return Some(Action::NoArc);
        }

        // Stack empty: either drain the pass buffer back onto the stack,
        // or pull in the next buffer token, to keep making progress.
        if !c.pass_is_empty() || b.is_some() {
            return Some(Action::Shift);
        }

        None
    }
}

fn already_has_arc(c: &Configuration, head: u32, child: u32) -> bool {
    c.graph()
        .heads_of(child)
        .iter()
        .any(|&(h, _)| h == head)
}

/// Whether `s` still has a gold arc, in either direction, with some token
/// not yet processed — the buffer (beyond the current front, which was
/// already checked) or the pass buffer, both of which `s` can still reach
/// after a future `Shift` brings it back onto the stack. Checks each
/// direction against the matching existing-arc query, not a mismatched
/// combination, so an already-satisfied arc never looks "pending".
fn remaining_gold_arc_possible(c: &Configuration, gold: &DependencyGraph, s: u32) -> bool {
    let pending_with = |tok: u32| -> bool {
        if gold_arc_label(gold, s, tok).is_some() && !already_has_arc(c, tok, s) {
            return true;
        }
        if gold_arc_label(gold, tok, s).is_some() && !already_has_arc(c, s, tok) {
            return true;
        }
        false
    };

    let mut i = 1;
    while let Some(tok) = c.buffer_get(i) {
        if pending_with(tok) {
            return true;
        }
        i += 1;
    }
    let mut j = 0;
    while let Some(tok) = c.pass_get(j) {
        if pending_with(tok) {
            return true;
        }
        j += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1 on the list system: same single-head gold graph must still be
    /// reachable.
    #[test]
    fn oracle_reaches_simple_gold_graph() {
        let mut gold = DependencyGraph::new(3);
        assert!(gold.add_arc(2, 1, 0));
        assert!(gold.add_arc(3, 2, 1));
        assert!(gold.add_arc(0, 3, 2));

        let sys = ListSystem;
        assert!(sys.can_process(3, &gold));
    }

    /// S2: the list system (unlike basic arc-eager) can realize a
    /// secondary arc via repeated stack-top revisits through the pass
    /// buffer. Replays the oracle by hand, rather than only calling
    /// `can_process`, so the multi-head arc actually lands on `graph()`
    /// and can be inspected directly.
    #[test]
    fn multi_head_graph_is_reachable() {
        let mut gold = DependencyGraph::new(3);
        assert!(gold.add_arc(2, 1, 0));
        assert!(gold.add_arc(3, 2, 1));
        assert!(gold.add_arc(0, 3, 2));
        // Secondary head: token 1 also headed by 3, acyclic for the same
        // reason as arc_eager's unreachable fixture — 3 sits above 1 via
        // 3 -> 2 -> 1 already.
        assert!(gold.add_arc(3, 1, 3));

        let sys = ListSystem;
        assert!(sys.can_process(3, &gold));

        let mut c = Configuration::new(3);
        while !sys.is_terminal(&c) {
            let action = sys
                .get_oracle(&c, &gold)
                .expect("oracle must not stall on a reachable gold graph");
            assert!(sys.can_apply(&c, &action));
            sys.apply(&mut c, &action);
        }

        assert_eq!(c.graph().heads_of(1).len(), 2);
        assert!(c.graph().heads_of(1).iter().any(|&(h, _)| h == 2));
        assert!(c.graph().heads_of(1).iter().any(|&(h, _)| h == 3));
    }
}
