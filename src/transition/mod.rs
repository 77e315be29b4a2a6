//! Transition systems (C3): action alphabet, applicability, apply, oracle,
//! terminal test and evaluation, modeled as a capability set per the
//! design note "polymorphism over transition systems" — a small enum of
//! variants rather than a dynamic trait-object hierarchy, since no shared
//! mutable state is required across systems.

pub mod arc_eager;
pub mod list_system;

use crate::configuration::Configuration;
use crate::graph::DependencyGraph;

pub use arc_eager::ArcEagerSystem;
pub use list_system::ListSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Shift,
    Reduce,
    LeftArc(u32),
    RightArc(u32),
    NoShift,
    Pass,
    NoArc,
}

/// The canonical-action function diverged for this configuration (the
/// `-E-` sentinel from §4.1): the sample is discarded and a divergence
/// counter incremented, never treated as a fatal error (§7).
pub const ORACLE_DIVERGED: Option<Action> = None;

pub trait ParsingSystem {
    /// Every action in this system's alphabet for a label set of size
    /// `num_labels`.
    fn transitions(&self, num_labels: u32) -> Vec<Action>;

    fn is_terminal(&self, c: &Configuration) -> bool;

    fn can_apply(&self, c: &Configuration, action: &Action) -> bool;

    /// Applies `action`, assuming `can_apply` already returned true.
    fn apply(&self, c: &mut Configuration, action: &Action);

    /// Returns the canonical action, or `ORACLE_DIVERGED` if the
    /// configuration has already diverged from `gold`.
    fn get_oracle(&self, c: &Configuration, gold: &DependencyGraph) -> Option<Action>;

    /// Whether `gold` is reachable from the initial configuration under
    /// this system's semantics. Implemented (per §9 Open Question 3) by
    /// deterministically replaying the oracle to a terminal state and
    /// comparing the resulting graph to `gold` arc-for-arc — this doubles
    /// as the constructive witness for testable property 4 (round-trip)
    /// whenever it returns true.
    fn can_process(&self, num_tokens: usize, gold: &DependencyGraph) -> bool {
        let mut c = Configuration::new(num_tokens);
        // A well-behaved oracle reaches a terminal configuration in O(n)
        // steps; this bound is only a backstop against a malformed or
        // genuinely unreachable gold graph driving the list-system's
        // pass/shift cycle forever.
        let step_budget = 64 * (num_tokens + 1) * (num_tokens + 1);
        for _ in 0..step_budget {
            if self.is_terminal(&c) {
                return graphs_equal(c.graph(), gold);
            }
            match self.get_oracle(&c, gold) {
                Some(action) => {
                    if !self.can_apply(&c, &action) {
                        return false;
                    }
                    self.apply(&mut c, &action);
                }
                None => return false,
            }
        }
        false
    }
}

fn graphs_equal(a: &DependencyGraph, b: &DependencyGraph) -> bool {
    if a.num_tokens() != b.num_tokens() {
        return false;
    }
    for child in 1..=a.num_tokens() as u32 {
        let mut ha: Vec<_> = a.heads_of(child).to_vec();
        let mut hb: Vec<_> = b.heads_of(child).to_vec();
        ha.sort_unstable();
        hb.sort_unstable();
        if ha != hb {
            return false;
        }
    }
    true
}

/// Looks up the label on the gold arc `head -> child`, if one exists.
pub(crate) fn gold_arc_label(gold: &DependencyGraph, child: u32, head: u32) -> Option<u32> {
    gold.heads_of(child)
        .iter()
        .find(|&&(h, _)| h == head)
        .map(|&(_, l)| l)
}

/// Evaluation against a gold set: unlabeled-F, labeled-F, non-local-arc F
/// (secondary incoming arcs to an already-headed token) and ROOT
/// accuracy, by arc-set comparison (§4.1 "Evaluate").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalScores {
    pub unlabeled_f: f64,
    pub labeled_f: f64,
    pub non_local_f: f64,
    pub root_accuracy: f64,
}

pub fn evaluate(predicted: &[DependencyGraph], gold: &[DependencyGraph]) -> EvalScores {
    assert_eq!(predicted.len(), gold.len());

    let (mut unlabeled_correct, mut labeled_correct, mut total_pred, mut total_gold) =
        (0usize, 0usize, 0usize, 0usize);
    let (mut nl_correct, mut nl_pred, mut nl_gold) = (0usize, 0usize, 0usize);
    let (mut root_correct, mut root_total) = (0usize, 0usize);

    for (p, g) in predicted.iter().zip(gold.iter()) {
        for child in 1..=g.num_tokens() as u32 {
            let gheads = g.heads_of(child);
            let pheads = p.heads_of(child);
            total_gold += gheads.len();
            total_pred += pheads.len();

            for &(gh, gl) in gheads {
                let is_unlabeled_hit = pheads.iter().any(|&(ph, _)| ph == gh);
                let is_labeled_hit = pheads.iter().any(|&(ph, pl)| ph == gh && pl == gl);
                if is_unlabeled_hit {
                    unlabeled_correct += 1;
                }
                if is_labeled_hit {
                    labeled_correct += 1;
                }
            }

            if gheads.len() > 1 {
                nl_gold += gheads.len() - 1;
            }
            if pheads.len() > 1 {
                nl_pred += pheads.len() - 1;
            }
            for extra in gheads.iter().skip(1) {
                if pheads.iter().skip(1).any(|p2| p2.0 == extra.0) {
                    nl_correct += 1;
                }
            }

            if let Some(&(gh, _)) = gheads.first() {
                if gh == 0 {
                    root_total += 1;
                    if pheads.iter().any(|&(ph, _)| ph == 0) {
                        root_correct += 1;
                    }
                }
            }
        }
    }

    let f = |correct: usize, pred: usize, gold: usize| -> f64 {
        if pred == 0 || gold == 0 {
            return 0.0;
        }
        let p = correct as f64 / pred as f64;
        let r = correct as f64 / gold as f64;
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    };

    EvalScores {
        unlabeled_f: f(unlabeled_correct, total_pred, total_gold),
        labeled_f: f(labeled_correct, total_pred, total_gold),
        non_local_f: f(nl_correct, nl_pred, nl_gold),
        root_accuracy: if root_total == 0 {
            0.0
        } else {
            root_correct as f64 / root_total as f64
        },
    }
}
