//! Neural scoring classifier (C7): embedding lookup, one cubed-activation
//! hidden layer, action scores. Grounded on `DependencyParser.cpp`'s
//! `setup_classifier_for_training`/`compute_cost_function`/
//! `take_ada_gradient_step`/`check_gradient` call sites (SPEC_FULL §4.4) —
//! `NNClassifier.h` itself was not retrieved, so the internals below are
//! designed to match those call sites rather than transcribed.

use crate::config::ParserConfig;
use crate::dictionary::Dictionary;
use crate::error::{ParserError, Result};
use crate::features::SlotKind;
use rand::Rng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Row-major dense matrix. Kept deliberately simple (no BLAS) — clarity of
/// the forward/backward shapes matters more here than throughput.
#[derive(Debug, Clone)]
pub struct Mat {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl Mat {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Mat {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    fn fill_with(&mut self, f: impl FnMut() -> f64) {
        let mut f = f;
        for v in self.data.iter_mut() {
            *v = f();
        }
    }

    fn add_assign(&mut self, other: &Mat) {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    fn add_scaled(&mut self, other: &Mat, scale: f64) {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b * scale;
        }
    }

    fn scale(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    fn sum_squares(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// A copy of `len` consecutive rows starting at `start` — used to pull
    /// a dictionary group's slice out of the shared `Eb` table when
    /// writing a model file.
    pub fn sub_rows(&self, start: usize, len: usize) -> Mat {
        let mut out = Mat::zeros(len, self.cols);
        for i in 0..len {
            out.row_mut(i).copy_from_slice(self.row(start + i));
        }
        out
    }

    /// Concatenates matrices with the same column count into one, in
    /// order — the inverse of `sub_rows`, used to rebuild `Eb` from the
    /// separately-saved word/pos/label blocks on load.
    pub fn vstack(parts: &[&Mat]) -> Mat {
        let cols = parts.first().map(|m| m.cols).unwrap_or(0);
        let rows: usize = parts.iter().map(|m| m.rows).sum();
        let mut out = Mat::zeros(rows, cols);
        let mut r = 0;
        for p in parts {
            for i in 0..p.rows {
                out.row_mut(r).copy_from_slice(p.row(i));
                r += 1;
            }
        }
        out
    }
}

fn rand_uniform(rng: &mut impl Rng, range: f64) -> f64 {
    (rng.gen::<f64>() * 2.0 - 1.0) * range
}

/// Xavier range `sqrt(6 / (nrows + ncols))`, applied to `W1`/`W2` per
/// `setup_classifier_for_training`; embedding tables use `init_range`
/// directly instead (SPEC_FULL §4.4).
fn xavier_range(rows: usize, cols: usize) -> f64 {
    (6.0 / (rows + cols) as f64).sqrt()
}

/// Per-minibatch gradient accumulator, same shapes as `Classifier`'s
/// trainable parameters. Parallel workers each own one; the driver thread
/// reduces by summation (§5 "per-thread accumulators + reduce").
#[derive(Debug, Clone)]
pub struct Gradient {
    pub eb: Mat,
    pub ed: Mat,
    pub ev: Mat,
    pub ec: Mat,
    pub el: Mat,
    pub w1: Mat,
    pub b1: Vec<f64>,
    pub w2: Mat,
}

impl Gradient {
    fn zeros_like(c: &Classifier) -> Self {
        Gradient {
            eb: Mat::zeros(c.eb.rows, c.eb.cols),
            ed: Mat::zeros(c.ed.rows, c.ed.cols),
            ev: Mat::zeros(c.ev.rows, c.ev.cols),
            ec: Mat::zeros(c.ec.rows, c.ec.cols),
            el: Mat::zeros(c.el.rows, c.el.cols),
            w1: Mat::zeros(c.w1.rows, c.w1.cols),
            b1: vec![0.0; c.hidden_size],
            w2: Mat::zeros(c.w2.rows, c.w2.cols),
        }
    }

    fn add_assign(&mut self, other: &Gradient) {
        self.eb.add_assign(&other.eb);
        self.ed.add_assign(&other.ed);
        self.ev.add_assign(&other.ev);
        self.ec.add_assign(&other.ec);
        self.el.add_assign(&other.el);
        self.w1.add_assign(&other.w1);
        self.w2.add_assign(&other.w2);
        for (a, b) in self.b1.iter_mut().zip(other.b1.iter()) {
            *a += b;
        }
    }

    fn scale(&mut self, factor: f64) {
        self.eb.scale(factor);
        self.ed.scale(factor);
        self.ev.scale(factor);
        self.ec.scale(factor);
        self.el.scale(factor);
        self.w1.scale(factor);
        self.w2.scale(factor);
        for v in self.b1.iter_mut() {
            *v *= factor;
        }
    }

    fn embedding_row_mut(&mut self, kind: SlotKind, local: usize) -> &mut [f64] {
        match kind {
            SlotKind::Word | SlotKind::Pos | SlotKind::Label => self.eb.row_mut(local),
            SlotKind::Distance => self.ed.row_mut(local),
            SlotKind::Valency => self.ev.row_mut(local),
            SlotKind::Cluster => self.ec.row_mut(local),
            SlotKind::Length => self.el.row_mut(local),
        }
    }
}

/// One training sample's forward-pass scores, used both for loss/gradient
/// computation and for prediction.
pub struct Scores {
    pub pre_hidden: Vec<f64>,
    pub hidden: Vec<f64>,
    pub logits: Vec<f64>,
}

#[derive(Clone)]
pub struct Classifier {
    eb: Mat,
    ed: Mat,
    ev: Mat,
    ec: Mat,
    el: Mat,
    w1: Mat,
    b1: Vec<f64>,
    w2: Mat,

    hist_eb: Mat,
    hist_ed: Mat,
    hist_ev: Mat,
    hist_ec: Mat,
    hist_el: Mat,
    hist_w1: Mat,
    hist_b1: Vec<f64>,
    hist_w2: Mat,

    sum_eb: Mat,
    sum_ed: Mat,
    sum_ev: Mat,
    sum_ec: Mat,
    sum_el: Mat,
    sum_w1: Mat,
    sum_b1: Vec<f64>,
    sum_w2: Mat,
    average_steps: u64,

    ed_offset: u32,
    ev_offset: u32,
    ec_offset: u32,
    el_offset: u32,

    slot_offsets: Vec<usize>,
    slot_widths: Vec<usize>,

    pub hidden_size: usize,
    pub num_slots: usize,
    pub fix_word_embeddings: bool,
    words_size: u32,
}

impl Classifier {
    /// Allocates and randomly initializes every trainable array for
    /// `dict`/`config`/`num_actions`, per `setup_classifier_for_training`.
    pub fn new(
        dict: &Dictionary,
        config: &ParserConfig,
        kinds: &[SlotKind],
        num_actions: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let eb_rows = (dict.labels.offset + dict.labels.size) as usize;
        let ed_rows = dict.distances.size as usize;
        let ev_rows = dict.valencies.size as usize;
        let ec_rows = dict.clusters.size as usize;
        let el_rows = dict.lengths.size as usize;

        let mut eb = Mat::zeros(eb_rows, config.embedding_size);
        let mut ed = Mat::zeros(ed_rows, config.distance_embedding_size);
        let mut ev = Mat::zeros(ev_rows, config.valency_embedding_size);
        let mut ec = Mat::zeros(ec_rows, config.cluster_embedding_size);
        let mut el = Mat::zeros(el_rows, config.length_embedding_size);
        eb.fill_with(|| rand_uniform(rng, config.init_range));
        ed.fill_with(|| rand_uniform(rng, config.init_range));
        ev.fill_with(|| rand_uniform(rng, config.init_range));
        ec.fill_with(|| rand_uniform(rng, config.init_range));
        el.fill_with(|| rand_uniform(rng, config.init_range));

        let (slot_offsets, slot_widths) = slot_layout(config, kinds);
        let input_dim: usize = slot_widths.iter().sum();

        let mut w1 = Mat::zeros(config.hidden_size, input_dim);
        let w1_range = xavier_range(w1.rows, w1.cols);
        w1.fill_with(|| rand_uniform(rng, w1_range));
        let b1 = vec![0.0; config.hidden_size];

        let mut w2 = Mat::zeros(num_actions, config.hidden_size);
        let w2_range = xavier_range(w2.rows, w2.cols);
        w2.fill_with(|| rand_uniform(rng, w2_range));

        Classifier {
            hist_eb: Mat::zeros(eb.rows, eb.cols),
            hist_ed: Mat::zeros(ed.rows, ed.cols),
            hist_ev: Mat::zeros(ev.rows, ev.cols),
            hist_ec: Mat::zeros(ec.rows, ec.cols),
            hist_el: Mat::zeros(el.rows, el.cols),
            hist_w1: Mat::zeros(w1.rows, w1.cols),
            hist_b1: vec![0.0; b1.len()],
            hist_w2: Mat::zeros(w2.rows, w2.cols),

            sum_eb: Mat::zeros(eb.rows, eb.cols),
            sum_ed: Mat::zeros(ed.rows, ed.cols),
            sum_ev: Mat::zeros(ev.rows, ev.cols),
            sum_ec: Mat::zeros(ec.rows, ec.cols),
            sum_el: Mat::zeros(el.rows, el.cols),
            sum_w1: Mat::zeros(w1.rows, w1.cols),
            sum_b1: vec![0.0; b1.len()],
            sum_w2: Mat::zeros(w2.rows, w2.cols),
            average_steps: 0,

            ed_offset: dict.distances.offset,
            ev_offset: dict.valencies.offset,
            ec_offset: dict.clusters.offset,
            el_offset: dict.lengths.offset,

            slot_offsets,
            slot_widths,

            hidden_size: config.hidden_size,
            num_slots: kinds.len(),
            fix_word_embeddings: config.fix_word_embeddings,
            words_size: dict.words.size,

            eb,
            ed,
            ev,
            ec,
            el,
            w1,
            b1,
            w2,
        }
    }

    fn local_row(&self, kind: SlotKind, global_id: u32) -> usize {
        match kind {
            SlotKind::Word | SlotKind::Pos | SlotKind::Label => global_id as usize,
            SlotKind::Distance => (global_id - self.ed_offset) as usize,
            SlotKind::Valency => (global_id - self.ev_offset) as usize,
            SlotKind::Cluster => (global_id - self.ec_offset) as usize,
            SlotKind::Length => (global_id - self.el_offset) as usize,
        }
    }

    fn embedding_row(&self, kind: SlotKind, global_id: u32) -> &[f64] {
        let local = self.local_row(kind, global_id);
        match kind {
            SlotKind::Word | SlotKind::Pos | SlotKind::Label => self.eb.row(local),
            SlotKind::Distance => self.ed.row(local),
            SlotKind::Valency => self.ev.row(local),
            SlotKind::Cluster => self.ec.row(local),
            SlotKind::Length => self.el.row(local),
        }
    }

    /// The precompute-cache key for `(global_id, slot_index)`, per
    /// DESIGN.md's resolution (`global_feature_id * num_slots +
    /// slot_index`, the original's actual arithmetic rather than
    /// spec.md's reversed prose order).
    pub fn precompute_key(&self, global_id: u32, slot_index: usize) -> u64 {
        global_id as u64 * self.num_slots as u64 + slot_index as u64
    }

    /// The hidden-pre-activation contribution of a single `(slot, id)`
    /// pair: the dot product of that slot's embedding row against `W1`'s
    /// column block for that slot. Cached verbatim by the precompute pass.
    pub fn precompute_contribution(&self, slot_index: usize, kind: SlotKind, global_id: u32) -> Vec<f64> {
        let row = self.embedding_row(kind, global_id);
        let col_off = self.slot_offsets[slot_index];
        (0..self.hidden_size)
            .map(|h| {
                let w1_row = self.w1.row(h);
                row.iter()
                    .enumerate()
                    .map(|(j, &v)| w1_row[col_off + j] * v)
                    .sum()
            })
            .collect()
    }

    /// Forward pass for one sample, consulting `cache` for any `(slot,
    /// id)` pair it covers and falling back to direct computation
    /// otherwise.
    pub fn forward(
        &self,
        features: &[u32],
        kinds: &[SlotKind],
        cache: Option<&FxHashMap<u64, Vec<f64>>>,
    ) -> Scores {
        let mut pre_hidden = self.b1.clone();
        for (slot_idx, (&id, &kind)) in features.iter().zip(kinds.iter()).enumerate() {
            if let Some(cache) = cache {
                let key = self.precompute_key(id, slot_idx);
                if let Some(cached) = cache.get(&key) {
                    for h in 0..self.hidden_size {
                        pre_hidden[h] += cached[h];
                    }
                    continue;
                }
            }
            let contribution = self.precompute_contribution(slot_idx, kind, id);
            for h in 0..self.hidden_size {
                pre_hidden[h] += contribution[h];
            }
        }

        let hidden: Vec<f64> = pre_hidden.iter().map(|&v| v * v * v).collect();
        let logits: Vec<f64> = (0..self.w2.rows)
            .map(|a| {
                self.w2
                    .row(a)
                    .iter()
                    .zip(hidden.iter())
                    .map(|(&w, &h)| w * h)
                    .sum()
            })
            .collect();

        Scores {
            pre_hidden,
            hidden,
            logits,
        }
    }

    /// Masked softmax loss + L2 penalty over a minibatch of sample
    /// indices, parallelized with `rayon` (per-worker accumulators,
    /// driver-thread reduce). `mask[a] == -1` excludes action `a` from the
    /// softmax denominator entirely (inapplicable transition); `mask[a] ==
    /// 1` names the gold action.
    pub fn compute_cost_function(
        &self,
        samples: &[crate::dataset::Sample],
        kinds: &[SlotKind],
        cache: Option<&FxHashMap<u64, Vec<f64>>>,
        l2_reg: f64,
    ) -> (f64, f64, Gradient) {
        let (loss_sum, correct, mut grad) = samples
            .par_iter()
            .fold(
                || (0.0f64, 0usize, Gradient::zeros_like(self)),
                |(mut loss, mut correct, mut grad), sample| {
                    let scores = self.forward(&sample.features, kinds, cache);
                    let applicable: Vec<usize> = sample
                        .mask
                        .iter()
                        .enumerate()
                        .filter(|&(_, &m)| m >= 0)
                        .map(|(a, _)| a)
                        .collect();

                    let max_logit = applicable
                        .iter()
                        .map(|&a| scores.logits[a])
                        .fold(f64::NEG_INFINITY, f64::max);
                    let denom: f64 = applicable
                        .iter()
                        .map(|&a| (scores.logits[a] - max_logit).exp())
                        .sum();
                    let gold = sample.gold_action;
                    let log_prob = (scores.logits[gold] - max_logit) - denom.ln();
                    loss += -log_prob;

                    let predicted = applicable
                        .iter()
                        .copied()
                        .max_by(|&a, &b| scores.logits[a].partial_cmp(&scores.logits[b]).unwrap())
                        .unwrap_or(gold);
                    if predicted == gold {
                        correct += 1;
                    }

                    let mut dlogits = vec![0.0; scores.logits.len()];
                    for &a in &applicable {
                        let p = (scores.logits[a] - max_logit).exp() / denom;
                        dlogits[a] = p - if a == gold { 1.0 } else { 0.0 };
                    }

                    let mut dhidden = vec![0.0; self.hidden_size];
                    for a in &applicable {
                        let d = dlogits[*a];
                        if d == 0.0 {
                            continue;
                        }
                        let grad_row = grad.w2.row_mut(*a);
                        for h in 0..self.hidden_size {
                            grad_row[h] += d * scores.hidden[h];
                            dhidden[h] += d * self.w2.row(*a)[h];
                        }
                    }

                    let dpre: Vec<f64> = (0..self.hidden_size)
                        .map(|h| dhidden[h] * 3.0 * scores.pre_hidden[h] * scores.pre_hidden[h])
                        .collect();
                    for h in 0..self.hidden_size {
                        grad.b1[h] += dpre[h];
                    }

                    for (slot_idx, (&id, &kind)) in
                        sample.features.iter().zip(kinds.iter()).enumerate()
                    {
                        let col_off = self.slot_offsets[slot_idx];
                        let width = self.slot_widths[slot_idx];
                        let row = self.embedding_row(kind, id);
                        let local = self.local_row(kind, id);
                        for h in 0..self.hidden_size {
                            let d = dpre[h];
                            if d == 0.0 {
                                continue;
                            }
                            let grad_w1_row = grad.w1.row_mut(h);
                            for j in 0..width {
                                grad_w1_row[col_off + j] += d * row[j];
                            }
                        }
                        let grad_row = grad.embedding_row_mut(kind, local);
                        for h in 0..self.hidden_size {
                            let d = dpre[h];
                            if d == 0.0 {
                                continue;
                            }
                            let w1_row = self.w1.row(h);
                            for j in 0..width {
                                grad_row[j] += d * w1_row[col_off + j];
                            }
                        }
                    }

                    (loss, correct, grad)
                },
            )
            .reduce(
                || (0.0, 0usize, Gradient::zeros_like(self)),
                |(l1, c1, mut g1), (l2, c2, g2)| {
                    g1.add_assign(&g2);
                    (l1 + l2, c1 + c2, g1)
                },
            );

        let n = samples.len().max(1) as f64;
        grad.scale(1.0 / n);
        let mut total_loss = loss_sum / n;

        // L2 regularization over every trainable array (§4.4).
        let reg_sum = self.eb.sum_squares()
            + self.ed.sum_squares()
            + self.ev.sum_squares()
            + self.ec.sum_squares()
            + self.el.sum_squares()
            + self.w1.sum_squares()
            + self.w2.sum_squares()
            + self.b1.iter().map(|v| v * v).sum::<f64>();
        total_loss += 0.5 * l2_reg * reg_sum;

        grad.eb.add_scaled(&self.eb, l2_reg);
        grad.ed.add_scaled(&self.ed, l2_reg);
        grad.ev.add_scaled(&self.ev, l2_reg);
        grad.ec.add_scaled(&self.ec, l2_reg);
        grad.el.add_scaled(&self.el, l2_reg);
        grad.w1.add_scaled(&self.w1, l2_reg);
        grad.w2.add_scaled(&self.w2, l2_reg);
        for (g, &p) in grad.b1.iter_mut().zip(self.b1.iter()) {
            *g += l2_reg * p;
        }

        let accuracy = correct as f64 / n;
        (total_loss, accuracy, grad)
    }

    /// AdaGrad step. `fix_word_embeddings` freezes `Eb` rows
    /// `0..known_words.size()-3` (every real word, leaving only the three
    /// sentinel rows trainable), per `take_ada_gradient_step(known_words
    /// .size() - 3)`.
    pub fn apply_adagrad(&mut self, grad: &Gradient, lr: f64, eps: f64) {
        let word_freeze_rows = if self.fix_word_embeddings {
            (self.words_size.saturating_sub(3)) as usize
        } else {
            0
        };
        Self::update_mat(&mut self.eb, &mut self.hist_eb, &grad.eb, lr, eps, word_freeze_rows);
        Self::update_mat(&mut self.ed, &mut self.hist_ed, &grad.ed, lr, eps, 0);
        Self::update_mat(&mut self.ev, &mut self.hist_ev, &grad.ev, lr, eps, 0);
        Self::update_mat(&mut self.ec, &mut self.hist_ec, &grad.ec, lr, eps, 0);
        Self::update_mat(&mut self.el, &mut self.hist_el, &grad.el, lr, eps, 0);
        Self::update_mat(&mut self.w1, &mut self.hist_w1, &grad.w1, lr, eps, 0);
        Self::update_mat(&mut self.w2, &mut self.hist_w2, &grad.w2, lr, eps, 0);
        for ((p, h), g) in self
            .b1
            .iter_mut()
            .zip(self.hist_b1.iter_mut())
            .zip(grad.b1.iter())
        {
            *h += g * g;
            *p -= lr * g / (h.sqrt() + eps);
        }
    }

    fn update_mat(param: &mut Mat, hist: &mut Mat, grad: &Mat, lr: f64, eps: f64, freeze_until_row: usize) {
        for r in freeze_until_row..param.rows {
            let p = param.row_mut(r);
            let h = hist.row_mut(r);
            let g = grad.row(r);
            for j in 0..p.len() {
                h[j] += g[j] * g[j];
                p[j] -= lr * g[j] / (h[j].sqrt() + eps);
            }
        }
    }

    /// Zeroes every AdaGrad accumulator (`clear_gradient_per_iter`, §4.4).
    pub fn clear_gradient_histories(&mut self) {
        self.hist_eb = Mat::zeros(self.eb.rows, self.eb.cols);
        self.hist_ed = Mat::zeros(self.ed.rows, self.ed.cols);
        self.hist_ev = Mat::zeros(self.ev.rows, self.ev.cols);
        self.hist_ec = Mat::zeros(self.ec.rows, self.ec.cols);
        self.hist_el = Mat::zeros(self.el.rows, self.el.cols);
        self.hist_w1 = Mat::zeros(self.w1.rows, self.w1.cols);
        self.hist_w2 = Mat::zeros(self.w2.rows, self.w2.cols);
        self.hist_b1 = vec![0.0; self.hidden_size];
    }

    /// Folds the current parameter values into the running average kept
    /// for `finalize_training`. Called once per completed AdaGrad step.
    pub fn record_for_average(&mut self) {
        self.sum_eb.add_assign(&self.eb);
        self.sum_ed.add_assign(&self.ed);
        self.sum_ev.add_assign(&self.ev);
        self.sum_ec.add_assign(&self.ec);
        self.sum_el.add_assign(&self.el);
        self.sum_w1.add_assign(&self.w1);
        self.sum_w2.add_assign(&self.w2);
        for (s, &p) in self.sum_b1.iter_mut().zip(self.b1.iter()) {
            *s += p;
        }
        self.average_steps += 1;
    }

    /// Replaces the live parameters with their running average over every
    /// step recorded via `record_for_average`, per spec.md's "Finalize by
    /// averaging accumulated parameters". A no-op if nothing was recorded.
    pub fn finalize_training(&mut self) {
        if self.average_steps == 0 {
            return;
        }
        let scale = 1.0 / self.average_steps as f64;
        self.eb = scaled_copy(&self.sum_eb, scale);
        self.ed = scaled_copy(&self.sum_ed, scale);
        self.ev = scaled_copy(&self.sum_ev, scale);
        self.ec = scaled_copy(&self.sum_ec, scale);
        self.el = scaled_copy(&self.sum_el, scale);
        self.w1 = scaled_copy(&self.sum_w1, scale);
        self.w2 = scaled_copy(&self.sum_w2, scale);
        for (p, &s) in self.b1.iter_mut().zip(self.sum_b1.iter()) {
            *p = s * scale;
        }
    }

    /// Finite-difference gradient check (`check_gradient`): perturbs a
    /// handful of `W1` entries by `epsilon` and compares the numeric slope
    /// against the analytic gradient already computed for the same
    /// minibatch. Fatal on mismatch past `tolerance`, since a silent
    /// divergence here means the backward pass has a bug, not a data
    /// issue the training loop should shrug off.
    pub fn check_gradient(
        &mut self,
        samples: &[crate::dataset::Sample],
        kinds: &[SlotKind],
        l2_reg: f64,
        epsilon: f64,
        tolerance: f64,
        probes: &[(usize, usize)],
    ) -> Result<()> {
        let (_, _, analytic) = self.compute_cost_function(samples, kinds, None, l2_reg);
        for &(row, col) in probes {
            let original = self.w1.row(row)[col];

            self.w1.row_mut(row)[col] = original + epsilon;
            let (loss_plus, _, _) = self.compute_cost_function(samples, kinds, None, l2_reg);
            self.w1.row_mut(row)[col] = original - epsilon;
            let (loss_minus, _, _) = self.compute_cost_function(samples, kinds, None, l2_reg);
            self.w1.row_mut(row)[col] = original;

            let numeric = (loss_plus - loss_minus) / (2.0 * epsilon);
            let analytic_grad = analytic.w1.row(row)[col];
            let diff = (numeric - analytic_grad).abs();
            if diff > tolerance {
                return Err(ParserError::GradientCheckFailed {
                    analytic: analytic_grad,
                    numeric,
                    diff,
                });
            }
        }
        Ok(())
    }

    pub fn num_actions(&self) -> usize {
        self.w2.rows
    }

    /// Overwrites one word's `Eb` row directly, leaving the pos/label rows
    /// untouched. Used by `driver::seed_word_embeddings` to overlay a
    /// pretrained table onto the training-time vocabulary, and by
    /// `model_io::load_cl` to fill in the target-language vocabulary it
    /// just rebuilt.
    pub fn set_word_embedding_row(&mut self, local_word_id: u32, values: &[f64]) {
        self.eb.row_mut(local_word_id as usize).copy_from_slice(values);
    }

    /// The counterpart read: one word's `Eb` row, by local id.
    pub fn word_embedding_row(&self, local_word_id: u32) -> &[f64] {
        self.eb.row(local_word_id as usize)
    }

    /// Read-only access to every trainable array, in save order — used by
    /// `model_io::save`.
    pub(crate) fn parts(&self) -> (&Mat, &Mat, &Mat, &Mat, &Mat, &Mat, &[f64], &Mat) {
        (
            &self.eb, &self.ed, &self.ev, &self.ec, &self.el, &self.w1, &self.b1, &self.w2,
        )
    }

    /// Rebuilds a `Classifier` from arrays read back from a model file —
    /// the inverse of `new` for the deserialization path (`model_io::load`).
    /// AdaGrad histories and the running-average accumulators start fresh,
    /// since neither is persisted.
    pub(crate) fn from_parts(
        eb: Mat,
        ed: Mat,
        ev: Mat,
        ec: Mat,
        el: Mat,
        w1: Mat,
        b1: Vec<f64>,
        w2: Mat,
        dict: &Dictionary,
        config: &ParserConfig,
        kinds: &[SlotKind],
    ) -> Self {
        let (slot_offsets, slot_widths) = slot_layout(config, kinds);
        Classifier {
            hist_eb: Mat::zeros(eb.rows, eb.cols),
            hist_ed: Mat::zeros(ed.rows, ed.cols),
            hist_ev: Mat::zeros(ev.rows, ev.cols),
            hist_ec: Mat::zeros(ec.rows, ec.cols),
            hist_el: Mat::zeros(el.rows, el.cols),
            hist_w1: Mat::zeros(w1.rows, w1.cols),
            hist_b1: vec![0.0; b1.len()],
            hist_w2: Mat::zeros(w2.rows, w2.cols),

            sum_eb: Mat::zeros(eb.rows, eb.cols),
            sum_ed: Mat::zeros(ed.rows, ed.cols),
            sum_ev: Mat::zeros(ev.rows, ev.cols),
            sum_ec: Mat::zeros(ec.rows, ec.cols),
            sum_el: Mat::zeros(el.rows, el.cols),
            sum_w1: Mat::zeros(w1.rows, w1.cols),
            sum_b1: vec![0.0; b1.len()],
            sum_w2: Mat::zeros(w2.rows, w2.cols),
            average_steps: 0,

            ed_offset: dict.distances.offset,
            ev_offset: dict.valencies.offset,
            ec_offset: dict.clusters.offset,
            el_offset: dict.lengths.offset,

            slot_offsets,
            slot_widths,

            hidden_size: config.hidden_size,
            num_slots: kinds.len(),
            fix_word_embeddings: config.fix_word_embeddings,
            words_size: dict.words.size,

            eb,
            ed,
            ev,
            ec,
            el,
            w1,
            b1,
            w2,
        }
    }
}

fn scaled_copy(m: &Mat, scale: f64) -> Mat {
    let mut out = m.clone();
    out.scale(scale);
    out
}

fn slot_width(kind: SlotKind, config: &ParserConfig) -> usize {
    match kind {
        SlotKind::Word | SlotKind::Pos | SlotKind::Label => config.embedding_size,
        SlotKind::Distance => config.distance_embedding_size,
        SlotKind::Valency => config.valency_embedding_size,
        SlotKind::Cluster => config.cluster_embedding_size,
        SlotKind::Length => config.length_embedding_size,
    }
}

fn slot_layout(config: &ParserConfig, kinds: &[SlotKind]) -> (Vec<usize>, Vec<usize>) {
    let mut offsets = Vec::with_capacity(kinds.len());
    let mut widths = Vec::with_capacity(kinds.len());
    let mut offset = 0;
    for &kind in kinds {
        let width = slot_width(kind, config);
        offsets.push(offset);
        widths.push(width);
        offset += width;
    }
    (offsets, widths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleKind;
    use crate::dataset::Sample;
    use crate::dictionary::Dictionary;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_config() -> ParserConfig {
        ParserConfig {
            labeled: true,
            delexicalized: false,
            oracle: OracleKind::ArcEager,
            language: "en".into(),
            use_postag: true,
            use_distance: true,
            use_valency: true,
            use_cluster: false,
            use_length: false,
            embedding_size: 4,
            distance_embedding_size: 2,
            valency_embedding_size: 2,
            cluster_embedding_size: 2,
            length_embedding_size: 2,
            hidden_size: 6,
            num_basic_tokens: 0,
            num_dist_tokens: 0,
            num_valency_tokens: 0,
            num_cluster_tokens: 0,
            num_length_tokens: 0,
            num_tokens: 0,
            num_pre_computed: 10,
            word_cut_off: 1,
            init_range: 0.01,
            max_iter: 1,
            finetune_iter: 0,
            eval_per_iter: 1,
            clear_gradient_per_iter: 0,
            save_intermediate: false,
            fix_word_embeddings: false,
            training_threads: 1,
            debug: false,
            root_label: "root".into(),
        }
    }

    fn build_dict() -> Dictionary {
        let mut dict = Dictionary::build_static(
            vec!["the", "cat", "sat"].into_iter().map(String::from),
            vec!["DT", "NN", "VB"].into_iter().map(String::from),
            std::iter::empty(),
            vec!["det", "nsubj"].into_iter().map(String::from),
            "root",
            1,
        );
        dict.finalize_dynamic_groups(
            [0i64, 1, 2].into_iter(),
            [0i64, 1].into_iter(),
            [0i64].into_iter(),
        );
        dict
    }

    /// A valid global id for each slot kind, standing in for a real
    /// feature vector (whose exact contents `features.rs` is responsible
    /// for) so the classifier's own forward/backward arithmetic can be
    /// exercised in isolation.
    fn sample_feature_vector(dict: &Dictionary, kinds: &[SlotKind]) -> Vec<u32> {
        kinds
            .iter()
            .map(|&kind| match kind {
                SlotKind::Word => dict.nil_word(),
                SlotKind::Pos => dict.nil_pos(),
                SlotKind::Label => dict.nil_label(),
                SlotKind::Distance => dict.distance_id(0),
                SlotKind::Valency => dict.valency_id(0),
                SlotKind::Cluster => dict.nil_cluster(),
                SlotKind::Length => dict.length_id(0),
            })
            .collect()
    }

    #[test]
    fn forward_matches_between_cached_and_uncached_paths() {
        let dict = build_dict();
        let mut config = sample_config();
        let kinds = crate::features::slot_kinds(&config);
        config.num_tokens = kinds.len();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let classifier = Classifier::new(&dict, &config, &kinds, 5, &mut rng);

        let features = sample_feature_vector(&dict, &kinds);
        let direct = classifier.forward(&features, &kinds, None);

        let mut cache = FxHashMap::default();
        for (slot_idx, (&id, &kind)) in features.iter().zip(kinds.iter()).enumerate() {
            let key = classifier.precompute_key(id, slot_idx);
            cache.insert(key, classifier.precompute_contribution(slot_idx, kind, id));
        }
        let cached = classifier.forward(&features, &kinds, Some(&cache));

        for (a, b) in direct.logits.iter().zip(cached.logits.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn adagrad_step_reduces_loss_on_toy_minibatch() {
        let dict = build_dict();
        let mut config = sample_config();
        let kinds = crate::features::slot_kinds(&config);
        config.num_tokens = kinds.len();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut classifier = Classifier::new(&dict, &config, &kinds, 4, &mut rng);

        let sample = Sample {
            features: sample_feature_vector(&dict, &kinds),
            mask: vec![1, 0, 0, -1],
            gold_action: 0,
        };
        let samples = vec![sample];

        let (loss_before, _, grad) = classifier.compute_cost_function(&samples, &kinds, None, 1e-4);
        classifier.apply_adagrad(&grad, 0.5, 1e-6);
        let (loss_after, _, _) = classifier.compute_cost_function(&samples, &kinds, None, 1e-4);
        assert!(loss_after < loss_before);
    }
}
