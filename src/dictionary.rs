//! Dictionaries/Indexer (C5). Builds the seven disjoint id spaces and
//! allocates a single global feature id across them, in the order fixed by
//! §4.6: words → POS → labels → distances → valencies → clusters →
//! lengths.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// One dense id space. Local ids are contiguous `0..size`; a global id is
/// `offset + local_id`. String-keyed groups (words/pos/labels/clusters)
/// and integer-keyed groups (distances/valencies/lengths) both go through
/// this same shape.
#[derive(Debug, Clone, Default)]
pub struct Group {
    index: FxHashMap<String, u32>,
    pub offset: u32,
    pub size: u32,
    pub unknown: Option<u32>,
    pub nil: Option<u32>,
    pub root: Option<u32>,
}

impl Group {
    fn push(&mut self, key: String) -> u32 {
        let id = self.size;
        self.index.insert(key, id);
        self.size += 1;
        id
    }

    pub fn local_id(&self, key: &str) -> Option<u32> {
        self.index.get(key).copied()
    }

    pub fn global_id(&self, key: &str) -> Option<u32> {
        self.local_id(key).map(|id| self.offset + id)
    }

    pub fn global(&self, local: u32) -> u32 {
        self.offset + local
    }

    /// Every key in local-id order (`0..size`) — the inverse of the
    /// `String -> id` index, used when writing a model file's dictionary
    /// blocks.
    pub fn ordered_keys(&self) -> Vec<String> {
        let mut pairs: Vec<(u32, &str)> = self.index.iter().map(|(k, &v)| (v, k.as_str())).collect();
        pairs.sort_unstable_by_key(|&(id, _)| id);
        pairs.into_iter().map(|(_, k)| k.to_string()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    pub words: Group,
    pub pos: Group,
    pub labels: Group,
    pub distances: Group,
    pub valencies: Group,
    pub clusters: Group,
    pub lengths: Group,
}

pub const UNKNOWN: &str = "-UNKNOWN-";
pub const NIL: &str = "-NIL-";
pub const ROOT: &str = "-ROOT-";
const UNKNOWN_INT: &str = "-UNKNOWN_INT-";

impl Dictionary {
    /// Builds the word/POS/cluster/label dictionaries from the training
    /// corpus: words below `word_cut_off` occurrences are dropped before
    /// the sentinel rows are appended, matching §4.6's "filtered by a
    /// minimum frequency... then appends the reserved sentinels".
    /// `distances`/`valencies`/`lengths` start empty: they are filled
    /// afterwards by `observe_dynamic`, simulating the oracle over the
    /// training set (§4.6).
    pub fn build_static(
        words: impl Iterator<Item = String>,
        pos: impl Iterator<Item = String>,
        clusters: impl Iterator<Item = String>,
        labels: impl Iterator<Item = String>,
        root_label: &str,
        word_cut_off: u32,
    ) -> Dictionary {
        let mut dict = Dictionary::default();

        let mut word_counts: BTreeMap<String, u32> = BTreeMap::new();
        for w in words {
            *word_counts.entry(w).or_insert(0) += 1;
        }
        for (w, count) in word_counts {
            if count >= word_cut_off.max(1) {
                dict.words.push(w);
            }
        }
        dict.words.unknown = Some(dict.words.push(UNKNOWN.to_string()));
        dict.words.nil = Some(dict.words.push(NIL.to_string()));
        dict.words.root = Some(dict.words.push(ROOT.to_string()));

        let mut pos_set: BTreeMap<String, ()> = BTreeMap::new();
        for p in pos {
            pos_set.insert(p, ());
        }
        for p in pos_set.into_keys() {
            dict.pos.push(p);
        }
        dict.pos.unknown = Some(dict.pos.push(UNKNOWN.to_string()));
        dict.pos.nil = Some(dict.pos.push(NIL.to_string()));
        dict.pos.root = Some(dict.pos.push(ROOT.to_string()));

        let mut cluster_set: BTreeMap<String, ()> = BTreeMap::new();
        for c in clusters {
            cluster_set.insert(c, ());
        }
        for c in cluster_set.into_keys() {
            dict.clusters.push(c);
        }
        dict.clusters.unknown = Some(dict.clusters.push(UNKNOWN.to_string()));
        dict.clusters.nil = Some(dict.clusters.push(NIL.to_string()));
        dict.clusters.root = Some(dict.clusters.push(ROOT.to_string()));

        // Labels: built from gold non-root arcs; root_label reserved and
        // appended last, just before NIL (§4.6, and §9 Open Question 2).
        let mut label_set: BTreeMap<String, ()> = BTreeMap::new();
        for l in labels {
            if l != root_label {
                label_set.insert(l, ());
            }
        }
        for l in label_set.into_keys() {
            dict.labels.push(l);
        }
        dict.labels.root = Some(dict.labels.push(root_label.to_string()));
        dict.labels.nil = Some(dict.labels.push(NIL.to_string()));

        dict.assign_offsets();
        dict
    }

    /// Recomputes group offsets in the fixed global order. Called after
    /// `build_static` and again after `observe_dynamic` extends the
    /// dynamic groups.
    fn assign_offsets(&mut self) {
        let mut offset = 0u32;
        for group in [
            &mut self.words,
            &mut self.pos,
            &mut self.labels,
            &mut self.distances,
            &mut self.valencies,
            &mut self.clusters,
            &mut self.lengths,
        ] {
            group.offset = offset;
            offset += group.size;
        }
    }

    /// Records an integer-valued attribute (distance, valency, or length)
    /// observed while simulating the oracle, and returns the group with a
    /// fresh `UNKNOWN_INT` sentinel appended for values never seen during
    /// training.
    pub fn finalize_dynamic_group(group: &mut Group, observed: impl Iterator<Item = i64>) {
        let mut seen: BTreeMap<i64, ()> = BTreeMap::new();
        for v in observed {
            seen.insert(v, ());
        }
        for v in seen.into_keys() {
            group.push(v.to_string());
        }
        group.unknown = Some(group.push(UNKNOWN_INT.to_string()));
    }

    /// Fills the three dynamic groups (distances, valencies, lengths) from
    /// values observed while simulating the oracle over the training set,
    /// then recomputes every group's offset in the fixed global order
    /// (§4.6) — the public entry point a driver uses once it has collected
    /// those observations, since `assign_offsets` itself stays private to
    /// this module.
    pub fn finalize_dynamic_groups(
        &mut self,
        distances: impl Iterator<Item = i64>,
        valencies: impl Iterator<Item = i64>,
        lengths: impl Iterator<Item = i64>,
    ) {
        Self::finalize_dynamic_group(&mut self.distances, distances);
        Self::finalize_dynamic_group(&mut self.valencies, valencies);
        Self::finalize_dynamic_group(&mut self.lengths, lengths);
        self.assign_offsets();
    }

    pub fn distance_id(&self, distance: i64) -> u32 {
        self.distances
            .global_id(&distance.to_string())
            .unwrap_or_else(|| self.distances.global(self.distances.unknown.unwrap()))
    }

    pub fn valency_id(&self, valency: i64) -> u32 {
        self.valencies
            .global_id(&valency.to_string())
            .unwrap_or_else(|| self.valencies.global(self.valencies.unknown.unwrap()))
    }

    pub fn length_id(&self, length: i64) -> u32 {
        self.lengths
            .global_id(&length.to_string())
            .unwrap_or_else(|| self.lengths.global(self.lengths.unknown.unwrap()))
    }

    /// Word lookup cascade from §4.3: exact → lowercased → `UNKNOWN` →
    /// `NIL`-adjacent `NONEXIST` only if `UNKNOWN` itself is absent (the
    /// delexicalized case, where the word group was never built).
    pub fn word_id(&self, form: &str) -> u32 {
        if let Some(id) = self.words.global_id(form) {
            return id;
        }
        let lowered = form.to_lowercase();
        if let Some(id) = self.words.global_id(&lowered) {
            return id;
        }
        if let Some(unk) = self.words.unknown {
            return self.words.global(unk);
        }
        self.words.offset
    }

    pub fn pos_id(&self, tag: &str) -> u32 {
        self.pos
            .global_id(tag)
            .unwrap_or_else(|| self.pos.global(self.pos.unknown.unwrap_or(0)))
    }

    pub fn cluster_id(&self, cluster: Option<&str>) -> u32 {
        match cluster {
            Some(c) => self
                .clusters
                .global_id(c)
                .unwrap_or_else(|| self.clusters.global(self.clusters.unknown.unwrap_or(0))),
            None => self.clusters.global(self.clusters.unknown.unwrap_or(0)),
        }
    }

    pub fn label_id(&self, label: &str) -> u32 {
        self.labels
            .global_id(label)
            .unwrap_or_else(|| self.labels.global(self.labels.nil.unwrap_or(0)))
    }

    pub fn nil_word(&self) -> u32 {
        self.words.global(self.words.nil.unwrap())
    }
    pub fn nil_pos(&self) -> u32 {
        self.pos.global(self.pos.nil.unwrap())
    }
    pub fn nil_label(&self) -> u32 {
        self.labels.global(self.labels.nil.unwrap())
    }
    pub fn nil_cluster(&self) -> u32 {
        self.clusters.global(self.clusters.nil.unwrap())
    }
    pub fn root_word(&self) -> u32 {
        self.words.global(self.words.root.unwrap())
    }
    pub fn root_pos(&self) -> u32 {
        self.pos.global(self.pos.root.unwrap())
    }
    pub fn root_cluster(&self) -> u32 {
        self.clusters.global(self.clusters.root.unwrap())
    }

    /// `known_labels.len() - 2`, the canonical root-label placement (spec
    /// §9 Open Question 2), exposed as an accessor rather than a hardcoded
    /// offset at every call site.
    pub fn root_label_index(&self) -> u32 {
        self.labels.global(self.labels.root.unwrap())
    }

    pub fn total_tokens(&self) -> u32 {
        self.lengths.offset + self.lengths.size
    }

    /// Rebuilds a dictionary from ordered key lists read back from a saved
    /// model (`model_io::load`) — the inverse of `build_static` +
    /// `finalize_dynamic_groups`. Each list must already be in the local-id
    /// order it was saved in (sentinels included): three trailing
    /// `UNKNOWN`/`NIL`/`ROOT` rows for words/pos/clusters, two trailing
    /// `ROOT`/`NIL` rows for labels, one trailing `UNKNOWN_INT` row for
    /// distances/valencies/lengths.
    pub fn from_parts(
        words: Vec<String>,
        pos: Vec<String>,
        labels: Vec<String>,
        distances: Vec<String>,
        valencies: Vec<String>,
        clusters: Vec<String>,
        lengths: Vec<String>,
    ) -> Dictionary {
        let mut dict = Dictionary::default();
        load_static_sentinels(&mut dict.words, words);
        load_static_sentinels(&mut dict.pos, pos);
        load_label_sentinels(&mut dict.labels, labels);
        load_dynamic_sentinel(&mut dict.distances, distances);
        load_dynamic_sentinel(&mut dict.valencies, valencies);
        load_static_sentinels(&mut dict.clusters, clusters);
        load_dynamic_sentinel(&mut dict.lengths, lengths);
        dict.assign_offsets();
        dict
    }
}

fn load_static_sentinels(group: &mut Group, keys: Vec<String>) {
    let n = keys.len();
    for k in keys {
        group.push(k);
    }
    if n >= 3 {
        group.unknown = Some((n - 3) as u32);
        group.nil = Some((n - 2) as u32);
        group.root = Some((n - 1) as u32);
    }
}

fn load_label_sentinels(group: &mut Group, keys: Vec<String>) {
    let n = keys.len();
    for k in keys {
        group.push(k);
    }
    if n >= 2 {
        group.root = Some((n - 2) as u32);
        group.nil = Some((n - 1) as u32);
    }
}

fn load_dynamic_sentinel(group: &mut Group, keys: Vec<String>) {
    let n = keys.len();
    for k in keys {
        group.push(k);
    }
    if n >= 1 {
        group.unknown = Some((n - 1) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> Dictionary {
        Dictionary::build_static(
            vec!["the", "cat", "sat", "the"].into_iter().map(String::from),
            vec!["DT", "NN", "VB"].into_iter().map(String::from),
            std::iter::empty(),
            vec!["det", "nsubj"].into_iter().map(String::from),
            "root",
            1,
        )
    }

    #[test]
    fn groups_are_contiguous_and_offsets_increase() {
        let dict = build();
        assert_eq!(dict.words.offset, 0);
        assert_eq!(dict.pos.offset, dict.words.size);
        assert_eq!(dict.labels.offset, dict.pos.offset + dict.pos.size);
    }

    #[test]
    fn root_label_is_second_to_last() {
        let dict = build();
        assert_eq!(
            dict.root_label_index(),
            dict.labels.offset + dict.labels.size - 2
        );
        assert_eq!(dict.nil_label(), dict.labels.offset + dict.labels.size - 1);
    }

    #[test]
    fn unknown_word_falls_back() {
        let dict = build();
        let unk = dict.word_id("zzz-not-present");
        assert_eq!(unk, dict.words.global(dict.words.unknown.unwrap()));
    }

    #[test]
    fn sentinels_are_last_three_of_word_group() {
        let dict = build();
        let size = dict.words.size;
        assert_eq!(dict.words.unknown.unwrap(), size - 3);
        assert_eq!(dict.words.nil.unwrap(), size - 2);
        assert_eq!(dict.words.root.unwrap(), size - 1);
    }
}
