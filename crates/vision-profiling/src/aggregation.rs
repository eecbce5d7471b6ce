//! Split-keyed accumulator and histogram merge utilities shared by the
//! feature extractors.

use std::collections::BTreeMap;

use crate::batch::{ClassNameTable, Split};

/// A pair of accumulators, one per split.
///
/// Extractor state for a split is only mutated by updates tagged with that
/// split; the sibling slice stays untouched.
#[derive(Debug, Clone, Default)]
pub struct SplitKeyed<T> {
    train: T,
    val: T,
}

impl<T> SplitKeyed<T> {
    pub fn get(&self, split: Split) -> &T {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        }
    }

    pub fn get_mut(&mut self, split: Split) -> &mut T {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
        }
    }
}

/// An ordered histogram. `BTreeMap` keeps key order deterministic so that
/// parallel and sequential runs aggregate identically.
pub type Histogram<K> = BTreeMap<K, f64>;

/// Add `weight` to a histogram bin.
pub fn bump<K: Ord>(hist: &mut Histogram<K>, key: K, weight: f64) {
    *hist.entry(key).or_insert(0.0) += weight;
}

/// Union the key sets of two histograms, filling missing keys with zero.
///
/// Applied before train/val comparison so both splits plot over the same
/// bins.
pub fn union_zero_fill<K: Ord + Clone>(a: &mut Histogram<K>, b: &mut Histogram<K>) {
    for key in a.keys().cloned().collect::<Vec<_>>() {
        b.entry(key).or_insert(0.0);
    }
    for key in b.keys().cloned().collect::<Vec<_>>() {
        a.entry(key).or_insert(0.0);
    }
}

/// Normalize values to fractions of their total. An all-zero or empty
/// histogram is returned unchanged.
pub fn normalized<K: Ord + Clone>(hist: &Histogram<K>) -> Histogram<K> {
    let total: f64 = hist.values().sum();
    if total == 0.0 {
        return hist.clone();
    }
    hist.iter().map(|(k, v)| (k.clone(), v / total)).collect()
}

/// Resolve a class-id-keyed histogram into parallel name/value columns,
/// preserving class-id order.
pub fn to_named_columns(
    hist: &Histogram<i64>,
    table: &ClassNameTable,
) -> (Vec<String>, Vec<f64>) {
    let mut names = Vec::with_capacity(hist.len());
    let mut values = Vec::with_capacity(hist.len());
    for (class_id, value) in hist {
        names.push(table.name_of(*class_id));
        values.push(*value);
    }
    (names, values)
}

/// A histogram seeded with all analyzed class ids at zero, so every class
/// shows up in the aggregate even when it never occurs in the data.
pub fn seeded_class_histogram(table: &ClassNameTable) -> Histogram<i64> {
    table.used_ids().into_iter().map(|id| (id, 0.0)).collect()
}
