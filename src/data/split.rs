use ndarray::{Array, Axis, Dimension, RemoveAxis};

use crate::config::HOLDOUT_STRIDE;

/// 0-based positions routed to validation out of `n` training items: 0, 10, 20, ...
pub fn holdout_indices(n: usize) -> Vec<usize> {
    (0..n).step_by(HOLDOUT_STRIDE).collect()
}

/// Complement of [`holdout_indices`], in ascending order
pub fn training_indices(n: usize) -> Vec<usize> {
    (0..n).filter(|i| !is_holdout(*i)).collect()
}

pub fn is_holdout(index: usize) -> bool {
    index % HOLDOUT_STRIDE == 0
}

/// Split an ordered list into (train, val), preserving relative order in both.
pub fn split_holdout<T>(items: Vec<T>) -> (Vec<T>, Vec<T>) {
    let mut train = Vec::with_capacity(items.len());
    let mut val = Vec::with_capacity(items.len().div_ceil(HOLDOUT_STRIDE));
    for (i, item) in items.into_iter().enumerate() {
        if is_holdout(i) {
            val.push(item);
        } else {
            train.push(item);
        }
    }
    (train, val)
}

/// Same rule as [`split_holdout`], applied along the first axis of an array.
pub fn split_holdout_axis0<A, D>(array: &Array<A, D>) -> (Array<A, D>, Array<A, D>)
where
    A: Clone,
    D: Dimension + RemoveAxis,
{
    let n = array.len_of(Axis(0));
    let train = array.select(Axis(0), &training_indices(n));
    let val = array.select(Axis(0), &holdout_indices(n));
    (train, val)
}
