//! `Series` is the one data shape every reference in the engine resolves to:
//! a dense, period-indexed vector of `f64`. Every array in the reference map
//! has exactly `P` entries, one per monthly period (see the timeline).

use std::ops::{Deref, DerefMut, Index, IndexMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A dense array of period-indexed values, always of length `P` for a given run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Series(Vec<f64>);

impl Series {
    /// An all-zero array of the given length.
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// An all-one array of the given length (the `I1` identity index).
    pub fn ones(len: usize) -> Self {
        Self(vec![1.0; len])
    }

    /// Broadcast a single scalar across every period.
    pub fn broadcast(value: f64, len: usize) -> Self {
        Self(vec![value; len])
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `t`, or `0.0` if `t` is out of range (mirrors the "missing
    /// reference resolves to zero" rule used throughout the formula language).
    pub fn get(&self, t: usize) -> f64 {
        self.0.get(t).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, t: usize, value: f64) {
        if let Some(slot) = self.0.get_mut(t) {
            *slot = value;
        }
    }

    /// Elementwise sum, used when collapsing an input group's member arrays
    /// into its subtotal reference.
    pub fn sum_into(arrays: impl IntoIterator<Item = impl AsRef<Series>>, len: usize) -> Self {
        let mut out = Self::zeros(len);
        for arr in arrays {
            for (o, v) in out.0.iter_mut().zip(arr.as_ref().as_slice()) {
                *o += v;
            }
        }
        out
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self(self.0.iter().map(|&v| f(v)).collect())
    }
}

impl AsRef<Series> for Series {
    fn as_ref(&self) -> &Series {
        self
    }
}

impl Deref for Series {
    type Target = [f64];
    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl DerefMut for Series {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.0
    }
}

impl Index<usize> for Series {
    type Output = f64;
    fn index(&self, t: usize) -> &f64 {
        &self.0[t]
    }
}

impl IndexMut<usize> for Series {
    fn index_mut(&mut self, t: usize) -> &mut f64 {
        &mut self.0[t]
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl FromIterator<f64> for Series {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
