//! Representation descriptors.
//!
//! An `Rs` is a direct sum of irreps written as a list of
//! `(multiplicity, degree, parity)` entries. Components are laid out entry
//! by entry, channel by channel, with the `2l+1` components of one channel
//! contiguous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TpError};

/// One `(mul, l, parity)` entry of a descriptor.
///
/// Parity is `+1` (even), `-1` (odd) or `0` (not tracked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RsEntry {
    pub mul: usize,
    pub l: u32,
    pub parity: i8,
}

impl RsEntry {
    pub fn new(mul: usize, l: u32, parity: i8) -> Result<Self> {
        if !(-1..=1).contains(&parity) {
            return Err(TpError::config(format!(
                "parity must be -1, 0 or 1, got {parity} in entry ({mul}, {l})"
            )));
        }
        Ok(Self { mul, l, parity })
    }

    /// Dimension of one copy of the irrep, `2l + 1`.
    pub fn irrep_dim(&self) -> usize {
        2 * self.l as usize + 1
    }

    /// Dimension of the whole entry.
    pub fn dim(&self) -> usize {
        self.mul * self.irrep_dim()
    }
}

impl fmt::Display for RsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = match self.parity {
            1 => "e",
            -1 => "o",
            _ => "",
        };
        write!(f, "{}x{}{}", self.mul, self.l, p)
    }
}

/// Representation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rs(Vec<RsEntry>);

impl Rs {
    pub fn new(entries: Vec<RsEntry>) -> Self {
        Self(entries)
    }

    /// Entries `(mul, l)` without parity.
    pub fn from_pairs(pairs: &[(usize, u32)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|&(mul, l)| RsEntry { mul, l, parity: 0 })
                .collect(),
        )
    }

    /// Entries `(mul, l, parity)`.
    pub fn from_triples(triples: &[(usize, u32, i8)]) -> Result<Self> {
        triples
            .iter()
            .map(|&(mul, l, p)| RsEntry::new(mul, l, p))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// One channel of each degree, e.g. `[1, 2]` is `1x1 + 1x2`.
    pub fn from_degrees(degrees: &[u32]) -> Self {
        Self(
            degrees
                .iter()
                .map(|&l| RsEntry { mul: 1, l, parity: 0 })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[RsEntry] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RsEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of components, `Σ mul · (2l + 1)`.
    pub fn dim(&self) -> usize {
        self.0.iter().map(RsEntry::dim).sum()
    }

    /// Total number of channels, `Σ mul`.
    pub fn mul_dim(&self) -> usize {
        self.0.iter().map(|e| e.mul).sum()
    }

    pub fn lmax(&self) -> Option<u32> {
        self.0.iter().map(|e| e.l).max()
    }

    /// Offset of the first component of every entry.
    pub fn offsets(&self) -> Vec<usize> {
        self.0
            .iter()
            .scan(0, |acc, e| {
                let start = *acc;
                *acc += e.dim();
                Some(start)
            })
            .collect()
    }

    /// Merge consecutive entries with the same degree and parity and drop
    /// empty ones. The component layout is unchanged.
    pub fn simplify(&self) -> Rs {
        let mut out: Vec<RsEntry> = Vec::with_capacity(self.0.len());
        for e in self.0.iter().filter(|e| e.mul > 0) {
            match out.last_mut() {
                Some(last) if last.l == e.l && last.parity == e.parity => last.mul += e.mul,
                _ => out.push(*e),
            }
        }
        Rs(out)
    }

    /// Stable sort by `(l, parity)`.
    ///
    /// Returns the sorted descriptor and, for every component of the sorted
    /// layout, the index of the component it comes from.
    pub fn sort(&self) -> (Rs, Vec<usize>) {
        let offsets = self.offsets();
        let mut order: Vec<usize> = (0..self.0.len()).collect();
        order.sort_by_key(|&i| (self.0[i].l, self.0[i].parity));

        let mut perm = Vec::with_capacity(self.dim());
        for &i in &order {
            perm.extend(offsets[i]..offsets[i] + self.0[i].dim());
        }
        let sorted = Rs(order.iter().map(|&i| self.0[i]).collect());
        (sorted, perm)
    }
}

impl std::ops::Index<usize> for Rs {
    type Output = RsEntry;

    fn index(&self, index: usize) -> &RsEntry {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Rs {
    type Item = &'a RsEntry;
    type IntoIter = std::slice::Iter<'a, RsEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Rs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl FromStr for Rs {
    type Err = TpError;

    /// Parse `"20x1o + 4x2e + 3"`: `e`/`o` mark even/odd parity, a bare
    /// degree means multiplicity one.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Rs::default());
        }
        s.split('+').map(parse_entry).collect::<Result<Vec<_>>>().map(Rs)
    }
}

fn parse_entry(term: &str) -> Result<RsEntry> {
    let term = term.trim();
    let bad = || TpError::config(format!("invalid representation term '{term}'"));

    let (mul, irrep) = match term.split_once('x') {
        Some((mul, irrep)) => (mul.trim().parse::<usize>().map_err(|_| bad())?, irrep.trim()),
        None => (1, term),
    };
    let (degree, parity) = match irrep.chars().last() {
        Some('e') => (&irrep[..irrep.len() - 1], 1),
        Some('o') => (&irrep[..irrep.len() - 1], -1),
        _ => (irrep, 0),
    };
    let l = degree.parse::<u32>().map_err(|_| bad())?;
    RsEntry::new(mul, l, parity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_and_offsets() {
        let rs = Rs::from_pairs(&[(20, 1), (4, 2)]);
        assert_eq!(rs.dim(), 20 * 3 + 4 * 5);
        assert_eq!(rs.mul_dim(), 24);
        assert_eq!(rs.offsets(), vec![0, 60]);
        assert_eq!(rs.lmax(), Some(2));
    }

    #[test]
    fn test_simplify_merges_consecutive_entries() {
        let mut pairs = vec![(1, 1); 20];
        pairs.extend(vec![(1, 2); 4]);
        pairs.push((0, 3));
        let rs = Rs::from_pairs(&pairs).simplify();
        assert_eq!(rs, Rs::from_pairs(&[(20, 1), (4, 2)]));

        // Non-adjacent entries stay apart.
        let rs = Rs::from_degrees(&[0, 1, 0]).simplify();
        assert_eq!(rs.len(), 3);
    }

    #[test]
    fn test_parse_and_display() {
        let rs: Rs = "20x1o + 4x2e + 3".parse().unwrap();
        assert_eq!(
            rs,
            Rs::from_triples(&[(20, 1, -1), (4, 2, 1), (1, 3, 0)]).unwrap()
        );
        assert_eq!(rs.to_string(), "20x1o + 4x2e + 1x3");
        assert_eq!(rs.to_string().parse::<Rs>().unwrap(), rs);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("2xq".parse::<Rs>().is_err());
        assert!("ax1".parse::<Rs>().is_err());
        assert!("1 + ".parse::<Rs>().is_err());
    }

    #[test]
    fn test_invalid_parity() {
        assert!(Rs::from_triples(&[(1, 0, 2)]).is_err());
    }

    #[test]
    fn test_sort_permutation() {
        let rs = Rs::from_pairs(&[(1, 1), (2, 0)]);
        let (sorted, perm) = rs.sort();
        assert_eq!(sorted, Rs::from_pairs(&[(2, 0), (1, 1)]));
        assert_eq!(perm, vec![3, 4, 0, 1, 2]);
    }
}
