//! Cache of coupling tensors.
//!
//! A [`CouplingCache`] is created by the caller (typically once per process
//! or per model) and lent to every tensor-product constructor. Entries are
//! computed on first request and never change afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::clebsch::CouplingTensor;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct CouplingCache {
    entries: RefCell<FxHashMap<(u32, u32, u32), Rc<CouplingTensor>>>,
}

impl CouplingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coupling tensor for `(l1, l2, l3)`, computed at most once.
    pub fn coupling(&self, l1: u32, l2: u32, l3: u32) -> Result<Rc<CouplingTensor>> {
        let key = (l1, l2, l3);
        if let Some(hit) = self.entries.borrow().get(&key) {
            return Ok(Rc::clone(hit));
        }

        let computed = Rc::new(CouplingTensor::compute(l1, l2, l3)?);
        debug!(l1, l2, l3, nonzeros = computed.nonzeros().len(), "computed coupling tensor");

        let mut entries = self.entries.borrow_mut();
        Ok(Rc::clone(entries.entry(key).or_insert(computed)))
    }

    /// Whether `(l1, l2, l3)` has already been computed.
    pub fn contains(&self, l1: u32, l2: u32, l3: u32) -> bool {
        self.entries.borrow().contains_key(&(l1, l2, l3))
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TpError;

    #[test]
    fn test_repeated_requests_share_the_entry() {
        let cache = CouplingCache::new();
        assert!(cache.is_empty());

        let a = cache.coupling(1, 2, 2).unwrap();
        let b = cache.coupling(1, 2, 2).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1, 2, 2));
        assert!(!cache.contains(2, 1, 2));
    }

    #[test]
    fn test_invalid_triple_is_not_cached() {
        let cache = CouplingCache::new();
        let err = cache.coupling(0, 0, 1).unwrap_err();
        assert!(matches!(err, TpError::Domain { .. }));
        assert!(cache.is_empty());
    }
}
