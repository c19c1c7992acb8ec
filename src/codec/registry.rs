use std::collections::BTreeMap;

use crate::error::{DemuxError, Result};

/// Parameter sets of one category keyed by their id.
///
/// Registering an id that is already present replaces the old set, which
/// is how parameter set updates inside a stream behave.
#[derive(Debug, Clone)]
pub struct ParameterSetRegistry<T> {
    kind: &'static str,
    sets: BTreeMap<u32, T>,
}

impl<T> ParameterSetRegistry<T> {
    /// `kind` names the category in errors, e.g. `"SPS"`.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            sets: BTreeMap::new(),
        }
    }

    /// Stores `value` under `id`, returning the replaced set.
    pub fn register(&mut self, id: u32, value: T) -> Option<T> {
        let old = self.sets.insert(id, value);
        if old.is_some() {
            log::debug!("{} {} replaced", self.kind, id);
        }
        old
    }

    pub fn lookup(&self, id: u32) -> Option<&T> {
        self.sets.get(&id)
    }

    /// Like [`lookup`](Self::lookup) but fails with `MissingParameterSet`.
    pub fn require(&self, id: u32) -> Result<&T> {
        self.sets.get(&id).ok_or(DemuxError::MissingParameterSet {
            kind: self.kind,
            id,
        })
    }

    /// The set with the lowest id
    pub fn first(&self) -> Option<&T> {
        self.sets.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.sets.iter().map(|(&id, v)| (id, v))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}
