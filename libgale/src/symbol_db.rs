//! The process-wide symbol table. Interning maps each distinct name to exactly one `Symbol`
//! record, no matter how many files reference it or how many threads are parsing at once. The
//! record owns identity only; the resolution outcome lives behind the record's own lock and is
//! written by whichever files win the arbitration in `resolution`.

use crate::hash::PassThroughHashMap;
use crate::hash::PreHashed;
use crate::input_data::FileId;
use crate::input_section::SubsectionId;
use crate::symbol::SymbolName;
use bumpalo_herd::Herd;
use std::fmt::Display;
use std::sync::Mutex;
use std::sync::MutexGuard;

const BUCKET_BITS: u32 = 6;
const NUM_BUCKETS: usize = 1 << BUCKET_BITS;

/// A concurrent map from symbol name to interned `Symbol`. Sharded into buckets by name hash so
/// that parallel parsing mostly doesn't contend; records themselves are allocated from the herd
/// and live as long as the link.
pub struct SymbolDb<'data> {
    buckets: Vec<Mutex<PassThroughHashMap<SymbolName<'data>, &'data Symbol<'data>>>>,
    herd: &'data Herd,
}

/// A globally unique named entity. Created on first reference, mutated under its own lock by
/// whichever file resolves it.
pub struct Symbol<'data> {
    name: PreHashed<SymbolName<'data>>,
    state: Mutex<SymbolState>,
}

/// The resolution outcome for a symbol. All fields are guarded by the symbol's lock and are only
/// ever overwritten together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolState {
    /// The file that currently owns the definition. `None` means no definition has been found
    /// yet.
    pub file: Option<FileId>,

    /// The subsection the definition lives in. `None` for absolute symbols and for dylib
    /// exports.
    pub subsection: Option<SubsectionId>,

    /// For a section-defined symbol, the offset within `subsection`; for an absolute symbol, the
    /// raw value.
    pub value: u64,

    pub is_extern: bool,

    /// Whether the owning definition came from a lazily-loaded archive member.
    pub is_lazy: bool,
}

impl<'data> SymbolDb<'data> {
    pub fn new(herd: &'data Herd) -> Self {
        Self {
            buckets: (0..NUM_BUCKETS).map(|_| Mutex::default()).collect(),
            herd,
        }
    }

    /// Returns the unique `Symbol` record for `bytes`, creating it if this is the first
    /// reference. Safe to call concurrently from parsing workers.
    pub(crate) fn intern(&self, bytes: &'data [u8]) -> &'data Symbol<'data> {
        let name = SymbolName::prehashed(bytes);
        let mut bucket = self.buckets[bucket_index(name.hash())].lock().unwrap();
        *bucket
            .entry(name)
            .or_insert_with(|| self.herd.get().alloc(Symbol::new(name)))
    }

    #[must_use]
    pub fn get(&self, bytes: &'data [u8]) -> Option<&'data Symbol<'data>> {
        let name = SymbolName::prehashed(bytes);
        self.buckets[bucket_index(name.hash())]
            .lock()
            .unwrap()
            .get(&name)
            .copied()
    }

    #[must_use]
    pub fn num_symbols(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().unwrap().len()).sum()
    }

    pub fn for_each_symbol(&self, mut callback: impl FnMut(&'data Symbol<'data>)) {
        for bucket in &self.buckets {
            for symbol in bucket.lock().unwrap().values() {
                callback(symbol);
            }
        }
    }
}

fn bucket_index(hash: u64) -> usize {
    (hash >> (u64::BITS - BUCKET_BITS)) as usize
}

impl<'data> Symbol<'data> {
    fn new(name: PreHashed<SymbolName<'data>>) -> Self {
        Self {
            name,
            state: Mutex::new(SymbolState::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> SymbolName<'data> {
        *self.name
    }

    /// A copy of the current resolution state. Use `lock` instead when comparing and updating.
    #[must_use]
    pub fn state(&self) -> SymbolState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SymbolState> {
        self.state.lock().unwrap()
    }
}

impl Display for Symbol<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.name(), f)
    }
}

impl std::fmt::Debug for Symbol<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
