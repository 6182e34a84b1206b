//! Field-number allocation.
//!
//! An [`Indexer`] hands out protobuf field numbers in ascending order while
//! skipping every reserved value. Reservations below the allocator's start
//! are out of allocatable space and silently dropped; ranges straddling the
//! start are clipped.

use crate::decl::ReservedEntry;
use std::fmt;
use std::ops::RangeInclusive;

/// Numbers Google reserves for the protobuf implementation itself.
pub const GOOGLE_RESERVED: RangeInclusive<i64> = 1900..=1999;

/// A reserved single number or inclusive range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reservation {
    /// One number
    Single(i64),
    /// An inclusive range of numbers
    Range(RangeInclusive<i64>),
}

impl Reservation {
    /// Lowest and highest reserved number
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            Reservation::Single(n) => (*n, *n),
            Reservation::Range(r) => (*r.start(), *r.end()),
        }
    }
}

impl From<i64> for Reservation {
    fn from(value: i64) -> Self {
        Reservation::Single(value)
    }
}

impl From<RangeInclusive<i64>> for Reservation {
    fn from(value: RangeInclusive<i64>) -> Self {
        Reservation::Range(value)
    }
}

/// Allocator of unique field numbers
#[derive(Debug, Clone)]
pub struct Indexer {
    start: i64,
    counter: i64,
    /// Clipped intervals in reservation order
    reserved: Vec<(i64, i64)>,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Indexer {
    /// Creates an allocator whose lowest assignable number is `start`
    pub fn new(start: i64) -> Self {
        Self {
            start,
            counter: start,
            reserved: Vec::new(),
        }
    }

    /// Creates an allocator with an initial set of reservations
    pub fn with_reserved<I, R>(start: i64, idxs: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Reservation>,
    {
        let mut indexer = Self::new(start);
        for idx in idxs {
            indexer.reserve(idx);
        }
        indexer
    }

    /// Lowest assignable number
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Next candidate the allocator will try
    pub fn current(&self) -> i64 {
        self.counter
    }

    /// Reserves a number or an inclusive range.
    ///
    /// Reserving something twice leaves the reserved set unchanged.
    pub fn reserve(&mut self, idx: impl Into<Reservation>) {
        let (lo, hi) = idx.into().bounds();
        if hi < self.start {
            return;
        }
        let lo = lo.max(self.start);
        if hi >= lo {
            self.reserved.push((lo, hi));
        }
    }

    /// True when `number` is reserved
    pub fn contains(&self, number: i64) -> bool {
        self.reserved
            .iter()
            .any(|&(lo, hi)| lo <= number && number <= hi)
    }

    /// Returns the smallest free number at or above the counter and moves
    /// the counter past it. No two calls return the same number.
    pub fn allocate(&mut self) -> i64 {
        let mut i = self.counter;
        while let Some(&(_, hi)) = self
            .reserved
            .iter()
            .find(|&&(lo, hi)| lo <= i && i <= hi)
        {
            i = hi.saturating_add(1);
        }
        self.counter = i.saturating_add(1);
        i
    }

    /// Reserved numbers coalesced into a minimal ordered list of singles
    /// and contiguous ranges
    pub fn merged(&self) -> Vec<Reservation> {
        let mut intervals = self.reserved.clone();
        intervals.sort_unstable();

        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(intervals.len());
        for (lo, hi) in intervals {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }

        merged
            .into_iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    Reservation::Single(lo)
                } else {
                    Reservation::Range(lo..=hi)
                }
            })
            .collect()
    }

    /// Every reserved number, ascending
    pub fn reserved(&self) -> Vec<i64> {
        self.merged()
            .into_iter()
            .flat_map(|r| {
                let (lo, hi) = r.bounds();
                lo..=hi
            })
            .collect()
    }
}

impl Iterator for Indexer {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        Some(self.allocate())
    }
}

impl fmt::Display for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_reservations(&self.merged()))
    }
}

/// Renders merged reservations as `a,b,c to d`; two-element ranges are
/// written as two singles.
pub(crate) fn format_reservations(items: &[Reservation]) -> String {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Reservation::Single(n) => parts.push(n.to_string()),
            Reservation::Range(r) if r.end() - r.start() == 1 => {
                parts.push(r.start().to_string());
                parts.push(r.end().to_string());
            }
            Reservation::Range(r) => parts.push(format!("{} to {}", r.start(), r.end())),
        }
    }
    parts.join(",")
}

/// Splits declared reserved entries into numeric reservations and names
pub fn extract_reserveds(entries: &[ReservedEntry]) -> (Vec<Reservation>, Vec<String>) {
    let mut indexes = Vec::new();
    let mut keys = Vec::new();
    for entry in entries {
        match entry {
            ReservedEntry::Index(n) => indexes.push(Reservation::Single(*n)),
            ReservedEntry::Range([lo, hi]) => indexes.push(Reservation::Range(*lo..=*hi)),
            ReservedEntry::Name(name) => keys.push(name.clone()),
        }
    }
    (indexes, keys)
}

/// Renders reserved names as `"a", "b"`
pub fn reserved_keys_str(keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(", ")
}
