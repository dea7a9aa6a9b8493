//! Transaction and commit identifiers.

use std::fmt;

/// Identifier of an in-flight transaction, also used as a slot's owner field.
///
/// Two values are reserved: [`TxnId::INVALID`] marks a slot that holds no
/// live version, [`TxnId::UNLOCKED`] marks a stable version nobody owns.
/// Live transaction ids are assigned from [`TxnId::FIRST`] upwards and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Owner of an uninitialized or dead slot.
    pub const INVALID: Self = Self(0);

    /// Owner of a published version that no transaction holds.
    pub const UNLOCKED: Self = Self(1);

    /// First id handed out to a real transaction.
    pub const FIRST: Self = Self(2);

    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this id names a live transaction rather than a sentinel.
    #[must_use]
    pub const fn is_live(self) -> bool {
        self.0 >= Self::FIRST.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => f.write_str("txn:invalid"),
            Self::UNLOCKED => f.write_str("txn:unlocked"),
            Self(id) => write!(f, "txn:{id}"),
        }
    }
}

/// A point on the global commit timeline.
///
/// Commit ids stamp snapshot reads and version publish points. They are
/// strictly increasing and each one is drawn exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(pub u64);

impl CommitId {
    /// Tombstone end marker; never part of the timeline.
    pub const INVALID: Self = Self(0);

    /// Open end of a visibility interval ("not yet committed" as a begin).
    pub const INFINITY: Self = Self(u64::MAX);

    /// Creates a commit id.
    #[must_use]
    pub const fn new(cid: u64) -> Self {
        Self(cid)
    }

    /// Returns the raw commit id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following commit id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if `ts` falls inside the half-open interval `[begin, end)`.
    #[must_use]
    pub fn within(ts: Self, begin: Self, end: Self) -> bool {
        begin <= ts && ts < end
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => f.write_str("cid:invalid"),
            Self::INFINITY => f.write_str("cid:inf"),
            Self(cid) => write!(f, "cid:{cid}"),
        }
    }
}
