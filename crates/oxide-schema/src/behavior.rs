//! Synchronization behavior flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign, Sub};

/// Set of schema operations a synchronization pass is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Behavior(u16);

impl Behavior {
    /// No operation at all.
    pub const NONE: Self = Self(0);
    /// Drop foreign keys.
    pub const DROP_FOREIGNS: Self = Self(1);
    /// Create foreign keys.
    pub const CREATE_FOREIGNS: Self = Self(1 << 1);
    /// Alter foreign keys.
    pub const ALTER_FOREIGNS: Self = Self(1 << 2);
    /// Drop indexes.
    pub const DROP_INDEXES: Self = Self(1 << 3);
    /// Create indexes.
    pub const CREATE_INDEXES: Self = Self(1 << 4);
    /// Alter indexes.
    pub const ALTER_INDEXES: Self = Self(1 << 5);
    /// Drop columns.
    pub const DROP_COLUMNS: Self = Self(1 << 6);
    /// Create columns (and tables).
    pub const CREATE_COLUMNS: Self = Self(1 << 7);
    /// Alter columns.
    pub const ALTER_COLUMNS: Self = Self(1 << 8);
    /// Rename the table.
    pub const RENAME: Self = Self(1 << 9);
    /// Drop the table.
    pub const DROP: Self = Self(1 << 10);
    /// Everything.
    pub const ALL: Self = Self(0x7ff);

    const NAMES: [(Self, &'static str); 11] = [
        (Self::DROP_FOREIGNS, "drop-foreigns"),
        (Self::CREATE_FOREIGNS, "create-foreigns"),
        (Self::ALTER_FOREIGNS, "alter-foreigns"),
        (Self::DROP_INDEXES, "drop-indexes"),
        (Self::CREATE_INDEXES, "create-indexes"),
        (Self::ALTER_INDEXES, "alter-indexes"),
        (Self::DROP_COLUMNS, "drop-columns"),
        (Self::CREATE_COLUMNS, "create-columns"),
        (Self::ALTER_COLUMNS, "alter-columns"),
        (Self::RENAME, "rename"),
        (Self::DROP, "drop"),
    ];

    /// Whether every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether at least one flag of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Behavior {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Behavior {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Sub for Behavior {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("all");
        }
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_contains_every_flag() {
        for (flag, _) in Behavior::NAMES {
            assert!(Behavior::ALL.contains(flag));
        }
        assert!(Behavior::ALL.contains(Behavior::NONE));
    }

    #[test]
    fn test_combinations() {
        let passes = Behavior::DROP_FOREIGNS | Behavior::DROP_INDEXES;
        assert!(passes.contains(Behavior::DROP_INDEXES));
        assert!(!passes.contains(Behavior::DROP_COLUMNS));
        assert!(passes.intersects(Behavior::DROP_FOREIGNS | Behavior::DROP));

        let without_drop = Behavior::ALL - Behavior::DROP;
        assert!(!without_drop.contains(Behavior::DROP));
        assert!(without_drop.contains(Behavior::RENAME));
    }

    #[test]
    fn test_display() {
        assert_eq!(Behavior::ALL.to_string(), "all");
        assert_eq!(Behavior::NONE.to_string(), "none");
        assert_eq!(
            (Behavior::DROP_FOREIGNS | Behavior::DROP_INDEXES).to_string(),
            "drop-foreigns|drop-indexes"
        );
    }
}
