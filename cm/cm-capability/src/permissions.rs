use core::fmt;

/// Capability permission bits.
///
/// Layout (LSB→MSB):
/// - bit 0: load data
/// - bit 1: store data
/// - bit 2: execute
/// - bit 3: load capabilities
/// - bit 4: store capabilities
/// - bit 5: store local (non-global) capabilities
/// - bit 6: global (may be stored anywhere)
/// - bit 7: system (manager-only register access)
/// - bit 8: executive (runs in the manager's mode)
/// - bits 9..31: reserved
#[bitfield_struct::bitfield(u32)]
#[derive(Eq, PartialEq, Hash)]
pub struct Permissions {
    #[bits(1)]
    pub load: bool,
    #[bits(1)]
    pub store: bool,
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub load_cap: bool,
    #[bits(1)]
    pub store_cap: bool,
    #[bits(1)]
    pub store_local_cap: bool,
    #[bits(1)]
    pub global: bool,
    #[bits(1)]
    pub system: bool,
    #[bits(1)]
    pub executive: bool,
    #[bits(23)]
    __: u32,
}

impl Permissions {
    /// Every defined permission.
    pub const ALL: Self = Self::from_bits(0x1ff);

    /// Set intersection.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() & other.into_bits())
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 9] = [
            "load",
            "store",
            "execute",
            "load_cap",
            "store_cap",
            "store_local_cap",
            "global",
            "system",
            "executive",
        ];

        f.write_str("{")?;
        let mut first = true;
        for (bit, name) in NAMES.iter().enumerate() {
            if self.into_bits() & (1 << bit) != 0 {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_has_every_named_bit() {
        let all = Permissions::ALL;
        assert!(all.load() && all.store() && all.execute());
        assert!(all.load_cap() && all.store_cap() && all.store_local_cap());
        assert!(all.global() && all.system() && all.executive());
    }

    #[test]
    fn intersection_never_adds() {
        let rw = Permissions::new().with_load(true).with_store(true);
        let rx = Permissions::new().with_load(true).with_execute(true);
        assert_eq!(rw.intersect(rx), Permissions::new().with_load(true));
        assert_eq!(Permissions::ALL.intersect(rw), rw);
        assert_eq!(rw.intersect(Permissions::new()), Permissions::new());
    }

    #[test]
    fn display_lists_names() {
        let p = Permissions::new().with_execute(true).with_global(true);
        assert_eq!(format!("{p}"), "{execute, global}");
        assert_eq!(format!("{}", Permissions::new()), "{}");
    }
}
