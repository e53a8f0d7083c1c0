//! Logical flag identities and the per-branch tables translating them to bit
//! positions. Unreal re-numbered flag bits across generations (Cooked is bit
//! 3 on UE3 package flags and bit 9 on UE4), so a naive cast of a logical
//! flag is wrong; every lookup goes through the owning branch's map.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFlag {
    AllowDownload,
    ClientOptional,
    ServerSideOnly,
    Cooked,
    ContainsMap,
    ContainsScript,
    ContainsDebugInfo,
    StoreCompressed,
    StoreFullyCompressed,
    FilterEditorOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFlag {
    Transactional,
    Public,
    Standalone,
    Native,
    Transient,
    LoadForClient,
    LoadForServer,
    LoadForEdit,
    HasStack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyFlag {
    Edit,
    Const,
    Net,
    Transient,
    Config,
    Localized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFlag {
    Abstract,
    Compiled,
    Config,
    Transient,
    Placeable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionFlag {
    Final,
    Defined,
    Native,
    Event,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructFlag {
    Native,
    Export,
    Atomic,
}

/// Logical flag -> bit table. Partial by design: a flag that does not exist
/// in a generation is simply absent.
#[derive(Debug)]
pub struct FlagMap<F: Copy + PartialEq + 'static> {
    entries: &'static [(F, u64)],
}

impl<F: Copy + PartialEq + 'static> FlagMap<F> {
    pub const fn new(entries: &'static [(F, u64)]) -> Self {
        Self { entries }
    }

    pub fn bit(&self, flag: F) -> Option<u64> {
        self.entries.iter().find(|(f, _)| *f == flag).map(|(_, bit)| *bit)
    }

    pub fn has(&self, raw: u64, flag: F) -> bool {
        self.bit(flag).is_some_and(|bit| raw & bit != 0)
    }

    pub fn set(&self, raw: u64, flag: F) -> u64 {
        self.bit(flag).map_or(raw, |bit| raw | bit)
    }

    /// Re-encodes the flags of `raw` that this map knows into `target`'s bit
    /// positions, dropping flags the target generation does not have.
    pub fn translate(&self, target: &FlagMap<F>, raw: u64) -> u64 {
        let mut out = 0;
        for (flag, bit) in self.entries {
            if raw & bit != 0
                && let Some(target_bit) = target.bit(*flag)
            {
                out |= target_bit;
            }
        }
        out
    }
}

/// The full flag-map surface a branch owns, one table per flag enum.
#[derive(Debug)]
pub struct FlagMaps {
    pub package: FlagMap<PackageFlag>,
    pub object: FlagMap<ObjectFlag>,
    pub property: FlagMap<PropertyFlag>,
    pub class: FlagMap<ClassFlag>,
    pub function: FlagMap<FunctionFlag>,
    pub struct_flags: FlagMap<StructFlag>,
}

/// UE1/UE2 bit assignments. Object flags live in the low dword.
pub static UE2_FLAG_MAPS: FlagMaps = FlagMaps {
    package: FlagMap::new(&[
        (PackageFlag::AllowDownload, 0x0001),
        (PackageFlag::ClientOptional, 0x0002),
        (PackageFlag::ServerSideOnly, 0x0004),
    ]),
    object: FlagMap::new(&[
        (ObjectFlag::Transactional, 0x0000_0001),
        (ObjectFlag::Public, 0x0000_0004),
        (ObjectFlag::Transient, 0x0000_4000),
        (ObjectFlag::LoadForClient, 0x0001_0000),
        (ObjectFlag::LoadForServer, 0x0002_0000),
        (ObjectFlag::LoadForEdit, 0x0004_0000),
        (ObjectFlag::Standalone, 0x0008_0000),
        (ObjectFlag::HasStack, 0x0200_0000),
        (ObjectFlag::Native, 0x0400_0000),
    ]),
    property: FlagMap::new(&[
        (PropertyFlag::Edit, 0x0001),
        (PropertyFlag::Const, 0x0002),
        (PropertyFlag::Net, 0x0020),
        (PropertyFlag::Transient, 0x2000),
        (PropertyFlag::Config, 0x4000),
        (PropertyFlag::Localized, 0x8000),
    ]),
    class: FlagMap::new(&[
        (ClassFlag::Abstract, 0x0001),
        (ClassFlag::Compiled, 0x0002),
        (ClassFlag::Config, 0x0004),
        (ClassFlag::Transient, 0x0008),
        (ClassFlag::Placeable, 0x0200),
    ]),
    function: FlagMap::new(&[
        (FunctionFlag::Final, 0x0001),
        (FunctionFlag::Defined, 0x0002),
        (FunctionFlag::Native, 0x0400),
        (FunctionFlag::Event, 0x0800),
        (FunctionFlag::Static, 0x2000),
    ]),
    struct_flags: FlagMap::new(&[(StructFlag::Native, 0x0001), (StructFlag::Export, 0x0002), (StructFlag::Atomic, 0x0004)]),
};

/// UE3 widened object flags to 64 bits and moved the legacy set into the
/// high dword; package flags gained the cooked-content bits.
pub static UE3_FLAG_MAPS: FlagMaps = FlagMaps {
    package: FlagMap::new(&[
        (PackageFlag::AllowDownload, 0x0000_0001),
        (PackageFlag::ClientOptional, 0x0000_0002),
        (PackageFlag::ServerSideOnly, 0x0000_0004),
        (PackageFlag::Cooked, 0x0000_0008),
        (PackageFlag::ContainsMap, 0x0002_0000),
        (PackageFlag::ContainsScript, 0x0020_0000),
        (PackageFlag::ContainsDebugInfo, 0x0040_0000),
        (PackageFlag::StoreCompressed, 0x0200_0000),
        (PackageFlag::StoreFullyCompressed, 0x0400_0000),
    ]),
    object: FlagMap::new(&[
        (ObjectFlag::Transactional, 0x0000_0001_0000_0000),
        (ObjectFlag::Public, 0x0000_0004_0000_0000),
        (ObjectFlag::Transient, 0x0000_4000_0000_0000),
        (ObjectFlag::LoadForClient, 0x0001_0000_0000_0000),
        (ObjectFlag::LoadForServer, 0x0002_0000_0000_0000),
        (ObjectFlag::LoadForEdit, 0x0004_0000_0000_0000),
        (ObjectFlag::Standalone, 0x0008_0000_0000_0000),
        (ObjectFlag::HasStack, 0x0200_0000_0000_0000),
        (ObjectFlag::Native, 0x0400_0000_0000_0000),
    ]),
    property: FlagMap::new(&[
        (PropertyFlag::Edit, 0x0001),
        (PropertyFlag::Const, 0x0002),
        (PropertyFlag::Net, 0x0020),
        (PropertyFlag::Transient, 0x2000),
        (PropertyFlag::Config, 0x4000),
        (PropertyFlag::Localized, 0x8000),
    ]),
    class: FlagMap::new(&[
        (ClassFlag::Abstract, 0x0001),
        (ClassFlag::Compiled, 0x0002),
        (ClassFlag::Config, 0x0004),
        (ClassFlag::Transient, 0x0008),
        (ClassFlag::Placeable, 0x0200),
    ]),
    function: FlagMap::new(&[
        (FunctionFlag::Final, 0x0001),
        (FunctionFlag::Defined, 0x0002),
        (FunctionFlag::Native, 0x0400),
        (FunctionFlag::Event, 0x0800),
        (FunctionFlag::Static, 0x2000),
    ]),
    struct_flags: FlagMap::new(&[(StructFlag::Native, 0x0001), (StructFlag::Export, 0x0002), (StructFlag::Atomic, 0x0004)]),
};

/// UE4 re-numbered nearly everything; the LoadFor* trio is gone entirely.
pub static UE4_FLAG_MAPS: FlagMaps = FlagMaps {
    package: FlagMap::new(&[
        (PackageFlag::Cooked, 0x0000_0200),
        (PackageFlag::ContainsMap, 0x0000_4000),
        (PackageFlag::ContainsScript, 0x0020_0000),
        (PackageFlag::ContainsDebugInfo, 0x0040_0000),
        (PackageFlag::StoreCompressed, 0x0200_0000),
        (PackageFlag::FilterEditorOnly, 0x8000_0000),
    ]),
    object: FlagMap::new(&[
        (ObjectFlag::Public, 0x0001),
        (ObjectFlag::Standalone, 0x0002),
        (ObjectFlag::Native, 0x0004),
        (ObjectFlag::Transactional, 0x0008),
        (ObjectFlag::Transient, 0x0040),
    ]),
    property: FlagMap::new(&[
        (PropertyFlag::Edit, 0x0001),
        (PropertyFlag::Const, 0x0002),
        (PropertyFlag::Net, 0x0020),
        (PropertyFlag::Transient, 0x2000),
        (PropertyFlag::Config, 0x4000),
    ]),
    class: FlagMap::new(&[
        (ClassFlag::Abstract, 0x0001),
        (ClassFlag::Config, 0x0004),
        (ClassFlag::Transient, 0x0008),
    ]),
    function: FlagMap::new(&[
        (FunctionFlag::Final, 0x0001),
        (FunctionFlag::Native, 0x0400),
        (FunctionFlag::Event, 0x0800),
        (FunctionFlag::Static, 0x2000),
    ]),
    struct_flags: FlagMap::new(&[(StructFlag::Native, 0x0001), (StructFlag::Export, 0x0002), (StructFlag::Atomic, 0x0004)]),
};

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_then_write_round_trips_per_branch() {
        // For each known flag of a map, setting it then testing it yields the
        // same numeric value back.
        for maps in [&UE2_FLAG_MAPS, &UE3_FLAG_MAPS, &UE4_FLAG_MAPS] {
            for (flag, bit) in maps.object.entries {
                assert_eq!(maps.object.bit(*flag), Some(*bit));
                assert!(maps.object.has(maps.object.set(0, *flag), *flag));
            }
        }
    }

    #[test]
    fn test_cooked_bit_was_renumbered() {
        assert_eq!(UE3_FLAG_MAPS.package.bit(PackageFlag::Cooked), Some(0x8));
        assert_eq!(UE4_FLAG_MAPS.package.bit(PackageFlag::Cooked), Some(0x200));
    }

    #[test]
    fn test_translate_across_generations() {
        let ue2 = UE2_FLAG_MAPS.object.set(0, ObjectFlag::Public);
        let ue3 = UE2_FLAG_MAPS.object.translate(&UE3_FLAG_MAPS.object, ue2);
        assert!(UE3_FLAG_MAPS.object.has(ue3, ObjectFlag::Public));
        assert_eq!(ue3, 0x0000_0004_0000_0000);
    }

    #[test]
    fn test_translate_drops_retired_flags() {
        let ue2 = UE2_FLAG_MAPS.object.set(0, ObjectFlag::LoadForClient);
        assert_eq!(UE2_FLAG_MAPS.object.translate(&UE4_FLAG_MAPS.object, ue2), 0);
    }

    #[test]
    fn test_missing_flag_is_absent_not_zero() {
        assert_eq!(UE2_FLAG_MAPS.package.bit(PackageFlag::FilterEditorOnly), None);
        assert!(!UE2_FLAG_MAPS.package.has(u64::MAX, PackageFlag::FilterEditorOnly));
    }
}
