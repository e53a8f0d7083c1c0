use std::io::{Read, Seek, Write};

use anyhow::Result;
use serde::Serialize;

use crate::ser::{Reader, ReadableCtx, WriteableCtx, Writer};
use crate::summary::FPackageFileSummary;
use crate::version::{EUnrealEngineObjectUE4Version, EUnrealPackageVersion};

/// The version below which name-table strings carry no length prefix.
const PREFIXED_NAME_STRINGS: u32 = 64;

/// One interned string. Flags widened to 64 bits alongside object flags;
/// UE4 replaced them with precomputed hashes.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FNameEntry {
    pub name: String,
    pub flags: u64,
    pub non_case_preserving_hash: Option<u16>,
    pub case_preserving_hash: Option<u16>,
}

impl FNameEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

/// Default (UE1-UE3) name entry layout.
pub fn read_name_entry<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<FNameEntry> {
    let name = if sum.version < PREFIXED_NAME_STRINGS {
        s.read_unprefixed_string()?
    } else {
        s.read_string()?
    };
    let flags = if sum.version >= EUnrealPackageVersion::ObjectFlags64 as u32 {
        s.read_u64()?
    } else {
        u64::from(s.read_u32()?)
    };
    Ok(FNameEntry { name, flags, ..Default::default() })
}

pub fn write_name_entry<S: Write + Seek>(entry: &FNameEntry, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
    if sum.version < PREFIXED_NAME_STRINGS {
        s.write_unprefixed_string(&entry.name)?;
    } else {
        s.write_string(&entry.name)?;
    }
    if sum.version >= EUnrealPackageVersion::ObjectFlags64 as u32 {
        s.write_u64(entry.flags)
    } else {
        s.write_u32(entry.flags as u32)
    }
}

/// UE4 name entry layout: string plus hash fields once they were added.
pub fn read_name_entry_ue4<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<FNameEntry> {
    let name = s.read_string()?;
    let (non_case, case) = if sum.file_version_ue4 >= EUnrealEngineObjectUE4Version::NameHashesSerialized as i32 {
        (Some(s.read_u16()?), Some(s.read_u16()?))
    } else {
        (None, None)
    };
    Ok(FNameEntry { name, flags: 0, non_case_preserving_hash: non_case, case_preserving_hash: case })
}

pub fn write_name_entry_ue4<S: Write + Seek>(entry: &FNameEntry, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
    s.write_string(&entry.name)?;
    if sum.file_version_ue4 >= EUnrealEngineObjectUE4Version::NameHashesSerialized as i32 {
        s.write_u16(entry.non_case_preserving_hash.unwrap_or(0))?;
        s.write_u16(entry.case_preserving_hash.unwrap_or(0))?;
    }
    Ok(())
}

/// Reference into the name table: table index plus instance number. A
/// non-zero number renders as `_<number-1>` after the base string, and the
/// same base with different numbers shares one table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct FNameRef {
    pub index: i32,
    pub number: i32,
}

impl FNameRef {
    pub fn new(index: i32) -> Self {
        Self { index, number: 0 }
    }

    pub fn render(&self, base: &str) -> String {
        if self.number != 0 {
            format!("{base}_{}", self.number - 1)
        } else {
            base.to_string()
        }
    }
}

impl ReadableCtx<&FPackageFileSummary> for FNameRef {
    fn de<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<Self> {
        if sum.is_ue4() {
            return Ok(Self { index: s.read_i32()?, number: s.read_i32()? });
        }
        let index = if sum.version < EUnrealPackageVersion::CompactIndexDeprecated as u32 {
            s.read_compact_index()?
        } else {
            s.read_i32()?
        };
        let number = if sum.version >= EUnrealPackageVersion::NumberedNames as u32 {
            s.read_i32()?
        } else {
            0
        };
        Ok(Self { index, number })
    }
}

impl WriteableCtx<&FPackageFileSummary> for FNameRef {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
        if sum.is_ue4() {
            s.write_i32(self.index)?;
            s.write_i32(self.number)?;
            return Ok(());
        }
        if sum.version < EUnrealPackageVersion::CompactIndexDeprecated as u32 {
            s.write_compact_index(self.index)?;
        } else {
            s.write_i32(self.index)?;
        }
        if sum.version >= EUnrealPackageVersion::NumberedNames as u32 {
            s.write_i32(self.number)?;
        }
        Ok(())
    }
}

/// Breaks a composite name into its base and instance number. The number is
/// stored as one more than the rendered suffix; 0 means no number. A suffix
/// like `04` stays part of the base so it round-trips unchanged.
pub fn split_name_number(name: &str) -> (&str, i32) {
    if let Some((left, right)) = name.rsplit_once('_')
        && let Ok(parsed) = right.parse::<i32>()
        && parsed >= 0
        && parsed.to_string() == right
    {
        return (left, parsed + 1);
    }
    (name, 0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ser::{Endian, Reader, Writer};
    use std::io::Cursor;

    fn summary(version: u32) -> FPackageFileSummary {
        FPackageFileSummary { version, ..Default::default() }
    }

    #[test]
    fn test_split_name_number() {
        assert_eq!(split_name_number("Rocket"), ("Rocket", 0));
        assert_eq!(split_name_number("Rocket_3"), ("Rocket", 4));
        assert_eq!(split_name_number("Rocket_04"), ("Rocket_04", 0));
        assert_eq!(split_name_number("Rocket_-1"), ("Rocket_-1", 0));
    }

    #[test]
    fn test_render_suffix() {
        assert_eq!(FNameRef { index: 0, number: 0 }.render("Core"), "Core");
        assert_eq!(FNameRef { index: 0, number: 5 }.render("Core"), "Core_4");
    }

    #[test]
    fn test_name_ref_round_trip_across_versions() -> Result<()> {
        for version in [61, 200, 500] {
            let sum = summary(version);
            let reference = FNameRef { index: 7, number: if version >= 343 { 3 } else { 0 } };
            let mut buf = Cursor::new(vec![]);
            let mut w = Writer::new(&mut buf, Endian::Little);
            reference.ser(&mut w, &sum)?;
            let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
            assert_eq!(FNameRef::de(&mut r, &sum)?, reference, "version {version}");
        }
        Ok(())
    }

    #[test]
    fn test_entry_flags_width_follows_version() -> Result<()> {
        let wide = summary(200);
        let narrow = summary(100);
        let entry = FNameEntry { name: "Engine".into(), flags: 0x0007_0000, ..Default::default() };

        for (sum, expected_len) in [(&narrow, 4 + 7 + 4), (&wide, 4 + 7 + 8)] {
            let mut buf = Cursor::new(vec![]);
            let mut w = Writer::new(&mut buf, Endian::Little);
            write_name_entry(&entry, &mut w, sum)?;
            assert_eq!(buf.get_ref().len(), expected_len);
            let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
            assert_eq!(read_name_entry(&mut r, sum)?, entry);
        }
        Ok(())
    }

    #[test]
    fn test_ue1_unprefixed_entry() -> Result<()> {
        let sum = summary(61);
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        write_name_entry(&FNameEntry { name: "None".into(), flags: 4, ..Default::default() }, &mut w, &sum)?;
        // no length prefix: 4 chars + NUL + u32 flags
        assert_eq!(buf.get_ref().len(), 5 + 4);
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(read_name_entry(&mut r, &sum)?.name, "None");
        Ok(())
    }

    #[test]
    fn test_ue4_entry_hashes() -> Result<()> {
        let sum = FPackageFileSummary { legacy_version: -7, file_version_ue4: 510, ..Default::default() };
        let entry = FNameEntry {
            name: "Mesh".into(),
            flags: 0,
            non_case_preserving_hash: Some(0x1234),
            case_preserving_hash: Some(0x5678),
        };
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        write_name_entry_ue4(&entry, &mut w, &sum)?;
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(read_name_entry_ue4(&mut r, &sum)?, entry);
        Ok(())
    }
}
