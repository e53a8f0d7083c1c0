use std::io::{Read, Seek, Write};

use anyhow::Result;
use serde::Serialize;
use strum::FromRepr;

use crate::FGuid;
use crate::ser::{Readable, Reader, Writeable, Writer, read_array};

/// Engine-version thresholds at which the UE1-UE3 summary and table layouts
/// changed. Compared as `summary.version >= Threshold as u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromRepr)]
#[repr(u32)]
pub enum EUnrealPackageVersion {
    HeritageTableDeprecated = 69,
    CompactIndexDeprecated = 178,
    ObjectFlags64 = 195,
    AddedArchetype = 220,
    AddedEngineVersion = 245,
    AddedExportFlags = 247,
    AddedTotalHeaderSize = 249,
    AddedFolderName = 269,
    AddedCookerVersion = 277,
    AddedNetObjects = 322,
    CompressionAdded = 334,
    NumberedNames = 343,
    AddedDependsTable = 415,
    AddedExportPackageFlags = 475,
    AddedPackageSource = 482,
    AddedAdditionalPackagesToCook = 516,
    ComponentMapDeprecated = 543,
    AddedThumbnailTable = 584,
    AddedImportExportGuidsTable = 623,
    AddedTextureAllocations = 767,
}

/// UE4 object-version thresholds, compared against the summary's
/// `file_version_ue4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromRepr)]
#[repr(i32)]
pub enum EUnrealEngineObjectUE4Version {
    SummaryHasBulkDataOffset = 212,
    WorldLevelInfo = 224,
    AddedChunkIdToAssetData = 278,
    EngineVersionObject = 336,
    LoadForEditorGame = 365,
    AddStringAssetReferencesMap = 384,
    EngineVersionCompatibleWith = 444,
    SerializeTextInPackages = 459,
    CookedAssetsInEditorSupport = 485,
    NameHashesSerialized = 504,
    PreloadDependenciesInCookedExports = 507,
    TemplateIndexInCookedExports = 508,
    AddedSearchableNames = 510,
    LongExportMapSerialSizes = 511,
    AddedPackageSummaryLocalizationId = 516,
}

/// Legacy (negative) version window accepted in the header. Anything below
/// the floor is a newer engine than this library understands.
pub const LEGACY_VERSION_FLOOR: i32 = -7;
/// The legacy value that omits the UE3 version field.
pub const LEGACY_VERSION_NO_UE3: i32 = -4;

/// Window of UE4 file versions that carried a transient 8-byte cooked-version
/// pair in the header.
pub const COOKED_VERSION_PAIR_MIN: i32 = 138;
pub const COOKED_VERSION_PAIR_MAX: i32 = 142;

/// One entry of the optimized custom-version list (legacy version <= -6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FCustomVersion {
    pub key: FGuid,
    pub version: i32,
}
impl Readable for FCustomVersion {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self { key: s.de()?, version: s.read_i32()? })
    }
}
impl Writeable for FCustomVersion {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.ser(&self.key)?;
        s.write_i32(self.version)
    }
}

/// Guid-keyed entry with a friendly name (legacy version in [-5, -3]).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FGuidCustomVersion {
    pub key: FGuid,
    pub version: i32,
    pub friendly_name: String,
}
impl Readable for FGuidCustomVersion {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self { key: s.de()?, version: s.read_i32()?, friendly_name: s.read_string()? })
    }
}
impl Writeable for FGuidCustomVersion {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.ser(&self.key)?;
        s.write_i32(self.version)?;
        s.write_string(&self.friendly_name)
    }
}

/// Enum-tagged entry of the oldest list shape (legacy version == -2).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FEnumCustomVersion {
    pub tag: i32,
    pub version: i32,
}
impl Readable for FEnumCustomVersion {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self { tag: s.read_i32()?, version: s.read_i32()? })
    }
}
impl Writeable for FEnumCustomVersion {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_i32(self.tag)?;
        s.write_i32(self.version)
    }
}

/// Custom-version list, shaped by the legacy version that introduced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FCustomVersionContainer {
    Enums(Vec<FEnumCustomVersion>),
    Guids(Vec<FGuidCustomVersion>),
    Optimized(Vec<FCustomVersion>),
}
impl Default for FCustomVersionContainer {
    fn default() -> Self {
        Self::Optimized(Vec::new())
    }
}
impl FCustomVersionContainer {
    pub fn read<S: Read + Seek>(s: &mut Reader<S>, legacy_version: i32) -> Result<Self> {
        Ok(if legacy_version == -2 {
            let count = s.read_count()?;
            Self::Enums(read_array(count, s, FEnumCustomVersion::de)?)
        } else if (-5..=-3).contains(&legacy_version) {
            let count = s.read_count()?;
            Self::Guids(read_array(count, s, FGuidCustomVersion::de)?)
        } else {
            let count = s.read_count()?;
            Self::Optimized(read_array(count, s, FCustomVersion::de)?)
        })
    }

    pub fn write<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        match self {
            Self::Enums(list) => {
                s.write_count(list.len())?;
                for v in list {
                    s.ser(v)?;
                }
            }
            Self::Guids(list) => {
                s.write_count(list.len())?;
                for v in list {
                    s.ser(v)?;
                }
            }
            Self::Optimized(list) => {
                s.write_count(list.len())?;
                for v in list {
                    s.ser(v)?;
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Enums(list) => list.len(),
            Self::Guids(list) => list.len(),
            Self::Optimized(list) => list.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structured engine version carried by UE4 summaries.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FEngineVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub changelist: u32,
    pub branch: String,
}
impl Readable for FEngineVersion {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self {
            major: s.read_u16()?,
            minor: s.read_u16()?,
            patch: s.read_u16()?,
            changelist: s.read_u32()?,
            branch: s.read_string()?,
        })
    }
}
impl Writeable for FEngineVersion {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_u16(self.major)?;
        s.write_u16(self.minor)?;
        s.write_u16(self.patch)?;
        s.write_u32(self.changelist)?;
        s.write_string(&self.branch)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ser::{Endian, Reader, Writer};
    use std::io::Cursor;

    #[test]
    fn test_optimized_custom_versions_are_20_bytes_each() -> Result<()> {
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        let list = FCustomVersionContainer::Optimized(vec![
            FCustomVersion { key: FGuid::new(1, 2, 3, 4), version: 7 },
            FCustomVersion { key: FGuid::new(5, 6, 7, 8), version: 9 },
        ]);
        list.write(&mut w)?;
        // 4-byte count followed by two 20-byte entries
        assert_eq!(buf.get_ref().len(), 4 + 2 * 20);

        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        let read = FCustomVersionContainer::read(&mut r, -6)?;
        assert_eq!(read, list);
        assert_eq!(r.position(), 44);
        Ok(())
    }

    #[test]
    fn test_container_shape_follows_legacy_version() -> Result<()> {
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        FCustomVersionContainer::Guids(vec![FGuidCustomVersion { key: FGuid::default(), version: 3, friendly_name: "Editor".into() }]).write(&mut w)?;
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        match FCustomVersionContainer::read(&mut r, -4)? {
            FCustomVersionContainer::Guids(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].friendly_name, "Editor");
            }
            other => panic!("wrong container shape: {other:?}"),
        }
        Ok(())
    }
}
