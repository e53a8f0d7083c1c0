use anyhow::Result;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::branch::{EngineBranch, SummaryStage, make_branch};
use crate::builds::{Build, Platform, detect};
use crate::error::PackageError;
use crate::ser::{PackageSink, PackageStream, read_array};
use crate::tables::{ECompressionFlags, FCompressedChunk, FGenerationInfo, FTextureType};
use crate::version::{
    COOKED_VERSION_PAIR_MAX, COOKED_VERSION_PAIR_MIN, EUnrealEngineObjectUE4Version as Ue4V, EUnrealPackageVersion as V, FCustomVersionContainer, FEngineVersion, LEGACY_VERSION_FLOOR,
    LEGACY_VERSION_NO_UE3,
};
use crate::{FGuid, PACKAGE_TAG};

/// Detection inputs resolved by the caller before the summary is parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionHints {
    pub platform: Platform,
    pub override_version: Option<u32>,
    pub override_licensee_version: Option<u16>,
}

/// Mutable descriptor of everything the header carries. Which fields are on
/// disk depends on the version gates walked by `de`/`ser` below.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FPackageFileSummary {
    pub tag: u32,
    /// Negative for UE4+ assets; 0 for packed UE1-UE3 headers.
    pub legacy_version: i32,
    pub version: u32,
    pub licensee_version: u16,
    pub file_version_ue4: i32,
    pub file_version_licensee_ue4: i32,
    pub custom_versions: FCustomVersionContainer,
    pub total_header_size: u32,
    pub folder_name: String,
    pub package_flags: u32,
    pub name_count: u32,
    pub name_offset: u32,
    pub localization_id: Option<String>,
    pub gatherable_text_data_count: u32,
    pub gatherable_text_data_offset: u32,
    pub export_count: u32,
    pub export_offset: u32,
    pub import_count: u32,
    pub import_offset: u32,
    pub depends_offset: u32,
    pub heritage_count: u32,
    pub heritage_offset: u32,
    pub string_asset_references_count: u32,
    pub string_asset_references_offset: u32,
    pub searchable_names_offset: u32,
    pub import_export_guids_offset: u32,
    pub import_guids_count: u32,
    pub export_guids_count: u32,
    pub thumbnail_table_offset: u32,
    pub guid: FGuid,
    pub generations: Vec<FGenerationInfo>,
    pub engine_version: i32,
    pub ue4_engine_version: FEngineVersion,
    pub ue4_compatible_engine_version: FEngineVersion,
    pub cooker_version: i32,
    pub compression_flags: u32,
    pub compressed_chunks: Vec<FCompressedChunk>,
    pub package_source: u32,
    pub additional_packages_to_cook: Vec<String>,
    pub texture_allocations: Vec<FTextureType>,
    pub asset_registry_data_offset: i32,
    pub bulk_data_start_offset: i64,
    pub world_tile_info_data_offset: i32,
    pub chunk_ids: Vec<i32>,
    pub preload_dependency_count: i32,
    pub preload_dependency_offset: i32,
    /// Extra build number some licensee summaries carry (Hawken).
    pub branch_build: Option<i32>,
    /// Cooker build stamped after the import fields (Rainbow Six: Vegas).
    pub cooker_build: Option<i32>,
}

impl FPackageFileSummary {
    pub fn is_ue4(&self) -> bool {
        self.legacy_version < 0
    }

    pub fn compression(&self) -> ECompressionFlags {
        ECompressionFlags::from_bits_truncate(self.compression_flags)
    }

    pub fn has_heritage_table(&self) -> bool {
        !self.is_ue4() && self.version < V::HeritageTableDeprecated as u32
    }

    pub fn has_depends_table(&self) -> bool {
        self.is_ue4() || self.version >= V::AddedDependsTable as u32
    }

    /// Reads the summary, detecting the build and instantiating its branch
    /// mid-way (the gated fields that follow depend on both).
    #[instrument(skip_all, name = "FPackageFileSummary")]
    pub fn de(s: &mut PackageStream, hints: &DetectionHints) -> Result<(Self, Build, Box<dyn EngineBranch>)> {
        let mut sum = FPackageFileSummary::default();

        if s.position() == 0 {
            let tag = s.tagged("tag", |s| s.read_u32())?;
            if tag == PACKAGE_TAG.swap_bytes() {
                // Byte-swapped signature: the whole stream is byte-swapped.
                s.set_endian(crate::ser::Endian::Big);
            } else if tag != PACKAGE_TAG {
                return Err(PackageError::BadSignature { tag }.into());
            }
            sum.tag = PACKAGE_TAG;
        }

        let packed = s.tagged("version", |s| s.read_i32())?;
        if packed < 0 {
            if packed < LEGACY_VERSION_FLOOR {
                return Err(PackageError::unsupported(format!("legacy version {packed} is newer than this library understands")));
            }
            sum.legacy_version = packed;
            if packed != LEGACY_VERSION_NO_UE3 {
                sum.version = s.read_i32()? as u32;
            }
            sum.file_version_ue4 = s.read_i32()?;
            sum.file_version_licensee_ue4 = s.read_i32()?;
            if (COOKED_VERSION_PAIR_MIN..COOKED_VERSION_PAIR_MAX).contains(&sum.file_version_ue4) {
                let _ = s.read_bytes(8)?;
            }
            // -1 predates the custom-version container
            if packed <= -2 {
                sum.custom_versions = FCustomVersionContainer::read(s, packed)?;
            }
        } else {
            sum.version = packed as u32 & 0xffff;
            sum.licensee_version = (packed as u32 >> 16) as u16;
        }

        if let Some(version) = hints.override_version {
            sum.version = version;
        }
        if let Some(licensee) = hints.override_licensee_version {
            sum.licensee_version = licensee;
        }

        let build = detect(sum.version, sum.licensee_version, hints.platform, sum.is_ue4());
        sum.version = build.version;
        sum.licensee_version = build.licensee;

        let mut branch = make_branch(&build);
        branch.setup(&sum)?;

        let ue4 = sum.is_ue4();
        let v = sum.version;

        branch.read_summary_insert(SummaryStage::BeforeHeaderSize, &mut sum, s)?;
        if ue4 || v >= V::AddedTotalHeaderSize as u32 {
            sum.total_header_size = s.tagged("total_header_size", |s| s.read_u32())?;
        }
        if ue4 || v >= V::AddedFolderName as u32 {
            sum.folder_name = s.read_string()?;
        }
        sum.package_flags = s.tagged("package_flags", |s| s.read_u32())?;
        branch.read_summary_insert(SummaryStage::AfterPackageFlags, &mut sum, s)?;

        sum.name_count = s.read_u32()?;
        sum.name_offset = s.read_u32()?;
        if ue4 {
            if sum.file_version_ue4 >= Ue4V::AddedPackageSummaryLocalizationId as i32 {
                sum.localization_id = Some(s.read_string()?);
            }
            if sum.file_version_ue4 >= Ue4V::SerializeTextInPackages as i32 {
                sum.gatherable_text_data_count = s.read_u32()?;
                sum.gatherable_text_data_offset = s.read_u32()?;
            }
        }
        sum.export_count = s.read_u32()?;
        sum.export_offset = s.read_u32()?;
        sum.import_count = s.read_u32()?;
        sum.import_offset = s.read_u32()?;
        branch.read_summary_insert(SummaryStage::AfterImports, &mut sum, s)?;

        if sum.has_heritage_table() {
            sum.heritage_count = s.read_u32()?;
            sum.heritage_offset = s.read_u32()?;
            branch.post_deserialize_summary(&mut sum, s)?;
            return Ok((sum, build, branch));
        }

        if sum.has_depends_table() {
            sum.depends_offset = s.read_u32()?;
        }
        if ue4 {
            if sum.file_version_ue4 >= Ue4V::AddStringAssetReferencesMap as i32 {
                sum.string_asset_references_count = s.read_u32()?;
                sum.string_asset_references_offset = s.read_u32()?;
            }
            if sum.file_version_ue4 >= Ue4V::AddedSearchableNames as i32 {
                sum.searchable_names_offset = s.read_u32()?;
            }
        }
        if !ue4 && v >= V::AddedImportExportGuidsTable as u32 {
            sum.import_export_guids_offset = s.read_u32()?;
            sum.import_guids_count = s.read_u32()?;
            sum.export_guids_count = s.read_u32()?;
        }
        if ue4 || v >= V::AddedThumbnailTable as u32 {
            sum.thumbnail_table_offset = s.read_u32()?;
        }

        sum.guid = s.de()?;
        let generation_count = s.read_count()?;
        sum.generations = read_array(generation_count, s, |s| FGenerationInfo::read(s, ue4, v))?;

        if ue4 {
            if sum.file_version_ue4 >= Ue4V::EngineVersionObject as i32 {
                sum.ue4_engine_version = s.de()?;
            } else {
                sum.engine_version = s.read_i32()?;
            }
            if sum.file_version_ue4 >= Ue4V::EngineVersionCompatibleWith as i32 {
                sum.ue4_compatible_engine_version = s.de()?;
            }
        } else {
            if v >= V::AddedEngineVersion as u32 {
                sum.engine_version = s.read_i32()?;
            }
            if v >= V::AddedCookerVersion as u32 {
                sum.cooker_version = s.read_i32()?;
            }
        }

        if ue4 || v >= V::CompressionAdded as u32 {
            sum.compression_flags = s.read_u32()?;
            sum.compressed_chunks = s.de()?;
        }
        if ue4 || v >= V::AddedPackageSource as u32 {
            sum.package_source = s.read_u32()?;
        }
        if ue4 || v >= V::AddedAdditionalPackagesToCook as u32 {
            sum.additional_packages_to_cook = s.de()?;
        }
        branch.read_summary_insert(SummaryStage::AfterAdditionalPackages, &mut sum, s)?;

        if !ue4 && v >= V::AddedTextureAllocations as u32 {
            match s.de() {
                Ok(types) => sum.texture_allocations = types,
                Err(err) => warn!("couldn't parse texture allocations: {err}"),
            }
        }

        if ue4 {
            sum.asset_registry_data_offset = s.read_i32()?;
            if sum.file_version_ue4 >= Ue4V::SummaryHasBulkDataOffset as i32 {
                sum.bulk_data_start_offset = s.read_i64()?;
            }
            if sum.file_version_ue4 >= Ue4V::WorldLevelInfo as i32 {
                sum.world_tile_info_data_offset = s.read_i32()?;
            }
            if sum.file_version_ue4 >= Ue4V::AddedChunkIdToAssetData as i32 {
                sum.chunk_ids = s.de()?;
            }
            if sum.file_version_ue4 >= Ue4V::PreloadDependenciesInCookedExports as i32 {
                sum.preload_dependency_count = s.read_i32()?;
                sum.preload_dependency_offset = s.read_i32()?;
            }
        }

        branch.post_deserialize_summary(&mut sum, s)?;
        Ok((sum, build, branch))
    }

    /// Writes the summary, mirroring `de` step for step through the same
    /// gates and branch stages.
    #[instrument(skip_all, name = "FPackageFileSummary")]
    pub fn ser(&self, s: &mut PackageSink, branch: &dyn EngineBranch) -> Result<()> {
        s.write_u32(PACKAGE_TAG)?;
        if self.is_ue4() {
            s.write_i32(self.legacy_version)?;
            if self.legacy_version != LEGACY_VERSION_NO_UE3 {
                s.write_i32(self.version as i32)?;
            }
            s.write_i32(self.file_version_ue4)?;
            s.write_i32(self.file_version_licensee_ue4)?;
            if (COOKED_VERSION_PAIR_MIN..COOKED_VERSION_PAIR_MAX).contains(&self.file_version_ue4) {
                s.write_bytes(&[0; 8])?;
            }
            if self.legacy_version <= -2 {
                self.custom_versions.write(s)?;
            }
        } else {
            s.write_i32((u32::from(self.licensee_version) << 16 | self.version & 0xffff) as i32)?;
        }

        let ue4 = self.is_ue4();
        let v = self.version;

        branch.write_summary_insert(SummaryStage::BeforeHeaderSize, self, s)?;
        if ue4 || v >= V::AddedTotalHeaderSize as u32 {
            s.write_u32(self.total_header_size)?;
        }
        if ue4 || v >= V::AddedFolderName as u32 {
            s.write_string(&self.folder_name)?;
        }
        s.write_u32(self.package_flags)?;
        branch.write_summary_insert(SummaryStage::AfterPackageFlags, self, s)?;

        s.write_u32(self.name_count)?;
        s.write_u32(self.name_offset)?;
        if ue4 {
            if self.file_version_ue4 >= Ue4V::AddedPackageSummaryLocalizationId as i32 {
                s.write_string(self.localization_id.as_deref().unwrap_or(""))?;
            }
            if self.file_version_ue4 >= Ue4V::SerializeTextInPackages as i32 {
                s.write_u32(self.gatherable_text_data_count)?;
                s.write_u32(self.gatherable_text_data_offset)?;
            }
        }
        s.write_u32(self.export_count)?;
        s.write_u32(self.export_offset)?;
        s.write_u32(self.import_count)?;
        s.write_u32(self.import_offset)?;
        branch.write_summary_insert(SummaryStage::AfterImports, self, s)?;

        if self.has_heritage_table() {
            s.write_u32(self.heritage_count)?;
            s.write_u32(self.heritage_offset)?;
            branch.post_serialize_summary(self, s)?;
            return Ok(());
        }

        if self.has_depends_table() {
            s.write_u32(self.depends_offset)?;
        }
        if ue4 {
            if self.file_version_ue4 >= Ue4V::AddStringAssetReferencesMap as i32 {
                s.write_u32(self.string_asset_references_count)?;
                s.write_u32(self.string_asset_references_offset)?;
            }
            if self.file_version_ue4 >= Ue4V::AddedSearchableNames as i32 {
                s.write_u32(self.searchable_names_offset)?;
            }
        }
        if !ue4 && v >= V::AddedImportExportGuidsTable as u32 {
            s.write_u32(self.import_export_guids_offset)?;
            s.write_u32(self.import_guids_count)?;
            s.write_u32(self.export_guids_count)?;
        }
        if ue4 || v >= V::AddedThumbnailTable as u32 {
            s.write_u32(self.thumbnail_table_offset)?;
        }

        s.ser(&self.guid)?;
        s.write_count(self.generations.len())?;
        for generation in &self.generations {
            generation.write(s, ue4, v)?;
        }

        if ue4 {
            if self.file_version_ue4 >= Ue4V::EngineVersionObject as i32 {
                s.ser(&self.ue4_engine_version)?;
            } else {
                s.write_i32(self.engine_version)?;
            }
            if self.file_version_ue4 >= Ue4V::EngineVersionCompatibleWith as i32 {
                s.ser(&self.ue4_compatible_engine_version)?;
            }
        } else {
            if v >= V::AddedEngineVersion as u32 {
                s.write_i32(self.engine_version)?;
            }
            if v >= V::AddedCookerVersion as u32 {
                s.write_i32(self.cooker_version)?;
            }
        }

        if ue4 || v >= V::CompressionAdded as u32 {
            s.write_u32(self.compression_flags)?;
            s.ser(&self.compressed_chunks)?;
        }
        if ue4 || v >= V::AddedPackageSource as u32 {
            s.write_u32(self.package_source)?;
        }
        if ue4 || v >= V::AddedAdditionalPackagesToCook as u32 {
            s.ser(&self.additional_packages_to_cook)?;
        }
        branch.write_summary_insert(SummaryStage::AfterAdditionalPackages, self, s)?;

        if !ue4 && v >= V::AddedTextureAllocations as u32 {
            s.ser(&self.texture_allocations)?;
        }

        if ue4 {
            s.write_i32(self.asset_registry_data_offset)?;
            if self.file_version_ue4 >= Ue4V::SummaryHasBulkDataOffset as i32 {
                s.write_i64(self.bulk_data_start_offset)?;
            }
            if self.file_version_ue4 >= Ue4V::WorldLevelInfo as i32 {
                s.write_i32(self.world_tile_info_data_offset)?;
            }
            if self.file_version_ue4 >= Ue4V::AddedChunkIdToAssetData as i32 {
                s.ser(&self.chunk_ids)?;
            }
            if self.file_version_ue4 >= Ue4V::PreloadDependenciesInCookedExports as i32 {
                s.write_i32(self.preload_dependency_count)?;
                s.write_i32(self.preload_dependency_offset)?;
            }
        }

        branch.post_serialize_summary(self, s)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builds::BuildName;
    use crate::ser::{Endian, Reader, Writer};

    fn read(bytes: Vec<u8>) -> Result<(FPackageFileSummary, Build, Box<dyn EngineBranch>)> {
        let mut s = Reader::from_vec(bytes, Endian::Little)?;
        FPackageFileSummary::de(&mut s, &DetectionHints::default())
    }

    fn le(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }

    #[test]
    fn test_bad_signature_is_fatal() {
        let err = read(vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackageError>(), Some(PackageError::BadSignature { .. })));
    }

    #[test]
    fn test_legacy_version_floor() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&le(PACKAGE_TAG));
        bytes.extend_from_slice(&(-8i32).to_le_bytes());
        let err = read(bytes).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackageError>(), Some(PackageError::UnsupportedVersion { .. })));
    }

    #[test]
    fn test_packed_version_splits_licensee() -> Result<()> {
        // minimal v68/licensee-0 header up to the heritage fields
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&le(PACKAGE_TAG));
        bytes.extend_from_slice(&le(68));
        bytes.extend_from_slice(&le(0)); // package flags
        bytes.extend_from_slice(&le(0)); // name count
        bytes.extend_from_slice(&le(64)); // name offset
        bytes.extend_from_slice(&le(0)); // export count
        bytes.extend_from_slice(&le(64)); // export offset
        bytes.extend_from_slice(&le(0)); // import count
        bytes.extend_from_slice(&le(64)); // import offset
        bytes.extend_from_slice(&le(1)); // heritage count
        bytes.extend_from_slice(&le(56)); // heritage offset
        bytes.extend_from_slice(&[0; 24]);
        let (sum, build, _branch) = read(bytes)?;
        assert_eq!(sum.version, 68);
        assert_eq!(sum.licensee_version, 0);
        assert!(sum.has_heritage_table());
        assert_eq!(sum.heritage_count, 1);
        assert!(matches!(build.name, BuildName::Unreal1 | BuildName::UnrealTournament));
        Ok(())
    }

    /// A legacy -6 header consumes exactly 20 bytes per custom version and
    /// then proceeds with the UE3-version fields already read.
    #[test]
    fn test_legacy_minus_6_custom_version_list() -> Result<()> {
        let mut sink = Writer::in_memory(Endian::Little);
        let sum = FPackageFileSummary {
            legacy_version: -6,
            version: 864,
            file_version_ue4: 498,
            custom_versions: FCustomVersionContainer::Optimized(vec![
                crate::version::FCustomVersion { key: FGuid::new(1, 2, 3, 4), version: 2 },
                crate::version::FCustomVersion { key: FGuid::new(5, 6, 7, 8), version: 11 },
            ]),
            total_header_size: 1024,
            folder_name: "None".into(),
            name_count: 0,
            name_offset: 1024,
            export_offset: 1024,
            import_offset: 1024,
            ..Default::default()
        };
        sum.ser(&mut sink, &crate::branch::Ue4Branch)?;
        let bytes = sink.into_vec();
        // tag, legacy, ue3, ue4, licensee = 20 bytes, then the list
        assert_eq!(&bytes[20..24], &2u32.to_le_bytes());

        let (parsed, build, _branch) = read(bytes)?;
        assert_eq!(parsed.custom_versions.len(), 2);
        assert_eq!(parsed.version, 864);
        assert_eq!(parsed.file_version_ue4, 498);
        assert_eq!(build.name, BuildName::UE4);
        Ok(())
    }

    /// Gatherable text offsets parse on their own when the localization id
    /// is below its gate (UE4 459 <= version < 516).
    #[test]
    fn test_gatherable_text_without_localization_id() -> Result<()> {
        let mut sink = Writer::in_memory(Endian::Little);
        let sum = FPackageFileSummary {
            legacy_version: -7,
            file_version_ue4: 498,
            gatherable_text_data_count: 3,
            gatherable_text_data_offset: 900,
            total_header_size: 1024,
            ..Default::default()
        };
        sum.ser(&mut sink, &crate::branch::Ue4Branch)?;
        let (parsed, _build, _branch) = read(sink.into_vec())?;
        assert_eq!(parsed.gatherable_text_data_count, 3);
        assert_eq!(parsed.gatherable_text_data_offset, 900);
        assert_eq!(parsed.localization_id, None);
        Ok(())
    }

    #[test]
    fn test_ue3_summary_round_trip() -> Result<()> {
        let sum = FPackageFileSummary {
            version: 490,
            licensee_version: 0,
            total_header_size: 0x400,
            folder_name: "CookedPC".into(),
            package_flags: 0x8,
            name_count: 12,
            name_offset: 0x80,
            export_count: 4,
            export_offset: 0x200,
            import_count: 2,
            import_offset: 0x180,
            depends_offset: 0x300,
            guid: FGuid::new(9, 8, 7, 6),
            generations: vec![FGenerationInfo { export_count: 4, name_count: 12, net_object_count: 0 }],
            engine_version: 3240,
            cooker_version: 17,
            compression_flags: 0,
            package_source: 0xdead_beef,
            ..Default::default()
        };
        let branch = crate::branch::DefaultBranch::new(crate::builds::BuildGeneration::UE3);
        let mut sink = Writer::in_memory(Endian::Little);
        sum.ser(&mut sink, &branch)?;
        let (parsed, build, _branch) = read(sink.into_vec())?;
        assert_eq!(build.name, BuildName::Default);
        assert_eq!(parsed.version, sum.version);
        assert_eq!(parsed.folder_name, sum.folder_name);
        assert_eq!(parsed.depends_offset, sum.depends_offset);
        assert_eq!(parsed.guid, sum.guid);
        assert_eq!(parsed.generations, sum.generations);
        assert_eq!(parsed.package_source, sum.package_source);
        Ok(())
    }
}
