use std::fmt::Debug;

use anyhow::Result;

use crate::builds::{Build, BuildGeneration, BranchKind};
use crate::error::PackageError;
use crate::flags::{FlagMaps, UE2_FLAG_MAPS, UE3_FLAG_MAPS, UE4_FLAG_MAPS};
use crate::names::{self, FNameEntry};
use crate::objects::{ClassRegistry, ObjectConstructor};
use crate::ser::{PackageSink, PackageStream, WriteableCtx as _};
use crate::summary::FPackageFileSummary;
use crate::tables::{self, FObjectExport, PackageTables};

/// Fixed points inside the summary where licensee forks inserted extra
/// fields. The reader and writer visit the same stages in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStage {
    BeforeHeaderSize,
    AfterPackageFlags,
    AfterImports,
    AfterAdditionalPackages,
}

/// Serialization rules for one engine family. Hooks are invoked at fixed
/// points during summary/table/object serialization; the flag maps translate
/// logical flags to this family's bit positions.
pub trait EngineBranch: Debug {
    fn kind(&self) -> BranchKind;
    fn generation(&self) -> BuildGeneration;
    fn flag_maps(&self) -> &'static FlagMaps;

    /// Runs after version detection, before the gated summary fields. A
    /// branch may refuse the file here or adjust its generation.
    fn setup(&mut self, _summary: &FPackageFileSummary) -> Result<()> {
        Ok(())
    }

    fn read_summary_insert(&self, _stage: SummaryStage, _summary: &mut FPackageFileSummary, _s: &mut PackageStream) -> Result<()> {
        Ok(())
    }
    fn write_summary_insert(&self, _stage: SummaryStage, _summary: &FPackageFileSummary, _s: &mut PackageSink) -> Result<()> {
        Ok(())
    }

    /// Fix-ups after the basic summary parse.
    fn post_deserialize_summary(&self, _summary: &mut FPackageFileSummary, _s: &mut PackageStream) -> Result<()> {
        Ok(())
    }
    fn post_serialize_summary(&self, _summary: &FPackageFileSummary, _s: &mut PackageSink) -> Result<()> {
        Ok(())
    }

    /// Invoked once every table has been read (or written).
    fn post_deserialize_package(&self, _summary: &FPackageFileSummary, _tables: &mut PackageTables, _s: &mut PackageStream) -> Result<()> {
        Ok(())
    }
    fn post_serialize_package(&self, _summary: &FPackageFileSummary, _tables: &PackageTables, _s: &mut PackageSink) -> Result<()> {
        Ok(())
    }

    /// Name-table entry layout, delegated because the shape diverged across
    /// generations.
    fn read_name_entry(&self, s: &mut PackageStream, summary: &FPackageFileSummary) -> Result<FNameEntry> {
        names::read_name_entry(s, summary)
    }
    fn write_name_entry(&self, entry: &FNameEntry, s: &mut PackageSink, summary: &FPackageFileSummary) -> Result<()> {
        names::write_name_entry(entry, s, summary)
    }

    /// Export-record serializer selection.
    fn read_export(&self, s: &mut PackageStream, summary: &FPackageFileSummary) -> Result<FObjectExport> {
        s.de_ctx(summary)
    }
    fn write_export(&self, export: &FObjectExport, s: &mut PackageSink, summary: &FPackageFileSummary) -> Result<()> {
        export.ser(s, summary)
    }

    /// Dispatcher used by external object deserializers: the versioned
    /// serializer for a class name, if one is registered.
    fn object_serializer(&self, registry: &ClassRegistry, class_name: &str) -> Option<ObjectConstructor> {
        registry.lookup(class_name)
    }
}

/// Generic UE1-UE3 rules.
#[derive(Debug)]
pub struct DefaultBranch {
    kind: BranchKind,
    generation: BuildGeneration,
}

impl DefaultBranch {
    pub fn new(generation: BuildGeneration) -> Self {
        Self { kind: BranchKind::Default, generation }
    }
    fn keyed(kind: BranchKind, generation: BuildGeneration) -> Self {
        Self { kind, generation }
    }
}

impl EngineBranch for DefaultBranch {
    fn kind(&self) -> BranchKind {
        self.kind
    }
    fn generation(&self) -> BuildGeneration {
        self.generation
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        match self.generation {
            BuildGeneration::UE1 | BuildGeneration::UE2 | BuildGeneration::UE2X => &UE2_FLAG_MAPS,
            _ => &UE3_FLAG_MAPS,
        }
    }
}

/// Legacy UE4 asset rules: negative-versioned headers, hashed name entries,
/// the UE4 export record.
#[derive(Debug)]
pub struct Ue4Branch;

impl EngineBranch for Ue4Branch {
    fn kind(&self) -> BranchKind {
        BranchKind::UE4
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE4
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE4_FLAG_MAPS
    }
    fn read_name_entry(&self, s: &mut PackageStream, summary: &FPackageFileSummary) -> Result<FNameEntry> {
        names::read_name_entry_ue4(s, summary)
    }
    fn write_name_entry(&self, entry: &FNameEntry, s: &mut PackageSink, summary: &FPackageFileSummary) -> Result<()> {
        names::write_name_entry_ue4(entry, s, summary)
    }
    fn read_export(&self, s: &mut PackageStream, summary: &FPackageFileSummary) -> Result<FObjectExport> {
        tables::read_export_ue4(s, summary)
    }
    fn write_export(&self, export: &FObjectExport, s: &mut PackageSink, summary: &FPackageFileSummary) -> Result<()> {
        tables::write_export_ue4(export, s, summary)
    }
}

/// Hawken inserts an extra build number after the package flags.
#[derive(Debug)]
pub struct HmsBranch;

impl EngineBranch for HmsBranch {
    fn kind(&self) -> BranchKind {
        BranchKind::HMS
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE3
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE3_FLAG_MAPS
    }
    fn read_summary_insert(&self, stage: SummaryStage, summary: &mut FPackageFileSummary, s: &mut PackageStream) -> Result<()> {
        if stage == SummaryStage::AfterPackageFlags {
            summary.branch_build = Some(s.read_i32()?);
        }
        Ok(())
    }
    fn write_summary_insert(&self, stage: SummaryStage, summary: &FPackageFileSummary, s: &mut PackageSink) -> Result<()> {
        if stage == SummaryStage::AfterPackageFlags {
            s.write_i32(summary.branch_build.unwrap_or(0))?;
        }
        Ok(())
    }
}

const HUXLEY_SENTINEL: u32 = 0xfefe_fefe;

/// Huxley prefixes the gated summary fields with a fixed sentinel.
#[derive(Debug)]
pub struct HuxleyBranch;

impl EngineBranch for HuxleyBranch {
    fn kind(&self) -> BranchKind {
        BranchKind::Huxley
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE3
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE3_FLAG_MAPS
    }
    fn read_summary_insert(&self, stage: SummaryStage, _summary: &mut FPackageFileSummary, s: &mut PackageStream) -> Result<()> {
        if stage == SummaryStage::BeforeHeaderSize {
            let offset = s.position();
            let sentinel = s.read_u32()?;
            if sentinel != HUXLEY_SENTINEL {
                return Err(PackageError::format(offset, format!("expected Huxley sentinel, found {sentinel:#010x}")));
            }
        }
        Ok(())
    }
    fn write_summary_insert(&self, stage: SummaryStage, _summary: &FPackageFileSummary, s: &mut PackageSink) -> Result<()> {
        if stage == SummaryStage::BeforeHeaderSize {
            s.write_u32(HUXLEY_SENTINEL)?;
        }
        Ok(())
    }
}

/// Rainbow Six: Vegas carries a cooker build number after the import fields.
#[derive(Debug)]
pub struct R6Branch;

impl EngineBranch for R6Branch {
    fn kind(&self) -> BranchKind {
        BranchKind::R6Vegas
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE3
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE3_FLAG_MAPS
    }
    fn read_summary_insert(&self, stage: SummaryStage, summary: &mut FPackageFileSummary, s: &mut PackageStream) -> Result<()> {
        if stage == SummaryStage::AfterImports {
            summary.cooker_build = Some(s.read_i32()?);
        }
        Ok(())
    }
    fn write_summary_insert(&self, stage: SummaryStage, summary: &FPackageFileSummary, s: &mut PackageSink) -> Result<()> {
        if stage == SummaryStage::AfterImports {
            s.write_i32(summary.cooker_build.unwrap_or(0))?;
        }
        Ok(())
    }
}

/// DC Universe Online stores table offsets relative to the end of the
/// summary; rebase them to absolute once it is fully read. Files saved by
/// this library are normalized to absolute offsets.
#[derive(Debug)]
pub struct DcuoBranch;

impl EngineBranch for DcuoBranch {
    fn kind(&self) -> BranchKind {
        BranchKind::DCUO
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE3
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE3_FLAG_MAPS
    }
    fn post_deserialize_summary(&self, summary: &mut FPackageFileSummary, s: &mut PackageStream) -> Result<()> {
        let base = s.position() as u32;
        for offset in [
            &mut summary.name_offset,
            &mut summary.import_offset,
            &mut summary.export_offset,
            &mut summary.depends_offset,
            &mut summary.import_export_guids_offset,
            &mut summary.thumbnail_table_offset,
        ] {
            if *offset != 0 {
                *offset += base;
            }
        }
        Ok(())
    }
}

/// Tera replaces the summary's name count with the one recorded in its final
/// generation entry.
#[derive(Debug)]
pub struct TeraBranch;

impl EngineBranch for TeraBranch {
    fn kind(&self) -> BranchKind {
        BranchKind::Tera
    }
    fn generation(&self) -> BuildGeneration {
        BuildGeneration::UE3
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        &UE3_FLAG_MAPS
    }
    fn post_deserialize_summary(&self, summary: &mut FPackageFileSummary, _s: &mut PackageStream) -> Result<()> {
        if let Some(last) = summary.generations.last() {
            summary.name_count = last.name_count as u32;
        }
        Ok(())
    }
}

/// Families whose byte layouts are speculative; refused outright (or, for
/// Splinter Cell, beyond the licensee range that still parses generically).
#[derive(Debug)]
pub struct RefusingBranch {
    kind: BranchKind,
    generation: BuildGeneration,
    refuse_above_licensee: Option<u16>,
}

impl EngineBranch for RefusingBranch {
    fn kind(&self) -> BranchKind {
        self.kind
    }
    fn generation(&self) -> BuildGeneration {
        self.generation
    }
    fn flag_maps(&self) -> &'static FlagMaps {
        match self.generation {
            BuildGeneration::UE1 | BuildGeneration::UE2 | BuildGeneration::UE2X => &UE2_FLAG_MAPS,
            _ => &UE3_FLAG_MAPS,
        }
    }
    fn setup(&mut self, summary: &FPackageFileSummary) -> Result<()> {
        match self.refuse_above_licensee {
            Some(limit) if summary.licensee_version <= limit => Ok(()),
            _ => Err(PackageError::unsupported(format!(
                "{:?} packages (version {}, licensee {}) use an unsupported layout",
                self.kind, summary.version, summary.licensee_version
            ))),
        }
    }
}

/// Instantiates the rules object selected by build detection.
pub fn make_branch(build: &Build) -> Box<dyn EngineBranch> {
    match build.branch {
        BranchKind::Default => Box::new(DefaultBranch::new(build.generation)),
        BranchKind::UE4 => Box::new(Ue4Branch),
        BranchKind::HMS => Box::new(HmsBranch),
        BranchKind::Huxley => Box::new(HuxleyBranch),
        BranchKind::R6Vegas => Box::new(R6Branch),
        BranchKind::DCUO => Box::new(DcuoBranch),
        BranchKind::Tera => Box::new(TeraBranch),
        // Families that parse generically but keep their own identity (and
        // with it their flag maps and dispatcher overrides).
        BranchKind::AA2 | BranchKind::DNF | BranchKind::APB | BranchKind::RSS | BranchKind::RL => Box::new(DefaultBranch::keyed(build.branch, build.generation)),
        BranchKind::SFX => Box::new(RefusingBranch { kind: BranchKind::SFX, generation: build.generation, refuse_above_licensee: None }),
        BranchKind::Lead => Box::new(RefusingBranch { kind: BranchKind::Lead, generation: build.generation, refuse_above_licensee: None }),
        BranchKind::SCX => Box::new(RefusingBranch { kind: BranchKind::SCX, generation: build.generation, refuse_above_licensee: Some(121) }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builds::{Platform, detect};
    use crate::ser::{Endian, Reader, Writer};

    fn summary(version: u32, licensee: u16) -> FPackageFileSummary {
        FPackageFileSummary { version, licensee_version: licensee, ..Default::default() }
    }

    #[test]
    fn test_refusal_is_unsupported_version() {
        let build = detect(684, 194, Platform::Undetermined, false);
        let mut branch = make_branch(&build);
        let err = branch.setup(&summary(684, 194)).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackageError>(), Some(PackageError::UnsupportedVersion { .. })));
    }

    #[test]
    fn test_scx_refuses_only_late_licensees() {
        let build = detect(100, 29, Platform::Undetermined, false);
        let mut branch = make_branch(&build);
        assert_eq!(branch.kind(), BranchKind::SCX);
        branch.setup(&summary(100, 29)).unwrap();
        branch.setup(&summary(100, 200)).unwrap_err();
    }

    #[test]
    fn test_huxley_sentinel_mismatch() {
        let branch = HuxleyBranch;
        let mut sum = FPackageFileSummary::default();
        let mut s = Reader::from_vec(vec![0, 0, 0, 0], Endian::Little).unwrap();
        let err = branch.read_summary_insert(SummaryStage::BeforeHeaderSize, &mut sum, &mut s).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackageError>(), Some(PackageError::Format { .. })));
    }

    #[test]
    fn test_hms_insert_round_trip() -> Result<()> {
        let branch = HmsBranch;
        let mut sink = Writer::in_memory(Endian::Little);
        let mut sum = FPackageFileSummary { branch_build: Some(1063), ..Default::default() };
        branch.write_summary_insert(SummaryStage::AfterPackageFlags, &sum, &mut sink)?;
        let mut s = Reader::from_vec(sink.into_vec(), Endian::Little)?;
        sum.branch_build = None;
        branch.read_summary_insert(SummaryStage::AfterPackageFlags, &mut sum, &mut s)?;
        assert_eq!(sum.branch_build, Some(1063));
        Ok(())
    }

    #[test]
    fn test_dcuo_rebases_table_offsets() -> Result<()> {
        let branch = DcuoBranch;
        let mut sum = FPackageFileSummary { name_offset: 4, export_offset: 32, depends_offset: 0, ..Default::default() };
        let mut s = Reader::from_vec(vec![0; 16], Endian::Little)?;
        s.seek(16)?;
        branch.post_deserialize_summary(&mut sum, &mut s)?;
        assert_eq!(sum.name_offset, 20);
        assert_eq!(sum.export_offset, 48);
        // absent tables stay absent
        assert_eq!(sum.depends_offset, 0);
        Ok(())
    }

    #[test]
    fn test_tera_name_count_from_last_generation() -> Result<()> {
        let branch = TeraBranch;
        let mut sum = summary(610, 14);
        sum.name_count = 1;
        sum.generations = vec![
            crate::tables::FGenerationInfo { export_count: 1, name_count: 10, net_object_count: 0 },
            crate::tables::FGenerationInfo { export_count: 2, name_count: 42, net_object_count: 0 },
        ];
        let mut s = Reader::from_vec(vec![], Endian::Little)?;
        branch.post_deserialize_summary(&mut sum, &mut s)?;
        assert_eq!(sum.name_count, 42);
        Ok(())
    }
}
