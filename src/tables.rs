use std::io::{Read, Seek, Write};

use anyhow::Result;
use bitflags::bitflags;
use serde::Serialize;

use crate::names::{FNameEntry, FNameRef};
use crate::ser::{Readable, ReadableCtx, Reader, Writeable, WriteableCtx, Writer, read_array};
use crate::summary::FPackageFileSummary;
use crate::version::{EUnrealEngineObjectUE4Version as Ue4V, EUnrealPackageVersion as V};
use crate::{FGuid, FPackageIndex};

/// Object indices were packed before the compact encoding was retired.
pub fn read_object_index<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<FPackageIndex> {
    Ok(FPackageIndex(if !sum.is_ue4() && sum.version < V::CompactIndexDeprecated as u32 {
        s.read_compact_index()?
    } else {
        s.read_i32()?
    }))
}

pub fn write_object_index<S: Write + Seek>(index: FPackageIndex, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
    if !sum.is_ue4() && sum.version < V::CompactIndexDeprecated as u32 {
        s.write_compact_index(index.0)
    } else {
        s.write_i32(index.0)
    }
}

/// Reference to an object stored in another package.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FObjectImport {
    pub class_package: FNameRef,
    pub class_name: FNameRef,
    pub outer_index: FPackageIndex,
    pub object_name: FNameRef,
}

impl ReadableCtx<&FPackageFileSummary> for FObjectImport {
    fn de<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<Self> {
        Ok(Self {
            class_package: s.de_ctx(sum)?,
            class_name: s.de_ctx(sum)?,
            outer_index: FPackageIndex(s.read_i32()?),
            object_name: s.de_ctx(sum)?,
        })
    }
}

impl WriteableCtx<&FPackageFileSummary> for FObjectImport {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
        s.ser_ctx(&self.class_package, sum)?;
        s.ser_ctx(&self.class_name, sum)?;
        s.write_i32(self.outer_index.0)?;
        s.ser_ctx(&self.object_name, sum)
    }
}

/// Descriptor of an object serialized in this package. One struct covers the
/// whole family; which fields are on disk is decided by the version gates in
/// the serializers below.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FObjectExport {
    pub class_index: FPackageIndex,
    pub super_index: FPackageIndex,
    pub outer_index: FPackageIndex,
    pub object_name: FNameRef,
    pub archetype_index: FPackageIndex,
    pub object_flags: u64,
    pub serial_size: i64,
    pub serial_offset: i64,
    pub component_map: Vec<(FNameRef, FPackageIndex)>,
    pub export_flags: u32,
    pub net_object_counts: Vec<i32>,
    pub package_guid: FGuid,
    pub package_flags: u32,
    // UE4 additions
    pub template_index: FPackageIndex,
    pub forced_export: bool,
    pub not_for_client: bool,
    pub not_for_server: bool,
    pub not_always_loaded_for_editor_game: bool,
    pub is_asset: bool,
    pub first_export_dependency: i32,
    pub serialization_before_serialization_dependencies: i32,
    pub create_before_serialization_dependencies: i32,
    pub serialization_before_create_dependencies: i32,
    pub create_before_create_dependencies: i32,
    /// Payload bytes to emit on save instead of copying from the source
    /// stream.
    #[serde(skip)]
    pub raw_data: Option<Vec<u8>>,
}

impl ReadableCtx<&FPackageFileSummary> for FObjectExport {
    fn de<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<Self> {
        let v = sum.version;
        let mut export = FObjectExport {
            class_index: read_object_index(s, sum)?,
            super_index: read_object_index(s, sum)?,
            outer_index: FPackageIndex(s.read_i32()?),
            object_name: s.de_ctx(sum)?,
            ..Default::default()
        };
        if v >= V::AddedArchetype as u32 {
            export.archetype_index = FPackageIndex(s.read_i32()?);
        }
        export.object_flags = if v >= V::ObjectFlags64 as u32 {
            s.read_u64()?
        } else {
            u64::from(s.read_u32()?)
        };
        if v < V::CompactIndexDeprecated as u32 {
            export.serial_size = i64::from(s.read_compact_index()?);
            if export.serial_size > 0 {
                export.serial_offset = i64::from(s.read_compact_index()?);
            }
        } else {
            export.serial_size = i64::from(s.read_i32()?);
            export.serial_offset = i64::from(s.read_i32()?);
        }
        if (V::AddedArchetype as u32..V::ComponentMapDeprecated as u32).contains(&v) {
            let count = s.read_count()?;
            export.component_map = read_array(count, s, |s| Ok((s.de_ctx(sum)?, FPackageIndex(s.read_i32()?))))?;
        }
        if v >= V::AddedExportFlags as u32 {
            export.export_flags = s.read_u32()?;
        }
        if v >= V::AddedNetObjects as u32 {
            export.net_object_counts = s.de()?;
            export.package_guid = s.de()?;
        }
        if v >= V::AddedExportPackageFlags as u32 {
            export.package_flags = s.read_u32()?;
        }
        Ok(export)
    }
}

impl WriteableCtx<&FPackageFileSummary> for FObjectExport {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
        let v = sum.version;
        write_object_index(self.class_index, s, sum)?;
        write_object_index(self.super_index, s, sum)?;
        s.write_i32(self.outer_index.0)?;
        s.ser_ctx(&self.object_name, sum)?;
        if v >= V::AddedArchetype as u32 {
            s.write_i32(self.archetype_index.0)?;
        }
        if v >= V::ObjectFlags64 as u32 {
            s.write_u64(self.object_flags)?;
        } else {
            s.write_u32(self.object_flags as u32)?;
        }
        if v < V::CompactIndexDeprecated as u32 {
            s.write_compact_index(self.serial_size as i32)?;
            if self.serial_size > 0 {
                s.write_compact_index(self.serial_offset as i32)?;
            }
        } else {
            s.write_i32(self.serial_size as i32)?;
            s.write_i32(self.serial_offset as i32)?;
        }
        if (V::AddedArchetype as u32..V::ComponentMapDeprecated as u32).contains(&v) {
            s.write_count(self.component_map.len())?;
            for (name, index) in &self.component_map {
                s.ser_ctx(name, sum)?;
                s.write_i32(index.0)?;
            }
        }
        if v >= V::AddedExportFlags as u32 {
            s.write_u32(self.export_flags)?;
        }
        if v >= V::AddedNetObjects as u32 {
            s.ser(&self.net_object_counts)?;
            s.ser(&self.package_guid)?;
        }
        if v >= V::AddedExportPackageFlags as u32 {
            s.write_u32(self.package_flags)?;
        }
        Ok(())
    }
}

fn read_bool32<S: Read + Seek>(s: &mut Reader<S>) -> Result<bool> {
    Ok(s.read_u32()? != 0)
}
fn write_bool32<S: Write + Seek>(s: &mut Writer<S>, value: bool) -> Result<()> {
    s.write_u32(u32::from(value))
}

/// UE4 export record. Selected by the UE4 branch in place of the base shape.
pub fn read_export_ue4<S: Read + Seek>(s: &mut Reader<S>, sum: &FPackageFileSummary) -> Result<FObjectExport> {
    let ue4 = sum.file_version_ue4;
    let mut export = FObjectExport {
        class_index: FPackageIndex(s.read_i32()?),
        super_index: FPackageIndex(s.read_i32()?),
        ..Default::default()
    };
    if ue4 >= Ue4V::TemplateIndexInCookedExports as i32 {
        export.template_index = FPackageIndex(s.read_i32()?);
    }
    export.outer_index = FPackageIndex(s.read_i32()?);
    export.object_name = s.de_ctx(sum)?;
    export.object_flags = u64::from(s.read_u32()?);
    if ue4 >= Ue4V::LongExportMapSerialSizes as i32 {
        export.serial_size = s.read_i64()?;
        export.serial_offset = s.read_i64()?;
    } else {
        export.serial_size = i64::from(s.read_i32()?);
        export.serial_offset = i64::from(s.read_i32()?);
    }
    export.forced_export = read_bool32(s)?;
    export.not_for_client = read_bool32(s)?;
    export.not_for_server = read_bool32(s)?;
    export.package_guid = s.de()?;
    export.package_flags = s.read_u32()?;
    if ue4 >= Ue4V::LoadForEditorGame as i32 {
        export.not_always_loaded_for_editor_game = read_bool32(s)?;
    }
    if ue4 >= Ue4V::CookedAssetsInEditorSupport as i32 {
        export.is_asset = read_bool32(s)?;
    }
    if ue4 >= Ue4V::PreloadDependenciesInCookedExports as i32 {
        export.first_export_dependency = s.read_i32()?;
        export.serialization_before_serialization_dependencies = s.read_i32()?;
        export.create_before_serialization_dependencies = s.read_i32()?;
        export.serialization_before_create_dependencies = s.read_i32()?;
        export.create_before_create_dependencies = s.read_i32()?;
    }
    Ok(export)
}

pub fn write_export_ue4<S: Write + Seek>(export: &FObjectExport, s: &mut Writer<S>, sum: &FPackageFileSummary) -> Result<()> {
    let ue4 = sum.file_version_ue4;
    s.write_i32(export.class_index.0)?;
    s.write_i32(export.super_index.0)?;
    if ue4 >= Ue4V::TemplateIndexInCookedExports as i32 {
        s.write_i32(export.template_index.0)?;
    }
    s.write_i32(export.outer_index.0)?;
    s.ser_ctx(&export.object_name, sum)?;
    s.write_u32(export.object_flags as u32)?;
    if ue4 >= Ue4V::LongExportMapSerialSizes as i32 {
        s.write_i64(export.serial_size)?;
        s.write_i64(export.serial_offset)?;
    } else {
        s.write_i32(export.serial_size as i32)?;
        s.write_i32(export.serial_offset as i32)?;
    }
    write_bool32(s, export.forced_export)?;
    write_bool32(s, export.not_for_client)?;
    write_bool32(s, export.not_for_server)?;
    s.ser(&export.package_guid)?;
    s.write_u32(export.package_flags)?;
    if ue4 >= Ue4V::LoadForEditorGame as i32 {
        write_bool32(s, export.not_always_loaded_for_editor_game)?;
    }
    if ue4 >= Ue4V::CookedAssetsInEditorSupport as i32 {
        write_bool32(s, export.is_asset)?;
    }
    if ue4 >= Ue4V::PreloadDependenciesInCookedExports as i32 {
        s.write_i32(export.first_export_dependency)?;
        s.write_i32(export.serialization_before_serialization_dependencies)?;
        s.write_i32(export.create_before_serialization_dependencies)?;
        s.write_i32(export.serialization_before_create_dependencies)?;
        s.write_i32(export.create_before_create_dependencies)?;
    }
    Ok(())
}

/// One historical save-point of the package.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FGenerationInfo {
    pub export_count: i32,
    pub name_count: i32,
    pub net_object_count: i32,
}

impl FGenerationInfo {
    pub fn read<S: Read + Seek>(s: &mut Reader<S>, is_ue4: bool, version: u32) -> Result<Self> {
        Ok(Self {
            export_count: s.read_i32()?,
            name_count: s.read_i32()?,
            net_object_count: if !is_ue4 && version >= V::AddedNetObjects as u32 { s.read_i32()? } else { 0 },
        })
    }

    pub fn write<S: Write + Seek>(&self, s: &mut Writer<S>, is_ue4: bool, version: u32) -> Result<()> {
        s.write_i32(self.export_count)?;
        s.write_i32(self.name_count)?;
        if !is_ue4 && version >= V::AddedNetObjects as u32 {
            s.write_i32(self.net_object_count)?;
        }
        Ok(())
    }
}

bitflags! {
    /// On-disk compression scheme selectors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ECompressionFlags: u32 {
        const ZLIB = 0x01;
        const LZO = 0x02;
        const LZX = 0x04;
        const BIAS_MEMORY = 0x10;
        const BIAS_SPEED = 0x20;
    }
}

/// Span of compressed data: where it decompresses to and where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FCompressedChunk {
    pub uncompressed_offset: i32,
    pub uncompressed_size: i32,
    pub compressed_offset: i32,
    pub compressed_size: i32,
}

impl Readable for FCompressedChunk {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self {
            uncompressed_offset: s.read_i32()?,
            uncompressed_size: s.read_i32()?,
            compressed_offset: s.read_i32()?,
            compressed_size: s.read_i32()?,
        })
    }
}
impl Writeable for FCompressedChunk {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_i32(self.uncompressed_offset)?;
        s.write_i32(self.uncompressed_size)?;
        s.write_i32(self.compressed_offset)?;
        s.write_i32(self.compressed_size)
    }
}

/// Mip/format footprint of a cooked texture group, tail of late UE3
/// summaries.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FTextureType {
    pub width: i32,
    pub height: i32,
    pub num_mips: i32,
    pub format: u32,
    pub create_flags: u32,
    pub export_indices: Vec<i32>,
}

impl Readable for FTextureType {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self {
            width: s.read_i32()?,
            height: s.read_i32()?,
            num_mips: s.read_i32()?,
            format: s.read_u32()?,
            create_flags: s.read_u32()?,
            export_indices: s.de()?,
        })
    }
}
impl Writeable for FTextureType {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_i32(self.width)?;
        s.write_i32(self.height)?;
        s.write_i32(self.num_mips)?;
        s.write_u32(self.format)?;
        s.write_u32(self.create_flags)?;
        s.ser(&self.export_indices)
    }
}

/// Guid pairs binding this package's imports and exports to their identity
/// across packages.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FImportExportGuids {
    pub import_guids: Vec<(i32, FGuid)>,
    pub export_guids: Vec<(FGuid, i32)>,
}

impl FImportExportGuids {
    pub fn is_empty(&self) -> bool {
        self.import_guids.is_empty() && self.export_guids.is_empty()
    }

    pub fn read<S: Read + Seek>(s: &mut Reader<S>, import_count: usize, export_count: usize) -> Result<Self> {
        Ok(Self {
            import_guids: read_array(import_count, s, |s| Ok((s.read_i32()?, s.de()?)))?,
            export_guids: read_array(export_count, s, |s| Ok((s.de()?, s.read_i32()?)))?,
        })
    }

    pub fn write<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        for (index, guid) in &self.import_guids {
            s.write_i32(*index)?;
            s.ser(guid)?;
        }
        for (guid, index) in &self.export_guids {
            s.ser(guid)?;
            s.write_i32(*index)?;
        }
        Ok(())
    }
}

/// Thumbnail directory entry; the image body at `data_offset` is read lazily
/// by external consumers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FThumbnailEntry {
    pub object_class_name: String,
    pub object_path: String,
    pub data_offset: u32,
}

impl Readable for FThumbnailEntry {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self {
            object_class_name: s.read_string()?,
            object_path: s.read_string()?,
            data_offset: s.read_u32()?,
        })
    }
}
impl Writeable for FThumbnailEntry {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_string(&self.object_class_name)?;
        s.write_string(&self.object_path)?;
        s.write_u32(self.data_offset)
    }
}

/// All tables of one package, in insertion order.
#[derive(Debug, Default, Serialize)]
pub struct PackageTables {
    pub names: Vec<FNameEntry>,
    pub imports: Vec<FObjectImport>,
    pub exports: Vec<FObjectExport>,
    /// Per export, the package indices whose payload must load first.
    pub depends: Vec<Vec<FPackageIndex>>,
    /// Pre-generations ancestor identities.
    pub heritages: Vec<FGuid>,
    pub import_export_guids: FImportExportGuids,
    pub thumbnails: Vec<FThumbnailEntry>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ser::{Endian, Reader, Writer};
    use std::io::Cursor;

    fn summary(version: u32) -> FPackageFileSummary {
        FPackageFileSummary { version, ..Default::default() }
    }

    fn round_trip_export(export: &FObjectExport, sum: &FPackageFileSummary) -> Result<FObjectExport> {
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        export.ser(&mut w, sum)?;
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        FObjectExport::de(&mut r, sum)
    }

    #[test]
    fn test_ue1_export_packs_indices() -> Result<()> {
        let sum = summary(68);
        let export = FObjectExport {
            class_index: FPackageIndex(-1),
            object_name: FNameRef::new(2),
            object_flags: 0x0007_0000,
            serial_size: 4,
            serial_offset: 123,
            ..Default::default()
        };
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        export.ser(&mut w, &sum)?;
        // compact class/super/name/size/offset (1 byte each at these
        // magnitudes except offset) + i32 outer + u32 flags
        assert_eq!(buf.get_ref().len(), 1 + 1 + 4 + 1 + 4 + 1 + 2);
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(FObjectExport::de(&mut r, &sum)?, export);
        Ok(())
    }

    #[test]
    fn test_ue1_zero_size_export_has_no_offset() -> Result<()> {
        let sum = summary(68);
        let export = FObjectExport { object_name: FNameRef::new(1), ..Default::default() };
        assert_eq!(round_trip_export(&export, &sum)?.serial_offset, 0);
        Ok(())
    }

    #[test]
    fn test_ue3_export_round_trip() -> Result<()> {
        let sum = summary(490);
        let export = FObjectExport {
            class_index: FPackageIndex(-2),
            super_index: FPackageIndex(3),
            outer_index: FPackageIndex(1),
            object_name: FNameRef { index: 4, number: 2 },
            archetype_index: FPackageIndex(-1),
            object_flags: 0x0008_0000_0000_0001,
            serial_size: 256,
            serial_offset: 4096,
            component_map: vec![(FNameRef::new(1), FPackageIndex(2))],
            export_flags: 1,
            net_object_counts: vec![2, 5],
            package_guid: FGuid::new(1, 2, 3, 4),
            package_flags: 0x8,
            ..Default::default()
        };
        assert_eq!(round_trip_export(&export, &sum)?, export);
        Ok(())
    }

    #[test]
    fn test_component_map_gone_after_543() -> Result<()> {
        let sum = summary(600);
        let export = FObjectExport {
            object_name: FNameRef::new(0),
            component_map: vec![(FNameRef::new(1), FPackageIndex(2))],
            ..Default::default()
        };
        // the map is not written, so it does not come back
        assert!(round_trip_export(&export, &sum)?.component_map.is_empty());
        Ok(())
    }

    #[test]
    fn test_ue4_export_round_trip() -> Result<()> {
        let sum = FPackageFileSummary { legacy_version: -7, file_version_ue4: 516, ..Default::default() };
        let export = FObjectExport {
            class_index: FPackageIndex(-1),
            template_index: FPackageIndex(-2),
            outer_index: FPackageIndex(0),
            object_name: FNameRef::new(3),
            object_flags: 0x9,
            serial_size: 1 << 33,
            serial_offset: 1 << 32,
            not_for_client: true,
            is_asset: true,
            first_export_dependency: 7,
            ..Default::default()
        };
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        write_export_ue4(&export, &mut w, &sum)?;
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(read_export_ue4(&mut r, &sum)?, export);
        Ok(())
    }

    #[test]
    fn test_import_round_trip() -> Result<()> {
        let sum = summary(68);
        let import = FObjectImport {
            class_package: FNameRef::new(0),
            class_name: FNameRef::new(1),
            outer_index: FPackageIndex(0),
            object_name: FNameRef::new(1),
        };
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        import.ser(&mut w, &sum)?;
        // three compact name indices + i32 outer
        assert_eq!(buf.get_ref().len(), 3 + 4);
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(FObjectImport::de(&mut r, &sum)?, import);
        Ok(())
    }

    #[test]
    fn test_generation_net_count_gate() -> Result<()> {
        let generation = FGenerationInfo { export_count: 3, name_count: 9, net_object_count: 2 };
        for (version, expected_len) in [(300u32, 8), (490, 12)] {
            let mut buf = Cursor::new(vec![]);
            let mut w = Writer::new(&mut buf, Endian::Little);
            generation.write(&mut w, false, version)?;
            assert_eq!(buf.get_ref().len(), expected_len, "version {version}");
        }
        Ok(())
    }

    #[test]
    fn test_import_export_guids_round_trip() -> Result<()> {
        let guids = FImportExportGuids {
            import_guids: vec![(0, FGuid::new(1, 1, 1, 1))],
            export_guids: vec![(FGuid::new(2, 2, 2, 2), 1), (FGuid::new(3, 3, 3, 3), 0)],
        };
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        guids.write(&mut w)?;
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(FImportExportGuids::read(&mut r, 1, 2)?, guids);
        Ok(())
    }
}
