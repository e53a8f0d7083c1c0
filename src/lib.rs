//! Version-aware reader/writer for Unreal Engine package files (`.upk`,
//! `.u`, `.utx`, `.uasset` and the many game-specific extensions).
//!
//! A package is a self-describing archive: a summary, a name table, import
//! and export tables, assorted ancillary tables and the serialized object
//! payloads the exports point at. The layout is not one format but a family
//! of engine revisions (UE1 through legacy UE4) plus licensee forks, each
//! moving fields behind version thresholds. This crate detects the build
//! from the header's numeric cues, picks the branch that encodes that
//! family's rules, and reads or writes the summary and tables byte for byte.
//!
//! ```no_run
//! use uepkg::{LoadOptions, Package};
//!
//! let pkg = Package::load("Core.u", LoadOptions::default())?;
//! for export in &pkg.tables.exports {
//!     println!("{}", pkg.name_str(export.object_name));
//! }
//! # anyhow::Ok(())
//! ```

pub mod branch;
pub mod builds;
pub mod error;
pub mod flags;
pub mod names;
pub mod objects;
pub mod package;
pub mod ser;
pub mod summary;
pub mod tables;
pub mod version;

use std::fmt::{Display, Formatter};
use std::io::{Read, Seek, Write};

use anyhow::Result;
use serde::Serialize;

pub use crate::branch::{EngineBranch, SummaryStage};
pub use crate::builds::{Build, BuildGeneration, BuildName, BranchKind, Platform};
pub use crate::error::PackageError;
pub use crate::names::{FNameEntry, FNameRef};
pub use crate::objects::{ClassRegistry, ObjectHandle, ObjectPayload, UObject, UnknownObject};
pub use crate::package::{LoadFlags, LoadOptions, Package, PackageEvent, ROOT_HANDLE};
pub use crate::ser::{Endian, Reader, Writer};
pub use crate::summary::FPackageFileSummary;
pub use crate::tables::{FObjectExport, FObjectImport, PackageTables};

use crate::ser::{Readable, Writeable};

/// Signature tag opening every package. A byte-swapped tag means the whole
/// file is byte-swapped.
pub const PACKAGE_TAG: u32 = 0x9e2a_83c1;

/// Four little-endian 32-bit words, 16 bytes on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FGuid {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl FGuid {
    pub fn new(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }
}

impl Display for FGuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}{:08X}{:08X}{:08X}", self.a, self.b, self.c, self.d)
    }
}

impl Readable for FGuid {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self {
            a: s.read_u32()?,
            b: s.read_u32()?,
            c: s.read_u32()?,
            d: s.read_u32()?,
        })
    }
}

impl Writeable for FGuid {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_u32(self.a)?;
        s.write_u32(self.b)?;
        s.write_u32(self.c)?;
        s.write_u32(self.d)
    }
}

/// Signed index referencing the object tables: `0` is none, `n > 0` is
/// `exports[n - 1]`, `n < 0` is `imports[-n - 1]`. The encoding round-trips
/// verbatim everywhere objects cross-reference each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FPackageIndex(pub i32);

impl FPackageIndex {
    pub fn none() -> Self {
        Self(0)
    }
    pub fn from_import(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }
    pub fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
    pub fn is_import(&self) -> bool {
        self.0 < 0
    }
    pub fn is_export(&self) -> bool {
        self.0 > 0
    }

    pub fn import_index(&self) -> Option<usize> {
        self.is_import().then(|| (-self.0 - 1) as usize)
    }
    pub fn export_index(&self) -> Option<usize> {
        self.is_export().then(|| (self.0 - 1) as usize)
    }
}

impl Display for FPackageIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(i) = self.import_index() {
            write!(f, "Import[{i}]")
        } else if let Some(e) = self.export_index() {
            write!(f, "Export[{e}]")
        } else {
            write!(f, "None")
        }
    }
}

impl Readable for FPackageIndex {
    fn de<S: Read + Seek>(s: &mut Reader<S>) -> Result<Self> {
        Ok(Self(s.read_i32()?))
    }
}

impl Writeable for FPackageIndex {
    fn ser<S: Write + Seek>(&self, s: &mut Writer<S>) -> Result<()> {
        s.write_i32(self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_package_index_encoding() {
        assert!(FPackageIndex(0).is_none());
        assert_eq!(FPackageIndex::from_import(0), FPackageIndex(-1));
        assert_eq!(FPackageIndex::from_export(0), FPackageIndex(1));
        assert_eq!(FPackageIndex(-3).import_index(), Some(2));
        assert_eq!(FPackageIndex(3).export_index(), Some(2));
        assert_eq!(FPackageIndex(-3).export_index(), None);
    }

    #[test]
    fn test_guid_round_trip() -> Result<()> {
        let guid = FGuid::new(0x01234567, 0x89abcdef, 0xfeedface, 0xdeadbeef);
        let mut buf = Cursor::new(vec![]);
        let mut w = Writer::new(&mut buf, Endian::Little);
        w.ser(&guid)?;
        assert_eq!(buf.get_ref().len(), 16);
        // words are little-endian on disk
        assert_eq!(&buf.get_ref()[0..4], &[0x67, 0x45, 0x23, 0x01]);
        let mut r = Reader::from_vec(buf.into_inner(), Endian::Little)?;
        assert_eq!(r.de::<FGuid>()?, guid);
        Ok(())
    }

    #[test]
    fn test_guid_display() {
        assert_eq!(FGuid::new(1, 2, 3, 4).to_string(), "00000001000000020000000300000004");
    }
}
