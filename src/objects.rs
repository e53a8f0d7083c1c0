use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use anyhow::Result;

use crate::FPackageIndex;
use crate::branch::EngineBranch;
use crate::ser::PackageStream;
use crate::summary::FPackageFileSummary;
use crate::tables::PackageTables;

/// Stable arena index; objects reference each other through handles so lazy
/// resolution never chases pointers into a moving arena.
pub type ObjectHandle = usize;

/// Constructor registered for a class name.
pub type ObjectConstructor = fn() -> Box<dyn ObjectPayload>;

/// Context handed to external object serializers alongside the bounded
/// payload stream.
pub struct PayloadCtx<'a> {
    pub summary: &'a FPackageFileSummary,
    pub tables: &'a PackageTables,
    pub branch: &'a dyn EngineBranch,
    pub export_index: usize,
}

/// External object deserializer surface. The stream is bounded to the
/// export's `[serial_offset, serial_offset + serial_size)` range; an
/// implementation cannot seek outside it.
pub trait ObjectPayload: Any {
    fn deserialize(&mut self, s: &mut PackageStream, ctx: &PayloadCtx<'_>) -> Result<()>;
    /// Runs during the link phase, after every sibling object exists.
    fn link(&mut self, _ctx: &PayloadCtx<'_>) -> Result<()> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any;
}

/// Fallback payload for classes nothing was registered for: keeps the raw
/// bytes so the object can still round-trip.
#[derive(Debug, Default)]
pub struct UnknownObject {
    pub raw: Vec<u8>,
}

impl ObjectPayload for UnknownObject {
    fn deserialize(&mut self, s: &mut PackageStream, _ctx: &PayloadCtx<'_>) -> Result<()> {
        let remaining = (s.len() - s.position()) as usize;
        self.raw = s.read_bytes(remaining)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Class-name -> constructor bindings. Append-only by construction: built
/// once, then shared immutably across loads.
#[derive(Default)]
pub struct ClassRegistry {
    map: HashMap<String, ObjectConstructor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, constructor: ObjectConstructor) {
        self.map.insert(class_name.into(), constructor);
    }

    pub fn lookup(&self, class_name: &str) -> Option<ObjectConstructor> {
        self.map.get(class_name).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry").field("classes", &self.map.len()).finish()
    }
}

/// Placeholder constructed when a table entry is first referenced. Owned by
/// the package arena; cross-references are handles, never owning.
pub struct UObject {
    pub name: String,
    pub package_index: FPackageIndex,
    pub class_name: String,
    pub outer: Option<ObjectHandle>,
    pub class: Option<ObjectHandle>,
    pub super_object: Option<ObjectHandle>,
    pub object_flags: u64,
    /// Set once an external deserializer has run.
    pub loaded: bool,
    pub payload: Option<Box<dyn ObjectPayload>>,
}

impl UObject {
    pub fn placeholder(name: String, package_index: FPackageIndex, class_name: String) -> Self {
        Self {
            name,
            package_index,
            class_name,
            outer: None,
            class: None,
            super_object: None,
            object_flags: 0,
            loaded: false,
            payload: None,
        }
    }
}

impl fmt::Debug for UObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UObject")
            .field("name", &self.name)
            .field("package_index", &self.package_index)
            .field("class_name", &self.class_name)
            .field("outer", &self.outer)
            .field("loaded", &self.loaded)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unknown_ctor() -> Box<dyn ObjectPayload> {
        Box::new(UnknownObject::default())
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ClassRegistry::new();
        assert!(registry.lookup("Texture2D").is_none());
        registry.register("Texture2D", unknown_ctor);
        assert!(registry.lookup("Texture2D").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_object_captures_payload() -> Result<()> {
        let mut payload = UnknownObject::default();
        let mut s = crate::ser::Reader::from_vec(vec![1, 2, 3, 4], crate::ser::Endian::Little)?;
        let summary = FPackageFileSummary::default();
        let tables = PackageTables::default();
        let branch = crate::branch::DefaultBranch::new(crate::builds::BuildGeneration::UE3);
        let ctx = PayloadCtx { summary: &summary, tables: &tables, branch: &branch, export_index: 0 };
        payload.deserialize(&mut s, &ctx)?;
        assert_eq!(payload.raw, vec![1, 2, 3, 4]);
        Ok(())
    }
}
