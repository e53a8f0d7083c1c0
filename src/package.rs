use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bitflags::bitflags;
use fs_err as fs;
use tracing::{instrument, warn};

use crate::FPackageIndex;
use crate::branch::EngineBranch;
use crate::builds::{Build, Platform};
use crate::error::PackageError;
use crate::names::{FNameEntry, FNameRef, split_name_number};
use crate::objects::{ClassRegistry, ObjectConstructor, ObjectHandle, PayloadCtx, UObject};
use crate::ser::{Endian, PackageStream, ReadSeek, Reader, Writer, read_array};
use crate::summary::{DetectionHints, FPackageFileSummary};
use crate::tables::{FGenerationInfo, FImportExportGuids, PackageTables};
use crate::version::EUnrealPackageVersion as V;

bitflags! {
    /// What `load` does beyond parsing the summary and tables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadFlags: u32 {
        const REGISTER_CLASSES = 1 << 0;
        const CONSTRUCT = 1 << 1;
        const DESERIALIZE = 1 << 2;
        const LINK = 1 << 3;
    }
}

impl LoadFlags {
    pub fn full() -> Self {
        Self::all()
    }
}

/// Per-load knobs. These replace any process-wide state: platform bias,
/// debugging version overrides and the class registry all travel with the
/// call.
#[derive(Clone)]
pub struct LoadOptions {
    pub flags: LoadFlags,
    pub platform: Platform,
    pub override_version: Option<u32>,
    pub override_licensee_version: Option<u16>,
    pub classes: Arc<ClassRegistry>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            flags: LoadFlags::CONSTRUCT,
            platform: Platform::Undetermined,
            override_version: None,
            override_licensee_version: None,
            classes: Arc::new(ClassRegistry::new()),
        }
    }
}

impl LoadOptions {
    fn hints(&self) -> DetectionHints {
        DetectionHints {
            platform: self.platform,
            override_version: self.override_version,
            override_licensee_version: self.override_licensee_version,
        }
    }
}

/// Load-phase notifications delivered to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageEvent {
    Construct { objects: usize },
    Deserialize { objects: usize },
    Link { objects: usize },
    Object { index: FPackageIndex },
}

pub type EventObserver = Box<dyn FnMut(&PackageEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Building,
    Done(ObjectHandle),
}

/// Handle of the synthesized root object representing the package itself;
/// top-level imports and exports resolve their outer to it.
pub const ROOT_HANDLE: ObjectHandle = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TableKind {
    Names,
    Imports,
    Exports,
    Depends,
    Heritage,
    Guids,
    Thumbnails,
}

/// A loaded (or under-construction) package: summary, tables, branch and the
/// lazily built object graph.
pub struct Package {
    pub name: String,
    pub summary: FPackageFileSummary,
    pub build: Build,
    pub tables: PackageTables,
    branch: Box<dyn EngineBranch>,
    endian: Endian,
    stream: Option<PackageStream>,
    registry: Arc<ClassRegistry>,
    objects: Vec<UObject>,
    import_slots: Vec<Slot>,
    export_slots: Vec<Slot>,
    observer: Option<EventObserver>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("build", &self.build)
            .field("names", &self.tables.names.len())
            .field("imports", &self.tables.imports.len())
            .field("exports", &self.tables.exports.len())
            .finish()
    }
}

impl Package {
    /// Creates an empty in-memory package for the given engine revision.
    pub fn new(name: impl Into<String>, version: u32, licensee: u16) -> Result<Package> {
        let build = crate::builds::detect(version, licensee, Platform::Undetermined, false);
        let mut branch = crate::branch::make_branch(&build);
        let summary = FPackageFileSummary {
            tag: crate::PACKAGE_TAG,
            version: build.version,
            licensee_version: build.licensee,
            ..Default::default()
        };
        branch.setup(&summary)?;
        Ok(Package {
            name: name.into(),
            summary,
            build,
            tables: PackageTables::default(),
            branch,
            endian: Endian::Little,
            stream: None,
            registry: Arc::new(ClassRegistry::new()),
            objects: Vec::new(),
            import_slots: Vec::new(),
            export_slots: Vec::new(),
            observer: None,
        })
    }

    /// Creates an empty in-memory package in the legacy UE4 asset layout.
    pub fn new_ue4(name: impl Into<String>, file_version_ue4: i32) -> Result<Package> {
        let build = crate::builds::detect(0, 0, Platform::Undetermined, true);
        let branch = crate::branch::make_branch(&build);
        let summary = FPackageFileSummary {
            tag: crate::PACKAGE_TAG,
            legacy_version: -7,
            file_version_ue4,
            ..Default::default()
        };
        Ok(Package {
            name: name.into(),
            summary,
            build,
            tables: PackageTables::default(),
            branch,
            endian: Endian::Little,
            stream: None,
            registry: Arc::new(ClassRegistry::new()),
            objects: Vec::new(),
            import_slots: Vec::new(),
            export_slots: Vec::new(),
            observer: None,
        })
    }

    /// Opens and loads a package file. The platform bias falls back to the
    /// cooked folder the file sits in.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P, mut options: LoadOptions) -> Result<Package> {
        let path = path.as_ref();
        if options.platform == Platform::Undetermined
            && let Some(folder) = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str())
        {
            options.platform = Platform::from_folder_name(folder);
        }
        let name = path.file_stem().and_then(|n| n.to_str()).unwrap_or("Package").to_string();
        let file = fs::File::open(path)?;
        Self::from_stream(name, Box::new(BufReader::new(file)), options)
    }

    /// Loads a package from any seekable stream.
    #[instrument(skip_all, fields(package = %name.as_ref()))]
    pub fn from_stream(name: impl AsRef<str>, stream: Box<dyn ReadSeek>, options: LoadOptions) -> Result<Package> {
        let mut s = Reader::new(stream)?;
        let (summary, build, branch) = FPackageFileSummary::de(&mut s, &options.hints())?;
        let endian = s.endian();

        let mut pkg = Package {
            name: name.as_ref().to_string(),
            summary,
            build,
            tables: PackageTables::default(),
            branch,
            endian,
            stream: None,
            registry: if options.flags.contains(LoadFlags::REGISTER_CLASSES) { options.classes.clone() } else { Arc::new(ClassRegistry::new()) },
            objects: Vec::new(),
            import_slots: Vec::new(),
            export_slots: Vec::new(),
            observer: None,
        };

        if pkg.summary.compression_flags != 0 && !pkg.summary.compressed_chunks.is_empty() {
            warn!(package = %pkg.name, chunks = pkg.summary.compressed_chunks.len(), "package is compressed; external decoder required");
            pkg.stream = Some(s);
            return Ok(pkg);
        }

        pkg.read_tables(&mut s)?;
        pkg.branch.post_deserialize_package(&pkg.summary, &mut pkg.tables, &mut s)?;
        pkg.stream = Some(s);
        pkg.ensure_object_arena();

        if options.flags.contains(LoadFlags::CONSTRUCT) {
            pkg.construct_objects()?;
        }
        if options.flags.contains(LoadFlags::DESERIALIZE) {
            pkg.deserialize_exports()?;
        }
        if options.flags.contains(LoadFlags::LINK) {
            pkg.link_objects()?;
        }
        Ok(pkg)
    }

    /// Mandatory tables abort the load; ancillary tables are logged and
    /// dropped on failure.
    fn read_tables(&mut self, s: &mut PackageStream) -> Result<()> {
        let sum = &self.summary;

        s.seek(u64::from(sum.name_offset)).context("name table")?;
        self.tables.names = read_array(sum.name_count as usize, s, |s| self.branch.read_name_entry(s, sum))?;

        s.seek(u64::from(sum.import_offset)).context("import table")?;
        self.tables.imports = read_array(sum.import_count as usize, s, |s| s.de_ctx(sum))?;

        s.seek(u64::from(sum.export_offset)).context("export table")?;
        self.tables.exports = read_array(sum.export_count as usize, s, |s| self.branch.read_export(s, sum))?;

        for (index, export) in self.tables.exports.iter().enumerate() {
            if export.serial_size < 0 {
                return Err(PackageError::format(u64::from(sum.export_offset), format!("export {index} has negative serial size {}", export.serial_size)));
            }
            if export.serial_size > 0 && (export.serial_offset < 0 || export.serial_offset as u64 + export.serial_size as u64 > s.len()) {
                return Err(PackageError::format(
                    export.serial_offset.max(0) as u64,
                    format!("export {index} payload [{}, +{}] runs past end of file", export.serial_offset, export.serial_size),
                ));
            }
        }

        if sum.has_depends_table() {
            self.tables.depends = if sum.depends_offset == 0 {
                vec![Vec::new(); self.tables.exports.len()]
            } else {
                match self.read_depends(s) {
                    Ok(depends) => depends,
                    Err(err) => {
                        warn!("couldn't parse dependencies table: {err}");
                        vec![Vec::new(); self.tables.exports.len()]
                    }
                }
            };
        }

        if sum.has_heritage_table() && sum.heritage_count > 0 {
            match self.read_heritage(s) {
                Ok(heritages) => self.tables.heritages = heritages,
                Err(err) => warn!("couldn't parse heritage table: {err}"),
            }
        }

        if !sum.is_ue4() && sum.version >= V::AddedImportExportGuidsTable as u32 && sum.import_export_guids_offset != 0 {
            let read = s.seek(u64::from(sum.import_export_guids_offset)).and_then(|()| FImportExportGuids::read(s, sum.import_guids_count as usize, sum.export_guids_count as usize));
            match read {
                Ok(guids) => self.tables.import_export_guids = guids,
                Err(err) => warn!("couldn't parse import/export guids: {err}"),
            }
        }

        if sum.thumbnail_table_offset != 0 {
            match self.read_thumbnails(s) {
                Ok(thumbnails) => self.tables.thumbnails = thumbnails,
                Err(err) => warn!("couldn't parse thumbnail table: {err}"),
            }
        }

        Ok(())
    }

    fn read_depends(&self, s: &mut PackageStream) -> Result<Vec<Vec<FPackageIndex>>> {
        s.seek(u64::from(self.summary.depends_offset))?;
        read_array(self.tables.exports.len(), s, |s| s.de())
    }

    fn read_heritage(&self, s: &mut PackageStream) -> Result<Vec<crate::FGuid>> {
        s.seek(u64::from(self.summary.heritage_offset))?;
        read_array(self.summary.heritage_count as usize, s, |s| s.de())
    }

    fn read_thumbnails(&self, s: &mut PackageStream) -> Result<Vec<crate::tables::FThumbnailEntry>> {
        s.seek(u64::from(self.summary.thumbnail_table_offset))?;
        let count = s.read_count()?;
        read_array(count, s, |s| s.de())
    }

    pub fn branch(&self) -> &dyn EngineBranch {
        self.branch.as_ref()
    }
    pub fn endian(&self) -> Endian {
        self.endian
    }
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }
    pub fn set_observer(&mut self, observer: EventObserver) {
        self.observer = Some(observer);
    }

    fn emit(&mut self, event: PackageEvent) {
        if let Some(mut observer) = self.observer.take() {
            observer(&event);
            self.observer = Some(observer);
        }
    }

    /// Renders a name reference, applying the `_<number-1>` suffix rule.
    pub fn name_str(&self, reference: FNameRef) -> String {
        self.tables.names.get(reference.index as usize).map(|entry| reference.render(&entry.name)).unwrap_or_default()
    }

    pub fn find_name(&self, name: &str) -> Option<usize> {
        self.tables.names.iter().position(|entry| entry.name == name)
    }

    /// Interns `name` (minus any instance suffix) and returns a reference to
    /// it.
    pub fn name_ref_for(&mut self, name: &str) -> FNameRef {
        let (base, number) = split_name_number(name);
        let index = self.find_name(base).unwrap_or_else(|| {
            self.tables.names.push(FNameEntry::named(base));
            self.tables.names.len() - 1
        });
        FNameRef { index: index as i32, number }
    }

    /// Object name of whatever a package index points at; index 0 names the
    /// intrinsic Class.
    pub fn index_object_name(&self, index: FPackageIndex) -> String {
        if let Some(i) = index.import_index() {
            self.tables.imports.get(i).map(|imp| self.name_str(imp.object_name)).unwrap_or_default()
        } else if let Some(e) = index.export_index() {
            self.tables.exports.get(e).map(|exp| self.name_str(exp.object_name)).unwrap_or_default()
        } else {
            "Class".to_string()
        }
    }

    pub fn object(&self, handle: ObjectHandle) -> &UObject {
        &self.objects[handle]
    }
    pub fn objects(&self) -> &[UObject] {
        &self.objects
    }

    /// Dotted outer chain down from the package root.
    pub fn object_path(&self, handle: ObjectHandle) -> String {
        let mut parts = Vec::new();
        let mut current = Some(handle);
        while let Some(h) = current {
            parts.push(self.objects[h].name.clone());
            if h == ROOT_HANDLE {
                break;
            }
            current = self.objects[h].outer;
        }
        parts.reverse();
        parts.join(".")
    }

    /// The arena always holds the synthesized root object; slots lazily grow
    /// with the tables so packages built in memory resolve too.
    fn ensure_object_arena(&mut self) {
        if self.objects.is_empty() {
            let mut root = UObject::placeholder(self.name.clone(), FPackageIndex::none(), "Package".into());
            root.loaded = true;
            self.objects.push(root);
        }
        if self.import_slots.len() < self.tables.imports.len() {
            self.import_slots.resize(self.tables.imports.len(), Slot::Empty);
        }
        if self.export_slots.len() < self.tables.exports.len() {
            self.export_slots.resize(self.tables.exports.len(), Slot::Empty);
        }
    }

    /// Resolves a package index to its object, constructing the placeholder
    /// on first access. Construction is memoized: a table entry yields
    /// exactly one object.
    pub fn index_to_object(&mut self, index: FPackageIndex) -> Result<Option<ObjectHandle>> {
        self.ensure_object_arena();
        if let Some(i) = index.import_index() {
            Ok(Some(self.resolve_import(i)?))
        } else if let Some(e) = index.export_index() {
            Ok(Some(self.resolve_export(e)?))
        } else {
            Ok(None)
        }
    }

    fn resolve_outer(&mut self, index: FPackageIndex) -> Result<ObjectHandle> {
        if index.is_none() {
            return Ok(ROOT_HANDLE);
        }
        self.index_to_object(index)?.context("outer index resolved to nothing")
    }

    fn resolve_import(&mut self, index: usize) -> Result<ObjectHandle> {
        match self.import_slots.get(index).copied() {
            None => bail!("import index {index} out of range ({} imports)", self.tables.imports.len()),
            Some(Slot::Done(handle)) => Ok(handle),
            Some(Slot::Building) => Err(PackageError::format(u64::from(self.summary.import_offset), format!("circular outer chain through import {index}"))),
            Some(Slot::Empty) => {
                self.import_slots[index] = Slot::Building;
                let import = self.tables.imports[index].clone();
                let outer = self.resolve_outer(import.outer_index)?;
                let mut object = UObject::placeholder(self.name_str(import.object_name), FPackageIndex::from_import(index), self.name_str(import.class_name));
                object.outer = Some(outer);
                let handle = self.alloc(object);
                self.import_slots[index] = Slot::Done(handle);
                self.emit(PackageEvent::Object { index: FPackageIndex::from_import(index) });
                Ok(handle)
            }
        }
    }

    fn resolve_export(&mut self, index: usize) -> Result<ObjectHandle> {
        match self.export_slots.get(index).copied() {
            None => bail!("export index {index} out of range ({} exports)", self.tables.exports.len()),
            Some(Slot::Done(handle)) => Ok(handle),
            Some(Slot::Building) => Err(PackageError::format(u64::from(self.summary.export_offset), format!("circular outer chain through export {index}"))),
            Some(Slot::Empty) => {
                self.export_slots[index] = Slot::Building;
                let export = self.tables.exports[index].clone();
                let outer = self.resolve_outer(export.outer_index)?;
                let mut object = UObject::placeholder(self.name_str(export.object_name), FPackageIndex::from_export(index), self.index_object_name(export.class_index));
                object.outer = Some(outer);
                object.object_flags = export.object_flags;
                let handle = self.alloc(object);
                self.export_slots[index] = Slot::Done(handle);
                // class/super may legitimately point back through this
                // export, so they resolve only after it is memoized
                let class = self.index_to_object(export.class_index)?;
                let super_object = self.index_to_object(export.super_index)?;
                let object = &mut self.objects[handle];
                object.class = class;
                object.super_object = super_object;
                self.emit(PackageEvent::Object { index: FPackageIndex::from_export(index) });
                Ok(handle)
            }
        }
    }

    fn alloc(&mut self, object: UObject) -> ObjectHandle {
        self.objects.push(object);
        self.objects.len() - 1
    }

    /// Materializes placeholders for every import and export, in table
    /// order.
    #[instrument(skip_all)]
    pub fn construct_objects(&mut self) -> Result<()> {
        self.ensure_object_arena();
        for index in 0..self.tables.imports.len() {
            self.resolve_import(index)?;
        }
        for index in 0..self.tables.exports.len() {
            self.resolve_export(index)?;
        }
        self.emit(PackageEvent::Construct { objects: self.objects.len() - 1 });
        Ok(())
    }

    /// Nearest registered serializer for the export's class, walking the
    /// super chain on a miss.
    fn serializer_for_export(&self, index: usize) -> Option<ObjectConstructor> {
        let mut idx = self.tables.exports[index].class_index;
        for _ in 0..=self.tables.exports.len() {
            let name = self.index_object_name(idx);
            if let Some(constructor) = self.branch.object_serializer(&self.registry, &name) {
                return Some(constructor);
            }
            match idx.export_index() {
                Some(e) => idx = self.tables.exports[e].super_index,
                // imports carry no super information, so the walk ends
                None => break,
            }
            if idx.is_none() {
                break;
            }
        }
        None
    }

    /// Reads the raw payload bytes of an export, either from the override
    /// buffer or the backing stream.
    pub fn read_export_payload(&mut self, index: usize) -> Result<Vec<u8>> {
        let export = &self.tables.exports[index];
        if let Some(raw) = &export.raw_data {
            return Ok(raw.clone());
        }
        if export.serial_size == 0 {
            return Ok(Vec::new());
        }
        let (offset, size) = (export.serial_offset as u64, export.serial_size as usize);
        let stream = self.stream.as_mut().with_context(|| format!("export {index} has no payload source"))?;
        stream.seek(offset)?;
        stream.read_bytes(size)
    }

    /// Runs registered serializers over their exports. Failures are
    /// aggregated into a single error naming the first offending export.
    #[instrument(skip_all)]
    pub fn deserialize_exports(&mut self) -> Result<()> {
        self.ensure_object_arena();
        let mut deserialized = 0;
        let mut failures: Vec<(usize, anyhow::Error)> = Vec::new();
        for index in 0..self.tables.exports.len() {
            let Some(constructor) = self.serializer_for_export(index) else {
                continue;
            };
            let handle = self.resolve_export(index)?;
            let bytes = match self.read_export_payload(index) {
                Ok(bytes) => bytes,
                Err(err) => {
                    failures.push((index, err));
                    continue;
                }
            };
            let mut payload = constructor();
            let mut bounded = Reader::from_vec(bytes, self.endian)?;
            let result = {
                let ctx = PayloadCtx {
                    summary: &self.summary,
                    tables: &self.tables,
                    branch: self.branch.as_ref(),
                    export_index: index,
                };
                payload.deserialize(&mut bounded, &ctx)
            };
            match result {
                Ok(()) => {
                    let object = &mut self.objects[handle];
                    object.payload = Some(payload);
                    object.loaded = true;
                    deserialized += 1;
                }
                Err(err) => failures.push((index, err)),
            }
        }
        self.emit(PackageEvent::Deserialize { objects: deserialized });
        if let Some((index, first)) = failures.first() {
            return Err(PackageError::ObjectDeserialize {
                export_index: *index,
                reason: format!("{} of {} exports failed; first: {first}", failures.len(), self.tables.exports.len()),
            }
            .into());
        }
        Ok(())
    }

    /// Post-deserialize hook pass, once every sibling object exists.
    #[instrument(skip_all)]
    pub fn link_objects(&mut self) -> Result<()> {
        let mut linked = 0;
        for index in 0..self.tables.exports.len() {
            let Some(Slot::Done(handle)) = self.export_slots.get(index).copied() else {
                continue;
            };
            let Some(mut payload) = self.objects[handle].payload.take() else {
                continue;
            };
            let result = {
                let ctx = PayloadCtx {
                    summary: &self.summary,
                    tables: &self.tables,
                    branch: self.branch.as_ref(),
                    export_index: index,
                };
                payload.link(&ctx)
            };
            self.objects[handle].payload = Some(payload);
            result?;
            linked += 1;
        }
        self.emit(PackageEvent::Link { objects: linked });
        Ok(())
    }

    /// Serializes the package to a fresh byte image: summary, tables in the
    /// order their prior offsets dictate (each offset reassigned from the
    /// stream position just before the table is written), then export
    /// payloads, with the summary rewritten to carry the final offsets.
    #[instrument(skip_all)]
    pub fn save_to_vec(&mut self) -> Result<Vec<u8>> {
        self.summary.name_count = self.tables.names.len() as u32;
        self.summary.import_count = self.tables.imports.len() as u32;
        self.summary.export_count = self.tables.exports.len() as u32;
        if !self.summary.has_heritage_table() && self.summary.generations.is_empty() {
            self.summary.generations.push(FGenerationInfo {
                export_count: self.tables.exports.len() as i32,
                name_count: self.tables.names.len() as i32,
                net_object_count: 0,
            });
        }

        let payloads: Vec<Vec<u8>> = (0..self.tables.exports.len()).map(|i| self.read_export_payload(i)).collect::<Result<_>>()?;
        // Serial offsets are about to describe the file being written, not
        // the source stream, so pin the payload bytes to the exports.
        for (export, payload) in self.tables.exports.iter_mut().zip(&payloads) {
            if export.raw_data.is_none() && export.serial_size > 0 {
                export.raw_data = Some(payload.clone());
            }
        }

        let mut order: Vec<(TableKind, u64)> = vec![
            (TableKind::Names, prior_offset(self.summary.name_offset)),
            (TableKind::Imports, prior_offset(self.summary.import_offset)),
            (TableKind::Exports, prior_offset(self.summary.export_offset)),
        ];
        if self.summary.has_depends_table() && (self.summary.depends_offset != 0 || self.tables.depends.iter().any(|d| !d.is_empty())) {
            order.push((TableKind::Depends, prior_offset(self.summary.depends_offset)));
        }
        if self.summary.has_heritage_table() {
            order.push((TableKind::Heritage, prior_offset(self.summary.heritage_offset)));
        }
        if !self.summary.is_ue4()
            && self.summary.version >= V::AddedImportExportGuidsTable as u32
            && (self.summary.import_export_guids_offset != 0 || !self.tables.import_export_guids.is_empty())
        {
            order.push((TableKind::Guids, prior_offset(self.summary.import_export_guids_offset)));
        }
        if self.summary.thumbnail_table_offset != 0 || !self.tables.thumbnails.is_empty() {
            order.push((TableKind::Thumbnails, prior_offset(self.summary.thumbnail_table_offset)));
        }
        order.sort_by_key(|&(kind, offset)| (offset, kind));

        // Payload regions follow the header in their previous on-disk order.
        let mut payload_order: Vec<usize> = (0..self.tables.exports.len()).collect();
        payload_order.sort_by_key(|&i| (self.tables.exports[i].serial_offset, i));

        // Packed serial offsets change their encoded width as they move, so
        // the layout is iterated until it stops shifting.
        for _pass in 0..8 {
            let before = self.layout_snapshot();
            let gates = self.summary.clone();
            let mut w = Writer::in_memory(self.endian);
            self.summary.ser(&mut w, self.branch.as_ref())?;

            for &(kind, _) in &order {
                match kind {
                    TableKind::Names => {
                        self.summary.name_offset = w.position() as u32;
                        for entry in &self.tables.names {
                            self.branch.write_name_entry(entry, &mut w, &gates)?;
                        }
                    }
                    TableKind::Imports => {
                        self.summary.import_offset = w.position() as u32;
                        for import in &self.tables.imports {
                            w.ser_ctx(import, &gates)?;
                        }
                    }
                    TableKind::Exports => {
                        self.summary.export_offset = w.position() as u32;
                        for export in &self.tables.exports {
                            self.branch.write_export(export, &mut w, &gates)?;
                        }
                    }
                    TableKind::Depends => {
                        self.summary.depends_offset = w.position() as u32;
                        for depends in &self.tables.depends {
                            w.ser(depends)?;
                        }
                    }
                    TableKind::Heritage => {
                        self.summary.heritage_count = self.tables.heritages.len() as u32;
                        self.summary.heritage_offset = w.position() as u32;
                        for guid in &self.tables.heritages {
                            w.ser(guid)?;
                        }
                    }
                    TableKind::Guids => {
                        self.summary.import_guids_count = self.tables.import_export_guids.import_guids.len() as u32;
                        self.summary.export_guids_count = self.tables.import_export_guids.export_guids.len() as u32;
                        self.summary.import_export_guids_offset = w.position() as u32;
                        self.tables.import_export_guids.write(&mut w)?;
                    }
                    TableKind::Thumbnails => {
                        self.summary.thumbnail_table_offset = w.position() as u32;
                        w.write_count(self.tables.thumbnails.len())?;
                        for thumbnail in &self.tables.thumbnails {
                            w.ser(thumbnail)?;
                        }
                    }
                }
            }

            self.summary.total_header_size = w.position() as u32;
            for &index in &payload_order {
                if self.tables.exports[index].serial_size == 0 {
                    continue;
                }
                self.tables.exports[index].serial_offset = w.position() as i64;
                w.write_bytes(&payloads[index])?;
            }
            self.branch.post_serialize_package(&self.summary, &self.tables, &mut w)?;

            if self.layout_snapshot() == before {
                return Ok(w.into_vec());
            }
        }
        bail!("package layout failed to stabilize while saving {}", self.name)
    }

    pub fn save<W: std::io::Write>(&mut self, mut sink: W) -> Result<()> {
        let bytes = self.save_to_vec()?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    fn layout_snapshot(&self) -> Vec<u64> {
        let mut snapshot = vec![
            u64::from(self.summary.name_offset),
            u64::from(self.summary.import_offset),
            u64::from(self.summary.export_offset),
            u64::from(self.summary.depends_offset),
            u64::from(self.summary.heritage_offset),
            u64::from(self.summary.import_export_guids_offset),
            u64::from(self.summary.thumbnail_table_offset),
            u64::from(self.summary.total_header_size),
        ];
        snapshot.extend(self.tables.exports.iter().map(|e| e.serial_offset as u64));
        snapshot
    }
}

fn prior_offset(offset: u32) -> u64 {
    if offset == 0 { u64::MAX } else { u64::from(offset) }
}
