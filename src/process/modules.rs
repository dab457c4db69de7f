use super::maps::MemoryMaps;
use crate::error::{Error, Result};
use crate::profile::Module;
use object::Object;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Maps instruction pointers of the current process to loaded modules.
///
/// Holds a snapshot of `/proc/self/maps` and a build-id cache keyed by path.
/// A lookup that misses the snapshot re-reads the maps once, since libraries
/// may have been loaded after the snapshot was taken.
pub struct ModuleResolver {
    maps: MemoryMaps,
    build_ids: HashMap<String, String>,
}

impl ModuleResolver {
    pub fn new() -> Result<Self> {
        Ok(ModuleResolver {
            maps: MemoryMaps::for_self()?,
            build_ids: HashMap::new(),
        })
    }

    pub fn from_maps(maps: MemoryMaps) -> Self {
        ModuleResolver {
            maps,
            build_ids: HashMap::new(),
        }
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.maps = MemoryMaps::for_self()?;
        Ok(())
    }

    /// Module containing `addr`, refreshing the maps snapshot on a miss
    pub fn resolve(&mut self, addr: u64) -> Option<Module> {
        if let Some(module) = self.lookup(addr) {
            return Some(module);
        }
        if let Err(e) = self.refresh() {
            tracing::debug!("failed to refresh memory maps: {}", e);
            return None;
        }
        self.lookup(addr)
    }

    /// Module containing `addr` in the current snapshot
    pub fn lookup(&mut self, addr: u64) -> Option<Module> {
        let path = self.maps.find_executable(addr)?.file_path()?.to_string();
        let base = self.maps.load_base(&path)?;
        let id = self.build_id(&path);
        Some(Module::new(base, id, path))
    }

    fn build_id(&mut self, path: &str) -> String {
        if let Some(id) = self.build_ids.get(path) {
            return id.clone();
        }
        let id = match read_build_id(Path::new(path)) {
            Ok(Some(id)) => id,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::debug!("no build id for {}: {}", path, e);
                String::new()
            }
        };
        self.build_ids.insert(path.to_string(), id.clone());
        id
    }
}

/// Read the GNU build id note of an ELF file as lowercase hex
pub fn read_build_id(path: &Path) -> Result<Option<String>> {
    let file = File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }?;

    let object = object::File::parse(&*mmap).map_err(|e| Error::ModuleParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let build_id = object.build_id().map_err(|e| Error::ModuleParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(build_id.map(hex))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
