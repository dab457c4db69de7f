use crate::error::{Error, Result};
use std::fs;

/// A parsed memory mapping from /proc/self/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub pathname: Option<String>,
}

impl MemoryMapping {
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// File-backed mappings have an absolute path; pseudo entries such as
    /// `[stack]` or `[vdso]` do not.
    pub fn file_path(&self) -> Option<&str> {
        self.pathname.as_deref().filter(|p| p.starts_with('/'))
    }
}

/// Snapshot of the mappings of the current process
#[derive(Debug, Clone, Default)]
pub struct MemoryMaps {
    mappings: Vec<MemoryMapping>,
}

impl MemoryMaps {
    /// Parse /proc/self/maps
    pub fn for_self() -> Result<Self> {
        Self::read("/proc/self/maps")
    }

    fn read(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::UnsupportedPlatform(format!("Cannot read {}: {}", path, e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mappings = content.lines().filter_map(Self::parse_line).collect();
        MemoryMaps { mappings }
    }

    fn parse_line(line: &str) -> Option<MemoryMapping> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }

        // "start-end" in hex
        let (start, end) = parts[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        let perms = parts[1].to_string();
        let offset = u64::from_str_radix(parts[2], 16).ok()?;

        // Anonymous mappings have no pathname; paths may contain spaces
        let pathname = if parts.len() >= 6 {
            Some(parts[5..].join(" "))
        } else {
            None
        };

        Some(MemoryMapping {
            start,
            end,
            perms,
            offset,
            pathname,
        })
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// Executable file-backed mapping containing `addr`
    pub fn find_executable(&self, addr: u64) -> Option<&MemoryMapping> {
        self.mappings
            .iter()
            .find(|m| m.is_executable() && m.contains(addr))
    }

    /// Load base of the file mapped at `path`.
    ///
    /// Uses the FIRST mapping of the file: it has file offset 0 for ELF
    /// objects, so `start - offset` is the true load base. The executable
    /// segment has a non-zero offset and would give a wrong base.
    pub fn load_base(&self, path: &str) -> Option<u64> {
        self.mappings
            .iter()
            .find(|m| m.pathname.as_deref() == Some(path))
            .map(|m| m.start.wrapping_sub(m.offset))
    }
}
