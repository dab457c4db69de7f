use super::schema::{self, SCHEMA_VERSION};
use crate::error::Result;
use crate::params::SamplingParams;
use crate::profile::{Frame, Module, Profile};
use crate::thread::PlatformThreadId;
use rusqlite::{Connection, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key identifying a module row: (base_address, build_id, path)
type ModuleKey = (u64, String, PathBuf);

/// Storage writer for drained profiles
pub struct Storage {
    conn: Connection,
    /// Cache: module key -> modules.id
    module_cache: HashMap<ModuleKey, i64>,
}

impl Storage {
    /// Create a new storage file for a recording of `thread`
    pub fn new(path: &Path, thread: PlatformThreadId, params: &SamplingParams) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::create_tables(&conn)?;

        schema::set_meta(&conn, "version", &SCHEMA_VERSION.to_string())?;
        schema::set_meta(&conn, "pid", &std::process::id().to_string())?;
        schema::set_meta(&conn, "thread", &thread.to_string())?;
        schema::set_meta(&conn, "params", &params.to_string())?;
        schema::set_meta(&conn, "start_time", &chrono::Utc::now().to_rfc3339())?;

        Ok(Storage {
            conn,
            module_cache: HashMap::new(),
        })
    }

    /// Set a metadata key
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        schema::set_meta(&self.conn, key, value)?;
        Ok(())
    }

    /// Write one profile in a single transaction. Returns its row id.
    pub fn record_profile(&mut self, profile: &Profile) -> Result<i64> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO profiles (duration_us, sampling_period_us, preserve_sample_ordering)
             VALUES (?, ?, ?)",
            rusqlite::params![
                micros(profile.profile_duration),
                micros(profile.sampling_period),
                profile.preserve_sample_ordering
            ],
        )?;
        let profile_id = tx.last_insert_rowid();

        // Row ids of this profile's modules, by module index. Only merged
        // into the cache once the transaction commits.
        let mut inserted = Vec::new();
        let module_ids = profile
            .modules
            .iter()
            .map(|module| {
                let key = module_key(module);
                match self.module_cache.get(&key) {
                    Some(&id) => Ok(id),
                    None => {
                        let id = insert_module(&tx, module)?;
                        inserted.push((key, id));
                        Ok(id)
                    }
                }
            })
            .collect::<rusqlite::Result<Vec<i64>>>()?;

        {
            let mut module_stmt = tx.prepare_cached(
                "INSERT INTO profile_modules (profile_id, ordinal, module_id) VALUES (?, ?, ?)",
            )?;
            for (ordinal, module_id) in module_ids.iter().enumerate() {
                module_stmt.execute(rusqlite::params![profile_id, ordinal as i64, module_id])?;
            }

            let mut sample_stmt =
                tx.prepare_cached("INSERT INTO samples (profile_id, seq) VALUES (?, ?)")?;
            let mut frame_stmt = tx.prepare_cached(
                "INSERT INTO frames (sample_id, depth, instruction_pointer, module_index)
                 VALUES (?, ?, ?, ?)",
            )?;

            for (seq, sample) in profile.samples.iter().enumerate() {
                let sample_id = sample_stmt.insert(rusqlite::params![profile_id, seq as i64])?;
                for (depth, frame) in sample.iter().enumerate() {
                    let module_index = frame
                        .module_index
                        .filter(|&i| i < module_ids.len())
                        .map(|i| i as i64);
                    frame_stmt.execute(rusqlite::params![
                        sample_id,
                        depth as i64,
                        frame.instruction_pointer as i64,
                        module_index
                    ])?;
                }
            }
        }

        tx.commit()?;
        self.module_cache.extend(inserted);
        Ok(profile_id)
    }

    /// Number of profiles written
    pub fn profile_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of samples written
    pub fn sample_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

fn module_key(module: &Module) -> ModuleKey {
    (module.base_address, module.id.clone(), module.path.clone())
}

fn insert_module(tx: &Transaction<'_>, module: &Module) -> rusqlite::Result<i64> {
    let path = module.path.to_string_lossy().into_owned();
    tx.execute(
        "INSERT OR IGNORE INTO modules (base_address, build_id, path) VALUES (?, ?, ?)",
        rusqlite::params![module.base_address as i64, &module.id, &path],
    )?;
    tx.query_row(
        "SELECT id FROM modules WHERE base_address = ? AND build_id = ? AND path = ?",
        rusqlite::params![module.base_address as i64, &module.id, &path],
        |row| row.get(0),
    )
}

/// Totals of a recording
#[derive(Debug, Clone, Default)]
pub struct RecordingSummary {
    pub profiles: u64,
    pub samples: u64,
    pub frames: u64,
    /// Sum of the profiles' collection time
    pub duration: Duration,
}

pub fn query_summary(conn: &Connection) -> rusqlite::Result<RecordingSummary> {
    let (profiles, duration_us): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(duration_us), 0) FROM profiles",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let samples: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
    let frames: i64 = conn.query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?;

    Ok(RecordingSummary {
        profiles: profiles as u64,
        samples: samples as u64,
        frames: frames as u64,
        duration: Duration::from_micros(duration_us.max(0) as u64),
    })
}

/// Query results for the hottest innermost frames
#[derive(Debug, Clone)]
pub struct LeafEntry {
    /// Module path, or `None` for unresolved frames
    pub module: Option<String>,
    /// Offset from the module base (absolute address if unresolved)
    pub offset: u64,
    pub samples: u64,
    /// Share of all samples, empty ones included
    pub percent: f64,
}

/// Innermost frames grouped by (module, offset), hottest first
pub fn query_top_leaves(
    conn: &Connection,
    limit: usize,
    threshold: f64,
) -> rusqlite::Result<Vec<LeafEntry>> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        r#"
        SELECT m.path,
               CASE WHEN m.id IS NULL THEN f.instruction_pointer
                    ELSE f.instruction_pointer - m.base_address END AS offset,
               COUNT(*) AS n
        FROM frames f
        JOIN samples s ON s.id = f.sample_id
        LEFT JOIN profile_modules pm
               ON pm.profile_id = s.profile_id AND pm.ordinal = f.module_index
        LEFT JOIN modules m ON m.id = pm.module_id
        WHERE f.depth = 0
        GROUP BY m.path, offset
        ORDER BY n DESC, m.path, offset
        LIMIT ?
        "#,
    )?;

    let rows = stmt.query_map([limit as i64], |row| {
        let module: Option<String> = row.get(0)?;
        let offset: i64 = row.get(1)?;
        let count: i64 = row.get(2)?;
        Ok(LeafEntry {
            module,
            offset: offset as u64,
            samples: count as u64,
            percent: count as f64 * 100.0 / total as f64,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let entry = row?;
        if entry.percent >= threshold {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Read all profiles back, in the order they were written.
///
/// Each profile gets back its own module list in the original order, modules
/// no frame refers to included.
pub fn load_profiles(conn: &Connection) -> rusqlite::Result<Vec<Profile>> {
    let mut profile_stmt = conn.prepare(
        "SELECT id, duration_us, sampling_period_us, preserve_sample_ordering
         FROM profiles ORDER BY id",
    )?;
    let headers = profile_stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut module_stmt = conn.prepare(
        r#"
        SELECT m.base_address, m.build_id, m.path
        FROM profile_modules pm
        JOIN modules m ON m.id = pm.module_id
        WHERE pm.profile_id = ?
        ORDER BY pm.ordinal
        "#,
    )?;
    let mut frame_stmt = conn.prepare(
        r#"
        SELECT s.id, f.instruction_pointer, f.module_index
        FROM samples s
        LEFT JOIN frames f ON f.sample_id = s.id
        WHERE s.profile_id = ?
        ORDER BY s.seq, f.depth
        "#,
    )?;

    let mut profiles = Vec::with_capacity(headers.len());
    for (profile_id, duration_us, period_us, preserve) in headers {
        let modules = module_stmt
            .query_map([profile_id], |row| {
                let base: i64 = row.get(0)?;
                let build_id: String = row.get(1)?;
                let path: String = row.get(2)?;
                Ok(Module::new(base as u64, build_id, path))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut samples = Vec::new();
        let mut current_sample = None;

        let mut rows = frame_stmt.query([profile_id])?;
        while let Some(row) = rows.next()? {
            let sample_id: i64 = row.get(0)?;
            if current_sample != Some(sample_id) {
                current_sample = Some(sample_id);
                samples.push(Vec::new());
            }
            let Some(ip) = row.get::<_, Option<i64>>(1)? else {
                continue;
            };
            let module_index = row
                .get::<_, Option<i64>>(2)?
                .and_then(|i| usize::try_from(i).ok())
                .filter(|&i| i < modules.len());
            let frame = match module_index {
                Some(index) => Frame::new(ip as u64, index),
                None => Frame::unresolved(ip as u64),
            };
            if let Some(sample) = samples.last_mut() {
                sample.push(frame);
            }
        }

        profiles.push(Profile {
            modules,
            samples,
            profile_duration: Duration::from_micros(duration_us.max(0) as u64),
            sampling_period: Duration::from_micros(period_us.max(0) as u64),
            preserve_sample_ordering: preserve,
        });
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn libc_module() -> Module {
        Module::new(0x7f00_0000_0000, "abcd", "/usr/lib/libc.so.6")
    }

    fn exe_module() -> Module {
        Module::new(0x5555_0000_0000, "", "/usr/bin/app")
    }

    fn burst(hot_ip: u64) -> Profile {
        Profile {
            modules: vec![exe_module(), libc_module()],
            samples: vec![
                vec![Frame::new(hot_ip, 0), Frame::new(0x7f00_0000_0100, 1)],
                vec![Frame::new(hot_ip, 0)],
                vec![Frame::unresolved(0xdead)],
                Vec::new(),
            ],
            profile_duration: Duration::from_millis(40),
            sampling_period: Duration::from_millis(10),
            preserve_sample_ordering: true,
        }
    }

    fn storage(dir: &Path) -> Storage {
        Storage::new(
            &dir.join("test.db"),
            PlatformThreadId::from_raw(42),
            &SamplingParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_record_and_count() {
        let dir = tempdir().unwrap();
        let mut storage = storage(dir.path());

        storage.record_profile(&burst(0x5555_0000_0040)).unwrap();
        storage.record_profile(&burst(0x5555_0000_0080)).unwrap();

        assert_eq!(storage.profile_count().unwrap(), 2);
        assert_eq!(storage.sample_count().unwrap(), 8);

        let modules: i64 = storage
            .conn
            .query_row("SELECT COUNT(*) FROM modules", [], |row| row.get(0))
            .unwrap();
        assert_eq!(modules, 2);
        assert_eq!(
            schema::get_meta(&storage.conn, "thread").unwrap().as_deref(),
            Some("42")
        );
    }

    #[test]
    fn test_load_preserves_profiles() {
        let dir = tempdir().unwrap();
        let mut storage = storage(dir.path());
        let written = vec![burst(0x5555_0000_0040), Profile::default()];
        for profile in &written {
            storage.record_profile(profile).unwrap();
        }

        let loaded = load_profiles(&storage.conn).unwrap();
        assert_eq!(loaded, written);
        for profile in &loaded {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_load_keeps_module_list_as_written() {
        let dir = tempdir().unwrap();
        let mut storage = storage(dir.path());
        let vdso = Module::new(0x7fff_0000_0000, "", "[vdso]");
        // libc is listed first but only referenced second; vdso never
        let written = vec![
            Profile {
                modules: vec![libc_module(), exe_module(), vdso.clone()],
                samples: vec![vec![Frame::new(0x5555_0000_0010, 1)]],
                ..Default::default()
            },
            Profile {
                modules: vec![exe_module(), vdso, libc_module()],
                samples: vec![
                    vec![Frame::new(0x7f00_0000_0100, 2), Frame::new(0x5555_0000_0020, 0)],
                    vec![Frame::unresolved(0x42)],
                ],
                ..Default::default()
            },
        ];
        for profile in &written {
            storage.record_profile(profile).unwrap();
        }

        let loaded = load_profiles(&storage.conn).unwrap();
        assert_eq!(loaded, written);

        let shared: i64 = storage
            .conn
            .query_row("SELECT COUNT(*) FROM modules", [], |row| row.get(0))
            .unwrap();
        assert_eq!(shared, 3);

        let top = query_top_leaves(&storage.conn, 10, 0.0).unwrap();
        let paths: Vec<_> = top.iter().map(|e| e.module.as_deref()).collect();
        assert!(paths.contains(&Some("/usr/bin/app")));
        assert!(paths.contains(&Some("/usr/lib/libc.so.6")));
        assert!(paths.contains(&None));
    }

    #[test]
    fn test_top_leaves() {
        let dir = tempdir().unwrap();
        let mut storage = storage(dir.path());
        storage.record_profile(&burst(0x5555_0000_0040)).unwrap();

        let top = query_top_leaves(&storage.conn, 10, 0.0).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].module.as_deref(), Some("/usr/bin/app"));
        assert_eq!(top[0].offset, 0x40);
        assert_eq!(top[0].samples, 2);
        assert!((top[0].percent - 50.0).abs() < 1e-9);
        assert_eq!(top[1].module, None);
        assert_eq!(top[1].offset, 0xdead);

        let filtered = query_top_leaves(&storage.conn, 10, 30.0).unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_summary_of_empty_recording() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let summary = query_summary(&storage.conn).unwrap();
        assert_eq!(summary.profiles, 0);
        assert_eq!(summary.duration, Duration::ZERO);
        assert!(query_top_leaves(&storage.conn, 5, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_new_replaces_previous_recording() {
        let dir = tempdir().unwrap();
        {
            let mut storage = storage(dir.path());
            storage.record_profile(&burst(0x5555_0000_0040)).unwrap();
        }
        let storage = storage(dir.path());
        assert_eq!(storage.profile_count().unwrap(), 0);
    }
}
