//! Finding script files and detecting changes to them

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use mlua::Lua;
use tracing::{debug, error, warn};

use crate::config::ScriptingConfig;

/// Default scan interval (1000ms = 1Hz)
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

const SCRIPT_EXTENSION: &str = "lua";

/// One unit of script code to execute at engine start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    /// In-memory code, mostly for hosts that embed scripts and for tests
    Chunk { name: String, code: String },
}

impl ScriptSource {
    pub fn chunk(name: impl Into<String>, code: impl Into<String>) -> Self {
        ScriptSource::Chunk {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ScriptSource::File(path) => path.display().to_string(),
            ScriptSource::Chunk { name, .. } => name.clone(),
        }
    }

    /// Compile and run the source in `lua`
    pub fn execute(&self, lua: &Lua) -> mlua::Result<()> {
        match self {
            ScriptSource::File(path) => {
                let code = fs::read_to_string(path).map_err(mlua::Error::external)?;
                lua.load(code)
                    .set_name(format!("@{}", path.display()))
                    .exec()
            }
            ScriptSource::Chunk { name, code } => {
                lua.load(code.as_str()).set_name(name.as_str()).exec()
            }
        }
    }
}

/// Collect every `.lua` file under `root` and its extensions directory
///
/// The result is sorted and free of duplicates. A missing root is created so
/// operators have somewhere to drop scripts.
pub fn discover_scripts(root: &Path, extensions_dir: &Path) -> Vec<PathBuf> {
    debug!(target: "scripting", "Searching scripts from `{}`", root.display());

    let mut scripts = BTreeSet::new();
    for dir in [root, extensions_dir] {
        if !dir.exists() {
            error!(target: "scripting", "No `{}` directory found, creating it", dir.display());
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(target: "scripting", "Failed to create {}: {}", dir.display(), e);
            }
            continue;
        }
        collect_scripts(dir, &mut scripts);
    }

    scripts.into_iter().collect()
}

fn collect_scripts(dir: &Path, scripts: &mut BTreeSet<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: "scripting", "Failed to read script directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            collect_scripts(&path, scripts);
        } else if is_script(&path) {
            debug!(target: "scripting", "Adding script `{}`", path.display());
            scripts.insert(path);
        }
    }
}

fn is_script(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION)
}

/// Script sources for a configuration, with disabled scripts filtered out
pub fn script_sources(config: &ScriptingConfig) -> Vec<ScriptSource> {
    discover_scripts(&config.script_dir(), &config.extensions_dir())
        .into_iter()
        .filter(|path| {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default();
            let enabled = config.is_script_enabled(id);
            if !enabled {
                debug!(target: "scripting", "Skipping disabled script `{}`", path.display());
            }
            enabled
        })
        .map(ScriptSource::File)
        .collect()
}

/// Result of scanning for script changes
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub changed: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Polls a script tree for modified, added or removed `.lua` files
pub struct ScriptScanner {
    root: PathBuf,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    snapshot: HashMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    pub fn new(root: PathBuf) -> Self {
        Self::with_interval(root, DEFAULT_SCAN_INTERVAL)
    }

    /// Files already present are part of the baseline, not reported as added
    pub fn with_interval(root: PathBuf, scan_interval: Duration) -> Self {
        let snapshot = snapshot(&root);
        Self {
            root,
            scan_interval,
            last_scan: None,
            snapshot,
        }
    }

    pub fn should_scan(&self) -> bool {
        self.last_scan
            .map_or(true, |last| last.elapsed() >= self.scan_interval)
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());
        let current = snapshot(&self.root);
        let mut result = ScanResult::default();

        for (path, modified) in &current {
            match self.snapshot.get(path) {
                Some(previous) if previous != modified => result.changed.push(path.clone()),
                Some(_) => {}
                None => result.added.push(path.clone()),
            }
        }
        result.removed = self
            .snapshot
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        if result.has_changes() {
            debug!(
                target: "scripting",
                "Script changes under {}: {} changed, {} added, {} removed",
                self.root.display(),
                result.changed.len(),
                result.added.len(),
                result.removed.len()
            );
        }

        self.snapshot = current;
        result
    }
}

fn snapshot(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut scripts = BTreeSet::new();
    if root.exists() {
        collect_scripts(root, &mut scripts);
    }

    scripts
        .into_iter()
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified());
            match modified {
                Ok(modified) => Some((path, modified)),
                Err(e) => {
                    warn!(target: "scripting", "Failed to stat {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_discovers_nested_lua_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("b.lua"), "");
        write(&root.join("a.lua"), "");
        write(&root.join("notes.txt"), "");
        write(&root.join("bosses/hogger.lua"), "");
        write(&root.join("extensions/util.lua"), "");

        let scripts = discover_scripts(root, &root.join("extensions"));

        assert_eq!(
            scripts,
            vec![
                root.join("a.lua"),
                root.join("b.lua"),
                root.join("bosses/hogger.lua"),
                root.join("extensions/util.lua"),
            ]
        );
    }

    #[test]
    fn test_missing_directories_are_created() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("lua_scripts");
        let extensions = root.join("extensions");

        assert!(discover_scripts(&root, &extensions).is_empty());
        assert!(root.is_dir());
        assert!(extensions.is_dir());
    }

    #[test]
    fn test_disabled_scripts_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("keep.lua"), "");
        write(&root.join("skip.lua"), "");

        let config: ScriptingConfig = toml::from_str(&format!(
            "script_dir = {:?}\n[scripts.skip]\nenabled = false\n",
            root.display().to_string()
        ))
        .unwrap();

        assert_eq!(
            script_sources(&config),
            vec![ScriptSource::File(root.join("keep.lua"))]
        );
    }

    #[test]
    fn test_chunk_source_executes() {
        let lua = Lua::new();
        let source = ScriptSource::chunk("inline", "loaded = true");

        source.execute(&lua).unwrap();
        assert!(lua.globals().get::<bool>("loaded").unwrap());
        assert_eq!(source.name(), "inline");
    }

    #[test]
    fn test_file_source_reports_its_name_in_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.lua");
        write(&path, "error('nope')");

        let lua = Lua::new();
        let err = ScriptSource::File(path).execute(&lua).unwrap_err();
        assert!(err.to_string().contains("broken.lua"));
    }

    #[test]
    fn test_scanner_detects_changes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("existing.lua"), "-- v1");
        write(&root.join("doomed.lua"), "");

        let mut scanner = ScriptScanner::new(root.to_path_buf());
        assert!(scanner.should_scan());
        assert!(!scanner.scan_changes().has_changes());
        assert!(!scanner.should_scan());

        std::thread::sleep(Duration::from_millis(20));
        write(&root.join("existing.lua"), "-- v2, longer than before");
        write(&root.join("nested/new.lua"), "");
        write(&root.join("ignored.txt"), "");
        fs::remove_file(root.join("doomed.lua")).unwrap();

        let result = scanner.scan_changes();
        assert_eq!(result.changed, vec![root.join("existing.lua")]);
        assert_eq!(result.added, vec![root.join("nested/new.lua")]);
        assert_eq!(result.removed, vec![root.join("doomed.lua")]);
    }

    #[test]
    fn test_scanner_handles_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut scanner = ScriptScanner::with_interval(
            temp_dir.path().join("absent"),
            Duration::from_millis(5),
        );

        assert!(!scanner.scan_changes().has_changes());
        assert_eq!(scanner.scan_interval(), Duration::from_millis(5));
    }
}
