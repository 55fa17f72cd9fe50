/// Exercise manifest: scan, locks and cache
///
/// The manifest is the only source of `ExerciseIdentity` values. It is built
/// from the `content.exercises` directory of the first layer that has one
/// (workspace before runtime), ordered by numeric name prefixes and by
/// `info.toml` where present.
use crate::resolver::find_entry_file;
use chrono::{DateTime, Utc};
use progy_common::config::ProgressionMode;
use progy_common::error::EngineError;
use progy_common::progress::Progress;
use progy_common::types::ExerciseIdentity;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const INFO_TOML: &str = "info.toml";
pub const QUIZ_FILE: &str = "quiz.json";
pub const PRACTICE_MODULE: &str = "practice";
/// Staleness window of a cached manifest
pub const MANIFEST_TTL_MS: i64 = 5_000;

const PRACTICE_EXTENSIONS: &[&str] = &["rs", "ts", "js", "go"];
const UNNUMBERED_MODULE_WEIGHT: u32 = 999;
const UNNUMBERED_ENTRY_WEIGHT: u32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub module: String,
    pub module_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
    pub name: String,
    pub exercise_name: String,
    pub friendly_name: String,
    /// Relative to the layer root
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub markdown_path: Option<String>,
    pub has_quiz: bool,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<u32>,
}

impl ManifestEntry {
    pub fn identity(&self) -> ExerciseIdentity {
        ExerciseIdentity {
            id: self.id.clone(),
            module: self.module.clone(),
            entry_point: self.entry_point.clone(),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntries {
    pub module: String,
    pub entries: Vec<ManifestEntry>,
}

/// Modules in display order. Serializes as a JSON object keyed by module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub modules: Vec<ModuleEntries>,
}

impl Manifest {
    pub fn module(&self, module: &str) -> Option<&[ManifestEntry]> {
        self.modules
            .iter()
            .find(|m| m.module == module)
            .map(|m| m.entries.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.modules.iter().flat_map(|m| m.entries.iter())
    }

    pub fn find(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries().find(|e| e.id == id)
    }

    /// Validated path from an untrusted id to an identity
    pub fn lookup(&self, id: &str) -> Result<ExerciseIdentity, EngineError> {
        self.find(id)
            .map(ManifestEntry::identity)
            .ok_or_else(|| EngineError::UnknownExercise { id: id.to_string() })
    }

    pub fn total_entries(&self) -> usize {
        self.modules.iter().map(|m| m.entries.len()).sum()
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.modules.len()))?;
        for module in &self.modules {
            map.serialize_entry(&module.module, &module.entries)?;
        }
        map.end()
    }
}

/// Inputs of one scan
pub struct ScanOptions<'a> {
    /// Layer roots, workspace first
    pub layers: Vec<&'a Path>,
    /// `content.exercises`, relative to a layer root
    pub exercises_dir: &'a str,
    pub progression: ProgressionMode,
    pub bypass_locks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct ExerciseMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    xp: Option<u32>,
    #[serde(default)]
    prerequisites: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ModuleInfo {
    title: Option<String>,
    icon: Option<String>,
    completion_message: Option<String>,
    prerequisites: Vec<String>,
    /// In file order
    exercises: Vec<(String, ExerciseMeta)>,
}

impl ModuleInfo {
    fn exercise(&self, key: &str) -> Option<&ExerciseMeta> {
        self.exercises.iter().find(|(k, _)| k == key).map(|(_, m)| m)
    }
}

/// Scan the exercises directory into a manifest.
///
/// A missing exercises directory yields an empty manifest.
pub fn scan(options: &ScanOptions<'_>, progress: &Progress) -> Result<Manifest, EngineError> {
    let Some((root, exercises_root)) = options
        .layers
        .iter()
        .map(|layer| (*layer, layer.join(options.exercises_dir)))
        .find(|(_, dir)| dir.is_dir())
    else {
        warn!(dir = options.exercises_dir, "Exercises directory not found");
        return Ok(Manifest::default());
    };

    debug!(path = %exercises_root.display(), "Scanning exercises");

    let mut modules: Vec<String> = list_names(&exercises_root)?
        .into_iter()
        .filter(|name| {
            !name.starts_with('.') && name != "README.md" && name != "mod.rs" && name != PRACTICE_MODULE
        })
        .filter(|name| exercises_root.join(name).is_dir())
        .collect();
    modules.sort_by(|a, b| {
        module_weight(a)
            .cmp(&module_weight(b))
            .then_with(|| a.cmp(b))
    });

    let mut manifest = Manifest::default();
    for module in modules {
        let entries = scan_module(root, &exercises_root.join(&module), &module, options, progress, &manifest)?;
        manifest.modules.push(ModuleEntries { module, entries });
    }

    let practice_dir = exercises_root.join(PRACTICE_MODULE);
    if practice_dir.is_dir() {
        let entries = scan_practice(root, &practice_dir)?;
        manifest.modules.push(ModuleEntries {
            module: PRACTICE_MODULE.to_string(),
            entries,
        });
    }

    debug!(modules = manifest.modules.len(), exercises = manifest.total_entries(), "Manifest generated");
    Ok(manifest)
}

fn scan_module(
    root: &Path,
    module_dir: &Path,
    module: &str,
    options: &ScanOptions<'_>,
    progress: &Progress,
    earlier: &Manifest,
) -> Result<Vec<ManifestEntry>, EngineError> {
    let info = read_module_info(module_dir);
    let module_title = info.title.clone().unwrap_or_else(|| beautify(module));

    let module_lock = if options.bypass_locks {
        None
    } else {
        info.prerequisites
            .iter()
            .find_map(|req| check_prerequisite(req, progress, earlier).err())
    };

    // Keyed by the part of the name before the first '.'
    let mut candidates: Vec<(String, String)> = list_names(module_dir)?
        .into_iter()
        .filter(|name| {
            !name.starts_with('.')
                && name != "README.md"
                && name != "mod.rs"
                && name != INFO_TOML
                && name != QUIZ_FILE
        })
        .map(|name| (entry_key(&name).to_string(), name))
        .collect();

    let mut ordered = Vec::with_capacity(candidates.len());
    for (key, _) in &info.exercises {
        if let Some(pos) = candidates.iter().position(|(k, _)| k == key) {
            ordered.push(candidates.remove(pos));
        }
    }
    candidates.sort_by(|(_, a), (_, b)| entry_weight(a).cmp(&entry_weight(b)).then_with(|| a.cmp(b)));
    ordered.extend(candidates);

    let mut entries = Vec::with_capacity(ordered.len());
    let mut previous_passed = true;

    for (key, name) in ordered {
        let meta = info.exercise(&key);
        let entry_path = module_dir.join(&name);
        let is_dir = entry_path.is_dir();
        let entry_point = if is_dir { find_entry_file(&entry_path) } else { None };

        let mut friendly_name = meta
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| beautify(&key));
        let title_source = match entry_point {
            Some(file) => entry_path.join(file),
            None => entry_path.clone(),
        };
        if title_source.is_file() {
            if let Some(title) = fs::read_to_string(&title_source).ok().as_deref().and_then(title_header) {
                friendly_name = title;
            }
        }

        let id = format!("{}/{}", module, name);

        let lock_reason = if options.bypass_locks {
            None
        } else {
            module_lock.clone().or_else(|| {
                meta.into_iter()
                    .flat_map(|m| m.prerequisites.iter())
                    .find_map(|req| check_prerequisite(req, progress, earlier).err())
                    .or_else(|| {
                        (options.progression == ProgressionMode::Sequential && !previous_passed)
                            .then(|| "Complete previous lesson".to_string())
                    })
            })
        };
        let is_locked = lock_reason.is_some();

        let markdown_path = if is_dir {
            Some(relative_to(root, &entry_path.join("README.md")))
        } else {
            let sibling = module_dir.join(format!("{}.md", key));
            sibling.is_file().then(|| relative_to(root, &sibling))
        };

        entries.push(ManifestEntry {
            id: id.clone(),
            module: module.to_string(),
            module_title: module_title.clone(),
            module_icon: info.icon.clone(),
            completion_message: info.completion_message.clone(),
            name: name.clone(),
            exercise_name: key.clone(),
            friendly_name,
            path: relative_to(root, &entry_path),
            entry_point: entry_point.map(str::to_string),
            markdown_path,
            has_quiz: is_dir && entry_path.join(QUIZ_FILE).is_file(),
            kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
            is_locked,
            lock_reason,
            tags: meta.and_then(|m| m.tags.clone()),
            difficulty: meta.and_then(|m| m.difficulty.clone()),
            xp: meta.and_then(|m| m.xp),
        });

        previous_passed = !is_locked && progress.is_passed(&id);
    }

    Ok(entries)
}

fn scan_practice(root: &Path, practice_dir: &Path) -> Result<Vec<ManifestEntry>, EngineError> {
    let mut names: Vec<String> = list_names(practice_dir)?
        .into_iter()
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| PRACTICE_EXTENSIONS.contains(&e))
                .unwrap_or(false)
        })
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| {
            let key = entry_key(&name).to_string();
            ManifestEntry {
                id: format!("{}/{}", PRACTICE_MODULE, name),
                module: PRACTICE_MODULE.to_string(),
                module_title: "Practice".to_string(),
                module_icon: None,
                completion_message: None,
                path: relative_to(root, &practice_dir.join(&name)),
                friendly_name: beautify(&key),
                exercise_name: key,
                name,
                entry_point: None,
                markdown_path: None,
                has_quiz: false,
                kind: EntryKind::File,
                is_locked: false,
                lock_reason: None,
                tags: None,
                difficulty: None,
                xp: None,
            }
        })
        .collect())
}

fn list_names(dir: &Path) -> Result<Vec<String>, EngineError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn entry_key(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Leading number of the segment before the first `_`
fn module_weight(name: &str) -> u32 {
    leading_number(name.split('_').next().unwrap_or(name)).unwrap_or(UNNUMBERED_MODULE_WEIGHT)
}

/// `NN_` prefix, entries without one sort last
fn entry_weight(name: &str) -> u32 {
    match name.split_once('_') {
        Some((prefix, _)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => {
            prefix.parse().unwrap_or(UNNUMBERED_ENTRY_WEIGHT)
        }
        _ => UNNUMBERED_ENTRY_WEIGHT,
    }
}

/// `01_hello_world` -> `01 Hello World`, `variables1` -> `Variables 1`
pub fn beautify(name: &str) -> String {
    let spaced = name.replace('_', " ");

    let mut split = String::with_capacity(spaced.len() + 4);
    let mut prev: Option<char> = None;
    for c in spaced.chars() {
        if c.is_ascii_digit() && prev.map(|p| p.is_ascii_alphabetic()).unwrap_or(false) {
            split.push(' ');
        }
        split.push(c);
        prev = Some(c);
    }

    let mut out = String::with_capacity(split.len());
    let mut at_word_start = true;
    for c in split.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word;
    }
    out
}

/// `// Title: Something` anywhere in a source file
pub fn title_header(source: &str) -> Option<String> {
    source.lines().find_map(|line| {
        line.match_indices("//").find_map(|(idx, _)| {
            let rest = line[idx + 2..].trim_start();
            let value = rest
                .strip_prefix("Title:")
                .or_else(|| rest.strip_prefix("title:"))?
                .trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    })
}

/// Quote bare keys that start with a digit (`01_intro = "..."`), which
/// course authors write but TOML rejects.
fn quote_numeric_keys(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            let Some((key, rest)) = trimmed.split_once('=') else {
                return line.to_string();
            };
            let key = key.trim_end();
            let bare_numeric = key.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if bare_numeric {
                format!("{}\"{}\" ={}", indent, key, rest)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_module_info(module_dir: &Path) -> ModuleInfo {
    let path = module_dir.join(INFO_TOML);
    let Ok(content) = fs::read_to_string(&path) else {
        return ModuleInfo::default();
    };
    match parse_module_info(&content) {
        Ok(info) => info,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse info.toml");
            ModuleInfo::default()
        }
    }
}

fn parse_module_info(content: &str) -> Result<ModuleInfo, toml::de::Error> {
    let table: toml::Table = toml::from_str(&quote_numeric_keys(content))?;
    let mut info = ModuleInfo::default();

    if let Some(module) = table.get("module").and_then(|m| m.as_table()) {
        let text = |key: &str| module.get(key).and_then(|v| v.as_str()).map(str::to_string);
        info.title = text("title").or_else(|| text("message"));
        info.icon = text("icon");
        info.completion_message = text("completion_message");
        info.prerequisites = module
            .get("prerequisites")
            .and_then(|v| v.as_array())
            .map(|reqs| reqs.iter().filter_map(|r| r.as_str()).map(str::to_string).collect())
            .unwrap_or_default();
    }

    match table.get("exercises") {
        Some(toml::Value::Array(items)) => {
            for item in items {
                let meta: ExerciseMeta = item.clone().try_into()?;
                if let Some(name) = meta.name.clone() {
                    info.exercises.push((name, meta));
                }
            }
        }
        Some(toml::Value::Table(map)) => {
            for (name, value) in map {
                let meta = match value {
                    toml::Value::String(title) => ExerciseMeta {
                        title: Some(title.clone()),
                        ..Default::default()
                    },
                    other => other.clone().try_into()?,
                };
                info.exercises.push((name.clone(), meta));
            }
        }
        _ => {}
    }

    Ok(info)
}

/// `Ok` when met, otherwise the lock reason. Unknown forms are met.
pub fn check_prerequisite(req: &str, progress: &Progress, manifest: &Manifest) -> Result<(), String> {
    let lower = req.to_lowercase();

    if let Some(module) = lower
        .strip_prefix("module:")
        .or_else(|| lower.strip_prefix("module_"))
    {
        let entries = manifest.module(module).unwrap_or(&[]);
        if entries.iter().all(|e| progress.is_passed(&e.id)) {
            return Ok(());
        }
        return Err(format!("Complete all items in Module {}", beautify(module)));
    }

    if lower.starts_with("quiz:") {
        let mut parts = req.split(':').skip(1);
        let quiz_id = parts.next().unwrap_or_default();
        let required: u32 = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);

        let Some(quiz) = progress.quizzes.get(quiz_id) else {
            return Err(format!("Complete quiz '{}'", beautify(quiz_id)));
        };
        if required > 0 {
            let score = quiz.score.unwrap_or(if quiz.passed { 100 } else { 0 });
            if score < required {
                return Err(format!(
                    "Score at least {}% on quiz '{}'",
                    required,
                    beautify(quiz_id)
                ));
            }
        }
        if !quiz.passed {
            return Err(format!("Pass quiz '{}'", beautify(quiz_id)));
        }
        return Ok(());
    }

    if lower.starts_with("exercise:") {
        let exercise_id = &req["exercise:".len()..];
        if progress.is_passed(exercise_id) {
            return Ok(());
        }
        let short = exercise_id.rsplit('/').next().unwrap_or(exercise_id);
        return Err(format!("Complete exercise '{}'", beautify(short)));
    }

    Ok(())
}

/// Persist the manifest as pretty JSON, creating the parent directory
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| EngineError::Configuration(format!("manifest serialization failed: {}", e)))?;
    fs::write(path, json)?;
    Ok(())
}

/// Last manifest with the time it was generated
#[derive(Debug)]
pub struct ManifestCache {
    slot: Mutex<Option<(Manifest, DateTime<Utc>)>>,
    ttl: chrono::Duration,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(chrono::Duration::milliseconds(MANIFEST_TTL_MS))
    }
}

impl ManifestCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// Cached manifest if it was generated less than `ttl` before `now`
    pub fn get_fresh(&self, now: DateTime<Utc>) -> Option<Manifest> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|(_, generated_at)| now.signed_duration_since(*generated_at) < self.ttl)
            .map(|(manifest, _)| manifest.clone())
    }

    pub fn store(&self, manifest: Manifest, generated_at: DateTime<Utc>) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some((manifest, generated_at));
    }

    pub fn invalidate(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, at)| *at)
    }
}
