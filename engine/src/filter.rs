//! Skip decision for a single filesystem entry.
//!
//! `FilterEngine` combines attribute checks with the user's include and
//! exclude rules. Evaluation order, first match wins:
//! 1. nonexistent path: never skipped
//! 2. reparse point: skipped
//! 3. OS metadata folder: skipped unless hidden and system are both included
//! 4. hidden attribute with hidden files excluded: skipped
//! 5. system attribute with system files excluded: skipped
//! 6. any exclude rule matches: skipped
//! 7. include rules present, entry is a file, no include rule matches: skipped
//! 8. otherwise kept

use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::attributes::{AttributeFlags, AttributeSource, PlatformAttributes};
use crate::error::EngineError;
use crate::model::{AttributeMode, FilterRule, PolicyConfig, RuleKind};

/// Folder names that are only ever copied whole, with hidden and system included.
const PROTECTED_DIR_NAMES: &[&str] = &["appdata", "$recycle.bin", "system volume information"];

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Index of the `]` closing the class opened at `start`, if any.
///
/// A `]` right after `[` or `[!` is a member of the class, not its end.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if chars.get(i) == Some(&'!') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    chars[i.min(chars.len())..]
        .iter()
        .position(|&c| c == ']')
        .map(|offset| i + offset)
}

/// Rewrite a shell wildcard so globset reads it the way `fnmatch` does:
/// an unclosed `[` and braces are literal characters.
fn wildcard_to_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut glob = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    glob.extend(&chars[i..=end]);
                    i = end + 1;
                    continue;
                }
                None => glob.push_str("[[]"),
            },
            '{' => glob.push_str("[{]"),
            '}' => glob.push_str("[}]"),
            c => glob.push(c),
        }
        i += 1;
    }
    glob
}

fn compile_glob(pattern: &str, original: &str) -> Result<GlobMatcher, EngineError> {
    let glob = GlobBuilder::new(&wildcard_to_glob(pattern))
        .case_insensitive(true)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .map_err(|error| EngineError::InvalidRule {
            pattern: original.to_string(),
            reason: error.to_string(),
        })?;
    Ok(glob.compile_matcher())
}

/// A rule with its lowercase needle and optional wildcard matcher prepared.
#[derive(Debug, Clone)]
struct CompiledRule {
    kind: RuleKind,
    /// Lowercased pattern as written
    raw: String,
    /// Lowercased pattern with extension dot stripped or separators normalized
    needle: String,
    glob: Option<GlobMatcher>,
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self, EngineError> {
        let raw = rule.pattern.trim().to_lowercase();
        let (needle, glob) = match rule.kind {
            RuleKind::Extension => (raw.trim_start_matches('.').to_string(), None),
            RuleKind::Name => {
                let glob = if has_wildcard(&raw) {
                    Some(compile_glob(rule.pattern.trim(), &rule.pattern)?)
                } else {
                    None
                };
                (raw.clone(), glob)
            }
            RuleKind::Path => {
                let needle = normalize_separators(&raw);
                let glob = if has_wildcard(&raw) {
                    Some(compile_glob(&normalize_separators(rule.pattern.trim()), &rule.pattern)?)
                } else {
                    None
                };
                (needle, glob)
            }
        };
        Ok(CompiledRule {
            kind: rule.kind,
            raw,
            needle,
            glob,
        })
    }

    fn matches(&self, path: &Path, is_dir: bool) -> bool {
        match self.kind {
            RuleKind::Extension => {
                if is_dir {
                    return false;
                }
                path.extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase() == self.needle)
                    .unwrap_or(false)
            }
            RuleKind::Name => {
                let Some(name) = path.file_name() else {
                    return false;
                };
                let name = name.to_string_lossy();
                match &self.glob {
                    Some(glob) => glob.is_match(&*name),
                    None => name.to_lowercase() == self.needle,
                }
            }
            RuleKind::Path => {
                let full = path.to_string_lossy();
                if let Some(glob) = &self.glob {
                    return glob.is_match(normalize_separators(&full));
                }
                let lower = full.to_lowercase();
                lower.contains(&self.raw) || normalize_separators(&lower).contains(&self.needle)
            }
        }
    }
}

/// The skip predicate for one run.
///
/// Built once per run from an immutable `PolicyConfig`; evaluation never
/// mutates state, so the walk, estimate and copy passes may each call it.
#[derive(Clone)]
pub struct FilterEngine {
    policy: PolicyConfig,
    include: Vec<CompiledRule>,
    exclude: Vec<CompiledRule>,
    attributes: Arc<dyn AttributeSource>,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FilterEngine {
    /// Build a filter using the host platform's attributes.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidRule` if a wildcard pattern does not compile.
    pub fn new(policy: PolicyConfig) -> Result<Self, EngineError> {
        Self::with_attributes(policy, Arc::new(PlatformAttributes))
    }

    pub fn with_attributes(
        policy: PolicyConfig,
        attributes: Arc<dyn AttributeSource>,
    ) -> Result<Self, EngineError> {
        let include = policy
            .include_rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = policy
            .exclude_rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterEngine {
            policy,
            include,
            exclude,
            attributes,
        })
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Decide whether an entry is left out of the run.
    pub fn should_skip(&self, path: &Path, is_dir: bool) -> bool {
        let flags = match self.attributes.attributes(path) {
            Ok(flags) => flags,
            Err(err) if err.is_not_found() => return false,
            Err(err) => {
                // Unknown attributes must not silently drop data
                warn!("{}; treating as a plain entry", err);
                AttributeFlags {
                    is_directory: is_dir,
                    ..AttributeFlags::default()
                }
            }
        };

        if flags.reparse_point {
            return true;
        }

        if is_dir && self.is_protected_dir(path) {
            let both_included = self.policy.hidden_mode == AttributeMode::Include
                && self.policy.system_mode == AttributeMode::Include;
            if !both_included {
                return true;
            }
        }

        if flags.hidden && self.policy.hidden_mode == AttributeMode::Exclude {
            return true;
        }
        if flags.system && self.policy.system_mode == AttributeMode::Exclude {
            return true;
        }

        if self.exclude.iter().any(|rule| rule.matches(path, is_dir)) {
            return true;
        }

        // Include rules only narrow files; directories stay traversable
        if !self.include.is_empty() && !is_dir {
            return !self.include.iter().any(|rule| rule.matches(path, is_dir));
        }

        false
    }

    fn is_protected_dir(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| {
                let name = name.to_string_lossy().to_lowercase();
                PROTECTED_DIR_NAMES.contains(&name.as_str())
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AttributeUnavailable;
    use std::fs;

    /// Attribute source that flags entries by file name.
    #[derive(Default)]
    pub(crate) struct FakeAttributes {
        pub hidden: Vec<&'static str>,
        pub system: Vec<&'static str>,
        pub reparse: Vec<&'static str>,
        /// Names whose attribute query fails with permission denied
        pub denied: Vec<&'static str>,
    }

    impl AttributeSource for FakeAttributes {
        fn attributes(&self, path: &Path) -> Result<AttributeFlags, AttributeUnavailable> {
            let denied = path
                .file_name()
                .map(|n| self.denied.iter().any(|d| n == *d))
                .unwrap_or(false);
            if denied {
                return Err(AttributeUnavailable {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            let metadata = fs::symlink_metadata(path).map_err(|source| AttributeUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(AttributeFlags {
                hidden: self.hidden.contains(&name.as_str()),
                system: self.system.contains(&name.as_str()),
                reparse_point: self.reparse.contains(&name.as_str()),
                is_directory: metadata.is_dir(),
            })
        }
    }

    fn engine(policy: PolicyConfig, fake: FakeAttributes) -> FilterEngine {
        FilterEngine::with_attributes(policy, Arc::new(fake)).expect("Failed to build filter")
    }

    fn touch(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").expect("Failed to write file");
        path
    }

    #[test]
    fn test_hidden_entries_follow_hidden_mode() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = touch(temp_dir.path(), "secret.txt");
        let plain = touch(temp_dir.path(), "plain.txt");
        let fake = || FakeAttributes {
            hidden: vec!["secret.txt"],
            ..Default::default()
        };

        let excluding = engine(PolicyConfig::default(), fake());
        assert!(excluding.should_skip(&file, false));
        assert!(!excluding.should_skip(&plain, false));

        let including = engine(
            PolicyConfig {
                hidden_mode: AttributeMode::Include,
                ..PolicyConfig::default()
            },
            fake(),
        );
        assert!(!including.should_skip(&file, false));
    }

    #[test]
    fn test_system_entries_follow_system_mode() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = touch(temp_dir.path(), "desktop.ini");
        let fake = || FakeAttributes {
            system: vec!["desktop.ini"],
            ..Default::default()
        };

        assert!(engine(PolicyConfig::default(), fake()).should_skip(&file, false));
        let including = PolicyConfig {
            system_mode: AttributeMode::Include,
            ..PolicyConfig::default()
        };
        assert!(!engine(including, fake()).should_skip(&file, false));
    }

    #[test]
    fn test_reparse_points_are_always_skipped() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let link = touch(temp_dir.path(), "junction");
        let policy = PolicyConfig {
            hidden_mode: AttributeMode::Include,
            system_mode: AttributeMode::Include,
            include_rules: vec![FilterRule::name("junction")],
            exclude_rules: Vec::new(),
        };
        let filter = engine(
            policy,
            FakeAttributes {
                reparse: vec!["junction"],
                ..Default::default()
            },
        );
        assert!(filter.should_skip(&link, false));
        assert!(filter.should_skip(&link, true));
    }

    #[test]
    fn test_missing_path_is_never_skipped() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let policy = PolicyConfig {
            exclude_rules: vec![FilterRule::name("ghost.txt")],
            ..PolicyConfig::default()
        };
        let filter = engine(policy, FakeAttributes::default());
        assert!(!filter.should_skip(&temp_dir.path().join("ghost.txt"), false));
    }

    #[test]
    fn test_protected_folder_needs_hidden_and_system() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let app_data = temp_dir.path().join("AppData");
        fs::create_dir(&app_data).expect("Failed to create dir");

        let only_hidden = PolicyConfig {
            hidden_mode: AttributeMode::Include,
            ..PolicyConfig::default()
        };
        assert!(engine(only_hidden, FakeAttributes::default()).should_skip(&app_data, true));

        let both = PolicyConfig {
            hidden_mode: AttributeMode::Include,
            system_mode: AttributeMode::Include,
            ..PolicyConfig::default()
        };
        assert!(!engine(both, FakeAttributes::default()).should_skip(&app_data, true));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = touch(temp_dir.path(), "report.tmp");
        let policy = PolicyConfig {
            include_rules: vec![FilterRule::extension("tmp")],
            exclude_rules: vec![FilterRule::name("report.tmp")],
            ..PolicyConfig::default()
        };
        assert!(engine(policy, FakeAttributes::default()).should_skip(&file, false));
    }

    #[test]
    fn test_include_rules_narrow_files_but_not_directories() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let doc = touch(temp_dir.path(), "notes.TXT");
        let image = touch(temp_dir.path(), "photo.jpg");
        let folder = temp_dir.path().join("photo.jpg.d");
        fs::create_dir(&folder).expect("Failed to create dir");

        let policy = PolicyConfig {
            include_rules: vec![FilterRule::extension(".txt")],
            ..PolicyConfig::default()
        };
        let filter = engine(policy, FakeAttributes::default());
        assert!(!filter.should_skip(&doc, false));
        assert!(filter.should_skip(&image, false));
        assert!(!filter.should_skip(&folder, true));
    }

    #[test]
    fn test_extension_rule_never_matches_directories() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let folder = temp_dir.path().join("archive.zip");
        fs::create_dir(&folder).expect("Failed to create dir");
        let policy = PolicyConfig {
            exclude_rules: vec![FilterRule::extension("zip")],
            ..PolicyConfig::default()
        };
        assert!(!engine(policy, FakeAttributes::default()).should_skip(&folder, true));
    }

    #[test]
    fn test_name_rules_exact_and_wildcard() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let thumbs = touch(temp_dir.path(), "Thumbs.db");
        let backup = touch(temp_dir.path(), "draft~1.BAK");
        let keep = touch(temp_dir.path(), "thumbs.db.txt");

        let policy = PolicyConfig {
            exclude_rules: vec![FilterRule::name("thumbs.db"), FilterRule::name("*.bak")],
            ..PolicyConfig::default()
        };
        let filter = engine(policy, FakeAttributes::default());
        assert!(filter.should_skip(&thumbs, false));
        assert!(filter.should_skip(&backup, false));
        assert!(!filter.should_skip(&keep, false));
    }

    #[test]
    fn test_path_rules_substring_separators_and_wildcard() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = temp_dir.path().join("Browser").join("Cache");
        fs::create_dir_all(&cache).expect("Failed to create dirs");
        let data = touch(&cache, "data_1");
        let logs = temp_dir.path().join("logs");
        fs::create_dir(&logs).expect("Failed to create dir");
        let log = touch(&logs, "app.log");

        let substring = PolicyConfig {
            exclude_rules: vec![FilterRule::path("browser\\cache")],
            ..PolicyConfig::default()
        };
        let filter = engine(substring, FakeAttributes::default());
        assert!(filter.should_skip(&cache, true));
        assert!(filter.should_skip(&data, false));
        assert!(!filter.should_skip(&log, false));

        let wildcard = PolicyConfig {
            exclude_rules: vec![FilterRule::path("*/LOGS/*.log")],
            ..PolicyConfig::default()
        };
        let filter = engine(wildcard, FakeAttributes::default());
        assert!(filter.should_skip(&log, false));
        assert!(!filter.should_skip(&data, false));
    }

    #[test]
    fn test_unreadable_attributes_mean_plain_entry() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let locked = touch(temp_dir.path(), "locked.txt");
        let fake = || FakeAttributes {
            hidden: vec!["locked.txt"],
            denied: vec!["locked.txt"],
            ..Default::default()
        };

        // Hidden flag is never seen, so the file is kept
        assert!(!engine(PolicyConfig::default(), fake()).should_skip(&locked, false));

        // Rules still apply to it
        let excluding = PolicyConfig {
            exclude_rules: vec![FilterRule::name("locked.txt")],
            ..PolicyConfig::default()
        };
        assert!(engine(excluding, fake()).should_skip(&locked, false));
    }

    #[test]
    fn test_unclosed_bracket_and_braces_are_literal() {
        assert_eq!(wildcard_to_glob("*[draft*"), "*[[]draft*");
        assert_eq!(wildcard_to_glob("file[0-9].txt"), "file[0-9].txt");
        assert_eq!(wildcard_to_glob("[]]x*"), "[]]x*");
        assert_eq!(wildcard_to_glob("{a,b}*"), "[{]a,b[}]*");

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let draft = touch(temp_dir.path(), "report[draft v2");
        let braces = touch(temp_dir.path(), "{a,b}.txt");
        let other = touch(temp_dir.path(), "report.txt");
        let policy = PolicyConfig {
            exclude_rules: vec![FilterRule::name("*[draft*"), FilterRule::name("{a,b}*")],
            ..PolicyConfig::default()
        };
        let filter = engine(policy, FakeAttributes::default());
        assert!(filter.should_skip(&draft, false));
        assert!(filter.should_skip(&braces, false));
        assert!(!filter.should_skip(&other, false));
    }

    #[test]
    fn test_invalid_wildcard_is_rejected() {
        let policy = PolicyConfig {
            exclude_rules: vec![FilterRule::name("*[z-a].txt")],
            ..PolicyConfig::default()
        };
        let result = FilterEngine::with_attributes(policy, Arc::new(FakeAttributes::default()));
        assert!(matches!(result, Err(EngineError::InvalidRule { .. })));
    }
}
