//! Scan profiles, directory exclusions, and option resolution.

use std::path::Path;

use regex::Regex;

/// Built-in scan profiles. `InstitutionStrict` is tuned for whole-machine
/// audits and prunes system and developer-cache trees; `DeveloperMax`
/// disables all built-in exclusions and archive limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    Default,
    InstitutionStrict,
    DeveloperMax,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recurse: bool,
    pub deep_jar: bool,
    pub exclude_system_dirs: bool,
    pub exclude_dev_dirs: bool,
    pub profile: ScanProfile,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Archive caps; 0 means unlimited except under `InstitutionStrict`,
    /// where 0 resolves to the institution limits.
    pub jar_max_entry_java: u64,
    pub jar_max_entry_class: u64,
    pub jar_max_total_uncompressed: u64,
    pub jar_max_entries: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            recurse: true,
            deep_jar: true,
            exclude_system_dirs: false,
            exclude_dev_dirs: false,
            profile: ScanProfile::Default,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            jar_max_entry_java: 0,
            jar_max_entry_class: 0,
            jar_max_total_uncompressed: 0,
            jar_max_entries: 0,
        }
    }
}

/// Resolved per-scan archive caps (0 = unlimited).
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entry_java: u64,
    pub max_entry_class: u64,
    pub max_total_uncompressed: u64,
    pub max_entries: u64,
}

const INSTITUTION_JAR_LIMITS: ArchiveLimits = ArchiveLimits {
    max_entry_java: 1024 * 1024,
    max_entry_class: 512 * 1024,
    max_total_uncompressed: 200 * 1024 * 1024,
    max_entries: 5000,
};

impl ScanOptions {
    pub fn archive_limits(&self) -> ArchiveLimits {
        let strict = self.profile == ScanProfile::InstitutionStrict;
        let pick = |explicit: u64, fallback: u64| -> u64 {
            if explicit != 0 {
                explicit
            } else if strict {
                fallback
            } else {
                0
            }
        };
        ArchiveLimits {
            max_entry_java: pick(self.jar_max_entry_java, INSTITUTION_JAR_LIMITS.max_entry_java),
            max_entry_class: pick(
                self.jar_max_entry_class,
                INSTITUTION_JAR_LIMITS.max_entry_class,
            ),
            max_total_uncompressed: pick(
                self.jar_max_total_uncompressed,
                INSTITUTION_JAR_LIMITS.max_total_uncompressed,
            ),
            max_entries: pick(self.jar_max_entries, INSTITUTION_JAR_LIMITS.max_entries),
        }
    }
}

/// System trees that are never worth scanning on a strict audit.
pub const SYSTEM_DIR_PREFIXES: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/snap",
    "/var/lib/docker",
    "/var/lib/flatpak",
    "/var/cache",
    "/var/log",
    "/tmp",
    "/var/tmp",
    "/lost+found",
    "/usr/lib",
    "/lib/",
];

/// Build-tool and IDE cache trees excluded on strict audits.
pub const INSTITUTION_EXCLUDE_GLOBS: &[&str] = &[
    "/proc/*",
    "/sys/*",
    "/dev/*",
    "/run/*",
    "/snap/*",
    "/var/lib/docker/*",
    "/var/lib/flatpak/*",
    "/var/cache/*",
    "/var/log/*",
    "/tmp/*",
    "/var/tmp/*",
    "/lost+found/*",
    "/usr/lib/aarch64-linux-gnu/*",
    "/usr/lib/x86_64-linux-gnu/*",
    "/lib/aarch64-linux-gnu/*",
    "/lib/x86_64-linux-gnu/*",
    "/usr/lib/python3/dist-packages/*",
    "/usr/lib/node_modules/*",
    "/usr/lib/gcc/*",
    "/usr/i686-w64-mingw32/*",
    "/usr/x86_64-w64-mingw32/*",
    "/usr/include/*",
    "/usr/share/doc/*",
    "/usr/share/locale/*",
    "/usr/share/man/*",
    "/usr/share/icons/*",
    "/usr/src/*",
    "/opt/cuda/*",
    "/usr/local/cuda/*",
    "/usr/local/share/*",
    "/usr/local/include/*",
    "/home/*/.vscode/*",
    "/home/*/.vscode-server/*",
    "/home/*/.cache/*",
    "/home/*/.config/Code/*",
    "/home/*/.local/share/Code/*",
    "/home/*/.npm/*",
    "/home/*/.nvm/*",
    "/home/*/.gradle/*",
    "/home/*/.m2/repository/*",
    "/home/*/.cargo/*",
    "/home/*/.rustup/*",
    "/home/*/.android/*",
    "/home/*/.conda/*",
    "/root/.vscode/*",
    "/root/.vscode-server/*",
    "/root/.cache/*",
    "/root/.config/Code/*",
    "/root/.local/share/Code/*",
];

/// Roots visited instead of `/` under a strict whole-machine scan: user and
/// service data, not the OS image.
pub const PREFERRED_ROOT_DIRS: &[&str] = &[
    "/home",
    "/root",
    "/etc",
    "/opt",
    "/srv",
    "/var/www",
    "/var/lib/tomcat",
    "/mnt",
    "/media",
    "/data",
    "/usr/local",
];

fn glob_to_regex(glob: &str) -> String {
    let mut r = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => r.push_str(".*"),
            '?' => r.push('.'),
            _ => r.push_str(&regex::escape(&c.to_string())),
        }
    }
    r
}

/// Substring glob matching: the converted pattern may match anywhere in the
/// path, so `foo/*` excludes every path containing a `foo/` component.
pub fn glob_matches<S: AsRef<str>>(path: &str, globs: &[S]) -> bool {
    globs.iter().any(|g| {
        Regex::new(&glob_to_regex(g.as_ref()))
            .map(|re| re.is_match(path))
            .unwrap_or(false)
    })
}

/// Apply profile promotion: a `Default`-profile scan rooted at `/` becomes a
/// strict whole-machine audit.
pub fn effective_options(root: &Path, opt: &ScanOptions) -> ScanOptions {
    let mut opt = opt.clone();
    if root == Path::new("/") && opt.profile == ScanProfile::Default {
        opt.profile = ScanProfile::InstitutionStrict;
        opt.exclude_system_dirs = true;
        opt.exclude_dev_dirs = true;
        opt.jar_max_entry_java = INSTITUTION_JAR_LIMITS.max_entry_java;
        opt.jar_max_entry_class = INSTITUTION_JAR_LIMITS.max_entry_class;
        opt.jar_max_total_uncompressed = INSTITUTION_JAR_LIMITS.max_total_uncompressed;
        opt.jar_max_entries = INSTITUTION_JAR_LIMITS.max_entries;
    }
    opt
}

/// Whether a directory (or candidate path) is pruned by the active profile.
pub fn should_skip_path(path: &str, opt: &ScanOptions) -> bool {
    if path == "/" {
        return false;
    }
    let strict = opt.profile == ScanProfile::InstitutionStrict;
    if strict || opt.exclude_system_dirs {
        if SYSTEM_DIR_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return true;
        }
    }
    if (strict || opt.exclude_dev_dirs) && glob_matches(path, INSTITUTION_EXCLUDE_GLOBS) {
        return true;
    }
    if !opt.exclude_globs.is_empty() && glob_matches(path, &opt.exclude_globs) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_scan_promotes_to_institution_strict() {
        let opt = ScanOptions::default();
        let eff = effective_options(Path::new("/"), &opt);
        assert_eq!(eff.profile, ScanProfile::InstitutionStrict);
        assert!(eff.exclude_system_dirs);
        assert!(eff.exclude_dev_dirs);
        assert_eq!(eff.jar_max_entries, 5000);
        assert_eq!(eff.jar_max_entry_class, 512 * 1024);
    }

    #[test]
    fn non_root_scan_keeps_profile() {
        let opt = ScanOptions::default();
        let eff = effective_options(Path::new("/home/user"), &opt);
        assert_eq!(eff.profile, ScanProfile::Default);
        assert!(!eff.exclude_system_dirs);
    }

    #[test]
    fn strict_profile_skips_system_dirs() {
        let opt = ScanOptions {
            profile: ScanProfile::InstitutionStrict,
            ..Default::default()
        };
        assert!(should_skip_path("/proc/1234/maps", &opt));
        assert!(should_skip_path("/usr/lib/libssl.so", &opt));
        assert!(should_skip_path("/home/bob/.cache/pip/x.whl", &opt));
        assert!(!should_skip_path("/home/bob/app/server.jar", &opt));
        assert!(!should_skip_path("/", &opt));
    }

    #[test]
    fn default_profile_skips_nothing_builtin() {
        let opt = ScanOptions::default();
        assert!(!should_skip_path("/proc/1234/maps", &opt));
        assert!(!should_skip_path("/home/bob/.cache/pip/x.whl", &opt));
    }

    #[test]
    fn user_globs_apply_on_any_profile() {
        let opt = ScanOptions {
            exclude_globs: vec!["*/node_modules/*".to_string()],
            ..Default::default()
        };
        assert!(should_skip_path("/srv/app/node_modules/x/y.js", &opt));
        assert!(!should_skip_path("/srv/app/src/y.js", &opt));
    }

    #[test]
    fn glob_special_chars_are_literal() {
        assert!(glob_matches("/opt/app+data/file", &["/opt/app+data/*"]));
        assert!(!glob_matches("/opt/appXdata/file", &["/opt/app+data/*"]));
        assert!(glob_matches("/a/b.c/d", &["/a/b.c/*"]));
        assert!(!glob_matches("/a/bXc/d", &["/a/b.c/*"]));
    }

    #[test]
    fn default_limits_are_unlimited_strict_limits_are_bounded() {
        let opt = ScanOptions::default();
        assert_eq!(opt.archive_limits().max_entries, 0);
        let strict = ScanOptions {
            profile: ScanProfile::InstitutionStrict,
            ..Default::default()
        };
        assert_eq!(strict.archive_limits().max_entries, 5000);
        assert_eq!(
            strict.archive_limits().max_total_uncompressed,
            200 * 1024 * 1024
        );
        let custom = ScanOptions {
            profile: ScanProfile::InstitutionStrict,
            jar_max_entries: 10,
            ..Default::default()
        };
        assert_eq!(custom.archive_limits().max_entries, 10);
    }
}
