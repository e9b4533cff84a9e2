//! sprout.toml / config.toml parsing, validation and resolution

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sprout_core::error::SproutError;
use sprout_core::parse_spec;
use sprout_core::types::{ArchSpec, CompilerSpec, Version};
use sprout_registry::{ConcretizerPolicy, SharingPolicy};
use std::time::Duration;

use crate::ConfigResult;

/// Default lock polling interval in milliseconds
pub const DEFAULT_LOCK_POLL_MS: u64 = 100;
/// Upper bound for `max_parallel`
pub const MAX_PARALLEL_LIMIT: usize = 1024;

/// One configuration file; every field is optional so layers can stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SproutToml {
    #[serde(default)]
    pub install: InstallSection,

    #[serde(default)]
    pub concretizer: ConcretizerSection,

    #[serde(default)]
    pub platform: PlatformSection,

    /// Compilers known without probing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compilers: Vec<CompilerEntry>,

    #[serde(default)]
    pub repositories: RepositoriesSection,
}

/// `[install]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Utf8PathBuf>,

    /// Concurrent builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Give up waiting for a build lock after this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_poll_ms: Option<u64>,

    /// Per-node build deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_timeout_secs: Option<u64>,
}

/// `[concretizer]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcretizerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharing: Option<SharingPolicy>,

    /// Compiler request such as `gcc` or `gcc@12:`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_compiler: Option<String>,
}

/// `[platform]`: overrides for the detected host architecture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `[[compilers]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerEntry {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Utf8PathBuf>,
}

/// `[repositories]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoriesSection {
    /// Searched in order; earlier repositories win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Utf8PathBuf>,
}

impl CompilerEntry {
    pub fn to_compiler(&self) -> ConfigResult<CompilerSpec> {
        let version = Version::parse(&self.version).map_err(|e| SproutError::ConfigValidation {
            field: format!("compilers.{}.version", self.name),
            reason: format!("invalid version '{}': {}", self.version, e),
        })?;
        Ok(CompilerSpec::concrete(self.name.clone(), version, self.path.clone()))
    }
}

impl SproutToml {
    /// Stack `upper` on top of `self`; set fields in `upper` win
    pub fn layered(self, upper: SproutToml) -> SproutToml {
        let mut compilers = upper.compilers;
        for entry in self.compilers {
            if !compilers
                .iter()
                .any(|c| c.name == entry.name && c.version == entry.version)
            {
                compilers.push(entry);
            }
        }
        let mut paths = upper.repositories.paths;
        for path in self.repositories.paths {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        SproutToml {
            install: InstallSection {
                root: upper.install.root.or(self.install.root),
                max_parallel: upper.install.max_parallel.or(self.install.max_parallel),
                lock_timeout_secs: upper.install.lock_timeout_secs.or(self.install.lock_timeout_secs),
                lock_poll_ms: upper.install.lock_poll_ms.or(self.install.lock_poll_ms),
                build_timeout_secs: upper.install.build_timeout_secs.or(self.install.build_timeout_secs),
            },
            concretizer: ConcretizerSection {
                sharing: upper.concretizer.sharing.or(self.concretizer.sharing),
                default_compiler: upper.concretizer.default_compiler.or(self.concretizer.default_compiler),
            },
            platform: PlatformSection {
                platform: upper.platform.platform.or(self.platform.platform),
                os: upper.platform.os.or(self.platform.os),
                target: upper.platform.target.or(self.platform.target),
            },
            compilers,
            repositories: RepositoriesSection { paths },
        }
    }

    /// Make relative paths relative to `base` (the file's directory)
    pub fn anchor_paths(&mut self, base: &Utf8Path) {
        if let Some(root) = &mut self.install.root {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        for path in &mut self.repositories.paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Fully resolved settings with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct SproutConfig {
    pub install_root: Utf8PathBuf,
    pub max_parallel: usize,
    pub lock_timeout: Option<Duration>,
    pub lock_poll: Duration,
    pub build_timeout: Option<Duration>,
    pub sharing: SharingPolicy,
    pub default_compiler: Option<CompilerSpec>,
    /// Host architecture overrides; unset fields fall back to detection
    pub arch: ArchSpec,
    pub compilers: Vec<CompilerSpec>,
    pub repositories: Vec<Utf8PathBuf>,
}

impl SproutConfig {
    /// Resolve a validated layer stack
    pub fn from_toml(config: &SproutToml) -> ConfigResult<Self> {
        validate_config(config)?;
        let install = &config.install;
        Ok(Self {
            install_root: install.root.clone().unwrap_or_else(default_install_root),
            max_parallel: install.max_parallel.unwrap_or_else(default_parallelism),
            lock_timeout: install.lock_timeout_secs.map(Duration::from_secs),
            lock_poll: Duration::from_millis(install.lock_poll_ms.unwrap_or(DEFAULT_LOCK_POLL_MS)),
            build_timeout: install.build_timeout_secs.map(Duration::from_secs),
            sharing: config.concretizer.sharing.unwrap_or_default(),
            default_compiler: config
                .concretizer
                .default_compiler
                .as_deref()
                .map(parse_compiler_request)
                .transpose()?,
            arch: ArchSpec {
                platform: config.platform.platform.clone(),
                os: config.platform.os.clone(),
                target: config.platform.target.clone(),
            },
            compilers: config
                .compilers
                .iter()
                .map(CompilerEntry::to_compiler)
                .collect::<ConfigResult<_>>()?,
            repositories: config.repositories.paths.clone(),
        })
    }

    pub fn concretizer_policy(&self) -> ConcretizerPolicy {
        ConcretizerPolicy {
            sharing: self.sharing,
            default_compiler: self.default_compiler.clone(),
        }
    }

    /// Configured architecture with `detected` filling the gaps
    pub fn arch_or(&self, detected: &ArchSpec) -> ArchSpec {
        self.arch.or(detected)
    }
}

impl Default for SproutConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            max_parallel: default_parallelism(),
            lock_timeout: None,
            lock_poll: Duration::from_millis(DEFAULT_LOCK_POLL_MS),
            build_timeout: None,
            sharing: SharingPolicy::default(),
            default_compiler: None,
            arch: ArchSpec::default(),
            compilers: Vec::new(),
            repositories: Vec::new(),
        }
    }
}

/// `~/.sprout/opt`, or `.sprout/opt` when there is no home directory
pub fn default_install_root() -> Utf8PathBuf {
    dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .map(|home| home.join(".sprout").join("opt"))
        .unwrap_or_else(|| Utf8PathBuf::from(".sprout/opt"))
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse a compiler request such as `gcc@12:`
pub fn parse_compiler_request(text: &str) -> ConfigResult<CompilerSpec> {
    let invalid = |reason: String| SproutError::ConfigValidation {
        field: "concretizer.default_compiler".to_string(),
        reason,
    };
    let spec = parse_spec(&format!("%{}", text.trim_start_matches('%')))
        .map_err(|e| invalid(format!("'{}' is not a compiler request: {}", text, e)))?;
    spec.compiler
        .ok_or_else(|| invalid(format!("'{}' is not a compiler request", text)))
}

/// Parse TOML text into one configuration layer
pub fn parse_sprout_toml(content: &str, file: &str) -> ConfigResult<SproutToml> {
    // toml_edit first for located syntax errors
    content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| SproutError::TomlParse {
            file: file.to_string(),
            message: format!("TOML syntax error: {}", e),
        })?;

    let config: SproutToml = toml::from_str(content).map_err(|e| SproutError::TomlParse {
        file: file.to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Serialize one layer back to TOML
pub fn serialize_sprout_toml(config: &SproutToml) -> ConfigResult<String> {
    toml::to_string_pretty(config).map_err(|e| SproutError::TomlParse {
        file: "<memory>".to_string(),
        message: format!("TOML serialization error: {}", e),
    })
}

/// Load and parse a configuration file
pub async fn load_from_file(path: &Utf8Path) -> ConfigResult<SproutToml> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SproutError::io(format!("Failed to read {}", path), e))?;
    let mut config = parse_sprout_toml(&content, path.as_str())?;
    if let Some(base) = path.parent() {
        config.anchor_paths(base);
    }
    Ok(config)
}

fn invalid(field: &str, reason: impl Into<String>) -> SproutError {
    SproutError::ConfigValidation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Check every field of one layer
pub fn validate_config(config: &SproutToml) -> ConfigResult<()> {
    let install = &config.install;
    if let Some(n) = install.max_parallel {
        if n == 0 || n > MAX_PARALLEL_LIMIT {
            return Err(invalid(
                "install.max_parallel",
                format!("must be between 1 and {}, got {}", MAX_PARALLEL_LIMIT, n),
            ));
        }
    }
    if install.lock_poll_ms == Some(0) {
        return Err(invalid("install.lock_poll_ms", "must be greater than zero"));
    }
    if install.build_timeout_secs == Some(0) {
        return Err(invalid("install.build_timeout_secs", "must be greater than zero"));
    }
    if let Some(root) = &install.root {
        if root.as_str().is_empty() {
            return Err(invalid("install.root", "must not be empty"));
        }
    }

    if let Some(request) = &config.concretizer.default_compiler {
        parse_compiler_request(request)?;
    }

    for (field, value) in [
        ("platform.platform", &config.platform.platform),
        ("platform.os", &config.platform.os),
        ("platform.target", &config.platform.target),
    ] {
        if let Some(value) = value {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || "._".contains(c)) {
                return Err(invalid(
                    field,
                    format!("'{}' must be non-empty and contain only letters, digits, '.' or '_'", value),
                ));
            }
        }
    }

    for entry in &config.compilers {
        if !is_valid_tool_name(&entry.name) {
            return Err(invalid("compilers.name", format!("invalid compiler name '{}'", entry.name)));
        }
        entry.to_compiler()?;
    }

    for path in &config.repositories.paths {
        if path.as_str().is_empty() {
            return Err(invalid("repositories.paths", "paths must not be empty"));
        }
    }
    Ok(())
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[install]
root = "/opt/sprout"
max_parallel = 8
lock_timeout_secs = 600
build_timeout_secs = 3600

[concretizer]
sharing = "duplicates"
default_compiler = "gcc@12:"

[platform]
os = "ubuntu22.04"

[[compilers]]
name = "gcc"
version = "12.2.0"
path = "/usr/bin/gcc"

[[compilers]]
name = "clang"
version = "17.0.6"

[repositories]
paths = ["/srv/repo", "extra"]
"#;

    #[test]
    fn test_parse_empty_config() {
        let config = parse_sprout_toml("", "sprout.toml").unwrap();
        assert_eq!(config, SproutToml::default());

        let resolved = SproutConfig::from_toml(&config).unwrap();
        assert!(resolved.max_parallel >= 1);
        assert_eq!(resolved.lock_timeout, None);
        assert_eq!(resolved.sharing, SharingPolicy::Single);
        assert!(resolved.install_root.ends_with("opt"));
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse_sprout_toml(FULL, "sprout.toml").unwrap();
        assert_eq!(config.install.max_parallel, Some(8));
        assert_eq!(config.compilers.len(), 2);

        let resolved = SproutConfig::from_toml(&config).unwrap();
        assert_eq!(resolved.install_root, Utf8PathBuf::from("/opt/sprout"));
        assert_eq!(resolved.lock_timeout, Some(Duration::from_secs(600)));
        assert_eq!(resolved.build_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(resolved.sharing, SharingPolicy::Duplicates);
        assert_eq!(resolved.default_compiler.as_ref().unwrap().name, "gcc");
        assert_eq!(resolved.compilers[0].to_string(), "%gcc@=12.2.0");
        assert_eq!(resolved.compilers[0].path, Some(Utf8PathBuf::from("/usr/bin/gcc")));
        assert_eq!(resolved.concretizer_policy().sharing, SharingPolicy::Duplicates);

        let host = ArchSpec::new("linux", "rhel8", "x86_64");
        assert_eq!(resolved.arch_or(&host), ArchSpec::new("linux", "ubuntu22.04", "x86_64"));
    }

    #[test]
    fn test_syntax_error_is_toml_parse() {
        let err = parse_sprout_toml("[install\nroot = 1", "bad.toml").unwrap_err();
        match err {
            SproutError::TomlParse { file, .. } => assert_eq!(file, "bad.toml"),
            other => panic!("expected TomlParse, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            parse_sprout_toml("[install]\nthreads = 4\n", "x.toml").unwrap_err(),
            SproutError::TomlParse { .. }
        ));
        assert!(matches!(
            parse_sprout_toml("[concretizer]\nsharing = \"sometimes\"\n", "x.toml").unwrap_err(),
            SproutError::TomlParse { .. }
        ));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("[install]\nmax_parallel = 0\n", "install.max_parallel"),
            ("[install]\nlock_poll_ms = 0\n", "install.lock_poll_ms"),
            ("[platform]\nos = \"ubuntu 22\"\n", "platform.os"),
            ("[[compilers]]\nname = \"gcc\"\nversion = \"\"\n", "compilers.gcc.version"),
            ("[[compilers]]\nname = \"9cc\"\nversion = \"1\"\n", "compilers.name"),
            ("[concretizer]\ndefault_compiler = \"gcc@@\"\n", "concretizer.default_compiler"),
        ];
        for (input, expected) in cases {
            match parse_sprout_toml(input, "x.toml") {
                Err(SproutError::ConfigValidation { field, .. }) => assert_eq!(field, expected, "{}", input),
                other => panic!("expected validation error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_layering_precedence() {
        let lower = parse_sprout_toml(FULL, "global.toml").unwrap();
        let upper = parse_sprout_toml(
            r#"
[install]
max_parallel = 2

[[compilers]]
name = "gcc"
version = "13.1"

[repositories]
paths = ["/home/me/repo", "/srv/repo"]
"#,
            "sprout.toml",
        )
        .unwrap();

        let merged = lower.layered(upper);
        assert_eq!(merged.install.max_parallel, Some(2));
        assert_eq!(merged.install.root, Some(Utf8PathBuf::from("/opt/sprout")));
        assert_eq!(merged.concretizer.sharing, Some(SharingPolicy::Duplicates));
        assert_eq!(merged.compilers.len(), 3);
        assert_eq!(merged.compilers[0].version, "13.1");
        let paths: Vec<&str> = merged.repositories.paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(paths, vec!["/home/me/repo", "/srv/repo", "extra"]);
    }

    #[test]
    fn test_anchor_relative_paths() {
        let mut config = parse_sprout_toml(FULL, "sprout.toml").unwrap();
        config.anchor_paths(Utf8Path::new("/work/project"));
        assert_eq!(config.repositories.paths[0], Utf8PathBuf::from("/srv/repo"));
        assert_eq!(config.repositories.paths[1], Utf8PathBuf::from("/work/project/extra"));
        assert_eq!(config.install.root, Some(Utf8PathBuf::from("/opt/sprout")));
    }

    #[test]
    fn test_round_trip_serialization() {
        let config = parse_sprout_toml(FULL, "sprout.toml").unwrap();
        let serialized = serialize_sprout_toml(&config).unwrap();
        let reparsed = parse_sprout_toml(&serialized, "sprout.toml").unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_compiler_request_forms() {
        assert_eq!(parse_compiler_request("gcc").unwrap().name, "gcc");
        assert_eq!(parse_compiler_request("%clang@17").unwrap().to_string(), "%clang@17");
        assert!(parse_compiler_request("").is_err());
    }
}
