//! Configuration layering and environment overrides
//!
//! Precedence, lowest first: global `~/.sprout/config.toml`, the nearest
//! project `sprout.toml`, `SPROUT_*` environment variables, CLI flags.

use camino::{Utf8Path, Utf8PathBuf};
use sprout_core::error::SproutError;
use sprout_registry::SharingPolicy;
use std::collections::HashMap;
use tracing::debug;

use crate::settings::{self, SproutConfig, SproutToml};
use crate::ConfigResult;

/// Project configuration file name
pub const PROJECT_FILE: &str = "sprout.toml";
/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "SPROUT_";

/// Where a configuration layer came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Global(Utf8PathBuf),
    Project(Utf8PathBuf),
    Environment(String),
    CommandLine,
}

/// Finds and loads configuration files
pub struct ConfigLoader {
    cwd: Utf8PathBuf,
    /// Global config location; `None` uses `~/.sprout/config.toml`
    global_path: Option<Utf8PathBuf>,
}

impl ConfigLoader {
    pub fn new(cwd: Utf8PathBuf) -> Self {
        Self { cwd, global_path: None }
    }

    pub fn with_global_path(mut self, path: Utf8PathBuf) -> Self {
        self.global_path = Some(path);
        self
    }

    /// Walk up from the working directory looking for `filename`
    pub fn resolve_config_path(&self, filename: &str) -> Option<Utf8PathBuf> {
        self.cwd
            .ancestors()
            .map(|dir| dir.join(filename))
            .find(|candidate| candidate.is_file())
    }

    pub fn global_config_path(&self) -> ConfigResult<Utf8PathBuf> {
        if let Some(path) = &self.global_path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| SproutError::ConfigValidation {
            field: "home_dir".to_string(),
            reason: "Could not determine home directory".to_string(),
        })?;
        let home = Utf8PathBuf::try_from(home).map_err(|e| SproutError::ConfigValidation {
            field: "home_dir".to_string(),
            reason: format!("Invalid home directory path: {}", e),
        })?;
        Ok(home.join(".sprout").join("config.toml"))
    }

    pub async fn load_global_config(&self) -> ConfigResult<Option<(SproutToml, ConfigSource)>> {
        let path = self.global_config_path()?;
        if !path.is_file() {
            return Ok(None);
        }
        let config = settings::load_from_file(&path).await?;
        Ok(Some((config, ConfigSource::Global(path))))
    }

    pub async fn load_project_config(&self) -> ConfigResult<Option<(SproutToml, ConfigSource)>> {
        let Some(path) = self.resolve_config_path(PROJECT_FILE) else {
            return Ok(None);
        };
        let config = settings::load_from_file(&path).await?;
        Ok(Some((config, ConfigSource::Project(path))))
    }

    /// Load every layer and resolve the result
    pub async fn load(
        &self,
        env_overrides: &HashMap<String, String>,
        cli_overrides: &HashMap<String, String>,
    ) -> ConfigResult<(SproutConfig, Vec<ConfigSource>)> {
        let mut sources = Vec::new();
        let global = self.load_global_config().await?.map(|(config, source)| {
            sources.push(source);
            config
        });
        let project = self.load_project_config().await?.map(|(config, source)| {
            sources.push(source);
            config
        });

        let merged = ConfigLayering::merge_configs(global, project, env_overrides, cli_overrides, &self.cwd)?;
        sources.extend(
            env_overrides
                .keys()
                .filter(|k| env_key(k).is_some())
                .map(|k| ConfigSource::Environment(k.clone())),
        );
        if !cli_overrides.is_empty() {
            sources.push(ConfigSource::CommandLine);
        }
        for source in &sources {
            debug!(source = ?source, "Configuration layer");
        }

        Ok((SproutConfig::from_toml(&merged)?, sources))
    }
}

/// Stacks configuration layers
pub struct ConfigLayering;

impl ConfigLayering {
    /// Merge layers; later layers win
    pub fn merge_configs(
        global: Option<SproutToml>,
        project: Option<SproutToml>,
        env_overrides: &HashMap<String, String>,
        cli_overrides: &HashMap<String, String>,
        cwd: &Utf8Path,
    ) -> ConfigResult<SproutToml> {
        let mut merged = global.unwrap_or_default();
        if let Some(project) = project {
            merged = merged.layered(project);
        }

        // sorted so repeated keys apply deterministically
        let mut env: Vec<(&String, &String)> = env_overrides.iter().collect();
        env.sort();
        for (key, value) in env {
            if let Some(dotted) = env_key(key) {
                apply_override(&mut merged, dotted, value, key, cwd)?;
            }
        }

        let mut cli: Vec<(&String, &String)> = cli_overrides.iter().collect();
        cli.sort();
        for (key, value) in cli {
            apply_override(&mut merged, key, value, key, cwd)?;
        }

        settings::validate_config(&merged)?;
        Ok(merged)
    }

    /// Collect `SPROUT_*` variables from the process environment
    pub fn collect_env_overrides() -> HashMap<String, String> {
        std::env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)).collect()
    }
}

/// Dotted key addressed by an environment variable
fn env_key(var: &str) -> Option<&'static str> {
    let key = match var.strip_prefix(ENV_PREFIX)? {
        "INSTALL_ROOT" => "install.root",
        "MAX_PARALLEL" | "JOBS" => "install.max_parallel",
        "LOCK_TIMEOUT_SECS" => "install.lock_timeout_secs",
        "LOCK_POLL_MS" => "install.lock_poll_ms",
        "BUILD_TIMEOUT_SECS" => "install.build_timeout_secs",
        "SHARING" => "concretizer.sharing",
        "DEFAULT_COMPILER" => "concretizer.default_compiler",
        "REPOSITORIES" => "repositories.paths",
        _ => return None,
    };
    Some(key)
}

fn parse_number<T: std::str::FromStr>(value: &str, source: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SproutError::ConfigValidation {
        field: source.to_string(),
        reason: format!("invalid number '{}': {}", value, e),
    })
}

/// Apply one `section.key = value` override
fn apply_override(config: &mut SproutToml, key: &str, value: &str, source: &str, cwd: &Utf8Path) -> ConfigResult<()> {
    let anchored = |raw: &str| {
        let path = Utf8PathBuf::from(raw);
        if path.is_relative() {
            cwd.join(path)
        } else {
            path
        }
    };

    match key {
        "install.root" => config.install.root = Some(anchored(value)),
        "install.max_parallel" => config.install.max_parallel = Some(parse_number(value, source)?),
        "install.lock_timeout_secs" => config.install.lock_timeout_secs = Some(parse_number(value, source)?),
        "install.lock_poll_ms" => config.install.lock_poll_ms = Some(parse_number(value, source)?),
        "install.build_timeout_secs" => config.install.build_timeout_secs = Some(parse_number(value, source)?),
        "concretizer.sharing" => {
            let policy: SharingPolicy = value.parse().map_err(|reason| SproutError::ConfigValidation {
                field: source.to_string(),
                reason,
            })?;
            config.concretizer.sharing = Some(policy);
        },
        "concretizer.default_compiler" => config.concretizer.default_compiler = Some(value.to_string()),
        "repositories.paths" => {
            // prepended: overrides search first
            let overrides: Vec<Utf8PathBuf> = value
                .split(':')
                .filter(|p| !p.is_empty())
                .map(|p| anchored(p))
                .collect();
            let mut paths = overrides.clone();
            for existing in std::mem::take(&mut config.repositories.paths) {
                if !overrides.contains(&existing) {
                    paths.push(existing);
                }
            }
            config.repositories.paths = paths;
        },
        other => {
            return Err(SproutError::ConfigValidation {
                field: source.to_string(),
                reason: format!("unknown configuration key '{}'", other),
            })
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn test_resolve_config_path_walks_up() {
        let (_temp, root) = temp_root();
        std::fs::write(root.join(PROJECT_FILE), "").unwrap();
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let loader = ConfigLoader::new(nested);
        assert_eq!(loader.resolve_config_path(PROJECT_FILE), Some(root.join(PROJECT_FILE)));
        assert_eq!(loader.resolve_config_path("missing.toml"), None);
    }

    #[tokio::test]
    async fn test_load_layers() {
        let (_temp, root) = temp_root();
        let global = root.join("global.toml");
        tokio::fs::write(
            &global,
            "[install]\nmax_parallel = 16\nroot = \"/opt/global\"\n[concretizer]\ndefault_compiler = \"gcc\"\n",
        )
        .await
        .unwrap();
        let project = root.join("project");
        tokio::fs::create_dir_all(&project).await.unwrap();
        tokio::fs::write(
            project.join(PROJECT_FILE),
            "[install]\nmax_parallel = 4\n[repositories]\npaths = [\"repo\"]\n",
        )
        .await
        .unwrap();

        let env = HashMap::from([
            ("SPROUT_SHARING".to_string(), "duplicates".to_string()),
            ("SPROUT_UNRELATED".to_string(), "x".to_string()),
        ]);
        let cli = HashMap::from([("install.lock_timeout_secs".to_string(), "30".to_string())]);

        let loader = ConfigLoader::new(project.clone()).with_global_path(global.clone());
        let (config, sources) = loader.load(&env, &cli).await.unwrap();

        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.install_root, Utf8PathBuf::from("/opt/global"));
        assert_eq!(config.sharing, SharingPolicy::Duplicates);
        assert_eq!(config.lock_timeout, Some(std::time::Duration::from_secs(30)));
        assert_eq!(config.default_compiler.unwrap().name, "gcc");
        assert_eq!(config.repositories, vec![project.join("repo")]);

        assert_eq!(sources[0], ConfigSource::Global(global));
        assert_eq!(sources[1], ConfigSource::Project(project.join(PROJECT_FILE)));
        assert!(sources.contains(&ConfigSource::Environment("SPROUT_SHARING".to_string())));
        assert!(!sources.contains(&ConfigSource::Environment("SPROUT_UNRELATED".to_string())));
        assert_eq!(sources.last(), Some(&ConfigSource::CommandLine));
    }

    #[tokio::test]
    async fn test_load_without_files() {
        let (_temp, root) = temp_root();
        let loader = ConfigLoader::new(root.clone()).with_global_path(root.join("none.toml"));
        let (config, sources) = loader.load(&HashMap::new(), &HashMap::new()).await.unwrap();
        assert!(sources.is_empty());
        assert!(config.max_parallel >= 1);
    }

    #[tokio::test]
    async fn test_invalid_project_file_reports_path() {
        let (_temp, root) = temp_root();
        tokio::fs::write(root.join(PROJECT_FILE), "[install\n").await.unwrap();
        let loader = ConfigLoader::new(root.clone()).with_global_path(root.join("none.toml"));
        match loader.load(&HashMap::new(), &HashMap::new()).await.unwrap_err() {
            SproutError::TomlParse { file, .. } => assert!(file.ends_with(PROJECT_FILE)),
            other => panic!("expected TomlParse, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let cwd = Utf8Path::new("/work");
        let env = HashMap::from([
            ("SPROUT_JOBS".to_string(), "3".to_string()),
            ("SPROUT_INSTALL_ROOT".to_string(), "store".to_string()),
            ("SPROUT_REPOSITORIES".to_string(), "/a:b".to_string()),
            ("SPROUT_BUILD_TIMEOUT_SECS".to_string(), "90".to_string()),
        ]);
        let project = settings::parse_sprout_toml("[repositories]\npaths = [\"/c\"]\n", "sprout.toml").unwrap();

        let merged = ConfigLayering::merge_configs(None, Some(project), &env, &HashMap::new(), cwd).unwrap();
        assert_eq!(merged.install.max_parallel, Some(3));
        assert_eq!(merged.install.root, Some(Utf8PathBuf::from("/work/store")));
        assert_eq!(merged.install.build_timeout_secs, Some(90));
        let paths: Vec<&str> = merged.repositories.paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/work/b", "/c"]);
    }

    #[test]
    fn test_cli_beats_environment() {
        let env = HashMap::from([("SPROUT_MAX_PARALLEL".to_string(), "3".to_string())]);
        let cli = HashMap::from([("install.max_parallel".to_string(), "9".to_string())]);
        let merged = ConfigLayering::merge_configs(None, None, &env, &cli, Utf8Path::new("/")).unwrap();
        assert_eq!(merged.install.max_parallel, Some(9));
    }

    #[test]
    fn test_bad_overrides_rejected() {
        let cwd = Utf8Path::new("/");
        let bad_number = HashMap::from([("SPROUT_MAX_PARALLEL".to_string(), "many".to_string())]);
        match ConfigLayering::merge_configs(None, None, &bad_number, &HashMap::new(), cwd).unwrap_err() {
            SproutError::ConfigValidation { field, .. } => assert_eq!(field, "SPROUT_MAX_PARALLEL"),
            other => panic!("unexpected {:?}", other),
        }

        let zero = HashMap::from([("install.max_parallel".to_string(), "0".to_string())]);
        assert!(ConfigLayering::merge_configs(None, None, &HashMap::new(), &zero, cwd).is_err());

        let sharing = HashMap::from([("concretizer.sharing".to_string(), "sometimes".to_string())]);
        assert!(ConfigLayering::merge_configs(None, None, &HashMap::new(), &sharing, cwd).is_err());

        let unknown = HashMap::from([("install.threads".to_string(), "2".to_string())]);
        assert!(ConfigLayering::merge_configs(None, None, &HashMap::new(), &unknown, cwd).is_err());
    }

    #[test]
    fn test_collect_env_overrides() {
        std::env::set_var("SPROUT_TEST_COLLECT_MARKER", "1");
        std::env::set_var("NOT_SPROUT_TEST_COLLECT_MARKER", "1");

        let overrides = ConfigLayering::collect_env_overrides();
        assert!(overrides.contains_key("SPROUT_TEST_COLLECT_MARKER"));
        assert!(!overrides.contains_key("NOT_SPROUT_TEST_COLLECT_MARKER"));

        std::env::remove_var("SPROUT_TEST_COLLECT_MARKER");
        std::env::remove_var("NOT_SPROUT_TEST_COLLECT_MARKER");
    }
}
