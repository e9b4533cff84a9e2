//! Platform and compiler detection.
//!
//! Probes are independent; [`detect_compilers`] runs them on a bounded
//! rayon pool and joins the results into one sorted list.

use crate::RegistryResult;
use camino::Utf8PathBuf;
use rayon::prelude::*;
use sprout_core::error::SproutError;
use sprout_core::types::{ArchSpec, CompilerSpec, Version};
use std::process::Command;
use tracing::{debug, warn};

/// Finds compilers of one kind
pub trait CompilerProbe: Send + Sync {
    /// Short label for logs
    fn label(&self) -> &str;

    fn probe(&self) -> RegistryResult<Vec<CompilerSpec>>;
}

/// Compilers listed explicitly in configuration
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCompilers {
    compilers: Vec<CompilerSpec>,
}

impl ConfiguredCompilers {
    pub fn new(compilers: Vec<CompilerSpec>) -> Self {
        Self { compilers }
    }
}

impl CompilerProbe for ConfiguredCompilers {
    fn label(&self) -> &str {
        "configured"
    }

    fn probe(&self) -> RegistryResult<Vec<CompilerSpec>> {
        Ok(self.compilers.clone())
    }
}

/// Searches `PATH` for a compiler executable and asks it for its version
#[derive(Debug, Clone)]
pub struct PathProbe {
    name: String,
    executables: Vec<String>,
    version_arg: String,
}

impl PathProbe {
    pub fn new(name: impl Into<String>, executables: &[&str], version_arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executables: executables.iter().map(|e| e.to_string()).collect(),
            version_arg: version_arg.into(),
        }
    }

    /// Probes for the toolchains recognised out of the box
    pub fn defaults() -> Vec<PathProbe> {
        vec![
            PathProbe::new("gcc", &["gcc"], "-dumpversion"),
            PathProbe::new("clang", &["clang"], "-dumpversion"),
        ]
    }

    fn find_executable(&self) -> Option<Utf8PathBuf> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .flat_map(|dir| self.executables.iter().map(move |exe| dir.join(exe)))
            .find(|candidate| candidate.is_file())
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
    }
}

impl CompilerProbe for PathProbe {
    fn label(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> RegistryResult<Vec<CompilerSpec>> {
        let Some(executable) = self.find_executable() else {
            return Ok(Vec::new());
        };
        let output = Command::new(&executable)
            .arg(&self.version_arg)
            .output()
            .map_err(|e| SproutError::io(format!("Failed to run {}", executable), e))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let version = text
            .split_whitespace()
            .find_map(|token| Version::parse(token).ok().filter(|v| !v.is_head()));

        Ok(version
            .map(|v| vec![CompilerSpec::concrete(&self.name, v, Some(executable))])
            .unwrap_or_default())
    }
}

/// Run every probe on a pool of at most `max_threads` workers.
///
/// A failing probe is logged and contributes nothing. The result is
/// sorted by name, then newest version first, without duplicates.
pub fn detect_compilers(probes: &[&dyn CompilerProbe], max_threads: usize) -> RegistryResult<Vec<CompilerSpec>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads.max(1))
        .thread_name(|i| format!("sprout-probe-{}", i))
        .build()
        .map_err(|e| SproutError::io("Failed to start probe pool", std::io::Error::other(e)))?;

    let results: Vec<Vec<CompilerSpec>> = pool.install(|| {
        probes
            .par_iter()
            .map(|probe| match probe.probe() {
                Ok(found) => {
                    debug!(probe = %probe.label(), found = found.len(), "Compiler probe finished");
                    found
                },
                Err(e) => {
                    warn!(probe = %probe.label(), error = %e, "Compiler probe failed");
                    Vec::new()
                },
            })
            .collect()
    });

    let mut compilers: Vec<CompilerSpec> = results.into_iter().flatten().collect();
    compilers.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| b.versions.concrete().cmp(&a.versions.concrete()))
    });
    compilers.dedup_by(|a, b| a.name == b.name && a.versions == b.versions);
    Ok(compilers)
}

/// Architecture of the running host
pub fn host_arch() -> ArchSpec {
    let platform = std::env::consts::OS.to_string();
    let os = read_os_release().unwrap_or_else(|| platform.clone());
    ArchSpec::new(platform, os, std::env::consts::ARCH)
}

/// `ID` + `VERSION_ID` from /etc/os-release, e.g. `ubuntu22.04`
fn read_os_release() -> Option<String> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;
    let field = |key: &str| {
        content.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|v| v.trim_matches('"').to_string())
        })
    };
    let id = field("ID")?;
    // os is one field of a dash-separated triple
    let version = field("VERSION_ID").unwrap_or_default().replace('-', "_");
    Some(format!("{}{}", id.replace('-', "_"), version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str, &'static [&'static str]);

    impl CompilerProbe for Fixed {
        fn label(&self) -> &str {
            self.0
        }

        fn probe(&self) -> RegistryResult<Vec<CompilerSpec>> {
            Ok(self
                .1
                .iter()
                .map(|v| CompilerSpec::concrete(self.0, Version::parse(v).unwrap(), None))
                .collect())
        }
    }

    struct Failing(AtomicUsize);

    impl CompilerProbe for Failing {
        fn label(&self) -> &str {
            "failing"
        }

        fn probe(&self) -> RegistryResult<Vec<CompilerSpec>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SproutError::io(
                "probe",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            ))
        }
    }

    #[test]
    fn test_detect_sorts_and_dedups() {
        let gcc = Fixed("gcc", &["11.4", "13.1"]);
        let gcc_again = Fixed("gcc", &["13.1"]);
        let clang = Fixed("clang", &["17.0"]);
        let failing = Failing(AtomicUsize::new(0));

        let probes: Vec<&dyn CompilerProbe> = vec![&gcc, &failing, &clang, &gcc_again];
        let found = detect_compilers(&probes, 2).unwrap();
        let rendered: Vec<String> = found.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["%clang@=17.0", "%gcc@=13.1", "%gcc@=11.4"]);
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_configured_probe() {
        let configured = ConfiguredCompilers::new(vec![CompilerSpec::concrete(
            "gcc",
            Version::parse("12.2").unwrap(),
            Some("/usr/bin/gcc".into()),
        )]);
        let found = detect_compilers(&[&configured], 1).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.as_deref().map(|p| p.as_str()), Some("/usr/bin/gcc"));
    }

    #[test]
    fn test_host_arch_is_concrete() {
        let arch = host_arch();
        assert!(arch.is_concrete());
        assert_eq!(arch.platform.as_deref(), Some(std::env::consts::OS));
    }
}
