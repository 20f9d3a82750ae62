use cyclr::collab::CollaboratorConfig;
use cyclr::driver::DriverConfig;
use cyclr::retry::RetryPolicy;
use cyclr::storage::compute_project_hash;
use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest iteration ceiling a cycle may be configured with
pub const MAX_ITERATIONS_LIMIT: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub cycle: CycleConfig,
    pub retry: RetryPolicy,
    pub lease: LeaseConfig,
    pub storage: StorageConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub max_iterations: u32,
    pub iteration_cooldown_ms: u64,
    pub action_timeout_ms: u64,
    /// Whole-cycle wall-clock bound; unbounded when absent
    pub deadline_secs: Option<u64>,
    /// Collaborator calls per cycle, retries included; unbounded when absent
    pub max_actions: Option<u32>,
    /// Post CI summaries and reviews as PR comments
    pub post_comments: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            iteration_cooldown_ms: 1000,
            action_timeout_ms: 600000,
            deadline_secs: None,
            max_actions: None,
            post_comments: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Must outlast one action timeout plus the longest backoff
    pub ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_secs: 900 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store directory; defaults to a per-project directory under the local data dir
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            cycle: CycleConfig::default(),
            retry: RetryPolicy::default(),
            lease: LeaseConfig::default(),
            storage: StorageConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_max_iterations(self.cycle.max_iterations)?;
        if self.lease.ttl_secs == 0 {
            bail!("lease.ttl_secs must be positive");
        }
        let longest_wait_ms = self.cycle.action_timeout_ms.saturating_add(self.retry.max_backoff_ms);
        if self.lease.ttl_secs.saturating_mul(1000) <= longest_wait_ms {
            bail!(
                "lease.ttl_secs ({}s) must exceed cycle.action_timeout_ms + retry.max_backoff_ms ({}ms)",
                self.lease.ttl_secs,
                longest_wait_ms
            );
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        Ok(())
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            retry: self.retry.clone(),
            lease_ttl: Duration::from_secs(self.lease.ttl_secs),
            action_timeout: Duration::from_millis(self.cycle.action_timeout_ms),
            iteration_cooldown: Duration::from_millis(self.cycle.iteration_cooldown_ms),
            max_actions: self.cycle.max_actions,
            deadline: self.cycle.deadline_secs.map(Duration::from_secs),
            post_comments: self.cycle.post_comments,
        }
    }

    /// Directory holding the cycle database for `project_dir`
    pub fn store_dir(&self, project_dir: &Path) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.dir {
            return Ok(dir.clone());
        }
        let hash = compute_project_hash(project_dir).context("Failed to hash project directory")?;
        Ok(dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(env!("CARGO_PKG_NAME"))
            .join(hash))
    }
}

pub fn validate_max_iterations(max_iterations: u32) -> Result<()> {
    if !(1..=MAX_ITERATIONS_LIMIT).contains(&max_iterations) {
        bail!(
            "max_iterations must be between 1 and {}, got {}",
            MAX_ITERATIONS_LIMIT,
            max_iterations
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyclr::collab::BackendKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cycle.max_iterations, 5);
        assert_eq!(config.retry.max_retries, 6);
        assert_eq!(config.lease.ttl_secs, 900);
        assert_eq!(config.collaborators.backend, BackendKind::Command);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
cycle:
  max_iterations: 3
collaborators:
  backend: scripted
"#,
        )
        .unwrap();
        assert_eq!(config.cycle.max_iterations, 3);
        assert_eq!(config.cycle.action_timeout_ms, 600000);
        assert_eq!(config.collaborators.backend, BackendKind::Scripted);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_max_iterations_bounds() {
        assert!(validate_max_iterations(0).is_err());
        assert!(validate_max_iterations(1).is_ok());
        assert!(validate_max_iterations(10).is_ok());
        assert!(validate_max_iterations(11).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cyclr.yml");
        fs::write(&path, "cycle:\n  max_iterations: 42\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_lease_must_outlast_longest_wait() {
        let mut config = Config::default();
        config.lease.ttl_secs = 660;
        assert!(config.validate().is_err());

        config.lease.ttl_secs = 661;
        assert!(config.validate().is_ok());

        config.cycle.action_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_lease_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cyclr.yml");
        fs::write(&path, "lease:\n  ttl_secs: 30\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cyclr.yml");
        fs::write(&path, "lease:\n  ttl_secs: 1200\nstorage:\n  dir: /tmp/cyclr-test\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.lease.ttl_secs, 1200);
        assert_eq!(
            config.store_dir(dir.path()).unwrap(),
            PathBuf::from("/tmp/cyclr-test")
        );
    }

    #[test]
    fn test_driver_config() {
        let mut config = Config::default();
        config.cycle.deadline_secs = Some(120);
        let driver = config.driver_config();
        assert_eq!(driver.lease_ttl, Duration::from_secs(900));
        assert!(driver.post_comments);
        assert_eq!(driver.deadline, Some(Duration::from_secs(120)));
        assert_eq!(driver.iteration_cooldown, Duration::from_millis(1000));
    }

    #[test]
    fn test_default_store_dir_is_per_project() {
        let project = TempDir::new().unwrap();
        let dir = Config::default().store_dir(project.path()).unwrap();
        let hash = compute_project_hash(project.path()).unwrap();
        assert!(dir.ends_with(Path::new("cyclr").join(hash)));
    }
}
