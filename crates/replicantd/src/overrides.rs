//! Command-line overrides layered on top of replicant.toml.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use replicant_core::{ReplicantConfig, Settings};

/// Flags shared by every subcommand. Anything given here wins over the
/// config file.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Path to replicant.toml. Built-in defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Label selector for instances and workloads (e.g. "app=web").
    #[arg(long)]
    pub selector: Option<String>,

    /// Namespace to watch.
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Time between ticks (e.g. "30s", "2m").
    #[arg(long)]
    pub period: Option<String>,

    /// Kubeconfig file. Uses in-cluster or default config when omitted.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Sample and decide, but never update workloads.
    #[arg(long)]
    pub dry_run: bool,
}

impl TargetArgs {
    /// Read the config file (if any) and apply the flag overrides.
    pub fn load(&self) -> anyhow::Result<ReplicantConfig> {
        let mut config = match &self.config {
            Some(path) => ReplicantConfig::from_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => ReplicantConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut ReplicantConfig) {
        if let Some(selector) = &self.selector {
            config.target.selector = selector.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.target.namespace = namespace.clone();
        }
        if let Some(period) = &self.period {
            config.reconcile.period = period.clone();
        }
        if self.dry_run {
            config.reconcile.dry_run = true;
        }
    }

    /// Load, override and validate. Errors here mean the loop never starts.
    pub fn settings(&self) -> anyhow::Result<(ReplicantConfig, Settings)> {
        let config = self.load()?;
        let settings = config.validate().context("invalid configuration")?;
        Ok((config, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_override_file_values() {
        let file = config_file(
            r#"
[target]
namespace = "shop"
selector = "app=web"

[reconcile]
period = "30s"
dry_run = false
"#,
        );
        let args = TargetArgs {
            config: Some(file.path().to_path_buf()),
            selector: Some("app=api".to_string()),
            period: Some("5s".to_string()),
            dry_run: true,
            ..Default::default()
        };

        let (_, settings) = args.settings().unwrap();

        assert_eq!(settings.namespace, "shop");
        assert_eq!(settings.selector.as_str(), "app=api");
        assert_eq!(settings.period, Duration::from_secs(5));
        assert!(settings.dry_run);
    }

    #[test]
    fn dry_run_flag_never_disables_file_setting() {
        let file = config_file("[target]\nselector = \"app=web\"\n[reconcile]\ndry_run = true\n");
        let args = TargetArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let (_, settings) = args.settings().unwrap();
        assert!(settings.dry_run);
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let args = TargetArgs {
            selector: Some("app=web".to_string()),
            ..Default::default()
        };

        let (config, settings) = args.settings().unwrap();

        assert_eq!(config.policy.min_replicas, 1);
        assert_eq!(config.policy.max_replicas, 10);
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.period, Duration::from_secs(60));
    }

    #[test]
    fn invalid_configuration_is_reported() {
        let file = config_file(
            "[target]\nselector = \"app=web\"\n[policy]\nmin_replicas = 5\nmax_replicas = 2\n",
        );
        let args = TargetArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let err = args.settings().unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let args = TargetArgs {
            config: Some(PathBuf::from("/nonexistent/replicant.toml")),
            ..Default::default()
        };

        let err = args.load().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/replicant.toml"));
    }
}
