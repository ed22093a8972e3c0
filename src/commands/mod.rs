pub mod apply;
pub mod config;
pub mod facts;

use anyhow::{Context as _, Result, bail};
use hmckit::MemoryConsole;
use std::path::Path;

use crate::cli::TargetArgs;
use crate::config::Config;
use crate::resource::Address;

/// Load the console inventory snapshot
pub fn open_inventory(path: &Path) -> Result<MemoryConsole> {
    if !path.exists() {
        bail!(
            "No inventory at {} (pass --inventory or set `inventory` in the config file)",
            path.display()
        );
    }
    MemoryConsole::load(path).with_context(|| format!("Could not load inventory {}", path.display()))
}

/// Resource address from the command line, falling back to the configured CPC
pub fn address(target: &TargetArgs, config: &Config) -> Address {
    Address {
        cpc: target.cpc.clone().or_else(|| config.default_cpc.clone()),
        partition: target.partition.clone(),
        name: target.name.clone(),
        expand_storage_groups: target.expand_storage_groups,
        expand_crypto_adapters: target.expand_crypto_adapters,
    }
}

/// One-line rendering of a failed command, tagged with the error kind when
/// the engine produced it
pub fn render_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<declarative::Error>() {
        Some(engine) => format!("[{}] {engine}", engine.kind()),
        None => format!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn target(cpc: Option<&str>) -> TargetArgs {
        TargetArgs {
            kind: ResourceKind::Nic,
            name: "eth0".to_string(),
            cpc: cpc.map(str::to_string),
            partition: Some("lp01".to_string()),
            expand_storage_groups: false,
            expand_crypto_adapters: false,
        }
    }

    #[test]
    fn test_address_uses_default_cpc() {
        let config = Config {
            default_cpc: Some("CPC1".to_string()),
            ..Default::default()
        };
        assert_eq!(address(&target(None), &config).cpc.as_deref(), Some("CPC1"));
        assert_eq!(address(&target(Some("CPC2")), &config).cpc.as_deref(), Some("CPC2"));
        assert_eq!(address(&target(None), &Config::default()).cpc, None);
    }

    #[test]
    fn test_render_error() {
        let err = anyhow::Error::new(declarative::Error::parameter("bad input"));
        assert_eq!(render_error(&err), "[parameter] bad input");

        let err = anyhow::anyhow!("plain failure");
        assert_eq!(render_error(&err), "plain failure");
    }

    #[test]
    fn test_open_missing_inventory() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = open_inventory(&dir.path().join("none.json")).unwrap_err();
        assert!(err.to_string().contains("No inventory"));
    }
}
