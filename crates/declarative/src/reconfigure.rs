//! Multi-step reconfiguration of crypto configurations
//!
//! A partition's crypto configuration is a set of adapters crossed with a
//! set of domain/access-mode records. The console rejects any intermediate
//! state where a non-empty configuration has no adapter or no domain in
//! control-usage mode, so changes are ordered:
//!
//! 1. one addition call carrying every new adapter and domain, control-usage
//!    domains first;
//! 2. access-mode changes, those granting control-usage first;
//! 3. one removal call last.

use crate::context::ApplyContext;
use crate::error::{Error, Result};
use hmckit::{AccessMode, CryptoConfiguration, DomainConfig, Operation, Resource};
use std::collections::{BTreeMap, BTreeSet};

/// Set view of a crypto configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubConfig {
    /// Attached adapter URIs
    pub adapters: BTreeSet<String>,
    /// Attached domains and their access mode
    pub domains: BTreeMap<u32, AccessMode>,
}

impl SubConfig {
    /// Read the configuration of a partition.
    pub fn of(partition: &Resource) -> Result<Self> {
        let config = CryptoConfiguration::from_value(partition.get("crypto-configuration"))?;
        Ok(Self::from(&config))
    }

    /// Whether nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty() && self.domains.is_empty()
    }

    /// Whether the console would accept this configuration.
    pub fn is_consistent(&self) -> bool {
        self.is_empty()
            || (!self.adapters.is_empty()
                && self.domains.values().any(|m| *m == AccessMode::ControlUsage))
    }

    /// Apply an operation to this view.
    pub fn simulate(&mut self, operation: &Operation) {
        match operation {
            Operation::IncreaseCryptoConfig {
                adapter_uris,
                domain_configs,
            } => {
                self.adapters.extend(adapter_uris.iter().cloned());
                for d in domain_configs {
                    self.domains.insert(d.domain_index, d.access_mode);
                }
            }
            Operation::DecreaseCryptoConfig {
                adapter_uris,
                domain_indexes,
            } => {
                for uri in adapter_uris {
                    self.adapters.remove(uri);
                }
                for index in domain_indexes {
                    self.domains.remove(index);
                }
            }
            Operation::ChangeCryptoDomainConfig {
                domain_index,
                access_mode,
            } => {
                self.domains.insert(*domain_index, *access_mode);
            }
            _ => {}
        }
    }
}

impl From<&CryptoConfiguration> for SubConfig {
    fn from(config: &CryptoConfiguration) -> Self {
        Self {
            adapters: config.crypto_adapter_uris.iter().cloned().collect(),
            domains: config
                .crypto_domain_configurations
                .iter()
                .map(|d| (d.domain_index, d.access_mode))
                .collect(),
        }
    }
}

impl From<&SubConfig> for CryptoConfiguration {
    fn from(config: &SubConfig) -> Self {
        Self {
            crypto_adapter_uris: config.adapters.iter().cloned().collect(),
            crypto_domain_configurations: config
                .domains
                .iter()
                .map(|(index, mode)| DomainConfig {
                    domain_index: *index,
                    access_mode: *mode,
                })
                .collect(),
        }
    }
}

/// Ordered operations turning `current` into `desired`.
pub fn plan(current: &SubConfig, desired: &SubConfig) -> Vec<Operation> {
    let mut steps = Vec::new();

    let add_adapters: Vec<String> = desired.adapters.difference(&current.adapters).cloned().collect();
    let mut add_domains: Vec<DomainConfig> = desired
        .domains
        .iter()
        .filter(|(index, _)| !current.domains.contains_key(index))
        .map(|(index, mode)| DomainConfig {
            domain_index: *index,
            access_mode: *mode,
        })
        .collect();
    add_domains.sort_by_key(|d| (d.access_mode, d.domain_index));
    if !add_adapters.is_empty() || !add_domains.is_empty() {
        steps.push(Operation::IncreaseCryptoConfig {
            adapter_uris: add_adapters,
            domain_configs: add_domains,
        });
    }

    let mut mode_changes: Vec<(AccessMode, u32)> = desired
        .domains
        .iter()
        .filter_map(|(index, mode)| match current.domains.get(index) {
            Some(old) if old != mode => Some((*mode, *index)),
            _ => None,
        })
        .collect();
    mode_changes.sort();
    for (access_mode, domain_index) in mode_changes {
        steps.push(Operation::ChangeCryptoDomainConfig {
            domain_index,
            access_mode,
        });
    }

    let remove_adapters: Vec<String> = current.adapters.difference(&desired.adapters).cloned().collect();
    let remove_domains: Vec<u32> = current
        .domains
        .keys()
        .filter(|index| !desired.domains.contains_key(index))
        .copied()
        .collect();
    if !remove_adapters.is_empty() || !remove_domains.is_empty() {
        steps.push(Operation::DecreaseCryptoConfig {
            adapter_uris: remove_adapters,
            domain_indexes: remove_domains,
        });
    }

    steps
}

/// Converge the crypto configuration of `partition` to `desired`.
///
/// In dry-run mode the partition's local `crypto-configuration` is updated
/// instead. Returns whether anything changed.
pub fn apply(ctx: &ApplyContext<'_>, partition: &mut Resource, desired: &SubConfig) -> Result<bool> {
    if !desired.is_consistent() {
        return Err(Error::parameter(format!(
            "crypto configuration for {partition} needs at least one adapter and one domain in {} mode",
            AccessMode::ControlUsage
        )));
    }

    let mut current = SubConfig::of(partition)?;
    let steps = plan(&current, desired);
    if steps.is_empty() {
        return Ok(false);
    }

    let label = partition.to_string();
    for step in &steps {
        ctx.progress().on_operation(&label, step.name());
        if ctx.dry_run {
            log::info!("would {step} on {label}");
        } else {
            log::info!("{step} on {label}");
            ctx.client.invoke(partition, step)?;
        }
        current.simulate(step);
    }

    if ctx.dry_run || partition.is_local() {
        partition.set(
            "crypto-configuration",
            CryptoConfiguration::from(&current).to_value(),
        );
    } else {
        ctx.client.pull_full_properties(partition)?;
    }
    Ok(true)
}

// ============================================================================
// Attachment planning
// ============================================================================

/// Crypto configurations held by the other partitions of a CPC.
#[derive(Debug, Default)]
pub struct DomainUsage {
    holders: Vec<(String, SubConfig)>,
}

/// One domain of an adapter already used by another partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConflict {
    /// Domain index
    pub domain_index: u32,
    /// Partition holding it
    pub holder: String,
    /// Access mode it holds
    pub access_mode: AccessMode,
}

impl DomainUsage {
    /// Collect the configurations of all partitions except `target_uri`.
    pub fn collect(partitions: &[Resource], target_uri: &str) -> Result<Self> {
        let mut holders = Vec::new();
        for partition in partitions.iter().filter(|p| p.uri != target_uri) {
            let config = SubConfig::of(partition)?;
            if !config.is_empty() {
                holders.push((partition.name().to_string(), config));
            }
        }
        Ok(Self { holders })
    }

    /// Domains of `adapter_uri` that another partition uses in
    /// control-usage mode.
    pub fn conflicts(&self, adapter_uri: &str, domains: &[u32]) -> Vec<DomainConflict> {
        let mut found = Vec::new();
        for (holder, config) in &self.holders {
            if !config.adapters.contains(adapter_uri) {
                continue;
            }
            for index in domains {
                if config.domains.get(index) == Some(&AccessMode::ControlUsage) {
                    found.push(DomainConflict {
                        domain_index: *index,
                        holder: holder.clone(),
                        access_mode: AccessMode::ControlUsage,
                    });
                }
            }
        }
        found
    }
}

/// What to attach to a partition.
#[derive(Debug, Clone)]
pub struct AttachRequest<'r> {
    /// Candidate adapters, in preference order
    pub candidates: &'r [Resource],
    /// How many adapters must end up attached
    pub required: usize,
    /// Domains to attach
    pub domains: Vec<u32>,
    /// Access mode for the domains
    pub access_mode: AccessMode,
}

/// Compute the configuration `partition` needs to satisfy `request`.
///
/// Adapters already attached count towards `required`. New adapters are
/// taken from the candidates whose requested domains are free; conflicts
/// only matter when control-usage is requested.
pub fn plan_attachment(
    partition: &Resource,
    request: &AttachRequest<'_>,
    usage: &DomainUsage,
) -> Result<SubConfig> {
    let current = SubConfig::of(partition)?;

    for index in &request.domains {
        if let Some(mode) = current.domains.get(index)
            && *mode != request.access_mode
        {
            return Err(Error::Conflict {
                holder: partition.name().to_string(),
                access_mode: mode.to_string(),
                message: format!(
                    "domain {index} is already attached to {partition} in a different access mode than {}",
                    request.access_mode
                ),
            });
        }
    }

    let conflicts_for = |adapter: &Resource| {
        if request.access_mode == AccessMode::ControlUsage {
            usage.conflicts(&adapter.uri, &request.domains)
        } else {
            Vec::new()
        }
    };

    let mut desired = current.clone();
    let mut attached = 0;
    let mut last_conflict: Option<(String, DomainConflict)> = None;

    for adapter in request.candidates {
        if attached >= request.required {
            break;
        }
        let conflicts = conflicts_for(adapter);
        if current.adapters.contains(&adapter.uri) {
            if let Some(conflict) = conflicts.into_iter().next() {
                return Err(conflict_error(adapter, &conflict));
            }
            attached += 1;
            continue;
        }
        match conflicts.into_iter().next() {
            None => {
                log::debug!("selected {adapter} for {partition}");
                desired.adapters.insert(adapter.uri.clone());
                attached += 1;
            }
            Some(conflict) => {
                log::debug!(
                    "skipping {adapter}: domain {} is used by {}",
                    conflict.domain_index,
                    conflict.holder
                );
                last_conflict = Some((adapter.to_string(), conflict));
            }
        }
    }

    if attached < request.required {
        return Err(match last_conflict {
            Some((adapter, conflict)) => Error::Conflict {
                holder: conflict.holder,
                access_mode: conflict.access_mode.to_string(),
                message: format!(
                    "not enough adapters for {partition}: need {}, found {attached} without conflicts; domain {} of {adapter} is in use",
                    request.required, conflict.domain_index
                ),
            },
            None => Error::parameter(format!(
                "not enough adapters for {partition}: need {}, only {attached} available",
                request.required
            )),
        });
    }

    for index in &request.domains {
        desired.domains.insert(*index, request.access_mode);
    }
    Ok(desired)
}

fn conflict_error(adapter: &Resource, conflict: &DomainConflict) -> Error {
    Error::Conflict {
        holder: conflict.holder.clone(),
        access_mode: conflict.access_mode.to_string(),
        message: format!(
            "domain {} of {adapter} is already in use",
            conflict.domain_index
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use hmckit::{Kind, MemoryConsole, Properties};
    use serde_json::json;

    fn sub(adapters: &[&str], domains: &[(u32, AccessMode)]) -> SubConfig {
        SubConfig {
            adapters: adapters.iter().map(ToString::to_string).collect(),
            domains: domains.iter().copied().collect(),
        }
    }

    const U: AccessMode = AccessMode::ControlUsage;
    const C: AccessMode = AccessMode::Control;

    #[test]
    fn test_plan_noop() {
        let cfg = sub(&["a"], &[(0, U)]);
        assert!(plan(&cfg, &cfg).is_empty());
    }

    #[test]
    fn test_new_element_and_record_in_one_call() {
        let current = sub(&["A"], &[]);
        let desired = sub(&["A", "B"], &[(4, U)]);
        let steps = plan(&current, &desired);
        assert_eq!(
            steps,
            vec![Operation::IncreaseCryptoConfig {
                adapter_uris: vec!["B".to_string()],
                domain_configs: vec![DomainConfig {
                    domain_index: 4,
                    access_mode: U
                }],
            }]
        );
    }

    #[test]
    fn test_additions_before_removals() {
        let current = sub(&["A"], &[(0, U)]);
        let desired = sub(&["B"], &[(1, U)]);
        let steps = plan(&current, &desired);
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], Operation::IncreaseCryptoConfig { .. }));
        assert_eq!(
            steps[1],
            Operation::DecreaseCryptoConfig {
                adapter_uris: vec!["A".to_string()],
                domain_indexes: vec![0],
            }
        );
    }

    #[test]
    fn test_more_permissive_first() {
        let current = sub(&["A"], &[(0, U), (1, C)]);
        let desired = sub(&["A"], &[(0, C), (1, U), (2, C), (3, U)]);
        let steps = plan(&current, &desired);

        match &steps[0] {
            Operation::IncreaseCryptoConfig { domain_configs, .. } => {
                assert_eq!(domain_configs[0].access_mode, U);
                assert_eq!(domain_configs[0].domain_index, 3);
                assert_eq!(domain_configs[1].access_mode, C);
            }
            other => panic!("unexpected step {other}"),
        }
        assert_eq!(
            steps[1..],
            [
                Operation::ChangeCryptoDomainConfig {
                    domain_index: 1,
                    access_mode: U
                },
                Operation::ChangeCryptoDomainConfig {
                    domain_index: 0,
                    access_mode: C
                },
            ]
        );
    }

    #[test]
    fn test_every_intermediate_state_is_consistent() {
        let current = sub(&["A"], &[(0, U), (1, C)]);
        let desired = sub(&["B"], &[(1, U), (5, C)]);
        let mut state = current.clone();
        for step in plan(&current, &desired) {
            state.simulate(&step);
            assert!(state.is_consistent(), "inconsistent after {step}");
        }
        assert_eq!(state, desired);
    }

    fn partition(console: &MemoryConsole) -> Resource {
        let cpc = console.add_cpc("CPC1");
        console.add_partition(&cpc.uri, "lp01", "stopped")
    }

    #[test]
    fn test_apply_against_console() {
        let console = MemoryConsole::new();
        let mut part = partition(&console);
        let ctx = ApplyContext::new(&console, false);

        assert!(apply(&ctx, &mut part, &sub(&["A"], &[(0, U)])).unwrap());
        assert!(apply(&ctx, &mut part, &sub(&["B"], &[(1, U), (2, C)])).unwrap());
        assert_eq!(SubConfig::of(&part).unwrap(), sub(&["B"], &[(1, U), (2, C)]));
        assert!(!apply(&ctx, &mut part, &sub(&["B"], &[(1, U), (2, C)])).unwrap());

        let stored = console.get(&part.uri).unwrap();
        assert_eq!(SubConfig::of(&stored).unwrap(), sub(&["B"], &[(1, U), (2, C)]));
    }

    #[test]
    fn test_apply_dry_run_updates_local_copy_only() {
        let console = MemoryConsole::new();
        let mut part = partition(&console);
        let ctx = ApplyContext::new(&console, true);

        assert!(apply(&ctx, &mut part, &sub(&["A"], &[(0, U)])).unwrap());
        assert_eq!(SubConfig::of(&part).unwrap(), sub(&["A"], &[(0, U)]));
        assert!(console.mutating_calls().is_empty());
        assert!(SubConfig::of(&console.get(&part.uri).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_rejects_inconsistent_target() {
        let console = MemoryConsole::new();
        let mut part = partition(&console);
        let ctx = ApplyContext::new(&console, false);
        let err = apply(&ctx, &mut part, &sub(&["A"], &[(0, C)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(console.mutating_calls().is_empty());
    }

    fn adapter(uri: &str, name: &str) -> Resource {
        let mut props = Properties::new();
        props.insert("name".to_string(), json!(name));
        Resource::new(Kind::Adapter, uri, props)
    }

    fn holder(name: &str, config: &SubConfig) -> Resource {
        let mut props = Properties::new();
        props.insert("name".to_string(), json!(name));
        props.insert(
            "crypto-configuration".to_string(),
            CryptoConfiguration::from(config).to_value(),
        );
        Resource::new(Kind::Partition, format!("/api/partitions/{name}"), props)
    }

    #[test]
    fn test_attachment_skips_conflicting_adapter() {
        let target = holder("lp01", &SubConfig::default());
        let other = holder("lp02", &sub(&["/a/1"], &[(3, U)]));
        let usage = DomainUsage::collect(&[target.clone(), other], &target.uri).unwrap();
        let candidates = [adapter("/a/1", "CRYP1"), adapter("/a/2", "CRYP2")];

        let desired = plan_attachment(
            &target,
            &AttachRequest {
                candidates: &candidates,
                required: 1,
                domains: vec![3, 4],
                access_mode: U,
            },
            &usage,
        )
        .unwrap();
        assert_eq!(desired, sub(&["/a/2"], &[(3, U), (4, U)]));
    }

    #[test]
    fn test_attachment_conflict_names_holder() {
        let target = holder("lp01", &SubConfig::default());
        let other = holder("lp02", &sub(&["/a/1"], &[(3, U)]));
        let usage = DomainUsage::collect(&[target.clone(), other], &target.uri).unwrap();
        let candidates = [adapter("/a/1", "CRYP1")];

        let err = plan_attachment(
            &target,
            &AttachRequest {
                candidates: &candidates,
                required: 1,
                domains: vec![3],
                access_mode: U,
            },
            &usage,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let msg = err.to_string();
        assert!(msg.contains("lp02"));
        assert!(msg.contains("control-usage"));
    }

    #[test]
    fn test_control_mode_does_not_conflict() {
        let target = holder("lp01", &SubConfig::default());
        let other = holder("lp02", &sub(&["/a/1"], &[(3, U)]));
        let usage = DomainUsage::collect(&[target.clone(), other], &target.uri).unwrap();
        let candidates = [adapter("/a/1", "CRYP1")];

        let desired = plan_attachment(
            &target,
            &AttachRequest {
                candidates: &candidates,
                required: 1,
                domains: vec![3],
                access_mode: C,
            },
            &usage,
        )
        .unwrap();
        assert_eq!(desired, sub(&["/a/1"], &[(3, C)]));
    }

    #[test]
    fn test_attachment_existing_adapter_counts() {
        let target = holder("lp01", &sub(&["/a/1"], &[(0, U)]));
        let usage = DomainUsage::collect(&[target.clone()], &target.uri).unwrap();
        let candidates = [adapter("/a/1", "CRYP1"), adapter("/a/2", "CRYP2")];

        let desired = plan_attachment(
            &target,
            &AttachRequest {
                candidates: &candidates,
                required: 1,
                domains: vec![0],
                access_mode: U,
            },
            &usage,
        )
        .unwrap();
        assert_eq!(desired, sub(&["/a/1"], &[(0, U)]));
    }

    #[test]
    fn test_attachment_mode_mismatch_on_target() {
        let target = holder("lp01", &sub(&["/a/1"], &[(0, U)]));
        let usage = DomainUsage::default();
        let candidates = [adapter("/a/1", "CRYP1")];
        let err = plan_attachment(
            &target,
            &AttachRequest {
                candidates: &candidates,
                required: 1,
                domains: vec![0],
                access_mode: C,
            },
            &usage,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
