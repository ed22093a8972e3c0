//! Crypto attachment - adapters and domains attached to a partition
//!
//! Unlike the `crypto_configuration` property of a partition, which names
//! the exact target configuration, an attachment request says how many
//! adapters (or which ones) and which domain range a partition needs. The
//! adapters are picked so that the requested domains do not collide with
//! other partitions using them in control-usage mode.

use declarative::reconfigure::{self, plan_attachment};
use declarative::{
    ApplyContext, AttachRequest, DomainUsage, Error, ManagedResource, Outcome, Result, SubConfig,
    TargetState,
};
use hmckit::{AccessMode, Kind, Operation, Properties, Resource, Selector};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::adapter::crypto_type;
use super::{find_child, find_cpc};

/// Domains per adapter when the adapter does not report it.
const DEFAULT_MAX_DOMAINS: u64 = 85;

fn default_crypto_type() -> String {
    "ep11".to_string()
}

fn default_domain_range() -> [i64; 2] {
    [0, -1]
}

/// Desired attachment, as given in the desired properties.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    /// Number of adapters, `-1` for all adapters of the crypto type
    adapter_count: Option<i64>,
    adapter_names: Option<Vec<String>>,
    /// Only used with `adapter_count`
    #[serde(default = "default_crypto_type")]
    crypto_type: String,
    /// Inclusive, `-1` as upper bound means the highest domain
    #[serde(default = "default_domain_range")]
    domain_range: [i64; 2],
    access_mode: Option<AccessMode>,
}

/// Crypto attachment handler
#[derive(Debug, Clone)]
pub struct CryptoAttachment {
    cpc: String,
    partition: String,
}

impl CryptoAttachment {
    pub fn new(cpc: String, partition: String) -> Self {
        Self { cpc, partition }
    }

    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<(Resource, Resource, Vec<Resource>)> {
        let cpc = find_cpc(ctx.client, &self.cpc)?;
        let partition = find_child(ctx.client, Kind::Partition, &cpc.uri, &self.partition)?
            .ok_or_else(|| {
                Error::parameter(format!(
                    "partition '{}' does not exist in CPC '{}'",
                    self.partition, self.cpc
                ))
            })?;
        let adapters = ctx.client.list(
            &Selector::new(Kind::Adapter)
                .within(&cpc.uri)
                .with("adapter-family", "crypto"),
        )?;
        Ok((cpc, partition, adapters))
    }

    /// Adapters to choose from and how many of them must be attached.
    fn candidates<'a>(&self, request: &Request, adapters: &'a [Resource]) -> Result<(Vec<&'a Resource>, usize)> {
        match (request.adapter_count, &request.adapter_names) {
            (Some(_), Some(_)) => Err(Error::parameter(
                "\"adapter_count\" and \"adapter_names\" are mutually exclusive",
            )),
            (None, None) => Err(Error::parameter(
                "one of \"adapter_count\" and \"adapter_names\" is required",
            )),
            (None, Some(names)) => {
                let mut picked = Vec::with_capacity(names.len());
                for name in names {
                    let adapter = adapters.iter().find(|a| a.name() == name).ok_or_else(|| {
                        Error::ReferenceNotFound {
                            field: "adapter_names".to_string(),
                            kind: Kind::Adapter,
                            name: name.clone(),
                            scope: Some(format!("crypto adapters of CPC '{}'", self.cpc)),
                        }
                    })?;
                    picked.push(adapter);
                }
                let required = picked.len();
                Ok((picked, required))
            }
            (Some(count), None) => {
                let wanted = crypto_type(&request.crypto_type)?;
                let typed: Vec<&Resource> = adapters
                    .iter()
                    .filter(|a| a.get_str("crypto-type") == Some(wanted.as_str()))
                    .collect();
                if typed.is_empty() {
                    return Err(Error::parameter(format!(
                        "no crypto adapters of type {:?} found in CPC '{}'",
                        request.crypto_type, self.cpc
                    )));
                }
                let required = match count {
                    -1 => typed.len(),
                    n if n < 1 => {
                        return Err(Error::parameter(format!(
                            "\"adapter_count\" must be at least 1, got {n}"
                        )));
                    }
                    n => usize::try_from(n).unwrap_or(usize::MAX),
                };
                if required > typed.len() {
                    return Err(Error::parameter(format!(
                        "\"adapter_count\" is {required} but CPC '{}' has only {} crypto adapters of type {:?}",
                        self.cpc,
                        typed.len(),
                        request.crypto_type
                    )));
                }
                Ok((typed, required))
            }
        }
    }

    /// The requested domain indexes.
    fn domains(request: &Request, candidates: &[&Resource]) -> Result<Vec<u32>> {
        let max_domains = candidates
            .first()
            .and_then(|a| a.get_u64("maximum-crypto-domains"))
            .unwrap_or(DEFAULT_MAX_DOMAINS);
        let [lo, hi] = request.domain_range;
        let hi = if hi == -1 {
            i64::try_from(max_domains).unwrap_or(i64::MAX) - 1
        } else {
            hi
        };
        if lo < 0 || lo > hi {
            return Err(Error::parameter(format!(
                "\"domain_range\" must satisfy 0 <= low <= high, got [{lo}, {hi}]"
            )));
        }
        let to_index = |i: i64| {
            u32::try_from(i).map_err(|_| Error::parameter(format!("invalid domain index {i}")))
        };
        (lo..=hi).map(to_index).collect()
    }

    /// Current configuration in result form.
    fn report(&self, partition: &Resource, adapters: &[Resource]) -> Result<Properties> {
        let config = SubConfig::of(partition)?;

        let attached: Map<String, Value> = adapters
            .iter()
            .filter(|a| config.adapters.contains(&a.uri))
            .map(|a| (a.name().to_string(), Value::Object(a.properties.clone())))
            .collect();
        let domain_config: Map<String, Value> = config
            .domains
            .iter()
            .map(|(index, mode)| (index.to_string(), json!(short_mode(*mode))))
            .collect();
        let indexes = |wanted: AccessMode| -> Vec<u32> {
            config
                .domains
                .iter()
                .filter(|(_, mode)| **mode == wanted)
                .map(|(index, _)| *index)
                .collect()
        };

        let mut properties = Properties::new();
        properties.insert(
            partition.name().to_string(),
            json!({
                "adapters": attached,
                "domain_config": domain_config,
                "usage_domains": indexes(AccessMode::ControlUsage),
                "control_domains": indexes(AccessMode::Control),
            }),
        );
        Ok(properties)
    }
}

/// Adapters (by name) and domains (by index) the planned operations add.
fn added(steps: &[Operation], adapters: &[Resource]) -> Value {
    let mut names = Vec::new();
    let mut domains = Vec::new();
    for step in steps {
        if let Operation::IncreaseCryptoConfig {
            adapter_uris,
            domain_configs,
        } = step
        {
            names.extend(adapter_uris.iter().map(|uri| {
                adapters
                    .iter()
                    .find(|a| &a.uri == uri)
                    .map_or_else(|| uri.clone(), |a| a.name().to_string())
            }));
            domains.extend(domain_configs.iter().map(|d| d.domain_index));
        }
    }
    names.sort();
    domains.sort_unstable();
    json!({"added-adapters": names, "added-domains": domains})
}

fn short_mode(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::ControlUsage => "usage",
        AccessMode::Control => "control",
    }
}

impl ManagedResource for CryptoAttachment {
    fn kind(&self) -> Kind {
        Kind::Partition
    }

    fn describe(&self) -> String {
        format!(
            "crypto attachment of partition '{}' in CPC '{}'",
            self.partition, self.cpc
        )
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[TargetState::Present, TargetState::Absent, TargetState::Facts]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, mut partition, adapters) = self.locate(ctx)?;
        let changed = reconfigure::apply(ctx, &mut partition, &SubConfig::default())?;
        Ok(Outcome::new(changed, self.report(&partition, &adapters)?))
    }

    fn ensure_state(
        &self,
        _target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let request: Request = serde_json::from_value(Value::Object(desired.clone()))
            .map_err(|e| Error::parameter(format!("invalid crypto attachment: {e}")))?;
        let (cpc, mut partition, adapters) = self.locate(ctx)?;
        if adapters.is_empty() {
            return Err(Error::parameter(format!(
                "no crypto adapters found in CPC '{}'",
                self.cpc
            )));
        }

        let (candidates, required) = self.candidates(&request, &adapters)?;
        let domains = Self::domains(&request, &candidates)?;
        let candidates: Vec<Resource> = candidates.into_iter().cloned().collect();

        let partitions = ctx
            .client
            .list(&Selector::new(Kind::Partition).within(&cpc.uri))?;
        let usage = DomainUsage::collect(&partitions, &partition.uri)?;
        let target = plan_attachment(
            &partition,
            &AttachRequest {
                candidates: &candidates,
                required,
                domains,
                access_mode: request.access_mode.unwrap_or(AccessMode::ControlUsage),
            },
            &usage,
        )?;

        let steps = reconfigure::plan(&SubConfig::of(&partition)?, &target);
        let changed = reconfigure::apply(ctx, &mut partition, &target)?;
        let mut properties = self.report(&partition, &adapters)?;
        properties.insert("changes".to_string(), added(&steps, &adapters));
        Ok(Outcome::new(changed, properties))
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let (_, partition, adapters) = self.locate(ctx)?;
        Ok(Outcome::new(false, self.report(&partition, &adapters)?))
    }
}
