//! Mapping between function specs and Nomad jobs.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    Constraint, Job, Network, Port, Resources, RestartPolicy, Service, ServiceCheck, Task,
    TaskGroup, Template, Vault, FUNCTION_META_KEY, JOB_PREFIX,
};
use crate::config::{parse_duration, ProviderConfig};
use crate::error::ProviderError;
use crate::function::{FunctionSpec, ScalingBounds};

const PORT_LABEL: &str = "http";
const LABEL_META_PREFIX: &str = "label.";
const ANNOTATION_META_PREFIX: &str = "annotation.";
const SCALE_MIN_META: &str = "scale_min";
const SCALE_MAX_META: &str = "scale_max";
/// Meta key carrying the invocation deadline override, on both job and service.
pub const TIMEOUT_META: &str = "timeout";
const HEALTH_PATH: &str = "/_/health";

/// Provider-wide values merged into every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub region: String,
    pub datacenter: String,
    pub vault_policy: String,
    pub secret_path_prefix: String,
}

impl ProviderDefaults {
    /// Defaults for jobs placed in `datacenter`.
    pub fn from_config(config: &ProviderConfig, datacenter: impl Into<String>) -> Self {
        Self {
            region: config.nomad.region.clone(),
            datacenter: datacenter.into(),
            vault_policy: config.secrets.vault_default_policy.clone(),
            secret_path_prefix: config.secrets.vault_secret_path_prefix.clone(),
        }
    }
}

/// What listing recovers from a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: String,
    pub image: String,
    pub env_process: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub replicas: u32,
    pub scaling: ScalingBounds,
    pub timeout: Option<Duration>,
}

/// Job ID for a function.
pub fn job_id(function_name: &str) -> String {
    format!("{JOB_PREFIX}{function_name}")
}

/// Builds the job that runs `spec`.
pub fn to_job(spec: &FunctionSpec, defaults: &ProviderDefaults) -> Result<Job, ProviderError> {
    spec.validate()?;

    let constraints = spec
        .constraints
        .iter()
        .map(|raw| parse_constraint(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut meta = BTreeMap::new();
    meta.insert(FUNCTION_META_KEY.to_owned(), spec.name.clone());
    meta.insert(SCALE_MIN_META.to_owned(), spec.scaling.min.to_string());
    meta.insert(SCALE_MAX_META.to_owned(), spec.scaling.max.to_string());
    if let Some(timeout) = spec.timeout {
        meta.insert(TIMEOUT_META.to_owned(), format_duration(timeout));
    }
    for (key, value) in &spec.labels {
        meta.insert(format!("{LABEL_META_PREFIX}{key}"), value.clone());
    }
    for (key, value) in &spec.annotations {
        meta.insert(format!("{ANNOTATION_META_PREFIX}{key}"), value.clone());
    }

    let mut env = spec.env.clone();
    if let Some(process) = &spec.env_process {
        env.insert("fprocess".to_owned(), process.clone());
    }

    let mut config = BTreeMap::new();
    config.insert("image".to_owned(), serde_json::json!(spec.image));
    config.insert("ports".to_owned(), serde_json::json!([PORT_LABEL]));
    if spec.read_only_root_filesystem {
        config.insert("readonly_rootfs".to_owned(), serde_json::json!(true));
    }

    let mut service_meta = BTreeMap::new();
    if let Some(timeout) = spec.timeout {
        service_meta.insert(TIMEOUT_META.to_owned(), format_duration(timeout));
    }

    let (vault, templates) = secret_directives(spec, defaults);

    let task = Task {
        name: spec.name.clone(),
        driver: "docker".to_owned(),
        config,
        env,
        resources: Resources {
            cpu: spec.limits.cpu_mhz,
            memory_mb: spec.limits.memory_mb,
        },
        services: vec![Service {
            name: spec.name.clone(),
            port_label: PORT_LABEL.to_owned(),
            tags: vec!["faas".to_owned(), spec.name.clone()],
            meta: service_meta,
            checks: vec![ServiceCheck {
                name: format!("{}-health", spec.name),
                check_type: "http".to_owned(),
                path: HEALTH_PATH.to_owned(),
                interval: nanos(Duration::from_secs(10)),
                timeout: nanos(Duration::from_secs(2)),
            }],
        }],
        vault,
        templates,
        meta: BTreeMap::new(),
    };

    let id = job_id(&spec.name);

    Ok(Job {
        id: id.clone(),
        name: id,
        job_type: "service".to_owned(),
        region: defaults.region.clone(),
        datacenters: vec![defaults.datacenter.clone()],
        meta,
        constraints,
        task_groups: vec![TaskGroup {
            name: spec.name.clone(),
            count: spec.scaling.initial_count(),
            meta: BTreeMap::new(),
            networks: vec![Network {
                mode: "host".to_owned(),
                dynamic_ports: vec![Port {
                    label: PORT_LABEL.to_owned(),
                    value: 0,
                    to: spec.port,
                }],
            }],
            tasks: vec![task],
            restart_policy: Some(RestartPolicy {
                attempts: 25,
                interval: nanos(Duration::from_secs(300)),
                delay: nanos(Duration::from_secs(5)),
                mode: "delay".to_owned(),
            }),
        }],
        status: None,
        modify_index: 0,
        job_modify_index: 0,
    })
}

/// Recovers the function behind a job, or `None` for jobs this provider did not create.
pub fn from_job(job: &Job) -> Option<FunctionSummary> {
    let name = job.meta.get(FUNCTION_META_KEY)?;
    if job.id != job_id(name) {
        return None;
    }

    let group = job.primary_group()?;
    let task = group.tasks.first()?;

    let scaling = ScalingBounds {
        min: meta_number(&job.meta, SCALE_MIN_META).unwrap_or_default(),
        max: meta_number(&job.meta, SCALE_MAX_META).unwrap_or(u32::MAX),
    };

    Some(FunctionSummary {
        name: name.clone(),
        image: task.image().unwrap_or_default().to_owned(),
        env_process: task.env.get("fprocess").cloned(),
        labels: strip_prefixed(&job.meta, LABEL_META_PREFIX),
        annotations: strip_prefixed(&job.meta, ANNOTATION_META_PREFIX),
        replicas: group.count,
        scaling,
        timeout: job
            .meta
            .get(TIMEOUT_META)
            .and_then(|raw| parse_duration(raw).ok()),
    })
}

fn meta_number(meta: &BTreeMap<String, String>, key: &str) -> Option<u32> {
    meta.get(key).and_then(|raw| raw.parse().ok())
}

fn strip_prefixed(meta: &BTreeMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
    meta.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|stripped| (stripped.to_owned(), value.clone()))
        })
        .collect()
}

fn secret_directives(
    spec: &FunctionSpec,
    defaults: &ProviderDefaults,
) -> (Option<Vault>, Vec<Template>) {
    if spec.secrets.is_empty() {
        return (None, Vec::new());
    }

    let prefix = defaults.secret_path_prefix.trim_end_matches('/');
    let templates = spec
        .secrets
        .iter()
        .map(|secret| Template {
            embedded_tmpl: format!(
                "{{{{ with secret \"{prefix}/{secret}\" }}}}{{{{ .Data.value }}}}{{{{ end }}}}"
            ),
            dest_path: format!("secrets/{secret}"),
            change_mode: "restart".to_owned(),
        })
        .collect();

    let vault = Vault {
        policies: vec![defaults.vault_policy.clone()],
        change_mode: "restart".to_owned(),
    };

    (Some(vault), templates)
}

/// Parses `<attribute> <operator> <value>`, e.g. `${attr.kernel.name} == linux`.
fn parse_constraint(raw: &str) -> Result<Constraint, ProviderError> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    match parts.as_slice() {
        [left, operand, right] => Ok(Constraint {
            l_target: (*left).to_owned(),
            operand: match *operand {
                "==" => "=".to_owned(),
                other => other.to_owned(),
            },
            r_target: (*right).to_owned(),
        }),
        _ => Err(ProviderError::invalid_spec(format!(
            "constraint must be '<attribute> <operator> <value>', got {raw:?}"
        ))),
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
