//! OpenFaaS provider API request and response bodies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::parse_duration;
use crate::error::ProviderError;
use crate::function::{
    parse_cpu_mhz, parse_memory_mb, FunctionSpec, ResourceLimits, ScalingBounds,
    DEFAULT_FUNCTION_PORT, DEFAULT_MAX_REPLICAS, DEFAULT_MIN_REPLICAS,
};

/// Label holding the minimum replica count.
pub const SCALE_MIN_LABEL: &str = "com.openfaas.scale.min";
/// Label holding the maximum replica count.
pub const SCALE_MAX_LABEL: &str = "com.openfaas.scale.max";
/// Label overriding the port the function listens on.
pub const PORT_LABEL: &str = "com.openfaas.port";
/// Annotation overriding the invocation deadline.
pub const TIMEOUT_ANNOTATION: &str = "com.openfaas.timeout";

/// Body of a deploy or update request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeployment {
    pub service: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<FunctionResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<FunctionResources>,
    #[serde(default)]
    pub read_only_root_filesystem: bool,
}

/// Resource quantities as Kubernetes-style strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

impl FunctionDeployment {
    /// Converts the request into a validated [`FunctionSpec`].
    pub fn into_spec(self) -> Result<FunctionSpec, ProviderError> {
        let labels: BTreeMap<String, String> = self.labels.unwrap_or_default().into_iter().collect();
        let annotations: BTreeMap<String, String> =
            self.annotations.unwrap_or_default().into_iter().collect();

        let scaling = ScalingBounds {
            min: label_number(&labels, SCALE_MIN_LABEL)?.unwrap_or(DEFAULT_MIN_REPLICAS),
            max: label_number(&labels, SCALE_MAX_LABEL)?.unwrap_or(DEFAULT_MAX_REPLICAS),
        };

        let port = label_number(&labels, PORT_LABEL)?.unwrap_or(DEFAULT_FUNCTION_PORT);

        let timeout = annotations
            .get(TIMEOUT_ANNOTATION)
            .map(|raw| {
                parse_duration(raw).map_err(|e| {
                    ProviderError::invalid_spec(format!("{TIMEOUT_ANNOTATION}: {e}"))
                })
            })
            .transpose()?;

        // Limits win over requests; either may be partial.
        let mut limits = ResourceLimits::default();
        for resources in [self.requests.as_ref(), self.limits.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(memory) = resources.memory.as_deref() {
                limits.memory_mb = parse_memory_mb(memory)?;
            }
            if let Some(cpu) = resources.cpu.as_deref() {
                limits.cpu_mhz = parse_cpu_mhz(cpu)?;
            }
        }

        let spec = FunctionSpec {
            name: self.service,
            image: self.image,
            env_process: self.env_process.filter(|p| !p.is_empty()),
            env: self.env_vars.unwrap_or_default().into_iter().collect(),
            limits,
            port,
            labels,
            annotations,
            secrets: self.secrets.unwrap_or_default(),
            constraints: self.constraints.unwrap_or_default(),
            read_only_root_filesystem: self.read_only_root_filesystem,
            scaling,
            timeout,
        };

        spec.validate()?;
        Ok(spec)
    }
}

fn label_number<T: std::str::FromStr>(
    labels: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ProviderError> {
    labels
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ProviderError::invalid_spec(format!("{key} must be a number, got {raw:?}")))
        })
        .transpose()
}

/// A deployed function as reported by list and replica reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    pub name: String,
    pub image: String,
    pub invocation_count: u64,
    pub replicas: u64,
    pub available_replicas: u64,
    #[serde(default)]
    pub env_process: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Body of a scale request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleServiceRequest {
    #[serde(default)]
    pub service_name: String,
    /// Signed so a negative count reaches validation instead of failing to parse.
    pub replicas: i64,
}

/// Body of a delete request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFunctionRequest {
    pub function_name: String,
}

/// Provider identity reported by `/system/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub orchestration: String,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub release: String,
    pub sha: String,
}

impl ProviderInfo {
    pub fn current() -> Self {
        Self {
            provider: env!("CARGO_PKG_NAME").to_owned(),
            orchestration: "nomad".to_owned(),
            version: VersionInfo {
                release: env!("CARGO_PKG_VERSION").to_owned(),
                sha: option_env!("GIT_SHA").unwrap_or("unknown").to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deployment(json: serde_json::Value) -> FunctionDeployment {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn minimal_deployment() {
        let spec = deployment(serde_json::json!({
            "service": "echo",
            "image": "ghcr.io/openfaas/alpine:latest"
        }))
        .into_spec()
        .unwrap();

        assert_eq!(spec.name, "echo");
        assert_eq!(spec.port, DEFAULT_FUNCTION_PORT);
        assert_eq!(spec.scaling, ScalingBounds::default());
        assert_eq!(spec.limits, ResourceLimits::default());
        assert!(spec.timeout.is_none());
    }

    #[test]
    fn full_deployment() {
        let spec = deployment(serde_json::json!({
            "service": "figlet",
            "image": "functions/figlet:0.13",
            "envProcess": "figlet",
            "envVars": {"write_debug": "true"},
            "secrets": ["api-key"],
            "constraints": ["${attr.kernel.name} == linux"],
            "labels": {
                "com.openfaas.scale.min": "2",
                "com.openfaas.scale.max": "5",
                "com.openfaas.port": "9000",
                "team": "blue"
            },
            "annotations": {"com.openfaas.timeout": "45s"},
            "limits": {"memory": "256Mi", "cpu": "500m"},
            "requests": {"memory": "64Mi"},
            "readOnlyRootFilesystem": true
        }))
        .into_spec()
        .unwrap();

        assert_eq!(spec.env_process.as_deref(), Some("figlet"));
        assert_eq!(spec.env.get("write_debug").map(String::as_str), Some("true"));
        assert_eq!(spec.scaling, ScalingBounds { min: 2, max: 5 });
        assert_eq!(spec.port, 9000);
        assert_eq!(spec.timeout, Some(Duration::from_secs(45)));
        assert_eq!(spec.limits.memory_mb, 256);
        assert_eq!(spec.limits.cpu_mhz, 500);
        assert!(spec.read_only_root_filesystem);
        assert_eq!(spec.secrets, vec!["api-key".to_owned()]);
    }

    #[test]
    fn null_collections_accepted() {
        let spec = deployment(serde_json::json!({
            "service": "echo",
            "image": "ghcr.io/openfaas/alpine:latest",
            "network": "",
            "envProcess": "cat",
            "envVars": null,
            "constraints": null,
            "secrets": null,
            "labels": null,
            "annotations": null,
            "limits": null,
            "requests": null,
            "readOnlyRootFilesystem": false
        }))
        .into_spec()
        .unwrap();

        assert!(spec.env.is_empty());
        assert!(spec.constraints.is_empty());
        assert!(spec.secrets.is_empty());
        assert_eq!(spec.env_process.as_deref(), Some("cat"));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let err = deployment(serde_json::json!({
            "service": "echo",
            "image": "img",
            "labels": {"com.openfaas.scale.min": "4", "com.openfaas.scale.max": "1"}
        }))
        .into_spec()
        .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidSpec(_)));
    }

    #[test]
    fn non_numeric_label_rejected() {
        let err = deployment(serde_json::json!({
            "service": "echo",
            "image": "img",
            "labels": {"com.openfaas.scale.max": "many"}
        }))
        .into_spec()
        .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidSpec(_)));
    }

    #[test]
    fn status_serialises_camel_case() {
        let status = FunctionStatus {
            name: "echo".into(),
            image: "img".into(),
            replicas: 1,
            available_replicas: 1,
            ..FunctionStatus::default()
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["availableReplicas"], 1);
        assert_eq!(json["invocationCount"], 0);
    }

    #[test]
    fn scale_request_accepts_negative() {
        let req: ScaleServiceRequest =
            serde_json::from_str(r#"{"serviceName":"echo","replicas":-1}"#).unwrap();
        assert_eq!(req.replicas, -1);
    }
}
