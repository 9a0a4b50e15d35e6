//! Function lifecycle through the HTTP surface.

mod common;

use axum::{body::Body, http::StatusCode};
use common::fixtures::{spawn_echo_upstream, DeploymentBuilder};
use common::TestProvider;
use nomad_provider::metrics::Outcome;
use serde_json::json;

#[tokio::test]
async fn deploy_invoke_scale_delete() {
    let upstream = spawn_echo_upstream().await;
    let provider = TestProvider::new(upstream);

    let deployment = DeploymentBuilder::new("echo").with_scaling(1, 5).build();
    assert_eq!(
        provider.send_json("POST", "/system/functions", &deployment).await,
        StatusCode::ACCEPTED
    );

    let (status, body) = provider.send("POST", "/function/echo", "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"/ hello");

    assert_eq!(provider.desired_replicas("echo").await, Some(1));

    let scale = json!({"serviceName": "echo", "replicas": 3});
    assert_eq!(
        provider
            .send_json("POST", "/system/scale-function/echo", &scale)
            .await,
        StatusCode::ACCEPTED
    );
    assert_eq!(provider.desired_replicas("echo").await, Some(3));

    let delete = json!({"functionName": "echo"});
    assert_eq!(
        provider.send_json("DELETE", "/system/functions", &delete).await,
        StatusCode::ACCEPTED
    );

    let (status, _) = provider
        .send("GET", "/system/function/echo", Body::empty())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = provider.send("POST", "/function/echo", "hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(provider.sink.count("echo", Outcome::Success), 1);
    assert_eq!(provider.sink.count("echo", Outcome::ResolverMiss), 1);
}

#[tokio::test]
async fn list_reflects_deployments() {
    let provider = TestProvider::new(spawn_echo_upstream().await);

    for name in ["echo", "figlet"] {
        let deployment = DeploymentBuilder::new(name)
            .with_env_process("cat")
            .with_scaling(2, 4)
            .build();
        provider
            .send_json("POST", "/system/functions", &deployment)
            .await;
    }

    let (status, body) = provider.send("GET", "/system/functions", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let listed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = listed.iter().filter_map(|f| f["name"].as_str()).collect();
    assert_eq!(names, vec!["echo", "figlet"]);
    assert!(listed
        .iter()
        .all(|f| f["replicas"] == 2 && f["availableReplicas"] == 2 && f["envProcess"] == "cat"));
}

#[tokio::test]
async fn redeploy_replaces_image() {
    let provider = TestProvider::new(spawn_echo_upstream().await);

    let first = DeploymentBuilder::new("echo").with_image("echo:1").build();
    let second = DeploymentBuilder::new("echo").with_image("echo:2").build();
    provider.send_json("POST", "/system/functions", &first).await;
    assert_eq!(
        provider.send_json("PUT", "/system/functions", &second).await,
        StatusCode::ACCEPTED
    );

    let (_, body) = provider.send("GET", "/system/functions", Body::empty()).await;
    let listed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["image"], "echo:2");
}

#[tokio::test]
async fn invalid_deployments_are_rejected() {
    let provider = TestProvider::new(spawn_echo_upstream().await);

    let inverted = DeploymentBuilder::new("echo").with_scaling(5, 1).build();
    assert_eq!(
        provider.send_json("POST", "/system/functions", &inverted).await,
        StatusCode::BAD_REQUEST
    );

    let no_image = DeploymentBuilder::new("echo").with_image("").build();
    assert_eq!(
        provider.send_json("POST", "/system/functions", &no_image).await,
        StatusCode::BAD_REQUEST
    );

    assert_eq!(provider.jobs.registrations(), 0);
}

#[tokio::test]
async fn health_and_info() {
    let provider = TestProvider::new(spawn_echo_upstream().await);

    let (status, _) = provider.send("GET", "/healthz", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = provider.send("GET", "/system/info", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["orchestration"], "nomad");
    assert_eq!(info["provider"], "nomad-provider");
}

#[tokio::test]
async fn deploy_accepts_cli_style_nulls() {
    let provider = TestProvider::new(spawn_echo_upstream().await);

    let deployment = json!({
        "service": "echo",
        "image": "ghcr.io/openfaas/echo:latest",
        "network": "",
        "envProcess": "",
        "envVars": null,
        "constraints": null,
        "secrets": null,
        "labels": null,
        "annotations": null,
        "limits": null,
        "requests": null,
        "readOnlyRootFilesystem": false
    });
    assert_eq!(
        provider.send_json("POST", "/system/functions", &deployment).await,
        StatusCode::ACCEPTED
    );
    assert_eq!(provider.desired_replicas("echo").await, Some(1));

    let (status, body) = provider.send("POST", "/function/echo", "hi").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"/ hi");
}
