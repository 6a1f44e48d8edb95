//! End-to-end runs against an in-memory orchestration engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deferred::{format_deferred, DeferredError, DeferredValue, ErrorKind, OutputPayload};
use deployment::{
    DeploymentError, DeploymentRun, Exports, MonitorError, RegisterResourceRequest,
    RegisterResourceResponse, ResourceInputs, ResourceMonitor, RunSettings,
};
use serde_json::json;

/// Echoes inputs back as outputs of the same name and invents values for
/// the rest. Computed outputs are unknown during a preview.
#[derive(Default)]
struct FakeEngine {
    requests: Mutex<Vec<RegisterResourceRequest>>,
    reject_type: Option<String>,
}

impl FakeEngine {
    fn rejecting(type_token: &str) -> Self {
        Self {
            reject_type: Some(type_token.to_string()),
            ..Self::default()
        }
    }

    fn request(&self, name: &str) -> RegisterResourceRequest {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no request for {name}"))
    }
}

#[async_trait]
impl ResourceMonitor for FakeEngine {
    async fn register_resource(
        &self,
        request: RegisterResourceRequest,
    ) -> Result<RegisterResourceResponse, MonitorError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        if self.reject_type.as_deref() == Some(request.type_token.as_str()) {
            return Err(MonitorError::Rejected {
                resource: request.resource.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }

        let mut outputs = BTreeMap::new();
        for output in &request.declared_outputs {
            let payload = match request.inputs.get(output) {
                Some(value) if !request.unknown_inputs.contains(output) => OutputPayload {
                    value: Some(value.clone()),
                    known: true,
                    secret: request.secret_inputs.contains(output),
                },
                _ if request.dry_run => OutputPayload::unknown(),
                _ => OutputPayload::known(json!(format!("{}-{}", request.name, output))),
            };
            outputs.insert(output.clone(), payload);
        }
        Ok(RegisterResourceResponse {
            id: (!request.dry_run).then(|| format!("id-{}", request.name)),
            outputs,
        })
    }
}

fn settings() -> RunSettings {
    RunSettings::new("web", "dev")
        .with_config("web:siteName", "assets")
        .with_secret_config("web:dbPassword", "hunter2")
}

#[tokio::test]
async fn dependencies_follow_data_flow_between_resources() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine.clone());

    let summary = run
        .execute(|scope| async move {
            let site_name = scope.config().get_deferred("siteName").unwrap();
            let bucket = scope.register(
                "test:index:Bucket",
                "site-bucket",
                ResourceInputs::new().with("bucketName", &site_name),
                &["bucketName", "arn"],
            )?;
            let arn = bucket.output::<String>("arn")?;
            let website = scope.register(
                "test:index:Website",
                "site",
                ResourceInputs::new().with("bucketArn", &arn),
                &["endpoint"],
            )?;
            let endpoint = website.output::<String>("endpoint")?;
            let url = format_deferred!("https://%s/", endpoint);

            Ok(Exports::new()
                .export("url", &url)
                .export("bucketId", bucket.id()))
        })
        .await
        .unwrap();

    let bucket = engine.request("site-bucket");
    let website = engine.request("site");
    assert!(bucket.dependencies.is_empty());
    assert_eq!(website.dependencies, vec![bucket.resource.clone()]);
    assert_eq!(
        website.property_dependencies["bucketArn"],
        vec![bucket.resource.clone()]
    );
    assert_eq!(website.inputs["bucketArn"], json!("site-bucket-arn"));

    assert_eq!(
        summary.resources,
        vec![bucket.resource.clone(), website.resource.clone()]
    );
    assert_eq!(
        summary.outputs["url"].display_value(),
        "https://site-endpoint/"
    );
    assert_eq!(
        summary.outputs["url"].dependencies,
        vec![website.resource.to_string()]
    );
    assert_eq!(
        summary.outputs["bucketId"].value,
        Some(json!("id-site-bucket"))
    );
    assert!(!summary.dry_run);
}

#[tokio::test]
async fn preview_leaves_computed_outputs_unknown() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings().with_dry_run(true), engine.clone());

    let summary = run
        .execute(|scope| async move {
            let bucket = scope.register("test:index:Bucket", "b", ResourceInputs::new(), &["arn"])?;
            let arn = bucket.output::<String>("arn")?;
            let website = scope.register(
                "test:index:Website",
                "w",
                ResourceInputs::new().with("bucketArn", &arn),
                &["bucketArn"],
            )?;

            Ok(Exports::new()
                .export("arn", &arn)
                .export("id", bucket.id())
                .export("echo", &website.output::<String>("bucketArn")?))
        })
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert!(!summary.outputs["arn"].known);
    assert!(!summary.outputs["id"].known);
    assert!(!summary.outputs["echo"].known);
    assert!(engine.request("w").unknown_inputs.contains("bucketArn"));
    assert_eq!(
        engine.request("w").inputs["bucketArn"],
        serde_json::Value::Null
    );
}

#[tokio::test]
async fn secret_configuration_stays_secret_through_the_round_trip() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine.clone());

    let summary = run
        .execute(|scope| async move {
            let password = scope.config().get_deferred("dbPassword").unwrap();
            let db = scope.register(
                "test:index:Database",
                "db",
                ResourceInputs::new().with("password", &password),
                &["password"],
            )?;
            let conn = format_deferred!("postgres://admin:%s@db", db.output::<String>("password")?);
            Ok(Exports::new().export("connection", &conn))
        })
        .await
        .unwrap();

    assert!(engine.request("db").secret_inputs.contains("password"));
    let connection = &summary.outputs["connection"];
    assert!(connection.secret);
    assert_eq!(connection.display_value(), "[secret]");
    assert_eq!(connection.value, Some(json!("postgres://admin:hunter2@db")));
}

#[tokio::test]
async fn rejected_registration_fails_outputs_and_the_run() {
    let engine = Arc::new(FakeEngine::rejecting("test:index:Bucket"));
    let run = DeploymentRun::new(settings(), engine);

    let err = run
        .execute(|scope| async move {
            let bucket = scope.register("test:index:Bucket", "b", ResourceInputs::new(), &["arn"])?;
            Ok(Exports::new().export("arn", &bucket.output::<String>("arn")?))
        })
        .await
        .unwrap_err();

    match err {
        DeploymentError::Export { name, source } => {
            assert_eq!(name, "arn");
            assert_eq!(source.kind(), ErrorKind::ComputationFailure);
            assert!(source.to_string().contains("quota exceeded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_registration_is_reported_even_without_exports() {
    let engine = Arc::new(FakeEngine::rejecting("test:index:Bucket"));
    let run = DeploymentRun::new(settings(), engine);

    let err = run
        .execute(|scope| async move {
            scope.register("test:index:Bucket", "b", ResourceInputs::new(), &["arn"])?;
            Ok(Exports::new())
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeploymentError::Registration { ref resource, .. } if resource == "test:index:Bucket::b"
    ));
}

#[tokio::test]
async fn mismatched_output_shape_is_reported_on_await() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine);

    let err = run
        .execute(|scope| async move {
            let bucket = scope.register("test:index:Bucket", "b", ResourceInputs::new(), &["arn"])?;
            let port = bucket.output::<u16>("arn")?;
            Ok(Exports::new().export("port", &port))
        })
        .await
        .unwrap_err();

    match err {
        DeploymentError::Export { source, .. } => {
            assert_eq!(source.kind(), ErrorKind::ShapeMismatch)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn undeclared_outputs_are_rejected_up_front() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine);

    let err = run
        .execute(|scope| async move {
            let bucket = scope.register("test:index:Bucket", "b", ResourceInputs::new(), &["arn"])?;
            bucket.output::<String>("region")?;
            Ok(Exports::new())
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeploymentError::UndeclaredOutput { ref output, .. } if output == "region"
    ));
}

#[tokio::test]
async fn failed_input_fails_every_output_with_the_input_error_as_cause() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine.clone());

    let err = run
        .execute(|scope| async move {
            let port = DeferredValue::<i32>::failed(DeferredError::value_absent("port"));
            let inputs = ResourceInputs::new()
                .with_plain("image", json!("nginx"))
                .with("port", &port);
            assert_eq!(inputs.len(), 2);

            let server = scope.register("test:index:Server", "web", inputs, &["image"])?;
            Ok(Exports::new()
                .export("image", &server.output::<String>("image")?)
                .export("id", server.id()))
        })
        .await
        .unwrap_err();

    match err {
        DeploymentError::Export { name, source } => {
            assert_eq!(name, "image");
            assert_eq!(source.kind(), ErrorKind::ComputationFailure);
            assert!(source.to_string().contains("input 'port'"));
            let cause = std::error::Error::source(&source).unwrap();
            assert_eq!(cause.to_string(), "Value absent: port");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(engine.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn plain_inputs_reach_the_engine_and_declared_outputs_are_listed() {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine.clone());

    run.execute(|scope| async move {
        assert!(ResourceInputs::new().is_empty());
        let inputs = ResourceInputs::new().with_plain("size", json!(3));
        let pool = scope.register("test:index:Pool", "workers", inputs, &["size", "arn"])?;

        let names: Vec<&str> = pool.output_names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["arn", "size"]);
        Ok(Exports::new().export("size", &pool.output::<u32>("size")?))
    })
    .await
    .unwrap();

    let request = engine.request("workers");
    assert_eq!(request.inputs["size"], json!(3));
    assert!(request.unknown_inputs.is_empty());
}

#[tokio::test]
async fn continuations_after_the_run_are_stale() -> anyhow::Result<()> {
    let engine = Arc::new(FakeEngine::default());
    let run = DeploymentRun::new(settings(), engine);
    let scope = run.scope();
    let early = scope.values().of(41);
    let plain = DeferredValue::of(1);

    run.execute(|_| async { Ok(Exports::new()) }).await?;

    let late = early.map(|n| n + 1);
    assert_eq!(
        late.state().await.unwrap_err().kind(),
        ErrorKind::StaleContext
    );
    // Values created outside any run are not guarded.
    assert_eq!(plain.map(|n| n + 1).value().await?, Some(2));
    Ok(())
}
