//! Reconcile loops against an in-memory cluster and a mocked OpenBao.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeKube;
use kube::runtime::controller::Action;
use kubebao::controller::{policy_sync, secret_sync, Context, FAILURE_REQUEUE, POLICY_REQUEUE};
use kubebao::crd::condition::find_condition;
use kubebao::crd::{BaoPolicy, BaoSecret, ConditionStatus, BAOPOLICY_FINALIZER, BAOSECRET_FINALIZER};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DELETING: &str = "  deletionTimestamp: \"2026-01-01T00:00:00Z\"\n";

fn bao_secret(spec: &str) -> BaoSecret {
    bao_secret_with_metadata("", spec)
}

fn bao_secret_with_metadata(extra_metadata: &str, spec: &str) -> BaoSecret {
    let yaml = format!(
        "apiVersion: kubebao.io/v1alpha1\nkind: BaoSecret\nmetadata:\n  name: db-creds\n  namespace: apps\n  uid: 0f9e-77aa\n  generation: 2\n{}spec:\n{}",
        extra_metadata, spec
    );
    serde_yaml::from_str(&yaml).unwrap()
}

fn bao_policy(extra_metadata: &str) -> BaoPolicy {
    let yaml = format!(
        concat!(
            "apiVersion: kubebao.io/v1alpha1\n",
            "kind: BaoPolicy\n",
            "metadata:\n  name: app-read\n  namespace: apps\n{}",
            "spec:\n",
            "  rules:\n",
            "    - path: secret/data/app/*\n",
            "      capabilities: [read, list]\n",
        ),
        extra_metadata
    );
    serde_yaml::from_str(&yaml).unwrap()
}

async fn mount_kv(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "data": {"username": "app", "password": "hunter2"},
                "metadata": {"version": 4}
            }
        })))
        .mount(server)
        .await;
}

async fn context(kube: Arc<FakeKube>, server: &MockServer) -> Arc<Context> {
    Arc::new(Context::new(kube, common::token_backend(server).await))
}

const BASIC_SPEC: &str = "  secretPath: app/db\n  refreshInterval: 10m\n  target:\n    name: db\n";

// ---------------------------------------------------------------
// BaoSecret
// ---------------------------------------------------------------

#[tokio::test]
async fn test_first_reconcile_adds_finalizer_and_creates_secret() {
    let server = MockServer::start().await;
    mount_kv(&server).await;

    let kube = FakeKube::with_bao_secret(bao_secret(BASIC_SPEC));
    let ctx = context(kube.clone(), &server).await;

    let action = secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(600)));

    let stored = kube.bao_secret("apps", "db-creds");
    assert_eq!(stored.metadata.finalizers, Some(vec![BAOSECRET_FINALIZER.to_string()]));

    let secret = kube.secret("apps", "db").expect("target secret created");
    let data = secret.data.unwrap();
    assert_eq!(data["username"].0, b"app");
    assert_eq!(data["password"].0, b"hunter2");
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    let labels = secret.metadata.labels.unwrap();
    assert_eq!(labels["kubebao.io/managed-by"], "kubebao-operator");
    assert_eq!(labels["kubebao.io/baosecret"], "db-creds");
    let owners = secret.metadata.owner_references.unwrap();
    assert_eq!(owners[0].uid, "0f9e-77aa");
    assert_eq!(owners[0].controller, Some(true));

    let status = stored.status.unwrap();
    assert_eq!(status.synced_secret_name.as_deref(), Some("db"));
    assert_eq!(status.synced_secret_namespace.as_deref(), Some("apps"));
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.secret_version.as_ref().map(String::len), Some(16));
    assert!(status.last_sync_time.is_some());
    for type_ in ["Ready", "Synced", "Authenticated"] {
        let condition = find_condition(&status.conditions, type_).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "Success");
    }
}

#[tokio::test]
async fn test_second_reconcile_replaces_existing_secret() {
    let server = MockServer::start().await;
    mount_kv(&server).await;

    let kube = FakeKube::with_bao_secret(bao_secret(BASIC_SPEC));
    let ctx = context(kube.clone(), &server).await;

    secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx.clone()).await.unwrap();
    let first_version = kube.bao_secret("apps", "db-creds").status.unwrap().secret_version;

    secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();
    let second_version = kube.bao_secret("apps", "db-creds").status.unwrap().secret_version;

    assert_eq!(*kube.secret_writes.lock().unwrap(), vec!["create apps/db", "replace apps/db"]);
    assert_eq!(first_version, second_version, "unchanged data keeps its version");
}

#[tokio::test]
async fn test_single_key_with_template() {
    let server = MockServer::start().await;
    mount_kv(&server).await;

    let spec = concat!(
        "  secretPath: app/db\n",
        "  secretKey: password\n",
        "  target:\n    name: db\n    namespace: shared\n    type: kubernetes.io/basic-auth\n",
        "  template:\n",
        "    stringData:\n",
        "      dsn: \"postgres://{{ .Data.username }}:{{ .Data.password }}@db:5432\"\n",
    );
    let kube = FakeKube::with_bao_secret(bao_secret(spec));
    let ctx = context(kube.clone(), &server).await;

    secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();

    let secret = kube.secret("shared", "db").expect("secret in target namespace");
    let data = secret.data.unwrap();
    assert_eq!(data.keys().collect::<Vec<_>>(), vec!["dsn", "password"]);
    assert_eq!(data["dsn"].0, b"postgres://app:hunter2@db:5432");
    assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/basic-auth"));
}

#[tokio::test]
async fn test_missing_source_marks_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/db"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    let kube = FakeKube::with_bao_secret(bao_secret(BASIC_SPEC));
    let ctx = context(kube.clone(), &server).await;

    let action = secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();
    assert_eq!(action, Action::requeue(FAILURE_REQUEUE));
    assert!(kube.secret("apps", "db").is_none());

    let status = kube.bao_secret("apps", "db-creds").status.unwrap();
    let ready = find_condition(&status.conditions, "Ready").unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "SecretNotFound");
    assert!(find_condition(&status.conditions, "Authenticated").is_none());
}

#[tokio::test]
async fn test_denied_read_marks_authentication_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/db"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})))
        .mount(&server)
        .await;

    let kube = FakeKube::with_bao_secret(bao_secret(BASIC_SPEC));
    let ctx = context(kube.clone(), &server).await;

    secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();

    let status = kube.bao_secret("apps", "db-creds").status.unwrap();
    let authenticated = find_condition(&status.conditions, "Authenticated").unwrap();
    assert_eq!(authenticated.status, ConditionStatus::False);
    assert_eq!(authenticated.reason, "AuthenticationFailed");
}

#[tokio::test]
async fn test_suspended_sync_skips_backend() {
    let server = MockServer::start().await;
    let kube = FakeKube::with_bao_secret(bao_secret(&format!("{}  suspendSync: true\n", BASIC_SPEC)));
    let ctx = context(kube.clone(), &server).await;

    let action = secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(server.received_requests().await.unwrap().is_empty());

    let status = kube.bao_secret("apps", "db-creds").status.unwrap();
    let ready = find_condition(&status.conditions, "Ready").unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "SyncSuspended");
}

#[tokio::test]
async fn test_deletion_removes_finalizer_only() {
    let server = MockServer::start().await;
    let metadata = format!("  finalizers: [\"other.io/keep\", \"{}\"]\n{}", BAOSECRET_FINALIZER, DELETING);
    let deleting = bao_secret_with_metadata(&metadata, BASIC_SPEC);

    let kube = FakeKube::with_bao_secret(deleting);
    let ctx = context(kube.clone(), &server).await;

    let action = secret_sync::reconcile(Arc::new(kube.bao_secret("apps", "db-creds")), ctx).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(kube.bao_secret("apps", "db-creds").metadata.finalizers, Some(vec!["other.io/keep".to_string()]));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(kube.secret_writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_vanished_object_is_ignored() {
    let server = MockServer::start().await;
    let kube = Arc::new(FakeKube::default());
    let ctx = context(kube.clone(), &server).await;

    let action = secret_sync::reconcile(Arc::new(bao_secret(BASIC_SPEC)), ctx).await.unwrap();
    assert_eq!(action, Action::await_change());
}

// ---------------------------------------------------------------
// BaoPolicy
// ---------------------------------------------------------------

#[tokio::test]
async fn test_policy_written_once_then_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/policies/acl/app-read"))
        .and(body_json(json!({
            "policy": "path \"secret/data/app/*\" {\n  capabilities = [\"read\", \"list\"]\n}\n\n"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let kube = FakeKube::with_bao_policy(bao_policy(""));
    let ctx = context(kube.clone(), &server).await;

    let action = policy_sync::reconcile(Arc::new(kube.bao_policy("apps", "app-read")), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::requeue(POLICY_REQUEUE));

    let stored = kube.bao_policy("apps", "app-read");
    assert_eq!(stored.metadata.finalizers, Some(vec![BAOPOLICY_FINALIZER.to_string()]));
    let status = stored.status.clone().unwrap();
    assert_eq!(status.applied_policy_name.as_deref(), Some("app-read"));
    let first_version = status.policy_version.clone().unwrap();
    assert_eq!(find_condition(&status.conditions, "Ready").unwrap().status, ConditionStatus::True);

    policy_sync::reconcile(Arc::new(stored), ctx).await.unwrap();
    let status = kube.bao_policy("apps", "app-read").status.unwrap();
    assert_eq!(status.policy_version, Some(first_version));
}

#[tokio::test]
async fn test_policy_write_failure_keeps_previous_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/policies/acl/app-read"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"errors": ["storage unavailable"]})))
        .mount(&server)
        .await;

    let kube = FakeKube::with_bao_policy(bao_policy(""));
    let ctx = context(kube.clone(), &server).await;

    let action = policy_sync::reconcile(Arc::new(kube.bao_policy("apps", "app-read")), ctx).await.unwrap();
    assert_eq!(action, Action::requeue(FAILURE_REQUEUE));

    let status = kube.bao_policy("apps", "app-read").status.unwrap();
    assert!(status.policy_version.is_none());
    let ready = find_condition(&status.conditions, "Ready").unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert!(ready.message.contains("storage unavailable"));
}

#[tokio::test]
async fn test_policy_deletion_removes_finalizer() {
    let server = MockServer::start().await;
    let deleting = bao_policy(&format!("  finalizers: [\"{}\"]\n{}", BAOPOLICY_FINALIZER, DELETING));

    let kube = FakeKube::with_bao_policy(deleting);
    let ctx = context(kube.clone(), &server).await;

    let action = policy_sync::reconcile(Arc::new(kube.bao_policy("apps", "app-read")), ctx).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(kube.bao_policy("apps", "app-read").metadata.finalizers, Some(vec![]));
    assert!(server.received_requests().await.unwrap().is_empty());
}
