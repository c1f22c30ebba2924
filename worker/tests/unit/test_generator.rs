//! Plan and inventory generation tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clouding_worker::errors::WorkerError;
use clouding_worker::http::client::HttpClient;
use clouding_worker::models::blueprint::ValueType;
use clouding_worker::models::deployment::DeploymentType;
use clouding_worker::plan::generator::PlanGenerator;
use clouding_worker::plan::roles::RoleRegistry;
use clouding_worker::storage::layout::{RunsLayout, PLAYBOOK_NAME};
use serde_json::json;
use serde_yaml::Value as Yaml;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{blueprint, component, credential, host, job, schema, value};

fn generator(base: &Path) -> PlanGenerator {
    let http = Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap());
    PlanGenerator::new(
        Arc::new(RoleRegistry::with_builtin_roles(http)),
        RunsLayout::new(base),
    )
}

fn read_plan(run_dir: &Path) -> Yaml {
    let text = std::fs::read_to_string(run_dir.join(PLAYBOOK_NAME)).unwrap();
    serde_yaml::from_str(&text).unwrap()
}

fn roles_of(plan: &Yaml) -> Vec<String> {
    plan[0]["roles"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|step| step["role"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_plan_follows_position_order() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);

    let components = vec![
        component(1, 3, "clouding.Docker"),
        component(2, 1, "clouding.Java"),
        component(3, 2, "clouding.Nginx"),
    ];
    let info = generator
        .generate(&job, &blueprint(10), &components)
        .await
        .unwrap();

    assert_eq!(info.playbook_name, "main.yaml");
    assert_eq!(info.playbook_dir, dir.path().join("u1").join("j1"));

    let plan = read_plan(&info.playbook_dir);
    assert_eq!(
        roles_of(&plan),
        vec!["clouding.Java", "clouding.Nginx", "clouding.Docker"]
    );
    assert_eq!(plan[0]["name"].as_str(), Some("web - j1"));
    assert_eq!(plan[0]["hosts"].as_str(), Some("group"));
    assert_eq!(plan[0]["become"].as_bool(), Some(true));
    assert_eq!(plan[0]["roles"][0]["vars"]["server_name"].as_str(), Some("site-2"));
}

#[tokio::test]
async fn test_equal_positions_keep_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);

    let components = vec![
        component(1, 2, "clouding.OpenPort"),
        component(2, 1, "clouding.Docker"),
        component(3, 2, "clouding.AddNginxSite"),
    ];
    let info = generator
        .generate(&job, &blueprint(10), &components)
        .await
        .unwrap();

    assert_eq!(
        roles_of(&read_plan(&info.playbook_dir)),
        vec!["clouding.Docker", "clouding.OpenPort", "clouding.AddNginxSite"]
    );
}

#[tokio::test]
async fn test_unsupported_role_writes_no_plan() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);

    let components = vec![
        component(1, 1, "clouding.Nginx"),
        component(2, 2, "acme.Unknown"),
    ];
    let err = generator
        .generate(&job, &blueprint(10), &components)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::UnsupportedRole(ref key) if key == "acme.Unknown"));
    assert!(!dir.path().join("u1/j1").join(PLAYBOOK_NAME).exists());
}

#[tokio::test]
async fn test_blueprint_level_checks() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);

    let err = generator
        .generate(&job, &blueprint(10), &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Validation error: no blueprint components found");

    let mut unnamed = blueprint(10);
    unnamed.name = String::new();
    let err = generator
        .generate(&job, &unnamed, &[component(1, 1, "clouding.Nginx")])
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let mut invalid = component(1, 1, "clouding.Nginx");
    invalid.blueprint_parameters.clear();
    let err = generator
        .generate(&job, &blueprint(10), &[invalid])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::InvalidParameter(_)));
    assert!(!dir.path().join("u1/j1").join(PLAYBOOK_NAME).exists());
}

fn override_component(url: &str) -> clouding_worker::models::blueprint::BlueprintComponent {
    let mut nginx = component(1, 1, "nginxinc.nginx");
    nginx
        .component_parameters
        .push(schema("p2", "nginx_service_custom", ValueType::Other));
    nginx.blueprint_parameters.push(value(
        "p2",
        "nginx_service_custom",
        json!({"filepath": "nginx.service", "url": url}),
    ));
    nginx
}

#[tokio::test]
async fn test_override_file_is_fetched_into_run_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/nginx.service"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[Service]\nRestart=always\n"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);
    let url = format!("{}/files/nginx.service", server.uri());

    let info = generator
        .generate(&job, &blueprint(10), &[override_component(&url)])
        .await
        .unwrap();

    let written = info
        .playbook_dir
        .join("overrides")
        .join("nginxinc.nginx")
        .join("nginx.service");
    assert_eq!(
        std::fs::read_to_string(&written).unwrap(),
        "[Service]\nRestart=always\n"
    );

    let plan = read_plan(&info.playbook_dir);
    let vars = &plan[0]["roles"][0]["vars"];
    assert_eq!(vars["nginx_service_custom"].as_bool(), Some(true));
    let emitted = Path::new(vars["nginx_service_custom_file"].as_str().unwrap());
    assert!(emitted.is_absolute());
    assert_eq!(emitted, std::path::absolute(&written).unwrap());
}

#[tokio::test]
async fn test_override_path_is_absolute_for_relative_layout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unit"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir_in(".").unwrap();
    assert!(dir.path().is_relative());
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);
    let url = format!("{}/files/nginx.service", server.uri());

    let info = generator
        .generate(&job, &blueprint(10), &[override_component(&url)])
        .await
        .unwrap();

    let plan = read_plan(&info.playbook_dir);
    let emitted = Path::new(plan[0]["roles"][0]["vars"]["nginx_service_custom_file"].as_str().unwrap());
    assert!(emitted.is_absolute());
    assert!(emitted.exists());
}

#[tokio::test]
async fn test_unsupported_role_skips_override_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unit"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);
    let url = format!("{}/files/nginx.service", server.uri());

    let err = generator
        .generate(
            &job,
            &blueprint(10),
            &[override_component(&url), component(2, 2, "acme.Unknown")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::UnsupportedRole(ref key) if key == "acme.Unknown"));
    assert!(!dir.path().join("u1/j1/overrides").exists());
}

#[tokio::test]
async fn test_override_fetch_failure_aborts_generation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);
    let url = format!("{}/files/missing", server.uri());

    let err = generator
        .generate(&job, &blueprint(10), &[override_component(&url)])
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::FetchError(_)));
    assert!(err.is_transient());
    assert!(!dir.path().join("u1/j1").join(PLAYBOOK_NAME).exists());
}

#[tokio::test]
async fn test_inventory_lines() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1, 2], DeploymentType::Deploy);

    let hosts = vec![
        (host(1), credential(101, Some("root"), Some("-----KEY-----"), None)),
        (host(2), credential(102, Some("admin"), None, Some("s3cret"))),
    ];
    let inventory = generator.generate_inventory(&job, &hosts).await.unwrap();
    let text = std::fs::read_to_string(&inventory).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    let key_file = std::path::absolute(dir.path().join("u1/j1/ssh_key_1_101")).unwrap();
    assert_eq!(lines[0], "[group]");
    assert_eq!(
        lines[1],
        format!(
            "host1 ansible_host=10.0.0.1 ansible_user=root ansible_ssh_private_key_file={} ansible_connection=ssh",
            key_file.display()
        )
    );
    assert_eq!(
        lines[2],
        "host2 ansible_host=10.0.0.2 ansible_user=admin ansible_password=s3cret ansible_ssh_common_args='-o StrictHostKeyChecking=no' ansible_connection=ssh"
    );
    assert_eq!(std::fs::read_to_string(&key_file).unwrap(), "-----KEY-----\n");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&key_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_inventory_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1, 2], DeploymentType::Deploy);

    let hosts = vec![
        (host(1), credential(101, Some("root"), Some("KEY"), None)),
        (host(2), credential(102, None, Some("KEY"), None)),
    ];
    let err = generator.generate_inventory(&job, &hosts).await.unwrap_err();

    assert!(matches!(err, WorkerError::InventoryError(_)));
    assert!(err.to_string().contains("username is missing"));
    assert!(!dir.path().join("u1/j1/inventory/hosts").exists());
    assert!(!dir.path().join("u1/j1/ssh_key_1_101").exists());
}

#[tokio::test]
async fn test_inventory_requires_key_or_password() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());
    let job = job("j1", &[1], DeploymentType::Deploy);

    let hosts = vec![(host(1), credential(101, Some("root"), None, None))];
    let err = generator.generate_inventory(&job, &hosts).await.unwrap_err();
    assert!(err.to_string().contains("neither SSH key nor password"));

    let mut missing = credential(101, Some("root"), Some("KEY"), None);
    missing.value = None;
    let err = generator
        .generate_inventory(&job, &[(host(1), missing)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("credential value is missing"));
}
