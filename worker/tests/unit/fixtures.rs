//! Shared builders for the unit tests

use std::collections::BTreeMap;

use clouding_worker::deploy::events::ExecutorEvent;
use clouding_worker::models::blueprint::{
    Blueprint, BlueprintComponent, BlueprintParameter, ComponentParameter, ParameterRules,
    UiType, ValueType,
};
use clouding_worker::models::deployment::{DeploymentType, Job};
use clouding_worker::models::host::{Credential, CredentialSecret, Host};
use secrecy::SecretString;
use serde_json::{json, Value};

pub fn schema(id: &str, name: &str, value_type: ValueType) -> ComponentParameter {
    ComponentParameter {
        id: id.to_string(),
        name: name.to_string(),
        value_type,
        rules: ParameterRules::default(),
        ui_type: UiType::Text,
        options: Vec::new(),
        default: None,
        description: String::new(),
    }
}

pub fn required(mut param: ComponentParameter) -> ComponentParameter {
    param.rules.required = true;
    param
}

pub fn required_if(mut param: ComponentParameter, other: &str, expected: &str) -> ComponentParameter {
    param.rules.required_if = BTreeMap::from([(other.to_string(), expected.to_string())]);
    param
}

pub fn select(mut param: ComponentParameter, options: &[&str]) -> ComponentParameter {
    param.ui_type = UiType::Select;
    param.options = options.iter().map(|o| o.to_string()).collect();
    param
}

pub fn value(id: &str, name: &str, value: Value) -> BlueprintParameter {
    BlueprintParameter {
        id: id.to_string(),
        name: name.to_string(),
        value: serde_json::from_value(value).unwrap(),
    }
}

/// Component with one required string parameter
pub fn component(id: i64, position: i32, role: &str) -> BlueprintComponent {
    BlueprintComponent {
        id,
        component_id: id,
        position,
        ansible_role: role.to_string(),
        component_parameters: vec![required(schema("p1", "server_name", ValueType::String))],
        blueprint_parameters: vec![value("p1", "server_name", json!(format!("site-{}", id)))],
    }
}

pub fn blueprint(id: i64) -> Blueprint {
    Blueprint {
        id,
        name: "web".to_string(),
        status: "published".to_string(),
    }
}

pub fn job(job_id: &str, host_ids: &[i64], deployment_type: DeploymentType) -> Job {
    Job {
        job_id: job_id.to_string(),
        host_ids: host_ids.to_vec(),
        blueprint_id: 10,
        user_id: "u1".to_string(),
        deployment_type,
    }
}

pub fn job_message(job_id: &str, host_ids: &[i64], kind: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jobId": job_id,
        "hostIds": host_ids,
        "blueprintId": 10,
        "userId": "u1",
        "type": kind,
    }))
    .unwrap()
}

pub fn host(id: i64) -> Host {
    Host {
        id,
        user_id: "u1".to_string(),
        name: format!("web-{}", id),
        ip: format!("10.0.0.{}", id),
        os: Some("ubuntu".to_string()),
        credential_id: 100 + id,
        metadata: None,
    }
}

pub fn credential(id: i64, username: Option<&str>, ssh_key: Option<&str>, password: Option<&str>) -> Credential {
    Credential {
        id,
        name: format!("cred-{}", id),
        credential_type: "ssh".to_string(),
        user_id: "u1".to_string(),
        expires_at: None,
        value: Some(CredentialSecret {
            username: username.map(str::to_string),
            ssh_key: ssh_key.map(SecretString::from),
            password: password.map(SecretString::from),
        }),
    }
}

pub fn task_event(kind: &str, host_id: i64) -> ExecutorEvent {
    ExecutorEvent::new(
        kind,
        json!({
            "task": "Install packages",
            "host": format!("host{}", host_id),
            "role": "clouding.Nginx",
            "res": {"changed": true},
            "duration": 0.5,
        }),
    )
}

pub fn stats_event() -> ExecutorEvent {
    ExecutorEvent::new(
        "playbook_on_stats",
        json!({"ok": {"host1": 2}, "failures": {}, "changed": {}, "processed": {"host1": 1}}),
    )
}
