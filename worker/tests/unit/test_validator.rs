//! Parameter rule engine tests

use clouding_worker::models::blueprint::ValueType;
use clouding_worker::plan::validator::{validate, ParameterError};
use proptest::prelude::*;
use serde_json::json;

use crate::fixtures::{required, required_if, schema, select, value};

#[test]
fn test_required_if_fails_then_passes_with_value() {
    let components = vec![
        required_if(schema("a", "a", ValueType::String), "b", "x"),
        schema("b", "b", ValueType::String),
    ];

    let err = validate(&components, &[value("b", "b", json!("x"))]).unwrap_err();
    assert_eq!(
        err,
        ParameterError::RequiredBecause {
            name: "a".to_string(),
            other: "b".to_string(),
            expected: "x".to_string(),
        }
    );
    assert_eq!(err.to_string(), "parameter a is required because b is x");

    validate(
        &components,
        &[value("b", "b", json!("x")), value("a", "a", json!("anything"))],
    )
    .unwrap();
}

#[test]
fn test_required_if_not_triggered_by_other_value() {
    let components = vec![
        required_if(schema("a", "a", ValueType::String), "b", "x"),
        schema("b", "b", ValueType::String),
    ];
    validate(&components, &[value("b", "b", json!("y"))]).unwrap();
}

#[test]
fn test_select_enforcement() {
    let components = vec![select(schema("s", "size", ValueType::String), &["a", "b"])];

    for ok in ["a", "b"] {
        validate(&components, &[value("s", "size", json!(ok))]).unwrap();
    }
    assert_eq!(
        validate(&components, &[value("s", "size", json!("c"))]).unwrap_err(),
        ParameterError::InvalidOption {
            name: "size".to_string(),
            value: "c".to_string(),
        }
    );
}

#[test]
fn test_unknown_parameter_always_fails() {
    let components = vec![schema("s", "size", ValueType::String)];
    let err = validate(
        &components,
        &[value("s", "size", json!("ok")), value("zz", "ghost", json!("x"))],
    )
    .unwrap_err();

    assert_eq!(err.to_string(), "unknown parameter: ghost (id: zz)");
}

#[test]
fn test_missing_required_reported_first() {
    let components = vec![
        required(schema("r", "region", ValueType::String)),
        schema("s", "size", ValueType::String),
    ];
    let err = validate(&components, &[value("s", "size", json!(5))]).unwrap_err();

    assert_eq!(err.to_string(), "missing required parameter: region");
}

#[test]
fn test_file_list_shapes() {
    let components = vec![schema("f", "files", ValueType::FileList)];

    validate(
        &components,
        &[value("f", "files", json!([{"filename": "a.conf"}, {"url": "https://x/b"}]))],
    )
    .unwrap();

    assert!(matches!(
        validate(&components, &[value("f", "files", json!("a.conf"))]),
        Err(ParameterError::ExpectsFileList { .. })
    ));
    assert!(matches!(
        validate(&components, &[value("f", "files", json!([{"filename": ""}]))]),
        Err(ParameterError::InvalidFileEntry { .. })
    ));
}

fn arbitrary_values() -> impl Strategy<Value = Vec<(String, serde_json::Value)>> {
    let id = prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("c".to_string()),
        Just("ghost".to_string()),
    ];
    let val = prop_oneof![
        Just(json!("x")),
        Just(json!("y")),
        Just(json!(1)),
        Just(json!(null)),
    ];
    prop::collection::btree_map(id, val, 1..4)
        .prop_map(|map| map.into_iter().collect::<Vec<_>>())
}

proptest! {
    #[test]
    fn prop_verdict_is_order_independent(
        values in arbitrary_values(),
        seed in any::<u64>(),
    ) {
        let components = vec![
            required_if(schema("a", "a", ValueType::String), "b", "x"),
            select(schema("b", "b", ValueType::String), &["x", "y"]),
            required(schema("c", "c", ValueType::Other)),
        ];
        let params: Vec<_> = values
            .iter()
            .map(|(id, v)| value(id, id, v.clone()))
            .collect();

        let mut shuffled = params.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        if seed % 2 == 0 {
            shuffled.reverse();
        }

        prop_assert_eq!(
            validate(&components, &params),
            validate(&components, &shuffled)
        );
    }

    #[test]
    fn prop_unknown_id_never_passes(name in "[a-z]{1,8}") {
        let components = vec![schema("s", "size", ValueType::Other)];
        let params = vec![
            value("s", "size", json!("ok")),
            value(&format!("unknown-{}", name), &name, json!("v")),
        ];
        prop_assert!(validate(&components, &params).is_err());
    }
}
