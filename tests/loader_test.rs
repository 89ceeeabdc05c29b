use simflow::compiler::loader;
use simflow::dsl::NodeType;
use simflow::dsl::builder::ModelBuilder;
use std::fs;

#[test]
fn test_load_simple_yaml_model() {
    let yaml_content = r#"
id: "triage"
name: "Triage desk"
simulation:
  choice_seed: 3
  end_time: 100
resource_types: [nurse]
resources:
  - id: "n1"
    types: [nurse]
nodes:
  - id: "check"
    type: "Activity"
    priority: 1
    work_groups:
      - resources: { nurse: 1 }
        duration: "5"
  - id: "route"
    type: "ExclusiveChoice"
  - id: "admit"
    type: "Pass"
  - id: "discharge"
    type: "Pass"
edges:
  - source: "check"
    target: "route"
  - source: "route"
    target: "admit"
    condition: "severity > 3"
  - source: "route"
    target: "discharge"
generators:
  - flow: "check"
    count: 2
    vars:
      severity: 4
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("triage.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let loaded_model = loader::load_model_from_yaml(&file_path).expect("Failed to load model from YAML");

    let expected_model = ModelBuilder::new("triage")
        .name("Triage desk")
        .seeds(3, 2)
        .end_time(100)
        .resource_type("nurse")
        .resource("n1", &["nurse"])
        .activity("check")
        .priority(1)
        .work_group(0, &[("nurse", 1)], "5")
        .build()
        .node("route", NodeType::ExclusiveChoice)
        .pass("admit")
        .pass("discharge")
        .connect("check", "route")
        .connect_if("route", "admit", "severity > 3")
        .connect("route", "discharge")
        .generator("check", 0, 2)
        .var("severity", 4)
        .build();

    assert_eq!(loaded_model, expected_model);
}

#[test]
fn test_load_blueprint_compiles_model() {
    let yaml_content = r#"
id: "shifts"
resource_types: [nurse]
resources:
  - id: "night"
    timetable:
      - type: nurse
        start: 20
        duration: 8
        period: 24
nodes:
  - id: "care"
    type: "Activity"
    interruptible: true
    work_groups:
      - resources: { nurse: 1 }
        duration: "3"
generators:
  - flow: "care"
    at: 0
    every: 12
    repeat: 3
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("shifts.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let blueprint = loader::load_blueprint(&file_path).expect("Failed to load blueprint");
    assert_eq!(blueprint.model.graph().len(), 1);
    let night = blueprint.model.catalog().resource_id("night").expect("night exists");
    let resource = blueprint.model.catalog().resource(night).unwrap();
    assert!(resource.roles.is_empty());
    assert_eq!(resource.timetable.len(), 1);
    assert_eq!(blueprint.arrivals[0].times().collect::<Vec<_>>(), vec![0, 12, 24]);
}

#[test]
fn test_missing_file_reports_path() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("missing.yaml");

    let err = loader::load_model_from_yaml(&file_path).expect_err("Loading should fail");
    assert!(err.to_string().starts_with("Failed to read YAML file from"));
}

#[test]
fn test_unknown_node_type_is_rejected() {
    let yaml_content = r#"
id: "broken"
nodes:
  - id: "x"
    type: "Teleport"
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("broken.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let err = loader::load_model_from_yaml(&file_path).expect_err("Loading should fail");
    assert!(err.to_string().starts_with("Failed to deserialize YAML content"));
}
