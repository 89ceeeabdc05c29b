use simflow::compiler::core::Compiler;
use simflow::dsl::NodeType;
use simflow::dsl::builder::ModelBuilder;
use simflow::nodes::{MergeKind, NodeKind, SplitKind};
use simflow::runtime::simulation::Simulation;

fn triage() -> ModelBuilder {
    ModelBuilder::new("triage")
        .seeds(3, 4)
        .resource_type("nurse")
        .resource("n1", &["nurse"])
        .activity("check")
        .priority(2)
        .work_group(0, &[("nurse", 1)], "5")
        .cancellation("nurse", 1)
        .build()
        .node("route", NodeType::ExclusiveChoice)
        .pass("admit")
        .pass("discharge")
        .node("join", NodeType::SimpleMerge)
        .connect("check", "route")
        .connect_if("route", "admit", "severity > 3")
        .connect("route", "discharge")
        .connect("admit", "join")
        .connect("discharge", "join")
        .generator("check", 10, 2)
        .var("severity", 4)
}

fn compile_error(builder: ModelBuilder) -> String {
    let err = Compiler::new()
        .compile(builder.build())
        .expect_err("Compilation should fail");
    format!("{:#}", err)
}

#[test]
fn test_compile_resolves_ids_to_indices() {
    // 1. Compile
    let mut compiler = Compiler::new();
    let blueprint = compiler.compile(triage().build()).expect("Compilation failed");

    // 2. Assert Blueprint Structure
    assert_eq!(blueprint.id, "triage");
    assert_eq!(blueprint.model.graph().len(), 5);
    assert_eq!(blueprint.config.choice_seed, 3);
    assert_eq!(blueprint.config.tie_break_seed, 4);

    let check = blueprint.node_index("check").expect("check exists");
    let route = blueprint.node_index("route").expect("route exists");
    let join = blueprint.node_index("join").expect("join exists");

    let check_node = blueprint.model.graph().node(check).unwrap();
    assert_eq!(check_node.next, Some(route));
    assert_eq!(check_node.priority, 2);
    match &check_node.kind {
        NodeKind::Activity(spec) => {
            assert_eq!(spec.work_groups.len(), 1);
            assert_eq!(spec.cancellations.len(), 1);
            assert!(!spec.interruptible);
        }
        other => panic!("unexpected kind {}", other.name()),
    }

    match &blueprint.model.graph().node(route).unwrap().kind {
        NodeKind::Split(spec) => {
            assert_eq!(spec.kind, SplitKind::ExclusiveChoice);
            let guards: Vec<&str> = spec.branches.iter().map(|b| b.guard.raw()).collect();
            assert_eq!(guards, vec!["severity > 3", "true"]);
        }
        other => panic!("unexpected kind {}", other.name()),
    }

    match &blueprint.model.graph().node(join).unwrap().kind {
        NodeKind::Merge(spec) => {
            assert_eq!(spec.kind, MergeKind::Simple);
            assert_eq!(spec.incoming, 2);
        }
        other => panic!("unexpected kind {}", other.name()),
    }

    // 3. Generators
    assert_eq!(blueprint.arrivals.len(), 1);
    let plan = &blueprint.arrivals[0];
    assert_eq!(plan.root, check);
    assert_eq!(plan.count, 2);
    assert_eq!(plan.times().collect::<Vec<_>>(), vec![10]);
}

#[test]
fn test_compiled_model_passes_validation() {
    let blueprint = Compiler::new()
        .compile(triage().build())
        .expect("Compilation failed");
    let sim = Simulation::from_blueprint(blueprint);
    assert!(sim.validation_errors().is_empty());
}

#[test]
fn test_duplicate_node_id_is_rejected() {
    let msg = compile_error(ModelBuilder::new("dup").pass("a").pass("a"));
    assert!(msg.contains("Duplicate node ID: a"), "{}", msg);
}

#[test]
fn test_unknown_edge_target_is_rejected() {
    let msg = compile_error(ModelBuilder::new("ghost").pass("a").connect("a", "ghost"));
    assert!(msg.contains("Target node not found: ghost"), "{}", msg);
}

#[test]
fn test_unknown_resource_type_is_rejected() {
    let msg = compile_error(
        ModelBuilder::new("types")
            .activity("use")
            .work_group(0, &[("surgeon", 1)], "1")
            .build(),
    );
    assert!(msg.contains("Failed to compile node 'use'"), "{}", msg);
    assert!(msg.contains("Unknown resource type: surgeon"), "{}", msg);
}

#[test]
fn test_guarded_edge_from_parallel_split_is_rejected() {
    let msg = compile_error(
        ModelBuilder::new("bad-guard")
            .node("split", NodeType::Parallel)
            .pass("a")
            .connect_if("split", "a", "x > 1"),
    );
    assert!(msg.contains("Invalid edge split -> a"), "{}", msg);
    assert!(msg.contains("exclusive or multi choice"), "{}", msg);
}

#[test]
fn test_weighted_edge_needs_probability_selection() {
    let msg = compile_error(
        ModelBuilder::new("bad-weight")
            .node("xor", NodeType::ExclusiveChoice)
            .pass("a")
            .connect_weighted("xor", "a", 0.5),
    );
    assert!(msg.contains("probability selection"), "{}", msg);

    let msg = compile_error(
        ModelBuilder::new("negative-weight")
            .node("pick", NodeType::ProbabilitySelection)
            .pass("a")
            .connect_weighted("pick", "a", -1.0),
    );
    assert!(msg.contains("non-negative"), "{}", msg);
}

#[test]
fn test_second_successor_is_rejected() {
    let msg = compile_error(
        ModelBuilder::new("fork")
            .pass("a")
            .pass("b")
            .pass("c")
            .connect("a", "b")
            .connect("a", "c"),
    );
    assert!(msg.contains("already has a successor"), "{}", msg);
}

#[test]
fn test_bad_expression_is_rejected() {
    let msg = compile_error(ModelBuilder::new("expr").assign("a", "no assignment here"));
    assert!(msg.contains("Failed to compile node 'a'"), "{}", msg);
}

#[test]
fn test_timetable_period_must_exceed_duration() {
    let msg = compile_error(
        ModelBuilder::new("shift")
            .resource_type("nurse")
            .resource("n1", &[])
            .timetable("n1", "nurse", 0, 8, Some(8)),
    );
    assert!(msg.contains("Timetable of resource 'n1'"), "{}", msg);
}

#[test]
fn test_shared_inner_node_is_reported_on_validation() {
    let blueprint = Compiler::new()
        .compile(
            ModelBuilder::new("shared")
                .node("first", NodeType::Structured { entry: "body".to_string() })
                .node("second", NodeType::Structured { entry: "body".to_string() })
                .pass("body")
                .connect("first", "second")
                .build(),
        )
        .expect("Compilation failed");

    let sim = Simulation::from_blueprint(blueprint);
    let messages: Vec<String> = sim.validation_errors().iter().map(|e| e.to_string()).collect();
    assert!(
        messages.iter().any(|m| m.contains("shared by the inner graphs")),
        "{:?}",
        messages
    );
}

#[test]
fn test_inner_graph_with_two_exits_is_reported() {
    let blueprint = Compiler::new()
        .compile(
            ModelBuilder::new("two-exits")
                .node("loop", NodeType::Structured { entry: "split".to_string() })
                .node("split", NodeType::Parallel)
                .pass("a")
                .pass("b")
                .connect("split", "a")
                .connect("split", "b")
                .build(),
        )
        .expect("Compilation failed");

    let sim = Simulation::from_blueprint(blueprint);
    let messages: Vec<String> = sim.validation_errors().iter().map(|e| e.to_string()).collect();
    assert!(messages.iter().any(|m| m.contains("has 2 exits")), "{:?}", messages);
}
