use std::collections::HashMap;

use simflow::compiler::core::Compiler;
use simflow::dsl::builder::ModelBuilder;
use simflow::runtime::listener::{ChannelListener, FlowEvent, RecordingListener};
use simflow::runtime::simulation::Simulation;

fn clinic() -> Simulation {
    let blueprint = Compiler::new()
        .compile(
            ModelBuilder::new("listener")
                .resource_type("R")
                .resource("r1", &["R"])
                .activity("use")
                .work_group(0, &[("R", 1)], "2")
                .build()
                .generator("use", 0, 3)
                .build(),
        )
        .expect("Compilation failed");
    Simulation::from_blueprint(blueprint)
}

#[tokio::test]
async fn test_channel_listener_streams_every_event() {
    let mut sim = clinic();
    let recorder = RecordingListener::new();
    let log = recorder.log();
    let (listener, mut rx) = ChannelListener::new();
    sim.add_listener(Box::new(recorder));
    sim.add_listener(Box::new(listener));

    let drain = tokio::spawn(async move {
        let mut received = Vec::new();
        while let Some(recorded) = rx.recv().await {
            received.push(recorded);
        }
        received
    });

    let report = tokio::task::spawn_blocking(move || sim.run())
        .await
        .expect("Simulation panicked");
    let received = drain.await.expect("Drain task panicked");

    assert_eq!(received, log.events());
    assert_eq!(report.entities_finished, 3);
    assert_eq!(report.end_time, 6);
    assert!(matches!(
        received.first().map(|r| &r.event),
        Some(FlowEvent::EntityCreated { .. })
    ));
    assert!(matches!(
        received.last().map(|r| &r.event),
        Some(FlowEvent::EntityFinished { .. })
    ));
}

#[test]
fn test_events_serialize_with_kind_tag() {
    let mut sim = clinic();
    let recorder = RecordingListener::new();
    let log = recorder.log();
    sim.add_listener(Box::new(recorder));
    sim.run();

    for recorded in log.events() {
        let value = serde_json::to_value(&recorded).expect("Failed to serialize event");
        assert_eq!(value["event"]["event"], recorded.event.kind());
    }
}

#[test]
fn test_spawn_entity_injects_token_now() {
    let mut sim = clinic();
    let recorder = RecordingListener::new();
    let log = recorder.log();
    sim.add_listener(Box::new(recorder));

    let root = sim.engine().graph().find("use").expect("use exists");
    let entity = sim.spawn_entity(root, HashMap::new());
    assert!(sim.engine().entity(entity).is_some());
    sim.run();

    // Three generated arrivals plus the injected one.
    assert_eq!(log.count("entity_created"), 4);
    assert_eq!(log.count("entity_finished"), 4);
    assert_eq!(sim.report().end_time, 8);
    assert_eq!(sim.engine().live_entities(), 0);
}
