mod common;

use std::collections::HashMap;

use common::simulate;
use simflow::FlowError;
use simflow::dsl::builder::ModelBuilder;
use simflow::runtime::listener::FlowEvent;

fn single_resource(model: &str) -> ModelBuilder {
    ModelBuilder::new(model).resource_type("R").resource("r1", &["R"])
}

#[test]
fn test_second_token_acquires_on_release() {
    // Scenario C
    let run = simulate(
        single_resource("contention")
            .activity("use")
            .work_group(0, &[("R", 1)], "4")
            .build()
            .generator("use", 0, 2),
    );

    assert_eq!(run.starts("use"), vec![0, 4]);
    assert_eq!(run.log.count("queued"), 1);
    assert_eq!(run.log.count("resource_acquired"), 2);
    assert_eq!(run.report.entities_finished, 2);
    assert_eq!(run.report.waiting, 0);
}

#[test]
fn test_cancellation_delays_next_acquisition() {
    // Scenario D
    let run = simulate(
        single_resource("cancellation")
            .activity("use")
            .work_group(0, &[("R", 1)], "4")
            .cancellation("R", 2)
            .build()
            .generator("use", 0, 2),
    );

    assert_eq!(run.starts("use"), vec![0, 6]);

    let windows: Vec<(u64, u64)> = run
        .log
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            FlowEvent::CancelOn { until, .. } => Some((r.at, until)),
            _ => None,
        })
        .collect();
    assert_eq!(windows, vec![(4, 6), (10, 12)]);
    assert_eq!(run.log.count("cancel_off"), 2);
}

#[test]
fn test_resource_held_by_one_acquisition_at_a_time() {
    let run = simulate(
        ModelBuilder::new("exclusivity")
            .resource_type("R")
            .resource("r1", &["R"])
            .resource("r2", &["R"])
            .resource("r3", &["R"])
            .activity("use")
            .work_group(0, &[("R", 2)], "entity % 3 + 1")
            .build()
            .generator("use", 0, 10),
    );

    let mut holder = HashMap::new();
    for recorded in run.log.events() {
        match recorded.event {
            FlowEvent::ResourceAcquired { entity, resource, .. } => {
                assert!(
                    holder.insert(resource, entity).is_none(),
                    "{:?} acquired twice at {}",
                    resource,
                    recorded.at
                );
            }
            FlowEvent::ResourceReleased { entity, resource, .. } => {
                assert_eq!(holder.remove(&resource), Some(entity));
            }
            _ => {}
        }
    }
    assert!(holder.is_empty());
    assert_eq!(run.report.entities_finished, 10);
}

#[test]
fn test_release_serves_queue_by_priority_then_arrival() {
    let run = simulate(
        single_resource("priorities")
            .activity("hold")
            .work_group(0, &[("R", 1)], "5")
            .build()
            .activity("low")
            .priority(5)
            .work_group(0, &[("R", 1)], "5")
            .build()
            .activity("high")
            .priority(1)
            .work_group(0, &[("R", 1)], "5")
            .build()
            .generator("hold", 0, 1)
            .generator("low", 1, 1)
            .generator("high", 2, 1),
    );

    assert_eq!(run.starts("hold"), vec![0]);
    assert_eq!(run.starts("high"), vec![5]);
    assert_eq!(run.starts("low"), vec![10]);
}

#[test]
fn test_equal_priority_requests_are_fifo() {
    let run = simulate(
        single_resource("fifo")
            .activity("use")
            .work_group(0, &[("R", 1)], "3")
            .build()
            .generator("use", 0, 1)
            .generator("use", 1, 1)
            .generator("use", 2, 1),
    );

    let order: Vec<(u64, u64)> = run
        .log
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            FlowEvent::Start { entity, .. } => Some((r.at, entity.0)),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![(0, 1), (3, 2), (6, 3)]);
}

#[test]
fn test_work_group_eligibility_and_priority() {
    let run = simulate(
        ModelBuilder::new("groups")
            .resource_type("doctor")
            .resource_type("nurse")
            .resource("d1", &["doctor"])
            .resource("n1", &["nurse"])
            .activity("treat")
            .work_group(0, &[("doctor", 1)], "10")
            .when("urgent")
            .work_group(1, &[("nurse", 1)], "2")
            .build()
            .generator("treat", 0, 1)
            .var("urgent", false)
            .generator("treat", 0, 1)
            .var("urgent", true),
    );

    let groups: Vec<Option<usize>> = run
        .log
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            FlowEvent::Start { work_group, .. } => Some(work_group),
            _ => None,
        })
        .collect();
    assert_eq!(groups, vec![Some(1), Some(0)]);
    assert_eq!(run.finishes("treat"), vec![2, 10]);
}

#[test]
fn test_falls_back_to_lower_priority_group_when_busy() {
    let run = simulate(
        ModelBuilder::new("fallback")
            .resource_type("doctor")
            .resource_type("nurse")
            .resource("d1", &["doctor"])
            .resource("n1", &["nurse"])
            .activity("treat")
            .work_group(0, &[("doctor", 1)], "10")
            .work_group(1, &[("nurse", 1)], "4")
            .build()
            .generator("treat", 0, 3),
    );

    // doctor, then nurse, then whichever frees up first.
    assert_eq!(run.starts("treat"), vec![0, 0, 4]);
}

#[test]
fn test_tie_break_is_seed_deterministic() {
    let groups = |seed: u64| {
        let run = simulate(
            ModelBuilder::new("ties")
                .seeds(1, seed)
                .resource_type("a")
                .resource_type("b")
                .resource("ra", &["a"])
                .resource("rb", &["b"])
                .activity("use")
                .work_group(0, &[("a", 1)], "1")
                .work_group(0, &[("b", 1)], "1")
                .build()
                .generator_def(simflow::dsl::GeneratorDef {
                    flow: "use".to_string(),
                    at: 0,
                    count: 1,
                    every: 2,
                    repeat: 30,
                    vars: HashMap::new(),
                }),
        );
        run.log
            .events()
            .into_iter()
            .filter_map(|r| match r.event {
                FlowEvent::Start { work_group, .. } => work_group,
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    let first = groups(7);
    assert_eq!(first.len(), 30);
    assert_eq!(first, groups(7));
}

#[test]
fn test_zero_quantity_group_is_trivially_satisfied() {
    let run = simulate(
        ModelBuilder::new("zero")
            .resource_type("R")
            .activity("use")
            .work_group(0, &[("R", 0)], "3")
            .build()
            .generator("use", 0, 2),
    );

    assert_eq!(run.starts("use"), vec![0, 0]);
    assert!(run.log.errors().is_empty());
}

#[test]
fn test_node_without_work_groups_is_reported() {
    let run = simulate(
        ModelBuilder::new("no-groups")
            .activity("use")
            .build()
            .pass("done")
            .connect("use", "done")
            .generator("use", 0, 1),
    );

    let errors = run.log.errors();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| matches!(
        e,
        FlowError::Configuration { message, .. } if message == "no work groups defined"
    )));
    // The token carries on as a false token, so nothing downstream executes.
    assert_eq!(run.requests("done"), vec![(0, false)]);
    assert!(run.executable_at("done").is_empty());
    assert_eq!(run.report.waiting, 0);
}

#[test]
fn test_release_without_holding_is_an_invariant_error() {
    let run = simulate(
        ModelBuilder::new("empty-release")
            .release("drop", 1)
            .pass("done")
            .connect("drop", "done")
            .generator("drop", 0, 1),
    );

    assert!(matches!(
        run.log.errors().as_slice(),
        [FlowError::Invariant { .. }]
    ));
    assert_eq!(run.requests("done"), vec![(0, true)]);
}

#[test]
fn test_named_site_spans_request_and_release() {
    let run = simulate(
        single_resource("named-site")
            .request("grab", 1)
            .work_group(0, &[("R", 1)], "0")
            .build()
            .delay("work", "3")
            .release_with_cancellation("drop", 1, "R", 1)
            .connect("grab", "work")
            .connect("work", "drop")
            .generator("grab", 0, 2),
    );

    assert_eq!(run.starts("grab"), vec![0, 4]);
    assert_eq!(run.starts("work"), vec![0, 4]);
    let released_by = run.log.events().into_iter().find_map(|r| match r.event {
        FlowEvent::ResourceReleased { node, .. } => Some(node),
        _ => None,
    });
    assert_eq!(released_by, Some(run.node("drop")));
    assert!(run.log.errors().is_empty());
}

#[test]
fn test_flow_driven_activity_holds_resources_for_sub_flow() {
    let run = simulate(
        single_resource("flow-driven")
            .activity("treat")
            .flow_group(0, &[("R", 1)], "prepare")
            .build()
            .delay("prepare", "2")
            .delay("operate", "3")
            .pass("after")
            .connect("prepare", "operate")
            .connect("treat", "after")
            .generator("treat", 0, 2),
    );

    assert_eq!(run.starts("treat"), vec![0, 5]);
    assert_eq!(run.finishes("treat"), vec![5, 10]);
    assert_eq!(run.starts("operate"), vec![2, 7]);
    assert_eq!(run.executable_at("after"), vec![5, 10]);
    assert!(run.log.errors().is_empty());
}

#[test]
fn test_flow_driven_activity_cannot_be_interruptible() {
    let run = simulate(
        single_resource("flow-interruptible")
            .activity("treat")
            .interruptible()
            .flow_group(0, &[("R", 1)], "inner")
            .build()
            .delay("inner", "1")
            .generator("treat", 0, 1),
    );

    assert!(run.log.errors().iter().any(|e| matches!(
        e,
        FlowError::Configuration { message, .. } if message.contains("interruptible")
    )));
    assert_eq!(run.finishes("treat"), vec![1]);
}

fn shift(interruptible: bool, period: Option<u64>) -> common::Run {
    let activity = ModelBuilder::new("shift")
        .end_time(40)
        .resource_type("R")
        .resource("r1", &[])
        .timetable("r1", "R", 0, 5, period)
        .activity("long_job");
    let activity = if interruptible {
        activity.interruptible()
    } else {
        activity
    };
    simulate(
        activity
            .work_group(0, &[("R", 1)], "8")
            .build()
            .generator("long_job", 0, 1),
    )
}

#[test]
fn test_role_off_interrupts_interruptible_activity() {
    let run = shift(true, Some(10));

    let interrupts: Vec<(u64, u64)> = run
        .log
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            FlowEvent::Interrupt { remaining, .. } => Some((r.at, remaining)),
            _ => None,
        })
        .collect();
    assert_eq!(interrupts, vec![(5, 3)]);
    assert_eq!(run.starts("long_job"), vec![0, 10]);
    assert_eq!(run.finishes("long_job"), vec![13]);
}

#[test]
fn test_interrupted_activity_waits_without_next_window() {
    let run = shift(true, None);

    assert_eq!(run.log.count("interrupt"), 1);
    assert!(run.finishes("long_job").is_empty());
    assert_eq!(run.report.waiting, 1);
}

#[test]
fn test_role_off_leaves_plain_activity_running() {
    let run = shift(false, Some(10));

    assert_eq!(run.log.count("interrupt"), 0);
    assert_eq!(run.finishes("long_job"), vec![8]);
}
