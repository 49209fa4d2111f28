use glam::DVec3;
use semlog_events::core_modules::config::SemLogConfig;
use semlog_events::parallel_pipeline::{EpisodeRunner, RunnerError};
use semlog_events::pipeline::{EventKind, Pose, SemanticLogger, Signal};

fn logger() -> (SemanticLogger, semlog_events::pipeline::EntityKey, semlog_events::pipeline::EntityKey) {
    let mut logger = SemanticLogger::with_episode_id(SemLogConfig::default(), "async").unwrap();
    let hand = logger.register_entity("hand", "LeftHand", Pose::default()).unwrap();
    let cup = logger.register_entity("cup", "Cup", Pose::default()).unwrap();
    logger.add_manipulator(hand);
    (logger, hand, cup)
}

#[tokio::test]
async fn runner_streams_events_and_returns_the_episode() {
    let (logger, hand, cup) = logger();
    let (runner, mut events) = EpisodeRunner::spawn(logger);

    runner.start(0.0).unwrap();
    runner
        .send_signal(Signal::ManipulatorGraspBegin {
            owner: hand,
            other: cup,
            time: 1.0,
            grasp_type: "pinch".into(),
        })
        .unwrap();
    runner.set_pose(cup, DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO).unwrap();
    runner
        .send_signal(Signal::ManipulatorGraspEnd {
            owner: hand,
            other: cup,
            time: 2.0,
        })
        .unwrap();

    let streamed = events.recv().await.unwrap();
    assert_eq!(streamed.kind, EventKind::Grasp);
    assert_eq!(streamed.end(), Some(2.0));

    let episode = runner.finish(3.0).await.unwrap();
    assert_eq!(episode.episode_id, "async");
    assert_eq!(episode.events.len(), 1);
    assert_eq!(episode.events[0].id, streamed.id);
}

#[tokio::test]
async fn open_intervals_are_streamed_on_finish() {
    let (logger, hand, cup) = logger();
    let (runner, mut events) = EpisodeRunner::spawn(logger);
    runner.start(0.0).unwrap();
    runner
        .send_signal(Signal::ManipulatorGraspBegin {
            owner: hand,
            other: cup,
            time: 1.0,
            grasp_type: "power".into(),
        })
        .unwrap();
    runner.advance(2.0).unwrap();

    let episode = runner.finish(4.0).await.unwrap();
    assert_eq!(episode.events.len(), 1);
    let streamed = events.recv().await.unwrap();
    assert_eq!((streamed.start, streamed.end()), (1.0, Some(4.0)));
    // The task is gone, so the stream ends.
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn destroyed_entities_close_through_the_runner() {
    let (logger, hand, cup) = logger();
    let (runner, _events) = EpisodeRunner::spawn(logger);
    runner.start(0.0).unwrap();
    runner
        .send_signal(Signal::ManipulatorGraspBegin {
            owner: hand,
            other: cup,
            time: 0.5,
            grasp_type: "power".into(),
        })
        .unwrap();
    runner.destroy_entity(cup, 1.5).unwrap();
    let episode = runner.finish(2.0).await.unwrap();
    assert_eq!(episode.events.len(), 1);
    assert_eq!(episode.events[0].end(), Some(1.5));
}

#[test]
fn runner_errors_render() {
    assert_eq!(RunnerError::Stopped.to_string(), "the episode runner has stopped");
}
