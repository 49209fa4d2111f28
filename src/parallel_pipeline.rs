// THEORY:
// The `EpisodeRunner` moves a `SemanticLogger` onto its own tokio task so a
// simulation loop can fire signals without waiting for the event engine. The
// logger stays single-owner: only the task ever touches it, and everything
// else talks to it through channels.
//
// Key architectural principles:
// 1.  **Ordered Command Queue**: Signals, pose updates and time advances travel
//     on one unbounded mpsc channel, so the task sees them exactly in the order
//     they were sent.
// 2.  **Live Event Stream**: Every event that becomes final is forwarded on a
//     second channel as soon as the task publishes it.
// 3.  **Oneshot Close**: `finish` sends the end time with a oneshot reply slot and
//     awaits the frozen `Episode`, then joins the task.

use crate::core_modules::error::LogError;
use crate::pipeline::{EntityKey, Episode, EventInterval, Report, SemanticLogger, Signal};
use glam::DVec3;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub enum Command {
    Start(f64),
    Signal(Signal),
    SetPose {
        key: EntityKey,
        location: DVec3,
        linear_velocity: DVec3,
    },
    Advance(f64),
    DestroyEntity {
        key: EntityKey,
        time: f64,
    },
    Finish {
        time: f64,
        reply: oneshot::Sender<Result<Episode, LogError>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("the episode runner has stopped")]
    Stopped,
    #[error("the episode runner dropped the finish reply")]
    ReplyDropped,
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("the episode runner task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct EpisodeRunner {
    command_sender: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl EpisodeRunner {
    /// Spawns the logger task. Must be called inside a tokio runtime.
    /// The receiver yields every event as soon as it is published.
    pub fn spawn(logger: SemanticLogger) -> (Self, mpsc::UnboundedReceiver<EventInterval>) {
        let (command_sender, mut command_receiver) = mpsc::unbounded_channel::<Command>();
        let (event_sender, event_receiver) = mpsc::unbounded_channel::<EventInterval>();

        let worker = tokio::spawn(async move {
            let mut logger = logger;
            let forward = |report: Report| {
                for event in report.into_events() {
                    // The consumer may have stopped listening; the log keeps everything.
                    let _ = event_sender.send(event);
                }
            };

            while let Some(command) = command_receiver.recv().await {
                match command {
                    Command::Start(time) => logger.start(time),
                    Command::Signal(signal) => forward(logger.handle_signal(signal)),
                    Command::SetPose {
                        key,
                        location,
                        linear_velocity,
                    } => {
                        if !logger.set_pose(key, location, linear_velocity) {
                            trace!(?key, "pose update for an unknown entity");
                        }
                    }
                    Command::Advance(time) => forward(logger.advance(time)),
                    Command::DestroyEntity { key, time } => forward(logger.destroy_entity(key, time)),
                    Command::Finish { time, reply } => {
                        let before = logger.event_log().finished_events().len();
                        let result = logger.finish(time);
                        if let Ok(episode) = &result {
                            for event in episode.events.iter().skip(before) {
                                let _ = event_sender.send(event.clone());
                            }
                        }
                        let _ = reply.send(result);
                        break;
                    }
                }
            }
            debug!("episode runner stopped");
        });

        (
            Self {
                command_sender,
                worker,
            },
            event_receiver,
        )
    }

    fn send(&self, command: Command) -> Result<(), RunnerError> {
        self.command_sender
            .send(command)
            .map_err(|_| RunnerError::Stopped)
    }

    pub fn start(&self, time: f64) -> Result<(), RunnerError> {
        self.send(Command::Start(time))
    }

    pub fn send_signal(&self, signal: Signal) -> Result<(), RunnerError> {
        self.send(Command::Signal(signal))
    }

    pub fn set_pose(&self, key: EntityKey, location: DVec3, linear_velocity: DVec3) -> Result<(), RunnerError> {
        self.send(Command::SetPose {
            key,
            location,
            linear_velocity,
        })
    }

    pub fn advance(&self, time: f64) -> Result<(), RunnerError> {
        self.send(Command::Advance(time))
    }

    pub fn destroy_entity(&self, key: EntityKey, time: f64) -> Result<(), RunnerError> {
        self.send(Command::DestroyEntity { key, time })
    }

    /// Closes the episode at `time` and waits for the task to exit.
    pub async fn finish(self, time: f64) -> Result<Episode, RunnerError> {
        let (reply, result_receiver) = oneshot::channel();
        self.send(Command::Finish { time, reply })?;
        let result = result_receiver.await.map_err(|_| RunnerError::ReplyDropped)?;
        self.worker.await?;
        Ok(result?)
    }
}
