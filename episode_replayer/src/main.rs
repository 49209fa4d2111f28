// Replays a scripted episode through the event engine and prints every
// finished event as one JSON object per line on stdout.
//
// Usage: episode_replayer <script.json> [config.json]

use anyhow::{Context, anyhow};
use glam::DVec3;
use semlog_events::core_modules::config::SemLogConfig;
use semlog_events::parallel_pipeline::EpisodeRunner;
use semlog_events::pipeline::{EntityKey, Episode, EpisodeWriter, Pose, SemanticLogger, Signal};
use semlog_events::telemetry;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::{env, fs};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    episode_id: Option<String>,
    #[serde(default)]
    start_time: f64,
    end_time: f64,
    entities: Vec<ScriptEntity>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct ScriptEntity {
    id: String,
    class: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    location: DVec3,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Role {
    /// Grasp, reach and pick-and-place listeners.
    Manipulator,
    /// Contact and support monitor.
    Object,
    /// Registered only, e.g. a table other objects rest on.
    #[default]
    Surface,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Step {
    Pose {
        time: f64,
        entity: String,
        location: DVec3,
        #[serde(default)]
        velocity: DVec3,
    },
    OverlapBegin { time: f64, owner: String, other: String },
    OverlapEnd { time: f64, owner: String, other: String },
    ContactBegin { time: f64, owner: String, other: String },
    ContactEnd { time: f64, owner: String, other: String },
    GraspBegin {
        time: f64,
        owner: String,
        other: String,
        #[serde(default)]
        grasp_type: String,
    },
    GraspEnd { time: f64, owner: String, other: String },
    Tick { time: f64 },
    Destroy { time: f64, entity: String },
}

/// Writes each event of an episode as a JSON line.
struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> EpisodeWriter for JsonLinesWriter<W> {
    type Error = anyhow::Error;

    fn write(&mut self, episode: &Episode) -> Result<(), Self::Error> {
        for event in &episode.events {
            serde_json::to_writer(&mut self.out, event)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

fn lookup(keys: &HashMap<String, EntityKey>, id: &str) -> anyhow::Result<EntityKey> {
    keys.get(id)
        .copied()
        .ok_or_else(|| anyhow!("unknown entity '{id}' in script"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: episode_replayer <script.json> [config.json]");
        return Ok(());
    }
    telemetry::init_tracing()?;

    let raw = fs::read_to_string(&args[1]).with_context(|| format!("reading script {}", args[1]))?;
    let script: Script = serde_json::from_str(&raw).context("parsing script")?;
    let config = match args.get(2) {
        Some(path) => SemLogConfig::from_json_file(path).with_context(|| format!("loading config {path}"))?,
        None => SemLogConfig::default(),
    };

    // --- 2. Scene Setup ---
    let mut logger = match &script.episode_id {
        Some(id) => SemanticLogger::with_episode_id(config, id.clone())?,
        None => SemanticLogger::new(config)?,
    };
    let mut keys = HashMap::new();
    for entity in &script.entities {
        let pose = Pose {
            location: entity.location,
            linear_velocity: DVec3::ZERO,
        };
        let key = logger.register_entity(&entity.id, &entity.class, pose)?;
        match entity.role {
            Role::Manipulator => logger.add_manipulator(key),
            Role::Object => logger.add_contact_shape(key),
            Role::Surface => true,
        };
        keys.insert(entity.id.clone(), key);
    }

    // --- 3. Replay ---
    let (runner, mut events) = EpisodeRunner::spawn(logger);
    let listener = tokio::spawn(async move {
        let mut streamed = 0usize;
        while let Some(event) = events.recv().await {
            debug!(kind = ?event.kind, start = event.start, end = ?event.end(), "event");
            streamed += 1;
        }
        streamed
    });

    runner.start(script.start_time)?;
    for step in script.steps {
        match step {
            Step::Pose {
                entity,
                location,
                velocity,
                ..
            } => runner.set_pose(lookup(&keys, &entity)?, location, velocity)?,
            Step::OverlapBegin { time, owner, other } => runner.send_signal(Signal::ShapeOverlapBegin {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
            })?,
            Step::OverlapEnd { time, owner, other } => runner.send_signal(Signal::ShapeOverlapEnd {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
            })?,
            Step::ContactBegin { time, owner, other } => runner.send_signal(Signal::ManipulatorContactBegin {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
            })?,
            Step::ContactEnd { time, owner, other } => runner.send_signal(Signal::ManipulatorContactEnd {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
            })?,
            Step::GraspBegin {
                time,
                owner,
                other,
                grasp_type,
            } => runner.send_signal(Signal::ManipulatorGraspBegin {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
                grasp_type,
            })?,
            Step::GraspEnd { time, owner, other } => runner.send_signal(Signal::ManipulatorGraspEnd {
                owner: lookup(&keys, &owner)?,
                other: lookup(&keys, &other)?,
                time,
            })?,
            Step::Tick { time } => runner.advance(time)?,
            Step::Destroy { time, entity } => runner.destroy_entity(lookup(&keys, &entity)?, time)?,
        }
    }

    let episode = runner.finish(script.end_time).await?;
    let streamed = listener.await?;

    // --- 4. Output ---
    let mut writer = JsonLinesWriter {
        out: std::io::stdout().lock(),
    };
    writer.write(&episode)?;
    info!(
        episode = %episode.episode_id,
        streamed,
        total = episode.events.len(),
        "replay finished"
    );
    Ok(())
}
