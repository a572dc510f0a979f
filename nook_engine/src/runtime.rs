use std::{fs, path::Path, rc::Rc};

use anyhow::{Context, Result};
use log::info;
use nook_engine::{Player, PlayerConfig, PlayerStatus, ProjectStore, RecordingObserver};
use nook_model::{location_of_event, EventId, Location};
use serde::Serialize;

use crate::cli::{Input, PlayArgs};

#[derive(Debug, Serialize)]
struct StepRecord {
    input: String,
    accepted: bool,
    status: PlayerStatus,
    avatar_location: Option<Location>,
    dialogue: Option<String>,
}

#[derive(Debug, Serialize)]
struct Transcript {
    status: PlayerStatus,
    avatar: Option<EventId>,
    avatar_location: Option<Location>,
    frame: u64,
    elapsed: f64,
    page_color: Option<String>,
    dialogue: Vec<String>,
    errors: Vec<String>,
    steps: Vec<StepRecord>,
}

pub fn execute(args: PlayArgs) -> Result<()> {
    let PlayArgs {
        project,
        inputs,
        seed,
        frame_dt,
        transcript_json,
        event_log_json,
        verbose: _,
    } = args;

    let store = ProjectStore::from_json_file(&project)
        .with_context(|| format!("loading project {}", project.display()))?;
    let config = PlayerConfig {
        rng_seed: seed,
        ..PlayerConfig::default()
    };
    let mut player = Player::headless(store, config)?;
    let recorder = RecordingObserver::new();
    player.subscribe(Rc::new(recorder.clone()));

    player.start();
    player.update(frame_dt);
    info!(target: "nook_engine", "started {} with {} inputs", project.display(), inputs.len());

    let mut steps = Vec::with_capacity(inputs.len());
    for input in inputs {
        let accepted = apply_input(&mut player, input);
        player.update(frame_dt);
        steps.push(StepRecord {
            input: input.to_string(),
            accepted,
            status: player.status(),
            avatar_location: avatar_location(&player),
            dialogue: player.current_dialogue().map(|request| request.text),
        });
    }

    let transcript = Transcript {
        status: player.status(),
        avatar: player.avatar(),
        avatar_location: avatar_location(&player),
        frame: player.frame_count(),
        elapsed: player.elapsed(),
        page_color: player.page_color(),
        dialogue: recorder.dialogue_lines(),
        errors: recorder.errors(),
        steps,
    };

    println!(
        "status={:?} frame={} dialogue_lines={} errors={}",
        transcript.status,
        transcript.frame,
        transcript.dialogue.len(),
        transcript.errors.len()
    );
    if let Some(location) = transcript.avatar_location {
        println!(
            "avatar in room {} at {},{}",
            location.room, location.position[0], location.position[1]
        );
    }

    if let Some(path) = transcript_json.as_ref() {
        write_json(path, &transcript, "play transcript")?;
    }
    if let Some(path) = event_log_json.as_ref() {
        let events = player.events().to_vec();
        write_json(path, &events, "event log")?;
    }

    Ok(())
}

fn apply_input(player: &mut Player, input: Input) -> bool {
    if let Some((dx, dy)) = input.step() {
        return player.move_avatar(dx, dy).is_some();
    }
    match input {
        Input::Skip => {
            player.skip();
            true
        }
        Input::Wait(seconds) => {
            player.update(seconds);
            true
        }
        Input::Touch(id) => player.touch_external(id),
        Input::Restart => {
            player.restart();
            true
        }
        Input::Up | Input::Down | Input::Left | Input::Right => false,
    }
}

fn avatar_location(player: &Player) -> Option<Location> {
    let avatar = player.avatar()?;
    location_of_event(&player.project(), avatar)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    let json =
        serde_json::to_string_pretty(value).with_context(|| format!("serializing {what} to JSON"))?;
    fs::write(path, &json).with_context(|| format!("writing {what} to {}", path.display()))?;
    println!("Saved {what} to {}", path.display());
    Ok(())
}
