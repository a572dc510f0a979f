use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde::Deserialize;
use tempfile::tempdir;

const PROJECT: &str = r##"{
    "palettes": [{"colors": ["#000000", "#ffffff", "#ff00ff"]}],
    "rooms": [
        {
            "id": 0,
            "palette": 0,
            "events": [
                {"id": 2, "position": [3, 2], "fields": [
                    {"key": "solid", "type": "tag", "data": true},
                    {"key": "say", "type": "dialogue", "data": "first"},
                    {"key": "say", "type": "dialogue", "data": "second"}
                ]},
                {"id": 3, "position": [2, 3], "fields": [
                    {"key": "touch", "type": "javascript", "data": "LOG('script', EVENT) SAY('from lua') DIALOGUE() MOVE(EVENT, {room = 1, position = {4, 4}})"}
                ]},
                {"id": 1, "position": [2, 2], "fields": [
                    {"key": "is-player", "type": "tag", "data": true}
                ]}
            ]
        },
        {"id": 1, "palette": 0, "events": []}
    ]
}"##;

#[derive(Debug, Deserialize)]
struct Location {
    room: usize,
    position: [i32; 2],
}

#[derive(Debug, Deserialize)]
struct Step {
    input: String,
    accepted: bool,
    dialogue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transcript {
    status: String,
    avatar: Option<u32>,
    avatar_location: Option<Location>,
    dialogue: Vec<String>,
    errors: Vec<String>,
    steps: Vec<Step>,
}

fn run(dir: &Path, project: &str, extra: &[&str]) -> Result<Output> {
    let project_path = dir.join("project.json");
    fs::write(&project_path, project).context("writing project fixture")?;
    let project_str = project_path
        .to_str()
        .context("project path is not valid UTF-8")?;

    Command::new(env!("CARGO_BIN_EXE_nook_engine"))
        .args(["--project", project_str])
        .args(extra)
        .output()
        .context("executing nook_engine")
}

#[test]
fn playthrough_writes_transcript_and_event_log() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory")?;
    let transcript_path = temp_dir.path().join("transcript.json");
    let events_path = temp_dir.path().join("events.json");
    let transcript_str = transcript_path.to_str().context("non UTF-8 path")?;
    let events_str = events_path.to_str().context("non UTF-8 path")?;

    let output = run(
        temp_dir.path(),
        PROJECT,
        &[
            "--inputs",
            "right,right,skip,right,skip,down,skip",
            "--seed",
            "4",
            "--transcript-json",
            transcript_str,
            "--event-log-json",
            events_str,
        ],
    )?;
    assert!(
        output.status.success(),
        "nook_engine exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Saved play transcript to"), "{stdout}");
    assert!(stdout.contains("Saved event log to"), "{stdout}");

    let transcript: Transcript = serde_json::from_str(
        &fs::read_to_string(&transcript_path).context("reading transcript")?,
    )
    .context("parsing transcript")?;
    assert_eq!(transcript.status, "ready");
    assert_eq!(transcript.avatar, Some(1));
    assert!(transcript.errors.is_empty());
    assert_eq!(transcript.dialogue, vec!["first", "second", "from lua"]);

    let inputs: Vec<_> = transcript.steps.iter().map(|step| step.input.as_str()).collect();
    assert_eq!(inputs, vec!["right", "right", "skip", "right", "skip", "down", "skip"]);
    // The second bump arrives while "first" is still open.
    assert!(transcript.steps[0].accepted);
    assert!(!transcript.steps[1].accepted);
    assert_eq!(transcript.steps[0].dialogue.as_deref(), Some("first"));
    assert_eq!(transcript.steps[3].dialogue.as_deref(), Some("second"));
    assert_eq!(transcript.steps[5].dialogue.as_deref(), Some("from lua"));

    let location = transcript.avatar_location.context("avatar location")?;
    assert_eq!(location.room, 0);
    assert_eq!(location.position, [2, 3]);

    let events: Vec<String> = serde_json::from_str(
        &fs::read_to_string(&events_path).context("reading event log")?,
    )
    .context("parsing event log")?;
    for expected in [
        "player.start",
        "player.ready 1",
        "move.blocked 3,2",
        "touch.standard 2",
        "touch.script 3",
        "script.log script event#3",
        "move.step 2,3",
    ] {
        assert!(
            events.iter().any(|line| line == expected),
            "missing {expected} in {events:?}"
        );
    }
    assert!(events.iter().any(|line| line.starts_with("event.relocate 3 -> room 1")));
    Ok(())
}

#[test]
fn missing_avatar_reports_error_state() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory")?;
    let transcript_path = temp_dir.path().join("transcript.json");
    let transcript_str = transcript_path.to_str().context("non UTF-8 path")?;

    let project = r#"{"palettes": [], "rooms": [{"id": 0, "palette": 0, "events": []}]}"#;
    let output = run(
        temp_dir.path(),
        project,
        &["--inputs", "up,left", "--transcript-json", transcript_str],
    )?;
    assert!(output.status.success());

    let transcript: Transcript = serde_json::from_str(&fs::read_to_string(&transcript_path)?)?;
    assert_eq!(transcript.status, "error");
    assert_eq!(transcript.avatar, None);
    assert_eq!(transcript.errors, vec!["NO EVENT WITH is-player TAG FOUND"]);
    assert!(transcript.steps.iter().all(|step| !step.accepted));
    Ok(())
}

#[test]
fn unreadable_project_fails_with_context() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory")?;
    let output = run(temp_dir.path(), "{ not json", &[])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loading project"), "{stderr}");
    Ok(())
}
