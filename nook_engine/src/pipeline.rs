//! Convention-driven touch behaviour for events without a `touch` script.
//!
//! Steps always run in the order below; each one is a no-op when its field
//! is missing. A step that puts text on screen parks the pipeline until the
//! dialogue box drains.

use nook_model::{first_field, is_tagged, Event, Field, FieldKind};

use crate::dialogue::DialogueOptions;
use crate::state::PlayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineStep {
    PageColor,
    Dialogue,
    Exit,
    Remove,
    Ending,
    Restart,
    SetAvatar,
    Done,
}

/// What the driver should do once a step has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Continue,
    AwaitDialogue,
    Finished,
}

#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    event: Event,
    step: PipelineStep,
}

impl Pipeline {
    pub(crate) fn new(event: Event) -> Self {
        Pipeline {
            event,
            step: PipelineStep::PageColor,
        }
    }

    pub(crate) fn event_id(&self) -> nook_model::EventId {
        self.event.id
    }

    #[cfg(test)]
    pub(crate) fn step(&self) -> PipelineStep {
        self.step
    }

    /// Runs the current step and moves the cursor past it.
    pub(crate) fn advance(&mut self, state: &mut PlayState) -> StepOutcome {
        // Later steps still see the event's fields after it has been removed.
        if let Some(live) = state.find_event(self.event.id) {
            self.event = live.clone();
        }
        let event = &self.event;

        match self.step {
            PipelineStep::PageColor => {
                self.step = PipelineStep::Dialogue;
                if let Some(color) = text_field(event, "page-color") {
                    state.set_page_color(&color);
                }
                StepOutcome::Continue
            }
            PipelineStep::Dialogue => {
                self.step = PipelineStep::Exit;
                match state.next_say_line(event) {
                    Some(line) => {
                        state.say(&line, DialogueOptions::default());
                        StepOutcome::AwaitDialogue
                    }
                    None => StepOutcome::Continue,
                }
            }
            PipelineStep::Exit => {
                self.step = PipelineStep::Remove;
                let exit = first_field(event, "exit", Some(FieldKind::Location))
                    .and_then(Field::as_location);
                if let (Some(location), Some(avatar)) = (exit, state.avatar) {
                    state.relocate(avatar, location);
                }
                StepOutcome::Continue
            }
            PipelineStep::Remove => {
                self.step = PipelineStep::Ending;
                if is_tagged(event, "one-time") {
                    state.discard(event.id);
                }
                StepOutcome::Continue
            }
            PipelineStep::Ending => {
                match first_field(event, "ending", Some(FieldKind::Dialogue)).and_then(Field::as_str) {
                    Some(text) => {
                        let text = text.to_string();
                        self.step = PipelineStep::Restart;
                        state.title(&text, DialogueOptions::default());
                        StepOutcome::AwaitDialogue
                    }
                    None => {
                        self.step = PipelineStep::SetAvatar;
                        StepOutcome::Continue
                    }
                }
            }
            PipelineStep::Restart => {
                self.step = PipelineStep::Done;
                state.restart_requested = true;
                StepOutcome::Finished
            }
            PipelineStep::SetAvatar => {
                self.step = PipelineStep::Done;
                let graphic = first_field(event, "set-avatar", Some(FieldKind::Tile))
                    .and_then(Field::as_tile);
                if let (Some(tile), Some(avatar)) = (graphic, state.avatar) {
                    state.replace_fields(
                        avatar,
                        "graphic",
                        Some(FieldKind::Tile),
                        vec![Field::tile("graphic", tile)],
                    );
                }
                StepOutcome::Finished
            }
            PipelineStep::Done => StepOutcome::Finished,
        }
    }
}

fn text_field(event: &Event, key: &str) -> Option<String> {
    first_field(event, key, Some(FieldKind::Text))
        .and_then(Field::as_str)
        .map(str::to_string)
}
