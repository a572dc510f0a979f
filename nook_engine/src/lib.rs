//! Gameplay runtime for nook projects: avatar movement, touch dispatch, the
//! standard touch pipeline, say-list sequencing and sandboxed Lua touch
//! scripts, driven by a single-threaded [`Player`].

pub mod dialogue;
pub mod lua_host;
pub mod observer;
mod pipeline;
pub mod player;
pub mod sequencer;
mod state;
pub mod store;

pub use dialogue::{DialogueBox, DialogueOptions, DialogueRequest, HeadlessDialogue};
pub use lua_host::{describe_error, EventHandle, ScriptError, ScriptRequest, ScriptStep};
pub use observer::{FrameSignal, ObservedSignal, PlayerObserver, RecordingObserver, SubscriptionId};
pub use player::{
    Player, PlayerConfig, DEFAULT_FRAME_STEP, MAX_TOUCH_DEPTH, MISSING_AVATAR_MESSAGE,
};
pub use sequencer::{DialogueSequencer, SayMode};
pub use state::PlayerStatus;
pub use store::{ProjectStore, StoreError};
