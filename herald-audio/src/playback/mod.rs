//! Audio output and the ordered playback queue.

pub mod completion;
pub mod player;
pub mod queue;

pub use completion::CompletionRegistry;
pub use player::{AudioOutput, CommandOutput, PlaybackHandle};
pub use queue::{PlaybackItem, PlaybackThread};
