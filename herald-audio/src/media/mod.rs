//! Long-form media playback routed to interchangeable backends.

pub mod backend;
pub mod router;
pub mod simple;

pub use backend::{BackendContext, MediaBackend, MediaRegistry, Track, TrackEvent};
pub use router::MediaRouter;
pub use simple::SimpleBackend;
