//! # Duet Core
//!
//! Audio-mastered A/V playback: bounded packet queues, a decoded picture
//! ring, clock tracking and the scheduler that keeps video on the audio
//! device's clock.

// ============================================================================
// Shared Types
// ============================================================================
pub mod config;
pub mod error;
pub mod packet;
pub mod shutdown;
pub mod stats;

// ============================================================================
// Queues & Clocks
// ============================================================================
pub mod clock;
pub mod packet_queue;
pub mod picture_queue;
pub mod pts;

// ============================================================================
// Collaborators
// ============================================================================
pub mod audio_output;
pub mod decoder;
pub mod presenter;
pub mod resample;
pub mod synthetic;

#[cfg(feature = "mkv")]
pub mod mkv;

// ============================================================================
// Pipeline Stages
// ============================================================================
pub mod audio_stage;
pub mod demux;
pub mod video_stage;

// ============================================================================
// Presentation & Session
// ============================================================================
pub mod event_loop;
pub mod scheduler;
pub mod session;

pub use config::SessionConfig;
pub use decoder::{open_source, MediaSource};
pub use error::{PlaybackError, PlaybackResult, QueueError};
pub use event_loop::{check_stopped, handle_event, run_session, Event, EventLoop, Key, SessionEnd};
pub use presenter::{NullPresenter, PlaneView, Presenter, Rect};
pub use session::MediaSession;
pub use stats::PlaybackStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
