//! Presentation event loop.
//!
//! A single thread waits on one channel of events plus one re-armable
//! refresh deadline. Scheduling a refresh replaces any pending one.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::error::PlaybackResult;
use crate::presenter::Presenter;
use crate::scheduler::Refresh;
use crate::session::MediaSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The refresh timer fired
    Refresh,
    Key(Key),
    /// The window or process is going away
    Quit,
}

/// How a session run ended. Every variant maps to a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Escape or quit
    UserQuit,
    /// Every picture was presented
    EndOfStream,
    /// A stage stopped the session (failed to play)
    Stopped,
}

pub struct EventLoop {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    refresh_at: Option<Instant>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, refresh_at: None }
    }

    /// Handle for pushing events from other threads.
    pub fn sender(&self) -> Sender<Event> {
        self.tx.clone()
    }

    pub fn schedule_refresh(&mut self, after: Duration) {
        self.refresh_at = Some(Instant::now() + after);
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.refresh_at.is_some()
    }

    /// Time left before the pending refresh fires.
    pub fn time_until_refresh(&self) -> Option<Duration> {
        self.refresh_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Next event if one is ready now. Queued events win over an expired timer.
    pub fn poll_event(&mut self) -> Option<Event> {
        if let Ok(event) = self.rx.try_recv() {
            return Some(event);
        }
        match self.refresh_at {
            Some(at) if at <= Instant::now() => {
                self.refresh_at = None;
                Some(Event::Refresh)
            }
            _ => None,
        }
    }

    /// Block until the next event.
    pub fn next_event(&mut self) -> Event {
        if let Some(event) = self.poll_event() {
            return event;
        }
        let Some(wait) = self.time_until_refresh() else {
            return self.rx.recv().unwrap_or(Event::Quit);
        };

        match self.rx.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                self.refresh_at = None;
                Event::Refresh
            }
            Err(RecvTimeoutError::Disconnected) => Event::Quit,
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one event to the session. Returns how the session ended, if it did.
pub fn handle_event(
    session: &mut MediaSession,
    presenter: &mut dyn Presenter,
    events: &mut EventLoop,
    event: Event,
) -> PlaybackResult<Option<SessionEnd>> {
    match event {
        Event::Refresh => match session.refresh(presenter) {
            Ok(Refresh::Rearm(delay)) => {
                events.schedule_refresh(delay);
                Ok(None)
            }
            Ok(Refresh::EndOfStream) => {
                tracing::info!("{}: end of stream", session.source_name());
                session.request_shutdown();
                Ok(Some(SessionEnd::EndOfStream))
            }
            Err(e) => {
                session.request_shutdown();
                Err(e)
            }
        },
        Event::Key(Key::Escape) | Event::Quit => {
            tracing::info!("Quit requested");
            session.request_shutdown();
            Ok(Some(SessionEnd::UserQuit))
        }
        Event::Key(Key::Other) => Ok(None),
    }
}

/// Whether a stage has stopped the session on its own.
pub fn check_stopped(session: &MediaSession) -> Option<SessionEnd> {
    if session.is_shutdown_requested() {
        tracing::info!("{}: stream ended or failed to play", session.source_name());
        Some(SessionEnd::Stopped)
    } else {
        None
    }
}

/// Drive `session` until the user quits, the stream runs out or a stage
/// stops it. Presenter errors are returned.
pub fn run_session(
    session: &mut MediaSession,
    presenter: &mut dyn Presenter,
    events: &mut EventLoop,
) -> PlaybackResult<SessionEnd> {
    events.schedule_refresh(session.initial_refresh());
    loop {
        if let Some(end) = check_stopped(session) {
            return Ok(end);
        }
        let event = events.next_event();
        if let Some(end) = handle_event(session, presenter, events, event)? {
            return Ok(end);
        }
    }
}
