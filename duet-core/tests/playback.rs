//! End-to-end headless playback over the built-in test pattern.

use std::time::{Duration, Instant};

use duet_core::audio_output::PacedAudioOutput;
use duet_core::{
    open_source, run_session, EventLoop, MediaSession, NullPresenter, SessionConfig, SessionEnd,
};

fn start(name: &str, config: SessionConfig) -> MediaSession {
    let source = open_source(name).expect("source");
    MediaSession::start(source, Box::new(PacedAudioOutput::new()), config).expect("session")
}

#[test]
fn plays_every_frame_then_ends() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut session = start("testsrc:30", SessionConfig::default());
    let mut presenter = NullPresenter::new();
    let mut events = EventLoop::new();

    let started = Instant::now();
    let end = run_session(&mut session, &mut presenter, &mut events).expect("run");
    let elapsed = started.elapsed();
    let stats = session.shutdown();
    let ring = session.pictures();

    assert_eq!(end, SessionEnd::EndOfStream);
    assert_eq!(stats.frames_decoded, 30);
    assert_eq!(stats.frames_presented, 30);
    assert_eq!(presenter.presents, 30);
    // Each of the four ring slots is allocated once for a fixed geometry.
    assert_eq!(stats.picture_reallocations, 4);
    // The read side wrapped around the ring once per presented frame.
    assert_eq!(ring.capacity(), 4);
    assert_eq!(ring.read_index(), 30 % 4);
    assert_eq!(ring.write_index(), ring.read_index());
    // 30 frames at 25 fps are paced, not dumped.
    assert!(elapsed >= Duration::from_millis(800), "finished in {:?}", elapsed);

    let dest = presenter.last_rect.expect("blitted");
    assert_eq!((dest.w, dest.h), (320, 240));
}

#[test]
fn single_slot_ring_plays_in_order() {
    let config = SessionConfig { picture_queue_capacity: 1, ..SessionConfig::default() };
    let mut session = start("testsrc:10", config);
    let mut presenter = NullPresenter::new();

    let end = run_session(&mut session, &mut presenter, &mut EventLoop::new()).expect("run");
    let stats = session.shutdown();

    assert_eq!(end, SessionEnd::EndOfStream);
    assert_eq!(stats.frames_presented, 10);
    assert_eq!(stats.picture_reallocations, 1);
    assert_eq!(session.pictures().read_index(), 0);
}

#[test]
fn quitting_mid_stream_shuts_down_cleanly() {
    let mut session = start("testsrc", SessionConfig::default());
    let mut events = EventLoop::new();
    let quit = events.sender();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let _ = quit.send(duet_core::Event::Key(duet_core::Key::Escape));
    });

    let end = run_session(&mut session, &mut NullPresenter::new(), &mut events).expect("run");
    let stats = session.shutdown();

    assert_eq!(end, SessionEnd::UserQuit);
    assert!(stats.frames_presented > 0);
    assert!(stats.frames_presented < duet_core::synthetic::DEFAULT_FRAMES as u64);
}
