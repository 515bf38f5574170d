//! eframe front-end: an egui texture presenter and the app that drives the
//! session from the UI thread.

use std::sync::Arc;
use std::time::Duration;

use egui::{Color32, ColorImage, TextureHandle, TextureOptions};
use parking_lot::Mutex;

use duet_core::{
    check_stopped, handle_event, Event, EventLoop, Key, MediaSession, PlaneView, PlaybackResult,
    Presenter, Rect, SessionEnd,
};

use crate::yuv::YuvConverter;

/// Repaint interval while no refresh is pending.
const IDLE_REPAINT: Duration = Duration::from_millis(10);

/// Final state of the GUI run, read back by `main` once the window closes.
pub type Outcome = Arc<Mutex<Option<Result<SessionEnd, String>>>>;

// ============================================================================
// Presenter
// ============================================================================

pub struct EguiPresenter {
    ctx: egui::Context,
    converter: YuvConverter,
    rgba: Vec<u8>,
    frame_size: [usize; 2],
    texture: Option<TextureHandle>,
    surface: (u32, u32),
    dest: Option<Rect>,
}

impl EguiPresenter {
    pub fn new(ctx: egui::Context) -> Self {
        Self {
            ctx,
            converter: YuvConverter::bt601(),
            rgba: Vec::new(),
            frame_size: [0, 0],
            texture: None,
            surface: (0, 0),
            dest: None,
        }
    }

    /// Track the drawable area (points) for the next blit.
    pub fn set_surface(&mut self, size: egui::Vec2) {
        self.surface = (size.x.max(0.0) as u32, size.y.max(0.0) as u32);
    }

    /// Draw the last presented frame into `area`.
    pub fn paint(&self, ui: &egui::Ui, area: egui::Rect) {
        let (Some(texture), Some(dest)) = (&self.texture, self.dest) else {
            return;
        };
        let min = area.min + egui::vec2(dest.x as f32, dest.y as f32);
        let rect = egui::Rect::from_min_size(min, egui::vec2(dest.w as f32, dest.h as f32));
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        ui.painter().image(texture.id(), rect, uv, Color32::WHITE);
    }
}

impl Presenter for EguiPresenter {
    fn ensure_surface(&mut self, width: u32, height: u32) -> PlaybackResult<()> {
        if self.surface == (0, 0) {
            self.surface = duet_core::presenter::initial_surface_size(width, height);
        }
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn blit(&mut self, picture: &PlaneView<'_>, dest: Rect) -> PlaybackResult<()> {
        self.converter.convert(picture, &mut self.rgba);
        self.frame_size = [picture.width as usize, picture.height as usize];
        self.dest = Some(dest);
        Ok(())
    }

    fn present(&mut self) -> PlaybackResult<()> {
        let image = ColorImage::from_rgba_unmultiplied(self.frame_size, &self.rgba);
        match &mut self.texture {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.texture = Some(self.ctx.load_texture("video_frame", image, TextureOptions::LINEAR))
            }
        }
        Ok(())
    }
}

// ============================================================================
// Application
// ============================================================================

pub struct DuetApp {
    session: MediaSession,
    presenter: EguiPresenter,
    events: EventLoop,
    outcome: Outcome,
    finished: bool,
}

impl DuetApp {
    pub fn new(cc: &eframe::CreationContext<'_>, session: MediaSession, outcome: Outcome) -> Self {
        let mut events = EventLoop::new();
        events.schedule_refresh(session.initial_refresh());
        Self {
            session,
            presenter: EguiPresenter::new(cc.egui_ctx.clone()),
            events,
            outcome,
            finished: false,
        }
    }

    fn finish(&mut self, ctx: &egui::Context, result: Result<SessionEnd, String>) {
        match &result {
            Ok(end) => tracing::info!("Session ended: {:?}", end),
            Err(e) => tracing::error!("Playback failed: {}", e),
        }
        *self.outcome.lock() = Some(result);
        self.finished = true;
        self.session.shutdown();
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }

    /// Forward window input into the event channel.
    fn collect_input(&self, ctx: &egui::Context) {
        let sender = self.events.sender();
        ctx.input(|i| {
            for event in &i.events {
                if let egui::Event::Key { key, pressed: true, .. } = event {
                    let key = if *key == egui::Key::Escape { Key::Escape } else { Key::Other };
                    let _ = sender.send(Event::Key(key));
                }
            }
            if i.viewport().close_requested() {
                let _ = sender.send(Event::Quit);
            }
        });
    }

    /// Dispatch every ready event. Returns the end state once reached.
    fn pump(&mut self) -> Option<Result<SessionEnd, String>> {
        while let Some(event) = self.events.poll_event() {
            match handle_event(&mut self.session, &mut self.presenter, &mut self.events, event) {
                Ok(Some(end)) => return Some(Ok(end)),
                Ok(None) => {}
                Err(e) => return Some(Err(e.to_string())),
            }
        }
        check_stopped(&self.session).map(Ok)
    }
}

impl eframe::App for DuetApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.finished {
            self.collect_input(ctx);
            if let Some(result) = self.pump() {
                self.finish(ctx, result);
            }
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(Color32::BLACK))
            .show(ctx, |ui| {
                let area = ui.max_rect();
                self.presenter.set_surface(area.size());
                self.presenter.paint(ui, area);
            });

        if !self.finished {
            let wait = self.events.time_until_refresh().unwrap_or(IDLE_REPAINT);
            ctx.request_repaint_after(wait);
        }
    }
}
