//! Presentation surface abstraction.
//!
//! The core never touches a window system. It hands a planar YUV 4:2:0
//! picture and a destination rectangle to whatever implements [`Presenter`].

use crate::error::PlaybackResult;
use crate::packet::Rational;
use crate::picture_queue::DecodedPicture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Borrowed view of three YUV planes.
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub planes: [&'a [u8]; 3],
    pub strides: [usize; 3],
    pub width: u32,
    pub height: u32,
}

impl<'a> PlaneView<'a> {
    pub fn of(picture: &'a DecodedPicture) -> Self {
        Self {
            planes: picture.planes(),
            strides: picture.strides(),
            width: picture.width(),
            height: picture.height(),
        }
    }
}

pub trait Presenter {
    /// Create or resize the backing surface for `width`x`height` frames.
    fn ensure_surface(&mut self, width: u32, height: u32) -> PlaybackResult<()>;

    /// Current output size in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Upload a picture into `dest`.
    fn blit(&mut self, picture: &PlaneView<'_>, dest: Rect) -> PlaybackResult<()>;

    /// Make the last blit visible.
    fn present(&mut self) -> PlaybackResult<()>;
}

/// Largest rectangle with the frame's display aspect that fits the surface,
/// centred. Widths and heights are rounded down to a multiple of 4.
pub fn fit_rect(
    surface: (u32, u32),
    frame: (u32, u32),
    sample_aspect_ratio: Option<Rational>,
) -> Rect {
    let (surface_w, surface_h) = surface;
    let (frame_w, frame_h) = frame;
    if frame_w == 0 || frame_h == 0 || surface_w == 0 || surface_h == 0 {
        return Rect { x: 0, y: 0, w: surface_w, h: surface_h };
    }

    let mut aspect = match sample_aspect_ratio {
        Some(sar) if sar.num != 0 => sar.as_f64() * frame_w as f64 / frame_h as f64,
        _ => 0.0,
    };
    if aspect <= 0.0 {
        aspect = frame_w as f64 / frame_h as f64;
    }

    let mut h = surface_h;
    let mut w = ((h as f64 * aspect).round() as u32) & !3;
    if w > surface_w {
        w = surface_w;
        h = ((w as f64 / aspect).round() as u32) & !3;
    }

    Rect {
        x: (surface_w as i32 - w as i32) / 2,
        y: (surface_h as i32 - h as i32) / 2,
        w,
        h,
    }
}

/// Window size for a stream: native up to 1280x720, half size beyond.
pub fn initial_surface_size(width: u32, height: u32) -> (u32, u32) {
    if width <= 1280 && height <= 720 {
        (width, height)
    } else {
        (width / 2, height / 2)
    }
}

/// Headless presenter that only counts what it is given.
#[derive(Debug, Default)]
pub struct NullPresenter {
    surface: (u32, u32),
    pub blits: u64,
    pub presents: u64,
    pub last_rect: Option<Rect>,
}

impl NullPresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for NullPresenter {
    fn ensure_surface(&mut self, width: u32, height: u32) -> PlaybackResult<()> {
        if self.surface == (0, 0) {
            self.surface = initial_surface_size(width, height);
        }
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn blit(&mut self, _picture: &PlaneView<'_>, dest: Rect) -> PlaybackResult<()> {
        self.blits += 1;
        self.last_rect = Some(dest);
        Ok(())
    }

    fn present(&mut self) -> PlaybackResult<()> {
        self.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pillarboxes_narrow_content() {
        let rect = fit_rect((1280, 720), (640, 480), None);
        assert_eq!(rect, Rect { x: 160, y: 0, w: 960, h: 720 });
    }

    #[test]
    fn letterboxes_wide_content() {
        let rect = fit_rect((640, 480), (1920, 800), None);
        assert_eq!(rect.w, 640);
        assert_eq!(rect.h, 264);
        assert_eq!(rect.y, (480 - 264) / 2);
    }

    #[test]
    fn honours_sample_aspect_ratio() {
        // 720x576 anamorphic PAL at 16:11 displays roughly 16:9.
        let rect = fit_rect((1280, 576), (720, 576), Some(Rational::new(16, 11)));
        assert_eq!(rect.h, 576);
        assert_eq!(rect.w, 1044);
        let ignored = fit_rect((1280, 576), (720, 576), Some(Rational::new(0, 1)));
        assert_eq!(ignored.w, 720);
    }

    #[test]
    fn halves_large_sources() {
        assert_eq!(initial_surface_size(1280, 720), (1280, 720));
        assert_eq!(initial_surface_size(1920, 1080), (960, 540));
        assert_eq!(initial_surface_size(640, 1000), (320, 500));
    }
}
