use std::time::Duration;

use tracing::debug;

use crate::{
    backend::traits::Backend,
    error::UiMapError,
    isolation::deadline::Deadline,
    model::{
        geometry::{WindowHandle, WindowMeta},
        signals::{Capture, Frame},
    },
};

/// Screen image and structural tree of one window, taken together.
///
/// The window rect is read before and after; if the window moved or resized
/// in between, or the image does not match its size, the whole capture is
/// rejected rather than returning pixels and a tree from different instants.
pub fn capture(
    backend: &dyn Backend,
    window: &WindowHandle,
    timeout: Duration,
) -> Result<Capture, UiMapError> {
    let budget = Deadline::after(timeout);

    let meta = backend.window_meta(window, budget.stage_slice(timeout, "window_meta")?)?;
    let elements = backend.enumerate_elements(window, budget.stage_slice(timeout, "enumerate")?)?;
    let frame = grab_frame(backend, window, &meta, &budget, timeout)?;

    debug!(
        window = %window,
        title = %meta.title,
        structural = elements.len(),
        "captured window"
    );

    Ok(Capture {
        meta,
        frame,
        elements,
    })
}

/// Fresh pixels only, for pre-action verification. Same consistency checks
/// as `capture`, no tree enumeration.
pub fn capture_frame(
    backend: &dyn Backend,
    window: &WindowHandle,
    timeout: Duration,
) -> Result<(WindowMeta, Frame), UiMapError> {
    let budget = Deadline::after(timeout);
    let meta = backend.window_meta(window, budget.stage_slice(timeout, "window_meta")?)?;
    let frame = grab_frame(backend, window, &meta, &budget, timeout)?;
    Ok((meta, frame))
}

fn grab_frame(
    backend: &dyn Backend,
    window: &WindowHandle,
    meta: &WindowMeta,
    budget: &Deadline,
    timeout: Duration,
) -> Result<Frame, UiMapError> {
    let image = backend.capture_image(window, budget.stage_slice(timeout, "capture")?)?;
    let after = backend.get_window_rect(window, budget.stage_slice(timeout, "window_rect")?)?;

    if after != meta.rect {
        return Err(UiMapError::CaptureMismatch(format!(
            "window moved from {:?} to {:?}",
            meta.rect, after
        )));
    }

    if image.width() as i32 != meta.rect.w || image.height() as i32 != meta.rect.h {
        return Err(UiMapError::CaptureMismatch(format!(
            "image is {}x{} but window is {}x{}",
            image.width(),
            image.height(),
            meta.rect.w,
            meta.rect.h
        )));
    }

    Ok(Frame::new(meta.rect.origin(), image))
}
