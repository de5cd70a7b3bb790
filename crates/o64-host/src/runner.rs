//! The frame loop
//!
//! Entered by the dispatcher's Execute command on the caller's thread and
//! held until a stop is requested or the execution module fails. Pacing,
//! pause polling and capture consumption live here; session transitions
//! stay with the state record.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use o64_core::{Capability, HostError, ModulePhase, Result, SessionHandle};
use o64_plugin::{FrameBuffer, PluginRegistry};

use crate::command::FrameCallback;
use crate::media::MediaStore;

/// Native NTSC frame cadence
pub const BASE_FRAME_PERIOD: Duration = Duration::from_micros(16_667);

/// How often a paused loop rechecks its signals
const PAUSE_POLL: Duration = Duration::from_millis(2);

/// Drive frames until the stop signal lands or the execution module fails.
/// `begin_run` has already committed; every exit path restores the session
/// to its media-open shape and walks the started modules' media close.
pub fn run_loop(
    registry: &mut PluginRegistry,
    session: &SessionHandle,
    media: &mut MediaStore,
    callback: &mut Option<FrameCallback>,
) -> Result<()> {
    session.signals().clear();

    if let Err(err) = registry.media_open_all() {
        session.state_mut().end_run();
        return Err(err);
    }

    info!("run loop entered");
    let mut frame_index: u64 = 0;

    loop {
        if session.signals().stop_requested() {
            break;
        }

        let (paused, speed_factor, speed_limited) = {
            let state = session.state();
            (state.paused(), state.speed_factor(), state.speed_limited())
        };

        if paused && !session.signals().take_step() {
            thread::sleep(PAUSE_POLL);
            continue;
        }

        let frame_start = Instant::now();
        let period = BASE_FRAME_PERIOD * 100 / speed_factor;

        match registry.execution_mut() {
            Some(execution) => {
                if let Err(reason) = execution.run_frame() {
                    registry.media_close_all();
                    session.state_mut().end_run();
                    session.signals().clear();
                    return Err(HostError::module_failure(
                        Capability::Execution,
                        ModulePhase::Frame,
                        reason,
                    ));
                }
            }
            // Nothing drives time without an execution module; pace the
            // loop on the frame period alone.
            None => thread::sleep(period),
        }

        if let Some(graphics) = registry.graphics_mut() {
            if let Err(reason) = graphics.update_frame() {
                warn!("graphics module failed during frame: {reason}");
            }
        }

        if let Some(serial) = media.consume_capture() {
            capture_frame(registry, serial);
        }

        if let Some(callback) = callback.as_mut() {
            callback(frame_index);
        }
        frame_index += 1;

        if speed_limited {
            if let Some(remaining) = period.checked_sub(frame_start.elapsed()) {
                thread::sleep(remaining);
            }
        }
    }

    registry.media_close_all();
    session.state_mut().end_run();
    session.signals().clear();
    info!(frames = frame_index, "run loop exited");
    Ok(())
}

/// A capture armed through the dispatcher is taken at the frame boundary
fn capture_frame(registry: &mut PluginRegistry, serial: u64) {
    match registry.graphics_mut() {
        Some(graphics) => match graphics.read_frame(FrameBuffer::Front) {
            Ok(capture) => debug!(
                serial,
                width = capture.width,
                height = capture.height,
                "frame captured"
            ),
            Err(reason) => warn!("frame capture {serial} failed: {reason}"),
        },
        None => debug!("frame capture {serial} skipped, no graphics module"),
    }
}
