//! Output sinks: where finished frames go.
//!
//! The bus protocol that actually clocks bytes into the LED chain lives
//! outside this crate. A sink only has to accept a full frame, one color
//! per LED in wiring order, and report whether it got through.
//!
//! ## Rust concepts
//! - Traits with a blanket impl for `Box<S>`
//! - Wrapper types that add a check around another implementation
//! - Generic writers (`W: Write`)

use crate::{Color, Result, WakeLightError};
use std::io::Write;

pub trait OutputSink: Send {
    /// Display one frame.
    fn write(&mut self, frame: &[Color]) -> Result<()>;
}

/// # Rust concept: blanket impls
/// `?Sized` lets this cover `Box<dyn OutputSink>` too, so a sink chosen at
/// runtime can go anywhere a concrete sink can.
impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write(&mut self, frame: &[Color]) -> Result<()> {
        (**self).write(frame)
    }
}

/// Rejects frames that don't match the strip length before they reach the
/// wrapped sink. Partial frames are never sent.
pub struct FrameSink<S> {
    inner: S,
    led_count: usize,
}

impl<S: OutputSink> FrameSink<S> {
    pub fn new(inner: S, led_count: usize) -> Self {
        Self { inner, led_count }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: OutputSink> OutputSink for FrameSink<S> {
    fn write(&mut self, frame: &[Color]) -> Result<()> {
        if frame.len() != self.led_count {
            return Err(WakeLightError::sink(format!(
                "expected a frame of {} LEDs, got {}",
                self.led_count,
                frame.len()
            )));
        }
        self.inner.write(frame)
    }
}

/// Logs a summary of every frame instead of lighting anything. Used when no
/// strip is attached.
#[derive(Default)]
pub struct LogSink {
    frames: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for LogSink {
    fn write(&mut self, frame: &[Color]) -> Result<()> {
        self.frames += 1;
        let lit = frame.iter().filter(|c| **c != Color::BLACK).count();
        let peak = frame
            .iter()
            .map(|c| c.r.max(c.g).max(c.b))
            .max()
            .unwrap_or(0);
        tracing::debug!(
            "Frame {}: {} of {} LEDs lit, peak channel {}",
            self.frames,
            lit,
            frame.len(),
            peak
        );
        Ok(())
    }
}

/// Streams raw RGB24 bytes (3 per LED, wiring order) to any writer, e.g. a
/// device node or a pipe into a bus driver process.
pub struct StreamSink<W> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputSink for StreamSink<W> {
    fn write(&mut self, frame: &[Color]) -> Result<()> {
        self.buf.clear();
        self.buf.reserve(frame.len() * 3);
        for c in frame {
            self.buf.extend_from_slice(&[c.r, c.g, c.b]);
        }
        self.writer.write_all(&self.buf)?;
        self.writer.flush()?;
        Ok(())
    }
}
