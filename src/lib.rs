//! Weather wake-up light: maps a daily weather image onto an irregular
//! LED layout and fades it in and out.
//!
//! Pipeline, leaves first:
//! - [`layout`]: loads one (x, y) position per LED, in wiring order
//! - [`partition`]: nearest-LED lookup for every pixel coordinate
//! - [`colorize`]: dominant color of each LED's region
//! - [`render`]: image + partition → target frame, with an on-disk cache
//! - [`fade`] / [`animator`]: gamma-corrected, dithered fade state machine
//! - [`sink`]: where frames end up
//!
//! The [`server`] module exposes the trigger interface over HTTP.
//!
//! ## Rust concepts
//! - `#[serde(from, into)]` to serialize a struct through another type
//! - `From` impls for cheap, infallible conversions
//! - `Arc<AtomicBool>` as a shutdown flag shared with a signal handler

pub mod animator;
pub mod colorize;
pub mod error;
pub mod fade;
pub mod layout;
pub mod media;
pub mod partition;
pub mod render;
pub mod server;
pub mod sink;
pub mod weather;

pub use error::{Result, WakeLightError};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Color ──────────────────────────────────────────────────────────

/// One LED's color, 8 bits per channel.
///
/// Serialized as a `[r, g, b]` array so cached frames stay compact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels as floats in 0.0..=255.0, for interpolation.
    pub fn to_f32(self) -> [f32; 3] {
        [self.r as f32, self.g as f32, self.b as f32]
    }

    /// Round and clamp a high-precision color back to 8 bits.
    pub fn from_f32(channels: [f32; 3]) -> Self {
        let quantize = |v: f32| v.round().clamp(0.0, 255.0) as u8;
        Self {
            r: quantize(channels[0]),
            g: quantize(channels[1]),
            b: quantize(channels[2]),
        }
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Color> for [u8; 3] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b]
    }
}

impl From<image::Rgb<u8>> for Color {
    fn from(p: image::Rgb<u8>) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

/// One displayable frame: a color per LED, in wiring order.
pub type ColorVector = Vec<Color>;

/// An all-black frame for `len` LEDs.
pub fn black_frame(len: usize) -> ColorVector {
    vec![Color::BLACK; len]
}

/// 64-bit FNV-1a over a byte stream. Stable across runs and platforms, so
/// it can key files on disk.
pub(crate) fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.into_iter().fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

// ── Shutdown ───────────────────────────────────────────────────────

/// Set up a Ctrl+C handler that flips the returned flag to false.
///
/// # Rust concept: Arc and AtomicBool
/// The flag is shared by the signal handler and every long-running loop.
/// `AtomicBool` needs no mutex for a single bool.
pub fn setup_signal_handler() -> std::result::Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────
