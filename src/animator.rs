//! Fade animator: the wake-up state machine and the thread that drives it.
//!
//! ```text
//! Idle ──start──▶ FadingIn ──▶ Holding ──▶ FadingOut ──▶ Idle
//!   ▲                  └────────cancel (any phase)──────────┘
//! ```
//!
//! There is exactly one [`AnimationState`] per strip, behind an
//! `Arc<Mutex<_>>`. The trigger side ([`FadeController`]) only starts and
//! cancels; the animator loop only advances phase, elapsed time and the
//! displayed frame. Each tick is one update under the lock, and the frame is
//! copied out before the (possibly slow) sink write, so the lock is never
//! held across I/O and a frame is never half updated.
//!
//! A start while a fade is already running restarts: the new fade-in begins
//! from whatever is on the strip at that moment.
//!
//! ## Rust concepts
//! - `Arc<Mutex<T>>` shared between a thread and async handlers
//! - Recovering a poisoned lock with `PoisonError::into_inner`
//! - `std::mem::take` to read and reset a flag in one step
//! - Generic structs (`Animator<S: OutputSink>`) instead of trait objects

use crate::fade::{self, Channels};
use crate::sink::OutputSink;
use crate::{ColorVector, Result, WakeLightError, black_frame, is_running};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_DITHER_BATCH: usize = 16;
pub const DEFAULT_FADE_IN: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_HOLD: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_FADE_OUT: Duration = Duration::from_secs(10 * 60);

// ── Configuration ────────────────────────────────────────────────────

/// What the strip shows after a cancel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Switch every LED off.
    #[default]
    Black,
    /// Leave the last frame on the strip.
    Freeze,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimatorConfig {
    /// Time between ticks of the animator loop.
    pub tick_interval: Duration,
    /// LEDs advanced per tick. Clamped to the strip length.
    pub dither_batch: usize,
    pub cancel_policy: CancelPolicy,
    /// Fixed seed for the dither order; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            dither_batch: DEFAULT_DITHER_BATCH,
            cancel_policy: CancelPolicy::default(),
            seed: None,
        }
    }
}

/// Length of each phase of one wake-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FadeTimings {
    pub fade_in: Duration,
    pub hold: Duration,
    pub fade_out: Duration,
}

impl Default for FadeTimings {
    fn default() -> Self {
        Self {
            fade_in: DEFAULT_FADE_IN,
            hold: DEFAULT_HOLD,
            fade_out: DEFAULT_FADE_OUT,
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FadingIn,
    Holding,
    FadingOut,
}

impl Phase {
    fn next(self) -> Self {
        match self {
            Phase::Idle => Phase::Idle,
            Phase::FadingIn => Phase::Holding,
            Phase::Holding => Phase::FadingOut,
            Phase::FadingOut => Phase::Idle,
        }
    }
}

/// Snapshot of the animation for status reporting.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct AnimationStatus {
    pub phase: Phase,
    /// Seconds into the current phase
    pub elapsed_secs: f64,
    /// Progress through the current phase, 0.0–1.0
    pub progress: f64,
    pub fade_in_secs: f64,
    pub hold_secs: f64,
    pub fade_out_secs: f64,
    pub led_count: usize,
    /// Label of the target being shown (usually the image path)
    pub showing: Option<String>,
    pub version: String,
}

/// The single animation timeline for one strip.
#[derive(Debug)]
pub struct AnimationState {
    phase: Phase,
    start: ColorVector,
    target: ColorVector,
    off: ColorVector,
    elapsed: Duration,
    timings: FadeTimings,
    /// What is on the strip right now, at float precision.
    frame: Vec<Channels>,
    cancel_pending: bool,
    label: Option<String>,
}

impl AnimationState {
    pub fn new(led_count: usize) -> Self {
        let off = black_frame(led_count);
        Self {
            phase: Phase::Idle,
            start: off.clone(),
            target: off.clone(),
            elapsed: Duration::ZERO,
            timings: FadeTimings::default(),
            frame: fade::lift(&off),
            off,
            cancel_pending: false,
            label: None,
        }
    }

    pub fn led_count(&self) -> usize {
        self.off.len()
    }

    /// The frame currently on the strip.
    pub fn current_frame(&self) -> ColorVector {
        fade::quantize(&self.frame)
    }

    /// Begin a fade-in towards `target`. Restarts a running animation from
    /// the frame currently displayed.
    pub fn start(&mut self, target: ColorVector, timings: FadeTimings, label: Option<String>) -> Result<()> {
        if target.len() != self.led_count() {
            return Err(WakeLightError::layout(format!(
                "target frame has {} LEDs, strip has {}",
                target.len(),
                self.led_count()
            )));
        }

        if self.phase != Phase::Idle {
            tracing::info!("Restarting fade from {:?}", self.phase);
        }
        self.start = self.current_frame();
        self.target = target;
        self.timings = timings;
        self.phase = Phase::FadingIn;
        self.elapsed = Duration::ZERO;
        self.cancel_pending = false;
        self.label = label;
        Ok(())
    }

    /// Return to Idle at once. The next tick emits the cancel frame.
    pub fn cancel(&mut self) {
        if self.phase != Phase::Idle {
            tracing::info!("Fade cancelled during {:?}", self.phase);
        }
        self.phase = Phase::Idle;
        self.elapsed = Duration::ZERO;
        self.cancel_pending = true;
        self.label = None;
    }

    pub fn status(&self) -> AnimationStatus {
        let phase_len = self.phase_duration();
        let progress = match self.phase {
            Phase::Idle => 0.0,
            _ if phase_len.is_zero() => 1.0,
            _ => (self.elapsed.as_secs_f64() / phase_len.as_secs_f64()).min(1.0),
        };
        AnimationStatus {
            phase: self.phase,
            elapsed_secs: self.elapsed.as_secs_f64(),
            progress,
            fade_in_secs: self.timings.fade_in.as_secs_f64(),
            hold_secs: self.timings.hold.as_secs_f64(),
            fade_out_secs: self.timings.fade_out.as_secs_f64(),
            led_count: self.led_count(),
            showing: self.label.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn phase_duration(&self) -> Duration {
        match self.phase {
            Phase::Idle => Duration::ZERO,
            Phase::FadingIn => self.timings.fade_in,
            Phase::Holding => self.timings.hold,
            Phase::FadingOut => self.timings.fade_out,
        }
    }

    /// Colors at the start and end of the current phase.
    fn endpoints(&self) -> (&[crate::Color], &[crate::Color]) {
        match self.phase {
            Phase::Idle => (&self.off, &self.off),
            Phase::FadingIn => (&self.start, &self.target),
            Phase::Holding => (&self.target, &self.target),
            Phase::FadingOut => (&self.target, &self.off),
        }
    }

    /// Advance by `dt` and work out the frame to show, if any.
    ///
    /// Phases that run out are settled exactly on their end colors before
    /// moving on, so dithering never leaves an LED behind at a phase
    /// boundary. Idle emits nothing except the one frame after a cancel.
    pub fn advance(&mut self, dt: Duration, config: &AnimatorConfig, rng: &mut fastrand::Rng) -> Option<ColorVector> {
        if self.phase == Phase::Idle {
            if !std::mem::take(&mut self.cancel_pending) {
                return None;
            }
            if config.cancel_policy == CancelPolicy::Black {
                self.frame = fade::lift(&self.off);
            }
            return Some(self.current_frame());
        }

        self.elapsed += dt;
        while self.phase != Phase::Idle && self.elapsed >= self.phase_duration() {
            self.elapsed -= self.phase_duration();
            self.frame = fade::lift(self.endpoints().1);
            self.phase = self.phase.next();
            tracing::info!("Fade phase: {:?}", self.phase);
        }

        if self.phase == Phase::Idle {
            self.elapsed = Duration::ZERO;
            self.label = None;
            return Some(self.current_frame());
        }

        let t = (self.elapsed.as_secs_f64() / self.phase_duration().as_secs_f64()) as f32;
        let batch = fade::dither_subset(self.frame.len(), config.dither_batch.max(1), rng);
        let (from, to) = self.endpoints();
        let updates: Vec<(usize, Channels)> = batch
            .into_iter()
            .map(|i| (i, fade::gamma_blend(from[i].to_f32(), to[i].to_f32(), t)))
            .collect();
        for (i, channels) in updates {
            self.frame[i] = channels;
        }

        Some(self.current_frame())
    }
}

/// The animation shared by the trigger side and the animator loop.
///
/// Rust concept: Arc<Mutex<T>>
/// `Arc` gives both sides ownership of the same state, and `Mutex` makes
/// sure only one of them touches it at a time. Every tick is a single
/// lock/update/unlock, so a reader never sees half a step.
pub type SharedAnimation = Arc<Mutex<AnimationState>>;

fn lock(state: &SharedAnimation) -> MutexGuard<'_, AnimationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Trigger side ─────────────────────────────────────────────────────

/// Handle used by schedulers and HTTP handlers to start and cancel fades.
///
/// Every call takes the lock briefly and returns; the animator loop picks
/// the change up on its next tick.
#[derive(Clone, Debug)]
pub struct FadeController {
    state: SharedAnimation,
}

impl FadeController {
    pub fn new(led_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(AnimationState::new(led_count))),
        }
    }

    pub fn start_fade(&self, target: ColorVector, fade_in: Duration, hold: Duration, fade_out: Duration) -> Result<()> {
        self.start(target, FadeTimings { fade_in, hold, fade_out }, None)
    }

    pub fn start(&self, target: ColorVector, timings: FadeTimings, label: Option<String>) -> Result<()> {
        lock(&self.state).start(target, timings, label)
    }

    pub fn cancel(&self) {
        lock(&self.state).cancel();
    }

    pub fn status(&self) -> AnimationStatus {
        lock(&self.state).status()
    }

    pub fn led_count(&self) -> usize {
        lock(&self.state).led_count()
    }

    pub fn shared(&self) -> SharedAnimation {
        self.state.clone()
    }
}

// ── Animator loop ────────────────────────────────────────────────────

/// Advances the shared state on a fixed tick and pushes frames to a sink.
pub struct Animator<S> {
    state: SharedAnimation,
    sink: S,
    config: AnimatorConfig,
    rng: fastrand::Rng,
    dropped_frames: u64,
}

impl<S: OutputSink> Animator<S> {
    pub fn new(controller: &FadeController, sink: S, config: AnimatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self::with_rng(controller, sink, config, rng)
    }

    /// Use a caller-supplied random source for the dither order.
    pub fn with_rng(controller: &FadeController, sink: S, config: AnimatorConfig, rng: fastrand::Rng) -> Self {
        Self {
            state: controller.shared(),
            sink,
            config,
            rng,
            dropped_frames: 0,
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// One tick: advance by `dt`, then write the resulting frame (if any).
    ///
    /// A failed write is logged and otherwise ignored; the timeline has
    /// already moved on and the next tick carries on from there.
    pub fn tick(&mut self, dt: Duration) -> Option<ColorVector> {
        let frame = lock(&self.state).advance(dt, &self.config, &mut self.rng);

        if let Some(frame) = &frame
            && let Err(e) = self.sink.write(frame)
        {
            self.dropped_frames += 1;
            tracing::warn!("Dropped frame ({} so far): {}", self.dropped_frames, e);
        }
        frame
    }

    /// Run until `running` goes false, then switch the strip off.
    pub fn run(mut self, running: Arc<AtomicBool>) -> S {
        tracing::info!(
            "Animator started: tick {}ms, dither batch {}, cancel policy {:?}",
            self.config.tick_interval.as_millis(),
            self.config.dither_batch,
            self.config.cancel_policy
        );

        let mut last = Instant::now();
        let mut slow_ticks = 0u64;

        while is_running(&running) {
            thread::sleep(self.config.tick_interval);

            let now = Instant::now();
            self.tick(now - last);
            last = now;

            let tick_time = last.elapsed();
            if tick_time > self.config.tick_interval {
                slow_ticks += 1;
                if slow_ticks <= 5 {
                    tracing::warn!(
                        "Tick took {}ms (interval: {}ms)",
                        tick_time.as_millis(),
                        self.config.tick_interval.as_millis()
                    );
                }
            }
        }

        let off = black_frame(lock(&self.state).led_count());
        if let Err(e) = self.sink.write(&off) {
            tracing::error!("Failed to switch strip off on shutdown: {}", e);
        }
        tracing::info!(
            "Animator stopped ({} dropped frames, {} slow ticks)",
            self.dropped_frames,
            slow_ticks
        );
        self.sink
    }
}

/// Spawn the animator loop on its own thread.
pub fn spawn<S: OutputSink + 'static>(animator: Animator<S>, running: Arc<AtomicBool>) -> thread::JoinHandle<S> {
    thread::spawn(move || animator.run(running))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use crate::fade::to_linear;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::Ordering;

    const TICK: Duration = Duration::from_millis(50);

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<ColorVector>>>);

    impl OutputSink for RecordingSink {
        fn write(&mut self, frame: &[Color]) -> Result<()> {
            self.0.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write(&mut self, _frame: &[Color]) -> Result<()> {
            Err(WakeLightError::sink("bus unplugged"))
        }
    }

    fn target(n: usize) -> ColorVector {
        (0..n)
            .map(|i| Color::new(255 - i as u8, 120, (i * 10) as u8))
            .collect()
    }

    fn timings(fade_in: u64, hold: u64, fade_out: u64) -> FadeTimings {
        FadeTimings {
            fade_in: Duration::from_secs(fade_in),
            hold: Duration::from_secs(hold),
            fade_out: Duration::from_secs(fade_out),
        }
    }

    fn config(batch: usize, policy: CancelPolicy) -> AnimatorConfig {
        AnimatorConfig {
            tick_interval: TICK,
            dither_batch: batch,
            cancel_policy: policy,
            seed: Some(42),
        }
    }

    fn setup(n: usize, batch: usize) -> (FadeController, Animator<RecordingSink>, RecordingSink) {
        let controller = FadeController::new(n);
        let sink = RecordingSink::default();
        let animator = Animator::new(&controller, sink.clone(), config(batch, CancelPolicy::Black));
        (controller, animator, sink)
    }

    fn run_for(animator: &mut Animator<impl OutputSink>, total: Duration) -> Option<ColorVector> {
        let mut last = None;
        let ticks = total.as_millis() / TICK.as_millis();
        for _ in 0..ticks {
            last = animator.tick(TICK).or(last);
        }
        last
    }

    #[test]
    fn idle_emits_nothing() {
        let (controller, mut animator, sink) = setup(4, 2);
        assert_eq!(animator.tick(TICK), None);
        assert_eq!(controller.status().phase, Phase::Idle);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(64)]
    fn fade_in_converges_to_target(#[case] batch: usize) {
        let (controller, mut animator, _) = setup(30, batch);
        controller.start(target(30), timings(10, 60, 10), None).unwrap();

        let last = run_for(&mut animator, Duration::from_secs(10)).unwrap();
        assert_eq!(last, target(30));
        assert_eq!(controller.status().phase, Phase::Holding);
    }

    #[test]
    fn dithering_updates_only_a_subset_per_tick() {
        let (controller, mut animator, _) = setup(20, 3);
        controller.start(vec![Color::new(255, 255, 255); 20], timings(10, 0, 0), None).unwrap();

        let frame = animator.tick(Duration::from_secs(5)).unwrap();
        let lit = frame.iter().filter(|c| **c != Color::BLACK).count();
        assert_eq!(lit, 3);
    }

    #[test]
    fn midpoint_follows_gamma_curve() {
        let (controller, mut animator, _) = setup(10, 10);
        controller.start(target(10), timings(10, 60, 10), None).unwrap();

        let frame = animator.tick(Duration::from_secs(5)).unwrap();
        for (got, want) in frame.iter().zip(target(10)) {
            for (g, w) in got.to_f32().iter().zip(want.to_f32()) {
                let expected = 0.5 * to_linear(w);
                // one 8-bit step of quantization error
                assert!((to_linear(*g) - expected).abs() < 0.01, "{g} vs {w}");
            }
        }
    }

    #[test]
    fn full_cycle_ends_idle_and_black() {
        let (controller, mut animator, sink) = setup(8, 8);
        controller.start(target(8), timings(2, 1, 2), None).unwrap();

        let last = run_for(&mut animator, Duration::from_secs(5)).unwrap();
        assert_eq!(last, black_frame(8));
        assert_eq!(controller.status().phase, Phase::Idle);
        assert_eq!(animator.tick(TICK), None);

        let frames = sink.0.lock().unwrap();
        assert!(frames.iter().any(|f| *f == target(8)));
    }

    #[test]
    fn zero_length_phases_pass_straight_through() {
        let (controller, mut animator, _) = setup(3, 3);
        controller.start(target(3), timings(0, 0, 0), None).unwrap();
        assert_eq!(animator.tick(TICK), Some(black_frame(3)));
        assert_eq!(controller.status().phase, Phase::Idle);
    }

    #[test]
    fn long_tick_crosses_several_phases() {
        let (controller, mut animator, _) = setup(5, 1);
        controller.start(target(5), timings(1, 1, 10), None).unwrap();
        animator.tick(Duration::from_millis(2500));

        let status = controller.status();
        assert_eq!(status.phase, Phase::FadingOut);
        assert!((status.elapsed_secs - 0.5).abs() < 1e-9);
    }

    #[rstest]
    #[case(1)]
    #[case(30)]
    #[case(100)]
    fn cancel_with_black_policy(#[case] ticks: usize) {
        let (controller, mut animator, _) = setup(6, 6);
        controller.start(target(6), timings(2, 1, 2), None).unwrap();
        for _ in 0..ticks {
            animator.tick(TICK);
        }

        controller.cancel();
        assert_eq!(controller.status().phase, Phase::Idle);
        assert_eq!(animator.tick(TICK), Some(black_frame(6)));
        assert_eq!(animator.tick(TICK), None);
    }

    #[rstest]
    #[case::fading_in(20, Phase::FadingIn)]
    #[case::holding(50, Phase::Holding)]
    #[case::fading_out(80, Phase::FadingOut)]
    fn cancel_in_any_phase_follows_policy(
        #[case] ticks: usize,
        #[case] phase: Phase,
        #[values(CancelPolicy::Black, CancelPolicy::Freeze)] policy: CancelPolicy,
    ) {
        let controller = FadeController::new(6);
        let mut animator = Animator::new(&controller, RecordingSink::default(), config(2, policy));
        controller.start(target(6), timings(2, 1, 2), None).unwrap();
        let shown = run_for(&mut animator, TICK * ticks as u32).unwrap();
        assert_eq!(controller.status().phase, phase);

        controller.cancel();
        assert_eq!(controller.status().phase, Phase::Idle);
        let expected = match policy {
            CancelPolicy::Black => black_frame(6),
            CancelPolicy::Freeze => shown,
        };
        assert_eq!(animator.tick(TICK), Some(expected));
        assert_eq!(animator.tick(TICK), None);
        assert_eq!(controller.status().phase, Phase::Idle);
    }

    #[test]
    fn sink_failure_does_not_disturb_timeline() {
        let ok_controller = FadeController::new(10);
        let mut ok = Animator::new(&ok_controller, RecordingSink::default(), config(4, CancelPolicy::Black));
        let bad_controller = FadeController::new(10);
        let mut bad = Animator::new(&bad_controller, FailingSink, config(4, CancelPolicy::Black));

        ok_controller.start(target(10), timings(3, 1, 3), None).unwrap();
        bad_controller.start(target(10), timings(3, 1, 3), None).unwrap();

        for _ in 0..70 {
            let a = ok.tick(TICK);
            let b = bad.tick(TICK);
            assert_eq!(a, b);
            assert_eq!(ok_controller.status(), bad_controller.status());
        }
        assert_eq!(bad.dropped_frames(), 70);
        assert_eq!(ok.dropped_frames(), 0);
    }

    #[test]
    fn restart_begins_from_current_frame() {
        let (controller, mut animator, _) = setup(6, 6);
        controller.start(target(6), timings(2, 1, 2), None).unwrap();
        let shown = run_for(&mut animator, Duration::from_secs(1)).unwrap();

        let other = vec![Color::new(0, 0, 255); 6];
        controller.start(other.clone(), timings(2, 1, 2), Some("rain".into())).unwrap();
        let status = controller.status();
        assert_eq!(status.phase, Phase::FadingIn);
        assert_eq!(status.elapsed_secs, 0.0);
        assert_eq!(status.showing.as_deref(), Some("rain"));

        // A zero-length step shows the frame we restarted from
        assert_eq!(animator.tick(Duration::ZERO), Some(shown));
        assert_eq!(run_for(&mut animator, Duration::from_secs(2)).unwrap(), other);
    }

    #[test]
    fn start_rejects_wrong_length_and_stays_idle() {
        let (controller, _, _) = setup(4, 4);
        let err = controller.start(target(3), FadeTimings::default(), None).unwrap_err();
        assert!(matches!(err, WakeLightError::Layout(_)));
        assert_eq!(controller.status().phase, Phase::Idle);
    }

    #[test]
    fn start_fade_uses_given_durations() {
        let (controller, _, _) = setup(2, 2);
        controller
            .start_fade(target(2), Duration::from_secs(3), Duration::from_secs(4), Duration::from_secs(5))
            .unwrap();
        let status = controller.status();
        assert_eq!(status.fade_in_secs, 3.0);
        assert_eq!(status.hold_secs, 4.0);
        assert_eq!(status.fade_out_secs, 5.0);
    }

    #[test]
    fn loop_thread_observes_trigger_and_blanks_on_shutdown() {
        let controller = FadeController::new(4);
        let sink = RecordingSink::default();
        let config = AnimatorConfig {
            tick_interval: Duration::from_millis(5),
            ..config(4, CancelPolicy::Black)
        };
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(Animator::new(&controller, sink.clone(), config), running.clone());

        controller
            .start_fade(target(4), Duration::from_millis(20), Duration::from_secs(60), Duration::from_secs(1))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.status().phase != Phase::Holding && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(controller.status().phase, Phase::Holding);

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let frames = sink.0.lock().unwrap();
        assert!(frames.contains(&target(4)));
        assert_eq!(frames.last(), Some(&black_frame(4)));
    }
}
