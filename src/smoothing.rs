//! Temporal smoother: interpolates successive LED-color targets at a fixed
//! tick cadence under one of several motion models, with a low-light
//! anti-flicker deadband and a small registry of named configurations.
//!
//! Grounded on `Smoothing.cpp`/`LinearSmoothing.cpp` for the Stepper/Linear/
//! Alternative step math and the cooldown-phase cadence, and on
//! `InfiniteSmoothing.cpp`/`InfiniteHybridInterpolator.cpp` for the
//! critically-damped-spring controller shared by `RgbInterp`/`YuvInterp`/
//! `HybridInterp`/`HybridRgb`. Helion had no temporal smoother at all (it
//! wrote straight from its single capture source to the wire); this module
//! is new to the corpus's capability set for this engine, built in the same
//! plain-owned-state, `Clock`-driven style as [`crate::arbitrator`].

use crate::clock::{Clock, Millis};
use crate::color::{bt709_to_rgb, luma_bt709, rgb_to_bt709, Rgb8, RgbF32, YuvF32};

/// Id of the always-present user-configured smoothing profile.
pub const SMOOTHING_USER_CONFIG: u32 = 0;
/// Ids at or above this value are reserved for effects.
pub const SMOOTHING_EFFECT_CONFIGS_START: u32 = 1;
/// Ticks an idle smoother keeps re-emitting its last frame for after the
/// animation completes, before it suppresses output (unless
/// `continuous_output` is set).
pub const SMOOTHING_COOLDOWN_PHASE: u32 = 3;

const STEP_EPSILON: f32 = 1.0 / 256.0;
const FINISH_COMPONENT_THRESHOLD: f32 = 0.00013733;
const VELOCITY_THRESHOLD: f32 = 0.0005;

/// One of the eight named motion models spec.md §4.4 lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothingModel {
    Stepper,
    Linear,
    Alternative,
    RgbInterp,
    YuvInterp,
    HybridInterp,
    HybridRgb,
    Exponential,
}

impl SmoothingModel {
    fn is_spring(self) -> bool {
        matches!(
            self,
            SmoothingModel::RgbInterp
                | SmoothingModel::YuvInterp
                | SmoothingModel::HybridInterp
                | SmoothingModel::HybridRgb
        )
    }

    fn uses_yuv(self) -> bool {
        matches!(self, SmoothingModel::YuvInterp | SmoothingModel::HybridInterp)
    }
}

/// Critically-damped-spring parameters for the `*Interp`/`Hybrid*` models.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpringParams {
    pub stiffness: f32,
    pub damping: f32,
}

impl Default for SpringParams {
    /// A near-critically-damped pair for a ~200ms settle at 25Hz, used when
    /// a spring model is selected without explicit `stiffness`/`damping`.
    fn default() -> Self {
        Self {
            stiffness: 90.0,
            damping: 19.0,
        }
    }
}

/// One named smoothing profile (spec.md §3 "Smoothing configuration").
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothingConfig {
    pub paused: bool,
    pub settling_time_ms: i64,
    pub update_interval_ms: i64,
    pub model: SmoothingModel,
    pub continuous_output: bool,
    /// `0` disables anti-flicker outright.
    pub anti_flicker_threshold: u8,
    pub anti_flicker_step: u8,
    pub anti_flicker_timeout_ms: i64,
    pub spring: Option<SpringParams>,
    /// Maximum `|ΔY|` per tick for the spring models, or `None` for no cap.
    pub max_luminance_per_step: Option<f32>,
    /// Per-channel blend factor for [`SmoothingModel::Exponential`].
    pub smoothing_factor: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            paused: false,
            settling_time_ms: 200,
            update_interval_ms: 40,
            model: SmoothingModel::Linear,
            continuous_output: false,
            anti_flicker_threshold: 0,
            anti_flicker_step: 0,
            anti_flicker_timeout_ms: 0,
            spring: None,
            max_luminance_per_step: None,
            smoothing_factor: 0.2,
        }
    }
}

/// Registers [`SmoothingConfig`]s by id: `0` is always the user profile,
/// `SMOOTHING_EFFECT_CONFIGS_START..` are reused by matching
/// `(settling_time_ms, update_interval_ms, paused)` before a new id is
/// minted, matching `AddEffectConfig` (spec.md §4.4).
pub struct ConfigRegistry {
    configs: Vec<(u32, SmoothingConfig)>,
    next_id: u32,
}

impl ConfigRegistry {
    pub fn new(user_config: SmoothingConfig) -> Self {
        Self {
            configs: vec![(SMOOTHING_USER_CONFIG, user_config)],
            next_id: SMOOTHING_EFFECT_CONFIGS_START,
        }
    }

    pub fn get(&self, id: u32) -> Option<&SmoothingConfig> {
        self.configs.iter().find(|(i, _)| *i == id).map(|(_, c)| c)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut SmoothingConfig> {
        self.configs.iter_mut().find(|(i, _)| *i == id).map(|(_, c)| c)
    }

    pub fn set_user_config(&mut self, config: SmoothingConfig) {
        if let Some(slot) = self.get_mut(SMOOTHING_USER_CONFIG) {
            *slot = config;
        }
    }

    /// Returns an existing effect config matching `(settling_time_ms,
    /// update_interval_ms, paused)` or mints a new one.
    pub fn add_custom_config(&mut self, config: SmoothingConfig) -> u32 {
        if let Some((id, _)) = self.configs.iter().find(|(id, c)| {
            *id >= SMOOTHING_EFFECT_CONFIGS_START
                && c.settling_time_ms == config.settling_time_ms
                && c.update_interval_ms == config.update_interval_ms
                && c.paused == config.paused
        }) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.configs.push((id, config));
        id
    }
}

/// Converts a displayed color into the space a model's spring operates in:
/// plain RGB for `RgbInterp`/`HybridRgb`, BT.709 `(y, u, v)` packed into the
/// same three-float carrier for `YuvInterp`/`HybridInterp`.
fn to_native(model: SmoothingModel, c: Rgb8) -> RgbF32 {
    let f = c.to_f32();
    if model.uses_yuv() {
        let yuv = rgb_to_bt709(f);
        RgbF32::new(yuv.y, yuv.u, yuv.v)
    } else {
        f
    }
}

fn from_native(model: SmoothingModel, v: RgbF32) -> Rgb8 {
    if model.uses_yuv() {
        bt709_to_rgb(YuvF32::new(v.r, v.g, v.b)).to_rgb8_clamped()
    } else {
        v.to_rgb8_clamped()
    }
}

/// Luma of a native-space *delta* vector: the `y` component directly in YUV
/// space, BT.709 luma of the RGB delta otherwise.
fn native_delta_luma(model: SmoothingModel, delta: RgbF32) -> f32 {
    if model.uses_yuv() {
        delta.r
    } else {
        luma_bt709(delta)
    }
}

fn pad_to(colors: &[Rgb8], n: usize) -> Vec<Rgb8> {
    let mut out = colors.to_vec();
    out.resize(n, Rgb8::BLACK);
    out
}

/// Per-channel step for Stepper/Linear: move by `ceil(k * |diff|)`, clamped
/// to at least 1 and at most `|diff|`, toward `target`.
fn step_channel_linear(old: u8, target: u8, k: f32) -> u8 {
    let diff = target as i32 - old as i32;
    if diff == 0 {
        return old;
    }
    let step = ((k * diff.unsigned_abs() as f32).ceil() as i32)
        .max(1)
        .min(diff.abs());
    (old as i32 + step * diff.signum()).clamp(0, 255) as u8
}

/// Alternative's per-channel `k`, banded by the remaining distance
/// (spec.md §4.4; exponents from `setupAdvColor`).
fn alternative_k(k_org: f32, diff_abs: i32) -> f32 {
    let exponent = if diff_abs < 16 {
        0.6
    } else if diff_abs < 32 {
        0.75
    } else if diff_abs < 60 {
        0.9
    } else {
        1.0
    };
    k_org.powf(exponent).min(1.0)
}

fn step_channel_alternative(old: u8, target: u8, k_org: f32) -> u8 {
    let diff = target as i32 - old as i32;
    if diff == 0 {
        return old;
    }
    let k = alternative_k(k_org, diff.abs());
    let step = ((k * diff.unsigned_abs() as f32).ceil() as i32)
        .max(1)
        .min(diff.abs());
    (old as i32 + step * diff.signum()).clamp(0, 255) as u8
}

/// Consumes calibrated target vectors and emits a smoothed vector on each
/// master-clock tick (spec.md §4.4).
pub struct Smoother {
    registry: ConfigRegistry,
    active_id: u32,
    enabled: bool,
    led_count: usize,
    current: Vec<Rgb8>,
    /// Native-space velocity for the spring models; unused (left at zero)
    /// by the other models.
    velocity: Vec<RgbF32>,
    target: Vec<Rgb8>,
    has_target: bool,
    prev_tick_ms: Millis,
    target_time_ms: Millis,
    af_last_change_ms: Vec<Millis>,
    finished: bool,
    cooldown_remaining: u32,
}

impl Smoother {
    pub fn new(user_config: SmoothingConfig, led_count: usize) -> Self {
        Self {
            registry: ConfigRegistry::new(user_config),
            active_id: SMOOTHING_USER_CONFIG,
            enabled: true,
            led_count,
            current: vec![Rgb8::BLACK; led_count],
            velocity: vec![RgbF32::ZERO; led_count],
            target: vec![Rgb8::BLACK; led_count],
            has_target: false,
            prev_tick_ms: 0,
            target_time_ms: 0,
            af_last_change_ms: vec![Millis::MIN; led_count],
            finished: true,
            cooldown_remaining: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_paused(&mut self, paused: bool) {
        if let Some(cfg) = self.registry.get_mut(self.active_id) {
            cfg.paused = paused;
        }
    }

    pub fn active_config_id(&self) -> u32 {
        self.active_id
    }

    pub fn set_user_config(&mut self, config: SmoothingConfig) {
        self.registry.set_user_config(config);
    }

    pub fn add_custom_config(&mut self, config: SmoothingConfig) -> u32 {
        self.registry.add_custom_config(config)
    }

    /// Switch the active configuration, clearing the working buffers
    /// (spec.md §4.4: "Changing the active config clears the working
    /// buffers").
    pub fn select_config(&mut self, id: u32) -> bool {
        if self.registry.get(id).is_none() {
            return false;
        }
        self.active_id = id;
        self.current = vec![Rgb8::BLACK; self.led_count];
        self.velocity = vec![RgbF32::ZERO; self.led_count];
        self.has_target = false;
        self.finished = true;
        self.cooldown_remaining = 0;
        true
    }

    fn config(&self) -> SmoothingConfig {
        *self
            .registry
            .get(self.active_id)
            .expect("active smoothing config always exists")
    }

    /// Feed a fresh target vector (from the calibrator). Sizes shorter or
    /// longer than the LED count are padded with black / truncated.
    pub fn set_target(&mut self, clock: &dyn Clock, target: &[Rgb8]) {
        let cfg = self.config();
        self.target = pad_to(target, self.led_count);
        self.has_target = true;
        self.finished = false;
        self.cooldown_remaining = 0;
        self.target_time_ms = clock.now_ms() + cfg.settling_time_ms;
    }

    /// Reacts to an LED-layout change: per spec.md §9's open-question
    /// resolution, snap directly to whatever target is current rather than
    /// proportionally remapping the in-flight animation.
    pub fn resize_leds(&mut self, new_led_count: usize) {
        let fallback = if self.has_target {
            pad_to(&self.target, new_led_count)
        } else {
            vec![Rgb8::BLACK; new_led_count]
        };
        self.led_count = new_led_count;
        self.current = fallback.clone();
        self.target = fallback;
        self.velocity = vec![RgbF32::ZERO; new_led_count];
        self.af_last_change_ms = vec![Millis::MIN; new_led_count];
        self.finished = true;
        self.cooldown_remaining = 0;
    }

    fn anti_flicker_holds(&self, cfg: &SmoothingConfig, i: usize, old: Rgb8, target: Rgb8, now: Millis) -> bool {
        if cfg.anti_flicker_threshold == 0 {
            return false;
        }
        let avg = (target.min_channel() as u32 + target.max_channel() as u32) / 2;
        if avg >= cfg.anti_flicker_threshold as u32 {
            return false;
        }
        if !old.has_color() || !target.has_color() {
            return false;
        }
        let max_diff = (target.r as i32 - old.r as i32)
            .abs()
            .max((target.g as i32 - old.g as i32).abs())
            .max((target.b as i32 - old.b as i32).abs());
        if !(max_diff > 0 && max_diff < cfg.anti_flicker_step as i32) {
            return false;
        }
        let last_change = self.af_last_change_ms[i];
        last_change != Millis::MIN && now - last_change < cfg.anti_flicker_timeout_ms
    }

    fn step_linear(&mut self, cfg: &SmoothingConfig, now: Millis, dt_ms: Millis, alternative: bool) -> bool {
        let prev_before = now - dt_ms;
        let denom = (self.target_time_ms - prev_before).max(1) as f32;
        let k = (1.0 - dt_ms as f32 / denom).max(STEP_EPSILON);
        let mut all_done = true;
        for i in 0..self.led_count {
            let old = self.current[i];
            let target = self.target[i];
            if self.anti_flicker_holds(cfg, i, old, target, now) {
                if old != target {
                    all_done = false;
                }
                continue;
            }
            let new_c = if alternative {
                Rgb8::new(
                    step_channel_alternative(old.r, target.r, k),
                    step_channel_alternative(old.g, target.g, k),
                    step_channel_alternative(old.b, target.b, k),
                )
            } else {
                Rgb8::new(
                    step_channel_linear(old.r, target.r, k),
                    step_channel_linear(old.g, target.g, k),
                    step_channel_linear(old.b, target.b, k),
                )
            };
            if new_c != old {
                self.af_last_change_ms[i] = now;
            }
            self.current[i] = new_c;
            if new_c != target {
                all_done = false;
            }
        }
        all_done
    }

    fn step_exponential(&mut self, factor: f32) -> bool {
        let mut all_done = true;
        for i in 0..self.led_count {
            let old = self.current[i].to_f32();
            let target = self.target[i].to_f32();
            let new = RgbF32::new(
                old.r + factor * (target.r - old.r),
                old.g + factor * (target.g - old.g),
                old.b + factor * (target.b - old.b),
            );
            self.current[i] = new.to_rgb8_clamped();
            if self.current[i] != self.target[i] {
                all_done = false;
            }
        }
        all_done
    }

    fn step_spring(&mut self, cfg: &SmoothingConfig, dt_ms: Millis) -> bool {
        let dt = (dt_ms.max(1) as f32) / 1000.0;
        let spring = cfg.spring.unwrap_or_default();
        let mut all_done = true;
        for i in 0..self.led_count {
            let pos = to_native(cfg.model, self.current[i]);
            let target = to_native(cfg.model, self.target[i]);
            let vel = self.velocity[i];

            let diff = target - pos;
            let acc = diff * spring.stiffness - vel * spring.damping;
            let mut new_vel = vel + acc * dt;
            let mut step = new_vel * dt;

            if let Some(cap) = cfg.max_luminance_per_step {
                let dy = native_delta_luma(cfg.model, step).abs();
                if dy > cap && dy > 0.0 {
                    let scale = cap / dy;
                    step = step * scale;
                    new_vel = new_vel * scale;
                }
            }

            let new_pos = pos + step;
            let residual = (target - new_pos).max_abs_diff(RgbF32::ZERO);
            let done = residual < FINISH_COMPONENT_THRESHOLD && new_vel.max_abs_diff(RgbF32::ZERO) < VELOCITY_THRESHOLD;

            self.velocity[i] = new_vel;
            self.current[i] = from_native(cfg.model, new_pos);
            if !done {
                all_done = false;
            }
        }
        all_done
    }

    /// Master-clock tick. `None` means "stay suppressed"; `Some` carries the
    /// frame to emit this tick (spec.md §4.4 "Cadence and suspension").
    pub fn tick(&mut self, clock: &dyn Clock) -> Option<Vec<Rgb8>> {
        let now = clock.now_ms();
        let cfg = self.config();

        if !self.enabled || cfg.paused {
            self.prev_tick_ms = now;
            return None;
        }
        if !self.has_target {
            self.prev_tick_ms = now;
            return None;
        }

        if self.finished {
            self.prev_tick_ms = now;
            if cfg.continuous_output {
                return Some(self.current.clone());
            }
            if self.cooldown_remaining > 0 {
                self.cooldown_remaining -= 1;
                return Some(self.current.clone());
            }
            return None;
        }

        let dt_ms = (now - self.prev_tick_ms).max(0);
        self.prev_tick_ms = now;

        let settled_by_deadline = now >= self.target_time_ms;
        let done = match cfg.model {
            SmoothingModel::Stepper | SmoothingModel::Linear => self.step_linear(&cfg, now, dt_ms, false),
            SmoothingModel::Alternative => self.step_linear(&cfg, now, dt_ms, true),
            SmoothingModel::Exponential => self.step_exponential(cfg.smoothing_factor),
            _ if cfg.model.is_spring() => self.step_spring(&cfg, dt_ms),
            _ => unreachable!("every SmoothingModel variant is handled above"),
        };

        if done || settled_by_deadline {
            self.current = self.target.clone();
            self.finished = true;
            self.cooldown_remaining = SMOOTHING_COOLDOWN_PHASE;
        }

        Some(self.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn cfg(model: SmoothingModel) -> SmoothingConfig {
        SmoothingConfig {
            settling_time_ms: 200,
            update_interval_ms: 40,
            model,
            ..Default::default()
        }
    }

    #[test]
    fn linear_one_step_matches_worked_example_s4() {
        // spec.md §8 S4: settling=200ms, interval=40ms, 0 -> 200 on R.
        let mut smoother = Smoother::new(cfg(SmoothingModel::Linear), 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(200, 0, 0)]);
        clock.set(40);
        let frame = smoother.tick(&clock).unwrap();
        assert_eq!(frame[0], Rgb8::new(160, 0, 0));
    }

    #[test]
    fn linear_reaches_target_before_settling_ends() {
        let mut smoother = Smoother::new(cfg(SmoothingModel::Linear), 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(200, 0, 0)]);
        let mut last = Rgb8::BLACK;
        for ms in (40..=400).step_by(40) {
            clock.set(ms);
            if let Some(frame) = smoother.tick(&clock) {
                last = frame[0];
            }
        }
        assert_eq!(last, Rgb8::new(200, 0, 0));
    }

    #[test]
    fn anti_flicker_holds_then_tracks_after_timeout() {
        // spec.md §8 S5.
        let mut config = cfg(SmoothingModel::Linear);
        config.anti_flicker_threshold = 20;
        config.anti_flicker_step = 3;
        config.anti_flicker_timeout_ms = 200;
        let mut smoother = Smoother::new(config, 1);
        let clock = TestClock::new(0);
        smoother.current[0] = Rgb8::new(10, 10, 10);
        smoother.af_last_change_ms[0] = 0;
        smoother.set_target(&clock, &[Rgb8::new(11, 10, 12)]);
        smoother.finished = false;

        clock.set(40);
        let frame = smoother.tick(&clock).unwrap();
        assert_eq!(frame[0], Rgb8::new(10, 10, 10));

        clock.set(250);
        let frame = smoother.tick(&clock).unwrap();
        assert_eq!(frame[0], Rgb8::new(11, 10, 12));
    }

    #[test]
    fn exponential_converges_toward_target() {
        let mut config = cfg(SmoothingModel::Exponential);
        config.smoothing_factor = 0.5;
        let mut smoother = Smoother::new(config, 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(200, 0, 0)]);
        clock.set(40);
        let first = smoother.tick(&clock).unwrap()[0];
        assert!(first.r > 0 && first.r < 200);
        for ms in (80..=2000).step_by(40) {
            clock.set(ms);
            smoother.tick(&clock);
        }
    }

    #[test]
    fn hybrid_spring_converges_to_target() {
        let mut config = cfg(SmoothingModel::HybridInterp);
        config.spring = Some(SpringParams { stiffness: 120.0, damping: 22.0 });
        let mut smoother = Smoother::new(config, 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(200, 100, 50)]);
        let mut last = smoother.current[0];
        for ms in (40..=2000).step_by(40) {
            clock.set(ms);
            if let Some(frame) = smoother.tick(&clock) {
                last = frame[0];
            }
        }
        assert_eq!(last, Rgb8::new(200, 100, 50));
    }

    #[test]
    fn output_stops_changing_after_cooldown_without_continuous_output() {
        let mut smoother = Smoother::new(cfg(SmoothingModel::Linear), 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(10, 0, 0)]);
        let mut ticks_with_output = 0;
        for ms in (40..=2000).step_by(40) {
            clock.set(ms);
            if smoother.tick(&clock).is_some() {
                ticks_with_output += 1;
            } else {
                break;
            }
        }
        assert!(ticks_with_output > 0);
        clock.advance(40);
        assert!(smoother.tick(&clock).is_none());
    }

    #[test]
    fn continuous_output_keeps_re_emitting() {
        let mut config = cfg(SmoothingModel::Linear);
        config.continuous_output = true;
        let mut smoother = Smoother::new(config, 1);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(5, 0, 0)]);
        for ms in (40..=2000).step_by(40) {
            clock.set(ms);
            smoother.tick(&clock);
        }
        clock.advance(1000);
        assert!(smoother.tick(&clock).is_some());
    }

    #[test]
    fn registry_reuses_matching_effect_config() {
        let mut registry = ConfigRegistry::new(SmoothingConfig::default());
        let a = registry.add_custom_config(cfg(SmoothingModel::Linear));
        let b = registry.add_custom_config(cfg(SmoothingModel::Linear));
        assert_eq!(a, b);
        assert!(a >= SMOOTHING_EFFECT_CONFIGS_START);
    }

    #[test]
    fn select_config_clears_working_buffers() {
        let mut smoother = Smoother::new(cfg(SmoothingModel::Linear), 2);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(9, 9, 9)]);
        clock.set(40);
        smoother.tick(&clock);
        let id = smoother.add_custom_config(cfg(SmoothingModel::Exponential));
        assert!(smoother.select_config(id));
        assert_eq!(smoother.current, vec![Rgb8::BLACK; 2]);
        assert!(!smoother.has_target);
    }

    #[test]
    fn resize_snaps_instead_of_remapping() {
        let mut smoother = Smoother::new(cfg(SmoothingModel::Linear), 2);
        let clock = TestClock::new(0);
        smoother.set_target(&clock, &[Rgb8::new(100, 0, 0), Rgb8::new(0, 100, 0)]);
        clock.set(40);
        smoother.tick(&clock);
        smoother.resize_leds(3);
        assert_eq!(smoother.current.len(), 3);
        assert_eq!(smoother.current, smoother.target);
    }
}
