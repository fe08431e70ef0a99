//! Coaching-feedback state machine.
//!
//! Per session, the generator turns a stream of (target, actual) pairs into
//! debounced, rate-limited coaching messages. A category must stay pending
//! for `stability_duration` before it may be spoken; a spoken category
//! repeats no sooner than `repeat_interval`; between spoken messages the
//! visual text refreshes at most every `visual_interval`. Message choice is
//! weighted random. Empty audio means silence on the client.

use adem_core::{Category, FeedbackMessage, FeedbackRules};
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Placeholder visual before the first real message.
const WAITING_TEXT: &str = "Wachten...";

/// Mutable per-session feedback context. `now` values are monotonic
/// seconds supplied by the caller.
#[derive(Debug, Clone)]
pub struct FeedbackState {
    last_target_rr: Option<f64>,
    target_change_ts: f64,
    last_spoken_category: Option<Category>,
    pending_category: Option<Category>,
    pending_ts: f64,
    last_spoken_ts: f64,
    last_visual_ts: f64,
    cached_text: String,
}

impl Default for FeedbackState {
    fn default() -> Self {
        Self {
            last_target_rr: None,
            target_change_ts: 0.0,
            last_spoken_category: None,
            pending_category: None,
            pending_ts: 0.0,
            last_spoken_ts: 0.0,
            last_visual_ts: 0.0,
            cached_text: WAITING_TEXT.to_owned(),
        }
    }
}

/// One evaluated feedback step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub visual_text: String,
    /// Empty when nothing should be spoken.
    pub audio_text: String,
    pub color: String,
}

/// Advance the state machine one step and produce the feedback for it.
pub fn evaluate(
    state: &mut FeedbackState,
    rules: &FeedbackRules,
    target_rr: f64,
    actual_rr: f64,
    now: f64,
    rng: &mut impl Rng,
) -> Feedback {
    if target_rr <= 0.0 || actual_rr <= 0.0 {
        return Feedback {
            visual_text: WAITING_TEXT.to_owned(),
            audio_text: String::new(),
            color: String::new(),
        };
    }

    // A new target restarts the settle-in window and mutes history.
    if state.last_target_rr != Some(target_rr) {
        state.last_target_rr = Some(target_rr);
        state.target_change_ts = now;
        state.last_spoken_category = None;
        state.pending_category = None;
        state.pending_ts = now;
    }

    let elapsed = now - state.target_change_ts;
    let category = if elapsed < rules.blue_threshold_sec() {
        Category::Blue
    } else {
        let diff = actual_rr - target_rr;
        let pct = diff.abs() / target_rr * 100.0;
        if pct <= rules.green_threshold_pct() {
            Category::Green
        } else if pct <= rules.orange_threshold_pct() {
            Category::Orange
        } else if diff > 0.0 {
            Category::RedFast
        } else {
            Category::RedSlow
        }
    };
    let color = category.color().to_owned();

    if state.pending_category != Some(category) {
        state.pending_category = Some(category);
        state.pending_ts = now;
    }

    let settings = &rules.settings;
    let is_stable = now - state.pending_ts >= settings.stability_duration;
    let should_speak = is_stable
        && (state.pending_category != state.last_spoken_category
            || now - state.last_spoken_ts > settings.repeat_interval);

    let mut visual_text = state.cached_text.clone();
    let mut audio_text = String::new();

    if should_speak {
        if let Some(msg) = pick_message(rules.category(category), rng) {
            visual_text = msg.text.clone();
            audio_text = if msg.audio_text.is_empty() {
                msg.text.clone()
            } else {
                msg.audio_text.clone()
            };
            state.last_spoken_ts = now;
            state.last_visual_ts = now;
            state.last_spoken_category = state.pending_category;
            state.cached_text = visual_text.clone();
        }
    } else if now - state.last_visual_ts > settings.visual_interval {
        if let Some(msg) = pick_message(rules.category(category), rng) {
            visual_text = msg.text.clone();
            state.last_visual_ts = now;
            state.cached_text = visual_text.clone();
        }
    }

    Feedback {
        visual_text,
        audio_text,
        color,
    }
}

/// Weighted random choice over a category's messages.
fn pick_message<'a>(
    category: &'a adem_core::FeedbackCategory,
    rng: &mut impl Rng,
) -> Option<&'a FeedbackMessage> {
    let total: u64 = category.messages.iter().map(|m| u64::from(m.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for msg in &category.messages {
        let w = u64::from(msg.weight);
        if roll < w {
            return Some(msg);
        }
        roll -= w;
    }
    category.messages.last()
}

/// Shared rules snapshot with a short TTL; storage misses and errors fall
/// back to the built-in defaults so the generator never raises.
#[derive(Clone)]
pub struct RulesCache {
    inner: Arc<tokio::sync::Mutex<Slot>>,
    ttl: Duration,
}

struct Slot {
    rules: Option<Arc<FeedbackRules>>,
    fetched_at: Option<Instant>,
}

impl Default for RulesCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RulesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(Slot {
                rules: None,
                fetched_at: None,
            })),
            ttl,
        }
    }

    pub async fn load(&self, pool: &PgPool) -> Arc<FeedbackRules> {
        let mut slot = self.inner.lock().await;
        if let (Some(rules), Some(at)) = (&slot.rules, slot.fetched_at) {
            if at.elapsed() < self.ttl {
                return Arc::clone(rules);
            }
        }
        let rules = match crate::repo::feedback_rules::load(pool).await {
            Ok(Some(stored)) => Arc::new(stored.rules),
            Ok(None) => Arc::new(FeedbackRules::default()),
            Err(e) => {
                error!(error = %e, "failed to load feedback rules; using defaults");
                Arc::new(FeedbackRules::default())
            }
        };
        slot.rules = Some(Arc::clone(&rules));
        slot.fetched_at = Some(Instant::now());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adem_core::FeedbackCategory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn step(
        state: &mut FeedbackState,
        rules: &FeedbackRules,
        target: f64,
        actual: f64,
        now: f64,
        rng: &mut StdRng,
    ) -> Feedback {
        evaluate(state, rules, target, actual, now, rng)
    }

    #[test]
    fn missing_rates_return_waiting_silence() {
        let mut state = FeedbackState::default();
        let rules = FeedbackRules::default();
        let fb = step(&mut state, &rules, 0.0, 6.0, 1.0, &mut rng());
        assert_eq!(fb.visual_text, "Wachten...");
        assert_eq!(fb.audio_text, "");
        assert_eq!(fb.color, "");
    }

    #[test]
    fn settle_in_window_is_blue_then_grading_starts() {
        let mut state = FeedbackState::default();
        let rules = FeedbackRules::default();
        let mut r = rng();

        let fb = step(&mut state, &rules, 6.0, 12.0, 10.0, &mut r);
        assert_eq!(fb.color, "accent");
        // 29 s after the target change: still settling.
        let fb = step(&mut state, &rules, 6.0, 12.0, 39.0, &mut r);
        assert_eq!(fb.color, "accent");
        // Past 30 s: 100 % above target → red_fast.
        let fb = step(&mut state, &rules, 6.0, 12.0, 40.5, &mut r);
        assert_eq!(fb.color, "bad");
        // Slightly slow lands in green (≤ 5 %).
        let fb = step(&mut state, &rules, 6.0, 5.9, 41.0, &mut r);
        assert_eq!(fb.color, "ok");
        // 10 % off → orange.
        let fb = step(&mut state, &rules, 6.0, 6.6, 41.5, &mut r);
        assert_eq!(fb.color, "warn");
        // Far too slow → bad.
        let fb = step(&mut state, &rules, 6.0, 4.0, 42.0, &mut r);
        assert_eq!(fb.color, "bad");
    }

    #[test]
    fn speaking_waits_for_stability() {
        let mut state = FeedbackState::default();
        let rules = FeedbackRules::default();
        let mut r = rng();

        // Blue becomes pending at t=0; not yet stable at t=2.9.
        let fb = step(&mut state, &rules, 6.0, 6.0, 0.0, &mut r);
        assert_eq!(fb.audio_text, "");
        let fb = step(&mut state, &rules, 6.0, 6.0, 2.9, &mut r);
        assert_eq!(fb.audio_text, "");
        // Stable at 3 s: speaks the blue message.
        let fb = step(&mut state, &rules, 6.0, 6.0, 3.0, &mut r);
        assert_eq!(fb.audio_text, "We gaan de volgende ademhaling samen doen");
        assert_eq!(fb.visual_text, "We gaan de volgende ademhaling samen doen...");
        // Immediately after, same category: silent until repeat_interval.
        let fb = step(&mut state, &rules, 6.0, 6.0, 4.0, &mut r);
        assert_eq!(fb.audio_text, "");
        assert_eq!(fb.visual_text, "We gaan de volgende ademhaling samen doen...");
        // Past the 7 s repeat interval it speaks again.
        let fb = step(&mut state, &rules, 6.0, 6.0, 10.5, &mut r);
        assert_eq!(fb.audio_text, "We gaan de volgende ademhaling samen doen");
    }

    #[test]
    fn target_change_resets_the_settle_window() {
        let mut state = FeedbackState::default();
        let rules = FeedbackRules::default();
        let mut r = rng();

        let fb = step(&mut state, &rules, 6.0, 6.0, 0.0, &mut r);
        assert_eq!(fb.color, "accent");
        let fb = step(&mut state, &rules, 6.0, 6.0, 35.0, &mut r);
        assert_eq!(fb.color, "ok");
        // New target at t=40 → settle-in restarts.
        let fb = step(&mut state, &rules, 5.0, 6.0, 40.0, &mut r);
        assert_eq!(fb.color, "accent");
        let fb = step(&mut state, &rules, 5.0, 6.0, 69.0, &mut r);
        assert_eq!(fb.color, "accent");
        let fb = step(&mut state, &rules, 5.0, 5.0, 70.5, &mut r);
        assert_eq!(fb.color, "ok");
    }

    #[test]
    fn visual_refresh_between_spoken_messages() {
        let mut state = FeedbackState::default();
        let mut rules = FeedbackRules::default();
        // Very long repeat interval so only visual refreshes happen after
        // the first spoken message.
        rules.settings.repeat_interval = 1000.0;
        let mut r = rng();

        let _ = step(&mut state, &rules, 6.0, 6.0, 0.0, &mut r);
        let spoken = step(&mut state, &rules, 6.0, 6.0, 3.0, &mut r);
        assert!(!spoken.audio_text.is_empty());
        // Within visual_interval: cached text, no audio.
        let fb = step(&mut state, &rules, 6.0, 6.0, 8.0, &mut r);
        assert_eq!(fb.audio_text, "");
        assert_eq!(fb.visual_text, spoken.visual_text);
        // After visual_interval: text refreshes, still silent.
        let fb = step(&mut state, &rules, 6.0, 6.0, 10.5, &mut r);
        assert_eq!(fb.audio_text, "");
        assert_eq!(fb.visual_text, "We gaan de volgende ademhaling samen doen...");
    }

    #[test]
    fn weighted_choice_converges_to_weights() {
        let category = FeedbackCategory {
            messages: vec![
                FeedbackMessage {
                    weight: 1,
                    text: "a".to_owned(),
                    audio_text: "a".to_owned(),
                },
                FeedbackMessage {
                    weight: 3,
                    text: "b".to_owned(),
                    audio_text: "b".to_owned(),
                },
                FeedbackMessage {
                    weight: 6,
                    text: "c".to_owned(),
                    audio_text: "c".to_owned(),
                },
            ],
            threshold_sec: None,
            threshold_pct: None,
        };
        let mut r = rng();
        let n = 20_000;
        let mut counts = [0usize; 3];
        for _ in 0..n {
            match pick_message(&category, &mut r).unwrap().text.as_str() {
                "a" => counts[0] += 1,
                "b" => counts[1] += 1,
                _ => counts[2] += 1,
            }
        }
        // Pearson chi-square against expected 10 %, 30 %, 60 %; with two
        // degrees of freedom 13.8 is the 0.1 % critical value.
        let expected = [0.1 * n as f64, 0.3 * n as f64, 0.6 * n as f64];
        let chi2: f64 = counts
            .iter()
            .zip(&expected)
            .map(|(&o, &e)| (o as f64 - e).powi(2) / e)
            .sum();
        assert!(chi2 < 13.8, "chi2 {chi2}, counts {counts:?}");
    }

    #[test]
    fn empty_category_stays_silent() {
        let mut state = FeedbackState::default();
        let mut rules = FeedbackRules::default();
        rules.blue.messages.clear();
        let mut r = rng();

        let _ = step(&mut state, &rules, 6.0, 6.0, 0.0, &mut r);
        let fb = step(&mut state, &rules, 6.0, 6.0, 3.0, &mut r);
        assert_eq!(fb.audio_text, "");
        assert_eq!(fb.visual_text, "Wachten...");
        assert_eq!(fb.color, "accent");
    }
}
