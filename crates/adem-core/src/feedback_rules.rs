//! Coaching-message rule documents.
//!
//! A single stored document holds the five message categories plus timing
//! settings. The built-in defaults below are the shipped Dutch rule set and
//! double as the fallback when storage has no rules document yet.

use serde::{Deserialize, Serialize};

/// Feedback category. `Blue` is the settle-in phase right after a target
/// change; the others grade the deviation of actual vs target rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Blue,
    Green,
    Orange,
    RedFast,
    RedSlow,
}

impl Category {
    /// Client-facing color code for this category.
    pub fn color(self) -> &'static str {
        match self {
            Self::Blue => "accent",
            Self::Green => "ok",
            Self::Orange => "warn",
            Self::RedFast | Self::RedSlow => "bad",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub weight: u32,
    pub text: String,
    pub audio_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackCategory {
    #[serde(default)]
    pub messages: Vec<FeedbackMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSettings {
    /// Seconds a category must persist before it may be spoken.
    #[serde(default = "default_stability")]
    pub stability_duration: f64,
    /// Minimum seconds between repeated spoken messages of one category.
    #[serde(default = "default_interval")]
    pub repeat_interval: f64,
    /// Minimum seconds between visual-only refreshes.
    #[serde(default = "default_interval")]
    pub visual_interval: f64,
}

fn default_stability() -> f64 {
    3.0
}

fn default_interval() -> f64 {
    7.0
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            stability_duration: default_stability(),
            repeat_interval: default_interval(),
            visual_interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRules {
    #[serde(default)]
    pub blue: FeedbackCategory,
    #[serde(default)]
    pub green: FeedbackCategory,
    #[serde(default)]
    pub orange: FeedbackCategory,
    #[serde(default)]
    pub red_fast: FeedbackCategory,
    #[serde(default)]
    pub red_slow: FeedbackCategory,
    #[serde(default)]
    pub settings: FeedbackSettings,
}

impl FeedbackRules {
    pub fn category(&self, category: Category) -> &FeedbackCategory {
        match category {
            Category::Blue => &self.blue,
            Category::Green => &self.green,
            Category::Orange => &self.orange,
            Category::RedFast => &self.red_fast,
            Category::RedSlow => &self.red_slow,
        }
    }

    /// Seconds of settle-in time before deviation grading starts.
    pub fn blue_threshold_sec(&self) -> f64 {
        self.blue.threshold_sec.unwrap_or(30.0)
    }

    pub fn green_threshold_pct(&self) -> f64 {
        self.green.threshold_pct.unwrap_or(5.0)
    }

    pub fn orange_threshold_pct(&self) -> f64 {
        self.orange.threshold_pct.unwrap_or(15.0)
    }
}

fn message(weight: u32, text: &str, audio_text: &str) -> FeedbackMessage {
    FeedbackMessage {
        weight,
        text: text.to_owned(),
        audio_text: audio_text.to_owned(),
    }
}

impl Default for FeedbackRules {
    fn default() -> Self {
        Self {
            blue: FeedbackCategory {
                messages: vec![message(
                    10,
                    "We gaan de volgende ademhaling samen doen...",
                    "We gaan de volgende ademhaling samen doen",
                )],
                threshold_sec: Some(30.0),
                threshold_pct: None,
            },
            green: FeedbackCategory {
                messages: vec![message(4, "Perfect ritme!", "Perfect ritme")],
                threshold_sec: None,
                threshold_pct: Some(5.0),
            },
            orange: FeedbackCategory {
                messages: vec![message(
                    5,
                    "Probeer het ritme weer op te pakken.",
                    "Probeer het ritme weer op te pakken",
                )],
                threshold_sec: None,
                threshold_pct: Some(15.0),
            },
            red_fast: FeedbackCategory {
                messages: vec![message(
                    10,
                    "Je ademt niet correct.",
                    "Je ademhaling is niet onder controlle. probeer dit weer op te pakken.",
                )],
                threshold_sec: None,
                threshold_pct: None,
            },
            red_slow: FeedbackCategory {
                messages: vec![message(
                    10,
                    "Je ademt niet correct.",
                    "Je ademhaling is niet onder controlle. probeer dit weer op te pakken.",
                )],
                threshold_sec: None,
                threshold_pct: None,
            },
            settings: FeedbackSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let rules = FeedbackRules::default();
        assert_eq!(rules.blue_threshold_sec(), 30.0);
        assert_eq!(rules.green_threshold_pct(), 5.0);
        assert_eq!(rules.orange_threshold_pct(), 15.0);
        assert_eq!(rules.settings.stability_duration, 3.0);
        assert_eq!(rules.settings.repeat_interval, 7.0);
    }

    #[test]
    fn category_colors() {
        assert_eq!(Category::Blue.color(), "accent");
        assert_eq!(Category::Green.color(), "ok");
        assert_eq!(Category::Orange.color(), "warn");
        assert_eq!(Category::RedFast.color(), "bad");
        assert_eq!(Category::RedSlow.color(), "bad");
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let rules: FeedbackRules = serde_json::from_str(
            r#"{"green":{"messages":[{"weight":1,"text":"ok","audio_text":"ok"}],"threshold_pct":8.0}}"#,
        )
        .unwrap();
        assert_eq!(rules.green_threshold_pct(), 8.0);
        assert_eq!(rules.blue_threshold_sec(), 30.0);
        assert!(rules.blue.messages.is_empty());
        assert_eq!(rules.settings.visual_interval, 7.0);
    }
}
