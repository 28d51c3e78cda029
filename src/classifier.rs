use serde::{Deserialize, Serialize};

use crate::types::{Blendshapes, Emotion, EmotionVerdict};

/// Decision thresholds. A channel must score strictly above its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub smile: f32,
    pub angry: f32,
    pub surprise: f32,
    pub blink: f32,
}

impl Thresholds {
    /// Blink 0.5, surprise 0.3.
    pub const VARIANT_A: Thresholds = Thresholds {
        smile: 0.4,
        angry: 0.4,
        surprise: 0.3,
        blink: 0.5,
    };

    /// Blink 0.6, surprise 0.4.
    pub const VARIANT_B: Thresholds = Thresholds {
        smile: 0.4,
        angry: 0.4,
        surprise: 0.4,
        blink: 0.6,
    };
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::VARIANT_A
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ThresholdPreset {
    A,
    B,
}

impl From<ThresholdPreset> for Thresholds {
    fn from(preset: ThresholdPreset) -> Self {
        match preset {
            ThresholdPreset::A => Thresholds::VARIANT_A,
            ThresholdPreset::B => Thresholds::VARIANT_B,
        }
    }
}

/// Maps blendshape scores to a single emotion. Rules are checked in a fixed
/// order and the first match wins.
#[derive(Debug, Clone, Default)]
pub struct EmotionClassifier {
    thresholds: Thresholds,
}

impl EmotionClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, blendshapes: &Blendshapes) -> EmotionVerdict {
        let avg = |a: &str, b: &str| (blendshapes.score(a) + blendshapes.score(b)) / 2.0;

        let smile = avg("mouthSmileLeft", "mouthSmileRight");
        let angry = avg("browDownLeft", "browDownRight");
        let surprise = avg("browInnerUp", "jawOpen");
        let blink = avg("eyeBlinkLeft", "eyeBlinkRight");

        let t = &self.thresholds;
        if blink > t.blink {
            EmotionVerdict::new(Emotion::Sleepy, blink)
        } else if smile > t.smile {
            EmotionVerdict::new(Emotion::Happy, smile)
        } else if angry > t.angry {
            EmotionVerdict::new(Emotion::Angry, angry)
        } else if surprise > t.surprise {
            EmotionVerdict::new(Emotion::Surprised, surprise)
        } else {
            EmotionVerdict::new(Emotion::Neutral, 1.0 - (smile + angry + surprise))
        }
    }

    /// A face without a blendshape set is Neutral with no confidence.
    pub fn classify_optional(&self, blendshapes: Option<&Blendshapes>) -> EmotionVerdict {
        match blendshapes {
            Some(set) => self.classify(set),
            None => EmotionVerdict::new(Emotion::Neutral, 0.0),
        }
    }
}
