use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A mood preset.  Each mood maps to a fixed generation prompt and a
/// display label; the set is defined at compile time and never changes
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mood {
    CalmFocus,
    EnergeticMorning,
    RelaxingNight,
    CafeVibe,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mood: {0}")]
pub struct UnknownMood(pub String);

impl Mood {
    pub const ALL: [Mood; 4] = [
        Mood::CalmFocus,
        Mood::EnergeticMorning,
        Mood::RelaxingNight,
        Mood::CafeVibe,
    ];

    /// Stable identifier used in the HTTP API and config.
    pub fn slug(&self) -> &'static str {
        match self {
            Mood::CalmFocus => "calm-focus",
            Mood::EnergeticMorning => "energetic-morning",
            Mood::RelaxingNight => "relaxing-night",
            Mood::CafeVibe => "cafe-vibe",
        }
    }

    /// Human-readable name for status lines and selection UIs.
    pub fn label(&self) -> &'static str {
        match self {
            Mood::CalmFocus => "Calm Focus",
            Mood::EnergeticMorning => "Energetic Morning",
            Mood::RelaxingNight => "Relaxing Night",
            Mood::CafeVibe => "Café Vibe",
        }
    }

    /// Prompt text sent to the generation model.  Tuned for an
    /// instrumental text-to-music model; refine against real output.
    pub fn prompt(&self) -> &'static str {
        match self {
            Mood::CalmFocus => {
                "instrumental, lofi hip hop, calm, focus, study beats, low tempo, \
                 no vocals, simple bassline, soft drums, 70 bpm"
            }
            Mood::EnergeticMorning => {
                "upbeat instrumental, acoustic guitar, light percussion, positive energy, \
                 morning vibe, walking tempo, happy melody, 110 bpm"
            }
            Mood::RelaxingNight => {
                "ambient music, relaxing, sleep, calm, synthesizer pads, slow tempo, \
                 minimal, atmospheric, 60 bpm"
            }
            Mood::CafeVibe => {
                "jazz hop, cafe ambience, instrumental, relaxed, coffee shop background \
                 music, moderate tempo, saxophone hints, 85 bpm"
            }
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .iter()
            .copied()
            .find(|m| m.slug() == s)
            .ok_or_else(|| UnknownMood(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip() {
        for mood in Mood::ALL {
            assert_eq!(mood.slug().parse::<Mood>().unwrap(), mood);
        }
    }

    #[test]
    fn test_unknown_slug_is_rejected() {
        let err = "melancholy-dusk".parse::<Mood>().unwrap_err();
        assert_eq!(err, UnknownMood("melancholy-dusk".to_string()));
    }

    #[test]
    fn test_every_mood_has_prompt_and_label() {
        for mood in Mood::ALL {
            assert!(!mood.prompt().is_empty());
            assert!(!mood.label().is_empty());
        }
    }

    #[test]
    fn test_serde_uses_kebab_case_slug() {
        let json = serde_json::to_string(&Mood::CalmFocus).unwrap();
        assert_eq!(json, "\"calm-focus\"");
        let back: Mood = serde_json::from_str("\"cafe-vibe\"").unwrap();
        assert_eq!(back, Mood::CafeVibe);
    }
}
