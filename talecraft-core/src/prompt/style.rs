//! Literary styles and their prose directives.

use serde::{Deserialize, Serialize};

/// Closed set of prose styles a session can be created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteraryStyle {
    DelicatePsychological,
    #[default]
    Literary,
    Casual,
    Dramatic,
    Poetic,
    Thriller,
}

impl LiteraryStyle {
    /// Parse the wire identifier (e.g. `"delicate_psychological"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delicate_psychological" => Some(Self::DelicatePsychological),
            "literary" => Some(Self::Literary),
            "casual" => Some(Self::Casual),
            "dramatic" => Some(Self::Dramatic),
            "poetic" => Some(Self::Poetic),
            "thriller" => Some(Self::Thriller),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DelicatePsychological => "delicate_psychological",
            Self::Literary => "literary",
            Self::Casual => "casual",
            Self::Dramatic => "dramatic",
            Self::Poetic => "poetic",
            Self::Thriller => "thriller",
        }
    }

    /// The prose guidance injected into the system prompt.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::DelicatePsychological => {
                "Write with delicate psychological interiority: linger on \
                 perception, hesitation and unspoken feeling; let small \
                 gestures carry the weight of the scene."
            }
            Self::Literary => {
                "Write in a restrained literary register: precise imagery, \
                 measured rhythm, no purple prose; trust the reader."
            }
            Self::Casual => {
                "Write casually and conversationally: short sentences, \
                 contemporary diction, light humor where it fits."
            }
            Self::Dramatic => {
                "Write dramatically: high stakes, vivid conflict, strong \
                 scene beats that end on tension or reversal."
            }
            Self::Poetic => {
                "Write poetically: rich sensory imagery and metaphor, \
                 rhythmic phrasing, but keep events clear and concrete."
            }
            Self::Thriller => {
                "Write like a thriller: momentum above all, clipped \
                 sentences under pressure, danger always one step closer."
            }
        }
    }
}
