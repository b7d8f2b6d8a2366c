//! Tone selection: maps an ask-time selector to a style instruction.
//!
//! Selectors arrive either as strings (`"formal"`, `"default"`, `"12"`) or
//! as the legacy integers still sent by older clients (`-1` concise, `-2`
//! mirror the source style, positive ids are personas). Resolution never
//! fails: unknown selectors, missing personas and store faults all fall
//! back to [`DEFAULT_STYLE`].

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::store::Store;

pub const CONCISE_EXPERT: &str =
    "Answer concisely and clearly, like an expert explaining to a colleague.";
pub const MIRROR_SOURCE_STYLE: &str = "Study the writing style of the blog context below and \
     answer in a tone as close to it as possible.";
pub const FORMAL: &str = "Answer in a formal, polite register.";
pub const CASUAL: &str = "Answer in a relaxed, friendly, conversational register.";
pub const REGIONAL_DIALECT: &str =
    "Answer in a warm regional dialect while keeping every fact exact.";
pub const DEFER_TO_CONTENT: &str = "No tone was requested. Let the retrieved posts decide the \
     register of your answer.";

/// Style used when nothing else resolves.
pub const DEFAULT_STYLE: &str = CONCISE_EXPERT;

/// Ask-time tone choice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToneSelector {
    /// The literal `"default"`: let the retrieved content set the style.
    DeferToContent,
    #[default]
    ConciseExpert,
    MirrorSourceStyle,
    Formal,
    Casual,
    RegionalDialect,
    /// A stored persona owned by the asking user.
    Persona(i64),
    /// Anything else; resolves to [`DEFAULT_STYLE`].
    Unrecognized(String),
}

impl ToneSelector {
    /// Map a legacy numeric selector.
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => Self::ConciseExpert,
            -2 => Self::MirrorSourceStyle,
            id if id > 0 => Self::Persona(id),
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Instruction for built-in styles; `None` for personas.
    pub fn builtin_instruction(&self) -> Option<&'static str> {
        match self {
            Self::DeferToContent => Some(DEFER_TO_CONTENT),
            Self::ConciseExpert => Some(CONCISE_EXPERT),
            Self::MirrorSourceStyle => Some(MIRROR_SOURCE_STYLE),
            Self::Formal => Some(FORMAL),
            Self::Casual => Some(CASUAL),
            Self::RegionalDialect => Some(REGIONAL_DIALECT),
            Self::Unrecognized(_) => Some(DEFAULT_STYLE),
            Self::Persona(_) => None,
        }
    }
}

impl FromStr for ToneSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.to_ascii_lowercase().as_str() {
            "default" => Self::DeferToContent,
            "concise-expert" | "concise" => Self::ConciseExpert,
            "mirror-source-style" | "mirror" => Self::MirrorSourceStyle,
            "formal" => Self::Formal,
            "casual" => Self::Casual,
            "regional-dialect" | "dialect" => Self::RegionalDialect,
            _ => match s.parse::<i64>() {
                Ok(code) => Self::from_code(code),
                Err(_) => Self::Unrecognized(s.to_string()),
            },
        })
    }
}

impl fmt::Display for ToneSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeferToContent => write!(f, "default"),
            Self::ConciseExpert => write!(f, "concise-expert"),
            Self::MirrorSourceStyle => write!(f, "mirror-source-style"),
            Self::Formal => write!(f, "formal"),
            Self::Casual => write!(f, "casual"),
            Self::RegionalDialect => write!(f, "regional-dialect"),
            Self::Persona(id) => write!(f, "persona:{}", id),
            Self::Unrecognized(raw) => write!(f, "unrecognized:{}", raw),
        }
    }
}

impl<'de> Deserialize<'de> for ToneSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Self::from_code(code),
            Raw::Name(name) => name.parse().unwrap_or_default(),
        })
    }
}

/// Resolve a selector to a style instruction.
pub async fn resolve_tone<S: Store + ?Sized>(
    store: &S,
    user_id: &str,
    selector: &ToneSelector,
) -> String {
    let persona_id = match selector {
        ToneSelector::Persona(id) => *id,
        ToneSelector::Unrecognized(raw) => {
            tracing::warn!(selector = %raw, "unrecognized tone selector, using default style");
            return DEFAULT_STYLE.to_string();
        }
        builtin => {
            return builtin
                .builtin_instruction()
                .unwrap_or(DEFAULT_STYLE)
                .to_string()
        }
    };

    match store.find_persona(persona_id, user_id).await {
        Ok(Some(persona)) => format!("{}: {}", persona.name, persona.description),
        Ok(None) => {
            tracing::info!(persona_id, user_id, "persona not found, using default style");
            DEFAULT_STYLE.to_string()
        }
        Err(e) => {
            tracing::warn!(persona_id, user_id, error = %e, "persona lookup failed, using default style");
            DEFAULT_STYLE.to_string()
        }
    }
}
