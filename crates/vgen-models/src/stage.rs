//! Pipeline stage definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One named step of the generation pipeline, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Script,
    Terms,
    Audio,
    Subtitle,
    Materials,
    /// Combines materials, narration and subtitles into the final videos.
    #[serde(alias = "video")]
    Assemble,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Script,
        Stage::Terms,
        Stage::Audio,
        Stage::Subtitle,
        Stage::Materials,
        Stage::Assemble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Terms => "terms",
            Stage::Audio => "audio",
            Stage::Subtitle => "subtitle",
            Stage::Materials => "materials",
            Stage::Assemble => "assemble",
        }
    }

    /// Progress reported once this stage has finished.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Stage::Script => 10,
            Stage::Terms => 20,
            Stage::Audio => 30,
            Stage::Subtitle => 40,
            Stage::Materials => 50,
            Stage::Assemble => 100,
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        let pos = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(pos + 1).copied()
    }

    pub fn is_last(&self) -> bool {
        matches!(self, Stage::Assemble)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stage name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pipeline stage: {0}")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" => Ok(Stage::Script),
            "terms" => Ok(Stage::Terms),
            "audio" => Ok(Stage::Audio),
            "subtitle" => Ok(Stage::Subtitle),
            "materials" => Ok(Stage::Materials),
            "assemble" | "video" => Ok(Stage::Assemble),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Script < Stage::Terms);
        assert!(Stage::Materials < Stage::Assemble);
        assert_eq!(Stage::Audio.next(), Some(Stage::Subtitle));
        assert_eq!(Stage::Assemble.next(), None);
    }

    #[test]
    fn test_parse_stage() {
        assert_eq!("Audio".parse::<Stage>().unwrap(), Stage::Audio);
        assert_eq!("video".parse::<Stage>().unwrap(), Stage::Assemble);
        assert!("render".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_alias() {
        let stage: Stage = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(stage, Stage::Assemble);
        assert_eq!(serde_json::to_string(&Stage::Terms).unwrap(), "\"terms\"");
    }

    #[test]
    fn test_checkpoints_increase() {
        let checkpoints: Vec<u8> = Stage::ALL.iter().map(Stage::checkpoint).collect();
        assert!(checkpoints.windows(2).all(|w| w[0] < w[1]));
    }
}
