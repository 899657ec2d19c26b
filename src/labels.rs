//! Mapping from model class indices to emotion names.
//!
//! The table order must match the class order the model was trained with.
//! Nothing in the model artifact records that order, so a mismatched table
//! produces plausible but wrong labels.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::ProbabilityDistribution;

/// Errors raised while resolving a class index to a label
#[derive(Debug, Clone, Error)]
pub enum UnknownClassError {
    #[error("Cannot resolve a label from an empty distribution")]
    EmptyDistribution,

    #[error("Class index {index} has no label (table has {table_len} entries)")]
    Index { index: usize, table_len: usize },
}

/// Emotion classes of the bundled label table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Calm,
    Happy,
    Sad,
}

impl EmotionLabel {
    /// In model class order
    pub const ALL: [EmotionLabel; 4] = [Self::Angry, Self::Calm, Self::Happy, Self::Sad];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angry => "Angry",
            Self::Calm => "Calm",
            Self::Happy => "Happy",
            Self::Sad => "Sad",
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmotionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "angry" => Ok(Self::Angry),
            "calm" => Ok(Self::Calm),
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            _ => Err(format!("Unknown emotion: {}", s)),
        }
    }
}

/// Class index to label name; the index is the position in the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Into::into).collect())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::from_names(EmotionLabel::ALL.iter().map(EmotionLabel::as_str))
    }
}

/// Pick the most probable class and look up its name.
///
/// Ties go to the lowest index.
pub fn resolve<'a>(
    distribution: &ProbabilityDistribution,
    table: &'a LabelTable,
) -> Result<(usize, &'a str), UnknownClassError> {
    let index = distribution
        .argmax()
        .ok_or(UnknownClassError::EmptyDistribution)?;
    let label = table.get(index).ok_or(UnknownClassError::Index {
        index,
        table_len: table.len(),
    })?;
    Ok((index, label))
}
