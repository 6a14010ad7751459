use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::error::AppError;

/// Kind of user interaction with a post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Save,
    Rate,
    Comment,
}

impl InteractionType {
    /// Base contribution of one interaction to each touched tag
    pub fn base_weight(self) -> f64 {
        match self {
            InteractionType::View => 1.0,
            InteractionType::Save => 3.0,
            InteractionType::Rate => 5.0,
            InteractionType::Comment => 2.0,
        }
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InteractionType::View => "view",
            InteractionType::Save => "save",
            InteractionType::Rate => "rate",
            InteractionType::Comment => "comment",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for InteractionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(InteractionType::View),
            "save" => Ok(InteractionType::Save),
            "rate" => Ok(InteractionType::Rate),
            "comment" => Ok(InteractionType::Comment),
            other => Err(AppError::InvalidInput(format!(
                "Unknown interaction type: {}",
                other
            ))),
        }
    }
}

/// One interaction delivered by the interaction feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    pub user_id: String,
    pub tags: Vec<String>,
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub rating: Option<f64>,
}
