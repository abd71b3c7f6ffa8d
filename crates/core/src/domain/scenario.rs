use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// The classified category of a user request. Fixed once assigned for a
/// single-shot turn; forced to `Conversation` for every turn after the first
/// in a multi-turn exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioLabel {
    ProductSearch,
    ProductFeature,
    NumericValue,
    ProductsCompare,
    Conversation,
    ImageTopic,
    ImageSearch,
}

impl ScenarioLabel {
    /// The five labels the text classifier may emit. Image requests use a
    /// separate two-way classifier over `ImageTopic`/`ImageSearch`.
    pub const TEXT_LABELS: [ScenarioLabel; 5] = [
        Self::ProductSearch,
        Self::ProductFeature,
        Self::NumericValue,
        Self::ProductsCompare,
        Self::Conversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductSearch => "PRODUCT_SEARCH",
            Self::ProductFeature => "PRODUCT_FEATURE",
            Self::NumericValue => "NUMERIC_VALUE",
            Self::ProductsCompare => "PRODUCTS_COMPARE",
            Self::Conversation => "CONVERSATION",
            Self::ImageTopic => "IMAGE_TOPIC",
            Self::ImageSearch => "IMAGE_SEARCH",
        }
    }

    pub fn is_conversation(&self) -> bool {
        matches!(self, Self::Conversation)
    }
}

impl std::fmt::Display for ScenarioLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScenarioLabel {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "PRODUCT_SEARCH" => Ok(Self::ProductSearch),
            "PRODUCT_FEATURE" => Ok(Self::ProductFeature),
            "NUMERIC_VALUE" => Ok(Self::NumericValue),
            "PRODUCTS_COMPARE" => Ok(Self::ProductsCompare),
            "CONVERSATION" => Ok(Self::Conversation),
            "IMAGE_TOPIC" => Ok(Self::ImageTopic),
            "IMAGE_SEARCH" => Ok(Self::ImageSearch),
            other => Err(DomainError::UnknownScenarioLabel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScenarioLabel;
    use crate::errors::DomainError;

    #[test]
    fn round_trips_every_wire_label() {
        for label in [
            ScenarioLabel::ProductSearch,
            ScenarioLabel::ProductFeature,
            ScenarioLabel::NumericValue,
            ScenarioLabel::ProductsCompare,
            ScenarioLabel::Conversation,
            ScenarioLabel::ImageTopic,
            ScenarioLabel::ImageSearch,
        ] {
            let parsed: ScenarioLabel = label.as_str().parse().expect("known label");
            assert_eq!(parsed, label);
        }
    }

    #[test]
    fn out_of_set_label_is_a_hard_error() {
        let error = "SHOPPING_HELP".parse::<ScenarioLabel>().unwrap_err();
        assert_eq!(error, DomainError::UnknownScenarioLabel("SHOPPING_HELP".to_string()));
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ScenarioLabel::ProductsCompare).expect("serialize");
        assert_eq!(json, "\"PRODUCTS_COMPARE\"");
    }
}
