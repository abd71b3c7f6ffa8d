use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DomainError;

/// Hard ceiling on turns within one conversation identity. Turn 5 must
/// finalize unconditionally.
pub const MAX_TURNS: u8 = 5;

/// How many prior turns are replayed into the prompt.
pub const HISTORY_LIMIT: usize = 4;

const IGNORE_SENTINEL: &str = "ignore";

/// Tri-state constraint field. `Unset` means "ask the user", `Ignore` means
/// "user does not care, never ask again", `Value` is a concrete answer.
/// Wire form: null / `"ignore"` / the value itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Constraint<T> {
    #[default]
    Unset,
    Ignore,
    Value(T),
}

impl<T> Constraint<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(inner) => Some(inner),
            _ => None,
        }
    }
}

impl<T: Serialize> Serialize for Constraint<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unset => serializer.serialize_none(),
            Self::Ignore => serializer.serialize_str(IGNORE_SENTINEL),
            Self::Value(inner) => inner.serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Constraint<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::Null => Ok(Self::Unset),
            serde_json::Value::String(ref s) if s == IGNORE_SENTINEL => Ok(Self::Ignore),
            other => serde_json::from_value(other).map(Self::Value).map_err(serde::de::Error::custom),
        }
    }
}

/// Inclusive price bounds in rials; either side may be open.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Accumulated constraint state carried across the turns of one
/// conversation. Warranty, score, city, brand, and price range are fixed on
/// first assignment; product name and features may be refined turn over turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraInfoConversation {
    pub has_warranty: Constraint<bool>,
    pub score: Constraint<f64>,
    pub city_name: Constraint<String>,
    pub brand_title: Constraint<String>,
    pub price_range: Constraint<PriceRange>,
    pub product_name: Constraint<String>,
    pub product_features: Constraint<String>,
}

impl ExtraInfoConversation {
    /// Merge newly stated constraints into the accumulated state.
    ///
    /// Not-changeable fields accept an incoming value only while the current
    /// slot is not a concrete value; a concrete value is never silently
    /// replaced. Updateable fields take any non-unset incoming value.
    pub fn merge(&mut self, incoming: &ExtraInfoConversation) {
        merge_fixed(&mut self.has_warranty, &incoming.has_warranty);
        merge_fixed(&mut self.score, &incoming.score);
        merge_fixed(&mut self.city_name, &incoming.city_name);
        merge_fixed(&mut self.brand_title, &incoming.brand_title);
        merge_fixed(&mut self.price_range, &incoming.price_range);
        merge_updateable(&mut self.product_name, &incoming.product_name);
        merge_updateable(&mut self.product_features, &incoming.product_features);
    }

    /// Field names still awaiting an answer, in the order the assistant asks
    /// about them.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.product_name.is_unset() {
            missing.push("product_name");
        }
        if self.price_range.is_unset() {
            missing.push("price_range");
        }
        if self.city_name.is_unset() {
            missing.push("city_name");
        }
        if self.has_warranty.is_unset() {
            missing.push("has_warranty");
        }
        if self.score.is_unset() {
            missing.push("score");
        }
        if self.product_features.is_unset() {
            missing.push("product_features");
        }
        if self.brand_title.is_unset() {
            missing.push("brand_title");
        }
        missing
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn merge_fixed<T: Clone>(current: &mut Constraint<T>, incoming: &Constraint<T>) {
    match (&current, incoming) {
        (Constraint::Value(_), _) => {}
        (_, Constraint::Unset) => {}
        _ => *current = incoming.clone(),
    }
}

fn merge_updateable<T: Clone>(current: &mut Constraint<T>, incoming: &Constraint<T>) {
    if !incoming.is_unset() {
        *current = incoming.clone();
    }
}

/// One persisted user/assistant exchange. Created once per turn, never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub base_id: String,
    pub turn_index: u8,
    pub user_message: String,
    pub user_image: Option<String>,
    pub response_message: Option<String>,
    pub response_base_key: Option<String>,
    pub response_member_key: Option<String>,
    pub finished: bool,
    pub extra_state: Option<ExtraInfoConversation>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.turn_index == 0 || self.turn_index > MAX_TURNS {
            return Err(DomainError::TurnIndexOutOfRange(self.turn_index));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Constraint, ExtraInfoConversation, PriceRange};

    fn with_city(city: &str) -> ExtraInfoConversation {
        ExtraInfoConversation {
            city_name: Constraint::Value(city.to_string()),
            ..ExtraInfoConversation::default()
        }
    }

    #[test]
    fn fixed_field_is_set_once_and_never_replaced() {
        let mut state = ExtraInfoConversation::default();
        state.merge(&with_city("تهران"));
        assert_eq!(state.city_name.value().map(String::as_str), Some("تهران"));

        state.merge(&with_city("مشهد"));
        assert_eq!(state.city_name.value().map(String::as_str), Some("تهران"));
    }

    #[test]
    fn ignore_is_distinct_from_unset_and_upgradeable_to_a_value() {
        let mut state = ExtraInfoConversation {
            has_warranty: Constraint::Ignore,
            ..ExtraInfoConversation::default()
        };
        assert!(!state.missing_fields().contains(&"has_warranty"));

        state.merge(&ExtraInfoConversation {
            has_warranty: Constraint::Value(true),
            ..ExtraInfoConversation::default()
        });
        assert_eq!(state.has_warranty.value(), Some(&true));
    }

    #[test]
    fn updateable_fields_overwrite_turn_over_turn() {
        let mut state = ExtraInfoConversation {
            product_name: Constraint::Value("میز".to_string()),
            ..ExtraInfoConversation::default()
        };
        state.merge(&ExtraInfoConversation {
            product_name: Constraint::Value("میز تحریر چوبی".to_string()),
            ..ExtraInfoConversation::default()
        });
        assert_eq!(state.product_name.value().map(String::as_str), Some("میز تحریر چوبی"));
    }

    #[test]
    fn unset_incoming_never_clears_existing_state() {
        let mut state = with_city("تهران");
        state.product_features = Constraint::Value("چوبی".to_string());
        state.merge(&ExtraInfoConversation::default());
        assert_eq!(state.city_name.value().map(String::as_str), Some("تهران"));
        assert_eq!(state.product_features.value().map(String::as_str), Some("چوبی"));
    }

    #[test]
    fn missing_fields_lists_every_unset_slot_in_ask_order() {
        let missing = ExtraInfoConversation::default().missing_fields();
        assert_eq!(
            missing,
            vec![
                "product_name",
                "price_range",
                "city_name",
                "has_warranty",
                "score",
                "product_features",
                "brand_title"
            ]
        );
    }

    #[test]
    fn serde_round_trips_the_ignore_sentinel() {
        let state = ExtraInfoConversation {
            has_warranty: Constraint::Ignore,
            price_range: Constraint::Value(PriceRange { min: Some(100_000), max: None }),
            ..ExtraInfoConversation::default()
        };
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["has_warranty"], serde_json::json!("ignore"));
        assert_eq!(json["city_name"], serde_json::Value::Null);

        let back: ExtraInfoConversation = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
