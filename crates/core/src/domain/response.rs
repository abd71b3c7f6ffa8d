use serde::{Deserialize, Serialize};

use crate::domain::conversation::ExtraInfoConversation;
use crate::errors::DomainError;

/// The canonical response shape every scenario output is mapped into before
/// leaving the core.
///
/// `base_random_keys` and `member_random_keys`, when present, carry at most
/// one element: the system returns a single resolved identity or none, never
/// a candidate set. Construct through [`NormalizedResponse::new`] to keep
/// that invariant checked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub message: Option<String>,
    pub base_random_keys: Option<Vec<String>>,
    pub member_random_keys: Option<Vec<String>>,
    pub finished: bool,
    pub extra_info: Option<ExtraInfoConversation>,
}

impl NormalizedResponse {
    pub fn new(
        message: Option<String>,
        base_random_keys: Option<Vec<String>>,
        member_random_keys: Option<Vec<String>>,
        finished: bool,
    ) -> Result<Self, DomainError> {
        if let Some(keys) = &base_random_keys {
            if keys.len() > 1 {
                return Err(DomainError::TooManyKeys {
                    field: "base_random_keys",
                    len: keys.len(),
                });
            }
        }
        if let Some(keys) = &member_random_keys {
            if keys.len() > 1 {
                return Err(DomainError::TooManyKeys {
                    field: "member_random_keys",
                    len: keys.len(),
                });
            }
        }
        Ok(Self { message, base_random_keys, member_random_keys, finished, extra_info: None })
    }

    pub fn message_only(message: impl Into<String>, finished: bool) -> Self {
        Self { message: Some(message.into()), finished, ..Self::default() }
    }

    /// The orchestrator's uniform error shape: no exception ever crosses the
    /// outward boundary.
    pub fn error(details: impl std::fmt::Display) -> Self {
        Self {
            message: Some(format!("-- ERROR: {details}")),
            base_random_keys: None,
            member_random_keys: None,
            finished: true,
            extra_info: None,
        }
    }

    pub fn with_extra_info(mut self, extra_info: Option<ExtraInfoConversation>) -> Self {
        self.extra_info = extra_info;
        self
    }
}

/// What actually leaves the HTTP boundary. `finished` and `extra_info` are
/// internal: non-finalized turns surface null key lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub message: Option<String>,
    pub base_random_keys: Option<Vec<String>>,
    pub member_random_keys: Option<Vec<String>>,
}

impl From<NormalizedResponse> for WireResponse {
    fn from(response: NormalizedResponse) -> Self {
        if response.finished {
            Self {
                message: response.message,
                base_random_keys: response.base_random_keys,
                member_random_keys: response.member_random_keys,
            }
        } else {
            Self { message: response.message, base_random_keys: None, member_random_keys: None }
        }
    }
}
