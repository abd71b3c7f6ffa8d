//! Mapping from heterogeneous scenario outcomes to the canonical response
//! shape. Total over [`AgentOutcome`]: every arm produces a response, and
//! over-long key lists are clamped to their first element rather than
//! rejected, since the model occasionally pads a second key.

use dastyar_core::NormalizedResponse;

use crate::scenarios::AgentOutcome;

/// Render a numeric answer as a float-parseable string. Fractional values
/// keep their full precision, padded to at least three decimals; exact zero
/// renders as the bare `"0"`.
pub fn format_numeric(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        let rendered = format!("{value}");
        match rendered.split_once('.') {
            Some((whole, frac)) if frac.len() < 3 => format!("{whole}.{frac:0<3}"),
            _ => rendered,
        }
    }
}

fn clamp_keys(keys: Option<Vec<String>>) -> Option<Vec<String>> {
    keys.map(|mut list| {
        list.truncate(1);
        list
    })
    .filter(|list| !list.is_empty())
}

pub fn normalize(outcome: AgentOutcome) -> NormalizedResponse {
    match outcome {
        AgentOutcome::Shopping { message, base_random_keys, member_random_keys, finished } => {
            NormalizedResponse {
                message,
                base_random_keys: clamp_keys(base_random_keys),
                member_random_keys: clamp_keys(member_random_keys),
                finished,
                extra_info: None,
            }
        }
        AgentOutcome::Compare { message, base_random_keys } => NormalizedResponse {
            message,
            base_random_keys: clamp_keys(base_random_keys),
            member_random_keys: None,
            finished: true,
            extra_info: None,
        },
        AgentOutcome::Numeric { value } => {
            NormalizedResponse::message_only(format_numeric(value), true)
        }
        AgentOutcome::Image { main_topic } => NormalizedResponse {
            message: main_topic,
            base_random_keys: None,
            member_random_keys: None,
            finished: true,
            extra_info: None,
        },
        AgentOutcome::Conversation { message, member_random_keys, finished, extra_info } => {
            NormalizedResponse {
                message,
                base_random_keys: None,
                member_random_keys: clamp_keys(member_random_keys),
                finished,
                ..NormalizedResponse::default()
            }
            .with_extra_info(extra_info)
        }
        AgentOutcome::Classification { label } => {
            NormalizedResponse::message_only(label.as_str(), true)
        }
        AgentOutcome::Raw(text) => NormalizedResponse::message_only(text, true),
    }
}
