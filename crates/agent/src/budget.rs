//! Per-request usage accounting. Every model round trip, tool invocation,
//! and output token is counted against fixed ceilings; crossing any of them
//! aborts the request through the orchestrator's error boundary.

use std::sync::atomic::{AtomicU32, Ordering};

use dastyar_core::config::BudgetConfig;
use dastyar_core::errors::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageBudget {
    pub request_limit: u32,
    pub tool_call_limit: u32,
    pub output_token_limit: u32,
}

impl From<&BudgetConfig> for UsageBudget {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            request_limit: config.request_limit,
            tool_call_limit: config.tool_call_limit,
            output_token_limit: config.output_token_limit,
        }
    }
}

/// Mutable counters for a single inbound chat request. Shared across the
/// classifier, scenario agent, and tool loop of that request.
pub struct UsageMeter {
    budget: UsageBudget,
    requests: AtomicU32,
    tool_calls: AtomicU32,
    output_tokens: AtomicU32,
}

impl UsageMeter {
    pub fn new(budget: UsageBudget) -> Self {
        Self {
            budget,
            requests: AtomicU32::new(0),
            tool_calls: AtomicU32::new(0),
            output_tokens: AtomicU32::new(0),
        }
    }

    pub fn record_request(&self) -> Result<(), AgentError> {
        let used = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if used > self.budget.request_limit {
            return Err(AgentError::BudgetExceeded(format!(
                "model request limit {} reached",
                self.budget.request_limit
            )));
        }
        Ok(())
    }

    pub fn record_tool_call(&self) -> Result<(), AgentError> {
        let used = self.tool_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if used > self.budget.tool_call_limit {
            return Err(AgentError::BudgetExceeded(format!(
                "tool call limit {} reached",
                self.budget.tool_call_limit
            )));
        }
        Ok(())
    }

    pub fn record_output_tokens(&self, tokens: u32) -> Result<(), AgentError> {
        let used = self.output_tokens.fetch_add(tokens, Ordering::SeqCst) + tokens;
        if used > self.budget.output_token_limit {
            return Err(AgentError::BudgetExceeded(format!(
                "output token limit {} reached",
                self.budget.output_token_limit
            )));
        }
        Ok(())
    }

    pub fn requests_used(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn tool_calls_used(&self) -> u32 {
        self.tool_calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use dastyar_core::errors::AgentError;

    use super::{UsageBudget, UsageMeter};

    fn tiny_budget() -> UsageBudget {
        UsageBudget { request_limit: 2, tool_call_limit: 1, output_token_limit: 100 }
    }

    #[test]
    fn requests_beyond_the_limit_are_rejected() {
        let meter = UsageMeter::new(tiny_budget());
        assert!(meter.record_request().is_ok());
        assert!(meter.record_request().is_ok());
        let error = meter.record_request().unwrap_err();
        assert!(matches!(error, AgentError::BudgetExceeded(_)));
    }

    #[test]
    fn token_accounting_is_cumulative() {
        let meter = UsageMeter::new(tiny_budget());
        assert!(meter.record_output_tokens(60).is_ok());
        assert!(meter.record_output_tokens(41).is_err());
    }

    #[test]
    fn budget_exceeded_is_not_locally_recoverable() {
        let meter = UsageMeter::new(tiny_budget());
        meter.record_tool_call().expect("first");
        let error = meter.record_tool_call().unwrap_err();
        assert!(!error.is_recoverable());
    }
}
