use async_trait::async_trait;
use coop_a2a::Delegator;
use coop_core::{CoopResult, Tool, ToolCall, ToolDescriptor, ToolResult};
use std::sync::Arc;

/// Delegates creative work to the marketing peer agent.
pub struct ConsultTool {
    descriptor: ToolDescriptor,
    delegator: Arc<Delegator>,
}

impl ConsultTool {
    /// Expose `delegator` as `consult_marketing_expert`.
    pub fn new(delegator: Arc<Delegator>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "consult_marketing_expert",
                "Consult the Marketing Expert agent to generate creative content. \
                 Describe the situation in `context` and what you want in `goal`.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "context": {
                            "type": "string",
                            "description": "The situation (e.g., '50 units of Chicken Breast expiring tomorrow at Store X')"
                        },
                        "goal": {
                            "type": "string",
                            "description": "What the expert should do (e.g., 'Write a tweet to sell this fast')"
                        }
                    },
                    "required": ["context", "goal"]
                }),
            ),
            delegator,
        }
    }
}

#[async_trait]
impl Tool for ConsultTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall) -> CoopResult<ToolResult> {
        let context = call.arguments["context"].as_str().unwrap_or("");
        let goal = call.arguments["goal"].as_str().unwrap_or("");
        let text = self.delegator.consult(context, goal).await;
        if text.starts_with("Error") {
            Ok(ToolResult::error(&call.id, text))
        } else {
            Ok(ToolResult::success(&call.id, text))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use coop_a2a::{Message, PeerAgent};
    use serde_json::json;

    struct Shouty;

    #[async_trait]
    impl PeerAgent for Shouty {
        fn name(&self) -> &str {
            "shouty"
        }

        async fn send(&self, message: Message) -> CoopResult<Option<String>> {
            Ok(message.first_text().map(str::to_uppercase))
        }
    }

    fn tool() -> ConsultTool {
        ConsultTool::new(Arc::new(Delegator::new(Arc::new(Shouty))))
    }

    #[tokio::test]
    async fn test_consult_success() {
        let result = tool()
            .execute(ToolCall::new(
                "consult_marketing_expert",
                json!({"context": "thighs", "goal": "tweet"}),
            ))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.starts_with("CONTEXT: THIGHS\nGOAL: TWEET\n\n[Post to Twitter]"));
    }

    #[tokio::test]
    async fn test_consult_missing_goal_is_error_result() {
        let result = tool()
            .execute(ToolCall::new("consult_marketing_expert", json!({"context": "thighs"})))
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
