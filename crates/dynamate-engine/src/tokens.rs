//! Context-size estimation. A character heuristic: four characters per token,
//! rounded up. Only used to decide when to compact, never for billing.

use dynamate_core::messages::Message;

pub fn estimate_text_tokens(text: &str) -> u32 {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    chars.div_ceil(4)
}

/// Content plus, for tool-call turns, each tool name and raw argument text.
pub fn estimate_message_tokens(msg: &Message) -> u32 {
    estimate_text_tokens(&msg.measured_text())
}

pub fn estimate_conversation_tokens(messages: &[Message]) -> u32 {
    messages
        .iter()
        .map(estimate_message_tokens)
        .fold(0u32, u32::saturating_add)
}
