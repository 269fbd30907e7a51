//! Context compaction: above the token ceiling, older turns are replaced by a
//! model-written summary while the trailing logical block is kept verbatim.

use std::collections::HashSet;

use dynamate_core::errors::GatewayError;
use dynamate_core::messages::{Message, Role};
use dynamate_core::provider::{CompletionRequest, LlmProvider, ModelReply};
use dynamate_core::tokens::TokenUsage;
use dynamate_settings::ContextSettings;
use tracing::{info, instrument, warn};

use crate::tokens::estimate_conversation_tokens;

pub const SUMMARY_INSTRUCTION: &str = "Summarize the conversation concisely but fully.";
pub const SUMMARY_LABEL: &str = "[Conversation Summary]";

/// Start index of the trailing logical block of `messages`.
///
/// Scanning backward from the last message, the first rule that matches decides:
/// - a tool result pulls in everything back to the assistant turn that requested
///   it (and any earlier tool results in between);
/// - an assistant turn with tool calls starts the block;
/// - a plain assistant turn starts the block, together with a directly preceding
///   user turn;
/// - a user turn starts the block, together with a directly preceding assistant
///   turn;
/// - anything else (system turns) is included and the scan continues.
///
/// Returns 0 when the whole conversation is one block.
pub fn find_recent_block(messages: &[Message]) -> usize {
    let mut i = messages.len();
    while i > 0 {
        i -= 1;
        match &messages[i] {
            Message::Tool(_) => return tool_run_start(messages, i),
            Message::Assistant(m) if !m.tool_calls.is_empty() => return i,
            Message::Assistant(_) => {
                return match i.checked_sub(1) {
                    Some(prev) if messages[prev].role() == Role::User => prev,
                    _ => i,
                };
            }
            Message::User(_) => {
                return match i.checked_sub(1) {
                    Some(prev) if messages[prev].role() == Role::Assistant => prev,
                    _ => i,
                };
            }
            Message::System(_) => {}
        }
    }
    0
}

/// Walk back from the tool result at `end` until every tool result seen so far has
/// met the assistant turn that requested it.
fn tool_run_start(messages: &[Message], end: usize) -> usize {
    let mut pending = HashSet::new();
    let mut i = end + 1;
    while i > 0 {
        i -= 1;
        match &messages[i] {
            Message::Tool(t) => {
                pending.insert(t.tool_call_id.clone());
            }
            Message::Assistant(m) if !m.tool_calls.is_empty() => {
                for call in &m.tool_calls {
                    pending.remove(&call.id);
                }
                if pending.is_empty() {
                    return i;
                }
            }
            _ => {}
        }
    }
    0
}

/// A compacted conversation and what producing it cost.
#[derive(Clone, Debug)]
pub struct Compaction {
    pub messages: Vec<Message>,
    pub replaced: usize,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

#[derive(Clone, Debug)]
pub struct Compactor {
    settings: ContextSettings,
}

impl Compactor {
    pub fn new(settings: ContextSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Compaction is due when the estimate exceeds the ceiling and the conversation
    /// is longer than the configured minimum.
    pub fn should_compact(&self, messages: &[Message], estimate: u32) -> bool {
        estimate > self.settings.max_context_tokens
            && messages.len() > self.settings.min_messages_for_compaction
    }

    /// Summarize everything before the trailing block with one model call.
    /// `Ok(None)` when the history before the block is at most one message, since
    /// swapping it for a summary would not shorten the conversation.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn compact(
        &self,
        provider: &dyn LlmProvider,
        messages: &[Message],
        supports_system_messages: bool,
    ) -> Result<Option<Compaction>, GatewayError> {
        let start = find_recent_block(messages);
        if start <= 1 {
            warn!(start, "nothing worth summarizing before the recent block; skipping compaction");
            return Ok(None);
        }

        let (history, recent) = messages.split_at(start);
        let flattened = history
            .iter()
            .map(Message::render_line)
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(
            vec![Message::system(SUMMARY_INSTRUCTION), Message::user(flattened)],
            self.settings.summary_temperature,
        )
        .with_max_tokens(self.settings.summary_output_tokens)
        .with_system_messages(supports_system_messages);

        let completion = provider.complete(&request).await?;
        let summary = match completion.reply {
            ModelReply::PlainText(text) => text,
            ModelReply::ToolCallsRequested { preamble, calls } => {
                warn!(calls = calls.len(), "summary request answered with tool calls");
                preamble.unwrap_or_default()
            }
        };

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(Message::assistant_text(format!("{SUMMARY_LABEL}\n{summary}")));
        compacted.extend_from_slice(recent);

        info!(
            replaced = history.len(),
            kept = recent.len(),
            before_tokens = estimate_conversation_tokens(messages),
            after_tokens = estimate_conversation_tokens(&compacted),
            cost_usd = completion.cost_usd,
            "conversation compacted"
        );

        Ok(Some(Compaction {
            messages: compacted,
            replaced: history.len(),
            usage: completion.usage,
            cost_usd: completion.cost_usd,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamate_core::ids::ToolCallId;
    use dynamate_core::messages::ToolInvocation;
    use dynamate_llm::{MockProvider, MockResponse};
    use proptest::prelude::*;
    use serde_json::json;

    fn call(name: &str) -> ToolInvocation {
        ToolInvocation::new(name, "{}")
    }

    fn result_for(inv: &ToolInvocation) -> Message {
        Message::tool_result(inv.id.clone(), inv.name.clone(), json!({}), "ok")
    }

    #[test]
    fn tool_results_pull_in_their_request() {
        let a = call("find_input");
        let b = call("read_file");
        let messages = vec![
            Message::system("sys"),
            Message::user("go"),
            Message::assistant_tool_calls(None, vec![a.clone(), b.clone()]),
            result_for(&a),
            result_for(&b),
        ];
        assert_eq!(find_recent_block(&messages), 2);
    }

    #[test]
    fn tool_call_turn_alone() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_text("thinking"),
            Message::user("again"),
            Message::assistant_tool_calls(None, vec![call("find_input")]),
        ];
        assert_eq!(find_recent_block(&messages), 3);
    }

    #[test]
    fn plain_assistant_takes_preceding_user() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q1"),
            Message::assistant_text("a1"),
            Message::user("q2"),
            Message::assistant_text("a2"),
        ];
        assert_eq!(find_recent_block(&messages), 3);
    }

    #[test]
    fn user_takes_preceding_assistant() {
        let messages = vec![
            Message::user("q1"),
            Message::assistant_text("a1"),
            Message::user("q2"),
        ];
        assert_eq!(find_recent_block(&messages), 1);

        let after_tool = vec![
            Message::user("q1"),
            Message::assistant_tool_calls(None, vec![call("find_input")]),
            Message::tool_result(ToolCallId::new(), "find_input", json!({}), "x"),
            Message::user("q2"),
        ];
        assert_eq!(find_recent_block(&after_tool), 3);
    }

    #[test]
    fn system_only_is_whole_block() {
        let messages = vec![Message::system("a"), Message::system("b")];
        assert_eq!(find_recent_block(&messages), 0);
        assert_eq!(find_recent_block(&[]), 0);
    }

    #[test]
    fn orphan_tool_result_takes_everything() {
        let messages = vec![
            Message::user("q"),
            Message::tool_result(ToolCallId::new(), "find_input", json!({}), "x"),
        ];
        assert_eq!(find_recent_block(&messages), 0);
    }

    #[test]
    fn trigger_needs_both_size_and_length() {
        let compactor = Compactor::new(ContextSettings::default());
        let three = vec![Message::user("a"), Message::user("b"), Message::user("c")];
        assert!(!compactor.should_compact(&three, 1_000_000));
        let mut four = three.clone();
        four.push(Message::user("d"));
        assert!(compactor.should_compact(&four, 32_001));
        assert!(!compactor.should_compact(&four, 32_000));
    }

    #[tokio::test]
    async fn compaction_replaces_history_with_summary() {
        let provider = MockProvider::new(vec![MockResponse::text("they asked twice")]);
        let compactor = Compactor::new(ContextSettings::default());
        let messages = vec![
            Message::system("sys"),
            Message::user("q1"),
            Message::assistant_text("a1"),
            Message::user("q2"),
            Message::assistant_text("a2"),
        ];

        let compaction = compactor
            .compact(&provider, &messages, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(compaction.replaced, 3);
        assert_eq!(compaction.messages.len(), 3);
        assert_eq!(
            compaction.messages[0].content(),
            Some("[Conversation Summary]\nthey asked twice")
        );
        assert_eq!(&compaction.messages[1..], &messages[3..]);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.messages[0].content(), Some(SUMMARY_INSTRUCTION));
        assert_eq!(req.messages[1].content(), Some("system: sys\nuser: q1\nassistant: a1"));
        assert_eq!(req.max_tokens, Some(6000));
        assert_eq!(req.temperature, 0.1);
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn empty_history_skips_model_call() {
        let provider = MockProvider::new(vec![]);
        let compactor = Compactor::new(ContextSettings::default());
        let messages = vec![Message::system("a"), Message::system("b")];
        assert!(compactor.compact(&provider, &messages, true).await.unwrap().is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn single_message_history_is_not_compacted() {
        let provider = MockProvider::new(vec![MockResponse::text("unused")]);
        let compactor = Compactor::new(ContextSettings::default());
        let a = call("find_input");
        let b = call("read_file");
        let messages = vec![
            Message::user("x".repeat(200_000)),
            Message::assistant_tool_calls(None, vec![a.clone(), b.clone()]),
            result_for(&a),
            result_for(&b),
        ];
        assert!(compactor.should_compact(&messages, estimate_conversation_tokens(&messages)));
        assert_eq!(find_recent_block(&messages), 1);

        assert!(compactor.compact(&provider, &messages, true).await.unwrap().is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[derive(Clone, Debug)]
    enum Turn {
        System,
        User,
        Answer,
        Calls { count: usize, answered: usize },
    }

    fn turn() -> impl Strategy<Value = Turn> {
        prop_oneof![
            Just(Turn::System),
            Just(Turn::User),
            Just(Turn::Answer),
            (1usize..4, 0usize..4).prop_map(|(count, answered)| Turn::Calls {
                count,
                answered: answered.min(count),
            }),
        ]
    }

    fn build(turns: &[Turn]) -> Vec<Message> {
        let mut messages = Vec::new();
        for t in turns {
            match t {
                Turn::System => messages.push(Message::system("s")),
                Turn::User => messages.push(Message::user("u")),
                Turn::Answer => messages.push(Message::assistant_text("a")),
                Turn::Calls { count, answered } => {
                    let calls: Vec<ToolInvocation> = (0..*count).map(|_| call("read_file")).collect();
                    messages.push(Message::assistant_tool_calls(None, calls.clone()));
                    for inv in calls.iter().take(*answered) {
                        messages.push(result_for(inv));
                    }
                }
            }
        }
        messages
    }

    proptest! {
        #[test]
        fn block_never_orphans_a_tool_result(turns in prop::collection::vec(turn(), 0..30)) {
            let messages = build(&turns);
            let block = &messages[find_recent_block(&messages)..];

            let requested: HashSet<ToolCallId> = block
                .iter()
                .filter_map(|m| match m {
                    Message::Assistant(a) => Some(a.tool_calls.iter().map(|c| c.id.clone())),
                    _ => None,
                })
                .flatten()
                .collect();
            for m in block {
                if let Message::Tool(t) = m {
                    prop_assert!(requested.contains(&t.tool_call_id));
                }
            }
            if !messages.is_empty() {
                prop_assert!(!block.is_empty());
            }
        }

        #[test]
        fn compaction_always_shortens(turns in prop::collection::vec(turn(), 0..30)) {
            let messages = build(&turns);
            let provider = MockProvider::new(vec![MockResponse::text("summary")]);
            let compactor = Compactor::new(ContextSettings::default());
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let compaction = runtime
                .block_on(compactor.compact(&provider, &messages, true))
                .unwrap();

            match compaction {
                Some(c) => {
                    prop_assert!(c.messages.len() < messages.len());
                    prop_assert_eq!(c.replaced, find_recent_block(&messages));
                }
                None => prop_assert_eq!(provider.call_count(), 0),
            }
        }
    }
}
