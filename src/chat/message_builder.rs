//! Token-aware assembly of chat completion messages.

use super::types::{ChatMessage, ChatTurn, Role};
use crate::tokens::TokenCounter;

/// Accumulates messages after a system prompt while tracking their token count.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    messages: Vec<ChatMessage>,
    counter: TokenCounter,
    token_length: usize,
}

impl MessageBuilder {
    /// Start with the system prompt.
    pub fn new(system_prompt: &str, counter: TokenCounter) -> Self {
        let system = ChatMessage::new(Role::System, system_prompt);
        let token_length = message_tokens(&counter, &system);
        Self {
            messages: vec![system],
            counter,
            token_length,
        }
    }

    /// Insert a message at `index`, clamped to the end of the list.
    pub fn insert(&mut self, index: usize, role: Role, content: impl Into<String>) {
        let message = ChatMessage::new(role, content);
        self.token_length += message_tokens(&self.counter, &message);
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
    }

    /// Append a message at the end.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        let end = self.messages.len();
        self.insert(end, role, content);
    }

    /// Tokens used by every message so far.
    pub fn token_length(&self) -> usize {
        self.token_length
    }

    /// Messages in send order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Consume the builder.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

fn message_tokens(counter: &TokenCounter, message: &ChatMessage) -> usize {
    counter.count(match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }) + counter.count(&message.content)
}

/// Build the message list for a conversation.
///
/// Layout: system prompt, few-shot examples, then earlier turns oldest to newest, then
/// `user_content`. Earlier turns are added newest first and stop once the running token count
/// exceeds `max_tokens`, so the oldest turns are the ones dropped.
pub fn messages_from_history(
    system_prompt: &str,
    counter: TokenCounter,
    history: &[ChatTurn],
    user_content: &str,
    few_shots: &[ChatMessage],
    max_tokens: usize,
) -> Vec<ChatMessage> {
    let mut builder = MessageBuilder::new(system_prompt, counter);
    for shot in few_shots {
        builder.push(shot.role, shot.content.clone());
    }

    let insert_at = few_shots.len() + 1;
    builder.insert(insert_at, Role::User, user_content);

    let earlier = history.split_last().map(|(_, rest)| rest).unwrap_or_default();
    for turn in earlier.iter().rev() {
        if let Some(bot) = turn.bot.as_deref().filter(|bot| !bot.is_empty()) {
            builder.insert(insert_at, Role::Assistant, bot);
        }
        if !turn.user.is_empty() {
            builder.insert(insert_at, Role::User, turn.user.clone());
        }
        if builder.token_length() > max_tokens {
            break;
        }
    }
    builder.into_messages()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> TokenCounter {
        TokenCounter::for_model("gpt-35-turbo").expect("counter")
    }

    fn turn(user: &str, bot: Option<&str>) -> ChatTurn {
        ChatTurn {
            user: user.to_string(),
            bot: bot.map(str::to_string),
        }
    }

    #[test]
    fn history_lands_between_shots_and_question() {
        let history = vec![
            turn("first question", Some("first answer")),
            turn("second question", Some("second answer")),
            turn("latest question", None),
        ];
        let shots = vec![
            ChatMessage::new(Role::User, "shot q"),
            ChatMessage::new(Role::Assistant, "shot a"),
        ];
        let messages =
            messages_from_history("system", counter(), &history, "latest question", &shots, 4096);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "system",
                "shot q",
                "shot a",
                "first question",
                "first answer",
                "second question",
                "second answer",
                "latest question",
            ]
        );
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[4].role, Role::Assistant);
    }

    #[test]
    fn oldest_turns_are_dropped_over_budget() {
        let long = "history ".repeat(200);
        let history = vec![
            turn("oldest", Some(&long)),
            turn("middle", Some(&long)),
            turn("latest", None),
        ];
        let messages = messages_from_history("system", counter(), &history, "latest", &[], 100);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"middle"));
        assert!(!contents.contains(&"oldest"));
        assert_eq!(contents.last(), Some(&"latest"));
    }

    #[test]
    fn token_length_tracks_inserts() {
        let mut builder = MessageBuilder::new("system", counter());
        let before = builder.token_length();
        builder.push(Role::User, "hello there");
        assert!(builder.token_length() > before);
        assert_eq!(builder.messages().len(), 2);
    }
}
