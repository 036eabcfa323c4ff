//! Legacy `/v1/completions`: a prompt is wrapped into a two-message chat and the chat
//! reply is reshaped into a `text_completion` object.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{Value, json};

use super::GatewayError;
use crate::types::{ChatRequest, CompletionRequest, Message, MessageContent};

pub fn to_chat_request(
    request: CompletionRequest,
    system_prompt: &str,
) -> Result<ChatRequest, GatewayError> {
    let prompt = request
        .prompt
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest {
            reason: "prompt is required".to_string(),
        })?;

    Ok(ChatRequest {
        model: request.model,
        messages: Some(vec![Message::system(system_prompt), Message::user(prompt)]),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: request.stream,
        file_ids: Vec::new(),
    })
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created: Option<u64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Reshapes a chat completion body. Returns `None` when the body is not a chat completion.
pub fn reshape_chat_response(body: &[u8], model: &str) -> Option<Value> {
    let chat: ChatCompletion = serde_json::from_slice(body).ok()?;

    let created = chat.created.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0)
    });
    let choices: Vec<Value> = chat
        .choices
        .into_iter()
        .enumerate()
        .map(|(idx, choice)| {
            let text = choice
                .message
                .and_then(|message| message.content)
                .map(|content| content.joined_text())
                .unwrap_or_default();
            json!({
                "text": text,
                "index": choice.index.unwrap_or(idx as u64),
                "finish_reason": choice.finish_reason,
            })
        })
        .collect();

    Some(json!({
        "id": chat.id.unwrap_or_else(|| format!("cmpl-{created}")),
        "object": "text_completion",
        "created": created,
        "model": chat.model.unwrap_or_else(|| model.to_string()),
        "choices": choices,
        "usage": chat.usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn wraps_prompt_in_system_and_user_messages() {
        let chat = to_chat_request(
            CompletionRequest {
                prompt: Some("2+2=".to_string()),
                max_tokens: Some(5),
                ..CompletionRequest::default()
            },
            "You are a helpful assistant.",
        )
        .unwrap();

        let messages = chat.messages.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], Message::user("2+2="));
        assert_eq!(chat.max_tokens, Some(5));
    }

    #[test]
    fn missing_prompt_is_invalid() {
        let err = to_chat_request(CompletionRequest::default(), "sys").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn reshapes_choices_and_keeps_usage() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000u64,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        });
        let reshaped =
            reshape_chat_response(&serde_json::to_vec(&body).unwrap(), "gpt-4o-mini").unwrap();

        assert_eq!(reshaped["object"], "text_completion");
        assert_eq!(reshaped["id"], "chatcmpl-1");
        assert_eq!(reshaped["model"], "gpt-4o-mini-2024-07-18");
        assert_eq!(reshaped["choices"][0]["text"], "4");
        assert_eq!(reshaped["choices"][0]["finish_reason"], "stop");
        assert_eq!(reshaped["usage"]["total_tokens"], 13);
    }

    #[test]
    fn non_json_is_not_reshaped() {
        assert!(reshape_chat_response(b"<html>", "gpt-4o-mini").is_none());
    }
}
