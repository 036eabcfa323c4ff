use crate::types::{ContentPart, ExtractedDocument, Message, MessageContent, Role};

/// An image attachment the upstream model can fetch by URL (http(s) or `data:`).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageReference {
    pub file_id: String,
    pub url: String,
}

/// Merges document context (and image parts for vision models) into the newest user
/// message, then truncates the sequence to `budget_chars`.
pub fn assemble(
    mut messages: Vec<Message>,
    documents: &[ExtractedDocument],
    images: &[ImageReference],
    vision: bool,
    budget_chars: usize,
) -> Vec<Message> {
    let context = document_context(documents);
    let attach_images = vision && !images.is_empty();

    if context.is_some() || attach_images {
        let idx = match messages.iter().rposition(|message| message.role == Role::User) {
            Some(idx) => idx,
            None => {
                messages.push(Message::user(String::new()));
                messages.len() - 1
            }
        };
        let target = &mut messages[idx];
        if vision {
            target.content = multipart_content(&target.content, context.as_deref(), images);
        } else if let Some(context) = context.as_deref() {
            target.content = append_text(&target.content, context);
        }
    }

    truncate_messages(messages, budget_chars)
}

/// Keeps the longest suffix of `messages` whose combined text fits in `budget_chars`.
///
/// Walks newest to oldest and stops before the first message that would overflow, so a
/// single oversized newest message yields an empty list.
pub fn truncate_messages(mut messages: Vec<Message>, budget_chars: usize) -> Vec<Message> {
    let mut total = 0usize;
    let mut keep_from = messages.len();
    for (idx, message) in messages.iter().enumerate().rev() {
        let next = total.saturating_add(message.text_len());
        if next > budget_chars {
            break;
        }
        total = next;
        keep_from = idx;
    }
    messages.split_off(keep_from)
}

fn document_context(documents: &[ExtractedDocument]) -> Option<String> {
    if documents.is_empty() {
        return None;
    }
    let mut out = String::new();
    for document in documents {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("[Document: ");
        out.push_str(&document.file_name);
        out.push_str("]\n");
        out.push_str(&document.text_excerpt);
        if document.truncated {
            out.push_str("\n[...truncated]");
        }
    }
    Some(out)
}

fn append_text(content: &MessageContent, context: &str) -> MessageContent {
    match content {
        MessageContent::Text(text) if text.is_empty() => MessageContent::Text(context.to_string()),
        MessageContent::Text(text) => MessageContent::Text(format!("{text}\n\n{context}")),
        MessageContent::Parts(parts) => {
            let mut parts = parts.clone();
            parts.push(ContentPart::text(context));
            MessageContent::Parts(parts)
        }
    }
}

fn multipart_content(
    content: &MessageContent,
    context: Option<&str>,
    images: &[ImageReference],
) -> MessageContent {
    let mut parts = match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![ContentPart::text(text.clone())],
        MessageContent::Parts(parts) => parts.clone(),
    };
    if let Some(context) = context {
        parts.push(ContentPart::text(context));
    }
    parts.extend(images.iter().map(|image| ContentPart::image_url(&image.url)));
    MessageContent::Parts(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, text: &str, truncated: bool) -> ExtractedDocument {
        ExtractedDocument {
            source_file_id: format!("id-{name}"),
            file_name: name.to_string(),
            text_excerpt: text.to_string(),
            truncated,
        }
    }

    #[test]
    fn under_budget_is_unchanged() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you"),
        ];
        assert_eq!(truncate_messages(messages.clone(), 1_000), messages);
    }

    #[test]
    fn drops_oldest_first_and_preserves_order() {
        let messages = vec![
            Message::user("aaaaa"),
            Message::assistant("bbbbb"),
            Message::user("ccccc"),
        ];
        let truncated = truncate_messages(messages, 12);
        assert_eq!(
            truncated,
            vec![Message::assistant("bbbbb"), Message::user("ccccc")]
        );
    }

    #[test]
    fn truncation_is_idempotent() {
        let messages = vec![
            Message::user("one"),
            Message::assistant("two two"),
            Message::user("three three three"),
        ];
        let once = truncate_messages(messages, 25);
        let twice = truncate_messages(once.clone(), 25);
        assert_eq!(once, twice);
    }

    #[test]
    fn oversized_newest_message_yields_empty_list() {
        let messages = vec![Message::user("short"), Message::user("x".repeat(50))];
        assert!(truncate_messages(messages, 10).is_empty());
    }

    #[test]
    fn appends_documents_to_latest_user_message() {
        let messages = vec![
            Message::user("first"),
            Message::user("summarize"),
            Message::assistant("sure"),
        ];
        let out = assemble(
            messages,
            &[document("notes.txt", "hello world", false)],
            &[],
            false,
            10_000,
        );
        assert_eq!(out[0], Message::user("first"));
        assert_eq!(
            out[1].content,
            MessageContent::Text("summarize\n\n[Document: notes.txt]\nhello world".to_string())
        );
        assert_eq!(out[2], Message::assistant("sure"));
    }

    #[test]
    fn vision_models_get_multipart_content_in_attachment_order() {
        let images = vec![
            ImageReference {
                file_id: "a".to_string(),
                url: "http://files/a.png".to_string(),
            },
            ImageReference {
                file_id: "b".to_string(),
                url: "http://files/b.png".to_string(),
            },
        ];
        let out = assemble(
            vec![Message::user("what is this")],
            &[document("report.pdf", "body", true)],
            &images,
            true,
            10_000,
        );
        assert_eq!(
            out[0].content,
            MessageContent::Parts(vec![
                ContentPart::text("what is this"),
                ContentPart::text("[Document: report.pdf]\nbody\n[...truncated]"),
                ContentPart::image_url("http://files/a.png"),
                ContentPart::image_url("http://files/b.png"),
            ])
        );
    }

    #[test]
    fn non_vision_models_ignore_image_references() {
        let images = vec![ImageReference {
            file_id: "a".to_string(),
            url: "http://files/a.png".to_string(),
        }];
        let out = assemble(vec![Message::user("hi")], &[], &images, false, 10_000);
        assert_eq!(out, vec![Message::user("hi")]);
    }

    #[test]
    fn missing_user_message_gets_one_for_context() {
        let out = assemble(
            vec![Message::system("sys")],
            &[document("a.txt", "ctx", false)],
            &[],
            false,
            10_000,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Message::user("[Document: a.txt]\nctx"));
    }
}
