use comrak::{
    format_html,
    nodes::{AstNode, NodeValue},
    parse_document, Arena, Options,
};
use serde::Serialize;

use super::language::detect_language;
use crate::data::model::{Message, Role};

pub const ERROR_MESSAGE: &str = "Sorry, something went wrong. Please try again.";

const COPY_BUTTON: &str = r#"<button type="button" class="copy-btn" data-copy="code" title="Copy code"><i class="fa-regular fa-copy"></i></button></pre>"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Thinking,
    Error,
}

/// A message ready for the `components/message.html` template.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMessage {
    pub kind: MessageKind,
    pub html: String,
}

impl RenderedMessage {
    pub fn thinking() -> Self {
        Self {
            kind: MessageKind::Thinking,
            html: r#"<div class="spinner"></div>"#.to_string(),
        }
    }

    pub fn error() -> Self {
        Self {
            kind: MessageKind::Error,
            html: tera::escape_html(ERROR_MESSAGE),
        }
    }
}

pub fn render_message(message: &Message) -> RenderedMessage {
    match message.role {
        Role::User => RenderedMessage {
            kind: MessageKind::User,
            html: tera::escape_html(&message.content),
        },
        Role::Assistant => RenderedMessage {
            kind: MessageKind::Assistant,
            html: markdown_to_html(&message.content),
        },
    }
}

pub fn render_messages(messages: &[Message]) -> Vec<RenderedMessage> {
    messages.iter().map(render_message).collect()
}

fn markdown_options() -> Options {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options
}

/// Markdown to HTML with guessed languages on untagged code blocks and a copy button per block.
pub fn markdown_to_html(markdown: &str) -> String {
    let arena = Arena::new();
    let options = markdown_options();
    let root = parse_document(&arena, markdown, &options);

    tag_code_blocks(root);

    let mut html = Vec::new();
    if let Err(e) = format_html(root, &options, &mut html) {
        tracing::error!("markdown formatting failed: {}", e);
        return tera::escape_html(markdown);
    }

    // raw html is omitted by comrak, so every </pre> closes a code block
    String::from_utf8_lossy(&html).replace("</pre>", COPY_BUTTON)
}

fn tag_code_blocks<'a>(root: &'a AstNode<'a>) {
    for node in root.descendants() {
        if let NodeValue::CodeBlock(ref mut block) = node.data.borrow_mut().value {
            if block.info.trim().is_empty() {
                if let Some(tag) = detect_language(&block.literal) {
                    block.info = tag.to_string();
                }
            }
        }
    }
}
