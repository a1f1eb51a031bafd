use serde::{Deserialize, Serialize};

use crate::Document;

pub const CONTEXT_INTRO: &str = "以下はユーザーの質問に関連する参考情報です。回答の参考にしてください。";
pub const CONTEXT_HEADER: &str = "--- 参考情報 ---";
pub const CONTEXT_FOOTER: &str = "----------------";
pub const NO_CONTEXT: &str = "(関連する参考情報は見つかりませんでした。)";
pub const CONVERSATION_HEADER: &str = "Conversation:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{other}'. Expected 'user' or 'assistant'.")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    /// Per-document cap on characters of `text`; longer texts end with "…".
    pub max_doc_chars: Option<usize>,
    /// Keep only the most recent N turns of history.
    pub history_limit: Option<usize>,
}

/// Combine instruction, retrieved documents, history and the new user input
/// into one prompt. The prompt ends with an open "Assistant:" line for the
/// generation backend to complete.
pub fn assemble(
    system_instruction: &str,
    history: &[Turn],
    user_input: &str,
    documents: &[&Document],
    options: &PromptOptions,
) -> String {
    let mut pieces: Vec<String> = Vec::new();

    if !system_instruction.is_empty() {
        pieces.push(format!("{system_instruction}\n"));
    }

    if documents.is_empty() {
        pieces.push(format!("{NO_CONTEXT}\n"));
    } else {
        pieces.push(format!("{CONTEXT_INTRO}\n"));
        pieces.push(CONTEXT_HEADER.to_string());
        for (i, doc) in documents.iter().enumerate() {
            let text = truncate_chars(doc.text(), options.max_doc_chars);
            pieces.push(format!("【文書{}: {}】\n{}\n", i + 1, doc.title(), text));
        }
        pieces.push(format!("{CONTEXT_FOOTER}\n"));
    }

    let start = options
        .history_limit
        .map(|limit| history.len().saturating_sub(limit))
        .unwrap_or(0);
    let mut conversation = format!("{CONVERSATION_HEADER}\n");
    for turn in &history[start..] {
        conversation.push_str(&format!("{}: {}\n", turn.role.label(), turn.text));
    }
    pieces.push(conversation);

    pieces.push(format!("{}: {}\n{}:", Role::User.label(), user_input, Role::Assistant.label()));

    pieces.join("\n")
}

fn truncate_chars(text: &str, max_chars: Option<usize>) -> std::borrow::Cow<'_, str> {
    match max_chars {
        Some(max) if text.chars().count() > max => {
            let mut cut: String = text.chars().take(max).collect();
            cut.push('…');
            cut.into()
        }
        _ => text.into(),
    }
}
