//! Prompt assembly for grounded blog answers.
//!
//! Turns retrieval results, a style instruction and the user's category
//! names into the system/user messages and the tool schema sent to the
//! chat model. Nothing here calls the model.

use serde_json::json;

use crate::llm::{ChatMessage, ToolSpec};
use crate::models::RetrievalResult;

/// Context text used when retrieval found nothing.
pub const NO_POST_CONTEXT: &str = "NO POST IN USER BLOG";

/// Marker placed between context blocks.
pub const POST_SEPARATOR: &str = "\n---\n";

pub const ANSWER_FROM_CONTEXT: &str = "answer_from_context";
pub const REPORT_NOT_FOUND: &str = "report_not_found";
pub const DECLINE_QUESTION: &str = "decline_question";
pub const REPORT_CONTENT_INSUFFICIENT: &str = "report_content_insufficient";

/// Messages plus the tools offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// Render retrieval results as labeled blocks, or the not-found sentinel.
pub fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_POST_CONTEXT.to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[Post {}]\nTitle: {}\nSimilarity: {:.3}\nText:\n{}",
                i + 1,
                r.post_title,
                r.similarity_score,
                r.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join(POST_SEPARATOR)
}

fn text_tool(name: &str, description: &str, text_description: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": text_description,
                }
            },
            "required": ["text"],
        }),
    }
}

/// The fixed tool set exposed on every ask.
pub fn answer_tools() -> Vec<ToolSpec> {
    vec![
        text_tool(
            ANSWER_FROM_CONTEXT,
            "Answer the question using only the blog context.",
            "The full answer, grounded in the context.",
        ),
        text_tool(
            REPORT_NOT_FOUND,
            "The blog has no post related to the question.",
            "A short message telling the reader nothing relevant was found.",
        ),
        text_tool(
            DECLINE_QUESTION,
            "The question is abusive, unrelated to the blog, or inappropriate.",
            "A polite refusal that points the reader back to blog topics.",
        ),
        text_tool(
            REPORT_CONTENT_INSUFFICIENT,
            "The question fits the blog but the context is too thin to answer it.",
            "What is missing, plus a clarifying follow-up question.",
        ),
    ]
}

fn system_prompt(style_instruction: &str, category_names: &[String], language: &str) -> String {
    let categories = if category_names.is_empty() {
        "unknown".to_string()
    } else {
        category_names.join(", ")
    };

    format!(
        "You are the guide of a personal blog. You answer visitors' questions about the blog \
         using only the posts provided as context.\n\
         \n\
         [Blog]\n\
         - Categories: {categories}\n\
         \n\
         [Rules]\n\
         1. Answer only from the context. Never invent facts, posts, or links.\n\
         2. If the context is {sentinel}, call {not_found}.\n\
         3. If the question is abusive or unrelated to the blog, call {decline}.\n\
         4. If the question fits the blog but the context is not enough, call {insufficient} \
            and ask a clarifying question.\n\
         5. Otherwise call {answer}.\n\
         6. Always respond in {language}.\n\
         \n\
         [Tone]\n\
         {style}\n\
         Apply this tone to the answer without mentioning it.",
        categories = categories,
        sentinel = NO_POST_CONTEXT,
        not_found = REPORT_NOT_FOUND,
        decline = DECLINE_QUESTION,
        insufficient = REPORT_CONTENT_INSUFFICIENT,
        answer = ANSWER_FROM_CONTEXT,
        language = language,
        style = style_instruction,
    )
}

/// Build the full prompt for one question.
pub fn assemble(
    question: &str,
    results: &[RetrievalResult],
    style_instruction: &str,
    category_names: &[String],
    response_language: &str,
) -> PromptSpec {
    let user = format!(
        "[context]\n{}\n\n[question]\n{}",
        format_context(results),
        question
    );

    PromptSpec {
        messages: vec![
            ChatMessage::system(system_prompt(
                style_instruction,
                category_names,
                response_language,
            )),
            ChatMessage::user(user),
        ],
        tools: answer_tools(),
    }
}
