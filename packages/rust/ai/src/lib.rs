//! Hosted model access for Scorchbook.
//!
//! This crate provides:
//! - [`ClaudeClient`] and the [`LanguageModel`] trait for Messages API calls
//! - Prompt builders ([`text_prompt`], [`vision_prompt`])
//! - Lenient JSON parsing of model output ([`json`])
//! - [`HttpTranscriber`] and the [`Transcriber`] trait for voice notes

pub mod claude;
pub mod json;
pub mod transcribe;

pub use claude::{
    ANTHROPIC_VERSION, ChatRequest, ClaudeClient, ContentBlock, ImageSource, LanguageModel,
    MessageContent, Role, WireMessage, extract_claude_text, text_prompt, vision_prompt,
};
pub use json::{
    bool_field, clamp_score, normalize_number, parse_json_from_text, string_field,
    string_list_field,
};
pub use transcribe::{HttpTranscriber, Transcriber, map_media_format};
