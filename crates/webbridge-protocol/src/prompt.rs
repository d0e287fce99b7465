//! Prompt assembly.
//!
//! The web UIs take a single text box, so message lists are flattened here.
//! Assistant turns are dropped: neither surface lets us replay a prior
//! answer as if the model had written it.

use std::sync::OnceLock;

use regex::Regex;

use crate::openai::{ChatMessage, Role};

/// Fallback when no language directive or heuristic matches.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Flatten a chat transcript for the Claude chat box.
///
/// The last system message becomes a `System:` preamble and user messages
/// are joined with blank lines.
pub fn format_chat_prompt(messages: &[ChatMessage]) -> String {
    let mut system_prompt: Option<String> = None;
    let mut user_prompts = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_prompt = Some(message.content.to_plaintext()),
            Role::User => user_prompts.push(message.content.to_plaintext()),
            Role::Assistant | Role::Tool | Role::Other => {}
        }
    }

    let mut prompt = String::new();
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("System: {}\n\n", system));
    }
    prompt.push_str(&user_prompts.join("\n\n"));
    prompt
}

/// Code context for the Copilot editor: the last user message with any
/// `language:` directive removed, plus the resolved language.
pub fn extract_code_context(messages: &[ChatMessage]) -> (String, String) {
    let context = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.to_plaintext())
        .unwrap_or_default();

    split_language_directive(&context)
}

fn directive_regex() -> &'static Regex {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    DIRECTIVE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*language:(.*)$\n?").expect("language directive regex is valid")
    })
}

/// Strip the first `language: <name>` line (case-insensitive) and return it
/// as the language; otherwise sniff the language from the text.
pub fn split_language_directive(text: &str) -> (String, String) {
    if let Some(captures) = directive_regex().captures(text) {
        let language = captures
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        if !language.is_empty() {
            let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
            let mut context = String::with_capacity(text.len());
            context.push_str(&text[..whole.start]);
            context.push_str(&text[whole.end..]);
            return (context, language);
        }
    }

    let language = detect_language(text).to_string();
    (text.to_string(), language)
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// Best-effort language sniffing by substring markers.
///
/// Checks run in a fixed order and the first hit wins, so broad markers
/// (`.c`, braces) sit after the specific ones.
pub fn detect_language(t: &str) -> &'static str {
    if contains_any(t, &[".py", "def "]) || t.starts_with("import ") || t.starts_with("from ") {
        "python"
    } else if contains_any(t, &[".js", "function ", "const ", "let "]) {
        "javascript"
    } else if contains_any(t, &[".ts", "interface ", ": string", ": number"]) {
        "typescript"
    } else if contains_any(t, &[".java", "public class ", "private ", "protected "]) {
        "java"
    } else if contains_any(t, &[".go", "package ", "func ", "import ("]) {
        "go"
    } else if contains_any(t, &[".rb", "require "]) || (t.contains("class ") && t.contains("end")) {
        "ruby"
    } else if contains_any(t, &[".php", "<?php", "namespace "]) || (t.contains("function ") && t.contains('$')) {
        "php"
    } else if contains_any(t, &[".cs", "using ", "namespace "])
        || (t.contains("class ") && t.contains('{'))
    {
        "csharp"
    } else if contains_any(t, &[".cpp", ".hpp", "#include <", "std::"]) {
        "cpp"
    } else if contains_any(t, &[".c", "#include <", "int main("]) {
        "c"
    } else if contains_any(t, &[".rs", "fn ", "let mut ", "impl "]) {
        "rust"
    } else if contains_any(t, &[".html", "<!DOCTYPE", "<html"]) {
        "html"
    } else if t.contains(".css") || (t.contains('{') && t.contains('}') && t.contains(':')) {
        "css"
    } else if contains_any(t, &[".sh", "#!/bin/bash", "#!/bin/sh"]) {
        "shell"
    } else if contains_any(t, &[".sql", "SELECT ", "INSERT INTO ", "CREATE TABLE "]) {
        "sql"
    } else {
        DEFAULT_LANGUAGE
    }
}
