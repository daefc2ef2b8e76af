use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    pub options: ChatOptions,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// System instruction: the user's own prompt when set, otherwise a generated
/// translate-only instruction.
pub fn system_prompt(custom_prompt: Option<&str>, target_language: &str) -> String {
    match custom_prompt.filter(|p| !p.trim().is_empty()) {
        Some(prompt) => prompt.to_string(),
        None => format!(
            "You are a professional translator. Translate the following text to {}. \
             Only output the translation, no explanations or additional text.",
            target_language
        ),
    }
}

pub fn user_content(text: &str, target_language: &str, source_language: Option<&str>) -> String {
    match source_language.filter(|s| !s.trim().is_empty()) {
        Some(source) => format!("Translate from {} to {}:\n\n{}", source, target_language, text),
        None => format!("Translate to {}:\n\n{}", target_language, text),
    }
}

pub fn chat_request(
    model: &str,
    temperature: f32,
    custom_prompt: Option<&str>,
    text: &str,
    target_language: &str,
    source_language: Option<&str>,
) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        stream: true,
        options: ChatOptions { temperature },
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt(custom_prompt, target_language),
            },
            ChatMessage {
                role: "user",
                content: user_content(text, target_language, source_language),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_system_prompt_names_target() {
        let prompt = system_prompt(None, "fr");
        assert!(prompt.contains("Translate the following text to fr."));
        assert!(prompt.contains("Only output the translation"));
        assert_eq!(system_prompt(Some("  "), "fr"), prompt);
        assert_eq!(system_prompt(Some("Be literal."), "fr"), "Be literal.");
    }

    #[test]
    fn test_user_content_framing() {
        assert_eq!(user_content("Hello", "fr", None), "Translate to fr:\n\nHello");
        assert_eq!(
            user_content("Hello", "fr", Some("en")),
            "Translate from en to fr:\n\nHello"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(chat_request("gemma", 0.5, None, "Hi", "de", None)).unwrap();
        assert_eq!(body["model"], "gemma");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"], json!({"temperature": 0.5}));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "Translate to de:\n\nHi"}));
    }
}
