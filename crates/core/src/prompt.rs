//! Messages exchanged with the LLM collaborator and the user.

use serde::Serialize;

/// Instructions for the support assistant. The user message is the JSON built
/// by [`build_user_prompt`].
pub const SYSTEM_PROMPT: &str = r#"Ты ассистент службы поддержки компании "Токеон".
Отвечай на вопрос из поля "user_question", опираясь только на текст из поля "knowledge_base_chunks". Не используй общие знания и не додумывай.

Правила:
1. Если во фрагментах есть шаги, реквизиты или ссылки, перенеси их в ответ полностью.
2. Если "knowledge_base_chunks" пуст или в нём нет ответа, вежливо сообщи, что в базе знаний компании Токеон нет информации по этому вопросу.
3. Если вопрос непонятен, попроси пользователя уточнить его.
4. Не запрашивай персональные данные (ФИО, телефон, email, номер договора).
5. Отвечай вежливо и по делу."#;

/// Shown instead of an answer while the synonym model is being built.
pub const NOT_READY_MESSAGE: &str = "База знаний обновляется, пожалуйста подождите.";

#[derive(Debug, Serialize)]
struct UserPrompt<'a> {
    user_question: &'a str,
    knowledge_base_chunks: &'a str,
}

/// Pretty JSON object carrying the raw question and the retrieved context.
pub fn build_user_prompt(question: &str, context: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&UserPrompt {
        user_question: question,
        knowledge_base_chunks: context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn user_prompt_keeps_cyrillic_and_both_fields() {
        let prompt = build_user_prompt("что такое Токеон", "Токеон — это компания.").unwrap();
        assert!(prompt.contains("что такое Токеон"));

        let parsed: Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(parsed["user_question"], "что такое Токеон");
        assert_eq!(parsed["knowledge_base_chunks"], "Токеон — это компания.");
    }

    #[test]
    fn empty_context_is_still_a_valid_prompt() {
        let parsed: Value = serde_json::from_str(&build_user_prompt("вопрос", "").unwrap()).unwrap();
        assert_eq!(parsed["knowledge_base_chunks"], "");
    }
}
