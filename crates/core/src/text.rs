use crate::error::IngestError;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fmt;

/// NLTK's Russian stop-word list.
pub const RUSSIAN_STOP_WORDS: [&str; 151] = [
    "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
    "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "только", "ее",
    "мне", "было", "вот", "от", "меня", "еще", "нет", "о", "из", "ему", "теперь", "когда",
    "даже", "ну", "вдруг", "ли", "если", "уже", "или", "ни", "быть", "был", "него", "до",
    "вас", "нибудь", "опять", "уж", "вам", "ведь", "там", "потом", "себя", "ничего", "ей",
    "может", "они", "тут", "где", "есть", "надо", "ней", "для", "мы", "тебя", "их", "чем",
    "была", "сам", "чтоб", "без", "будто", "чего", "раз", "тоже", "себе", "под", "будет", "ж",
    "тогда", "кто", "этот", "того", "потому", "этого", "какой", "совсем", "ним", "здесь",
    "этом", "один", "почти", "мой", "тем", "чтобы", "нее", "сейчас", "были", "куда", "зачем",
    "всех", "никогда", "можно", "при", "наконец", "два", "об", "другой", "хоть", "после",
    "над", "больше", "тот", "через", "эти", "нас", "про", "всего", "них", "какая", "много",
    "разве", "три", "эту", "моя", "впрочем", "хорошо", "свою", "этой", "перед", "иногда",
    "лучше", "чуть", "том", "нельзя", "такой", "им", "более", "всегда", "конечно", "всю",
    "между",
];

const MAX_STEM_PASSES: usize = 4;

/// Tokenizer, normaliser and stop-word filter shared by corpus training and
/// question expansion, so both sides see identical tokens.
pub struct TextAnalyzer {
    stemmer: Stemmer,
    stop_words: HashSet<String>,
    word: Regex,
}

impl fmt::Debug for TextAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextAnalyzer")
            .field("stop_words", &self.stop_words.len())
            .finish()
    }
}

impl TextAnalyzer {
    pub fn russian() -> Result<Self, IngestError> {
        let stop_words = RUSSIAN_STOP_WORDS.iter().map(|word| word.to_string()).collect();
        Ok(Self {
            stemmer: Stemmer::create(Algorithm::Russian),
            stop_words,
            word: Regex::new(r"\w+")?,
        })
    }

    /// Stems until the word stops changing, which makes the normal form
    /// idempotent.
    pub fn normal_form(&self, word: &str) -> String {
        let mut current = word.replace('ё', "е");
        for _ in 0..MAX_STEM_PASSES {
            let next = self.stemmer.stem(&current).into_owned();
            if next == current || next.is_empty() {
                break;
            }
            current = next;
        }
        current
    }

    /// Normal forms of every word in `text`, unfiltered.
    pub fn lemmatize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.word
            .find_iter(&lowered)
            .map(|found| self.normal_form(found.as_str()))
            .collect()
    }

    /// Normal forms with non-alphabetic tokens and stop words removed.
    pub fn preprocess(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.word
            .find_iter(&lowered)
            .map(|found| found.as_str())
            .filter(|word| word.chars().all(char::is_alphabetic))
            .filter(|word| !self.stop_words.contains(*word))
            .map(|word| self.normal_form(word))
            .filter(|lemma| !lemma.is_empty() && !self.stop_words.contains(lemma))
            .collect()
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }
}

/// Splits on `.`, `!`, `?` or `…` followed by whitespace, and on blank lines.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut newline_run = 0usize;

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run >= 2 {
                flush_sentence(&mut current, &mut sentences);
                continue;
            }
        } else if !ch.is_whitespace() {
            newline_run = 0;
        }

        current.push(ch);

        if matches!(ch, '.' | '!' | '?' | '…') {
            let at_boundary = match chars.peek() {
                Some(next) => next.is_whitespace(),
                None => true,
            };
            if at_boundary {
                flush_sentence(&mut current, &mut sentences);
            }
        }
    }

    flush_sentence(&mut current, &mut sentences);
    sentences
}

fn flush_sentence(current: &mut String, sentences: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_words_and_numbers_are_removed() {
        let analyzer = TextAnalyzer::russian().unwrap();
        let tokens = analyzer.preprocess("Что такое 2024 и где находится Токеон?");
        assert!(!tokens.iter().any(|token| token == "что" || token == "и"));
        assert!(!tokens.iter().any(|token| token.chars().any(|ch| ch.is_ascii_digit())));
        assert!(tokens.iter().any(|token| token.starts_with("токе")));
    }

    #[test]
    fn inflected_forms_share_a_normal_form() {
        let analyzer = TextAnalyzer::russian().unwrap();
        assert_eq!(analyzer.normal_form("компании"), analyzer.normal_form("компания"));
        assert_eq!(analyzer.normal_form("счёта"), analyzer.normal_form("счета"));
    }

    #[test]
    fn normal_form_is_idempotent() {
        let analyzer = TextAnalyzer::russian().unwrap();
        for word in ["пополнения", "клиентом", "токеон", "тестовый", "документами"] {
            let once = analyzer.normal_form(word);
            assert_eq!(analyzer.normal_form(&once), once);
        }
    }

    #[test]
    fn preprocess_of_preprocessed_text_is_stable() {
        let analyzer = TextAnalyzer::russian().unwrap();
        let first = analyzer.preprocess("Как пополнить счёт в приложении компании Токеон");
        let second = analyzer.preprocess(&first.join(" "));
        assert_eq!(first, second);
    }

    #[test]
    fn lemmatize_keeps_every_word() {
        let analyzer = TextAnalyzer::russian().unwrap();
        assert_eq!(analyzer.lemmatize("что такое 5 Токеон").len(), 4);
    }

    #[test]
    fn sentences_split_on_terminators_and_blank_lines() {
        let sentences = split_sentences("Это тестовый файл. Токеон — это компания!\n\nЗаголовок\nстрока 1.5 версии");
        assert_eq!(
            sentences,
            vec![
                "Это тестовый файл.".to_string(),
                "Токеон — это компания!".to_string(),
                "Заголовок\nстрока 1.5 версии".to_string(),
            ]
        );
    }
}
