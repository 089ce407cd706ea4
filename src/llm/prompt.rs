//! Prompt construction and reply cleanup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::types::LanguageHint;

/// Conversational register of the persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Warm,
    Professional,
    Casual,
    Funny,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Professional => "professional",
            Self::Casual => "casual",
            Self::Funny => "funny",
        }
    }

    fn guide(&self) -> &'static str {
        match self {
            Self::Warm => "warm, friendly, and affectionate",
            Self::Professional => "polite, helpful, and professional",
            Self::Casual => "casual, relaxed, and conversational",
            Self::Funny => "humorous, light-hearted, and playful",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warm" => Ok(Self::Warm),
            "professional" => Ok(Self::Professional),
            "casual" => Ok(Self::Casual),
            "funny" => Ok(Self::Funny),
            other => Err(format!("unknown tone '{other}'")),
        }
    }
}

fn language_guide(language: LanguageHint) -> &'static str {
    match language {
        LanguageHint::HindiEnglish => {
            "Use a mix of Hindi and English, with Hindi written in both Devanagari and Latin script."
        }
        LanguageHint::English => "Use fluent, natural English.",
        LanguageHint::Hindi => "Use primarily Hindi, written in both Devanagari and Latin script.",
        LanguageHint::NepaliHindiEnglish => {
            "Mix Nepali, Hindi and English naturally, as appropriate."
        }
    }
}

/// (incoming, reply) pairs showing the expected register.
fn examples(language: LanguageHint) -> &'static [(&'static str, &'static str)] {
    match language {
        LanguageHint::English => &[
            ("What are you up to?", "Not much, just relaxing a bit. How about you?"),
            (
                "I'm feeling a bit down today.",
                "I'm sorry to hear that. Anything specific bothering you? I'm here if you want to talk.",
            ),
        ],
        LanguageHint::Hindi => &[
            (
                "आज का दिन कैसा रहा?",
                "बहुत अच्छा! थोड़ा व्यस्त था लेकिन मज़ेदार रहा। आपका कैसा था?",
            ),
            (
                "क्या खा रहे हो?",
                "अभी कुछ नहीं, सोच रहा हूँ कुछ हल्का सा बना लूँ। तुम बताओ?",
            ),
        ],
        LanguageHint::HindiEnglish | LanguageHint::NepaliHindiEnglish => &[
            (
                "तुम क्या कर रहे हो?",
                "कुछ खास नहीं, बस थोड़ा रिलैक्स कर रहा हूं। तुम बताओ, क्या चल रहा है?",
            ),
            (
                "How was your day?",
                "Din achha tha! Thoda busy tha but productive raha. Tumhara kaisa tha?",
            ),
            (
                "Kya plan hai weekend ka?",
                "Kuch khaas nahi socha, maybe thoda rest karunga. Tum batao, kuch interesting plan hai?",
            ),
        ],
    }
}

/// Builds the system prompt for a persona.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub persona: String,
    pub language: LanguageHint,
    pub tone: Tone,
    pub max_words: usize,
}

impl PromptBuilder {
    pub fn system_prompt(&self) -> String {
        let persona = &self.persona;
        let mut prompt = format!(
            "You are {persona}, a friend replying in a chat. {}\n\
             Your tone should be {}. Avoid any inappropriate language.\n\
             Keep the reply under {} words, casual and conversational, and match the tone of the \
             last message. Do not explain or add meta-commentary. Just reply as {persona}.",
            language_guide(self.language),
            self.tone.guide(),
            self.max_words.max(1),
        );

        let shots = examples(self.language);
        if !shots.is_empty() {
            prompt.push_str("\n\nExample exchanges in your style:");
            for (incoming, reply) in shots {
                prompt.push_str(&format!("\nPerson: {incoming}\n{persona}: {reply}"));
            }
        }
        prompt
    }
}

/// User turn presenting the conversation.
pub fn user_prompt(context_lines: &[String]) -> String {
    format!(
        "Chat:\n{}\n\nReply to the last message as me.",
        context_lines.join("\n")
    )
}

/// Strip a leading `"<persona>:"` and surrounding quotes from provider text.
pub fn clean_reply(raw: &str, persona: &str) -> String {
    let mut text = raw.trim();

    if let Some(head) = text.get(..persona.len()) {
        if head.eq_ignore_ascii_case(persona) {
            if let Some(rest) = text[persona.len()..].strip_prefix(':') {
                text = rest.trim();
            }
        }
    }

    text.trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}
