use crate::error::{Result, TranscriberError};

/// Conversation ids: non-empty, printable Latin-1 only
pub fn validate_conversation_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(TranscriberError::invalid_argument("conversation id", "must not be empty"));
    }
    if let Some(c) = id.chars().find(|&c| !is_printable_latin1(c)) {
        return Err(TranscriberError::invalid_argument(
            "conversation id",
            format!("character {:?} (U+{:04X}) is outside the ANSI range", c, c as u32),
        ));
    }
    Ok(())
}

fn is_printable_latin1(c: char) -> bool {
    matches!(c, '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}')
}

/// BCP-47 shaped tags such as `en-US` or `zh-Hans-CN`
pub fn validate_language(language: &str) -> Result<()> {
    if language.is_empty() {
        return Err(TranscriberError::invalid_argument("preferred language", "must not be empty"));
    }
    let well_formed = language
        .split('-')
        .all(|subtag| (1..=8).contains(&subtag.len()) && subtag.chars().all(|c| c.is_ascii_alphanumeric()));
    if !well_formed {
        return Err(TranscriberError::invalid_argument(
            "preferred language",
            format!("'{}' is not a language tag", language),
        ));
    }
    Ok(())
}

pub fn validate_voice_signature(signature: &str) -> Result<()> {
    if signature.trim().is_empty() {
        return Err(TranscriberError::invalid_argument("voice signature", "must not be empty"));
    }
    Ok(())
}

pub fn validate_user_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(TranscriberError::invalid_argument("participant id", "must not be empty"));
    }
    Ok(())
}
