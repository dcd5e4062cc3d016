//! JID parsing helpers.

use crate::error::GatewayError;

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const LID_SERVER: &str = "lid";
pub const BROADCAST_SERVER: &str = "broadcast";

/// Strip formatting from a phone number; accepts `+55 (11) 9999-0000` style input.
pub fn normalize_phone(phone: &str) -> Result<String, GatewayError> {
    let digits: String = phone
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::InvalidPhone(phone.to_string()));
    }
    Ok(digits)
}

/// Turn a recipient into a full JID.
///
/// Values containing `@` are validated and passed through; anything else is
/// treated as a phone number on the user server.
pub fn parse_recipient(input: &str) -> Result<String, GatewayError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GatewayError::InvalidJid("empty recipient".into()));
    }
    match input.split_once('@') {
        Some((user, server)) => {
            if user.is_empty() || server.is_empty() || server.contains('@') {
                return Err(GatewayError::InvalidJid(input.to_string()));
            }
            match server {
                USER_SERVER | GROUP_SERVER | NEWSLETTER_SERVER | LID_SERVER
                | BROADCAST_SERVER => Ok(input.to_string()),
                _ => Err(GatewayError::InvalidJid(input.to_string())),
            }
        }
        None => {
            let phone = normalize_phone(input)
                .map_err(|_| GatewayError::InvalidJid(input.to_string()))?;
            Ok(format!("{phone}@{USER_SERVER}"))
        }
    }
}

/// Group JIDs live on `g.us`.
pub fn is_group(jid: &str) -> bool {
    jid.ends_with(&format!("@{GROUP_SERVER}"))
}

/// User part of a JID with any device suffix (`:12`) removed.
pub fn user_part(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}
