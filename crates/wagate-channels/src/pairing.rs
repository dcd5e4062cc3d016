//! Phone-pairing code presentation.

use wagate_core::error::GatewayError;

/// Normalize a raw linking code into `ABCD-EFGH`.
///
/// Separators and case in the raw code are ignored; anything other than
/// eight alphanumerics is a protocol error.
pub fn format_pairing_code(raw: &str) -> Result<String, GatewayError> {
    let chars: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if chars.len() != 8 || !chars.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::Protocol(format!(
            "unexpected pairing code from protocol: {raw:?}"
        )));
    }
    Ok(format!("{}-{}", &chars[..4], &chars[4..]))
}
