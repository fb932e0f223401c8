//! One-time token validation
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `push` | Duo push notification |
//! | `phone`, `phone1`..`phone9` | Phone call to device N |
//! | `sms`, `text`, with optional `1`..`9` | SMS passcodes to device N |
//! | `false` | No second factor |
//! | 44 lowercase letters | YubiKey OTP |
//! | 6 or 7 digits | Authenticator app code |

/// Length of a YubiKey one-time password
pub const YUBIKEY_LENGTH: usize = 44;

/// Token sent when the user just presses Enter at the prompt
pub const DEFAULT_TOKEN: &str = "push";

/// What kind of second factor a token requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Push,
    Phone,
    Sms,
    Disabled,
    Hardware,
    Software,
}

/// Classify a token, or `None` if it has no accepted shape
pub fn classify(token: &str) -> Option<TokenKind> {
    match token {
        "push" => return Some(TokenKind::Push),
        "false" => return Some(TokenKind::Disabled),
        _ => {}
    }

    if token.strip_prefix("phone").is_some_and(device_suffix) {
        return Some(TokenKind::Phone);
    }
    if token
        .strip_prefix("sms")
        .or_else(|| token.strip_prefix("text"))
        .is_some_and(device_suffix)
    {
        return Some(TokenKind::Sms);
    }

    if token.len() == YUBIKEY_LENGTH && token.bytes().all(|b| b.is_ascii_lowercase()) {
        return Some(TokenKind::Hardware);
    }
    if (6..=7).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_digit()) {
        return Some(TokenKind::Software);
    }

    None
}

pub fn is_valid(token: &str) -> bool {
    classify(token).is_some()
}

/// Empty, or a single device index 1-9
fn device_suffix(rest: &str) -> bool {
    match rest.as_bytes() {
        [] => true,
        [d] => (b'1'..=b'9').contains(d),
        _ => false,
    }
}
