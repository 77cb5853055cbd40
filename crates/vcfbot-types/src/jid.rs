//! Helpers for chat-network addresses (`user[:device]@server`).

/// Server suffix for individual accounts.
pub const USER_SERVER: &str = "s.whatsapp.net";
/// Server suffix for group conversations.
pub const GROUP_SERVER: &str = "g.us";

/// Strip everything but ASCII digits.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Address of an individual account from a phone number in any format.
pub fn user_jid(phone: &str) -> String {
    format!("{}@{}", digits_only(phone), USER_SERVER)
}

/// User part of an address, without the device suffix.
///
/// `"22507123456:12@s.whatsapp.net"` -> `"22507123456"`.
pub fn jid_user(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}

/// Canonical address with any device suffix removed.
pub fn decode_jid(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, server)) if user.contains(':') => {
            format!("{}@{}", jid_user(user), server)
        }
        _ => jid.to_string(),
    }
}

/// Canonical account address for a session's own user id.
pub fn own_user_jid(user_id: &str) -> String {
    format!("{}@{}", jid_user(user_id), USER_SERVER)
}

pub fn is_group(jid: &str) -> bool {
    jid.ends_with(&format!("@{}", GROUP_SERVER))
}
