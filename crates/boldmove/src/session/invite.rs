//! Invite code generation and normalisation.

/// Length of an invite code.
pub const INVITE_CODE_LEN: usize = 6;

/// Uppercase alphanumerics.
const ALPHABET: [char; 36] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Generate a random invite code.
pub fn generate_invite_code() -> String {
    nanoid::nanoid!(INVITE_CODE_LEN, &ALPHABET)
}

/// Canonical form of user-entered invite code, or `None` if it cannot be one.
///
/// Matching is case-insensitive and ignores surrounding whitespace.
pub fn normalize_invite_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() == INVITE_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}
