//! Recovery of free-text messages appended to vault deposit calldata.
//!
//! Depositors can talk to the agent by appending UTF-8 bytes after the
//! ABI-encoded arguments of `deposit(uint256,address)`. The contract ignores
//! the extra bytes, so they survive only in the transaction input.

/// Selector plus two static 32-byte arguments: `deposit(uint256,address)` and
/// `mint(uint256,address)`.
pub const DEPOSIT_CALL_LEN: usize = 4 + 2 * 32;

/// `deposit(uint256,address)`
pub const DEPOSIT_SELECTOR: [u8; 4] = [0x6e, 0x55, 0x3f, 0x65];
/// `mint(uint256,address)`
pub const MINT_SELECTOR: [u8; 4] = [0x94, 0xbf, 0x80, 0x4d];

/// Message appended to a direct vault `deposit` or `mint` call.
///
/// Inputs with any other selector yield `None`: routers and multicalls wrap the
/// deposit, so their tail is not a message.
pub fn deposit_message(input: &[u8]) -> Option<String> {
    let selector = input.get(..4)?;
    if selector != DEPOSIT_SELECTOR && selector != MINT_SELECTOR {
        return None;
    }
    trailing_message(input, DEPOSIT_CALL_LEN)
}

/// Decode the bytes past `fixed_len` as a UTF-8 message.
///
/// Trailing ABI zero padding and surrounding whitespace are trimmed. Returns
/// `None` when there is nothing past the fixed region, when it is blank, or when
/// it is not valid UTF-8.
pub fn trailing_message(input: &[u8], fixed_len: usize) -> Option<String> {
    let tail = input.get(fixed_len..)?;
    let end = tail.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&tail[..end]).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
