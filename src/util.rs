use std::sync::atomic::{AtomicU64, Ordering};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Process-unique id for a tool call whose markup carried none.
#[inline]
pub(crate) fn next_call_id(ordinal: usize) -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(32);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out.push('_');
    out.push_str(&ordinal.to_string());
    out
}

#[inline]
pub(crate) fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    for slot in buf.iter_mut().rev() {
        *slot = HEX[(value & 0xf) as usize];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Char-safe prefix of `text` for log lines, with newlines flattened.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}
