use afl::fuzz;
use duplex::ratchet::EncryptedEnvelope;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(json) = std::str::from_utf8(data) {
            let _ = EncryptedEnvelope::from_json(json);
        }
    });
}
