//! Utility functions.

/// Returns the current time as an ISO 8601 (RFC 3339) timestamp.
pub fn iso_timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

/// Returns the current timestamp packed into a fixed size, zero padded
/// buffer, ready to be written into a file header.
pub fn iso_timestamp_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    let stamp = iso_timestamp();
    let len = stamp.len().min(N);
    buf[..len].copy_from_slice(&stamp.as_bytes()[..len]);
    buf
}

/// Decodes a zero padded timestamp buffer written by [`iso_timestamp_bytes`].
pub fn timestamp_from_bytes(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_buffer_round_trip() {
        let buf = iso_timestamp_bytes::<32>();
        let decoded = timestamp_from_bytes(&buf);
        assert!(!decoded.is_empty());
        assert!(decoded.len() <= 32);
        assert!(chrono::DateTime::parse_from_rfc3339(&decoded).is_ok());
    }
}
