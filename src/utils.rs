#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` after any carried-over prefix. An incomplete trailing
    /// sequence is held back for the next call; invalid sequences become
    /// U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }

    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

pub fn is_valid_instance_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_char_is_carried() {
        let text = "§aWelcome ✓";
        let bytes = text.as_bytes();
        let mut carry = Utf8Carry::new();

        let mut out = String::new();
        for b in bytes {
            out.push_str(&carry.decode(std::slice::from_ref(b)));
        }
        out.push_str(&carry.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(b"ok\xffok"), "ok\u{FFFD}ok");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn instance_names() {
        assert!(is_valid_instance_name("survival-1.20"));
        assert!(is_valid_instance_name("Lobby_2"));
        assert!(!is_valid_instance_name(""));
        assert!(!is_valid_instance_name(".."));
        assert!(!is_valid_instance_name("../etc"));
        assert!(!is_valid_instance_name("a/b"));
        assert!(!is_valid_instance_name("with space"));
    }
}
