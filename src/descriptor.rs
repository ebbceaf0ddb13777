/// Number of local variable slots taken by the parameters of a method descriptor.
/// `long` and `double` parameters take two slots.
pub(crate) fn parameter_slots(descriptor: &str) -> Option<u16> {
    let params = descriptor.strip_prefix('(')?;
    let end = params.find(')')?;
    let bytes = params[..end].as_bytes();
    let mut slots = 0u16;
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'J' | b'D' => {
                slots += 2;
                index += 1;
            }
            b'L' => {
                let len = params[index..end].find(';')?;
                slots += 1;
                index += len + 1;
            }
            b'[' => {
                while index < bytes.len() && bytes[index] == b'[' {
                    index += 1;
                }
                if bytes.get(index) == Some(&b'L') {
                    let len = params[index..end].find(';')?;
                    index += len;
                }
                slots += 1;
                index += 1;
            }
            b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' => {
                slots += 1;
                index += 1;
            }
            _ => return None,
        }
    }
    Some(slots)
}
