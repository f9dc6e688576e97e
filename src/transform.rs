use crate::error::ChapterboxError;

pub fn parse_key(key: &str) -> Result<Vec<u8>, ChapterboxError> {
    let trimmed = key.trim().trim_start_matches('#');
    let bytes = hex::decode(trimmed)
        .map_err(|err| ChapterboxError::InvalidEncryptionKey(format!("{key}: {err}")))?;
    if bytes.is_empty() {
        return Err(ChapterboxError::InvalidEncryptionKey("empty key".to_string()));
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8], key: &str) -> Result<Vec<u8>, ChapterboxError> {
    let key = parse_key(key)?;
    let mut output = bytes.to_vec();
    xor_in_place(&mut output, &key);
    Ok(output)
}

pub fn xor_in_place(buffer: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in buffer.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}
