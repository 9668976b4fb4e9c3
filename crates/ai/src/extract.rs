/// Slice from the first `open` to the last `close` (inclusive).
///
/// Models tend to wrap the requested JSON in prose; this recovers the payload.
pub(crate) fn json_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
