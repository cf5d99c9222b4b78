/// Configuration options for the streaming decoder.
///
/// # Examples
///
/// ```ignore
/// use protomodem::ParserOptions;
///
/// let options = ParserOptions {
///     ignore_json_unknown: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Whether to skip unknown member names silently.
    ///
    /// When `true`, a member name that does not resolve to a field of the
    /// current message is dropped together with its entire value subtree:
    /// nested objects and arrays are consumed with only depth tracking, and
    /// nothing is emitted for them.
    ///
    /// When `false` (the default), an unknown member name is a hard error.
    pub ignore_json_unknown: bool,
}
