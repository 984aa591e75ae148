/// Error type shared by the translation and extraction modules.
///
/// Every variant is local and recoverable: at worst one tool call or one
/// text fragment is dropped. Nothing here aborts a stream or a request;
/// total failure belongs to the transport layer, which this crate does not
/// own.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// Tool-call arguments failed to parse as a JSON object, even after the
    /// extra-closing-brace self-heal attempt.
    #[error("malformed tool-call arguments for '{name}': {detail}")]
    MalformedArguments { name: String, detail: String },

    /// A tool call whose function name could not be extracted.
    #[error("tool call with no extractable function name")]
    MissingFunctionName,

    /// An argument block that was present but empty. Distinct from an
    /// omitted-arguments call, which is valid and means `{}`.
    #[error("tool call '{0}' carried an empty arguments block")]
    EmptyArguments(String),
}
