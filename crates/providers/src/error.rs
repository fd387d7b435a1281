/// Errors from talking to an external generation provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The remote job reached a terminal failure state.
    #[error("Remote job {handle} failed: {message}")]
    JobFailed { handle: String, message: String },

    #[error("Remote job {handle} was canceled")]
    Canceled { handle: String },

    /// The poll loop hit its attempt or wall-clock ceiling.
    #[error("Remote job {handle} did not settle after {attempts} polls in {elapsed_secs}s")]
    PollTimeout {
        handle: String,
        attempts: u32,
        elapsed_secs: u64,
    },

    /// The provider answered with something we could not interpret.
    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Transport failures, rate limiting and 5xx responses are transient;
    /// everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
