//! UCI protocol errors.

/// Errors that can occur while handling UCI commands.
#[derive(Debug, thiserror::Error)]
pub enum UciError {
    /// The `position` command is missing `startpos` or `fen`.
    #[error("malformed position command: missing startpos or fen keyword")]
    MalformedPosition,

    /// A FEN string failed to parse.
    #[error("invalid FEN: {fen}")]
    InvalidFen {
        /// The offending FEN string.
        fen: String,
    },

    /// A move in the `position` command is unparseable or illegal.
    #[error("invalid move: {uci_move}")]
    InvalidMove {
        /// The offending move string.
        uci_move: String,
    },

    /// A `setoption` or `go` parameter is missing its value.
    #[error("missing value for parameter: {param}")]
    MissingValue {
        /// The parameter name.
        param: String,
    },

    /// A parameter value failed to parse.
    #[error("invalid value for parameter {param}: {value}")]
    InvalidValue {
        /// The parameter name.
        param: String,
        /// The offending value string.
        value: String,
    },

    /// Reading stdin failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
