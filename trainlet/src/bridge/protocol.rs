//! Wire types for interpreter communication.
//!
//! One channel per session (the subprocess's stdio). A request carries a
//! single code payload; the interpreter always answers with a paired
//! stdout/stderr reply, each payload independently length-prefixed.

/// One code fragment to be executed in the interpreter's persistent namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub code: String,
}

impl ExecRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// The interpreter's paired response to one request.
///
/// `error` is empty on clean execution; a Python traceback otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecReply {
    pub output: String,
    pub error: String,
}

impl ExecReply {
    /// True when the stderr payload carried nothing but whitespace.
    pub fn is_clean(&self) -> bool {
        self.error.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_reply_ignores_whitespace_stderr() {
        let reply = ExecReply {
            output: "4".to_string(),
            error: " \n".to_string(),
        };
        assert!(reply.is_clean());
    }

    #[test]
    fn traceback_reply_is_not_clean() {
        let reply = ExecReply {
            output: String::new(),
            error: "NameError: name 'x' is not defined".to_string(),
        };
        assert!(!reply.is_clean());
    }
}
