use serde::Serialize;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

const DEFAULT_CODE: &str = "internal_error";
const DEFAULT_MESSAGE: &str = "operation failed";
const CANCELED_CODE: &str = "transfer_canceled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContextItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ErrorContextItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

/// Error carried across every layer of the transfer stack.
///
/// The `code` prefix decides the [`ErrorCategory`]; callers match on the
/// category, never on the message text.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct AppError(Box<AppErrorPayload>);

/// Coarse error kinds surfaced to the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Discovery,
    Connection,
    Protocol,
    Decryption,
    Filesystem,
    Canceled,
    Internal,
}

impl ErrorCategory {
    pub fn of(code: &str) -> Self {
        if code == CANCELED_CODE {
            return Self::Canceled;
        }
        match code.split('_').next().unwrap_or_default() {
            "discovery" => Self::Discovery,
            "connection" => Self::Connection,
            "protocol" => Self::Protocol,
            "decryption" => Self::Decryption,
            "filesystem" => Self::Filesystem,
            _ => Self::Internal,
        }
    }
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self(Box::new(AppErrorPayload {
            code: code.into(),
            message: message.into(),
            context: Vec::new(),
            causes: Vec::new(),
        }))
    }

    pub fn canceled() -> Self {
        Self::new(CANCELED_CODE, "transfer canceled")
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::of(&self.0.code)
    }

    pub fn is_canceled(&self) -> bool {
        self.category() == ErrorCategory::Canceled
    }

    pub fn with_code(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.0.code = code.into();
        self.0.message = message.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.context.push(ErrorContextItem {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        let cause = cause.into();
        if !cause.trim().is_empty() {
            self.0.causes.push(cause);
        }
        self
    }

    pub fn with_source<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.put_context_if_absent("sourceType", std::any::type_name::<E>().to_string());
        let chain = collect_std_error_chain(&error);
        self.with_causes(chain)
    }

    pub fn with_causes<I, S>(mut self, causes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for cause in causes {
            self = self.with_cause(cause);
        }
        self
    }

    /// Looks up the first context value recorded under `key`.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.0
            .context
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    pub fn from_anyhow(error: anyhow::Error) -> Self {
        if let Some(app_error) = error.downcast_ref::<Self>() {
            return app_error.clone();
        }

        Self(Box::new(AppErrorPayload {
            code: DEFAULT_CODE.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            context: Vec::new(),
            causes: collect_error_chain(&error),
        }))
    }

    fn put_context_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.0.context.iter().any(|item| item.key == key) {
            return;
        }
        self.0.context.push(ErrorContextItem {
            key,
            value: value.into(),
        });
    }
}

impl Deref for AppError {
    type Target = AppErrorPayload;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for AppError {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

fn collect_error_chain(error: &anyhow::Error) -> Vec<String> {
    let mut causes = Vec::new();
    for cause in error.chain() {
        let text = cause.to_string();
        if text.trim().is_empty() {
            continue;
        }
        if causes.last().is_some_and(|last| last == &text) {
            continue;
        }
        causes.push(text);
    }
    causes
}

fn collect_std_error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(cause) = current {
        let text = cause.to_string();
        if !text.trim().is_empty() && causes.last().is_none_or(|last| last != &text) {
            causes.push(text);
        }
        current = cause.source();
    }
    causes
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::from_anyhow(value)
    }
}

pub trait ResultExt<T> {
    fn with_code(self, code: impl Into<String>, message: impl Into<String>) -> AppResult<T>;
    fn with_ctx(self, key: impl Into<String>, value: impl Into<String>) -> AppResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_code(self, code: impl Into<String>, message: impl Into<String>) -> AppResult<T> {
        let code = code.into();
        let message = message.into();
        self.map_err(|error| AppError::from_anyhow(error.into()).with_code(code, message))
    }

    fn with_ctx(self, key: impl Into<String>, value: impl Into<String>) -> AppResult<T> {
        let key = key.into();
        let value = value.into();
        self.map_err(|error| AppError::from_anyhow(error.into()).with_context(key, value))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[path = "../tests/errors/errors_tests.rs"]
mod tests;
