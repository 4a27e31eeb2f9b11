use crate::Value;

/// An `error` value: the thrown payload plus a formatted call-frame trace
/// captured at the point the error was constructed. `catch (e)` binds one
/// of these; scripts read `e.message` and `e.stack`.
#[derive(Debug)]
pub struct ErrorValue {
    pub message: Value,
    pub stack: String,
}

impl ErrorValue {
    pub fn new(message: Value, stack: impl Into<String>) -> Self {
        Self {
            message,
            stack: stack.into(),
        }
    }
}
