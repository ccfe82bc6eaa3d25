//! Operator context passed explicitly with every counter call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorContext {
    pub operator_id: String,
    pub terminal_id: Option<String>,
}

impl OperatorContext {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            terminal_id: None,
        }
    }

    pub fn at_terminal(mut self, terminal_id: impl Into<String>) -> Self {
        self.terminal_id = Some(terminal_id.into());
        self
    }
}
