use serde::{Deserialize, Serialize};

use crate::ast::SourceLocation;

// ═══════════════════════════════════════════════════════════════════════════════
// INVARIANT CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const INV_SLOT_UNASSIGNED: &str = "RC001";
pub const INV_EVENT_CAPACITY: &str = "RC002";
pub const INV_ROUTE_PLACEHOLDER: &str = "RC003";
pub const INV_UNKNOWN_EVENT: &str = "RC004";
pub const INV_MEMBER_RENDER: &str = "RC005";
pub const INV_DUPLICATE_NAME: &str = "RC006";
pub const WARN_STATIC_REGION: &str = "RC103";

/// Hard ceiling of handler-bearing slots per event kind.
pub const EVENT_SLOT_CAPACITY: u32 = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        INV_SLOT_UNASSIGNED => "Every slot is assigned before any binding or handler refers to it.",
        INV_EVENT_CAPACITY => {
            "At most 64 slots per component carry handlers of one event kind; none is dropped."
        }
        INV_ROUTE_PLACEHOLDER => "A routed component renders exactly one route placeholder.",
        INV_UNKNOWN_EVENT => "Handlers exist only for click, input, change and keydown.",
        INV_MEMBER_RENDER => {
            "Member renders refer to component-typed fields or collection loop variables."
        }
        INV_DUPLICATE_NAME => "Params, state fields and methods share one namespace.",
        WARN_STATIC_REGION => "A region without dependencies is rendered once and never resynced.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {component}:{line}:{column}: {message}")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub component: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

pub type CompileResult<T> = Result<T, CompilerError>;

impl CompilerError {
    pub fn new(code: &str, message: &str, component: &str, loc: SourceLocation) -> Self {
        Self::with_details(code, message, component, loc, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        component: &str,
        loc: SourceLocation,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: "COMPILER_INVARIANT_VIOLATION".to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            component: component.to_string(),
            line: loc.line,
            column: loc.column,
            context,
            hints,
        }
    }

    /// Non-fatal diagnostic carried alongside a successful compilation.
    pub fn warning(code: &str, message: &str, component: &str, loc: SourceLocation) -> Self {
        let mut warning = Self::new(code, message, component, loc);
        warning.error_type = "COMPILER_WARNING".to_string();
        warning
    }

    pub fn is_warning(&self) -> bool {
        self.error_type == "COMPILER_WARNING"
    }
}
