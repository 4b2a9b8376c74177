//! Violation records and their JSON shape

use std::fmt;

use serde::{Deserialize, Serialize};

use tessera_core::{GraphNode, NodeId};

/// Which conservation law produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawKind {
    Structural,
    Referential,
    Typing,
}

impl LawKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LawKind::Structural => "structural",
            LawKind::Referential => "referential",
            LawKind::Typing => "typing",
        }
    }
}

impl fmt::Display for LawKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// One broken invariant, anchored at the entity that breaks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub law: LawKind,
    pub violation_type: String,
    pub severity: Severity,
    pub entity_id: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suggested_fix: Option<String>,
}

impl Violation {
    pub fn new(
        law: LawKind,
        violation_type: &str,
        severity: Severity,
        entity: NodeId,
        message: impl Into<String>,
    ) -> Self {
        Violation {
            law,
            violation_type: violation_type.to_string(),
            severity,
            entity_id: entity.to_string(),
            file_path: None,
            line_number: None,
            column_number: None,
            message: message.into(),
            code_snippet: None,
            suggested_fix: None,
        }
    }

    pub fn error(law: LawKind, violation_type: &str, entity: NodeId, message: impl Into<String>) -> Self {
        Self::new(law, violation_type, Severity::Error, entity, message)
    }

    pub fn warning(law: LawKind, violation_type: &str, entity: NodeId, message: impl Into<String>) -> Self {
        Self::new(law, violation_type, Severity::Warning, entity, message)
    }

    /// Take file and position from `node`. Shared nodes have no file.
    pub fn at(mut self, node: &GraphNode) -> Self {
        self.file_path = node
            .file_path
            .as_ref()
            .map(|p| p.to_string_lossy().replace('\\', "/"));
        if node.location.line > 0 {
            self.line_number = Some(node.location.line);
            self.column_number = Some(node.location.column);
        }
        self
    }

    /// Override the line, keeping the file.
    pub fn at_line(mut self, line: u32, column: Option<u32>) -> Self {
        self.line_number = Some(line);
        self.column_number = column;
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.code_snippet = Some(snippet.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_path, self.line_number) {
            (Some(file), Some(line)) => write!(f, "{}:{}: ", file, line)?,
            (Some(file), None) => write!(f, "{}: ", file)?,
            _ => {}
        }
        write!(
            f,
            "{} [{}/{}] {}",
            self.severity, self.law, self.violation_type, self.message
        )
    }
}
