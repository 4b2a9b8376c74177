//! Runs every law and collects one report

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use tessera_core::{ConfigError, GraphRead, TesseraConfig};

use crate::decorators::DecoratorPolicy;
use crate::law::{ConservationLaw, ValidationScope};
use crate::referential::ReferentialLaw;
use crate::structural::StructuralLaw;
use crate::typing::TypingLaw;
use crate::violation::{Severity, Violation};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub nodes_checked: usize,
    pub errors: usize,
    pub warnings: usize,
    pub duration_ms: u64,
}

impl ValidationReport {
    fn new(mut violations: Vec<Violation>, nodes_checked: usize, duration_ms: u64) -> Self {
        violations.sort_by(|a, b| {
            (&a.file_path, a.line_number, a.law, &a.violation_type, &a.entity_id).cmp(&(
                &b.file_path,
                b.line_number,
                b.law,
                &b.violation_type,
                &b.entity_id,
            ))
        });
        violations.dedup();
        let errors = violations.iter().filter(|v| v.is_error()).count();
        ValidationReport {
            warnings: violations.len() - errors,
            errors,
            violations,
            nodes_checked,
            duration_ms,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Drop warnings.
    pub fn errors_only(mut self) -> Self {
        self.violations.retain(|v| v.severity == Severity::Error);
        self.warnings = 0;
        self
    }

    pub fn of_type<'a>(&'a self, violation_type: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations
            .iter()
            .filter(move |v| v.violation_type == violation_type)
    }

    /// Violation counts per type.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for v in &self.violations {
            *counts.entry(v.violation_type.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

pub struct Validator {
    laws: Vec<Box<dyn ConservationLaw>>,
    sources: Option<PathBuf>,
}

impl Validator {
    /// The three standard laws, configured from `[validation]` and
    /// `[decorators]`.
    pub fn from_config(config: &TesseraConfig) -> Result<Self, ConfigError> {
        let policy = DecoratorPolicy::from_config(config)?;
        Ok(Self::with_laws(vec![
            Box::new(StructuralLaw),
            Box::new(ReferentialLaw::new(config.validation.report_unresolved_calls)),
            Box::new(TypingLaw::new(policy, config.validation.check_literal_types)),
        ]))
    }

    pub fn with_laws(laws: Vec<Box<dyn ConservationLaw>>) -> Self {
        Self {
            laws,
            sources: None,
        }
    }

    /// Attach source lines from files under `root` to violations.
    pub fn with_sources(mut self, root: impl Into<PathBuf>) -> Self {
        self.sources = Some(root.into());
        self
    }

    pub fn validate(&self, graph: &dyn GraphRead, scope: &ValidationScope) -> ValidationReport {
        let started = Instant::now();
        let mut violations = Vec::new();
        for law in &self.laws {
            let found = law.check(graph, scope);
            debug!("{} law: {} violations", law.kind(), found.len());
            violations.extend(found);
        }
        if let Some(root) = &self.sources {
            attach_snippets(root, &mut violations);
        }
        ValidationReport::new(
            violations,
            scope.len_hint(graph),
            started.elapsed().as_millis() as u64,
        )
    }
}

fn attach_snippets(root: &Path, violations: &mut [Violation]) {
    let mut files: HashMap<String, Option<Vec<String>>> = HashMap::new();
    for v in violations.iter_mut() {
        let (Some(file), Some(line)) = (&v.file_path, v.line_number) else {
            continue;
        };
        let lines = files.entry(file.clone()).or_insert_with(|| {
            std::fs::read_to_string(root.join(file))
                .ok()
                .map(|text| text.lines().map(str::to_string).collect())
        });
        let snippet = lines
            .as_ref()
            .and_then(|l| l.get(line.saturating_sub(1) as usize))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        if let Some(snippet) = snippet {
            v.code_snippet = Some(snippet);
        }
    }
}
