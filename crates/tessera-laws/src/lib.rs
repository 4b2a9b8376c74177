//! Conservation laws: invariants the semantic graph must keep after every
//! change, checked over the whole graph or a changed neighborhood.

pub mod decorators;
pub mod law;
pub mod referential;
pub mod structural;
pub mod typing;
pub mod validator;
pub mod violation;

#[cfg(test)]
mod tests;

pub use decorators::{DecoratorPolicy, Verdict};
pub use law::{ConservationLaw, ValidationScope};
pub use referential::ReferentialLaw;
pub use structural::StructuralLaw;
pub use typing::TypingLaw;
pub use validator::{ValidationReport, Validator};
pub use violation::{LawKind, Severity, Violation};
