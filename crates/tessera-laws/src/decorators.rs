//! Decorators whose effect on a call signature is known

use std::collections::HashMap;

use tessera_core::{
    ConfigError, DecoratorData, DecoratorEffect, TesseraConfig, UnknownDecoratorPolicy,
};

use DecoratorEffect::*;

const BUILTIN: &[(&str, DecoratorEffect)] = &[
    ("staticmethod", Preserve),
    ("classmethod", Preserve),
    ("property", Opaque),
    ("functools.cached_property", Opaque),
    ("abc.abstractmethod", Preserve),
    ("typing.overload", Opaque),
    ("typing.final", Preserve),
    ("typing.override", Preserve),
    ("functools.wraps", Preserve),
    ("functools.lru_cache", Preserve),
    ("functools.cache", Preserve),
    ("functools.singledispatch", Preserve),
    ("functools.total_ordering", Preserve),
    ("contextlib.contextmanager", Preserve),
    ("contextlib.asynccontextmanager", Preserve),
    ("dataclasses.dataclass", Preserve),
    ("unittest.mock.patch", DropLeading(1)),
    ("unittest.mock.patch.object", DropLeading(1)),
    ("pytest.fixture", Opaque),
    ("pytest.mark.parametrize", Opaque),
];

/// What the arity check should do given a target's decorators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Check, after dropping this many leading parameters.
    Check { drop_leading: u32 },
    /// Do not check.
    Skip,
}

#[derive(Debug, Clone)]
pub struct DecoratorPolicy {
    effects: HashMap<String, DecoratorEffect>,
    unknown: UnknownDecoratorPolicy,
}

impl Default for DecoratorPolicy {
    fn default() -> Self {
        Self {
            effects: BUILTIN.iter().map(|(n, e)| (n.to_string(), *e)).collect(),
            unknown: UnknownDecoratorPolicy::Skip,
        }
    }
}

impl DecoratorPolicy {
    /// Builtin entries plus the `[decorators]` table, which wins on conflict.
    pub fn from_config(config: &TesseraConfig) -> Result<Self, ConfigError> {
        let mut policy = Self::default();
        policy.unknown = config.validation.unknown_decorators;
        for (name, effect) in config.decorator_effects()? {
            policy.effects.insert(name, effect);
        }
        Ok(policy)
    }

    pub fn insert(&mut self, name: impl Into<String>, effect: DecoratorEffect) {
        self.effects.insert(name.into(), effect);
    }

    /// Effect of one decorator, trying its resolved names before its text.
    /// `.setter`/`.getter`/`.deleter` on a property are opaque.
    pub fn effect_of(&self, decorator: &DecoratorData) -> Option<DecoratorEffect> {
        let found = decorator
            .candidates
            .iter()
            .chain(std::iter::once(&decorator.name))
            .find_map(|name| self.effects.get(name.as_str()).copied());
        if found.is_some() {
            return found;
        }
        let accessor = [".setter", ".getter", ".deleter"]
            .iter()
            .any(|suffix| decorator.name.ends_with(suffix));
        accessor.then_some(Opaque)
    }

    pub fn verdict<'a>(&self, decorators: impl IntoIterator<Item = &'a DecoratorData>) -> Verdict {
        let mut drop_leading = 0;
        for decorator in decorators {
            match self.effect_of(decorator) {
                Some(Preserve) => {}
                Some(DropLeading(n)) => drop_leading += n,
                Some(Opaque) => return Verdict::Skip,
                None => match self.unknown {
                    UnknownDecoratorPolicy::Skip => return Verdict::Skip,
                    UnknownDecoratorPolicy::Check => {}
                },
            }
        }
        Verdict::Check { drop_leading }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{NodeId, NodeKind};

    fn decorator(name: &str, candidates: &[&str]) -> DecoratorData {
        DecoratorData {
            expression: name.to_string(),
            name: name.to_string(),
            target: NodeId(1),
            target_kind: NodeKind::Function,
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn imported_names_match_through_candidates() {
        let policy = DecoratorPolicy::default();
        let wraps = decorator("wraps", &["functools.wraps", "wraps"]);
        assert_eq!(policy.effect_of(&wraps), Some(Preserve));
        assert_eq!(policy.verdict([&wraps]), Verdict::Check { drop_leading: 0 });
    }

    #[test]
    fn unknown_decorators_follow_the_policy() {
        let custom = decorator("retry", &["app.retry", "retry"]);
        let mut policy = DecoratorPolicy::default();
        assert_eq!(policy.verdict([&custom]), Verdict::Skip);

        policy.unknown = UnknownDecoratorPolicy::Check;
        assert_eq!(policy.verdict([&custom]), Verdict::Check { drop_leading: 0 });

        policy.insert("app.retry", DropLeading(2));
        assert_eq!(policy.verdict([&custom]), Verdict::Check { drop_leading: 2 });
    }

    #[test]
    fn property_accessors_are_opaque() {
        let policy = DecoratorPolicy::default();
        let setter = decorator("value.setter", &["value.setter"]);
        assert_eq!(policy.verdict([&setter]), Verdict::Skip);
    }

    #[test]
    fn config_entries_override_builtins() {
        let mut config = TesseraConfig::default();
        config
            .decorators
            .insert("functools.lru_cache".to_string(), "opaque".to_string());
        let policy = DecoratorPolicy::from_config(&config).unwrap();
        let cached = decorator("functools.lru_cache", &["functools.lru_cache"]);
        assert_eq!(policy.verdict([&cached]), Verdict::Skip);
    }
}
