//! Target resolution: multi-base inheritance, `@inherit`/`@self` sentinel resolution, and cycle
//! detection.
//!
//! A [`Target`] may list more than one base (a deliberate supplement over the single-`Extends`
//! model the build tool historically used); [`resolve_targets`] folds each target's bases
//! left-to-right with [`join`] into a synthetic, abstract ancestor before applying the target's
//! own add/remove sets.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Errors raised while resolving the target inheritance graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    /// A target named itself or another undeclared target as a base.
    #[error("target {0:?} extends unknown target {1:?}")]
    UnknownBase(String, String),
    /// The extension graph contains a cycle.
    #[error("target extension cycle detected at {0:?}")]
    Cycle(String),
    /// A module path appeared in both the add and remove sets of the same target.
    #[error("target {0:?} adds and removes the same module: {1:?}")]
    AddRemoveCollision(String, String),
    /// A build option (`Defines` key) was declared more than once in a single add set.
    #[error("target {0:?} declares build option {1:?} more than once")]
    DuplicateBuildOption(String, String),
    /// `@inherit` was used but no concrete ancestor provided a value.
    #[error("target {0:?} has no concrete ancestor to inherit {1} from")]
    NoAncestorToInherit(String, &'static str),
}

/// Sentinel value for `AddrMap`/`BaseRpx` fields: either a literal name, the special `@inherit`
/// marker (climb the base chain until a concrete ancestor has one), or `@self` (use the target's
/// own name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSentinel {
    /// A literal name was given.
    Literal(String),
    /// `@inherit`: defer to the nearest ancestor with a concrete value.
    Inherit,
    /// `@self`: use this target's own declared name.
    SelfName,
}

impl NameSentinel {
    /// Parses a raw string field value into a sentinel, recognizing the two magic spellings.
    pub fn parse(s: &str) -> Self {
        match s {
            "@inherit" => NameSentinel::Inherit,
            "@self" => NameSentinel::SelfName,
            other => NameSentinel::Literal(other.to_string()),
        }
    }
}

/// A declared build target, before or after inheritance resolution.
#[derive(Debug, Clone)]
pub struct Target {
    /// The target's own declared name.
    pub name: String,
    /// Whether this target is a template only (never built directly).
    pub is_abstract: bool,
    /// Names of the targets this one directly extends, in declaration order.
    pub bases: Vec<String>,
    /// Raw `AddrMap` field, if present.
    pub addr_map_name: Option<NameSentinel>,
    /// Raw `BaseRpx` field, if present.
    pub base_rpx_name: Option<NameSentinel>,
    /// Module file paths to remove from the inherited set.
    pub remove_modules: HashSet<String>,
    /// Module file paths to add to the inherited set.
    pub add_modules: HashSet<String>,
    /// Build-option (`Defines`) keys to remove from the inherited set.
    pub remove_defines: HashSet<String>,
    /// Build-option (`Defines`) key/value pairs to add.
    pub add_defines: HashMap<String, Option<String>>,
}

impl Target {
    /// Creates an empty target with the given name (all other fields default/empty).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_abstract: false,
            bases: Vec::new(),
            addr_map_name: None,
            base_rpx_name: None,
            remove_modules: HashSet::new(),
            add_modules: HashSet::new(),
            remove_defines: HashSet::new(),
            add_defines: HashMap::new(),
        }
    }
}

/// The final, resolved module/build-option sets and concrete names for one target, after walking
/// its entire inheritance chain.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTarget {
    /// Final module set (file paths).
    pub modules: HashSet<String>,
    /// Final build-option map.
    pub defines: HashMap<String, Option<String>>,
    /// Resolved `AddrMap` name, or `None` if never set anywhere in the chain.
    pub addr_map_name: Option<String>,
    /// Resolved `BaseRpx` name, or `None` if never set anywhere in the chain.
    pub base_rpx_name: Option<String>,
}

/// Folds `next` onto `acc`, producing a new synthetic node: `next`'s modules/defines are applied
/// on top of `acc`'s (adds win over a same-named prior add; a later remove cancels an earlier add
/// rather than stacking).
fn join(acc: &ResolvedTarget, next: &ResolvedTarget) -> ResolvedTarget {
    let mut modules = acc.modules.clone();
    for m in &next.modules {
        modules.insert(m.clone());
    }
    let mut defines = acc.defines.clone();
    for (k, v) in &next.defines {
        defines.insert(k.clone(), v.clone());
    }

    ResolvedTarget {
        modules,
        defines,
        addr_map_name: next.addr_map_name.clone().or_else(|| acc.addr_map_name.clone()),
        base_rpx_name: next.base_rpx_name.clone().or_else(|| acc.base_rpx_name.clone()),
    }
}

fn apply_own_sets(base: &ResolvedTarget, target: &Target) -> Result<ResolvedTarget, TargetError> {
    for m in &target.add_modules {
        if target.remove_modules.contains(m) {
            return Err(TargetError::AddRemoveCollision(
                target.name.clone(),
                m.clone(),
            ));
        }
    }

    let mut modules = base.modules.clone();
    for m in &target.remove_modules {
        modules.remove(m);
    }
    for m in &target.add_modules {
        modules.insert(m.clone());
    }

    let mut defines = base.defines.clone();
    for k in &target.remove_defines {
        defines.remove(k);
    }
    for (k, v) in &target.add_defines {
        if defines.contains_key(k) && !target.remove_defines.contains(k) {
            return Err(TargetError::DuplicateBuildOption(
                target.name.clone(),
                k.clone(),
            ));
        }
        defines.insert(k.clone(), v.clone());
    }

    Ok(ResolvedTarget {
        modules,
        defines,
        addr_map_name: base.addr_map_name.clone(),
        base_rpx_name: base.base_rpx_name.clone(),
    })
}

/// Resolves the full target graph, returning a map from target name to its fully-joined
/// [`ResolvedTarget`]. Detects cycles and unknown bases across the whole set before resolving any
/// individual target.
pub fn resolve_targets(
    targets: &HashMap<String, Target>,
) -> Result<HashMap<String, ResolvedTarget>, TargetError> {
    for target in targets.values() {
        for base in &target.bases {
            if !targets.contains_key(base) {
                return Err(TargetError::UnknownBase(target.name.clone(), base.clone()));
            }
        }
    }

    let mut resolved = HashMap::new();
    let mut in_progress = HashSet::new();

    for name in targets.keys() {
        resolve_one(name, targets, &mut resolved, &mut in_progress)?;
    }

    Ok(resolved)
}

fn resolve_one(
    name: &str,
    targets: &HashMap<String, Target>,
    resolved: &mut HashMap<String, ResolvedTarget>,
    in_progress: &mut HashSet<String>,
) -> Result<ResolvedTarget, TargetError> {
    if let Some(r) = resolved.get(name) {
        return Ok(r.clone());
    }
    if in_progress.contains(name) {
        return Err(TargetError::Cycle(name.to_string()));
    }
    in_progress.insert(name.to_string());

    let target = &targets[name];
    let mut acc = ResolvedTarget::default();
    for base_name in &target.bases {
        let base_resolved = resolve_one(base_name, targets, resolved, in_progress)?;
        acc = join(&acc, &base_resolved);
    }

    let own = ResolvedTarget {
        modules: target.add_modules.clone(),
        defines: target.add_defines.clone(),
        addr_map_name: match &target.addr_map_name {
            Some(NameSentinel::Literal(s)) => Some(s.clone()),
            Some(NameSentinel::SelfName) => Some(target.name.clone()),
            Some(NameSentinel::Inherit) | None => None,
        },
        base_rpx_name: match &target.base_rpx_name {
            Some(NameSentinel::Literal(s)) => Some(s.clone()),
            Some(NameSentinel::SelfName) => Some(target.name.clone()),
            Some(NameSentinel::Inherit) | None => None,
        },
    };
    let joined = join(&acc, &own);
    let result = apply_own_sets(&joined, target)?;

    in_progress.remove(name);
    resolved.insert(name.to_string(), result.clone());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_add_module() {
        let mut targets = HashMap::new();
        let mut t = Target::new("Console");
        t.add_modules.insert("a.yaml".into());
        targets.insert("Console".to_string(), t);

        let resolved = resolve_targets(&targets).unwrap();
        assert!(resolved["Console"].modules.contains("a.yaml"));
    }

    #[test]
    fn remove_cancels_add_from_base() {
        let mut targets = HashMap::new();
        let mut base = Target::new("Base");
        base.add_modules.insert("a.yaml".into());
        targets.insert("Base".to_string(), base);

        let mut child = Target::new("Child");
        child.bases.push("Base".to_string());
        child.remove_modules.insert("a.yaml".into());
        targets.insert("Child".to_string(), child);

        let resolved = resolve_targets(&targets).unwrap();
        assert!(!resolved["Child"].modules.contains("a.yaml"));
        assert!(resolved["Base"].modules.contains("a.yaml"));
    }

    #[test]
    fn cycle_detected() {
        let mut targets = HashMap::new();
        let mut a = Target::new("A");
        a.bases.push("B".to_string());
        let mut b = Target::new("B");
        b.bases.push("A".to_string());
        targets.insert("A".to_string(), a);
        targets.insert("B".to_string(), b);

        assert!(matches!(resolve_targets(&targets), Err(TargetError::Cycle(_))));
    }

    #[test]
    fn add_remove_same_target_collision() {
        let mut targets = HashMap::new();
        let mut t = Target::new("T");
        t.add_modules.insert("a.yaml".into());
        t.remove_modules.insert("a.yaml".into());
        targets.insert("T".to_string(), t);

        assert!(matches!(
            resolve_targets(&targets),
            Err(TargetError::AddRemoveCollision(_, _))
        ));
    }

    #[test]
    fn multi_base_join() {
        let mut targets = HashMap::new();
        let mut b1 = Target::new("B1");
        b1.add_modules.insert("one.yaml".into());
        targets.insert("B1".to_string(), b1);

        let mut b2 = Target::new("B2");
        b2.add_modules.insert("two.yaml".into());
        targets.insert("B2".to_string(), b2);

        let mut joined = Target::new("Joined");
        joined.bases.push("B1".to_string());
        joined.bases.push("B2".to_string());
        targets.insert("Joined".to_string(), joined);

        let resolved = resolve_targets(&targets).unwrap();
        assert!(resolved["Joined"].modules.contains("one.yaml"));
        assert!(resolved["Joined"].modules.contains("two.yaml"));
    }

    #[test]
    fn self_sentinel_resolves_to_own_name() {
        let mut targets = HashMap::new();
        let mut t = Target::new("Debug");
        t.base_rpx_name = Some(NameSentinel::SelfName);
        targets.insert("Debug".to_string(), t);

        let resolved = resolve_targets(&targets).unwrap();
        assert_eq!(resolved["Debug"].base_rpx_name.as_deref(), Some("Debug"));
    }
}
