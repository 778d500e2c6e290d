//! Diff computation between an observed manifest and a desired model

use crate::error::{Error, Result};
use crate::model::DesiredModel;
use crate::types::{Manifest, Operation, OperationKind};
use std::collections::{BTreeSet, HashMap, HashSet};
use unitrepo::{PackageRef, PackageRepository};

/// Computes the operations that turn an observed manifest into a desired model
pub struct ManifestDiffEngine<'a> {
    repo: &'a dyn PackageRepository,
}

impl<'a> ManifestDiffEngine<'a> {
    /// Create an engine resolving directives against `repo`
    pub fn new(repo: &'a dyn PackageRepository) -> Self {
        Self { repo }
    }

    /// Resolve every directive to a concrete unit, in model order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Resolution` for the first directive that cannot be
    /// resolved. Nothing is returned for the others.
    pub fn resolve(&self, model: &DesiredModel, variant: &str) -> Result<Vec<PackageRef>> {
        model
            .directives()
            .iter()
            .map(|directive| {
                self.repo
                    .resolve(
                        &directive.name,
                        &directive.version,
                        directive.effective_variant(variant),
                    )
                    .map_err(|source| Error::Resolution {
                        directive: directive.to_string(),
                        source,
                    })
            })
            .collect()
    }

    /// Compute the ordered operations for one target.
    pub fn diff(
        &self,
        observed: &Manifest,
        model: &DesiredModel,
        variant: &str,
    ) -> Result<Vec<Operation>> {
        let target = self.resolve(model, variant)?;
        let operations = diff_units(&observed.units(), &target);
        log::debug!(
            "Diff against {} observed units: {}",
            observed.len(),
            DiffSummary::from_operations(&operations)
        );
        Ok(operations)
    }
}

/// Compute operations between observed and target units.
///
/// Removals come first (components before their top-level unit), then
/// replaces and installs in target order. Sequences are numbered from 0.
pub fn diff_units(observed: &[PackageRef], target: &[PackageRef]) -> Vec<Operation> {
    let observed_set: BTreeSet<&PackageRef> = observed.iter().collect();
    let target_set: BTreeSet<&PackageRef> = target.iter().collect();
    if observed_set == target_set {
        return Vec::new();
    }

    let target_by_name: HashMap<&str, &PackageRef> =
        target.iter().map(|u| (u.name.as_str(), u)).collect();
    let observed_by_name: HashMap<&str, &PackageRef> =
        observed.iter().map(|u| (u.name.as_str(), u)).collect();

    let mut removed: HashSet<&PackageRef> = observed
        .iter()
        .filter(|u| !target_by_name.contains_key(u.name.as_str()))
        .collect();

    // A top-level unit kept as-is goes away with the last of its components
    for unit in observed.iter().filter(|u| u.component_parent().is_none()) {
        if target_by_name.get(unit.name.as_str()) != Some(&unit) {
            continue;
        }
        let parent = Some(unit.name.as_str());
        let mut components = observed
            .iter()
            .filter(|c| c.component_parent() == parent)
            .peekable();
        let gains_component = target.iter().any(|c| c.component_parent() == parent);
        if !gains_component
            && components.peek().is_some()
            && components.all(|c| removed.contains(c))
        {
            log::debug!("All components of {} removed, removing it too", unit);
            removed.insert(unit);
        }
    }

    let has_removed_component = |unit: &PackageRef| {
        removed
            .iter()
            .any(|c| c.component_parent() == Some(unit.name.as_str()))
    };
    let (parents, rest): (Vec<&PackageRef>, Vec<&PackageRef>) = observed
        .iter()
        .filter(|u| removed.contains(u))
        .partition(|u| u.component_parent().is_none() && has_removed_component(*u));

    let mut operations: Vec<Operation> = rest
        .into_iter()
        .chain(parents)
        .map(|u| Operation::remove(u.clone()))
        .collect();

    for unit in target {
        if removed.iter().any(|r| r.same_unit(unit)) {
            continue;
        }
        match observed_by_name.get(unit.name.as_str()) {
            Some(&current) if current == unit => {}
            Some(&current) => operations.push(Operation::replace(current.clone(), unit.clone())),
            None => operations.push(Operation::install(unit.clone())),
        }
    }

    renumber(&mut operations);
    operations
}

/// Assign sequences 0.. in list order.
pub(crate) fn renumber(operations: &mut [Operation]) {
    for (sequence, op) in (0u32..).zip(operations.iter_mut()) {
        op.sequence = sequence;
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of units to install
    pub installs: usize,
    /// Number of units to remove
    pub removals: usize,
    /// Number of units to replace
    pub replaces: usize,
}

impl DiffSummary {
    /// Create a summary from a list of operations
    pub fn from_operations(operations: &[Operation]) -> Self {
        let mut summary = Self::default();
        for op in operations {
            match op.kind {
                OperationKind::Install => summary.installs += 1,
                OperationKind::Remove => summary.removals += 1,
                OperationKind::Replace { .. } => summary.replaces += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.installs + self.removals + self.replaces
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to install, {} to replace, {} to remove",
            self.installs, self.replaces, self.removals
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitrepo::MockRepository;

    fn unit(name: &str, version: &str) -> PackageRef {
        PackageRef::new(name, version, "x64")
    }

    fn labels(ops: &[Operation]) -> Vec<String> {
        ops.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_equal_sets_give_no_operations() {
        let units = [unit("a", "1.0"), unit("b", "2.0")];
        let reordered = [unit("b", "2.0"), unit("a", "1.0")];
        assert!(diff_units(&units, &reordered).is_empty());
        assert!(diff_units(&[], &[]).is_empty());
    }

    #[test]
    fn test_install_remove_replace() {
        let observed = [unit("a", "1.0"), unit("old", "1.0")];
        let target = [unit("a", "2.0"), unit("new", "1.0")];
        let ops = diff_units(&observed, &target);

        assert_eq!(
            labels(&ops),
            vec![
                "- old@1.0/x64",
                "~ a@1.0/x64 -> a@2.0/x64",
                "+ new@1.0/x64",
            ]
        );
        let sequences: Vec<u32> = ops.iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(ops.iter().all(|o| !o.critical));
    }

    #[test]
    fn test_variant_change_is_a_replace() {
        let observed = [PackageRef::new("a", "1.0", "x86")];
        let target = [PackageRef::new("a", "1.0", "x64")];
        let ops = diff_units(&observed, &target);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].kind, OperationKind::Replace { .. }));
    }

    #[test]
    fn test_removing_all_components_removes_parent() {
        let observed = [unit("office", "16"), unit("office:spell", "16"), unit("office:fonts", "16")];
        let target = [unit("office", "16")];
        let ops = diff_units(&observed, &target);

        assert_eq!(
            labels(&ops),
            vec!["- office:spell@16/x64", "- office:fonts@16/x64", "- office@16/x64"]
        );
    }

    #[test]
    fn test_removing_some_components_is_exact() {
        let observed = [unit("office", "16"), unit("office:spell", "16"), unit("office:fonts", "16")];
        let target = [unit("office", "16"), unit("office:fonts", "16")];
        let ops = diff_units(&observed, &target);

        assert_eq!(labels(&ops), vec!["- office:spell@16/x64"]);
    }

    #[test]
    fn test_replaced_parent_is_not_coupled() {
        let observed = [unit("office", "16"), unit("office:spell", "16")];
        let target = [unit("office", "17")];
        let ops = diff_units(&observed, &target);

        assert_eq!(
            labels(&ops),
            vec!["- office:spell@16/x64", "~ office@16/x64 -> office@17/x64"]
        );
    }

    #[test]
    fn test_swapped_component_keeps_parent() {
        let observed = [unit("office", "16"), unit("office:spell", "16")];
        let target = [unit("office", "16"), unit("office:fonts", "16")];
        let ops = diff_units(&observed, &target);

        assert_eq!(
            labels(&ops),
            vec!["- office:spell@16/x64", "+ office:fonts@16/x64"]
        );

        let mut manifest = Manifest::from_units(observed);
        manifest.advance(&ops, chrono::Utc::now());
        let names: Vec<&str> = manifest.entries().iter().map(|e| e.unit.name.as_str()).collect();
        assert_eq!(names, vec!["office", "office:fonts"]);
    }

    #[test]
    fn test_engine_resolves_against_repository() {
        let repo = MockRepository::new()
            .with_unit("a", "1.0", "x64", "one")
            .with_unit("a", "2.0", "x64", "two")
            .with_unit("b", "1.0", "", "bee");
        let engine = ManifestDiffEngine::new(&repo);

        let observed = Manifest::from_units([unit("a", "1.0")]);
        let model = DesiredModel::parse("install a\ninstall b=1.0\n").unwrap();
        let ops = engine.diff(&observed, &model, "x64").unwrap();

        assert_eq!(
            labels(&ops),
            vec!["~ a@1.0/x64 -> a@2.0/x64", "+ b@1.0"]
        );
    }

    #[test]
    fn test_unresolved_directive_fails_whole_diff() {
        let repo = MockRepository::new().with_unit("a", "1.0", "x64", "one");
        let engine = ManifestDiffEngine::new(&repo);

        let model = DesiredModel::parse("install a\ninstall ghost=9\n").unwrap();
        let err = engine.diff(&Manifest::new(), &model, "x64").unwrap_err();
        match err {
            Error::Resolution { directive, source } => {
                assert_eq!(directive, "install ghost=9");
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_diff_summary() {
        let ops = diff_units(&[unit("a", "1.0")], &[unit("a", "2.0"), unit("b", "1.0")]);
        let summary = DiffSummary::from_operations(&ops);
        assert_eq!(summary.replaces, 1);
        assert_eq!(summary.installs, 1);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.to_string(), "1 to install, 1 to replace, 0 to remove");
    }
}
