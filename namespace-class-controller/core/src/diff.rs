//! Compares previously applied templates against the desired set.

use crate::template::{Template, TemplateId};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// Templates bucketed by how they changed between two revisions of a class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diff {
    /// Present only in the current set, in current order.
    pub added: Vec<Template>,
    /// Present in both sets with a different payload, in current order.
    pub changed: Vec<Template>,
    /// Present in both sets with an identical payload, in current order.
    pub unchanged: Vec<Template>,
    /// Present only in the previous set, in previous order.
    pub removed: Vec<Template>,
}

impl Diff {
    pub fn compute(previous: &[Template], current: &[Template]) -> Self {
        let prior = previous
            .iter()
            .map(|t| (t.id(), t))
            .collect::<HashMap<_, _>>();
        let desired = current.iter().map(Template::id).collect::<HashSet<_>>();

        let mut diff = Self::default();
        for tpl in current {
            match prior.get(tpl.id()) {
                None => diff.added.push(tpl.clone()),
                Some(prev) if *prev != tpl => diff.changed.push(tpl.clone()),
                Some(_) => diff.unchanged.push(tpl.clone()),
            }
        }
        diff.removed = previous
            .iter()
            .filter(|t| !desired.contains(t.id()))
            .cloned()
            .collect();
        diff
    }
}

/// Returns every identity in `previous` that is absent from `current`.
///
/// The result is unordered.
pub fn removed<'a>(
    previous: impl IntoIterator<Item = &'a TemplateId>,
    current: impl IntoIterator<Item = &'a TemplateId>,
) -> HashSet<TemplateId> {
    let current = current.into_iter().collect::<HashSet<_>>();
    previous
        .into_iter()
        .filter(|id| !current.contains(id))
        .cloned()
        .collect()
}
