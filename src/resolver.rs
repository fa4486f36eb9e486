use crate::period::FactValues;
use crate::schema::Period;
use crate::tree::{CanonicalForest, NodeId, Resolution, ResolvedValue, TaxonomyTrees, ValueOrigin};
use log::debug;

/// Evaluates a canonical forest against one period's reported facts.
///
/// A node takes the reported value for its own code when there is one, even if its
/// children are also reported. Otherwise it becomes the signed sum of whichever children
/// resolve, where a child whose polarity differs from the parent's is subtracted. A node
/// none of whose children resolve stays unresolved.
pub struct ValueResolver<'a> {
    forest: &'a CanonicalForest,
}

impl<'a> ValueResolver<'a> {
    pub fn new(forest: &'a CanonicalForest) -> Self {
        Self { forest }
    }

    pub fn resolve(&self, facts: &FactValues) -> Resolution {
        self.resolve_for(facts, None)
    }

    pub fn resolve_for(&self, facts: &FactValues, period: Option<Period>) -> Resolution {
        let mut resolution = Resolution::empty(self.forest.len(), period);

        for &root in self.forest.roots() {
            self.resolve_node(root, facts, &mut resolution);
        }

        match resolution.period() {
            Some(period) => debug!(
                "Resolved {}/{} nodes in hierarchy '{}' for {}",
                resolution.resolved_count(),
                self.forest.len(),
                self.forest.name(),
                period
            ),
            None => debug!(
                "Resolved {}/{} nodes in hierarchy '{}'",
                resolution.resolved_count(),
                self.forest.len(),
                self.forest.name()
            ),
        }

        resolution
    }

    /// Post-order walk. Children are always visited so that every node gets its own value,
    /// including those under a directly reported parent.
    fn resolve_node(&self, id: NodeId, facts: &FactValues, resolution: &mut Resolution) {
        let node = self.forest.node(id);
        for &child in &node.children {
            self.resolve_node(child, facts, resolution);
        }

        if let Some(&value) = facts.get(&node.code) {
            resolution.set(
                id,
                ResolvedValue {
                    value,
                    origin: ValueOrigin::Reported,
                },
            );
        } else if let Some(value) = signed_children_sum(self.forest, resolution, id) {
            resolution.set(
                id,
                ResolvedValue {
                    value,
                    origin: ValueOrigin::Aggregated,
                },
            );
        }
    }
}

/// `Σ child × sign(child)` over the resolved children of `id`, or `None` if no child resolved.
pub fn signed_children_sum(
    forest: &CanonicalForest,
    resolution: &Resolution,
    id: NodeId,
) -> Option<f64> {
    let node = forest.node(id);
    let mut total: Option<f64> = None;

    for &child_id in &node.children {
        if let Some(value) = resolution.value(child_id) {
            let sign = forest.node(child_id).polarity.sign_within(node.polarity);
            total = Some(total.unwrap_or(0.0) + sign * value);
        }
    }

    total
}

/// Resolves every hierarchy of a taxonomy against the same facts.
pub fn resolve_all<'t>(
    trees: &'t TaxonomyTrees,
    facts: &FactValues,
    period: Option<Period>,
) -> Vec<(&'t CanonicalForest, Resolution)> {
    trees
        .forests()
        .map(|forest| (forest, ValueResolver::new(forest).resolve_for(facts, period)))
        .collect()
}
