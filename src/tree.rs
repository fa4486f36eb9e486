//! Canonical tree templates.
//!
//! A taxonomy ships a set of named hierarchies (assets, liabilities, revenue, ...). Each
//! hierarchy is loaded once into an index arena ([`CanonicalForest`]) and never mutated
//! afterwards; per-request values live in a separate [`Resolution`] overlay indexed by
//! [`NodeId`], so one template can serve any number of concurrent requests.

use crate::error::{NormalizationError, Result};
use crate::schema::{Period, PeriodType, Polarity};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Serialized form of a template node, as stored in taxonomy tree files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeDefinition {
    #[serde(alias = "name")]
    #[schemars(description = "Taxonomy element name this node stands for, unique within its hierarchy")]
    pub code: String,

    #[serde(alias = "balance")]
    #[schemars(description = "Normal balance of the element. A child of opposite polarity is subtracted from its parent.")]
    pub polarity: Polarity,

    #[serde(default)]
    pub period_type: Option<PeriodType>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub children: Vec<NodeDefinition>,
}

impl NodeDefinition {
    pub fn new(code: &str, polarity: Polarity) -> Self {
        Self {
            code: code.to_string(),
            polarity,
            period_type: None,
            description: None,
            children: Vec::new(),
        }
    }

    pub fn with_period_type(mut self, period_type: PeriodType) -> Self {
        self.period_type = Some(period_type);
        self
    }

    pub fn with_children(mut self, children: Vec<NodeDefinition>) -> Self {
        self.children = children;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct TemplateNode {
    pub code: String,
    pub polarity: Polarity,
    pub period_type: Option<PeriodType>,
    pub description: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// One named hierarchy family, flattened into an arena. Codes are unique within it.
#[derive(Debug, Clone)]
pub struct CanonicalForest {
    name: String,
    nodes: Vec<TemplateNode>,
    roots: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

impl CanonicalForest {
    pub fn from_definitions(name: &str, roots: &[NodeDefinition]) -> Result<Self> {
        let mut forest = Self {
            name: name.to_string(),
            nodes: Vec::new(),
            roots: Vec::with_capacity(roots.len()),
            index: HashMap::new(),
        };

        for root in roots {
            let id = forest.insert(root, None)?;
            forest.roots.push(id);
        }

        Ok(forest)
    }

    fn insert(&mut self, definition: &NodeDefinition, parent: Option<NodeId>) -> Result<NodeId> {
        let code = definition.code.trim();
        if code.is_empty() {
            return Err(NormalizationError::InvalidTree(format!(
                "hierarchy '{}' contains a node with an empty code",
                self.name
            )));
        }
        if self.index.contains_key(code) {
            return Err(NormalizationError::InvalidTree(format!(
                "code '{}' appears more than once in hierarchy '{}'",
                code, self.name
            )));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(TemplateNode {
            code: code.to_string(),
            polarity: definition.polarity,
            period_type: definition.period_type,
            description: definition.description.clone(),
            parent,
            children: Vec::with_capacity(definition.children.len()),
        });
        self.index.insert(code.to_string(), id);

        for child in &definition.children {
            let child_id = self.insert(child, Some(id))?;
            self.nodes[id.0].children.push(child_id);
        }

        Ok(id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &TemplateNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, code: &str) -> Option<NodeId> {
        self.index.get(code).copied()
    }

    /// All node ids in insertion (pre-)order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn to_definitions(&self) -> Vec<NodeDefinition> {
        self.roots.iter().map(|&id| self.definition_of(id)).collect()
    }

    fn definition_of(&self, id: NodeId) -> NodeDefinition {
        let node = self.node(id);
        NodeDefinition {
            code: node.code.clone(),
            polarity: node.polarity,
            period_type: node.period_type,
            description: node.description.clone(),
            children: node.children.iter().map(|&c| self.definition_of(c)).collect(),
        }
    }

    /// Builds the nested view of this forest with the values from `resolution` attached.
    pub fn materialize(&self, resolution: &Resolution) -> Vec<ResolvedNode> {
        self.roots
            .iter()
            .map(|&id| self.materialize_node(id, resolution))
            .collect()
    }

    fn materialize_node(&self, id: NodeId, resolution: &Resolution) -> ResolvedNode {
        let node = self.node(id);
        let resolved = resolution.get(id);
        ResolvedNode {
            code: node.code.clone(),
            polarity: node.polarity,
            period_type: node.period_type,
            resolved_value: resolved.map(|r| r.value),
            origin: resolved.map(|r| r.origin),
            children: node
                .children
                .iter()
                .map(|&c| self.materialize_node(c, resolution))
                .collect(),
        }
    }
}

/// Every hierarchy of one taxonomy, keyed by hierarchy name.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyTrees {
    forests: BTreeMap<String, CanonicalForest>,
}

impl TaxonomyTrees {
    pub fn from_definitions(definitions: BTreeMap<String, Vec<NodeDefinition>>) -> Result<Self> {
        let mut forests = BTreeMap::new();
        for (name, roots) in definitions {
            let forest = CanonicalForest::from_definitions(&name, &roots)?;
            forests.insert(name, forest);
        }
        Ok(Self { forests })
    }

    /// Parses `{ "<hierarchy>": [ <node>, ... ], ... }`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let definitions: BTreeMap<String, Vec<NodeDefinition>> = serde_json::from_str(json)?;
        Self::from_definitions(definitions)
    }

    pub fn forests(&self) -> impl Iterator<Item = &CanonicalForest> {
        self.forests.values()
    }

    pub fn forest(&self, name: &str) -> Option<&CanonicalForest> {
        self.forests.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.forests.values().all(|f| f.is_empty())
    }

    pub fn node_count(&self) -> usize {
        self.forests.values().map(|f| f.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueOrigin {
    /// Taken directly from a reported fact for the node's code.
    Reported,
    /// Signed sum of the node's resolved children.
    Aggregated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub value: f64,
    pub origin: ValueOrigin,
}

/// Per-request values for one [`CanonicalForest`], indexed by [`NodeId`].
#[derive(Debug, Clone)]
pub struct Resolution {
    period: Option<Period>,
    values: Vec<Option<ResolvedValue>>,
}

impl Resolution {
    pub(crate) fn empty(len: usize, period: Option<Period>) -> Self {
        Self {
            period,
            values: vec![None; len],
        }
    }

    pub fn period(&self) -> Option<Period> {
        self.period
    }

    pub fn get(&self, id: NodeId) -> Option<ResolvedValue> {
        self.values.get(id.0).copied().flatten()
    }

    pub fn value(&self, id: NodeId) -> Option<f64> {
        self.get(id).map(|r| r.value)
    }

    pub(crate) fn set(&mut self, id: NodeId, value: ResolvedValue) {
        self.values[id.0] = Some(value);
    }

    pub fn resolved_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Nested tree view with values attached, for callers that want the hierarchy itself.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedNode {
    pub code: String,
    pub polarity: Polarity,
    pub period_type: Option<PeriodType>,
    pub resolved_value: Option<f64>,
    pub origin: Option<ValueOrigin>,
    pub children: Vec<ResolvedNode>,
}
