//! ConditionTree construction, merging and serialization

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::operator::{AND, Element, FieldOperator, NOR, NOT, OR};

/// A sub-clause of `$and`/`$or`/`$not`/`$nor`
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Element(Element),
    Tree(ConditionTree),
}

impl Clause {
    pub fn to_document(&self) -> Map<String, Value> {
        match self {
            Clause::Element(element) => element.to_document(),
            Clause::Tree(tree) => tree.to_document(),
        }
    }
}

impl From<Element> for Clause {
    fn from(element: Element) -> Self {
        Clause::Element(element)
    }
}

impl From<FieldOperator> for Clause {
    fn from(op: FieldOperator) -> Self {
        Clause::Element(Element::Field(op))
    }
}

impl From<ConditionTree> for Clause {
    fn from(tree: ConditionTree) -> Self {
        Clause::Tree(tree)
    }
}

/// Boolean filter tree
///
/// Flat elements are implicitly AND-ed with each other and with every logical list.
/// Embeds hold sub-trees matched against the named sub-document. The tree owns all of
/// its children; merging moves the other tree's nodes in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionTree {
    elements: Vec<Element>,
    and: Vec<Clause>,
    or: Vec<Clause>,
    not: Vec<Clause>,
    nor: Vec<Clause>,
    embeds: Vec<(String, ConditionTree)>,
}

impl ConditionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append flat field conditions
    pub fn element<E: Into<Element>>(&mut self, ops: impl IntoIterator<Item = E>) -> &mut Self {
        self.elements.extend(ops.into_iter().map(Into::into));
        self
    }

    /// Append `$and` clauses
    pub fn and<C: Into<Clause>>(&mut self, clauses: impl IntoIterator<Item = C>) -> &mut Self {
        self.and.extend(clauses.into_iter().map(Into::into));
        self
    }

    /// Append `$or` clauses
    pub fn or<C: Into<Clause>>(&mut self, clauses: impl IntoIterator<Item = C>) -> &mut Self {
        self.or.extend(clauses.into_iter().map(Into::into));
        self
    }

    /// Append `$not` clauses; the list matches when not all of them hold
    pub fn not<C: Into<Clause>>(&mut self, clauses: impl IntoIterator<Item = C>) -> &mut Self {
        self.not.extend(clauses.into_iter().map(Into::into));
        self
    }

    /// Append `$nor` clauses; the list matches when none of them holds
    pub fn nor<C: Into<Clause>>(&mut self, clauses: impl IntoIterator<Item = C>) -> &mut Self {
        self.nor.extend(clauses.into_iter().map(Into::into));
        self
    }

    /// Child tree scoped under `name`, created on first use
    pub fn embed(&mut self, name: impl Into<String>) -> &mut ConditionTree {
        let name = name.into();
        let idx = match self.embeds.iter().position(|(n, _)| *n == name) {
            Some(idx) => idx,
            None => {
                self.embeds.push((name, ConditionTree::new()));
                self.embeds.len() - 1
            }
        };
        &mut self.embeds[idx].1
    }

    /// Move `other` into this tree: lists are concatenated and same-named embeds are
    /// merged recursively
    pub fn merge(&mut self, other: ConditionTree) -> &mut Self {
        let ConditionTree {
            elements,
            and,
            or,
            not,
            nor,
            embeds,
        } = other;
        self.elements.extend(elements);
        self.and.extend(and);
        self.or.extend(or);
        self.not.extend(not);
        self.nor.extend(nor);
        for (name, tree) in embeds {
            self.embed(name).merge(tree);
        }
        self
    }

    /// True when the tree constrains nothing. Embeds that are themselves empty
    /// place no constraint and are neither serialized nor evaluated.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
            && self.and.is_empty()
            && self.or.is_empty()
            && self.not.is_empty()
            && self.nor.is_empty()
            && self.embeds.iter().all(|(_, sub)| sub.is_empty())
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn and_clauses(&self) -> &[Clause] {
        &self.and
    }

    pub fn or_clauses(&self) -> &[Clause] {
        &self.or
    }

    pub fn not_clauses(&self) -> &[Clause] {
        &self.not
    }

    pub fn nor_clauses(&self) -> &[Clause] {
        &self.nor
    }

    pub fn embeds(&self) -> &[(String, ConditionTree)] {
        &self.embeds
    }

    /// Wire filter document.
    ///
    /// Key order: flat elements, `$and`, `$or`, `$not`, `$nor`, then embeds. Several
    /// operators on one key share one operator document; a collision that cannot be
    /// merged is appended to `$and` instead of being dropped.
    pub fn to_filter(&self) -> Value {
        Value::Object(self.to_document())
    }

    /// Compact JSON text of [`to_filter`](Self::to_filter)
    pub fn to_filter_string(&self) -> String {
        self.to_filter().to_string()
    }

    pub(crate) fn to_document(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let mut operator_keys: HashSet<&str> = HashSet::new();
        let mut spill: Vec<Value> = Vec::new();

        for element in &self.elements {
            match element {
                Element::Field(op) => {
                    let op_key = op.operator().as_str();
                    if !fields.contains_key(op.key()) {
                        let mut inner = Map::new();
                        inner.insert(op_key.to_string(), op.value().clone());
                        fields.insert(op.key().to_string(), Value::Object(inner));
                        operator_keys.insert(op.key());
                        continue;
                    }
                    let merged = operator_keys.contains(op.key())
                        && match fields.get_mut(op.key()) {
                            Some(Value::Object(inner)) if !inner.contains_key(op_key) => {
                                inner.insert(op_key.to_string(), op.value().clone());
                                true
                            }
                            _ => false,
                        };
                    if !merged {
                        spill.push(Value::Object(element.to_document()));
                    }
                }
                Element::KeyValue { key, value } => {
                    if fields.contains_key(key) {
                        spill.push(Value::Object(element.to_document()));
                    } else {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let mut embedded = Vec::with_capacity(self.embeds.len());
        for (name, tree) in self.embeds.iter().filter(|(_, sub)| !sub.is_empty()) {
            let doc = Value::Object(tree.to_document());
            if fields.contains_key(name) {
                let mut wrapper = Map::new();
                wrapper.insert(name.clone(), doc);
                spill.push(Value::Object(wrapper));
            } else {
                embedded.push((name.clone(), doc));
            }
        }

        let mut doc = fields;
        let mut and: Vec<Value> = self
            .and
            .iter()
            .map(|c| Value::Object(c.to_document()))
            .collect();
        and.extend(spill);
        for (key, list) in [
            (AND, and),
            (OR, clause_documents(&self.or)),
            (NOT, clause_documents(&self.not)),
            (NOR, clause_documents(&self.nor)),
        ] {
            if !list.is_empty() {
                doc.insert(key.to_string(), Value::Array(list));
            }
        }
        for (name, sub) in embedded {
            doc.insert(name, sub);
        }
        doc
    }
}

fn clause_documents(clauses: &[Clause]) -> Vec<Value> {
    clauses
        .iter()
        .map(|c| Value::Object(c.to_document()))
        .collect()
}

/// Shorthand for a tree holding one equality element per pair
pub fn equals<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ConditionTree
where
    K: Into<String>,
    V: Into<Value>,
{
    let mut tree = ConditionTree::new();
    tree.element(pairs.into_iter().map(|(k, v)| FieldOperator::eq(k, v)));
    tree
}
