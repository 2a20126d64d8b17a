//! Records from RDF/XML graphs (DCAT catalogs and similar).
//!
//! Every subject described at the top level of the document becomes a
//! record. A record is a standalone `rdf:RDF` document holding all
//! descriptions of the subject plus, transitively, the descriptions of the
//! resources it refers to, so a dataset carries its distributions, contact
//! points and so on.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::{expect_xml, ExtractContext, RecordExtractor};
use crate::error::Result;
use crate::ident;
use crate::sniff::RDF_NAMESPACE;
use crate::tree::Element;
use crate::types::{Format, Payload, RecordBatch};

/// Extracts one record per distinct `rdf:about` subject.
pub struct RdfExtractor;

impl RecordExtractor for RdfExtractor {
    fn format(&self) -> Format {
        Format::RdfXml
    }

    fn extract(&self, payload: &Payload, context: &mut ExtractContext<'_>) -> Result<RecordBatch> {
        let doc = expect_xml(payload)?;
        let graph = Graph::build(&doc.root);
        tracing::debug!(
            url = context.url,
            count = graph.subjects.len(),
            "Records found in RDF/XML response"
        );

        let mut batch = RecordBatch::new();
        for subject in &graph.subjects {
            batch.insert(ident::content_hash(subject), graph.record(subject));
        }
        Ok(batch)
    }
}

/// A node element describing a subject.
struct Description<'a> {
    element: &'a Element,
    /// Index of the enclosing top-level description in the document root.
    top: usize,
}

/// Descriptions of the document indexed by subject key.
///
/// Keys are subject URIs, or `_:<id>` for blank nodes with an `rdf:nodeID`.
struct Graph<'a> {
    root: &'a Element,
    descriptions: HashMap<String, Vec<Description<'a>>>,
    /// URIs described at the top level, in document order.
    subjects: Vec<String>,
}

impl<'a> Graph<'a> {
    fn build(root: &'a Element) -> Self {
        let mut graph = Self {
            root,
            descriptions: HashMap::new(),
            subjects: Vec::new(),
        };
        let mut seen = HashSet::new();

        for (top, node) in root.children.iter().enumerate() {
            if let Some(about) = node.attribute_ns(RDF_NAMESPACE, "about") {
                if seen.insert(about.to_string()) {
                    graph.subjects.push(about.to_string());
                }
            }
            graph.index(node, top);
        }
        graph
    }

    fn index(&mut self, node: &'a Element, top: usize) {
        if let Some(key) = subject_key(node) {
            self.descriptions
                .entry(key)
                .or_default()
                .push(Description { element: node, top });
        }
        for property in &node.children {
            for nested in &property.children {
                self.index(nested, top);
            }
        }
    }

    /// Build the `rdf:RDF` document for one subject.
    fn record(&self, subject: &str) -> Element {
        let mut out = Element {
            name: self.root.name.clone(),
            prefix: self.root.prefix.clone(),
            namespace: self.root.namespace.clone(),
            text: None,
            attributes: self.root.attributes.clone(),
            children: Vec::new(),
        };

        // Descriptions reachable from the subject, in discovery order
        let mut reached: Vec<&Description<'a>> = Vec::new();
        let mut visited = HashSet::from([subject.to_string()]);
        let mut queue = VecDeque::from([subject.to_string()]);

        while let Some(key) = queue.pop_front() {
            let Some(descriptions) = self.descriptions.get(&key) else {
                continue;
            };
            for description in descriptions {
                reached.push(description);

                let mut references = Vec::new();
                collect_references(description.element, &mut references);
                for reference in references {
                    if visited.insert(reference.clone()) {
                        queue.push_back(reference);
                    }
                }
            }
        }

        // A nested description is already part of its top-level description
        // when that one is included, whichever was reached first.
        let included_tops: BTreeSet<usize> = reached
            .iter()
            .filter(|d| self.is_top(d))
            .map(|d| d.top)
            .collect();
        let mut emitted_tops = BTreeSet::new();
        for description in reached {
            if self.is_top(description) {
                if emitted_tops.insert(description.top) {
                    out.push_child(description.element.clone());
                }
            } else if !included_tops.contains(&description.top) {
                out.push_child(description.element.clone());
            }
        }
        out
    }

    fn is_top(&self, description: &Description<'_>) -> bool {
        std::ptr::eq(description.element, &self.root.children[description.top])
    }
}

fn subject_key(node: &Element) -> Option<String> {
    if let Some(about) = node.attribute_ns(RDF_NAMESPACE, "about") {
        return Some(about.to_string());
    }
    node.attribute_ns(RDF_NAMESPACE, "nodeID")
        .map(|id| format!("_:{id}"))
}

/// Collect the subjects a node element refers to, through its property
/// elements and any nested descriptions.
fn collect_references(node: &Element, out: &mut Vec<String>) {
    for property in &node.children {
        if let Some(resource) = property.attribute_ns(RDF_NAMESPACE, "resource") {
            out.push(resource.to_string());
        }
        if let Some(id) = property.attribute_ns(RDF_NAMESPACE, "nodeID") {
            out.push(format!("_:{id}"));
        }
        for nested in &property.children {
            if let Some(key) = subject_key(nested) {
                out.push(key);
            }
            collect_references(nested, out);
        }
    }
}
