use std::collections::{BTreeMap, BTreeSet};

use atlas_core::{RankingConfig, TagKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::parser::Tag;

/// Identifiers too generic to say much about how files relate.
const COMMON_NAMES: &[&str] = &[
    "get", "set", "run", "main", "init", "__init__", "new", "self", "this", "data", "value",
    "values", "name", "id", "key", "keys", "item", "items", "test", "setup", "start", "stop",
    "update", "call", "apply", "next", "len", "size", "type", "string", "list", "dict", "map",
    "result", "error", "default", "clone", "print", "log", "format", "to_string", "tostring",
    "equals", "hashcode", "__str__", "__repr__", "__eq__", "__call__",
];

/// Caller hints that bias the ranking.
#[derive(Debug, Clone, Copy)]
pub struct RankingInputs<'a> {
    /// Files the caller is actively working on.
    pub chat_files: &'a BTreeSet<String>,
    /// Files named in the conversation.
    pub mentioned_files: &'a BTreeSet<String>,
    /// Identifiers named in the conversation.
    pub mentioned_idents: &'a BTreeSet<String>,
}

/// One weighted "file `from` references identifier `ident` defined in file `to`".
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEdge {
    pub from: String,
    pub to: String,
    pub ident: String,
    pub weight: f64,
}

/// Directed graph of files linked by identifier references.
///
/// Nodes are files that produced at least one tag, inserted in path order so
/// node indices are stable for a given file set. Parallel edges between two
/// files are merged by summing their weights.
///
/// # Examples
///
/// ```
/// use std::collections::{BTreeMap, BTreeSet};
/// use atlas_core::{RankingConfig, TagKind};
/// use atlas_repomap::graph::{RankingInputs, ReferenceGraph};
/// use atlas_repomap::parser::Tag;
/// use atlas_repomap::walker::Language;
///
/// let tag = |file: &str, name: &str, kind| Tag {
///     file: file.into(),
///     name: name.into(),
///     kind,
///     line: 1,
///     language: Language::Python,
/// };
/// let mut tags = BTreeMap::new();
/// tags.insert("a.py".to_string(), vec![tag("a.py", "connect", TagKind::Definition)]);
/// tags.insert("b.py".to_string(), vec![tag("b.py", "connect", TagKind::Reference)]);
///
/// let empty = BTreeSet::new();
/// let inputs = RankingInputs {
///     chat_files: &empty,
///     mentioned_files: &empty,
///     mentioned_idents: &empty,
/// };
/// let graph = ReferenceGraph::build(&tags, &inputs, &RankingConfig::default());
/// assert_eq!(graph.node_count(), 2);
/// assert!(graph.weight_between("b.py", "a.py").unwrap() > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceGraph {
    graph: DiGraph<String, f64>,
    index: BTreeMap<String, NodeIndex>,
    edges: Vec<ReferenceEdge>,
    personalization: Vec<f64>,
    ident_weights: BTreeMap<(String, String), f64>,
    incoming: Vec<f64>,
}

impl ReferenceGraph {
    /// Build the graph from every file's tags.
    ///
    /// For each identifier that is both defined and referenced, every
    /// referencing file gets an edge to every defining file. The edge weight is
    /// the number of references times the identifier's multiplier: rare
    /// identifiers are boosted, noisy ones dampened, mentioned ones boosted,
    /// and references resolving inside their own file are dampened.
    pub fn build(
        tags_by_file: &BTreeMap<String, Vec<Tag>>,
        inputs: &RankingInputs<'_>,
        config: &RankingConfig,
    ) -> Self {
        let mut defines: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut references: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
        for (file, tags) in tags_by_file {
            for tag in tags {
                match tag.kind {
                    TagKind::Definition => {
                        defines
                            .entry(tag.name.as_str())
                            .or_default()
                            .insert(file.as_str());
                    }
                    TagKind::Reference => {
                        *references
                            .entry(tag.name.as_str())
                            .or_default()
                            .entry(file.as_str())
                            .or_default() += 1;
                    }
                }
            }
        }

        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for (file, tags) in tags_by_file {
            if tags.is_empty() {
                continue;
            }
            let node = graph.add_node(file.clone());
            index.insert(file.clone(), node);
        }

        let mut edges = Vec::new();
        for (ident, definers) in &defines {
            let Some(referrers) = references.get(ident) else {
                continue;
            };
            let multiplier = identifier_multiplier(ident, referrers, definers.len(), inputs, config);
            for (referrer, count) in referrers {
                for definer in definers {
                    let mut weight = *count as f64 * multiplier;
                    if referrer == definer {
                        weight *= config.self_loop_factor;
                    }
                    edges.push(ReferenceEdge {
                        from: (*referrer).to_string(),
                        to: (*definer).to_string(),
                        ident: (*ident).to_string(),
                        weight,
                    });
                }
            }
        }

        let mut condensed: BTreeMap<(NodeIndex, NodeIndex), f64> = BTreeMap::new();
        let mut ident_weights: BTreeMap<(String, String), f64> = BTreeMap::new();
        let mut incoming = vec![0.0; graph.node_count()];
        for edge in &edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                continue;
            };
            *condensed.entry((from, to)).or_default() += edge.weight;
            *ident_weights
                .entry((edge.to.clone(), edge.ident.clone()))
                .or_default() += edge.weight;
            incoming[to.index()] += edge.weight;
        }
        for ((from, to), weight) in condensed {
            graph.add_edge(from, to, weight);
        }

        let priors: Vec<f64> = graph
            .node_indices()
            .map(|node| prior(&graph[node], inputs, config))
            .collect();
        let total: f64 = priors.iter().sum();
        let personalization = if total > 0.0 {
            priors.iter().map(|p| p / total).collect()
        } else {
            priors
        };

        tracing::debug!(
            files = graph.node_count(),
            edges = graph.edge_count(),
            references = edges.len(),
            "built reference graph"
        );

        Self {
            graph,
            index,
            edges,
            personalization,
            ident_weights,
            incoming,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of merged file-to-file edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every identifier-level edge, before merging.
    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    /// File path of node `i`.
    pub fn file(&self, i: usize) -> &str {
        &self.graph[NodeIndex::new(i)]
    }

    pub fn node_of(&self, file: &str) -> Option<usize> {
        self.index.get(file).map(|n| n.index())
    }

    /// Normalized prior distribution, indexed by node. Sums to 1 when non-empty.
    pub fn personalization(&self) -> &[f64] {
        &self.personalization
    }

    /// Outgoing `(target, weight)` pairs of node `i`, ordered by target.
    pub fn outgoing(&self, i: usize) -> Vec<(usize, f64)> {
        let mut out: Vec<(usize, f64)> = self
            .graph
            .edges(NodeIndex::new(i))
            .map(|e| (e.target().index(), *e.weight()))
            .collect();
        out.sort_by_key(|(target, _)| *target);
        out
    }

    /// Merged weight of the edge `from -> to`, if any.
    pub fn weight_between(&self, from: &str, to: &str) -> Option<f64> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        self.graph
            .find_edge(from, to)
            .and_then(|e| self.graph.edge_weight(e))
            .copied()
    }

    /// Incoming weight into `file` attributable to `ident`.
    pub fn ident_weight(&self, file: &str, ident: &str) -> f64 {
        self.ident_weights
            .get(&(file.to_string(), ident.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Total incoming weight into node `i`.
    pub fn incoming_weight(&self, i: usize) -> f64 {
        self.incoming.get(i).copied().unwrap_or(0.0)
    }
}

fn identifier_multiplier(
    ident: &str,
    referrers: &BTreeMap<&str, usize>,
    definer_count: usize,
    inputs: &RankingInputs<'_>,
    config: &RankingConfig,
) -> f64 {
    let mut multiplier = 1.0;
    let total_references: usize = referrers.values().sum();
    if total_references == 1 {
        multiplier *= config.rare_boost;
    }
    if is_noisy(ident, definer_count, config) {
        multiplier *= config.noisy_dampen;
    }
    if inputs.mentioned_idents.contains(ident) {
        multiplier *= config.mentioned_ident_boost;
    }
    multiplier
}

/// Whether an identifier is too short, generic, private or widely defined to
/// carry much signal.
///
/// # Examples
///
/// ```
/// use atlas_core::RankingConfig;
/// use atlas_repomap::graph::is_noisy;
///
/// let config = RankingConfig::default();
/// assert!(is_noisy("id", 1, &config));
/// assert!(is_noisy("get", 1, &config));
/// assert!(is_noisy("_private", 1, &config));
/// assert!(is_noisy("connect_database", 9, &config));
/// assert!(!is_noisy("connect_database", 1, &config));
/// ```
pub fn is_noisy(ident: &str, definer_count: usize, config: &RankingConfig) -> bool {
    let private = ident.starts_with('_') && !(ident.starts_with("__") && ident.ends_with("__"));
    private
        || ident.chars().count() <= config.noisy_max_len
        || COMMON_NAMES.contains(&ident.to_lowercase().as_str())
        || definer_count > config.widely_defined_threshold
}

fn prior(file: &str, inputs: &RankingInputs<'_>, config: &RankingConfig) -> f64 {
    if inputs.chat_files.contains(file) {
        config.chat_prior
    } else if is_mentioned(file, inputs.mentioned_files) {
        config.mentioned_prior
    } else {
        config.other_prior
    }
}

/// A file is mentioned by its relative path or, for bare names, its file name.
fn is_mentioned(file: &str, mentioned: &BTreeSet<String>) -> bool {
    if mentioned.contains(file) {
        return true;
    }
    let base = file.rsplit('/').next().unwrap_or(file);
    mentioned.iter().any(|m| !m.contains('/') && m == base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::Language;

    fn tag(file: &str, name: &str, kind: TagKind, line: u32) -> Tag {
        Tag {
            file: file.into(),
            name: name.into(),
            kind,
            line,
            language: Language::Python,
        }
    }

    fn def(file: &str, name: &str) -> Tag {
        tag(file, name, TagKind::Definition, 1)
    }

    fn reference(file: &str, name: &str) -> Tag {
        tag(file, name, TagKind::Reference, 2)
    }

    fn tags(entries: Vec<Tag>) -> BTreeMap<String, Vec<Tag>> {
        let mut map: BTreeMap<String, Vec<Tag>> = BTreeMap::new();
        for t in entries {
            map.entry(t.file.clone()).or_default().push(t);
        }
        map
    }

    fn build(entries: Vec<Tag>, mentioned_idents: &[&str]) -> ReferenceGraph {
        let empty = BTreeSet::new();
        let idents: BTreeSet<String> = mentioned_idents.iter().map(|s| s.to_string()).collect();
        let inputs = RankingInputs {
            chat_files: &empty,
            mentioned_files: &empty,
            mentioned_idents: &idents,
        };
        ReferenceGraph::build(&tags(entries), &inputs, &RankingConfig::default())
    }

    #[test]
    fn edges_run_from_referrer_to_definer() {
        let graph = build(
            vec![
                def("a.py", "foo"),
                reference("b.py", "foo"),
                reference("b.py", "foo"),
                def("c.py", "unused"),
            ],
            &[],
        );
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
        // Two references, not rare, not noisy
        assert_eq!(graph.weight_between("b.py", "a.py"), Some(2.0));
        assert_eq!(graph.weight_between("a.py", "b.py"), None);
        assert_eq!(graph.ident_weight("a.py", "foo"), 2.0);
    }

    #[test]
    fn rare_identifiers_are_boosted() {
        let graph = build(vec![def("a.py", "connect"), reference("b.py", "connect")], &[]);
        assert_eq!(graph.weight_between("b.py", "a.py"), Some(2.0));
    }

    #[test]
    fn noisy_identifiers_are_dampened() {
        let graph = build(
            vec![
                def("a.py", "get"),
                reference("b.py", "get"),
                reference("b.py", "get"),
            ],
            &[],
        );
        let weight = graph.weight_between("b.py", "a.py").unwrap();
        assert!((weight - 0.2).abs() < 1e-12);
    }

    #[test]
    fn mentioned_identifiers_are_boosted() {
        let plain = build(
            vec![def("a.py", "connect"), reference("b.py", "connect"), reference("b.py", "connect")],
            &[],
        );
        let mentioned = build(
            vec![def("a.py", "connect"), reference("b.py", "connect"), reference("b.py", "connect")],
            &["connect"],
        );
        let plain_weight = plain.weight_between("b.py", "a.py").unwrap();
        let mentioned_weight = mentioned.weight_between("b.py", "a.py").unwrap();
        assert!(mentioned_weight > plain_weight);
    }

    #[test]
    fn self_references_are_dampened() {
        let graph = build(
            vec![def("a.py", "helper"), reference("a.py", "helper"), reference("a.py", "helper")],
            &[],
        );
        let weight = graph.weight_between("a.py", "a.py").unwrap();
        assert!((weight - 0.2).abs() < 1e-12);
    }

    #[test]
    fn widely_defined_identifiers_are_noisy() {
        let mut entries: Vec<Tag> = (0..6).map(|i| def(&format!("m{i}.py"), "handler")).collect();
        entries.push(reference("caller.py", "handler"));
        entries.push(reference("caller.py", "handler"));
        let graph = build(entries, &[]);
        let weight = graph.weight_between("caller.py", "m0.py").unwrap();
        assert!((weight - 0.2).abs() < 1e-12);
        assert_eq!(graph.edges().len(), 6);
    }

    #[test]
    fn personalization_favours_chat_and_mentioned_files() {
        let chat: BTreeSet<String> = ["a.py".to_string()].into_iter().collect();
        let mentioned: BTreeSet<String> = ["b.py".to_string()].into_iter().collect();
        let empty = BTreeSet::new();
        let inputs = RankingInputs {
            chat_files: &chat,
            mentioned_files: &mentioned,
            mentioned_idents: &empty,
        };
        let graph = ReferenceGraph::build(
            &tags(vec![def("a.py", "x1"), def("src/b.py", "x2"), def("c.py", "x3")]),
            &inputs,
            &RankingConfig::default(),
        );
        let p = graph.personalization();
        let a = p[graph.node_of("a.py").unwrap()];
        let b = p[graph.node_of("src/b.py").unwrap()];
        let c = p[graph.node_of("c.py").unwrap()];
        assert!(a > b && b > c);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nodes_are_in_path_order() {
        let graph = build(vec![def("z.py", "zeta"), def("a.py", "alpha")], &[]);
        assert_eq!(graph.file(0), "a.py");
        assert_eq!(graph.file(1), "z.py");
    }

    #[test]
    fn dunder_names_are_not_private() {
        let config = RankingConfig::default();
        assert!(!is_noisy("__enter__", 1, &config));
        assert!(is_noisy("__init__", 1, &config));
    }
}
