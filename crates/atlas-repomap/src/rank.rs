use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use atlas_core::RankingConfig;

use crate::graph::ReferenceGraph;
use crate::parser::Tag;

/// A definition tag with its share of its file's importance.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTag {
    pub tag: Tag,
    /// Share of the file score earned by this identifier's incoming references.
    pub score: f64,
    /// Score of the defining file.
    pub file_score: f64,
}

/// Run personalized PageRank over the reference graph.
///
/// Returns one score per node, indexed like the graph. Scores are
/// non-negative and sum to 1 for a non-empty graph. Rank held by files with
/// no outgoing edges is redistributed according to the personalization
/// vector. A file that references other files keeps `self_loop_factor` of its
/// cross-file weight as an implicit self-loop, so referencing files score
/// above files that take part in no edge. Iteration stops after
/// `max_iterations` rounds or once the L1 change between rounds drops below
/// `tolerance`.
///
/// # Examples
///
/// ```
/// use std::collections::{BTreeMap, BTreeSet};
/// use atlas_core::{RankingConfig, TagKind};
/// use atlas_repomap::graph::{RankingInputs, ReferenceGraph};
/// use atlas_repomap::parser::Tag;
/// use atlas_repomap::rank::propagate;
/// use atlas_repomap::walker::Language;
///
/// let tag = |file: &str, kind| Tag {
///     file: file.into(),
///     name: "connect".into(),
///     kind,
///     line: 1,
///     language: Language::Python,
/// };
/// let mut tags = BTreeMap::new();
/// tags.insert("a.py".to_string(), vec![tag("a.py", TagKind::Definition)]);
/// tags.insert("b.py".to_string(), vec![tag("b.py", TagKind::Reference)]);
///
/// let empty = BTreeSet::new();
/// let inputs = RankingInputs { chat_files: &empty, mentioned_files: &empty, mentioned_idents: &empty };
/// let config = RankingConfig::default();
/// let graph = ReferenceGraph::build(&tags, &inputs, &config);
/// let scores = propagate(&graph, &config);
/// assert!(scores[0] > scores[1]);
/// assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
/// ```
pub fn propagate(graph: &ReferenceGraph, config: &RankingConfig) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let personalization = graph.personalization();
    let damping = config.damping;
    let outgoing: Vec<Vec<(usize, f64)>> = (0..n).map(|i| graph.outgoing(i)).collect();
    let baseline: Vec<f64> = outgoing
        .iter()
        .enumerate()
        .map(|(i, edges)| {
            let cross: f64 = edges.iter().filter(|(t, _)| *t != i).map(|(_, w)| w).sum();
            cross * config.self_loop_factor
        })
        .collect();
    let out_weight: Vec<f64> = outgoing
        .iter()
        .zip(&baseline)
        .map(|(edges, kept)| edges.iter().map(|(_, w)| w).sum::<f64>() + kept)
        .collect();

    let mut ranks = personalization.to_vec();
    let mut rounds = 0;
    for _ in 0..config.max_iterations {
        rounds += 1;
        let dangling: f64 = (0..n)
            .filter(|i| out_weight[*i] <= 0.0)
            .map(|i| ranks[i])
            .sum();

        let mut next: Vec<f64> = personalization
            .iter()
            .map(|p| (1.0 - damping) * p + damping * dangling * p)
            .collect();
        for (i, edges) in outgoing.iter().enumerate() {
            if out_weight[i] <= 0.0 {
                continue;
            }
            let share = damping * ranks[i] / out_weight[i];
            for (target, weight) in edges {
                next[*target] += share * weight;
            }
            next[i] += share * baseline[i];
        }

        let delta: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        ranks = next;
        if delta < config.tolerance {
            break;
        }
    }

    tracing::debug!(files = n, rounds, "propagated file scores");
    ranks
}

/// Spread file scores onto the definition tags of each file.
///
/// A definition receives the file's score times the fraction of the file's
/// incoming weight that references its identifier. In a file with no
/// incoming weight the score is split equally between its definitions; in a
/// referenced file, definitions nobody references score zero. Files in
/// `exclude_files` contribute nothing. The result is ordered by score
/// descending, then by path, line and name.
pub fn rank_definitions(
    graph: &ReferenceGraph,
    scores: &[f64],
    tags_by_file: &BTreeMap<String, Vec<Tag>>,
    exclude_files: &BTreeSet<String>,
) -> Vec<RankedTag> {
    let mut ranked = Vec::new();
    for (file, tags) in tags_by_file {
        if exclude_files.contains(file) {
            continue;
        }
        let Some(node) = graph.node_of(file) else {
            continue;
        };
        let file_score = scores.get(node).copied().unwrap_or(0.0);
        let incoming = graph.incoming_weight(node);

        let mut definitions_per_name: BTreeMap<&str, usize> = BTreeMap::new();
        for tag in tags.iter().filter(|t| t.is_definition()) {
            *definitions_per_name.entry(tag.name.as_str()).or_default() += 1;
        }
        let definition_count = definitions_per_name.values().sum::<usize>().max(1) as f64;

        for tag in tags.iter().filter(|t| t.is_definition()) {
            let score = if incoming > 0.0 {
                let copies = definitions_per_name
                    .get(tag.name.as_str())
                    .copied()
                    .unwrap_or(1) as f64;
                file_score * graph.ident_weight(file, &tag.name) / incoming / copies
            } else {
                file_score / definition_count
            };
            ranked.push(RankedTag {
                tag: tag.clone(),
                score,
                file_score,
            });
        }
    }

    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedTag, b: &RankedTag) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.tag.file.cmp(&b.tag.file))
        .then_with(|| a.tag.line.cmp(&b.tag.line))
        .then_with(|| a.tag.name.cmp(&b.tag.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RankingInputs;
    use crate::walker::Language;
    use atlas_core::TagKind;

    fn tag(file: &str, name: &str, kind: TagKind, line: u32) -> Tag {
        Tag {
            file: file.into(),
            name: name.into(),
            kind,
            line,
            language: Language::Python,
        }
    }

    fn group(entries: Vec<Tag>) -> BTreeMap<String, Vec<Tag>> {
        let mut map: BTreeMap<String, Vec<Tag>> = BTreeMap::new();
        for t in entries {
            map.entry(t.file.clone()).or_default().push(t);
        }
        map
    }

    fn rank(entries: Vec<Tag>, chat: &[&str]) -> (ReferenceGraph, Vec<f64>, Vec<RankedTag>) {
        let tags = group(entries);
        let chat: BTreeSet<String> = chat.iter().map(|s| s.to_string()).collect();
        let empty = BTreeSet::new();
        let inputs = RankingInputs {
            chat_files: &chat,
            mentioned_files: &empty,
            mentioned_idents: &empty,
        };
        let config = RankingConfig::default();
        let graph = ReferenceGraph::build(&tags, &inputs, &config);
        let scores = propagate(&graph, &config);
        let ranked = rank_definitions(&graph, &scores, &tags, &chat);
        (graph, scores, ranked)
    }

    fn scenario() -> Vec<Tag> {
        vec![
            tag("a.py", "foo", TagKind::Definition, 1),
            tag("b.py", "foo", TagKind::Reference, 3),
            tag("b.py", "foo", TagKind::Reference, 7),
            tag("c.py", "unrelated", TagKind::Definition, 1),
        ]
    }

    #[test]
    fn scores_sum_to_one() {
        let (_, scores, _) = rank(scenario(), &[]);
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| *s >= 0.0));
        assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn referenced_file_outranks_others() {
        let (graph, scores, _) = rank(scenario(), &[]);
        let a = scores[graph.node_of("a.py").unwrap()];
        let b = scores[graph.node_of("b.py").unwrap()];
        let c = scores[graph.node_of("c.py").unwrap()];
        assert!(a > b);
        assert!(a > c);
        assert!(b > c, "referencing file should outrank an isolated one");
    }

    #[test]
    fn definitions_inherit_reference_share() {
        let (_, _, ranked) = rank(scenario(), &[]);
        assert_eq!(ranked[0].tag.name, "foo");
        assert!(ranked[0].score > 0.0);
        let unrelated = ranked.iter().find(|r| r.tag.name == "unrelated").unwrap();
        assert!(unrelated.score > 0.0);
        assert_eq!(unrelated.score, unrelated.file_score);
    }

    #[test]
    fn unreferenced_file_splits_score_equally() {
        let (_, _, ranked) = rank(
            vec![
                tag("c.py", "alpha_one", TagKind::Definition, 1),
                tag("c.py", "beta_two", TagKind::Definition, 4),
            ],
            &[],
        );
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|r| r.score > 0.0));
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].score, ranked[0].file_score / 2.0);
    }

    #[test]
    fn unreferenced_definition_in_referenced_file_scores_zero() {
        let (_, _, ranked) = rank(
            vec![
                tag("a.py", "foo", TagKind::Definition, 1),
                tag("a.py", "never_called", TagKind::Definition, 5),
                tag("b.py", "foo", TagKind::Reference, 1),
            ],
            &[],
        );
        let foo = ranked.iter().find(|r| r.tag.name == "foo").unwrap();
        let unused = ranked.iter().find(|r| r.tag.name == "never_called").unwrap();
        assert!(foo.score > 0.0);
        assert_eq!(unused.score, 0.0);
    }

    #[test]
    fn chat_files_are_boosted_and_excluded() {
        let entries = vec![
            tag("chat.py", "helper_one", TagKind::Reference, 1),
            tag("one.py", "helper_one", TagKind::Definition, 1),
            tag("other.py", "helper_two", TagKind::Reference, 1),
            tag("two.py", "helper_two", TagKind::Definition, 1),
        ];
        let (_, _, ranked) = rank(entries, &["chat.py"]);
        assert_eq!(ranked[0].tag.file, "one.py");
        assert!(ranked.iter().all(|r| r.tag.file != "chat.py"));
    }

    #[test]
    fn ranking_is_deterministic() {
        let (_, first_scores, first) = rank(scenario(), &[]);
        let (_, second_scores, second) = rank(scenario(), &[]);
        assert_eq!(first, second);
        assert_eq!(first_scores, second_scores);
    }

    #[test]
    fn empty_graph_has_no_scores() {
        let (_, scores, ranked) = rank(Vec::new(), &[]);
        assert!(scores.is_empty());
        assert!(ranked.is_empty());
    }

    #[test]
    fn equal_scores_are_ordered_by_path_then_line() {
        let entries = vec![
            tag("z.py", "zulu", TagKind::Definition, 1),
            tag("a.py", "alpha_late", TagKind::Definition, 9),
            tag("a.py", "alpha_early", TagKind::Definition, 2),
            tag("m.py", "mike", TagKind::Definition, 1),
            tag("m.py", "mike_two", TagKind::Definition, 3),
        ];
        let (_, _, ranked) = rank(entries, &[]);
        // a.py and m.py split equal file scores two ways; z.py keeps a whole share
        assert_eq!(ranked[0].tag.file, "z.py");
        let order: Vec<(&str, u32)> = ranked[1..]
            .iter()
            .map(|r| (r.tag.file.as_str(), r.tag.line))
            .collect();
        assert_eq!(order, [("a.py", 2), ("a.py", 9), ("m.py", 1), ("m.py", 3)]);
    }
}
