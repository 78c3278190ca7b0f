use narwhal::algo::sphere::place_communities;
use narwhal::{
    Community, Entity, LayoutConfig, LayoutGraph, LayoutPath, Position, PreviousLayout, Relation,
    compute_layout, fingerprint,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone)]
struct GraphCase {
    nodes: usize,
    communities: usize,
    membership: Vec<usize>,
    edges: Vec<(usize, usize)>,
    observations: Vec<u64>,
}

impl GraphCase {
    fn build(&self) -> LayoutGraph {
        let id = |i: usize| format!("n{i}");
        let entities = (0..self.nodes)
            .map(|i| Entity::new(id(i)).with_observations(self.observations[i]))
            .collect();
        let relations = self
            .edges
            .iter()
            .map(|&(a, b)| Relation::new(id(a % self.nodes), "rel", id(b % self.nodes)))
            .collect();
        // Slot `communities` means "no community".
        let communities = (0..self.communities)
            .map(|c| {
                let members = (0..self.nodes).filter(|&i| self.membership[i] == c).map(id);
                Community::new(format!("c{c}"), members)
            })
            .collect();
        LayoutGraph::new(entities, relations, communities)
    }
}

fn graph_case() -> impl Strategy<Value = GraphCase> {
    (1usize..24, 0usize..5).prop_flat_map(|(nodes, communities)| {
        (
            proptest::collection::vec(0..=communities, nodes),
            proptest::collection::vec((0..nodes, 0..nodes), 0..nodes * 2),
            proptest::collection::vec(0u64..50, nodes),
        )
            .prop_map(move |(membership, edges, observations)| GraphCase {
                nodes,
                communities,
                membership,
                edges,
                observations,
            })
    })
}

/// A connected-ish base graph plus one edit: a new node linked to `targets`, and optionally one
/// existing relation removed.
#[derive(Debug, Clone)]
struct EditCase {
    nodes: usize,
    communities: usize,
    edges: Vec<(usize, usize)>,
    targets: Vec<usize>,
    removed: Option<usize>,
}

impl EditCase {
    fn base(&self) -> LayoutGraph {
        let id = |i: usize| format!("n{i:02}");
        let entities = (0..self.nodes).map(|i| Entity::new(id(i))).collect();
        let mut seen = BTreeSet::new();
        let relations = self
            .edges
            .iter()
            .map(|&(a, b)| (a % self.nodes, b % self.nodes))
            .filter(|&(a, b)| a != b && seen.insert((a, b)))
            .map(|(a, b)| Relation::new(id(a), "rel", id(b)))
            .collect();
        let communities = (0..self.communities)
            .map(|c| {
                let members = (0..self.nodes).filter(|i| i % self.communities == c).map(id);
                Community::new(format!("c{c}"), members)
            })
            .collect();
        LayoutGraph::new(entities, relations, communities)
    }

    fn edited(&self, base: &LayoutGraph) -> (LayoutGraph, Option<Relation>) {
        let mut graph = base.clone();
        graph.entities.push(Entity::new("new"));
        graph.communities[0].member_entity_ids.push("new".into());
        let targets: BTreeSet<usize> = self.targets.iter().map(|t| t % self.nodes).collect();
        for t in targets {
            graph
                .relations
                .push(Relation::new("new", "mentions", format!("n{t:02}")));
        }
        let removed = match self.removed {
            Some(k) if !base.relations.is_empty() => {
                Some(graph.relations.remove(k % base.relations.len()))
            }
            _ => None,
        };
        (graph, removed)
    }
}

fn edit_case() -> impl Strategy<Value = EditCase> {
    (6usize..30, 1usize..4).prop_flat_map(|(nodes, communities)| {
        (
            proptest::collection::vec((0..nodes, 0..nodes), nodes..nodes * 2),
            proptest::collection::vec(0..nodes, 1..=4),
            proptest::option::of(0usize..64),
        )
            .prop_map(move |(edges, targets, removed)| EditCase {
                nodes,
                communities,
                edges,
                targets,
                removed,
            })
    })
}

fn quick_config(seed: u64) -> LayoutConfig {
    LayoutConfig {
        seed,
        max_iterations: 60,
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_entity_gets_a_finite_position(case in graph_case(), seed in any::<u64>()) {
        let graph = case.build();
        let out = compute_layout(&graph, None, &quick_config(seed)).unwrap();
        prop_assert_eq!(out.positions.len(), case.nodes);
        for e in &graph.entities {
            let p = out.positions.get(&e.id);
            prop_assert!(p.is_some_and(Position::is_finite), "{} missing or non-finite", e.id);
        }
    }

    #[test]
    fn cold_layouts_are_reproducible(case in graph_case(), seed in any::<u64>()) {
        let graph = case.build();
        let cfg = quick_config(seed);
        let a = compute_layout(&graph, None, &cfg).unwrap();
        let b = compute_layout(&graph, None, &cfg).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn equal_fingerprints_reuse_the_layout(case in graph_case()) {
        let graph = case.build();
        let cfg = quick_config(1);
        let first = compute_layout(&graph, None, &cfg).unwrap();

        let mut reordered = graph.clone();
        reordered.entities.reverse();
        reordered.relations.reverse();
        reordered.communities.reverse();

        let previous = PreviousLayout::from_result(&first, &graph).unwrap();
        let again = compute_layout(&reordered, Some(&previous), &cfg).unwrap();
        prop_assert_eq!(again.path, LayoutPath::CacheHit);
        prop_assert_eq!(again.iterations_run, 0);
        prop_assert_eq!(again.positions, first.positions);
    }

    #[test]
    fn raw_fingerprint_ignores_record_order(case in graph_case()) {
        let graph = case.build();
        let mut entities = graph.entities.clone();
        let mut relations = graph.relations.clone();
        let before = fingerprint(&entities, &relations);
        entities.reverse();
        let half = relations.len() / 2;
        relations.rotate_left(half);
        prop_assert_eq!(before, fingerprint(&entities, &relations));
    }

    #[test]
    fn edits_only_move_their_neighbourhood_within_the_cap(case in edit_case(), seed in any::<u64>()) {
        let cfg = LayoutConfig {
            freeze_radius: 2,
            ..quick_config(seed)
        };
        let base = case.base();
        let first = compute_layout(&base, None, &cfg).unwrap();
        let previous = PreviousLayout::from_result(&first, &base).unwrap();

        let (edited, removed) = case.edited(&base);
        let out = compute_layout(&edited, Some(&previous), &cfg).unwrap();
        prop_assert_eq!(out.path, LayoutPath::Incremental);

        let resolved = edited.resolve().unwrap();
        let node = |id: &str| resolved.index_of(id).unwrap();
        let mut extra: Vec<Vec<usize>> = vec![Vec::new(); resolved.len()];
        let mut origins = vec![node("new")];
        origins.extend(resolved.neighbors(node("new")).iter().copied());
        if let Some(r) = &removed {
            let (a, b) = (node(&r.subject_id), node(&r.object_id));
            extra[a].push(b);
            extra[b].push(a);
            origins.extend([a, b]);
        }

        let mut hops: Vec<Option<usize>> = vec![None; resolved.len()];
        let mut queue = VecDeque::new();
        for o in origins {
            if hops[o].is_none() {
                hops[o] = Some(0);
                queue.push_back(o);
            }
        }
        while let Some(u) = queue.pop_front() {
            let next = hops[u].map_or(0, |d| d + 1);
            for &v in resolved.neighbors(u).iter().chain(extra[u].iter()) {
                if hops[v].is_none() {
                    hops[v] = Some(next);
                    queue.push_back(v);
                }
            }
        }

        let centroids = place_communities(resolved.community_ids(), cfg.sphere_radius);
        for (id, before) in &first.positions {
            let idx = node(id);
            let after = out.positions[id];
            if hops[idx].is_none_or(|d| d > cfg.freeze_radius) {
                prop_assert_eq!(after, *before, "{} is frozen but moved", id);
            } else {
                let own = centroids[resolved.community_of(idx).unwrap()];
                let cap = cfg.max_displacement_fraction * before.distance(&own);
                prop_assert!(after.distance(before) <= cap + 1e-9, "{} exceeded its cap", id);
            }
        }
    }
}
