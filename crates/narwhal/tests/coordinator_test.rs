use narwhal::algo::sphere::place_communities;
use narwhal::{
    Community, Entity, Error, LayoutConfig, LayoutGraph, LayoutPath, Position, PreviousLayout,
    Progress, Relation, compute_layout, compute_layout_with_progress,
};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// Four communities of 25 chained entities; c2 and c3 are bridged, c0 and c1 are not.
fn chained_communities() -> LayoutGraph {
    let entities = (0..100).map(|i| Entity::new(format!("e{i:03}"))).collect();
    let mut relations = Vec::new();
    for c in 0..4 {
        for k in 1..25 {
            let i = c * 25 + k;
            relations.push(Relation::new(
                format!("e{:03}", i - 1),
                "next",
                format!("e{i:03}"),
            ));
        }
    }
    relations.push(Relation::new("e060", "bridge", "e080"));
    let communities = (0..4)
        .map(|c| Community::new(format!("c{c}"), (c * 25..c * 25 + 25).map(|i| format!("e{i:03}"))))
        .collect();
    LayoutGraph::new(entities, relations, communities)
}

#[test]
fn three_singleton_communities_settle_immediately() {
    let graph = LayoutGraph::new(
        vec![Entity::new("a"), Entity::new("b"), Entity::new("c")],
        Vec::new(),
        vec![
            Community::new("ca", ["a"]),
            Community::new("cb", ["b"]),
            Community::new("cc", ["c"]),
        ],
    );
    let cfg = LayoutConfig::default();
    let out = compute_layout(&graph, None, &cfg).unwrap();
    assert!(out.converged);
    assert!(out.iterations_run <= 1);

    let centroids = place_communities(&["ca", "cb", "cc"], cfg.sphere_radius);
    assert_eq!(out.positions["a"], centroids["ca"]);
    assert_eq!(out.positions["b"], centroids["cb"]);
    assert_eq!(out.positions["c"], centroids["cc"]);
}

#[test]
fn resubmitting_the_same_graph_is_a_cache_hit() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default();
    let first = compute_layout(&graph, None, &cfg).unwrap();
    assert_eq!(first.path, LayoutPath::Full);

    let previous = PreviousLayout::from_result(&first, &graph).unwrap();
    let second = compute_layout(&graph, Some(&previous), &cfg).unwrap();
    assert_eq!(second.path, LayoutPath::CacheHit);
    assert_eq!(second.iterations_run, 0);
    assert!(second.converged);
    assert_eq!(second.positions, first.positions);
    assert_eq!(second.fingerprint, first.fingerprint);
}

#[test]
fn unchanged_graph_without_fingerprint_runs_zero_iterations() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default();
    let first = compute_layout(&graph, None, &cfg).unwrap();
    let previous = PreviousLayout::new(first.positions.clone()).with_topology(graph.topology().unwrap());
    let second = compute_layout(&graph, Some(&previous), &cfg).unwrap();
    assert_eq!(second.iterations_run, 0);
    assert!(second.converged);
    assert_eq!(second.positions, first.positions);
}

#[test]
fn one_unconnected_newcomer_uses_fast_placement() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default();
    let first = compute_layout(&graph, None, &cfg).unwrap();

    let mut grown = graph.clone();
    grown.entities.push(Entity::new("new"));
    grown.communities[1].member_entity_ids.push("new".into());

    for previous in [
        PreviousLayout::from_result(&first, &graph).unwrap(),
        PreviousLayout::new(first.positions.clone()).with_fingerprint(first.fingerprint),
    ] {
        let out = compute_layout(&grown, Some(&previous), &cfg).unwrap();
        assert_eq!(out.path, LayoutPath::FastPlacement);
        assert_eq!(out.iterations_run, 0);
        assert_eq!(out.positions.len(), 101);
        for (id, p) in &first.positions {
            assert_eq!(&out.positions[id], p, "{id} moved");
        }
        let centroids = place_communities(&["c0", "c1", "c2", "c3"], cfg.sphere_radius);
        assert!(out.positions["new"].distance(&centroids["c1"]) <= cfg.jitter_radius + 1e-9);
        assert_ne!(out.fingerprint, first.fingerprint);
    }
}

#[test]
fn connected_newcomer_relaxes_only_its_neighbourhood() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default();
    let first = compute_layout(&graph, None, &cfg).unwrap();
    let previous = PreviousLayout::from_result(&first, &graph).unwrap();

    let mut grown = graph.clone();
    grown.entities.push(Entity::new("new"));
    grown.communities[0].member_entity_ids.push("new".into());
    for target in ["e000", "e001", "e002", "e025", "e026"] {
        grown.relations.push(Relation::new("new", "mentions", target));
    }

    let out = compute_layout(&grown, Some(&previous), &cfg).unwrap();
    assert_eq!(out.path, LayoutPath::Incremental);
    assert!(out.iterations_run > 0);
    assert_eq!(out.positions.len(), 101);
    assert!(out.positions["new"].is_finite());

    // Changed elements: the new node and the endpoints of its five relations. Three hops along
    // each chain from e002 and e026 is as far as movement may reach.
    let reachable: BTreeSet<String> = (0..=5)
        .chain(25..=29)
        .map(|i| format!("e{i:03}"))
        .collect();
    let centroids = place_communities(&["c0", "c1", "c2", "c3"], cfg.sphere_radius);
    for (id, before) in &first.positions {
        let after = out.positions[id];
        if reachable.contains(id) {
            let community = if id.as_str() < "e025" { "c0" } else { "c1" };
            let cap = cfg.max_displacement_fraction * before.distance(&centroids[community]);
            assert!(after.distance(before) <= cap + 1e-9, "{id} exceeded its cap");
        } else {
            assert_eq!(&after, before, "{id} is frozen but moved");
        }
    }
}

#[test]
fn removing_an_entity_unfreezes_its_former_neighbours() {
    let graph = chained_communities();
    let cfg = LayoutConfig {
        freeze_radius: 1,
        ..Default::default()
    };
    let first = compute_layout(&graph, None, &cfg).unwrap();
    let previous = PreviousLayout::from_result(&first, &graph).unwrap();

    let mut shrunk = graph.clone();
    shrunk.entities.retain(|e| e.id != "e010");
    shrunk.relations.retain(|r| r.subject_id != "e010" && r.object_id != "e010");
    shrunk.communities[0].member_entity_ids.retain(|m| m != "e010");

    let out = compute_layout(&shrunk, Some(&previous), &cfg).unwrap();
    assert_eq!(out.path, LayoutPath::Incremental);
    assert!(!out.positions.contains_key("e010"));
    assert_eq!(out.positions.len(), 99);
    for id in ["e007", "e013", "e050"] {
        assert_eq!(out.positions[id], first.positions[id], "{id} should be frozen");
    }
}

#[test]
fn full_path_is_bit_identical_across_runs() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default().with_seed(99);
    let a = compute_layout(&graph, None, &cfg).unwrap();
    let b = compute_layout(&graph, None, &cfg).unwrap();
    for (id, p) in &a.positions {
        let q = b.positions[id];
        assert_eq!(
            (p.x.to_bits(), p.y.to_bits(), p.z.to_bits()),
            (q.x.to_bits(), q.y.to_bits(), q.z.to_bits())
        );
    }
}

#[test]
fn progress_reaches_the_caller_and_cancellation_stops_the_run() {
    let graph = chained_communities();
    let cfg = LayoutConfig::default();

    let mut snapshots = 0usize;
    let mut count = |p: Progress| {
        assert!((0.0..=1.0).contains(&p.progress));
        snapshots += 1;
        ControlFlow::Continue(())
    };
    compute_layout_with_progress(&graph, None, &cfg, Some(&mut count)).unwrap();
    assert!(snapshots > 0);

    let mut stop = |_: Progress| ControlFlow::Break(());
    let err = compute_layout_with_progress(&graph, None, &cfg, Some(&mut stop)).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn invalid_graphs_are_rejected_before_layout() {
    let mut graph = chained_communities();
    graph.relations.push(Relation::new("e000", "next", "ghost"));
    let err = compute_layout(&graph, None, &LayoutConfig::default()).unwrap_err();
    assert_eq!(err.kind(), narwhal::ErrorKind::InvalidInput);
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn isolated_and_coincident_entities_stay_finite() {
    let graph = LayoutGraph::new(
        vec![Entity::new("x"), Entity::new("y"), Entity::new("z")],
        Vec::new(),
        Vec::new(),
    );
    let cfg = LayoutConfig::default();
    let mut positions = narwhal::PositionMap::new();
    positions.insert("x".into(), Position::ORIGIN);
    positions.insert("y".into(), Position::ORIGIN);
    let previous = PreviousLayout::new(positions);
    let out = compute_layout(&graph, Some(&previous), &cfg).unwrap();
    assert_eq!(out.positions.len(), 3);
    assert!(out.positions.values().all(Position::is_finite));
}
