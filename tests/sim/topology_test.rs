// Topology Tests
// Edge generation for every mesh shape

use datafan::sim::{LocalMesh, Topology};
use datafan::sync::EngineConfig;
use datafan::transport::Connector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};

fn rng() -> StdRng {
    StdRng::seed_from_u64(2024)
}

fn is_connected(n: usize, edges: &[(usize, usize)]) -> bool {
    let mut adjacent = vec![Vec::new(); n];
    for &(i, j) in edges {
        adjacent[i].push(j);
        adjacent[j].push(i);
    }
    let mut seen = HashSet::from([0]);
    let mut queue = VecDeque::from([0]);
    while let Some(i) = queue.pop_front() {
        for &j in &adjacent[i] {
            if seen.insert(j) {
                queue.push_back(j);
            }
        }
    }
    seen.len() == n
}

// ============================================================================
// SHAPES
// ============================================================================

#[test]
fn test_line2_links_two_previous() {
    let edges = Topology::Line2.edges(4, &mut rng());
    assert_eq!(edges, vec![(0, 1), (2, 1), (2, 0), (3, 2), (3, 1)]);
}

#[test]
fn test_circle_closes_the_ring() {
    let edges = Topology::Circle.edges(5, &mut rng());
    assert_eq!(edges.len(), 5);
    assert!(edges.contains(&(0, 4)));
}

#[test]
fn test_full_links_every_pair() {
    let n = 6;
    let edges = Topology::Full.edges(n, &mut rng());
    assert_eq!(edges.len(), n * (n - 1) / 2);
}

#[test]
fn test_random_respects_link_bound() {
    let edges = Topology::Random { max_links: 2 }.edges(30, &mut rng());

    for i in 1..30 {
        let earlier = edges.iter().filter(|&&(a, b)| a == i && b < i).count();
        assert!((1..=2).contains(&earlier), "member {} has {} links", i, earlier);
    }
}

#[test]
fn test_every_shape_is_connected_and_simple() {
    for topology in Topology::all() {
        for n in [1, 2, 3, 15] {
            let edges = topology.edges(n, &mut rng());

            assert!(is_connected(n, &edges), "{} with {} members", topology, n);
            let unique: HashSet<(usize, usize)> =
                edges.iter().map(|&(i, j)| (i.min(j), i.max(j))).collect();
            assert_eq!(unique.len(), edges.len(), "{} repeats an edge", topology);
            assert!(edges.iter().all(|&(i, j)| i != j && i < n && j < n));
        }
    }
}

#[test]
fn test_single_member_has_no_edges() {
    for topology in Topology::all() {
        assert!(topology.edges(1, &mut rng()).is_empty());
    }
}

// ============================================================================
// NAMES
// ============================================================================

#[test]
fn test_names() {
    assert_eq!("circle2".parse::<Topology>(), Ok(Topology::Circle2));
    assert_eq!("random3".parse::<Topology>(), Ok(Topology::Random { max_links: 2 }));
    assert_eq!("random4".parse::<Topology>(), Ok(Topology::Random { max_links: 3 }));
    assert_eq!(Topology::Random { max_links: 3 }.to_string(), "random4");
    assert!("randomly".parse::<Topology>().is_err());
}

// ============================================================================
// MESH WIRING
// ============================================================================

#[tokio::test]
async fn test_mesh_wires_topology_edges() {
    let mesh = LocalMesh::with_topology(4, Topology::Line, &mut rng(), EngineConfig::default())
        .await
        .unwrap();

    assert_eq!(mesh.len(), 4);
    assert_eq!(mesh.engine(0).connector().peers(), vec![mesh.id(1).clone()]);
    assert_eq!(
        mesh.engine(1).connector().peers(),
        vec![mesh.id(0).clone(), mesh.id(2).clone()]
    );
    assert_eq!(mesh.engine(3).connector().peers(), vec![mesh.id(2).clone()]);
}
