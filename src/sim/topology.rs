// Topology - Edge lists for test and demo meshes
//
// Pure graph construction: given a member count and a shape, produce the
// (i, j) pairs where member i connects to member j. Connections are mutual,
// so each unordered pair appears at most once and never as (i, i).

use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown topology: {0}")]
pub struct UnknownTopology(String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Each member connects to the previous one
    Line,
    /// Each member connects to the two previous ones
    Line2,
    /// A line closed into a ring
    Circle,
    /// Line2 closed into a ring
    Circle2,
    /// Everyone connects to everyone
    Full,
    /// Each member connects to between 1 and `max_links` earlier members
    Random { max_links: usize },
}

impl Topology {
    /// Every shape, with the random ones at their usual link counts
    pub fn all() -> Vec<Topology> {
        vec![
            Topology::Line,
            Topology::Line2,
            Topology::Circle,
            Topology::Circle2,
            Topology::Full,
            Topology::Random { max_links: 2 },
            Topology::Random { max_links: 3 },
        ]
    }

    /// Edges for `n` members
    ///
    /// Every shape yields a connected graph.
    pub fn edges<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<(usize, usize)> {
        let mut raw = Vec::new();
        if n < 2 {
            return raw;
        }

        match self {
            Topology::Line => {
                for i in 1..n {
                    raw.push((i, i - 1));
                }
            }
            Topology::Line2 => {
                raw.push((0, 1));
                for i in 2..n {
                    raw.push((i, i - 1));
                    raw.push((i, i - 2));
                }
            }
            Topology::Circle => {
                for i in 1..n {
                    raw.push((i, i - 1));
                }
                raw.push((0, n - 1));
            }
            Topology::Circle2 => {
                raw.push((0, 1));
                for i in 2..n {
                    raw.push((i, i - 1));
                    raw.push((i, i - 2));
                }
                raw.push((1, n - 1));
                raw.push((0, n - 1));
                raw.push((0, n - 2));
            }
            Topology::Full => {
                for i in 0..n {
                    for j in (i + 1)..n {
                        raw.push((j, i));
                    }
                }
            }
            Topology::Random { max_links } => {
                let max_links = (*max_links).max(1);
                for i in 1..n {
                    let links = rng.gen_range(1..=max_links);
                    for _ in 0..links {
                        raw.push((i, rng.gen_range(0..i)));
                    }
                }
            }
        }

        dedupe(raw)
    }
}

fn dedupe(raw: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|&(i, j)| i != j && seen.insert((i.min(j), i.max(j))))
        .collect()
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Line => write!(f, "line"),
            Topology::Line2 => write!(f, "line2"),
            Topology::Circle => write!(f, "circle"),
            Topology::Circle2 => write!(f, "circle2"),
            Topology::Full => write!(f, "full"),
            Topology::Random { max_links } => write!(f, "random{}", max_links + 1),
        }
    }
}

impl FromStr for Topology {
    type Err = UnknownTopology;

    /// `randomN` allows up to N-1 links per member (`random3`, `random4`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(Topology::Line),
            "line2" => Ok(Topology::Line2),
            "circle" => Ok(Topology::Circle),
            "circle2" => Ok(Topology::Circle2),
            "full" => Ok(Topology::Full),
            other => other
                .strip_prefix("random")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n >= 2)
                .map(|n| Topology::Random { max_links: n - 1 })
                .ok_or_else(|| UnknownTopology(s.to_string())),
        }
    }
}
