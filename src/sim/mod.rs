// Sim module - IN-PROCESS CLUSTERS
// Topology generation, a local mesh harness and the three-member demo

mod demo;
mod mesh;
mod topology;

pub use demo::run_demo;
pub use mesh::{LocalEngine, LocalMesh};
pub use topology::{Topology, UnknownTopology};
