// Demo - Three members in a line (M1 - M2 - M3) syncing a few records

use crate::model::{Key, KeyIdPair};
use crate::sim::LocalMesh;
use crate::sync::{EngineConfig, EngineError};
use std::time::Duration;
use tracing::info;

/// Run the demo, printing every store after each step
///
/// Returns false if a step did not converge within `step_timeout`.
pub async fn run_demo(config: EngineConfig, step_timeout: Duration) -> Result<bool, EngineError> {
    let mut mesh = LocalMesh::with_ids(&["M1", "M2", "M3"], config)?;
    mesh.connect(0, 1).await?;
    mesh.connect(2, 1).await?;
    mesh.start();

    let converged = steps(&mesh, step_timeout).await?;
    mesh.stop().await?;
    Ok(converged)
}

async fn steps(mesh: &LocalMesh, timeout: Duration) -> Result<bool, EngineError> {
    info!("writing david at M1");
    write(mesh, 0, "david", "benque")?;
    if !settle(mesh, "wait for 1 everywhere", mesh.wait_for_count(1, timeout)).await {
        return Ok(false);
    }

    info!("writing eric at M2 and cedric at M3");
    write(mesh, 1, "eric", "mountain")?;
    write(mesh, 2, "cedric", "lamoriniere")?;
    if !settle(mesh, "wait for 3 everywhere", mesh.wait_for_count(3, timeout)).await {
        return Ok(false);
    }

    info!("updating eric at M2 and removing david at M1");
    write(mesh, 1, "eric", "super mountain")?;
    remove(mesh, 0, "david")?;
    let eric = KeyIdPair::new(mesh.id(1).clone(), Key::from("eric"));
    let updated = mesh.wait_for_value(&eric, "super mountain", timeout).await;
    if !updated || !settle(mesh, "wait for 2 everywhere", mesh.wait_for_count(2, timeout)).await {
        return Ok(false);
    }

    info!("removing eric and cedric");
    remove(mesh, 1, "eric")?;
    remove(mesh, 2, "cedric")?;
    Ok(settle(mesh, "wait for cleanup", mesh.wait_for_count(0, timeout)).await)
}

async fn settle(mesh: &LocalMesh, step: &str, wait: impl std::future::Future<Output = bool>) -> bool {
    let done = wait.await;
    println!("------------ {} ------------", step);
    for i in 0..mesh.len() {
        print!("{}", mesh.dump(i));
    }
    done
}

fn write(mesh: &LocalMesh, i: usize, key: &str, value: &str) -> Result<(), EngineError> {
    mesh.member(i).write_value(key, value)?;
    Ok(())
}

fn remove(mesh: &LocalMesh, i: usize, key: &str) -> Result<(), EngineError> {
    mesh.member(i).remove(key)?;
    Ok(())
}
