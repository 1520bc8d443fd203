use cucumber::given;

use crate::cucumber::{recon_world::ReconciliationSystem, ReconWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut ReconWorld) {
    let system = ReconciliationSystem::new().await;
    world.system = Some(system);
}
