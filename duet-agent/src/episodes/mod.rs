//! The episode catalogue (spec §1 lists chase, orbit, collaborative
//! building, mining, combat as examples). Real gameplay tactics —
//! pathfinding, building patterns, combat AI — are out of scope (§1); these
//! are thin enough to exercise the catalogue/selector and phase-rendezvous
//! machinery without implementing any of that.

mod build;
mod chase;
mod combat;
mod mining;
mod orbit;

use std::sync::Arc;

use duet_core::catalogue::{Catalogue, EpisodeType};

pub use build::CollaborativeBuild;
pub use chase::Chase;
pub use combat::Combat;
pub use mining::Mining;
pub use orbit::Orbit;

/// The fixed set of episode types this binary knows how to run.
pub fn default_catalogue() -> Catalogue {
    let mut catalogue = Catalogue::new();
    let types: Vec<Arc<dyn EpisodeType>> = vec![
        Arc::new(Chase),
        Arc::new(Orbit),
        Arc::new(CollaborativeBuild),
        Arc::new(Mining),
        Arc::new(Combat),
    ];
    for t in types {
        catalogue.register(t);
    }
    catalogue
}
