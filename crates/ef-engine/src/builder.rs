//! Fluent builder for constructing an [`Engine`].

use std::path::Path;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use ef_capacity::{CapacityRegistryBuilder, load_shelters_csv};
use ef_congestion::CongestionEstimator;
use ef_core::{EngineConfig, Timestamp};
use ef_predict::Predictor;
use ef_reroute::{AssignmentBook, RerouteController};
use ef_solver::{LoadLedger, PriorityMarkers, Solver};
use ef_spatial::{RoadNetworkBuilder, Router, load_network_csv};

use crate::engine::EngineState;
use crate::{Engine, EngineError, EngineObserver, EngineResult, NoopObserver};

/// Fluent builder for [`Engine<O>`].
///
/// # Required inputs
///
/// - [`EngineConfig`], validated in [`build`](Self::build)
/// - a road network ([`RoadNetworkBuilder`]) with at least one node
/// - destinations ([`CapacityRegistryBuilder`]), at least one
///
/// # Optional inputs (have defaults)
///
/// | Method            | Default                                   |
/// |-------------------|-------------------------------------------|
/// | `.router(r)`      | congestion-aware A* built from the config |
/// | `.start_at(t)`    | `Timestamp::ZERO`                         |
///
/// Destination sites are registered with the network and snapped to their
/// nearest road node during `build`.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::from_csv(config, nodes, edges, shelters)?
///     .start_at(Timestamp(0))
///     .build_with_observer(CsvObserver::new(out_dir)?)?;
/// ```
pub struct EngineBuilder {
    config:   EngineConfig,
    network:  RoadNetworkBuilder,
    shelters: CapacityRegistryBuilder,
    router:   Option<Box<dyn Router>>,
    start:    Timestamp,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig, network: RoadNetworkBuilder, shelters: CapacityRegistryBuilder) -> Self {
        Self { config, network, shelters, router: None, start: Timestamp::ZERO }
    }

    /// Load the road network and shelters from CSV files.
    pub fn from_csv(config: EngineConfig, nodes: &Path, edges: &Path, shelters: &Path) -> EngineResult<Self> {
        let (network, _ids) = load_network_csv(nodes, edges)?;
        let shelters = load_shelters_csv(shelters)?;
        Ok(Self::new(config, network, shelters))
    }

    /// Replace the default router.
    pub fn router(mut self, router: Box<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Event start time; the scheduled-recompute clock starts here.
    pub fn start_at(mut self, now: Timestamp) -> Self {
        self.start = now;
        self
    }

    pub fn build(self) -> EngineResult<Engine<NoopObserver>> {
        self.build_with_observer(NoopObserver)
    }

    /// Validate inputs and assemble a ready [`Engine`] reporting to
    /// `observer`.
    pub fn build_with_observer<O: EngineObserver>(self, observer: O) -> EngineResult<Engine<O>> {
        let config = self.config;
        config.validate()?;

        if self.shelters.is_empty() {
            return Err(EngineError::Setup("no destinations registered".into()));
        }
        let mut network = self.network;
        if network.node_count() == 0 {
            return Err(EngineError::Setup("road network has no nodes".into()));
        }

        // ── Spatial graph with destination sites ──────────────────────────
        for (id, pos) in self.shelters.sites() {
            network.add_destination_site(id, pos);
        }
        let network = network.build();

        // ── Live state ────────────────────────────────────────────────────
        let registry = self.shelters.build(config.capacity.clone());
        let congestion = CongestionEstimator::new(&network, config.congestion.clone());
        let predictor = Predictor::new(config.predictor.clone(), config.congestion.congested_threshold);
        let solver = match self.router {
            Some(r) => Solver::new(&config, r),
            None => Solver::with_default_router(&config),
        };
        let controller = RerouteController::new(&config, self.start);
        let triggers = controller.sender();

        info!(
            nodes = network.node_count(),
            edges = network.edge_count(),
            destinations = registry.len(),
            "engine ready"
        );

        Ok(Engine {
            state: Mutex::new(EngineState {
                book:       AssignmentBook::new(),
                ledger:     LoadLedger::new(registry.len()),
                controller,
                markers:    PriorityMarkers::new(),
                active:     false,
            }),
            config,
            network,
            registry,
            congestion,
            predictor,
            solver:   RwLock::new(solver),
            triggers,
            observer: Mutex::new(observer),
        })
    }
}
