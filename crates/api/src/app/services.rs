//! Service wiring: stores, providers, engine, reconciler, billing.
//!
//! Backed by the in-memory stores and the mock providers. Real vendor
//! adapters slot in behind the same `GenerationProvider`/`PaymentProvider`
//! ports without touching the handlers.

use std::sync::Arc;

use polyform_billing::{Billing, InMemoryOrderStore};
use polyform_infra::InMemoryCache;
use polyform_jobs::{InMemoryJobStore, JobStore};
use polyform_ledger::{
    InMemoryAccountStore, InMemoryTransactionStore, Ledger, LedgerConfig,
};
use polyform_providers::{MockGenerationProvider, MockPaymentProvider};
use polyform_reconcile::{ReconcileConfig, Reconciler};
use polyform_workflow::{EngineConfig, ProviderRegistry, WorkflowEngine};

use crate::config::ApiConfig;

pub struct AppServices {
    pub config: ApiConfig,
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<Ledger>,
    pub engine: Arc<WorkflowEngine>,
    pub reconciler: Arc<Reconciler>,
    pub billing: Arc<Billing>,
    // Concrete mock handles, kept so tests can script providers.
    pub image_provider: Arc<MockGenerationProvider>,
    pub model_provider: Arc<MockGenerationProvider>,
    pub payment_provider: Arc<MockPaymentProvider>,
}

/// Build services with production tuning.
pub fn build_services(config: ApiConfig) -> AppServices {
    build_services_with(config, EngineConfig::default(), ReconcileConfig::default())
}

/// Build services with explicit engine/reconciler tuning (tests shrink the
/// timers).
pub fn build_services_with(
    config: ApiConfig,
    engine_config: EngineConfig,
    reconcile_config: ReconcileConfig,
) -> AppServices {
    let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
    let ledger = Arc::new(Ledger::new(
        InMemoryAccountStore::arc(),
        InMemoryTransactionStore::arc(),
        LedgerConfig {
            starter_balance: config.starter_balance,
            ..LedgerConfig::default()
        },
    ));

    let image_provider = Arc::new(MockGenerationProvider::new("img"));
    let model_provider = Arc::new(MockGenerationProvider::new("mesh"));
    let payment_provider = Arc::new(MockPaymentProvider::new());

    let reconciler = Arc::new(Reconciler::new(
        jobs.clone(),
        ledger.clone(),
        model_provider.clone(),
        InMemoryCache::arc(),
        reconcile_config,
    ));

    let engine = Arc::new(WorkflowEngine::new(
        jobs.clone(),
        ledger.clone(),
        ProviderRegistry::new(image_provider.clone(), model_provider.clone()),
        reconciler.clone(),
        engine_config,
    ));

    let billing = Arc::new(Billing::new(
        InMemoryOrderStore::arc(),
        ledger.clone(),
        payment_provider.clone(),
    ));

    AppServices {
        config,
        jobs,
        ledger,
        engine,
        reconciler,
        billing,
        image_provider,
        model_provider,
        payment_provider,
    }
}
