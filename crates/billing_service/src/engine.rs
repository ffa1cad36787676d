//! Billing engine
//!
//! Wires the domain services to one persistence store and one payment
//! gateway, and is the entry point for the webhook transport and the
//! worker's scheduled sweep.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use core_kernel::{AdapterHealth, HealthCheckResult, HealthCheckable};
use domain_billing::{
    BillingCatalogPort, BillingError, BillingResolver, CreateTransactionRequest, CreatedTransaction,
    ExpirySweeper, LedgerConfig, LedgerPort, LedgerService, OrchestratorConfig, PaymentGatewayPort,
    ReconcileOutcome, ResolveQuery, ResolvedBilling, StudentDirectoryPort, SweepReport, SweeperConfig,
    TransactionOrchestrator, TransactionPort, WebhookNotification, WebhookReconciler,
};
use infra_db::{create_pool, run_migrations, PostgresBillingAdapter};
use infra_gateway::MidtransAdapter;

use crate::config::ServiceConfig;
use crate::error::ServiceError;

/// Domain configuration handed to the engine's services
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub sweeper: SweeperConfig,
    pub ledger: LedgerConfig,
}

impl From<&ServiceConfig> for EngineConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            orchestrator: config.orchestrator_config(),
            sweeper: config.sweeper_config(),
            ledger: config.ledger_config(),
        }
    }
}

/// The assembled billing engine
pub struct BillingEngine {
    resolver: BillingResolver,
    ledger: LedgerService,
    orchestrator: TransactionOrchestrator,
    reconciler: WebhookReconciler,
    sweeper: ExpirySweeper,
    gateway: Arc<dyn PaymentGatewayPort>,
    health_checks: Vec<Arc<dyn HealthCheckable>>,
}

impl BillingEngine {
    /// Builds every service over a store that implements all persistence ports
    pub fn new<S>(store: Arc<S>, gateway: Arc<dyn PaymentGatewayPort>, config: EngineConfig) -> Self
    where
        S: BillingCatalogPort + StudentDirectoryPort + LedgerPort + TransactionPort,
    {
        let catalog: Arc<dyn BillingCatalogPort> = store.clone();
        let students: Arc<dyn StudentDirectoryPort> = store.clone();
        let ledger: Arc<dyn LedgerPort> = store.clone();
        let transactions: Arc<dyn TransactionPort> = store;

        Self {
            resolver: BillingResolver::new(catalog.clone(), students.clone(), ledger.clone(), transactions.clone()),
            ledger: LedgerService::new(catalog.clone(), students, ledger.clone(), config.ledger),
            orchestrator: TransactionOrchestrator::new(
                catalog,
                ledger.clone(),
                transactions.clone(),
                gateway.clone(),
                config.orchestrator,
            ),
            reconciler: WebhookReconciler::new(ledger, transactions.clone()),
            sweeper: ExpirySweeper::new(transactions, config.sweeper),
            gateway,
            health_checks: Vec::new(),
        }
    }

    /// Registers an adapter to be probed by [`BillingEngine::health_check`]
    pub fn with_health_check(mut self, adapter: Arc<dyn HealthCheckable>) -> Self {
        self.health_checks.push(adapter);
        self
    }

    pub fn resolver(&self) -> &BillingResolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }

    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    pub async fn resolve(&self, query: &ResolveQuery) -> Result<ResolvedBilling, BillingError> {
        self.resolver.resolve(query).await
    }

    pub async fn create_transaction(&self, request: CreateTransactionRequest) -> Result<CreatedTransaction, BillingError> {
        self.orchestrator.create_transaction(request).await
    }

    /// Verifies and reconciles a gateway notification
    ///
    /// # Errors
    ///
    /// `InvalidSignature` if the signature does not verify; nothing is
    /// looked up or written in that case. Otherwise whatever reconciliation
    /// returns.
    #[instrument(skip(self, notification), fields(order_id = %notification.order_id))]
    pub async fn handle_notification(&self, notification: &WebhookNotification) -> Result<ReconcileOutcome, BillingError> {
        if !self.gateway.verify_notification(notification) {
            warn!("Rejected notification with invalid signature");
            return Err(BillingError::InvalidSignature(notification.order_id.clone()));
        }
        self.reconciler.reconcile(notification).await
    }

    /// Parses a raw notification body and handles it
    pub async fn handle_notification_body(&self, body: &[u8]) -> Result<ReconcileOutcome, BillingError> {
        let notification: WebhookNotification = serde_json::from_slice(body)
            .map_err(|e| BillingError::Validation(format!("malformed notification: {e}")))?;
        self.handle_notification(&notification).await
    }

    pub async fn sweep_expired(&self) -> Result<SweepReport, BillingError> {
        self.sweeper.sweep().await
    }

    /// Probes every registered adapter
    pub async fn health_check(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for adapter in &self.health_checks {
            results.push(adapter.health_check().await);
        }
        results
    }

    /// True when no registered adapter reports unhealthy
    pub async fn is_ready(&self) -> bool {
        self.health_check()
            .await
            .iter()
            .all(|r| r.status != AdapterHealth::Unhealthy)
    }
}

/// Connects to PostgreSQL and Midtrans and assembles the engine
pub async fn connect(config: &ServiceConfig) -> Result<BillingEngine, ServiceError> {
    let pool = create_pool(config.database.pool_config()).await?;
    if config.database.migrate {
        run_migrations(&pool).await?;
    }

    let store = Arc::new(PostgresBillingAdapter::new(pool));
    let gateway = Arc::new(MidtransAdapter::new(config.midtrans.clone())?);
    info!(core_url = %config.midtrans.core_base_url, "Payment gateway configured");

    let engine = BillingEngine::new(store.clone(), gateway.clone(), EngineConfig::from(config))
        .with_health_check(store)
        .with_health_check(gateway);
    Ok(engine)
}
