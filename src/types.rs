//! Shared types for the audit snapshot pipeline.
//!
//! These types form the data model used across all pipeline steps.
//! They are designed to be stable so that extraction, transformation,
//! and aggregation modules can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Crate-wide result alias.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a snapshot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Whether the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown run status: {s}")),
        }
    }
}

/// Which date field defines the extraction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowAxis {
    DueDate,
    PaymentDate,
    DocumentDate,
}

impl WindowAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowAxis::DueDate => "DUE_DATE",
            WindowAxis::PaymentDate => "PAYMENT_DATE",
            WindowAxis::DocumentDate => "DOCUMENT_DATE",
        }
    }

    /// The source column the window predicate targets. Queries carrying
    /// the predicate always have the installment aliased `p` and the
    /// movement aliased `m`.
    pub fn source_column(&self) -> &'static str {
        match self {
            WindowAxis::DueDate => "p.data_vencimento",
            WindowAxis::PaymentDate => "p.data_pagamento",
            WindowAxis::DocumentDate => "m.data_documento",
        }
    }
}

impl fmt::Display for WindowAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WindowAxis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DUE_DATE" | "DUE" | "VENCIMENTO" => Ok(WindowAxis::DueDate),
            "PAYMENT_DATE" | "PAYMENT" | "PAGAMENTO" => Ok(WindowAxis::PaymentDate),
            "DOCUMENT_DATE" | "DOCUMENT" | "DOCUMENTO" => Ok(WindowAxis::DocumentDate),
            _ => Err(anyhow::anyhow!("Unknown window axis: {s}")),
        }
    }
}

/// Identity of the operator requesting a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: i64,
    pub email: String,
}

/// Tenant scope of a snapshot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub organization_id: i64,
    pub branch_id: Option<i64>,
}

/// Everything a caller provides to start a snapshot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub period_start: NaiveDate,
    /// Inclusive upper bound of the extraction window.
    pub period_end: NaiveDate,
    pub window_axis: WindowAxis,
    pub requester: Requester,
    pub tenant: Tenant,
    /// Branch id in the legacy schema, when the extraction should be
    /// restricted to a single branch.
    pub legacy_branch_filter: Option<i64>,
}

/// One versioned execution of the pipeline over a time window.
///
/// Created once per invocation, mutated only by the run lifecycle
/// manager, never deleted (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub window_axis: WindowAxis,
    pub organization_id: i64,
    pub branch_id: Option<i64>,
    pub requested_by_user_id: i64,
    pub requested_by_email: String,
    pub legacy_branch_filter: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SnapshotRun {
    /// Build a fresh QUEUED run from a request.
    pub fn new(request: &SnapshotRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Queued,
            period_start: request.period_start,
            period_end: request.period_end,
            window_axis: request.window_axis,
            organization_id: request.tenant.organization_id,
            branch_id: request.tenant.branch_id,
            requested_by_user_id: request.requester.user_id,
            requested_by_email: request.requester.email.clone(),
            legacy_branch_filter: request.legacy_branch_filter,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }
}

impl fmt::Display for SnapshotRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} [{}] {}..{} axis={} org={} branch={:?}",
            self.run_id,
            self.status,
            self.period_start,
            self.period_end,
            self.window_axis,
            self.organization_id,
            self.branch_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Raw staging records (legacy source shapes, identifiers widened to i64)
// ---------------------------------------------------------------------------

/// Financial movement (receipt or payment header) from the legacy schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMovimento {
    pub id: i64,
    pub filial_id: i64,
    pub data: NaiveDate,
    pub data_documento: Option<NaiveDate>,
    /// Accounting-plan operation-type code ('R' receipt, 'P' payment).
    pub tipo_operacao: String,
    pub compra_id: Option<i64>,
    pub descricao: Option<String>,
}

/// One scheduled installment of a movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParcela {
    pub id: i64,
    pub movimento_id: i64,
    pub numero: i64,
    pub valor: Decimal,
    pub data_vencimento: Option<NaiveDate>,
    pub data_pagamento: Option<NaiveDate>,
}

/// Purchase document referenced by a movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCompra {
    pub id: i64,
    pub numero_documento: String,
    pub data_documento: Option<NaiveDate>,
}

/// Payment header keyed by the legacy payment code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPagamento {
    pub codigo: i64,
    pub data_pagamento: Option<NaiveDate>,
    pub valor: Decimal,
    pub forma: Option<String>,
}

/// Allocation of a payment to one installment. Legacy data allows
/// duplicate allocations for the same installment; the transformer
/// picks one canonical row per (movimento_id, parcela_numero).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPagamentoDetalhe {
    pub id: i64,
    pub codigo_pagamento: i64,
    pub movimento_id: i64,
    pub parcela_numero: i64,
    pub valor_alocado: Option<Decimal>,
}

/// Bank statement movement, optionally settled against a payment code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMovimentoBancario {
    pub id: i64,
    pub conta_bancaria_id: i64,
    pub codigo_pagamento: Option<i64>,
    pub tipo_id: i64,
    pub valor: Decimal,
    pub data_movimento: NaiveDate,
    pub data_liquidacao: Option<NaiveDate>,
    pub conciliado: Option<bool>,
}

/// Bank account. A `filial_id` of `None` marks a headquarters-level
/// account available to every branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContaBancaria {
    pub id: i64,
    pub filial_id: Option<i64>,
    pub descricao: String,
    pub saldo_inicial: Decimal,
}

/// Daily cash-closing fact from the legacy tills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFechamentoCaixa {
    pub id: i64,
    pub filial_id: i64,
    pub data: NaiveDate,
    pub valor_apurado: Decimal,
    pub valor_sistema: Decimal,
}

/// Bank-movement-type reference dimension ('E' inbound, 'S' outbound).
/// Synced by upsert each run; not run-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipoMovimentoBancario {
    pub id: i64,
    pub descricao: String,
    pub tipo_operacao: String,
}

// ---------------------------------------------------------------------------
// Derived fact model
// ---------------------------------------------------------------------------

/// Receipt vs. payment, derived from the movement's accounting-plan
/// operation-type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operacao {
    Recebimento,
    Pagamento,
}

impl Operacao {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operacao::Recebimento => "RECEBIMENTO",
            Operacao::Pagamento => "PAGAMENTO",
        }
    }

    /// Classify a legacy operation-type code.
    pub fn from_tipo(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "R" => Some(Operacao::Recebimento),
            "P" => Some(Operacao::Pagamento),
            _ => None,
        }
    }
}

impl fmt::Display for Operacao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement status of a fact row. Computed fresh each run; there are
/// no external transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactStatus {
    Reconciled,
    PendingReconciliation,
    PaidNoSettlementDate,
    SemVinculoBancario,
    Overdue,
    Open,
}

impl FactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactStatus::Reconciled => "RECONCILED",
            FactStatus::PendingReconciliation => "PENDING_RECONCILIATION",
            FactStatus::PaidNoSettlementDate => "PAID_NO_SETTLEMENT_DATE",
            FactStatus::SemVinculoBancario => "SEM_VINCULO_BANCARIO",
            FactStatus::Overdue => "OVERDUE",
            FactStatus::Open => "OPEN",
        }
    }
}

impl fmt::Display for FactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FactStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECONCILED" => Ok(FactStatus::Reconciled),
            "PENDING_RECONCILIATION" => Ok(FactStatus::PendingReconciliation),
            "PAID_NO_SETTLEMENT_DATE" => Ok(FactStatus::PaidNoSettlementDate),
            "SEM_VINCULO_BANCARIO" => Ok(FactStatus::SemVinculoBancario),
            "OVERDUE" => Ok(FactStatus::Overdue),
            "OPEN" => Ok(FactStatus::Open),
            _ => Err(anyhow::anyhow!("Unknown fact status: {s}")),
        }
    }
}

/// Confidence tier attached to an inferred account link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "HIGH",
            ConfidenceTier::Medium => "MEDIUM",
            ConfidenceTier::Low => "LOW",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cascade rule that produced an inferred account link. Each rule has a
/// fixed confidence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceRule {
    DefaultBranchHouseBank,
    DefaultMatrizHouseBank,
}

impl InferenceRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceRule::DefaultBranchHouseBank => "DEFAULT_BRANCH_HOUSE_BANK",
            InferenceRule::DefaultMatrizHouseBank => "DEFAULT_MATRIZ_HOUSE_BANK",
        }
    }

    pub fn confidence(&self) -> ConfidenceTier {
        match self {
            InferenceRule::DefaultBranchHouseBank => ConfidenceTier::High,
            InferenceRule::DefaultMatrizHouseBank => ConfidenceTier::Medium,
        }
    }
}

impl std::str::FromStr for InferenceRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT_BRANCH_HOUSE_BANK" => Ok(InferenceRule::DefaultBranchHouseBank),
            "DEFAULT_MATRIZ_HOUSE_BANK" => Ok(InferenceRule::DefaultMatrizHouseBank),
            _ => Err(anyhow::anyhow!("Unknown inference rule: {s}")),
        }
    }
}

impl fmt::Display for InferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per installment in the derived fact table.
///
/// Carries the authoritative bank-account link plus separate inference
/// columns. The inference columns are only populated when the
/// authoritative link is absent; they never overwrite it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactParcela {
    pub movimento_id: i64,
    pub numero: i64,
    pub operacao: Operacao,
    pub valor: Decimal,
    pub data_vencimento: Option<NaiveDate>,
    /// Purchase document date when present, else the movement date.
    pub data_documento: NaiveDate,
    pub codigo_pagamento: Option<i64>,
    /// Authoritative account link, taken from the settled bank movements.
    pub conta_bancaria_id: Option<i64>,
    pub valor_pago: Option<Decimal>,
    pub data_liquidacao: Option<NaiveDate>,
    pub conciliado: bool,
    pub vinculos_bancarios: i64,
    pub status: FactStatus,
    pub conta_inferida_id: Option<i64>,
    pub regra_inferencia: Option<InferenceRule>,
    pub confianca: Option<ConfidenceTier>,
    pub inferido: bool,
}

impl FactParcela {
    /// Authoritative account if present, else the inferred one.
    pub fn conta_efetiva(&self) -> Option<i64> {
        self.conta_bancaria_id.or(self.conta_inferida_id)
    }

    /// Natural key of the installment, used as the finding entity id.
    pub fn natural_key(&self) -> String {
        format!("{}:{}", self.movimento_id, self.numero)
    }

    /// Whether at least one bank movement settles this installment.
    pub fn bank_linked(&self) -> bool {
        self.vinculos_bancarios > 0
    }
}

impl fmt::Display for FactParcela {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} valor={} status={} conta={:?} inferida={:?}",
            self.natural_key(),
            self.operacao,
            self.valor,
            self.status,
            self.conta_bancaria_id,
            self.conta_inferida_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Cashflow
// ---------------------------------------------------------------------------

/// Daily net movement and running balance for one bank account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashflowDaily {
    pub conta_bancaria_id: i64,
    pub data: NaiveDate,
    pub entradas: Decimal,
    pub saidas: Decimal,
    pub liquido: Decimal,
    /// Opening balance plus the cumulative sum of `liquido` up to and
    /// including this date.
    pub saldo_final: Decimal,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Severity of an audit finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            _ => Err(anyhow::anyhow!("Unknown severity: {s}")),
        }
    }
}

/// One rule-engine anomaly, fully regenerated per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub regra: String,
    pub severidade: Severity,
    pub entidade_tipo: String,
    pub entidade_id: String,
    pub mensagem: String,
    pub evidencia: serde_json::Value,
}

impl Finding {
    pub fn new(
        regra: &str,
        severidade: Severity,
        entidade_tipo: &str,
        entidade_id: String,
        mensagem: String,
        evidencia: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            regra: regra.to_string(),
            severidade,
            entidade_tipo: entidade_tipo.to_string(),
            entidade_id,
            mensagem,
            evidencia,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}={} — {}",
            self.severidade, self.regra, self.entidade_tipo, self.entidade_id, self.mensagem,
        )
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Domain-specific error types for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("destination schema not initialized; missing: {}", missing.join(", "))]
    SchemaNotInitialized { missing: Vec<String> },

    #[error("extraction failed on {entity}: {source}")]
    Extraction {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("bulk load failed on {table}: {source}")]
    Load {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("could not decode column {column}: {value:?}")]
    Decode { column: String, value: String },

    #[error("snapshot run not found: {0}")]
    RunNotFound(Uuid),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_request() -> SnapshotRequest {
        SnapshotRequest {
            period_start: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            window_axis: WindowAxis::DueDate,
            requester: Requester {
                user_id: 7,
                email: "auditor@example.com".to_string(),
            },
            tenant: Tenant {
                organization_id: 1,
                branch_id: Some(10),
            },
            legacy_branch_filter: Some(10),
        }
    }

    fn sample_fact() -> FactParcela {
        FactParcela {
            movimento_id: 101,
            numero: 1,
            operacao: Operacao::Recebimento,
            valor: dec!(1000.00),
            data_vencimento: NaiveDate::from_ymd_opt(2026, 3, 15),
            data_documento: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            codigo_pagamento: Some(501),
            conta_bancaria_id: Some(1),
            valor_pago: Some(dec!(998.50)),
            data_liquidacao: NaiveDate::from_ymd_opt(2026, 3, 16),
            conciliado: true,
            vinculos_bancarios: 1,
            status: FactStatus::Reconciled,
            conta_inferida_id: None,
            regra_inferencia: None,
            confianca: None,
            inferido: false,
        }
    }

    // -- RunStatus --

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("BOGUS".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    // -- WindowAxis --

    #[test]
    fn test_window_axis_from_str() {
        assert_eq!("due".parse::<WindowAxis>().unwrap(), WindowAxis::DueDate);
        assert_eq!(
            "PAYMENT_DATE".parse::<WindowAxis>().unwrap(),
            WindowAxis::PaymentDate
        );
        assert_eq!(
            "documento".parse::<WindowAxis>().unwrap(),
            WindowAxis::DocumentDate
        );
        assert!("weekly".parse::<WindowAxis>().is_err());
    }

    #[test]
    fn test_window_axis_source_column() {
        assert_eq!(WindowAxis::DueDate.source_column(), "p.data_vencimento");
        assert_eq!(WindowAxis::PaymentDate.source_column(), "p.data_pagamento");
        assert_eq!(WindowAxis::DocumentDate.source_column(), "m.data_documento");
    }

    // -- SnapshotRun --

    #[test]
    fn test_snapshot_run_new_is_queued() {
        let run = SnapshotRun::new(&sample_request());
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());
        assert!(run.finished_at.is_none());
        assert!(run.error_message.is_none());
        assert_eq!(run.organization_id, 1);
        assert_eq!(run.branch_id, Some(10));
        assert_eq!(run.requested_by_email, "auditor@example.com");
    }

    #[test]
    fn test_snapshot_run_ids_unique() {
        let a = SnapshotRun::new(&sample_request());
        let b = SnapshotRun::new(&sample_request());
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_snapshot_run_display() {
        let run = SnapshotRun::new(&sample_request());
        let display = format!("{run}");
        assert!(display.contains("QUEUED"));
        assert!(display.contains("DUE_DATE"));
    }

    // -- Operacao --

    #[test]
    fn test_operacao_from_tipo() {
        assert_eq!(Operacao::from_tipo("R"), Some(Operacao::Recebimento));
        assert_eq!(Operacao::from_tipo(" p "), Some(Operacao::Pagamento));
        assert_eq!(Operacao::from_tipo("X"), None);
        assert_eq!(Operacao::from_tipo(""), None);
    }

    // -- FactStatus --

    #[test]
    fn test_fact_status_roundtrip() {
        for status in [
            FactStatus::Reconciled,
            FactStatus::PendingReconciliation,
            FactStatus::PaidNoSettlementDate,
            FactStatus::SemVinculoBancario,
            FactStatus::Overdue,
            FactStatus::Open,
        ] {
            let parsed: FactStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    // -- Inference --

    #[test]
    fn test_inference_rule_confidence() {
        assert_eq!(
            InferenceRule::DefaultBranchHouseBank.confidence(),
            ConfidenceTier::High
        );
        assert_eq!(
            InferenceRule::DefaultMatrizHouseBank.confidence(),
            ConfidenceTier::Medium
        );
    }

    #[test]
    fn test_inference_rule_roundtrip() {
        for rule in [
            InferenceRule::DefaultBranchHouseBank,
            InferenceRule::DefaultMatrizHouseBank,
        ] {
            let parsed: InferenceRule = rule.as_str().parse().unwrap();
            assert_eq!(parsed, rule);
        }
    }

    // -- FactParcela --

    #[test]
    fn test_conta_efetiva_prefers_authoritative() {
        let mut fact = sample_fact();
        fact.conta_inferida_id = Some(99);
        assert_eq!(fact.conta_efetiva(), Some(1));
    }

    #[test]
    fn test_conta_efetiva_falls_back_to_inferred() {
        let mut fact = sample_fact();
        fact.conta_bancaria_id = None;
        fact.conta_inferida_id = Some(99);
        assert_eq!(fact.conta_efetiva(), Some(99));
    }

    #[test]
    fn test_conta_efetiva_none() {
        let mut fact = sample_fact();
        fact.conta_bancaria_id = None;
        fact.conta_inferida_id = None;
        assert_eq!(fact.conta_efetiva(), None);
    }

    #[test]
    fn test_natural_key() {
        assert_eq!(sample_fact().natural_key(), "101:1");
    }

    #[test]
    fn test_fact_serialization_roundtrip() {
        let fact = sample_fact();
        let json = serde_json::to_string(&fact).unwrap();
        let parsed: FactParcela = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, FactStatus::Reconciled);
        assert_eq!(parsed.valor, dec!(1000.00));
        assert_eq!(parsed.natural_key(), "101:1");
    }

    // -- Severity --

    #[test]
    fn test_severity_roundtrip() {
        for sev in [Severity::Info, Severity::Warn, Severity::Error] {
            let parsed: Severity = sev.as_str().parse().unwrap();
            assert_eq!(parsed, sev);
        }
    }

    // -- Finding --

    #[test]
    fn test_finding_display() {
        let finding = Finding::new(
            "VALOR_PAGO_DIVERGENTE",
            Severity::Warn,
            "parcela",
            "101:1".to_string(),
            "paid amount diverges from installment amount".to_string(),
            serde_json::json!({"valor_parcela": 1000.0}),
        );
        let display = format!("{finding}");
        assert!(display.contains("WARN"));
        assert!(display.contains("VALOR_PAGO_DIVERGENTE"));
        assert!(display.contains("101:1"));
    }

    // -- PipelineError --

    #[test]
    fn test_schema_error_lists_missing_elements() {
        let err = PipelineError::SchemaNotInitialized {
            missing: vec!["fact_parcelas".to_string(), "finding".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("fact_parcelas"));
        assert!(msg.contains("finding"));
    }

    #[test]
    fn test_decode_error_display() {
        let err = PipelineError::Decode {
            column: "valor".to_string(),
            value: "abc".to_string(),
        };
        assert!(format!("{err}").contains("valor"));
    }
}
