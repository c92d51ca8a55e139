//! Deterministic rule scan over the fact table, producing categorized
//! audit findings.
//!
//! Findings are fully regenerated per run (delete-then-insert inside
//! one transaction) so no stale finding survives a re-run. The scan is
//! side-effect-free apart from the insert.

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::extract::detalhe_from_row;
use crate::pipeline::transform::load_facts;
use crate::storage::bulk_insert;
use crate::types::{FactParcela, Finding, PipelineError, RawPagamentoDetalhe, Severity};

/// Rule codes, stable across runs.
pub mod rules {
    pub const PAGO_SEM_DATA_LIQUIDACAO: &str = "PAGO_SEM_DATA_LIQUIDACAO";
    pub const SEM_VINCULO_BANCARIO: &str = "SEM_VINCULO_BANCARIO";
    pub const NAO_CONCILIADO: &str = "NAO_CONCILIADO";
    pub const VALOR_PAGO_DIVERGENTE: &str = "VALOR_PAGO_DIVERGENTE";
    pub const ORFAOS: &str = "ORFAOS";
}

/// Apply every fact-level rule to one installment.
pub fn scan_fact(fact: &FactParcela, tolerancia: Decimal) -> Vec<Finding> {
    let mut findings = Vec::new();

    if fact.bank_linked() && fact.data_liquidacao.is_none() {
        findings.push(Finding::new(
            rules::PAGO_SEM_DATA_LIQUIDACAO,
            Severity::Warn,
            "parcela",
            fact.natural_key(),
            "parcela com vínculo bancário sem data de liquidação".to_string(),
            json!({
                "codigo_pagamento": fact.codigo_pagamento,
                "vinculos_bancarios": fact.vinculos_bancarios,
            }),
        ));
    }

    if fact.codigo_pagamento.is_some() && !fact.bank_linked() {
        findings.push(Finding::new(
            rules::SEM_VINCULO_BANCARIO,
            Severity::Warn,
            "parcela",
            fact.natural_key(),
            "código de pagamento sem movimento bancário vinculado".to_string(),
            json!({ "codigo_pagamento": fact.codigo_pagamento }),
        ));
    }

    if fact.bank_linked() && !fact.conciliado {
        findings.push(Finding::new(
            rules::NAO_CONCILIADO,
            Severity::Info,
            "parcela",
            fact.natural_key(),
            "parcela com vínculo bancário não conciliado".to_string(),
            json!({
                "codigo_pagamento": fact.codigo_pagamento,
                "vinculos_bancarios": fact.vinculos_bancarios,
            }),
        ));
    }

    if fact.bank_linked() {
        if let Some(valor_pago) = fact.valor_pago {
            if (valor_pago - fact.valor).abs() > tolerancia {
                findings.push(Finding::new(
                    rules::VALOR_PAGO_DIVERGENTE,
                    Severity::Warn,
                    "parcela",
                    fact.natural_key(),
                    format!(
                        "valor pago {valor_pago} diverge do valor da parcela {}",
                        fact.valor
                    ),
                    json!({
                        "valor_parcela": fact.valor,
                        "valor_pago": valor_pago,
                        "tolerancia": tolerancia,
                    }),
                ));
            }
        }
    }

    findings
}

/// Integrity rule: payment-detail rows whose parent movement is absent
/// from the extracted movement set.
pub fn orphan_findings(
    detalhes: &[RawPagamentoDetalhe],
    movimento_ids: &HashSet<i64>,
) -> Vec<Finding> {
    detalhes
        .iter()
        .filter(|d| !movimento_ids.contains(&d.movimento_id))
        .map(|d| {
            Finding::new(
                rules::ORFAOS,
                Severity::Error,
                "pagamento_detalhe",
                d.id.to_string(),
                format!(
                    "detalhe de pagamento referencia movimento {} ausente do snapshot",
                    d.movimento_id
                ),
                json!({
                    "movimento_id": d.movimento_id,
                    "parcela_numero": d.parcela_numero,
                    "codigo_pagamento": d.codigo_pagamento,
                }),
            )
        })
        .collect()
}

/// Runs the rule scan and persists the findings for one run.
pub struct FindingsEngine<'a> {
    audit: &'a SqlitePool,
    tolerancia: Decimal,
    batch_size: usize,
}

impl<'a> FindingsEngine<'a> {
    pub fn new(audit: &'a SqlitePool, tolerancia: Decimal, batch_size: usize) -> Self {
        Self {
            audit,
            tolerancia,
            batch_size,
        }
    }

    /// Delete-then-insert the findings for run_id. Returns the count.
    pub async fn generate(&self, run_id: Uuid) -> Result<usize, PipelineError> {
        let run_key = run_id.to_string();

        let facts = load_facts(self.audit, run_id).await?;

        let detalhes = {
            let rows = sqlx::query(
                "SELECT id, codigo_pagamento, movimento_id, parcela_numero, valor_alocado
                 FROM raw_pagamento_detalhes WHERE run_id = ?1",
            )
            .bind(&run_key)
            .fetch_all(self.audit)
            .await?;
            rows.iter()
                .map(detalhe_from_row)
                .collect::<Result<Vec<_>, _>>()?
        };

        let movimento_ids: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM raw_movimentos WHERE run_id = ?1")
                .bind(&run_key)
                .fetch_all(self.audit)
                .await?
                .into_iter()
                .collect();

        let mut findings = Vec::new();
        for fact in &facts {
            findings.extend(scan_fact(fact, self.tolerancia));
        }
        findings.extend(orphan_findings(&detalhes, &movimento_ids));

        let mut tx = self.audit.begin().await?;
        sqlx::query("DELETE FROM finding WHERE run_id = ?1")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?;
        bulk_insert(&mut tx, run_id, &findings, self.batch_size).await?;
        tx.commit().await?;

        info!(run_id = %run_id, findings = findings.len(), "findings regenerated");
        Ok(findings.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
