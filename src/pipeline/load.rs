//! Transactional replace-and-bulk-load of the run-scoped tables.
//!
//! Re-running a window produces a full, non-accumulating refresh: all
//! rows for the run_id are deleted and the extracted sets re-inserted
//! inside one transaction. Every inserted row is tagged with run_id.

use sqlx::query_builder::Separated;
use sqlx::sqlite::SqlitePool;
use sqlx::Sqlite;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::extract::Extraction;
use crate::storage::{bulk_insert, BulkRow};
use crate::types::{
    CashflowDaily, FactParcela, Finding, PipelineError, RawCompra, RawContaBancaria,
    RawFechamentoCaixa, RawMovimento, RawMovimentoBancario, RawPagamento,
    RawPagamentoDetalhe, RawParcela, TipoMovimentoBancario,
};

/// Every run-scoped table, cleared on replace. Order matters only for
/// readability; there are no cross-table foreign keys in the destination.
const RUN_SCOPED_TABLES: &[&str] = &[
    "raw_movimentos",
    "raw_parcelas",
    "raw_compras",
    "raw_pagamentos",
    "raw_pagamento_detalhes",
    "raw_movimentos_bancarios",
    "raw_contas_bancarias",
    "raw_fechamentos_caixa",
    "fact_parcelas",
    "cashflow_diario",
    "finding",
];

/// Row counts written per set, for step logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadSummary {
    pub movimentos: u64,
    pub parcelas: u64,
    pub compras: u64,
    pub pagamentos: u64,
    pub detalhes: u64,
    pub movimentos_bancarios: u64,
    pub contas_bancarias: u64,
    pub fechamentos_caixa: u64,
}

impl LoadSummary {
    pub fn total(&self) -> u64 {
        self.movimentos
            + self.parcelas
            + self.compras
            + self.pagamentos
            + self.detalhes
            + self.movimentos_bancarios
            + self.contas_bancarias
            + self.fechamentos_caixa
    }
}

/// Writes extracted sets into the audit datastore.
pub struct BulkLoader<'a> {
    audit: &'a SqlitePool,
    batch_size: usize,
}

impl<'a> BulkLoader<'a> {
    pub fn new(audit: &'a SqlitePool, batch_size: usize) -> Self {
        Self { audit, batch_size }
    }

    /// Delete all rows for run_id across every run-scoped table, then
    /// bulk-insert the extracted sets, all in one transaction.
    pub async fn replace_run(
        &self,
        run_id: Uuid,
        extraction: &Extraction,
    ) -> Result<LoadSummary, PipelineError> {
        let mut tx = self.audit.begin().await?;

        for &table in RUN_SCOPED_TABLES {
            let sql = format!("DELETE FROM {table} WHERE run_id = ?1");
            sqlx::query(&sql)
                .bind(run_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| PipelineError::Load { table, source: e })?;
        }

        let summary = LoadSummary {
            movimentos: bulk_insert(&mut tx, run_id, &extraction.movimentos, self.batch_size)
                .await
                .map_err(|e| load_err::<RawMovimento>(e))?,
            parcelas: bulk_insert(&mut tx, run_id, &extraction.parcelas, self.batch_size)
                .await
                .map_err(|e| load_err::<RawParcela>(e))?,
            compras: bulk_insert(&mut tx, run_id, &extraction.compras, self.batch_size)
                .await
                .map_err(|e| load_err::<RawCompra>(e))?,
            pagamentos: bulk_insert(&mut tx, run_id, &extraction.pagamentos, self.batch_size)
                .await
                .map_err(|e| load_err::<RawPagamento>(e))?,
            detalhes: bulk_insert(&mut tx, run_id, &extraction.detalhes, self.batch_size)
                .await
                .map_err(|e| load_err::<RawPagamentoDetalhe>(e))?,
            movimentos_bancarios: bulk_insert(
                &mut tx,
                run_id,
                &extraction.movimentos_bancarios,
                self.batch_size,
            )
            .await
            .map_err(|e| load_err::<RawMovimentoBancario>(e))?,
            contas_bancarias: bulk_insert(
                &mut tx,
                run_id,
                &extraction.contas_bancarias,
                self.batch_size,
            )
            .await
            .map_err(|e| load_err::<RawContaBancaria>(e))?,
            fechamentos_caixa: bulk_insert(
                &mut tx,
                run_id,
                &extraction.fechamentos_caixa,
                self.batch_size,
            )
            .await
            .map_err(|e| load_err::<RawFechamentoCaixa>(e))?,
        };

        tx.commit().await?;

        info!(
            run_id = %run_id,
            rows = summary.total(),
            "run-scoped tables replaced"
        );
        Ok(summary)
    }

    /// Upsert the bank-movement-type reference dimension (not run-scoped).
    pub async fn upsert_movement_types(
        &self,
        tipos: &[TipoMovimentoBancario],
    ) -> Result<(), PipelineError> {
        let mut tx = self.audit.begin().await?;
        for tipo in tipos {
            sqlx::query(
                "INSERT INTO dim_tipo_movimento_bancario (id, descricao, tipo_operacao)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     descricao = excluded.descricao,
                     tipo_operacao = excluded.tipo_operacao",
            )
            .bind(tipo.id)
            .bind(&tipo.descricao)
            .bind(&tipo.tipo_operacao)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Load {
                table: "dim_tipo_movimento_bancario",
                source: e,
            })?;
        }
        tx.commit().await?;
        info!(tipos = tipos.len(), "movement-type dimension synced");
        Ok(())
    }
}

fn load_err<R: BulkRow>(e: sqlx::Error) -> PipelineError {
    PipelineError::Load {
        table: R::TABLE,
        source: e,
    }
}

// ---------------------------------------------------------------------------
// Column-type mappings
// ---------------------------------------------------------------------------

impl BulkRow for RawMovimento {
    const TABLE: &'static str = "raw_movimentos";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "filial_id",
        "data",
        "data_documento",
        "tipo_operacao",
        "compra_id",
        "descricao",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.filial_id);
        b.push_bind(self.data);
        b.push_bind(self.data_documento);
        b.push_bind(self.tipo_operacao.clone());
        b.push_bind(self.compra_id);
        b.push_bind(self.descricao.clone());
    }
}

impl BulkRow for RawParcela {
    const TABLE: &'static str = "raw_parcelas";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "movimento_id",
        "numero",
        "valor",
        "data_vencimento",
        "data_pagamento",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.movimento_id);
        b.push_bind(self.numero);
        b.push_bind(self.valor.to_string());
        b.push_bind(self.data_vencimento);
        b.push_bind(self.data_pagamento);
    }
}

impl BulkRow for RawCompra {
    const TABLE: &'static str = "raw_compras";
    const COLUMNS: &'static [&'static str] = &["id", "numero_documento", "data_documento"];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.numero_documento.clone());
        b.push_bind(self.data_documento);
    }
}

impl BulkRow for RawPagamento {
    const TABLE: &'static str = "raw_pagamentos";
    const COLUMNS: &'static [&'static str] = &["codigo", "data_pagamento", "valor", "forma"];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.codigo);
        b.push_bind(self.data_pagamento);
        b.push_bind(self.valor.to_string());
        b.push_bind(self.forma.clone());
    }
}

impl BulkRow for RawPagamentoDetalhe {
    const TABLE: &'static str = "raw_pagamento_detalhes";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "codigo_pagamento",
        "movimento_id",
        "parcela_numero",
        "valor_alocado",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.codigo_pagamento);
        b.push_bind(self.movimento_id);
        b.push_bind(self.parcela_numero);
        b.push_bind(self.valor_alocado.map(|d| d.to_string()));
    }
}

impl BulkRow for RawMovimentoBancario {
    const TABLE: &'static str = "raw_movimentos_bancarios";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "conta_bancaria_id",
        "codigo_pagamento",
        "tipo_id",
        "valor",
        "data_movimento",
        "data_liquidacao",
        "conciliado",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.conta_bancaria_id);
        b.push_bind(self.codigo_pagamento);
        b.push_bind(self.tipo_id);
        b.push_bind(self.valor.to_string());
        b.push_bind(self.data_movimento);
        b.push_bind(self.data_liquidacao);
        b.push_bind(self.conciliado);
    }
}

impl BulkRow for RawContaBancaria {
    const TABLE: &'static str = "raw_contas_bancarias";
    const COLUMNS: &'static [&'static str] = &["id", "filial_id", "descricao", "saldo_inicial"];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.filial_id);
        b.push_bind(self.descricao.clone());
        b.push_bind(self.saldo_inicial.to_string());
    }
}

impl BulkRow for RawFechamentoCaixa {
    const TABLE: &'static str = "raw_fechamentos_caixa";
    const COLUMNS: &'static [&'static str] =
        &["id", "filial_id", "data", "valor_apurado", "valor_sistema"];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id);
        b.push_bind(self.filial_id);
        b.push_bind(self.data);
        b.push_bind(self.valor_apurado.to_string());
        b.push_bind(self.valor_sistema.to_string());
    }
}

impl BulkRow for FactParcela {
    const TABLE: &'static str = "fact_parcelas";
    const COLUMNS: &'static [&'static str] = &[
        "movimento_id",
        "numero",
        "operacao",
        "valor",
        "data_vencimento",
        "data_documento",
        "codigo_pagamento",
        "conta_bancaria_id",
        "valor_pago",
        "data_liquidacao",
        "conciliado",
        "vinculos_bancarios",
        "status",
        "conta_inferida_id",
        "regra_inferencia",
        "confianca",
        "inferido",
        "conta_efetiva_id",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.movimento_id);
        b.push_bind(self.numero);
        b.push_bind(self.operacao.as_str());
        b.push_bind(self.valor.to_string());
        b.push_bind(self.data_vencimento);
        b.push_bind(self.data_documento);
        b.push_bind(self.codigo_pagamento);
        b.push_bind(self.conta_bancaria_id);
        b.push_bind(self.valor_pago.map(|d| d.to_string()));
        b.push_bind(self.data_liquidacao);
        b.push_bind(self.conciliado);
        b.push_bind(self.vinculos_bancarios);
        b.push_bind(self.status.as_str());
        b.push_bind(self.conta_inferida_id);
        b.push_bind(self.regra_inferencia.map(|r| r.as_str()));
        b.push_bind(self.confianca.map(|c| c.as_str()));
        b.push_bind(self.inferido);
        b.push_bind(self.conta_efetiva());
    }
}

impl BulkRow for CashflowDaily {
    const TABLE: &'static str = "cashflow_diario";
    const COLUMNS: &'static [&'static str] = &[
        "conta_bancaria_id",
        "data",
        "entradas",
        "saidas",
        "liquido",
        "saldo_final",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.conta_bancaria_id);
        b.push_bind(self.data);
        b.push_bind(self.entradas.to_string());
        b.push_bind(self.saidas.to_string());
        b.push_bind(self.liquido.to_string());
        b.push_bind(self.saldo_final.to_string());
    }
}

impl BulkRow for Finding {
    const TABLE: &'static str = "finding";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "regra",
        "severidade",
        "entidade_tipo",
        "entidade_id",
        "mensagem",
        "evidencia",
    ];

    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
        b.push_bind(self.id.to_string());
        b.push_bind(self.regra.clone());
        b.push_bind(self.severidade.as_str());
        b.push_bind(self.entidade_tipo.clone());
        b.push_bind(self.entidade_id.clone());
        b.push_bind(self.mensagem.clone());
        b.push_bind(self.evidencia.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
