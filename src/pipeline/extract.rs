//! Concurrent extraction of the legacy record sets for a time window.
//!
//! The 8 record sets are read with independent read-only queries joined
//! by a barrier (`tokio::try_join!`). Every windowed query embeds one
//! shared boundary predicate; legacy data allows null dates on the
//! window axis, so the predicate falls back to the parent movement date.
//! Queries anchored at installments or payment details LEFT JOIN the
//! movement so rows with a missing parent still enter the snapshot and
//! surface as integrity findings downstream.
//!
//! Legacy identifier columns are narrower than ours; every id is read
//! as `i64` at this boundary so cross-system identifiers never lose
//! precision.

use chrono::NaiveDate;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::storage::{decimal_column, opt_decimal_column};
use crate::types::{
    PipelineError, RawCompra, RawContaBancaria, RawFechamentoCaixa, RawMovimento,
    RawMovimentoBancario, RawPagamento, RawPagamentoDetalhe, RawParcela,
    TipoMovimentoBancario, WindowAxis,
};

/// Extraction boundary: inclusive date window, axis, optional legacy
/// branch restriction.
#[derive(Debug, Clone)]
pub struct ExtractionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub axis: WindowAxis,
    pub branch: Option<i64>,
}

/// The single boundary predicate shared by every windowed query.
///
/// `?1`/`?2` are the window bounds; the fallback clause covers legacy
/// rows with a null date on the chosen axis. Callers alias the
/// installment `p` and the movement `m`.
pub fn window_predicate(axis: WindowAxis) -> String {
    let col = axis.source_column();
    format!("({col} BETWEEN ?1 AND ?2 OR ({col} IS NULL AND m.data BETWEEN ?1 AND ?2))")
}

/// Branch restriction shared by every windowed query; `?3` binds the
/// optional legacy branch id.
const BRANCH_PREDICATE: &str = "(?3 IS NULL OR m.filial_id = ?3)";

/// Everything pulled from the source system for one run.
#[derive(Debug, Default)]
pub struct Extraction {
    pub movimentos: Vec<RawMovimento>,
    pub parcelas: Vec<RawParcela>,
    pub compras: Vec<RawCompra>,
    pub pagamentos: Vec<RawPagamento>,
    pub detalhes: Vec<RawPagamentoDetalhe>,
    pub movimentos_bancarios: Vec<RawMovimentoBancario>,
    pub contas_bancarias: Vec<RawContaBancaria>,
    pub fechamentos_caixa: Vec<RawFechamentoCaixa>,
}

impl Extraction {
    pub fn total_rows(&self) -> usize {
        self.movimentos.len()
            + self.parcelas.len()
            + self.compras.len()
            + self.pagamentos.len()
            + self.detalhes.len()
            + self.movimentos_bancarios.len()
            + self.contas_bancarias.len()
            + self.fechamentos_caixa.len()
    }
}

/// Reads the legacy source database. All queries are read-only.
pub struct Extractor<'a> {
    source: &'a SqlitePool,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a SqlitePool) -> Self {
        Self { source }
    }

    /// Extract all 8 record sets concurrently (fan-out/fan-in).
    pub async fn extract(&self, window: &ExtractionWindow) -> Result<Extraction, PipelineError> {
        let (
            movimentos,
            parcelas,
            compras,
            pagamentos,
            detalhes,
            movimentos_bancarios,
            contas_bancarias,
            fechamentos_caixa,
        ) = tokio::try_join!(
            self.movimentos(window),
            self.parcelas(window),
            self.compras(window),
            self.pagamentos(window),
            self.detalhes(window),
            self.movimentos_bancarios(window),
            self.contas_bancarias(),
            self.fechamentos_caixa(window),
        )?;

        let extraction = Extraction {
            movimentos,
            parcelas,
            compras,
            pagamentos,
            detalhes,
            movimentos_bancarios,
            contas_bancarias,
            fechamentos_caixa,
        };

        info!(
            movimentos = extraction.movimentos.len(),
            parcelas = extraction.parcelas.len(),
            compras = extraction.compras.len(),
            pagamentos = extraction.pagamentos.len(),
            detalhes = extraction.detalhes.len(),
            movimentos_bancarios = extraction.movimentos_bancarios.len(),
            contas_bancarias = extraction.contas_bancarias.len(),
            fechamentos_caixa = extraction.fechamentos_caixa.len(),
            "extraction complete"
        );

        Ok(extraction)
    }

    /// Bank-movement-type reference dimension, fetched by the separate
    /// dimension-sync step (not part of the parallel fan-out).
    pub async fn fetch_movement_types(&self) -> Result<Vec<TipoMovimentoBancario>, PipelineError> {
        let rows = sqlx::query(
            "SELECT t.id, t.descricao, t.tipo_operacao
             FROM tipo_movimento_bancario t
             ORDER BY t.id",
        )
        .fetch_all(self.source)
        .await
        .map_err(|e| PipelineError::Extraction {
            entity: "tipo_movimento_bancario",
            source: e,
        })?;

        rows.iter()
            .map(|row| {
                Ok(TipoMovimentoBancario {
                    id: row.try_get("id")?,
                    descricao: row.try_get("descricao")?,
                    tipo_operacao: row.try_get("tipo_operacao")?,
                })
            })
            .collect()
    }

    // -- Record-set queries ----------------------------------------------

    async fn windowed_rows(
        &self,
        entity: &'static str,
        sql: &str,
        window: &ExtractionWindow,
    ) -> Result<Vec<SqliteRow>, PipelineError> {
        sqlx::query(sql)
            .bind(window.start)
            .bind(window.end)
            .bind(window.branch)
            .fetch_all(self.source)
            .await
            .map_err(|e| PipelineError::Extraction { entity, source: e })
    }

    async fn movimentos(&self, window: &ExtractionWindow) -> Result<Vec<RawMovimento>, PipelineError> {
        let sql = format!(
            "SELECT m.id, m.filial_id, m.data, m.data_documento, m.tipo_operacao,
                    m.compra_id, m.descricao
             FROM movimento m
             WHERE {branch}
               AND EXISTS (SELECT 1 FROM parcela p
                           WHERE p.movimento_id = m.id AND {pred})
             ORDER BY m.id",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self.windowed_rows("movimento", &sql, window).await?;
        rows.iter().map(movimento_from_row).collect()
    }

    async fn parcelas(&self, window: &ExtractionWindow) -> Result<Vec<RawParcela>, PipelineError> {
        let sql = format!(
            "SELECT p.id, p.movimento_id, p.numero, p.valor,
                    p.data_vencimento, p.data_pagamento
             FROM parcela p
             LEFT JOIN movimento m ON m.id = p.movimento_id
             WHERE {branch} AND {pred}
             ORDER BY p.movimento_id, p.numero",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self.windowed_rows("parcela", &sql, window).await?;
        rows.iter().map(parcela_from_row).collect()
    }

    async fn compras(&self, window: &ExtractionWindow) -> Result<Vec<RawCompra>, PipelineError> {
        let sql = format!(
            "SELECT c.id, c.numero_documento, c.data_documento
             FROM compra c
             WHERE EXISTS (SELECT 1 FROM movimento m
                           JOIN parcela p ON p.movimento_id = m.id
                           WHERE m.compra_id = c.id AND {branch} AND {pred})
             ORDER BY c.id",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self.windowed_rows("compra", &sql, window).await?;
        rows.iter().map(compra_from_row).collect()
    }

    async fn pagamentos(&self, window: &ExtractionWindow) -> Result<Vec<RawPagamento>, PipelineError> {
        let sql = format!(
            "SELECT pg.codigo, pg.data_pagamento, pg.valor, pg.forma
             FROM pagamento pg
             WHERE EXISTS (SELECT 1 FROM pagamento_detalhe d
                           JOIN parcela p ON p.movimento_id = d.movimento_id
                                         AND p.numero = d.parcela_numero
                           LEFT JOIN movimento m ON m.id = p.movimento_id
                           WHERE d.codigo_pagamento = pg.codigo
                             AND {branch} AND {pred})
             ORDER BY pg.codigo",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self.windowed_rows("pagamento", &sql, window).await?;
        rows.iter().map(pagamento_from_row).collect()
    }

    async fn detalhes(
        &self,
        window: &ExtractionWindow,
    ) -> Result<Vec<RawPagamentoDetalhe>, PipelineError> {
        let sql = format!(
            "SELECT d.id, d.codigo_pagamento, d.movimento_id, d.parcela_numero,
                    d.valor_alocado
             FROM pagamento_detalhe d
             JOIN parcela p ON p.movimento_id = d.movimento_id
                           AND p.numero = d.parcela_numero
             LEFT JOIN movimento m ON m.id = p.movimento_id
             WHERE {branch} AND {pred}
             ORDER BY d.movimento_id, d.parcela_numero, d.codigo_pagamento",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self.windowed_rows("pagamento_detalhe", &sql, window).await?;
        rows.iter().map(detalhe_from_row).collect()
    }

    async fn movimentos_bancarios(
        &self,
        window: &ExtractionWindow,
    ) -> Result<Vec<RawMovimentoBancario>, PipelineError> {
        let sql = format!(
            "SELECT b.id, b.conta_bancaria_id, b.codigo_pagamento, b.tipo_id,
                    b.valor, b.data_movimento, b.data_liquidacao, b.conciliado
             FROM movimento_bancario b
             WHERE b.codigo_pagamento IN (
                 SELECT d.codigo_pagamento
                 FROM pagamento_detalhe d
                 JOIN parcela p ON p.movimento_id = d.movimento_id
                               AND p.numero = d.parcela_numero
                 LEFT JOIN movimento m ON m.id = p.movimento_id
                 WHERE {branch} AND {pred})
             ORDER BY b.data_movimento, b.id",
            branch = BRANCH_PREDICATE,
            pred = window_predicate(window.axis),
        );
        let rows = self
            .windowed_rows("movimento_bancario", &sql, window)
            .await?;
        rows.iter().map(movimento_bancario_from_row).collect()
    }

    /// Full account dimension, not windowed: house-bank inference and
    /// opening balances need accounts regardless of in-window activity.
    async fn contas_bancarias(&self) -> Result<Vec<RawContaBancaria>, PipelineError> {
        let rows = sqlx::query(
            "SELECT cb.id, cb.filial_id, cb.descricao, cb.saldo_inicial
             FROM conta_bancaria cb
             ORDER BY cb.id",
        )
        .fetch_all(self.source)
        .await
        .map_err(|e| PipelineError::Extraction {
            entity: "conta_bancaria",
            source: e,
        })?;
        rows.iter().map(conta_bancaria_from_row).collect()
    }

    /// Cash closings are daily facts with no installment linkage; the
    /// window applies to their own date.
    async fn fechamentos_caixa(
        &self,
        window: &ExtractionWindow,
    ) -> Result<Vec<RawFechamentoCaixa>, PipelineError> {
        let sql = "SELECT f.id, f.filial_id, f.data, f.valor_apurado, f.valor_sistema
             FROM fechamento_caixa f
             WHERE f.data BETWEEN ?1 AND ?2 AND (?3 IS NULL OR f.filial_id = ?3)
             ORDER BY f.data, f.id";
        let rows = self.windowed_rows("fechamento_caixa", sql, window).await?;
        rows.iter().map(fechamento_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mappers (shared with the transformer, which re-reads the same
// shapes from the raw staging tables)
// ---------------------------------------------------------------------------

pub(crate) fn movimento_from_row(row: &SqliteRow) -> Result<RawMovimento, PipelineError> {
    Ok(RawMovimento {
        id: row.try_get("id")?,
        filial_id: row.try_get("filial_id")?,
        data: row.try_get("data")?,
        data_documento: row.try_get("data_documento")?,
        tipo_operacao: row.try_get("tipo_operacao")?,
        compra_id: row.try_get("compra_id")?,
        descricao: row.try_get("descricao")?,
    })
}

pub(crate) fn parcela_from_row(row: &SqliteRow) -> Result<RawParcela, PipelineError> {
    Ok(RawParcela {
        id: row.try_get("id")?,
        movimento_id: row.try_get("movimento_id")?,
        numero: row.try_get("numero")?,
        valor: decimal_column(row, "valor")?,
        data_vencimento: row.try_get("data_vencimento")?,
        data_pagamento: row.try_get("data_pagamento")?,
    })
}

pub(crate) fn compra_from_row(row: &SqliteRow) -> Result<RawCompra, PipelineError> {
    Ok(RawCompra {
        id: row.try_get("id")?,
        numero_documento: row.try_get("numero_documento")?,
        data_documento: row.try_get("data_documento")?,
    })
}

pub(crate) fn pagamento_from_row(row: &SqliteRow) -> Result<RawPagamento, PipelineError> {
    Ok(RawPagamento {
        codigo: row.try_get("codigo")?,
        data_pagamento: row.try_get("data_pagamento")?,
        valor: decimal_column(row, "valor")?,
        forma: row.try_get("forma")?,
    })
}

pub(crate) fn detalhe_from_row(row: &SqliteRow) -> Result<RawPagamentoDetalhe, PipelineError> {
    Ok(RawPagamentoDetalhe {
        id: row.try_get("id")?,
        codigo_pagamento: row.try_get("codigo_pagamento")?,
        movimento_id: row.try_get("movimento_id")?,
        parcela_numero: row.try_get("parcela_numero")?,
        valor_alocado: opt_decimal_column(row, "valor_alocado")?,
    })
}

pub(crate) fn movimento_bancario_from_row(
    row: &SqliteRow,
) -> Result<RawMovimentoBancario, PipelineError> {
    Ok(RawMovimentoBancario {
        id: row.try_get("id")?,
        conta_bancaria_id: row.try_get("conta_bancaria_id")?,
        codigo_pagamento: row.try_get("codigo_pagamento")?,
        tipo_id: row.try_get("tipo_id")?,
        valor: decimal_column(row, "valor")?,
        data_movimento: row.try_get("data_movimento")?,
        data_liquidacao: row.try_get("data_liquidacao")?,
        conciliado: row.try_get("conciliado")?,
    })
}

pub(crate) fn conta_bancaria_from_row(row: &SqliteRow) -> Result<RawContaBancaria, PipelineError> {
    Ok(RawContaBancaria {
        id: row.try_get("id")?,
        filial_id: row.try_get("filial_id")?,
        descricao: row.try_get("descricao")?,
        saldo_inicial: decimal_column(row, "saldo_inicial")?,
    })
}

pub(crate) fn fechamento_from_row(row: &SqliteRow) -> Result<RawFechamentoCaixa, PipelineError> {
    Ok(RawFechamentoCaixa {
        id: row.try_get("id")?,
        filial_id: row.try_get("filial_id")?,
        data: row.try_get("data")?,
        valor_apurado: decimal_column(row, "valor_apurado")?,
        valor_sistema: decimal_column(row, "valor_sistema")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
