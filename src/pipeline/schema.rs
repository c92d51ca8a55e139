//! Idempotent schema evolution for the audit datastore.
//!
//! Each structural requirement is an independently checkable predicate
//! paired with a corrective DDL statement. `ensure` walks the ordered
//! checklist, applies only what is absent, then runs a single
//! consistency probe that enumerates every element and fails with the
//! explicit list of missing names. The destination schema may lag
//! behind pipeline code, so this runs before every pipeline execution.

use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::types::PipelineError;

/// One structural requirement of the audit datastore.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Element {
    Table {
        name: &'static str,
        ddl: &'static str,
    },
    /// A column added after its table first shipped. SQLite has no
    /// `ADD COLUMN IF NOT EXISTS`, so the existence probe is the guard.
    Column {
        table: &'static str,
        column: &'static str,
        ddl: &'static str,
    },
    Index {
        name: &'static str,
        ddl: &'static str,
    },
}

impl Element {
    /// Human-readable element name used in error listings.
    pub(crate) fn name(&self) -> String {
        match self {
            Element::Table { name, .. } => (*name).to_string(),
            Element::Column { table, column, .. } => format!("{table}.{column}"),
            Element::Index { name, .. } => (*name).to_string(),
        }
    }

    fn ddl(&self) -> &'static str {
        match self {
            Element::Table { ddl, .. }
            | Element::Column { ddl, .. }
            | Element::Index { ddl, .. } => ddl,
        }
    }
}

/// Ordered checklist: tables first, then late-added columns, then indexes.
pub(crate) const REQUIREMENTS: &[Element] = &[
    Element::Table {
        name: "snapshot_run",
        ddl: "CREATE TABLE IF NOT EXISTS snapshot_run (
            run_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            period_start DATE NOT NULL,
            period_end DATE NOT NULL,
            window_axis TEXT NOT NULL,
            organization_id INTEGER NOT NULL,
            branch_id INTEGER,
            requested_by_user_id INTEGER NOT NULL,
            requested_by_email TEXT NOT NULL,
            legacy_branch_filter INTEGER,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            error_message TEXT
        )",
    },
    Element::Table {
        name: "raw_movimentos",
        ddl: "CREATE TABLE IF NOT EXISTS raw_movimentos (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            filial_id INTEGER NOT NULL,
            data DATE NOT NULL,
            data_documento DATE,
            tipo_operacao TEXT NOT NULL,
            compra_id INTEGER,
            descricao TEXT
        )",
    },
    Element::Table {
        name: "raw_parcelas",
        ddl: "CREATE TABLE IF NOT EXISTS raw_parcelas (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            movimento_id INTEGER NOT NULL,
            numero INTEGER NOT NULL,
            valor TEXT NOT NULL,
            data_vencimento DATE,
            data_pagamento DATE
        )",
    },
    Element::Table {
        name: "raw_compras",
        ddl: "CREATE TABLE IF NOT EXISTS raw_compras (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            numero_documento TEXT NOT NULL,
            data_documento DATE
        )",
    },
    Element::Table {
        name: "raw_pagamentos",
        ddl: "CREATE TABLE IF NOT EXISTS raw_pagamentos (
            run_id TEXT NOT NULL,
            codigo INTEGER NOT NULL,
            data_pagamento DATE,
            valor TEXT NOT NULL,
            forma TEXT
        )",
    },
    Element::Table {
        name: "raw_pagamento_detalhes",
        ddl: "CREATE TABLE IF NOT EXISTS raw_pagamento_detalhes (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            codigo_pagamento INTEGER NOT NULL,
            movimento_id INTEGER NOT NULL,
            parcela_numero INTEGER NOT NULL,
            valor_alocado TEXT
        )",
    },
    Element::Table {
        name: "raw_movimentos_bancarios",
        ddl: "CREATE TABLE IF NOT EXISTS raw_movimentos_bancarios (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            conta_bancaria_id INTEGER NOT NULL,
            codigo_pagamento INTEGER,
            tipo_id INTEGER NOT NULL,
            valor TEXT NOT NULL,
            data_movimento DATE NOT NULL,
            data_liquidacao DATE,
            conciliado INTEGER
        )",
    },
    Element::Table {
        name: "raw_contas_bancarias",
        ddl: "CREATE TABLE IF NOT EXISTS raw_contas_bancarias (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            filial_id INTEGER,
            descricao TEXT NOT NULL,
            saldo_inicial TEXT NOT NULL
        )",
    },
    Element::Table {
        name: "raw_fechamentos_caixa",
        ddl: "CREATE TABLE IF NOT EXISTS raw_fechamentos_caixa (
            run_id TEXT NOT NULL,
            id INTEGER NOT NULL,
            filial_id INTEGER NOT NULL,
            data DATE NOT NULL,
            valor_apurado TEXT NOT NULL,
            valor_sistema TEXT NOT NULL
        )",
    },
    Element::Table {
        name: "dim_tipo_movimento_bancario",
        ddl: "CREATE TABLE IF NOT EXISTS dim_tipo_movimento_bancario (
            id INTEGER PRIMARY KEY,
            descricao TEXT NOT NULL,
            tipo_operacao TEXT NOT NULL
        )",
    },
    Element::Table {
        name: "fact_parcelas",
        ddl: "CREATE TABLE IF NOT EXISTS fact_parcelas (
            run_id TEXT NOT NULL,
            movimento_id INTEGER NOT NULL,
            numero INTEGER NOT NULL,
            operacao TEXT NOT NULL,
            valor TEXT NOT NULL,
            data_vencimento DATE,
            data_documento DATE NOT NULL,
            codigo_pagamento INTEGER,
            conta_bancaria_id INTEGER,
            valor_pago TEXT,
            data_liquidacao DATE,
            conciliado INTEGER NOT NULL DEFAULT 0,
            vinculos_bancarios INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL
        )",
    },
    Element::Table {
        name: "cashflow_diario",
        ddl: "CREATE TABLE IF NOT EXISTS cashflow_diario (
            run_id TEXT NOT NULL,
            conta_bancaria_id INTEGER NOT NULL,
            data DATE NOT NULL,
            entradas TEXT NOT NULL,
            saidas TEXT NOT NULL,
            liquido TEXT NOT NULL,
            saldo_final TEXT NOT NULL
        )",
    },
    Element::Table {
        name: "finding",
        ddl: "CREATE TABLE IF NOT EXISTS finding (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            regra TEXT NOT NULL,
            severidade TEXT NOT NULL,
            entidade_tipo TEXT NOT NULL,
            entidade_id TEXT NOT NULL,
            mensagem TEXT NOT NULL,
            evidencia TEXT NOT NULL
        )",
    },
    // Inference columns shipped after the fact table; destinations that
    // predate them are upgraded in place.
    Element::Column {
        table: "fact_parcelas",
        column: "conta_inferida_id",
        ddl: "ALTER TABLE fact_parcelas ADD COLUMN conta_inferida_id INTEGER",
    },
    Element::Column {
        table: "fact_parcelas",
        column: "regra_inferencia",
        ddl: "ALTER TABLE fact_parcelas ADD COLUMN regra_inferencia TEXT",
    },
    Element::Column {
        table: "fact_parcelas",
        column: "confianca",
        ddl: "ALTER TABLE fact_parcelas ADD COLUMN confianca TEXT",
    },
    Element::Column {
        table: "fact_parcelas",
        column: "inferido",
        ddl: "ALTER TABLE fact_parcelas ADD COLUMN inferido INTEGER NOT NULL DEFAULT 0",
    },
    Element::Column {
        table: "fact_parcelas",
        column: "conta_efetiva_id",
        ddl: "ALTER TABLE fact_parcelas ADD COLUMN conta_efetiva_id INTEGER",
    },
    Element::Index {
        name: "idx_raw_parcelas_run",
        ddl: "CREATE INDEX IF NOT EXISTS idx_raw_parcelas_run ON raw_parcelas (run_id)",
    },
    Element::Index {
        name: "idx_raw_movimentos_run",
        ddl: "CREATE INDEX IF NOT EXISTS idx_raw_movimentos_run ON raw_movimentos (run_id)",
    },
    Element::Index {
        name: "idx_raw_movimentos_bancarios_run",
        ddl: "CREATE INDEX IF NOT EXISTS idx_raw_movimentos_bancarios_run \
              ON raw_movimentos_bancarios (run_id)",
    },
    Element::Index {
        name: "idx_raw_pagamento_detalhes_run",
        ddl: "CREATE INDEX IF NOT EXISTS idx_raw_pagamento_detalhes_run \
              ON raw_pagamento_detalhes (run_id)",
    },
    Element::Index {
        name: "ux_fact_parcelas_run_key",
        ddl: "CREATE UNIQUE INDEX IF NOT EXISTS ux_fact_parcelas_run_key \
              ON fact_parcelas (run_id, movimento_id, numero)",
    },
    Element::Index {
        name: "ux_cashflow_diario_run_conta_data",
        ddl: "CREATE UNIQUE INDEX IF NOT EXISTS ux_cashflow_diario_run_conta_data \
              ON cashflow_diario (run_id, conta_bancaria_id, data)",
    },
    Element::Index {
        name: "idx_finding_run",
        ddl: "CREATE INDEX IF NOT EXISTS idx_finding_run ON finding (run_id)",
    },
];

/// Verifies and evolves the audit datastore schema.
pub struct SchemaEvolution<'a> {
    audit: &'a SqlitePool,
}

impl<'a> SchemaEvolution<'a> {
    pub fn new(audit: &'a SqlitePool) -> Self {
        Self { audit }
    }

    /// Apply every absent requirement, then verify the full checklist.
    /// Running twice in a row is a no-op on the second call.
    pub async fn ensure(&self) -> Result<(), PipelineError> {
        for element in REQUIREMENTS {
            if self.exists(element).await? {
                debug!(element = %element.name(), "schema element present");
                continue;
            }
            sqlx::query(element.ddl()).execute(self.audit).await?;
            info!(element = %element.name(), "schema element added");
        }
        self.verify().await
    }

    /// Consistency probe: enumerate every required element and fail
    /// with the explicit list of missing names.
    pub async fn verify(&self) -> Result<(), PipelineError> {
        let mut missing = Vec::new();
        for element in REQUIREMENTS {
            if !self.exists(element).await? {
                missing.push(element.name());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::SchemaNotInitialized { missing })
        }
    }

    async fn exists(&self, element: &Element) -> Result<bool, sqlx::Error> {
        match element {
            Element::Table { name, .. } => {
                let found: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                )
                .bind(name)
                .fetch_optional(self.audit)
                .await?;
                Ok(found.is_some())
            }
            Element::Column { table, column, .. } => {
                let sql =
                    format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1");
                let found: Option<i64> = sqlx::query_scalar(&sql)
                    .bind(column)
                    .fetch_optional(self.audit)
                    .await?;
                Ok(found.is_some())
            }
            Element::Index { name, .. } => {
                let found: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
                )
                .bind(name)
                .fetch_optional(self.audit)
                .await?;
                Ok(found.is_some())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn mem_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_on_empty_database() {
        let pool = mem_pool().await;
        let schema = SchemaEvolution::new(&pool);
        schema.ensure().await.unwrap();
        schema.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let pool = mem_pool().await;
        let schema = SchemaEvolution::new(&pool);
        schema.ensure().await.unwrap();
        schema.ensure().await.unwrap();
        schema.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_lists_every_missing_element() {
        let pool = mem_pool().await;
        let schema = SchemaEvolution::new(&pool);
        let err = schema.verify().await.unwrap_err();
        match err {
            PipelineError::SchemaNotInitialized { missing } => {
                assert_eq!(missing.len(), REQUIREMENTS.len());
                assert!(missing.contains(&"snapshot_run".to_string()));
                assert!(missing.contains(&"fact_parcelas.inferido".to_string()));
                assert!(missing.contains(&"idx_finding_run".to_string()));
            }
            other => panic!("expected SchemaNotInitialized, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_upgrades_lagging_fact_table() {
        let pool = mem_pool().await;

        // Simulate a destination that shipped before the inference columns.
        sqlx::query(
            "CREATE TABLE fact_parcelas (
                run_id TEXT NOT NULL,
                movimento_id INTEGER NOT NULL,
                numero INTEGER NOT NULL,
                operacao TEXT NOT NULL,
                valor TEXT NOT NULL,
                data_vencimento DATE,
                data_documento DATE NOT NULL,
                codigo_pagamento INTEGER,
                conta_bancaria_id INTEGER,
                valor_pago TEXT,
                data_liquidacao DATE,
                conciliado INTEGER NOT NULL DEFAULT 0,
                vinculos_bancarios INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        let schema = SchemaEvolution::new(&pool);
        schema.ensure().await.unwrap();

        let inferido: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM pragma_table_info('fact_parcelas') WHERE name = 'inferido'",
        )
        .fetch_optional(&pool)
        .await
        .unwrap();
        assert!(inferido.is_some(), "inferido column should have been added");
    }

    #[tokio::test]
    async fn test_verify_detects_dropped_index() {
        let pool = mem_pool().await;
        let schema = SchemaEvolution::new(&pool);
        schema.ensure().await.unwrap();

        sqlx::query("DROP INDEX idx_finding_run")
            .execute(&pool)
            .await
            .unwrap();

        let err = schema.verify().await.unwrap_err();
        match err {
            PipelineError::SchemaNotInitialized { missing } => {
                assert_eq!(missing, vec!["idx_finding_run".to_string()]);
            }
            other => panic!("expected SchemaNotInitialized, got {other}"),
        }
    }
}
