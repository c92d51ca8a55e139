//! Daily cashflow aggregation with true running balances.
//!
//! Every (account, date) with at least one linked bank movement gets a
//! row: inbound/outbound classification comes from the movement-type
//! dimension's operation code, and the closing balance is the opening
//! balance plus the cumulative net ordered by date (unbounded-preceding
//! running sum, not a day-isolated delta).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::extract::{conta_bancaria_from_row, movimento_bancario_from_row};
use crate::storage::bulk_insert;
use crate::types::{CashflowDaily, PipelineError, RawMovimentoBancario, TipoMovimentoBancario};

/// Compute the daily rows. Pure so the prefix-sum semantics are
/// independently testable.
pub fn build_daily(
    movimentos: &[RawMovimentoBancario],
    tipos: &HashMap<i64, TipoMovimentoBancario>,
    saldos_iniciais: &HashMap<i64, Decimal>,
) -> Vec<CashflowDaily> {
    // (entradas, saidas) per account-day; BTreeMap keeps account/date order.
    let mut days: BTreeMap<(i64, NaiveDate), (Decimal, Decimal)> = BTreeMap::new();

    for movimento in movimentos {
        let operacao = tipos
            .get(&movimento.tipo_id)
            .map(|t| t.tipo_operacao.trim().to_uppercase());
        let key = (movimento.conta_bancaria_id, movimento.data_movimento);
        match operacao.as_deref() {
            Some("E") => days.entry(key).or_default().0 += movimento.valor,
            Some("S") => days.entry(key).or_default().1 += movimento.valor,
            _ => warn!(
                movimento = movimento.id,
                tipo_id = movimento.tipo_id,
                "bank movement with unknown type; not classified"
            ),
        }
    }

    let mut rows = Vec::with_capacity(days.len());
    let mut current_account: Option<i64> = None;
    let mut running = Decimal::ZERO;

    for ((conta, data), (entradas, saidas)) in days {
        if current_account != Some(conta) {
            current_account = Some(conta);
            running = saldos_iniciais.get(&conta).copied().unwrap_or(Decimal::ZERO);
        }
        let liquido = entradas - saidas;
        running += liquido;
        rows.push(CashflowDaily {
            conta_bancaria_id: conta,
            data,
            entradas,
            saidas,
            liquido,
            saldo_final: running,
        });
    }

    rows
}

/// Computes and persists `cashflow_diario` for one run.
pub struct CashflowAggregator<'a> {
    audit: &'a SqlitePool,
    batch_size: usize,
}

impl<'a> CashflowAggregator<'a> {
    pub fn new(audit: &'a SqlitePool, batch_size: usize) -> Self {
        Self { audit, batch_size }
    }

    /// Build the daily rows for run_id. Returns the row count.
    pub async fn aggregate(&self, run_id: Uuid) -> Result<usize, PipelineError> {
        let run_key = run_id.to_string();

        let bancarios = {
            let rows = sqlx::query(
                "SELECT id, conta_bancaria_id, codigo_pagamento, tipo_id, valor,
                        data_movimento, data_liquidacao, conciliado
                 FROM raw_movimentos_bancarios WHERE run_id = ?1",
            )
            .bind(&run_key)
            .fetch_all(self.audit)
            .await?;
            rows.iter()
                .map(movimento_bancario_from_row)
                .collect::<Result<Vec<_>, _>>()?
        };

        let tipos: HashMap<i64, TipoMovimentoBancario> = {
            let rows = sqlx::query(
                "SELECT id, descricao, tipo_operacao FROM dim_tipo_movimento_bancario",
            )
            .fetch_all(self.audit)
            .await?;
            rows.iter()
                .map(|row| {
                    Ok::<_, PipelineError>(TipoMovimentoBancario {
                        id: row.try_get("id")?,
                        descricao: row.try_get("descricao")?,
                        tipo_operacao: row.try_get("tipo_operacao")?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|t| (t.id, t))
                .collect()
        };

        let saldos_iniciais: HashMap<i64, Decimal> = {
            let rows = sqlx::query(
                "SELECT id, filial_id, descricao, saldo_inicial
                 FROM raw_contas_bancarias WHERE run_id = ?1",
            )
            .bind(&run_key)
            .fetch_all(self.audit)
            .await?;
            rows.iter()
                .map(conta_bancaria_from_row)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|c| (c.id, c.saldo_inicial))
                .collect()
        };

        let daily = build_daily(&bancarios, &tipos, &saldos_iniciais);

        let mut tx = self.audit.begin().await?;
        sqlx::query("DELETE FROM cashflow_diario WHERE run_id = ?1")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?;
        bulk_insert(&mut tx, run_id, &daily, self.batch_size).await?;
        tx.commit().await?;

        info!(run_id = %run_id, rows = daily.len(), "daily cashflow aggregated");
        Ok(daily.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn tipo(id: i64, operacao: &str) -> (i64, TipoMovimentoBancario) {
        (
            id,
            TipoMovimentoBancario {
                id,
                descricao: format!("tipo {id}"),
                tipo_operacao: operacao.to_string(),
            },
        )
    }

    fn movimento(
        id: i64,
        conta: i64,
        tipo_id: i64,
        valor: Decimal,
        data: &str,
    ) -> RawMovimentoBancario {
        RawMovimentoBancario {
            id,
            conta_bancaria_id: conta,
            codigo_pagamento: Some(500 + id),
            tipo_id,
            valor,
            data_movimento: date(data),
            data_liquidacao: None,
            conciliado: None,
        }
    }

    #[test]
    fn test_running_balance_is_cumulative() {
        let tipos: HashMap<_, _> = vec![tipo(1, "E"), tipo(2, "S")].into_iter().collect();
        let saldos: HashMap<i64, Decimal> = [(1, dec!(500.00))].into_iter().collect();
        let movimentos = vec![
            movimento(1, 1, 1, dec!(998.50), "2026-03-16"),
            movimento(2, 1, 2, dec!(300.00), "2026-03-21"),
            movimento(3, 1, 1, dec!(100.00), "2026-03-21"),
        ];

        let rows = build_daily(&movimentos, &tipos, &saldos);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].data, date("2026-03-16"));
        assert_eq!(rows[0].entradas, dec!(998.50));
        assert_eq!(rows[0].saidas, dec!(0));
        assert_eq!(rows[0].liquido, dec!(998.50));
        assert_eq!(rows[0].saldo_final, dec!(1498.50));

        assert_eq!(rows[1].data, date("2026-03-21"));
        assert_eq!(rows[1].entradas, dec!(100.00));
        assert_eq!(rows[1].saidas, dec!(300.00));
        assert_eq!(rows[1].liquido, dec!(-200.00));
        // Opening + sum of all nets so far, not a day-isolated delta.
        assert_eq!(rows[1].saldo_final, dec!(1298.50));
    }

    #[test]
    fn test_accounts_accumulate_independently() {
        let tipos: HashMap<_, _> = vec![tipo(1, "E")].into_iter().collect();
        let saldos: HashMap<i64, Decimal> =
            [(1, dec!(100.00)), (2, dec!(1000.00))].into_iter().collect();
        let movimentos = vec![
            movimento(1, 1, 1, dec!(10.00), "2026-03-16"),
            movimento(2, 2, 1, dec!(20.00), "2026-03-16"),
            movimento(3, 1, 1, dec!(5.00), "2026-03-17"),
        ];

        let rows = build_daily(&movimentos, &tipos, &saldos);
        assert_eq!(rows.len(), 3);

        let conta1: Vec<_> = rows.iter().filter(|r| r.conta_bancaria_id == 1).collect();
        assert_eq!(conta1[0].saldo_final, dec!(110.00));
        assert_eq!(conta1[1].saldo_final, dec!(115.00));

        let conta2: Vec<_> = rows.iter().filter(|r| r.conta_bancaria_id == 2).collect();
        assert_eq!(conta2[0].saldo_final, dec!(1020.00));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let tipos: HashMap<_, _> = vec![tipo(1, "E")].into_iter().collect();
        let saldos = HashMap::new();
        let movimentos = vec![
            movimento(1, 1, 99, dec!(10.00), "2026-03-16"), // unknown type
        ];
        let rows = build_daily(&movimentos, &tipos, &saldos);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_opening_balance_defaults_to_zero() {
        let tipos: HashMap<_, _> = vec![tipo(1, "E")].into_iter().collect();
        let saldos = HashMap::new();
        let movimentos = vec![movimento(1, 7, 1, dec!(42.00), "2026-03-16")];
        let rows = build_daily(&movimentos, &tipos, &saldos);
        assert_eq!(rows[0].saldo_final, dec!(42.00));
    }

    #[test]
    fn test_no_movements_no_rows() {
        let rows = build_daily(&[], &HashMap::new(), &HashMap::new());
        assert!(rows.is_empty());
    }
}
