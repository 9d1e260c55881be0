//! Tax reconciliation: required trades, lot consumption, wash-sale audit,
//! liability pricing.
//!
//! Two consumption paths exist and must never be mixed: `reconcile` takes
//! symbol-level revision trades and consumes lots FIFO; `reconcile_lot_level`
//! takes solver output, where every sell already names its lot. The wash-sale
//! audit here is post-hoc bookkeeping - the optimizer's restriction engine is
//! the gate - so findings are recorded but never change trades.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use rebalance_core::{Prices, TaxLot, Trade, TradeSide, LONG_TERM_THRESHOLD_DAYS};

use crate::artifact::{
    round_dollars, round_weight, PositionEntry, RealizedGains, TaxArtifact, TaxLiability,
    WashSaleAdjustment,
};
use crate::error::LedgerError;

/// Days on either side of a sale that a repurchase disallows the loss.
const WASH_WINDOW_DAYS: i64 = 30;

/// Progressive federal brackets plus flat state and NIIT rates.
#[derive(Debug, Clone)]
pub struct TaxBrackets {
    /// (upper bound, rate); the last bound should be infinite.
    pub federal_short: Vec<(f64, f64)>,
    pub federal_long: Vec<(f64, f64)>,
    pub state_short_rate: f64,
    pub state_long_rate: f64,
    pub niit_rate: f64,
}

impl Default for TaxBrackets {
    fn default() -> Self {
        Self {
            federal_short: vec![
                (11_600.0, 0.10),
                (47_150.0, 0.12),
                (100_525.0, 0.22),
                (191_950.0, 0.24),
                (243_725.0, 0.32),
                (609_350.0, 0.35),
                (f64::INFINITY, 0.37),
            ],
            federal_long: vec![
                (47_025.0, 0.0),
                (518_900.0, 0.15),
                (f64::INFINITY, 0.20),
            ],
            state_short_rate: 0.0,
            state_long_rate: 0.0,
            niit_rate: 0.038,
        }
    }
}

fn progressive_tax(income: f64, brackets: &[(f64, f64)]) -> f64 {
    if income <= 0.0 {
        return 0.0;
    }
    let mut tax = 0.0;
    let mut lower = 0.0;
    for (upper, rate) in brackets {
        let taxable = (income.min(*upper) - lower).max(0.0);
        tax += taxable * rate;
        if income <= *upper {
            break;
        }
        lower = *upper;
    }
    tax
}

/// A symbol-level trade implied by an allocation revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredTrade {
    pub identifier: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub value: f64,
}

/// One slice of a lot consumed by a sale.
#[derive(Debug, Clone)]
pub struct LotSlice {
    pub identifier: String,
    pub lot_id: String,
    pub quantity_sold: f64,
    pub quantity_remaining: f64,
    pub proceeds: f64,
    pub cost_basis: f64,
    pub gain_loss: f64,
    pub is_long_term: bool,
    pub sale_date: NaiveDate,
}

/// A dated purchase, for the wash-sale audit window.
#[derive(Debug, Clone)]
pub struct PurchaseRecord {
    pub identifier: String,
    pub date: NaiveDate,
}

pub struct TaxLedger {
    brackets: TaxBrackets,
}

impl Default for TaxLedger {
    fn default() -> Self {
        Self::new(TaxBrackets::default())
    }
}

impl TaxLedger {
    pub fn new(brackets: TaxBrackets) -> Self {
        Self { brackets }
    }

    /// Symbol-level trades needed to move `current` to `target`.
    /// Deterministic: identifiers ascending.
    pub fn required_trades(
        current: &BTreeMap<String, f64>,
        target: &BTreeMap<String, f64>,
        portfolio_value: f64,
        prices: &Prices,
    ) -> Result<Vec<RequiredTrade>, LedgerError> {
        let mut identifiers: Vec<&String> = current.keys().chain(target.keys()).collect();
        identifiers.sort();
        identifiers.dedup();

        let mut trades = Vec::new();
        for identifier in identifiers {
            let current_weight = current.get(identifier).copied().unwrap_or(0.0);
            let target_weight = target.get(identifier).copied().unwrap_or(0.0);
            let delta_value = (target_weight - current_weight) * portfolio_value;
            if delta_value.abs() < 0.01 {
                continue;
            }
            let price = prices.require(identifier).map_err(|_| {
                LedgerError::InvalidInput(format!("price missing for {}", identifier))
            })?;
            if price <= 0.0 {
                continue;
            }
            trades.push(RequiredTrade {
                identifier: identifier.clone(),
                side: if delta_value > 0.0 {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                quantity: delta_value.abs() / price,
                value: delta_value.abs(),
            });
        }
        Ok(trades)
    }

    /// Consume lots of one identifier FIFO by acquisition date.
    pub fn consume_fifo(
        lots: &mut Vec<TaxLot>,
        identifier: &str,
        quantity: f64,
        price: f64,
        sale_date: NaiveDate,
    ) -> Vec<LotSlice> {
        let mut order: Vec<usize> = lots
            .iter()
            .enumerate()
            .filter(|(_, lot)| lot.identifier == identifier && lot.quantity > 0.0)
            .map(|(i, _)| i)
            .collect();
        order.sort_by(|&a, &b| {
            lots[a]
                .date_acquired
                .cmp(&lots[b].date_acquired)
                .then_with(|| lots[a].lot_id.cmp(&lots[b].lot_id))
        });

        let mut remaining = quantity;
        let mut slices = Vec::new();
        for idx in order {
            if remaining <= 1e-9 {
                break;
            }
            let lot = &mut lots[idx];
            let take = remaining.min(lot.quantity);
            let unit_basis = lot.unit_cost_basis();
            let proceeds = take * price;
            let basis = take * unit_basis;
            let days_held = (sale_date - lot.date_acquired).num_days();

            lot.quantity -= take;
            lot.cost_basis -= basis;
            remaining -= take;

            slices.push(LotSlice {
                identifier: identifier.to_string(),
                lot_id: lot.lot_id.clone(),
                quantity_sold: take,
                quantity_remaining: lot.quantity,
                proceeds,
                cost_basis: basis,
                gain_loss: proceeds - basis,
                is_long_term: days_held >= LONG_TERM_THRESHOLD_DAYS,
                sale_date,
            });
        }
        slices
    }

    /// Lot-level consumption for solver output: each sell names its lot,
    /// FIFO is skipped entirely.
    pub fn consume_lot_level(
        lots: &mut Vec<TaxLot>,
        trades: &[Trade],
        sale_date: NaiveDate,
    ) -> Result<Vec<LotSlice>, LedgerError> {
        let mut slices = Vec::new();
        for trade in trades {
            if trade.side != TradeSide::Sell {
                continue;
            }
            let lot_id = trade.lot_id.as_deref().ok_or_else(|| {
                LedgerError::InvalidInput(format!(
                    "lot-level sell of {} is missing its lot id",
                    trade.identifier
                ))
            })?;
            let lot = lots
                .iter_mut()
                .find(|l| l.lot_id == lot_id)
                .ok_or_else(|| LedgerError::InvalidInput(format!("unknown lot {}", lot_id)))?;
            if trade.quantity > lot.quantity + 1e-9 {
                return Err(LedgerError::InvalidInput(format!(
                    "sell of {} exceeds lot {} quantity",
                    trade.quantity, lot_id
                )));
            }
            let take = trade.quantity.min(lot.quantity);
            let unit_basis = lot.unit_cost_basis();
            let proceeds = take * trade.price;
            let basis = take * unit_basis;
            let days_held = (sale_date - lot.date_acquired).num_days();

            lot.quantity -= take;
            lot.cost_basis -= basis;

            slices.push(LotSlice {
                identifier: trade.identifier.clone(),
                lot_id: lot_id.to_string(),
                quantity_sold: take,
                quantity_remaining: lot.quantity,
                proceeds,
                cost_basis: basis,
                gain_loss: proceeds - basis,
                is_long_term: days_held >= LONG_TERM_THRESHOLD_DAYS,
                sale_date,
            });
        }
        Ok(slices)
    }

    /// Scan the rolling 61-day window (30 before, sale day, 30 after): a
    /// loss slice whose symbol was also bought inside the window is
    /// disallowed. Returns the adjustments; the disallowed total is added
    /// back to the short-term bucket by the caller.
    pub fn audit_wash_sales(
        slices: &[LotSlice],
        purchases: &[PurchaseRecord],
    ) -> Vec<WashSaleAdjustment> {
        let mut adjustments = Vec::new();
        for slice in slices {
            if slice.gain_loss >= 0.0 {
                continue;
            }
            let window_start = slice.sale_date - Duration::days(WASH_WINDOW_DAYS);
            let window_end = slice.sale_date + Duration::days(WASH_WINDOW_DAYS);
            let washed = purchases.iter().any(|p| {
                p.identifier == slice.identifier
                    && p.date >= window_start
                    && p.date <= window_end
            });
            if washed {
                debug!(
                    identifier = %slice.identifier,
                    loss = slice.gain_loss,
                    "wash-sale audit disallows loss"
                );
                adjustments.push(WashSaleAdjustment {
                    identifier: slice.identifier.clone(),
                    sale_date: slice.sale_date,
                    disallowed_loss: round_dollars(slice.gain_loss.abs()),
                });
            }
        }
        adjustments
    }

    /// Price the liability: progressive federal brackets, flat state rates,
    /// flat NIIT on positive investment income.
    pub fn tax_liability(&self, realized: &RealizedGains) -> TaxLiability {
        let st = realized.short_term.max(0.0);
        let lt = realized.long_term.max(0.0);
        let st_tax =
            progressive_tax(st, &self.brackets.federal_short) + st * self.brackets.state_short_rate;
        let lt_tax =
            progressive_tax(lt, &self.brackets.federal_long) + lt * self.brackets.state_long_rate;
        let investment_income = (realized.short_term + realized.long_term).max(0.0);
        let niit = investment_income * self.brackets.niit_rate;
        TaxLiability {
            st_tax: round_dollars(st_tax),
            lt_tax: round_dollars(lt_tax),
            niit: round_dollars(niit),
            total: round_dollars(st_tax + lt_tax + niit),
        }
    }

    /// Full symbolic reconciliation of an allocation revision.
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile(
        &self,
        allocation_id: &str,
        tax_year: i32,
        as_of: DateTime<Utc>,
        current_allocation: &BTreeMap<String, f64>,
        target_allocation: &BTreeMap<String, f64>,
        portfolio_value: f64,
        prices: &Prices,
        lots: &[TaxLot],
        purchases: &[PurchaseRecord],
    ) -> Result<TaxArtifact, LedgerError> {
        let trades = Self::required_trades(
            current_allocation,
            target_allocation,
            portfolio_value,
            prices,
        )?;
        let sale_date = as_of.date_naive();

        let mut working_lots = lots.to_vec();
        let mut slices = Vec::new();
        for trade in &trades {
            if trade.side != TradeSide::Sell {
                continue;
            }
            let price = prices.require(&trade.identifier).map_err(|_| {
                LedgerError::InvalidInput(format!("price missing for {}", trade.identifier))
            })?;
            slices.extend(Self::consume_fifo(
                &mut working_lots,
                &trade.identifier,
                trade.quantity,
                price,
                sale_date,
            ));
        }

        // Purchases in this revision participate in the audit window too.
        let mut all_purchases = purchases.to_vec();
        for trade in &trades {
            if trade.side == TradeSide::Buy {
                all_purchases.push(PurchaseRecord {
                    identifier: trade.identifier.clone(),
                    date: sale_date,
                });
            }
        }

        self.build_artifact(
            allocation_id,
            tax_year,
            as_of,
            target_allocation,
            portfolio_value,
            &slices,
            &all_purchases,
            &working_lots,
        )
    }

    /// Reconciliation fed directly with solver trades; lot identity is
    /// preserved and FIFO never runs.
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile_lot_level(
        &self,
        allocation_id: &str,
        tax_year: i32,
        as_of: DateTime<Utc>,
        allocation: &BTreeMap<String, f64>,
        portfolio_value: f64,
        lots: &[TaxLot],
        trades: &[Trade],
        purchases: &[PurchaseRecord],
    ) -> Result<TaxArtifact, LedgerError> {
        let sale_date = as_of.date_naive();
        let mut working_lots = lots.to_vec();
        let slices = Self::consume_lot_level(&mut working_lots, trades, sale_date)?;

        let mut all_purchases = purchases.to_vec();
        for trade in trades {
            if trade.side == TradeSide::Buy {
                all_purchases.push(PurchaseRecord {
                    identifier: trade.identifier.clone(),
                    date: sale_date,
                });
            }
        }

        self.build_artifact(
            allocation_id,
            tax_year,
            as_of,
            allocation,
            portfolio_value,
            &slices,
            &all_purchases,
            &working_lots,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_artifact(
        &self,
        allocation_id: &str,
        tax_year: i32,
        as_of: DateTime<Utc>,
        allocation: &BTreeMap<String, f64>,
        portfolio_value: f64,
        slices: &[LotSlice],
        purchases: &[PurchaseRecord],
        remaining_lots: &[TaxLot],
    ) -> Result<TaxArtifact, LedgerError> {
        let mut short_term = 0.0;
        let mut long_term = 0.0;
        for slice in slices {
            if slice.is_long_term {
                long_term += slice.gain_loss;
            } else {
                short_term += slice.gain_loss;
            }
        }

        // Disallowed losses come back into the short-term bucket.
        let wash_sales = Self::audit_wash_sales(slices, purchases);
        let wash_sale_adjustment: f64 =
            wash_sales.iter().map(|w| w.disallowed_loss).sum();
        short_term += wash_sale_adjustment;

        let realized_gains = RealizedGains {
            short_term: round_dollars(short_term),
            long_term: round_dollars(long_term),
            total: round_dollars(short_term + long_term),
        };
        let tax_liability = self.tax_liability(&realized_gains);

        // Unrealized: allocation value minus remaining basis per symbol.
        let mut basis_by_symbol: BTreeMap<&str, f64> = BTreeMap::new();
        for lot in remaining_lots {
            *basis_by_symbol.entry(lot.identifier.as_str()).or_insert(0.0) += lot.cost_basis;
        }
        let mut unrealized = 0.0;
        let mut positions = Vec::with_capacity(allocation.len());
        for (identifier, weight) in allocation {
            let basis = basis_by_symbol.get(identifier.as_str()).copied().unwrap_or(0.0);
            unrealized += weight * portfolio_value - basis;
            positions.push(PositionEntry {
                identifier: identifier.clone(),
                weight: round_weight(*weight),
                cost_basis: round_dollars(basis),
            });
        }

        let artifact = TaxArtifact {
            artifact_id: format!("tax_{}_{}", allocation_id, as_of.format("%Y%m%d%H%M%S")),
            timestamp: as_of,
            allocation_id: allocation_id.to_string(),
            tax_year,
            positions,
            realized_gains,
            unrealized_gains: round_dollars(unrealized),
            tax_liability,
            wash_sales,
            checksum: String::new(),
        }
        .seal()?;

        info!(
            artifact_id = %artifact.artifact_id,
            realized_total = artifact.realized_gains.total,
            "tax artifact built"
        );
        Ok(artifact)
    }
}
