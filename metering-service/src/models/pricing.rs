//! Pricing plan model.

use crate::models::{PlanType, ProductType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Monthly pricing for one plan type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPlan {
    pub plan_type: PlanType,
    pub base_cost: Decimal,
    pub currency: String,
    pub included_metrics: i64,
    pub included_logs: i64,
    pub included_traces: i64,
    pub included_storage_gb: Decimal,
    pub price_per_million_metrics: Decimal,
    pub price_per_million_logs: Decimal,
    pub price_per_million_traces: Decimal,
    pub price_per_gb: Decimal,
}

impl PricingPlan {
    /// Seeded pricing for a plan. Mirrors the rows inserted by the initial migration.
    pub fn builtin(plan_type: PlanType) -> Self {
        // (base, included count, included GB, per million, per GB) in cents
        let (base, included, storage_gb, per_million, per_gb) = match plan_type {
            PlanType::Free => (0, 1_000_000, 1, 0, 0),
            PlanType::Starter => (4_900, 10_000_000, 10, 500, 50),
            PlanType::Pro => (29_900, 100_000_000, 100, 300, 25),
            PlanType::Enterprise => (199_900, 1_000_000_000, 1_000, 150, 10),
        };
        let per_million = Decimal::new(per_million, 2);

        Self {
            plan_type,
            base_cost: Decimal::new(base, 2),
            currency: "USD".to_string(),
            included_metrics: included,
            included_logs: included,
            included_traces: included,
            included_storage_gb: Decimal::from(storage_gb),
            price_per_million_metrics: per_million,
            price_per_million_logs: per_million,
            price_per_million_traces: per_million,
            price_per_gb: Decimal::new(per_gb, 2),
        }
    }

    pub fn included_count(&self, product: ProductType) -> i64 {
        match product {
            ProductType::Metrics => self.included_metrics,
            ProductType::Logs => self.included_logs,
            ProductType::Traces => self.included_traces,
        }
    }

    pub fn price_per_million(&self, product: ProductType) -> Decimal {
        match product {
            ProductType::Metrics => self.price_per_million_metrics,
            ProductType::Logs => self.price_per_million_logs,
            ProductType::Traces => self.price_per_million_traces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_plan_pricing() {
        let pro = PricingPlan::builtin(PlanType::Pro);
        assert_eq!(pro.base_cost, Decimal::new(29_900, 2));
        assert_eq!(pro.included_count(ProductType::Metrics), 100_000_000);
        assert_eq!(pro.price_per_million(ProductType::Metrics), Decimal::new(300, 2));
        assert_eq!(pro.price_per_gb, Decimal::new(25, 2));
    }

    #[test]
    fn free_plan_has_no_overage_price() {
        let free = PricingPlan::builtin(PlanType::Free);
        assert!(free.base_cost.is_zero());
        for product in ProductType::ALL {
            assert!(free.price_per_million(product).is_zero());
        }
    }
}
