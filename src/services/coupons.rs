use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{coupon, Coupon, CouponKind, CouponModel},
    errors::{CouponRejection, ServiceError},
    events::{Event, EventSender},
};

/// Coupon evaluation and redemption.
///
/// Eligibility and discount math live in pure functions shared by
/// `evaluate` and `list_available`, so the picker UI and the checkout path
/// can never disagree on whether a code applies.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Result of evaluating a coupon against an order amount. Computed fresh per
/// evaluation; never cached across subtotal changes.
#[derive(Debug, Clone, Serialize)]
pub struct CouponApplication {
    pub coupon: CouponModel,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// A coupon as shown in the picker, annotated with eligibility for the
/// current order amount.
#[derive(Debug, Serialize)]
pub struct AvailableCoupon {
    pub coupon: CouponModel,
    pub is_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ineligible_reason: Option<String>,
}

/// Input for creating a coupon (admin)
#[derive(Debug, Deserialize)]
pub struct CreateCouponInput {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub usage_limit: Option<i32>,
    pub applicable_tiers: Option<Vec<String>>,
}

/// Runs the eligibility predicate chain in its fixed priority order:
/// active flag, validity window, minimum amount, usage limit, tier.
pub fn check_eligibility(
    coupon: &CouponModel,
    order_amount: Decimal,
    tier: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.starts_at {
        return Err(CouponRejection::NotYetActive);
    }
    if now > coupon.ends_at {
        return Err(CouponRejection::Expired);
    }
    if let Some(minimum) = coupon.min_order_amount {
        if order_amount < minimum {
            return Err(CouponRejection::BelowMinimum { minimum });
        }
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(CouponRejection::UsageLimitReached);
        }
    }
    if let Some(tiers) = coupon.tier_restriction() {
        let eligible = tier.map(|t| tiers.iter().any(|x| x == t)).unwrap_or(false);
        if !eligible {
            return Err(CouponRejection::TierNotEligible);
        }
    }
    Ok(())
}

/// Computes the discount for an eligible coupon. The result never exceeds
/// the order amount, and percentage discounts honor `max_discount` when set.
pub fn compute_discount(coupon: &CouponModel, order_amount: Decimal) -> Decimal {
    let raw = match coupon.kind {
        CouponKind::Fixed => coupon.value,
        CouponKind::Percentage => {
            let pct = order_amount * coupon.value / Decimal::from(100);
            match coupon.max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
    };
    raw.min(order_amount).max(Decimal::ZERO)
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Evaluates a coupon code against an order amount.
    ///
    /// Returns the application (coupon, discount, final amount) or the
    /// specific rejection reason. Callers that previously previewed a coupon
    /// must evaluate again at commit time; a preview result is never
    /// trusted across cart changes.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        code: &str,
        order_amount: Decimal,
        tier: Option<&str>,
    ) -> Result<CouponApplication, ServiceError> {
        let coupon = self.get_by_code(code).await?;
        check_eligibility(&coupon, order_amount, tier, Utc::now())?;

        let discount_amount = compute_discount(&coupon, order_amount);
        let final_amount = (order_amount - discount_amount).max(Decimal::ZERO);

        Ok(CouponApplication {
            coupon,
            discount_amount,
            final_amount,
        })
    }

    /// Lists all active coupons annotated with eligibility for the given
    /// order amount, using the exact predicate chain `evaluate` uses.
    /// Ineligible coupons are annotated, not errored on.
    pub async fn list_available(
        &self,
        order_amount: Decimal,
        tier: Option<&str>,
    ) -> Result<Vec<AvailableCoupon>, ServiceError> {
        let now = Utc::now();
        let coupons = Coupon::find()
            .filter(coupon::Column::IsActive.eq(true))
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db)
            .await?;

        Ok(coupons
            .into_iter()
            .map(|c| match check_eligibility(&c, order_amount, tier, now) {
                Ok(()) => {
                    let discount = compute_discount(&c, order_amount);
                    AvailableCoupon {
                        coupon: c,
                        is_eligible: true,
                        discount_amount: Some(discount),
                        ineligible_reason: None,
                    }
                }
                Err(reason) => AvailableCoupon {
                    coupon: c,
                    is_eligible: false,
                    discount_amount: None,
                    ineligible_reason: Some(reason.to_string()),
                },
            })
            .collect())
    }

    pub async fn get_by_code(&self, code: &str) -> Result<CouponModel, ServiceError> {
        Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))
    }

    /// Atomically consumes one use of the coupon.
    ///
    /// A single conditional UPDATE performs the check and the increment
    /// together, so two concurrent redemptions of a coupon with one use
    /// left cannot both succeed; the loser sees zero rows affected. Runs on
    /// the caller's transaction so a failed order creation rolls the
    /// increment back.
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(CouponRejection::UsageLimitReached.into());
        }
        Ok(())
    }

    /// Creates a coupon (admin operation).
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<CouponModel, ServiceError> {
        let code = input.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code must not be empty".to_string(),
            ));
        }
        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Discount value must be positive".to_string(),
            ));
        }
        if input.kind == CouponKind::Percentage && input.value > Decimal::from(100) {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if input.ends_at <= input.starts_at {
            return Err(ServiceError::ValidationError(
                "Coupon end date must be after its start date".to_string(),
            ));
        }
        if matches!(input.usage_limit, Some(limit) if limit <= 0) {
            return Err(ServiceError::ValidationError(
                "Usage limit must be positive when set".to_string(),
            ));
        }

        let existing = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let coupon_id = Uuid::new_v4();
        let now = Utc::now();
        let coupon = coupon::ActiveModel {
            id: Set(coupon_id),
            code: Set(code.clone()),
            kind: Set(input.kind),
            value: Set(input.value),
            min_order_amount: Set(input.min_order_amount),
            max_discount: Set(input.max_discount),
            starts_at: Set(input.starts_at),
            ends_at: Set(input.ends_at),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            applicable_tiers: Set(input
                .applicable_tiers
                .map(|tiers| serde_json::json!(tiers))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let coupon = coupon.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CouponCreated(coupon_id))
            .await;

        info!("Created coupon {}", code);
        Ok(coupon)
    }
}
