// libs/consultation-cell/src/services/coupon.rs
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ConsultationError, CouponFailure};
use crate::models::{Coupon, CouponApplication, CouponRedemption, PatientIdentity};
use crate::ports::ConsultationStore;

/// Discount granted by `coupon` on `fee`. A positive percentage takes
/// precedence over the flat amount; the flat amount never exceeds the fee.
pub fn compute_discount(coupon: &Coupon, fee: Decimal) -> Decimal {
    if coupon.discount_percentage > Decimal::ZERO {
        (fee * coupon.discount_percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        coupon.discount_amount.max(Decimal::ZERO).min(fee)
    }
}

/// `max(fee - discount, 0)`.
pub fn final_amount(fee: Decimal, discount: Decimal) -> Decimal {
    (fee - discount).max(Decimal::ZERO)
}

pub struct CouponEngine {
    store: Arc<dyn ConsultationStore>,
}

impl CouponEngine {
    pub fn new(store: Arc<dyn ConsultationStore>) -> Self {
        Self { store }
    }

    /// Prices `base_fee` against an optional coupon code.
    ///
    /// Coupon problems are reported in [`CouponApplication::error`] with the
    /// fee left unchanged; only storage failures and a non-positive fee are
    /// returned as `Err`. The returned redemption is committed by the store
    /// together with the booking rows.
    pub async fn apply_coupon(
        &self,
        code: Option<&str>,
        identity: Option<PatientIdentity>,
        base_fee: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponApplication, ConsultationError> {
        if base_fee <= Decimal::ZERO {
            return Err(ConsultationError::ValidationError(
                "Consultation fee must be positive".to_string(),
            ));
        }

        let code = match code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => code,
            None => return Ok(CouponApplication::without_coupon(base_fee)),
        };

        debug!("Applying coupon {} to fee {}", code, base_fee);

        let coupon = match self.store.find_active_coupon(code, now).await? {
            Some(coupon) => coupon,
            None => {
                info!("Coupon {} is not active", code);
                return Ok(CouponApplication::rejected(base_fee, code, CouponFailure::InvalidCoupon));
            }
        };

        if let Some(identity) = identity {
            if self.store.has_redeemed(coupon.id, identity).await? {
                info!("Coupon {} already redeemed by {}", code, identity);
                return Ok(CouponApplication::rejected(base_fee, code, CouponFailure::AlreadyUsed));
            }
        }

        let discount = compute_discount(&coupon, base_fee);

        Ok(CouponApplication {
            fee: base_fee,
            discount,
            final_amount: final_amount(base_fee, discount),
            coupon_code: Some(coupon.code.clone()),
            error: None,
            redemption: identity.map(|identity| CouponRedemption {
                coupon_id: coupon.id,
                coupon_code: coupon.code.clone(),
                identity,
            }),
        })
    }
}
