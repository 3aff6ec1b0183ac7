//! Subcheck totals.
//!
//! [`compute`] is the single place totals come from; the cached
//! [`Totals`] on a subcheck is always the output of this function over
//! its current orders and payments. The computation applies, in order:
//!
//! 1. raw line subtotals per tax bucket (per-order comps, voids, and
//!    reductions already folded in by [`Order::sale_value`]),
//! 2. recomputation of media-rule tender values (coupons, discounts,
//!    comps, employee meals) against the fresh subtotal,
//! 3. allocation of pre-tax discounts across the taxable buckets,
//! 4. each tax bucket at its rate, rounded half away from zero
//!    (tax-inclusive buckets extract the tax instead of adding it),
//! 5. the price-rounding mode over the grand total,
//! 6. `balance = total_cost − Σ valid payment values`.
//!
//! A charged tip enters the payment list with a negative value, so the
//! balance identity in step 6 stays literal: charging a tip raises the
//! balance, and the card tender that follows covers cost plus tip.

use common::money::Money;
use common::percent::Percent;
use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};

use super::order::Order;
use super::payment::{Payment, TenderType};
use super::CustomerType;
use crate::menu::TaxBucket;
use crate::settings::media::MediaRecord;
use crate::settings::Settings;

/// Cached totals for one subcheck.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax_food: Money,
    pub tax_alcohol: Money,
    pub tax_room: Money,
    pub tax_merchandise: Money,
    pub tax_gst: Money,
    pub tax_pst: Money,
    pub tax_hst: Money,
    pub tax_qst: Money,
    pub tax_vat: Money,
    pub total_cost: Money,
    pub total_tip: Money,
    pub balance: Money,
}

impl Totals {
    pub fn total_tax(&self) -> Money {
        self.tax_food
            + self.tax_alcohol
            + self.tax_room
            + self.tax_merchandise
            + self.tax_gst
            + self.tax_pst
            + self.tax_hst
            + self.tax_qst
            + self.tax_vat
    }
}

/// Extracts the tax already included in `amount` at `rate`:
/// `round(amount · rate / (100% + rate))`, half away from zero.
fn tax_included(amount: Money, rate: Percent) -> Money {
    let scale = i128::from(Percent::full_scale());
    let numer = i128::from(amount.cents()) * i128::from(rate.scaled());
    let denom = scale + i128::from(rate.scaled());
    if denom <= 0 {
        return Money::ZERO;
    }
    let extracted = if numer >= 0 {
        (numer + denom / 2) / denom
    } else {
        -((-numer + denom / 2) / denom)
    };
    Money::from_cents(extracted as i64)
}

/// Splits `discount` across the buckets in proportion to their
/// subtotals; the rounding shortfall is handed out front to back so
/// the parts always sum exactly.
fn allocate(discount: Money, buckets: &[Money]) -> Vec<Money> {
    let total: i128 = buckets.iter().map(|b| i128::from(b.cents())).sum();
    if total <= 0 || discount.is_zero() {
        return vec![Money::ZERO; buckets.len()];
    }
    let discount = i128::from(discount.cents().min(total as i64));
    let mut allocated: Vec<i128> = buckets
        .iter()
        .map(|b| discount * i128::from(b.cents()) / total)
        .collect();
    let mut shortfall = discount - allocated.iter().sum::<i128>();
    // Hand out the remainder front to back; bucket order is fixed so the
    // result is deterministic.
    for (slot, bucket) in allocated.iter_mut().zip(buckets) {
        if shortfall == 0 {
            break;
        }
        if bucket.cents() > 0 {
            *slot += 1;
            shortfall -= 1;
        }
    }
    allocated
        .into_iter()
        .map(|cents| Money::from_cents(cents as i64))
        .collect()
}

/// Recomputes and sums the totals for one subcheck's orders and
/// payments. Media-rule payment values are refreshed in place.
pub(crate) fn compute(
    orders: &[Order],
    payments: &mut [Payment],
    kind: CustomerType,
    settings: &Settings,
    now: TimeInfo,
) -> Totals {
    // 1. Line subtotals per bucket.
    let mut food = Money::ZERO;
    let mut alcohol = Money::ZERO;
    let mut room = Money::ZERO;
    let mut merchandise = Money::ZERO;
    for order in orders {
        let value = order.sale_value(settings);
        match order.family.tax_bucket() {
            TaxBucket::Food => food += value,
            TaxBucket::Alcohol => alcohol += value,
            TaxBucket::Room => room += value,
            TaxBucket::Merchandise => merchandise += value,
        }
    }
    let subtotal = food + alcohol + room + merchandise;

    // 2. Refresh media-rule tender values against the fresh subtotal.
    let mut pre_tax_discount = Money::ZERO;
    for payment in payments.iter_mut() {
        if !payment.is_valid() || !payment.tender.is_media() {
            continue;
        }
        match (payment.tender, payment.tender_id) {
            (TenderType::Coupon, Some(id)) => {
                if let Some(coupon) = settings.coupons.find(id) {
                    payment.value = if coupon.applies_at(now) {
                        coupon.amount.value_against(subtotal).min(subtotal)
                    } else {
                        Money::ZERO
                    };
                    payment.amount = payment.value;
                }
                // Historical rows (archives) keep their stored value.
            }
            (TenderType::Discount, Some(id)) => {
                if let Some(discount) = settings.discounts.find(id) {
                    payment.value =
                        discount.amount.value_against(subtotal).min(subtotal);
                    payment.amount = payment.value;
                    if discount.pre_tax {
                        pre_tax_discount += payment.value;
                    }
                }
            }
            (TenderType::EmployeeMeal, Some(id)) => {
                if let Some(meal) = settings.meals.find(id) {
                    payment.value = meal.credit.min(subtotal);
                    payment.amount = payment.value;
                }
            }
            (TenderType::Comp, Some(id)) => {
                if let Some(comp) = settings.comps.find(id) {
                    if !comp.active() {
                        payment.value = Money::ZERO;
                        payment.amount = Money::ZERO;
                    }
                }
            }
            _ => {}
        }
    }

    // 3. Pre-tax discounts shrink the taxable buckets pro-rata. They
    // still tender against the balance below; only tax sees the split.
    let allocation =
        allocate(pre_tax_discount, &[food, alcohol, room, merchandise]);
    let taxable_food = food - allocation[0];
    let taxable_alcohol = alcohol - allocation[1];
    let taxable_room = room - allocation[2];
    let taxable_merchandise = merchandise - allocation[3];

    // Takeout classes can exempt food tax entirely.
    let food_tax_base = if kind.is_takeout() && !settings.tax_takeout_food {
        Money::ZERO
    } else {
        taxable_food
    };

    // 4. Tax buckets, each rounded half away from zero.
    let mut totals = Totals {
        subtotal,
        total_tip: payments
            .iter()
            .filter(|p| p.is_valid() && p.tender.is_tip())
            .map(|p| p.amount)
            .sum(),
        ..Totals::default()
    };

    let mut exclusive_tax = Money::ZERO;
    if settings.tax_inclusive_food {
        totals.tax_food = tax_included(food_tax_base, settings.tax_food);
    } else {
        totals.tax_food = food_tax_base.tax_on(settings.tax_food);
        exclusive_tax += totals.tax_food;
    }
    if settings.tax_inclusive_alcohol {
        totals.tax_alcohol =
            tax_included(taxable_alcohol, settings.tax_alcohol);
    } else {
        totals.tax_alcohol = taxable_alcohol.tax_on(settings.tax_alcohol);
        exclusive_tax += totals.tax_alcohol;
    }
    totals.tax_room = taxable_room.tax_on(settings.tax_room);
    totals.tax_merchandise =
        taxable_merchandise.tax_on(settings.tax_merchandise);
    exclusive_tax += totals.tax_room + totals.tax_merchandise;

    // The national / provincial taxes run on the combined sale buckets.
    let combined = taxable_food + taxable_alcohol + taxable_merchandise;
    totals.tax_gst = combined.tax_on(settings.tax_gst);
    totals.tax_pst = combined.tax_on(settings.tax_pst);
    totals.tax_hst = combined.tax_on(settings.tax_hst);
    totals.tax_qst = combined.tax_on(settings.tax_qst);
    totals.tax_vat = combined.tax_on(settings.tax_vat);
    exclusive_tax += totals.tax_gst
        + totals.tax_pst
        + totals.tax_hst
        + totals.tax_qst
        + totals.tax_vat;

    // 5. Price rounding applies to the grand total only.
    totals.total_cost = (subtotal + exclusive_tax)
        .round_to(settings.price_rounding_unit, settings.price_rounding);

    // 6. Balance identity.
    let paid: Money = payments
        .iter()
        .filter(|p| p.is_valid())
        .map(|p| p.value)
        .sum();
    totals.balance = totals.total_cost - paid;

    totals
}

#[cfg(test)]
mod test {
    use common::money::RoundMode;
    use common::percent::Percent;

    use super::super::order::Order;
    use super::super::payment::Payment;
    use super::*;
    use crate::menu::ItemFamily;
    use crate::settings::media::{
        CouponInfo, DiscountInfo, MediaAmount,
    };

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 19, 30, 0).unwrap()
    }

    fn taxed_settings() -> Settings {
        Settings {
            tax_food: Percent::from_scaled(82_500), // 8.25%
            tax_alcohol: Percent::from_scaled(100_000), // 10%
            ..Settings::default()
        }
    }

    #[test]
    fn dine_in_single_item_two_taxes() {
        let settings = taxed_settings();
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1299),
        )];
        let mut payments = Vec::new();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(totals.subtotal.cents(), 1299);
        assert_eq!(totals.tax_food.cents(), 107);
        assert_eq!(totals.tax_alcohol, Money::ZERO);
        assert_eq!(totals.total_cost.cents(), 1406);
        assert_eq!(totals.balance.cents(), 1406);
    }

    #[test]
    fn takeout_food_exemption() {
        let mut settings = taxed_settings();
        settings.tax_takeout_food = false;
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1299),
        )];
        let mut payments = Vec::new();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::Takeout,
            &settings,
            now(),
        );
        assert_eq!(totals.tax_food, Money::ZERO);
        assert_eq!(totals.total_cost.cents(), 1299);

        // Dine-in still taxes.
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(totals.tax_food.cents(), 107);
    }

    #[test]
    fn tax_inclusive_extracts_instead_of_adding() {
        let mut settings = taxed_settings();
        settings.tax_inclusive_food = true;
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1299),
        )];
        let mut payments = Vec::new();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        // 1299 * 0.0825 / 1.0825 = 99.01 -> 99
        assert_eq!(totals.tax_food.cents(), 99);
        assert_eq!(totals.total_cost.cents(), 1299);
    }

    #[test]
    fn pre_tax_discount_shrinks_taxable_base() {
        let mut settings = taxed_settings();
        settings.discounts.insert(DiscountInfo {
            id: 1,
            name: "ten off".into(),
            active: true,
            amount: MediaAmount::PercentOf(Percent::from_scaled(100_000)),
            pre_tax: true,
        });
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1000),
        )];
        let mut payments = vec![
            Payment::new(TenderType::Discount, Money::ZERO).with_media_id(1),
        ];
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        // Discount recomputed to 10% of 1000.
        assert_eq!(payments[0].value.cents(), 100);
        // Tax on 900, not 1000.
        assert_eq!(totals.tax_food.cents(), 74);
        assert_eq!(totals.total_cost.cents(), 1074);
        // The discount still tenders against the balance.
        assert_eq!(totals.balance.cents(), 974);
    }

    #[test]
    fn coupon_outside_window_contributes_nothing() {
        let mut settings = taxed_settings();
        settings.coupons.insert(CouponInfo {
            id: 2,
            name: "lunch only".into(),
            active: true,
            amount: MediaAmount::Flat(Money::from_cents(500)),
            window: Some((11 * 60, 14 * 60)),
            weekday_mask: 0,
        });
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1000),
        )];
        let mut payments = vec![
            Payment::new(TenderType::Coupon, Money::from_cents(500))
                .with_media_id(2),
        ];
        // 19:30 is outside the window; value recomputes to zero.
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(payments[0].value, Money::ZERO);
        assert_eq!(totals.balance, totals.total_cost);

        // Inside the window the coupon applies.
        let lunch = TimeInfo::from_ymd_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            lunch,
        );
        assert_eq!(payments[0].value.cents(), 500);
        assert_eq!(totals.balance, totals.total_cost - payments[0].value);
    }

    #[test]
    fn charged_tip_raises_balance() {
        let settings = Settings::default();
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1000),
        )];
        let mut payments = vec![Payment::new(
            TenderType::ChargedTip,
            Money::from_cents(200),
        )];
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(totals.total_tip.cents(), 200);
        assert_eq!(totals.balance.cents(), 1200);

        payments.push(Payment::new(
            TenderType::CreditCard,
            Money::from_cents(1200),
        ));
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(totals.balance, Money::ZERO);
    }

    #[test]
    fn price_rounding_applies_to_grand_total() {
        let mut settings = taxed_settings();
        settings.price_rounding = RoundMode::Nearest;
        settings.price_rounding_unit = 5;
        let orders = vec![Order::new(
            "Burger",
            ItemFamily::Entree,
            Money::from_cents(1299),
        )];
        let mut payments = Vec::new();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        // 1406 -> 1405
        assert_eq!(totals.total_cost.cents(), 1405);
    }

    #[test]
    fn gst_runs_on_combined_buckets() {
        let mut settings = Settings::default();
        settings.tax_gst = Percent::from_scaled(50_000); // 5%
        let orders = vec![
            Order::new("Burger", ItemFamily::Entree, Money::from_cents(1000)),
            Order::new("Pint", ItemFamily::Beer, Money::from_cents(600)),
        ];
        let mut payments = Vec::new();
        let totals = compute(
            &orders,
            &mut payments,
            CustomerType::DineIn,
            &settings,
            now(),
        );
        assert_eq!(totals.tax_gst.cents(), 80);
        assert_eq!(totals.total_cost.cents(), 1680);
    }

    proptest::proptest! {
        /// The balance identity holds for any mix of line costs and
        /// cash tenders, and tax never goes negative on positive sales.
        #[test]
        fn balance_identity(
            costs in proptest::collection::vec(1i64..10_000, 1..8),
            tendered in proptest::collection::vec(1i64..10_000, 0..4),
        ) {
            let settings = taxed_settings();
            let orders: Vec<Order> = costs
                .iter()
                .map(|&cents| Order::new(
                    "item",
                    ItemFamily::Entree,
                    Money::from_cents(cents),
                ))
                .collect();
            let mut payments: Vec<Payment> = tendered
                .iter()
                .map(|&cents| Payment::new(
                    TenderType::Cash,
                    Money::from_cents(cents),
                ))
                .collect();
            let totals = compute(
                &orders,
                &mut payments,
                CustomerType::DineIn,
                &settings,
                now(),
            );
            let paid: Money =
                payments.iter().map(|p| p.value).sum();
            proptest::prop_assert_eq!(
                totals.balance,
                totals.total_cost - paid
            );
            proptest::prop_assert!(!totals.tax_food.is_negative());
            proptest::prop_assert!(
                totals.total_cost >= totals.subtotal
            );
        }
    }

    #[test]
    fn allocation_sums_exactly() {
        let parts = allocate(
            Money::from_cents(100),
            &[
                Money::from_cents(333),
                Money::from_cents(333),
                Money::from_cents(334),
                Money::ZERO,
            ],
        );
        let sum: Money = parts.iter().copied().sum();
        assert_eq!(sum.cents(), 100);
        assert_eq!(parts[3], Money::ZERO);
    }
}
