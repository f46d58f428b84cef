use rust_decimal::Decimal;

/// Convert an amount in `currency` to BGN using a daily rate.
/// Rates are `rate_to_bgn` multipliers; the result is rounded to 2 decimals
/// (BGN is fixed-point with stotinki).
pub fn to_bgn(amount: Decimal, rate_to_bgn: Decimal) -> Decimal {
    (amount * rate_to_bgn).round_dp(2)
}

/// The pegged EUR/BGN rate. Used as the seed value; live rates come from
/// the versioned `fx_rates` table.
pub fn eur_peg() -> Decimal {
    Decimal::new(195583, 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    #[test]
    fn eur_conversion_uses_the_peg() {
        let price = Decimal::from(10_000);
        assert_eq!(to_bgn(price, eur_peg()), Decimal::from_f64(19558.30).unwrap());
    }

    #[test]
    fn bgn_is_identity() {
        let price = Decimal::new(2850055, 2);
        assert_eq!(to_bgn(price, Decimal::ONE), price);
    }
}
