use bigdecimal::BigDecimal;

use crate::models::{Currency, FxRate};

/// 金额保留两位小数
pub fn round2(v: &BigDecimal) -> BigDecimal {
    v.round(2)
}

/// 按固定汇率换算；不支持的币种对返回 None
pub fn convert(amount: &BigDecimal, from: Currency, to: Currency, fx: &FxRate) -> Option<BigDecimal> {
    if from == to {
        return Some(amount.clone());
    }
    if fx.rate <= BigDecimal::from(0) {
        return None;
    }
    if from == fx.base && to == fx.quote {
        Some(amount * &fx.rate)
    } else if from == fx.quote && to == fx.base {
        Some(amount / &fx.rate)
    } else {
        None
    }
}

/// 换算后保留两位小数
pub fn convert_rounded(
    amount: &BigDecimal,
    from: Currency,
    to: Currency,
    fx: &FxRate,
) -> Option<BigDecimal> {
    convert(amount, from, to, fx).map(|v| round2(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn aed_to_usd_at_fixed_rate() {
        let fx = FxRate::default();
        let usd = convert_rounded(&dec("27"), Currency::Aed, Currency::Usd, &fx).unwrap();
        assert_eq!(usd, dec("7.35"));
    }

    #[test]
    fn same_currency_is_identity() {
        let fx = FxRate::default();
        let v = convert(&dec("12.34"), Currency::Usd, Currency::Usd, &fx).unwrap();
        assert_eq!(v, dec("12.34"));
    }

    #[test]
    fn zero_rate_refuses_conversion() {
        let fx = FxRate {
            rate: BigDecimal::from(0),
            ..FxRate::default()
        };
        assert!(convert(&dec("1"), Currency::Aed, Currency::Usd, &fx).is_none());
    }

    proptest! {
        #[test]
        fn aed_usd_round_trip_within_two_decimals(cents in 0i64..100_000_000) {
            let fx = FxRate::default();
            let aed = BigDecimal::new(cents.into(), 2);
            let usd = convert_rounded(&aed, Currency::Aed, Currency::Usd, &fx).unwrap();
            let back = convert_rounded(&usd, Currency::Usd, Currency::Aed, &fx).unwrap();
            // USD 侧舍入误差 <= 0.005，放大 3.6725 倍后再加一次舍入
            let tolerance = dec("0.03");
            prop_assert!((&back - &aed).abs() <= tolerance);
        }
    }
}
