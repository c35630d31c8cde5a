//! 정밀한 호가 계산을 위한 Decimal 타입.

use rust_decimal::Decimal;

/// 호가 가격 타입.
pub type Price = Decimal;

/// 호가 잔량 타입.
pub type Amount = Decimal;

/// 가격으로 사용할 수 있는 값인지 확인합니다 (양수).
pub fn is_valid_price(price: Price) -> bool {
    price > Decimal::ZERO
}

/// 잔량으로 사용할 수 있는 값인지 확인합니다 (0 이상).
///
/// 0은 델타에서 "레벨 제거"를 의미하므로 허용합니다.
pub fn is_valid_amount(amount: Amount) -> bool {
    !amount.is_sign_negative() || amount.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_and_amount_validation() {
        assert!(is_valid_price(dec!(0.0001)));
        assert!(!is_valid_price(dec!(0)));
        assert!(!is_valid_price(dec!(-1)));

        assert!(is_valid_amount(dec!(0)));
        assert!(is_valid_amount(dec!(2.5)));
        assert!(!is_valid_amount(dec!(-0.1)));
    }
}
