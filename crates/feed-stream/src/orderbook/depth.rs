//! 호가 레벨 동기화 알고리즘.
//!
//! 한 방향(bids 또는 asks)의 정렬된 레벨 목록에 델타를 적용합니다.
//! 매수는 가격 내림차순, 매도는 가격 오름차순을 유지합니다.
//!
//! 잘못된 레코드는 건너뛰고 `skipped`에 기록하며, 나머지는 계속 적용합니다.

use feed_core::{is_valid_amount, is_valid_price, PriceLevel, Side, UpdateAction, UpdateRecord};
use rust_decimal::Decimal;
use std::cmp::Ordering;

use crate::error::SkippedUpdate;

fn skip(skipped: &mut Vec<SkippedUpdate>, side: Side, record: &UpdateRecord, reason: &str) {
    skipped.push(SkippedUpdate {
        side,
        record: record.clone(),
        reason: reason.to_string(),
    });
}

/// 정렬 방향 기준으로 `level`이 `price`보다 앞서면 `Less`.
fn book_order(side: Side, level: Decimal, price: Decimal) -> Ordering {
    match side {
        Side::Bid => price.cmp(&level),
        Side::Ask => level.cmp(&price),
    }
}

/// 가격 기반 델타를 적용합니다.
///
/// - 잔량 0: 정확히 같은 가격의 레벨 제거 (없으면 무시)
/// - 잔량 > 0: 같은 가격이 있으면 잔량 교체, 없으면 정렬 위치에 삽입
///
/// 적용된 레코드 수를 반환합니다.
pub fn apply_price_updates(
    levels: &mut Vec<PriceLevel>,
    side: Side,
    records: &[UpdateRecord],
    skipped: &mut Vec<SkippedUpdate>,
) -> usize {
    let mut applied = 0;

    for record in records {
        if !is_valid_price(record.price) {
            skip(skipped, side, record, "non-positive price");
            continue;
        }
        if !is_valid_amount(record.amount) {
            skip(skipped, side, record, "negative amount");
            continue;
        }

        let found = levels.binary_search_by(|l| book_order(side, l.price, record.price));
        match (found, record.amount.is_zero()) {
            (Ok(pos), true) => {
                levels.remove(pos);
            }
            (Err(_), true) => {}
            (Ok(pos), false) => levels[pos].amount = record.amount,
            (Err(pos), false) => {
                levels.insert(pos, PriceLevel::new(record.price, record.amount));
            }
        }
        applied += 1;
    }

    applied
}

/// ID 기반 호가창에서 같은 가격 레벨들 뒤의 삽입 위치.
fn id_insert_position(levels: &[PriceLevel], side: Side, price: Decimal) -> usize {
    levels.partition_point(|l| book_order(side, l.price, price) != Ordering::Greater)
}

fn position_of(levels: &[PriceLevel], id: &str) -> Option<usize> {
    levels.iter().position(|l| l.id.as_deref() == Some(id))
}

/// ID 기반 델타를 적용합니다.
///
/// `action`은 모든 레코드에 동일하게 적용됩니다.
///
/// - `Insert`: 새 ID 삽입 (이미 있으면 건너뜀)
/// - `Update`: 기존 ID의 가격/잔량 교체 (없으면 건너뜀)
/// - `Delete`: 기존 ID 제거 (없으면 건너뜀, 가격은 무시)
/// - `Upsert`: 있으면 `Update`, 없으면 `Insert`
///
/// 같은 가격의 레벨은 도착 순서대로 유지됩니다. 적용된 레코드 수를 반환합니다.
pub fn apply_id_updates(
    levels: &mut Vec<PriceLevel>,
    side: Side,
    action: UpdateAction,
    records: &[UpdateRecord],
    skipped: &mut Vec<SkippedUpdate>,
) -> usize {
    let mut applied = 0;

    for record in records {
        let Some(id) = record.id.as_deref() else {
            skip(skipped, side, record, "missing id");
            continue;
        };
        let existing = position_of(levels, id);

        if action == UpdateAction::Delete {
            match existing {
                Some(pos) => {
                    levels.remove(pos);
                    applied += 1;
                }
                None => skip(skipped, side, record, "unknown id"),
            }
            continue;
        }

        if !is_valid_price(record.price) {
            skip(skipped, side, record, "non-positive price");
            continue;
        }
        if record.amount <= Decimal::ZERO {
            skip(skipped, side, record, "non-positive amount");
            continue;
        }

        match (action, existing) {
            (UpdateAction::Insert, Some(_)) => {
                skip(skipped, side, record, "duplicate id");
                continue;
            }
            (UpdateAction::Update, None) => {
                skip(skipped, side, record, "unknown id");
                continue;
            }
            (_, Some(pos)) if levels[pos].price == record.price => {
                levels[pos].amount = record.amount;
            }
            (_, Some(pos)) => {
                levels.remove(pos);
                let at = id_insert_position(levels, side, record.price);
                levels.insert(at, PriceLevel::with_id(id, record.price, record.amount));
            }
            (_, None) => {
                let at = id_insert_position(levels, side, record.price);
                levels.insert(at, PriceLevel::with_id(id, record.price, record.amount));
            }
        }
        applied += 1;
    }

    applied
}
