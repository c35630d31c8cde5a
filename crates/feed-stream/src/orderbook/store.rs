//! 호가창 저장소.
//!
//! `(거래소, 거래 쌍, 자산 유형)` 키마다 하나의 호가창을 유지합니다.
//! 외부 맵은 키 조회/삽입에만 잠깐 잠그고, 실제 변경은 키별 잠금 안에서
//! 수행하므로 서로 다른 키의 갱신은 서로를 막지 않습니다.

use chrono::Utc;
use feed_core::{
    AssetType, BookAction, BookKey, DepthUpdate, Event, Orderbook, OrderbookNotice, Pair, Side,
    UpdateAction,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::depth::{apply_id_updates, apply_price_updates};
use crate::bus::EventBus;
use crate::error::{StreamError, StreamResult};

type BookSlot = Arc<RwLock<Orderbook>>;

/// 동시 접근 가능한 호가창 저장소.
#[derive(Debug, Default)]
pub struct OrderbookStore {
    books: RwLock<HashMap<BookKey, BookSlot>>,
    bus: Option<EventBus>,
}

impl OrderbookStore {
    /// 알림을 발행하지 않는 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 갱신 알림을 이벤트 버스로 발행하는 저장소를 생성합니다.
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            bus: Some(bus),
        }
    }

    async fn slot(&self, key: &BookKey) -> Option<BookSlot> {
        self.books.read().await.get(key).cloned()
    }

    async fn notify(&self, key: &BookKey, action: BookAction, update_id: Option<i64>) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::OrderbookUpdate(OrderbookNotice::new(
                key, action, update_id,
            )))
            .await;
        }
    }

    /// 전체 스냅샷으로 호가창을 교체합니다.
    ///
    /// `force`가 아니면 양쪽 중 하나 이상이 비어 있지 않아야 합니다.
    /// 정렬/유효성 불변식을 위반한 스냅샷은 `InvalidBook`으로 거부합니다.
    /// 거부된 스냅샷의 키는 기존 호가창까지 폐기되므로 이후 델타는
    /// 새 스냅샷 전까지 `BookNotFound`가 됩니다.
    ///
    /// 교체는 외부 쓰기 잠금을 쥔 채 키별 쓰기 잠금 안에서 이루어지므로,
    /// 동시에 들어온 두 스냅샷은 나중에 잠금을 얻은 쪽으로 정리되고
    /// 읽는 쪽은 반쯤 교체된 호가창을 볼 수 없습니다.
    pub async fn load_snapshot(
        &self,
        mut book: Orderbook,
        exchange: &str,
        force: bool,
    ) -> StreamResult<()> {
        book.exchange = exchange.to_string();
        let key = book.key();

        let rejected = if book.is_empty() && !force {
            Some(StreamError::EmptyBook(key.clone()))
        } else {
            book.verify().err().map(|reason| StreamError::InvalidBook {
                key: key.clone(),
                reason,
            })
        };
        if let Some(err) = rejected {
            if self.books.write().await.remove(&key).is_some() {
                warn!(book = %key, error = %err, "스냅샷 거부, 기존 호가창 폐기");
            }
            return Err(err);
        }
        book.last_updated = Utc::now();
        let update_id = book.last_update_id;

        {
            // 잠금 순서: 외부 맵 -> 키별 슬롯
            let mut books = self.books.write().await;
            match books.get(&key) {
                Some(slot) => *slot.write().await = book,
                None => {
                    books.insert(key.clone(), Arc::new(RwLock::new(book)));
                }
            }
        }

        debug!(book = %key, "호가창 스냅샷 적용");
        self.notify(&key, BookAction::Snapshot, update_id).await;
        Ok(())
    }

    /// 가격 기반 델타를 적용합니다.
    ///
    /// 스냅샷이 없으면 `BookNotFound`를 반환하고 아무것도 만들지 않습니다.
    /// 잘못된 레코드는 건너뛰고 나머지를 적용한 뒤 `PartialUpdate`를 반환합니다.
    pub async fn update(&self, update: &DepthUpdate) -> StreamResult<()> {
        self.apply(update, None).await
    }

    /// ID 기반 델타를 적용합니다. `action`은 모든 레코드에 동일하게 적용됩니다.
    pub async fn update_using_id(
        &self,
        update: &DepthUpdate,
        action: UpdateAction,
    ) -> StreamResult<()> {
        self.apply(update, Some(action)).await
    }

    async fn apply(&self, update: &DepthUpdate, action: Option<UpdateAction>) -> StreamResult<()> {
        let key = update.key();
        let slot = self
            .slot(&key)
            .await
            .ok_or_else(|| StreamError::BookNotFound(key.clone()))?;

        let mut skipped = Vec::new();
        let (applied, update_id) = {
            let mut book = slot.write().await;

            if book.id_aligned != action.is_some() {
                return Err(StreamError::InvalidBook {
                    key,
                    reason: format!(
                        "{} update on {} book",
                        if action.is_some() { "id-indexed" } else { "price-indexed" },
                        if book.id_aligned { "id-aligned" } else { "price-aligned" },
                    ),
                });
            }

            if let (Some(update_id), Some(last_update_id)) = (update.update_id, book.last_update_id)
            {
                if update_id <= last_update_id {
                    return Err(StreamError::OutOfOrder {
                        key,
                        update_id,
                        last_update_id,
                    });
                }
            }

            let book = &mut *book;
            let applied = match action {
                None => {
                    apply_price_updates(&mut book.bids, Side::Bid, &update.bids, &mut skipped)
                        + apply_price_updates(&mut book.asks, Side::Ask, &update.asks, &mut skipped)
                }
                Some(action) => {
                    apply_id_updates(&mut book.bids, Side::Bid, action, &update.bids, &mut skipped)
                        + apply_id_updates(
                            &mut book.asks,
                            Side::Ask,
                            action,
                            &update.asks,
                            &mut skipped,
                        )
                }
            };

            if update.update_id.is_some() {
                book.last_update_id = update.update_id;
            }
            book.last_updated = update.timestamp;
            (applied, book.last_update_id)
        };

        if applied > 0 {
            self.notify(&key, BookAction::Update, update_id).await;
        }

        if skipped.is_empty() {
            Ok(())
        } else {
            warn!(book = %key, skipped = skipped.len(), applied, "일부 호가 변경분을 건너뜀");
            Err(StreamError::PartialUpdate { key, skipped })
        }
    }

    /// 호가창의 복사본을 반환합니다.
    pub async fn get(&self, exchange: &str, pair: &Pair, asset: AssetType) -> StreamResult<Orderbook> {
        let key = BookKey::new(exchange, pair.clone(), asset);
        self.get_by_key(&key).await
    }

    /// 키로 호가창의 복사본을 반환합니다.
    pub async fn get_by_key(&self, key: &BookKey) -> StreamResult<Orderbook> {
        let slot = self
            .slot(key)
            .await
            .ok_or_else(|| StreamError::BookNotFound(key.clone()))?;
        let book = slot.read().await.clone();
        Ok(book)
    }

    /// 호가창을 폐기합니다. 다음 델타 전에 새 스냅샷이 필요합니다.
    pub async fn invalidate(&self, key: &BookKey) -> bool {
        let removed = self.books.write().await.remove(key).is_some();
        if removed {
            debug!(book = %key, "호가창 폐기");
        }
        removed
    }

    /// 여러 호가창을 폐기하고 실제로 제거된 수를 반환합니다.
    pub async fn invalidate_many<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a BookKey>,
    {
        let mut books = self.books.write().await;
        keys.into_iter()
            .filter(|key| books.remove(*key).is_some())
            .count()
    }

    /// 한 거래소의 호가창을 모두 폐기합니다.
    pub async fn invalidate_exchange(&self, exchange: &str) -> usize {
        let mut books = self.books.write().await;
        let before = books.len();
        books.retain(|key, _| key.exchange != exchange);
        let removed = before - books.len();
        if removed > 0 {
            debug!(exchange, removed, "거래소 호가창 폐기");
        }
        removed
    }

    /// 보유 중인 호가창 키 목록.
    pub async fn keys(&self) -> Vec<BookKey> {
        let mut keys: Vec<_> = self.books.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 보유 중인 호가창 수.
    pub async fn len(&self) -> usize {
        self.books.read().await.len()
    }

    /// 보유 중인 호가창이 없는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.books.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::{PriceLevel, UpdateRecord};
    use rust_decimal_macros::dec;

    fn pair() -> Pair {
        Pair::new("BTC", "USDT")
    }

    fn snapshot() -> Orderbook {
        Orderbook::new("ignored", pair(), AssetType::Spot).with_levels(
            vec![PriceLevel::new(dec!(100), dec!(1)), PriceLevel::new(dec!(99), dec!(2))],
            vec![PriceLevel::new(dec!(101), dec!(1)), PriceLevel::new(dec!(102), dec!(3))],
        )
    }

    fn delta() -> DepthUpdate {
        DepthUpdate::new("alpha", pair(), AssetType::Spot)
    }

    #[tokio::test]
    async fn test_snapshot_then_delta() {
        let (bus, mut rx) = EventBus::channel(16);
        let store = OrderbookStore::with_bus(bus);

        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();
        store
            .update(&delta().with_changes(
                vec![UpdateRecord::new(dec!(100), dec!(0)), UpdateRecord::new(dec!(100.5), dec!(4))],
                vec![UpdateRecord::new(dec!(101), dec!(9))],
            ))
            .await
            .unwrap();

        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.exchange, "alpha");
        assert_eq!(book.best_bid(), Some(dec!(100.5)));
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks[0].amount, dec!(9));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            Event::OrderbookUpdate(OrderbookNotice { action: BookAction::Snapshot, .. })
        ));
        assert!(matches!(
            second,
            Event::OrderbookUpdate(OrderbookNotice { action: BookAction::Update, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delta_without_snapshot_is_rejected() {
        let store = OrderbookStore::new();
        let err = store
            .update(&delta().with_changes(vec![UpdateRecord::new(dec!(100), dec!(1))], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BookNotFound(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_snapshot_requires_force() {
        let store = OrderbookStore::new();
        let empty = Orderbook::new("alpha", pair(), AssetType::Spot);

        let err = store.load_snapshot(empty.clone(), "alpha", false).await.unwrap_err();
        assert!(matches!(err, StreamError::EmptyBook(_)));
        assert!(store.is_empty().await);

        store.load_snapshot(empty, "alpha", true).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_snapshot_drops_previous_book() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let empty = Orderbook::new("alpha", pair(), AssetType::Spot);
        let err = store.load_snapshot(empty, "alpha", false).await.unwrap_err();
        assert!(matches!(err, StreamError::EmptyBook(_)));
        assert!(err.requires_resync());

        let err = store
            .update(&delta().with_changes(vec![UpdateRecord::new(dec!(98), dec!(1))], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BookNotFound(_)));
        assert!(store.is_empty().await);

        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();
        let mut unsorted = snapshot();
        unsorted.asks.reverse();
        let err = store.load_snapshot(unsorted, "alpha", false).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidBook { .. }));
        assert!(matches!(
            store.get("alpha", &pair(), AssetType::Spot).await,
            Err(StreamError::BookNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_snapshots_settle_on_one_book() {
        let store = Arc::new(OrderbookStore::new());

        let mut handles = Vec::new();
        for i in 1..=16i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let price = rust_decimal::Decimal::from(i);
                let book = Orderbook::new("alpha", pair(), AssetType::Spot)
                    .with_levels(vec![PriceLevel::new(price, dec!(1))], vec![]);
                store.load_snapshot(book, "alpha", false).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 1);
        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert!(book.verify().is_ok());

        store
            .update(&delta().with_changes(vec![UpdateRecord::new(dec!(0.5), dec!(2))], vec![]))
            .await
            .unwrap();
        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.bids.len(), 2);
    }

    #[tokio::test]
    async fn test_unsorted_snapshot_is_rejected() {
        let store = OrderbookStore::new();
        let mut book = snapshot();
        book.bids.reverse();
        let err = store.load_snapshot(book, "alpha", false).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidBook { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_replaces_previous_book() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let replacement = Orderbook::new("alpha", pair(), AssetType::Spot)
            .with_levels(vec![PriceLevel::new(dec!(50), dec!(1))], vec![]);
        store.load_snapshot(replacement, "alpha", false).await.unwrap();

        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.bids, vec![PriceLevel::new(dec!(50), dec!(1))]);
        assert!(book.asks.is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_independent_copy() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let mut copy = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        copy.bids.clear();

        let fresh = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(fresh.bids.len(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_partitioned_by_asset() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let err = store
            .update(&DepthUpdate::new("alpha", pair(), AssetType::Futures).with_changes(
                vec![UpdateRecord::new(dec!(1), dec!(1))],
                vec![],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BookNotFound(_)));

        let err = store
            .update(&DepthUpdate::new("beta", pair(), AssetType::Spot))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BookNotFound(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_update_is_rejected() {
        let store = OrderbookStore::new();
        let mut book = snapshot();
        book.last_update_id = Some(10);
        store.load_snapshot(book, "alpha", false).await.unwrap();

        let stale = delta()
            .with_changes(vec![UpdateRecord::new(dec!(98), dec!(1))], vec![])
            .with_update_id(10);
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, StreamError::OutOfOrder { update_id: 10, last_update_id: 10, .. }));
        assert!(err.requires_resync());

        store.update(&stale.clone().with_update_id(11)).await.unwrap();
        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.last_update_id, Some(11));
        assert_eq!(book.bids.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_update_applies_valid_records() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let err = store
            .update(&delta().with_changes(
                vec![UpdateRecord::new(dec!(98), dec!(-2)), UpdateRecord::new(dec!(97), dec!(1))],
                vec![UpdateRecord::new(dec!(-5), dec!(1))],
            ))
            .await
            .unwrap_err();

        match err {
            StreamError::PartialUpdate { skipped, .. } => {
                assert_eq!(skipped.len(), 2);
                assert_eq!(skipped[0].side, Side::Bid);
                assert_eq!(skipped[1].side, Side::Ask);
            }
            other => panic!("unexpected error: {other}"),
        }

        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.bids.last().map(|l| l.price), Some(dec!(97)));
        assert_eq!(book.asks.len(), 2);
    }

    #[tokio::test]
    async fn test_id_aligned_book() {
        let store = OrderbookStore::new();
        let book = Orderbook::new("alpha", pair(), AssetType::PerpetualSwap)
            .id_aligned()
            .with_levels(
                vec![PriceLevel::with_id("1", dec!(100), dec!(1))],
                vec![PriceLevel::with_id("2", dec!(101), dec!(1))],
            );
        store.load_snapshot(book, "alpha", false).await.unwrap();

        let update = DepthUpdate::new("alpha", pair(), AssetType::PerpetualSwap).with_changes(
            vec![UpdateRecord::with_id("3", dec!(100), dec!(2))],
            vec![],
        );
        store.update_using_id(&update, UpdateAction::Insert).await.unwrap();

        let delete = DepthUpdate::new("alpha", pair(), AssetType::PerpetualSwap)
            .with_changes(vec![UpdateRecord::with_id("1", dec!(0), dec!(0))], vec![]);
        store.update_using_id(&delete, UpdateAction::Delete).await.unwrap();

        let book = store
            .get("alpha", &pair(), AssetType::PerpetualSwap)
            .await
            .unwrap();
        assert_eq!(book.bids, vec![PriceLevel::with_id("3", dec!(100), dec!(2))]);

        let err = store.update(&update).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidBook { .. }));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = OrderbookStore::new();
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();
        store.load_snapshot(snapshot(), "beta", false).await.unwrap();
        assert_eq!(store.keys().await.len(), 2);

        let key = BookKey::new("alpha", pair(), AssetType::Spot);
        assert!(store.invalidate(&key).await);
        assert!(!store.invalidate(&key).await);
        assert!(matches!(
            store.get_by_key(&key).await,
            Err(StreamError::BookNotFound(_))
        ));

        assert_eq!(store.invalidate_exchange("beta").await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let store = Arc::new(OrderbookStore::new());
        store.load_snapshot(snapshot(), "alpha", false).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let price = dec!(90) - rust_decimal::Decimal::from(i);
                store
                    .update(&delta().with_changes(vec![UpdateRecord::new(price, dec!(1))], vec![]))
                    .await
                    .unwrap();
                let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
                book.verify().unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let book = store.get("alpha", &pair(), AssetType::Spot).await.unwrap();
        assert_eq!(book.bids.len(), 10);
        assert!(book.verify().is_ok());
    }
}
