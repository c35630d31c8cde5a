//! 구독 레지스트리.
//!
//! 연결 하나가 소유하는 구독 집합을 추적합니다. 항목은 서버 응답이
//! 디스패처에서 분류된 뒤에만 확정됩니다:
//!
//! ```text
//! subscribe:   (없음) -> Pending -> Active          (거부 시 제거)
//! unsubscribe: Active -> Unsubscribing -> (제거)     (거부 시 Active 복귀)
//! ```

use feed_core::{InstrumentConfig, Subscription, SubscriptionKey};
use std::collections::BTreeMap;
use tracing::debug;

/// 구독 항목 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// 요청 전송, 응답 대기
    Pending,
    /// 서버가 확인함
    Active,
    /// 해제 요청 전송, 응답 대기
    Unsubscribing,
}

#[derive(Debug, Clone)]
struct Entry {
    subscription: Subscription,
    state: SubscriptionState,
}

/// 연결별 구독 레지스트리.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<SubscriptionKey, Entry>,
}

impl SubscriptionRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 채널 x 상품 교차곱으로 기본 구독을 생성합니다.
    ///
    /// 이미 추적 중인 키와 중복된 조합은 건너뜁니다.
    pub fn generate_default_subscriptions(
        &self,
        channels: &[String],
        instruments: &[InstrumentConfig],
    ) -> Vec<Subscription> {
        let mut generated: Vec<Subscription> = Vec::new();
        for channel in channels {
            for instrument in instruments {
                let sub = Subscription::new(channel.clone(), instrument.pair.clone(), instrument.asset);
                let key = sub.key();
                if self.entries.contains_key(&key) || generated.iter().any(|s| s.key() == key) {
                    continue;
                }
                generated.push(sub);
            }
        }
        generated
    }

    /// 새 구독을 `Pending`으로 등록하고 전송할 구독을 반환합니다.
    ///
    /// 이미 추적 중인 키는 다시 보내지 않습니다.
    pub fn begin_subscribe(&mut self, subscriptions: &[Subscription]) -> Vec<Subscription> {
        let mut to_send = Vec::new();
        for sub in subscriptions {
            let key = sub.key();
            if self.entries.contains_key(&key) {
                debug!(subscription = %key, "이미 추적 중인 구독");
                continue;
            }
            self.entries.insert(
                key,
                Entry {
                    subscription: sub.clone(),
                    state: SubscriptionState::Pending,
                },
            );
            to_send.push(sub.clone());
        }
        to_send
    }

    /// 구독 확인 응답을 반영합니다.
    ///
    /// 추적하지 않던 키에 대한 응답이면 `Active`로 새로 등록합니다.
    pub fn confirm_subscribe(&mut self, subscription: &Subscription) {
        self.entries
            .entry(subscription.key())
            .and_modify(|entry| {
                if entry.state == SubscriptionState::Pending {
                    entry.state = SubscriptionState::Active;
                }
            })
            .or_insert_with(|| Entry {
                subscription: subscription.clone(),
                state: SubscriptionState::Active,
            });
    }

    /// 거부되었거나 전송에 실패한 구독을 되돌립니다.
    pub fn rollback_subscribe(&mut self, key: &SubscriptionKey) -> Option<Subscription> {
        match self.entries.get(key) {
            Some(entry) if entry.state == SubscriptionState::Pending => {
                self.entries.remove(key).map(|e| e.subscription)
            }
            _ => None,
        }
    }

    /// 구독 해제를 시작합니다.
    ///
    /// 추적 중인 항목은 `Unsubscribing`으로 바꿔 전송 목록에, 추적하지 않는
    /// 항목은 두 번째 목록에 담아 반환합니다.
    pub fn begin_unsubscribe(
        &mut self,
        subscriptions: &[Subscription],
    ) -> (Vec<Subscription>, Vec<Subscription>) {
        let mut to_send = Vec::new();
        let mut missing = Vec::new();
        for sub in subscriptions {
            match self.entries.get_mut(&sub.key()) {
                Some(entry) if entry.state != SubscriptionState::Unsubscribing => {
                    entry.state = SubscriptionState::Unsubscribing;
                    to_send.push(entry.subscription.clone());
                }
                Some(_) => debug!(subscription = %sub, "이미 해제 진행 중인 구독"),
                None => missing.push(sub.clone()),
            }
        }
        (to_send, missing)
    }

    /// 구독 해제 확인 응답을 반영하고 제거된 구독을 반환합니다.
    pub fn confirm_unsubscribe(&mut self, key: &SubscriptionKey) -> Option<Subscription> {
        self.entries.remove(key).map(|e| e.subscription)
    }

    /// 거부되었거나 전송에 실패한 구독 해제를 되돌립니다.
    pub fn rollback_unsubscribe(&mut self, key: &SubscriptionKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.state == SubscriptionState::Unsubscribing => {
                entry.state = SubscriptionState::Active;
                true
            }
            _ => false,
        }
    }

    /// 재연결을 위해 레지스트리를 초기화합니다.
    ///
    /// 해제 진행 중인 항목은 버리고 나머지는 `Pending`으로 되돌려
    /// 다시 전송할 목록으로 반환합니다.
    pub fn reset_for_reconnect(&mut self) -> Vec<Subscription> {
        self.entries
            .retain(|_, entry| entry.state != SubscriptionState::Unsubscribing);
        self.entries
            .values_mut()
            .map(|entry| {
                entry.state = SubscriptionState::Pending;
                entry.subscription.clone()
            })
            .collect()
    }

    /// 항목 상태.
    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.entries.get(key).map(|e| e.state)
    }

    /// 확정된 구독 목록.
    pub fn active(&self) -> Vec<Subscription> {
        self.entries
            .values()
            .filter(|e| e.state == SubscriptionState::Active)
            .map(|e| e.subscription.clone())
            .collect()
    }

    /// 추적 중인 모든 구독.
    pub fn tracked(&self) -> Vec<Subscription> {
        self.entries.values().map(|e| e.subscription.clone()).collect()
    }

    /// 추적 중인 항목 수.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 추적 중인 항목이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
