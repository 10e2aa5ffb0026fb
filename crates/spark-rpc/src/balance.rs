//! 负载均衡：从地址快照中为一次调用挑选提供者。

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{Result, RpcError};
use crate::invocation::RpcRequest;
use crate::provider::ProviderInfo;

pub const WEIGHTED_ROUND_ROBIN: &str = "weighted_round_robin";

/// 负载均衡能力。
///
/// `now_millis` 由调用方传入，选址时以 [`ProviderInfo::effective_weight`] 计算预热后的权重。
/// 输入为空时返回 [`RpcError::NoAvailableProvider`]。
pub trait LoadBalancer: Send + Sync + 'static {
    fn select(
        &self,
        request: &RpcRequest,
        providers: &[ProviderInfo],
        now_millis: u64,
    ) -> Result<ProviderInfo>;
}

/// 按服务维护计数器的加权轮询。
///
/// 计数器对总权重取模后沿累积权重查找落点；全部权重为零时退化为普通轮询。
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counters: DashMap<String, AtomicU64>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tick(&self, service: &str) -> u64 {
        if let Some(counter) = self.counters.get(service) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(service.to_owned())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select(
        &self,
        request: &RpcRequest,
        providers: &[ProviderInfo],
        now_millis: u64,
    ) -> Result<ProviderInfo> {
        if providers.is_empty() {
            return Err(RpcError::NoAvailableProvider {
                service: request.service.clone(),
            });
        }
        let tick = self.next_tick(&request.service);
        let weights: Vec<u64> = providers
            .iter()
            .map(|provider| u64::from(provider.effective_weight(now_millis)))
            .collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            let index = (tick % providers.len() as u64) as usize;
            return Ok(providers[index].clone());
        }

        let mut target = tick % total;
        for (provider, weight) in providers.iter().zip(&weights) {
            if target < *weight {
                return Ok(provider.clone());
            }
            target -= weight;
        }
        Err(RpcError::internal("weighted selection overran the provider list"))
    }
}
