//! # 预热权重计算
//!
//! 新启动的实例在一段时间内以较低权重接流。预热参数来自三个静态属性：
//! `warmupTime`、`warmupWeight`、`startTime`，三者齐全且可解析时才会生效。
//!
//! 计算结果写入动态属性后，三个静态属性即被移除，因此同一实例最多被计算一次。
//! 预热是否结束不由后台任务清扫，而是在每次选址时通过
//! [`ProviderInfo::effective_weight`](crate::provider::ProviderInfo::effective_weight) 比较时间戳。

use std::time::{SystemTime, UNIX_EPOCH};

use crate::provider::{
    ATTR_START_TIME, ATTR_WARMUP_TIME, ATTR_WARMUP_WEIGHT, ProviderInfo, ProviderStatus,
};

/// 当前墙钟时间（毫秒）。
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// 解析出的预热参数。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WarmupParams {
    pub warmup_time: u64,
    pub warmup_weight: u32,
    pub start_time: u64,
}

impl WarmupParams {
    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.warmup_time)
    }
}

/// 预热权重计算器。
#[derive(Clone, Copy, Debug, Default)]
pub struct WarmupWeightCalculator;

impl WarmupWeightCalculator {
    /// 读取预热参数，不修改提供者。
    pub fn params(provider: &ProviderInfo) -> Option<WarmupParams> {
        let parse = |key: &str| provider.static_attr(key).map(str::trim);
        Some(WarmupParams {
            warmup_time: parse(ATTR_WARMUP_TIME)?.parse().ok()?,
            warmup_weight: parse(ATTR_WARMUP_WEIGHT)?.parse().ok()?,
            start_time: parse(ATTR_START_TIME)?.parse().ok()?,
        })
    }

    /// 消费静态预热属性并写入动态属性。
    ///
    /// # 契约（What）
    /// - 参数齐全且合法：写入 `warmup_weight`/`warm_up_end_time`，状态置为
    ///   [`ProviderStatus::WarmingUp`]，移除三个静态属性，返回 `true`；
    /// - 任一参数缺失或无法解析：提供者保持原权重与状态，静态属性原样保留，返回 `false`，
    ///   不视为错误。
    pub fn calculate(provider: &mut ProviderInfo) -> bool {
        let Some(params) = Self::params(provider) else {
            return false;
        };

        let dynamic = provider.dynamic_mut();
        dynamic.warmup_weight = Some(params.warmup_weight);
        dynamic.warm_up_end_time = Some(params.end_time());
        dynamic.status = ProviderStatus::WarmingUp;

        for key in [ATTR_WARMUP_TIME, ATTR_WARMUP_WEIGHT, ATTR_START_TIME] {
            provider.take_static_attr(key);
        }
        tracing::debug!(
            provider = %provider,
            warmup_weight = params.warmup_weight,
            warm_up_end_time = params.end_time(),
            "provider enters warmup"
        );
        true
    }
}
