use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// 注册中心配置。
///
/// 全部字段参与相等与哈希比较，作为 [`RegistryFactory`](super::RegistryFactory) 的去重键。
/// 字段私有，构造后只能通过 `with_*` 得到新值。
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    protocol: String,
    address: String,
    timeout_ms: u64,
    register: bool,
    subscribe: bool,
    parameters: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            protocol: super::MEMORY_PROTOCOL.to_owned(),
            address: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            register: true,
            subscribe: true,
            parameters: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn with_subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 是否向该注册中心发布服务。
    pub fn is_register(&self) -> bool {
        self.register
    }

    /// 是否从该注册中心订阅服务。
    pub fn is_subscribe(&self) -> bool {
        self.subscribe
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_covers_every_field() {
        let base = RegistryConfig::new("memory", "local");
        assert_eq!(base, RegistryConfig::new("memory", "local"));
        assert_ne!(base, base.clone().with_subscribe(false));
        assert_ne!(base, base.clone().with_timeout(Duration::from_millis(1)));
        assert_ne!(base, base.clone().with_parameter("k", "v"));
        assert_ne!(base, RegistryConfig::new("memory", "remote"));
    }
}
