//! # 注册中心抽象
//!
//! 「地址从哪里来」的统一契约。具体后端通过扩展加载器按协议名绑定，由
//! [`RegistryFactory`] 保证同一配置只存在一个实例。

mod config;
mod factory;
mod memory;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::provider::{ProviderGroup, ProviderInfo};
use crate::schedule::ScheduledTaskRegistry;

pub use config::RegistryConfig;
pub use factory::{DestroyHook, RegistryFactory};
pub use memory::{MEMORY_PROTOCOL, MemoryRegistry, MemoryRegistryStore, PARAM_SCAN_PERIOD_MS};

/// 服务描述：接口、唯一标识、协议与所属应用。
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ServiceDescriptor {
    pub app_name: String,
    pub interface_id: String,
    pub unique_id: String,
    pub protocol: String,
}

impl ServiceDescriptor {
    pub fn new(interface_id: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// 服务唯一名：`interface` 或 `interface:unique_id`。
    pub fn service_name(&self) -> String {
        if self.unique_id.is_empty() {
            self.interface_id.clone()
        } else {
            format!("{}:{}", self.interface_id, self.unique_id)
        }
    }

    /// 注册中心中的数据 ID：`service_name@protocol`。
    pub fn data_id(&self) -> String {
        format!("{}@{}", self.service_name(), self.protocol)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data_id())
    }
}

/// 一次服务注册：服务描述 + 分组 + 提供者。
#[derive(Clone, Debug)]
pub struct ProviderRegistration {
    pub descriptor: ServiceDescriptor,
    pub group: String,
    pub provider: ProviderInfo,
}

/// 订阅回调：注册中心推送地址变化的出口。
///
/// `data_id` 为 [`ServiceDescriptor::data_id`]。实现不得阻塞在网络 I/O 上。
pub trait SubscriberCallback: Send + Sync + 'static {
    /// 全量快照，需要与本地视图对账。
    fn handle_data(&self, data_id: &str, groups: Vec<ProviderGroup>);
    /// 新增一个分组内的若干提供者。
    fn add_data(&self, data_id: &str, group: ProviderGroup);
    /// 删除一个分组内的若干提供者。
    fn delete_data(&self, data_id: &str, group: ProviderGroup);
    /// 整体替换单个分组。
    fn set_data(&self, data_id: &str, group: ProviderGroup);
}

/// 构造注册中心时传入的上下文。
#[derive(Clone, Debug)]
pub struct RegistryContext {
    pub config: RegistryConfig,
    pub scheduler: Arc<ScheduledTaskRegistry>,
}

/// 注册中心能力。
///
/// # 生命周期（What）
/// 首次使用时构造 → `start` → 任意次 `register`/`unregister`/`subscribe`/`unsubscribe`
/// → 关闭时由 [`RegistryFactory::destroy_all`] 调用一次 `destroy`。
pub trait Registry: Send + Sync + 'static {
    fn config(&self) -> &RegistryConfig;

    /// 启动后端连接，重复调用应幂等。返回是否处于可用状态。
    fn start(&self) -> Result<bool>;

    fn register(&self, registration: &ProviderRegistration) -> Result<()>;

    fn unregister(&self, registration: &ProviderRegistration) -> Result<()>;

    /// 订阅服务。
    ///
    /// 实现必须在返回前把当前已知的分组经回调（`set_data` 或 `handle_data`）交付给订阅者，
    /// 且这次交付与之后的推送保持先后顺序。返回值是同一份快照，只供调用方记录，
    /// 调用方不应再拿它写入本地视图，否则会覆盖交付之后才到达的增量推送。
    fn subscribe(
        &self,
        descriptor: &ServiceDescriptor,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Vec<ProviderGroup>>;

    /// 取消订阅，按 `Arc` 身份匹配回调。
    fn unsubscribe(
        &self,
        descriptor: &ServiceDescriptor,
        callback: &Arc<dyn SubscriberCallback>,
    ) -> Result<()>;

    fn destroy(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_id_includes_unique_id_when_present() {
        let plain = ServiceDescriptor::new("com.demo.Echo", "bolt");
        assert_eq!(plain.data_id(), "com.demo.Echo@bolt");
        let tagged = plain.clone().with_unique_id("v2");
        assert_eq!(tagged.service_name(), "com.demo.Echo:v2");
        assert_eq!(tagged.data_id(), "com.demo.Echo:v2@bolt");
    }
}
