//! # 运行时上下文
//!
//! [`RpcRuntime`] 持有进程内全部共享状态：扩展加载器、注册中心实例表、周期任务表与序列化安全门。
//! 需要这些状态的组件从运行时显式取得，不存在隐藏的全局变量。
//!
//! 构造时登记的内置扩展：
//! - 注册中心：`memory`（同地址共享一个 [`MemoryRegistryStore`]）；
//! - 过滤器：`context`、`logging`；
//! - 序列化：`json`；
//! - 负载均衡：`weighted_round_robin`。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::balance::{LoadBalancer, WEIGHTED_ROUND_ROBIN, WeightedRoundRobin};
use crate::config::RpcConfig;
use crate::error::Result;
use crate::extension::{ExtensionDefinition, ExtensionLoader};
use crate::filter::{
    CONTEXT_FILTER, CONTEXT_FILTER_ORDER, ContextFilter, Filter, InvokerContext, LOGGING_FILTER,
    LOGGING_FILTER_ORDER, LoggingFilter,
};
use crate::registry::{
    MEMORY_PROTOCOL, MemoryRegistry, MemoryRegistryStore, Registry, RegistryContext,
    RegistryFactory,
};
use crate::schedule::ScheduledTaskRegistry;
use crate::security::SerializeSecurityChecker;
use crate::serialize::{JSON_SERIALIZER, JsonSerializer, SecureSerializer, Serializer};

type MemoryStores = Arc<DashMap<String, Arc<MemoryRegistryStore>>>;

/// 运行时上下文。
///
/// # 生命周期（What）
/// - [`RpcRuntime::new`] 登记内置扩展并按配置构造安全门，不做任何 I/O；
/// - [`RpcRuntime::destroy`] 停止全部周期任务，再按两阶段钩子销毁全部注册中心；重复调用无副作用。
pub struct RpcRuntime {
    config: RpcConfig,
    scheduler: Arc<ScheduledTaskRegistry>,
    checker: Arc<SerializeSecurityChecker>,
    filters: ExtensionLoader<dyn Filter, InvokerContext>,
    serializers: ExtensionLoader<dyn Serializer>,
    load_balancers: ExtensionLoader<dyn LoadBalancer>,
    registry_extensions: Arc<ExtensionLoader<dyn Registry, RegistryContext>>,
    registries: RegistryFactory,
    memory_stores: MemoryStores,
    destroyed: AtomicBool,
}

impl fmt::Debug for RpcRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRuntime")
            .field("application", &self.config.application.name)
            .field("registries", &self.registries.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl RpcRuntime {
    pub fn new(config: RpcConfig) -> Self {
        let scheduler = ScheduledTaskRegistry::new();
        let checker = Arc::new(SerializeSecurityChecker::from_overrides(
            config.serialize.check_mode,
            config.serialize.whitelist_overrides(),
            config.serialize.blacklist_overrides(),
        ));

        let memory_stores: MemoryStores = Arc::new(DashMap::new());
        let registry_extensions: Arc<ExtensionLoader<dyn Registry, RegistryContext>> =
            Arc::new(ExtensionLoader::new("registry"));
        let stores = Arc::clone(&memory_stores);
        registry_extensions.register(
            ExtensionDefinition::new(MEMORY_PROTOCOL, move |context: &RegistryContext| {
                let store = memory_store_of(&stores, context.config.address());
                Ok(Arc::new(MemoryRegistry::new(context.clone(), store)) as Arc<dyn Registry>)
            })
            .prototype(),
        );

        let filters: ExtensionLoader<dyn Filter, InvokerContext> = ExtensionLoader::new("filter");
        filters.register(
            ExtensionDefinition::new(CONTEXT_FILTER, |context: &InvokerContext| {
                Ok(Arc::new(ContextFilter::new(context)) as Arc<dyn Filter>)
            })
            .with_order(CONTEXT_FILTER_ORDER)
            .prototype(),
        );
        filters.register(
            ExtensionDefinition::new(LOGGING_FILTER, |context: &InvokerContext| {
                Ok(Arc::new(LoggingFilter::new(context)) as Arc<dyn Filter>)
            })
            .with_order(LOGGING_FILTER_ORDER)
            .prototype(),
        );

        let serializers: ExtensionLoader<dyn Serializer> = ExtensionLoader::new("serializer");
        serializers.register(ExtensionDefinition::new(JSON_SERIALIZER, |_: &()| {
            Ok(Arc::new(JsonSerializer) as Arc<dyn Serializer>)
        }));

        let load_balancers: ExtensionLoader<dyn LoadBalancer> = ExtensionLoader::new("load_balancer");
        load_balancers.register(ExtensionDefinition::new(WEIGHTED_ROUND_ROBIN, |_: &()| {
            Ok(Arc::new(WeightedRoundRobin::new()) as Arc<dyn LoadBalancer>)
        }));

        let registries = RegistryFactory::new(Arc::clone(&registry_extensions), Arc::clone(&scheduler));
        tracing::info!(
            application = %config.application.name,
            check_mode = %config.serialize.check_mode,
            "rpc runtime created"
        );
        Self {
            config,
            scheduler,
            checker,
            filters,
            serializers,
            load_balancers,
            registry_extensions,
            registries,
            memory_stores,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn app_name(&self) -> &str {
        &self.config.application.name
    }

    pub fn scheduler(&self) -> &Arc<ScheduledTaskRegistry> {
        &self.scheduler
    }

    pub fn checker(&self) -> &Arc<SerializeSecurityChecker> {
        &self.checker
    }

    pub fn filters(&self) -> &ExtensionLoader<dyn Filter, InvokerContext> {
        &self.filters
    }

    pub fn serializers(&self) -> &ExtensionLoader<dyn Serializer> {
        &self.serializers
    }

    pub fn load_balancers(&self) -> &ExtensionLoader<dyn LoadBalancer> {
        &self.load_balancers
    }

    pub fn registry_extensions(&self) -> &ExtensionLoader<dyn Registry, RegistryContext> {
        &self.registry_extensions
    }

    pub fn registry_factory(&self) -> &RegistryFactory {
        &self.registries
    }

    /// 按别名取得序列化器，并套上安全门。
    pub fn serializer(&self, alias: &str) -> Result<Arc<dyn Serializer>> {
        let inner = self.serializers.get_default(alias)?;
        Ok(Arc::new(SecureSerializer::new(inner, Arc::clone(&self.checker))))
    }

    /// 地址对应的内存注册中心地址空间，不存在时创建。
    pub fn memory_store(&self, address: &str) -> Arc<MemoryRegistryStore> {
        memory_store_of(&self.memory_stores, address)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 关闭运行时。
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.stop_all();
        self.registries.destroy_all();
        tracing::info!(application = %self.config.application.name, "rpc runtime destroyed");
    }
}

fn memory_store_of(stores: &MemoryStores, address: &str) -> Arc<MemoryRegistryStore> {
    if let Some(store) = stores.get(address) {
        return Arc::clone(store.value());
    }
    Arc::clone(
        stores
            .entry(address.to_owned())
            .or_insert_with(|| Arc::new(MemoryRegistryStore::new()))
            .value(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;

    #[test]
    fn builtins_are_registered() {
        let runtime = RpcRuntime::new(RpcConfig::default());
        assert_eq!(runtime.filters().aliases(), ["context", "logging"]);
        assert!(runtime.serializers().contains("json"));
        assert!(runtime.load_balancers().contains("weighted_round_robin"));
        assert!(runtime.registry_extensions().contains("memory"));
    }

    #[test]
    fn memory_registries_on_one_address_share_a_store() {
        let runtime = RpcRuntime::new(RpcConfig::default());
        let first = RegistryConfig::new(MEMORY_PROTOCOL, "shared");
        let second = first.clone().with_subscribe(false);
        runtime.registry_factory().get_registry(&first).unwrap();
        runtime.registry_factory().get_registry(&second).unwrap();
        assert_eq!(runtime.registry_factory().len(), 2);
        assert!(Arc::ptr_eq(
            &runtime.memory_store("shared"),
            &runtime.memory_store("shared")
        ));
    }

    #[test]
    fn destroy_is_idempotent() {
        let runtime = RpcRuntime::new(RpcConfig::default());
        runtime
            .registry_factory()
            .get_registry(&RegistryConfig::new(MEMORY_PROTOCOL, "x"))
            .unwrap();
        runtime.destroy();
        runtime.destroy();
        assert!(runtime.is_destroyed());
        assert!(runtime.registry_factory().is_empty());
    }

    #[test]
    fn unknown_registry_protocol_is_a_configuration_error() {
        let runtime = RpcRuntime::new(RpcConfig::default());
        let err = runtime
            .registry_factory()
            .get_registry(&RegistryConfig::new("zookeeper", "127.0.0.1:2181"))
            .err()
            .expect("未知协议应报错");
        assert_eq!(err.code(), "rpc.config.extension_missing");
    }
}
