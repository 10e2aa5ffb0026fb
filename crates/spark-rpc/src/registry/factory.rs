use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::extension::ExtensionLoader;
use crate::schedule::ScheduledTaskRegistry;

use super::{Registry, RegistryConfig, RegistryContext};

/// 同时存活的注册中心超过该数量时输出告警。
const REGISTRY_WARN_THRESHOLD: usize = 3;

/// 注册中心销毁前后的回调。
///
/// [`RegistryFactory::destroy_all`] 对每个实例按「`pre_destroy` → `destroy` → `post_destroy`」
/// 顺序调用，回调按注册顺序执行。
pub trait DestroyHook: Send + Sync + 'static {
    fn pre_destroy(&self, config: &RegistryConfig) {
        let _ = config;
    }

    fn post_destroy(&self, config: &RegistryConfig) {
        let _ = config;
    }
}

/// 注册中心实例表。
///
/// # 行为概览（How）
/// - 查找与创建在同一把互斥锁内完成：并发首次访问同一配置的线程拿到的是同一个实例；
/// - 协议名通过扩展加载器解析，未知协议返回
///   [`RpcError::ExtensionNotFound`](crate::error::RpcError::ExtensionNotFound)；
/// - `destroy_all` 先整体取出实例表，再在锁外逐个销毁，单个失败只记录日志。
pub struct RegistryFactory {
    loader: Arc<ExtensionLoader<dyn Registry, RegistryContext>>,
    scheduler: Arc<ScheduledTaskRegistry>,
    instances: Mutex<HashMap<RegistryConfig, Arc<dyn Registry>>>,
    hooks: RwLock<Vec<Arc<dyn DestroyHook>>>,
}

impl RegistryFactory {
    pub fn new(
        loader: Arc<ExtensionLoader<dyn Registry, RegistryContext>>,
        scheduler: Arc<ScheduledTaskRegistry>,
    ) -> Self {
        Self {
            loader,
            scheduler,
            instances: Mutex::new(HashMap::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// 取得（必要时创建）与配置对应的注册中心。
    pub fn get_registry(&self, config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(config) {
            return Ok(Arc::clone(existing));
        }

        let context = RegistryContext {
            config: config.clone(),
            scheduler: Arc::clone(&self.scheduler),
        };
        let registry = self.loader.get(config.protocol(), &context)?;
        instances.insert(config.clone(), Arc::clone(&registry));

        tracing::info!(
            protocol = config.protocol(),
            address = config.address(),
            "registry instance created"
        );
        if instances.len() > REGISTRY_WARN_THRESHOLD {
            tracing::warn!(
                count = instances.len(),
                "more than 3 registries are in use, check the registry configuration"
            );
        }
        Ok(registry)
    }

    /// 当前全部实例的快照。
    pub fn registries(&self) -> Vec<Arc<dyn Registry>> {
        self.instances.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    pub fn add_destroy_hook(&self, hook: Arc<dyn DestroyHook>) {
        self.hooks.write().push(hook);
    }

    /// 销毁并移除全部实例。
    pub fn destroy_all(&self) {
        let drained: Vec<(RegistryConfig, Arc<dyn Registry>)> =
            self.instances.lock().drain().collect();
        let hooks = self.hooks.read().clone();

        for (config, registry) in drained {
            for hook in &hooks {
                hook.pre_destroy(&config);
            }
            match registry.destroy() {
                Ok(()) => tracing::info!(
                    protocol = config.protocol(),
                    address = config.address(),
                    "registry destroyed"
                ),
                Err(err) => tracing::error!(
                    protocol = config.protocol(),
                    address = config.address(),
                    error = %err,
                    "failed to destroy registry, continuing with the rest"
                ),
            }
            for hook in &hooks {
                hook.post_destroy(&config);
            }
        }
    }
}
