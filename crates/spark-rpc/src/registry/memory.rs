//! 进程内注册中心：以共享的 [`MemoryRegistryStore`] 作为地址空间。
//!
//! 同一运行时中地址相同的 `memory` 注册中心共享一个 store，因此同进程内的发布方与订阅方可以
//! 互相看到。配置参数 `scan_period_ms` 大于零时，注册中心会周期性地把全量快照重新推送给自己的订阅者。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::provider::{ProviderGroup, ProviderInfo};
use crate::schedule::{ScheduleMode, ScheduledService};

use super::{
    ProviderRegistration, Registry, RegistryConfig, RegistryContext, ServiceDescriptor,
    SubscriberCallback,
};

/// 协议名。
pub const MEMORY_PROTOCOL: &str = "memory";
/// 全量重推周期参数（毫秒）。
pub const PARAM_SCAN_PERIOD_MS: &str = "scan_period_ms";

type Subscribers = Vec<Arc<dyn SubscriberCallback>>;

/// 内存地址空间：`data_id → group → providers`，以及 `data_id → 订阅者`。
///
/// # 契约说明（What）
/// - 同一分组内按提供者身份去重，重复发布视为更新；
/// - 通知总在释放 `DashMap` 分片锁之后发出，回调可以安全地回读 store；
/// - 「修改 + 通知」、「登记订阅 + 下发初始快照」与周期重推三者由同一把通知锁串行化，
///   每个订阅者看到的事件顺序与 store 的修改顺序一致。回调因此不得反过来调用
///   [`Self::publish`] 或 [`Self::withdraw`]。
#[derive(Default)]
pub struct MemoryRegistryStore {
    services: DashMap<String, BTreeMap<String, Vec<ProviderInfo>>>,
    subscribers: DashMap<String, Subscribers>,
    notify: Mutex<()>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布一个提供者，并以 `add_data` 通知订阅者。
    pub fn publish(&self, data_id: &str, group: &str, provider: ProviderInfo) {
        let _ordered = self.notify.lock();
        {
            let mut groups = self.services.entry(data_id.to_owned()).or_default();
            let members = groups.entry(group.to_owned()).or_default();
            match members.iter_mut().find(|existing| **existing == provider) {
                Some(existing) => *existing = provider.clone(),
                None => members.push(provider.clone()),
            }
        }
        let delta = ProviderGroup::with_providers(group, vec![provider]);
        for subscriber in self.subscribers_of(data_id) {
            subscriber.add_data(data_id, delta.clone());
        }
    }

    /// 撤下一个提供者，并以 `delete_data` 通知订阅者。不存在时不通知。
    pub fn withdraw(&self, data_id: &str, group: &str, provider: &ProviderInfo) {
        let _ordered = self.notify.lock();
        let removed = self
            .services
            .get_mut(data_id)
            .and_then(|mut groups| {
                let members = groups.get_mut(group)?;
                let before = members.len();
                members.retain(|existing| existing != provider);
                Some(before != members.len())
            })
            .unwrap_or(false);
        if !removed {
            return;
        }
        let delta = ProviderGroup::with_providers(group, vec![provider.clone()]);
        for subscriber in self.subscribers_of(data_id) {
            subscriber.delete_data(data_id, delta.clone());
        }
    }

    /// 某个服务当前的全部分组。
    pub fn snapshot(&self, data_id: &str) -> Vec<ProviderGroup> {
        self.services
            .get(data_id)
            .map(|groups| {
                groups
                    .iter()
                    .map(|(name, members)| ProviderGroup::with_providers(name.clone(), members.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 登记订阅者，并在同一临界区内把当前各分组以 `set_data` 逐个下发给它。
    ///
    /// 逐组替换而不是整体对账，同一回调挂在多个注册中心上时不会互相清空对方的分组。
    fn subscribe(&self, data_id: &str, callback: Arc<dyn SubscriberCallback>) -> Vec<ProviderGroup> {
        let _ordered = self.notify.lock();
        self.subscribers
            .entry(data_id.to_owned())
            .or_default()
            .push(Arc::clone(&callback));
        let groups = self.snapshot(data_id);
        for group in &groups {
            callback.set_data(data_id, group.clone());
        }
        groups
    }

    /// 把全量快照重新推送给一个订阅者。
    fn resync(&self, data_id: &str, callback: &Arc<dyn SubscriberCallback>) {
        let _ordered = self.notify.lock();
        callback.handle_data(data_id, self.snapshot(data_id));
    }

    fn unsubscribe(&self, data_id: &str, callback: &Arc<dyn SubscriberCallback>) {
        if let Some(mut subscribers) = self.subscribers.get_mut(data_id) {
            subscribers.retain(|existing| !Arc::ptr_eq(existing, callback));
        }
    }

    fn subscribers_of(&self, data_id: &str) -> Subscribers {
        self.subscribers
            .get(data_id)
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }
}

/// 基于 [`MemoryRegistryStore`] 的注册中心实现。
pub struct MemoryRegistry {
    config: RegistryConfig,
    store: Arc<MemoryRegistryStore>,
    context: RegistryContext,
    started: AtomicBool,
    subscriptions: Arc<Mutex<Vec<(String, Arc<dyn SubscriberCallback>)>>>,
    rescan: Mutex<Option<Arc<ScheduledService>>>,
}

impl MemoryRegistry {
    pub fn new(context: RegistryContext, store: Arc<MemoryRegistryStore>) -> Self {
        Self {
            config: context.config.clone(),
            store,
            context,
            started: AtomicBool::new(false),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            rescan: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MemoryRegistryStore> {
        &self.store
    }

    fn scan_period(&self) -> Option<Duration> {
        self.config
            .parameter(PARAM_SCAN_PERIOD_MS)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    fn start_rescan(&self, period: Duration) -> Result<()> {
        let store = Arc::clone(&self.store);
        let subscriptions = Arc::clone(&self.subscriptions);
        let service = self.context.scheduler.create(
            format!("memory-registry-rescan-{}", self.config.address()),
            ScheduleMode::FixedDelay,
            period,
            period,
            move || {
                let targets = subscriptions.lock().clone();
                for (data_id, callback) in targets {
                    store.resync(&data_id, &callback);
                }
            },
        )?;
        service.start()?;
        *self.rescan.lock() = Some(service);
        Ok(())
    }
}

impl Registry for MemoryRegistry {
    fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn start(&self) -> Result<bool> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(true);
        }
        if let Some(period) = self.scan_period() {
            self.start_rescan(period)?;
        }
        tracing::info!(address = self.config.address(), "memory registry started");
        Ok(true)
    }

    fn register(&self, registration: &ProviderRegistration) -> Result<()> {
        if !self.config.is_register() {
            tracing::debug!(service = %registration.descriptor, "registry is not allowed to register, skipped");
            return Ok(());
        }
        self.store.publish(
            &registration.descriptor.data_id(),
            &registration.group,
            registration.provider.clone(),
        );
        Ok(())
    }

    fn unregister(&self, registration: &ProviderRegistration) -> Result<()> {
        if !self.config.is_register() {
            return Ok(());
        }
        self.store.withdraw(
            &registration.descriptor.data_id(),
            &registration.group,
            &registration.provider,
        );
        Ok(())
    }

    fn subscribe(
        &self,
        descriptor: &ServiceDescriptor,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Vec<ProviderGroup>> {
        if !self.config.is_subscribe() {
            tracing::debug!(service = %descriptor, "registry is not allowed to subscribe, skipped");
            return Ok(Vec::new());
        }
        let data_id = descriptor.data_id();
        self.subscriptions.lock().push((data_id.clone(), Arc::clone(&callback)));
        Ok(self.store.subscribe(&data_id, callback))
    }

    fn unsubscribe(
        &self,
        descriptor: &ServiceDescriptor,
        callback: &Arc<dyn SubscriberCallback>,
    ) -> Result<()> {
        let data_id = descriptor.data_id();
        self.store.unsubscribe(&data_id, callback);
        self.subscriptions
            .lock()
            .retain(|(id, existing)| !(id == &data_id && Arc::ptr_eq(existing, callback)));
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        if let Some(service) = self.rescan.lock().take() {
            service.stop();
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (data_id, callback) in subscriptions {
            self.store.unsubscribe(&data_id, &callback);
        }
        self.started.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduledTaskRegistry;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SubscriberCallback for Recorder {
        fn handle_data(&self, data_id: &str, groups: Vec<ProviderGroup>) {
            self.events.lock().push(format!("handle:{data_id}:{}", groups.len()));
        }
        fn add_data(&self, data_id: &str, group: ProviderGroup) {
            self.events.lock().push(format!("add:{data_id}:{}", group.len()));
        }
        fn delete_data(&self, data_id: &str, group: ProviderGroup) {
            self.events.lock().push(format!("delete:{data_id}:{}", group.len()));
        }
        fn set_data(&self, data_id: &str, group: ProviderGroup) {
            self.events.lock().push(format!("set:{data_id}:{}", group.len()));
        }
    }

    fn registry(config: RegistryConfig) -> MemoryRegistry {
        MemoryRegistry::new(
            RegistryContext {
                config,
                scheduler: ScheduledTaskRegistry::new(),
            },
            Arc::new(MemoryRegistryStore::new()),
        )
    }

    fn registration(port: u16) -> ProviderRegistration {
        ProviderRegistration {
            descriptor: ServiceDescriptor::new("com.demo.Echo", "bolt"),
            group: "g1".into(),
            provider: ProviderInfo::new("127.0.0.1", port, "bolt"),
        }
    }

    #[test]
    fn register_notifies_subscribers_and_dedups() {
        let registry = registry(RegistryConfig::new(MEMORY_PROTOCOL, "t"));
        registry.start().unwrap();
        let recorder = Arc::new(Recorder::default());
        let initial = registry
            .subscribe(&registration(1).descriptor, recorder.clone())
            .unwrap();
        assert!(initial.is_empty());

        registry.register(&registration(1)).unwrap();
        registry.register(&registration(1)).unwrap();
        registry.unregister(&registration(1)).unwrap();
        registry.unregister(&registration(1)).unwrap();

        let snapshot = registry.store().snapshot("com.demo.Echo@bolt");
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_empty());
        assert_eq!(
            *recorder.events.lock(),
            vec![
                "add:com.demo.Echo@bolt:1",
                "add:com.demo.Echo@bolt:1",
                "delete:com.demo.Echo@bolt:1",
            ]
        );
    }

    #[test]
    fn subscribe_delivers_existing_groups_through_the_callback() {
        let registry = registry(RegistryConfig::new(MEMORY_PROTOCOL, "t"));
        registry.register(&registration(1)).unwrap();
        registry.register(&registration(2)).unwrap();
        let recorder = Arc::new(Recorder::default());
        let initial = registry
            .subscribe(&registration(1).descriptor, recorder.clone())
            .unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].len(), 2);

        registry.unregister(&registration(2)).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec!["set:com.demo.Echo@bolt:2", "delete:com.demo.Echo@bolt:1"],
            "初始快照先于之后的增量到达"
        );
    }

    #[test]
    fn flags_disable_register_and_subscribe() {
        let registry = registry(
            RegistryConfig::new(MEMORY_PROTOCOL, "t")
                .with_register(false)
                .with_subscribe(false),
        );
        registry.register(&registration(1)).unwrap();
        assert!(registry.store().snapshot("com.demo.Echo@bolt").is_empty());
        let recorder: Arc<dyn SubscriberCallback> = Arc::new(Recorder::default());
        assert!(
            registry
                .subscribe(&registration(1).descriptor, recorder)
                .unwrap()
                .is_empty()
        );
    }
}
