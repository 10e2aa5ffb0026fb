use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::{AddressBookListener, AddressHolder, MultiGroupAddressHolder};
use crate::balance::{LoadBalancer, WEIGHTED_ROUND_ROBIN};
use crate::error::{Result, RpcError};
use crate::filter::{Filter, FilterChain, Invoker, InvokerContext};
use crate::invocation::{RpcRequest, RpcResponse, Side};
use crate::provider::{DIRECT_GROUP, ProviderGroup, ProviderInfo, ProviderStatus};
use crate::registry::{Registry, RegistryConfig, ServiceDescriptor, SubscriberCallback};
use crate::runtime::RpcRuntime;
use crate::serialize::{DecodeTemplate, JSON_SERIALIZER, SerializeContext, Serializer};
use crate::transport::Transport;
use crate::warmup::{WarmupWeightCalculator, current_time_millis};

use super::DEFAULT_PROTOCOL;

/// 服务引用配置。
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub interface_id: String,
    pub unique_id: String,
    pub protocol: String,
    /// 为空时取运行时配置中的应用名。
    pub app_name: String,
    pub registries: Vec<RegistryConfig>,
    /// 直连地址，`bolt://h:p;bolt://h2:p`。设置后不再订阅注册中心。
    pub direct_url: Option<String>,
    /// 过滤器选择串，语法同名单覆盖串。
    pub filter: String,
    pub load_balancer: String,
    pub serialization: String,
    /// 期望的响应类名。
    pub response_class: Option<String>,
}

impl ConsumerConfig {
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            unique_id: String::new(),
            protocol: DEFAULT_PROTOCOL.to_owned(),
            app_name: String::new(),
            registries: Vec::new(),
            direct_url: None,
            filter: String::new(),
            load_balancer: WEIGHTED_ROUND_ROBIN.to_owned(),
            serialization: JSON_SERIALIZER.to_owned(),
            response_class: None,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_direct_url(mut self, direct_url: impl Into<String>) -> Self {
        self.direct_url = Some(direct_url.into());
        self
    }

    pub fn with_filter(mut self, selection: impl Into<String>) -> Self {
        self.filter = selection.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_response_class(mut self, class_name: impl Into<String>) -> Self {
        self.response_class = Some(class_name.into());
        self
    }
}

/// 集群调用器：地址簿 → 负载均衡 → 序列化 → 传输。
///
/// 只从可用或预热中的提供者里选址；响应中带有业务错误时转换为 [`RpcError::Service`]。
pub struct ClusterInvoker {
    descriptor: ServiceDescriptor,
    holder: Arc<dyn AddressHolder>,
    balancer: Arc<dyn LoadBalancer>,
    serializer: Arc<dyn Serializer>,
    transport: Arc<dyn Transport>,
    template: DecodeTemplate,
}

impl fmt::Debug for ClusterInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInvoker")
            .field("service", &self.descriptor.service_name())
            .field("providers", &self.holder.get_all_provider_size())
            .finish()
    }
}

impl ClusterInvoker {
    /// 当前参与选址的提供者。
    pub fn candidates(&self, now_millis: u64) -> Vec<ProviderInfo> {
        self.holder
            .get_provider_groups()
            .into_iter()
            .flat_map(ProviderGroup::into_providers)
            .filter(|provider| {
                matches!(
                    provider.status_at(now_millis),
                    ProviderStatus::Available | ProviderStatus::WarmingUp
                )
            })
            .collect()
    }
}

impl Invoker for ClusterInvoker {
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        let now = current_time_millis();
        let provider = self.balancer.select(&request, &self.candidates(now), now)?;
        let context = SerializeContext::new(Side::Consumer);
        let payload = self.serializer.encode_request(&request, &context)?;

        let reply = self.transport.send(&provider, payload)?;
        let response = self
            .serializer
            .decode_response(&reply, &self.template, &context)?;
        match response.error {
            Some(detail) => Err(RpcError::Service {
                service: self.descriptor.service_name(),
                detail,
            }),
            None => Ok(response),
        }
    }
}

/// 服务引用。
///
/// # 教案式说明
/// - **契约（What）**：`refer` 幂等，重复调用返回同一条过滤链；`unrefer` 后可再次 `refer`；
/// - **执行逻辑（How）**：配置了直连地址时只写入直连分组，否则先清空地址簿，再向每个允许订阅的
///   注册中心订阅。初始快照与后续推送都经由 [`AddressBookListener`] 落地，顺序由注册中心保证；
/// - **失败语义**：`refer` 中途失败时，本次已建立的订阅会被全部撤销，实例回到未引用状态；
/// - **注意（Trade-offs）**：多个注册中心各自推送全量快照时，后到的快照会覆盖同名分组。
pub struct ConsumerBootstrap {
    runtime: Arc<RpcRuntime>,
    config: ConsumerConfig,
    descriptor: ServiceDescriptor,
    transport: Arc<dyn Transport>,
    custom_filters: Vec<Arc<dyn Filter>>,
    holder: Arc<dyn AddressHolder>,
    listener: Arc<dyn SubscriberCallback>,
    subscribed: Mutex<Vec<Arc<dyn Registry>>>,
    proxy: Mutex<Option<Arc<FilterChain>>>,
}

impl fmt::Debug for ConsumerBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBootstrap")
            .field("service", &self.descriptor.data_id())
            .field("referred", &self.proxy.lock().is_some())
            .finish()
    }
}

impl ConsumerBootstrap {
    pub fn new(
        runtime: Arc<RpcRuntime>,
        config: ConsumerConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let app_name = if config.app_name.is_empty() {
            runtime.app_name().to_owned()
        } else {
            config.app_name.clone()
        };
        let descriptor = ServiceDescriptor::new(config.interface_id.clone(), config.protocol.clone())
            .with_unique_id(config.unique_id.clone())
            .with_app_name(app_name);
        let holder: Arc<dyn AddressHolder> = Arc::new(MultiGroupAddressHolder::new());
        let listener: Arc<dyn SubscriberCallback> = Arc::new(AddressBookListener::new(
            descriptor.service_name(),
            Arc::clone(&holder),
        ));
        Self {
            runtime,
            config,
            descriptor,
            transport,
            custom_filters: Vec::new(),
            holder,
            listener,
            subscribed: Mutex::new(Vec::new()),
            proxy: Mutex::new(None),
        }
    }

    /// 追加一个自定义过滤器，需在 `refer` 之前调用。
    pub fn with_custom_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.custom_filters.push(filter);
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn address_holder(&self) -> &Arc<dyn AddressHolder> {
        &self.holder
    }

    /// 以本服务名构造请求。
    pub fn request(&self, method: impl Into<String>) -> RpcRequest {
        RpcRequest::new(self.descriptor.service_name(), method)
    }

    /// 引用服务，返回消费方过滤链。
    pub fn refer(&self) -> Result<Arc<FilterChain>> {
        let mut proxy = self.proxy.lock();
        if let Some(existing) = proxy.as_ref() {
            return Ok(Arc::clone(existing));
        }

        match &self.config.direct_url {
            Some(direct_url) => self.seed_direct_group(direct_url)?,
            None => {
                self.subscribe()?;
            }
        }

        let chain = match self.build_chain() {
            Ok(chain) => chain,
            Err(err) => {
                self.unsubscribe_all(std::mem::take(&mut *self.subscribed.lock()));
                tracing::warn!(service = %self.descriptor, error = %err, "refer failed, subscriptions released");
                return Err(err);
            }
        };
        tracing::info!(
            service = %self.descriptor,
            providers = self.holder.get_all_provider_size(),
            "service referred"
        );
        *proxy = Some(Arc::clone(&chain));
        Ok(chain)
    }

    /// 取消引用：取消全部订阅并丢弃过滤链。单个注册中心失败只记录日志。
    pub fn unrefer(&self) {
        let mut proxy = self.proxy.lock();
        if proxy.take().is_none() {
            return;
        }
        self.unsubscribe_all(std::mem::take(&mut *self.subscribed.lock()));
        tracing::info!(service = %self.descriptor, "service unreferred");
    }

    fn unsubscribe_all(&self, registries: Vec<Arc<dyn Registry>>) {
        for registry in registries {
            if let Err(err) = registry.unsubscribe(&self.descriptor, &self.listener) {
                tracing::warn!(
                    service = %self.descriptor,
                    registry = registry.config().address(),
                    error = %err,
                    "failed to unsubscribe"
                );
            }
        }
    }

    fn build_chain(&self) -> Result<Arc<FilterChain>> {
        let context = InvokerContext::new(Side::Consumer, self.descriptor.clone());
        let terminal: Arc<dyn Invoker> = self.cluster()?;
        Ok(Arc::new(FilterChain::build(
            self.runtime.filters(),
            &context,
            &self.config.filter,
            &self.custom_filters,
            terminal,
        )?))
    }

    /// 构造一个新的集群调用器。
    pub fn cluster(&self) -> Result<Arc<ClusterInvoker>> {
        let template = self
            .config
            .response_class
            .as_ref()
            .map(DecodeTemplate::expecting)
            .unwrap_or_default();
        Ok(Arc::new(ClusterInvoker {
            descriptor: self.descriptor.clone(),
            holder: Arc::clone(&self.holder),
            balancer: self.runtime.load_balancers().get_default(&self.config.load_balancer)?,
            serializer: self.runtime.serializer(&self.config.serialization)?,
            transport: Arc::clone(&self.transport),
            template,
        }))
    }

    /// 向所有允许订阅的注册中心订阅，返回各注册中心交付的初始快照之和。
    /// 已订阅时直接返回地址簿当前内容。
    ///
    /// 任一注册中心失败时，本次已成功的订阅全部撤销后再返回错误。
    pub fn subscribe(&self) -> Result<Vec<ProviderGroup>> {
        let mut subscribed = self.subscribed.lock();
        if !subscribed.is_empty() {
            return Ok(self.holder.get_provider_groups());
        }

        // 回调尚未挂到任何注册中心上，此时清空不会与推送交错。
        self.holder.update_all_providers(Vec::new());
        let mut groups = Vec::new();
        for config in self.config.registries.iter().filter(|config| config.is_subscribe()) {
            match self.subscribe_to(config) {
                Ok((registry, delivered)) => {
                    groups.extend(delivered);
                    subscribed.push(registry);
                }
                Err(err) => {
                    self.unsubscribe_all(std::mem::take(&mut *subscribed));
                    return Err(err);
                }
            }
        }
        Ok(groups)
    }

    fn subscribe_to(&self, config: &RegistryConfig) -> Result<(Arc<dyn Registry>, Vec<ProviderGroup>)> {
        let registry = self.runtime.registry_factory().get_registry(config)?;
        registry.start()?;
        let delivered = registry.subscribe(&self.descriptor, Arc::clone(&self.listener))?;
        Ok((registry, delivered))
    }

    fn seed_direct_group(&self, direct_url: &str) -> Result<()> {
        let mut providers = Vec::new();
        for url in direct_url
            .split([';', ','])
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            let mut provider: ProviderInfo = url.parse()?;
            WarmupWeightCalculator::calculate(&mut provider);
            providers.push(provider);
        }
        tracing::debug!(service = %self.descriptor, providers = providers.len(), "direct group seeded");
        self.holder
            .update_providers(ProviderGroup::with_providers(DIRECT_GROUP, providers));
        Ok(())
    }
}

impl Drop for ConsumerBootstrap {
    fn drop(&mut self) {
        self.unrefer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use bytes::Bytes;

    fn unreachable_transport() -> Arc<dyn Transport> {
        Arc::new(|provider: &ProviderInfo, _: Bytes| -> Result<Bytes> {
            Err(RpcError::Transport {
                address: provider.address(),
                detail: "unreachable".into(),
            })
        })
    }

    #[test]
    fn direct_url_seeds_the_direct_group() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let consumer = ConsumerBootstrap::new(
            runtime,
            ConsumerConfig::new("com.demo.Echo")
                .with_direct_url("bolt://10.0.0.1:12200; bolt://10.0.0.2:12200"),
            unreachable_transport(),
        );
        let chain = consumer.refer().unwrap();
        assert_eq!(chain.names(), ["context", "logging"]);
        let direct = consumer.address_holder().get_provider_infos(DIRECT_GROUP);
        assert_eq!(direct.len(), 2);
        assert_eq!(direct[1].host(), "10.0.0.2");
    }

    #[test]
    fn empty_book_yields_no_available_provider() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let consumer = ConsumerBootstrap::new(
            runtime,
            ConsumerConfig::new("com.demo.Echo").with_filter("-*"),
            unreachable_transport(),
        );
        let chain = consumer.refer().unwrap();
        let err = chain
            .invoke(consumer.request("echo"))
            .expect_err("没有地址时应失败");
        assert_eq!(err.code(), "rpc.routing.no_provider");
    }

    #[test]
    fn malformed_direct_url_is_a_configuration_error() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let consumer = ConsumerBootstrap::new(
            runtime,
            ConsumerConfig::new("com.demo.Echo").with_direct_url("bolt://no-port"),
            unreachable_transport(),
        );
        let err = consumer.refer().expect_err("缺少端口应报错");
        assert_eq!(err.code(), "rpc.config.invalid");
    }
}
