use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, RpcError};
use crate::filter::{Filter, FilterChain, Invoker, InvokerContext};
use crate::invocation::{RpcResponse, Side};
use crate::provider::{
    ATTR_APP_NAME, ATTR_START_TIME, ATTR_WARMUP_TIME, ATTR_WARMUP_WEIGHT, ATTR_WEIGHT,
    DEFAULT_GROUP, DEFAULT_WEIGHT, ProviderInfo,
};
use crate::registry::{ProviderRegistration, Registry, RegistryConfig, ServiceDescriptor};
use crate::runtime::RpcRuntime;
use crate::serialize::{JSON_SERIALIZER, SerializeContext, Serializer};
use crate::warmup::current_time_millis;

use super::DEFAULT_PROTOCOL;

/// 服务发布配置。
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub interface_id: String,
    pub unique_id: String,
    pub protocol: String,
    /// 为空时取运行时配置中的应用名。
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    /// 预热时长（毫秒），为零表示不预热。
    pub warmup_time_ms: u64,
    pub warmup_weight: u32,
    pub group: String,
    pub registries: Vec<RegistryConfig>,
    pub filter: String,
    pub serialization: String,
}

impl ProviderConfig {
    pub fn new(interface_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            interface_id: interface_id.into(),
            unique_id: String::new(),
            protocol: DEFAULT_PROTOCOL.to_owned(),
            app_name: String::new(),
            host: host.into(),
            port,
            weight: DEFAULT_WEIGHT,
            warmup_time_ms: 0,
            warmup_weight: 0,
            group: DEFAULT_GROUP.to_owned(),
            registries: Vec::new(),
            filter: String::new(),
            serialization: JSON_SERIALIZER.to_owned(),
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

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_warmup(mut self, warmup_time_ms: u64, warmup_weight: u32) -> Self {
        self.warmup_time_ms = warmup_time_ms;
        self.warmup_weight = warmup_weight;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
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
}

struct Exported {
    chain: Arc<FilterChain>,
    serializer: Arc<dyn Serializer>,
    registrations: Vec<(Arc<dyn Registry>, ProviderRegistration)>,
}

/// 服务发布。
///
/// # 教案式说明
/// - **契约（What）**：`export` 幂等；`handle` 只在发布期间可用；`unexport` 撤下全部注册，
///   单个注册中心失败只记录日志；
/// - **执行逻辑（How）**：`export` 以业务实现为终端装配服务方过滤链，再以
///   「应用名、权重、预热参数、启动时间」作为静态属性向每个允许注册的注册中心登记；
///   `handle` 依次完成解码、过滤链调用与编码，业务错误写入响应的 `error` 字段。
pub struct ProviderBootstrap {
    runtime: Arc<RpcRuntime>,
    config: ProviderConfig,
    descriptor: ServiceDescriptor,
    service: Arc<dyn Invoker>,
    custom_filters: Vec<Arc<dyn Filter>>,
    exported: Mutex<Option<Exported>>,
}

impl fmt::Debug for ProviderBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBootstrap")
            .field("service", &self.descriptor.data_id())
            .field("address", &format_args!("{}:{}", self.config.host, self.config.port))
            .field("exported", &self.is_exported())
            .finish()
    }
}

impl ProviderBootstrap {
    pub fn new(runtime: Arc<RpcRuntime>, config: ProviderConfig, service: Arc<dyn Invoker>) -> Self {
        let app_name = if config.app_name.is_empty() {
            runtime.app_name().to_owned()
        } else {
            config.app_name.clone()
        };
        let descriptor = ServiceDescriptor::new(config.interface_id.clone(), config.protocol.clone())
            .with_unique_id(config.unique_id.clone())
            .with_app_name(app_name);
        Self {
            runtime,
            config,
            descriptor,
            service,
            custom_filters: Vec::new(),
            exported: Mutex::new(None),
        }
    }

    /// 追加一个自定义过滤器，需在 `export` 之前调用。
    pub fn with_custom_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.custom_filters.push(filter);
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn is_exported(&self) -> bool {
        self.exported.lock().is_some()
    }

    /// 本实例登记到注册中心的地址。
    pub fn provider_info(&self, start_time_millis: u64) -> ProviderInfo {
        let mut provider = ProviderInfo::new(
            self.config.host.clone(),
            self.config.port,
            self.config.protocol.clone(),
        )
        .with_static_attr(ATTR_WEIGHT, self.config.weight.to_string());
        if !self.descriptor.app_name.is_empty() {
            provider = provider.with_static_attr(ATTR_APP_NAME, self.descriptor.app_name.clone());
        }
        if self.config.warmup_time_ms > 0 {
            provider = provider
                .with_static_attr(ATTR_WARMUP_TIME, self.config.warmup_time_ms.to_string())
                .with_static_attr(ATTR_WARMUP_WEIGHT, self.config.warmup_weight.to_string())
                .with_static_attr(ATTR_START_TIME, start_time_millis.to_string());
        }
        provider
    }

    /// 发布服务。
    ///
    /// 任一注册中心登记失败时，本次已完成的登记会被撤回，实例保持未发布状态。
    pub fn export(&self) -> Result<()> {
        let mut exported = self.exported.lock();
        if exported.is_some() {
            return Ok(());
        }

        let context = InvokerContext::new(Side::Provider, self.descriptor.clone());
        let chain = Arc::new(FilterChain::build(
            self.runtime.filters(),
            &context,
            &self.config.filter,
            &self.custom_filters,
            Arc::clone(&self.service),
        )?);
        let serializer = self.runtime.serializer(&self.config.serialization)?;

        let registration = ProviderRegistration {
            descriptor: self.descriptor.clone(),
            group: self.config.group.clone(),
            provider: self.provider_info(current_time_millis()),
        };
        let mut registrations = Vec::new();
        for config in self.config.registries.iter().filter(|config| config.is_register()) {
            match self.register_to(config, &registration) {
                Ok(registry) => registrations.push((registry, registration.clone())),
                Err(err) => {
                    self.unregister_all(registrations);
                    tracing::warn!(service = %self.descriptor, error = %err, "export failed, registrations withdrawn");
                    return Err(err);
                }
            }
        }
        tracing::info!(
            service = %self.descriptor,
            provider = %registration.provider,
            registries = registrations.len(),
            "service exported"
        );
        *exported = Some(Exported {
            chain,
            serializer,
            registrations,
        });
        Ok(())
    }

    /// 撤下服务。
    pub fn unexport(&self) {
        let Some(exported) = self.exported.lock().take() else {
            return;
        };
        self.unregister_all(exported.registrations);
        tracing::info!(service = %self.descriptor, "service unexported");
    }

    fn register_to(
        &self,
        config: &RegistryConfig,
        registration: &ProviderRegistration,
    ) -> Result<Arc<dyn Registry>> {
        let registry = self.runtime.registry_factory().get_registry(config)?;
        registry.start()?;
        registry.register(registration)?;
        Ok(registry)
    }

    fn unregister_all(&self, registrations: Vec<(Arc<dyn Registry>, ProviderRegistration)>) {
        for (registry, registration) in registrations {
            if let Err(err) = registry.unregister(&registration) {
                tracing::warn!(
                    service = %self.descriptor,
                    registry = registry.config().address(),
                    error = %err,
                    "failed to unregister"
                );
            }
        }
    }

    /// 处理一次入站请求字节，返回响应字节。
    ///
    /// 解码失败（含安全门拒绝）直接返回错误；过滤链或业务返回的错误编码进响应。
    pub fn handle(&self, request: &[u8]) -> Result<Bytes> {
        let (chain, serializer) = {
            let exported = self.exported.lock();
            let Some(exported) = exported.as_ref() else {
                return Err(RpcError::Service {
                    service: self.descriptor.service_name(),
                    detail: "service is not exported".into(),
                });
            };
            (Arc::clone(&exported.chain), Arc::clone(&exported.serializer))
        };

        let context = SerializeContext::new(Side::Provider);
        let request = serializer.decode_request(request, &context)?;
        let response = chain.invoke(request).unwrap_or_else(|err| {
            tracing::debug!(service = %self.descriptor, error = %err, code = err.code(), "invocation failed");
            RpcResponse {
                error: Some(err.to_string()),
                ..RpcResponse::default()
            }
        });
        serializer.encode_response(&response, &context)
    }
}

impl Drop for ProviderBootstrap {
    fn drop(&mut self) {
        self.unexport();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use crate::invocation::{RpcPayload, RpcRequest};
    use crate::registry::MEMORY_PROTOCOL;
    use serde_json::json;

    fn echo() -> Arc<dyn Invoker> {
        Arc::new(|request: RpcRequest| -> Result<RpcResponse> {
            Ok(request
                .args
                .into_iter()
                .next()
                .map(RpcResponse::with_value)
                .unwrap_or_default())
        })
    }

    #[test]
    fn provider_info_carries_warmup_attributes() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let provider = ProviderBootstrap::new(
            runtime,
            ProviderConfig::new("com.demo.Echo", "127.0.0.1", 12200)
                .with_weight(50)
                .with_warmup(2000, 5)
                .with_app_name("shop"),
            echo(),
        );
        let info = provider.provider_info(1_000);
        assert_eq!(info.weight(), 50);
        assert_eq!(info.static_attr(ATTR_APP_NAME), Some("shop"));
        assert_eq!(info.static_attr(ATTR_WARMUP_TIME), Some("2000"));
        assert_eq!(info.static_attr(ATTR_START_TIME), Some("1000"));
    }

    #[test]
    fn export_registers_and_unexport_withdraws() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let provider = ProviderBootstrap::new(
            Arc::clone(&runtime),
            ProviderConfig::new("com.demo.Echo", "127.0.0.1", 12200)
                .with_registry(RegistryConfig::new(MEMORY_PROTOCOL, "unit")),
            echo(),
        );
        provider.export().unwrap();
        provider.export().unwrap();
        let store = runtime.memory_store("unit");
        let groups = store.snapshot("com.demo.Echo@bolt");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name(), DEFAULT_GROUP);
        assert_eq!(groups[0].len(), 1);

        provider.unexport();
        assert!(store.snapshot("com.demo.Echo@bolt")[0].is_empty());
        assert!(!provider.is_exported());
    }

    #[test]
    fn handle_round_trips_through_the_chain() {
        let runtime = Arc::new(RpcRuntime::new(RpcConfig::default()));
        let provider = ProviderBootstrap::new(
            runtime,
            ProviderConfig::new("com.demo.Echo", "127.0.0.1", 12200),
            echo(),
        );
        assert!(provider.handle(b"{}").is_err());
        provider.export().unwrap();

        let context = SerializeContext::new(Side::Consumer);
        let request = RpcRequest::new("com.demo.Echo", "echo")
            .with_arg(RpcPayload::new("java.lang.String", json!("hi")));
        let bytes = crate::serialize::JsonSerializer
            .encode_request(&request, &context)
            .unwrap();
        let reply = provider.handle(&bytes).unwrap();
        let response: RpcResponse = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.value.unwrap().value, json!("hi"));
        assert_eq!(response.attachments.get("side").map(String::as_str), Some("provider"));
    }
}
