//! # spark-rpc
//!
//! ## 定位与职责（Why）
//! - RPC 框架客户端一侧的服务发现与调用路由核心：决定每次出站调用使用哪个远端地址、
//!   如何穿过有序的过滤链、哪些类型允许跨线序列化、新实例如何逐步接流；
//! - 在注册中心推送与业务线程并发调用同时发生时，保证地址簿读写一致、同一配置只有一个
//!   注册中心实例、过滤器顺序确定。
//!
//! ## 架构嵌入（Where）
//! - `extension`：按别名解析注册中心、过滤器、序列化器、负载均衡的具体实现；
//! - `security`、`overrides`：类名前缀黑白名单与覆盖语法；
//! - `warmup`、`provider`、`address`：提供者数据模型、预热权重与多分组地址簿；
//! - `registry`、`schedule`：注册中心抽象、实例表、内存实现与周期任务；
//! - `filter`、`balance`、`serialize`、`transport`：调用路径上的各个环节；
//! - `bootstrap`、`runtime`、`config`：把上述部件组装成可引用、可发布的服务。
//!
//! ## 约束（Trade-offs）
//! - 调用路径是同步阻塞的，单次调用超时属于传输实现；
//! - 所有共享状态由 [`RpcRuntime`] 持有并显式传递，不使用进程级静态变量。

pub mod address;
pub mod balance;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod extension;
pub mod filter;
pub mod invocation;
pub mod observability;
pub mod overrides;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod security;
pub mod serialize;
pub mod transport;
pub mod warmup;

pub use address::{AddressBookListener, AddressHolder, MultiGroupAddressHolder};
pub use balance::{LoadBalancer, WeightedRoundRobin};
pub use bootstrap::{ClusterInvoker, ConsumerBootstrap, ConsumerConfig, ProviderBootstrap, ProviderConfig};
pub use config::RpcConfig;
pub use error::{ErrorCategory, Result, RpcError};
pub use extension::{ExtensionDefinition, ExtensionLoader};
pub use filter::{Filter, FilterChain, FilterDescriptor, Invoker, InvokerContext};
pub use invocation::{RpcPayload, RpcRequest, RpcResponse, Side};
pub use provider::{ProviderGroup, ProviderInfo, ProviderStatus};
pub use registry::{Registry, RegistryConfig, RegistryFactory, ServiceDescriptor, SubscriberCallback};
pub use runtime::RpcRuntime;
pub use schedule::{ScheduleMode, ScheduledService, ScheduledTaskRegistry};
pub use security::{SerializeCheckMode, SerializeSecurityChecker};
pub use serialize::{DecodeTemplate, SecureSerializer, SerializeContext, Serializer};
pub use transport::Transport;
pub use warmup::WarmupWeightCalculator;
