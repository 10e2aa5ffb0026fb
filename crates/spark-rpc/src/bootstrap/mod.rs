//! # 引用与发布
//!
//! 把地址簿、注册中心、过滤链、负载均衡、序列化与传输组装成一条可调用的路径：
//! - [`ConsumerBootstrap`]：`refer` 订阅地址并返回消费方过滤链，`unrefer` 取消订阅；
//! - [`ProviderBootstrap`]：`export` 装配服务方过滤链并注册地址，`handle` 处理一次入站请求，
//!   `unexport` 撤下地址。

mod consumer;
mod provider;

pub use consumer::{ClusterInvoker, ConsumerBootstrap, ConsumerConfig};
pub use provider::{ProviderBootstrap, ProviderConfig};

/// 未显式指定时使用的协议名。
pub const DEFAULT_PROTOCOL: &str = "bolt";
