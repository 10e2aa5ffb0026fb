//! 日志出口。
//!
//! 核心只通过 `tracing` 宏输出结构化事件，是否安装以及安装哪种 Subscriber 由宿主决定。
//! [`install_fmt_subscriber`] 为没有自带 Subscriber 的宿主提供一个 `fmt + EnvFilter` 组合。

use tracing::dispatcher;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use crate::error::{Result, RpcError};

/// 安装全局 `fmt` Subscriber。
///
/// # 教案式说明
/// - **逻辑（How）**：优先读取 `RUST_LOG`，缺省时使用 `default_directives`（如 `"spark_rpc=info"`）；
/// - **契约（What）**：已有全局 Subscriber 时不做任何事并返回 `Ok(false)`，重复调用安全；
///   指令串非法时返回配置错误。
pub fn install_fmt_subscriber(default_directives: &str) -> Result<bool> {
    if dispatcher::has_been_set() {
        return Ok(false);
    }
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives).map_err(|err| {
            RpcError::config(format!("invalid log directives `{default_directives}`: {err}"))
        })?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    Ok(tracing::subscriber::set_global_default(subscriber).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        let _ = install_fmt_subscriber("spark_rpc=info");
        assert!(
            !install_fmt_subscriber("spark_rpc=debug").expect("已安装时不应报错"),
            "全局 Subscriber 只能安装一次"
        );
    }
}
