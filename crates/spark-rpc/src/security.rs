//! # 序列化安全门
//!
//! 按类名前缀决定一个类型能否跨线传输。名单由内置资源加载，再依次叠加覆盖串
//! （语法见 [`crate::overrides`]），运行期可以继续覆盖。
//!
//! 名单保存在 `ArcSwap` 快照中：检查路径只做一次 `load`，覆盖时整体替换快照，
//! 快照内附带的判定缓存随之作废。

use std::fmt;
use std::str::FromStr;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};
use crate::invocation::Side;
use crate::overrides::{apply_override, parse_list};

const DEFAULT_BLACKLIST: &str = include_str!("../resources/default-serialize-blacklist.txt");
const DEFAULT_WHITELIST: &str = include_str!("../resources/default-serialize-whitelist.txt");

/// 名单条目的通配符标记。
const WILDCARD: char = '*';

/// 每份名单快照最多缓存的判定条数。
///
/// 类名来自对端报文，缓存满后新类名每次都重新匹配，不再入缓存；WARN 模式下这意味着
/// 同一个未登记类名的告警可能重复出现。
pub const VERDICT_CACHE_CAPACITY: usize = 4096;

/// 检查模式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializeCheckMode {
    /// 不做任何检查。
    Disable,
    /// 只看黑名单：命中即记录告警并拒绝；其余放行，不在白名单中的类会额外记录告警。
    Warn,
    /// 白名单为准：必须命中白名单且不命中黑名单。
    #[default]
    Strict,
}

impl FromStr for SerializeCheckMode {
    type Err = RpcError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SerializeCheckMode::Disable),
            "warn" => Ok(SerializeCheckMode::Warn),
            "strict" => Ok(SerializeCheckMode::Strict),
            other => Err(RpcError::config(format!(
                "unknown serialize check mode `{other}`"
            ))),
        }
    }
}

impl fmt::Display for SerializeCheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SerializeCheckMode::Disable => "disable",
            SerializeCheckMode::Warn => "warn",
            SerializeCheckMode::Strict => "strict",
        };
        f.write_str(label)
    }
}

/// 判定结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Verdict {
    Allow,
    Deny,
}

struct ClassLists {
    allow: Vec<String>,
    deny: Vec<String>,
    cache: DashMap<String, Verdict>,
}

impl ClassLists {
    fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            allow,
            deny,
            cache: DashMap::new(),
        }
    }
}

fn matches_any(entries: &[String], class_name: &str) -> bool {
    entries
        .iter()
        .any(|entry| class_name.starts_with(entry.trim_end_matches(WILDCARD)))
}

/// 序列化安全检查器。
///
/// # 契约说明（What）
/// - [`SerializeSecurityChecker::check`] 在编码与解码两侧调用，拒绝时返回
///   [`RpcError::SerializeDenied`]；
/// - 覆盖方法可在调用进行中执行，正在检查的线程看到的是覆盖前或覆盖后的完整名单之一。
pub struct SerializeSecurityChecker {
    mode: SerializeCheckMode,
    lists: ArcSwap<ClassLists>,
}

impl fmt::Debug for SerializeSecurityChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.lists.load();
        f.debug_struct("SerializeSecurityChecker")
            .field("mode", &self.mode)
            .field("allow", &lists.allow.len())
            .field("deny", &lists.deny.len())
            .finish()
    }
}

impl SerializeSecurityChecker {
    /// 以内置名单构造。
    pub fn new(mode: SerializeCheckMode) -> Self {
        Self::with_lists(mode, parse_list(DEFAULT_WHITELIST), parse_list(DEFAULT_BLACKLIST))
    }

    /// 以显式名单构造。
    pub fn with_lists(mode: SerializeCheckMode, allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            mode,
            lists: ArcSwap::from_pointee(ClassLists::new(allow, deny)),
        }
    }

    /// 以内置名单构造，并依次叠加白名单、黑名单覆盖串。
    pub fn from_overrides<'a>(
        mode: SerializeCheckMode,
        whitelist_overrides: impl IntoIterator<Item = &'a str>,
        blacklist_overrides: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut allow = parse_list(DEFAULT_WHITELIST);
        let mut deny = parse_list(DEFAULT_BLACKLIST);
        crate::overrides::apply_overrides(&mut allow, whitelist_overrides);
        crate::overrides::apply_overrides(&mut deny, blacklist_overrides);
        Self::with_lists(mode, allow, deny)
    }

    pub fn mode(&self) -> SerializeCheckMode {
        self.mode
    }

    /// 当前白名单副本。
    pub fn whitelist(&self) -> Vec<String> {
        self.lists.load().allow.clone()
    }

    /// 当前黑名单副本。
    pub fn blacklist(&self) -> Vec<String> {
        self.lists.load().deny.clone()
    }

    /// 运行期覆盖白名单。
    pub fn override_whitelist(&self, overrides: &str) {
        self.lists.rcu(|current| {
            let mut allow = current.allow.clone();
            apply_override(&mut allow, overrides);
            ClassLists::new(allow, current.deny.clone())
        });
        tracing::info!(overrides, "serialize whitelist overridden");
    }

    /// 运行期覆盖黑名单。
    pub fn override_blacklist(&self, overrides: &str) {
        self.lists.rcu(|current| {
            let mut deny = current.deny.clone();
            apply_override(&mut deny, overrides);
            ClassLists::new(current.allow.clone(), deny)
        });
        tracing::info!(overrides, "serialize blacklist overridden");
    }

    /// 当前快照中已缓存的判定条数，不超过 [`VERDICT_CACHE_CAPACITY`]。
    pub fn cached_verdicts(&self) -> usize {
        self.lists.load().cache.len()
    }

    /// 检查类名是否允许跨线。
    pub fn check(&self, class_name: &str, side: Side) -> Result<()> {
        if self.mode == SerializeCheckMode::Disable {
            return Ok(());
        }
        let lists = self.lists.load();
        let verdict = match lists.cache.get(class_name) {
            Some(cached) => *cached,
            None => {
                let verdict = self.evaluate(&lists, class_name, side);
                if lists.cache.len() < VERDICT_CACHE_CAPACITY {
                    lists.cache.insert(class_name.to_owned(), verdict);
                }
                verdict
            }
        };
        match verdict {
            Verdict::Allow => Ok(()),
            Verdict::Deny => Err(RpcError::SerializeDenied {
                side,
                class_name: class_name.to_owned(),
            }),
        }
    }

    fn evaluate(&self, lists: &ClassLists, class_name: &str, side: Side) -> Verdict {
        let denied = matches_any(&lists.deny, class_name);
        let allowed = matches_any(&lists.allow, class_name);
        match self.mode {
            SerializeCheckMode::Disable => Verdict::Allow,
            SerializeCheckMode::Warn if denied => {
                tracing::warn!(class_name, %side, "class matches serialize blacklist, denied");
                Verdict::Deny
            }
            SerializeCheckMode::Warn => {
                if !allowed && !lists.allow.is_empty() {
                    tracing::warn!(
                        class_name,
                        %side,
                        "class is not in serialize whitelist, allowed in warn mode"
                    );
                }
                Verdict::Allow
            }
            SerializeCheckMode::Strict if allowed && !denied => Verdict::Allow,
            SerializeCheckMode::Strict => {
                tracing::debug!(class_name, %side, allowed, denied, "serialize check denied");
                Verdict::Deny
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(mode: SerializeCheckMode) -> SerializeSecurityChecker {
        SerializeSecurityChecker::with_lists(
            mode,
            vec!["com.allowed.*".into(), "com.mixed".into()],
            vec!["com.mixed.Evil".into()],
        )
    }

    #[test]
    fn strict_requires_allow_and_not_deny() {
        let checker = checker(SerializeCheckMode::Strict);
        assert!(checker.check("com.allowed.Order", Side::Consumer).is_ok());
        assert!(checker.check("com.mixed.Good", Side::Consumer).is_ok());
        let err = checker
            .check("com.mixed.Evil", Side::Provider)
            .expect_err("黑名单优先于白名单");
        assert_eq!(err.code(), "rpc.security.serialize_denied");
        assert!(checker.check("org.other.Thing", Side::Consumer).is_err());
    }

    #[test]
    fn disable_mode_allows_everything() {
        let checker = checker(SerializeCheckMode::Disable);
        assert!(checker.check("com.mixed.Evil", Side::Consumer).is_ok());
    }

    #[test]
    fn override_invalidates_cached_verdicts() {
        let checker = checker(SerializeCheckMode::Strict);
        assert!(checker.check("org.other.Thing", Side::Consumer).is_err());
        checker.override_whitelist("org.other.");
        assert!(checker.check("org.other.Thing", Side::Consumer).is_ok());
        checker.override_blacklist("org.other.Thing");
        assert!(checker.check("org.other.Thing", Side::Consumer).is_err());
    }

    #[test]
    fn bundled_lists_load() {
        let checker = SerializeSecurityChecker::new(SerializeCheckMode::Strict);
        assert!(checker.blacklist().iter().any(|e| e == "org.apache.commons.collections.functors."));
        assert!(checker.check("java.lang.String", Side::Consumer).is_ok());
        assert!(checker.check("java.lang.Runtime", Side::Consumer).is_err());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("WARN".parse::<SerializeCheckMode>().unwrap(), SerializeCheckMode::Warn);
        assert!("loose".parse::<SerializeCheckMode>().is_err());
    }
}
