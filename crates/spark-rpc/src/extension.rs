//! # 扩展加载器
//!
//! 以「别名 → 构造闭包」的映射把抽象能力（注册中心、过滤器、序列化器、负载均衡）绑定到具体实现。
//! 注册在运行时构造阶段显式完成，没有任何动态加载。
//!
//! 同名扩展按 `order` 决胜：后注册且 `order` 更高的定义替换旧定义，否则被拒绝。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Result, RpcError};

/// 扩展构造闭包：接收构造参数 `A`，返回能力对象。
pub type ExtensionFactory<T, A> = Arc<dyn Fn(&A) -> Result<Arc<T>> + Send + Sync>;

/// 一条扩展定义。
pub struct ExtensionDefinition<T: ?Sized, A = ()> {
    pub alias: String,
    pub order: i32,
    /// 为 `true` 时首次构造的实例会被缓存并复用，之后的构造参数被忽略。
    pub singleton: bool,
    pub factory: ExtensionFactory<T, A>,
}

impl<T: ?Sized, A> ExtensionDefinition<T, A> {
    pub fn new<F>(alias: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&A) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            alias: alias.into(),
            order: 0,
            singleton: true,
            factory: Arc::new(factory),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// 每次 `get` 都重新构造。
    pub fn prototype(mut self) -> Self {
        self.singleton = false;
        self
    }
}

impl<T: ?Sized, A> Clone for ExtensionDefinition<T, A> {
    fn clone(&self) -> Self {
        Self {
            alias: self.alias.clone(),
            order: self.order,
            singleton: self.singleton,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: ?Sized, A> fmt::Debug for ExtensionDefinition<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDefinition")
            .field("alias", &self.alias)
            .field("order", &self.order)
            .field("singleton", &self.singleton)
            .finish()
    }
}

/// 某一能力的扩展加载器。
///
/// # 契约说明（What）
/// - `capability` 是能力名，出现在 [`RpcError::ExtensionNotFound`] 中；
/// - `get` 对未知别名返回配置类错误；
/// - 单例缓存使用 `DashMap::entry`，并发首次构造只会保留一个实例。
pub struct ExtensionLoader<T: ?Sized + Send + Sync + 'static, A = ()> {
    capability: &'static str,
    definitions: RwLock<HashMap<String, ExtensionDefinition<T, A>>>,
    singletons: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static, A> fmt::Debug for ExtensionLoader<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionLoader")
            .field("capability", &self.capability)
            .field("aliases", &self.aliases())
            .finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static, A> ExtensionLoader<T, A> {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            definitions: RwLock::new(HashMap::new()),
            singletons: DashMap::new(),
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// 注册扩展，返回是否生效。
    pub fn register(&self, definition: ExtensionDefinition<T, A>) -> bool {
        let mut definitions = self.definitions.write();
        if let Some(existing) = definitions.get(&definition.alias) {
            if existing.order >= definition.order {
                tracing::warn!(
                    capability = self.capability,
                    alias = %definition.alias,
                    existing_order = existing.order,
                    rejected_order = definition.order,
                    "extension rejected by an existing definition with higher or equal order"
                );
                return false;
            }
            tracing::info!(
                capability = self.capability,
                alias = %definition.alias,
                order = definition.order,
                "extension overridden"
            );
            self.singletons.remove(&definition.alias);
        }
        definitions.insert(definition.alias.clone(), definition);
        true
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.definitions.read().contains_key(alias)
    }

    /// 已注册别名，按 `order` 升序，同序按别名排序。
    pub fn aliases(&self) -> Vec<String> {
        let definitions = self.definitions.read();
        let mut entries: Vec<(i32, &String)> = definitions
            .values()
            .map(|definition| (definition.order, &definition.alias))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, alias)| alias.clone()).collect()
    }

    /// 按别名取得实例。
    pub fn get(&self, alias: &str, args: &A) -> Result<Arc<T>> {
        let definition = self
            .definitions
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| RpcError::ExtensionNotFound {
                capability: self.capability,
                alias: alias.to_owned(),
            })?;

        if !definition.singleton {
            return (definition.factory)(args);
        }
        if let Some(cached) = self.singletons.get(alias) {
            return Ok(Arc::clone(cached.value()));
        }
        let entry = self.singletons.entry(alias.to_owned());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let instance = (definition.factory)(args)?;
                vacant.insert(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionLoader<T, ()> {
    /// 无构造参数的便捷入口。
    pub fn get_default(&self, alias: &str) -> Result<Arc<T>> {
        self.get(alias, &())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_owned()
        }
    }

    #[test]
    fn unknown_alias_names_missing_extension() {
        let loader: ExtensionLoader<dyn Greeter> = ExtensionLoader::new("greeter");
        let err = loader.get_default("nope").err().expect("未注册别名应报错");
        assert_eq!(err.code(), "rpc.config.extension_missing");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn higher_order_overrides_lower() {
        let loader: ExtensionLoader<dyn Greeter> = ExtensionLoader::new("greeter");
        assert!(loader.register(ExtensionDefinition::new("hi", |_: &()| {
            Ok(Arc::new(Fixed("low")) as Arc<dyn Greeter>)
        })));
        assert!(!loader.register(
            ExtensionDefinition::new("hi", |_: &()| Ok(Arc::new(Fixed("same")) as Arc<dyn Greeter>))
        ));
        assert!(loader.register(
            ExtensionDefinition::new("hi", |_: &()| Ok(Arc::new(Fixed("high")) as Arc<dyn Greeter>))
                .with_order(10)
        ));
        assert_eq!(loader.get_default("hi").unwrap().greet(), "high");
    }

    #[test]
    fn singleton_is_built_once_prototype_every_time() {
        let built = Arc::new(AtomicUsize::new(0));
        let loader: ExtensionLoader<dyn Greeter> = ExtensionLoader::new("greeter");
        let counter = Arc::clone(&built);
        loader.register(ExtensionDefinition::new("single", move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Fixed("s")) as Arc<dyn Greeter>)
        }));
        let counter = Arc::clone(&built);
        loader.register(
            ExtensionDefinition::new("proto", move |_: &()| {
                counter.fetch_add(100, Ordering::SeqCst);
                Ok(Arc::new(Fixed("p")) as Arc<dyn Greeter>)
            })
            .prototype(),
        );

        let a = loader.get_default("single").unwrap();
        let b = loader.get_default("single").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        loader.get_default("proto").unwrap();
        loader.get_default("proto").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 201);
    }

    #[test]
    fn aliases_sorted_by_order() {
        let loader: ExtensionLoader<dyn Greeter> = ExtensionLoader::new("greeter");
        for (alias, order) in [("b", 5), ("a", 5), ("c", -1)] {
            loader.register(
                ExtensionDefinition::new(alias, |_: &()| Ok(Arc::new(Fixed("x")) as Arc<dyn Greeter>))
                    .with_order(order),
            );
        }
        assert_eq!(loader.aliases(), vec!["c", "a", "b"]);
    }
}
