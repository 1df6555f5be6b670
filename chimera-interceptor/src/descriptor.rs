//! 组件描述与拦截器绑定
//!
//! [`ComponentDescriptor`] 是部署期交给引擎的组件元数据：组件类、按顺序声明的拦截器绑定、
//! 组件类自身声明的回调与 around 方法，以及是否启用旧式命名回调。
//! 描述本身可以由 serde 反序列化（例如 TOML），解析 XML 等部署描述符不在引擎职责内。

use crate::class::ClassName;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 生命周期事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackKind {
    AroundConstruct,
    PostConstruct,
    PreDestroy,
    PrePassivate,
    PostActivate,
}

impl CallbackKind {
    /// 所有事件类型，按链的构建顺序排列
    pub const ALL: [CallbackKind; 5] = [
        CallbackKind::AroundConstruct,
        CallbackKind::PostConstruct,
        CallbackKind::PreDestroy,
        CallbackKind::PrePassivate,
        CallbackKind::PostActivate,
    ];

    /// 旧式组件约定的回调方法名
    ///
    /// AROUND_CONSTRUCT 没有旧式回调
    pub fn legacy_method_name(&self) -> Option<&'static str> {
        match self {
            CallbackKind::AroundConstruct => None,
            CallbackKind::PostConstruct => Some("ejbCreate"),
            CallbackKind::PreDestroy => Some("ejbRemove"),
            CallbackKind::PrePassivate => Some("ejbPassivate"),
            CallbackKind::PostActivate => Some("ejbActivate"),
        }
    }

    /// 组件类自身是否可以声明该类回调
    pub fn allows_bean_level(&self) -> bool {
        !matches!(self, CallbackKind::AroundConstruct)
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackKind::AroundConstruct => "AROUND_CONSTRUCT",
            CallbackKind::PostConstruct => "POST_CONSTRUCT",
            CallbackKind::PreDestroy => "PRE_DESTROY",
            CallbackKind::PrePassivate => "PRE_PASSIVATE",
            CallbackKind::PostActivate => "POST_ACTIVATE",
        };
        f.write_str(name)
    }
}

/// 拦截器绑定
///
/// 一个拦截器类以及它为各类事件声明的方法名。`methods` 为空表示作用于所有业务方法，
/// 否则只作用于名称匹配任一模式的方法（支持 `*` 通配）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorBinding {
    pub class: ClassName,
    pub callbacks: BTreeMap<CallbackKind, Vec<String>>,
    pub around_invoke: Vec<String>,
    pub around_timeout: Vec<String>,
    pub methods: Vec<String>,
}

impl InterceptorBinding {
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    /// 声明一个生命周期回调方法
    pub fn callback(mut self, kind: CallbackKind, method: impl Into<String>) -> Self {
        self.callbacks.entry(kind).or_default().push(method.into());
        self
    }

    pub fn around_invoke(mut self, method: impl Into<String>) -> Self {
        self.around_invoke.push(method.into());
        self
    }

    pub fn around_timeout(mut self, method: impl Into<String>) -> Self {
        self.around_timeout.push(method.into());
        self
    }

    /// 限定作用的业务方法名模式
    pub fn for_methods<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// 为指定事件声明的回调方法名
    pub fn callbacks_for(&self, kind: CallbackKind) -> &[String] {
        self.callbacks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 是否作用于指定名称的业务方法
    pub fn applies_to(&self, method: &str) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|pattern| pattern_matches(pattern, method))
    }
}

/// 简单通配匹配
///
/// - `*` 匹配所有
/// - `get*` 以 get 开头
/// - `*Order` 以 Order 结尾
fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains('*') {
        return pattern == target;
    }

    let regex_pattern = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    match Regex::new(&format!("^{}$", regex_pattern)) {
        Ok(regex) => regex.is_match(target),
        Err(e) => {
            tracing::warn!(pattern = pattern, error = %e, "Invalid method pattern, ignoring");
            false
        }
    }
}

fn default_true() -> bool {
    true
}

/// 组件描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// 组件名称（用于日志）
    pub name: String,

    /// 组件类
    pub bean_class: ClassName,

    /// 组件级拦截器绑定，按声明顺序
    #[serde(default)]
    pub interceptors: Vec<InterceptorBinding>,

    /// 组件类自身声明的生命周期回调
    #[serde(default)]
    pub bean_callbacks: BTreeMap<CallbackKind, Vec<String>>,

    /// 组件类自身的 around-invoke 方法
    #[serde(default)]
    pub bean_around_invoke: Vec<String>,

    /// 组件类自身的 around-timeout 方法
    #[serde(default)]
    pub bean_around_timeout: Vec<String>,

    /// 是否启用旧式命名回调（`ejbCreate` 等）
    #[serde(default = "default_true")]
    pub legacy_callbacks: bool,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, bean_class: impl Into<ClassName>) -> Self {
        Self {
            name: name.into(),
            bean_class: bean_class.into(),
            legacy_callbacks: true,
            ..Default::default()
        }
    }

    /// 追加组件级拦截器绑定
    pub fn interceptor(mut self, binding: InterceptorBinding) -> Self {
        self.interceptors.push(binding);
        self
    }

    /// 组件类自身的生命周期回调
    pub fn bean_callback(mut self, kind: CallbackKind, method: impl Into<String>) -> Self {
        self.bean_callbacks.entry(kind).or_default().push(method.into());
        self
    }

    pub fn bean_around_invoke(mut self, method: impl Into<String>) -> Self {
        self.bean_around_invoke.push(method.into());
        self
    }

    pub fn bean_around_timeout(mut self, method: impl Into<String>) -> Self {
        self.bean_around_timeout.push(method.into());
        self
    }

    pub fn legacy_callbacks(mut self, enabled: bool) -> Self {
        self.legacy_callbacks = enabled;
        self
    }

    pub fn bean_callbacks_for(&self, kind: CallbackKind) -> &[String] {
        self.bean_callbacks
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 从 TOML 文本解析描述
    pub fn from_toml_str(content: &str) -> crate::InterceptorResult<Self> {
        toml::from_str(content).map_err(|e| {
            crate::InterceptorError::configuration(format!(
                "Failed to parse component descriptor: {}",
                e
            ))
        })
    }
}
