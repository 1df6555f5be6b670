//! 引擎配置
//!
//! 配置可以从 TOML 加载，再用带前缀的环境变量覆盖：
//!
//! ```toml
//! legacy_callbacks = true
//! system_interceptor = true
//! disabled_framework_interceptors = ["chimera.tx.TxInterceptor"]
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! 对应的环境变量为 `CHIMERA_INTERCEPTOR_LEGACY_CALLBACKS`、
//! `CHIMERA_INTERCEPTOR_DISABLED_FRAMEWORK_INTERCEPTORS`（逗号分隔）、
//! `CHIMERA_INTERCEPTOR_LOG_LEVEL` 等。

use crate::error::{InterceptorError, InterceptorResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 默认的环境变量前缀
pub const ENV_PREFIX: &str = "CHIMERA_INTERCEPTOR_";

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorSettings {
    /// 是否启用旧式命名回调（与组件描述中的开关同时生效）
    pub legacy_callbacks: bool,

    /// 是否在框架拦截器最前面加入平台委托拦截器
    pub system_interceptor: bool,

    /// 被禁用的框架拦截器类
    pub disabled_framework_interceptors: Vec<String>,

    pub logging: LoggingConfig,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            legacy_callbacks: true,
            system_interceptor: true,
            disabled_framework_interceptors: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl InterceptorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn legacy_callbacks(mut self, enabled: bool) -> Self {
        self.legacy_callbacks = enabled;
        self
    }

    pub fn system_interceptor(mut self, enabled: bool) -> Self {
        self.system_interceptor = enabled;
        self
    }

    pub fn disable_framework_interceptor(mut self, class: impl Into<String>) -> Self {
        self.disabled_framework_interceptors.push(class.into());
        self
    }

    pub fn is_disabled(&self, class: &str) -> bool {
        self.disabled_framework_interceptors
            .iter()
            .any(|disabled| disabled == class)
    }

    /// 按 `[logging]` 配置初始化全局日志订阅者
    pub fn init_logging(&self) -> InterceptorResult<()> {
        self.logging.init()
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> InterceptorResult<Self> {
        toml::from_str(content).map_err(|e| {
            InterceptorError::configuration(format!("Failed to parse interceptor settings: {}", e))
        })
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> InterceptorResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            InterceptorError::configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        tracing::debug!("Loaded interceptor settings from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// 使用当前进程的环境变量覆盖
    pub fn apply_env(self) -> InterceptorResult<Self> {
        self.apply_overrides(std::env::vars(), ENV_PREFIX)
    }

    /// 使用给定的键值对覆盖，只处理带前缀的键
    pub fn apply_overrides<I, K, V>(mut self, vars: I, prefix: &str) -> InterceptorResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(prefix) else {
                continue;
            };
            let value = value.as_ref().trim();

            match name {
                "LEGACY_CALLBACKS" => self.legacy_callbacks = parse_bool(name, value)?,
                "SYSTEM_INTERCEPTOR" => self.system_interceptor = parse_bool(name, value)?,
                "DISABLED_FRAMEWORK_INTERCEPTORS" => {
                    self.disabled_framework_interceptors = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                "LOG_LEVEL" => {
                    self.logging.level = value.parse().map_err(InterceptorError::Configuration)?;
                }
                "LOG_FORMAT" => {
                    self.logging.format = value.parse().map_err(InterceptorError::Configuration)?;
                }
                "LOG_FILTER" => self.logging.filter = Some(value.to_string()),
                _ => {
                    tracing::debug!("Ignoring unknown interceptor setting '{}{}'", prefix, name);
                    continue;
                }
            }
            tracing::debug!("Interceptor setting '{}' overridden from environment", name);
        }

        Ok(self)
    }
}

fn parse_bool(key: &str, value: &str) -> InterceptorResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(InterceptorError::configuration(format!(
            "Invalid boolean value '{}' for {}",
            value, key
        ))),
    }
}
