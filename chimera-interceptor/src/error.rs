//! 错误类型定义
//!
//! 引擎只产生两类错误：
//! - [`InterceptorError`]：引擎自身的错误（配置、参数校验、状态误用、分发失败）
//! - [`DispatchError`]：分发设施（[`crate::DispatchFacility`]）在调用方法时产生的错误
//!
//! 业务方法或拦截器方法抛出的错误以 `anyhow::Error` 的形式原样透传，
//! 引擎不做任何包装或翻译。

use crate::class::ClassName;
use thiserror::Error;

/// 引擎构建期操作的结果类型
pub type InterceptorResult<T> = Result<T, InterceptorError>;

/// 拦截器引擎错误
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// 构建拦截链时的配置错误，对组件初始化是致命的
    #[error("Interceptor configuration error: {0}")]
    Configuration(String),

    /// `set_parameters` 参数个数或类型不匹配
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// 调用上下文被误用（例如越过终止动作继续 proceed）
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// 分发设施自身的失败（不是目标方法抛出的错误）
    #[error("Dispatch failed: {0}")]
    Dispatch(#[source] DispatchError),
}

impl InterceptorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// 是否为构建期配置错误
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// 是否为参数校验错误
    pub fn is_illegal_argument(&self) -> bool {
        matches!(self, Self::IllegalArgument(_))
    }

    /// 是否为状态误用错误
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }
}

/// 分发设施错误
///
/// `Target` 相当于"目标方法抛出异常"的包装，引擎会在唯一的分发入口处立即解包，
/// 其余变体表示设施本身无法完成调用。
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 被调用的方法体自身返回了错误
    #[error("invoked method raised an error: {0}")]
    Target(anyhow::Error),

    /// 类无法加载
    #[error("class not found: {0}")]
    ClassNotFound(ClassName),

    /// 类上不存在指定形态的方法
    #[error("no method '{method}' with shape {shape} on class {class}")]
    NoSuchMethod {
        class: ClassName,
        method: String,
        shape: String,
    },

    /// 类没有可用的无参构造
    #[error("class {0} has no no-argument constructor")]
    NoDefaultConstructor(ClassName),

    /// 实例化失败
    #[error("failed to instantiate {class}: {reason}")]
    Instantiation { class: ClassName, reason: String },

    /// 接收者类型与方法声明类不符
    #[error("receiver is not an instance of {class} (method '{method}')")]
    ReceiverMismatch { class: ClassName, method: String },

    /// 返回值无法还原为调用方期望的类型
    #[error("return value of type {found} cannot be converted to {expected}")]
    ReturnType { expected: String, found: String },

    /// 方法形态与传入的参数形态不符
    #[error("method '{method}' cannot be invoked with {given}")]
    ArgumentShape { method: String, given: &'static str },
}

impl DispatchError {
    /// 将错误分离为"目标错误"或"设施错误"
    ///
    /// 目标错误直接返回原始的 `anyhow::Error`，调用方看不到任何包装
    pub fn into_cause(self) -> anyhow::Error {
        match self {
            DispatchError::Target(cause) => cause,
            other => InterceptorError::Dispatch(other).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("insufficient funds")]
    struct InsufficientFunds;

    #[test]
    fn test_target_error_is_unwrapped() {
        let err = DispatchError::Target(InsufficientFunds.into()).into_cause();
        assert!(err.downcast_ref::<InsufficientFunds>().is_some());
        assert!(err.downcast_ref::<InterceptorError>().is_none());
    }

    #[test]
    fn test_facility_error_becomes_dispatch() {
        let err = DispatchError::ClassNotFound(ClassName::new("Missing")).into_cause();
        let engine = err.downcast_ref::<InterceptorError>().unwrap();
        assert!(matches!(engine, InterceptorError::Dispatch(DispatchError::ClassNotFound(_))));
    }

    #[test]
    fn test_error_kind_predicates() {
        assert!(InterceptorError::configuration("x").is_configuration());
        assert!(InterceptorError::illegal_argument("x").is_illegal_argument());
        assert!(InterceptorError::illegal_state("x").is_illegal_state());
    }
}
